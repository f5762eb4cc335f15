pub mod config;
pub mod gateway;
pub mod generation;
pub mod http;
pub mod persistence;
pub mod protocol;
pub mod request;
pub mod session;
pub mod transcription;

pub use config::Config;
pub use gateway::{Connection, Gateway, GatewayConfig};
pub use generation::{GenerationConfig, GenerationFactory, GenerationPort, MockGenerator};
pub use http::{create_router, AppState};
pub use persistence::{PeriodicCleanup, PersistenceStore};
pub use protocol::{ErrorCode, InboundEvent, OutboundEvent};
pub use request::{RequestCoordinator, RequestInfo, RequestKind, RequestStatus};
pub use session::{Session, SessionConfig, SessionStatus, SessionStore};
pub use transcription::{
    MockTranscriber, TranscriptionConfig, TranscriptionFactory, TranscriptionPort,
};
