pub mod coordinator;
pub mod info;
pub mod sink;

pub use coordinator::RequestCoordinator;
pub use info::{RequestInfo, RequestKind, RequestStats, RequestStatus};
pub use sink::OutboundSink;
