//! Conversation session management
//!
//! This module provides the `Session` aggregate and the `SessionStore` that owns it:
//! - Recording state machine (start / transcribe / complete)
//! - Conversation history, seed history and user steering notes
//! - Links to in-flight generation requests
//! - Disconnect recovery state

mod config;
mod error;
mod message;
mod session;
mod stats;
mod store;

pub use config::{SessionConfig, MAX_RESPONSE_COUNT, MIN_RESPONSE_COUNT};
pub use error::SessionError;
pub use message::{HistoryMessage, Message, RecoveryState, UserProfile};
pub use session::{HistoryEntry, MessageProvenance, PendingMessage, Session, SessionStatus};
pub use stats::SessionSummary;
pub use store::SessionStore;
