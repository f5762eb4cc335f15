//! Connection gateway
//!
//! Owns live connections, decodes their frames, dispatches events to the
//! session store and request coordinator, and supervises liveness:
//! - dispatch.rs: `Gateway`, frame decoding and error reporting
//! - handlers.rs: one handler per inbound event
//! - recovery.rs: disconnect handling and `session_resume`
//! - heartbeat.rs: idle sweep and the background supervisor
//! - connection.rs: connection records and session subscriptions

mod config;
mod connection;
mod dispatch;
mod error;
mod handlers;
mod heartbeat;
mod recovery;

pub use config::GatewayConfig;
pub use connection::{ConnectionInfo, ConnectionRecord, ConnectionRegistry};
pub use dispatch::{Connection, Gateway};
pub use error::EventError;
pub use heartbeat::SweepReport;
pub use recovery::RECOVERED_PREFIX;
