//! Session snapshots on disk
//!
//! Used by the gateway on disconnect and resume. Failures here are logged by
//! callers and never fail the operation that triggered them.

pub mod cleanup;
pub mod snapshot;
pub mod store;

pub use cleanup::PeriodicCleanup;
pub use snapshot::{SessionSnapshot, SnapshotInfo};
pub use store::{is_valid_session_id, PersistenceStore, StorageStats};
