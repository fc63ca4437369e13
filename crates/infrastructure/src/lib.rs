pub mod assignment_outbox;
pub mod content_store;
pub mod object_store;
pub mod observability;
pub mod snapshot_writer;

pub use assignment_outbox::{InMemoryAssignmentOutbox, OutboxStats};
pub use content_store::TieredContentStore;
pub use object_store::{HttpObjectStore, InMemoryObjectStore, LocalObjectStore};
pub use observability::*;
pub use snapshot_writer::SnapshotWriter;
