pub mod dispatch;
pub mod storage;

pub use dispatch::AssignmentSink;
pub use storage::{ContentStore, ObjectStore};
