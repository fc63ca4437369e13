pub mod heartbeat_manager;
pub mod master_client;
pub mod page_processor;

pub use heartbeat_manager::HeartbeatManager;
pub use master_client::{MasterClient, Registration, RetryPolicy};
pub use page_processor::{CrawlOutput, PageProcessor};
