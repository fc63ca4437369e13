pub mod api_observability;
pub mod app_config;
pub mod master;
pub mod storage;
pub mod worker;

pub use api_observability::{ApiConfig, ObservabilityConfig};
pub use app_config::AppConfig;
pub use master::MasterConfig;
pub use storage::{PrimaryStoreConfig, StorageConfig};
pub use worker::WorkerConfig;
