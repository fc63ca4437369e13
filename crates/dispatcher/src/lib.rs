//! Crawl master
//!
//! 任务与节点注册表、心跳与超时监控、调度循环, 以及供 HTTP 层使用的控制器。

pub mod controller;
pub mod heartbeat_monitor;
pub mod node_registry;
pub mod scheduler;
pub mod state;
pub mod strategies;
pub mod task_registry;
pub mod timeout_monitor;

pub use controller::{EnqueueSummary, MasterController, RegistrationResponse};
pub use heartbeat_monitor::{HeartbeatMonitor, HeartbeatMonitorConfig, HeartbeatSweepReport};
pub use node_registry::{HeartbeatOutcome, NodeRegistry};
pub use scheduler::{CycleReport, MasterScheduler, ReportSender};
pub use state::{ClusterState, SharedClusterState};
pub use strategies::*;
pub use task_registry::{RecrawlOutcome, RequeueOutcome, TaskRegistry};
pub use timeout_monitor::TimeoutMonitor;
