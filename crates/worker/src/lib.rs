//! 工作节点运行时: 与主节点之间的注册、心跳、拉取分配和结果上报

pub mod components;
pub mod service;

pub use components::{
    CrawlOutput, HeartbeatManager, MasterClient, PageProcessor, Registration, RetryPolicy,
};
pub use service::WorkerService;
