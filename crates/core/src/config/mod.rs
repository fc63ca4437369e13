//! 配置管理
//!
//! 配置按 默认值 → TOML 文件 → `CRAWLER_` 环境变量 的顺序叠加,
//! 加载完成后逐节校验。

pub mod models;

pub use models::*;
