//! 对象存储实现
//!
//! - [`HttpObjectStore`]: S3 兼容的主存储 (path-style 请求)
//! - [`LocalObjectStore`]: 本地文件系统, 作为回退层或单机模式下的唯一存储
//! - [`InMemoryObjectStore`]: 内存实现, 支持注入故障

mod http;
mod local;
mod memory;

pub use http::HttpObjectStore;
pub use local::LocalObjectStore;
pub use memory::InMemoryObjectStore;

use crawler_core::{CrawlerError, CrawlerResult};

/// 拒绝绝对路径和 `..` 片段
pub(crate) fn validate_object_path(path: &str) -> CrawlerResult<()> {
    if path.is_empty()
        || path.starts_with('/')
        || path.contains('\\')
        || path.split('/').any(|segment| segment == ".." || segment.is_empty())
    {
        return Err(CrawlerError::storage(format!("非法的对象路径: {path}")));
    }
    Ok(())
}
