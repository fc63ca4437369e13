pub mod content;
pub mod entities;
pub mod messaging;
pub mod monitoring;
pub mod ports;
pub mod value_objects;

pub use content::*;
pub use crawler_core::{CrawlerError, CrawlerResult};
pub use entities::*;
pub use messaging::*;
pub use monitoring::*;
pub use ports::*;
pub use value_objects::*;
