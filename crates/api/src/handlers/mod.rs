pub mod health;
pub mod monitoring;
pub mod nodes;
pub mod reports;
pub mod tasks;
