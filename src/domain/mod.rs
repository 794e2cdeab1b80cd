//! 领域层：统一模型与仓储窄接口

pub mod models;
pub mod repository;

pub use models::*;
pub use repository::Repository;
