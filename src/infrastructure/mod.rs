//! 基础设施层
//!
//! 定位服务聚合、本地缓存、指令关联、鉴权与内存版数据访问实现。

pub mod auth;
pub mod cache;
pub mod command_tracker;
pub mod geo;
pub mod location;
pub mod memory;
