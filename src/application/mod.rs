//! 应用层：上行消息处理与下行指令编排

pub mod dispatch;
pub mod processor;

pub use dispatch::CommandService;
pub use processor::MessageProcessor;
