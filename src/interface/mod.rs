//! 对外接入层（WebSocket 推送）

pub mod ws;
