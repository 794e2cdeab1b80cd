//! 实时推送接入层

pub mod frame;
pub mod manager;
pub mod session;

pub use frame::{AuthRequest, WsFrame};
pub use manager::{Connection, WsManager};
pub use session::{WsState, ws_handler};
