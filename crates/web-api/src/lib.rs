//! Web API 层。
//!
//! 提供 Axum 路由，将 HTTP / WebSocket 请求委托给应用层的用例服务，
//! 并把实时帧交给进程内的消息中枢分发。

mod auth;
mod error;
mod frames;
mod routes;
mod state;
mod ws_connection;

pub use auth::{AuthUser, ClientInfo};
pub use error::{ApiError, ErrorBody};
pub use frames::{InboundFrame, OutboundFrame};
pub use routes::router;
pub use state::{AppState, Repositories};
pub use ws_connection::ConnectionSession;
