//! Control API for local callers
//!
//! Newline-delimited JSON over a Unix socket. Each request maps onto one
//! provisioner operation.

mod api;
mod handler;
mod server;

pub use api::{ApiError, ApiRequest, ApiResponse, ControlAction};
pub use handler::CommandHandler;
pub use server::{send_request, ControlServer, DEFAULT_SOCKET_PATH};
