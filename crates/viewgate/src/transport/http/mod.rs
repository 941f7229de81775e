//! axum transport: WebSocket sessions plus read-only status routes.

mod routes;
mod server;
mod session;

pub use routes::routes;
pub use server::{ServerConfig, serve};
