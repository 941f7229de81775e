//! Transport layer for viewgate.
//!
//! Currently provides the WebSocket queue channel and HTTP status endpoints
//! via axum.

pub mod http;

pub use http::{ServerConfig, routes, serve};
