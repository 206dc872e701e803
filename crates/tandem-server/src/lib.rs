//! Realtime transport and REST surface: sockets, presence, fan-out and the
//! HTTP API.

pub mod client;
pub mod context;
pub mod fanout;
pub mod http;
pub mod presence;
pub mod router;
pub mod server;

pub use context::ChatContext;
pub use server::{build_router, start, AppState, ServerConfig, ServerHandle};
