//! WebSocket server module
//!
//! Accepts authenticated WebSocket connections from browser clients, admits
//! them into the hub, and runs their reader/writer processes.

mod handler;
mod protocol;
mod websocket;

pub use handler::*;
pub use protocol::*;
pub use websocket::*;
