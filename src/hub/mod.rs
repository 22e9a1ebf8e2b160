//! Real-time fan-out hub
//!
//! Keeps the set of live connections, their room memberships, and delivers
//! notifications to every connection subscribed to a room.

mod connection;
mod notify;
mod registry;

pub use connection::*;
pub use notify::*;
pub use registry::*;
