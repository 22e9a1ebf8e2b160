//! Poll hub library.
//!
//! Real-time fan-out of poll, vote and comment notifications to WebSocket
//! clients grouped by voting group. The CRUD layer embeds a [`Registry`]
//! (through a [`Notifier`]) and the binary entry point in main.rs serves it.

pub mod auth;
pub mod config;
pub mod hub;
pub mod server;

pub use hub::{Notifier, Registry};
pub use server::HubServer;
