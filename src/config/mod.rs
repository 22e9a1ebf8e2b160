//! Configuration module
//!
//! Handles loading the hub's TOML settings file.

mod settings;

pub use settings::*;
