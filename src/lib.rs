//! Rusty Relay - A rendezvous and relay server implemented in Rust
//!
//! A host registers a room and receives a link; clients presenting the
//! link are paired with one of the host's redirectors, which then forward
//! raw frames between the two TCP connections without interpreting them.

pub mod blacklist;
pub mod config;
pub mod console;
pub mod constants;
pub mod core;
pub mod error;
pub mod handlers;

// Re-export main components
pub use config::*;
pub use constants::*;
