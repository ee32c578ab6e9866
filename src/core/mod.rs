//! Core functionality for the relay server

pub mod connection;
pub mod handshake;
pub mod link;
pub mod listener;
pub mod message;
pub mod rate_limiter;
pub mod redirector;
pub mod room;
pub mod server;

// Re-export main components for convenience
pub use connection::{Connection, DisconnectReason, Outbound};
pub use listener::NetListener;
pub use message::{FrameworkMessage, Packet};
pub use rate_limiter::RateKeeper;
pub use redirector::Redirector;
pub use room::{PeerInfo, RedirectorInfo, Room, RoomInfo};
pub use server::{ServerManager, SharedServerManager};
