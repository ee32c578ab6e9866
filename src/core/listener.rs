//! Network event capability interface

use async_trait::async_trait;
use std::sync::Arc;

use crate::core::connection::{Connection, DisconnectReason};
use crate::core::message::Packet;

/// Receives the events of the connections it is attached to
#[async_trait]
pub trait NetListener: Send + Sync {
    /// A connection was attached to this listener
    async fn connected(&self, _connection: &Arc<Connection>) {}

    /// `connection` is `None` when the teardown is forced from outside,
    /// e.g. by a closing room
    async fn disconnected(&self, connection: Option<&Connection>, reason: DisconnectReason);

    async fn received(&self, connection: &Connection, packet: Packet);
}
