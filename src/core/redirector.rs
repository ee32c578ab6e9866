//! Two-party blind relay

use async_trait::async_trait;
use log::{debug, info, trace};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::core::connection::{Connection, DisconnectReason};
use crate::core::handshake::{outdated_advisory, peek_client_version};
use crate::core::listener::NetListener;
use crate::core::message::Packet;

/// Contains a host and a client, forwards packets from one to the other
pub struct Redirector {
    host: Arc<Connection>,
    client: RwLock<Option<Arc<Connection>>>,
    /// Minimum client build; `None` disables handshake inspection
    min_client_version: Option<i32>,
    inspected: AtomicBool,
}

impl Redirector {
    pub fn new(host: Arc<Connection>, min_client_version: Option<i32>) -> Self {
        Self {
            host,
            client: RwLock::new(None),
            min_client_version,
            inspected: AtomicBool::new(false),
        }
    }

    pub fn host(&self) -> &Arc<Connection> {
        &self.host
    }

    pub async fn client(&self) -> Option<Arc<Connection>> {
        self.client.read().await.clone()
    }

    /// An open redirector is still waiting for its client
    pub async fn is_open(&self) -> bool {
        self.client.read().await.is_none()
    }

    pub fn is_host(&self, connection: &Connection) -> bool {
        self.host.id() == connection.id()
    }

    /// Bind the client side. Fails if a client is already bound.
    pub async fn bind_client(&self, client: Arc<Connection>) -> bool {
        let mut slot = self.client.write().await;
        if slot.is_some() {
            return false;
        }
        *slot = Some(client);
        true
    }

    /// Peek at the first frame a client sends and warn outdated builds
    fn inspect_first_frame(&self, client: &Connection, payload: &[u8]) {
        let Some(minimum) = self.min_client_version else {
            return;
        };
        if self.inspected.swap(true, Ordering::AcqRel) {
            return;
        }

        match peek_client_version(payload) {
            Ok(Some(version)) if version < minimum => {
                info!(
                    "Connection {} joined with outdated build {} (minimum {}).",
                    client.id(),
                    version,
                    minimum
                );
                client.send_text(&outdated_advisory(version, minimum));
            }
            Ok(_) => {}
            Err(e) => debug!(
                "Could not inspect handshake from connection {}: {}",
                client.id(),
                e
            ),
        }
    }
}

#[async_trait]
impl NetListener for Redirector {
    async fn connected(&self, connection: &Arc<Connection>) {
        if self.is_host(connection) {
            debug!("Redirector opened by connection {}.", connection.id());
        } else {
            debug!(
                "Connection {} paired with redirector host {}.",
                connection.id(),
                self.host.id()
            );
        }
    }

    async fn disconnected(&self, _connection: Option<&Connection>, _reason: DisconnectReason) {
        self.host.close(DisconnectReason::Closed);
        if let Some(client) = self.client().await {
            client.close(DisconnectReason::Closed);
        }
    }

    async fn received(&self, connection: &Connection, packet: Packet) {
        let receiver = if self.is_host(connection) {
            self.client().await
        } else {
            if let Packet::Raw(payload) = &packet {
                self.inspect_first_frame(connection, payload);
            }
            Some(Arc::clone(&self.host))
        };

        match receiver {
            Some(receiver) => {
                receiver.send(packet);
            }
            None => trace!(
                "Dropping packet from connection {}: redirector has no client yet",
                connection.id()
            ),
        }
    }
}

impl std::fmt::Debug for Redirector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Redirector")
            .field("host", &self.host.id())
            .finish_non_exhaustive()
    }
}
