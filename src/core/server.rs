//! Connection dispatcher: owns the room and redirector registries and
//! turns network events into registry mutations and relayed packets

use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};

use crate::blacklist::Blacklist;
use crate::config::ServerConfig;
use crate::constants::{
    CONTROL_HOST, CONTROL_JOIN, CONTROL_NEW, SHUTDOWN_WARNING, SPAM_WARNING,
};
use crate::core::connection::{Connection, DisconnectReason};
use crate::core::link::{generate_link, is_well_formed};
use crate::core::listener::NetListener;
use crate::core::message::Packet;
use crate::core::rate_limiter::RateKeeper;
use crate::core::redirector::Redirector;
use crate::core::room::{Room, RoomInfo};
use crate::error::{Result, RustyRelayError};

/// Per-connection state kept for every admitted connection
struct Peer {
    connection: Arc<Connection>,
    rate: RateKeeper,
}

/// Rooms keyed by host connection id, redirectors keyed by the id of
/// either of their sides
#[derive(Default)]
struct Registry {
    rooms: HashMap<u32, Room>,
    redirectors: HashMap<u32, Arc<Redirector>>,
}

impl Registry {
    fn find_by_link(&self, link: &str) -> Option<&Room> {
        self.rooms.values().find(|room| room.link == link)
    }

    fn find_by_link_mut(&mut self, link: &str) -> Option<&mut Room> {
        self.rooms.values_mut().find(|room| room.link == link)
    }

    fn room_of_mut(&mut self, redirector: &Arc<Redirector>) -> Option<&mut Room> {
        self.rooms.values_mut().find(|room| room.contains(redirector))
    }

    fn holds_role(&self, id: u32) -> bool {
        self.rooms.contains_key(&id) || self.redirectors.contains_key(&id)
    }

    fn holds_redirector(&self, id: u32) -> bool {
        self.redirectors.contains_key(&id)
    }
}

/// Integrated server service that dispatches connection events
pub struct ServerManager {
    registry: Mutex<Registry>,
    peers: Mutex<HashMap<u32, Peer>>,
    blacklist: Arc<dyn Blacklist>,
    spam_limit: AtomicI64,
    spam_window: Duration,
    min_client_version: Option<i32>,
    shutdown: watch::Sender<bool>,
}

impl ServerManager {
    /// Create a new server manager
    pub fn new(config: &ServerConfig, blacklist: Arc<dyn Blacklist>) -> Self {
        let (shutdown, _) = watch::channel(false);

        Self {
            registry: Mutex::new(Registry::default()),
            peers: Mutex::new(HashMap::new()),
            blacklist,
            spam_limit: AtomicI64::new(config.spam_limit),
            spam_window: config.spam_window,
            min_client_version: config.min_client_version,
            shutdown,
        }
    }

    pub fn blacklist(&self) -> &Arc<dyn Blacklist> {
        &self.blacklist
    }

    /// Packets allowed per spam window
    pub fn spam_limit(&self) -> i64 {
        self.spam_limit.load(Ordering::Relaxed)
    }

    /// Takes effect on every connection's next packet
    pub fn set_spam_limit(&self, limit: i64) {
        self.spam_limit.store(limit, Ordering::Relaxed);
    }

    pub fn spam_window(&self) -> Duration {
        self.spam_window
    }

    /// A connection was accepted by the transport
    pub async fn on_connect(&self, connection: &Arc<Connection>) {
        if self.blacklist.contains(connection.ip()).await {
            debug!(
                "Connection {} from blacklisted address {} refused.",
                connection.id(),
                connection.ip()
            );
            connection.close(DisconnectReason::Closed);
            return;
        }

        info!("Connection {} received!", connection.id());
        self.peers.lock().await.insert(
            connection.id(),
            Peer {
                connection: Arc::clone(connection),
                rate: RateKeeper::new(),
            },
        );
    }

    /// The transport lost a connection; the sole teardown trigger
    pub async fn on_disconnect(&self, connection: &Connection, reason: DisconnectReason) {
        let tracked = self.peers.lock().await.remove(&connection.id()).is_some();
        if tracked {
            info!(
                "Connection {} lost: {} (after {}s).",
                connection.id(),
                reason,
                connection.connection_duration().as_secs()
            );
        }

        let mut registry = self.registry.lock().await;

        if let Some(room) = registry.rooms.remove(&connection.id()) {
            // disconnects all related redirectors
            room.close().await;
        }

        let Some(redirector) = registry.redirectors.get(&connection.id()).cloned() else {
            return;
        };

        // Both entries go before the teardown, so the counterpart's own
        // disconnect finds nothing left to tear down
        registry.redirectors.remove(&redirector.host().id());
        if let Some(client) = redirector.client().await {
            registry.redirectors.remove(&client.id());
        }

        redirector.disconnected(Some(connection), reason).await;

        if let Some(room) = registry.room_of_mut(&redirector) {
            room.remove_redirector(&redirector);
        }
    }

    /// A frame arrived on `connection`
    pub async fn on_receive(&self, connection: &Arc<Connection>, packet: Packet) {
        match self.check_rate(connection).await {
            Some(true) => {}
            Some(false) => {
                self.handle_packet_spam(connection).await;
                return;
            }
            None => return,
        }

        match packet {
            Packet::Framework(_) => {}
            Packet::Link(text) => self.handle_control(connection, &text).await,
            raw @ Packet::Raw(_) => {
                let redirector = {
                    let registry = self.registry.lock().await;
                    registry.redirectors.get(&connection.id()).cloned()
                };

                if let Some(redirector) = redirector {
                    redirector.received(connection, raw).await;
                }
            }
        }
    }

    async fn handle_control(&self, connection: &Arc<Connection>, text: &str) {
        let result = if text == CONTROL_NEW {
            self.create_room(connection).await
        } else if let Some(link) = text.strip_prefix(CONTROL_HOST) {
            self.host_redirector(connection, link).await
        } else if let Some(link) = text.strip_prefix(CONTROL_JOIN) {
            self.join_redirector(connection, link).await
        } else {
            debug!(
                "Ignoring unknown control message from connection {}",
                connection.id()
            );
            Ok(())
        };

        if let Err(e) = result {
            warn!("Connection {} rejected: {}", connection.id(), e);
            connection.close(DisconnectReason::Error);
        }
    }

    async fn create_room(&self, connection: &Arc<Connection>) -> Result<()> {
        let mut registry = self.registry.lock().await;
        if registry.holds_role(connection.id()) {
            return Err(RustyRelayError::RoleConflict);
        }

        let link = loop {
            let candidate = generate_link();
            if registry.find_by_link(&candidate).is_none() {
                break candidate;
            }
        };

        connection.send_text(&link);
        registry
            .rooms
            .insert(connection.id(), Room::new(link.clone(), Arc::clone(connection)));

        info!("Connection {} created a room {}.", connection.id(), link);
        Ok(())
    }

    async fn host_redirector(&self, connection: &Arc<Connection>, link: &str) -> Result<()> {
        if !is_well_formed(link) {
            return Err(RustyRelayError::RoomNotFound(link.to_string()));
        }

        let mut registry = self.registry.lock().await;
        // a room host may carry its own tunnel, but only one
        if registry.holds_redirector(connection.id()) {
            return Err(RustyRelayError::RoleConflict);
        }

        let room = registry
            .find_by_link_mut(link)
            .ok_or_else(|| RustyRelayError::RoomNotFound(link.to_string()))?;

        // only the host's address may open redirectors in its room
        if room.host().ip() != connection.ip() {
            return Err(RustyRelayError::Unauthorized);
        }

        let redirector = Arc::new(Redirector::new(
            Arc::clone(connection),
            self.min_client_version,
        ));
        room.add_redirector(Arc::clone(&redirector));
        let link = room.link.clone();
        redirector.connected(connection).await;
        registry.redirectors.insert(connection.id(), redirector);

        info!(
            "Connection {} hosted a redirector in room {}.",
            connection.id(),
            link
        );
        Ok(())
    }

    async fn join_redirector(&self, connection: &Arc<Connection>, link: &str) -> Result<()> {
        if !is_well_formed(link) {
            return Err(RustyRelayError::RoomNotFound(link.to_string()));
        }

        let mut registry = self.registry.lock().await;
        if registry.holds_role(connection.id()) {
            return Err(RustyRelayError::RoleConflict);
        }

        let room = registry
            .find_by_link(link)
            .ok_or_else(|| RustyRelayError::RoomNotFound(link.to_string()))?;

        let redirector = room
            .first_open()
            .await
            .ok_or(RustyRelayError::NoEmptyRedirector)?;

        if !redirector.bind_client(Arc::clone(connection)).await {
            return Err(RustyRelayError::NoEmptyRedirector);
        }

        // ask the host to open a redirector for the next client
        room.send_message(CONTROL_NEW);
        let link = room.link.clone();
        redirector.connected(connection).await;
        registry.redirectors.insert(connection.id(), redirector);

        info!("Connection {} joined to room {}.", connection.id(), link);
        Ok(())
    }

    /// `None` when the connection was never admitted
    async fn check_rate(&self, connection: &Connection) -> Option<bool> {
        let limit = self.spam_limit();
        let mut peers = self.peers.lock().await;
        let peer = peers.get_mut(&connection.id())?;
        Some(peer.rate.allow(self.spam_window, limit))
    }

    async fn handle_packet_spam(&self, connection: &Arc<Connection>) {
        let limit = self.spam_limit();
        if let Some(peer) = self.peers.lock().await.get_mut(&connection.id()) {
            peer.rate.cooldown(limit);
        }

        let mut registry = self.registry.lock().await;
        let redirector = registry.redirectors.get(&connection.id()).cloned();

        if let Some(redirector) = &redirector {
            if redirector.is_host(connection) {
                warn!(
                    "Connection {} spammed with packets but not disconnected due to being a host.",
                    connection.id()
                );
                return;
            }
        }

        warn!(
            "Connection {} disconnected due to packet spam.",
            connection.id()
        );

        if let Some(redirector) = redirector {
            if let Some(room) = registry.room_of_mut(&redirector) {
                room.send_message(SPAM_WARNING);
                room.remove_redirector(&redirector);
            }
        }

        connection.close(DisconnectReason::Closed);
    }

    /// Snapshot of every active room
    pub async fn list_rooms(&self) -> Vec<RoomInfo> {
        let registry = self.registry.lock().await;
        let mut rooms = Vec::with_capacity(registry.rooms.len());
        for room in registry.rooms.values() {
            rooms.push(room.info().await);
        }
        rooms.sort_by_key(|room| room.created_at);
        rooms
    }

    pub async fn find_room(&self, link: &str) -> Option<RoomInfo> {
        let registry = self.registry.lock().await;
        match registry.find_by_link(link) {
            Some(room) => Some(room.info().await),
            None => None,
        }
    }

    pub async fn room_count(&self) -> usize {
        self.registry.lock().await.rooms.len()
    }

    /// Whether the connection is a room host or a bound redirector side
    pub async fn holds_role(&self, id: u32) -> bool {
        self.registry.lock().await.holds_role(id)
    }

    /// Whether the connection was admitted and is still connected
    pub async fn is_tracked(&self, id: u32) -> bool {
        self.peers.lock().await.contains_key(&id)
    }

    pub async fn connection_count(&self) -> usize {
        self.peers.lock().await.len()
    }

    /// Warn every room host, then tell the transport to stop accepting
    pub async fn shutdown(&self) {
        {
            let registry = self.registry.lock().await;
            for room in registry.rooms.values() {
                room.send_message(SHUTDOWN_WARNING);
            }
        }

        info!("Shutting down the server.");
        self.shutdown.send_replace(true);
    }

    pub fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Close every admitted connection
    pub async fn close_all(&self) {
        let peers = self.peers.lock().await;
        for peer in peers.values() {
            peer.connection.close(DisconnectReason::Closed);
        }
    }
}

// Shared reference to server manager
pub type SharedServerManager = Arc<ServerManager>;
