use chrono::{DateTime, Utc};
use log::info;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::constants::CONTROL_NEW;
use crate::core::connection::{Connection, DisconnectReason};
use crate::core::listener::NetListener;
use crate::core::redirector::Redirector;

/// Represents a hosting session: a host and the redirectors it opened
pub struct Room {
    /// Link clients present to join the room
    pub link: String,
    /// Connection that created the room
    host: Arc<Connection>,
    /// Redirectors in creation order
    redirectors: Vec<Arc<Redirector>>,
    /// Timestamp of room creation
    pub created_at: DateTime<Utc>,
}

/// Identity and address of one side of a relay
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub id: u32,
    pub addr: SocketAddr,
}

impl PeerInfo {
    fn of(connection: &Connection) -> Self {
        Self {
            id: connection.id(),
            addr: connection.remote_addr(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectorInfo {
    pub host: PeerInfo,
    pub client: Option<PeerInfo>,
}

/// Point-in-time view of a room, for listings and tests
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomInfo {
    pub link: String,
    pub host: PeerInfo,
    pub created_at: DateTime<Utc>,
    pub redirectors: Vec<RedirectorInfo>,
}

impl Room {
    /// Creates a room and asks its host to open the first redirector
    pub fn new(link: String, host: Arc<Connection>) -> Self {
        let room = Self {
            link,
            host,
            redirectors: Vec::new(),
            created_at: Utc::now(),
        };

        // there must be at least one empty redirector in the room
        room.send_message(CONTROL_NEW);

        info!("Room {} created!", room.link);
        room
    }

    pub fn host(&self) -> &Arc<Connection> {
        &self.host
    }

    /// Sends a text frame to the host only, never to clients
    pub fn send_message(&self, message: &str) -> bool {
        self.host.send_text(message)
    }

    pub fn add_redirector(&mut self, redirector: Arc<Redirector>) {
        self.redirectors.push(redirector);
    }

    /// Removes a redirector from the room
    pub fn remove_redirector(&mut self, redirector: &Arc<Redirector>) -> bool {
        let before = self.redirectors.len();
        self.redirectors.retain(|r| !Arc::ptr_eq(r, redirector));
        self.redirectors.len() != before
    }

    pub fn contains(&self, redirector: &Arc<Redirector>) -> bool {
        self.redirectors.iter().any(|r| Arc::ptr_eq(r, redirector))
    }

    pub fn redirectors(&self) -> &[Arc<Redirector>] {
        &self.redirectors
    }

    /// First redirector still waiting for a client
    pub async fn first_open(&self) -> Option<Arc<Redirector>> {
        for redirector in &self.redirectors {
            if redirector.is_open().await {
                return Some(Arc::clone(redirector));
            }
        }
        None
    }

    /// Tears down every redirector; returns how many were torn down.
    ///
    /// Only called once the host has left, so the host connection itself is
    /// not touched here.
    pub async fn close(&self) -> usize {
        for redirector in &self.redirectors {
            redirector
                .disconnected(None, DisconnectReason::Closed)
                .await;
        }

        info!("Room {} closed.", self.link);
        self.redirectors.len()
    }

    pub async fn info(&self) -> RoomInfo {
        let mut redirectors = Vec::with_capacity(self.redirectors.len());
        for redirector in &self.redirectors {
            redirectors.push(RedirectorInfo {
                host: PeerInfo::of(redirector.host()),
                client: redirector.client().await.map(|c| PeerInfo::of(&c)),
            });
        }

        RoomInfo {
            link: self.link.clone(),
            host: PeerInfo::of(&self.host),
            created_at: self.created_at,
            redirectors,
        }
    }
}
