//! TCP connection handles
//! Handles the lifecycle of peer connections as seen by the dispatcher

use log::{debug, warn};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};

use crate::constants::DEFAULT_WRITE_BUFFER_SIZE;
use crate::core::message::Packet;

/// Why a connection went away
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    Closed,
    Timeout,
    Error,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Timeout => write!(f, "timeout"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Receiving ends owned by whoever drives the socket
pub struct Outbound {
    packets: mpsc::UnboundedReceiver<Packet>,
    queued: Arc<AtomicUsize>,
    pub closed: watch::Receiver<Option<DisconnectReason>>,
}

impl Outbound {
    /// Next queued packet; `None` once every sender is gone
    pub async fn recv(&mut self) -> Option<Packet> {
        let packet = self.packets.recv().await?;
        self.release(&packet);
        Some(packet)
    }

    pub fn try_recv(&mut self) -> Option<Packet> {
        let packet = self.packets.try_recv().ok()?;
        self.release(&packet);
        Some(packet)
    }

    /// Bytes waiting to be written
    pub fn queued_bytes(&self) -> usize {
        self.queued.load(Ordering::Acquire)
    }

    fn release(&self, packet: &Packet) {
        self.queued.fetch_sub(frame_size(packet), Ordering::AcqRel);
    }
}

/// Bytes a packet occupies on the wire, length prefix included
fn frame_size(packet: &Packet) -> usize {
    packet.encoded_len() + 2
}

/// Represents the state of a single peer connection
pub struct Connection {
    id: u32,
    remote_addr: SocketAddr,
    sender: mpsc::UnboundedSender<Packet>,
    queued: Arc<AtomicUsize>,
    write_buffer_size: usize,
    closed: watch::Sender<Option<DisconnectReason>>,
    connected_at: Instant,
}

impl Connection {
    /// Create a connection handle together with its outbound queue
    pub fn new(id: u32, remote_addr: SocketAddr) -> (Arc<Self>, Outbound) {
        Self::with_write_buffer(id, remote_addr, DEFAULT_WRITE_BUFFER_SIZE)
    }

    /// Same as [`Connection::new`], closing the connection once more than
    /// `write_buffer_size` bytes are waiting to be written
    pub fn with_write_buffer(
        id: u32,
        remote_addr: SocketAddr,
        write_buffer_size: usize,
    ) -> (Arc<Self>, Outbound) {
        let (sender, packets) = mpsc::unbounded_channel();
        let (closed, closed_rx) = watch::channel(None);
        let queued = Arc::new(AtomicUsize::new(0));

        let connection = Arc::new(Self {
            id,
            remote_addr,
            sender,
            queued: Arc::clone(&queued),
            write_buffer_size,
            closed,
            connected_at: Instant::now(),
        });

        (
            connection,
            Outbound {
                packets,
                queued,
                closed: closed_rx,
            },
        )
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Remote IP with IPv4-mapped IPv6 addresses folded back to IPv4
    pub fn ip(&self) -> IpAddr {
        self.remote_addr.ip().to_canonical()
    }

    /// Queue a packet for delivery, never waiting on the socket.
    ///
    /// A peer that stops reading fills its write buffer; the packet that
    /// overflows it is dropped and the connection closed with an error.
    pub fn send(&self, packet: Packet) -> bool {
        if self.is_closed() {
            debug!("Dropping packet for closed connection {}", self.id);
            return false;
        }

        let size = frame_size(&packet);
        let queued = self.queued.fetch_add(size, Ordering::AcqRel) + size;
        if queued > self.write_buffer_size {
            self.queued.fetch_sub(size, Ordering::AcqRel);
            warn!(
                "Connection {} write buffer full ({} bytes pending), closing.",
                self.id,
                queued - size
            );
            self.close(DisconnectReason::Error);
            return false;
        }

        match self.sender.send(packet) {
            Ok(_) => true,
            Err(_) => {
                self.queued.fetch_sub(size, Ordering::AcqRel);
                warn!("Failed to queue packet for connection {}", self.id);
                false
            }
        }
    }

    /// Send a text control frame through this connection
    pub fn send_text(&self, text: &str) -> bool {
        self.send(Packet::Link(text.to_string()))
    }

    /// Request the transport to close this connection.
    ///
    /// Only the first reason is kept; later calls are no-ops. The disconnect
    /// event fires later, from the transport.
    pub fn close(&self, reason: DisconnectReason) {
        let changed = self.closed.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(reason);
                true
            } else {
                false
            }
        });

        if changed {
            debug!("Connection {} closing: {}", self.id, reason);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.borrow().is_some()
    }

    pub fn close_reason(&self) -> Option<DisconnectReason> {
        *self.closed.borrow()
    }

    /// Calculate the connection duration
    pub fn connection_duration(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("remote_addr", &self.remote_addr)
            .field("closed", &self.close_reason())
            .finish()
    }
}
