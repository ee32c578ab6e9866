use log::{debug, error, info, warn};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::config::ServerConfig;
use crate::core::connection::{Connection, DisconnectReason, Outbound};
use crate::core::message::{FrameworkMessage, Packet};
use crate::core::server::SharedServerManager;
use crate::error::Result;
use crate::handlers::frame::{read_frame, write_frame};

// Accept connections until the server manager signals shutdown
pub async fn serve(
    listener: TcpListener,
    manager: SharedServerManager,
    config: Arc<ServerConfig>,
) -> Result<()> {
    let mut shutdown = manager.subscribe_shutdown();
    let mut next_id: u32 = 0;

    info!("Relay hosted on {}.", listener.local_addr()?);

    loop {
        if *shutdown.borrow() {
            break;
        }

        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            accepted = listener.accept() => match accepted {
                Ok((socket, addr)) => {
                    next_id = next_id.wrapping_add(1).max(1);
                    let id = next_id;
                    let manager = Arc::clone(&manager);
                    let config = Arc::clone(&config);
                    tokio::spawn(async move {
                        handle_tcp_client(socket, addr, id, manager, config).await;
                    });
                }
                Err(e) => error!("Failed to accept connection: {}", e),
            }
        }
    }

    drop(listener);
    info!("Stopped accepting connections.");
    manager.close_all().await;
    Ok(())
}

// Handle a single TCP connection from accept to teardown
pub async fn handle_tcp_client(
    socket: TcpStream,
    addr: SocketAddr,
    id: u32,
    manager: SharedServerManager,
    config: Arc<ServerConfig>,
) {
    if let Err(e) = socket.set_nodelay(true) {
        debug!("Failed to set TCP_NODELAY for {}: {}", addr, e);
    }

    let (reader, writer) = socket.into_split();
    let (connection, outbound) =
        Connection::with_write_buffer(id, addr, config.write_buffer_size);
    let closed = outbound.closed.clone();

    // Spawn a task to forward queued packets to the socket
    let writer_task = tokio::spawn(write_loop(
        writer,
        outbound,
        Arc::clone(&connection),
        config.keep_alive_interval,
    ));

    manager.on_connect(&connection).await;
    if !connection.is_closed() {
        connection.send(Packet::Framework(FrameworkMessage::RegisterTcp {
            connection_id: id as i32,
        }));
    }

    let reason = read_loop(reader, &connection, &manager, closed, &config).await;
    manager.on_disconnect(&connection, reason).await;

    if let Err(e) = writer_task.await {
        error!("Writer task for connection {} failed: {}", id, e);
    }
}

fn close_with(connection: &Connection, reason: DisconnectReason) -> DisconnectReason {
    connection.close(reason);
    connection.close_reason().unwrap_or(reason)
}

async fn read_loop(
    reader: OwnedReadHalf,
    connection: &Arc<Connection>,
    manager: &SharedServerManager,
    mut closed: watch::Receiver<Option<DisconnectReason>>,
    config: &ServerConfig,
) -> DisconnectReason {
    let mut reader = BufReader::new(reader);

    loop {
        if let Some(reason) = connection.close_reason() {
            return reason;
        }

        let frame = tokio::select! {
            _ = closed.changed() => continue,
            frame = tokio::time::timeout(
                config.idle_timeout,
                read_frame(&mut reader, config.max_frame_size),
            ) => frame,
        };

        let payload = match frame {
            Err(_) => {
                debug!("Connection {} timed out.", connection.id());
                return close_with(connection, DisconnectReason::Timeout);
            }
            Ok(Err(e)) => {
                let reason = match e.kind() {
                    io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted => DisconnectReason::Closed,
                    _ => {
                        debug!("Connection {} read error: {}", connection.id(), e);
                        DisconnectReason::Error
                    }
                };
                return close_with(connection, reason);
            }
            Ok(Ok(payload)) => payload,
        };

        let packet = match Packet::decode(&payload) {
            Ok(packet) => packet,
            Err(e) => {
                // the stream can no longer be trusted
                warn!("Connection {} sent a corrupted frame: {}", connection.id(), e);
                return close_with(connection, DisconnectReason::Error);
            }
        };

        if let Packet::Framework(FrameworkMessage::Ping {
            id,
            is_reply: false,
        }) = packet
        {
            connection.send(Packet::Framework(FrameworkMessage::Ping {
                id,
                is_reply: true,
            }));
        }

        manager.on_receive(connection, packet).await;
    }
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut outbound: Outbound,
    connection: Arc<Connection>,
    keep_alive: Duration,
) {
    let mut closed = outbound.closed.clone();
    let mut buf = Vec::with_capacity(256);
    let mut ticker = interval_at(Instant::now() + keep_alive, keep_alive);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        if closed.borrow().is_some() {
            break;
        }

        let result = tokio::select! {
            biased;
            changed = closed.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            packet = outbound.recv() => match packet {
                Some(packet) => write_frame(&mut writer, &packet, &mut buf).await,
                None => break,
            },
            _ = ticker.tick() => {
                let keep_alive = Packet::Framework(FrameworkMessage::KeepAlive);
                write_frame(&mut writer, &keep_alive, &mut buf).await
            }
        };

        if let Err(e) = result {
            debug!("Failed to write to connection {}: {}", connection.id(), e);
            connection.close(DisconnectReason::Error);
            return;
        }
    }

    // flush what was queued before the close
    while let Some(packet) = outbound.try_recv() {
        if write_frame(&mut writer, &packet, &mut buf).await.is_err() {
            break;
        }
    }

    if let Err(e) = writer.shutdown().await {
        debug!("Failed to shut down connection {}: {}", connection.id(), e);
    }
}
