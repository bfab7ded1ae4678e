//! Unix socket server for bridge clients
//!
//! Each connection gets a reader loop feeding [`ClientHub::handle`] and a
//! writer task draining the client's outbound queue.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use eyre::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::ClientHub;
use super::messages::ClientFrame;
use crate::error::ProtocolError;
use crate::interest::ClientId;

/// Create and bind the client socket, replacing a stale one
pub fn create_listener_at(socket_path: &Path) -> Result<(UnixListener, PathBuf)> {
    debug!(?socket_path, "create_listener_at: creating client socket");

    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create socket directory")?;
    }

    if socket_path.exists() {
        debug!(?socket_path, "create_listener_at: removing stale socket");
        std::fs::remove_file(socket_path).context("Failed to remove stale socket")?;
    }

    let listener = UnixListener::bind(socket_path).context("Failed to bind client socket")?;
    debug!(?socket_path, "create_listener_at: socket bound successfully");

    Ok((listener, socket_path.to_path_buf()))
}

/// Remove the socket file on shutdown
pub fn cleanup_socket(socket_path: &Path) {
    if socket_path.exists() {
        debug!(?socket_path, "cleanup_socket: removing socket file");
        if let Err(e) = std::fs::remove_file(socket_path) {
            warn!(?socket_path, error = %e, "Failed to remove socket file");
        }
    }
}

/// Accept clients until shutdown is signalled
pub async fn serve(
    listener: UnixListener,
    hub: Arc<ClientHub>,
    max_message_size: usize,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    info!("Client server accepting connections");
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _)) => {
                        let hub = hub.clone();
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            handle_connection(stream, hub, max_message_size, shutdown).await;
                        });
                    }
                    Err(e) => warn!(error = %e, "Failed to accept client connection"),
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    info!("Client server stopped");
    Ok(())
}

/// Serve one client until it disconnects, misbehaves, or shutdown
pub async fn handle_connection(
    stream: UnixStream,
    hub: Arc<ClientHub>,
    max_message_size: usize,
    mut shutdown: watch::Receiver<bool>,
) {
    let (id, mut outbound) = hub.connect();
    let (read_half, mut write_half) = stream.into_split();

    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            let line = match frame.to_line() {
                Ok(line) => line,
                Err(e) => {
                    warn!(client = %id, error = %e, "Failed to encode frame");
                    continue;
                }
            };
            if let Err(e) = write_line(&mut write_half, &line).await {
                debug!(client = %id, error = %e, "Client write failed");
                break;
            }
        }
    });

    // read_until keeps partial input in `buf` when the select drops it
    let mut reader = BufReader::new(read_half);
    let mut buf: Vec<u8> = Vec::new();
    loop {
        let remaining = (max_message_size + 1).saturating_sub(buf.len()) as u64;
        let mut limited = (&mut reader).take(remaining);
        let read = tokio::select! {
            read = limited.read_until(b'\n', &mut buf) => read,
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        };

        match read {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(client = %id, error = %e, "Client read failed");
                break;
            }
        }
        if buf.len() > max_message_size {
            warn!(client = %id, error = %ProtocolError::TooLarge(buf.len()), "Closing connection");
            break;
        }
        if buf.last() != Some(&b'\n') {
            // Stream ended mid-line; the next read reports EOF
            continue;
        }

        match std::str::from_utf8(&buf) {
            Ok(text) => handle_line(&hub, id, text.trim()),
            Err(e) => warn!(client = %id, error = %e, "Ignoring non-UTF-8 client line"),
        }
        buf.clear();
    }

    hub.disconnect(id);
    writer.abort();
}

fn handle_line(hub: &ClientHub, id: ClientId, text: &str) {
    if text.is_empty() {
        return;
    }
    match ClientFrame::parse(text) {
        Ok(frame) => hub.handle(id, frame),
        Err(e) => warn!(client = %id, error = %e, "Ignoring malformed client frame"),
    }
}

async fn write_line<W: AsyncWriteExt + Unpin>(writer: &mut W, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::Bridge;
    use crate::bus::MemoryBus;
    use crate::config::ServerConfig;
    use std::time::Duration;
    use tempfile::TempDir;

    fn hub() -> Arc<ClientHub> {
        let bus = MemoryBus::new();
        bus.register_type("std_msgs/Int32");
        bus.advertise("/count", "std_msgs/Int32");
        let bridge = Bridge::builder(Arc::new(bus)).build();
        Arc::new(ClientHub::new(bridge, ServerConfig::default()))
    }

    async fn wait_for_interest(hub: &ClientHub, topics: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while hub.bridge().stats().wanted_topics != topics {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("interest never registered");
    }

    #[tokio::test]
    async fn test_non_utf8_line_is_skipped() {
        let hub = hub();
        let (mut client, server) = UnixStream::pair().unwrap();
        let (_tx, rx) = watch::channel(false);
        let conn = tokio::spawn(handle_connection(server, hub.clone(), 1024, rx));

        client.write_all(b"\xff\xfe\n").await.unwrap();
        client
            .write_all(b"[\"s\", {\"topicName\": \"/count\"}]\n")
            .await
            .unwrap();
        wait_for_interest(&hub, 1).await;
        assert_eq!(hub.client_count(), 1);

        drop(client);
        conn.await.unwrap();
        assert_eq!(hub.client_count(), 0);
        assert_eq!(hub.bridge().stats().wanted_topics, 0);
    }

    #[tokio::test]
    async fn test_partial_line_survives_shutdown_wakeup() {
        let hub = hub();
        let (mut client, server) = UnixStream::pair().unwrap();
        let (tx, rx) = watch::channel(false);
        let conn = tokio::spawn(handle_connection(server, hub.clone(), 1024, rx));

        client.write_all(b"[\"s\", {\"topicName\": ").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(false).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        client.write_all(b"\"/count\"}]\n").await.unwrap();
        wait_for_interest(&hub, 1).await;

        tx.send(true).unwrap();
        conn.await.unwrap();
        assert_eq!(hub.client_count(), 0);
    }

    #[tokio::test]
    async fn test_oversize_line_closes_connection() {
        let hub = hub();
        let (mut client, server) = UnixStream::pair().unwrap();
        let (_tx, rx) = watch::channel(false);
        let conn = tokio::spawn(handle_connection(server, hub.clone(), 16, rx));

        client.write_all(&[b'x'; 64]).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), conn)
            .await
            .expect("connection stayed open")
            .unwrap();
        assert_eq!(hub.client_count(), 0);
    }

    #[tokio::test]
    async fn test_create_listener_creates_parent_dir() {
        let temp = TempDir::new().unwrap();
        let socket_path = temp.path().join("subdir").join("bridge.sock");

        let (_, path) = create_listener_at(&socket_path).unwrap();
        assert_eq!(path, socket_path);
        assert!(socket_path.exists());
    }

    #[tokio::test]
    async fn test_create_listener_removes_stale_socket() {
        let temp = TempDir::new().unwrap();
        let socket_path = temp.path().join("bridge.sock");
        std::fs::write(&socket_path, "stale").unwrap();

        assert!(create_listener_at(&socket_path).is_ok());
    }

    #[test]
    fn test_cleanup_socket_removes_file() {
        let temp = TempDir::new().unwrap();
        let socket_path = temp.path().join("bridge.sock");
        std::fs::write(&socket_path, "test").unwrap();

        cleanup_socket(&socket_path);
        assert!(!socket_path.exists());
    }

    #[test]
    fn test_cleanup_socket_handles_missing_file() {
        let temp = TempDir::new().unwrap();
        cleanup_socket(&temp.path().join("nonexistent.sock"));
    }
}
