//! IPC Server for the PWM daemon.
//!
//! This module provides Unix Domain Socket IPC functionality:
//! - Server that listens on a Unix socket
//! - Shared-key handshake on every connection
//! - One request line in, one JSON reply line out, then close
//!
//! Connections are served strictly one after another. Hardware writes are
//! therefore never interleaved, and no locking is needed around the engine.

use std::future::Future;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::time::{timeout, Duration};

use crate::config::{AuthKey, DaemonConfig};
use crate::types::Reply;

use super::dispatch::Dispatcher;
use super::sysfs::PropertyStore;

// ============================================================================
// Constants
// ============================================================================

/// Maximum request size in bytes (4KB)
pub const MAX_REQUEST_SIZE: usize = 4096;

/// Handshake line prefix sent by clients
pub const AUTH_PREFIX: &str = "auth ";

/// Handshake acknowledgement sent by the server
pub const AUTH_OK: &str = "ok";

// ============================================================================
// IpcError
// ============================================================================

/// IPC-specific error types.
#[derive(Debug, thiserror::Error)]
pub enum IpcError {
    /// Socket binding error
    #[error("Failed to bind socket: {0}")]
    BindError(String),

    /// Connection error
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Read error
    #[error("Failed to read request: {0}")]
    ReadError(String),

    /// Write error
    #[error("Failed to write response: {0}")]
    WriteError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Timeout error
    #[error("Operation timed out")]
    Timeout,

    /// Request too large
    #[error("Request too large (max {MAX_REQUEST_SIZE} bytes)")]
    RequestTooLarge,

    /// Handshake key missing or wrong
    #[error("Authentication rejected")]
    AuthRejected,
}

/// Reads one newline-terminated line of at most `limit` bytes.
///
/// Returns the line without its terminator. Shared by server and client.
pub async fn read_line<R>(reader: &mut R, limit: usize, wait: Duration) -> Result<String, IpcError>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let read = timeout(wait, (&mut *reader).take(limit as u64 + 1).read_line(&mut line)).await;

    let n = match read {
        Ok(Ok(n)) => n,
        Ok(Err(e)) => return Err(IpcError::ReadError(e.to_string())),
        Err(_) => return Err(IpcError::Timeout),
    };
    if n == 0 {
        return Err(IpcError::ConnectionError("connection closed by peer".to_string()));
    }
    if n > limit {
        return Err(IpcError::RequestTooLarge);
    }
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

// ============================================================================
// IpcServer
// ============================================================================

/// Unix Domain Socket IPC server.
pub struct IpcServer {
    /// Unix socket listener
    listener: UnixListener,
    /// Socket path (for cleanup)
    socket_path: PathBuf,
    /// Key every client must present
    auth_key: AuthKey,
    /// Bound on each blocking read from a client
    read_timeout: Duration,
}

impl IpcServer {
    /// Creates a new IPC server bound to the configured socket path.
    ///
    /// If the socket file already exists, it will be removed before binding.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be bound.
    pub fn new(config: &DaemonConfig) -> Result<Self> {
        let socket_path = config.socket_path();

        // Remove existing socket file if present
        if socket_path.exists() {
            std::fs::remove_file(socket_path)
                .with_context(|| format!("Failed to remove existing socket: {:?}", socket_path))?;
        }

        // Ensure parent directory exists
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create socket directory: {:?}", parent))?;
        }

        let listener = UnixListener::bind(socket_path)
            .map_err(|e| IpcError::BindError(format!("{}: {}", socket_path.display(), e)))?;
        tracing::info!("listening on {}", socket_path.display());
        apply_socket_access(socket_path, config);

        Ok(Self {
            listener,
            socket_path: socket_path.to_path_buf(),
            auth_key: config.auth_key.clone(),
            read_timeout: config.read_timeout,
        })
    }

    /// Accepts an incoming client connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be accepted.
    pub async fn accept(&self) -> Result<BufReader<UnixStream>> {
        let (stream, _addr) = self
            .listener
            .accept()
            .await
            .context("Failed to accept connection")?;
        Ok(BufReader::new(stream))
    }

    /// Checks the client's handshake line and acknowledges it.
    ///
    /// On a wrong key nothing is written back; the caller just drops the
    /// connection.
    ///
    /// # Errors
    ///
    /// Returns [`IpcError::AuthRejected`] on a missing or wrong key.
    pub async fn authenticate(&self, stream: &mut BufReader<UnixStream>) -> Result<(), IpcError> {
        let line = read_line(stream, MAX_REQUEST_SIZE, self.read_timeout).await?;
        let presented = line.strip_prefix(AUTH_PREFIX).ok_or(IpcError::AuthRejected)?;
        if !self.auth_key.matches(presented) {
            return Err(IpcError::AuthRejected);
        }
        write_line(stream.get_mut(), AUTH_OK).await
    }

    /// Receives one request line from the stream.
    ///
    /// Applies a read timeout to prevent blocking indefinitely.
    ///
    /// # Errors
    ///
    /// Returns an error if reading fails, times out, or the line is too long.
    pub async fn receive_request(&self, stream: &mut BufReader<UnixStream>) -> Result<String, IpcError> {
        read_line(stream, MAX_REQUEST_SIZE, self.read_timeout).await
    }

    /// Serializes and sends a reply to the stream.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails.
    pub async fn send_response(stream: &mut UnixStream, reply: &Reply) -> Result<(), IpcError> {
        let json =
            serde_json::to_string(reply).map_err(|e| IpcError::SerializationError(e.to_string()))?;
        write_line(stream, &json).await
    }

    /// Services one accepted connection: handshake, request, reply.
    ///
    /// # Errors
    ///
    /// Returns an error for any transport or handshake failure. Such errors
    /// never reach the dispatcher.
    pub async fn handle_connection<S: PropertyStore>(
        &self,
        mut stream: BufReader<UnixStream>,
        dispatcher: &mut Dispatcher<S>,
    ) -> Result<(), IpcError> {
        self.authenticate(&mut stream).await?;
        let request = self.receive_request(&mut stream).await?;
        tracing::debug!("received: {}", request);

        let reply = dispatcher.process(&request);
        Self::send_response(stream.get_mut(), &reply).await?;
        let _ = stream.get_mut().shutdown().await;
        Ok(())
    }

    /// Runs the accept loop until `shutdown` resolves.
    ///
    /// Failed accepts, handshakes and reads are logged and the loop moves on
    /// to the next connection.
    pub async fn serve<S, F>(&self, dispatcher: &mut Dispatcher<S>, shutdown: F)
    where
        S: PropertyStore,
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("server shutting down");
                    return;
                }
                accepted = self.accept() => match accepted {
                    Ok(stream) => {
                        if let Err(e) = self.handle_connection(stream, dispatcher).await {
                            tracing::warn!("connection dropped: {}", e);
                        }
                    }
                    Err(e) => tracing::warn!("{:#}", e),
                },
            }
        }
    }

    /// Returns the socket path.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        // Clean up socket file on drop
        let _ = std::fs::remove_file(&self.socket_path);
    }
}

/// Applies the configured owner and mode to a freshly bound socket.
///
/// Failures are logged; the daemon keeps running with the defaults.
fn apply_socket_access(socket_path: &Path, config: &DaemonConfig) {
    use std::os::unix::fs::PermissionsExt;

    if let Some((uid, gid)) = config.socket_owner {
        if let Err(e) = std::os::unix::fs::chown(socket_path, Some(uid), Some(gid)) {
            tracing::warn!("could not set socket owner: {}", e);
        }
    }
    if let Some(mode) = config.socket_mode {
        let permissions = std::fs::Permissions::from_mode(mode);
        if let Err(e) = std::fs::set_permissions(socket_path, permissions) {
            tracing::warn!("could not set socket permissions: {}", e);
        }
    }
}

/// Writes `line` plus a newline terminator and flushes.
pub async fn write_line(stream: &mut UnixStream, line: &str) -> Result<(), IpcError> {
    let mut buffer = Vec::with_capacity(line.len() + 1);
    buffer.extend_from_slice(line.as_bytes());
    buffer.push(b'\n');
    stream
        .write_all(&buffer)
        .await
        .map_err(|e| IpcError::WriteError(e.to_string()))?;
    stream
        .flush()
        .await
        .map_err(|e| IpcError::WriteError(e.to_string()))
}

// ============================================================================
// Tests
// ============================================================================
