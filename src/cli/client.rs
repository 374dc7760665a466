//! IPC Client for communicating with the PWM daemon.
//!
//! This module provides:
//! - Unix Domain Socket client
//! - Shared-key handshake
//! - Request/response handling
//! - Timeout handling
//!
//! Every call opens a fresh connection. Failures are never retried; they are
//! reported as `None` and clear the connected flag.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::BufReader;
use tokio::net::UnixStream;
use tokio::time::timeout;
use zeroize::Zeroize;

use crate::config::{AuthKey, DaemonConfig};
use crate::daemon::dispatch::Command;
use crate::daemon::ipc::{read_line, write_line, IpcError, AUTH_OK, AUTH_PREFIX};
use crate::types::{Polarity, Reply};

// ============================================================================
// Constants
// ============================================================================

/// Maximum response size in bytes (64KB)
const MAX_RESPONSE_SIZE: usize = 65536;

// ============================================================================
// PwmClient
// ============================================================================

/// IPC client for daemon communication.
pub struct PwmClient {
    /// Socket path
    socket_path: PathBuf,
    /// Handshake secret
    auth_key: AuthKey,
    /// Connect and read timeout
    timeout: Duration,
    /// Outcome of the most recent request
    connected: AtomicBool,
}

impl PwmClient {
    /// Creates a client for the daemon described by `config`.
    pub fn new(config: &DaemonConfig) -> Self {
        Self {
            socket_path: config.socket_path.clone(),
            auth_key: config.auth_key.clone(),
            timeout: config.read_timeout,
            connected: AtomicBool::new(false),
        }
    }

    /// Returns the socket path.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Returns true if the last request reached the daemon.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Returns true if the daemon answers at all.
    pub async fn ping(&self) -> bool {
        self.info().await.is_some_and(|reply| !reply.is_error())
    }

    /// Sends one raw request line and returns the decoded reply.
    ///
    /// Returns `None` on any transport failure.
    pub async fn send(&self, line: &str) -> Option<Reply> {
        match self.send_request(line).await {
            Ok(reply) => {
                self.connected.store(true, Ordering::Relaxed);
                Some(reply)
            }
            Err(e) => {
                tracing::debug!("リクエスト失敗: {:#}", e);
                self.connected.store(false, Ordering::Relaxed);
                None
            }
        }
    }

    /// Sends a typed command.
    pub async fn execute(&self, command: &Command) -> Option<Reply> {
        self.send(&command.to_line()).await
    }

    /// Reads every timer on every chip.
    pub async fn states(&self) -> Option<Reply> {
        self.execute(&Command::States).await
    }

    /// Reads the raw state of one timer.
    pub async fn get(&self, chip: u32, timer: u32) -> Option<Reply> {
        self.execute(&Command::Get { chip, timer }).await
    }

    /// Writes a raw timer configuration.
    pub async fn set(
        &self,
        chip: u32,
        timer: u32,
        enable: bool,
        period: u64,
        duty: u64,
        polarity: Option<Polarity>,
    ) -> Option<Reply> {
        self.execute(&Command::Set {
            chip,
            timer,
            enable,
            period,
            duty,
            polarity,
        })
        .await
    }

    /// Exports a timer.
    pub async fn open(&self, chip: u32, timer: u32) -> Option<Reply> {
        self.execute(&Command::Open { chip, timer }).await
    }

    /// Unexports a timer.
    pub async fn close(&self, chip: u32, timer: u32) -> Option<Reply> {
        self.execute(&Command::Close { chip, timer }).await
    }

    /// Drives a timer at `ratio` of the default frequency.
    pub async fn pwm(&self, chip: u32, timer: u32, ratio: f64) -> Option<Reply> {
        self.execute(&Command::Pwm {
            chip,
            timer,
            ratio: Some(ratio),
        })
        .await
    }

    /// Reads `(ratio, frequency)` of a timer.
    pub async fn pwm_state(&self, chip: u32, timer: u32) -> Option<Reply> {
        self.execute(&Command::Pwm {
            chip,
            timer,
            ratio: None,
        })
        .await
    }

    /// Gets, or with `Some` sets, the default pwm frequency.
    pub async fn pwm_frequency(&self, freq: Option<f64>) -> Option<Reply> {
        self.execute(&Command::PwmFreq { freq }).await
    }

    /// Moves a servo to `ratio` of its range.
    pub async fn servo(&self, chip: u32, timer: u32, ratio: f64) -> Option<Reply> {
        self.execute(&Command::Servo { chip, timer, ratio }).await
    }

    /// Reads the servo calibration.
    pub async fn servo_calibration(&self) -> Option<Reply> {
        self.execute(&Command::ServoSet {
            min: None,
            max: None,
            interval: None,
        })
        .await
    }

    /// Updates the servo calibration; `interval` is kept when `None`.
    pub async fn set_servo_calibration(
        &self,
        min: f64,
        max: f64,
        interval: Option<f64>,
    ) -> Option<Reply> {
        self.execute(&Command::ServoSet {
            min: Some(min),
            max: Some(max),
            interval,
        })
        .await
    }

    /// Disables a timer.
    pub async fn disable(&self, chip: u32, timer: u32) -> Option<Reply> {
        self.execute(&Command::Disable { chip, timer }).await
    }

    /// Asks the daemon for its identity, sending our own pid.
    pub async fn info(&self) -> Option<Reply> {
        self.execute(&Command::Info {
            client_pid: std::process::id(),
        })
        .await
    }

    /// Runs one connect, handshake, request, reply cycle.
    async fn send_request(&self, line: &str) -> Result<Reply> {
        if line.contains(['\n', '\r']) {
            anyhow::bail!("リクエストは1行でなければなりません");
        }

        // Connect with timeout
        let stream = timeout(self.timeout, UnixStream::connect(&self.socket_path))
            .await
            .context("接続がタイムアウトしました")?
            .context("Daemonに接続できません。'pwmd server' を起動してください")?;
        let mut stream = BufReader::new(stream);

        // Handshake
        let mut handshake = format!("{AUTH_PREFIX}{}", self.auth_key.expose());
        let sent = write_line(stream.get_mut(), &handshake).await;
        handshake.zeroize();
        sent.context("認証情報の送信に失敗しました")?;

        let ack = read_line(&mut stream, MAX_RESPONSE_SIZE, self.timeout)
            .await
            .map_err(|_| IpcError::AuthRejected)
            .context("認証に失敗しました")?;
        if ack != AUTH_OK {
            return Err(IpcError::AuthRejected).context("認証に失敗しました");
        }

        // Send request
        write_line(stream.get_mut(), line)
            .await
            .context("リクエストの送信に失敗しました")?;

        // Read response with timeout
        let response = read_line(&mut stream, MAX_RESPONSE_SIZE, self.timeout)
            .await
            .context("レスポンスの受信に失敗しました")?;

        serde_json::from_str(&response).context("レスポンスのパースに失敗しました")
    }
}

// ============================================================================
// Tests
// ============================================================================
