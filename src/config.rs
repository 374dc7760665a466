//! Daemon and client configuration.
//!
//! A single [`DaemonConfig`] value is built once (from CLI flags and
//! environment) and handed to both [`crate::daemon::ipc::IpcServer`] and
//! [`crate::cli::client::PwmClient`]. Nothing here is process-global.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use zeroize::Zeroize;

// ============================================================================
// Constants
// ============================================================================

/// Default socket path
pub const DEFAULT_SOCKET_PATH: &str = "/run/pwm/pwmd.sock";

/// Default root of the kernel PWM class
pub const DEFAULT_SYSFS_BASE: &str = "/sys/class/pwm";

/// Default read timeout in seconds
const DEFAULT_READ_TIMEOUT_SECS: u64 = 5;

// ============================================================================
// AuthKey
// ============================================================================

/// Shared secret checked during the connection handshake.
///
/// Cleared from memory on drop and never printed. There is no built-in
/// value: the default key is empty and fails [`DaemonConfig::validate`].
#[derive(Clone, Default)]
pub struct AuthKey {
    inner: String,
}

impl AuthKey {
    /// Creates a key from its text value.
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            inner: value.into(),
        }
    }

    /// Returns true once a non-empty key has been supplied.
    pub fn is_configured(&self) -> bool {
        !self.inner.is_empty()
    }

    /// Returns the key text.
    pub fn expose(&self) -> &str {
        &self.inner
    }

    /// Compares against a presented key without short-circuiting on the
    /// first differing byte.
    pub fn matches(&self, presented: &str) -> bool {
        let a = self.inner.as_bytes();
        let b = presented.as_bytes();
        if a.len() != b.len() {
            return false;
        }
        a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
    }
}

impl fmt::Debug for AuthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthKey")
            .field("inner", &"[REDACTED]")
            .finish()
    }
}

impl Drop for AuthKey {
    fn drop(&mut self) {
        self.inner.zeroize();
    }
}

// ============================================================================
// DaemonConfig
// ============================================================================

/// Connection and hardware settings shared by server and client.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Unix socket the daemon listens on
    pub socket_path: PathBuf,
    /// Root of the PWM class directory
    pub sysfs_base: PathBuf,
    /// Handshake secret
    pub auth_key: AuthKey,
    /// Upper bound on any single blocking socket read
    pub read_timeout: Duration,
    /// Version reported by `info`
    pub version: String,
    /// Owner `(uid, gid)` applied to the socket after binding
    pub socket_owner: Option<(u32, u32)>,
    /// Permission bits applied to the socket after binding
    pub socket_mode: Option<u32>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            sysfs_base: PathBuf::from(DEFAULT_SYSFS_BASE),
            auth_key: AuthKey::default(),
            read_timeout: Duration::from_secs(DEFAULT_READ_TIMEOUT_SECS),
            version: env!("CARGO_PKG_VERSION").to_string(),
            socket_owner: None,
            socket_mode: None,
        }
    }
}

impl DaemonConfig {
    /// Sets the socket path.
    pub fn with_socket_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.socket_path = path.into();
        self
    }

    /// Sets the PWM class root.
    pub fn with_sysfs_base(mut self, path: impl Into<PathBuf>) -> Self {
        self.sysfs_base = path.into();
        self
    }

    /// Sets the handshake secret.
    pub fn with_auth_key(mut self, key: impl Into<String>) -> Self {
        self.auth_key = AuthKey::new(key);
        self
    }

    /// Sets the socket read timeout.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Sets the socket owner.
    pub fn with_socket_owner(mut self, uid: u32, gid: u32) -> Self {
        self.socket_owner = Some((uid, gid));
        self
    }

    /// Sets the socket permission bits.
    pub fn with_socket_mode(mut self, mode: u32) -> Self {
        self.socket_mode = Some(mode);
        self
    }

    /// Returns the socket path.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Validates the configuration.
    ///
    /// Returns an error message if validation fails.
    pub fn validate(&self) -> Result<(), String> {
        if self.socket_path.as_os_str().is_empty() {
            return Err("ソケットパスを指定してください".to_string());
        }
        if !self.auth_key.is_configured() {
            return Err(
                "認証キーが設定されていません (--authkey または PWMD_AUTHKEY で指定してください)"
                    .to_string(),
            );
        }
        if self.auth_key.expose().contains(['\n', '\r']) {
            return Err("認証キーに改行を含めることはできません".to_string());
        }
        if self.socket_mode.is_some_and(|mode| mode > 0o777) {
            return Err("ソケットのパーミッションは0-777の範囲で指定してください".to_string());
        }
        if self.read_timeout.is_zero() {
            return Err("タイムアウトは1秒以上で指定してください".to_string());
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
