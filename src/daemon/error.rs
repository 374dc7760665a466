//! Error types for PWM timer operations.
//!
//! Validation failures are expected outcomes that go back to the remote
//! client as an `error:` reply. IO failures are local faults: they are
//! logged by the daemon and reported to the client the same way, but never
//! take the accept loop down.

use thiserror::Error;

/// Errors that can occur while driving PWM timers.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PwmError {
    /// The timer has no control node (not exported).
    #[error("timer {chip}:{timer} is not exported")]
    NotExported {
        /// Chip index
        chip: u32,
        /// Timer index
        timer: u32,
    },

    /// Requested duty cycle is longer than the period.
    #[error("duty {duty} is greater than period {period}")]
    InvalidDuty {
        /// Requested duty (ns)
        duty: u64,
        /// Requested period (ns)
        period: u64,
    },

    /// Output cannot be enabled without a period.
    #[error("cannot enable timer {chip}:{timer} with a zero period")]
    InvalidPeriod {
        /// Chip index
        chip: u32,
        /// Timer index
        timer: u32,
    },

    /// Default frequency must be finite and non-negative.
    #[error("invalid frequency {0}")]
    InvalidFrequency(f64),

    /// Servo calibration bounds violated.
    #[error("invalid servo calibration: {0}")]
    InvalidCalibration(String),

    /// Reading or writing a hardware node failed.
    #[error("cannot access {path}: {reason}")]
    Io {
        /// Node that failed
        path: String,
        /// OS error text
        reason: String,
    },

    /// Malformed request (unknown command, arity, argument type).
    #[error("{0}")]
    Protocol(String),
}

impl PwmError {
    /// Creates an IO error from a path and the underlying OS error.
    pub fn io(path: impl Into<String>, err: &std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            reason: err.to_string(),
        }
    }

    /// Returns true for recoverable, client-caused failures.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        !self.is_io()
    }

    /// Returns true for local hardware access faults.
    #[must_use]
    pub fn is_io(&self) -> bool {
        matches!(self, Self::Io { .. })
    }
}

/// Result alias for PWM operations.
pub type PwmResult<T> = Result<T, PwmError>;
