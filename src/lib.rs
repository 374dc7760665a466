//! pwmd Library
//!
//! This library shares kernel PWM timers with unprivileged processes.
//! It includes:
//! - Property store over the sysfs PWM class, plus an in-memory mock
//! - Timer state engine enforcing the hardware write ordering
//! - Frequency/ratio and servo operations on top of raw timers
//! - IPC server/client with a shared-key handshake
//! - CLI command parsing and display utilities

pub mod cli;
pub mod config;
pub mod daemon;
pub mod types;

// Re-export commonly used types for convenience
pub use config::{AuthKey, DaemonConfig};
pub use types::{ChipStates, DaemonInfo, Polarity, Reply, ServoCalibration, TimerState};

pub use cli::PwmClient;
pub use daemon::{
    Command, Dispatcher, IpcServer, MockPropertyStore, PropertyStore, PwmController, PwmEngine,
    PwmError, SysfsStore,
};
