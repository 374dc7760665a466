//! Daemon module for pwmd.
//!
//! This module contains the privileged side of the system, bottom-up:
//! - `sysfs`: Property store over the kernel PWM class files
//! - `mock`: In-memory property store for tests
//! - `registry`: Chip discovery and timer export/unexport
//! - `engine`: Timer state engine enforcing write ordering
//! - `derived`: Frequency/ratio and servo operations
//! - `dispatch`: Request grammar and command dispatch
//! - `ipc`: Unix socket server with key handshake

pub mod derived;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod ipc;
pub mod mock;
pub mod registry;
pub mod sysfs;

pub use derived::PwmController;
pub use dispatch::{Command, CommandKind, Dispatcher};
pub use engine::PwmEngine;
pub use error::{PwmError, PwmResult};
pub use ipc::{IpcError, IpcServer};
pub use mock::MockPropertyStore;
pub use registry::TimerRegistry;
pub use sysfs::{Attr, Node, PropertyStore, SysfsStore};
