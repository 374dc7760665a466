//! Property store over the kernel PWM class directory.
//!
//! Layout under the base path (normally `/sys/class/pwm`):
//!
//! ```text
//! pwmchip<N>/npwm
//! pwmchip<N>/export
//! pwmchip<N>/unexport
//! pwmchip<N>/pwm<T>/{enable,period,duty_cycle,polarity}
//! ```
//!
//! Every call is one open/read-or-write/close of a single attribute file.
//! No handles are kept between calls and nothing is cached.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use super::error::{PwmError, PwmResult};

/// Directory prefix of each chip node.
const CHIP_PREFIX: &str = "pwmchip";

// ============================================================================
// Node / Attr
// ============================================================================

/// A chip or timer directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Node {
    /// `pwmchip<N>`
    Chip(u32),
    /// `pwmchip<N>/pwm<T>`
    Timer {
        /// Chip index
        chip: u32,
        /// Timer index
        timer: u32,
    },
}

impl Node {
    /// Shorthand for a timer node.
    pub fn timer(chip: u32, timer: u32) -> Self {
        Node::Timer { chip, timer }
    }

    /// Directory of this node below `base`.
    pub fn path(&self, base: &Path) -> PathBuf {
        match *self {
            Node::Chip(chip) => base.join(format!("{CHIP_PREFIX}{chip}")),
            Node::Timer { chip, timer } => Node::Chip(chip).path(base).join(format!("pwm{timer}")),
        }
    }
}

/// A single attribute file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attr {
    /// Number of timers on a chip (read-only)
    Npwm,
    /// Write a timer index to create its node
    Export,
    /// Write a timer index to remove its node
    Unexport,
    /// `0` / `1`
    Enable,
    /// Period in nanoseconds
    Period,
    /// Duty cycle in nanoseconds
    DutyCycle,
    /// `normal` / `inversed`
    Polarity,
}

impl Attr {
    /// File name of the attribute.
    pub fn file_name(&self) -> &'static str {
        match self {
            Attr::Npwm => "npwm",
            Attr::Export => "export",
            Attr::Unexport => "unexport",
            Attr::Enable => "enable",
            Attr::Period => "period",
            Attr::DutyCycle => "duty_cycle",
            Attr::Polarity => "polarity",
        }
    }
}

// ============================================================================
// PropertyStore
// ============================================================================

/// Raw text access to PWM attributes.
pub trait PropertyStore {
    /// Reads an attribute, with surrounding whitespace trimmed.
    fn read(&self, node: Node, attr: Attr) -> PwmResult<String>;

    /// Writes an attribute.
    fn write(&self, node: Node, attr: Attr, value: &str) -> PwmResult<()>;

    /// Returns true if the node directory exists.
    fn exists(&self, node: Node) -> bool;

    /// Lists chip indices present under the base, in numeric order.
    fn chips(&self) -> PwmResult<Vec<u32>>;

    /// Base directory, as reported by `info`.
    fn base(&self) -> &Path;

    /// Reads an attribute holding an unsigned integer.
    fn read_u64(&self, node: Node, attr: Attr) -> PwmResult<u64> {
        let text = self.read(node, attr)?;
        text.parse().map_err(|_| PwmError::Io {
            path: node.path(self.base()).join(attr.file_name()).display().to_string(),
            reason: format!("unexpected value '{text}'"),
        })
    }
}

// ============================================================================
// SysfsStore
// ============================================================================

/// Property store backed by the real filesystem.
#[derive(Debug, Clone)]
pub struct SysfsStore {
    base: PathBuf,
}

impl SysfsStore {
    /// Creates a store rooted at `base`.
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    fn attr_path(&self, node: Node, attr: Attr) -> PathBuf {
        node.path(&self.base).join(attr.file_name())
    }
}

impl PropertyStore for SysfsStore {
    fn read(&self, node: Node, attr: Attr) -> PwmResult<String> {
        let path = self.attr_path(node, attr);
        std::fs::read_to_string(&path)
            .map(|s| s.trim().to_string())
            .map_err(|e| PwmError::io(path.display().to_string(), &e))
    }

    fn write(&self, node: Node, attr: Attr, value: &str) -> PwmResult<()> {
        let path = self.attr_path(node, attr);
        // Attribute files are never created, only written.
        OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&path)
            .and_then(|mut f| f.write_all(value.as_bytes()))
            .map_err(|e| PwmError::io(path.display().to_string(), &e))
    }

    fn exists(&self, node: Node) -> bool {
        node.path(&self.base).exists()
    }

    fn chips(&self) -> PwmResult<Vec<u32>> {
        let entries = match std::fs::read_dir(&self.base) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(PwmError::io(self.base.display().to_string(), &e)),
        };

        let mut chips: Vec<u32> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .and_then(|name| name.strip_prefix(CHIP_PREFIX))
                    .and_then(|index| index.parse().ok())
            })
            .collect();
        chips.sort_unstable();
        Ok(chips)
    }

    fn base(&self) -> &Path {
        &self.base
    }
}

// ============================================================================
// Tests
// ============================================================================
