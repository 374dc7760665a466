//! In-memory property store for tests.
//!
//! Emulates the parts of the kernel PWM class the daemon relies on:
//! exporting creates a timer node, unexporting removes it, and the
//! attribute writes the kernel would refuse (duty above period, period
//! below duty, enabling with no period) fail with `Invalid argument`.
//! Every attempted write is recorded.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::error::{PwmError, PwmResult};
use super::sysfs::{Attr, Node, PropertyStore};
use crate::types::{Polarity, TimerState};

const MOCK_BASE: &str = "/mock/sys/class/pwm";

/// One write seen by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockWrite {
    /// Target node
    pub node: Node,
    /// Target attribute
    pub attr: Attr,
    /// Value written
    pub value: String,
}

#[derive(Debug, Default)]
struct MockChip {
    npwm: u32,
    timers: BTreeMap<u32, TimerState>,
}

#[derive(Debug, Default)]
struct MockInner {
    chips: BTreeMap<u32, MockChip>,
    writes: Vec<MockWrite>,
    failing: HashSet<Attr>,
    ignore_exports: bool,
}

/// Mock property store for testing.
#[derive(Debug)]
pub struct MockPropertyStore {
    base: PathBuf,
    inner: Mutex<MockInner>,
}

impl Default for MockPropertyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MockPropertyStore {
    /// Creates a store with no chips.
    pub fn new() -> Self {
        Self {
            base: PathBuf::from(MOCK_BASE),
            inner: Mutex::new(MockInner::default()),
        }
    }

    /// Adds a chip with `npwm` timers, none exported.
    pub fn with_chip(self, chip: u32, npwm: u32) -> Self {
        self.lock().chips.insert(
            chip,
            MockChip {
                npwm,
                timers: BTreeMap::new(),
            },
        );
        self
    }

    /// Adds an already exported timer with the given state.
    pub fn with_exported(self, chip: u32, timer: u32, state: TimerState) -> Self {
        {
            let mut inner = self.lock();
            let entry = inner.chips.entry(chip).or_default();
            entry.npwm = entry.npwm.max(timer + 1);
            entry.timers.insert(timer, state);
        }
        self
    }

    /// Makes export/unexport writes succeed without changing any node.
    pub fn ignore_exports(&self, ignore: bool) {
        self.lock().ignore_exports = ignore;
    }

    /// Makes every write to `attr` fail with a permission error.
    pub fn fail_writes_to(&self, attr: Attr) {
        self.lock().failing.insert(attr);
    }

    /// Returns all writes recorded so far.
    pub fn writes(&self) -> Vec<MockWrite> {
        self.lock().writes.clone()
    }

    /// Forgets recorded writes.
    pub fn clear_writes(&self) {
        self.lock().writes.clear();
    }

    /// Returns the raw state of a timer, if exported.
    pub fn timer_state(&self, chip: u32, timer: u32) -> Option<TimerState> {
        self.lock()
            .chips
            .get(&chip)
            .and_then(|c| c.timers.get(&timer))
            .copied()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn fail(&self, node: Node, attr: Attr, reason: &str) -> PwmError {
        PwmError::Io {
            path: node.path(&self.base).join(attr.file_name()).display().to_string(),
            reason: reason.to_string(),
        }
    }
}

fn parse_u64(value: &str) -> Option<u64> {
    value.trim().parse().ok()
}

impl PropertyStore for MockPropertyStore {
    fn read(&self, node: Node, attr: Attr) -> PwmResult<String> {
        let inner = self.lock();
        let missing = || self.fail(node, attr, "No such file or directory");
        match node {
            Node::Chip(chip) => {
                let c = inner.chips.get(&chip).ok_or_else(missing)?;
                match attr {
                    Attr::Npwm => Ok(c.npwm.to_string()),
                    _ => Err(self.fail(node, attr, "Permission denied")),
                }
            }
            Node::Timer { chip, timer } => {
                let state = inner
                    .chips
                    .get(&chip)
                    .and_then(|c| c.timers.get(&timer))
                    .ok_or_else(missing)?;
                match attr {
                    Attr::Enable => Ok(u8::from(state.enabled).to_string()),
                    Attr::Period => Ok(state.period.to_string()),
                    Attr::DutyCycle => Ok(state.duty.to_string()),
                    Attr::Polarity => Ok(state.polarity.as_str().to_string()),
                    _ => Err(missing()),
                }
            }
        }
    }

    fn write(&self, node: Node, attr: Attr, value: &str) -> PwmResult<()> {
        let mut inner = self.lock();
        inner.writes.push(MockWrite {
            node,
            attr,
            value: value.to_string(),
        });

        if inner.failing.contains(&attr) {
            return Err(self.fail(node, attr, "Permission denied"));
        }

        let invalid = || self.fail(node, attr, "Invalid argument");
        let missing = || self.fail(node, attr, "No such file or directory");
        let ignore_exports = inner.ignore_exports;

        match node {
            Node::Chip(chip) => {
                let c = inner.chips.get_mut(&chip).ok_or_else(missing)?;
                let timer = value.trim().parse::<u32>().map_err(|_| invalid())?;
                if timer >= c.npwm {
                    return Err(invalid());
                }
                if ignore_exports {
                    return Ok(());
                }
                match attr {
                    Attr::Export => {
                        if c.timers.contains_key(&timer) {
                            return Err(self.fail(node, attr, "Device or resource busy"));
                        }
                        c.timers.insert(
                            timer,
                            TimerState {
                                enabled: false,
                                period: 0,
                                duty: 0,
                                polarity: Polarity::Normal,
                            },
                        );
                        Ok(())
                    }
                    Attr::Unexport => c.timers.remove(&timer).map(|_| ()).ok_or_else(invalid),
                    _ => Err(missing()),
                }
            }
            Node::Timer { chip, timer } => {
                let state = inner
                    .chips
                    .get_mut(&chip)
                    .and_then(|c| c.timers.get_mut(&timer))
                    .ok_or_else(missing)?;
                match attr {
                    Attr::Enable => match value.trim() {
                        "0" => state.enabled = false,
                        "1" if state.period > 0 => state.enabled = true,
                        _ => return Err(invalid()),
                    },
                    Attr::Period => {
                        let period = parse_u64(value).ok_or_else(invalid)?;
                        if period < state.duty {
                            return Err(invalid());
                        }
                        state.period = period;
                    }
                    Attr::DutyCycle => {
                        let duty = parse_u64(value).ok_or_else(invalid)?;
                        if duty > state.period {
                            return Err(invalid());
                        }
                        state.duty = duty;
                    }
                    Attr::Polarity => {
                        state.polarity = value.parse().map_err(|_| invalid())?;
                    }
                    _ => return Err(missing()),
                }
                Ok(())
            }
        }
    }

    fn exists(&self, node: Node) -> bool {
        let inner = self.lock();
        match node {
            Node::Chip(chip) => inner.chips.contains_key(&chip),
            Node::Timer { chip, timer } => inner
                .chips
                .get(&chip)
                .is_some_and(|c| c.timers.contains_key(&timer)),
        }
    }

    fn chips(&self) -> PwmResult<Vec<u32>> {
        Ok(self.lock().chips.keys().copied().collect())
    }

    fn base(&self) -> &Path {
        &self.base
    }
}

/// Runs `f` under a plain-text subscriber and returns everything it logged.
#[cfg(test)]
pub(crate) fn capture_logs(f: impl FnOnce()) -> String {
    use std::io;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl io::Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    let buf = SharedBuf::default();
    let writer = buf.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .without_time()
        .with_max_level(tracing::Level::DEBUG)
        .finish();
    tracing::subscriber::with_default(subscriber, f);

    let bytes = buf.0.lock().unwrap_or_else(|e| e.into_inner()).clone();
    String::from_utf8_lossy(&bytes).into_owned()
}
