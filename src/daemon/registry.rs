//! Timer registry: chip discovery and export/unexport.

use super::error::{PwmError, PwmResult};
use super::sysfs::{Attr, Node, PropertyStore};

/// Lists chips and opens or closes timer nodes.
pub struct TimerRegistry<'a, S: PropertyStore> {
    store: &'a S,
}

impl<'a, S: PropertyStore> TimerRegistry<'a, S> {
    /// Wraps a property store.
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Returns `(chip, timer count)` for every chip, in numeric chip order.
    pub fn scan(&self) -> PwmResult<Vec<(u32, u32)>> {
        self.store
            .chips()?
            .into_iter()
            .map(|chip| {
                let npwm = self.store.read_u64(Node::Chip(chip), Attr::Npwm)?;
                let npwm = u32::try_from(npwm).map_err(|_| PwmError::Io {
                    path: Node::Chip(chip).path(self.store.base()).display().to_string(),
                    reason: format!("implausible timer count {npwm}"),
                })?;
                Ok((chip, npwm))
            })
            .collect()
    }

    /// Returns true if the timer node exists.
    pub fn is_exported(&self, chip: u32, timer: u32) -> bool {
        self.store.exists(Node::timer(chip, timer))
    }

    /// Exports a timer. Already exported counts as success.
    ///
    /// # Errors
    ///
    /// Fails if the export write fails or the kernel did not create the node.
    pub fn open(&self, chip: u32, timer: u32) -> PwmResult<()> {
        if self.is_exported(chip, timer) {
            return Ok(());
        }
        self.store
            .write(Node::Chip(chip), Attr::Export, &timer.to_string())?;
        if !self.is_exported(chip, timer) {
            return Err(self.unchanged(chip, timer, "export"));
        }
        tracing::info!("opened: pwmchip{}/pwm{}", chip, timer);
        Ok(())
    }

    /// Unexports a timer. Already unexported counts as success.
    ///
    /// # Errors
    ///
    /// Fails if the unexport write fails or the node is still present.
    pub fn close(&self, chip: u32, timer: u32) -> PwmResult<()> {
        if !self.is_exported(chip, timer) {
            return Ok(());
        }
        self.store
            .write(Node::Chip(chip), Attr::Unexport, &timer.to_string())?;
        if self.is_exported(chip, timer) {
            return Err(self.unchanged(chip, timer, "unexport"));
        }
        tracing::info!("closed: pwmchip{}/pwm{}", chip, timer);
        Ok(())
    }

    fn unchanged(&self, chip: u32, timer: u32, op: &str) -> PwmError {
        PwmError::Io {
            path: Node::timer(chip, timer)
                .path(self.store.base())
                .display()
                .to_string(),
            reason: format!("{op} was not honored by the kernel"),
        }
    }
}
