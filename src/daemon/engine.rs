//! Timer state engine.
//!
//! Owns the hardware invariants for a timer:
//! - `duty <= period`, checked before anything is written
//! - enabling needs a non-zero period
//! - writes happen in the order duty-zero → period → duty → polarity → enable
//!
//! Duty values passed to [`PwmEngine::set`] are polarity-normalized: with an
//! inversed timer the engine writes `period - duty`, so a given duty always
//! means the same fraction of active output.

use std::collections::BTreeMap;

use super::error::{PwmError, PwmResult};
use super::registry::TimerRegistry;
use super::sysfs::{Attr, Node, PropertyStore};
use crate::types::{ChipStates, Polarity, TimerState};

/// Timer state engine over a property store.
pub struct PwmEngine<S: PropertyStore> {
    store: S,
}

impl<S: PropertyStore> PwmEngine<S> {
    /// Creates an engine driving the given store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Returns the underlying property store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Returns a registry view over the same store.
    pub fn registry(&self) -> TimerRegistry<'_, S> {
        TimerRegistry::new(&self.store)
    }

    /// Exports a timer.
    pub fn open(&self, chip: u32, timer: u32) -> PwmResult<()> {
        self.registry().open(chip, timer)
    }

    /// Unexports a timer.
    pub fn close(&self, chip: u32, timer: u32) -> PwmResult<()> {
        self.registry().close(chip, timer)
    }

    /// Reads the current state of a timer, `None` if not exported.
    pub fn get(&self, chip: u32, timer: u32) -> PwmResult<Option<TimerState>> {
        let node = Node::timer(chip, timer);
        if !self.store.exists(node) {
            return Ok(None);
        }
        let polarity_text = self.store.read(node, Attr::Polarity)?;
        let polarity = polarity_text.parse::<Polarity>().map_err(|reason| PwmError::Io {
            path: node.path(self.store.base()).join("polarity").display().to_string(),
            reason,
        })?;
        Ok(Some(TimerState {
            enabled: self.store.read_u64(node, Attr::Enable)? != 0,
            period: self.store.read_u64(node, Attr::Period)?,
            duty: self.store.read_u64(node, Attr::DutyCycle)?,
            polarity,
        }))
    }

    /// Reads every timer on every chip.
    pub fn states(&self) -> PwmResult<ChipStates> {
        let mut states = ChipStates::new();
        for (chip, npwm) in self.registry().scan()? {
            let mut timers = BTreeMap::new();
            for timer in 0..npwm {
                timers.insert(timer, self.get(chip, timer)?);
            }
            states.insert(chip, timers);
        }
        Ok(states)
    }

    /// Applies a new configuration to an exported timer.
    ///
    /// With `enable == false` the timer is disabled and every other argument
    /// is ignored. Otherwise `None` leaves the corresponding value as it is.
    ///
    /// # Errors
    ///
    /// - [`PwmError::NotExported`] if the timer has no node
    /// - [`PwmError::InvalidDuty`] if duty exceeds period (nothing is written)
    /// - [`PwmError::InvalidPeriod`] if the resulting period is zero
    /// - [`PwmError::Io`] if a write is refused
    pub fn set(
        &self,
        chip: u32,
        timer: u32,
        enable: bool,
        period: Option<u64>,
        duty: Option<u64>,
        polarity: Option<Polarity>,
    ) -> PwmResult<()> {
        let node = Node::timer(chip, timer);
        if !self.store.exists(node) {
            return Err(PwmError::NotExported { chip, timer });
        }

        if !enable {
            self.store.write(node, Attr::Enable, "0")?;
            tracing::debug!("disabled: pwmchip{}/pwm{}", chip, timer);
            return Ok(());
        }

        if let (Some(period), Some(duty)) = (period, duty) {
            if duty > period {
                return Err(PwmError::InvalidDuty { duty, period });
            }
        }

        let current = self
            .get(chip, timer)?
            .ok_or(PwmError::NotExported { chip, timer })?;

        let target_polarity = polarity.unwrap_or(current.polarity);
        let target_period = period.unwrap_or(current.period);
        let target_duty = duty.unwrap_or_else(|| {
            if current.polarity.is_inversed() {
                current.period.saturating_sub(current.duty)
            } else {
                current.duty
            }
        });

        if target_duty > target_period {
            return Err(PwmError::InvalidDuty {
                duty: target_duty,
                period: target_period,
            });
        }
        if target_period == 0 {
            return Err(PwmError::InvalidPeriod { chip, timer });
        }

        let hardware_duty = if target_polarity.is_inversed() {
            target_period - target_duty
        } else {
            target_duty
        };

        let mut written_duty = current.duty;
        if target_period != current.period {
            // The kernel refuses a period shorter than the live duty cycle.
            if written_duty != 0 {
                self.store.write(node, Attr::DutyCycle, "0")?;
                written_duty = 0;
            }
            self.store
                .write(node, Attr::Period, &target_period.to_string())?;
        }
        if hardware_duty != written_duty {
            self.store
                .write(node, Attr::DutyCycle, &hardware_duty.to_string())?;
        }
        if target_polarity != current.polarity {
            self.store
                .write(node, Attr::Polarity, target_polarity.as_str())?;
        }
        if !current.enabled {
            self.store.write(node, Attr::Enable, "1")?;
        }

        if tracing::enabled!(tracing::Level::DEBUG) {
            if let Ok(Some(state)) = self.get(chip, timer) {
                tracing::debug!("set: pwmchip{}/pwm{} = {:?}", chip, timer, state);
            }
        }
        Ok(())
    }

    /// Disables a timer's output.
    pub fn disable(&self, chip: u32, timer: u32) -> PwmResult<()> {
        self.set(chip, timer, false, None, None, None)
    }
}

// ============================================================================
// Tests
// ============================================================================
