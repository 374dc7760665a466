//! Frequency/ratio conversions and the pwm and servo output modes.
//!
//! Both modes only ever go through [`PwmEngine`], so the engine's
//! invariants and write ordering apply to them unchanged.

use super::engine::PwmEngine;
use super::error::{PwmError, PwmResult};
use super::sysfs::PropertyStore;
use crate::types::ServoCalibration;

/// Default PWM frequency in Hz.
pub const DEFAULT_FREQUENCY_HZ: f64 = 1000.0;

const NANOS_PER_SEC: f64 = 1e9;

// ============================================================================
// Conversions
// ============================================================================

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

fn secs_to_nanos(secs: f64) -> u64 {
    (secs * NANOS_PER_SEC).round() as u64
}

/// Converts a frequency and duty ratio to `(period, duty)` in nanoseconds.
///
/// A zero frequency yields `(0, 0)`.
pub fn freq_to_period_duty(freq_hz: f64, ratio: f64) -> (u64, u64) {
    if freq_hz == 0.0 {
        return (0, 0);
    }
    let period = (NANOS_PER_SEC / freq_hz).round();
    let duty = (period * ratio).round();
    (period as u64, duty as u64)
}

/// Converts `(period, duty)` in nanoseconds to `(freq_hz, ratio)`,
/// rounded to 3 decimal places.
///
/// A zero period yields `(0.0, 0.0)`.
pub fn period_duty_to_freq(period: u64, duty: u64) -> (f64, f64) {
    if period == 0 {
        return (0.0, 0.0);
    }
    let period = period as f64;
    (round3(NANOS_PER_SEC / period), round3(duty as f64 / period))
}

// ============================================================================
// PwmController
// ============================================================================

/// State engine plus the daemon's runtime output settings.
///
/// The default frequency and servo calibration are process-wide for the
/// daemon and start from built-in defaults on every restart.
pub struct PwmController<S: PropertyStore> {
    engine: PwmEngine<S>,
    frequency: f64,
    calibration: ServoCalibration,
}

impl<S: PropertyStore> PwmController<S> {
    /// Creates a controller with default frequency and calibration.
    pub fn new(engine: PwmEngine<S>) -> Self {
        Self {
            engine,
            frequency: DEFAULT_FREQUENCY_HZ,
            calibration: ServoCalibration::default(),
        }
    }

    /// Returns the state engine.
    pub fn engine(&self) -> &PwmEngine<S> {
        &self.engine
    }

    /// Drives a timer at the default frequency with the given duty ratio.
    ///
    /// The ratio is clamped to `[0, 1]`.
    pub fn pwm(&self, chip: u32, timer: u32, ratio: f64) -> PwmResult<()> {
        let (period, duty) = freq_to_period_duty(self.frequency, ratio.clamp(0.0, 1.0));
        self.engine
            .set(chip, timer, true, Some(period), Some(duty), None)
    }

    /// Reads a timer back as `(ratio, freq_hz)`.
    ///
    /// Returns `None` if the timer is not exported or not enabled.
    pub fn pwm_state(&self, chip: u32, timer: u32) -> PwmResult<Option<(f64, f64)>> {
        let Some(state) = self.engine.get(chip, timer)? else {
            return Ok(None);
        };
        if !state.enabled {
            return Ok(None);
        }
        let (freq, ratio) = period_duty_to_freq(state.period, state.duty);
        let ratio = if state.polarity.is_inversed() {
            round3(1.0 - ratio)
        } else {
            ratio
        };
        Ok(Some((ratio, freq)))
    }

    /// Gets, or sets and returns, the default frequency.
    ///
    /// # Errors
    ///
    /// Returns [`PwmError::InvalidFrequency`] for negative or non-finite values.
    pub fn pwm_frequency(&mut self, freq: Option<f64>) -> PwmResult<f64> {
        if let Some(freq) = freq {
            if !freq.is_finite() || freq < 0.0 {
                return Err(PwmError::InvalidFrequency(freq));
            }
            self.frequency = freq;
            tracing::info!("default frequency set to {} Hz", freq);
        }
        Ok(self.frequency)
    }

    /// Positions a servo: the ratio (clamped to `[0, 1]`) maps linearly onto
    /// the calibrated pulse range, repeated every calibrated interval.
    pub fn servo(&self, chip: u32, timer: u32, ratio: f64) -> PwmResult<()> {
        let ServoCalibration { min, max, interval } = self.calibration;
        let pulse = min + (max - min) * ratio.clamp(0.0, 1.0);
        self.engine.set(
            chip,
            timer,
            true,
            Some(secs_to_nanos(interval)),
            Some(secs_to_nanos(pulse)),
            None,
        )
    }

    /// Gets the servo calibration, or updates any of its fields.
    ///
    /// All three values are validated together and replaced at once;
    /// on failure the previous calibration is kept.
    pub fn servo_calibration(
        &mut self,
        min: Option<f64>,
        max: Option<f64>,
        interval: Option<f64>,
    ) -> PwmResult<ServoCalibration> {
        if min.is_none() && max.is_none() && interval.is_none() {
            return Ok(self.calibration);
        }
        let candidate = ServoCalibration {
            min: min.unwrap_or(self.calibration.min),
            max: max.unwrap_or(self.calibration.max),
            interval: interval.unwrap_or(self.calibration.interval),
        };
        candidate.validate().map_err(PwmError::InvalidCalibration)?;
        self.calibration = candidate;
        tracing::info!("servo calibration set to {:?}", candidate);
        Ok(candidate)
    }
}

// ============================================================================
// Tests
// ============================================================================
