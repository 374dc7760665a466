//! Core data types for the PWM daemon.
//!
//! This module defines the data structures used for:
//! - Timer state as read back from the hardware
//! - Servo calibration with validation
//! - The reply value carried over the socket

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ============================================================================
// Polarity
// ============================================================================

/// Which level the active (duty) part of a cycle is driven at.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Polarity {
    /// Duty portion is driven high
    #[default]
    Normal,
    /// Duty portion is driven low
    Inversed,
}

impl Polarity {
    /// Returns the sysfs spelling of the polarity.
    pub fn as_str(&self) -> &'static str {
        match self {
            Polarity::Normal => "normal",
            Polarity::Inversed => "inversed",
        }
    }

    /// Maps the wire index (0 = normal, 1 = inversed) to a polarity.
    pub fn from_index(index: u32) -> Option<Self> {
        match index {
            0 => Some(Polarity::Normal),
            1 => Some(Polarity::Inversed),
            _ => None,
        }
    }

    /// Returns true for [`Polarity::Inversed`].
    pub fn is_inversed(&self) -> bool {
        *self == Polarity::Inversed
    }
}

impl fmt::Display for Polarity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Polarity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "normal" => Ok(Polarity::Normal),
            "inversed" => Ok(Polarity::Inversed),
            other => Err(format!("unknown polarity '{other}'")),
        }
    }
}

// ============================================================================
// TimerState
// ============================================================================

/// Snapshot of one exported PWM timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerState {
    /// Output enabled
    pub enabled: bool,
    /// Cycle length in nanoseconds
    pub period: u64,
    /// Active time within the cycle in nanoseconds
    pub duty: u64,
    /// Output polarity
    pub polarity: Polarity,
}

/// Chip index → timer index → state (`None` when the timer is not exported).
pub type ChipStates = BTreeMap<u32, BTreeMap<u32, Option<TimerState>>>;

// ============================================================================
// ServoCalibration
// ============================================================================

/// Pulse limits and repeat interval for RC servo output, all in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ServoCalibration {
    /// Pulse width at ratio 0
    pub min: f64,
    /// Pulse width at ratio 1
    pub max: f64,
    /// Pulse repeat interval (the PWM period)
    pub interval: f64,
}

impl Default for ServoCalibration {
    fn default() -> Self {
        Self {
            min: 0.0005,
            max: 0.0025,
            interval: 0.02,
        }
    }
}

impl ServoCalibration {
    /// Creates a calibration from explicit values.
    pub fn new(min: f64, max: f64, interval: f64) -> Self {
        Self { min, max, interval }
    }

    /// Validates the calibration.
    ///
    /// Returns an error message if validation fails.
    pub fn validate(&self) -> Result<(), String> {
        if ![self.min, self.max, self.interval]
            .iter()
            .all(|v| v.is_finite() && *v >= 0.0)
        {
            return Err("servo values must be finite and non-negative".to_string());
        }
        if self.min > self.max {
            return Err(format!(
                "servo min pulse {} is greater than max pulse {}",
                self.min, self.max
            ));
        }
        if self.max > self.interval {
            return Err(format!(
                "servo max pulse {} is greater than interval {}",
                self.max, self.interval
            ));
        }
        Ok(())
    }

    /// Returns the calibration as `[min, max, interval]`.
    pub fn to_values(&self) -> Vec<f64> {
        vec![self.min, self.max, self.interval]
    }
}

// ============================================================================
// DaemonInfo
// ============================================================================

/// Identity of the running daemon, returned by the `info` command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonInfo {
    /// Daemon version string
    pub version: String,
    /// Daemon process id
    pub pid: u32,
    /// Effective user id of the daemon
    pub uid: u32,
    /// Effective group id of the daemon
    pub gid: u32,
    /// Root of the PWM class directory the daemon drives
    pub sysfs_base: String,
}

// ============================================================================
// Reply
// ============================================================================

/// Prefix carried by every failure reply.
pub const ERROR_PREFIX: &str = "error:";

/// The single value sent back for each request.
///
/// Encoded untagged, so on the wire a reply is just `null`, a boolean,
/// a number, an array of numbers, an object or an `error: ...` string.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Reply {
    /// No value (unexported or disabled timer)
    Empty,
    /// Success / failure flag
    Flag(bool),
    /// Single number, e.g. the default frequency
    Number(f64),
    /// Tuple of numbers, e.g. `(ratio, freq)` or a servo calibration
    Values(Vec<f64>),
    /// State of a single timer
    State(TimerState),
    /// Daemon identity
    Info(DaemonInfo),
    /// State of every timer on every chip
    States(ChipStates),
    /// Failure description, always starting with [`ERROR_PREFIX`]
    Error(String),
}

impl Reply {
    /// Creates an error reply, adding the `error:` prefix.
    pub fn error(message: impl fmt::Display) -> Self {
        Reply::Error(format!("{ERROR_PREFIX} {message}"))
    }

    /// Returns true if this reply reports a failure.
    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }

    /// Returns the flag value, if this is a flag reply.
    pub fn as_flag(&self) -> Option<bool> {
        match self {
            Reply::Flag(flag) => Some(*flag),
            _ => None,
        }
    }

    /// Returns the number, if this is a single-number reply.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Reply::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the numbers, if this is a tuple reply.
    pub fn as_values(&self) -> Option<&[f64]> {
        match self {
            Reply::Values(values) => Some(values),
            _ => None,
        }
    }
}

// Decoded by JSON shape. The derived untagged decoder buffers objects and
// cannot read the numeric keys of a states map back.
impl<'de> Deserialize<'de> for Reply {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::Error;
        use serde_json::Value;

        let value = Value::deserialize(deserializer)?;
        let decoded = match value {
            Value::Null => return Ok(Reply::Empty),
            Value::Bool(flag) => return Ok(Reply::Flag(flag)),
            Value::String(message) => return Ok(Reply::Error(message)),
            Value::Number(n) => {
                return n
                    .as_f64()
                    .map(Reply::Number)
                    .ok_or_else(|| D::Error::custom(format!("number {n} out of range")))
            }
            Value::Array(_) => serde_json::from_value(value).map(Reply::Values),
            Value::Object(ref map) if map.contains_key("enabled") => {
                serde_json::from_value(value).map(Reply::State)
            }
            Value::Object(ref map) if map.contains_key("version") => {
                serde_json::from_value(value).map(Reply::Info)
            }
            Value::Object(_) => serde_json::from_value(value).map(Reply::States),
        };
        decoded.map_err(D::Error::custom)
    }
}

impl From<bool> for Reply {
    fn from(flag: bool) -> Self {
        Reply::Flag(flag)
    }
}

impl From<Option<TimerState>> for Reply {
    fn from(state: Option<TimerState>) -> Self {
        state.map_or(Reply::Empty, Reply::State)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // ------------------------------------------------------------------------
    // Polarity Tests
    // ------------------------------------------------------------------------

    mod polarity_tests {
        use super::*;

        #[test]
        fn test_default_is_normal() {
            assert_eq!(Polarity::default(), Polarity::Normal);
        }

        #[test]
        fn test_parse_sysfs_text() {
            assert_eq!("normal\n".parse::<Polarity>(), Ok(Polarity::Normal));
            assert_eq!("inversed".parse::<Polarity>(), Ok(Polarity::Inversed));
            assert!("inverted".parse::<Polarity>().is_err());
        }

        #[test]
        fn test_from_index() {
            assert_eq!(Polarity::from_index(0), Some(Polarity::Normal));
            assert_eq!(Polarity::from_index(1), Some(Polarity::Inversed));
            assert_eq!(Polarity::from_index(2), None);
        }

        #[test]
        fn test_serialize() {
            let json = serde_json::to_string(&Polarity::Inversed).unwrap();
            assert_eq!(json, "\"inversed\"");
        }
    }

    // ------------------------------------------------------------------------
    // ServoCalibration Tests
    // ------------------------------------------------------------------------

    mod servo_calibration_tests {
        use super::*;

        #[test]
        fn test_default_is_valid() {
            let calibration = ServoCalibration::default();
            assert!(calibration.validate().is_ok());
            assert_eq!(calibration.to_values(), vec![0.0005, 0.0025, 0.02]);
        }

        #[test]
        fn test_min_above_max_rejected() {
            let calibration = ServoCalibration::new(0.003, 0.002, 0.02);
            let err = calibration.validate().unwrap_err();
            assert!(err.contains("min pulse"));
        }

        #[test]
        fn test_max_above_interval_rejected() {
            let calibration = ServoCalibration::new(0.001, 0.03, 0.02);
            let err = calibration.validate().unwrap_err();
            assert!(err.contains("interval"));
        }

        #[test]
        fn test_boundary_values_accepted() {
            assert!(ServoCalibration::new(0.002, 0.002, 0.002).validate().is_ok());
            assert!(ServoCalibration::new(0.0, 0.0, 0.0).validate().is_ok());
        }

        #[test]
        fn test_negative_and_nan_rejected() {
            assert!(ServoCalibration::new(-0.001, 0.002, 0.02).validate().is_err());
            assert!(ServoCalibration::new(f64::NAN, 0.002, 0.02).validate().is_err());
        }
    }

    // ------------------------------------------------------------------------
    // Reply Tests
    // ------------------------------------------------------------------------

    mod reply_tests {
        use super::*;

        #[test]
        fn test_error_prefix() {
            let reply = Reply::error("timer not exported");
            assert_eq!(reply, Reply::Error("error: timer not exported".to_string()));
            assert!(reply.is_error());
        }

        #[test]
        fn test_wire_shapes() {
            assert_eq!(serde_json::to_string(&Reply::Empty).unwrap(), "null");
            assert_eq!(serde_json::to_string(&Reply::Flag(true)).unwrap(), "true");
            assert_eq!(serde_json::to_string(&Reply::Number(1000.0)).unwrap(), "1000.0");
            assert_eq!(
                serde_json::to_string(&Reply::Values(vec![0.5, 1000.0])).unwrap(),
                "[0.5,1000.0]"
            );
            assert_eq!(
                serde_json::to_string(&Reply::error("bad")).unwrap(),
                "\"error: bad\""
            );
        }

        #[test]
        fn test_decode_picks_matching_variant() {
            let reply: Reply = serde_json::from_str("null").unwrap();
            assert_eq!(reply, Reply::Empty);

            let reply: Reply = serde_json::from_str("false").unwrap();
            assert_eq!(reply.as_flag(), Some(false));

            let reply: Reply = serde_json::from_str("1000.0").unwrap();
            assert_eq!(reply, Reply::Number(1000.0));
            let reply: Reply = serde_json::from_str("50").unwrap();
            assert_eq!(reply.as_number(), Some(50.0));

            let reply: Reply = serde_json::from_str("[0.0005,0.0025,0.02]").unwrap();
            assert_eq!(reply.as_values(), Some(&[0.0005, 0.0025, 0.02][..]));
            assert_eq!(reply.as_number(), None);

            let reply: Reply =
                serde_json::from_str(r#"{"enabled":true,"period":1000,"duty":250,"polarity":"normal"}"#)
                    .unwrap();
            assert_eq!(
                reply,
                Reply::State(TimerState {
                    enabled: true,
                    period: 1000,
                    duty: 250,
                    polarity: Polarity::Normal,
                })
            );

            let reply: Reply = serde_json::from_str(
                r#"{"version":"0.1.0","pid":1,"uid":0,"gid":0,"sysfs_base":"/sys/class/pwm"}"#,
            )
            .unwrap();
            assert!(matches!(reply, Reply::Info(ref info) if info.pid == 1));
        }

        #[test]
        fn test_decode_states_map() {
            let mut chip = BTreeMap::new();
            chip.insert(0, None);
            chip.insert(
                1,
                Some(TimerState {
                    enabled: false,
                    period: 0,
                    duty: 0,
                    polarity: Polarity::Normal,
                }),
            );
            let mut states = ChipStates::new();
            states.insert(0, chip);

            let json = serde_json::to_string(&Reply::States(states.clone())).unwrap();
            let decoded: Reply = serde_json::from_str(&json).unwrap();
            assert_eq!(decoded, Reply::States(states));
        }

        #[test]
        fn test_from_option_state() {
            assert_eq!(Reply::from(None::<TimerState>), Reply::Empty);
        }
    }
}
