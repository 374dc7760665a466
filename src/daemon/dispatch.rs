//! Command grammar and dispatch.
//!
//! A request is one line of whitespace separated tokens: the command name
//! followed by positional arguments. Each command accepts a fixed set of
//! argument counts, and each argument position is either an integer or a
//! float. Integers may be written in float or scientific form (`1e5`) and
//! are truncated.

use std::fmt::Write as _;

use super::derived::PwmController;
use super::error::{PwmError, PwmResult};
use super::sysfs::PropertyStore;
use crate::types::{DaemonInfo, Polarity, Reply};

// ============================================================================
// CommandKind
// ============================================================================

/// Names of the commands understood by the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    States,
    Get,
    Set,
    Open,
    Close,
    Pwm,
    PwmFreq,
    Servo,
    ServoSet,
    Disable,
    Info,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArgType {
    Int,
    Float,
}

use ArgType::{Float, Int};

impl CommandKind {
    /// Every command, in help order.
    pub const ALL: [CommandKind; 11] = [
        CommandKind::States,
        CommandKind::Get,
        CommandKind::Set,
        CommandKind::Open,
        CommandKind::Close,
        CommandKind::Pwm,
        CommandKind::PwmFreq,
        CommandKind::Servo,
        CommandKind::ServoSet,
        CommandKind::Disable,
        CommandKind::Info,
    ];

    /// Wire name of the command.
    pub fn name(&self) -> &'static str {
        match self {
            CommandKind::States => "states",
            CommandKind::Get => "get",
            CommandKind::Set => "set",
            CommandKind::Open => "open",
            CommandKind::Close => "close",
            CommandKind::Pwm => "pwm",
            CommandKind::PwmFreq => "pwmfreq",
            CommandKind::Servo => "servo",
            CommandKind::ServoSet => "servoset",
            CommandKind::Disable => "disable",
            CommandKind::Info => "info",
        }
    }

    /// Looks a command up by wire name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    fn arities(&self) -> &'static [usize] {
        match self {
            CommandKind::States => &[0],
            CommandKind::Get
            | CommandKind::Open
            | CommandKind::Close
            | CommandKind::Disable => &[2],
            CommandKind::Set => &[5, 6],
            CommandKind::Pwm => &[2, 3],
            CommandKind::PwmFreq => &[0, 1],
            CommandKind::Servo => &[3],
            CommandKind::ServoSet => &[0, 2, 3],
            CommandKind::Info => &[1],
        }
    }

    fn arg_types(&self) -> &'static [ArgType] {
        match self {
            CommandKind::States => &[],
            CommandKind::Get
            | CommandKind::Open
            | CommandKind::Close
            | CommandKind::Disable => &[Int, Int],
            CommandKind::Set => &[Int, Int, Int, Int, Int, Int],
            CommandKind::Pwm | CommandKind::Servo => &[Int, Int, Float],
            CommandKind::PwmFreq => &[Float],
            CommandKind::ServoSet => &[Float, Float, Float],
            CommandKind::Info => &[Int],
        }
    }

    fn describe_arities(&self) -> String {
        let arities = self.arities();
        let mut text = String::new();
        for (i, n) in arities.iter().enumerate() {
            if i > 0 {
                text.push_str(if i + 1 == arities.len() { " or " } else { ", " });
            }
            let _ = write!(text, "{n}");
        }
        text
    }
}

// ============================================================================
// Command
// ============================================================================

/// A parsed, typed request.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// All timers on all chips
    States,
    /// Raw state of one timer
    Get { chip: u32, timer: u32 },
    /// Raw configuration of one timer
    Set {
        chip: u32,
        timer: u32,
        enable: bool,
        period: u64,
        duty: u64,
        polarity: Option<Polarity>,
    },
    /// Export a timer
    Open { chip: u32, timer: u32 },
    /// Unexport a timer
    Close { chip: u32, timer: u32 },
    /// Set (with ratio) or read (without) a timer in pwm mode
    Pwm {
        chip: u32,
        timer: u32,
        ratio: Option<f64>,
    },
    /// Get or set the default pwm frequency
    PwmFreq { freq: Option<f64> },
    /// Position a servo
    Servo { chip: u32, timer: u32, ratio: f64 },
    /// Get or set servo calibration
    ServoSet {
        min: Option<f64>,
        max: Option<f64>,
        interval: Option<f64>,
    },
    /// Disable a timer
    Disable { chip: u32, timer: u32 },
    /// Daemon identity, logging the caller's pid
    Info { client_pid: u32 },
}

#[derive(Debug, Clone, Copy)]
enum Arg {
    Int(i64),
    Float(f64),
}

struct Args<'a> {
    kind: CommandKind,
    tokens: &'a [&'a str],
    values: Vec<Arg>,
}

impl Args<'_> {
    fn int<T: TryFrom<i64>>(&self, index: usize) -> PwmResult<T> {
        let value = match self.values[index] {
            Arg::Int(v) => v,
            Arg::Float(v) => v.trunc() as i64,
        };
        T::try_from(value).map_err(|_| {
            PwmError::Protocol(format!(
                "'{}' argument '{}' is out of range",
                self.kind.name(),
                self.tokens[index]
            ))
        })
    }

    fn float(&self, index: usize) -> f64 {
        match self.values[index] {
            Arg::Float(v) => v,
            Arg::Int(v) => v as f64,
        }
    }

    fn opt_float(&self, index: usize) -> Option<f64> {
        (index < self.values.len()).then(|| self.float(index))
    }
}

fn coerce(kind: CommandKind, token: &str, arg_type: ArgType) -> PwmResult<Arg> {
    let invalid = |what: &str| {
        PwmError::Protocol(format!(
            "'{}' argument '{}' is not a valid {}",
            kind.name(),
            token,
            what
        ))
    };
    let float = token.parse::<f64>().ok().filter(|v| v.is_finite());
    match arg_type {
        ArgType::Float => float.map(Arg::Float).ok_or_else(|| invalid("number")),
        ArgType::Int => token
            .parse::<i64>()
            .ok()
            .or_else(|| {
                float
                    .filter(|v| v.abs() < i64::MAX as f64)
                    .map(|v| v.trunc() as i64)
            })
            .map(Arg::Int)
            .ok_or_else(|| invalid("integer")),
    }
}

impl Command {
    /// Parses one request line.
    ///
    /// # Errors
    ///
    /// Returns [`PwmError::Protocol`] naming the unknown command, the
    /// expected argument counts, or the token that failed to convert.
    pub fn parse(line: &str) -> PwmResult<Self> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some((name, rest)) = tokens.split_first() else {
            return Err(PwmError::Protocol("empty request".to_string()));
        };
        let kind = CommandKind::from_name(name)
            .ok_or_else(|| PwmError::Protocol(format!("unknown command '{name}'")))?;

        if !kind.arities().contains(&rest.len()) {
            return Err(PwmError::Protocol(format!(
                "'{}' takes {} arguments, got {}",
                kind.name(),
                kind.describe_arities(),
                rest.len()
            )));
        }

        let values = rest
            .iter()
            .zip(kind.arg_types())
            .map(|(token, arg_type)| coerce(kind, token, *arg_type))
            .collect::<PwmResult<Vec<_>>>()?;
        let args = Args {
            kind,
            tokens: rest,
            values,
        };

        Ok(match kind {
            CommandKind::States => Command::States,
            CommandKind::Get => Command::Get {
                chip: args.int(0)?,
                timer: args.int(1)?,
            },
            CommandKind::Set => {
                let polarity = match args.values.len() {
                    6 => {
                        let index: u32 = args.int(5)?;
                        Some(Polarity::from_index(index).ok_or_else(|| {
                            PwmError::Protocol(format!(
                                "'set' polarity must be 0 or 1, got '{}'",
                                args.tokens[5]
                            ))
                        })?)
                    }
                    _ => None,
                };
                Command::Set {
                    chip: args.int(0)?,
                    timer: args.int(1)?,
                    enable: args.int::<i64>(2)? != 0,
                    period: args.int(3)?,
                    duty: args.int(4)?,
                    polarity,
                }
            }
            CommandKind::Open => Command::Open {
                chip: args.int(0)?,
                timer: args.int(1)?,
            },
            CommandKind::Close => Command::Close {
                chip: args.int(0)?,
                timer: args.int(1)?,
            },
            CommandKind::Pwm => Command::Pwm {
                chip: args.int(0)?,
                timer: args.int(1)?,
                ratio: args.opt_float(2),
            },
            CommandKind::PwmFreq => Command::PwmFreq {
                freq: args.opt_float(0),
            },
            CommandKind::Servo => Command::Servo {
                chip: args.int(0)?,
                timer: args.int(1)?,
                ratio: args.float(2),
            },
            CommandKind::ServoSet => Command::ServoSet {
                min: args.opt_float(0),
                max: args.opt_float(1),
                interval: args.opt_float(2),
            },
            CommandKind::Disable => Command::Disable {
                chip: args.int(0)?,
                timer: args.int(1)?,
            },
            CommandKind::Info => Command::Info {
                client_pid: args.int(0)?,
            },
        })
    }

    /// Returns the kind of this command.
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::States => CommandKind::States,
            Command::Get { .. } => CommandKind::Get,
            Command::Set { .. } => CommandKind::Set,
            Command::Open { .. } => CommandKind::Open,
            Command::Close { .. } => CommandKind::Close,
            Command::Pwm { .. } => CommandKind::Pwm,
            Command::PwmFreq { .. } => CommandKind::PwmFreq,
            Command::Servo { .. } => CommandKind::Servo,
            Command::ServoSet { .. } => CommandKind::ServoSet,
            Command::Disable { .. } => CommandKind::Disable,
            Command::Info { .. } => CommandKind::Info,
        }
    }

    /// Encodes the command as a request line.
    pub fn to_line(&self) -> String {
        let mut line = self.kind().name().to_string();
        let mut push = |value: &dyn std::fmt::Display| {
            let _ = write!(line, " {value}");
        };
        match self {
            Command::States => {}
            Command::Get { chip, timer }
            | Command::Open { chip, timer }
            | Command::Close { chip, timer }
            | Command::Disable { chip, timer } => {
                push(chip);
                push(timer);
            }
            Command::Set {
                chip,
                timer,
                enable,
                period,
                duty,
                polarity,
            } => {
                push(chip);
                push(timer);
                push(&u8::from(*enable));
                push(period);
                push(duty);
                if let Some(polarity) = polarity {
                    push(&u8::from(polarity.is_inversed()));
                }
            }
            Command::Pwm { chip, timer, ratio } => {
                push(chip);
                push(timer);
                if let Some(ratio) = ratio {
                    push(ratio);
                }
            }
            Command::PwmFreq { freq } => {
                if let Some(freq) = freq {
                    push(freq);
                }
            }
            Command::Servo { chip, timer, ratio } => {
                push(chip);
                push(timer);
                push(ratio);
            }
            Command::ServoSet { min, max, interval } => {
                for value in [min, max, interval].into_iter().flatten() {
                    push(value);
                }
            }
            Command::Info { client_pid } => push(client_pid),
        }
        line
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Runs parsed commands against the controller.
pub struct Dispatcher<S: PropertyStore> {
    controller: PwmController<S>,
    version: String,
}

impl<S: PropertyStore> Dispatcher<S> {
    /// Creates a dispatcher reporting `version` from `info`.
    pub fn new(controller: PwmController<S>, version: impl Into<String>) -> Self {
        Self {
            controller,
            version: version.into(),
        }
    }

    /// Returns the controller.
    pub fn controller(&self) -> &PwmController<S> {
        &self.controller
    }

    /// Parses and runs one request line.
    pub fn process(&mut self, line: &str) -> Reply {
        match Command::parse(line) {
            Ok(command) => self.execute(command),
            Err(e) => {
                tracing::debug!("rejected request '{}': {}", line.trim(), e);
                Reply::error(e)
            }
        }
    }

    /// Runs one command.
    pub fn execute(&mut self, command: Command) -> Reply {
        let result = match command {
            Command::States => self.controller.engine().states().map(Reply::States),
            Command::Get { chip, timer } => {
                self.controller.engine().get(chip, timer).map(Reply::from)
            }
            Command::Set {
                chip,
                timer,
                enable,
                period,
                duty,
                polarity,
            } => self
                .controller
                .engine()
                .set(chip, timer, enable, Some(period), Some(duty), polarity)
                .map(|()| Reply::Flag(true)),
            Command::Open { chip, timer } => self
                .controller
                .engine()
                .open(chip, timer)
                .map(|()| Reply::Flag(true)),
            Command::Close { chip, timer } => self
                .controller
                .engine()
                .close(chip, timer)
                .map(|()| Reply::Flag(true)),
            Command::Disable { chip, timer } => self
                .controller
                .engine()
                .disable(chip, timer)
                .map(|()| Reply::Flag(true)),
            Command::Pwm {
                chip,
                timer,
                ratio: Some(ratio),
            } => self
                .controller
                .pwm(chip, timer, ratio)
                .map(|()| Reply::Flag(true)),
            Command::Pwm {
                chip,
                timer,
                ratio: None,
            } => self.controller.pwm_state(chip, timer).map(|state| {
                state.map_or(Reply::Empty, |(ratio, freq)| Reply::Values(vec![ratio, freq]))
            }),
            Command::PwmFreq { freq } => self
                .controller
                .pwm_frequency(freq)
                .map(Reply::Number),
            Command::Servo { chip, timer, ratio } => self
                .controller
                .servo(chip, timer, ratio)
                .map(|()| Reply::Flag(true)),
            Command::ServoSet { min, max, interval } => self
                .controller
                .servo_calibration(min, max, interval)
                .map(|calibration| Reply::Values(calibration.to_values())),
            Command::Info { client_pid } => {
                tracing::info!("info requested by client pid {}", client_pid);
                Ok(Reply::Info(self.info()))
            }
        };

        result.unwrap_or_else(|e| {
            if e.is_validation() {
                tracing::debug!("rejected request: {}", e);
            } else {
                tracing::warn!("{}", e);
            }
            Reply::error(e)
        })
    }

    fn info(&self) -> DaemonInfo {
        let (uid, gid) = process_ids();
        DaemonInfo {
            version: self.version.clone(),
            pid: std::process::id(),
            uid,
            gid,
            sysfs_base: self
                .controller
                .engine()
                .store()
                .base()
                .display()
                .to_string(),
        }
    }
}

/// Effective uid and gid of this process, read from `/proc/self/status`.
fn process_ids() -> (u32, u32) {
    let status = std::fs::read_to_string("/proc/self/status").unwrap_or_default();
    let effective = |key: &str| {
        status
            .lines()
            .find(|line| line.starts_with(key))
            .and_then(|line| line.split_whitespace().nth(2))
            .and_then(|id| id.parse().ok())
            .unwrap_or_default()
    };
    (effective("Uid:"), effective("Gid:"))
}

// ============================================================================
// Tests
// ============================================================================
