//! Command definitions for the pwmd CLI.
//!
//! Uses clap derive macro for argument parsing. Every client subcommand maps
//! onto exactly one protocol [`Command`].

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::config::{DaemonConfig, DEFAULT_SOCKET_PATH, DEFAULT_SYSFS_BASE};
use crate::daemon::dispatch::Command;
use crate::types::Polarity;

// ============================================================================
// CLI Structure
// ============================================================================

/// pwmd - share kernel PWM timers with unprivileged processes
#[derive(Parser, Debug)]
#[command(
    name = "pwmd",
    version,
    about = "PWMタイマー共有デーモン",
    long_about = "特権プロセスとして sysfs の PWM タイマーを操作し、\n\
                  ローカルソケット経由で非特権クライアントに公開します。",
    propagate_version = true
)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Enable verbose output for debugging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Print replies as raw JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Daemon socket path
    #[arg(long, global = true, env = "PWMD_SOCKET", default_value = DEFAULT_SOCKET_PATH)]
    pub socket: PathBuf,

    /// Root of the PWM class directory (server only)
    #[arg(long, global = true, env = "PWMD_SYSFS", default_value = DEFAULT_SYSFS_BASE)]
    pub sysfs: PathBuf,

    /// Shared handshake key (required)
    #[arg(long, global = true, env = "PWMD_AUTHKEY", hide_env_values = true)]
    pub authkey: Option<String>,

    /// Socket owner as UID:GID (server only)
    #[arg(long, global = true, value_name = "UID:GID", value_parser = parse_owner)]
    pub socket_owner: Option<(u32, u32)>,

    /// Socket permission bits in octal, e.g. 660 (server only)
    #[arg(long, global = true, value_parser = parse_mode)]
    pub socket_mode: Option<u32>,

    /// Socket read timeout in seconds (1-300)
    #[arg(
        long,
        global = true,
        default_value = "5",
        value_parser = clap::value_parser!(u64).range(1..=300)
    )]
    pub timeout: u64,
}

impl Cli {
    /// Builds the shared configuration from the parsed flags.
    pub fn to_config(&self) -> DaemonConfig {
        let mut config = DaemonConfig::default()
            .with_socket_path(self.socket.clone())
            .with_sysfs_base(self.sysfs.clone())
            .with_read_timeout(Duration::from_secs(self.timeout));
        if let Some(key) = &self.authkey {
            config = config.with_auth_key(key.clone());
        }
        if let Some((uid, gid)) = self.socket_owner {
            config = config.with_socket_owner(uid, gid);
        }
        if let Some(mode) = self.socket_mode {
            config = config.with_socket_mode(mode);
        }
        config
    }
}

// ============================================================================
// Subcommands
// ============================================================================

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the daemon in the foreground
    Server,

    /// Show every timer on every chip
    States,

    /// Show the raw state of one timer
    Get(TimerArgs),

    /// Write a raw timer configuration
    Set(SetArgs),

    /// Export a timer
    Open(TimerArgs),

    /// Unexport a timer
    Close(TimerArgs),

    /// Drive a timer at a duty ratio, or show its (ratio, frequency)
    Pwm {
        #[command(flatten)]
        target: TimerArgs,

        /// Duty ratio (0.0-1.0); omit to read the current value
        #[arg(allow_negative_numbers = true)]
        ratio: Option<f64>,
    },

    /// Show or set the default pwm frequency in Hz
    Pwmfreq {
        /// New frequency; omit to read
        freq: Option<f64>,
    },

    /// Move a servo to a fraction of its range
    Servo {
        #[command(flatten)]
        target: TimerArgs,

        /// Position (0.0-1.0)
        #[arg(allow_negative_numbers = true)]
        ratio: f64,
    },

    /// Show or set the servo calibration (seconds)
    Servoset {
        /// Minimum pulse width
        #[arg(requires = "max")]
        min: Option<f64>,

        /// Maximum pulse width
        #[arg(requires = "min")]
        max: Option<f64>,

        /// Pulse interval
        #[arg(requires = "max")]
        interval: Option<f64>,
    },

    /// Disable a timer's output
    Disable(TimerArgs),

    /// Show daemon version and identity
    Info,

    /// Generate shell completion scripts
    Completions {
        /// Shell type for completion script
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

impl Commands {
    /// Returns the protocol command for client subcommands.
    ///
    /// `Server` and `Completions` run locally and return `None`.
    pub fn to_request(&self) -> Option<Command> {
        let command = match self {
            Commands::Server | Commands::Completions { .. } => return None,
            Commands::States => Command::States,
            Commands::Get(t) => Command::Get {
                chip: t.chip,
                timer: t.timer,
            },
            Commands::Set(args) => Command::Set {
                chip: args.target.chip,
                timer: args.target.timer,
                enable: args.enable == 1,
                period: args.period,
                duty: args.duty,
                polarity: args.polarity.and_then(Polarity::from_index),
            },
            Commands::Open(t) => Command::Open {
                chip: t.chip,
                timer: t.timer,
            },
            Commands::Close(t) => Command::Close {
                chip: t.chip,
                timer: t.timer,
            },
            Commands::Pwm { target, ratio } => Command::Pwm {
                chip: target.chip,
                timer: target.timer,
                ratio: *ratio,
            },
            Commands::Pwmfreq { freq } => Command::PwmFreq { freq: *freq },
            Commands::Servo { target, ratio } => Command::Servo {
                chip: target.chip,
                timer: target.timer,
                ratio: *ratio,
            },
            Commands::Servoset { min, max, interval } => Command::ServoSet {
                min: *min,
                max: *max,
                interval: *interval,
            },
            Commands::Disable(t) => Command::Disable {
                chip: t.chip,
                timer: t.timer,
            },
            Commands::Info => Command::Info {
                client_pid: std::process::id(),
            },
        };
        Some(command)
    }
}

// ============================================================================
// Shared Arguments
// ============================================================================

/// Chip and timer index
#[derive(Args, Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerArgs {
    /// PWM chip number (pwmchipN)
    pub chip: u32,

    /// Timer index on the chip (pwmN)
    pub timer: u32,
}

/// Arguments for the set command
#[derive(Args, Debug, Clone)]
pub struct SetArgs {
    #[command(flatten)]
    pub target: TimerArgs,

    /// 1 to enable output, 0 to disable
    #[arg(value_parser = clap::value_parser!(u8).range(0..=1))]
    pub enable: u8,

    /// Period in nanoseconds
    pub period: u64,

    /// Active time in nanoseconds
    pub duty: u64,

    /// 0 for normal, 1 for inversed polarity
    #[arg(value_parser = clap::value_parser!(u32).range(0..=1))]
    pub polarity: Option<u32>,
}

// ============================================================================
// Validation Functions
// ============================================================================

/// Parses a socket owner given as `UID:GID`.
fn parse_owner(s: &str) -> Result<(u32, u32), String> {
    let (uid, gid) = s
        .split_once(':')
        .ok_or_else(|| "UID:GID の形式で指定してください".to_string())?;
    let uid = uid.parse().map_err(|_| format!("UIDが不正です: {}", uid))?;
    let gid = gid.parse().map_err(|_| format!("GIDが不正です: {}", gid))?;
    Ok((uid, gid))
}

/// Parses octal permission bits.
///
/// - Must be valid octal
/// - Must not exceed 777
fn parse_mode(s: &str) -> Result<u32, String> {
    let mode = u32::from_str_radix(s.trim_start_matches("0o"), 8)
        .map_err(|_| format!("8進数で指定してください: {}", s))?;
    if mode > 0o777 {
        return Err("パーミッションは777以内にしてください".to_string());
    }
    Ok(mode)
}

// ============================================================================
// Tests
// ============================================================================
