//! Display utilities for the pwmd CLI.
//!
//! This module provides formatted output for:
//! - Flag replies (open, close, set, ...)
//! - Timer state and the all-chips listing
//! - Frequency, ratio and calibration tuples
//! - Error messages

use std::fmt::Write;

use crate::daemon::dispatch::Command;
use crate::types::{ChipStates, DaemonInfo, Reply, TimerState, ERROR_PREFIX};

// ============================================================================
// Display
// ============================================================================

/// Display utilities for CLI output.
pub struct Display;

impl Display {
    /// Prints the reply to a command.
    ///
    /// Error replies go to stderr, everything else to stdout.
    pub fn show_reply(command: &Command, reply: &Reply) {
        match reply {
            Reply::Error(message) => Self::show_error(Self::strip_error_prefix(message)),
            _ => println!("{}", Self::render(command, reply)),
        }
    }

    /// Prints the reply as one line of JSON.
    pub fn show_json(reply: &Reply) {
        match serde_json::to_string(reply) {
            Ok(json) => println!("{}", json),
            Err(e) => Self::show_error(&e.to_string()),
        }
    }

    /// Shows an error message.
    pub fn show_error(message: &str) {
        eprintln!("エラー: {}", message);
    }

    /// Shows that the daemon could not be reached.
    pub fn show_unreachable(socket: &std::path::Path) {
        Self::show_error(&format!(
            "Daemonに接続できません ({})。'pwmd server' が起動しているか確認してください",
            socket.display()
        ));
    }

    /// Formats a reply for the terminal.
    pub fn render(command: &Command, reply: &Reply) -> String {
        match (command, reply) {
            (_, Reply::Error(message)) => {
                format!("エラー: {}", Self::strip_error_prefix(message))
            }
            (_, Reply::Flag(false)) => "- 失敗しました".to_string(),
            (_, Reply::Flag(true)) => Self::render_success(command),
            (Command::Get { .. }, Reply::Empty) => "タイマーはエクスポートされていません".to_string(),
            (Command::Pwm { .. }, Reply::Empty) => {
                "タイマーは無効か、エクスポートされていません".to_string()
            }
            (_, Reply::Empty) => "(なし)".to_string(),
            (_, Reply::State(state)) => Self::render_state(state),
            (_, Reply::States(states)) => Self::render_states(states),
            (_, Reply::Info(info)) => Self::render_info(info),
            (Command::Pwm { .. }, Reply::Values(v)) if v.len() == 2 => {
                format!("デューティ比: {:.3}\n周波数: {:.3} Hz", v[0], v[1])
            }
            (Command::PwmFreq { .. }, Reply::Number(freq)) => format!("周波数: {} Hz", freq),
            (_, Reply::Number(n)) => n.to_string(),
            (Command::ServoSet { .. }, Reply::Values(v)) if v.len() == 3 => format!(
                "最小パルス幅: {} s\n最大パルス幅: {} s\n周期: {} s",
                v[0], v[1], v[2]
            ),
            (_, Reply::Values(v)) => v
                .iter()
                .map(f64::to_string)
                .collect::<Vec<_>>()
                .join(" "),
        }
    }

    fn render_success(command: &Command) -> String {
        match command {
            Command::Open { chip, timer } => {
                format!("* pwmchip{}/pwm{} をエクスポートしました", chip, timer)
            }
            Command::Close { chip, timer } => {
                format!("* pwmchip{}/pwm{} をアンエクスポートしました", chip, timer)
            }
            Command::Disable { chip, timer } => {
                format!("[] pwmchip{}/pwm{} を無効にしました", chip, timer)
            }
            Command::Set { chip, timer, .. }
            | Command::Pwm { chip, timer, .. }
            | Command::Servo { chip, timer, .. } => {
                format!("> pwmchip{}/pwm{} を設定しました", chip, timer)
            }
            _ => "* 完了しました".to_string(),
        }
    }

    fn render_state(state: &TimerState) -> String {
        format!(
            "有効: {}\n周期: {} ns\nデューティ: {} ns\n極性: {}",
            if state.enabled { "はい" } else { "いいえ" },
            state.period,
            state.duty,
            state.polarity
        )
    }

    fn render_states(states: &ChipStates) -> String {
        if states.is_empty() {
            return "PWMチップが見つかりません".to_string();
        }
        let mut out = String::new();
        for (chip, timers) in states {
            let _ = writeln!(out, "pwmchip{} ({} timers)", chip, timers.len());
            for (timer, state) in timers {
                match state {
                    Some(s) => {
                        let _ = writeln!(
                            out,
                            "  pwm{}: {} period={} duty={} polarity={}",
                            timer,
                            if s.enabled { "on " } else { "off" },
                            s.period,
                            s.duty,
                            s.polarity
                        );
                    }
                    None => {
                        let _ = writeln!(out, "  pwm{}: -", timer);
                    }
                }
            }
        }
        out.trim_end().to_string()
    }

    fn render_info(info: &DaemonInfo) -> String {
        format!(
            "pwmd {}\nPID: {}\nUID/GID: {}/{}\nsysfs: {}",
            info.version, info.pid, info.uid, info.gid, info.sysfs_base
        )
    }

    fn strip_error_prefix(message: &str) -> &str {
        message
            .strip_prefix(ERROR_PREFIX)
            .map(str::trim_start)
            .unwrap_or(message)
    }
}

// ============================================================================
// Tests
// ============================================================================
