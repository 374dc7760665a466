//! pwmd - shares kernel PWM timers with unprivileged processes
//!
//! Run `pwmd server` as root to own the sysfs PWM class; any local process
//! holding the shared key can then drive timers with the other subcommands:
//! - `pwmd open 0 0` / `pwmd close 0 0` to export and unexport
//! - `pwmd pwm 0 0 0.25` for a 25% duty cycle at the default frequency
//! - `pwmd servo 0 0 0.5` to centre a servo

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};

use pwmd::cli::{Cli, Commands, Display, PwmClient};
use pwmd::config::DaemonConfig;
use pwmd::daemon::{Dispatcher, IpcServer, PwmController, PwmEngine, SysfsStore};

/// Main entry point
#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Parse command line arguments
    let cli = Cli::parse();

    // Initialize logging
    init_tracing(cli.verbose);

    // Execute command
    match execute(cli).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            Display::show_error(&format!("{:#}", e));
            std::process::exit(1);
        }
    }
}

/// Initializes the tracing subscriber for logging.
///
/// `RUST_LOG` wins; otherwise `--verbose` selects debug and the default is warn.
fn init_tracing(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();
}

/// Executes the CLI command.
///
/// Returns `Ok(false)` when the command ran but did not succeed.
async fn execute(cli: Cli) -> Result<bool> {
    let config = cli.to_config();

    match cli.command {
        Some(Commands::Server) => {
            run_server(config).await?;
            Ok(true)
        }
        Some(Commands::Completions { shell }) => {
            generate_completions(shell);
            Ok(true)
        }
        Some(command) => Ok(run_client(&config, &command, cli.json).await),
        None => {
            // No command provided, show help
            Cli::command().print_help()?;
            Ok(true)
        }
    }
}

/// Runs the daemon until Ctrl-C or SIGTERM.
async fn run_server(config: DaemonConfig) -> Result<()> {
    config
        .validate()
        .map_err(anyhow::Error::msg)
        .context("設定が不正です")?;

    let engine = PwmEngine::new(SysfsStore::new(config.sysfs_base.clone()));
    let mut dispatcher = Dispatcher::new(PwmController::new(engine), config.version.clone());
    let server = IpcServer::new(&config)?;

    server.serve(&mut dispatcher, shutdown_signal()).await;
    Ok(())
}

/// Sends one request and prints the reply.
async fn run_client(config: &DaemonConfig, command: &Commands, json: bool) -> bool {
    let Some(request) = command.to_request() else {
        return true;
    };
    if let Err(message) = config.validate() {
        Display::show_error(&message);
        return false;
    }

    let client = PwmClient::new(config);
    let Some(reply) = client.execute(&request).await else {
        Display::show_unreachable(client.socket_path());
        return false;
    };

    if json {
        Display::show_json(&reply);
    } else {
        Display::show_reply(&request, &reply);
    }
    !reply.is_error()
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::warn!("cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate => {}
    }
}

/// Generates shell completion scripts.
fn generate_completions(shell: clap_complete::Shell) {
    use clap_complete::generate;
    use std::io;

    let mut cmd = Cli::command();
    let bin_name = cmd.get_name().to_string();
    generate(shell, &mut cmd, bin_name, &mut io::stdout());
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_no_args() {
        let cli = Cli::parse_from(["pwmd"]);
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_cli_parse_states() {
        let cli = Cli::parse_from(["pwmd", "states"]);
        assert!(matches!(cli.command, Some(Commands::States)));
    }

    #[test]
    fn test_cli_parse_verbose() {
        let cli = Cli::parse_from(["pwmd", "--verbose", "states"]);
        assert!(cli.verbose);
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[tokio::test]
    async fn test_run_client_unreachable() {
        let config = DaemonConfig::default()
            .with_socket_path("/tmp/nonexistent_pwmd_main.sock")
            .with_auth_key("main-test");
        assert!(!run_client(&config, &Commands::States, false).await);
    }

    #[tokio::test]
    async fn test_run_server_requires_key() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("nokey.sock");
        let config = DaemonConfig::default().with_socket_path(&socket);

        let err = run_server(config).await.unwrap_err();
        assert!(format!("{:#}", err).contains("認証キー"));
        assert!(!socket.exists());
    }

    #[tokio::test]
    async fn test_run_client_local_command() {
        let config = DaemonConfig::default();
        assert!(run_client(&config, &Commands::Server, false).await);
    }
}
