//! Integration tests for daemon-client IPC communication.
//!
//! These tests run a real `IpcServer` on a temporary socket, backed by the
//! in-memory property store, and drive it with `PwmClient`:
//! - pwm and servo workflows end to end
//! - validation failures reaching the client as `error:` replies
//! - handshake rejection and unreachable daemons
//! - sequential service of concurrent clients

use std::path::PathBuf;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};

use pwmd::cli::client::PwmClient;
use pwmd::config::DaemonConfig;
use pwmd::daemon::sysfs::Attr;
use pwmd::daemon::{Dispatcher, IpcServer, MockPropertyStore, PwmController, PwmEngine};
use pwmd::types::{Polarity, Reply, TimerState};

// ============================================================================
// Test Helpers
// ============================================================================

/// Creates a temporary socket path for testing.
fn create_temp_socket_path() -> PathBuf {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("integration_test.sock");
    // Keep the directory so it's not deleted
    std::mem::forget(dir);
    path
}

fn create_config() -> DaemonConfig {
    DaemonConfig::default()
        .with_socket_path(create_temp_socket_path())
        .with_auth_key("integration")
        .with_read_timeout(Duration::from_secs(2))
}

/// A daemon serving on a background task.
struct TestDaemon {
    config: DaemonConfig,
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<Dispatcher<MockPropertyStore>>,
}

impl TestDaemon {
    /// Starts a daemon over `store`.
    fn start(store: MockPropertyStore) -> Self {
        let config = create_config();
        let server = IpcServer::new(&config).unwrap();
        let mut dispatcher = Dispatcher::new(PwmController::new(PwmEngine::new(store)), "it");
        let (shutdown, rx) = oneshot::channel();

        let handle = tokio::spawn(async move {
            server
                .serve(&mut dispatcher, async {
                    let _ = rx.await;
                })
                .await;
            dispatcher
        });

        Self {
            config,
            shutdown,
            handle,
        }
    }

    fn client(&self) -> PwmClient {
        PwmClient::new(&self.config)
    }

    /// Stops the daemon and hands back its dispatcher for inspection.
    async fn stop(self) -> Dispatcher<MockPropertyStore> {
        let _ = self.shutdown.send(());
        timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("daemon did not shut down")
            .unwrap()
    }
}

fn hardware(dispatcher: &Dispatcher<MockPropertyStore>, chip: u32, timer: u32) -> TimerState {
    dispatcher
        .controller()
        .engine()
        .store()
        .timer_state(chip, timer)
        .unwrap()
}

fn error_text(reply: Option<Reply>) -> String {
    match reply {
        Some(Reply::Error(text)) => text,
        other => panic!("expected error reply, got {:?}", other),
    }
}

// ============================================================================
// Output Mode Workflows
// ============================================================================

#[tokio::test]
async fn test_pwm_workflow() {
    let daemon = TestDaemon::start(MockPropertyStore::new().with_chip(0, 2));
    let client = daemon.client();

    assert_eq!(client.open(0, 0).await, Some(Reply::Flag(true)));
    assert_eq!(client.pwm(0, 0, 0.5).await, Some(Reply::Flag(true)));
    assert_eq!(
        client.pwm_state(0, 0).await,
        Some(Reply::Values(vec![0.5, 1000.0]))
    );
    assert!(client.is_connected());

    let dispatcher = daemon.stop().await;
    let state = hardware(&dispatcher, 0, 0);
    assert!(state.enabled);
    assert_eq!(state.period, 1_000_000);
    assert_eq!(state.duty, 500_000);
}

#[tokio::test]
async fn test_pwm_follows_default_frequency() {
    let daemon = TestDaemon::start(MockPropertyStore::new().with_chip(0, 1));
    let client = daemon.client();

    client.open(0, 0).await;
    assert_eq!(
        client.pwm_frequency(Some(50.0)).await,
        Some(Reply::Number(50.0))
    );
    client.pwm(0, 0, 0.25).await;
    let current = client.pwm_frequency(None).await.and_then(|r| r.as_number());
    assert_eq!(current, Some(50.0));

    let dispatcher = daemon.stop().await;
    let state = hardware(&dispatcher, 0, 0);
    assert_eq!((state.period, state.duty), (20_000_000, 5_000_000));
}

#[tokio::test]
async fn test_servo_workflow() {
    let daemon = TestDaemon::start(MockPropertyStore::new().with_chip(0, 1));
    let client = daemon.client();

    client.open(0, 0).await;
    assert_eq!(
        client.set_servo_calibration(0.0006, 0.0023, Some(0.02)).await,
        Some(Reply::Values(vec![0.0006, 0.0023, 0.02]))
    );
    assert_eq!(client.servo(0, 0, 0.0).await, Some(Reply::Flag(true)));
    let low = client.get(0, 0).await;
    assert_eq!(client.servo(0, 0, 1.0).await, Some(Reply::Flag(true)));

    match low {
        Some(Reply::State(state)) => {
            assert_eq!(state.period, 20_000_000);
            assert_eq!(state.duty, 600_000);
        }
        other => panic!("expected state, got {:?}", other),
    }

    let dispatcher = daemon.stop().await;
    assert_eq!(hardware(&dispatcher, 0, 0).duty, 2_300_000);
}

#[tokio::test]
async fn test_invalid_calibration_keeps_previous() {
    let daemon = TestDaemon::start(MockPropertyStore::new());
    let client = daemon.client();

    let text = error_text(client.set_servo_calibration(0.003, 0.002, Some(0.02)).await);
    assert!(text.starts_with("error:"));
    assert!(text.contains("servo calibration"));

    assert_eq!(
        client.servo_calibration().await,
        Some(Reply::Values(vec![0.0005, 0.0025, 0.02]))
    );

    daemon.stop().await;
}

// ============================================================================
// Raw Timer Control
// ============================================================================

#[tokio::test]
async fn test_set_and_get_round_trip() {
    let daemon = TestDaemon::start(MockPropertyStore::new().with_chip(1, 4));
    let client = daemon.client();

    client.open(1, 3).await;
    assert_eq!(
        client.set(1, 3, true, 20_000_000, 1_500_000, None).await,
        Some(Reply::Flag(true))
    );
    assert_eq!(
        client.get(1, 3).await,
        Some(Reply::State(TimerState {
            enabled: true,
            period: 20_000_000,
            duty: 1_500_000,
            polarity: Polarity::Normal,
        }))
    );

    assert_eq!(client.disable(1, 3).await, Some(Reply::Flag(true)));
    match client.get(1, 3).await {
        Some(Reply::State(state)) => assert!(!state.enabled),
        other => panic!("expected state, got {:?}", other),
    }

    daemon.stop().await;
}

#[tokio::test]
async fn test_duty_above_period_writes_nothing() {
    let daemon = TestDaemon::start(MockPropertyStore::new().with_chip(0, 1));
    let client = daemon.client();

    client.open(0, 0).await;
    let text = error_text(client.set(0, 0, true, 100, 101, None).await);
    assert!(text.contains("duty 101 is greater than period 100"));

    let dispatcher = daemon.stop().await;
    let writes = dispatcher.controller().engine().store().writes();
    assert!(writes.iter().all(|w| w.attr == Attr::Export));
}

#[tokio::test]
async fn test_unexported_timer() {
    let daemon = TestDaemon::start(MockPropertyStore::new().with_chip(0, 1));
    let client = daemon.client();

    assert_eq!(client.get(0, 0).await, Some(Reply::Empty));
    assert_eq!(client.pwm_state(0, 0).await, Some(Reply::Empty));
    let text = error_text(client.pwm(0, 0, 0.5).await);
    assert!(text.contains("not exported"));

    daemon.stop().await;
}

#[tokio::test]
async fn test_open_is_idempotent_and_close_clears_state() {
    let daemon = TestDaemon::start(MockPropertyStore::new().with_chip(0, 2));
    let client = daemon.client();

    assert_eq!(client.open(0, 1).await, Some(Reply::Flag(true)));
    assert_eq!(client.open(0, 1).await, Some(Reply::Flag(true)));
    client.pwm(0, 1, 0.3).await;

    assert_eq!(client.close(0, 1).await, Some(Reply::Flag(true)));
    assert_eq!(client.get(0, 1).await, Some(Reply::Empty));

    let dispatcher = daemon.stop().await;
    let exports = dispatcher
        .controller()
        .engine()
        .store()
        .writes()
        .iter()
        .filter(|w| w.attr == Attr::Export)
        .count();
    assert_eq!(exports, 1);
}

#[tokio::test]
async fn test_states_lists_every_timer() {
    let daemon = TestDaemon::start(
        MockPropertyStore::new()
            .with_chip(0, 2)
            .with_chip(1, 1),
    );
    let client = daemon.client();
    client.open(0, 1).await;

    match client.states().await {
        Some(Reply::States(states)) => {
            assert_eq!(states.len(), 2);
            assert!(states[&0u32][&0u32].is_none());
            assert!(states[&0u32][&1u32].is_some());
            assert!(states[&1u32][&0u32].is_none());
        }
        other => panic!("expected states, got {:?}", other),
    }

    daemon.stop().await;
}

// ============================================================================
// Protocol and Transport Failures
// ============================================================================

#[tokio::test]
async fn test_unknown_command_touches_nothing() {
    let daemon = TestDaemon::start(MockPropertyStore::new().with_chip(0, 1));
    let client = daemon.client();

    let text = error_text(client.send("frobnicate 1 2").await);
    assert!(text.contains("unknown command 'frobnicate'"));
    assert!(client.is_connected());

    let dispatcher = daemon.stop().await;
    assert!(dispatcher.controller().engine().store().writes().is_empty());
}

#[tokio::test]
async fn test_wrong_key_then_right_key() {
    let daemon = TestDaemon::start(MockPropertyStore::new().with_chip(0, 1));
    let intruder = PwmClient::new(&daemon.config.clone().with_auth_key("guess"));

    assert_eq!(intruder.open(0, 0).await, None);
    assert!(!intruder.is_connected());

    // The server keeps accepting after a rejected handshake
    let client = daemon.client();
    assert_eq!(client.open(0, 0).await, Some(Reply::Flag(true)));

    let dispatcher = daemon.stop().await;
    assert_eq!(dispatcher.controller().engine().store().writes().len(), 1);
}

#[tokio::test]
async fn test_no_listener_does_not_block() {
    let config = create_config();
    let client = PwmClient::new(&config);

    let reply = timeout(Duration::from_secs(1), client.states())
        .await
        .expect("client blocked without a listener");
    assert_eq!(reply, None);
    assert!(!client.is_connected());
}

#[tokio::test]
async fn test_info_reports_daemon_identity() {
    let daemon = TestDaemon::start(MockPropertyStore::new());
    let client = daemon.client();

    match client.info().await {
        Some(Reply::Info(info)) => {
            assert_eq!(info.version, "it");
            assert_eq!(info.pid, std::process::id());
            assert_eq!(info.sysfs_base, "/mock/sys/class/pwm");
        }
        other => panic!("expected info, got {:?}", other),
    }
    assert!(client.ping().await);

    daemon.stop().await;
}

#[tokio::test]
async fn test_concurrent_clients_are_all_served() {
    let daemon = TestDaemon::start(MockPropertyStore::new().with_chip(0, 8));

    let tasks: Vec<_> = (0..8)
        .map(|timer| {
            let client = daemon.client();
            tokio::spawn(async move {
                let opened = client.open(0, timer).await;
                let driven = client.pwm(0, timer, 0.5).await;
                (opened, driven)
            })
        })
        .collect();

    for task in tasks {
        let (opened, driven) = task.await.unwrap();
        assert_eq!(opened, Some(Reply::Flag(true)));
        assert_eq!(driven, Some(Reply::Flag(true)));
    }

    let dispatcher = daemon.stop().await;
    for timer in 0..8 {
        assert_eq!(hardware(&dispatcher, 0, timer).duty, 500_000);
    }
}
