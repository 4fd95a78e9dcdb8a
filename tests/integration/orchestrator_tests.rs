//! Orchestrator integration tests
//!
//! Drive the orchestrator through its channels with a scripted launcher and
//! virtual time.

use auto_sidecar::core::preferences::{MemoryPreferences, PreferenceStore};
use auto_sidecar::launcher::{CommandOutput, CommandRunner, LauncherSettings, SidecarLauncher};
use auto_sidecar::{
    ActivationPolicy, DeviceClass, DeviceDescriptor, HotplugEvent, Orchestrator,
    OrchestratorHandle, Phase, PowerEvent,
};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Reply for one launcher invocation
#[derive(Clone)]
enum Reply {
    Exit(i32, &'static str),
    Hang,
}

/// Fake launcher: replies per subcommand, a default reply when the script runs out
#[derive(Default)]
struct FakeLauncher {
    script: Mutex<HashMap<&'static str, VecDeque<Reply>>>,
    defaults: Mutex<HashMap<&'static str, Reply>>,
    calls: Mutex<Vec<String>>,
}

impl FakeLauncher {
    fn once(&self, subcommand: &'static str, reply: Reply) {
        self.script
            .lock()
            .entry(subcommand)
            .or_default()
            .push_back(reply);
    }

    fn always(&self, subcommand: &'static str, reply: Reply) {
        self.defaults.lock().insert(subcommand, reply);
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn count(&self, subcommand: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.split(' ').next() == Some(subcommand))
            .count()
    }
}

impl CommandRunner for FakeLauncher {
    async fn run(&self, _program: &Path, args: &[&str]) -> io::Result<CommandOutput> {
        self.calls.lock().push(args.join(" "));

        let scripted = self
            .script
            .lock()
            .get_mut(args[0])
            .and_then(VecDeque::pop_front);
        let reply = scripted
            .or_else(|| self.defaults.lock().get(args[0]).cloned())
            .unwrap_or(Reply::Exit(1, "Error: unexpected call"));

        match reply {
            Reply::Exit(code, output) => Ok(CommandOutput::new(code, output)),
            Reply::Hang => std::future::pending().await,
        }
    }
}

struct Daemon {
    handle: OrchestratorHandle<FakeLauncher>,
    launcher: Arc<SidecarLauncher<FakeLauncher>>,
    prefs: Arc<MemoryPreferences>,
    hotplug: mpsc::UnboundedSender<HotplugEvent>,
    power: mpsc::UnboundedSender<PowerEvent>,
    _exe: tempfile::NamedTempFile,
}

impl Daemon {
    fn start() -> Self {
        let exe = tempfile::NamedTempFile::new().unwrap();
        let launcher = Arc::new(SidecarLauncher::with_runner(
            exe.path().to_path_buf(),
            LauncherSettings::default(),
            FakeLauncher::default(),
        ));
        let prefs = Arc::new(MemoryPreferences::default());
        let (hotplug, hotplug_rx) = mpsc::unbounded_channel();
        let (power, power_rx) = mpsc::unbounded_channel();

        let policy = ActivationPolicy {
            status_poll: None,
            ..ActivationPolicy::default()
        };
        let (handle, _task) = Orchestrator::spawn(
            Arc::clone(&launcher),
            prefs.clone(),
            DeviceClass::default(),
            policy,
            hotplug_rx,
            power_rx,
        );

        Self {
            handle,
            launcher,
            prefs,
            hotplug,
            power,
            _exe: exe,
        }
    }

    fn fake(&self) -> &FakeLauncher {
        self.launcher.runner()
    }

    fn attach(&self, device: DeviceDescriptor) {
        self.hotplug.send(HotplugEvent::Attached(device)).unwrap();
    }

    fn detach(&self, device: DeviceDescriptor) {
        self.hotplug.send(HotplugEvent::Detached(device)).unwrap();
    }
}

fn ipad(serial: &str) -> DeviceDescriptor {
    DeviceDescriptor::new("iPad Pro", 0x05AC, 0x12AB, Some(serial.to_string()))
}

async fn advance(secs: u64) {
    tokio::time::sleep(Duration::from_secs(secs)).await;
}

#[tokio::test(start_paused = true)]
async fn test_ipad_pro_attach_connects_listed_device() {
    let daemon = Daemon::start();
    daemon.fake().once("devices", Reply::Exit(0, "Living Room\niPad Pro (12.9-inch)\n"));
    daemon.fake().once("connect", Reply::Exit(0, ""));

    daemon.attach(ipad("ABC123"));
    advance(3).await;

    assert_eq!(
        daemon.fake().calls(),
        vec!["devices", "connect iPad Pro (12.9-inch)"]
    );
    let snapshot = daemon.handle.snapshot();
    assert!(snapshot.has_connected_device);
    assert_eq!(snapshot.failure_count, 0);
    assert_eq!(snapshot.device_name.as_deref(), Some("iPad Pro (12.9-inch)"));
    assert_eq!(snapshot.phase(), Phase::Attached);
}

#[tokio::test(start_paused = true)]
async fn test_second_attach_within_debounce_is_skipped() {
    let daemon = Daemon::start();
    daemon.fake().always("devices", Reply::Exit(0, "iPad Pro\n"));
    daemon.fake().always("connect", Reply::Exit(0, ""));

    daemon.attach(ipad("A"));
    advance(3).await;
    assert_eq!(daemon.fake().count("connect"), 1);

    // Attempt started at t=2s, so t=4s is inside the window
    advance(1).await;
    daemon.attach(ipad("B"));
    advance(4).await;
    assert_eq!(daemon.fake().count("connect"), 1);

    // t=8s is outside it
    daemon.attach(ipad("C"));
    advance(3).await;
    assert_eq!(daemon.fake().count("connect"), 2);
}

#[tokio::test(start_paused = true)]
async fn test_attach_during_settle_delay_is_skipped() {
    let daemon = Daemon::start();
    daemon.fake().always("devices", Reply::Exit(0, "iPad Pro\n"));
    daemon.fake().always("connect", Reply::Exit(0, ""));

    daemon.attach(ipad("A"));
    advance(1).await;
    daemon.attach(ipad("B"));
    advance(5).await;

    assert_eq!(daemon.fake().count("devices"), 1);
    assert_eq!(daemon.fake().count("connect"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cooldown_after_three_failures_and_detach_resets_it() {
    let daemon = Daemon::start();
    daemon.fake().always("devices", Reply::Exit(0, "iPad Pro\n"));
    daemon.fake().always("connect", Reply::Exit(1, "Error: connection refused"));

    for (i, serial) in ["A", "B", "C"].iter().enumerate() {
        daemon.attach(ipad(serial));
        advance(8).await;
        assert_eq!(daemon.handle.snapshot().failure_count, i as u32 + 1);
    }
    assert_eq!(daemon.fake().count("connect"), 3);
    assert_eq!(daemon.handle.snapshot().phase(), Phase::CoolingDown);

    daemon.attach(ipad("D"));
    advance(8).await;
    assert_eq!(daemon.fake().count("connect"), 3);
    assert_eq!(daemon.handle.snapshot().failure_count, 3);

    daemon.detach(ipad("D"));
    advance(1).await;
    assert_eq!(daemon.handle.snapshot().failure_count, 0);

    daemon.fake().always("connect", Reply::Exit(0, ""));
    daemon.attach(ipad("D"));
    advance(3).await;
    assert_eq!(daemon.fake().count("connect"), 4);
    assert_eq!(daemon.handle.snapshot().failure_count, 0);
}

#[tokio::test(start_paused = true)]
async fn test_already_in_use_counts_as_success() {
    let daemon = Daemon::start();
    daemon.fake().once("devices", Reply::Exit(0, "iPad Pro\n"));
    daemon.fake().once("connect", Reply::Exit(1, "Error: SidecarDisplayError AlreadyInUse"));

    daemon.attach(ipad("ABC123"));
    advance(3).await;

    let snapshot = daemon.handle.snapshot();
    assert_eq!(daemon.fake().count("connect"), 1);
    assert_eq!(snapshot.failure_count, 0);
    assert_eq!(snapshot.sidecar_active, Some(true));
}

#[tokio::test(start_paused = true)]
async fn test_listing_retries_until_ipad_is_reachable() {
    let daemon = Daemon::start();
    daemon.fake().once("devices", Reply::Exit(2, ""));
    daemon.fake().once("devices", Reply::Exit(4, "SidecarCore error"));
    daemon.fake().once("devices", Reply::Exit(0, "iPad Pro\n"));
    daemon.fake().once("connect", Reply::Exit(0, ""));

    daemon.attach(ipad("ABC123"));
    advance(5).await;
    assert!(daemon.handle.snapshot().activating);

    advance(2).await;
    assert_eq!(daemon.fake().count("devices"), 3);
    assert_eq!(daemon.fake().count("connect"), 1);
    assert!(!daemon.handle.snapshot().activating);
    assert_eq!(daemon.handle.snapshot().failure_count, 0);
}

#[tokio::test(start_paused = true)]
async fn test_hung_connect_times_out_as_failure() {
    let daemon = Daemon::start();
    daemon.fake().once("devices", Reply::Exit(0, "iPad Pro\n"));
    daemon.fake().once("connect", Reply::Hang);

    daemon.attach(ipad("ABC123"));
    advance(10).await;
    assert!(daemon.handle.snapshot().activating);

    advance(30).await;
    let snapshot = daemon.handle.snapshot();
    assert!(!snapshot.activating);
    assert_eq!(snapshot.failure_count, 1);
}

#[tokio::test(start_paused = true)]
async fn test_detach_during_settle_delay_cancels_activation() {
    let daemon = Daemon::start();
    daemon.attach(ipad("ABC123"));
    advance(1).await;
    assert_eq!(daemon.handle.snapshot().phase(), Phase::Debouncing);

    daemon.detach(ipad("ABC123"));
    advance(5).await;

    assert!(daemon.fake().calls().is_empty());
    assert_eq!(daemon.handle.snapshot().phase(), Phase::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_detach_during_settle_delay_keeps_remaining_ipad() {
    let daemon = Daemon::start();
    daemon.fake().once("devices", Reply::Exit(0, "iPad Pro\n"));
    daemon.fake().once("connect", Reply::Exit(0, ""));

    daemon.attach(ipad("AAA"));
    daemon.attach(ipad("BBB"));
    advance(1).await;
    daemon.detach(ipad("BBB"));
    advance(5).await;

    assert_eq!(daemon.fake().calls(), vec!["devices", "connect iPad Pro"]);
    let snapshot = daemon.handle.snapshot();
    assert!(snapshot.has_connected_device);
    assert_eq!(snapshot.phase(), Phase::Attached);
}

#[tokio::test(start_paused = true)]
async fn test_wake_during_cooldown_resets_then_manual_activate() {
    let daemon = Daemon::start();
    daemon.fake().always("devices", Reply::Exit(0, "iPad Pro\n"));
    daemon.fake().always("connect", Reply::Exit(1, "Error: connection refused"));

    for serial in ["A", "B", "C"] {
        daemon.attach(ipad(serial));
        advance(8).await;
    }
    assert_eq!(daemon.handle.snapshot().failure_count, 3);
    assert_eq!(daemon.handle.snapshot().phase(), Phase::CoolingDown);

    daemon.power.send(PowerEvent::Suspending).unwrap();
    advance(1).await;
    daemon.attach(ipad("D"));
    advance(8).await;
    assert_eq!(daemon.fake().count("connect"), 3);
    assert_eq!(daemon.handle.snapshot().phase(), Phase::Sleeping);

    daemon.power.send(PowerEvent::Resumed).unwrap();
    advance(1).await;
    let snapshot = daemon.handle.snapshot();
    assert!(!snapshot.sleeping);
    assert_eq!(snapshot.failure_count, 0);

    // The iPad is still plugged in, so only a manual action re-activates
    daemon.fake().always("connect", Reply::Exit(0, ""));
    assert!(daemon.handle.manual_activate().await);
    assert_eq!(daemon.fake().count("connect"), 4);
    assert_eq!(daemon.handle.snapshot().phase(), Phase::Attached);
}

#[tokio::test(start_paused = true)]
async fn test_manual_activate_ignores_disabled_and_cooldown() {
    let daemon = Daemon::start();
    daemon.prefs.set_auto_activation_enabled(false).unwrap();
    daemon.fake().once("devices", Reply::Exit(0, "iPad Pro\n"));
    daemon.fake().once("connect", Reply::Exit(0, ""));

    daemon.attach(ipad("A"));
    advance(5).await;
    assert!(daemon.fake().calls().is_empty());
    assert_eq!(daemon.handle.snapshot().phase(), Phase::Disabled);

    assert!(daemon.handle.manual_activate().await);
    assert_eq!(daemon.fake().count("connect"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_manual_deactivate_uses_cached_device() {
    let daemon = Daemon::start();
    daemon.fake().once("devices", Reply::Exit(0, "iPad Air\n"));
    daemon.fake().once("connect", Reply::Exit(0, ""));
    daemon.fake().once("disconnect", Reply::Exit(0, ""));

    assert!(daemon.handle.manual_activate().await);
    assert!(daemon.handle.manual_deactivate().await);

    assert_eq!(
        daemon.fake().calls(),
        vec!["devices", "connect iPad Air", "disconnect iPad Air"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_status_query_and_subscription() {
    let daemon = Daemon::start();
    daemon.fake().once("status", Reply::Exit(0, "Connected to iPad Pro"));
    daemon.fake().once("devices", Reply::Exit(0, "iPad Pro\n"));
    daemon.fake().once("connect", Reply::Exit(0, ""));

    assert!(daemon.handle.is_currently_active().await);
    assert!(!daemon.handle.is_currently_active().await);

    let mut updates = daemon.handle.subscribe();
    daemon.attach(ipad("ABC123"));
    let snapshot = updates
        .wait_for(|s| s.sidecar_active == Some(true))
        .await
        .unwrap()
        .clone();
    assert!(snapshot.has_connected_device);
    assert_eq!(snapshot.status_text(), "Status: iPad Connected");
}

#[tokio::test(start_paused = true)]
async fn test_non_ipad_devices_are_ignored() {
    let daemon = Daemon::start();
    daemon.attach(DeviceDescriptor::new("iPhone", 0x05AC, 0x12A8, Some("P".into())));
    daemon.attach(DeviceDescriptor::new("iPad-like Hub", 0x1234, 0x0001, None));
    advance(5).await;

    assert!(daemon.fake().calls().is_empty());
    assert!(!daemon.handle.snapshot().has_connected_device);
}
