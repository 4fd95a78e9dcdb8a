//! Activation orchestrator
//!
//! Single task that owns all activation state. It consumes hotplug and power
//! events plus commands from [`OrchestratorHandle`]s, decides whether an
//! attach should lead to an activation, and runs at most one launcher
//! activation at a time.
//!
//! Nothing that blocks runs on the event loop itself. The settle delay is a
//! timer task that posts back into the inbox, and launcher calls run in
//! worker tasks that report their outcome the same way. Events keep being
//! recorded while either is outstanding, so a detach during the settle delay
//! is seen before the delayed activation re-checks that an iPad is still
//! attached.
//!
//! Policy on attach of a target device, in order:
//! 1. auto-activation disabled: do nothing
//! 2. system asleep: do nothing
//! 3. `max_failures` consecutive failures: do nothing until the iPad is unplugged
//! 4. an attempt started less than `debounce` ago, is scheduled, or is running: skip
//! 5. otherwise activate after `settle_delay`
//!
//! A detach always clears the failure count and the debounce timestamp.

use crate::core::config::Config;
use crate::core::preferences::PreferenceStore;
use crate::core::state::Snapshot;
use crate::launcher::{CommandRunner, ProcessRunner, SidecarLauncher};
use crate::power::PowerEvent;
use crate::usb::{ConnectionTracker, DeviceClass, DeviceDescriptor, HotplugEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Timing and failure policy
#[derive(Debug, Clone)]
pub struct ActivationPolicy {
    /// Minimum time between the starts of two activation attempts
    pub debounce: Duration,
    /// Wait between a qualifying attach and the activation
    pub settle_delay: Duration,
    /// Consecutive failures before attempts stop (0 = never stop)
    pub max_failures: u32,
    /// Interval of the background Sidecar status probe
    pub status_poll: Option<Duration>,
}

impl Default for ActivationPolicy {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for ActivationPolicy {
    fn from(config: &Config) -> Self {
        let status_poll_secs = config.monitor.status_poll_secs;
        Self {
            debounce: config.activation.debounce(),
            settle_delay: config.activation.settle_delay(),
            max_failures: config.activation.max_failures,
            status_poll: (status_poll_secs > 0).then(|| Duration::from_secs(status_poll_secs)),
        }
    }
}

/// Inbox messages: commands from handles and results from worker tasks
enum Message {
    ToggleEnabled {
        reply: oneshot::Sender<anyhow::Result<bool>>,
    },
    ManualActivate {
        reply: oneshot::Sender<bool>,
    },
    ManualDeactivate {
        reply: oneshot::Sender<bool>,
    },
    Shutdown,
    SettleElapsed {
        generation: u64,
    },
    ActivationFinished {
        success: bool,
        epoch: u64,
        reply: Option<oneshot::Sender<bool>>,
    },
    DeactivationFinished {
        success: bool,
    },
    StatusObserved(bool),
}

/// Handle for presentation layers: snapshots and commands
pub struct OrchestratorHandle<R = ProcessRunner> {
    inbox_tx: mpsc::UnboundedSender<Message>,
    snapshot_rx: watch::Receiver<Snapshot>,
    launcher: Arc<SidecarLauncher<R>>,
}

impl<R> Clone for OrchestratorHandle<R> {
    fn clone(&self) -> Self {
        Self {
            inbox_tx: self.inbox_tx.clone(),
            snapshot_rx: self.snapshot_rx.clone(),
            launcher: Arc::clone(&self.launcher),
        }
    }
}

impl<R: CommandRunner + Sync + 'static> OrchestratorHandle<R> {
    /// Current state
    pub fn snapshot(&self) -> Snapshot {
        self.snapshot_rx.borrow().clone()
    }

    /// Receiver that is notified whenever the snapshot changes
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.snapshot_rx.clone()
    }

    /// Flip the auto-activation preference, returning the new value
    pub async fn toggle_enabled(&self) -> anyhow::Result<bool> {
        self.request(|reply| Message::ToggleEnabled { reply })
            .await
            .unwrap_or_else(|| Err(anyhow::anyhow!("Orchestrator is not running")))
    }

    /// Activate now, bypassing the enabled flag, debounce and cooldown
    ///
    /// Returns false without doing anything if an activation is already running.
    pub async fn manual_activate(&self) -> bool {
        self.request(|reply| Message::ManualActivate { reply })
            .await
            .unwrap_or(false)
    }

    /// Disconnect Sidecar now
    pub async fn manual_deactivate(&self) -> bool {
        self.request(|reply| Message::ManualDeactivate { reply })
            .await
            .unwrap_or(false)
    }

    /// Ask the launcher whether Sidecar is connected
    pub async fn is_currently_active(&self) -> bool {
        self.launcher.status().await
    }

    /// Stop the orchestrator after the events already queued
    pub fn shutdown(&self) {
        let _ = self.inbox_tx.send(Message::Shutdown);
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Message) -> Option<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.inbox_tx.send(make(reply_tx)).ok()?;
        reply_rx.await.ok()
    }
}

/// Event-loop state, owned by the orchestrator task
pub struct Orchestrator<R = ProcessRunner> {
    launcher: Arc<SidecarLauncher<R>>,
    prefs: Arc<dyn PreferenceStore>,
    class: DeviceClass,
    policy: ActivationPolicy,
    tracker: ConnectionTracker,
    enabled: bool,
    sleeping: bool,
    last_activation_attempt: Option<Instant>,
    failure_count: u32,
    activating: bool,
    /// Generation of the scheduled activation, cleared when it fires or is superseded
    pending: Option<u64>,
    next_generation: u64,
    /// Bumped on detach and resume so late failures from before are not counted
    epoch: u64,
    sidecar_active: Option<bool>,
    inbox_tx: mpsc::UnboundedSender<Message>,
    snapshot_tx: watch::Sender<Snapshot>,
}

impl<R: CommandRunner + Sync + 'static> Orchestrator<R> {
    /// Start the orchestrator task
    ///
    /// The task runs until the hotplug stream closes or
    /// [`OrchestratorHandle::shutdown`] is called.
    pub fn spawn(
        launcher: Arc<SidecarLauncher<R>>,
        prefs: Arc<dyn PreferenceStore>,
        class: DeviceClass,
        policy: ActivationPolicy,
        hotplug_rx: mpsc::UnboundedReceiver<HotplugEvent>,
        power_rx: mpsc::UnboundedReceiver<PowerEvent>,
    ) -> (OrchestratorHandle<R>, JoinHandle<()>) {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let enabled = prefs.auto_activation_enabled();

        let mut orchestrator = Self {
            launcher: Arc::clone(&launcher),
            prefs,
            class,
            policy,
            tracker: ConnectionTracker::new(),
            enabled,
            sleeping: false,
            last_activation_attempt: None,
            failure_count: 0,
            activating: false,
            pending: None,
            next_generation: 0,
            epoch: 0,
            sidecar_active: None,
            inbox_tx: inbox_tx.clone(),
            snapshot_tx: watch::Sender::new(Snapshot::default()),
        };
        orchestrator.publish();
        let snapshot_rx = orchestrator.snapshot_tx.subscribe();

        let task = tokio::spawn(orchestrator.run(hotplug_rx, power_rx, inbox_rx));

        let handle = OrchestratorHandle {
            inbox_tx,
            snapshot_rx,
            launcher,
        };
        (handle, task)
    }

    async fn run(
        mut self,
        mut hotplug_rx: mpsc::UnboundedReceiver<HotplugEvent>,
        mut power_rx: mpsc::UnboundedReceiver<PowerEvent>,
        mut inbox_rx: mpsc::UnboundedReceiver<Message>,
    ) {
        info!(
            "Orchestrator started (auto-activation {})",
            if self.enabled { "enabled" } else { "disabled" }
        );
        let probe = self.spawn_status_probe();
        let mut power_open = true;

        loop {
            tokio::select! {
                event = hotplug_rx.recv() => match event {
                    Some(event) => self.handle_hotplug(event),
                    None => {
                        info!("Hotplug event stream closed");
                        break;
                    }
                },
                event = power_rx.recv(), if power_open => match event {
                    Some(event) => self.handle_power(event),
                    None => power_open = false,
                },
                Some(message) = inbox_rx.recv() => {
                    if matches!(message, Message::Shutdown) {
                        break;
                    }
                    self.handle_message(message);
                }
            }
            self.publish();
        }

        if let Some(probe) = probe {
            probe.abort();
        }
        info!("Orchestrator stopped");
    }

    fn handle_hotplug(&mut self, event: HotplugEvent) {
        let device = event.device();
        if !self.class.matches(device) {
            debug!("USB change ignored: {:?}", event);
            return;
        }

        match &event {
            HotplugEvent::Attached(device) => {
                info!("iPad detected: {}", device.summary());
                self.tracker.add(device.serial_number.as_deref());
                self.on_target_attached(device);
            }
            HotplugEvent::Detached(device) => {
                info!("iPad disconnected: {}", device.summary());
                self.tracker.remove(device.serial_number.as_deref());
                self.on_target_detached();
            }
        }
    }

    fn on_target_attached(&mut self, device: &DeviceDescriptor) {
        self.enabled = self.prefs.auto_activation_enabled();
        if !self.enabled {
            info!("Auto-activation disabled, ignoring {}", device.name);
            return;
        }
        if self.sleeping {
            info!("System is asleep, ignoring {}", device.name);
            return;
        }
        if self.cooling_down() {
            warn!(
                "Not activating after {} consecutive failures; reconnect the iPad to retry",
                self.failure_count
            );
            return;
        }
        if let Some(reason) = self.debounce_reason() {
            info!("Skipping activation - {}", reason);
            return;
        }

        self.schedule_activation();
    }

    fn on_target_detached(&mut self) {
        self.last_activation_attempt = None;
        self.failure_count = 0;
        self.epoch += 1;
        if self.tracker.is_empty() && self.pending.take().is_some() {
            info!("Cancelled pending activation");
        }

        if self.prefs.disconnect_on_removal() {
            info!("Disconnecting Sidecar after iPad removal");
            self.spawn_deactivation(None);
        }
    }

    fn handle_power(&mut self, event: PowerEvent) {
        match event {
            PowerEvent::Suspending => {
                info!("System going to sleep");
                self.sleeping = true;
            }
            PowerEvent::Resumed => {
                info!("System woke up, resetting activation failures");
                self.sleeping = false;
                self.failure_count = 0;
                self.last_activation_attempt = None;
                self.epoch += 1;
            }
        }
    }

    fn handle_message(&mut self, message: Message) {
        match message {
            Message::ToggleEnabled { reply } => {
                let enabled = !self.prefs.auto_activation_enabled();
                let result = self.prefs.set_auto_activation_enabled(enabled).map(|()| {
                    self.enabled = enabled;
                    info!(
                        "Auto-activation {}",
                        if enabled { "enabled" } else { "disabled" }
                    );
                    enabled
                });
                self.publish();
                let _ = reply.send(result);
            }
            Message::ManualActivate { reply } => {
                if self.activating {
                    warn!("Activation already in progress");
                    let _ = reply.send(false);
                    return;
                }
                info!("Manual activation requested");
                self.pending = None;
                self.start_activation(Some(reply));
            }
            Message::ManualDeactivate { reply } => {
                info!("Manual deactivation requested");
                self.spawn_deactivation(Some(reply));
            }
            Message::Shutdown => {}
            Message::SettleElapsed { generation } => self.on_settle_elapsed(generation),
            Message::ActivationFinished {
                success,
                epoch,
                reply,
            } => {
                self.on_activation_finished(success, epoch);
                self.publish();
                if let Some(reply) = reply {
                    let _ = reply.send(success);
                }
            }
            Message::DeactivationFinished { success } => {
                if success {
                    self.sidecar_active = Some(false);
                }
            }
            Message::StatusObserved(active) => {
                if self.sidecar_active != Some(active) {
                    info!(
                        "Sidecar state changed: {:?} -> {}",
                        self.sidecar_active, active
                    );
                }
                self.sidecar_active = Some(active);
            }
        }
    }

    fn cooling_down(&self) -> bool {
        self.policy.max_failures > 0 && self.failure_count >= self.policy.max_failures
    }

    fn debounce_reason(&self) -> Option<String> {
        if self.activating {
            return Some("activation already in progress".to_string());
        }
        if self.pending.is_some() {
            return Some("activation already scheduled".to_string());
        }
        let elapsed = self.last_activation_attempt?.elapsed();
        (elapsed < self.policy.debounce).then(|| {
            format!(
                "too soon since last attempt ({}s)",
                elapsed.as_secs()
            )
        })
    }

    fn schedule_activation(&mut self) {
        let generation = self.next_generation;
        self.next_generation += 1;
        self.pending = Some(generation);

        let delay = self.policy.settle_delay;
        let inbox_tx = self.inbox_tx.clone();
        info!("Activating Sidecar in {:?}", delay);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = inbox_tx.send(Message::SettleElapsed { generation });
        });
    }

    fn on_settle_elapsed(&mut self, generation: u64) {
        if self.pending != Some(generation) {
            debug!("Scheduled activation {} was superseded", generation);
            return;
        }
        self.pending = None;

        if self.tracker.is_empty() {
            info!("iPad left during the settle delay, not activating");
            return;
        }
        self.enabled = self.prefs.auto_activation_enabled();
        if !self.enabled || self.sleeping || self.cooling_down() || self.activating {
            info!("Activation no longer allowed, skipping");
            return;
        }

        self.start_activation(None);
    }

    fn start_activation(&mut self, reply: Option<oneshot::Sender<bool>>) {
        self.last_activation_attempt = Some(Instant::now());
        self.activating = true;
        info!("Attempting to activate Sidecar...");

        let launcher = Arc::clone(&self.launcher);
        let inbox_tx = self.inbox_tx.clone();
        let epoch = self.epoch;
        tokio::spawn(async move {
            let success = match launcher.activate().await {
                Ok(outcome) => {
                    info!("Sidecar activated ({:?})", outcome);
                    true
                }
                Err(e) => {
                    error!("Failed to activate Sidecar: {}", e);
                    false
                }
            };
            let _ = inbox_tx.send(Message::ActivationFinished {
                success,
                epoch,
                reply,
            });
        });
    }

    fn on_activation_finished(&mut self, success: bool, epoch: u64) {
        self.activating = false;

        if success {
            self.failure_count = 0;
            self.sidecar_active = Some(true);
            return;
        }
        if epoch != self.epoch {
            info!("Ignoring failed attempt from before the iPad was reconnected");
            return;
        }

        self.failure_count = self.failure_count.saturating_add(1);
        if self.policy.max_failures > 0 {
            self.failure_count = self.failure_count.min(self.policy.max_failures);
        }
        if self.cooling_down() {
            warn!(
                "Failed to activate Sidecar {} times in a row; waiting for the iPad to be reconnected",
                self.failure_count
            );
        } else {
            info!(
                "Failed to activate Sidecar ({} consecutive), will retry on next connection",
                self.failure_count
            );
        }
    }

    fn spawn_deactivation(&self, reply: Option<oneshot::Sender<bool>>) {
        let launcher = Arc::clone(&self.launcher);
        let inbox_tx = self.inbox_tx.clone();
        tokio::spawn(async move {
            let success = match launcher.deactivate().await {
                Ok(()) => true,
                Err(e) => {
                    error!("Failed to disconnect Sidecar: {}", e);
                    false
                }
            };
            let _ = inbox_tx.send(Message::DeactivationFinished { success });
            if let Some(reply) = reply {
                let _ = reply.send(success);
            }
        });
    }

    fn spawn_status_probe(&self) -> Option<JoinHandle<()>> {
        let interval = self.policy.status_poll?;
        let launcher = Arc::clone(&self.launcher);
        let inbox_tx = self.inbox_tx.clone();
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let active = launcher.status().await;
                if inbox_tx.send(Message::StatusObserved(active)).is_err() {
                    break;
                }
            }
        }))
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            enabled: self.enabled,
            has_connected_device: !self.tracker.is_empty(),
            sleeping: self.sleeping,
            failure_count: self.failure_count,
            max_failures: self.policy.max_failures,
            activating: self.activating,
            activation_pending: self.pending.is_some(),
            sidecar_active: self.sidecar_active,
            device_name: self.launcher.cached_device_name(),
        }
    }

    fn publish(&mut self) {
        let next = self.snapshot();
        self.snapshot_tx.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            debug!("{} ({:?})", next.status_text(), next.phase());
            *current = next;
            true
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::preferences::MemoryPreferences;
    use crate::launcher::test_support::{fake_executable, Reply, ScriptedRunner};
    use crate::launcher::LauncherSettings;
    use crate::usb::APPLE_VENDOR_ID;

    struct Harness {
        handle: OrchestratorHandle<ScriptedRunner>,
        launcher: Arc<SidecarLauncher<ScriptedRunner>>,
        prefs: Arc<MemoryPreferences>,
        hotplug_tx: mpsc::UnboundedSender<HotplugEvent>,
        power_tx: mpsc::UnboundedSender<PowerEvent>,
        _exe: tempfile::NamedTempFile,
    }

    fn harness() -> Harness {
        let exe = fake_executable();
        let launcher = Arc::new(SidecarLauncher::with_runner(
            exe.path().to_path_buf(),
            LauncherSettings::default(),
            ScriptedRunner::default(),
        ));
        let prefs = Arc::new(MemoryPreferences::default());
        let (hotplug_tx, hotplug_rx) = mpsc::unbounded_channel();
        let (power_tx, power_rx) = mpsc::unbounded_channel();
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
        Harness {
            handle,
            launcher,
            prefs,
            hotplug_tx,
            power_tx,
            _exe: exe,
        }
    }

    fn ipad(serial: &str) -> DeviceDescriptor {
        DeviceDescriptor::new("iPad Pro", APPLE_VENDOR_ID, 0x12ab, Some(serial.to_string()))
    }

    fn runner(h: &Harness) -> &ScriptedRunner {
        h.launcher.runner()
    }

    async fn settle(secs: u64) {
        tokio::time::sleep(Duration::from_secs(secs)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_attach_activates_after_settle_delay() {
        let h = harness();
        runner(&h)
            .push("devices", Reply::Exit(0, "iPad Pro\n"))
            .push("connect", Reply::Exit(0, ""));

        h.hotplug_tx.send(HotplugEvent::Attached(ipad("ABC123"))).unwrap();
        settle(1).await;
        assert!(h.handle.snapshot().activation_pending);
        assert_eq!(runner(&h).calls().len(), 0);

        settle(2).await;
        let snapshot = h.handle.snapshot();
        assert!(snapshot.has_connected_device);
        assert_eq!(snapshot.failure_count, 0);
        assert!(!snapshot.activating);
        assert_eq!(snapshot.sidecar_active, Some(true));
        assert_eq!(snapshot.device_name.as_deref(), Some("iPad Pro"));
        assert_eq!(runner(&h).count("connect"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_target_devices_are_ignored() {
        let h = harness();
        h.hotplug_tx
            .send(HotplugEvent::Attached(DeviceDescriptor::new(
                "iPhone",
                APPLE_VENDOR_ID,
                0x12a8,
                Some("PHONE".to_string()),
            )))
            .unwrap();
        settle(5).await;
        assert!(!h.handle.snapshot().has_connected_device);
        assert!(runner(&h).calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_records_device_but_does_not_activate() {
        let h = harness();
        h.prefs.set_auto_activation_enabled(false).unwrap();

        h.hotplug_tx.send(HotplugEvent::Attached(ipad("ABC123"))).unwrap();
        settle(5).await;

        let snapshot = h.handle.snapshot();
        assert!(snapshot.has_connected_device);
        assert!(!snapshot.enabled);
        assert!(runner(&h).calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_detach_during_settle_delay_cancels_activation() {
        let h = harness();
        h.hotplug_tx.send(HotplugEvent::Attached(ipad("ABC123"))).unwrap();
        settle(1).await;
        h.hotplug_tx.send(HotplugEvent::Detached(ipad("ABC123"))).unwrap();
        settle(5).await;

        let snapshot = h.handle.snapshot();
        assert!(!snapshot.has_connected_device);
        assert!(!snapshot.activation_pending);
        assert!(runner(&h).calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_detach_of_one_ipad_keeps_activation_for_the_other() {
        let h = harness();
        runner(&h)
            .push("devices", Reply::Exit(0, "iPad Pro\n"))
            .push("connect", Reply::Exit(0, ""));

        h.hotplug_tx.send(HotplugEvent::Attached(ipad("AAA"))).unwrap();
        h.hotplug_tx.send(HotplugEvent::Attached(ipad("BBB"))).unwrap();
        settle(1).await;
        h.hotplug_tx.send(HotplugEvent::Detached(ipad("BBB"))).unwrap();
        settle(1).await;
        assert!(h.handle.snapshot().activation_pending);

        settle(4).await;
        let snapshot = h.handle.snapshot();
        assert!(snapshot.has_connected_device);
        assert!(!snapshot.activation_pending);
        assert_eq!(runner(&h).count("connect"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleeping_blocks_activation_and_resume_resets_failures() {
        let h = harness();
        h.power_tx.send(PowerEvent::Suspending).unwrap();
        h.hotplug_tx.send(HotplugEvent::Attached(ipad("ABC123"))).unwrap();
        settle(5).await;
        assert!(h.handle.snapshot().sleeping);
        assert!(runner(&h).calls().is_empty());

        h.power_tx.send(PowerEvent::Resumed).unwrap();
        settle(1).await;
        let snapshot = h.handle.snapshot();
        assert!(!snapshot.sleeping);
        assert_eq!(snapshot.failure_count, 0);
        assert!(runner(&h).calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_activate_rejected_while_running() {
        let h = harness();
        runner(&h)
            .push("devices", Reply::Hang)
            .push("devices", Reply::Exit(0, "iPad Pro\n"));

        let first = {
            let handle = h.handle.clone();
            tokio::spawn(async move { handle.manual_activate().await })
        };
        settle(1).await;
        assert!(h.handle.snapshot().activating);
        assert!(!h.handle.manual_activate().await);

        // Hung listing times out, second listing finds the iPad, connect is unscripted
        assert!(!first.await.unwrap());
        assert_eq!(h.handle.snapshot().failure_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_on_removal() {
        let h = harness();
        h.prefs.set_disconnect_on_removal(true).unwrap();
        runner(&h)
            .push("devices", Reply::Exit(0, "iPad Pro\n"))
            .push("connect", Reply::Exit(0, ""))
            .push("disconnect", Reply::Exit(0, ""));

        h.hotplug_tx.send(HotplugEvent::Attached(ipad("ABC123"))).unwrap();
        settle(3).await;
        h.hotplug_tx.send(HotplugEvent::Detached(ipad("ABC123"))).unwrap();
        settle(1).await;

        assert_eq!(
            runner(&h).calls().last().unwrap(),
            &vec!["disconnect".to_string(), "iPad Pro".to_string()]
        );
        let snapshot = h.handle.snapshot();
        assert_eq!(snapshot.sidecar_active, Some(false));
        assert_eq!(snapshot.device_name, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_toggle_enabled_updates_preference_and_snapshot() {
        let h = harness();
        assert!(h.handle.snapshot().enabled);

        assert!(!h.handle.toggle_enabled().await.unwrap());
        assert!(!h.prefs.auto_activation_enabled());
        assert!(!h.handle.snapshot().enabled);

        assert!(h.handle.toggle_enabled().await.unwrap());
        assert!(h.handle.snapshot().enabled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_task() {
        let exe = fake_executable();
        let launcher = Arc::new(SidecarLauncher::with_runner(
            exe.path().to_path_buf(),
            LauncherSettings::default(),
            ScriptedRunner::default(),
        ));
        let (_hotplug_tx, hotplug_rx) = mpsc::unbounded_channel();
        let (_power_tx, power_rx) = mpsc::unbounded_channel();
        let (handle, task) = Orchestrator::spawn(
            launcher,
            Arc::new(MemoryPreferences::default()),
            DeviceClass::default(),
            ActivationPolicy::default(),
            hotplug_rx,
            power_rx,
        );

        handle.shutdown();
        task.await.unwrap();
        assert!(!handle.manual_activate().await);
    }
}
