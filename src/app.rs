//! Composition root.
//!
//! Builds every component once and wires them together. Nothing in the
//! crate keeps module-level state; a UI holds one `RobotRemote` and talks
//! to the components through it.

use crate::domain::config_store::{Axis, RobotConfigStore};
use crate::domain::models::{AxisMode, ConnectionState, DeviceTarget, RunState, ScannedDevice};
use crate::domain::settings::{Settings, SettingsService};
use crate::infrastructure::link::connection::ConnectionConfig;
use crate::infrastructure::link::identity::HostNameSource;
use crate::infrastructure::link::reconnect::ReconnectHandle;
use crate::infrastructure::link::scanner::DeviceScanner;
use crate::infrastructure::link::transport::{DeviceDiscovery, LinkTransport, TransportError};
use crate::infrastructure::link::{best_effort, ConnectionManager, ReconnectPolicy};
use crate::session::run::TimerWatch;
use crate::session::{CompletionNotifier, LiveAimController, RunSessionManager, SessionError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::info;

pub struct RobotRemote {
    settings: Mutex<SettingsService>,
    config: Arc<RobotConfigStore>,
    connection: Arc<ConnectionManager>,
    session: Arc<RunSessionManager>,
    live_aim: Arc<LiveAimController>,
    reconnect: Arc<ReconnectPolicy>,
    scanner: Option<DeviceScanner>,
}

/// Background loops started by [`RobotRemote::spawn_background`]; dropping stops them
pub struct BackgroundTasks {
    _reconnect: Option<ReconnectHandle>,
    _timer: TimerWatch,
}

impl RobotRemote {
    pub fn new(
        settings: SettingsService,
        transport: Arc<dyn LinkTransport>,
        notifier: Arc<dyn CompletionNotifier>,
    ) -> Self {
        let link = settings.get().link.clone();

        let names = Arc::new(HostNameSource::new(link.controller_name.clone()));
        let connection = ConnectionManager::new(transport, names, ConnectionConfig::from(&link));
        let config = Arc::new(RobotConfigStore::default());
        let session = RunSessionManager::new(connection.clone(), notifier);
        let live_aim = LiveAimController::new(
            config.clone(),
            connection.clone(),
            session.clone(),
            link.live_aim_throttle(),
            link.live_aim_debounce(),
        );
        let reconnect = ReconnectPolicy::new(connection.clone(), link.reconnect_interval());
        if let Some(device) = settings.get().last_device.clone() {
            info!("Remembered robot: {}", device.display_name);
            reconnect.remember(device);
        }

        Self {
            settings: Mutex::new(settings),
            config,
            connection,
            session,
            live_aim,
            reconnect,
            scanner: None,
        }
    }

    pub fn with_discovery(mut self, discovery: Arc<dyn DeviceDiscovery>) -> Self {
        self.scanner = Some(DeviceScanner::new(discovery));
        self
    }

    fn lock_settings(&self) -> MutexGuard<'_, SettingsService> {
        self.settings.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start the reconnect loop (if enabled) and the run timer watch
    pub fn spawn_background(&self) -> BackgroundTasks {
        let settings = self.settings();
        BackgroundTasks {
            _reconnect: settings.auto_reconnect.then(|| self.reconnect.spawn()),
            _timer: self.session.spawn_timer_watch(settings.link.timer_poll()),
        }
    }

    pub fn settings(&self) -> Settings {
        self.lock_settings().get().clone()
    }

    pub fn config(&self) -> &Arc<RobotConfigStore> {
        &self.config
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    pub fn session(&self) -> &Arc<RunSessionManager> {
        &self.session
    }

    pub fn live_aim(&self) -> &Arc<LiveAimController> {
        &self.live_aim
    }

    pub fn reconnect(&self) -> &Arc<ReconnectPolicy> {
        &self.reconnect
    }

    pub async fn scan(&self) -> Result<Vec<ScannedDevice>, TransportError> {
        let Some(scanner) = &self.scanner else {
            return Err(TransportError::Other("no discovery backend".into()));
        };
        let timeout = self.settings().link.scan_timeout();
        scanner.scan(timeout).await
    }

    /// User picked a robot: remember it (across restarts too) and connect
    pub async fn connect_to(&self, target: DeviceTarget) -> ConnectionState {
        self.reconnect.remember(target.clone());
        best_effort(
            "persist remembered robot",
            self.lock_settings().remember_device(target.clone()),
        );
        self.connection.connect(&target).await
    }

    /// User-initiated disconnect; the robot is forgotten so nothing reconnects
    pub async fn disconnect(&self) -> ConnectionState {
        self.reconnect.forget();
        best_effort("forget remembered robot", self.lock_settings().forget_device());
        self.connection.disconnect().await
    }

    /// Start a run with the current configuration
    pub async fn start_run(&self) -> Result<RunState, SessionError> {
        let config = self.config.snapshot();
        self.session.start_run(&config).await
    }

    pub async fn stop_run(&self) -> RunState {
        self.session.stop_run().await
    }

    pub fn set_axis_mode(&self, axis: Axis, mode: AxisMode) {
        self.config.set_mode(axis, mode);
        self.live_aim.axis_modes_changed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::link::loopback::LoopbackRobot;
    use crate::session::LoggingNotifier;
    use std::path::PathBuf;

    fn scratch_settings(name: &str) -> (SettingsService, PathBuf) {
        let path = std::env::temp_dir()
            .join(format!("pingpong_remote_app_{}_{}", name, std::process::id()))
            .join("settings.json");
        let _ = std::fs::remove_file(&path);
        (SettingsService::with_path(path.clone()), path)
    }

    #[tokio::test]
    async fn test_connect_persists_and_disconnect_forgets() {
        let (settings, path) = scratch_settings("persist");
        let robot = LoopbackRobot::classic();
        let remote = RobotRemote::new(settings, Arc::new(robot.clone()), Arc::new(LoggingNotifier));
        let target = DeviceTarget::new("r1", "PongBot");

        assert!(remote.connect_to(target.clone()).await.is_connected());
        assert_eq!(remote.reconnect().target(), Some(target.clone()));
        assert_eq!(
            SettingsService::with_path(path.clone()).get().last_device,
            Some(target)
        );

        remote.disconnect().await;
        assert_eq!(remote.reconnect().target(), None);
        assert_eq!(SettingsService::with_path(path.clone()).get().last_device, None);

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_remembered_device_is_loaded() {
        let (mut settings, path) = scratch_settings("loaded");
        settings.get_mut().last_device = Some(DeviceTarget::new("r9", "Old"));
        let remote = RobotRemote::new(
            settings,
            Arc::new(LoopbackRobot::classic()),
            Arc::new(LoggingNotifier),
        );

        assert_eq!(
            remote.reconnect().target(),
            Some(DeviceTarget::new("r9", "Old"))
        );
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_scan_without_backend_fails() {
        let (settings, _) = scratch_settings("noscan");
        let remote = RobotRemote::new(
            settings,
            Arc::new(LoopbackRobot::classic()),
            Arc::new(LoggingNotifier),
        );
        assert!(remote.scan().await.is_err());
    }

    #[tokio::test]
    async fn test_scan_finds_loopback_robot() {
        let (settings, _) = scratch_settings("scan");
        let robot = LoopbackRobot::classic().with_advertisement(DeviceTarget::new("r1", "PongBot"));
        let remote = RobotRemote::new(settings, Arc::new(robot.clone()), Arc::new(LoggingNotifier))
            .with_discovery(Arc::new(robot.clone()));

        let found = remote.scan().await.unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].target.display_name, "PongBot");
        assert!(!robot.is_scanning());
    }
}
