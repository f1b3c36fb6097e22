//! Run Session Module
//!
//! Owns "is a training run active". A run is recorded only after both the
//! full configuration and the start command reached the robot; stopping
//! always succeeds locally so the UI can leave run mode whatever the link
//! is doing.

use crate::domain::models::{RobotConfig, RunState};
use crate::domain::observers::{Observers, Subscription};
use crate::infrastructure::link::transport::TransportError;
use crate::infrastructure::link::{best_effort, ConnectionManager, Delivery};
use crate::session::{CompletionNotifier, SessionError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

#[derive(Default)]
struct RunInner {
    state: RunState,
    /// Timer expiry already handled for the current run
    expiry_fired: bool,
}

pub struct RunSessionManager {
    connection: Arc<ConnectionManager>,
    notifier: Arc<dyn CompletionNotifier>,
    inner: Mutex<RunInner>,
    observers: Observers<RunState>,
}

/// Periodic timer polling; dropping it stops the watch
pub struct TimerWatch {
    task: JoinHandle<()>,
}

impl Drop for TimerWatch {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn require_sent(
    what: &'static str,
    result: Result<Delivery, TransportError>,
) -> Result<(), SessionError> {
    match result {
        Ok(Delivery::Sent) => Ok(()),
        Ok(Delivery::Dropped) => Err(SessionError::NotConnected { what }),
        Err(source) => Err(SessionError::Send { what, source }),
    }
}

impl RunSessionManager {
    pub fn new(connection: Arc<ConnectionManager>, notifier: Arc<dyn CompletionNotifier>) -> Arc<Self> {
        Arc::new(Self {
            connection,
            notifier,
            inner: Mutex::new(RunInner::default()),
            observers: Observers::new(),
        })
    }

    fn lock_inner(&self) -> MutexGuard<'_, RunInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn run_state(&self) -> RunState {
        self.lock_inner().state.clone()
    }

    pub fn is_running(&self) -> bool {
        self.lock_inner().state.is_running()
    }

    pub fn subscribe(&self) -> Subscription<RunState> {
        let inner = self.lock_inner();
        self.observers.subscribe(inner.state.clone())
    }

    /// Send the full configuration, then start. The run is recorded only
    /// when both frames were delivered.
    pub async fn start_run(&self, config: &RobotConfig) -> Result<RunState, SessionError> {
        let sent = async {
            require_sent("configuration", self.connection.send_config(config).await)?;
            require_sent("start", self.connection.start().await)
        }
        .await;

        if let Err(e) = sent {
            error!("Run not started: {}", e);
            return Err(e);
        }

        let mut inner = self.lock_inner();
        inner.state = RunState {
            run_start_time: Some(SystemTime::now()),
            run_config: Some(config.clone()),
        };
        inner.expiry_fired = false;
        self.observers.notify(&inner.state);
        info!(
            timer = ?config.timer_duration(),
            "Run started"
        );
        Ok(inner.state.clone())
    }

    /// Send stop and clear the run, whatever happened on the wire.
    ///
    /// Returns the cleared state.
    pub async fn stop_run(&self) -> RunState {
        self.send_stop().await;
        self.clear_run(None);
        self.run_state()
    }

    async fn send_stop(&self) {
        if let Some(Delivery::Dropped) = best_effort("stop", self.connection.stop().await) {
            debug!("Stop not delivered, robot not connected");
        }
    }

    /// Clear the run; with `only_started` set, only if that run is still the active one
    fn clear_run(&self, only_started: Option<SystemTime>) {
        let mut inner = self.lock_inner();
        if only_started.is_some() && inner.state.run_start_time != only_started {
            return;
        }
        let was_running = inner.state.is_running();
        inner.state = RunState::default();
        self.observers.notify(&inner.state);
        if was_running {
            info!("Run stopped");
        }
    }

    /// Time since the run started, `None` when idle
    pub fn elapsed_at(&self, now: SystemTime) -> Option<Duration> {
        let started = self.lock_inner().state.run_start_time?;
        Some(now.duration_since(started).unwrap_or_default())
    }

    /// Time left on the run's timer; `None` when idle or the timer is OFF
    pub fn remaining_at(&self, now: SystemTime) -> Option<Duration> {
        let inner = self.lock_inner();
        remaining(&inner.state, now)
    }

    /// Stop the run and signal completion if its timer ran out.
    ///
    /// Fires at most once per run however often it is polled; returns
    /// whether this call fired.
    pub async fn poll_timer_at(&self, now: SystemTime) -> bool {
        let (started, sound_alert) = {
            let mut inner = self.lock_inner();
            if inner.expiry_fired {
                return false;
            }
            match remaining(&inner.state, now) {
                Some(left) if left.is_zero() => {}
                _ => return false,
            }
            inner.expiry_fired = true;
            let sound_alert = inner
                .state
                .run_config
                .as_ref()
                .is_some_and(|config| config.timer_sound_alert);
            (inner.state.run_start_time, sound_alert)
        };

        info!("Run timer expired");
        self.send_stop().await;
        self.clear_run(started);
        self.notifier.training_complete(sound_alert);
        true
    }

    pub async fn poll_timer(&self) -> bool {
        self.poll_timer_at(SystemTime::now()).await
    }

    /// Poll the timer every `tick` in the background
    pub fn spawn_timer_watch(self: &Arc<Self>, tick: Duration) -> TimerWatch {
        let session: Weak<Self> = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let Some(session) = session.upgrade() else {
                    return;
                };
                session.poll_timer().await;
            }
        });
        TimerWatch { task }
    }
}

fn remaining(state: &RunState, now: SystemTime) -> Option<Duration> {
    let started = state.run_start_time?;
    let limit = state.run_config.as_ref()?.timer_duration()?;
    let elapsed = now.duration_since(started).unwrap_or_default();
    Some(limit.saturating_sub(elapsed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::DeviceTarget;
    use crate::infrastructure::link::connection::ConnectionConfig;
    use crate::infrastructure::link::identity::HostNameSource;
    use crate::infrastructure::link::loopback::LoopbackRobot;
    use crate::infrastructure::link::protocol::Command;

    #[derive(Default)]
    struct RecordingNotifier {
        calls: Mutex<Vec<bool>>,
    }

    impl CompletionNotifier for RecordingNotifier {
        fn training_complete(&self, sound_alert: bool) {
            self.calls.lock().unwrap().push(sound_alert);
        }
    }

    async fn setup(
        robot: &LoopbackRobot,
        connect: bool,
    ) -> (Arc<RunSessionManager>, Arc<RecordingNotifier>) {
        let connection = ConnectionManager::new(
            Arc::new(robot.clone()),
            Arc::new(HostNameSource::new(Some("Coach".into()))),
            ConnectionConfig::default(),
        );
        if connect {
            connection.connect(&DeviceTarget::new("r1", "PongBot")).await;
            robot.clear_traffic();
        }
        let notifier = Arc::new(RecordingNotifier::default());
        (RunSessionManager::new(connection, notifier.clone()), notifier)
    }

    fn timed_config(timer_index: usize) -> RobotConfig {
        RobotConfig {
            timer_index,
            launcher_power: 200,
            ..RobotConfig::default()
        }
    }

    #[tokio::test]
    async fn test_start_sends_config_then_start() {
        let robot = LoopbackRobot::classic();
        let (session, _) = setup(&robot, true).await;
        let config = timed_config(0);

        let state = session.start_run(&config).await.unwrap();

        assert!(state.is_running());
        assert_eq!(
            robot.commands(),
            vec![Command::Config(config.clone()), Command::Start]
        );
        assert!(robot.is_running());
    }

    #[tokio::test]
    async fn test_run_config_is_frozen_copy() {
        let robot = LoopbackRobot::classic();
        let (session, _) = setup(&robot, true).await;
        let mut config = timed_config(2);
        let original = config.clone();

        let started = session.start_run(&config).await.unwrap();
        config.launcher_power = 10;
        config.pan.target = 0.75;

        assert_ne!(config, original);
        assert_eq!(started.run_config.as_ref(), Some(&original));
        assert_eq!(session.run_state().run_config, Some(original));

        let age = SystemTime::now()
            .duration_since(started.run_start_time.unwrap())
            .unwrap_or_default();
        assert!(age < Duration::from_secs(1));

        assert_eq!(session.stop_run().await, RunState::default());
    }

    #[tokio::test]
    async fn test_start_while_disconnected_is_not_recorded() {
        let robot = LoopbackRobot::classic();
        let (session, _) = setup(&robot, false).await;

        let result = session.start_run(&timed_config(1)).await;

        assert_eq!(
            result,
            Err(SessionError::NotConnected {
                what: "configuration"
            })
        );
        assert_eq!(session.run_state(), RunState::default());
        assert_eq!(robot.write_count(), 0);
    }

    #[tokio::test]
    async fn test_start_write_failure_is_not_recorded() {
        let robot = LoopbackRobot::classic();
        let (session, _) = setup(&robot, true).await;
        robot.set_fail_writes(true);

        let result = session.start_run(&timed_config(1)).await;

        assert!(matches!(result, Err(SessionError::Send { .. })));
        assert!(!session.is_running());
    }

    #[tokio::test]
    async fn test_stop_clears_even_when_disconnected() {
        let robot = LoopbackRobot::classic();
        let (session, _) = setup(&robot, true).await;
        session.start_run(&timed_config(0)).await.unwrap();
        robot.drop_link("gone");
        robot.clear_traffic();

        session.stop_run().await;

        assert_eq!(session.run_state(), RunState::default());
    }

    #[tokio::test]
    async fn test_subscribers_see_start_and_stop() {
        let robot = LoopbackRobot::classic();
        let (session, _) = setup(&robot, true).await;
        let mut rx = session.subscribe();

        session.start_run(&timed_config(0)).await.unwrap();
        session.stop_run().await;

        let seen: Vec<bool> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|state| state.is_running())
            .collect();
        assert_eq!(seen, vec![false, true, false]);
    }

    #[tokio::test]
    async fn test_elapsed_and_remaining() {
        let robot = LoopbackRobot::classic();
        let (session, _) = setup(&robot, true).await;
        assert_eq!(session.elapsed_at(SystemTime::now()), None);

        let started = session
            .start_run(&timed_config(1))
            .await
            .unwrap()
            .run_start_time
            .unwrap();

        let later = started + Duration::from_secs(10);
        assert_eq!(session.elapsed_at(later), Some(Duration::from_secs(10)));
        assert_eq!(session.remaining_at(later), Some(Duration::from_secs(5)));
        assert_eq!(
            session.remaining_at(started + Duration::from_secs(99)),
            Some(Duration::ZERO)
        );
    }

    #[tokio::test]
    async fn test_timer_expiry_fires_exactly_once() {
        let robot = LoopbackRobot::classic();
        let (session, notifier) = setup(&robot, true).await;
        let started = session
            .start_run(&timed_config(1))
            .await
            .unwrap()
            .run_start_time
            .unwrap();
        robot.clear_traffic();

        assert!(!session.poll_timer_at(started + Duration::from_secs(14)).await);
        let mut fired = 0;
        for secs in [15, 16, 17, 30] {
            if session.poll_timer_at(started + Duration::from_secs(secs)).await {
                fired += 1;
            }
        }

        assert_eq!(fired, 1);
        assert_eq!(*notifier.calls.lock().unwrap(), vec![true]);
        assert_eq!(robot.commands(), vec![Command::Stop]);
        assert!(!session.is_running());
    }

    #[tokio::test]
    async fn test_timer_off_never_expires() {
        let robot = LoopbackRobot::classic();
        let (session, notifier) = setup(&robot, true).await;
        let started = session
            .start_run(&timed_config(0))
            .await
            .unwrap()
            .run_start_time
            .unwrap();

        assert!(!session.poll_timer_at(started + Duration::from_secs(3600)).await);
        assert!(session.is_running());
        assert!(notifier.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_restart_rearms_expiry() {
        let robot = LoopbackRobot::classic();
        let (session, notifier) = setup(&robot, true).await;

        for _ in 0..2 {
            let started = session
                .start_run(&timed_config(1))
                .await
                .unwrap()
                .run_start_time
                .unwrap();
            assert!(session.poll_timer_at(started + Duration::from_secs(15)).await);
        }

        assert_eq!(notifier.calls.lock().unwrap().len(), 2);
    }
}
