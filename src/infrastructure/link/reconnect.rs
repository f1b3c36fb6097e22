//! Background reconnection.
//!
//! Active only while the link is down and the user has picked a robot.
//! Attempts are silent: the UI shows "reconnecting" by watching connection
//! state, not by hearing from this loop.

use crate::domain::models::{ConnectionState, ConnectionStatus, DeviceTarget};
use crate::infrastructure::link::connection::ConnectionManager;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info};

pub struct ReconnectPolicy {
    manager: Arc<ConnectionManager>,
    target: Mutex<Option<DeviceTarget>>,
    interval: Duration,
    target_changed: Notify,
}

/// Keeps the reconnect loop alive; dropping it stops the loop
pub struct ReconnectHandle {
    task: JoinHandle<()>,
}

impl ReconnectHandle {
    pub fn stop(self) {
        self.task.abort();
    }
}

impl Drop for ReconnectHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl ReconnectPolicy {
    pub fn new(manager: Arc<ConnectionManager>, interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            manager,
            target: Mutex::new(None),
            interval,
            target_changed: Notify::new(),
        })
    }

    fn lock_target(&self) -> MutexGuard<'_, Option<DeviceTarget>> {
        self.target.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Remember the robot the user picked
    pub fn remember(&self, target: DeviceTarget) {
        *self.lock_target() = Some(target);
        self.target_changed.notify_one();
    }

    /// Forget the remembered robot; the loop goes idle
    pub fn forget(&self) {
        *self.lock_target() = None;
        self.target_changed.notify_one();
    }

    pub fn target(&self) -> Option<DeviceTarget> {
        self.lock_target().clone()
    }

    fn should_attempt(&self, state: &ConnectionState) -> bool {
        state.status == ConnectionStatus::Disconnected && self.target().is_some()
    }

    /// One reconnect decision: connect to the remembered target if the link is down.
    ///
    /// Returns the resulting state when an attempt was made. A connect
    /// already in flight wins; the attempt then backs off without opening.
    pub async fn attempt(&self) -> Option<ConnectionState> {
        if self.manager.state().status != ConnectionStatus::Disconnected {
            return None;
        }
        let target = self.target()?;

        debug!("Reconnect attempt to {}", target.display_name);
        let Some(state) = self.manager.connect_if_disconnected(&target).await else {
            debug!("Link taken by another connect, skipping reconnect");
            return None;
        };
        if state.is_connected() {
            info!("Reconnected to {}", target.display_name);
        } else {
            debug!(
                "Reconnect to {} failed: {}",
                target.display_name,
                state.error.as_deref().unwrap_or("unknown")
            );
        }
        Some(state)
    }

    /// Start the background loop
    pub fn spawn(self: &Arc<Self>) -> ReconnectHandle {
        let policy = Arc::clone(self);
        ReconnectHandle {
            task: tokio::spawn(async move { policy.run().await }),
        }
    }

    async fn run(self: Arc<Self>) {
        let mut states = self.manager.subscribe();
        let Some(mut current) = states.recv().await else {
            return;
        };

        loop {
            if !self.should_attempt(&current) {
                // Idle until the link or the remembered target changes
                tokio::select! {
                    next = states.recv() => match next {
                        Some(state) => current = state,
                        None => return,
                    },
                    _ = self.target_changed.notified() => {}
                }
                continue;
            }

            tokio::select! {
                next = states.recv() => match next {
                    Some(state) => current = state,
                    None => return,
                },
                _ = self.target_changed.notified() => {}
                _ = tokio::time::sleep(self.interval) => {
                    if let Some(state) = self.attempt().await {
                        current = state;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::link::connection::ConnectionConfig;
    use crate::infrastructure::link::identity::HostNameSource;
    use crate::infrastructure::link::loopback::LoopbackRobot;

    fn setup(robot: &LoopbackRobot) -> (Arc<ConnectionManager>, Arc<ReconnectPolicy>) {
        let manager = ConnectionManager::new(
            Arc::new(robot.clone()),
            Arc::new(HostNameSource::new(Some("Coach".into()))),
            ConnectionConfig {
                connect_timeout: Duration::from_secs(2),
                settle_delay: Duration::from_millis(100),
                teardown_timeout: Duration::from_secs(1),
            },
        );
        let policy = ReconnectPolicy::new(manager.clone(), Duration::from_secs(8));
        (manager, policy)
    }

    fn target() -> DeviceTarget {
        DeviceTarget::new("robot-1", "PongBot")
    }

    #[tokio::test]
    async fn test_attempt_needs_remembered_target() {
        let robot = LoopbackRobot::classic();
        let (_manager, policy) = setup(&robot);

        assert_eq!(policy.attempt().await, None);
        assert_eq!(robot.open_count(), 0);
    }

    #[tokio::test]
    async fn test_attempt_skipped_while_connected() {
        let robot = LoopbackRobot::classic();
        let (manager, policy) = setup(&robot);
        policy.remember(target());
        manager.connect(&target()).await;

        assert_eq!(policy.attempt().await, None);
        assert_eq!(robot.open_count(), 1);
    }

    #[tokio::test]
    async fn test_attempt_swallows_failure() {
        let robot = LoopbackRobot::classic();
        robot.fail_next_opens(1);
        let (_manager, policy) = setup(&robot);
        policy.remember(target());

        let state = policy.attempt().await.unwrap();
        assert_eq!(state.status, ConnectionStatus::Disconnected);
        assert!(state.error.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_yields_to_connect_in_settle_delay() {
        let robot = LoopbackRobot::classic();
        let (manager, policy) = setup(&robot);
        policy.remember(target());
        manager.connect(&target()).await;

        let user = tokio::spawn({
            let manager = manager.clone();
            async move { manager.connect(&target()).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(manager.state().status, ConnectionStatus::Disconnected);

        assert_eq!(policy.attempt().await, None);
        assert!(user.await.unwrap().is_connected());
        assert!(manager.is_connected());
        assert_eq!(robot.open_count(), 2);
        assert_eq!(robot.close_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_recovers_dropped_link() {
        let robot = LoopbackRobot::classic();
        let (manager, policy) = setup(&robot);
        policy.remember(target());
        manager.connect(&target()).await;
        let _handle = policy.spawn();

        robot.fail_next_opens(2);
        robot.drop_link("out of range");

        // Two failed attempts at 8 s and 16 s, success at 24 s
        tokio::time::sleep(Duration::from_secs(17)).await;
        assert!(!manager.is_connected());
        assert_eq!(robot.open_count(), 3);

        tokio::time::sleep(Duration::from_secs(8)).await;
        assert!(manager.is_connected());
        assert_eq!(robot.open_count(), 4);

        // Connected: no further attempts
        tokio::time::sleep(Duration::from_secs(40)).await;
        assert_eq!(robot.open_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_forgotten_target_stops_attempts() {
        let robot = LoopbackRobot::classic();
        let (manager, policy) = setup(&robot);
        policy.remember(target());
        manager.connect(&target()).await;
        let handle = policy.spawn();

        policy.forget();
        manager.disconnect().await;
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(robot.open_count(), 1);
        handle.stop();
    }
}
