//! Live aim streaming.
//!
//! Drag gestures produce far more pan/tilt updates than a BLE link can
//! carry. During a run updates are throttled and the release value is
//! always sent; before a run they are debounced until the user stops
//! adjusting.

use crate::domain::config_store::RobotConfigStore;
use crate::domain::models::AimPoint;
use crate::domain::pacing::{Debounce, Throttle};
use crate::infrastructure::link::{best_effort, ConnectionManager, Delivery};
use crate::session::run::RunSessionManager;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

struct Pacing {
    throttle: Throttle<AimPoint>,
    debounce: Debounce<AimPoint>,
}

pub struct LiveAimController {
    store: Arc<RobotConfigStore>,
    connection: Arc<ConnectionManager>,
    session: Arc<RunSessionManager>,
    pacing: Mutex<Pacing>,
}

// Tokio clock as a std instant for the pacing components
fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

impl LiveAimController {
    pub fn new(
        store: Arc<RobotConfigStore>,
        connection: Arc<ConnectionManager>,
        session: Arc<RunSessionManager>,
        throttle_interval: Duration,
        debounce_window: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            connection,
            session,
            pacing: Mutex::new(Pacing {
                throttle: Throttle::new(throttle_interval),
                debounce: Debounce::new(debounce_window),
            }),
        })
    }

    fn lock_pacing(&self) -> MutexGuard<'_, Pacing> {
        self.pacing.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store the new target and stream it if both axes are LIVE.
    ///
    /// Returns the delivery when a frame went out immediately.
    pub async fn drag(self: &Arc<Self>, pan: f64, tilt: f64) -> Option<Delivery> {
        let config = self.store.set_aim(AimPoint::new(pan, tilt));
        if !config.is_live_aim() {
            return None;
        }
        let aim = AimPoint::new(config.pan.target, config.tilt.target);

        if self.session.is_running() {
            let due = self.lock_pacing().throttle.offer(aim, now());
            match due {
                Some(aim) => self.send(aim).await,
                None => {
                    trace!("Live aim held by throttle");
                    None
                }
            }
        } else {
            self.schedule_debounced(aim);
            None
        }
    }

    /// End of gesture. During a run the final value always goes out.
    pub async fn release(self: &Arc<Self>, pan: f64, tilt: f64) -> Option<Delivery> {
        if !self.session.is_running() {
            return self.drag(pan, tilt).await;
        }

        let config = self.store.set_aim(AimPoint::new(pan, tilt));
        if !config.is_live_aim() {
            return None;
        }
        let last = AimPoint::new(config.pan.target, config.tilt.target);
        let last = self.lock_pacing().throttle.flush(last);
        self.send(last).await
    }

    /// Call after an axis mode edit; a pending pre-run send is dropped
    /// once either axis leaves LIVE.
    pub fn axis_modes_changed(&self) {
        if self.store.snapshot().is_live_aim() {
            return;
        }
        let mut pacing = self.lock_pacing();
        pacing.throttle.reset();
        if let Some(aim) = pacing.debounce.cancel() {
            debug!("Cancelled pending live aim {:?}", aim);
        }
    }

    fn schedule_debounced(self: &Arc<Self>, aim: AimPoint) {
        let (generation, window) = {
            let mut pacing = self.lock_pacing();
            let generation = pacing.debounce.schedule(aim, now());
            (generation, pacing.debounce.window())
        };

        let controller: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            let Some(controller) = controller.upgrade() else {
                return;
            };
            let due = controller
                .lock_pacing()
                .debounce
                .take_if_current(generation, now());
            if let Some(aim) = due {
                controller.send(aim).await;
            }
        });
    }

    async fn send(&self, aim: AimPoint) -> Option<Delivery> {
        trace!("Live aim {:.3},{:.3}", aim.pan, aim.tilt);
        best_effort("live aim", self.connection.send_live_aim(aim).await)
    }
}
