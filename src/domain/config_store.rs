//! Process-wide robot configuration, owned by the composition root.

use crate::domain::models::{AimPoint, AxisConfig, AxisMode, RobotConfig};
use crate::domain::observers::{Observers, Subscription};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Smallest allowed distance between an axis' min and max bound
pub const MIN_RANGE_GAP: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Pan,
    Tilt,
}

/// Single writer of the live `RobotConfig`; readers get clones
pub struct RobotConfigStore {
    config: Mutex<RobotConfig>,
    observers: Observers<RobotConfig>,
}

impl RobotConfigStore {
    pub fn new(mut initial: RobotConfig) -> Self {
        normalize_axis(&mut initial.pan);
        normalize_axis(&mut initial.tilt);
        Self {
            config: Mutex::new(initial),
            observers: Observers::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RobotConfig> {
        self.config.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> RobotConfig {
        self.lock().clone()
    }

    pub fn subscribe(&self) -> Subscription<RobotConfig> {
        let config = self.lock();
        self.observers.subscribe(config.clone())
    }

    /// Apply an edit and notify subscribers with the result.
    ///
    /// Range bounds are re-validated after every edit so `min < max` holds
    /// for every snapshot that leaves the store.
    pub fn update<F>(&self, edit: F) -> RobotConfig
    where
        F: FnOnce(&mut RobotConfig),
    {
        let mut config = self.lock();
        edit(&mut config);
        normalize_axis(&mut config.pan);
        normalize_axis(&mut config.tilt);
        let snapshot = config.clone();
        self.observers.notify(&snapshot);
        snapshot
    }

    pub fn replace(&self, next: RobotConfig) -> RobotConfig {
        self.update(|config| *config = next)
    }

    pub fn set_mode(&self, axis: Axis, mode: AxisMode) -> RobotConfig {
        self.update(|config| axis_mut(config, axis).mode = mode)
    }

    pub fn set_target(&self, axis: Axis, target: f64) -> RobotConfig {
        self.update(|config| axis_mut(config, axis).target = target.clamp(-1.0, 1.0))
    }

    /// Set both targets at once, as a drag gesture does
    pub fn set_aim(&self, aim: AimPoint) -> RobotConfig {
        self.update(|config| {
            config.pan.target = aim.pan.clamp(-1.0, 1.0);
            config.tilt.target = aim.tilt.clamp(-1.0, 1.0);
        })
    }

    /// Move the lower bound, never past `max - MIN_RANGE_GAP`
    pub fn set_min(&self, axis: Axis, value: f64) -> RobotConfig {
        self.update(|config| {
            let axis = axis_mut(config, axis);
            axis.min = value.clamp(-1.0, axis.max - MIN_RANGE_GAP);
        })
    }

    /// Move the upper bound, never below `min + MIN_RANGE_GAP`
    pub fn set_max(&self, axis: Axis, value: f64) -> RobotConfig {
        self.update(|config| {
            let axis = axis_mut(config, axis);
            axis.max = value.clamp(axis.min + MIN_RANGE_GAP, 1.0);
        })
    }
}

impl Default for RobotConfigStore {
    fn default() -> Self {
        Self::new(RobotConfig::default())
    }
}

fn axis_mut(config: &mut RobotConfig, axis: Axis) -> &mut AxisConfig {
    match axis {
        Axis::Pan => &mut config.pan,
        Axis::Tilt => &mut config.tilt,
    }
}

fn normalize_axis(axis: &mut AxisConfig) {
    if !axis.min.is_finite() || !axis.max.is_finite() {
        let defaults = AxisConfig::default();
        axis.min = defaults.min;
        axis.max = defaults.max;
    }
    axis.min = axis.min.clamp(-1.0, 1.0 - MIN_RANGE_GAP);
    axis.max = axis.max.clamp(-1.0 + MIN_RANGE_GAP, 1.0);
    if axis.max - axis.min < MIN_RANGE_GAP {
        axis.max = (axis.min + MIN_RANGE_GAP).min(1.0);
        axis.min = axis.max - MIN_RANGE_GAP;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_min_cannot_cross_max() {
        let store = RobotConfigStore::default();
        store.set_max(Axis::Pan, 0.2);
        let config = store.set_min(Axis::Pan, 0.9);

        assert!(config.pan.min < config.pan.max);
        assert!((config.pan.max - 0.2).abs() < 1e-9);
        assert!((config.pan.min - (0.2 - MIN_RANGE_GAP)).abs() < 1e-9);
    }

    #[test]
    fn test_max_cannot_cross_min() {
        let store = RobotConfigStore::default();
        store.set_min(Axis::Tilt, -0.1);
        let config = store.set_max(Axis::Tilt, -0.8);
        assert!(config.tilt.min < config.tilt.max);
    }

    #[test]
    fn test_raw_update_is_normalized() {
        let store = RobotConfigStore::default();
        let config = store.update(|c| {
            c.pan.min = 0.5;
            c.pan.max = 0.5;
        });
        assert!(config.pan.min < config.pan.max);
    }

    #[test]
    fn test_subscribers_see_edits() {
        let store = RobotConfigStore::default();
        let mut rx = store.subscribe();
        store.set_target(Axis::Pan, 0.5);

        assert_eq!(rx.try_recv().unwrap().pan.target, 0.0);
        assert_eq!(rx.try_recv().unwrap().pan.target, 0.5);
    }

    #[test]
    fn test_snapshot_is_detached() {
        let store = RobotConfigStore::default();
        let before = store.snapshot();
        store.set_target(Axis::Tilt, -0.4);
        assert_eq!(before.tilt.target, 0.0);
        assert_eq!(store.snapshot().tilt.target, -0.4);
    }
}
