//! Send pacing for live aim.
//!
//! Both components are plain state machines driven by caller-supplied
//! instants, so they can be exercised without a runtime or a real clock.

use std::marker::PhantomData;
use std::time::{Duration, Instant};

/// Minimum-interval send policy.
///
/// A value offered inside the window is refused; the caller keeps its
/// latest value and hands it to `flush` when the gesture ends.
#[derive(Debug)]
pub struct Throttle<T> {
    interval: Duration,
    last_fired: Option<Instant>,
    _value: PhantomData<T>,
}

impl<T> Throttle<T> {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_fired: None,
            _value: PhantomData,
        }
    }

    /// Returns the value if it may be sent now
    pub fn offer(&mut self, value: T, now: Instant) -> Option<T> {
        let ready = self
            .last_fired
            .map_or(true, |last| now.saturating_duration_since(last) >= self.interval);

        if ready {
            self.last_fired = Some(now);
            Some(value)
        } else {
            None
        }
    }

    /// Take the final value unconditionally and reset the window
    pub fn flush(&mut self, last: T) -> T {
        self.last_fired = None;
        last
    }

    pub fn reset(&mut self) {
        self.last_fired = None;
    }
}

/// Delay-until-quiet send policy
#[derive(Debug)]
pub struct Debounce<T> {
    window: Duration,
    pending: Option<(T, Instant)>,
    generation: u64,
}

impl<T> Debounce<T> {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: None,
            generation: 0,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Replace the pending value and restart the quiet window.
    ///
    /// Returns a generation token identifying this schedule.
    pub fn schedule(&mut self, value: T, now: Instant) -> u64 {
        self.generation = self.generation.wrapping_add(1);
        self.pending = Some((value, now + self.window));
        self.generation
    }

    /// Take the pending value if its window has elapsed
    pub fn take_due(&mut self, now: Instant) -> Option<T> {
        match &self.pending {
            Some((_, deadline)) if now >= *deadline => self.pending.take().map(|(value, _)| value),
            _ => None,
        }
    }

    /// Take the pending value only if `generation` is still the latest schedule
    pub fn take_if_current(&mut self, generation: u64, now: Instant) -> Option<T> {
        if generation != self.generation {
            return None;
        }
        self.take_due(now)
    }

    /// Drop the pending value without sending it
    pub fn cancel(&mut self) -> Option<T> {
        self.generation = self.generation.wrapping_add(1);
        self.pending.take().map(|(value, _)| value)
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    #[test]
    fn test_throttle_collapses_fast_updates() {
        let start = Instant::now();
        let mut throttle = Throttle::new(ms(80));

        let sent: Vec<i32> = (0..10)
            .filter_map(|i| throttle.offer(i, start + ms(i as u64 * 20)))
            .collect();

        // 0ms, 80ms and 160ms pass; the rest fall inside a window
        assert_eq!(sent, vec![0, 4, 8]);
        assert_eq!(throttle.flush(9), 9);
    }

    #[test]
    fn test_throttle_flush_reopens_window() {
        let start = Instant::now();
        let mut throttle = Throttle::new(ms(80));
        assert_eq!(throttle.offer(1, start), Some(1));
        throttle.flush(1);
        assert_eq!(throttle.offer(2, start + ms(1)), Some(2));
    }

    #[test]
    fn test_debounce_waits_for_quiet() {
        let start = Instant::now();
        let mut debounce = Debounce::new(ms(400));

        debounce.schedule(1, start);
        debounce.schedule(2, start + ms(300));
        assert_eq!(debounce.take_due(start + ms(500)), None);
        assert_eq!(debounce.take_due(start + ms(700)), Some(2));
        assert!(!debounce.is_pending());
    }

    #[test]
    fn test_debounce_stale_generation_is_ignored() {
        let start = Instant::now();
        let mut debounce = Debounce::new(ms(400));

        let first = debounce.schedule("a", start);
        let second = debounce.schedule("b", start + ms(100));
        assert_eq!(debounce.take_if_current(first, start + ms(1000)), None);
        assert_eq!(debounce.take_if_current(second, start + ms(1000)), Some("b"));
    }

    #[test]
    fn test_debounce_cancel_discards() {
        let start = Instant::now();
        let mut debounce = Debounce::new(ms(400));
        let generation = debounce.schedule(7, start);

        assert_eq!(debounce.cancel(), Some(7));
        assert_eq!(debounce.take_if_current(generation, start + ms(1000)), None);
    }
}
