//! Load-adaptive response delays.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::config::LoadShapingConfig;

/// Timestamps kept beyond this are useless: the rate they imply is already
/// far past the severe tier.
const MAX_TRACKED_ADMITS: usize = 8192;

/// Applies graduated delays to admitted requests as global load rises.
///
/// Load is the count of admissions over the configured window, divided by
/// the window length. The shaper only computes the delay; sleeping is the
/// caller's business, outside any lock.
#[derive(Debug)]
pub struct LoadShaper {
    config: LoadShapingConfig,
    admitted: Mutex<VecDeque<Instant>>,
}

impl LoadShaper {
    /// Create from configuration.
    #[must_use]
    pub fn from_config(config: &LoadShapingConfig) -> Self {
        Self {
            config: config.clone(),
            admitted: Mutex::new(VecDeque::new()),
        }
    }

    /// Record an admission at `now` and return the delay in force for it.
    ///
    /// The rate is measured over admissions before this one, so a request
    /// never pushes itself into a higher tier.
    pub fn record_and_delay(&self, now: Instant) -> Duration {
        let mut admitted = self.admitted.lock();
        Self::prune(&mut admitted, now, self.config.window);
        let rate = admitted.len() as f64 / self.config.window.as_secs_f64();
        admitted.push_back(now);
        if admitted.len() > MAX_TRACKED_ADMITS {
            admitted.pop_front();
        }
        drop(admitted);
        self.delay_for_rate(rate)
    }

    /// Admitted requests per second over the window ending at `now`.
    #[must_use]
    pub fn current_rate(&self, now: Instant) -> f64 {
        let mut admitted = self.admitted.lock();
        Self::prune(&mut admitted, now, self.config.window);
        admitted.len() as f64 / self.config.window.as_secs_f64()
    }

    /// Delay tier for a given admitted rate. Zero below the lowest threshold
    /// or when shaping is disabled.
    #[must_use]
    pub fn delay_for_rate(&self, rate: f64) -> Duration {
        if !self.config.enabled {
            return Duration::ZERO;
        }
        if rate > self.config.severe_rate {
            self.config.severe_delay
        } else if rate > self.config.high_rate {
            self.config.high_delay
        } else if rate > self.config.elevated_rate {
            self.config.elevated_delay
        } else {
            Duration::ZERO
        }
    }

    /// Check if load shaping is enabled.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    fn prune(admitted: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        if let Some(cutoff) = now.checked_sub(window) {
            while admitted.front().is_some_and(|t| *t < cutoff) {
                admitted.pop_front();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn shaper() -> LoadShaper {
        LoadShaper::from_config(&LoadShapingConfig::default())
    }

    #[test_case(0.0, Duration::ZERO; "no load")]
    #[test_case(50.0, Duration::ZERO; "at the elevated threshold")]
    #[test_case(50.1, Duration::from_millis(200); "just above elevated")]
    #[test_case(100.0, Duration::from_millis(200); "at the high threshold")]
    #[test_case(100.1, Duration::from_millis(500); "just above high")]
    #[test_case(200.0, Duration::from_millis(500); "at the severe threshold")]
    #[test_case(200.1, Duration::from_secs(1); "just above severe")]
    #[test_case(10_000.0, Duration::from_secs(1); "far above severe")]
    fn test_delay_tiers(rate: f64, expected: Duration) {
        assert_eq!(shaper().delay_for_rate(rate), expected);
    }

    #[test]
    fn test_delay_is_monotonic_in_rate() {
        let shaper = shaper();
        let mut last = Duration::ZERO;
        for rate in 0..300 {
            let delay = shaper.delay_for_rate(f64::from(rate));
            assert!(delay >= last, "delay fell from {last:?} at rate {rate}");
            last = delay;
        }
    }

    #[test]
    fn test_light_load_pays_no_delay() {
        let shaper = shaper();
        let t0 = Instant::now();

        for i in 0..10 {
            let delay = shaper.record_and_delay(t0 + Duration::from_millis(i));
            assert_eq!(delay, Duration::ZERO);
        }
    }

    #[test]
    fn test_sustained_flood_steps_up_tiers() {
        let shaper = shaper();
        let t0 = Instant::now();

        // 5s window: 251 admissions makes the rate of the 252nd > 50/s
        let mut saw_elevated = false;
        let mut saw_severe = false;
        for i in 0..1200u64 {
            let delay = shaper.record_and_delay(t0 + Duration::from_millis(i));
            if delay == Duration::from_millis(200) {
                saw_elevated = true;
            }
            if delay == Duration::from_secs(1) {
                saw_severe = true;
            }
        }
        assert!(saw_elevated);
        assert!(saw_severe);
        assert!(shaper.current_rate(t0 + Duration::from_millis(1200)) > 200.0);
    }

    #[test]
    fn test_rate_decays_as_window_slides() {
        let shaper = shaper();
        let t0 = Instant::now();

        for _ in 0..100 {
            shaper.record_and_delay(t0);
        }
        assert!((shaper.current_rate(t0) - 20.0).abs() < f64::EPSILON);

        // Admissions age out of the 5s window
        assert_eq!(shaper.current_rate(t0 + Duration::from_secs(6)), 0.0);
    }

    #[test]
    fn test_disabled_shaper_never_delays() {
        let shaper = LoadShaper::from_config(&LoadShapingConfig {
            enabled: false,
            ..LoadShapingConfig::default()
        });
        assert_eq!(shaper.delay_for_rate(10_000.0), Duration::ZERO);
        assert_eq!(shaper.record_and_delay(Instant::now()), Duration::ZERO);
    }

    #[test]
    fn test_tracked_admissions_are_bounded() {
        let shaper = shaper();
        let t0 = Instant::now();

        for _ in 0..(MAX_TRACKED_ADMITS + 500) {
            shaper.record_and_delay(t0);
        }
        assert_eq!(shaper.admitted.lock().len(), MAX_TRACKED_ADMITS);
    }
}
