use crate::config::DEFAULT_MAX_TICK_LENGTH_MS;
use std::time::Duration;

/// Paces ticks from the speed slider.
#[derive(Debug, Clone, PartialEq)]
pub struct Clock {
    speed: f64,
    max_tick_length_ms: f64,
}

/// The one tick the host should fire next. `run` identifies the run that
/// scheduled it; a tick from an earlier run is stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingTick {
    pub run: u64,
    pub delay: Duration,
}

impl Default for Clock {
    fn default() -> Self {
        Self::new(1.0, DEFAULT_MAX_TICK_LENGTH_MS)
    }
}

impl Clock {
    pub fn new(speed: f64, max_tick_length_ms: f64) -> Self {
        let mut clock = Self {
            speed: 1.0,
            max_tick_length_ms: max_tick_length_ms.max(0.0),
        };
        clock.set_speed(speed);
        clock
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    /// Clamped to [0, 1]. NaN leaves the speed unchanged.
    pub fn set_speed(&mut self, speed: f64) {
        if speed.is_nan() {
            return;
        }
        self.speed = speed.clamp(0.0, 1.0);
    }

    /// `K * (1 - speed)^2` milliseconds, where `K` is the tick length at
    /// speed 0.
    pub fn tick_length_for(&self, speed: f64) -> Duration {
        let speed = if speed.is_nan() { 0.0 } else { speed.clamp(0.0, 1.0) };
        let slowness = 1.0 - speed;
        let ms = self.max_tick_length_ms * slowness * slowness;
        Duration::from_nanos((ms * 1_000_000.0).round() as u64)
    }

    pub fn tick_length(&self) -> Duration {
        self.tick_length_for(self.speed)
    }

    pub fn is_max_speed(&self) -> bool {
        self.tick_length().is_zero()
    }

    pub fn schedule_next_tick(&self, run: u64) -> PendingTick {
        PendingTick {
            run,
            delay: self.tick_length(),
        }
    }
}
