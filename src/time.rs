//! Real and virtual time providers for playback scheduling (spec §4.1).

use std::sync::Mutex;
use std::time::Instant;

use crate::error::{Result, VastClientError};

/// Abstracts `now()` and `sleep(d)` so playback can run against wall-clock
/// time or a deterministic virtual clock.
#[async_trait::async_trait]
pub trait TimeSource: Send + Sync {
    /// Current time in seconds, monotonic within one playback.
    fn now(&self) -> f64;

    /// Suspend the caller for `secs` seconds of this provider's clock.
    async fn sleep(&self, secs: f64);
}

/// Wall-clock time source backed by `tokio::time`.
pub struct RealTime {
    start: Instant,
}

impl RealTime {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for RealTime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl TimeSource for RealTime {
    fn now(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    async fn sleep(&self, secs: f64) {
        tokio::time::sleep(std::time::Duration::from_secs_f64(secs.max(0.0))).await;
    }
}

struct VirtualClock {
    elapsed: f64,
}

/// Deterministic virtual time source. `sleep(d)` advances the internal
/// counter by `d / speed` instead of actually suspending, so tests can
/// drive a full playback without real delay.
pub struct VirtualTime {
    clock: Mutex<VirtualClock>,
    speed: f64,
}

impl VirtualTime {
    /// `speed` scales how much virtual time one second of `sleep` consumes.
    /// A speed of `0` is rejected: it would make `sleep` never advance time.
    pub fn new(speed: f64) -> Result<Self> {
        if !(speed > 0.0 && speed.is_finite()) {
            return Err(VastClientError::ConfigError(format!(
                "virtual time speed must be positive and finite, got {speed}"
            )));
        }
        Ok(Self {
            clock: Mutex::new(VirtualClock { elapsed: 0.0 }),
            speed,
        })
    }

    /// Advance the virtual clock directly, bypassing `sleep`.
    pub fn advance(&self, secs: f64) {
        let mut clock = self.clock.lock().unwrap();
        clock.elapsed += secs.max(0.0);
    }

    /// Jump the virtual clock to an absolute time.
    pub fn set_time(&self, t: f64) {
        let mut clock = self.clock.lock().unwrap();
        clock.elapsed = t.max(clock.elapsed);
    }
}

#[async_trait::async_trait]
impl TimeSource for VirtualTime {
    fn now(&self) -> f64 {
        self.clock.lock().unwrap().elapsed
    }

    async fn sleep(&self, secs: f64) {
        // sleep(0) is legal and still yields control to the scheduler.
        tokio::task::yield_now().await;
        self.advance(secs / self.speed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn virtual_time_rejects_zero_speed() {
        assert!(VirtualTime::new(0.0).is_err());
    }

    #[test]
    fn virtual_time_rejects_negative_and_nan_speed() {
        assert!(VirtualTime::new(-1.0).is_err());
        assert!(VirtualTime::new(f64::NAN).is_err());
        assert!(VirtualTime::new(f64::INFINITY).is_err());
    }

    #[tokio::test]
    async fn virtual_time_advances_by_sleep_scaled_by_speed() {
        let vt = VirtualTime::new(2.0).unwrap();
        assert_eq!(vt.now(), 0.0);
        vt.sleep(4.0).await;
        assert_eq!(vt.now(), 2.0);
    }

    #[test]
    fn virtual_time_advance_and_set_time() {
        let vt = VirtualTime::new(1.0).unwrap();
        vt.advance(5.0);
        assert_eq!(vt.now(), 5.0);
        vt.set_time(10.0);
        assert_eq!(vt.now(), 10.0);
        // set_time never moves backward
        vt.set_time(3.0);
        assert_eq!(vt.now(), 10.0);
    }

    #[tokio::test]
    async fn real_time_never_goes_backward() {
        let rt = RealTime::new();
        let t0 = rt.now();
        rt.sleep(0.01).await;
        let t1 = rt.now();
        assert!(t1 >= t0);
    }
}
