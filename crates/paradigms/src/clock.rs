//! Injectable frame tick source
//!
//! Engine routines are cooperatively-suspending tasks that yield at frame
//! boundaries or after a real-time delay. The clock is a seam so tests can
//! drive frames under tokio's paused virtual time instead of wall-clock
//! waits.

use async_trait::async_trait;
use std::time::Duration;

/// A source of frame boundaries and real-time delays.
#[async_trait]
pub trait FrameClock: Send + Sync {
    /// Suspend until the next frame boundary.
    async fn next_frame(&self);

    /// Suspend for a real-time delay.
    async fn sleep(&self, duration: Duration);

    /// Logical frames per second.
    fn frame_rate(&self) -> f32;
}

/// Fixed-interval clock over the tokio timer.
pub struct IntervalClock {
    frame: Duration,
    rate: f32,
}

impl IntervalClock {
    /// A clock ticking at `rate` frames per second.
    pub fn from_rate(rate: f32) -> Self {
        let rate = rate.max(1.0);
        Self {
            frame: Duration::from_secs_f32(1.0 / rate),
            rate,
        }
    }
}

#[async_trait]
impl FrameClock for IntervalClock {
    async fn next_frame(&self) {
        tokio::time::sleep(self.frame).await;
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn frame_rate(&self) -> f32 {
        self.rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_interval_clock_ticks_virtual_time() {
        let clock = IntervalClock::from_rate(60.0);
        let before = tokio::time::Instant::now();
        clock.next_frame().await;
        let elapsed = before.elapsed();
        assert!(elapsed >= Duration::from_secs_f32(1.0 / 60.0));
        assert_eq!(clock.frame_rate(), 60.0);
    }
}
