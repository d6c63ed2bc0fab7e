//! Sliding-window call admission.
//!
//! One `RateWindow` is shared by every client in the process. It holds the
//! admission time of each call made within the last `window`; a call is
//! admitted only while fewer than `capacity` of them remain.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use taskforge_config::RateLimitConfig;
use tokio::time::Instant;

#[derive(Debug)]
pub struct RateWindow {
    capacity: usize,
    window: Duration,
    stamps: Mutex<VecDeque<Instant>>,
}

impl RateWindow {
    pub fn new(capacity: usize, window: Duration) -> Self {
        Self {
            capacity,
            window,
            stamps: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.capacity, Duration::from_secs(config.window_secs))
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Admit a call now, or return how long until a slot frees up.
    pub fn try_admit(&self) -> Result<(), Duration> {
        self.try_admit_at(Instant::now())
    }

    /// Admission against an explicit clock reading.
    ///
    /// On success the timestamp is recorded, so the call counts against the
    /// quota whether or not it later succeeds.
    pub fn try_admit_at(&self, now: Instant) -> Result<(), Duration> {
        let mut stamps = self.stamps.lock().unwrap_or_else(|e| e.into_inner());
        Self::evict(&mut stamps, now, self.window);

        if stamps.len() < self.capacity {
            stamps.push_back(now);
            return Ok(());
        }

        // Full: the oldest entry is the next to leave
        let wait = stamps
            .front()
            .map(|oldest| (*oldest + self.window).saturating_duration_since(now))
            .unwrap_or(self.window);
        Err(wait)
    }

    /// Calls admitted within the current window.
    pub fn in_window(&self) -> usize {
        let mut stamps = self.stamps.lock().unwrap_or_else(|e| e.into_inner());
        Self::evict(&mut stamps, Instant::now(), self.window);
        stamps.len()
    }

    fn evict(stamps: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while let Some(oldest) = stamps.front() {
            if now.saturating_duration_since(*oldest) >= window {
                stamps.pop_front();
            } else {
                break;
            }
        }
    }
}
