// src/utils/rate.rs

//! Request pacing shared across workers.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{Instant, sleep_until};

/// Global pacing: consecutive `acquire` returns are at least `interval` apart.
///
/// The lock is held while waiting, so callers are served in arrival order
/// and the aggregate rate holds regardless of how many workers share it.
#[derive(Debug)]
pub struct RateGate {
    interval: Duration,
    next_start: Mutex<Option<Instant>>,
}

impl RateGate {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_start: Mutex::new(None),
        }
    }

    /// A gate that never waits.
    pub fn unpaced() -> Self {
        Self::new(Duration::ZERO)
    }

    pub async fn acquire(&self) {
        let mut next_start = self.next_start.lock().await;
        let now = Instant::now();
        let start = match *next_start {
            Some(at) if at > now => {
                sleep_until(at).await;
                at
            }
            _ => now,
        };
        *next_start = Some(start + self.interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn gate_spaces_consecutive_starts() {
        let gate = RateGate::new(Duration::from_millis(500));
        let t0 = Instant::now();
        gate.acquire().await;
        gate.acquire().await;
        gate.acquire().await;
        assert_eq!(t0.elapsed(), Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn unpaced_gate_never_waits() {
        let gate = RateGate::unpaced();
        let t0 = Instant::now();
        for _ in 0..5 {
            gate.acquire().await;
        }
        assert_eq!(t0.elapsed(), Duration::ZERO);
    }
}
