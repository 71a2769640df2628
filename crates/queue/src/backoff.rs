//! Progressive back-off shared by every blocking and async wait loop.

use std::time::Duration;

/// Back-off schedule: yield for the first 22 rounds, then sleep 1 ms,
/// 10 ms and finally 100 ms per round.
#[derive(Debug, Default)]
pub struct Backoff {
    rounds: u32,
}

impl Backoff {
    pub fn new() -> Self {
        Self::default()
    }

    fn step(&mut self) -> Option<Duration> {
        let wait = match self.rounds {
            0..=21 => None,
            22..=23 => Some(Duration::from_millis(1)),
            24..=25 => Some(Duration::from_millis(10)),
            _ => Some(Duration::from_millis(100)),
        };
        self.rounds = self.rounds.saturating_add(1);
        wait
    }

    /// Wait one round on the current thread.
    pub fn wait(&mut self) {
        match self.step() {
            None => std::thread::yield_now(),
            Some(d) => std::thread::sleep(d),
        }
    }

    /// Wait one round without blocking the runtime.
    pub async fn wait_async(&mut self) {
        match self.step() {
            None => tokio::task::yield_now().await,
            Some(d) => tokio::time::sleep(d).await,
        }
    }

    pub fn reset(&mut self) {
        self.rounds = 0;
    }
}
