use std::thread::sleep;
use std::time::{Duration, Instant};

/// Enforces a minimum spacing between consecutive calls. The first call never waits.
#[derive(Debug, Clone)]
pub struct Pacer {
    interval: Duration,
    last_call_at: Option<Instant>,
}

impl Pacer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_call_at: None,
        }
    }

    pub fn from_millis(millis: u64) -> Self {
        Self::new(Duration::from_millis(millis))
    }

    pub fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn wait(&mut self) {
        if let Some(last) = self.last_call_at {
            let elapsed = last.elapsed();
            if elapsed < self.interval {
                sleep(self.interval - elapsed);
            }
        }
        self.last_call_at = Some(Instant::now());
    }
}
