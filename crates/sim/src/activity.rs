use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Lock-free interaction clock shared between a room, its robot links and its
/// IoTScape devices. Any inbound interaction touches it; the room reads it to
/// decide timeout and wake-up.
pub struct ActivityMonitor {
    epoch: Instant,
    last_ms: AtomicU64,
}

impl ActivityMonitor {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            last_ms: AtomicU64::new(0),
        }
    }

    pub fn touch(&self) {
        let now = self.epoch.elapsed().as_millis() as u64;
        self.last_ms.fetch_max(now, Ordering::Relaxed);
    }

    /// Monotonic mark of the most recent interaction, in ms since creation.
    pub fn last_mark(&self) -> u64 {
        self.last_ms.load(Ordering::Relaxed)
    }

    pub fn idle(&self) -> Duration {
        let now = self.epoch.elapsed().as_millis() as u64;
        Duration::from_millis(now.saturating_sub(self.last_mark()))
    }
}

impl Default for ActivityMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn touch_resets_idle_time() {
        let monitor = ActivityMonitor::new();
        thread::sleep(Duration::from_millis(15));
        assert!(monitor.idle() >= Duration::from_millis(10));

        let before = monitor.last_mark();
        monitor.touch();
        assert!(monitor.last_mark() >= before);
        assert!(monitor.idle() < Duration::from_millis(10));
    }
}
