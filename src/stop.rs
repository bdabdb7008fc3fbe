// Cooperative stop flag shared between a task and its owner.
// Waiters blocked in `wait_timeout` wake as soon as `stop` is called.

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        let (flag, cvar) = &*self.inner;
        *flag.lock().unwrap_or_else(PoisonError::into_inner) = true;
        cvar.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        *self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleep for `duration` unless stopped first. Returns true if stopped.
    /// A duration past the clock's range waits for the stop.
    pub fn wait_timeout(&self, duration: Duration) -> bool {
        let (flag, cvar) = &*self.inner;
        let deadline = Instant::now().checked_add(duration);
        let mut stopped = flag.lock().unwrap_or_else(PoisonError::into_inner);

        // Loop guards against spurious wakeups
        while !*stopped {
            let remaining = match deadline {
                Some(deadline) => deadline.saturating_duration_since(Instant::now()),
                None => duration,
            };
            if remaining.is_zero() {
                break;
            }
            stopped = cvar
                .wait_timeout(stopped, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        *stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_wait_runs_full_duration() {
        let signal = StopSignal::new();
        let start = Instant::now();
        assert!(!signal.wait_timeout(Duration::from_millis(30)));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_stop_interrupts_wait() {
        let signal = StopSignal::new();
        let stopper = signal.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            stopper.stop();
        });

        let start = Instant::now();
        assert!(signal.wait_timeout(Duration::from_secs(10)));
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(signal.is_stopped());
        handle.join().unwrap();
    }

    #[test]
    fn test_unbounded_wait_ends_on_stop() {
        let signal = StopSignal::new();
        let stopper = signal.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            stopper.stop();
        });

        assert!(signal.wait_timeout(Duration::MAX));
        handle.join().unwrap();
    }
}
