// Mutex-guarded handle to the one DeviceState shared by the telemetry loop
// and the script bridge. Every read or multi-field update happens under a
// single lock acquisition, so no reader ever observes a half-applied write.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::state::DeviceState;

#[derive(Debug, Clone, Default)]
pub struct SharedState {
    inner: Arc<Mutex<DeviceState>>,
}

impl SharedState {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, DeviceState> {
        // A panic while holding the lock cannot leave DeviceState invalid
        // (all fields are plain values), so keep going with the inner value
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Read one or more fields under the lock
    pub fn read<R>(&self, f: impl FnOnce(&DeviceState) -> R) -> R {
        f(&self.lock())
    }

    /// Mutate one or more fields under the lock
    pub fn update<R>(&self, f: impl FnOnce(&mut DeviceState) -> R) -> R {
        f(&mut self.lock())
    }

    /// Copy of the whole state
    pub fn snapshot(&self) -> DeviceState {
        self.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::state::StateReport;
    use std::thread;

    #[test]
    fn test_concurrent_updates_are_never_torn() {
        let shared = SharedState::new();

        // Writer A keeps both motors equal, writer B keeps all distances
        // equal to the battery level. Readers must only see consistent sets.
        let motors = {
            let shared = shared.clone();
            thread::spawn(move || {
                for i in 0..2000i64 {
                    let speed = (i % 200) - 100;
                    shared.update(|s| {
                        s.motors[0].set_speed(speed, None);
                        s.motors[1].set_speed(speed, None);
                    });
                }
            })
        };
        let telemetry = {
            let shared = shared.clone();
            thread::spawn(move || {
                for i in 0..2000u32 {
                    let v = (i % 256) as u8;
                    shared.update(|s| {
                        s.apply_report(&StateReport {
                            mode: 1,
                            battery_level: v,
                            distances: [v, v],
                        })
                    });
                }
            })
        };

        for _ in 0..2000 {
            let snap = shared.snapshot();
            assert_eq!(snap.motors[0].speed(), snap.motors[1].speed());
            assert_eq!(snap.distances(), [snap.battery_level, snap.battery_level]);
        }

        motors.join().unwrap();
        telemetry.join().unwrap();
    }
}
