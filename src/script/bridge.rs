// Script bridge: the five robot primitives and the script execution task
//
//   M(motor, speed, direction)  motor 0 = both, 1, 2
//   MS(motor)                   same as M(motor, 0, 0)
//   L(led, color)               led 0 = all four, 1-4; color 0-8
//   GD(sensor)                  sensor 1 or 2, raw distance (nil otherwise)
//   DS(ticks)                   block for ticks / 10 seconds (fractions allowed)
//
// Every primitive is a cancellation point, and DS wakes early on stop.
// Ids, speeds and colors truncate toward zero.

use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{BridgeError, NativeFn, ScriptEngine, ScriptError};
use crate::device::{SharedState, LED_COUNT, MAX_LED_COLOR, MOTOR_COUNT, SENSOR_COUNT};
use crate::stop::StopSignal;

/// DS ticks per second
const SLEEP_TICKS_PER_SEC: f64 = 10.0;

fn number(args: &[f64], index: usize, function: &'static str) -> Result<f64, BridgeError> {
    args.get(index)
        .copied()
        .ok_or(BridgeError::MissingArgument { function, index })
}

fn arg(args: &[f64], index: usize, function: &'static str) -> Result<i64, BridgeError> {
    number(args, index, function).map(|v| v.trunc() as i64)
}

/// Indices selected by a 1-based id, where 0 selects all
fn targets(id: i64, count: usize) -> Option<Vec<usize>> {
    match usize::try_from(id) {
        Ok(0) => Some((0..count).collect()),
        Ok(n) if n <= count => Some(vec![n - 1]),
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub struct ScriptBridge {
    state: SharedState,
    stop: StopSignal,
}

impl ScriptBridge {
    pub fn new(state: SharedState) -> Self {
        Self {
            state,
            stop: StopSignal::new(),
        }
    }

    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_stopped()
    }

    fn checkpoint(&self) -> Result<(), BridgeError> {
        if self.stop.is_stopped() {
            Err(BridgeError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// M: set speed (times the direction sign when given)
    pub fn set_motor(
        &self,
        motor_id: i64,
        speed: i64,
        direction: Option<i64>,
    ) -> Result<(), BridgeError> {
        self.checkpoint()?;
        debug!("M({}, {}, {:?})", motor_id, speed, direction);
        let Some(motors) = targets(motor_id, MOTOR_COUNT) else {
            warn!("M: ignoring unknown motor {}", motor_id);
            return Ok(());
        };
        self.state.update(|state| {
            for i in motors {
                state.motors[i].set_speed(speed, direction);
            }
        });
        Ok(())
    }

    /// MS: stop one or both motors
    pub fn stop_motor(&self, motor_id: i64) -> Result<(), BridgeError> {
        self.set_motor(motor_id, 0, Some(0))
    }

    /// L: set LED color
    pub fn set_led(&self, led_id: i64, color: i64) -> Result<(), BridgeError> {
        self.checkpoint()?;
        debug!("L({}, {})", led_id, color);
        let code = u8::try_from(color)
            .ok()
            .filter(|&c| c <= MAX_LED_COLOR)
            .ok_or(BridgeError::InvalidArgument {
                function: "L",
                name: "color",
                value: color,
            })?;
        let Some(leds) = targets(led_id, LED_COUNT) else {
            warn!("L: ignoring unknown LED {}", led_id);
            return Ok(());
        };
        self.state.update(|state| {
            for i in leds {
                state.leds[i].set_color(code);
                debug!("LED {} is {}", i + 1, state.leds[i].color_name());
            }
        });
        Ok(())
    }

    /// GD: raw distance of sensor 1 or 2
    pub fn get_distance(&self, sensor_id: i64) -> Result<Option<u8>, BridgeError> {
        self.checkpoint()?;
        let index = match usize::try_from(sensor_id) {
            Ok(n @ 1..=SENSOR_COUNT) => n - 1,
            _ => return Ok(None),
        };
        Ok(Some(self.state.read(|state| state.distance_sensors[index].distance())))
    }

    /// DS: block this script for ticks / 10 seconds, waking early on stop
    pub fn sleep(&self, ticks: f64) -> Result<(), BridgeError> {
        self.checkpoint()?;
        let duration = if ticks.is_nan() || ticks <= 0.0 {
            Duration::ZERO
        } else {
            Duration::try_from_secs_f64(ticks / SLEEP_TICKS_PER_SEC).unwrap_or(Duration::MAX)
        };
        debug!("DS({}): sleeping {:?}", ticks, duration);
        if self.stop.wait_timeout(duration) {
            return Err(BridgeError::Cancelled);
        }
        Ok(())
    }

    /// Install M, MS, L, GD and DS into the engine, and let a stop
    /// interrupt scripts that never call them
    pub fn register(&self, engine: &mut dyn ScriptEngine) -> Result<(), ScriptError> {
        engine.set_interrupt(self.stop.clone());

        let bridge = self.clone();
        let m: NativeFn = Box::new(move |args: &[f64]| -> Result<Option<i64>, BridgeError> {
            let direction = args.get(2).map(|v| v.trunc() as i64);
            bridge.set_motor(arg(args, 0, "M")?, arg(args, 1, "M")?, direction)?;
            Ok(None)
        });

        let bridge = self.clone();
        let ms: NativeFn = Box::new(move |args: &[f64]| -> Result<Option<i64>, BridgeError> {
            bridge.stop_motor(arg(args, 0, "MS")?)?;
            Ok(None)
        });

        let bridge = self.clone();
        let l: NativeFn = Box::new(move |args: &[f64]| -> Result<Option<i64>, BridgeError> {
            bridge.set_led(arg(args, 0, "L")?, arg(args, 1, "L")?)?;
            Ok(None)
        });

        let bridge = self.clone();
        let gd: NativeFn = Box::new(move |args: &[f64]| -> Result<Option<i64>, BridgeError> {
            Ok(bridge.get_distance(arg(args, 0, "GD")?)?.map(i64::from))
        });

        let bridge = self.clone();
        let ds: NativeFn = Box::new(move |args: &[f64]| -> Result<Option<i64>, BridgeError> {
            bridge.sleep(number(args, 0, "DS")?)?;
            Ok(None)
        });

        engine.register_function("M", m)?;
        engine.register_function("MS", ms)?;
        engine.register_function("L", l)?;
        engine.register_function("GD", gd)?;
        engine.register_function("DS", ds)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    NotStarted,
    Running,
    Completed,
    Aborted,
}

/// A script running on its own thread against the shared device state
pub struct ScriptExecution {
    bridge: ScriptBridge,
    state: Arc<Mutex<ExecutionState>>,
    handle: Option<JoinHandle<Result<(), ScriptError>>>,
}

impl ScriptExecution {
    pub fn new(bridge: ScriptBridge) -> Self {
        Self {
            bridge,
            state: Arc::new(Mutex::new(ExecutionState::NotStarted)),
            handle: None,
        }
    }

    pub fn state(&self) -> ExecutionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start the script. The engine is built on the script thread, so it
    /// does not need to be Send.
    pub fn start<E, F>(&mut self, source: String, make_engine: F) -> Result<(), ScriptError>
    where
        E: ScriptEngine + 'static,
        F: FnOnce() -> Result<E, ScriptError> + Send + 'static,
    {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state != ExecutionState::NotStarted {
                return Err(ScriptError::AlreadyStarted);
            }
            *state = ExecutionState::Running;
        }

        let bridge = self.bridge.clone();
        let state = self.state.clone();
        let spawned = thread::Builder::new().name("script".into()).spawn(move || {
            info!("Executing script ({} bytes)", source.len());
            let result = make_engine().and_then(|mut engine| {
                bridge.register(&mut engine)?;
                engine.execute(&source)
            });

            // Any failure after a stop request is the cancellation surfacing
            let result = match result {
                Err(_) if bridge.is_stopped() => Err(ScriptError::Cancelled),
                other => other,
            };
            let outcome = match &result {
                Ok(()) => ExecutionState::Completed,
                Err(_) => ExecutionState::Aborted,
            };
            info!("Script finished: {:?}", outcome);
            *state.lock().unwrap_or_else(PoisonError::into_inner) = outcome;
            result
        });

        match spawned {
            Ok(handle) => {
                self.handle = Some(handle);
                Ok(())
            }
            Err(e) => {
                *self.state.lock().unwrap_or_else(PoisonError::into_inner) =
                    ExecutionState::Aborted;
                Err(ScriptError::Spawn(e))
            }
        }
    }

    /// Abandon the script at its next primitive call
    pub fn stop(&self) {
        self.bridge.stop();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Wait for the script thread. Ok(()) if it was never started.
    pub fn join(&mut self) -> Result<(), ScriptError> {
        match self.handle.take() {
            Some(handle) => handle.join().map_err(|_| ScriptError::Panicked)?,
            None => Ok(()),
        }
    }
}
