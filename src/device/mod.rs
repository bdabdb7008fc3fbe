// Device state model
//
// Provides:
// - Motor, LED and distance sensor models with their value rules
// - The DeviceState aggregate and the device UID
// - SharedState, the lock-guarded handle both concurrent tasks use

mod shared;
pub mod state;

pub use shared::SharedState;
pub use state::{
    DeviceState, Direction, DistanceSensorState, LedState, MotorState, StateReport, Uid,
    LED_COUNT, MAX_LED_COLOR, MOTOR_COUNT, SENSOR_COUNT,
};
