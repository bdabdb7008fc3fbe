// In-memory model of the robot: 2 motors, 4 LEDs, 2 distance sensors,
// battery level and the device-reported mode.

use std::fmt;

use crate::config::MAX_MOTOR_SPEED;

pub const MOTOR_COUNT: usize = 2;
pub const LED_COUNT: usize = 4;
pub const SENSOR_COUNT: usize = 2;

/// Direction of a motor, always derived from the sign of its speed
#[repr(i8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Backward = -1,
    Stopped = 0,
    Forward = 1,
}

impl Direction {
    pub fn as_i8(self) -> i8 {
        self as i8
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MotorState {
    speed: i8,
}

impl MotorState {
    /// Set the motor speed, optionally multiplied by a direction sign.
    /// The result is clamped to the device range, which preserves its sign.
    pub fn set_speed(&mut self, speed: i64, direction: Option<i64>) {
        let signed = match direction {
            Some(dir) => speed.saturating_mul(dir),
            None => speed,
        };
        let limit = i64::from(MAX_MOTOR_SPEED);
        self.speed = signed.clamp(-limit, limit) as i8;
    }

    pub fn stop(&mut self) {
        self.speed = 0;
    }

    pub fn speed(&self) -> i8 {
        self.speed
    }

    pub fn direction(&self) -> Direction {
        match self.speed.signum() {
            -1 => Direction::Backward,
            1 => Direction::Forward,
            _ => Direction::Stopped,
        }
    }
}

/// LED color codes as understood by the device. Both 0 and 8 mean off.
pub const LED_COLOR_NAMES: [&str; 9] = [
    "Off", "Red", "Orange", "Yellow", "Green", "Cyan", "Blue", "Violet", "Off",
];

pub const MAX_LED_COLOR: u8 = 8;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedState {
    color: u8,
}

impl LedState {
    /// Returns false (and leaves the LED untouched) for codes above 8
    pub fn set_color(&mut self, color: u8) -> bool {
        if color > MAX_LED_COLOR {
            return false;
        }
        self.color = color;
        true
    }

    pub fn color(&self) -> u8 {
        self.color
    }

    pub fn color_name(&self) -> &'static str {
        LED_COLOR_NAMES[usize::from(self.color)]
    }

    pub fn is_on(&self) -> bool {
        self.color != 0 && self.color != MAX_LED_COLOR
    }
}

/// Raw distance reading; only telemetry writes it
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DistanceSensorState {
    pub(crate) distance: u8,
}

impl DistanceSensorState {
    pub fn distance(&self) -> u8 {
        self.distance
    }
}

/// Values carried by one StateReport frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateReport {
    pub mode: u8,
    pub battery_level: u8,
    pub distances: [u8; SENSOR_COUNT],
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceState {
    pub motors: [MotorState; MOTOR_COUNT],
    pub leds: [LedState; LED_COUNT],
    pub distance_sensors: [DistanceSensorState; SENSOR_COUNT],
    pub battery_level: u8,
    pub mode: u8,
}

impl DeviceState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a decoded StateReport (battery, mode, distances)
    pub fn apply_report(&mut self, report: &StateReport) {
        self.mode = report.mode;
        self.battery_level = report.battery_level;
        for (sensor, &distance) in self.distance_sensors.iter_mut().zip(&report.distances) {
            sensor.distance = distance;
        }
    }

    pub fn motor_speeds(&self) -> [i8; MOTOR_COUNT] {
        [self.motors[0].speed(), self.motors[1].speed()]
    }

    pub fn led_colors(&self) -> [u8; LED_COUNT] {
        [
            self.leds[0].color(),
            self.leds[1].color(),
            self.leds[2].color(),
            self.leds[3].color(),
        ]
    }

    pub fn distances(&self) -> [u8; SENSOR_COUNT] {
        [
            self.distance_sensors[0].distance(),
            self.distance_sensors[1].distance(),
        ]
    }

    /// Zero both motors and switch every LED off
    pub fn reset_outputs(&mut self) {
        self.motors.iter_mut().for_each(MotorState::stop);
        self.leds = [LedState::default(); LED_COUNT];
    }
}

/// 8-byte device identifier, learned from an IdentityReport frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Uid(pub [u8; 8]);

impl Uid {
    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_follows_last_speed() {
        let mut motor = MotorState::default();
        assert_eq!(motor.direction(), Direction::Stopped);

        for (speed, expected) in [
            (5, Direction::Forward),
            (-3, Direction::Backward),
            (0, Direction::Stopped),
            (100, Direction::Forward),
            (-1, Direction::Backward),
        ] {
            motor.set_speed(speed, None);
            assert_eq!(motor.direction(), expected, "speed {}", speed);
        }
    }

    #[test]
    fn test_set_speed_applies_direction() {
        let mut motor = MotorState::default();
        motor.set_speed(9, Some(-1));
        assert_eq!(motor.speed(), -9);
        assert_eq!(motor.direction(), Direction::Backward);

        motor.set_speed(9, Some(0));
        assert_eq!(motor.speed(), 0);
        assert_eq!(motor.direction(), Direction::Stopped);
    }

    #[test]
    fn test_set_speed_clamps_but_keeps_sign() {
        let mut motor = MotorState::default();
        motor.set_speed(500, Some(1));
        assert_eq!(motor.speed(), 100);
        motor.set_speed(500, Some(-1));
        assert_eq!(motor.speed(), -100);
        motor.set_speed(i64::MAX, Some(-1));
        assert_eq!(motor.speed(), -100);
    }

    #[test]
    fn test_led_color_range() {
        let mut led = LedState::default();
        assert!(led.set_color(4));
        assert_eq!(led.color_name(), "Green");
        assert!(led.is_on());

        assert!(led.set_color(8));
        assert_eq!(led.color_name(), "Off");
        assert!(!led.is_on());

        assert!(!led.set_color(9));
        assert_eq!(led.color(), 8);
    }

    #[test]
    fn test_apply_report() {
        let mut state = DeviceState::new();
        state.motors[0].set_speed(7, None);
        state.apply_report(&StateReport {
            mode: 2,
            battery_level: 200,
            distances: [12, 250],
        });

        assert_eq!(state.mode, 2);
        assert_eq!(state.battery_level, 200);
        assert_eq!(state.distances(), [12, 250]);
        // Outputs are not touched by telemetry
        assert_eq!(state.motor_speeds(), [7, 0]);
    }

    #[test]
    fn test_uid_display() {
        let uid = Uid([0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88]);
        assert_eq!(uid.to_string(), "1122334455667788");
    }
}
