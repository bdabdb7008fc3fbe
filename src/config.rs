// Timeouts, retry policy, BLE identifiers and zenoh topics
use std::time::Duration;

// Telemetry loop poll timeout (bounded so the loop notices a stop request)
pub const POLL_TIMEOUT: Duration = Duration::from_millis(100);

// Link is considered stale when no notification arrived for this long
pub const TELEMETRY_STALE_TIMEOUT: Duration = Duration::from_secs(2);

// Connection retry policy
pub const CONNECT_MAX_ATTEMPTS: u32 = 3;
pub const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(500);

// Device used when no address is given on the command line
pub const DEFAULT_ADDRESS: &str = "F7:B8:99:22:86:B4";

// Nordic UART Service. TX is written by the host, RX notifies replies.
pub const NUS_SERVICE_UUID: &str = "6e400001-b5a3-f393-e0a9-e50e24dcca9e";
pub const NUS_TX_CHAR_UUID: &str = "6e400002-b5a3-f393-e0a9-e50e24dcca9e";
pub const NUS_RX_CHAR_UUID: &str = "6e400003-b5a3-f393-e0a9-e50e24dcca9e";

// Client Characteristic Configuration descriptor: UUID and "notify on" value
pub const CCCD_UUID: u16 = 0x2902;
pub const CCCD_ENABLE_NOTIFICATIONS: [u8; 2] = [0x01, 0x00];

// Serial BLE-UART bridge
pub const DEFAULT_BAUDRATE: u32 = 115_200;

// Motor speed limit (device-native units, both directions)
pub const MAX_MOTOR_SPEED: i32 = 100;

// Telemetry publishing
pub const PUBLISH_HZ: u64 = 10;
pub const TOPIC_TELEMETRY: &str = "apitor/state/telemetry"; // device state snapshots
pub const TOPIC_HEALTH: &str = "apitor/state/health"; // link health

/// Retry policy used by the connection manager
#[derive(Debug, Clone, Copy)]
pub struct ConnectionConfig {
    pub max_attempts: u32,
    pub retry_delay: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_attempts: CONNECT_MAX_ATTEMPTS,
            retry_delay: CONNECT_RETRY_DELAY,
        }
    }
}
