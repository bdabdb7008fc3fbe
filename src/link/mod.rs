// Transport to the robot
//
// A Link is one live connection: write a buffer to the device's transmit
// characteristic, poll for notifications from its receive characteristic.
// A Transport knows how to open Links by device address.

use std::time::Duration;

#[cfg(feature = "ble")]
pub mod ble;
pub mod serial;
pub mod sim;

#[cfg(feature = "ble")]
pub use ble::{BleLink, BleTransport};
pub use serial::{SerialLink, SerialTransport};
pub use sim::{SimRobot, SimTransport};

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "ble")]
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] bluer::Error),

    #[error("Could not connect to {address}: {reason}")]
    ConnectFailed { address: String, reason: String },

    #[error("No notification descriptor found for characteristic {characteristic}")]
    DescriptorNotFound { characteristic: String },

    #[error("Device disconnected")]
    Disconnected,
}

pub type Result<T> = std::result::Result<T, LinkError>;

pub trait Link: Send {
    /// Write one buffer to the transmit characteristic
    fn write(&mut self, bytes: &[u8]) -> Result<()>;

    /// Wait at most `timeout` for one notification
    fn poll_notification(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>>;

    /// Turn on notifications for a characteristic by writing its
    /// configuration descriptor
    fn enable_notifications(&mut self, characteristic: &str) -> Result<()>;
}

pub trait Transport {
    fn connect(&self, address: &str) -> Result<Box<dyn Link>>;
}
