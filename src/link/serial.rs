// Link over a serial BLE-UART bridge
//
// The bridge holds the BLE connection to the robot and passes the Nordic
// UART Service through: bytes written to the port go to the TX
// characteristic, RX notifications come back as a byte stream.

use serialport::{self, SerialPort};
use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use super::{Link, LinkError, Result, Transport};
use crate::config::{DEFAULT_BAUDRATE, NUS_RX_CHAR_UUID};
use crate::protocol::{hex, FrameAssembler};

/// Opens serial links; the device address is the port path
#[derive(Debug, Clone)]
pub struct SerialTransport {
    baudrate: u32,
}

impl SerialTransport {
    pub fn new(baudrate: u32) -> Self {
        Self { baudrate }
    }
}

impl Default for SerialTransport {
    fn default() -> Self {
        Self::new(DEFAULT_BAUDRATE)
    }
}

impl Transport for SerialTransport {
    fn connect(&self, address: &str) -> Result<Box<dyn Link>> {
        Ok(Box::new(SerialLink::open(address, self.baudrate)?))
    }
}

pub struct SerialLink {
    port: Box<dyn SerialPort>,
    assembler: FrameAssembler,
}

impl SerialLink {
    pub fn open(port_name: &str, baudrate: u32) -> Result<Self> {
        info!("Opening BLE-UART bridge on {} @ {} baud", port_name, baudrate);
        let port = serialport::new(port_name, baudrate)
            .timeout(Duration::from_millis(10))
            .open()?;

        Ok(Self {
            port,
            assembler: FrameAssembler::new(),
        })
    }
}

impl Link for SerialLink {
    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        debug!("TX {}", hex(bytes));
        self.port.write_all(bytes)?;
        self.port.flush()?;
        Ok(())
    }

    fn poll_notification(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>> {
        let deadline = Instant::now() + timeout;
        let mut chunk = [0u8; 64];

        loop {
            if let Some(frame) = self.assembler.next_frame() {
                debug!("RX {}", hex(&frame));
                return Ok(Some(frame));
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            self.port.set_timeout(remaining)?;

            match self.port.read(&mut chunk) {
                Ok(0) => return Err(LinkError::Disconnected),
                Ok(n) => self.assembler.push(&chunk[..n]),
                Err(e) if e.kind() == ErrorKind::TimedOut => return Ok(None),
                Err(e) if e.kind() == ErrorKind::BrokenPipe => {
                    return Err(LinkError::Disconnected);
                }
                Err(e) => return Err(LinkError::Io(e)),
            }
        }
    }

    fn enable_notifications(&mut self, characteristic: &str) -> Result<()> {
        // The bridge subscribes to RX itself; there is nothing else to enable
        if characteristic.eq_ignore_ascii_case(NUS_RX_CHAR_UUID) {
            Ok(())
        } else {
            Err(LinkError::DescriptorNotFound {
                characteristic: characteristic.to_string(),
            })
        }
    }
}
