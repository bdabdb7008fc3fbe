// Direct Bluetooth LE link through BlueZ
//
// Finds the robot by MAC address, resolves the Nordic UART Service and its
// TX/RX characteristics, and subscribes to RX through its Client
// Characteristic Configuration descriptor. Each notification carries one
// whole frame, so no reassembly is needed.
//
// The Link trait is blocking; calls are driven on the tokio runtime that
// was current when the transport connected.

use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, info};

use bluer::gatt::remote::{Characteristic, Service};
use bluer::{Adapter, AdapterEvent, Address, Device, Uuid};

use super::{Link, LinkError, Result, Transport};
use crate::config::{CCCD_UUID, NUS_RX_CHAR_UUID, NUS_SERVICE_UUID, NUS_TX_CHAR_UUID};
use crate::protocol::hex;

pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(10);

/// Bluetooth base UUID, 16-bit ids sit in bits 96..112
const BLUETOOTH_BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_0080_5f9b_34fb;

type Notifications = Pin<Box<dyn Stream<Item = Vec<u8>> + Send>>;

fn uuid16(id: u16) -> Uuid {
    Uuid::from_u128(BLUETOOTH_BASE_UUID | (u128::from(id) << 96))
}

fn parse_uuid(uuid: &str) -> Result<Uuid> {
    Uuid::parse_str(uuid).map_err(|e| LinkError::ConnectFailed {
        address: uuid.to_string(),
        reason: format!("bad UUID: {}", e),
    })
}

/// Opens BLE links; the device address is the robot's MAC
#[derive(Debug, Clone)]
pub struct BleTransport {
    scan_timeout: Duration,
}

impl BleTransport {
    pub fn new(scan_timeout: Duration) -> Self {
        Self { scan_timeout }
    }
}

impl Default for BleTransport {
    fn default() -> Self {
        Self::new(DEFAULT_SCAN_TIMEOUT)
    }
}

impl Transport for BleTransport {
    fn connect(&self, address: &str) -> Result<Box<dyn Link>> {
        let failed = |reason: String| LinkError::ConnectFailed {
            address: address.to_string(),
            reason,
        };
        let handle = Handle::try_current().map_err(|e| failed(e.to_string()))?;
        let mac: Address = address.parse().map_err(|e: bluer::InvalidAddress| failed(e.to_string()))?;

        let link = handle.block_on(BleLink::open(mac, self.scan_timeout))?;
        Ok(Box::new(link))
    }
}

pub struct BleLink {
    handle: Handle,
    _session: bluer::Session,
    device: Device,
    tx: Characteristic,
    rx: Characteristic,
    notifications: Option<Notifications>,
}

impl BleLink {
    async fn open(mac: Address, scan_timeout: Duration) -> Result<Self> {
        let session = bluer::Session::new().await?;
        let adapter = session.default_adapter().await?;
        adapter.set_powered(true).await?;
        info!("Using Bluetooth adapter {}", adapter.name());

        wait_for_device(&adapter, mac, scan_timeout).await?;
        let device = adapter.device(mac)?;
        if !device.is_connected().await? {
            info!("Connecting to {}", mac);
            device.connect().await?;
        }

        let service = find_service(&device, parse_uuid(NUS_SERVICE_UUID)?).await?;
        let tx = find_characteristic(&service, mac, parse_uuid(NUS_TX_CHAR_UUID)?).await?;
        let rx = find_characteristic(&service, mac, parse_uuid(NUS_RX_CHAR_UUID)?).await?;
        info!("Connected to {} (Nordic UART Service)", mac);

        Ok(Self {
            handle: Handle::current(),
            _session: session,
            device,
            tx,
            rx,
            notifications: None,
        })
    }

    async fn subscribe(&self) -> Result<Notifications> {
        let cccd = uuid16(CCCD_UUID);
        let mut found = false;
        for descriptor in self.rx.descriptors().await? {
            if descriptor.uuid().await? == cccd {
                found = true;
                break;
            }
        }
        if !found {
            return Err(LinkError::DescriptorNotFound {
                characteristic: NUS_RX_CHAR_UUID.to_string(),
            });
        }

        // BlueZ owns the descriptor and writes the enable value on subscribe
        let stream = self.rx.notify().await?;
        Ok(Box::pin(stream))
    }
}

async fn wait_for_device(adapter: &Adapter, mac: Address, scan_timeout: Duration) -> Result<()> {
    debug!("Scanning for {}", mac);
    let events = adapter.discover_devices().await?;
    tokio::pin!(events);

    let found = tokio::time::timeout(scan_timeout, async {
        while let Some(event) = events.next().await {
            if let AdapterEvent::DeviceAdded(addr) = event {
                if addr == mac {
                    return true;
                }
            }
        }
        false
    })
    .await;

    match found {
        Ok(true) => Ok(()),
        _ => Err(LinkError::ConnectFailed {
            address: mac.to_string(),
            reason: format!("not found within {:?}", scan_timeout),
        }),
    }
}

async fn find_service(device: &Device, uuid: Uuid) -> Result<Service> {
    for service in device.services().await? {
        if service.uuid().await? == uuid {
            return Ok(service);
        }
    }
    Err(LinkError::ConnectFailed {
        address: device.address().to_string(),
        reason: format!("service {} not found", uuid),
    })
}

async fn find_characteristic(
    service: &Service,
    mac: Address,
    uuid: Uuid,
) -> Result<Characteristic> {
    for characteristic in service.characteristics().await? {
        if characteristic.uuid().await? == uuid {
            return Ok(characteristic);
        }
    }
    Err(LinkError::ConnectFailed {
        address: mac.to_string(),
        reason: format!("characteristic {} not found", uuid),
    })
}

impl Link for BleLink {
    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        debug!("TX {}", hex(bytes));
        self.handle.block_on(self.tx.write(bytes))?;
        Ok(())
    }

    fn poll_notification(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>> {
        let Some(notifications) = self.notifications.as_mut() else {
            self.handle.block_on(tokio::time::sleep(timeout));
            return Ok(None);
        };

        let handle = self.handle.clone();
        match handle.block_on(tokio::time::timeout(timeout, notifications.next())) {
            Ok(Some(frame)) => {
                debug!("RX {}", hex(&frame));
                Ok(Some(frame))
            }
            Ok(None) => Err(LinkError::Disconnected),
            Err(_) => {
                if handle.block_on(self.device.is_connected())? {
                    Ok(None)
                } else {
                    Err(LinkError::Disconnected)
                }
            }
        }
    }

    fn enable_notifications(&mut self, characteristic: &str) -> Result<()> {
        if !characteristic.eq_ignore_ascii_case(NUS_RX_CHAR_UUID) {
            return Err(LinkError::DescriptorNotFound {
                characteristic: characteristic.to_string(),
            });
        }
        let stream = self.handle.block_on(self.subscribe())?;
        self.notifications = Some(stream);
        info!("Notifications enabled on {}", NUS_RX_CHAR_UUID);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cccd_uuid() {
        assert_eq!(
            uuid16(CCCD_UUID).to_string(),
            "00002902-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_nus_uuids_parse() {
        for uuid in [NUS_SERVICE_UUID, NUS_TX_CHAR_UUID, NUS_RX_CHAR_UUID] {
            assert_eq!(parse_uuid(uuid).unwrap().to_string(), uuid);
        }
    }

    #[test]
    fn test_connect_needs_runtime() {
        let err = BleTransport::default().connect("F7:B8:99:22:86:B4").err().unwrap();
        assert!(matches!(err, LinkError::ConnectFailed { .. }));
    }
}
