// Connection manager: bounded retries, then notification setup

use std::thread::sleep;
use tracing::{info, warn};

use crate::config::{ConnectionConfig, NUS_RX_CHAR_UUID};
use crate::link::{Link, LinkError, Transport};

#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("Connection to {address} failed after {attempts} attempts: {last}")]
    ConnectionFailed {
        address: String,
        attempts: u32,
        #[source]
        last: LinkError,
    },

    #[error("Notification setup failed: {0}")]
    DescriptorNotFound(#[source] LinkError),
}

pub struct ConnectionManager {
    config: ConnectionConfig,
}

impl ConnectionManager {
    pub fn new(config: ConnectionConfig) -> Self {
        Self { config }
    }

    /// Establish a link and enable RX notifications on it.
    ///
    /// Blocks for up to `max_attempts` connection attempts with
    /// `retry_delay` between them.
    pub fn connect(
        &self,
        transport: &dyn Transport,
        address: &str,
    ) -> Result<Box<dyn Link>, ConnectError> {
        let mut retries = self.config.max_attempts.max(1);
        let mut attempt = 0;

        let mut link = loop {
            attempt += 1;
            info!("Connecting to {} (attempt {})...", address, attempt);
            match transport.connect(address) {
                Ok(link) => break link,
                Err(e) => {
                    retries -= 1;
                    warn!("Connect failed, retries left: {} ({})", retries, e);
                    if retries == 0 {
                        return Err(ConnectError::ConnectionFailed {
                            address: address.to_string(),
                            attempts: attempt,
                            last: e,
                        });
                    }
                    sleep(self.config.retry_delay);
                }
            }
        };

        // Notifications must be on before the telemetry loop starts polling
        link.enable_notifications(NUS_RX_CHAR_UUID)
            .map_err(ConnectError::DescriptorNotFound)?;

        info!("Device {} connected", address);
        Ok(link)
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new(ConnectionConfig::default())
    }
}
