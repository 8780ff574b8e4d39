// Sensor client: queries the full packet list and decodes it

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

use super::decoder::{Reading, SENSOR_PACKETS, decode};
use crate::config::SensorConfig;
use crate::error::{OiError, Result};
use crate::oi::{Connection, ConnectionRegistry};

pub struct SensorDriver {
    registry: Arc<ConnectionRegistry>,
    connection: Arc<Connection>,
    closed: AtomicBool,
}

impl SensorDriver {
    pub fn new(registry: Arc<ConnectionRegistry>, config: &SensorConfig) -> Result<Self> {
        config.validate()?;
        let connection = registry.acquire(&config.serial_port)?;
        info!("Sensor initialized on {}", config.serial_port);
        Ok(Self {
            registry,
            connection,
            closed: AtomicBool::new(false),
        })
    }

    pub fn port(&self) -> &str {
        self.connection.port()
    }

    /// Query and decode every sensor packet
    ///
    /// Blocks for at most the transport read timeout per read while holding
    /// the connection lock.
    pub fn readings(&self) -> Result<Reading> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(OiError::Closed);
        }

        let segments = self.connection.lock().query_list(&SENSOR_PACKETS)?;
        let reading = decode(&segments).map_err(|source| OiError::Protocol {
            port: self.port().to_string(),
            source,
        })?;
        debug!("Decoded {} readings from {}", reading.len(), self.port());
        Ok(reading)
    }

    /// Release the shared connection; later calls are no-ops
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.registry.release(self.connection.port());
        info!("Sensor on {} closed", self.connection.port());
    }
}

impl Drop for SensorDriver {
    fn drop(&mut self) {
        self.close();
    }
}
