// Shared serial connections, one per port
//
// Several logical drivers (a base and a sensor, say) can sit on the same
// physical port. The registry hands them the same Connection and counts
// references; the transport closes when the last Arc is dropped.
// A reference is counted from the moment acquire starts, so concurrent
// acquirers of a new port all join the single open.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info};

use super::protocol::ProtocolClient;
use super::transport::{SerialTransport, Transport};
use crate::config::DEFAULT_READ_TIMEOUT;
use crate::error::{OiError, Result};

/// A transport plus the lock that serializes all traffic on it
pub struct Connection {
    port: String,
    transport: Mutex<Box<dyn Transport>>,
}

impl Connection {
    pub fn new(port: impl Into<String>, transport: Box<dyn Transport>) -> Self {
        Self {
            port: port.into(),
            transport: Mutex::new(transport),
        }
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    /// Take the connection lock; it is held until the client is dropped
    pub fn lock(&self) -> ProtocolClient<'_> {
        let guard = self
            .transport
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        ProtocolClient::new(&self.port, guard)
    }
}

type Opener = dyn Fn(&str) -> std::io::Result<Box<dyn Transport>> + Send + Sync;

/// Per-port gate: the first acquirer opens, later ones wait on it and share
type Slot = Arc<Mutex<Option<Arc<Connection>>>>;

struct Entry {
    slot: Slot,
    refs: usize,
}

/// Reference-counted map from port identifier to connection
///
/// The map lock only covers lookups and ref counting. Opening a port runs
/// under that port's own gate, so other ports are never blocked by it and a
/// port is opened at most once while it has holders.
pub struct ConnectionRegistry {
    opener: Box<Opener>,
    read_timeout: Duration,
    entries: Mutex<HashMap<String, Entry>>,
}

impl ConnectionRegistry {
    /// Registry that opens real serial ports
    pub fn new() -> Self {
        Self::with_opener(|port| {
            let transport = SerialTransport::open(port)?;
            Ok(Box::new(transport) as Box<dyn Transport>)
        })
    }

    /// Registry with a custom transport factory
    pub fn with_opener<F>(opener: F) -> Self
    where
        F: Fn(&str) -> std::io::Result<Box<dyn Transport>> + Send + Sync + 'static,
    {
        Self {
            opener: Box::new(opener),
            read_timeout: DEFAULT_READ_TIMEOUT,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Share the connection for `port`, opening it on first use
    pub fn acquire(&self, port: &str) -> Result<Arc<Connection>> {
        let slot = {
            let mut entries = self.entries();
            let entry = entries.entry(port.to_string()).or_insert_with(|| Entry {
                slot: Arc::default(),
                refs: 0,
            });
            entry.refs += 1;
            Arc::clone(&entry.slot)
        };

        let mut slot = slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(connection) = slot.as_ref() {
            debug!("Reusing connection on {} (refs={})", port, self.ref_count(port));
            return Ok(Arc::clone(connection));
        }

        match self.open(port) {
            Ok(connection) => {
                let connection = Arc::new(connection);
                *slot = Some(Arc::clone(&connection));
                info!("Opened OI connection on {}", port);
                Ok(connection)
            }
            Err(e) => {
                // Waiters behind this gate retry the open themselves
                drop(slot);
                self.release(port);
                Err(e)
            }
        }
    }

    fn open(&self, port: &str) -> Result<Connection> {
        let mut transport = (self.opener)(port).map_err(|e| OiError::Connection {
            port: port.to_string(),
            reason: format!("failed to open serial connection: {e}"),
        })?;
        transport
            .set_read_timeout(self.read_timeout)
            .map_err(|e| OiError::Connection {
                port: port.to_string(),
                reason: format!("failed to set read timeout: {e}"),
            })?;

        let connection = Connection::new(port, transport);
        connection
            .lock()
            .start()
            .map_err(|e| OiError::Connection {
                port: port.to_string(),
                reason: format!("failed to start OI: {e}"),
            })?;
        Ok(connection)
    }

    /// Drop one reference; the entry goes away when none remain.
    /// Returns true if this call removed the entry.
    pub fn release(&self, port: &str) -> bool {
        let mut entries = self.entries();
        let Some(entry) = entries.get_mut(port) else {
            return false;
        };
        entry.refs = entry.refs.saturating_sub(1);
        if entry.refs == 0 {
            entries.remove(port);
            info!("Released last reference to {}", port);
            true
        } else {
            debug!("Released connection on {} (refs={})", port, entry.refs);
            false
        }
    }

    pub fn ref_count(&self, port: &str) -> usize {
        self.entries().get(port).map_or(0, |entry| entry.refs)
    }

    /// Forget every entry; transports close once their drivers drop them
    pub fn shutdown(&self) {
        let mut entries = self.entries();
        if !entries.is_empty() {
            info!("Shutting down {} connection(s)", entries.len());
        }
        entries.clear();
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
