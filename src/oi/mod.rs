// OI serial link: transport, shared connections and the protocol client
//
// Provides:
// - A Transport trait with a serialport-backed implementation
// - A reference-counted registry sharing one connection per port
// - The protocol client (commands, drive frames, sensor queries)

pub mod connection;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod protocol;
pub mod transport;

pub use connection::{Connection, ConnectionRegistry};
#[cfg(any(test, feature = "mock"))]
pub use mock::MockTransport;
pub use protocol::{DriveCommand, Opcode, ProtocolClient, packet_size};
pub use transport::{SerialTransport, Transport};
