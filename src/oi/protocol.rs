// OI (Open Interface) serial protocol
//
// Commands are an opcode byte followed by fixed big-endian operands.
// Sensor responses carry no header or checksum: the reply is just the
// concatenated packet bytes, so the layout is known only from the request.

use std::sync::MutexGuard;
use tracing::debug;

use super::transport::Transport;
use crate::error::{OiError, ProtocolError, Result};

/// Command opcodes
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Start = 128, // enables the interface in passive mode
    Safe = 131,
    Full = 132,
    Clean = 135,
    Drive = 137,    // velocity i16 BE, radius i16 BE
    Sensors = 142,  // single packet id
    SeekDock = 143,
    QueryList = 149, // count, ids...
}

/// Radius sentinel meaning "drive straight"
pub const RADIUS_STRAIGHT: i16 = 32767;
/// Radius values for turning in place
pub const RADIUS_SPIN_CCW: i16 = 1;
pub const RADIUS_SPIN_CW: i16 = -1;

/// One wire-level drive command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriveCommand {
    pub velocity: i16, // mm/s
    pub radius: i16,   // mm
}

impl DriveCommand {
    pub const STOP: DriveCommand = DriveCommand {
        velocity: 0,
        radius: 0,
    };

    pub fn new(velocity: i16, radius: i16) -> Self {
        Self { velocity, radius }
    }

    pub fn is_stop(&self) -> bool {
        *self == Self::STOP
    }

    pub fn to_frame(self) -> [u8; 5] {
        let v = self.velocity.to_be_bytes();
        let r = self.radius.to_be_bytes();
        [Opcode::Drive as u8, v[0], v[1], r[0], r[1]]
    }
}

/// Response size in bytes for a sensor packet id
pub fn packet_size(id: u8) -> Option<usize> {
    let size = match id {
        0 => 26,
        1 => 10,
        2 => 6,
        3 => 10,
        4 => 14,
        5 => 12,
        6 => 52,
        7..=18 => 1,
        19 | 20 => 2,
        21 => 1,
        22 | 23 => 2,
        24 => 1,
        25..=31 => 2,
        32 => 1,
        33 => 2,
        34..=38 => 1,
        39..=44 => 2,
        45 => 1,
        46..=51 => 2,
        52 | 53 => 1,
        54..=57 => 2,
        58 => 1,
        100 => 80,
        101 => 28,
        106 => 12,
        107 => 9,
        _ => return None,
    };
    Some(size)
}

/// Build a query-list frame: opcode, count, ids
pub fn query_list_frame(ids: &[u8]) -> Result<Vec<u8>> {
    let count = u8::try_from(ids.len())
        .map_err(|_| OiError::InvalidArgument(format!("too many packets: {}", ids.len())))?;
    let mut frame = Vec::with_capacity(2 + ids.len());
    frame.push(Opcode::QueryList as u8);
    frame.push(count);
    frame.extend_from_slice(ids);
    Ok(frame)
}

/// Protocol client over a locked connection
///
/// Holding a client means holding the connection lock, so a command and the
/// read of its reply can never interleave with another caller's traffic.
pub struct ProtocolClient<'a> {
    port: &'a str,
    transport: MutexGuard<'a, Box<dyn Transport>>,
}

impl<'a> ProtocolClient<'a> {
    pub(crate) fn new(port: &'a str, transport: MutexGuard<'a, Box<dyn Transport>>) -> Self {
        Self { port, transport }
    }

    pub fn port(&self) -> &str {
        self.port
    }

    fn transport_error(&self, op: &'static str, source: std::io::Error) -> OiError {
        OiError::Transport {
            op,
            port: self.port.to_string(),
            source,
        }
    }

    fn protocol_error(&self, source: ProtocolError) -> OiError {
        OiError::Protocol {
            port: self.port.to_string(),
            source,
        }
    }

    fn write(&mut self, op: &'static str, frame: &[u8]) -> Result<()> {
        debug!("{} on {}: {:02X?}", op, self.port, frame);
        self.transport
            .write_all(frame)
            .map_err(|e| self.transport_error(op, e))
    }

    /// Read exactly `len` bytes, each read bounded by the transport timeout
    fn read_bounded(&mut self, op: &'static str, len: usize) -> Result<Vec<u8>> {
        let mut buffer = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            let n = self
                .transport
                .read(&mut buffer[filled..])
                .map_err(|e| self.transport_error(op, e))?;
            if n == 0 {
                return Err(self.protocol_error(ProtocolError::ShortRead {
                    expected: len,
                    got: filled,
                }));
            }
            filled += n;
        }
        Ok(buffer)
    }

    fn flush_stale(&mut self) -> Result<()> {
        self.transport
            .flush_receive_buffer()
            .map_err(|e| self.transport_error("flush receive buffer", e))
    }

    pub fn send_simple_command(&mut self, opcode: Opcode) -> Result<()> {
        let op = match opcode {
            Opcode::Start => "start",
            Opcode::Safe => "safe mode",
            Opcode::Full => "full mode",
            Opcode::Clean => "clean",
            Opcode::SeekDock => "seek dock",
            Opcode::Drive | Opcode::Sensors | Opcode::QueryList => {
                return Err(OiError::InvalidArgument(format!(
                    "{:?} requires operands",
                    opcode
                )));
            }
        };
        self.write(op, &[opcode as u8])
    }

    /// Enter passive mode (enables the interface)
    pub fn start(&mut self) -> Result<()> {
        self.send_simple_command(Opcode::Start)
    }

    pub fn safe(&mut self) -> Result<()> {
        self.send_simple_command(Opcode::Safe)
    }

    pub fn full(&mut self) -> Result<()> {
        self.send_simple_command(Opcode::Full)
    }

    pub fn clean(&mut self) -> Result<()> {
        self.send_simple_command(Opcode::Clean)
    }

    pub fn seek_dock(&mut self) -> Result<()> {
        self.send_simple_command(Opcode::SeekDock)
    }

    pub fn drive(&mut self, velocity: i16, radius: i16) -> Result<()> {
        self.write("drive", &DriveCommand::new(velocity, radius).to_frame())
    }

    pub fn send_drive(&mut self, command: DriveCommand) -> Result<()> {
        self.drive(command.velocity, command.radius)
    }

    pub fn stop(&mut self) -> Result<()> {
        self.write("stop", &DriveCommand::STOP.to_frame())
    }

    /// Query a single sensor packet
    pub fn sensor(&mut self, id: u8) -> Result<Vec<u8>> {
        let size = packet_size(id)
            .ok_or_else(|| self.protocol_error(ProtocolError::UnknownPacket { id }))?;
        self.flush_stale()?;
        self.write("sensor query", &[Opcode::Sensors as u8, id])?;
        self.read_bounded("sensor query", size)
    }

    /// Query several packets at once, returning one segment per id in request order
    ///
    /// A short reply is a `ShortRead`; a full one always splits into exactly
    /// `ids.len()` segments.
    pub fn query_list(&mut self, ids: &[u8]) -> Result<Vec<Vec<u8>>> {
        let sizes = ids
            .iter()
            .map(|&id| packet_size(id).ok_or(ProtocolError::UnknownPacket { id }))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| self.protocol_error(e))?;
        let frame = query_list_frame(ids)?;

        self.flush_stale()?;
        self.write("query list", &frame)?;

        let total: usize = sizes.iter().sum();
        let data = self.read_bounded("query list", total)?;

        // Sizes are fixed per id, so a full read always yields one segment per id;
        // the segment count is checked again when the reply is decoded
        let mut segments = Vec::with_capacity(sizes.len());
        let mut offset = 0;
        for size in sizes {
            segments.push(data[offset..offset + size].to_vec());
            offset += size;
        }
        Ok(segments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oi::connection::Connection;
    use crate::oi::mock::MockTransport;

    fn connection(mock: &MockTransport) -> Connection {
        Connection::new("/dev/mock", Box::new(mock.clone()))
    }

    #[test]
    fn test_drive_frame_is_big_endian() {
        let frame = DriveCommand::new(-200, 500).to_frame();
        assert_eq!(frame, [137, 0xFF, 0x38, 0x01, 0xF4]);

        let straight = DriveCommand::new(500, RADIUS_STRAIGHT).to_frame();
        assert_eq!(straight, [137, 0x01, 0xF4, 0x7F, 0xFF]);
    }

    #[test]
    fn test_stop_is_zero_drive() {
        assert_eq!(DriveCommand::STOP.to_frame(), [137, 0, 0, 0, 0]);
    }

    #[test]
    fn test_query_list_frame() {
        let frame = query_list_frame(&[7, 19, 35]).unwrap();
        assert_eq!(frame, vec![149, 3, 7, 19, 35]);
    }

    #[test]
    fn test_simple_commands() {
        let mock = MockTransport::new();
        let conn = connection(&mock);
        let mut client = conn.lock();
        client.start().unwrap();
        client.safe().unwrap();
        client.full().unwrap();
        client.clean().unwrap();
        client.seek_dock().unwrap();
        assert!(client.send_simple_command(Opcode::Drive).is_err());

        assert_eq!(
            mock.frames(),
            vec![vec![128], vec![131], vec![132], vec![135], vec![143]]
        );
    }

    #[test]
    fn test_write_failure_is_transport_error() {
        let mock = MockTransport::new();
        mock.set_fail_writes(true);
        let conn = connection(&mock);

        let err = conn.lock().drive(100, RADIUS_STRAIGHT).unwrap_err();
        match err {
            OiError::Transport { op, port, .. } => {
                assert_eq!(op, "drive");
                assert_eq!(port, "/dev/mock");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_query_list_splits_segments() {
        let mock = MockTransport::new();
        mock.queue_reply(&[0x03, 0xFF, 0x38, 0x02]);
        let conn = connection(&mock);

        let segments = conn.lock().query_list(&[7, 19, 35]).unwrap();
        assert_eq!(segments, vec![vec![0x03], vec![0xFF, 0x38], vec![0x02]]);
        assert_eq!(mock.frames(), vec![vec![149, 3, 7, 19, 35]]);
    }

    #[test]
    fn test_query_list_one_segment_per_id() {
        let mock = MockTransport::new();
        mock.queue_reply(&[0x00, 0x64, 0x01, 0x00, 0xC8]);
        let conn = connection(&mock);

        // Repeated ids still map to their own segments, in request order
        let ids = [39, 7, 39];
        let segments = conn.lock().query_list(&ids).unwrap();
        assert_eq!(segments.len(), ids.len());
        assert_eq!(segments, vec![vec![0x00, 0x64], vec![0x01], vec![0x00, 0xC8]]);
    }

    #[test]
    fn test_query_list_short_read() {
        let mock = MockTransport::new();
        mock.queue_reply(&[0x01, 0x00]);
        let conn = connection(&mock);

        let err = conn.lock().query_list(&[7, 19, 35]).unwrap_err();
        match err {
            OiError::Protocol { source, .. } => {
                assert_eq!(source, ProtocolError::ShortRead { expected: 4, got: 2 })
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_query_list_discards_stale_bytes() {
        let mock = MockTransport::new();
        mock.inject_stale(&[0xAA, 0xBB, 0xCC]);
        mock.queue_reply(&[0x00, 0x0A]);
        let conn = connection(&mock);

        let segments = conn.lock().query_list(&[39]).unwrap();
        assert_eq!(segments, vec![vec![0x00, 0x0A]]);
        assert_eq!(mock.receive_flushes(), 1);
    }

    #[test]
    fn test_unknown_packet_rejected_before_io() {
        let mock = MockTransport::new();
        let conn = connection(&mock);

        let err = conn.lock().query_list(&[7, 200]).unwrap_err();
        assert!(matches!(
            err,
            OiError::Protocol {
                source: ProtocolError::UnknownPacket { id: 200 },
                ..
            }
        ));
        assert!(mock.frames().is_empty());
    }

    #[test]
    fn test_single_sensor_query() {
        let mock = MockTransport::new();
        mock.queue_reply(&[0xFF, 0x9C]);
        let conn = connection(&mock);

        let data = conn.lock().sensor(39).unwrap();
        assert_eq!(i16::from_be_bytes([data[0], data[1]]), -100);
        assert_eq!(mock.frames(), vec![vec![142, 39]]);
    }

    #[test]
    fn test_packet_sizes() {
        assert_eq!(packet_size(7), Some(1));
        assert_eq!(packet_size(19), Some(2));
        assert_eq!(packet_size(24), Some(1));
        assert_eq!(packet_size(34), Some(1));
        assert_eq!(packet_size(40), Some(2));
        assert_eq!(packet_size(6), Some(52));
        assert_eq!(packet_size(59), None);
    }
}
