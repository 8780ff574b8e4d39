// Error types for OI communication and motion control

/// Malformed or incomplete device responses
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("short read: expected {expected} bytes, got {got}")]
    ShortRead { expected: usize, got: usize },

    #[error("unexpected packet count: expected {expected}, got {got}")]
    CountMismatch { expected: usize, got: usize },

    #[error("packet {id} has no known size")]
    UnknownPacket { id: u8 },

    #[error("packet {id} has {got} bytes, expected {expected}")]
    SegmentSize { id: u8, expected: usize, got: usize },
}

#[derive(Debug, thiserror::Error)]
pub enum OiError {
    /// Port open or mode entry failed while establishing a connection
    #[error("connection error on {port}: {reason}")]
    Connection { port: String, reason: String },

    #[error("{op} failed on {port}: {source}")]
    Transport {
        op: &'static str,
        port: String,
        #[source]
        source: std::io::Error,
    },

    #[error("protocol error on {port}: {source}")]
    Protocol {
        port: String,
        #[source]
        source: ProtocolError,
    },

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("operation deadline exceeded")]
    DeadlineExceeded,

    #[error("driver is closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, OiError>;
