use thiserror::Error;

/// Errors returned by the serial, dict, and message codecs.
#[derive(Debug, Error)]
pub enum WireError {
    /// Underlying byte source faulted or ended mid-value.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    /// First byte of a dict payload was not the dict marker.
    #[error("invalid dict header: {0:#04x}")]
    InvalidHeader(u8),
    /// Message type byte outside the known set.
    #[error("invalid message type: {0}")]
    InvalidMessageType(u8),
    /// Serial type byte outside the known set.
    #[error("unknown serial type: {0:#04x}")]
    UnknownSerialType(u8),
    /// Body referenced a key id never declared to this reader.
    #[error("unknown key id: {0}")]
    UnknownKeyId(u16),
    /// Value does not fit the wire encoding's length fields.
    #[error("encode error: {0}")]
    Encode(&'static str),
}

impl WireError {
    /// True when the error is a clean exhaustion of the byte source.
    pub fn is_unexpected_eof(&self) -> bool {
        matches!(self, Self::Io(err) if err.kind() == std::io::ErrorKind::UnexpectedEof)
    }
}
