/// Errors that occur while decoding a frame received from a TCP stream or a serial port
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FrameParseError {
    /// Buffer is shorter than the 7-byte MBAP header plus the function code
    TcpFrameTooShort(usize),
    /// Received TCP frame with a non-Modbus protocol id
    UnknownProtocolId(u16),
    /// MBAP length field must at least cover the unit id and function code
    MbapLengthTooSmall(usize),
    /// MBAP length field exceeds the maximum allowed value
    MbapLengthTooBig(usize, usize), // actual size and the maximum size
    /// MBAP length field doesn't match the number of bytes that follow it
    MbapLengthMismatch(usize, usize), // declared length and the actual length
    /// Buffer is shorter than the minimum serial frame
    RtuFrameTooShort(usize),
    /// Frame exceeds the maximum allowed size
    FrameLengthTooBig(usize, usize), // actual size and the maximum size
    /// Trailing CRC doesn't match the CRC computed over the frame
    CrcValidationFailure(u16, u16), // received and expected
}

impl std::error::Error for FrameParseError {}

impl std::fmt::Display for FrameParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameParseError::TcpFrameTooShort(len) => {
                write!(f, "TCP frame of {len} bytes is shorter than the MBAP header")
            }
            FrameParseError::UnknownProtocolId(id) => {
                write!(f, "received TCP frame with non-Modbus protocol id: {id}")
            }
            FrameParseError::MbapLengthTooSmall(len) => {
                write!(f, "received TCP frame with length field too small: {len}")
            }
            FrameParseError::MbapLengthTooBig(size, max) => write!(
                f,
                "received TCP frame with length ({size}) that exceeds max allowed size ({max})"
            ),
            FrameParseError::MbapLengthMismatch(declared, actual) => write!(
                f,
                "TCP frame declares a length of {declared} but {actual} bytes are present"
            ),
            FrameParseError::RtuFrameTooShort(len) => {
                write!(f, "serial frame of {len} bytes is shorter than the minimum frame")
            }
            FrameParseError::FrameLengthTooBig(size, max) => write!(
                f,
                "received frame with length ({size}) that exceeds max allowed size ({max})"
            ),
            FrameParseError::CrcValidationFailure(received, expected) => write!(
                f,
                "received incorrect CRC value {received:#06X}, expected {expected:#06X}"
            ),
        }
    }
}

/// Errors that terminate a single session (TCP connection or serial port loop)
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RequestError {
    /// An I/O error occurred on the underlying stream
    Io(std::io::ErrorKind),
    /// A frame could not be decoded
    BadFrame(FrameParseError),
    /// The server is shutting down
    Shutdown,
}

impl std::error::Error for RequestError {}

impl std::fmt::Display for RequestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestError::Io(kind) => write!(f, "I/O error: {kind}"),
            RequestError::BadFrame(err) => write!(f, "bad frame: {err}"),
            RequestError::Shutdown => f.write_str("the server is shutting down"),
        }
    }
}

impl From<std::io::Error> for RequestError {
    fn from(err: std::io::Error) -> Self {
        RequestError::Io(err.kind())
    }
}

impl From<FrameParseError> for RequestError {
    fn from(err: FrameParseError) -> Self {
        RequestError::BadFrame(err)
    }
}

/// Errors reported synchronously when starting a transport
#[derive(Debug)]
pub enum ServerError {
    /// The listen address could not be bound
    Bind(std::io::Error),
    /// The serial device could not be opened
    SerialOpen(std::io::Error),
    /// The server has already been shut down
    Shutdown,
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServerError::Bind(err) => Some(err),
            ServerError::SerialOpen(err) => Some(err),
            ServerError::Shutdown => None,
        }
    }
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerError::Bind(err) => write!(f, "unable to bind listener: {err}"),
            ServerError::SerialOpen(err) => write!(f, "unable to open serial port: {err}"),
            ServerError::Shutdown => f.write_str("the server has been shut down"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_keep_their_kind() {
        let err: RequestError = std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into();
        assert_eq!(err, RequestError::Io(std::io::ErrorKind::UnexpectedEof));
    }
}
