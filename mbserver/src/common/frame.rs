use crate::common::buffer::ReadBuffer;
use crate::common::phys::PhysLayer;
use crate::decode::{DecodeLevel, FrameDecodeLevel};
use crate::error::{FrameParseError, RequestError};
use crate::exception::ExceptionCode;
use crate::serial::frame::{RtuDisplay, RtuFrame, RtuParser};
use crate::tcp::frame::{MbapDisplay, MbapParser, TcpFrame};
use crate::types::UnitId;

/// A single request or reply, independent of the transport it travels on
///
/// Function handlers see a frame only through the accessors below, so the same handler
/// serves TCP, TLS and serial clients.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// Frame with an MBAP header, used on TCP and TLS
    Tcp(TcpFrame),
    /// Frame with an address and a trailing CRC, used on serial lines
    Rtu(RtuFrame),
}

impl Frame {
    /// Unit identifier on TCP or the device address on serial
    pub fn unit_id(&self) -> UnitId {
        match self {
            Frame::Tcp(x) => x.unit_id(),
            Frame::Rtu(x) => x.address(),
        }
    }

    /// Function code
    pub fn function(&self) -> u8 {
        match self {
            Frame::Tcp(x) => x.function(),
            Frame::Rtu(x) => x.function(),
        }
    }

    /// Payload following the function code
    pub fn data(&self) -> &[u8] {
        match self {
            Frame::Tcp(x) => x.data(),
            Frame::Rtu(x) => x.data(),
        }
    }

    /// Replace the payload
    pub fn set_data(&mut self, data: Vec<u8>) {
        match self {
            Frame::Tcp(x) => x.set_data(data),
            Frame::Rtu(x) => x.set_data(data),
        }
    }

    /// Turn the frame into an exception reply for the current function code
    pub fn set_exception(&mut self, ex: ExceptionCode) {
        match self {
            Frame::Tcp(x) => x.set_exception(ex),
            Frame::Rtu(x) => x.set_exception(ex),
        }
    }

    /// Start a reply: same header and function code, empty payload
    pub fn copy(&self) -> Self {
        match self {
            Frame::Tcp(x) => Frame::Tcp(x.copy()),
            Frame::Rtu(x) => Frame::Rtu(x.copy()),
        }
    }

    /// Serialize the frame for its transport
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Frame::Tcp(x) => x.to_bytes(),
            Frame::Rtu(x) => x.to_bytes(),
        }
    }

    pub(crate) fn display(&self, level: FrameDecodeLevel) -> FrameDisplay<'_> {
        FrameDisplay { level, frame: self }
    }
}

impl From<TcpFrame> for Frame {
    fn from(frame: TcpFrame) -> Self {
        Frame::Tcp(frame)
    }
}

impl From<RtuFrame> for Frame {
    fn from(frame: RtuFrame) -> Self {
        Frame::Rtu(frame)
    }
}

pub(crate) struct FrameDisplay<'a> {
    level: FrameDecodeLevel,
    frame: &'a Frame,
}

impl std::fmt::Display for FrameDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.frame {
            Frame::Tcp(x) => write!(f, "MBAP {}", MbapDisplay::new(self.level, x)),
            Frame::Rtu(x) => write!(f, "RTU {}", RtuDisplay::new(self.level, x)),
        }
    }
}

/// Finds the boundaries of complete frames in a byte stream
pub(crate) trait FrameParser {
    fn max_frame_size(&self) -> usize;

    /// Parse bytes from the buffer. Bytes that are consumed are discarded.
    ///
    /// Err implies the input data is invalid
    /// Ok(None) implies that more data is required to complete parsing
    /// Ok(Some(..)) will contain a fully parsed frame
    fn parse(&mut self, cursor: &mut ReadBuffer) -> Result<Option<Frame>, FrameParseError>;

    /// Return to the state of looking for the start of a frame
    fn reset(&mut self);
}

pub(crate) struct FramedReader {
    parser: Box<dyn FrameParser + Send>,
    buffer: ReadBuffer,
}

impl FramedReader {
    pub(crate) fn tcp() -> Self {
        Self::new(Box::new(MbapParser::new()))
    }

    pub(crate) fn rtu() -> Self {
        Self::new(Box::new(RtuParser::new()))
    }

    fn new(parser: Box<dyn FrameParser + Send>) -> Self {
        let size = parser.max_frame_size();
        Self {
            parser,
            buffer: ReadBuffer::new(size),
        }
    }

    /// Drop everything buffered so the next frame is read from fresh bytes
    pub(crate) fn discard(&mut self) {
        self.parser.reset();
        self.buffer.clear();
    }

    pub(crate) async fn next_frame(
        &mut self,
        io: &mut PhysLayer,
        decode_level: DecodeLevel,
    ) -> Result<Frame, RequestError> {
        loop {
            match self.parser.parse(&mut self.buffer)? {
                Some(frame) => {
                    if decode_level.frame.enabled() {
                        tracing::info!("RX - {}", frame.display(decode_level.frame));
                    }
                    return Ok(frame);
                }
                None => {
                    self.buffer.read_some(io, decode_level.physical).await?;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accessors_delegate_to_the_transport_frame() {
        let mut frame = Frame::from(RtuFrame::new(UnitId::new(0x11), 0x03, vec![0x00, 0x01]));
        assert_eq!(frame.unit_id(), UnitId::new(0x11));
        assert_eq!(frame.function(), 0x03);
        assert_eq!(frame.data(), &[0x00, 0x01]);

        frame.set_data(vec![0x02, 0xCA, 0xFE]);
        assert_eq!(frame.data(), &[0x02, 0xCA, 0xFE]);
    }

    #[test]
    fn copy_keeps_the_header_of_either_variant() {
        let tcp = Frame::from(TcpFrame::new(0x0102, UnitId::new(0x05), 0x04, vec![0x00]));
        match tcp.copy() {
            Frame::Tcp(x) => {
                assert_eq!(x.tx_id(), 0x0102);
                assert_eq!(x.unit_id(), UnitId::new(0x05));
                assert_eq!(x.function(), 0x04);
                assert!(x.data().is_empty());
            }
            Frame::Rtu(_) => panic!("variant changed"),
        }

        let rtu = Frame::from(RtuFrame::new(UnitId::new(0x05), 0x04, vec![0x00]));
        assert_eq!(rtu.copy(), Frame::from(RtuFrame::new(UnitId::new(0x05), 0x04, vec![])));
    }

    #[test]
    fn exception_is_the_same_on_both_transports() {
        let mut tcp = Frame::from(TcpFrame::new(1, UnitId::new(1), 0x10, vec![]));
        let mut rtu = Frame::from(RtuFrame::new(UnitId::new(1), 0x10, vec![]));
        tcp.set_exception(ExceptionCode::IllegalDataValue);
        rtu.set_exception(ExceptionCode::IllegalDataValue);
        assert_eq!(tcp.function(), 0x90);
        assert_eq!(rtu.function(), 0x90);
        assert_eq!(tcp.data(), &[0x03]);
        assert_eq!(rtu.data(), &[0x03]);
    }
}
