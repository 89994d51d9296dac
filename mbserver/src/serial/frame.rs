use crate::common::buffer::ReadBuffer;
use crate::common::crc;
use crate::common::frame::{Frame, FrameParser};
use crate::common::phys::format_bytes;
use crate::decode::FrameDecodeLevel;
use crate::error::FrameParseError;
use crate::exception::ExceptionCode;
use crate::types::UnitId;

pub(crate) mod constants {
    pub(crate) const HEADER_LENGTH: usize = 1;
    pub(crate) const FUNCTION_CODE_LENGTH: usize = 1;
    pub(crate) const CRC_LENGTH: usize = 2;
    /// address, function code and CRC
    pub(crate) const MIN_FRAME_LENGTH: usize = HEADER_LENGTH + FUNCTION_CODE_LENGTH + CRC_LENGTH;
    pub(crate) const MAX_FRAME_LENGTH: usize =
        HEADER_LENGTH + crate::constants::MAX_PDU_LENGTH + CRC_LENGTH;
}

/// A frame carried over a serial line: address, function code, payload and a trailing CRC
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RtuFrame {
    address: UnitId,
    function: u8,
    data: Vec<u8>,
}

impl RtuFrame {
    /// Construct a frame. The CRC is computed when the frame is serialized.
    pub fn new(address: UnitId, function: u8, data: Vec<u8>) -> Self {
        Self {
            address,
            function,
            data,
        }
    }

    /// Decode a complete frame, validating its length and CRC
    pub fn decode(raw: &[u8]) -> Result<Self, FrameParseError> {
        if raw.len() < constants::MIN_FRAME_LENGTH {
            return Err(FrameParseError::RtuFrameTooShort(raw.len()));
        }

        if raw.len() > constants::MAX_FRAME_LENGTH {
            return Err(FrameParseError::FrameLengthTooBig(
                raw.len(),
                constants::MAX_FRAME_LENGTH,
            ));
        }

        let (body, trailer) = raw.split_at(raw.len() - constants::CRC_LENGTH);
        let received = u16::from_le_bytes([trailer[0], trailer[1]]);
        let expected = crc::checksum(body);
        if received != expected {
            return Err(FrameParseError::CrcValidationFailure(received, expected));
        }

        Ok(Self {
            address: UnitId::new(body[0]),
            function: body[1],
            data: body[2..].to_vec(),
        })
    }

    /// Device address
    pub fn address(&self) -> UnitId {
        self.address
    }

    /// Function code
    pub fn function(&self) -> u8 {
        self.function
    }

    /// Payload between the function code and the CRC
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Replace the payload
    pub fn set_data(&mut self, data: Vec<u8>) {
        self.data = data;
    }

    /// Turn the frame into an exception reply
    pub fn set_exception(&mut self, ex: ExceptionCode) {
        self.function |= 0x80;
        self.data = vec![ex.value()];
    }

    /// Reply-in-progress preserving the address and function code but not the payload
    pub fn copy(&self) -> Self {
        Self::new(self.address, self.function, Vec::new())
    }

    /// CRC over the address, function code and payload
    pub fn crc(&self) -> u16 {
        crc::checksum_parts(&[&[self.address.value, self.function], &self.data])
    }

    /// Serialize the frame, appending the CRC low byte first
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(constants::MIN_FRAME_LENGTH + self.data.len());
        bytes.push(self.address.value);
        bytes.push(self.function);
        bytes.extend_from_slice(&self.data);
        bytes.extend_from_slice(&self.crc().to_le_bytes());
        bytes
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LengthMode {
    /// The body after the function code has a fixed length
    Fixed(usize),
    /// The body is a byte count at the given offset after the function code, then that many bytes
    Offset(usize),
    /// The length can't be inferred, so the frame is everything that has been buffered
    Unknown,
}

#[derive(Clone, Copy)]
enum ParseState {
    Start,
    ReadFullBody(usize),
    ReadToOffsetForLength(usize),
}

/// Delimits request frames on a serial line using the function code to infer the length
pub(crate) struct RtuParser {
    state: ParseState,
}

impl RtuParser {
    pub(crate) fn new() -> Self {
        Self {
            state: ParseState::Start,
        }
    }

    // returns how to determine the length of the body of a request
    fn length_mode(function: u8) -> LengthMode {
        match function {
            // read coils, discrete inputs, holding registers, input registers
            0x01..=0x04 => LengthMode::Fixed(4),
            // write single coil, write single register
            0x05 | 0x06 => LengthMode::Fixed(4),
            // write multiple coils, write multiple registers
            0x0F | 0x10 => LengthMode::Offset(4),
            _ => LengthMode::Unknown,
        }
    }
}

impl FrameParser for RtuParser {
    fn max_frame_size(&self) -> usize {
        constants::MAX_FRAME_LENGTH
    }

    fn reset(&mut self) {
        self.state = ParseState::Start;
    }

    fn parse(&mut self, cursor: &mut ReadBuffer) -> Result<Option<Frame>, FrameParseError> {
        match self.state {
            ParseState::Start => {
                let function = match cursor.peek_at(1) {
                    Some(x) => x,
                    None => return Ok(None),
                };

                self.state = match Self::length_mode(function) {
                    LengthMode::Fixed(length) => ParseState::ReadFullBody(length),
                    LengthMode::Offset(offset) => ParseState::ReadToOffsetForLength(offset),
                    LengthMode::Unknown => {
                        if cursor.len() < constants::MIN_FRAME_LENGTH {
                            return Ok(None);
                        }
                        let length = cursor.len().min(constants::MAX_FRAME_LENGTH);
                        let raw = match cursor.read(length) {
                            Some(raw) => raw,
                            None => return Ok(None),
                        };
                        return RtuFrame::decode(raw).map(|x| Some(Frame::Rtu(x)));
                    }
                };

                self.parse(cursor)
            }
            ParseState::ReadToOffsetForLength(offset) => {
                let index = constants::HEADER_LENGTH + constants::FUNCTION_CODE_LENGTH + offset;
                let count = match cursor.peek_at(index) {
                    Some(x) => x as usize,
                    None => return Ok(None),
                };

                let total = constants::HEADER_LENGTH
                    + constants::FUNCTION_CODE_LENGTH
                    + offset
                    + 1
                    + count
                    + constants::CRC_LENGTH;
                if total > constants::MAX_FRAME_LENGTH {
                    self.reset();
                    return Err(FrameParseError::FrameLengthTooBig(
                        total,
                        constants::MAX_FRAME_LENGTH,
                    ));
                }

                self.state = ParseState::ReadFullBody(offset + 1 + count);
                self.parse(cursor)
            }
            ParseState::ReadFullBody(length) => {
                let total = constants::HEADER_LENGTH
                    + constants::FUNCTION_CODE_LENGTH
                    + length
                    + constants::CRC_LENGTH;
                let raw = match cursor.read(total) {
                    Some(raw) => raw,
                    None => return Ok(None),
                };
                self.reset();
                RtuFrame::decode(raw).map(|x| Some(Frame::Rtu(x)))
            }
        }
    }
}

pub(crate) struct RtuDisplay<'a> {
    level: FrameDecodeLevel,
    frame: &'a RtuFrame,
}

impl<'a> RtuDisplay<'a> {
    pub(crate) fn new(level: FrameDecodeLevel, frame: &'a RtuFrame) -> Self {
        RtuDisplay { level, frame }
    }
}

impl std::fmt::Display for RtuDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "address: {} crc: {:#06X} (payload len = {})",
            self.frame.address,
            self.frame.crc(),
            self.frame.data.len() + 1,
        )?;
        if self.level.payload_enabled() {
            let mut pdu = Vec::with_capacity(self.frame.data.len() + 1);
            pdu.push(self.frame.function);
            pdu.extend_from_slice(&self.frame.data);
            format_bytes(f, &pdu)?;
        }
        Ok(())
    }
}
