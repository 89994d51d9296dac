use crate::common::buffer::ReadBuffer;
use crate::common::frame::{Frame, FrameParser};
use crate::common::phys::format_bytes;
use crate::decode::FrameDecodeLevel;
use crate::error::FrameParseError;
use crate::exception::ExceptionCode;
use crate::types::UnitId;

pub(crate) mod constants {
    /// tx id, protocol id, length and unit id
    pub(crate) const HEADER_LENGTH: usize = 7;
    /// bytes preceding the length field (inclusive of the field itself)
    pub(crate) const PREFIX_LENGTH: usize = 6;
    /// unit id + function code
    pub(crate) const MIN_LENGTH_FIELD: usize = 2;
    // includes the 1 byte unit id
    pub(crate) const MAX_LENGTH_FIELD: usize = crate::constants::MAX_PDU_LENGTH + 1;
    pub(crate) const MAX_FRAME_LENGTH: usize = PREFIX_LENGTH + MAX_LENGTH_FIELD;
}

/// A frame carried over TCP or TLS, prefixed with the 7-byte MBAP header
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TcpFrame {
    tx_id: u16,
    protocol_id: u16,
    length: u16,
    unit_id: UnitId,
    function: u8,
    data: Vec<u8>,
}

impl TcpFrame {
    /// Construct a frame with a protocol id of zero and a length matching the payload
    pub fn new(tx_id: u16, unit_id: UnitId, function: u8, data: Vec<u8>) -> Self {
        let mut frame = Self {
            tx_id,
            protocol_id: 0,
            length: 0,
            unit_id,
            function,
            data: Vec::new(),
        };
        frame.set_data(data);
        frame
    }

    /// Decode a complete frame, validating the protocol id and the declared length
    pub fn decode(raw: &[u8]) -> Result<Self, FrameParseError> {
        let (header, pdu) = match (
            raw.get(..constants::HEADER_LENGTH),
            raw.get(constants::HEADER_LENGTH..),
        ) {
            (Some(header), Some(pdu)) if !pdu.is_empty() => (header, pdu),
            _ => return Err(FrameParseError::TcpFrameTooShort(raw.len())),
        };

        let tx_id = u16::from_be_bytes([header[0], header[1]]);
        let protocol_id = u16::from_be_bytes([header[2], header[3]]);
        let length = u16::from_be_bytes([header[4], header[5]]);
        let unit_id = UnitId::new(header[6]);

        if protocol_id != 0 {
            return Err(FrameParseError::UnknownProtocolId(protocol_id));
        }

        validate_length_field(length as usize)?;

        let actual = raw.len() - constants::PREFIX_LENGTH;
        if length as usize != actual {
            return Err(FrameParseError::MbapLengthMismatch(length as usize, actual));
        }

        Ok(Self {
            tx_id,
            protocol_id,
            length,
            unit_id,
            function: pdu[0],
            data: pdu[1..].to_vec(),
        })
    }

    /// Transaction identifier echoed in the reply
    pub fn tx_id(&self) -> u16 {
        self.tx_id
    }

    /// Protocol identifier, always zero for Modbus
    pub fn protocol_id(&self) -> u16 {
        self.protocol_id
    }

    /// Value of the length field: unit id, function code and payload
    pub fn length(&self) -> u16 {
        self.length
    }

    /// Unit identifier
    pub fn unit_id(&self) -> UnitId {
        self.unit_id
    }

    /// Function code
    pub fn function(&self) -> u8 {
        self.function
    }

    /// Payload following the function code
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Replace the payload, updating the length field
    ///
    /// The payload must be shorter than 253 bytes for the frame to be valid. The function
    /// table rejects larger replies before they reach a frame.
    pub fn set_data(&mut self, data: Vec<u8>) {
        self.length = (constants::MIN_LENGTH_FIELD + data.len()) as u16;
        self.data = data;
    }

    /// Turn the frame into an exception reply
    pub fn set_exception(&mut self, ex: ExceptionCode) {
        self.function |= 0x80;
        self.set_data(vec![ex.value()]);
    }

    /// Reply-in-progress preserving the header fields but not the payload
    pub fn copy(&self) -> Self {
        Self::new(self.tx_id, self.unit_id, self.function, Vec::new())
    }

    /// Serialize the frame
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(constants::HEADER_LENGTH + 1 + self.data.len());
        bytes.extend_from_slice(&self.tx_id.to_be_bytes());
        bytes.extend_from_slice(&self.protocol_id.to_be_bytes());
        bytes.extend_from_slice(&self.length.to_be_bytes());
        bytes.push(self.unit_id.value);
        bytes.push(self.function);
        bytes.extend_from_slice(&self.data);
        bytes
    }
}

fn validate_length_field(length: usize) -> Result<(), FrameParseError> {
    if length < constants::MIN_LENGTH_FIELD {
        return Err(FrameParseError::MbapLengthTooSmall(length));
    }

    if length > constants::MAX_LENGTH_FIELD {
        return Err(FrameParseError::MbapLengthTooBig(
            length,
            constants::MAX_LENGTH_FIELD,
        ));
    }

    Ok(())
}

/// Delimits MBAP frames on a stream using the declared length
pub(crate) struct MbapParser;

impl MbapParser {
    pub(crate) fn new() -> Self {
        Self
    }
}

impl FrameParser for MbapParser {
    fn max_frame_size(&self) -> usize {
        constants::MAX_FRAME_LENGTH
    }

    // the header is only peeked until the whole frame is buffered
    fn reset(&mut self) {}

    fn parse(&mut self, cursor: &mut ReadBuffer) -> Result<Option<Frame>, FrameParseError> {
        let prefix = match cursor.peek().get(..constants::PREFIX_LENGTH) {
            Some(x) => x,
            None => return Ok(None),
        };

        let protocol_id = u16::from_be_bytes([prefix[2], prefix[3]]);
        if protocol_id != 0 {
            return Err(FrameParseError::UnknownProtocolId(protocol_id));
        }

        let length = u16::from_be_bytes([prefix[4], prefix[5]]) as usize;
        validate_length_field(length)?;

        match cursor.read(constants::PREFIX_LENGTH + length) {
            Some(raw) => Ok(Some(Frame::Tcp(TcpFrame::decode(raw)?))),
            None => Ok(None),
        }
    }
}

pub(crate) struct MbapDisplay<'a> {
    level: FrameDecodeLevel,
    frame: &'a TcpFrame,
}

impl<'a> MbapDisplay<'a> {
    pub(crate) fn new(level: FrameDecodeLevel, frame: &'a TcpFrame) -> Self {
        MbapDisplay { level, frame }
    }
}

impl std::fmt::Display for MbapDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "tx_id: {:#06X} unit: {} len: {} (payload len = {})",
            self.frame.tx_id,
            self.frame.unit_id,
            self.frame.length,
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
