use scursor::ReadCursor;

use crate::constants::limits::MAX_RANGE_END;
use crate::exception::ExceptionCode;

/// Modbus unit identifier, just a type-safe wrapper around `u8`
///
/// On TCP this is the unit identifier of the MBAP header. On serial
/// it is the device address that leads every frame.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd, Ord, Eq, Hash)]
pub struct UnitId {
    /// underlying raw value
    pub value: u8,
}

impl UnitId {
    /// Create a new UnitId
    pub fn new(value: u8) -> Self {
        Self { value }
    }
}

impl std::fmt::Display for UnitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#04X}", self.value)
    }
}

/// Start and count tuple read from the leading four bytes of most requests
///
/// Unlike the ranges a client builds, a range decoded off the wire may describe
/// addresses that don't exist; [`AddressRange::validate`] checks it before any
/// memory is touched.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AddressRange {
    /// Starting address of the range
    pub start: u16,
    /// Count of elements in the range
    pub count: u16,
}

impl AddressRange {
    /// Create a new address range without validating it
    pub fn new(start: u16, count: u16) -> Self {
        Self { start, count }
    }

    /// Read the big-endian start and count from a payload
    pub fn parse(cursor: &mut ReadCursor) -> Result<Self, ExceptionCode> {
        let start = cursor
            .read_u16_be()
            .map_err(|_| ExceptionCode::IllegalDataValue)?;
        let count = cursor
            .read_u16_be()
            .map_err(|_| ExceptionCode::IllegalDataValue)?;
        Ok(Self::new(start, count))
    }

    /// Exclusive end of the range, computed without overflow
    pub fn end(&self) -> u32 {
        self.start as u32 + self.count as u32
    }

    /// Checks that the range ends at or below 65535, then that the count is in `1..=max`
    ///
    /// The address check comes first so an overflowing range is always reported as
    /// [`ExceptionCode::IllegalDataAddress`].
    pub fn validate(self, max: u16) -> Result<Self, ExceptionCode> {
        if self.end() > MAX_RANGE_END {
            return Err(ExceptionCode::IllegalDataAddress);
        }
        if self.count == 0 || self.count > max {
            return Err(ExceptionCode::IllegalDataValue);
        }
        Ok(self)
    }

    /// Converts to std::ops::Range
    pub fn to_std_range(self) -> std::ops::Range<usize> {
        let start = self.start as usize;
        start..(start + self.count as usize)
    }
}
