/// precomputes the CRC table as a constant!
const CRC: crc::Crc<u16> = crc::Crc::<u16>::new(&crc::CRC_16_MODBUS);

/// Computes the CRC-16 used to seal serial (RTU) frames
///
/// This is the reflected CRC-16 with polynomial 0xA001 and an initial value of 0xFFFF. The
/// low byte of the result is transmitted first.
///
/// ```
/// assert_eq!(mbserver::checksum(&[0x01, 0x04, 0x02, 0xFF, 0xFF]), 0x80B8);
/// ```
pub fn checksum(bytes: &[u8]) -> u16 {
    CRC.checksum(bytes)
}

/// Computes the checksum over several slices as if they were contiguous
pub(crate) fn checksum_parts(parts: &[&[u8]]) -> u16 {
    let mut digest = CRC.digest();
    for part in parts {
        digest.update(part);
    }
    digest.finalize()
}
