pub(crate) fn num_bytes_for_bits(count: u16) -> usize {
    (count as usize + 7) / 8
}

/// Packs bits LSB-first, bit `i` landing in `bytes[i / 8]` at position `i % 8`
pub(crate) fn pack_bits(bits: &[bool], dest: &mut Vec<u8>) {
    for chunk in bits.chunks(8) {
        let byte = chunk
            .iter()
            .enumerate()
            .fold(0u8, |acc, (pos, bit)| if *bit { acc | (1 << pos) } else { acc });
        dest.push(byte);
    }
}

/// Inverse of [`pack_bits`], yielding exactly `count` values
pub(crate) fn unpack_bits(bytes: &[u8], count: u16) -> impl Iterator<Item = bool> + '_ {
    (0..count as usize).map(move |i| match bytes.get(i / 8) {
        Some(byte) => (byte & (1 << (i % 8))) != 0,
        None => false,
    })
}
