use scursor::ReadCursor;

use crate::common::bits::{num_bytes_for_bits, pack_bits, unpack_bits};
use crate::common::frame::Frame;
use crate::constants::coil;
use crate::constants::limits::*;
use crate::exception::ExceptionCode;
use crate::server::memory::Memory;
use crate::types::AddressRange;

// every field a default handler reads must be present
fn short_payload<T>(_: T) -> ExceptionCode {
    ExceptionCode::IllegalDataValue
}

fn read_bits(space: &[bool], payload: &[u8]) -> Result<Vec<u8>, ExceptionCode> {
    let mut cursor = ReadCursor::new(payload);
    let range = AddressRange::parse(&mut cursor)?.validate(MAX_READ_COILS_COUNT)?;
    let bits = space
        .get(range.to_std_range())
        .ok_or(ExceptionCode::IllegalDataAddress)?;

    let byte_count = num_bytes_for_bits(range.count);
    let mut reply = Vec::with_capacity(1 + byte_count);
    reply.push(byte_count as u8);
    pack_bits(bits, &mut reply);
    Ok(reply)
}

fn read_registers(space: &[u16], payload: &[u8]) -> Result<Vec<u8>, ExceptionCode> {
    let mut cursor = ReadCursor::new(payload);
    let range = AddressRange::parse(&mut cursor)?.validate(MAX_READ_REGISTERS_COUNT)?;
    let registers = space
        .get(range.to_std_range())
        .ok_or(ExceptionCode::IllegalDataAddress)?;

    let mut reply = Vec::with_capacity(1 + 2 * registers.len());
    reply.push((2 * registers.len()) as u8);
    for value in registers {
        reply.extend_from_slice(&value.to_be_bytes());
    }
    Ok(reply)
}

// single writes and the multiple writes all echo the address and value/quantity
fn echo(payload: &[u8]) -> Result<Vec<u8>, ExceptionCode> {
    payload
        .get(..4)
        .map(<[u8]>::to_vec)
        .ok_or(ExceptionCode::IllegalDataValue)
}

pub(crate) fn read_coils(memory: &mut Memory, request: &Frame) -> Result<Vec<u8>, ExceptionCode> {
    read_bits(memory.coils(), request.data())
}

pub(crate) fn read_discrete_inputs(
    memory: &mut Memory,
    request: &Frame,
) -> Result<Vec<u8>, ExceptionCode> {
    read_bits(memory.discrete_inputs(), request.data())
}

pub(crate) fn read_holding_registers(
    memory: &mut Memory,
    request: &Frame,
) -> Result<Vec<u8>, ExceptionCode> {
    read_registers(memory.holding_registers(), request.data())
}

pub(crate) fn read_input_registers(
    memory: &mut Memory,
    request: &Frame,
) -> Result<Vec<u8>, ExceptionCode> {
    read_registers(memory.input_registers(), request.data())
}

pub(crate) fn write_single_coil(
    memory: &mut Memory,
    request: &Frame,
) -> Result<Vec<u8>, ExceptionCode> {
    let mut cursor = ReadCursor::new(request.data());
    let address = cursor.read_u16_be().map_err(short_payload)?;
    let value = match cursor.read_u16_be().map_err(short_payload)? {
        coil::ON => true,
        coil::OFF => false,
        _ => return Err(ExceptionCode::IllegalDataValue),
    };

    memory.coils_mut()[address as usize] = value;
    echo(request.data())
}

pub(crate) fn write_single_register(
    memory: &mut Memory,
    request: &Frame,
) -> Result<Vec<u8>, ExceptionCode> {
    let mut cursor = ReadCursor::new(request.data());
    let address = cursor.read_u16_be().map_err(short_payload)?;
    let value = cursor.read_u16_be().map_err(short_payload)?;

    memory.holding_registers_mut()[address as usize] = value;
    echo(request.data())
}

pub(crate) fn write_multiple_coils(
    memory: &mut Memory,
    request: &Frame,
) -> Result<Vec<u8>, ExceptionCode> {
    let mut cursor = ReadCursor::new(request.data());
    let range = AddressRange::parse(&mut cursor)?.validate(MAX_WRITE_COILS_COUNT)?;
    let byte_count = cursor.read_u8().map_err(short_payload)? as usize;
    if byte_count != num_bytes_for_bits(range.count) {
        return Err(ExceptionCode::IllegalDataValue);
    }
    let packed = cursor.read_bytes(byte_count).map_err(short_payload)?;

    let coils = memory
        .coils_mut()
        .get_mut(range.to_std_range())
        .ok_or(ExceptionCode::IllegalDataAddress)?;
    for (dest, value) in coils.iter_mut().zip(unpack_bits(packed, range.count)) {
        *dest = value;
    }

    echo(request.data())
}

pub(crate) fn write_multiple_registers(
    memory: &mut Memory,
    request: &Frame,
) -> Result<Vec<u8>, ExceptionCode> {
    let mut cursor = ReadCursor::new(request.data());
    let range = AddressRange::parse(&mut cursor)?.validate(MAX_WRITE_REGISTERS_COUNT)?;
    let byte_count = cursor.read_u8().map_err(short_payload)? as usize;
    if byte_count != 2 * range.count as usize {
        return Err(ExceptionCode::IllegalDataValue);
    }
    let values = cursor.read_bytes(byte_count).map_err(short_payload)?;

    let registers = memory
        .holding_registers_mut()
        .get_mut(range.to_std_range())
        .ok_or(ExceptionCode::IllegalDataAddress)?;
    for (dest, value) in registers.iter_mut().zip(values.chunks_exact(2)) {
        *dest = u16::from_be_bytes([value[0], value[1]]);
    }

    echo(request.data())
}
