use std::collections::BTreeMap;
use std::sync::Arc;

use crate::common::frame::Frame;
use crate::constants::MAX_PDU_LENGTH;
use crate::exception::ExceptionCode;
use crate::server::handlers;
use crate::server::memory::Memory;

/// Computes the reply payload for one function code
///
/// A handler receives exclusive access to the memory for the duration of the call.
/// Returning `Err` turns the reply into an exception reply.
pub type FunctionHandler =
    Arc<dyn Fn(&mut Memory, &Frame) -> Result<Vec<u8>, ExceptionCode> + Send + Sync>;

/// Function codes understood by the default table
pub mod code {
    /// Read Coils
    pub const READ_COILS: u8 = 0x01;
    /// Read Discrete Inputs
    pub const READ_DISCRETE_INPUTS: u8 = 0x02;
    /// Read Holding Registers
    pub const READ_HOLDING_REGISTERS: u8 = 0x03;
    /// Read Input Registers
    pub const READ_INPUT_REGISTERS: u8 = 0x04;
    /// Write Single Coil
    pub const WRITE_SINGLE_COIL: u8 = 0x05;
    /// Write Single Register
    pub const WRITE_SINGLE_REGISTER: u8 = 0x06;
    /// Write Multiple Coils
    pub const WRITE_MULTIPLE_COILS: u8 = 0x0F;
    /// Write Multiple Registers
    pub const WRITE_MULTIPLE_REGISTERS: u8 = 0x10;
}

pub(crate) fn name(function: u8) -> &'static str {
    match function {
        code::READ_COILS => "READ COILS",
        code::READ_DISCRETE_INPUTS => "READ DISCRETE INPUTS",
        code::READ_HOLDING_REGISTERS => "READ HOLDING REGISTERS",
        code::READ_INPUT_REGISTERS => "READ INPUT REGISTERS",
        code::WRITE_SINGLE_COIL => "WRITE SINGLE COIL",
        code::WRITE_SINGLE_REGISTER => "WRITE SINGLE REGISTER",
        code::WRITE_MULTIPLE_COILS => "WRITE MULTIPLE COILS",
        code::WRITE_MULTIPLE_REGISTERS => "WRITE MULTIPLE REGISTERS",
        _ => "CUSTOM FUNCTION",
    }
}

/// Map from function code to handler, owned by a single server instance
#[derive(Clone)]
pub struct FunctionTable {
    handlers: BTreeMap<u8, FunctionHandler>,
}

impl FunctionTable {
    /// Table seeded with the eight standard handlers
    pub fn new() -> Self {
        let mut table = Self::empty();
        table.insert(code::READ_COILS, handlers::read_coils);
        table.insert(code::READ_DISCRETE_INPUTS, handlers::read_discrete_inputs);
        table.insert(code::READ_HOLDING_REGISTERS, handlers::read_holding_registers);
        table.insert(code::READ_INPUT_REGISTERS, handlers::read_input_registers);
        table.insert(code::WRITE_SINGLE_COIL, handlers::write_single_coil);
        table.insert(code::WRITE_SINGLE_REGISTER, handlers::write_single_register);
        table.insert(code::WRITE_MULTIPLE_COILS, handlers::write_multiple_coils);
        table.insert(code::WRITE_MULTIPLE_REGISTERS, handlers::write_multiple_registers);
        table
    }

    /// Table without any handlers, every request is answered with `IllegalFunction`
    pub fn empty() -> Self {
        Self {
            handlers: BTreeMap::new(),
        }
    }

    /// Install a handler, returning the one it replaces
    pub fn insert<F>(&mut self, function: u8, handler: F) -> Option<FunctionHandler>
    where
        F: Fn(&mut Memory, &Frame) -> Result<Vec<u8>, ExceptionCode> + Send + Sync + 'static,
    {
        self.handlers.insert(function, Arc::new(handler))
    }

    /// Remove a handler, returning it if it was present
    pub fn remove(&mut self, function: u8) -> Option<FunctionHandler> {
        self.handlers.remove(&function)
    }

    /// Handler for a function code
    pub fn get(&self, function: u8) -> Option<&FunctionHandler> {
        self.handlers.get(&function)
    }

    /// Function codes with an installed handler, in ascending order
    pub fn codes(&self) -> impl Iterator<Item = u8> + '_ {
        self.handlers.keys().copied()
    }

    /// Run the handler registered for the request's function code
    pub(crate) fn execute(&self, memory: &mut Memory, request: &Frame) -> Result<Vec<u8>, ExceptionCode> {
        let handler = self
            .handlers
            .get(&request.function())
            .ok_or(ExceptionCode::IllegalFunction)?;

        let data = handler(memory, request)?;

        // function code and payload must fit in a PDU
        if data.len() >= MAX_PDU_LENGTH {
            tracing::error!(
                "handler for function {:#04X} produced a payload of {} bytes",
                request.function(),
                data.len()
            );
            return Err(ExceptionCode::ServerDeviceFailure);
        }

        Ok(data)
    }
}

impl Default for FunctionTable {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FunctionTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.handlers.keys()).finish()
    }
}
