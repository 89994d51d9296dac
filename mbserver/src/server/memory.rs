use crate::constants::ADDRESS_SPACE_SIZE;

/// The four address spaces served to clients
///
/// Each space is allocated at its full size of 65536 entries when the memory is created.
/// Accessors hand out slices, so the spaces can be read and written but never resized.
///
/// Discrete inputs and input registers are read-only from the protocol's point of view.
/// The application changes them through the `_mut` accessors.
#[derive(Clone, PartialEq, Eq)]
pub struct Memory {
    discrete_inputs: Box<[bool]>,
    coils: Box<[bool]>,
    holding_registers: Box<[u16]>,
    input_registers: Box<[u16]>,
}

impl Memory {
    /// Allocate all four spaces with every value cleared
    pub fn new() -> Self {
        Self {
            discrete_inputs: vec![false; ADDRESS_SPACE_SIZE].into_boxed_slice(),
            coils: vec![false; ADDRESS_SPACE_SIZE].into_boxed_slice(),
            holding_registers: vec![0; ADDRESS_SPACE_SIZE].into_boxed_slice(),
            input_registers: vec![0; ADDRESS_SPACE_SIZE].into_boxed_slice(),
        }
    }

    /// Discrete inputs
    pub fn discrete_inputs(&self) -> &[bool] {
        &self.discrete_inputs
    }

    /// Mutable discrete inputs
    pub fn discrete_inputs_mut(&mut self) -> &mut [bool] {
        &mut self.discrete_inputs
    }

    /// Coils
    pub fn coils(&self) -> &[bool] {
        &self.coils
    }

    /// Mutable coils
    pub fn coils_mut(&mut self) -> &mut [bool] {
        &mut self.coils
    }

    /// Holding registers
    pub fn holding_registers(&self) -> &[u16] {
        &self.holding_registers
    }

    /// Mutable holding registers
    pub fn holding_registers_mut(&mut self) -> &mut [u16] {
        &mut self.holding_registers
    }

    /// Input registers
    pub fn input_registers(&self) -> &[u16] {
        &self.input_registers
    }

    /// Mutable input registers
    pub fn input_registers_mut(&mut self) -> &mut [u16] {
        &mut self.input_registers
    }
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}

// printing 4 x 65536 values is never useful
impl std::fmt::Debug for Memory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memory")
            .field("discrete_inputs", &self.discrete_inputs.len())
            .field("coils", &self.coils.len())
            .field("holding_registers", &self.holding_registers.len())
            .field("input_registers", &self.input_registers.len())
            .finish()
    }
}
