use std::sync::Arc;

use crate::error::FixtureError;
use crate::memory::{MemoryMap, RegionSpec};
use crate::program::{Program, Reg};

/// Default cap on retired instructions per session, so a runaway loop ends
/// in `InstructionLimit` instead of hanging the server.
pub const DEFAULT_INSTRUCTION_LIMIT: u64 = 1_000_000;

/// Everything a testcase run shares with its siblings: memory layout and
/// initial image, program, reset state.
#[derive(Debug, Clone)]
pub struct Firmware {
    pub memory: MemoryMap,
    pub entry: u32,
    pub registers: Vec<(Reg, u32)>,
    pub program: Program,
    pub instruction_limit: u64,
}

impl Firmware {
    pub fn new(layout: &[RegionSpec], program: Program, entry: u32) -> Result<Self, FixtureError> {
        Ok(Self {
            memory: MemoryMap::new(layout)?,
            entry,
            registers: Vec::new(),
            program,
            instruction_limit: DEFAULT_INSTRUCTION_LIMIT,
        })
    }

    pub fn with_register(mut self, reg: Reg, value: u32) -> Self {
        self.registers.retain(|(existing, _)| *existing != reg);
        self.registers.push((reg, value));
        self
    }

    pub fn with_image(mut self, address: u32, bytes: &[u8]) -> Result<Self, FixtureError> {
        self.memory.load_image(address, bytes)?;
        Ok(self)
    }

    pub fn with_instruction_limit(mut self, limit: u64) -> Self {
        self.instruction_limit = limit;
        self
    }
}

/// One recorded testcase: the firmware plus the input it consumed.
#[derive(Debug, Clone)]
pub struct Recording {
    firmware: Arc<Firmware>,
    input: Arc<[u8]>,
}

impl Recording {
    pub fn new(firmware: Arc<Firmware>, input: impl Into<Arc<[u8]>>) -> Self {
        Self {
            firmware,
            input: input.into(),
        }
    }

    pub fn firmware(&self) -> &Firmware {
        &self.firmware
    }

    pub fn input(&self) -> &[u8] {
        &self.input
    }
}
