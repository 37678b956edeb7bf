use havoc_debug_proto::{ExitReason, WatchKind};

use crate::memory::{MemoryMap, RegionKind, Target};
use crate::program::{Instruction, Reg, REGISTER_COUNT};
use crate::recording::Firmware;

const FLAG_N: u32 = 1 << 31;
const FLAG_Z: u32 = 1 << 30;
const FLAG_C: u32 = 1 << 29;
const FLAG_V: u32 = 1 << 28;

/// A memory access made by one retired instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Access {
    pub address: u32,
    pub len: u32,
    pub kind: WatchKind,
}

impl Access {
    pub fn covers(&self, address: u64) -> bool {
        let start = u64::from(self.address);
        address >= start && address < start + u64::from(self.len)
    }
}

/// Everything needed to put the machine back where it was before one
/// instruction retired.
#[derive(Debug, Clone)]
pub struct UndoRecord {
    regs: [u32; REGISTER_COUNT],
    call_stack: Vec<u32>,
    input_pos: usize,
    memory: Option<(u32, Vec<u8>)>,
}

#[derive(Debug, Clone)]
pub struct Retired {
    pub accesses: Vec<Access>,
    pub undo: UndoRecord,
}

/// Live state of the replay target.
#[derive(Debug, Clone)]
pub struct Machine {
    regs: [u32; REGISTER_COUNT],
    memory: MemoryMap,
    call_stack: Vec<u32>,
    input_pos: usize,
}

impl Machine {
    pub fn boot(firmware: &Firmware) -> Self {
        let mut regs = [0u32; REGISTER_COUNT];
        for (reg, value) in &firmware.registers {
            regs[reg.index()] = *value;
        }
        regs[Reg::PC.index()] = firmware.entry;
        Self {
            regs,
            memory: firmware.memory.clone(),
            call_stack: Vec::new(),
            input_pos: 0,
        }
    }

    pub fn pc(&self) -> u32 {
        self.regs[Reg::PC.index()]
    }

    pub fn register(&self, reg: Reg) -> u32 {
        self.regs[reg.index()]
    }

    pub fn set_register(&mut self, reg: Reg, value: u32) {
        self.regs[reg.index()] = value;
    }

    pub fn registers(&self) -> impl Iterator<Item = (Reg, u32)> + '_ {
        Reg::all().map(move |reg| (reg, self.register(reg)))
    }

    pub fn memory(&self) -> &MemoryMap {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut MemoryMap {
        &mut self.memory
    }

    /// Current pc followed by the return address of every open call.
    pub fn backtrace(&self) -> Vec<u32> {
        std::iter::once(self.pc())
            .chain(self.call_stack.iter().rev().copied())
            .collect()
    }

    /// Retire the instruction at pc, or report why execution cannot go on.
    /// A blocked instruction leaves the machine untouched.
    pub fn step(&mut self, firmware: &Firmware, input: &[u8]) -> Result<Retired, ExitReason> {
        let pc = self.pc();
        let insn = *firmware
            .program
            .get(pc)
            .ok_or_else(|| fault("ExecViolation", pc))?;
        let mut undo = UndoRecord {
            regs: self.regs,
            call_stack: self.call_stack.clone(),
            input_pos: self.input_pos,
            memory: None,
        };
        let mut accesses = Vec::new();
        let fallthrough = pc.wrapping_add(insn.size());
        let mut next_pc = fallthrough;

        match insn {
            Instruction::Mov { rd, imm } => self.write_dest(rd, imm, &mut next_pc),
            Instruction::MovReg { rd, rm } => {
                let value = self.register(rm);
                self.write_dest(rd, value, &mut next_pc);
            }
            Instruction::Add { rd, rn, imm } => {
                let value = self.register(rn).wrapping_add(imm);
                self.write_dest(rd, value, &mut next_pc);
            }
            Instruction::AddReg { rd, rn, rm } => {
                let value = self.register(rn).wrapping_add(self.register(rm));
                self.write_dest(rd, value, &mut next_pc);
            }
            Instruction::Sub { rd, rn, imm } => {
                let value = self.register(rn).wrapping_sub(imm);
                self.write_dest(rd, value, &mut next_pc);
            }
            Instruction::Cmp { rn, imm } => self.compare(self.register(rn), imm),
            Instruction::CmpReg { rn, rm } => self.compare(self.register(rn), self.register(rm)),
            Instruction::B { target } => next_pc = target,
            Instruction::Beq { target } => {
                if self.flag(FLAG_Z) {
                    next_pc = target;
                }
            }
            Instruction::Bne { target } => {
                if !self.flag(FLAG_Z) {
                    next_pc = target;
                }
            }
            Instruction::Blt { target } => {
                if self.flag(FLAG_N) != self.flag(FLAG_V) {
                    next_pc = target;
                }
            }
            Instruction::Bl { target } => {
                self.set_register(Reg::LR, fallthrough);
                self.call_stack.push(fallthrough);
                next_pc = target;
            }
            Instruction::Ret => {
                next_pc = self.register(Reg::LR);
                self.call_stack.pop();
                if let Some(outer) = self.call_stack.last().copied() {
                    self.set_register(Reg::LR, outer);
                }
            }
            Instruction::Bx { rm } => next_pc = self.register(rm),
            Instruction::Ldr { rt, rn, offset } => {
                let address = self.register(rn).wrapping_add(offset);
                let value = match self.memory.word_target(address) {
                    Err(_) => return Err(fault("ReadUnmapped", address)),
                    Ok(Target::Device) => self.consume_input(input, pc)?,
                    Ok(Target::Backed(_)) => self
                        .memory
                        .read_word(address)
                        .map_err(|_| fault("ReadUnmapped", address))?,
                };
                accesses.push(Access {
                    address,
                    len: 4,
                    kind: WatchKind::Read,
                });
                self.write_dest(rt, value, &mut next_pc);
            }
            Instruction::Str { rt, rn, offset } => {
                let address = self.register(rn).wrapping_add(offset);
                let value = self.register(rt);
                match self.memory.word_target(address) {
                    Err(_) => return Err(fault("WriteUnmapped", address)),
                    Ok(Target::Backed(RegionKind::Rom)) => {
                        return Err(fault("WriteViolation", address))
                    }
                    Ok(Target::Device) => {}
                    Ok(Target::Backed(_)) => {
                        let old = self
                            .memory
                            .read(u64::from(address), 4)
                            .map_err(|_| fault("WriteUnmapped", address))?;
                        self.memory
                            .write_word(address, value)
                            .map_err(|_| fault("WriteUnmapped", address))?;
                        undo.memory = Some((address, old));
                    }
                }
                accesses.push(Access {
                    address,
                    len: 4,
                    kind: WatchKind::Write,
                });
            }
            Instruction::Nop => {}
            Instruction::Halt => return Err(ExitReason::Exit),
        }

        self.regs[Reg::PC.index()] = next_pc;
        Ok(Retired { accesses, undo })
    }

    pub fn undo(&mut self, record: UndoRecord) {
        self.regs = record.regs;
        self.call_stack = record.call_stack;
        self.input_pos = record.input_pos;
        if let Some((address, old)) = record.memory {
            if let Err(err) = self.memory.write(u64::from(address), &old) {
                tracing::warn!(address, error = %err, "could not restore memory on step back");
            }
        }
    }

    fn write_dest(&mut self, rd: Reg, value: u32, next_pc: &mut u32) {
        if rd == Reg::PC {
            *next_pc = value;
        } else {
            self.set_register(rd, value);
        }
    }

    fn consume_input(&mut self, input: &[u8], pc: u32) -> Result<u32, ExitReason> {
        let word = input
            .get(self.input_pos..self.input_pos + 4)
            .ok_or_else(|| fault("InputExhausted", pc))?;
        self.input_pos += 4;
        Ok(u32::from_le_bytes([word[0], word[1], word[2], word[3]]))
    }

    fn flag(&self, mask: u32) -> bool {
        self.register(Reg::XPSR) & mask != 0
    }

    fn compare(&mut self, lhs: u32, rhs: u32) {
        let result = lhs.wrapping_sub(rhs);
        let mut xpsr = self.register(Reg::XPSR) & !(FLAG_N | FLAG_Z | FLAG_C | FLAG_V);
        if result & (1 << 31) != 0 {
            xpsr |= FLAG_N;
        }
        if result == 0 {
            xpsr |= FLAG_Z;
        }
        if lhs >= rhs {
            xpsr |= FLAG_C;
        }
        if (lhs ^ rhs) & (lhs ^ result) & (1 << 31) != 0 {
            xpsr |= FLAG_V;
        }
        self.set_register(Reg::XPSR, xpsr);
    }
}

fn fault(kind: &str, address: u32) -> ExitReason {
    ExitReason::Fault(format!("{kind}({address:#010x})"))
}
