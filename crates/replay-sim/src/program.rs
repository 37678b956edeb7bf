//! Instruction set of the replay target and its one-line assembly syntax.
//!
//! The same syntax is produced by disassembly and accepted by
//! [`Program::assemble`], so fixture files read like a listing:
//!
//! ```text
//! 0x00400100: mov r4, #0x20000010
//!             str r0, [r4]          ; follows the previous instruction
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

pub const REGISTER_COUNT: usize = 17;

const REGISTER_NAMES: [&str; REGISTER_COUNT] = [
    "r0", "r1", "r2", "r3", "r4", "r5", "r6", "r7", "r8", "r9", "r10", "r11", "r12", "sp", "lr",
    "pc", "xpsr",
];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown register: {0}")]
pub struct UnknownRegister(pub String);

/// A 32-bit register of the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Reg(u8);

impl Reg {
    pub const SP: Reg = Reg(13);
    pub const LR: Reg = Reg(14);
    pub const PC: Reg = Reg(15);
    pub const XPSR: Reg = Reg(16);

    /// General purpose register `r{n}`, `n <= 12`.
    pub fn r(n: u8) -> Option<Reg> {
        (n <= 12).then_some(Reg(n))
    }

    pub fn index(self) -> usize {
        usize::from(self.0)
    }

    pub fn name(self) -> &'static str {
        REGISTER_NAMES[self.index()]
    }

    pub fn all() -> impl Iterator<Item = Reg> {
        (0..REGISTER_COUNT as u8).map(Reg)
    }
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Reg {
    type Err = UnknownRegister;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Only the names `list_regs` reports; no r13-r15 aliases.
        let lower = s.trim().to_ascii_lowercase();
        REGISTER_NAMES
            .iter()
            .position(|name| *name == lower)
            .map(|index| Reg(index as u8))
            .ok_or_else(|| UnknownRegister(s.trim().to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    Mov { rd: Reg, imm: u32 },
    MovReg { rd: Reg, rm: Reg },
    Add { rd: Reg, rn: Reg, imm: u32 },
    AddReg { rd: Reg, rn: Reg, rm: Reg },
    Sub { rd: Reg, rn: Reg, imm: u32 },
    Cmp { rn: Reg, imm: u32 },
    CmpReg { rn: Reg, rm: Reg },
    B { target: u32 },
    Beq { target: u32 },
    Bne { target: u32 },
    /// Signed less-than after `cmp`.
    Blt { target: u32 },
    Bl { target: u32 },
    Ret,
    Bx { rm: Reg },
    Ldr { rt: Reg, rn: Reg, offset: u32 },
    Str { rt: Reg, rn: Reg, offset: u32 },
    Nop,
    Halt,
}

impl Instruction {
    /// Encoded width in bytes: register-only forms take 2, forms carrying an
    /// immediate, offset or branch target take 4.
    pub fn size(&self) -> u32 {
        match self {
            Instruction::MovReg { .. }
            | Instruction::AddReg { .. }
            | Instruction::CmpReg { .. }
            | Instruction::Ret
            | Instruction::Bx { .. }
            | Instruction::Nop
            | Instruction::Halt => 2,
            _ => 4,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Mov { rd, imm } => write!(f, "mov {rd}, #{imm:#x}"),
            Instruction::MovReg { rd, rm } => write!(f, "mov {rd}, {rm}"),
            Instruction::Add { rd, rn, imm } => write!(f, "add {rd}, {rn}, #{imm:#x}"),
            Instruction::AddReg { rd, rn, rm } => write!(f, "add {rd}, {rn}, {rm}"),
            Instruction::Sub { rd, rn, imm } => write!(f, "sub {rd}, {rn}, #{imm:#x}"),
            Instruction::Cmp { rn, imm } => write!(f, "cmp {rn}, #{imm:#x}"),
            Instruction::CmpReg { rn, rm } => write!(f, "cmp {rn}, {rm}"),
            Instruction::B { target } => write!(f, "b {target:#010x}"),
            Instruction::Beq { target } => write!(f, "beq {target:#010x}"),
            Instruction::Bne { target } => write!(f, "bne {target:#010x}"),
            Instruction::Blt { target } => write!(f, "blt {target:#010x}"),
            Instruction::Bl { target } => write!(f, "bl {target:#010x}"),
            Instruction::Ret => f.write_str("ret"),
            Instruction::Bx { rm } => write!(f, "bx {rm}"),
            Instruction::Ldr { rt, rn, offset: 0 } => write!(f, "ldr {rt}, [{rn}]"),
            Instruction::Ldr { rt, rn, offset } => write!(f, "ldr {rt}, [{rn}, #{offset:#x}]"),
            Instruction::Str { rt, rn, offset: 0 } => write!(f, "str {rt}, [{rn}]"),
            Instruction::Str { rt, rn, offset } => write!(f, "str {rt}, [{rn}, #{offset:#x}]"),
            Instruction::Nop => f.write_str("nop"),
            Instruction::Halt => f.write_str("halt"),
        }
    }
}

impl FromStr for Instruction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim();
        let (mnemonic, rest) = match text.split_once(char::is_whitespace) {
            Some((mnemonic, rest)) => (mnemonic, rest.trim()),
            None => (text, ""),
        };
        let mnemonic = mnemonic.to_ascii_lowercase();

        if mnemonic == "ldr" || mnemonic == "str" {
            let (rt, address) = rest
                .split_once(',')
                .ok_or_else(|| format!("{mnemonic} expects `rt, [rn]`"))?;
            let rt = reg(rt)?;
            let (rn, offset) = memory_operand(address)?;
            return Ok(if mnemonic == "ldr" {
                Instruction::Ldr { rt, rn, offset }
            } else {
                Instruction::Str { rt, rn, offset }
            });
        }

        let operands: Vec<&str> = if rest.is_empty() {
            Vec::new()
        } else {
            rest.split(',').map(str::trim).collect()
        };
        let insn = match (mnemonic.as_str(), operands.as_slice()) {
            ("mov", [rd, src]) if is_immediate(src) => Instruction::Mov {
                rd: reg(rd)?,
                imm: immediate(src)?,
            },
            ("mov", [rd, rm]) => Instruction::MovReg {
                rd: reg(rd)?,
                rm: reg(rm)?,
            },
            ("add", [rd, rn, src]) if is_immediate(src) => Instruction::Add {
                rd: reg(rd)?,
                rn: reg(rn)?,
                imm: immediate(src)?,
            },
            ("add", [rd, rn, rm]) => Instruction::AddReg {
                rd: reg(rd)?,
                rn: reg(rn)?,
                rm: reg(rm)?,
            },
            ("sub", [rd, rn, src]) => Instruction::Sub {
                rd: reg(rd)?,
                rn: reg(rn)?,
                imm: immediate(src)?,
            },
            ("cmp", [rn, src]) if is_immediate(src) => Instruction::Cmp {
                rn: reg(rn)?,
                imm: immediate(src)?,
            },
            ("cmp", [rn, rm]) => Instruction::CmpReg {
                rn: reg(rn)?,
                rm: reg(rm)?,
            },
            ("b", [target]) => Instruction::B {
                target: number(target)?,
            },
            ("beq", [target]) => Instruction::Beq {
                target: number(target)?,
            },
            ("bne", [target]) => Instruction::Bne {
                target: number(target)?,
            },
            ("blt", [target]) => Instruction::Blt {
                target: number(target)?,
            },
            ("bl", [target]) => Instruction::Bl {
                target: number(target)?,
            },
            ("bx", [rm]) => Instruction::Bx { rm: reg(rm)? },
            ("ret", []) => Instruction::Ret,
            ("nop", []) => Instruction::Nop,
            ("halt", []) => Instruction::Halt,
            (mnemonic, operands) => {
                return Err(format!(
                    "cannot assemble `{mnemonic}` with {} operand(s)",
                    operands.len()
                ))
            }
        };
        Ok(insn)
    }
}

fn reg(raw: &str) -> Result<Reg, String> {
    raw.parse::<Reg>().map_err(|err| err.to_string())
}

fn is_immediate(raw: &str) -> bool {
    raw.trim_start().starts_with('#')
}

fn immediate(raw: &str) -> Result<u32, String> {
    let raw = raw.trim();
    let value = raw
        .strip_prefix('#')
        .ok_or_else(|| format!("expected an immediate, got `{raw}`"))?;
    number(value)
}

/// Decimal or `0x` hexadecimal, `_` separators allowed.
pub fn number(raw: &str) -> Result<u32, String> {
    let cleaned: String = raw.trim().chars().filter(|c| *c != '_').collect();
    let parsed = match cleaned
        .strip_prefix("0x")
        .or_else(|| cleaned.strip_prefix("0X"))
    {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => cleaned.parse::<u32>(),
    };
    parsed.map_err(|_| format!("invalid number `{}`", raw.trim()))
}

fn memory_operand(raw: &str) -> Result<(Reg, u32), String> {
    let raw = raw.trim();
    let inner = raw
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .ok_or_else(|| format!("expected `[rn]` or `[rn, #imm]`, got `{raw}`"))?;
    match inner.split_once(',') {
        Some((rn, offset)) => Ok((reg(rn)?, immediate(offset)?)),
        None => Ok((reg(inner)?, 0)),
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("line {line}: {message}")]
pub struct AsmError {
    pub line: usize,
    pub message: String,
}

/// Instructions keyed by address. Gaps are legal; executing one is an
/// execution violation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Program {
    instructions: BTreeMap<u32, Instruction>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, address: u32, instruction: Instruction) -> Option<Instruction> {
        self.instructions.insert(address, instruction)
    }

    pub fn get(&self, address: u32) -> Option<&Instruction> {
        self.instructions.get(&address)
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &Instruction)> {
        self.instructions.iter().map(|(address, insn)| (*address, insn))
    }

    /// Assemble `ADDR: insn` lines. A line without an address follows the
    /// previous instruction; `;` starts a comment.
    pub fn assemble(source: &str) -> Result<Self, AsmError> {
        let mut program = Program::new();
        let mut next: Option<u32> = None;
        for (index, raw_line) in source.lines().enumerate() {
            let line = index + 1;
            let err = |message: String| AsmError { line, message };
            let text = raw_line.split(';').next().unwrap_or("").trim();
            if text.is_empty() {
                continue;
            }
            let (address, body) = match text.split_once(':') {
                Some((address, body)) => (number(address).map_err(err)?, body.trim()),
                None => (
                    next.ok_or_else(|| err("first instruction needs an address".into()))?,
                    text,
                ),
            };
            let insn: Instruction = body.parse().map_err(err)?;
            if program.insert(address, insn).is_some() {
                return Err(err(format!("two instructions at {address:#010x}")));
            }
            next = Some(address.wrapping_add(insn.size()));
        }
        Ok(program)
    }

    /// Up to `count` lines starting at `start`, stopping after the first
    /// address that holds no instruction.
    pub fn listing(&self, start: u32, count: usize) -> Vec<String> {
        let mut lines = Vec::with_capacity(count.min(64));
        let mut address = start;
        for _ in 0..count {
            match self.get(address) {
                Some(insn) => {
                    lines.push(format!("{address:#010x}: {insn}"));
                    address = address.wrapping_add(insn.size());
                }
                None => {
                    lines.push(format!("{address:#010x}: (bad)"));
                    break;
                }
            }
        }
        lines
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (address, insn) in self.iter() {
            writeln!(f, "{address:#010x}: {insn}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_names_match_the_listed_set() {
        assert_eq!("R4".parse::<Reg>().unwrap(), Reg::r(4).unwrap());
        assert_eq!("SP".parse::<Reg>().unwrap(), Reg::SP);
        assert_eq!(
            "r13".parse::<Reg>().unwrap_err(),
            UnknownRegister("r13".into())
        );
        assert_eq!("xpsr".parse::<Reg>().unwrap(), Reg::XPSR);
        assert_eq!(
            "r99".parse::<Reg>().unwrap_err(),
            UnknownRegister("r99".into())
        );
        assert_eq!(Reg::all().count(), REGISTER_COUNT);
        assert!(Reg::r(13).is_none());
    }

    #[test]
    fn disassembly_text_assembles_back() {
        let source = "\
            0x00400100: mov r4, #0x20000010
            0x00400104: ldr r2, [r1]
            0x00400108: str r0, [r4, #0x4]
            0x0040010c: add r0, r1, r2
            0x0040010e: cmp r5, #0x14
            0x00400112: blt 0x00400110
            0x00400116: bx r3
        ";
        let program = Program::assemble(source).unwrap();
        assert_eq!(program.len(), 7);
        let reassembled = Program::assemble(&program.to_string()).unwrap();
        assert_eq!(reassembled, program);
    }

    #[test]
    fn implicit_addresses_follow_instruction_width() {
        let program = Program::assemble(
            "0x1000: mov r0, r1   ; 2 bytes\n\
             add r0, r0, #1       ; 4 bytes\n\
             \n\
             halt",
        )
        .unwrap();
        assert_eq!(
            program.get(0x1002),
            Some(&Instruction::Add {
                rd: Reg::r(0).unwrap(),
                rn: Reg::r(0).unwrap(),
                imm: 1
            })
        );
        assert_eq!(program.get(0x1006), Some(&Instruction::Halt));
    }

    #[test]
    fn assembly_errors_name_the_line() {
        let err = Program::assemble("0x1000: nop\n0x1002: frob r0").unwrap_err();
        assert_eq!(err.line, 2);
        let err = Program::assemble("nop").unwrap_err();
        assert_eq!(err.message, "first instruction needs an address");
        let err = Program::assemble("0x10: nop\n0x10: halt").unwrap_err();
        assert!(err.message.contains("two instructions"));
    }

    #[test]
    fn listing_stops_at_the_first_gap() {
        let program = Program::assemble("0x2000: nop\nnop").unwrap();
        assert_eq!(
            program.listing(0x2000, 10),
            vec![
                "0x00002000: nop".to_string(),
                "0x00002002: nop".to_string(),
                "0x00002004: (bad)".to_string(),
            ]
        );
        assert_eq!(program.listing(0x2000, 1), vec!["0x00002000: nop".to_string()]);
    }
}
