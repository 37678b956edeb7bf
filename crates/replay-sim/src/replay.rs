use std::collections::BTreeMap;

use havoc_debug_proto::{
    Address, Backtrace, BreakpointList, CursorState, DebugCommand, DebugReply, Disassembly,
    ExitPayload, ExitReason, FailureKind, RegisterFile, RegisterValue, WatchKind, Watchpoint,
    WatchpointList, MAX_WRITE_LEN,
};

use crate::machine::{Access, Machine, UndoRecord};
use crate::memory::{MemoryFault, RegionKind};
use crate::program::Reg;
use crate::recording::Recording;

/// Disassembly length when the client does not ask for one.
pub const DEFAULT_DISASSEMBLY_COUNT: u32 = 10;

/// Server side of one debugging session: the live machine plus the undo
/// history that makes stepping backwards exact.
#[derive(Debug)]
pub struct ReplaySession {
    recording: Recording,
    machine: Machine,
    history: Vec<HistoryEntry>,
    icount: u64,
    breakpoints: Vec<Address>,
    watchpoints: Vec<Watchpoint>,
    diverged: bool,
}

impl ReplaySession {
    pub fn new(recording: Recording) -> Self {
        let machine = Machine::boot(recording.firmware());
        Self {
            recording,
            machine,
            history: Vec::new(),
            icount: 0,
            breakpoints: Vec::new(),
            watchpoints: Vec::new(),
            diverged: false,
        }
    }

    pub fn icount(&self) -> u64 {
        self.icount
    }

    pub fn pc(&self) -> u32 {
        self.machine.pc()
    }

    pub fn is_diverged(&self) -> bool {
        self.diverged
    }

    pub fn handle(&mut self, command: DebugCommand) -> DebugReply {
        match command {
            DebugCommand::Run => exit(self.run()),
            DebugCommand::Step => exit(self.step()),
            DebugCommand::StepBack => match self.step_back() {
                Ok(reason) => exit(reason),
                Err(kind) => DebugReply::failure(kind.message()),
            },
            DebugCommand::Rewind => {
                self.rewind();
                DebugReply::Unit
            }
            DebugCommand::State => DebugReply::data(self.state()),
            DebugCommand::AddBreakpoint { address } => {
                if !self.breakpoints.contains(&address) {
                    self.breakpoints.push(address);
                }
                DebugReply::Unit
            }
            DebugCommand::RemoveBreakpoint { address } => {
                self.breakpoints.retain(|existing| *existing != address);
                DebugReply::Unit
            }
            DebugCommand::ListBreakpoints => DebugReply::data(BreakpointList {
                breakpoints: self.breakpoints.clone(),
            }),
            DebugCommand::AddWatchpoint {
                address,
                watch_type,
            } => {
                let watchpoint = Watchpoint::new(address, watch_type);
                if !self.watchpoints.contains(&watchpoint) {
                    self.watchpoints.push(watchpoint);
                }
                DebugReply::Unit
            }
            DebugCommand::RemoveWatchpoint {
                address,
                watch_type,
            } => {
                let watchpoint = Watchpoint::new(address, watch_type);
                self.watchpoints.retain(|existing| *existing != watchpoint);
                DebugReply::Unit
            }
            DebugCommand::ListWatchpoints => DebugReply::data(WatchpointList {
                watchpoints: self.watchpoints.clone(),
            }),
            DebugCommand::ReadReg { reg_name } => match reg_name.parse::<Reg>() {
                Ok(reg) => DebugReply::data(RegisterValue {
                    value: u64::from(self.machine.register(reg)),
                }),
                Err(_) => DebugReply::failure(FailureKind::UnknownRegister(reg_name).message()),
            },
            DebugCommand::WriteReg { reg_name, value } => self.write_register(reg_name, value),
            DebugCommand::ListRegs => DebugReply::data(self.register_file()),
            DebugCommand::ReadMem { address, size } => self.read_memory(address, size),
            DebugCommand::WriteMem { address, data } => self.write_memory(address, &data),
            DebugCommand::Disassemble { count } => {
                let count = count.unwrap_or(DEFAULT_DISASSEMBLY_COUNT);
                self.disassemble(u64::from(self.machine.pc()), count)
            }
            DebugCommand::DisassembleRange { start_addr, count } => {
                self.disassemble(start_addr, count)
            }
            DebugCommand::Backtrace => DebugReply::data(Backtrace {
                backtrace: self
                    .machine
                    .backtrace()
                    .into_iter()
                    .map(u64::from)
                    .collect(),
            }),
        }
    }

    pub fn state(&self) -> CursorState {
        CursorState {
            pc: u64::from(self.machine.pc()),
            icount: self.icount(),
            diverged: Some(self.diverged),
        }
    }

    /// Retire instructions until a watchpoint access, a breakpoint at the new
    /// pc, or the end of the trace.
    pub fn run(&mut self) -> ExitReason {
        loop {
            let accesses = match self.retire() {
                Ok(accesses) => accesses,
                Err(reason) => return reason,
            };
            if let Some(kind) = self.watch_hit(&accesses) {
                return ExitReason::for_watch(kind);
            }
            if self.breakpoints.contains(&u64::from(self.machine.pc())) {
                return ExitReason::Breakpoint;
            }
        }
    }

    /// Breakpoints are not consulted: a single step always leaves the pc.
    ///
    /// A step that cannot retire anything still leaves a history entry, so the
    /// matching `step_back` undoes nothing.
    pub fn step(&mut self) -> ExitReason {
        match self.retire() {
            Ok(accesses) => self
                .watch_hit(&accesses)
                .map(ExitReason::for_watch)
                .unwrap_or(ExitReason::Step),
            Err(reason) => {
                self.history.push(HistoryEntry::Blocked);
                reason
            }
        }
    }

    pub fn step_back(&mut self) -> Result<ExitReason, FailureKind> {
        match self.history.pop().ok_or(FailureKind::AtTraceStart)? {
            HistoryEntry::Retired(record) => {
                self.machine.undo(record);
                self.icount -= 1;
            }
            HistoryEntry::Blocked => {}
        }
        Ok(ExitReason::Step)
    }

    /// Reset the machine to the recording. Stop conditions are kept.
    pub fn rewind(&mut self) {
        self.machine = Machine::boot(self.recording.firmware());
        self.history.clear();
        self.icount = 0;
        self.diverged = false;
    }

    fn retire(&mut self) -> Result<Vec<Access>, ExitReason> {
        let firmware = self.recording.firmware();
        if self.icount() >= firmware.instruction_limit {
            return Err(ExitReason::Fault("InstructionLimit".into()));
        }
        let retired = self.machine.step(firmware, self.recording.input())?;
        self.history.push(HistoryEntry::Retired(retired.undo));
        self.icount += 1;
        Ok(retired.accesses)
    }

    /// Kind of the first access, in program order, that a watchpoint covers.
    fn watch_hit(&self, accesses: &[Access]) -> Option<WatchKind> {
        accesses.iter().find_map(|access| {
            self.watchpoints
                .iter()
                .any(|wp| wp.kind == access.kind && access.covers(wp.address))
                .then_some(access.kind)
        })
    }

    fn register_file(&self) -> RegisterFile {
        let registers: BTreeMap<String, u64> = self
            .machine
            .registers()
            .map(|(reg, value)| (reg.name().to_string(), u64::from(value)))
            .collect();
        RegisterFile { registers }
    }

    fn write_register(&mut self, reg_name: String, value: u64) -> DebugReply {
        let reg = match reg_name.parse::<Reg>() {
            Ok(reg) => reg,
            Err(_) => return DebugReply::failure(FailureKind::UnknownRegister(reg_name).message()),
        };
        let Ok(value) = u32::try_from(value) else {
            return DebugReply::failure(format!(
                "value {value:#x} does not fit the 32-bit register {reg}"
            ));
        };
        self.machine.set_register(reg, value);
        self.diverged = true;
        DebugReply::Unit
    }

    fn read_memory(&self, address: Address, size: u32) -> DebugReply {
        match self.machine.memory().read(address, size as usize) {
            Ok(bytes) => DebugReply::data(bytes),
            Err(fault) => DebugReply::failure(
                FailureKind::MemoryUnreadable(address).with_detail(&fault.to_string()),
            ),
        }
    }

    fn write_memory(&mut self, address: Address, data: &[u8]) -> DebugReply {
        if data.len() > MAX_WRITE_LEN {
            return DebugReply::failure(FailureKind::WriteTooLarge(data.len()).message());
        }
        if self.machine.memory().classify(address) == Some(RegionKind::Mmio) {
            return DebugReply::failure(FailureKind::IoMemoryWrite(address).message());
        }
        match self.machine.memory_mut().write(address, data) {
            Ok(()) => {
                self.diverged = true;
                DebugReply::Unit
            }
            Err(MemoryFault::Mmio { address }) => {
                DebugReply::failure(FailureKind::IoMemoryWrite(address).message())
            }
            Err(fault) => DebugReply::failure(format!("cannot write memory at {address:#010x}: {fault}")),
        }
    }

    fn disassemble(&self, start: Address, count: u32) -> DebugReply {
        let lines = match u32::try_from(start) {
            Ok(start) => self
                .recording
                .firmware()
                .program
                .listing(start, count as usize),
            Err(_) => vec![format!("{start:#010x}: (bad)")],
        };
        DebugReply::data(Disassembly { disassembly: lines })
    }
}

#[derive(Debug)]
enum HistoryEntry {
    Retired(UndoRecord),
    Blocked,
}

fn exit(reason: ExitReason) -> DebugReply {
    DebugReply::data(ExitPayload {
        exit_reason: reason,
    })
}
