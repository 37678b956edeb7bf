//! Read-only projections around the cursor. Nothing here changes the session.

use std::collections::BTreeMap;
use std::fmt;

use havoc_debug_proto::{Address, Backtrace, DebugCommand, Disassembly};

use crate::cursor::Cursor;
use crate::error::DebugError;
use crate::session::ReplayDebugger;

/// Everything a front-end shows for one stop, gathered in one go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameSnapshot {
    pub cursor: Cursor,
    pub registers: BTreeMap<String, u64>,
    pub disassembly: Vec<String>,
    pub backtrace: Vec<Address>,
}

impl fmt::Display for FrameSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.cursor)?;
        for (name, value) in &self.registers {
            writeln!(f, "  {name:<5} {value:#010x}")?;
        }
        for line in &self.disassembly {
            writeln!(f, "  {line}")?;
        }
        for (depth, pc) in self.backtrace.iter().enumerate() {
            writeln!(f, "  #{depth} {pc:#010x}")?;
        }
        Ok(())
    }
}

impl ReplayDebugger {
    /// Instructions starting at the cursor. `None` leaves the count to the
    /// server (10 on the reference server).
    pub async fn disassemble(&mut self, count: Option<u32>) -> Result<Vec<String>, DebugError> {
        let listing: Disassembly = self
            .channel
            .request(DebugCommand::Disassemble { count })
            .await?;
        Ok(listing.disassembly)
    }

    pub async fn disassemble_range(
        &mut self,
        start: Address,
        count: u32,
    ) -> Result<Vec<String>, DebugError> {
        let listing: Disassembly = self
            .channel
            .request(DebugCommand::DisassembleRange {
                start_addr: start,
                count,
            })
            .await?;
        Ok(listing.disassembly)
    }

    /// Innermost frame first.
    pub async fn backtrace(&mut self) -> Result<Vec<Address>, DebugError> {
        let frames: Backtrace = self.channel.request(DebugCommand::Backtrace).await?;
        Ok(frames.backtrace)
    }

    pub async fn snapshot(&mut self, count: u32) -> Result<FrameSnapshot, DebugError> {
        let cursor = self.state().await?;
        let registers = self.list_registers().await?;
        let disassembly = self.disassemble(Some(count)).await?;
        let backtrace = self.backtrace().await?;
        Ok(FrameSnapshot {
            cursor,
            registers,
            disassembly,
            backtrace,
        })
    }
}
