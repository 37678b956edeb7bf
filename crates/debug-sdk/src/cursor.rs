use std::fmt;

use havoc_debug_proto::{Address, CursorState};

/// Position in the recorded trace as last reported by the server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cursor {
    pub pc: Address,
    pub icount: u64,
    /// Set once a register or memory write has pushed execution off the
    /// recording; cleared only by a rewind.
    pub diverged: bool,
}

impl Cursor {
    pub fn at_trace_start(&self) -> bool {
        self.icount == 0
    }

    pub(crate) fn apply(&mut self, state: CursorState) {
        self.pc = state.pc;
        self.icount = state.icount;
        if let Some(diverged) = state.diverged {
            self.diverged = diverged;
        }
    }

    pub(crate) fn mark_diverged(&mut self) {
        self.diverged = true;
    }

    pub(crate) fn clear_divergence(&mut self) {
        self.diverged = false;
    }
}

impl From<CursorState> for Cursor {
    fn from(state: CursorState) -> Self {
        let mut cursor = Cursor::default();
        cursor.apply(state);
        cursor
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pc={:#010x} icount={}", self.pc, self.icount)?;
        if self.diverged {
            f.write_str(" (diverged)")?;
        }
        Ok(())
    }
}
