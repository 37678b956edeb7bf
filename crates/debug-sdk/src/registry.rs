use havoc_debug_proto::{Address, WatchKind, Watchpoint};

/// Client mirror of a session's stop conditions.
///
/// Entries keep insertion order and are never duplicated. Watchpoints are
/// keyed by the exact `(address, kind)` pair, so a read and a write watch on
/// the same address live side by side.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Registry {
    breakpoints: Vec<Address>,
    watchpoints: Vec<Watchpoint>,
}

impl Registry {
    pub fn breakpoints(&self) -> &[Address] {
        &self.breakpoints
    }

    pub fn watchpoints(&self) -> &[Watchpoint] {
        &self.watchpoints
    }

    pub fn has_breakpoint(&self, address: Address) -> bool {
        self.breakpoints.contains(&address)
    }

    pub fn has_watchpoint(&self, address: Address, kind: WatchKind) -> bool {
        self.watchpoints.contains(&Watchpoint::new(address, kind))
    }

    pub fn is_empty(&self) -> bool {
        self.breakpoints.is_empty() && self.watchpoints.is_empty()
    }

    /// Returns false when the breakpoint was already present.
    pub(crate) fn insert_breakpoint(&mut self, address: Address) -> bool {
        if self.has_breakpoint(address) {
            return false;
        }
        self.breakpoints.push(address);
        true
    }

    pub(crate) fn remove_breakpoint(&mut self, address: Address) -> bool {
        let before = self.breakpoints.len();
        self.breakpoints.retain(|existing| *existing != address);
        before != self.breakpoints.len()
    }

    pub(crate) fn insert_watchpoint(&mut self, watchpoint: Watchpoint) -> bool {
        if self.watchpoints.contains(&watchpoint) {
            return false;
        }
        self.watchpoints.push(watchpoint);
        true
    }

    pub(crate) fn remove_watchpoint(&mut self, watchpoint: Watchpoint) -> bool {
        let before = self.watchpoints.len();
        self.watchpoints.retain(|existing| *existing != watchpoint);
        before != self.watchpoints.len()
    }

    /// Adopt the server's list, keeping its order and dropping repeats.
    pub(crate) fn replace_breakpoints(&mut self, breakpoints: Vec<Address>) {
        self.breakpoints.clear();
        for address in breakpoints {
            self.insert_breakpoint(address);
        }
    }

    pub(crate) fn replace_watchpoints(&mut self, watchpoints: Vec<Watchpoint>) {
        self.watchpoints.clear();
        for watchpoint in watchpoints {
            self.insert_watchpoint(watchpoint);
        }
    }
}
