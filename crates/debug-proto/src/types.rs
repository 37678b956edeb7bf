use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ProtoError;

/// Target addresses and register values travel as unsigned 64-bit integers so
/// the wire stays width-agnostic; 32-bit targets simply never set the high half.
pub type Address = u64;

/// Largest payload a single `write_mem` may carry.
pub const MAX_WRITE_LEN: usize = 4096;

/// Memory access that arms a watchpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchKind {
    Read,
    Write,
}

impl WatchKind {
    pub fn as_str(self) -> &'static str {
        match self {
            WatchKind::Read => "read",
            WatchKind::Write => "write",
        }
    }
}

impl fmt::Display for WatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WatchKind {
    type Err = ProtoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "read" | "r" => Ok(WatchKind::Read),
            "write" | "w" => Ok(WatchKind::Write),
            other => Err(ProtoError::UnknownWatchKind(other.to_string())),
        }
    }
}

/// An `(address, kind)` stop condition. Both kinds on one address are
/// distinct entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Watchpoint {
    pub address: Address,
    #[serde(rename = "watch_type")]
    pub kind: WatchKind,
}

impl Watchpoint {
    pub fn new(address: Address, kind: WatchKind) -> Self {
        Self { address, kind }
    }

    pub fn read(address: Address) -> Self {
        Self::new(address, WatchKind::Read)
    }

    pub fn write(address: Address) -> Self {
        Self::new(address, WatchKind::Write)
    }
}

impl fmt::Display for Watchpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x} ({})", self.address, self.kind)
    }
}

/// Why a `run`/`step`/`step_back` stopped.
///
/// Terminal outcomes of the recorded trace (crash, invalid jump, program exit)
/// are ordinary values here, never errors. Unrecognised strings from the
/// server are preserved verbatim in [`ExitReason::Fault`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ExitReason {
    Breakpoint,
    ReadWatch,
    WriteWatch,
    Step,
    Exit,
    Fault(String),
}

impl ExitReason {
    pub fn as_str(&self) -> &str {
        match self {
            ExitReason::Breakpoint => "breakpoint",
            ExitReason::ReadWatch => "read_watch",
            ExitReason::WriteWatch => "write_watch",
            ExitReason::Step => "step",
            ExitReason::Exit => "exit",
            ExitReason::Fault(raw) => raw,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ExitReason::Exit | ExitReason::Fault(_))
    }

    pub fn for_watch(kind: WatchKind) -> Self {
        match kind {
            WatchKind::Read => ExitReason::ReadWatch,
            WatchKind::Write => ExitReason::WriteWatch,
        }
    }

    /// Watch kind that produced this stop, if any.
    pub fn watch_kind(&self) -> Option<WatchKind> {
        match self {
            ExitReason::ReadWatch => Some(WatchKind::Read),
            ExitReason::WriteWatch => Some(WatchKind::Write),
            _ => None,
        }
    }
}

impl From<String> for ExitReason {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "breakpoint" => ExitReason::Breakpoint,
            "read_watch" => ExitReason::ReadWatch,
            "write_watch" => ExitReason::WriteWatch,
            "step" => ExitReason::Step,
            "exit" => ExitReason::Exit,
            _ => ExitReason::Fault(raw),
        }
    }
}

impl From<ExitReason> for String {
    fn from(reason: ExitReason) -> Self {
        match reason {
            ExitReason::Fault(raw) => raw,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// External address of a debugging session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionKey {
    pub project_name: String,
    pub run_id: u64,
    pub testcase_id: String,
}

impl SessionKey {
    pub fn new(project_name: impl Into<String>, run_id: u64, testcase_id: impl Into<String>) -> Self {
        Self {
            project_name: project_name.into(),
            run_id,
            testcase_id: testcase_id.into(),
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/run/{}/testcase/{}",
            self.project_name, self.run_id, self.testcase_id
        )
    }
}
