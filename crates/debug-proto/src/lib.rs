//! Shared protocol definitions for client ↔ replay-server debugging sessions.
//! Keeping this in a dedicated crate lets the SDK, the replay server and any
//! future bindings agree on one wire shape without pulling in runtime code.

pub mod command;
pub mod failure;
pub mod reply;
pub mod types;

pub use command::DebugCommand;
pub use failure::FailureKind;
pub use reply::{
    ApiResult, Backtrace, BreakpointList, CursorState, DebugReply, Disassembly, ExitPayload,
    RegisterFile, RegisterValue, ResponseEnvelope, WatchpointList,
};
pub use types::{Address, ExitReason, SessionKey, WatchKind, Watchpoint, MAX_WRITE_LEN};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("malformed `{command}` payload: {source}")]
    MalformedPayload {
        command: &'static str,
        source: serde_json::Error,
    },
    #[error("unknown watch type '{0}'")]
    UnknownWatchKind(String),
}
