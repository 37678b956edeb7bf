//! Client for Havoc replay-debugging sessions.
//!
//! A [`DebugClient`] opens a [`ReplayDebugger`] on one recorded testcase and
//! drives it forward and backward through the trace, keeping local mirrors of
//! the execution cursor and the breakpoint/watchpoint registry.
//!
//! ```no_run
//! # async fn demo() -> Result<(), havoc_debug_sdk::DebugError> {
//! use havoc_debug_sdk::{ClientConfig, DebugClient};
//!
//! let client = DebugClient::new(ClientConfig::new("localhost:4080")?)?;
//! let mut session = client.open_session("demo", 1, "jump_invalid").await?;
//! session.add_breakpoint(0x0040_0128).await?;
//! let reason = session.run().await?;
//! println!("stopped: {reason} at {}", session.cursor());
//! session.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod channel;
pub mod client;
pub mod config;
pub mod cursor;
pub mod error;
pub mod inspect;
mod lease;
pub mod registry;
pub mod session;
#[cfg(test)]
mod testing;

pub use backend::{DebugBackend, ReqwestDebugBackend};
pub use channel::CommandChannel;
pub use client::DebugClient;
pub use config::ClientConfig;
pub use cursor::Cursor;
pub use error::DebugError;
pub use inspect::FrameSnapshot;
pub use registry::Registry;
pub use session::ReplayDebugger;

pub use havoc_debug_proto as proto;
pub use havoc_debug_proto::{Address, ExitReason, SessionKey, WatchKind, Watchpoint};
