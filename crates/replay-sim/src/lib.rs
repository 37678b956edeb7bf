//! Deterministic replay server for recorded testcases.
//!
//! A [`Fixture`] describes a firmware image (memory layout, program, initial
//! registers) together with the testcase inputs recorded against it. The
//! [`ReplayServer`] opens a [`ReplaySession`] per testcase and answers the
//! debug wire protocol, either in-process through its
//! [`havoc_debug_sdk::DebugBackend`] implementation or over HTTP via
//! [`http::router`].

pub mod error;
pub mod fixtures;
pub mod http;
pub mod machine;
pub mod memory;
pub mod program;
pub mod recording;
pub mod replay;
pub mod server;

pub use error::{FixtureError, ServerError};
pub use fixtures::Fixture;
pub use memory::{MemoryMap, RegionKind, RegionSpec};
pub use program::{Instruction, Program, Reg};
pub use recording::{Firmware, Recording};
pub use replay::ReplaySession;
pub use server::ReplayServer;
