use std::path::PathBuf;

use thiserror::Error;

use crate::memory::LayoutError;
use crate::program::{AsmError, UnknownRegister};

#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("failed to read fixture {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid fixture toml: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid hex in {field}: {source}")]
    Hex {
        field: String,
        source: hex::FromHexError,
    },
    #[error("program does not assemble: {0}")]
    Assembly(#[from] AsmError),
    #[error("invalid memory layout: {0}")]
    Layout(#[from] LayoutError),
    #[error("invalid initial register: {0}")]
    Register(#[from] UnknownRegister),
    #[error("invalid fixture: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },
    #[error("server stopped: {0}")]
    Serve(#[from] std::io::Error),
    #[error(transparent)]
    Fixture(#[from] FixtureError),
}
