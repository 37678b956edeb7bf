use havoc_debug_proto::{Address, FailureKind, ProtoError, SessionKey, MAX_WRITE_LEN};
use reqwest::StatusCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DebugError {
    #[error("invalid client configuration: {0}")]
    InvalidConfig(String),
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("unexpected http status {0}")]
    HttpStatus(StatusCode),
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtoError),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("testcase not found: {0}")]
    TestcaseNotFound(String),
    #[error("unknown register: {0}")]
    UnknownRegister(String),
    #[error("{message}")]
    MemoryUnreadable { address: Address, message: String },
    #[error("{message}")]
    IoMemoryWrite { address: Address, message: String },
    #[error("write of {len} bytes exceeds the {max} byte limit")]
    WriteTooLarge { len: usize, max: usize },
    #[error("cannot step back past the start of the trace")]
    AtTraceStart,
    #[error("a debugging session for {0} is already open")]
    SessionAlreadyOpen(SessionKey),
    #[error("server rejected request: {0}")]
    Server(String),
}

impl DebugError {
    /// Map a server failure message onto the client taxonomy.
    pub fn from_failure(message: String) -> Self {
        match FailureKind::classify(&message) {
            FailureKind::UnknownRegister(name) => DebugError::UnknownRegister(name),
            FailureKind::MemoryUnreadable(address) => {
                DebugError::MemoryUnreadable { address, message }
            }
            FailureKind::IoMemoryWrite(address) => DebugError::IoMemoryWrite { address, message },
            FailureKind::WriteTooLarge(len) => DebugError::WriteTooLarge {
                len,
                max: MAX_WRITE_LEN,
            },
            FailureKind::AtTraceStart => DebugError::AtTraceStart,
            FailureKind::TestcaseNotFound(id) => DebugError::TestcaseNotFound(id),
            FailureKind::Other(message) => DebugError::Server(message),
        }
    }

    /// Transport or codec failure, as opposed to a refusal by the session.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            DebugError::Network(_)
                | DebugError::HttpStatus(_)
                | DebugError::Protocol(_)
                | DebugError::InvalidResponse(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_messages_map_to_typed_errors() {
        assert!(matches!(
            DebugError::from_failure("unknown register: r99".into()),
            DebugError::UnknownRegister(name) if name == "r99"
        ));
        assert!(matches!(
            DebugError::from_failure("cannot read memory at 0x40000000: region is mmio".into()),
            DebugError::MemoryUnreadable { address: 0x4000_0000, .. }
        ));
        assert!(matches!(
            DebugError::from_failure("cannot write to IO memory at 0x40000004".into()),
            DebugError::IoMemoryWrite { address: 0x4000_0004, .. }
        ));
        assert!(matches!(
            DebugError::from_failure("write of 5000 bytes exceeds the 4096 byte limit".into()),
            DebugError::WriteTooLarge { len: 5000, max: 4096 }
        ));
        assert!(matches!(
            DebugError::from_failure("cannot step back past the start of the trace".into()),
            DebugError::AtTraceStart
        ));
    }

    #[test]
    fn unknown_failures_are_kept_verbatim() {
        let err = DebugError::from_failure("emulator crashed".into());
        assert_eq!(err.to_string(), "server rejected request: emulator crashed");
        assert!(!err.is_transport());
    }

    #[test]
    fn memory_errors_display_the_server_message() {
        let message = "cannot read memory at 0x40000000: region is mmio".to_string();
        let err = DebugError::from_failure(message.clone());
        assert_eq!(err.to_string(), message);
    }
}
