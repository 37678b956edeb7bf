//! Failure taxonomy shared by both ends of the wire.
//!
//! Failures travel as free-form `message` strings. The server builds them with
//! the constructors below and the client recovers the kind with
//! [`FailureKind::classify`], so both sides agree on the wording.

use crate::types::{Address, MAX_WRITE_LEN};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    UnknownRegister(String),
    MemoryUnreadable(Address),
    IoMemoryWrite(Address),
    WriteTooLarge(usize),
    AtTraceStart,
    TestcaseNotFound(String),
    Other(String),
}

const UNKNOWN_REGISTER: &str = "unknown register: ";
const CANNOT_READ: &str = "cannot read memory at ";
const CANNOT_WRITE_IO: &str = "cannot write to IO memory at ";
const WRITE_OF: &str = "write of ";
const AT_TRACE_START: &str = "cannot step back past the start of the trace";
const TESTCASE_NOT_FOUND: &str = "testcase not found: ";

impl FailureKind {
    /// Canonical message for this failure, optionally followed by detail.
    pub fn message(&self) -> String {
        match self {
            FailureKind::UnknownRegister(name) => format!("{UNKNOWN_REGISTER}{name}"),
            FailureKind::MemoryUnreadable(address) => format!("{CANNOT_READ}{address:#010x}"),
            FailureKind::IoMemoryWrite(address) => format!("{CANNOT_WRITE_IO}{address:#010x}"),
            FailureKind::WriteTooLarge(len) => {
                format!("{WRITE_OF}{len} bytes exceeds the {MAX_WRITE_LEN} byte limit")
            }
            FailureKind::AtTraceStart => AT_TRACE_START.to_string(),
            FailureKind::TestcaseNotFound(id) => format!("{TESTCASE_NOT_FOUND}{id}"),
            FailureKind::Other(message) => message.clone(),
        }
    }

    pub fn with_detail(&self, detail: &str) -> String {
        format!("{}: {detail}", self.message())
    }

    pub fn classify(message: &str) -> Self {
        let trimmed = message.trim();
        if let Some(rest) = trimmed.strip_prefix(UNKNOWN_REGISTER) {
            return FailureKind::UnknownRegister(first_token(rest).to_string());
        }
        if let Some(rest) = trimmed.strip_prefix(CANNOT_READ) {
            if let Some(address) = parse_address(first_token(rest)) {
                return FailureKind::MemoryUnreadable(address);
            }
        }
        if let Some(rest) = trimmed.strip_prefix(CANNOT_WRITE_IO) {
            if let Some(address) = parse_address(first_token(rest)) {
                return FailureKind::IoMemoryWrite(address);
            }
        }
        if let Some(rest) = trimmed.strip_prefix(WRITE_OF) {
            if let Some(len) = rest
                .split_whitespace()
                .next()
                .and_then(|n| n.parse::<usize>().ok())
            {
                return FailureKind::WriteTooLarge(len);
            }
        }
        if trimmed.starts_with(AT_TRACE_START) {
            return FailureKind::AtTraceStart;
        }
        if let Some(rest) = trimmed.strip_prefix(TESTCASE_NOT_FOUND) {
            return FailureKind::TestcaseNotFound(rest.trim().to_string());
        }
        FailureKind::Other(trimmed.to_string())
    }
}

fn first_token(rest: &str) -> &str {
    rest.split(|c: char| c == ':' || c.is_whitespace())
        .next()
        .unwrap_or(rest)
}

fn parse_address(raw: &str) -> Option<Address> {
    let raw = raw.trim();
    match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => Address::from_str_radix(hex, 16).ok(),
        None => raw.parse().ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_round_trips_every_kind() {
        for kind in [
            FailureKind::UnknownRegister("r99".into()),
            FailureKind::MemoryUnreadable(0x4000_0000),
            FailureKind::IoMemoryWrite(0x4000_0004),
            FailureKind::WriteTooLarge(5000),
            FailureKind::AtTraceStart,
            FailureKind::TestcaseNotFound("0x402dbb_0x2000_jump_invalid".into()),
        ] {
            assert_eq!(FailureKind::classify(&kind.message()), kind);
        }
    }

    #[test]
    fn classify_tolerates_trailing_detail() {
        let message = FailureKind::MemoryUnreadable(0x4000_0000).with_detail("region is mmio");
        assert_eq!(
            FailureKind::classify(&message),
            FailureKind::MemoryUnreadable(0x4000_0000)
        );
    }

    #[test]
    fn unrecognised_messages_are_kept() {
        assert_eq!(
            FailureKind::classify("emulator crashed"),
            FailureKind::Other("emulator crashed".into())
        );
    }
}
