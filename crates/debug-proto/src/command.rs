use serde::{Deserialize, Serialize};

use crate::types::{Address, WatchKind};
use crate::ProtoError;

/// Every command a debugging session accepts. Serializes to
/// `{ "c": <name>, ...fields }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "c", rename_all = "snake_case")]
pub enum DebugCommand {
    Run,
    Step,
    StepBack,
    Rewind,
    State,
    AddBreakpoint {
        address: Address,
    },
    RemoveBreakpoint {
        address: Address,
    },
    ListBreakpoints,
    AddWatchpoint {
        address: Address,
        watch_type: WatchKind,
    },
    RemoveWatchpoint {
        address: Address,
        watch_type: WatchKind,
    },
    ListWatchpoints,
    ReadReg {
        reg_name: String,
    },
    WriteReg {
        reg_name: String,
        value: u64,
    },
    ListRegs,
    ReadMem {
        address: Address,
        size: u32,
    },
    WriteMem {
        address: Address,
        data: Vec<u8>,
    },
    Disassemble {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        count: Option<u32>,
    },
    DisassembleRange {
        start_addr: Address,
        count: u32,
    },
    Backtrace,
}

impl DebugCommand {
    /// The `c` tag this command carries on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            DebugCommand::Run => "run",
            DebugCommand::Step => "step",
            DebugCommand::StepBack => "step_back",
            DebugCommand::Rewind => "rewind",
            DebugCommand::State => "state",
            DebugCommand::AddBreakpoint { .. } => "add_breakpoint",
            DebugCommand::RemoveBreakpoint { .. } => "remove_breakpoint",
            DebugCommand::ListBreakpoints => "list_breakpoints",
            DebugCommand::AddWatchpoint { .. } => "add_watchpoint",
            DebugCommand::RemoveWatchpoint { .. } => "remove_watchpoint",
            DebugCommand::ListWatchpoints => "list_watchpoints",
            DebugCommand::ReadReg { .. } => "read_reg",
            DebugCommand::WriteReg { .. } => "write_reg",
            DebugCommand::ListRegs => "list_regs",
            DebugCommand::ReadMem { .. } => "read_mem",
            DebugCommand::WriteMem { .. } => "write_mem",
            DebugCommand::Disassemble { .. } => "disassemble",
            DebugCommand::DisassembleRange { .. } => "disassemble_range",
            DebugCommand::Backtrace => "backtrace",
        }
    }

    /// Whether replaying the command leaves the session exactly as one send
    /// would. Callers may retry these; never the others.
    pub fn is_idempotent(&self) -> bool {
        !matches!(
            self,
            DebugCommand::Run
                | DebugCommand::Step
                | DebugCommand::StepBack
                | DebugCommand::Rewind
                | DebugCommand::WriteReg { .. }
                | DebugCommand::WriteMem { .. }
        )
    }

    /// Commands after which the cursor may sit somewhere else.
    pub fn moves_cursor(&self) -> bool {
        matches!(
            self,
            DebugCommand::Run | DebugCommand::Step | DebugCommand::StepBack | DebugCommand::Rewind
        )
    }

    pub fn to_json(&self) -> Result<String, ProtoError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self, ProtoError> {
        Ok(serde_json::from_str(raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unit_commands_carry_only_the_tag() {
        assert_eq!(
            serde_json::to_value(DebugCommand::StepBack).unwrap(),
            json!({ "c": "step_back" })
        );
        assert_eq!(
            serde_json::to_value(DebugCommand::ListRegs).unwrap(),
            json!({ "c": "list_regs" })
        );
    }

    #[test]
    fn watchpoint_commands_use_string_watch_types() {
        let cmd = DebugCommand::RemoveWatchpoint {
            address: 0x2000_0000,
            watch_type: WatchKind::Write,
        };
        assert_eq!(
            serde_json::to_value(&cmd).unwrap(),
            json!({ "c": "remove_watchpoint", "address": 0x2000_0000u64, "watch_type": "write" })
        );
        assert_eq!(cmd.name(), "remove_watchpoint");
    }

    #[test]
    fn disassemble_count_is_optional() {
        assert_eq!(
            serde_json::to_value(DebugCommand::Disassemble { count: None }).unwrap(),
            json!({ "c": "disassemble" })
        );
        let parsed = DebugCommand::from_json(r#"{"c":"disassemble","count":4}"#).unwrap();
        assert_eq!(parsed, DebugCommand::Disassemble { count: Some(4) });
    }

    #[test]
    fn parses_register_write_from_wire() {
        let parsed =
            DebugCommand::from_json(r#"{"c":"write_reg","reg_name":"r2","value":127}"#).unwrap();
        assert_eq!(
            parsed,
            DebugCommand::WriteReg {
                reg_name: "r2".into(),
                value: 127
            }
        );
        assert!(!parsed.is_idempotent());
    }

    #[test]
    fn rejects_unknown_command_tags() {
        assert!(DebugCommand::from_json(r#"{"c":"reverse_continue"}"#).is_err());
    }

    #[test]
    fn classifies_cursor_motion() {
        assert!(DebugCommand::Rewind.moves_cursor());
        assert!(!DebugCommand::ListBreakpoints.moves_cursor());
        assert!(DebugCommand::ListBreakpoints.is_idempotent());
        assert!(!DebugCommand::Step.is_idempotent());
    }
}
