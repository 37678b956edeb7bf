use std::fmt::Write as _;

use havoc_debug_sdk::{Address, DebugError, ExitReason, ReplayDebugger, WatchKind};
use thiserror::Error;

pub const HELP: &str = "\
run                      continue to the next breakpoint, watch hit or end of trace
step [N]                 retire N instructions (default 1)
back [N]                 undo N instructions (default 1)
rewind                   restart the trace, keeping breakpoints and watchpoints
state                    show pc, icount and divergence
break ADDR | delete ADDR add or remove a breakpoint
breaks                   list breakpoints
watch ADDR read|write    add a watchpoint; unwatch removes one
watches                  list watchpoints
reg NAME | set NAME VAL  read or write a register
regs                     list all registers
x ADDR SIZE              dump memory
write ADDR HEX           write bytes to memory
dis [COUNT] | dis ADDR COUNT
                         disassemble at pc or at ADDR
bt                       backtrace
info                     cursor, registers, code and backtrace together
quit                     stop the session and exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Run,
    Step(u32),
    Back(u32),
    Rewind,
    State,
    Break(Address),
    Delete(Address),
    Breaks,
    Watch(Address, WatchKind),
    Unwatch(Address, WatchKind),
    Watches,
    Reg(String),
    Set(String, u64),
    Regs,
    Examine(Address, u32),
    Write(Address, Vec<u8>),
    Disassemble(Option<u32>),
    DisassembleRange(Address, u32),
    Backtrace,
    Info,
    Help,
    Quit,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("unknown command `{0}`; try `help`")]
    Unknown(String),
    #[error("usage: {0}")]
    Usage(&'static str),
    #[error("invalid number `{0}`")]
    Number(String),
    #[error("invalid hex bytes `{0}`")]
    Hex(String),
}

/// Parse one prompt line. Blank lines and `#` comments yield `None`.
pub fn parse(line: &str) -> Result<Option<ReplCommand>, ParseError> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let words: Vec<&str> = line.split_whitespace().collect();
    let (head, args) = (words[0].to_ascii_lowercase(), &words[1..]);
    let command = match (head.as_str(), args) {
        ("run" | "r" | "c" | "continue", []) => ReplCommand::Run,
        ("step" | "s" | "si", []) => ReplCommand::Step(1),
        ("step" | "s" | "si", [n]) => ReplCommand::Step(count(n)?),
        ("back" | "rs", []) => ReplCommand::Back(1),
        ("back" | "rs", [n]) => ReplCommand::Back(count(n)?),
        ("rewind", []) => ReplCommand::Rewind,
        ("state", []) => ReplCommand::State,
        ("break" | "br", [addr]) => ReplCommand::Break(number(addr)?),
        ("break" | "br", _) => return Err(ParseError::Usage("break ADDR")),
        ("delete" | "d", [addr]) => ReplCommand::Delete(number(addr)?),
        ("delete" | "d", _) => return Err(ParseError::Usage("delete ADDR")),
        ("breaks", []) => ReplCommand::Breaks,
        ("watch", [addr, kind]) => ReplCommand::Watch(number(addr)?, watch_kind(kind)?),
        ("watch", _) => return Err(ParseError::Usage("watch ADDR read|write")),
        ("unwatch", [addr, kind]) => ReplCommand::Unwatch(number(addr)?, watch_kind(kind)?),
        ("unwatch", _) => return Err(ParseError::Usage("unwatch ADDR read|write")),
        ("watches", []) => ReplCommand::Watches,
        ("reg", [name]) => ReplCommand::Reg((*name).to_string()),
        ("reg", _) => return Err(ParseError::Usage("reg NAME")),
        ("set", [name, value]) => ReplCommand::Set((*name).to_string(), number(value)?),
        ("set", _) => return Err(ParseError::Usage("set NAME VALUE")),
        ("regs", []) => ReplCommand::Regs,
        ("x", [addr, size]) => ReplCommand::Examine(number(addr)?, count(size)?),
        ("x", _) => return Err(ParseError::Usage("x ADDR SIZE")),
        ("write", [addr, rest @ ..]) if !rest.is_empty() => {
            let raw: String = rest.concat();
            let bytes = hex::decode(raw.trim_start_matches("0x"))
                .map_err(|_| ParseError::Hex(rest.join(" ")))?;
            ReplCommand::Write(number(addr)?, bytes)
        }
        ("write", _) => return Err(ParseError::Usage("write ADDR HEX")),
        ("dis", []) => ReplCommand::Disassemble(None),
        ("dis", [n]) => ReplCommand::Disassemble(Some(count(n)?)),
        ("dis", [addr, n]) => ReplCommand::DisassembleRange(number(addr)?, count(n)?),
        ("bt" | "backtrace", []) => ReplCommand::Backtrace,
        ("info", []) => ReplCommand::Info,
        ("help" | "?", []) => ReplCommand::Help,
        ("quit" | "q" | "exit", []) => ReplCommand::Quit,
        _ => return Err(ParseError::Unknown(line.to_string())),
    };
    Ok(Some(command))
}

fn number(raw: &str) -> Result<u64, ParseError> {
    let cleaned = raw.trim().replace('_', "");
    let parsed = match cleaned
        .strip_prefix("0x")
        .or_else(|| cleaned.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => cleaned.parse(),
    };
    parsed.map_err(|_| ParseError::Number(raw.to_string()))
}

fn count(raw: &str) -> Result<u32, ParseError> {
    number(raw).and_then(|n| u32::try_from(n).map_err(|_| ParseError::Number(raw.to_string())))
}

fn watch_kind(raw: &str) -> Result<WatchKind, ParseError> {
    raw.parse()
        .map_err(|_| ParseError::Usage("watch kind must be read or write"))
}

/// Whether the prompt should keep going after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Run one command against the session, appending human-readable output to
/// `out`. Refusals such as unreadable memory come back as `Err` and leave the
/// session usable.
pub async fn execute(
    session: &mut ReplayDebugger,
    command: ReplCommand,
    out: &mut String,
) -> Result<Flow, DebugError> {
    match command {
        ReplCommand::Run => {
            let reason = session.run().await?;
            stopped(out, &reason, session);
        }
        ReplCommand::Step(n) => {
            let mut reason = ExitReason::Step;
            for _ in 0..n {
                reason = session.step().await?;
                if reason != ExitReason::Step {
                    break;
                }
            }
            stopped(out, &reason, session);
        }
        ReplCommand::Back(n) => {
            for i in 0..n {
                if i > 0 && session.cursor().at_trace_start() {
                    break;
                }
                session.step_back().await?;
            }
            let _ = writeln!(out, "{}", session.cursor());
        }
        ReplCommand::Rewind => {
            let cursor = session.rewind().await?;
            let _ = writeln!(out, "{cursor}");
        }
        ReplCommand::State => {
            let cursor = session.state().await?;
            let _ = writeln!(out, "{cursor}");
        }
        ReplCommand::Break(address) => {
            session.add_breakpoint(address).await?;
            let _ = writeln!(out, "breakpoint at {address:#010x}");
        }
        ReplCommand::Delete(address) => {
            session.remove_breakpoint(address).await?;
            let _ = writeln!(out, "removed breakpoint at {address:#010x}");
        }
        ReplCommand::Breaks => {
            let breakpoints = session.list_breakpoints().await?;
            if breakpoints.is_empty() {
                out.push_str("no breakpoints\n");
            }
            for address in breakpoints {
                let _ = writeln!(out, "{address:#010x}");
            }
        }
        ReplCommand::Watch(address, kind) => {
            session.add_watchpoint(address, kind).await?;
            let _ = writeln!(out, "{kind} watch at {address:#010x}");
        }
        ReplCommand::Unwatch(address, kind) => {
            session.remove_watchpoint(address, kind).await?;
            let _ = writeln!(out, "removed {kind} watch at {address:#010x}");
        }
        ReplCommand::Watches => {
            let watchpoints = session.list_watchpoints().await?;
            if watchpoints.is_empty() {
                out.push_str("no watchpoints\n");
            }
            for watchpoint in watchpoints {
                let _ = writeln!(out, "{:#010x} {}", watchpoint.address, watchpoint.kind);
            }
        }
        ReplCommand::Reg(name) => {
            let value = session.read_register(&name).await?;
            let _ = writeln!(out, "{} = {value:#010x}", name.to_ascii_lowercase());
        }
        ReplCommand::Set(name, value) => {
            session.write_register(&name, value).await?;
            let _ = writeln!(out, "{} = {value:#010x} (diverged)", name.to_ascii_lowercase());
        }
        ReplCommand::Regs => {
            for (name, value) in session.list_registers().await? {
                let _ = writeln!(out, "{name:>5} = {value:#010x}");
            }
        }
        ReplCommand::Examine(address, size) => {
            let bytes = session.read_memory(address, size).await?;
            out.push_str(&hexdump(address, &bytes));
        }
        ReplCommand::Write(address, bytes) => {
            session.write_memory(address, &bytes).await?;
            let _ = writeln!(
                out,
                "wrote {} bytes at {address:#010x} (diverged)",
                bytes.len()
            );
        }
        ReplCommand::Disassemble(count) => {
            for line in session.disassemble(count).await? {
                let _ = writeln!(out, "{line}");
            }
        }
        ReplCommand::DisassembleRange(start, count) => {
            for line in session.disassemble_range(start, count).await? {
                let _ = writeln!(out, "{line}");
            }
        }
        ReplCommand::Backtrace => {
            for (depth, address) in session.backtrace().await?.into_iter().enumerate() {
                let _ = writeln!(out, "#{depth} {address:#010x}");
            }
        }
        ReplCommand::Info => {
            let snapshot = session.snapshot(5).await?;
            let _ = write!(out, "{snapshot}");
        }
        ReplCommand::Help => {
            out.push_str(HELP);
            out.push('\n');
        }
        ReplCommand::Quit => return Ok(Flow::Quit),
    }
    Ok(Flow::Continue)
}

fn stopped(out: &mut String, reason: &ExitReason, session: &ReplayDebugger) {
    let _ = writeln!(out, "stopped: {reason} at {}", session.cursor());
}

/// Classic 16-byte hexdump, offsets relative to `base`.
fn hexdump(base: Address, bytes: &[u8]) -> String {
    const WIDTH: usize = 16;
    let mut out = String::new();
    for (row, chunk) in bytes.chunks(WIDTH).enumerate() {
        let _ = write!(out, "{:08x}  ", base.wrapping_add((row * WIDTH) as u64));
        for column in 0..WIDTH {
            if column == WIDTH / 2 {
                out.push(' ');
            }
            match chunk.get(column) {
                Some(byte) => {
                    let _ = write!(out, "{byte:02x} ");
                }
                None => out.push_str("   "),
            }
        }
        out.push(' ');
        out.extend(chunk.iter().map(|&byte| {
            if byte.is_ascii_graphic() || byte == b' ' {
                byte as char
            } else {
                '.'
            }
        }));
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use havoc_debug_sdk::{ClientConfig, DebugClient};
    use havoc_replay_sim::{Fixture, ReplayServer};

    #[test]
    fn parses_movement_and_counts() {
        assert_eq!(parse("run").unwrap(), Some(ReplCommand::Run));
        assert_eq!(parse("  step ").unwrap(), Some(ReplCommand::Step(1)));
        assert_eq!(parse("step 0x10").unwrap(), Some(ReplCommand::Step(16)));
        assert_eq!(parse("back 3").unwrap(), Some(ReplCommand::Back(3)));
        assert_eq!(parse("").unwrap(), None);
        assert_eq!(parse("# comment").unwrap(), None);
    }

    #[test]
    fn parses_stop_conditions() {
        assert_eq!(
            parse("break 0x0040_0128").unwrap(),
            Some(ReplCommand::Break(0x40_0128))
        );
        assert_eq!(
            parse("watch 0x20000010 WRITE").unwrap(),
            Some(ReplCommand::Watch(0x2000_0010, WatchKind::Write))
        );
        assert_eq!(
            parse("watch 0x20000010 exec"),
            Err(ParseError::Usage("watch kind must be read or write"))
        );
        assert_eq!(parse("break"), Err(ParseError::Usage("break ADDR")));
    }

    #[test]
    fn parses_memory_and_disassembly() {
        assert_eq!(
            parse("write 0x20000100 de ad be ef").unwrap(),
            Some(ReplCommand::Write(0x2000_0100, vec![0xde, 0xad, 0xbe, 0xef]))
        );
        assert!(matches!(parse("write 0x20000100 xyz"), Err(ParseError::Hex(_))));
        assert_eq!(
            parse("x 0x20000000 16").unwrap(),
            Some(ReplCommand::Examine(0x2000_0000, 16))
        );
        assert_eq!(parse("dis").unwrap(), Some(ReplCommand::Disassemble(None)));
        assert_eq!(
            parse("dis 0x400200 4").unwrap(),
            Some(ReplCommand::DisassembleRange(0x40_0200, 4))
        );
        assert_eq!(
            parse("set r2 0x7f").unwrap(),
            Some(ReplCommand::Set("r2".into(), 0x7f))
        );
        assert!(matches!(parse("teleport"), Err(ParseError::Unknown(_))));
        assert_eq!(parse("x 0x0 4294967296"), Err(ParseError::Number("4294967296".into())));
    }

    #[havoc_test_support::async_test]
    async fn script_drives_a_session() {
        let server = ReplayServer::new();
        server.add_fixture(&Fixture::demo().unwrap());
        let config = ClientConfig::new("http://127.0.0.1:9").unwrap();
        let client = DebugClient::with_backend(config, Arc::new(server));
        let mut session = client
            .open_session("demo", 1, "jump_invalid")
            .await
            .ok()
            .unwrap();

        let mut out = String::new();
        for line in ["break 0x400128", "run", "set r2 0x7f", "run", "x 0x20000000 4"] {
            let command = parse(line).unwrap().unwrap();
            assert_eq!(execute(&mut session, command, &mut out).await.unwrap(), Flow::Continue);
        }
        assert!(out.contains("stopped: breakpoint at pc=0x00400128 icount=166"), "{out}");
        assert!(out.contains("stopped: exit at pc=0x00400140"), "{out}");
        assert!(out.contains("HAVC"), "{out}");

        let err = execute(&mut session, ReplCommand::Examine(0x4000_0000, 4), &mut out)
            .await
            .unwrap_err();
        assert!(matches!(err, DebugError::MemoryUnreadable { .. }));
        assert_eq!(
            execute(&mut session, ReplCommand::Quit, &mut out).await.unwrap(),
            Flow::Quit
        );
        session.close().await.unwrap();
    }

    #[test]
    fn hexdump_pads_short_rows() {
        let dump = hexdump(0x2000_0000, b"HAVC");
        assert!(dump.starts_with("20000000  48 41 56 43 "));
        assert!(dump.ends_with(" HAVC\n"));
        let full = hexdump(0, &[0u8; 16]);
        assert_eq!(dump.len(), full.len() - 12);
    }
}
