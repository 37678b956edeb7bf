use std::collections::BTreeMap;

use havoc_debug_proto::{
    Address, BreakpointList, CursorState, DebugCommand, ExitPayload, ExitReason, RegisterFile,
    RegisterValue, SessionKey, WatchKind, Watchpoint, WatchpointList, MAX_WRITE_LEN,
};

use crate::channel::CommandChannel;
use crate::cursor::Cursor;
use crate::error::DebugError;
use crate::lease::SessionLease;
use crate::registry::Registry;

/// An open debugging session over one recorded testcase.
///
/// Every command takes `&mut self`, so a session never has two commands in
/// flight. Call [`ReplayDebugger::close`] when done; a session that is simply
/// dropped still releases its key and asks the server to stop it in the
/// background when a tokio runtime is around.
pub struct ReplayDebugger {
    pub(crate) channel: CommandChannel,
    cursor: Cursor,
    registry: Registry,
    register_names: Vec<String>,
    closed: bool,
    _lease: SessionLease,
}

impl ReplayDebugger {
    pub(crate) fn new(channel: CommandChannel, lease: SessionLease) -> Self {
        Self {
            channel,
            cursor: Cursor::default(),
            registry: Registry::default(),
            register_names: Vec::new(),
            closed: false,
            _lease: lease,
        }
    }

    /// Learn the starting cursor and the register capability set.
    pub(crate) async fn seed(&mut self) -> Result<(), DebugError> {
        self.state().await?;
        self.list_registers().await?;
        Ok(())
    }

    pub fn key(&self) -> &SessionKey {
        self.channel.key()
    }

    /// Last cursor reported by the server, without a round trip.
    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    /// Local view of breakpoints and watchpoints, without a round trip.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Register names the server accepts, lower-cased and sorted.
    pub fn register_names(&self) -> &[String] {
        &self.register_names
    }

    pub async fn state(&mut self) -> Result<Cursor, DebugError> {
        let state: CursorState = self.channel.request(DebugCommand::State).await?;
        self.cursor.apply(state);
        Ok(self.cursor)
    }

    /// Run until a breakpoint, a watchpoint access or the end of the trace.
    pub async fn run(&mut self) -> Result<ExitReason, DebugError> {
        self.advance(DebugCommand::Run).await
    }

    /// Retire exactly one instruction. A breakpoint at the current pc does not
    /// fire; a watchpoint hit by the instruction does.
    pub async fn step(&mut self) -> Result<ExitReason, DebugError> {
        self.advance(DebugCommand::Step).await
    }

    /// Undo one retired instruction. At icount 0 this fails with
    /// [`DebugError::AtTraceStart`] and the cursor stays put.
    pub async fn step_back(&mut self) -> Result<ExitReason, DebugError> {
        if self.cursor.at_trace_start() {
            return Err(DebugError::AtTraceStart);
        }
        self.advance(DebugCommand::StepBack).await
    }

    /// Back to the first instruction of the trace. Breakpoints and
    /// watchpoints survive; divergence does not.
    pub async fn rewind(&mut self) -> Result<Cursor, DebugError> {
        self.channel.request_unit(DebugCommand::Rewind).await?;
        self.cursor.clear_divergence();
        self.state().await
    }

    async fn advance(&mut self, command: DebugCommand) -> Result<ExitReason, DebugError> {
        let name = command.name();
        let payload: ExitPayload = self.channel.request(command).await?;
        let cursor = self.state().await?;
        tracing::debug!(
            target: "havoc::debug",
            session = %self.key(),
            command = name,
            exit_reason = %payload.exit_reason,
            pc = cursor.pc,
            icount = cursor.icount,
            "cursor moved"
        );
        Ok(payload.exit_reason)
    }

    pub async fn add_breakpoint(&mut self, address: Address) -> Result<(), DebugError> {
        self.channel
            .request_unit(DebugCommand::AddBreakpoint { address })
            .await?;
        self.registry.insert_breakpoint(address);
        Ok(())
    }

    /// Removing a breakpoint that was never added is not an error.
    pub async fn remove_breakpoint(&mut self, address: Address) -> Result<(), DebugError> {
        self.channel
            .request_unit(DebugCommand::RemoveBreakpoint { address })
            .await?;
        self.registry.remove_breakpoint(address);
        Ok(())
    }

    pub async fn list_breakpoints(&mut self) -> Result<Vec<Address>, DebugError> {
        let list: BreakpointList = self.channel.request(DebugCommand::ListBreakpoints).await?;
        self.registry.replace_breakpoints(list.breakpoints);
        Ok(self.registry.breakpoints().to_vec())
    }

    pub async fn add_watchpoint(&mut self, address: Address, kind: WatchKind) -> Result<(), DebugError> {
        self.channel
            .request_unit(DebugCommand::AddWatchpoint {
                address,
                watch_type: kind,
            })
            .await?;
        self.registry.insert_watchpoint(Watchpoint::new(address, kind));
        Ok(())
    }

    /// Removes only the exact `(address, kind)` pair.
    pub async fn remove_watchpoint(
        &mut self,
        address: Address,
        kind: WatchKind,
    ) -> Result<(), DebugError> {
        self.channel
            .request_unit(DebugCommand::RemoveWatchpoint {
                address,
                watch_type: kind,
            })
            .await?;
        self.registry.remove_watchpoint(Watchpoint::new(address, kind));
        Ok(())
    }

    pub async fn list_watchpoints(&mut self) -> Result<Vec<Watchpoint>, DebugError> {
        let list: WatchpointList = self.channel.request(DebugCommand::ListWatchpoints).await?;
        self.registry.replace_watchpoints(list.watchpoints);
        Ok(self.registry.watchpoints().to_vec())
    }

    pub async fn read_register(&mut self, name: &str) -> Result<u64, DebugError> {
        let reg_name = self.resolve_register(name)?;
        let reply: RegisterValue = self.channel.request(DebugCommand::ReadReg { reg_name }).await?;
        Ok(reply.value)
    }

    /// Overwrite a register from the current position onward. Marks the
    /// cursor diverged and re-reads it, since a `pc` write moves it.
    pub async fn write_register(&mut self, name: &str, value: u64) -> Result<(), DebugError> {
        let reg_name = self.resolve_register(name)?;
        self.channel
            .request_unit(DebugCommand::WriteReg { reg_name, value })
            .await?;
        self.cursor.mark_diverged();
        self.state().await?;
        Ok(())
    }

    /// Current value of every register; also refreshes the set of names
    /// `read_register`/`write_register` accept.
    pub async fn list_registers(&mut self) -> Result<BTreeMap<String, u64>, DebugError> {
        let file: RegisterFile = self.channel.request(DebugCommand::ListRegs).await?;
        let mut names: Vec<String> = file
            .registers
            .keys()
            .map(|name| name.to_ascii_lowercase())
            .collect();
        names.sort();
        names.dedup();
        self.register_names = names;
        Ok(file.registers)
    }

    pub async fn read_memory(&mut self, address: Address, size: u32) -> Result<Vec<u8>, DebugError> {
        let bytes: Vec<u8> = self
            .channel
            .request(DebugCommand::ReadMem { address, size })
            .await?;
        if bytes.len() != size as usize {
            return Err(DebugError::InvalidResponse(format!(
                "read_mem returned {} bytes, expected {size}",
                bytes.len()
            )));
        }
        Ok(bytes)
    }

    /// Write raw bytes into backed memory. Payloads above
    /// [`MAX_WRITE_LEN`] are refused before anything is sent.
    pub async fn write_memory(&mut self, address: Address, data: &[u8]) -> Result<(), DebugError> {
        if data.len() > MAX_WRITE_LEN {
            return Err(DebugError::WriteTooLarge {
                len: data.len(),
                max: MAX_WRITE_LEN,
            });
        }
        self.channel
            .request_unit(DebugCommand::WriteMem {
                address,
                data: data.to_vec(),
            })
            .await?;
        self.cursor.mark_diverged();
        Ok(())
    }

    fn resolve_register(&self, name: &str) -> Result<String, DebugError> {
        let normalized = name.trim().to_ascii_lowercase();
        // An empty capability set means the server never listed any; let it decide.
        if self.register_names.is_empty() || self.register_names.contains(&normalized) {
            Ok(normalized)
        } else {
            Err(DebugError::UnknownRegister(name.trim().to_string()))
        }
    }

    /// Stop the session on the server and release its key.
    pub async fn close(mut self) -> Result<(), DebugError> {
        self.closed = true;
        let key = self.key().clone();
        let result = self.channel.backend().close_session(&key).await;
        match &result {
            Ok(()) => tracing::debug!(target: "havoc::debug", session = %key, "session closed"),
            Err(err) => tracing::warn!(
                target: "havoc::debug",
                session = %key,
                error = %err,
                "failed to stop session on server"
            ),
        }
        result
    }
}

impl Drop for ReplayDebugger {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let key = self.key().clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::warn!(
                    target: "havoc::debug",
                    session = %key,
                    "session dropped without close; stopping it in the background"
                );
                let backend = self.channel.backend();
                handle.spawn(async move {
                    if let Err(err) = backend.close_session(&key).await {
                        tracing::warn!(
                            target: "havoc::debug",
                            session = %key,
                            error = %err,
                            "background session stop failed"
                        );
                    }
                });
            }
            Err(_) => tracing::warn!(
                target: "havoc::debug",
                session = %key,
                "session dropped without close outside a runtime; the server keeps it open"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::client::DebugClient;
    use crate::config::ClientConfig;
    use crate::testing::ScriptedBackend;
    use serde_json::json;

    const REGISTERS: &[&str] = &["r0", "r1", "r2", "r3", "sp", "lr", "pc", "xpsr"];

    async fn open(backend: &ScriptedBackend) -> (DebugClient, ReplayDebugger) {
        backend.push_open_replies(0x40_0100, 0, REGISTERS);
        let config = ClientConfig::new("http://127.0.0.1:4080").unwrap();
        let client = DebugClient::with_backend(config, Arc::new(backend.clone()));
        let debugger = client
            .open_session("demo", 1, "jump_invalid")
            .await
            .unwrap();
        (client, debugger)
    }

    fn state(pc: u64, icount: u64) -> serde_json::Value {
        json!({ "data": { "pc": pc, "icount": icount } })
    }

    #[havoc_test_support::async_test]
    async fn step_refreshes_the_cursor() {
        let backend = ScriptedBackend::new();
        let (_client, mut debugger) = open(&backend).await;
        assert_eq!(debugger.cursor().pc, 0x40_0100);

        backend.push_reply(json!({ "data": { "exit_reason": "step" } }));
        backend.push_reply(state(0x40_0104, 1));
        assert_eq!(debugger.step().await.unwrap(), ExitReason::Step);
        assert_eq!(debugger.cursor().pc, 0x40_0104);
        assert_eq!(debugger.cursor().icount, 1);
        assert_eq!(
            backend.sent_names(),
            vec!["state", "list_regs", "step", "state"]
        );
    }

    #[havoc_test_support::async_test]
    async fn step_back_at_trace_start_is_refused_locally() {
        let backend = ScriptedBackend::new();
        let (_client, mut debugger) = open(&backend).await;
        let sent_before = backend.sent().len();

        let err = debugger.step_back().await.unwrap_err();
        assert!(matches!(err, DebugError::AtTraceStart));
        assert_eq!(backend.sent().len(), sent_before);
        assert!(debugger.cursor().at_trace_start());
    }

    #[havoc_test_support::async_test]
    async fn terminal_outcomes_are_exit_reasons() {
        let backend = ScriptedBackend::new();
        let (_client, mut debugger) = open(&backend).await;

        backend.push_reply(json!({ "data": { "exit_reason": "ExecViolation(0x00002000)" } }));
        backend.push_reply(state(0x2000, 171));
        let reason = debugger.run().await.unwrap();
        assert_eq!(reason, ExitReason::Fault("ExecViolation(0x00002000)".into()));
        assert!(reason.is_terminal());
        assert_eq!(debugger.cursor().pc, 0x2000);
    }

    #[havoc_test_support::async_test]
    async fn unknown_registers_never_reach_the_server() {
        let backend = ScriptedBackend::new();
        let (_client, mut debugger) = open(&backend).await;
        let sent_before = backend.sent().len();

        let err = debugger.read_register("r99").await.unwrap_err();
        assert!(matches!(err, DebugError::UnknownRegister(name) if name == "r99"));
        let err = debugger.write_register("bogus", 1).await.unwrap_err();
        assert!(matches!(err, DebugError::UnknownRegister(_)));
        assert_eq!(backend.sent().len(), sent_before);
    }

    #[havoc_test_support::async_test]
    async fn register_names_are_sent_lowercase() {
        let backend = ScriptedBackend::new();
        let (_client, mut debugger) = open(&backend).await;

        backend.push_reply(json!({ "data": { "value": 0x7f } }));
        assert_eq!(debugger.read_register("R2").await.unwrap(), 0x7f);
        assert_eq!(
            backend.sent().last().cloned(),
            Some(json!({ "c": "read_reg", "reg_name": "r2" }))
        );
    }

    #[havoc_test_support::async_test]
    async fn writes_mark_divergence_and_rewind_clears_it() {
        let backend = ScriptedBackend::new();
        let (_client, mut debugger) = open(&backend).await;

        backend.push_reply(json!({ "success": true }));
        backend.push_reply(state(0x40_0100, 0));
        debugger.write_register("r2", 0x7f).await.unwrap();
        assert!(debugger.cursor().diverged);

        backend.push_reply(json!({ "success": true }));
        backend.push_reply(state(0x40_0100, 0));
        let cursor = debugger.rewind().await.unwrap();
        assert!(!cursor.diverged);
        assert!(cursor.at_trace_start());
    }

    #[havoc_test_support::async_test]
    async fn pc_writes_move_the_cursor() {
        let backend = ScriptedBackend::new();
        let (_client, mut debugger) = open(&backend).await;

        backend.push_reply(json!({ "success": true }));
        backend.push_reply(json!({ "data": { "pc": 0x40_0140, "icount": 0, "diverged": true } }));
        debugger.write_register("PC", 0x40_0140).await.unwrap();
        assert_eq!(debugger.cursor().pc, 0x40_0140);
        assert!(debugger.cursor().diverged);
        assert_eq!(
            backend.sent().last().cloned(),
            Some(json!({ "c": "state" }))
        );
    }

    #[havoc_test_support::async_test]
    async fn oversized_writes_are_refused_before_sending() {
        let backend = ScriptedBackend::new();
        let (_client, mut debugger) = open(&backend).await;
        let sent_before = backend.sent().len();

        let err = debugger
            .write_memory(0x2000_0000, &vec![0u8; MAX_WRITE_LEN + 1])
            .await
            .unwrap_err();
        assert!(matches!(err, DebugError::WriteTooLarge { len: 4097, max: 4096 }));
        assert_eq!(backend.sent().len(), sent_before);
        assert!(!debugger.cursor().diverged);
    }

    #[havoc_test_support::async_test]
    async fn mmio_failures_do_not_mark_divergence() {
        let backend = ScriptedBackend::new();
        let (_client, mut debugger) = open(&backend).await;

        backend.push_reply(json!({ "message": "cannot write to IO memory at 0x40000000" }));
        let err = debugger
            .write_memory(0x4000_0000, &[1, 2, 3, 4])
            .await
            .unwrap_err();
        assert!(matches!(err, DebugError::IoMemoryWrite { address: 0x4000_0000, .. }));
        assert!(!debugger.cursor().diverged);
    }

    #[havoc_test_support::async_test]
    async fn registry_mirror_follows_commands_and_listing() {
        let backend = ScriptedBackend::new();
        let (_client, mut debugger) = open(&backend).await;

        backend.push_reply(json!({ "success": true }));
        backend.push_reply(json!({ "success": true }));
        debugger.add_watchpoint(0x2000_0010, WatchKind::Read).await.unwrap();
        debugger.add_watchpoint(0x2000_0010, WatchKind::Write).await.unwrap();
        backend.push_reply(json!({ "success": true }));
        debugger
            .remove_watchpoint(0x2000_0010, WatchKind::Write)
            .await
            .unwrap();
        assert_eq!(
            debugger.registry().watchpoints(),
            &[Watchpoint::read(0x2000_0010)]
        );

        backend.push_reply(json!({ "data": { "breakpoints": [4194600, 4194600] } }));
        assert_eq!(debugger.list_breakpoints().await.unwrap(), vec![0x40_0128]);
        assert_eq!(debugger.registry().breakpoints(), &[0x40_0128]);
    }

    #[havoc_test_support::async_test]
    async fn short_memory_reads_are_invalid_responses() {
        let backend = ScriptedBackend::new();
        let (_client, mut debugger) = open(&backend).await;

        backend.push_reply(json!({ "data": [1, 2] }));
        let err = debugger.read_memory(0x2000_0000, 4).await.unwrap_err();
        assert!(matches!(err, DebugError::InvalidResponse(_)));
    }

    #[havoc_test_support::async_test]
    async fn close_stops_the_session_and_frees_the_key() {
        let backend = ScriptedBackend::new();
        let (client, debugger) = open(&backend).await;
        let key = debugger.key().clone();
        assert!(client.is_open(&key));

        debugger.close().await.unwrap();
        assert_eq!(backend.closed(), vec![key.clone()]);
        assert!(!client.is_open(&key));
    }

    #[havoc_test_support::async_test]
    async fn dropping_stops_the_session_in_the_background() {
        let backend = ScriptedBackend::new();
        let (client, debugger) = open(&backend).await;
        let key = debugger.key().clone();

        drop(debugger);
        assert!(!client.is_open(&key));
        for _ in 0..10 {
            if !backend.closed().is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(backend.closed(), vec![key]);
    }
}
