use std::sync::Arc;

use havoc_debug_proto::{DebugCommand, DebugReply, SessionKey};
use serde::de::DeserializeOwned;

use crate::backend::DebugBackend;
use crate::error::DebugError;

/// One-command-per-call pipe into an open session.
///
/// Nothing here retries or batches: a transport failure surfaces to the caller
/// as-is, even for idempotent commands.
#[derive(Clone)]
pub struct CommandChannel {
    key: SessionKey,
    backend: Arc<dyn DebugBackend>,
}

impl CommandChannel {
    pub fn new(key: SessionKey, backend: Arc<dyn DebugBackend>) -> Self {
        Self { key, backend }
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub(crate) fn backend(&self) -> Arc<dyn DebugBackend> {
        Arc::clone(&self.backend)
    }

    pub async fn execute(&self, command: &DebugCommand) -> Result<DebugReply, DebugError> {
        let payload = command.to_json()?;
        let raw = match self.backend.send_command(&self.key, payload).await {
            Ok(raw) => raw,
            Err(err) => {
                tracing::debug!(
                    target: "havoc::debug",
                    session = %self.key,
                    command = command.name(),
                    error = %err,
                    "command transport failed"
                );
                return Err(err);
            }
        };
        let reply = DebugReply::from_json(&raw)?;
        match &reply {
            DebugReply::Failure(message) => tracing::debug!(
                target: "havoc::debug",
                session = %self.key,
                command = command.name(),
                message = %message,
                "command refused"
            ),
            _ => tracing::debug!(
                target: "havoc::debug",
                session = %self.key,
                command = command.name(),
                "command ok"
            ),
        }
        Ok(reply)
    }

    /// Send `command` and decode its `data` payload.
    pub async fn request<T: DeserializeOwned>(&self, command: DebugCommand) -> Result<T, DebugError> {
        let reply = self.execute(&command).await?;
        if reply == DebugReply::Unit {
            return Err(DebugError::InvalidResponse(format!(
                "`{}` answered without data",
                command.name()
            )));
        }
        reply
            .decode::<T>(command.name())?
            .map_err(DebugError::from_failure)
    }

    /// Send `command` where only success matters; any payload is ignored.
    pub async fn request_unit(&self, command: DebugCommand) -> Result<(), DebugError> {
        match self.execute(&command).await? {
            DebugReply::Unit | DebugReply::Data(_) => Ok(()),
            DebugReply::Failure(message) => Err(DebugError::from_failure(message)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedBackend;
    use havoc_debug_proto::{CursorState, ExitPayload, ExitReason, RegisterValue};
    use reqwest::StatusCode;
    use serde_json::json;

    fn channel(backend: &ScriptedBackend) -> CommandChannel {
        CommandChannel::new(
            SessionKey::new("demo", 1, "jump_invalid"),
            Arc::new(backend.clone()),
        )
    }

    #[havoc_test_support::async_test]
    async fn sends_one_tagged_command_per_call() {
        let backend = ScriptedBackend::new();
        backend.push_reply(json!({ "data": { "exit_reason": "breakpoint" } }));
        let channel = channel(&backend);

        let payload: ExitPayload = channel.request(DebugCommand::Run).await.unwrap();
        assert_eq!(payload.exit_reason, ExitReason::Breakpoint);
        assert_eq!(backend.sent(), vec![json!({ "c": "run" })]);
    }

    #[havoc_test_support::async_test]
    async fn failures_become_typed_errors() {
        let backend = ScriptedBackend::new();
        backend.push_reply(json!({ "message": "unknown register: r99" }));
        let channel = channel(&backend);

        let err = channel
            .request::<RegisterValue>(DebugCommand::ReadReg {
                reg_name: "r99".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DebugError::UnknownRegister(name) if name == "r99"));
    }

    #[havoc_test_support::async_test]
    async fn unit_requests_accept_data_or_success() {
        let backend = ScriptedBackend::new();
        backend.push_reply(json!({ "success": true }));
        backend.push_reply(json!({ "data": { "breakpoints": [] } }));
        let channel = channel(&backend);

        channel.request_unit(DebugCommand::Rewind).await.unwrap();
        channel.request_unit(DebugCommand::ListBreakpoints).await.unwrap();
    }

    #[havoc_test_support::async_test]
    async fn data_requests_reject_bare_success() {
        let backend = ScriptedBackend::new();
        backend.push_reply(json!({ "success": true }));
        let channel = channel(&backend);

        let err = channel
            .request::<CursorState>(DebugCommand::State)
            .await
            .unwrap_err();
        assert!(matches!(err, DebugError::InvalidResponse(_)));
    }

    #[havoc_test_support::async_test]
    async fn transport_errors_are_not_retried() {
        let backend = ScriptedBackend::new();
        backend.push_transport_error(StatusCode::BAD_GATEWAY);
        backend.push_reply(json!({ "data": { "pc": 0, "icount": 0 } }));
        let channel = channel(&backend);

        let err = channel
            .request::<CursorState>(DebugCommand::State)
            .await
            .unwrap_err();
        assert!(err.is_transport());
        assert_eq!(backend.sent().len(), 1);
    }

    #[havoc_test_support::async_test]
    async fn garbage_replies_are_protocol_errors() {
        let backend = ScriptedBackend::new();
        backend.push_raw("<html>bad gateway</html>");
        let channel = channel(&backend);

        let err = channel.execute(&DebugCommand::State).await.unwrap_err();
        assert!(matches!(err, DebugError::Protocol(_)));
    }
}
