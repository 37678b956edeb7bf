use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use havoc_debug_proto::SessionKey;
use parking_lot::Mutex;
use reqwest::StatusCode;
use serde_json::{json, Value};

use crate::backend::DebugBackend;
use crate::error::DebugError;

enum Scripted {
    Reply(String),
    Status(StatusCode),
}

#[derive(Default)]
struct Script {
    replies: VecDeque<Scripted>,
    sent: Vec<Value>,
    opened: Vec<SessionKey>,
    closed: Vec<SessionKey>,
    open_failure: Option<String>,
}

/// Backend that answers commands from a queue and records what it was sent.
#[derive(Clone, Default)]
pub(crate) struct ScriptedBackend {
    script: Arc<Mutex<Script>>,
}

impl ScriptedBackend {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push_reply(&self, reply: Value) {
        self.push_raw(&reply.to_string());
    }

    pub(crate) fn push_raw(&self, raw: &str) {
        self.script
            .lock()
            .replies
            .push_back(Scripted::Reply(raw.to_string()));
    }

    pub(crate) fn push_transport_error(&self, status: StatusCode) {
        self.script.lock().replies.push_back(Scripted::Status(status));
    }

    /// Replies consumed by `DebugClient::open_session`.
    pub(crate) fn push_open_replies(&self, pc: u64, icount: u64, registers: &[&str]) {
        self.push_reply(json!({ "data": { "pc": pc, "icount": icount } }));
        let registers: serde_json::Map<String, Value> = registers
            .iter()
            .map(|name| (name.to_string(), json!(0)))
            .collect();
        self.push_reply(json!({ "data": { "registers": registers } }));
    }

    pub(crate) fn fail_open(&self, message: &str) {
        self.script.lock().open_failure = Some(message.to_string());
    }

    pub(crate) fn sent(&self) -> Vec<Value> {
        self.script.lock().sent.clone()
    }

    pub(crate) fn sent_names(&self) -> Vec<String> {
        self.sent()
            .iter()
            .filter_map(|command| command["c"].as_str().map(str::to_string))
            .collect()
    }

    pub(crate) fn opened(&self) -> Vec<SessionKey> {
        self.script.lock().opened.clone()
    }

    pub(crate) fn closed(&self) -> Vec<SessionKey> {
        self.script.lock().closed.clone()
    }
}

#[async_trait]
impl DebugBackend for ScriptedBackend {
    async fn open_session(&self, key: &SessionKey) -> Result<(), DebugError> {
        let mut script = self.script.lock();
        if let Some(message) = script.open_failure.clone() {
            return Err(DebugError::from_failure(message));
        }
        script.opened.push(key.clone());
        Ok(())
    }

    async fn send_command(&self, _key: &SessionKey, command: String) -> Result<String, DebugError> {
        let mut script = self.script.lock();
        let value: Value = serde_json::from_str(&command)
            .map_err(|err| DebugError::InvalidResponse(format!("client sent invalid json: {err}")))?;
        script.sent.push(value);
        match script.replies.pop_front() {
            Some(Scripted::Reply(raw)) => Ok(raw),
            Some(Scripted::Status(status)) => Err(DebugError::HttpStatus(status)),
            None => Err(DebugError::InvalidResponse("no scripted reply left".into())),
        }
    }

    async fn close_session(&self, key: &SessionKey) -> Result<(), DebugError> {
        self.script.lock().closed.push(key.clone());
        Ok(())
    }
}
