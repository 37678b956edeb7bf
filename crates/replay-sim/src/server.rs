use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use havoc_debug_proto::{DebugCommand, DebugReply, FailureKind, SessionKey};
use havoc_debug_sdk::{DebugBackend, DebugError};
use parking_lot::{Mutex, RwLock};

use crate::fixtures::Fixture;
use crate::recording::Recording;
use crate::replay::ReplaySession;

/// Table of replayable testcases and the sessions open on them.
///
/// Each session sits behind its own lock, so commands on different sessions
/// never wait for each other.
#[derive(Clone, Default)]
pub struct ReplayServer {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    recordings: RwLock<HashMap<SessionKey, Recording>>,
    sessions: Mutex<HashMap<SessionKey, Arc<Mutex<ReplaySession>>>>,
}

impl ReplayServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_recording(&self, key: SessionKey, recording: Recording) {
        self.inner.recordings.write().insert(key, recording);
    }

    /// Register every testcase of `fixture`; returns how many were added.
    pub fn add_fixture(&self, fixture: &Fixture) -> usize {
        let mut recordings = self.inner.recordings.write();
        let mut added = 0;
        for (key, recording) in fixture.recordings() {
            recordings.insert(key, recording);
            added += 1;
        }
        tracing::info!(
            target: "havoc::replay",
            project = %fixture.project,
            run_id = fixture.run_id,
            testcases = added,
            "fixture loaded"
        );
        added
    }

    pub fn testcases(&self) -> Vec<SessionKey> {
        let mut keys: Vec<SessionKey> = self.inner.recordings.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn open_sessions(&self) -> usize {
        self.inner.sessions.lock().len()
    }

    pub fn is_open(&self, key: &SessionKey) -> bool {
        self.inner.sessions.lock().contains_key(key)
    }

    /// Start a session at the beginning of the trace. Opening a key that is
    /// already open replaces it with a fresh session.
    pub fn open(&self, key: &SessionKey) -> Result<(), String> {
        let recording = self
            .inner
            .recordings
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| FailureKind::TestcaseNotFound(key.testcase_id.clone()).message())?;
        let session = Arc::new(Mutex::new(ReplaySession::new(recording)));
        let replaced = self.inner.sessions.lock().insert(key.clone(), session);
        tracing::info!(
            target: "havoc::replay",
            session = %key,
            reset = replaced.is_some(),
            "debug session started"
        );
        Ok(())
    }

    /// Stopping a session that is not open is fine; an unknown testcase is not.
    pub fn close(&self, key: &SessionKey) -> Result<(), String> {
        if !self.inner.recordings.read().contains_key(key) {
            return Err(FailureKind::TestcaseNotFound(key.testcase_id.clone()).message());
        }
        let removed = self.inner.sessions.lock().remove(key);
        tracing::info!(
            target: "havoc::replay",
            session = %key,
            was_open = removed.is_some(),
            "debug session stopped"
        );
        Ok(())
    }

    pub fn execute(&self, key: &SessionKey, command: DebugCommand) -> DebugReply {
        let Some(session) = self.inner.sessions.lock().get(key).cloned() else {
            return DebugReply::failure(format!("no debug session open for {key}"));
        };
        let name = command.name();
        let reply = session.lock().handle(command);
        tracing::debug!(
            target: "havoc::replay",
            session = %key,
            command = name,
            failed = reply.is_failure(),
            "command handled"
        );
        reply
    }

    /// Wire entry point: JSON command text in, JSON response text out.
    pub fn dispatch(&self, key: &SessionKey, raw: &str) -> String {
        let reply = match DebugCommand::from_json(raw) {
            Ok(command) => self.execute(key, command),
            Err(err) => DebugReply::failure(format!("malformed command: {err}")),
        };
        match reply.to_json() {
            Ok(encoded) => encoded,
            Err(err) => format!(r#"{{"message":"failed to encode reply: {err}"}}"#),
        }
    }
}

/// Lets a client drive the server in-process, with no HTTP in between.
#[async_trait]
impl DebugBackend for ReplayServer {
    async fn open_session(&self, key: &SessionKey) -> Result<(), DebugError> {
        self.open(key).map_err(DebugError::from_failure)
    }

    async fn send_command(&self, key: &SessionKey, command: String) -> Result<String, DebugError> {
        Ok(self.dispatch(key, &command))
    }

    async fn close_session(&self, key: &SessionKey) -> Result<(), DebugError> {
        self.close(key).map_err(DebugError::from_failure)
    }
}
