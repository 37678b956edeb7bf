use std::sync::Arc;

use havoc_debug_proto::SessionKey;

use crate::backend::{DebugBackend, ReqwestDebugBackend};
use crate::channel::CommandChannel;
use crate::config::ClientConfig;
use crate::error::DebugError;
use crate::lease::LeaseTable;
use crate::session::ReplayDebugger;

/// Entry point: owns the transport and hands out sessions.
#[derive(Clone)]
pub struct DebugClient {
    config: Arc<ClientConfig>,
    backend: Arc<dyn DebugBackend>,
    leases: LeaseTable,
}

impl DebugClient {
    pub fn new(config: ClientConfig) -> Result<Self, DebugError> {
        let backend = Arc::new(ReqwestDebugBackend::new(&config)?);
        Ok(Self::with_backend(config, backend))
    }

    pub fn with_backend(config: ClientConfig, backend: Arc<dyn DebugBackend>) -> Self {
        Self {
            config: Arc::new(config),
            backend,
            leases: LeaseTable::default(),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Whether this client currently holds a session for `key`.
    pub fn is_open(&self, key: &SessionKey) -> bool {
        self.leases.is_held(key)
    }

    pub async fn open_session(
        &self,
        project_name: &str,
        run_id: u64,
        testcase_id: &str,
    ) -> Result<ReplayDebugger, DebugError> {
        self.open(SessionKey::new(project_name, run_id, testcase_id))
            .await
    }

    /// Open a session and seed its cursor and register set. At most one
    /// session per key is open from one client at a time.
    pub async fn open(&self, key: SessionKey) -> Result<ReplayDebugger, DebugError> {
        let lease = self.leases.acquire(&key)?;
        self.backend.open_session(&key).await?;
        tracing::debug!(target: "havoc::debug", session = %key, "session opened");

        let channel = CommandChannel::new(key, Arc::clone(&self.backend));
        let mut debugger = ReplayDebugger::new(channel, lease);
        if let Err(err) = debugger.seed().await {
            if let Err(close_err) = debugger.close().await {
                tracing::debug!(
                    target: "havoc::debug",
                    error = %close_err,
                    "stop after failed open also failed"
                );
            }
            return Err(err);
        }
        Ok(debugger)
    }
}
