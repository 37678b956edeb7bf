use async_trait::async_trait;
use havoc_debug_proto::{ApiResult, SessionKey};
use reqwest::header::CONTENT_TYPE;
use url::Url;

use crate::config::ClientConfig;
use crate::error::DebugError;

/// Transport carrying debug sessions to a replay server.
///
/// `send_command` moves opaque JSON text in both directions; encoding and
/// decoding belong to the command channel so every backend speaks the same
/// wire shape.
#[async_trait]
pub trait DebugBackend: Send + Sync {
    async fn open_session(&self, key: &SessionKey) -> Result<(), DebugError>;

    async fn send_command(&self, key: &SessionKey, command: String) -> Result<String, DebugError>;

    async fn close_session(&self, key: &SessionKey) -> Result<(), DebugError>;
}

#[derive(Debug, Clone, Copy)]
enum DebugAction {
    Start,
    Command,
    Stop,
}

impl DebugAction {
    fn as_str(self) -> &'static str {
        match self {
            DebugAction::Start => "start",
            DebugAction::Command => "command",
            DebugAction::Stop => "stop",
        }
    }
}

/// HTTP backend talking to `{base}/api/project/{p}/run/{r}/testcase/{t}/debug/*`.
pub struct ReqwestDebugBackend {
    client: reqwest::Client,
    base_url: Url,
    bearer_token: Option<String>,
}

impl ReqwestDebugBackend {
    pub fn new(config: &ClientConfig) -> Result<Self, DebugError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.request_timeout())
            .no_proxy()
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url().clone(),
            bearer_token: config.bearer_token().map(str::to_string),
        })
    }

    fn endpoint(&self, key: &SessionKey, action: DebugAction) -> Result<Url, DebugError> {
        let mut url = self.base_url.clone();
        let run_id = key.run_id.to_string();
        let invalid_base = || {
            let base = &self.base_url;
            DebugError::InvalidConfig(format!("replay server url cannot be a base: {base}"))
        };
        url.path_segments_mut()
            .map_err(|_| invalid_base())?
            .pop_if_empty()
            .extend([
                "api",
                "project",
                key.project_name.as_str(),
                "run",
                run_id.as_str(),
                "testcase",
                key.testcase_id.as_str(),
                "debug",
                action.as_str(),
            ]);
        Ok(url)
    }

    async fn post(
        &self,
        key: &SessionKey,
        action: DebugAction,
        body: Option<String>,
    ) -> Result<reqwest::Response, DebugError> {
        let endpoint = self.endpoint(key, action)?;
        let mut builder = self.client.post(endpoint);
        if let Some(token) = self.bearer_token.as_deref() {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = body {
            builder = builder.header(CONTENT_TYPE, "application/json").body(body);
        }
        let response = builder.send().await?;
        if !response.status().is_success() {
            return Err(DebugError::HttpStatus(response.status()));
        }
        Ok(response)
    }

    async fn lifecycle(&self, key: &SessionKey, action: DebugAction) -> Result<(), DebugError> {
        let response = self.post(key, action, None).await?;
        let payload = response.json::<ApiResult<()>>().await?;
        payload.into_result().map_err(DebugError::from_failure)
    }
}

#[async_trait]
impl DebugBackend for ReqwestDebugBackend {
    async fn open_session(&self, key: &SessionKey) -> Result<(), DebugError> {
        self.lifecycle(key, DebugAction::Start).await
    }

    async fn send_command(&self, key: &SessionKey, command: String) -> Result<String, DebugError> {
        let response = self.post(key, DebugAction::Command, Some(command)).await?;
        Ok(response.text().await?)
    }

    async fn close_session(&self, key: &SessionKey) -> Result<(), DebugError> {
        self.lifecycle(key, DebugAction::Stop).await
    }
}
