use std::net::IpAddr;
use std::time::Duration;

use url::Url;

use crate::error::DebugError;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
// `run` may retire a whole trace before answering.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Debug)]
pub struct ClientConfig {
    base_url: Url,
    bearer_token: Option<String>,
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl ClientConfig {
    pub fn new(server_base_url: impl AsRef<str>) -> Result<Self, DebugError> {
        // HAVOC_SERVER_BASE wins over whatever the caller passed.
        let mut base = std::env::var("HAVOC_SERVER_BASE")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| server_base_url.as_ref().trim().to_string());
        if base.is_empty() {
            return Err(DebugError::InvalidConfig(
                "replay server base url cannot be empty".into(),
            ));
        }
        if !base.contains("://") {
            let inferred_scheme = infer_scheme(&base);
            base = format!("{inferred_scheme}{base}");
        }
        let parsed = Url::parse(&base).map_err(|err| {
            DebugError::InvalidConfig(format!("invalid replay server url: {err}"))
        })?;
        if parsed.cannot_be_a_base() {
            return Err(DebugError::InvalidConfig(format!(
                "replay server url cannot carry a path: {parsed}"
            )));
        }
        Ok(Self {
            base_url: parsed,
            bearer_token: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn with_bearer_token(mut self, token: Option<String>) -> Self {
        self.bearer_token = token
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty());
        self
    }

    pub fn bearer_token(&self) -> Option<&str> {
        self.bearer_token.as_deref()
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }
}

/// Plain http only for a server on this machine.
pub(crate) fn infer_scheme(base: &str) -> &'static str {
    let authority = base.split('/').next().unwrap_or(base);
    let host = match authority.strip_prefix('[') {
        Some(bracketed) => bracketed.split(']').next().unwrap_or(bracketed),
        None => authority.rsplit_once(':').map_or(authority, |(host, _)| host),
    };
    let local = host.eq_ignore_ascii_case("localhost")
        || host
            .parse::<IpAddr>()
            .map(|ip| ip.is_loopback() || ip.is_unspecified())
            .unwrap_or(false);
    if local {
        "http://"
    } else {
        "https://"
    }
}
