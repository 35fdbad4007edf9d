use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{LinkError, LinkErrorKind};
use crate::fsm::RetryPolicy;

pub const DEFAULT_API_URL: &str = "http://localhost:8000";
pub const DEFAULT_WS_PATH: &str = "/ws/run";

/// Configuration for the trace link and the graph HTTP client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Base HTTP URL of the route-search server.
    pub api_url: String,
    /// Path of the streaming endpoint, appended to the websocket form of `api_url`.
    pub ws_path: String,
    /// Full websocket URL; takes precedence over `api_url` + `ws_path`.
    pub websocket_url: Option<String>,
    pub retry_base_ms: u64,
    pub retry_max_ms: u64,
    pub clean_reconnect_ms: u64,
    pub reconnect_after_clean_close: bool,
    pub send_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub http_timeout_ms: u64,
    pub notice_capacity: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            api_url: resolve_api_url(),
            ws_path: DEFAULT_WS_PATH.to_string(),
            websocket_url: None,
            retry_base_ms: 2_000,
            retry_max_ms: 10_000,
            clean_reconnect_ms: 500,
            reconnect_after_clean_close: true,
            send_timeout_ms: resolve_send_timeout_ms(),
            connect_timeout_ms: 10_000,
            http_timeout_ms: 30_000,
            notice_capacity: 256,
        }
    }
}

impl LinkConfig {
    /// Streaming endpoint URL. `http` becomes `ws` and `https` becomes `wss`.
    pub fn stream_url(&self) -> Result<Url, LinkError> {
        if let Some(explicit) = &self.websocket_url {
            return parse_url(explicit);
        }
        let mut url = self.api_base()?;
        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => {
                return Err(LinkError::new(LinkErrorKind::Config)
                    .with_hint(format!("unsupported scheme '{other}' in api_url")))
            }
        };
        url.set_scheme(scheme).map_err(|_| {
            LinkError::new(LinkErrorKind::Config).with_hint("cannot derive websocket url")
        })?;
        url.set_path(&self.ws_path);
        Ok(url)
    }

    pub fn api_base(&self) -> Result<Url, LinkError> {
        parse_url(&self.api_url)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base: Duration::from_millis(self.retry_base_ms),
            max: Duration::from_millis(self.retry_max_ms),
            clean_delay: Duration::from_millis(self.clean_reconnect_ms),
            reconnect_after_clean: self.reconnect_after_clean_close,
        }
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }
}

fn parse_url(raw: &str) -> Result<Url, LinkError> {
    Url::parse(raw.trim()).map_err(|err| {
        LinkError::new(LinkErrorKind::Config).with_hint(format!("invalid url '{raw}': {err}"))
    })
}

fn resolve_api_url() -> String {
    match env::var("ROUTEWATCH_API_URL") {
        Ok(value) if !value.trim().is_empty() => value.trim().to_string(),
        _ => DEFAULT_API_URL.to_string(),
    }
}

fn resolve_send_timeout_ms() -> u64 {
    env::var("ROUTEWATCH_SEND_TIMEOUT_MS")
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(5_000)
}
