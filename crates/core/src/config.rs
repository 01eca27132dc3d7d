use std::time::Duration;

use crate::error::CoreError;

/// Default ComfyUI HTTP endpoint.
pub const DEFAULT_API_URL: &str = "http://127.0.0.1:8188";

/// Connection settings for one ComfyUI server.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Base HTTP URL, e.g. `http://host:8188`. No trailing slash.
    pub api_url: String,
    /// Base WebSocket URL, e.g. `ws://host:8188`. No trailing slash.
    pub ws_url: String,
    /// Upper bound on waiting for a job to finish. `None` waits forever.
    pub wait_timeout: Option<Duration>,
}

impl ClientConfig {
    /// Settings for `api_url` with the WebSocket URL derived from it.
    pub fn new(api_url: impl Into<String>) -> Self {
        let api_url = trim_url(api_url.into());
        Self {
            ws_url: derive_ws_url(&api_url),
            api_url,
            wait_timeout: None,
        }
    }

    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                     | Default                        |
    /// |-----------------------------|--------------------------------|
    /// | `COMFYUI_API_URL`           | `http://127.0.0.1:8188`        |
    /// | `COMFYUI_WS_URL`            | derived from the API URL       |
    /// | `COMFYUI_WAIT_TIMEOUT_SECS` | unset or `0`: no timeout       |
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable lookup.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, CoreError> {
        let api_url = lookup("COMFYUI_API_URL").unwrap_or_else(|| DEFAULT_API_URL.into());
        let mut config = Self::new(api_url);

        if let Some(ws_url) = lookup("COMFYUI_WS_URL") {
            config.ws_url = trim_url(ws_url);
        }

        if let Some(raw) = lookup("COMFYUI_WAIT_TIMEOUT_SECS") {
            let secs: u64 = raw.trim().parse().map_err(|_| {
                CoreError::Config(format!(
                    "COMFYUI_WAIT_TIMEOUT_SECS must be a whole number of seconds, got {raw:?}"
                ))
            })?;
            config.wait_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }

        Ok(config)
    }

    /// Apply command-line overrides.
    ///
    /// A new API URL carries the WebSocket URL along only when that was
    /// derived from the old API URL; an explicitly configured WebSocket
    /// URL is kept unless `ws_url` replaces it.
    pub fn with_overrides(
        mut self,
        api_url: Option<String>,
        ws_url: Option<String>,
        wait_timeout: Option<Duration>,
    ) -> Self {
        if let Some(api_url) = api_url {
            let ws_was_derived = self.ws_url == derive_ws_url(&self.api_url);
            self.api_url = trim_url(api_url);
            if ws_was_derived {
                self.ws_url = derive_ws_url(&self.api_url);
            }
        }
        if let Some(ws_url) = ws_url {
            self.ws_url = trim_url(ws_url);
        }
        if let Some(timeout) = wait_timeout {
            self.wait_timeout = (!timeout.is_zero()).then_some(timeout);
        }
        self
    }
}

/// Map an HTTP base URL to its WebSocket counterpart.
///
/// `https` becomes `wss`, `http` becomes `ws`; a URL without a scheme is
/// assumed to be plain `ws`.
pub fn derive_ws_url(api_url: &str) -> String {
    let api_url = api_url.trim_end_matches('/');
    if let Some(rest) = api_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = api_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if api_url.starts_with("ws://") || api_url.starts_with("wss://") {
        api_url.to_string()
    } else {
        format!("ws://{api_url}")
    }
}

fn trim_url(url: String) -> String {
    url.trim_end_matches('/').to_string()
}
