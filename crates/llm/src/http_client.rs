//! HTTP Client Factory
//!
//! Builds the reqwest client shared by every transport call, with the
//! optional outbound proxy applied.

use codeforge_core::proxy::ProxyConfig;

use crate::types::{LlmError, LlmResult};

/// Build a `reqwest::Client` with the resolved proxy configuration.
///
/// - `Some(proxy)` -> configure proxy on the client
/// - `None` -> explicitly disable proxy (`no_proxy`), ignoring env vars
///
/// No client-level timeout is set; the transport races every request against
/// its own timers.
pub fn build_http_client(proxy: Option<&ProxyConfig>) -> LlmResult<reqwest::Client> {
    let mut builder = reqwest::Client::builder();
    match proxy {
        Some(cfg) => {
            cfg.validate()
                .map_err(|message| LlmError::Other { message })?;
            let mut p = reqwest::Proxy::all(&cfg.url).map_err(|e| LlmError::Other {
                message: format!("invalid proxy {}: {}", cfg.url, e),
            })?;
            if let (Some(u), Some(pw)) = (&cfg.username, &cfg.password) {
                p = p.basic_auth(u, pw);
            }
            builder = builder.proxy(p);
        }
        None => {
            builder = builder.no_proxy();
        }
    }
    builder.build().map_err(|e| LlmError::Other {
        message: format!("failed to build HTTP client: {}", e),
    })
}
