use std::time::Duration;

use anyhow::{Context, Result};

const SYSTEM_PROXY_ENV: &str = "GANMAMAO_ENABLE_SYSTEM_PROXY";

/// Build the HTTP client used for model calls.
///
/// System proxy discovery is opt-in; local inference servers are usually
/// reached directly and proxy discovery can fail on locked-down machines.
pub fn build_http_client(timeout: Option<Duration>) -> Result<reqwest::Client> {
    let allow_system_proxy = std::env::var(SYSTEM_PROXY_ENV)
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    if allow_system_proxy {
        match attempt_build(timeout, false) {
            Ok(client) => return Ok(client),
            Err(error) => tracing::warn!(
                "HTTP client with system proxy discovery failed ({}); retrying with no_proxy",
                error
            ),
        }
    }

    attempt_build(timeout, true).context("Failed to initialize HTTP client")
}

fn attempt_build(
    timeout: Option<Duration>,
    no_proxy: bool,
) -> Result<reqwest::Client, reqwest::Error> {
    let mut builder = reqwest::Client::builder();
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    if no_proxy {
        builder = builder.no_proxy();
    }
    builder.build()
}
