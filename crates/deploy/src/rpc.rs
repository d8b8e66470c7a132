//! Provider construction and node readiness checks run before any transaction.

use std::time::Duration;

use anyhow::Context;
use starknet::{
    core::{types::Felt, utils::parse_cairo_short_string},
    providers::{JsonRpcClient, Provider, jsonrpc::HttpTransport},
};
use url::Url;

/// Timeout of a single readiness request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Interval between readiness checks.
const READY_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// JSON-RPC provider for the node at `url`.
pub fn provider(url: &Url) -> JsonRpcClient<HttpTransport> {
    JsonRpcClient::new(HttpTransport::new(url.clone()))
}

/// Repeat `check_fn` until it succeeds or `timeout_secs` have elapsed.
pub async fn wait_until_ready<T, F, Fut>(
    name: &str,
    timeout_secs: u64,
    check_fn: F,
) -> Result<T, anyhow::Error>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, anyhow::Error>>,
{
    let start = std::time::Instant::now();
    let max_duration = Duration::from_secs(timeout_secs);

    loop {
        match check_fn().await {
            Ok(value) => return Ok(value),
            Err(e) if start.elapsed() >= max_duration => {
                return Err(e.context(format!("Timeout waiting for {name} to be ready")));
            }
            Err(e) => {
                tracing::trace!(error = %e, node = %name, "Readiness check failed, retrying...");
            }
        }

        tokio::time::sleep(READY_POLL_INTERVAL).await;
    }
}

/// Human-readable form of a chain id, e.g. `SN_SEPOLIA`.
pub fn chain_name(chain_id: Felt) -> String {
    parse_cairo_short_string(&chain_id).unwrap_or_else(|_| chain_id.to_fixed_hex_string())
}

/// Wait until the node answers `starknet_chainId`, then return it.
pub async fn preflight<P: Provider>(
    provider: &P,
    url: &Url,
    timeout_secs: u64,
) -> Result<Felt, anyhow::Error> {
    let chain_id = wait_until_ready(url.as_str(), timeout_secs, || async {
        tokio::time::timeout(REQUEST_TIMEOUT, provider.chain_id())
            .await
            .context("starknet_chainId request timed out")?
            .context("starknet_chainId request failed")
    })
    .await?;

    tracing::info!(url = %url, chain = %chain_name(chain_id), "Node reachable");
    Ok(chain_id)
}
