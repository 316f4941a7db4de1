//! LiteLLM pricing catalog fetch.
//!
//! Downloads the public LiteLLM model price list once per run and turns it
//! into a [`PricingTable`]. The default location is
//! [`crate::pricing::LITELLM_PRICING_URL`]. Callers fall back to [`PricingTable::builtin`]
//! when the fetch fails.

use crate::pricing::PricingTable;
use anyhow::{Context, Result};
use std::time::Duration;
use tracing::{debug, info};

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Fetch and parse the catalog at `url`.
pub async fn fetch_catalog(url: &str) -> Result<PricingTable> {
    info!(url, "Fetching model pricing catalog");

    let client = reqwest::Client::builder()
        .timeout(FETCH_TIMEOUT)
        .build()
        .context("Failed to build HTTP client")?;

    let body = client
        .get(url)
        .send()
        .await
        .context("Failed to fetch pricing data from LiteLLM")?
        .error_for_status()
        .context("LiteLLM pricing endpoint returned an error status")?
        .text()
        .await
        .context("Failed to read pricing response body")?;

    let table = PricingTable::from_litellm_json(&body)?;
    debug!(models = table.len(), "Fetched pricing catalog");
    Ok(table)
}

/// Fetch the catalog and fill any gaps from the built-in table.
pub async fn fetch_with_builtin_fallback(url: &str) -> Result<PricingTable> {
    let mut table = fetch_catalog(url).await?;
    table.merge_missing(&PricingTable::builtin());
    info!(models = table.len(), "Using fetched pricing catalog");
    Ok(table)
}
