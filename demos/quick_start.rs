//! Quick start: enhance a prompt remotely, then run the local ad pipeline.
//!
//! Requires `ADSTRACT_API_KEY` (a `.env` file works too). Run with
//! `RUST_LOG=adstract_ai=debug` to see retries and acknowledgments.

use adstract_ai::{
    inject_ad, select_ad, AdClient, AdContext, AdRequestConfiguration, ClientOptions,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let client = AdClient::new(ClientOptions::from_env())?;
    let config = AdRequestConfiguration::new(
        "demo-session-1",
        "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
        "203.0.113.7",
    );

    let prompt = "How can I make my web API respond faster?";
    let result = client.request_ad_or_default(prompt, &config).await;
    match &result.error {
        None => tracing::info!(prompt = %result.prompt, "Enhanced prompt"),
        Some(error) => tracing::warn!(error = %error, "Using original prompt"),
    }

    // Stand-in for the caller's LLM call
    let llm_response = "Add a cache in front of your slowest endpoints.";
    client.analyse_and_report(&result, llm_response).await;
    client.close().await;

    let decision = select_ad(&AdContext::new("Need performance tips", "Use caching"));
    println!("{}", inject_ad("Use caching", &decision));

    Ok(())
}
