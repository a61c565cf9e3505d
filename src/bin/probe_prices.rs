//! Probe: gg.deals prices endpoint
//!
//! Hits GET https://api.gg.deals/v1/prices/by-steam-app-id/?ids=..&key=..&region=..
//! and documents:
//! - Response shape and fields
//! - Batch latency vs single-id latency
//! - What an unknown app id looks like
//! - What a rejected key looks like
//! - How the crate's parser reads the response

use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use serde_json::Value;

use steam_price_watch::api::parse_prices_response;
use steam_price_watch::catalog::{GameCatalog, StaticCatalog};
use steam_price_watch::config::{AppConfig, CONFIG_PATH, PRICING_API_KEY_VAR};
use steam_price_watch::{DEFAULT_REGION, GGDEALS_API_BASE, PRICES_BY_STEAM_APP_ID_PATH, PROBE_APP_ID};

const UNKNOWN_APP_ID: &str = "999999999";

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let api_key = match std::env::var(PRICING_API_KEY_VAR) {
        Ok(key) if !key.trim().is_empty() => key,
        _ => {
            AppConfig::load(Path::new(CONFIG_PATH))
                .with_context(|| format!("set {PRICING_API_KEY_VAR} or provide {CONFIG_PATH}"))?
                .credentials
                .pricing_api_key
        }
    };

    let client = reqwest::Client::new();
    let url = format!("{GGDEALS_API_BASE}{PRICES_BY_STEAM_APP_ID_PATH}");

    println!("=== Probe: gg.deals prices ===");
    println!("Endpoint: {url}");
    println!();

    // 1. Single well-known id
    println!("--- 1. Single id ({PROBE_APP_ID}) ---");
    let start = Instant::now();
    let resp = client
        .get(&url)
        .query(&[("ids", PROBE_APP_ID), ("key", api_key.as_str()), ("region", DEFAULT_REGION)])
        .send()
        .await?;
    let latency = start.elapsed();
    let status = resp.status();
    let body: Value = resp.json().await?;
    println!("Status: {status}");
    println!("Latency: {latency:?}");
    println!("{}", serde_json::to_string_pretty(&body)?);
    if let Some(entry) = body.pointer(&format!("/data/{PROBE_APP_ID}")).and_then(Value::as_object) {
        println!("\nFields present:");
        for key in entry.keys() {
            println!("  - {key}");
        }
        if let Some(prices) = entry.get("prices").and_then(Value::as_object) {
            println!("Price fields:");
            for (key, value) in prices {
                println!("  - {key}: {value}");
            }
        }
    }
    println!();

    // 2. Batch of catalog ids
    let ids: Vec<&str> = StaticCatalog::new()
        .search("")
        .into_iter()
        .map(|g| g.game_id)
        .collect();
    let joined = ids.join(",");
    println!("--- 2. Batch of {} ids ---", ids.len());
    let start = Instant::now();
    let resp = client
        .get(&url)
        .query(&[("ids", joined.as_str()), ("key", api_key.as_str()), ("region", DEFAULT_REGION)])
        .send()
        .await?;
    let latency = start.elapsed();
    let status = resp.status();
    let bytes = resp.bytes().await?;
    println!("Status: {status} (latency: {latency:?})");
    match parse_prices_response(&bytes, DEFAULT_REGION) {
        Ok(quotes) => {
            println!("Parsed {} quote(s):", quotes.len());
            for id in &ids {
                match quotes.get(*id) {
                    Some(q) => println!(
                        "  {id:>7} {:<28} best={:?} low={:?} {}",
                        q.display_title(),
                        q.best_price().map(|(p, kind)| format!("{p} ({})", kind.label())),
                        q.historical_low(),
                        q.currency
                    ),
                    None => println!("  {id:>7} (no data)"),
                }
            }
        }
        Err(e) => println!("Parse failed: {e}"),
    }
    println!();

    // 3. Unknown id
    println!("--- 3. Unknown id ({UNKNOWN_APP_ID}) ---");
    let resp = client
        .get(&url)
        .query(&[("ids", UNKNOWN_APP_ID), ("key", api_key.as_str()), ("region", DEFAULT_REGION)])
        .send()
        .await?;
    println!("Status: {}", resp.status());
    println!("Body: {}", resp.text().await?);
    println!();

    // 4. Rejected key
    println!("--- 4. Invalid key ---");
    let resp = client
        .get(&url)
        .query(&[("ids", PROBE_APP_ID), ("key", "not-a-real-key"), ("region", DEFAULT_REGION)])
        .send()
        .await?;
    println!("Status: {}", resp.status());
    println!("Body: {}", resp.text().await?);
    println!();

    // 5. Latency over 5 requests
    println!("--- 5. Latency over 5 requests (single id) ---");
    let mut latencies = Vec::new();
    for i in 0..5 {
        let start = Instant::now();
        let resp = client
            .get(&url)
            .query(&[("ids", PROBE_APP_ID), ("key", api_key.as_str()), ("region", DEFAULT_REGION)])
            .send()
            .await?;
        let _ = resp.bytes().await?;
        let latency = start.elapsed();
        println!("  Request {}: {latency:?}", i + 1);
        latencies.push(latency);
    }
    if let (Some(min), Some(max)) = (latencies.iter().min(), latencies.iter().max()) {
        let avg = latencies.iter().sum::<std::time::Duration>() / latencies.len() as u32;
        println!("  min={min:?} avg={avg:?} max={max:?}");
    }

    println!("\n=== Probe complete ===");
    Ok(())
}
