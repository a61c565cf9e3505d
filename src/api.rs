use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::error::PricingError;
use crate::pricing::PriceSource;
use crate::types::PriceQuote;
use crate::{GGDEALS_API_BASE, PRICES_BY_STEAM_APP_ID_PATH, USER_AGENT};

/// gg.deals accepts at most this many ids per request.
pub const MAX_IDS_PER_REQUEST: usize = 100;

/// Per-request timeout for the pricing API.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Envelope of every gg.deals response. `data` is an object keyed by app id on
/// success (or `[]` when empty), and an error object when `success` is false.
#[derive(Debug, Deserialize)]
struct PricesResponse {
    success: bool,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Deserialize)]
struct GameData {
    title: Option<String>,
    url: Option<String>,
    #[serde(default)]
    prices: GamePrices,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GamePrices {
    #[serde(default, deserialize_with = "lenient_decimal")]
    current_retail: Option<Decimal>,
    #[serde(default, deserialize_with = "lenient_decimal")]
    current_keyshops: Option<Decimal>,
    #[serde(default, deserialize_with = "lenient_decimal")]
    historical_low_retail: Option<Decimal>,
    #[serde(default, deserialize_with = "lenient_decimal")]
    historical_low_keyshops: Option<Decimal>,
    currency: Option<String>,
}

/// Prices arrive as decimal strings ("9.99"); accept numbers too, and treat
/// null, empty or unparsable values as "not available".
fn lenient_decimal<'de, D>(deserializer: D) -> Result<Option<Decimal>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => Decimal::from_str(s.trim()).ok(),
        Some(Value::Number(n)) => Decimal::from_str(&n.to_string())
            .or_else(|_| Decimal::from_scientific(&n.to_string()))
            .ok(),
        _ => None,
    })
}

/// Client for the gg.deals price endpoint. Owns one pooled HTTP client for the
/// life of the process.
pub struct GgDealsApi {
    client: reqwest::Client,
    base_url: Url,
    api_key: String,
}

impl GgDealsApi {
    pub fn new(api_key: &str) -> Result<Self, PricingError> {
        Self::with_base_url(api_key, GGDEALS_API_BASE)
    }

    /// Point the client at another host (a local stub, a proxy).
    pub fn with_base_url(api_key: &str, base_url: &str) -> Result<Self, PricingError> {
        if api_key.trim().is_empty() {
            return Err(PricingError::Auth("no API key configured".into()));
        }
        let base_url = Url::parse(base_url)
            .map_err(|e| PricingError::InvalidResponse(format!("bad base URL {base_url}: {e}")))?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            base_url,
            api_key: api_key.trim().to_string(),
        })
    }

    fn prices_url(&self) -> Result<Url, PricingError> {
        self.base_url
            .join(PRICES_BY_STEAM_APP_ID_PATH)
            .map_err(|e| PricingError::InvalidResponse(format!("bad prices URL: {e}")))
    }

    /// One upstream call for at most [`MAX_IDS_PER_REQUEST`] ids.
    async fn fetch_batch(
        &self,
        game_ids: &[String],
        region: &str,
    ) -> Result<HashMap<String, PriceQuote>, PricingError> {
        let url = self.prices_url()?;
        let ids = game_ids.join(",");
        let resp = self
            .client
            .get(url)
            .query(&[("ids", ids.as_str()), ("key", self.api_key.as_str()), ("region", region)])
            .send()
            .await?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(HashMap::new());
        }
        let body = resp.bytes().await?;
        if let Some(err) = classify_status(status, &body) {
            return Err(err);
        }
        parse_prices_response(&body, region)
    }
}

impl PriceSource for GgDealsApi {
    async fn fetch_quotes(
        &self,
        game_ids: &[String],
        region: &str,
    ) -> Result<HashMap<String, PriceQuote>, PricingError> {
        let mut quotes = HashMap::with_capacity(game_ids.len());
        for batch in game_ids.chunks(MAX_IDS_PER_REQUEST) {
            let found = self.fetch_batch(batch, region).await?;
            debug!(
                "gg.deals: {} of {} ids priced (region {region})",
                found.len(),
                batch.len()
            );
            quotes.extend(found);
        }
        Ok(quotes)
    }
}

/// Map a non-success HTTP status to an error. `None` for 2xx and for 404,
/// which gg.deals uses for "nothing known".
pub fn classify_status(status: StatusCode, body: &[u8]) -> Option<PricingError> {
    if status.is_success() || status == StatusCode::NOT_FOUND {
        return None;
    }
    let snippet: String = String::from_utf8_lossy(body).chars().take(200).collect();
    let detail = format!("HTTP {status}: {snippet}");
    Some(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => PricingError::Auth(detail),
        _ => PricingError::Unavailable(detail),
    })
}

/// Decode a gg.deals prices body into quotes keyed by app id.
///
/// Ids the API does not know come back as `null` and are omitted. A single
/// malformed game entry is skipped rather than failing the batch.
pub fn parse_prices_response(
    body: &[u8],
    region: &str,
) -> Result<HashMap<String, PriceQuote>, PricingError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(HashMap::new());
    }
    let resp: PricesResponse = serde_json::from_slice(body)
        .map_err(|e| PricingError::InvalidResponse(e.to_string()))?;

    if !resp.success {
        return Err(error_from_payload(&resp.data));
    }

    let Some(games) = resp.data.as_object() else {
        // `[]` or `null`: no data for any requested id.
        return Ok(HashMap::new());
    };

    let mut quotes = HashMap::with_capacity(games.len());
    for (game_id, raw) in games {
        if raw.is_null() {
            continue;
        }
        let game: GameData = match serde_json::from_value(raw.clone()) {
            Ok(g) => g,
            Err(e) => {
                warn!("Skipping undecodable gg.deals entry for {game_id}: {e}");
                continue;
            }
        };
        quotes.insert(
            game_id.clone(),
            PriceQuote {
                game_id: game_id.clone(),
                title: game.title,
                url: game.url,
                currency: game.prices.currency.unwrap_or_else(|| "USD".to_string()),
                retail_price: game.prices.current_retail,
                keyshop_price: game.prices.current_keyshops,
                historical_low_retail: game.prices.historical_low_retail,
                historical_low_keyshop: game.prices.historical_low_keyshops,
                region: region.to_string(),
            },
        );
    }
    Ok(quotes)
}

/// `success: false` bodies carry `{name, message, code, status}`.
fn error_from_payload(data: &Value) -> PricingError {
    let status = data.get("status").and_then(Value::as_u64);
    let message = data
        .get("message")
        .and_then(Value::as_str)
        .or_else(|| data.get("name").and_then(Value::as_str))
        .unwrap_or("success=false")
        .to_string();
    match status {
        Some(401) | Some(403) => PricingError::Auth(message),
        _ => PricingError::Unavailable(message),
    }
}
