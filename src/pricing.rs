//! Cached price lookups on top of an upstream [`PriceSource`].

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, info};

use crate::error::PricingError;
use crate::types::PriceQuote;
use crate::{DEFAULT_REGION, PROBE_APP_ID};

/// Default lifetime of a cached lookup.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// Upstream that can price a batch of Steam app ids in one region.
///
/// Ids the upstream does not recognise are left out of the returned map.
pub trait PriceSource {
    fn fetch_quotes(
        &self,
        game_ids: &[String],
        region: &str,
    ) -> impl Future<Output = Result<HashMap<String, PriceQuote>, PricingError>> + Send;
}

/// Cache key: the exact sorted id set plus the region.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    ids: String,
    region: String,
}

impl CacheKey {
    /// `ids` must already be sorted and de-duplicated.
    fn new(ids: &[String], region: &str) -> Self {
        Self {
            ids: ids.join(","),
            region: region.to_string(),
        }
    }
}

struct CacheEntry {
    quotes: HashMap<String, PriceQuote>,
    fetched_at: Instant,
}

/// Process-local, best-effort cache of batch lookups.
pub struct PriceCache {
    ttl: Duration,
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
}

impl PriceCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn get(&self, key: &CacheKey) -> Option<HashMap<String, PriceQuote>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(key)
            .filter(|e| e.fetched_at.elapsed() < self.ttl)
            .map(|e| e.quotes.clone())
    }

    /// Store a result and drop anything already expired.
    fn insert(&self, key: CacheKey, quotes: HashMap<String, PriceQuote>) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let ttl = self.ttl;
        entries.retain(|_, e| e.fetched_at.elapsed() < ttl);
        entries.insert(
            key,
            CacheEntry {
                quotes,
                fetched_at: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

/// Trim, drop empties, de-duplicate and sort.
pub fn normalize_ids<S: AsRef<str>>(game_ids: &[S]) -> Vec<String> {
    game_ids
        .iter()
        .map(|id| id.as_ref().trim())
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Two or three ASCII letters, in any case.
pub fn is_region_code(region: &str) -> bool {
    (2..=3).contains(&region.len()) && region.bytes().all(|b| b.is_ascii_alphabetic())
}

/// Lowercase region code, or [`DEFAULT_REGION`] when blank.
pub fn normalize_region(region: &str) -> String {
    let region = region.trim();
    if region.is_empty() {
        DEFAULT_REGION.to_string()
    } else {
        region.to_lowercase()
    }
}

/// Pricing client: one upstream plus a short-lived cache. Constructed
/// explicitly and released with [`PricingClient::close`].
pub struct PricingClient<S> {
    source: S,
    cache: PriceCache,
}

impl<S: PriceSource> PricingClient<S> {
    pub fn new(source: S, cache_ttl: Duration) -> Self {
        Self {
            source,
            cache: PriceCache::new(cache_ttl),
        }
    }

    /// Current quotes for a set of ids, served from cache while fresh.
    pub async fn fetch_prices<T: AsRef<str>>(
        &self,
        game_ids: &[T],
        region: &str,
    ) -> Result<HashMap<String, PriceQuote>, PricingError> {
        let ids = normalize_ids(game_ids);
        let region = normalize_region(region);
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let key = CacheKey::new(&ids, &region);
        if let Some(hit) = self.cache.get(&key) {
            debug!("Price cache hit for {} id(s) in {region}", ids.len());
            return Ok(hit);
        }
        self.fetch_and_store(ids, &region, key).await
    }

    /// Like [`fetch_prices`](Self::fetch_prices) but always asks the upstream.
    /// The result still refreshes the cache.
    pub async fn fetch_prices_fresh<T: AsRef<str>>(
        &self,
        game_ids: &[T],
        region: &str,
    ) -> Result<HashMap<String, PriceQuote>, PricingError> {
        let ids = normalize_ids(game_ids);
        let region = normalize_region(region);
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let key = CacheKey::new(&ids, &region);
        self.fetch_and_store(ids, &region, key).await
    }

    async fn fetch_and_store(
        &self,
        ids: Vec<String>,
        region: &str,
        key: CacheKey,
    ) -> Result<HashMap<String, PriceQuote>, PricingError> {
        let quotes = self.source.fetch_quotes(&ids, region).await?;
        debug!(
            "Fetched prices for {}/{} id(s) in {region}",
            quotes.len(),
            ids.len()
        );
        self.cache.insert(key, quotes.clone());
        Ok(quotes)
    }

    /// Quote for a single game, `None` if the upstream does not know it.
    pub async fn quote(
        &self,
        game_id: &str,
        region: &str,
    ) -> Result<Option<PriceQuote>, PricingError> {
        let mut quotes = self.fetch_prices(&[game_id], region).await?;
        Ok(quotes.remove(game_id.trim()))
    }

    /// Whether the upstream recognises this app id.
    pub async fn validate_game_id(&self, game_id: &str, region: &str) -> Result<bool, PricingError> {
        Ok(self.quote(game_id, region).await?.is_some())
    }

    /// Connectivity check: a live lookup of a well-known app id.
    pub async fn probe(&self) -> Result<bool, PricingError> {
        match self.fetch_prices_fresh(&[PROBE_APP_ID], DEFAULT_REGION).await {
            Ok(quotes) if quotes.contains_key(PROBE_APP_ID) => {
                info!("Pricing API connection OK");
                Ok(true)
            }
            Ok(_) => {
                error!("Pricing API answered but returned no data for app {PROBE_APP_ID}");
                Ok(false)
            }
            Err(e) => {
                error!("Pricing API connection failed: {e}");
                Err(e)
            }
        }
    }

    pub fn cache(&self) -> &PriceCache {
        &self.cache
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Drop the cache and the upstream (and with it the HTTP connection pool).
    pub fn close(self) {
        let cached = self.cache.len();
        self.cache.clear();
        drop(self.source);
        info!("Pricing client closed ({cached} cached lookup(s) dropped)");
    }
}
