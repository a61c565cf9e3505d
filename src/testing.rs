//! In-memory fakes for the upstream and delivery traits.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Result, bail};
use rust_decimal::Decimal;

use crate::commands::{Reply, Responder};
use crate::error::{PricingError, WishlistError};
use crate::notifier::Notifier;
use crate::pricing::PriceSource;
use crate::types::{ChannelId, PriceAlert, PriceKind, PriceQuote, UserId, WishlistItem};
use crate::wishlist::WishlistSource;

/// A USD quote in the `us` region with no title or link.
pub fn quote(game_id: &str, retail: Option<Decimal>, keyshop: Option<Decimal>) -> PriceQuote {
    PriceQuote {
        game_id: game_id.to_string(),
        title: None,
        url: None,
        currency: "USD".to_string(),
        retail_price: retail,
        keyshop_price: keyshop,
        historical_low_retail: None,
        historical_low_keyshop: None,
        region: "us".to_string(),
    }
}

pub fn alert(user: u64, game_id: &str) -> PriceAlert {
    PriceAlert {
        channel_id: ChannelId(100 + user),
        user_id: UserId(user),
        game_id: game_id.to_string(),
        title: format!("Game {game_id}"),
        best_price: Decimal::new(999, 2),
        price_kind: PriceKind::Retail,
        target_price: Decimal::TEN,
        currency: "USD".to_string(),
        url: None,
    }
}

/// Price source answering from a fixed table, counting calls.
#[derive(Default)]
pub struct FakePriceSource {
    quotes: HashMap<String, PriceQuote>,
    failure: Option<PricingError>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    requested: Mutex<Vec<Vec<String>>>,
}

impl FakePriceSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, quote: PriceQuote) -> Self {
        self.quotes.insert(quote.game_id.clone(), quote);
        self
    }

    /// Every call fails with `error`.
    pub fn failing(mut self, error: PricingError) -> Self {
        self.failure = Some(error);
        self
    }

    /// Every call sleeps for `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Id sets of every call, in order.
    pub fn requested(&self) -> Vec<Vec<String>> {
        self.requested.lock().unwrap().clone()
    }
}

impl PriceSource for FakePriceSource {
    async fn fetch_quotes(
        &self,
        game_ids: &[String],
        region: &str,
    ) -> Result<HashMap<String, PriceQuote>, PricingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requested.lock().unwrap().push(game_ids.to_vec());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(e) = &self.failure {
            return Err(e.clone());
        }
        Ok(game_ids
            .iter()
            .filter_map(|id| self.quotes.get(id))
            .map(|q| {
                let mut q = q.clone();
                q.region = region.to_string();
                (q.game_id.clone(), q)
            })
            .collect())
    }
}

/// Wishlist source returning a fixed list, or a fixed error.
pub struct FakeWishlist {
    result: Result<Vec<WishlistItem>, WishlistError>,
}

impl FakeWishlist {
    pub fn new(items: Vec<WishlistItem>) -> Self {
        Self { result: Ok(items) }
    }

    pub fn failing(error: WishlistError) -> Self {
        Self { result: Err(error) }
    }
}

impl WishlistSource for FakeWishlist {
    async fn fetch_wishlist(&self, _account: &str) -> Result<Vec<WishlistItem>, WishlistError> {
        self.result.clone()
    }
}

/// Notifier that records what it sent and fails for chosen game ids.
#[derive(Default)]
pub struct RecordingNotifier {
    fail_for: Vec<String>,
    sent: Mutex<Vec<PriceAlert>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_for(mut self, game_id: &str) -> Self {
        self.fail_for.push(game_id.to_string());
        self
    }

    /// Alerts delivered successfully, in order.
    pub fn sent(&self) -> Vec<PriceAlert> {
        self.sent.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    async fn notify(&self, alert: &PriceAlert) -> Result<()> {
        if self.fail_for.contains(&alert.game_id) {
            bail!("channel {} unreachable", alert.channel_id);
        }
        self.sent.lock().unwrap().push(alert.clone());
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Acknowledged,
    Delivered(Reply),
}

#[derive(Default)]
pub struct RecordingResponder {
    events: Mutex<Vec<Event>>,
}

impl RecordingResponder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }
}

impl Responder for RecordingResponder {
    async fn acknowledge(&self) -> Result<()> {
        self.events.lock().unwrap().push(Event::Acknowledged);
        Ok(())
    }

    async fn deliver(&self, reply: &Reply) -> Result<()> {
        self.events.lock().unwrap().push(Event::Delivered(reply.clone()));
        Ok(())
    }
}
