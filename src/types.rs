use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::DEFAULT_REGION;

/// Platform-assigned user identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub u64);

/// Platform-assigned channel identifier (notification destination).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One user's interest in one game, keyed by `(user_id, game_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchEntry {
    pub user_id: UserId,
    /// Steam app id, as text.
    pub game_id: String,
    pub title: String,
    pub channel_id: ChannelId,
    /// `None` means "watch without a threshold": shown in the watchlist, never alerted.
    pub target_price: Option<Decimal>,
    pub region: String,
    pub added_at: DateTime<Utc>,
}

impl WatchEntry {
    /// Build a fresh entry stamped with the current time. An empty region falls
    /// back to [`DEFAULT_REGION`].
    pub fn new(
        user_id: UserId,
        game_id: impl Into<String>,
        title: impl Into<String>,
        channel_id: ChannelId,
        target_price: Option<Decimal>,
        region: Option<&str>,
    ) -> Self {
        let region = match region.map(str::trim) {
            Some(r) if !r.is_empty() => r.to_lowercase(),
            _ => DEFAULT_REGION.to_string(),
        };
        Self {
            user_id,
            game_id: game_id.into(),
            title: title.into(),
            channel_id,
            target_price,
            region,
            added_at: Utc::now(),
        }
    }
}

/// Which storefront category a price came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceKind {
    Retail,
    Keyshop,
}

impl PriceKind {
    pub fn label(&self) -> &'static str {
        match self {
            PriceKind::Retail => "Retail",
            PriceKind::Keyshop => "Keyshop",
        }
    }

    /// Longer wording used in alert messages.
    pub fn store_label(&self) -> &'static str {
        match self {
            PriceKind::Retail => "Retail stores",
            PriceKind::Keyshop => "Key shops",
        }
    }
}

/// Current pricing for one game in one region, derived from an upstream response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub game_id: String,
    pub title: Option<String>,
    /// gg.deals page for the game.
    pub url: Option<String>,
    pub currency: String,
    pub retail_price: Option<Decimal>,
    pub keyshop_price: Option<Decimal>,
    pub historical_low_retail: Option<Decimal>,
    pub historical_low_keyshop: Option<Decimal>,
    pub region: String,
}

impl PriceQuote {
    /// Lowest of the current retail and keyshop prices. Retail wins a tie.
    /// `None` when the upstream reported neither.
    pub fn best_price(&self) -> Option<(Decimal, PriceKind)> {
        match (self.retail_price, self.keyshop_price) {
            (Some(retail), Some(keyshop)) if retail <= keyshop => Some((retail, PriceKind::Retail)),
            (Some(_), Some(keyshop)) => Some((keyshop, PriceKind::Keyshop)),
            (Some(retail), None) => Some((retail, PriceKind::Retail)),
            (None, Some(keyshop)) => Some((keyshop, PriceKind::Keyshop)),
            (None, None) => None,
        }
    }

    /// All-time low across both categories.
    pub fn historical_low(&self) -> Option<Decimal> {
        match (self.historical_low_retail, self.historical_low_keyshop) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Title reported by the upstream, or a placeholder built from the app id.
    pub fn display_title(&self) -> String {
        match &self.title {
            Some(t) if !t.trim().is_empty() => t.clone(),
            _ => format!("Steam Game {}", self.game_id),
        }
    }
}

/// A price-drop notification produced by a polling cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceAlert {
    pub channel_id: ChannelId,
    pub user_id: UserId,
    pub game_id: String,
    pub title: String,
    pub best_price: Decimal,
    pub price_kind: PriceKind,
    pub target_price: Decimal,
    pub currency: String,
    pub url: Option<String>,
}

/// One `(game_id, title)` pair read from an external wishlist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WishlistItem {
    pub game_id: String,
    pub title: String,
}
