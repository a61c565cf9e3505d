//! Error types shared by the store, the upstream clients and the command layer.

use thiserror::Error;

/// Failures talking to the pricing API.
///
/// "No data for these ids" is not an error: it comes back as an empty map.
#[derive(Debug, Clone, Error)]
pub enum PricingError {
    /// Missing or rejected API key. Never retried.
    #[error("pricing API rejected the credentials: {0}")]
    Auth(String),

    /// Network failure, timeout, rate limit or 5xx.
    #[error("pricing API unavailable: {0}")]
    Unavailable(String),

    /// The API answered but the body could not be understood.
    #[error("unexpected pricing API response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for PricingError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::InvalidResponse(e.to_string())
        } else {
            Self::Unavailable(e.to_string())
        }
    }
}

/// Persistence failures from the watchlist store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("query error: {0}")]
    Query(String),

    /// A stored row could not be decoded back into a watch entry.
    #[error("corrupt watchlist row: {0}")]
    Corrupt(String),
}

impl From<sqlx::Error> for StorageError {
    fn from(e: sqlx::Error) -> Self {
        Self::Query(e.to_string())
    }
}

/// Failures reading an external wishlist.
#[derive(Debug, Clone, Error)]
pub enum WishlistError {
    /// Unknown or private profile under every lookup form.
    #[error("no public wishlist found for '{0}'")]
    NotFound(String),

    #[error("wishlist source unavailable: {0}")]
    Unavailable(String),
}

impl From<reqwest::Error> for WishlistError {
    fn from(e: reqwest::Error) -> Self {
        Self::Unavailable(e.to_string())
    }
}

/// Bad user input. Reported inline; nothing is written.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("`{0}` is not a valid Steam App ID (digits only)")]
    GameId(String),

    #[error("target price must not be negative (got {0})")]
    NegativeTarget(String),

    #[error("`{0}` is not a valid region code")]
    Region(String),

    #[error("{0} must not be empty")]
    Empty(&'static str),
}

/// Everything a command handler can fail with.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Pricing(#[from] PricingError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Wishlist(#[from] WishlistError),

    /// The pricing API has no data for this app id.
    #[error("no price data for Steam App ID {0}")]
    UnknownGame(String),

    #[error("this command requires administrator permissions")]
    Forbidden,
}

impl CommandError {
    /// Text shown to the invoking user. Internal detail stays in the logs.
    pub fn user_message(&self) -> String {
        match self {
            CommandError::Validation(e) => format!("❌ {e}"),
            CommandError::Pricing(PricingError::Auth(_)) => {
                "❌ The price service rejected the bot's API key. Please contact the bot administrator."
                    .to_string()
            }
            CommandError::Pricing(_) => {
                "⚠️ The price service is unavailable right now. Please try again later.".to_string()
            }
            CommandError::Storage(_) => {
                "❌ Could not access the watchlist database. Please try again later.".to_string()
            }
            CommandError::Wishlist(WishlistError::NotFound(id)) => {
                format!("❌ No public wishlist found for `{id}`. Check the profile ID and its privacy settings.")
            }
            CommandError::Wishlist(WishlistError::Unavailable(_)) => {
                "⚠️ Steam is unavailable right now. Please try again later.".to_string()
            }
            CommandError::UnknownGame(id) => {
                format!("❌ No price data found for Steam App ID `{id}`. Please verify the App ID is correct.")
            }
            CommandError::Forbidden => {
                "❌ This command requires administrator permissions.".to_string()
            }
        }
    }
}
