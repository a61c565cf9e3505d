pub mod api;
pub mod catalog;
pub mod commands;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod monitor;
pub mod notifier;
pub mod pricing;
pub mod reporter;
pub mod store;
pub mod types;
pub mod wishlist;

#[cfg(test)]
pub(crate) mod testing;

/// gg.deals public API base URL (key passed as a query parameter)
pub const GGDEALS_API_BASE: &str = "https://api.gg.deals";

/// Batched price lookup keyed by Steam app id
pub const PRICES_BY_STEAM_APP_ID_PATH: &str = "/v1/prices/by-steam-app-id/";

/// Steam storefront base URL, used for profile wishlists
pub const STEAM_STORE_BASE: &str = "https://store.steampowered.com";

/// Discord REST API base URL (channel message delivery)
pub const DISCORD_API_BASE: &str = "https://discord.com/api/v10";

/// Region used when a command or record does not name one
pub const DEFAULT_REGION: &str = "us";

/// Steam app id used for connectivity probes (Counter-Strike 2)
pub const PROBE_APP_ID: &str = "730";

pub const USER_AGENT: &str = concat!("steam-price-watch/", env!("CARGO_PKG_VERSION"));
