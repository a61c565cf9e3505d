//! User-facing commands: input validation, store and pricing calls, reply text.

use std::collections::HashSet;
use std::fmt::Write as _;
use std::future::Future;
use std::sync::Arc;

use anyhow::Context;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::catalog::GameCatalog;
use crate::error::{CommandError, PricingError, ValidationError};
use crate::pricing::{PriceSource, PricingClient, is_region_code};
use crate::store::WatchlistStore;
use crate::types::{ChannelId, PriceQuote, UserId, WatchEntry, WishlistItem};
use crate::wishlist::WishlistSource;

/// Who issued a command and where.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Invocation {
    pub user_id: UserId,
    pub channel_id: ChannelId,
    pub is_admin: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Search {
        query: String,
    },
    Prices {
        game_id: String,
        region: Option<String>,
    },
    Watch {
        game_id: String,
        target_price: Option<Decimal>,
        region: Option<String>,
        title: Option<String>,
    },
    Unwatch {
        game_id: String,
    },
    Watchlist {
        region: Option<String>,
    },
    Import {
        account: String,
        target_price: Option<Decimal>,
        region: Option<String>,
    },
    ApiTest,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Search { .. } => "search",
            Command::Prices { .. } => "prices",
            Command::Watch { .. } => "watch",
            Command::Unwatch { .. } => "unwatch",
            Command::Watchlist { .. } => "watchlist",
            Command::Import { .. } => "import",
            Command::ApiTest => "apitest",
        }
    }

    /// Whether the handler reaches the network and must be acknowledged first.
    pub fn defers(&self) -> bool {
        !matches!(self, Command::Search { .. } | Command::Unwatch { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Error,
}

/// Final response to a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reply {
    pub status: Status,
    pub body: String,
}

impl Reply {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: Status::Ok,
            body: body.into(),
        }
    }

    pub fn error(body: impl Into<String>) -> Self {
        Self {
            status: Status::Error,
            body: body.into(),
        }
    }
}

/// Response channel supplied by the host platform.
///
/// `acknowledge` tells the user the command is being worked on. `deliver`
/// sends the final reply, exactly once per command.
pub trait Responder {
    fn acknowledge(&self) -> impl Future<Output = anyhow::Result<()>> + Send;
    fn deliver(&self, reply: &Reply) -> impl Future<Output = anyhow::Result<()>> + Send;
}

/// Outcome of a wishlist import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub imported: usize,
    /// Items the pricing API did not recognise, with a malformed id, or
    /// repeating an id already seen. `imported + skipped` is the wishlist size.
    pub skipped: usize,
}

// ── validation ─────────────────────────────────────────────────────

/// Trimmed Steam app id; digits only.
pub fn validate_game_id(game_id: &str) -> Result<String, ValidationError> {
    let game_id = game_id.trim();
    if game_id.is_empty() {
        return Err(ValidationError::Empty("Steam App ID"));
    }
    if !game_id.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ValidationError::GameId(game_id.to_string()));
    }
    Ok(game_id.to_string())
}

pub fn validate_target(target: Option<Decimal>) -> Result<Option<Decimal>, ValidationError> {
    match target {
        Some(t) if t.is_sign_negative() && !t.is_zero() => {
            Err(ValidationError::NegativeTarget(t.to_string()))
        }
        other => Ok(other),
    }
}

/// Lowercase two or three letter region code, or `default` when not given.
pub fn validate_region(region: Option<&str>, default: &str) -> Result<String, ValidationError> {
    let region = match region.map(str::trim) {
        Some(r) if !r.is_empty() => r,
        _ => default.trim(),
    };
    if !is_region_code(region) {
        return Err(ValidationError::Region(region.to_string()));
    }
    Ok(region.to_lowercase())
}

/// Best price minus target: negative when the game is already below target.
pub fn price_delta(best: Decimal, target: Decimal) -> Decimal {
    best - target
}

fn signed(d: Decimal) -> String {
    if d > Decimal::ZERO {
        format!("+{d}")
    } else {
        d.to_string()
    }
}

fn price_or_na(price: Option<Decimal>, currency: &str) -> String {
    match price {
        Some(p) => format!("{p} {currency}"),
        None => "Not available".to_string(),
    }
}

// ── handler ────────────────────────────────────────────────────────

/// Runs commands against the store and the pricing client.
pub struct CommandHandler<S, W, C> {
    store: WatchlistStore,
    pricing: Arc<PricingClient<S>>,
    wishlist: W,
    catalog: C,
    default_region: String,
}

impl<S, W, C> CommandHandler<S, W, C>
where
    S: PriceSource,
    W: WishlistSource,
    C: GameCatalog,
{
    pub fn new(
        store: WatchlistStore,
        pricing: Arc<PricingClient<S>>,
        wishlist: W,
        catalog: C,
        default_region: &str,
    ) -> Self {
        Self {
            store,
            pricing,
            wishlist,
            catalog,
            default_region: default_region.trim().to_lowercase(),
        }
    }

    /// Run one command end to end: acknowledge if it defers, execute, then
    /// deliver the reply. Command failures become an error reply; only a
    /// failing responder is returned as an error.
    pub async fn dispatch<R: Responder>(
        &self,
        invocation: &Invocation,
        command: Command,
        responder: &R,
    ) -> anyhow::Result<Reply> {
        let name = command.name();
        debug!("Command {name} from user {}", invocation.user_id);

        let reply = match authorize(invocation, &command) {
            Err(e) => {
                warn!("Command {name} refused for user {}", invocation.user_id);
                Reply::error(e.user_message())
            }
            Ok(()) => {
                if command.defers() {
                    responder
                        .acknowledge()
                        .await
                        .with_context(|| format!("failed to acknowledge {name}"))?;
                }
                match self.execute(invocation, command).await {
                    Ok(reply) => reply,
                    Err(e) => {
                        log_failure(name, invocation, &e);
                        Reply::error(e.user_message())
                    }
                }
            }
        };

        responder
            .deliver(&reply)
            .await
            .with_context(|| format!("failed to deliver {name} reply"))?;
        Ok(reply)
    }

    async fn execute(&self, inv: &Invocation, command: Command) -> Result<Reply, CommandError> {
        match command {
            Command::Search { query } => self.search(&query).map(Reply::ok),
            Command::Prices { game_id, region } => {
                self.prices(&game_id, region.as_deref()).await.map(Reply::ok)
            }
            Command::Watch {
                game_id,
                target_price,
                region,
                title,
            } => self
                .watch(inv, &game_id, target_price, region.as_deref(), title.as_deref())
                .await
                .map(Reply::ok),
            Command::Unwatch { game_id } => self.unwatch(inv, &game_id).await.map(Reply::ok),
            Command::Watchlist { region } => {
                self.watchlist(inv, region.as_deref()).await.map(Reply::ok)
            }
            Command::Import {
                account,
                target_price,
                region,
            } => {
                let summary = self
                    .import(inv, &account, target_price, region.as_deref())
                    .await?;
                Ok(Reply::ok(render_import(account.trim(), summary)))
            }
            Command::ApiTest => Ok(self.api_test().await),
        }
    }

    pub fn search(&self, query: &str) -> Result<String, CommandError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(ValidationError::Empty("search query").into());
        }

        let games = self.catalog.search(query);
        if games.is_empty() {
            return Ok(format!(
                "No games found for '{query}'. Try searching for popular games like 'Counter-Strike', 'Dota', 'Portal', etc."
            ));
        }

        let mut out = format!("Search results for '{query}':\n");
        for (i, game) in games.iter().enumerate() {
            let _ = writeln!(out, "{}. {} (Steam App ID: `{}`)", i + 1, game.name, game.game_id);
        }
        out.push_str("Note: search covers a list of popular Steam games. Use the Steam App ID for precise results.");
        Ok(out)
    }

    pub async fn prices(&self, game_id: &str, region: Option<&str>) -> Result<String, CommandError> {
        let game_id = validate_game_id(game_id)?;
        let region = validate_region(region, &self.default_region)?;

        let quote = self
            .pricing
            .quote(&game_id, &region)
            .await?
            .ok_or_else(|| CommandError::UnknownGame(game_id.clone()))?;
        Ok(render_prices(&quote, &region))
    }

    pub async fn watch(
        &self,
        inv: &Invocation,
        game_id: &str,
        target_price: Option<Decimal>,
        region: Option<&str>,
        title: Option<&str>,
    ) -> Result<String, CommandError> {
        let game_id = validate_game_id(game_id)?;
        let target_price = validate_target(target_price)?;
        let region = validate_region(region, &self.default_region)?;

        let quote = self
            .pricing
            .quote(&game_id, &region)
            .await?
            .ok_or_else(|| CommandError::UnknownGame(game_id.clone()))?;

        let title = match title.map(str::trim) {
            Some(t) if !t.is_empty() => t.to_string(),
            _ => quote.display_title(),
        };
        let entry = WatchEntry::new(
            inv.user_id,
            &game_id,
            &title,
            inv.channel_id,
            target_price,
            Some(&region),
        );
        self.store.upsert(&entry).await?;
        info!(
            "User {} is watching {game_id} ({title}), target {:?}, region {region}",
            inv.user_id, target_price
        );

        let target_text = match target_price {
            Some(t) => format!(" (target: {t} {})", quote.currency),
            None => String::new(),
        };
        Ok(format!(
            "Added **{title}** (App ID: {game_id}) to your watchlist{target_text}!"
        ))
    }

    pub async fn unwatch(&self, inv: &Invocation, game_id: &str) -> Result<String, CommandError> {
        let game_id = validate_game_id(game_id)?;
        if self.store.remove(inv.user_id, &game_id).await? {
            info!("User {} stopped watching {game_id}", inv.user_id);
            Ok(format!("Game with App ID `{game_id}` removed from your watchlist!"))
        } else {
            Ok(format!("App ID `{game_id}` not found in your watchlist."))
        }
    }

    pub async fn watchlist(&self, inv: &Invocation, region: Option<&str>) -> Result<String, CommandError> {
        let region = validate_region(region, &self.default_region)?;
        let entries = self.store.list_for_user(inv.user_id).await?;
        if entries.is_empty() {
            return Ok(
                "Your watchlist is empty. Use `watch <steam_app_id> [target_price] [region] [game_name]` to add games!"
                    .to_string(),
            );
        }

        let ids: Vec<&str> = entries.iter().map(|e| e.game_id.as_str()).collect();
        let (quotes, prices_down) = match self.pricing.fetch_prices(&ids, &region).await {
            Ok(quotes) => (quotes, false),
            Err(e) => {
                warn!("Watchlist for user {} shown without prices: {e}", inv.user_id);
                (Default::default(), true)
            }
        };

        let mut out = String::from("Your Watchlist\n");
        for entry in &entries {
            let quote = quotes.get(&entry.game_id);
            let title = if entry.title.trim().is_empty() {
                quote.map_or_else(|| format!("Steam Game {}", entry.game_id), PriceQuote::display_title)
            } else {
                entry.title.clone()
            };
            let best = quote.and_then(|q| q.best_price().map(|(p, kind)| (p, kind, q.currency.as_str())));

            let _ = writeln!(out, "\n**{title}**");
            let _ = writeln!(out, "Steam App ID: `{}`", entry.game_id);
            match best {
                Some((price, kind, currency)) => {
                    let _ = writeln!(out, "Current best: {price} {currency} ({})", kind.label());
                }
                None => out.push_str("No current price data\n"),
            }
            if let Some(target) = entry.target_price {
                match best {
                    Some((price, _, _)) => {
                        let _ = writeln!(out, "Target: {target} (delta: {})", signed(price_delta(price, target)));
                    }
                    None => {
                        let _ = writeln!(out, "Target: {target}");
                    }
                }
            }
        }
        if prices_down {
            out.push_str("\n⚠️ Current prices are unavailable right now.\n");
        }
        let _ = write!(out, "\nRegion: {}", region.to_uppercase());
        Ok(out)
    }

    /// Watch every recognised game from an external wishlist. Ids are
    /// validated with one batch lookup; unrecognised ones are skipped.
    pub async fn import(
        &self,
        inv: &Invocation,
        account: &str,
        target_price: Option<Decimal>,
        region: Option<&str>,
    ) -> Result<ImportSummary, CommandError> {
        let account = account.trim();
        if account.is_empty() {
            return Err(ValidationError::Empty("profile ID").into());
        }
        let target_price = validate_target(target_price)?;
        let region = validate_region(region, &self.default_region)?;

        let items = self.wishlist.fetch_wishlist(account).await?;
        let mut summary = ImportSummary::default();

        let mut seen = HashSet::new();
        let mut candidates = Vec::new();
        for item in items {
            let game_id = match validate_game_id(&item.game_id) {
                Ok(id) => id,
                Err(e) => {
                    debug!("Skipping wishlist item: {e}");
                    summary.skipped += 1;
                    continue;
                }
            };
            if !seen.insert(game_id.clone()) {
                debug!("Skipping repeated wishlist item {game_id}");
                summary.skipped += 1;
                continue;
            }
            candidates.push(WishlistItem { game_id, ..item });
        }
        if candidates.is_empty() {
            return Ok(summary);
        }

        let ids: Vec<&str> = candidates.iter().map(|i| i.game_id.as_str()).collect();
        let quotes = self.pricing.fetch_prices(&ids, &region).await?;

        for item in &candidates {
            let Some(quote) = quotes.get(&item.game_id) else {
                summary.skipped += 1;
                continue;
            };
            let title = if item.title.trim().is_empty() {
                quote.display_title()
            } else {
                item.title.trim().to_string()
            };
            let entry = WatchEntry::new(
                inv.user_id,
                &item.game_id,
                title,
                inv.channel_id,
                target_price,
                Some(&region),
            );
            self.store.upsert(&entry).await?;
            summary.imported += 1;
        }

        info!(
            "Imported {} game(s) from wishlist {account} for user {} ({} skipped)",
            summary.imported, inv.user_id, summary.skipped
        );
        Ok(summary)
    }

    pub async fn api_test(&self) -> Reply {
        match self.pricing.probe().await {
            Ok(true) => Reply::ok("✅ API connection successful!"),
            Err(e @ PricingError::Auth(_)) => Reply::error(CommandError::from(e).user_message()),
            _ => Reply::error("❌ API connection failed. Check bot logs for details."),
        }
    }
}

fn authorize(inv: &Invocation, command: &Command) -> Result<(), CommandError> {
    match command {
        Command::ApiTest if !inv.is_admin => Err(CommandError::Forbidden),
        _ => Ok(()),
    }
}

fn log_failure(name: &str, inv: &Invocation, e: &CommandError) {
    match e {
        CommandError::Validation(_) | CommandError::UnknownGame(_) => {
            debug!("Command {name} rejected for user {}: {e}", inv.user_id)
        }
        CommandError::Pricing(PricingError::Auth(_)) => {
            error!("Command {name} failed, pricing API key rejected: {e}")
        }
        _ => warn!("Command {name} failed for user {}: {e}", inv.user_id),
    }
}

fn render_prices(quote: &PriceQuote, region: &str) -> String {
    let currency = quote.currency.as_str();
    let mut out = format!("{}\nSteam App ID: `{}`\n", quote.display_title(), quote.game_id);
    let _ = writeln!(out, "Current Retail Price: {}", price_or_na(quote.retail_price, currency));
    let _ = writeln!(out, "Current Keyshops Price: {}", price_or_na(quote.keyshop_price, currency));
    if let Some(low) = quote.historical_low_retail {
        let _ = writeln!(out, "Historical Low (Retail): {low} {currency}");
    }
    if let Some(low) = quote.historical_low_keyshop {
        let _ = writeln!(out, "Historical Low (Keyshops): {low} {currency}");
    }
    if let Some(url) = &quote.url {
        let _ = writeln!(out, "View All Deals: {url}");
    }
    let _ = write!(out, "Region: {} | Currency: {currency}", region.to_uppercase());
    out
}

fn render_import(account: &str, summary: ImportSummary) -> String {
    if summary.imported == 0 && summary.skipped == 0 {
        return format!("No games found in the wishlist of `{account}`.");
    }
    format!(
        "Imported {} game(s) from the wishlist of `{account}` ({} skipped: repeated or no price data).",
        summary.imported, summary.skipped
    )
}
