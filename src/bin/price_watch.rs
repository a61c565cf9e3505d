use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use tracing::{error, info, warn};

use steam_price_watch::api::GgDealsApi;
use steam_price_watch::catalog::StaticCatalog;
use steam_price_watch::commands::{Command, CommandHandler, Invocation, Reply, Responder, Status};
use steam_price_watch::config::{AppConfig, CONFIG_PATH, NotifierKind};
use steam_price_watch::error::PricingError;
use steam_price_watch::monitor::{CycleReport, PriceMonitor};
use steam_price_watch::notifier::{DiscordNotifier, Notifier, StdoutNotifier};
use steam_price_watch::pricing::{PriceSource, PricingClient};
use steam_price_watch::reporter;
use steam_price_watch::store::WatchlistStore;
use steam_price_watch::types::{ChannelId, UserId};
use steam_price_watch::wishlist::SteamWishlist;

#[derive(Parser)]
#[command(name = "price-watch", about = "Steam game price watch bot")]
struct Args {
    /// Path to the TOML config file
    #[arg(long, global = true, default_value = CONFIG_PATH)]
    config: PathBuf,

    /// Invoking user id
    #[arg(long, global = true, default_value_t = 0)]
    user: u64,

    /// Channel that receives alerts for entries created by this invocation
    #[arg(long, global = true, default_value_t = 0)]
    channel: u64,

    /// Invoke with administrator permissions
    #[arg(long, global = true)]
    admin: bool,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Search popular games by name
    Search { query: String },

    /// Current prices for a Steam app id
    Prices {
        game_id: String,
        #[arg(long)]
        region: Option<String>,
    },

    /// Add a game to your watchlist
    Watch {
        game_id: String,
        /// Alert when the best price drops to this value
        #[arg(long, allow_negative_numbers = true)]
        target: Option<Decimal>,
        #[arg(long)]
        region: Option<String>,
        /// Custom name for the game
        #[arg(long)]
        name: Option<String>,
    },

    /// Remove a game from your watchlist
    Unwatch { game_id: String },

    /// Show your watchlist with current prices
    Watchlist {
        #[arg(long)]
        region: Option<String>,
    },

    /// Watch every game on a public Steam wishlist
    Import {
        /// SteamID64 or custom profile URL name
        profile: String,
        #[arg(long, allow_negative_numbers = true)]
        target: Option<Decimal>,
        #[arg(long)]
        region: Option<String>,
    },

    /// Check the pricing API connection (admin only)
    Apitest,

    /// Run the price monitor until Ctrl+C
    Run,
}

impl Cmd {
    fn into_command(self) -> Option<Command> {
        Some(match self {
            Cmd::Search { query } => Command::Search { query },
            Cmd::Prices { game_id, region } => Command::Prices { game_id, region },
            Cmd::Watch {
                game_id,
                target,
                region,
                name,
            } => Command::Watch {
                game_id,
                target_price: target,
                region,
                title: name,
            },
            Cmd::Unwatch { game_id } => Command::Unwatch { game_id },
            Cmd::Watchlist { region } => Command::Watchlist { region },
            Cmd::Import {
                profile,
                target,
                region,
            } => Command::Import {
                account: profile,
                target_price: target,
                region,
            },
            Cmd::Apitest => Command::ApiTest,
            Cmd::Run => return None,
        })
    }
}

/// Acknowledgements go to stderr, replies to stdout.
struct ConsoleResponder;

impl Responder for ConsoleResponder {
    async fn acknowledge(&self) -> Result<()> {
        eprintln!("⏳ Working on it...");
        Ok(())
    }

    async fn deliver(&self, reply: &Reply) -> Result<()> {
        println!("{}", reply.body);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config = AppConfig::resolve(&args.config)?;
    let settings = &config.settings;

    let store = WatchlistStore::open(&settings.database_path)
        .await
        .with_context(|| format!("failed to open {}", settings.database_path.display()))?;
    let api = GgDealsApi::new(&config.credentials.pricing_api_key)?;
    let pricing = Arc::new(PricingClient::new(
        api,
        Duration::from_secs(settings.cache_ttl_secs),
    ));

    let invocation = Invocation {
        user_id: UserId(args.user),
        channel_id: ChannelId(args.channel),
        is_admin: args.admin,
    };

    let outcome = match args.command.into_command() {
        Some(command) => {
            let handler = CommandHandler::new(
                store.clone(),
                Arc::clone(&pricing),
                SteamWishlist::new()?,
                StaticCatalog::new(),
                &settings.default_region,
            );
            handler
                .dispatch(&invocation, command, &ConsoleResponder)
                .await
                .map(|reply| match reply.status {
                    Status::Ok => ExitCode::SUCCESS,
                    Status::Error => ExitCode::FAILURE,
                })
        }
        None => run_monitor(&config, store.clone(), Arc::clone(&pricing))
            .await
            .map(|()| ExitCode::SUCCESS),
    };

    store.close().await;
    match Arc::try_unwrap(pricing) {
        Ok(pricing) => pricing.close(),
        Err(_) => warn!("Pricing client still shared at shutdown"),
    }
    outcome
}

async fn run_monitor<S: PriceSource>(
    config: &AppConfig,
    store: WatchlistStore,
    pricing: Arc<PricingClient<S>>,
) -> Result<()> {
    match pricing.probe().await {
        Ok(true) => {}
        Ok(false) => warn!("Pricing API returned no data for the probe game, continuing"),
        Err(PricingError::Auth(e)) => bail!("pricing API rejected the API key: {e}"),
        Err(e) => warn!("Pricing API unreachable at startup, continuing: {e}"),
    }

    let settings = &config.settings;
    match settings.notifier {
        NotifierKind::Discord => {
            let notifier = DiscordNotifier::new(&config.credentials.bot_token)?;
            monitor_until_ctrl_c(store, pricing, notifier, config, |_| {}).await;
        }
        NotifierKind::Stdout => {
            monitor_until_ctrl_c(store, pricing, StdoutNotifier, config, reporter::report_cycle).await;
        }
    }
    Ok(())
}

async fn monitor_until_ctrl_c<S: PriceSource, N: Notifier>(
    store: WatchlistStore,
    pricing: Arc<PricingClient<S>>,
    notifier: N,
    config: &AppConfig,
    on_report: impl FnMut(&CycleReport),
) {
    let settings = &config.settings;
    let monitor = PriceMonitor::new(
        store,
        pricing,
        notifier,
        &settings.poll_region,
        Duration::from_secs(settings.poll_interval_secs),
    );

    info!("Press Ctrl+C to stop.");
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {e}");
        }
    };
    let cycles = monitor.run(shutdown, on_report).await;
    info!("Shutting down after {cycles} price check(s)");
}
