use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::dispatch::deliver_alerts;
use crate::notifier::Notifier;
use crate::pricing::{PriceSource, PricingClient, normalize_region};
use crate::store::WatchlistStore;
use crate::types::{PriceAlert, PriceQuote, WatchEntry};

/// Default delay between polling cycles.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// Group entries by the region they will be priced in.
///
/// Every entry is priced in `poll_region`, whatever region it was saved with,
/// so this always yields at most one group.
pub fn group_by_region(
    entries: Vec<WatchEntry>,
    poll_region: &str,
) -> BTreeMap<String, Vec<WatchEntry>> {
    let mut groups = BTreeMap::new();
    if !entries.is_empty() {
        groups.insert(normalize_region(poll_region), entries);
    }
    groups
}

/// Alerts for every entry whose target is met by the current best price.
///
/// Entries without a target, without a quote, or whose quote has neither a
/// retail nor a keyshop price produce nothing.
pub fn evaluate_alerts(
    entries: &[WatchEntry],
    quotes: &HashMap<String, PriceQuote>,
) -> Vec<PriceAlert> {
    entries
        .iter()
        .filter_map(|entry| {
            let target = entry.target_price?;
            let quote = quotes.get(&entry.game_id)?;
            let (best, kind) = quote.best_price()?;
            if best > target {
                return None;
            }
            let title = if entry.title.trim().is_empty() {
                quote.display_title()
            } else {
                entry.title.clone()
            };
            Some(PriceAlert {
                channel_id: entry.channel_id,
                user_id: entry.user_id,
                game_id: entry.game_id.clone(),
                title,
                best_price: best,
                price_kind: kind,
                target_price: target,
                currency: quote.currency.clone(),
                url: quote.url.clone(),
            })
        })
        .collect()
}

/// Counters for one polling cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub entries: usize,
    /// Stored rows that could not be decoded and were left out.
    pub skipped_entries: usize,
    pub games: usize,
    pub alerts: usize,
    pub delivered: usize,
    pub failed_deliveries: usize,
    pub failed_batches: usize,
    /// The watchlist could not be read; nothing else was attempted.
    pub store_failed: bool,
}

impl CycleReport {
    fn new() -> Self {
        Self {
            started_at: Utc::now(),
            entries: 0,
            skipped_entries: 0,
            games: 0,
            alerts: 0,
            delivered: 0,
            failed_deliveries: 0,
            failed_batches: 0,
            store_failed: false,
        }
    }
}

#[derive(Debug, Clone)]
pub enum CycleOutcome {
    Completed(CycleReport),
    /// Another cycle was still running.
    Skipped,
}

/// Recurring price check over the whole watchlist.
pub struct PriceMonitor<S, N> {
    store: WatchlistStore,
    pricing: Arc<PricingClient<S>>,
    notifier: N,
    poll_region: String,
    interval: Duration,
    cycle_lock: Mutex<()>,
}

impl<S: PriceSource, N: Notifier> PriceMonitor<S, N> {
    pub fn new(
        store: WatchlistStore,
        pricing: Arc<PricingClient<S>>,
        notifier: N,
        poll_region: &str,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            pricing,
            notifier,
            poll_region: normalize_region(poll_region),
            interval,
            cycle_lock: Mutex::new(()),
        }
    }

    /// Run one polling cycle. Returns [`CycleOutcome::Skipped`] without doing
    /// anything if a cycle is already in progress.
    pub async fn run_cycle(&self) -> CycleOutcome {
        let Ok(_running) = self.cycle_lock.try_lock() else {
            warn!("Previous price check still running, skipping this one");
            return CycleOutcome::Skipped;
        };

        info!("Running price check...");
        let mut report = CycleReport::new();

        let entries = match self.store.scan_all().await {
            Ok(listing) => {
                report.skipped_entries = listing.skipped;
                listing.entries
            }
            Err(e) => {
                error!("Price check aborted, could not read watchlist: {e}");
                report.store_failed = true;
                return CycleOutcome::Completed(report);
            }
        };
        report.entries = entries.len();
        if entries.is_empty() {
            info!("Watchlist is empty, nothing to check");
            return CycleOutcome::Completed(report);
        }

        for (region, group) in group_by_region(entries, &self.poll_region) {
            let game_ids: Vec<&str> = group
                .iter()
                .map(|e| e.game_id.as_str())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            report.games += game_ids.len();

            let quotes = match self.pricing.fetch_prices_fresh(&game_ids, &region).await {
                Ok(quotes) => quotes,
                Err(e) => {
                    error!(
                        "Failed to get prices for {} game(s) in {region}: {e}",
                        game_ids.len()
                    );
                    report.failed_batches += 1;
                    continue;
                }
            };

            let alerts = evaluate_alerts(&group, &quotes);
            report.alerts += alerts.len();
            let delivery = deliver_alerts(&self.notifier, &alerts).await;
            report.delivered += delivery.delivered;
            report.failed_deliveries += delivery.failed;
        }

        info!(
            "Price check completed: {} entries ({} unreadable), {} games, {} alert(s) ({} delivered, {} failed)",
            report.entries,
            report.skipped_entries,
            report.games,
            report.alerts,
            report.delivered,
            report.failed_deliveries,
        );
        CycleOutcome::Completed(report)
    }

    /// Run cycles every `interval` (the first one immediately) until `shutdown`
    /// resolves. Ticks missed while a cycle runs are skipped, not queued.
    /// Returns the number of completed cycles.
    pub async fn run<F>(&self, shutdown: F, mut on_report: impl FnMut(&CycleReport)) -> u64
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        info!(
            "Price monitor started (interval: {}s, region: {})",
            self.interval.as_secs(),
            self.poll_region
        );

        let mut completed = 0;
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("Price monitor stopping");
                    break;
                }
                _ = ticker.tick() => {
                    if let CycleOutcome::Completed(report) = self.run_cycle().await {
                        completed += 1;
                        on_report(&report);
                    }
                }
            }
        }
        completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PricingError;
    use crate::pricing::DEFAULT_CACHE_TTL;
    use crate::testing::{FakePriceSource, RecordingNotifier, quote};
    use crate::types::{ChannelId, UserId};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn watch(user: u64, game: &str, target: Option<Decimal>) -> WatchEntry {
        WatchEntry::new(UserId(user), game, format!("Game {game}"), ChannelId(100 + user), target, None)
    }

    async fn monitor(
        entries: &[WatchEntry],
        source: FakePriceSource,
        notifier: RecordingNotifier,
    ) -> PriceMonitor<FakePriceSource, RecordingNotifier> {
        monitor_every(entries, source, notifier, DEFAULT_POLL_INTERVAL).await
    }

    async fn monitor_every(
        entries: &[WatchEntry],
        source: FakePriceSource,
        notifier: RecordingNotifier,
        interval: Duration,
    ) -> PriceMonitor<FakePriceSource, RecordingNotifier> {
        let store = WatchlistStore::open_in_memory().await.unwrap();
        for e in entries {
            store.upsert(e).await.unwrap();
        }
        let pricing = Arc::new(PricingClient::new(source, DEFAULT_CACHE_TTL));
        PriceMonitor::new(store, pricing, notifier, "us", interval)
    }

    fn completed(outcome: CycleOutcome) -> CycleReport {
        match outcome {
            CycleOutcome::Completed(report) => report,
            CycleOutcome::Skipped => panic!("cycle was skipped"),
        }
    }

    // ── evaluate_alerts ────────────────────────────────────────────

    #[test]
    fn alert_when_best_at_or_below_target() {
        let entries = vec![watch(1, "730", Some(dec!(15.00)))];
        let quotes = HashMap::from([("730".to_string(), quote("730", Some(dec!(10.00)), None))]);
        let alerts = evaluate_alerts(&entries, &quotes);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].best_price, dec!(10.00));
        assert_eq!(alerts[0].target_price, dec!(15.00));
        assert_eq!(alerts[0].user_id, UserId(1));
        assert_eq!(alerts[0].channel_id, ChannelId(101));
        assert_eq!(alerts[0].title, "Game 730");
    }

    #[test]
    fn alert_on_exact_target() {
        let entries = vec![watch(1, "730", Some(dec!(10)))];
        let quotes = HashMap::from([("730".to_string(), quote("730", None, Some(dec!(10.00))))]);
        assert_eq!(evaluate_alerts(&entries, &quotes).len(), 1);
    }

    #[test]
    fn no_alert_above_target_or_without_target() {
        let entries = vec![watch(1, "730", Some(dec!(5))), watch(2, "730", None)];
        let quotes = HashMap::from([("730".to_string(), quote("730", Some(dec!(10)), None))]);
        assert!(evaluate_alerts(&entries, &quotes).is_empty());
    }

    #[test]
    fn no_alert_without_prices_or_quote() {
        let entries = vec![watch(1, "730", Some(dec!(5))), watch(1, "570", Some(dec!(5)))];
        let quotes = HashMap::from([("730".to_string(), quote("730", None, None))]);
        assert!(evaluate_alerts(&entries, &quotes).is_empty());
    }

    #[test]
    fn alert_uses_cheaper_keyshop_and_quote_title_fallback() {
        let mut entry = watch(1, "730", Some(dec!(15)));
        entry.title = String::new();
        let mut q = quote("730", Some(dec!(19.99)), Some(dec!(14.99)));
        q.title = Some("Counter-Strike 2".into());
        let quotes = HashMap::from([("730".to_string(), q)]);
        let alerts = evaluate_alerts(&[entry], &quotes);
        assert_eq!(alerts[0].best_price, dec!(14.99));
        assert_eq!(alerts[0].price_kind, crate::types::PriceKind::Keyshop);
        assert_eq!(alerts[0].title, "Counter-Strike 2");
    }

    #[test]
    fn grouping_uses_poll_region_only() {
        let mut eu = watch(1, "730", None);
        eu.region = "eu".into();
        let groups = group_by_region(vec![eu, watch(2, "570", None)], "US");
        assert_eq!(groups.len(), 1);
        assert_eq!(groups["us"].len(), 2);
        assert!(group_by_region(Vec::new(), "us").is_empty());
    }

    // ── run_cycle ──────────────────────────────────────────────────

    #[tokio::test]
    async fn cycle_emits_one_alert() {
        let source = FakePriceSource::new().with(quote("730", Some(dec!(10.00)), None));
        let m = monitor(&[watch(1, "730", Some(dec!(15.00)))], source, RecordingNotifier::new()).await;

        let report = completed(m.run_cycle().await);
        assert_eq!(report.entries, 1);
        assert_eq!(report.games, 1);
        assert_eq!(report.alerts, 1);
        assert_eq!(report.delivered, 1);

        let sent = m.notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].best_price, dec!(10.00));
        assert_eq!(sent[0].game_id, "730");
    }

    #[tokio::test]
    async fn cycle_batches_distinct_ids_in_poll_region() {
        let source = FakePriceSource::new()
            .with(quote("730", Some(dec!(10)), None))
            .with(quote("570", Some(dec!(1)), None));
        let mut eu = watch(2, "730", Some(dec!(20)));
        eu.region = "eu".into();
        let entries = [watch(1, "730", Some(dec!(15))), eu, watch(3, "570", None)];
        let m = monitor(&entries, source, RecordingNotifier::new()).await;

        let report = completed(m.run_cycle().await);
        assert_eq!(report.entries, 3);
        assert_eq!(report.games, 2);
        assert_eq!(report.alerts, 2);
        assert_eq!(m.pricing.cache().len(), 1);
    }

    #[tokio::test]
    async fn cycle_always_fetches_live_prices() {
        let source = FakePriceSource::new().with(quote("730", Some(dec!(10)), None));
        let m = monitor(&[watch(1, "730", Some(dec!(15)))], source, RecordingNotifier::new()).await;

        completed(m.run_cycle().await);
        completed(m.run_cycle().await);
        // No cooldown: the same entry alerts every cycle.
        assert_eq!(m.notifier.sent().len(), 2);
    }

    #[tokio::test]
    async fn empty_watchlist_skips_upstream() {
        let m = monitor(&[], FakePriceSource::new(), RecordingNotifier::new()).await;
        let report = completed(m.run_cycle().await);
        assert_eq!(report.entries, 0);
        assert!(m.notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn undecodable_row_does_not_block_alerts() {
        let source = FakePriceSource::new()
            .with(quote("730", Some(dec!(10)), None))
            .with(quote("570", Some(dec!(1)), None));
        let m = monitor(&[watch(1, "730", Some(dec!(15)))], source, RecordingNotifier::new()).await;
        sqlx::query(
            "INSERT INTO watchlist (user_id, steam_app_id, game_title, channel_id, target_price, region, added_at)
             VALUES (2, '570', 'Dota 2', 6, 'free', 'us', '2024-05-01T12:00:00Z')",
        )
        .execute(m.store.pool())
        .await
        .unwrap();

        let report = completed(m.run_cycle().await);
        assert!(!report.store_failed);
        assert_eq!(report.entries, 1);
        assert_eq!(report.skipped_entries, 1);
        assert_eq!(report.alerts, 1);
        assert_eq!(m.notifier.sent()[0].game_id, "730");
    }

    #[tokio::test]
    async fn upstream_failure_is_contained() {
        let source = FakePriceSource::new().failing(PricingError::Unavailable("503".into()));
        let m = monitor(&[watch(1, "730", Some(dec!(15)))], source, RecordingNotifier::new()).await;

        let report = completed(m.run_cycle().await);
        assert_eq!(report.failed_batches, 1);
        assert_eq!(report.alerts, 0);
        assert!(m.notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn delivery_failure_does_not_abort_cycle() {
        let source = FakePriceSource::new()
            .with(quote("730", Some(dec!(10)), None))
            .with(quote("570", Some(dec!(1)), None));
        let entries = [watch(1, "730", Some(dec!(15))), watch(2, "570", Some(dec!(2)))];
        let m = monitor(&entries, source, RecordingNotifier::new().failing_for("730")).await;

        let report = completed(m.run_cycle().await);
        assert_eq!(report.alerts, 2);
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed_deliveries, 1);
    }

    #[tokio::test]
    async fn overlapping_cycle_is_skipped() {
        let source = FakePriceSource::new()
            .with(quote("730", Some(dec!(10)), None))
            .with_delay(Duration::from_millis(20));
        let m = monitor(&[watch(1, "730", Some(dec!(15)))], source, RecordingNotifier::new()).await;

        let (a, b) = tokio::join!(m.run_cycle(), m.run_cycle());
        let skipped = [&a, &b]
            .iter()
            .filter(|o| matches!(o, CycleOutcome::Skipped))
            .count();
        assert_eq!(skipped, 1);
        assert_eq!(m.notifier.sent().len(), 1);
        assert_eq!(m.pricing.cache().len(), 1);

        // The guard is released once the running cycle finishes.
        completed(m.run_cycle().await);
        assert_eq!(m.notifier.sent().len(), 2);
    }

    // ── run ────────────────────────────────────────────────────────

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let source = FakePriceSource::new().with(quote("730", Some(dec!(10)), None));
        let m = monitor_every(
            &[watch(1, "730", Some(dec!(15)))],
            source,
            RecordingNotifier::new(),
            Duration::from_millis(10),
        )
        .await;

        let stop = tokio::sync::Notify::new();
        let mut seen = 0;
        let completed_cycles = m
            .run(stop.notified(), |report| {
                assert_eq!(report.alerts, 1);
                seen += 1;
                if seen == 2 {
                    stop.notify_one();
                }
            })
            .await;

        assert_eq!(completed_cycles, 2);
        assert_eq!(m.notifier.sent().len(), 2);
    }
}
