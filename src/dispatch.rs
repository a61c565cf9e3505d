use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use crate::notifier::Notifier;
use crate::types::PriceAlert;

/// Delay between consecutive channel messages to stay clear of rate limits.
const INTER_MESSAGE_DELAY: Duration = Duration::from_millis(250);

/// Outcome of delivering one cycle's alerts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliverySummary {
    pub delivered: usize,
    pub failed: usize,
}

/// Deliver alerts one by one. A failed delivery is logged and counted; the
/// remaining alerts are still sent.
pub async fn deliver_alerts<N: Notifier>(notifier: &N, alerts: &[PriceAlert]) -> DeliverySummary {
    let mut summary = DeliverySummary::default();

    for (idx, alert) in alerts.iter().enumerate() {
        match notifier.notify(alert).await {
            Ok(()) => {
                info!(
                    "Sent price alert for \"{}\" ({}) to user {}: {} {} <= target {}",
                    alert.title,
                    alert.game_id,
                    alert.user_id,
                    alert.best_price,
                    alert.currency,
                    alert.target_price,
                );
                summary.delivered += 1;
            }
            Err(e) => {
                warn!(
                    "Failed to send alert for \"{}\" ({}) to channel {}: {e:#}",
                    alert.title, alert.game_id, alert.channel_id
                );
                summary.failed += 1;
            }
        }

        if idx + 1 < alerts.len() {
            tokio::time::sleep(INTER_MESSAGE_DELAY).await;
        }
    }

    summary
}
