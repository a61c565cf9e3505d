use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde_json::{Value, json};

use crate::reporter;
use crate::types::PriceAlert;
use crate::{DISCORD_API_BASE, USER_AGENT};

/// Embed colour for price alerts (red).
const ALERT_COLOR: u32 = 0xff0000;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Channel-message delivery supplied by the host platform.
pub trait Notifier {
    fn notify(&self, alert: &PriceAlert) -> impl Future<Output = Result<()>> + Send;
}

/// Posts alerts to the entry's channel through the Discord REST API, mentioning
/// the watching user.
pub struct DiscordNotifier {
    client: reqwest::Client,
    token: String,
    base_url: String,
}

impl DiscordNotifier {
    pub fn new(bot_token: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build Discord HTTP client")?;
        Ok(Self {
            client,
            token: bot_token.trim().to_string(),
            base_url: DISCORD_API_BASE.to_string(),
        })
    }
}

impl Notifier for DiscordNotifier {
    async fn notify(&self, alert: &PriceAlert) -> Result<()> {
        let url = format!("{}/channels/{}/messages", self.base_url, alert.channel_id);
        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bot {}", self.token))
            .json(&alert_message(alert))
            .send()
            .await
            .with_context(|| format!("failed to reach Discord for channel {}", alert.channel_id))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            bail!("Discord rejected alert for channel {}: {status} {snippet}", alert.channel_id);
        }
        Ok(())
    }
}

/// Prints alerts as JSON lines on stdout.
pub struct StdoutNotifier;

impl Notifier for StdoutNotifier {
    async fn notify(&self, alert: &PriceAlert) -> Result<()> {
        reporter::report_alert(alert);
        Ok(())
    }
}

/// Discord message body for an alert: a user mention plus one embed.
pub fn alert_message(alert: &PriceAlert) -> Value {
    let mut fields = vec![
        json!({
            "name": "Current Best Price",
            "value": format!("{} {} ({})", alert.best_price, alert.currency, alert.price_kind.store_label()),
            "inline": true,
        }),
        json!({
            "name": "Your Target",
            "value": format!("{} {}", alert.target_price, alert.currency),
            "inline": true,
        }),
        json!({
            "name": "Steam App ID",
            "value": format!("`{}`", alert.game_id),
            "inline": true,
        }),
    ];
    if let Some(url) = &alert.url {
        fields.push(json!({
            "name": "View Deals",
            "value": format!("[gg.deals page]({url})"),
            "inline": false,
        }));
    }

    json!({
        "content": format!("<@{}>", alert.user_id),
        "allowed_mentions": { "users": [alert.user_id.to_string()] },
        "embeds": [{
            "title": "🚨 Price Alert!",
            "description": format!("**{}** has reached your target price!", alert.title),
            "color": ALERT_COLOR,
            "fields": fields,
        }],
    })
}
