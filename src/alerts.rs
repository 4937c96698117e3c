use anyhow::Result;
use reqwest::Client;
use rust_decimal::Decimal;
use serde_json::json;
use tracing::error;

/// Discord webhook client for operational alerts
///
/// Alerts are best-effort: a failed send is logged and swallowed so the
/// trading loop never stalls on a webhook.
pub struct AlertClient {
    client: Client,
    webhook_url: Option<String>,
    enabled: bool,
}

impl AlertClient {
    pub fn new(webhook_url: Option<String>) -> Self {
        let enabled = webhook_url.is_some();
        Self {
            client: Client::new(),
            webhook_url,
            enabled,
        }
    }

    async fn send(&self, content: &str, color: u32) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        let url = match &self.webhook_url {
            Some(u) => u,
            None => return Ok(()),
        };

        let payload = json!({
            "embeds": [{
                "description": content,
                "color": color
            }]
        });

        match self.client.post(url).json(&payload).send().await {
            Ok(_) => Ok(()),
            Err(e) => {
                error!("Failed to send Discord alert: {}", e);
                Ok(())
            }
        }
    }

    /// Alert: Bot started
    pub async fn bot_started(&self, dry_run: bool) {
        let mode = if dry_run { "DRY RUN" } else { "LIVE" };
        let msg = format!("🤖 **Spot Surge Bot Started**\nMode: {}", mode);
        let _ = self.send(&msg, 0x00FF00).await; // Green
    }

    /// Alert: Detector flagged a symbol
    pub async fn anomaly_flagged(&self, symbol: &str, price: Decimal) {
        let msg = format!("📈 **Anomaly Flagged**\n{} @ {}", symbol, price);
        let _ = self.send(&msg, 0x0099FF).await; // Blue
    }

    /// Alert: Position opened
    pub async fn position_opened(
        &self,
        symbol: &str,
        entry: Decimal,
        exit: Decimal,
        stop: Option<Decimal>,
    ) {
        let stop = stop
            .map(|s| s.to_string())
            .unwrap_or_else(|| "none".to_string());
        let msg = format!(
            "🟢 **Position Opened**\n{}\nEntry: {}\nTarget: {}\nStop: {}",
            symbol, entry, exit, stop
        );
        let _ = self.send(&msg, 0x00FF00).await; // Green
    }

    /// Alert: Position closed
    pub async fn position_closed(
        &self,
        symbol: &str,
        entry: Decimal,
        exit: Decimal,
        pnl_pct: Decimal,
        reason: &str,
    ) {
        let color = if pnl_pct >= Decimal::ZERO { 0x00FF00 } else { 0xFF0000 };
        let msg = format!(
            "🔴 **Position Closed** ({})\n{}\nEntry: {} → Exit: {}\nP&L: {}%",
            reason,
            symbol,
            entry,
            exit,
            pnl_pct.round_dp(4)
        );
        let _ = self.send(&msg, color).await;
    }

    /// Alert: Error occurred
    pub async fn error(&self, context: &str, error: &str) {
        let msg = format!("❌ **Error**\n{}\n```{}```", context, error);
        let _ = self.send(&msg, 0xFF0000).await; // Red
    }
}
