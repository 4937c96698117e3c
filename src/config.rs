use anyhow::{Context, Result};
use rust_decimal::Decimal;
use std::env;

use crate::detector::DetectorKind;

#[derive(Debug, Clone)]
pub struct Config {
    // API Credentials
    pub api_key: String,
    pub api_secret: String,

    // Trading Parameters
    pub quote_asset: String,
    pub symbols: Vec<String>,
    pub exit_ratio: Decimal,
    pub stop_ratio: Option<Decimal>,
    pub position_risk: Decimal,
    pub quote_precision: u32,

    // Detector
    pub detector: DetectorKind,
    pub window_capacity: usize,
    pub breakout_ratio: Decimal,
    pub guard_ratio: Decimal,
    pub lookback_start: usize,
    pub lookback_end: usize,

    // Mode
    pub dry_run: bool,
    pub log_level: String,

    // Alerts
    pub discord_webhook: Option<String>,

    // Endpoints
    pub rest_url: String,
    pub ws_url: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let detector = match env::var("DETECTOR")
            .unwrap_or_else(|_| "breakout".to_string())
            .to_lowercase()
            .as_str()
        {
            "breakout" => DetectorKind::Breakout,
            "guarded" => DetectorKind::GuardedBreakout,
            other => anyhow::bail!("Invalid DETECTOR: {} (expected breakout|guarded)", other),
        };

        // The two detector variants use different default comparison windows
        let default_lookback_start = match detector {
            DetectorKind::Breakout => "60",
            DetectorKind::GuardedBreakout => "420",
        };

        Ok(Config {
            // API Credentials
            api_key: env::var("EXCHANGE_API_KEY").context("EXCHANGE_API_KEY not set")?,
            api_secret: env::var("EXCHANGE_API_SECRET").context("EXCHANGE_API_SECRET not set")?,

            // Trading Parameters
            quote_asset: env::var("QUOTE_ASSET").unwrap_or_else(|_| "BUSD".to_string()),
            symbols: env::var("SYMBOLS")
                .map(|s| {
                    s.split(',')
                        .map(|p| p.trim().to_uppercase())
                        .filter(|p| !p.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            exit_ratio: env::var("EXIT_RATIO")
                .unwrap_or_else(|_| "0.01".to_string())
                .parse()
                .context("Invalid EXIT_RATIO")?,
            stop_ratio: match env::var("STOP_RATIO") {
                Ok(v) => Some(v.parse().context("Invalid STOP_RATIO")?),
                Err(_) => None,
            },
            position_risk: env::var("POSITION_RISK")
                .unwrap_or_else(|_| "1".to_string())
                .parse()
                .context("Invalid POSITION_RISK")?,
            quote_precision: env::var("QUOTE_PRECISION")
                .unwrap_or_else(|_| "6".to_string())
                .parse()
                .context("Invalid QUOTE_PRECISION")?,

            // Detector
            detector,
            window_capacity: env::var("WINDOW_CAPACITY")
                .unwrap_or_else(|_| "600".to_string())
                .parse()
                .context("Invalid WINDOW_CAPACITY")?,
            breakout_ratio: env::var("BREAKOUT_RATIO")
                .unwrap_or_else(|_| "0.1".to_string())
                .parse()
                .context("Invalid BREAKOUT_RATIO")?,
            guard_ratio: env::var("GUARD_RATIO")
                .unwrap_or_else(|_| "0.2".to_string())
                .parse()
                .context("Invalid GUARD_RATIO")?,
            lookback_start: env::var("LOOKBACK_START")
                .unwrap_or_else(|_| default_lookback_start.to_string())
                .parse()
                .context("Invalid LOOKBACK_START")?,
            lookback_end: env::var("LOOKBACK_END")
                .unwrap_or_else(|_| "540".to_string())
                .parse()
                .context("Invalid LOOKBACK_END")?,

            // Mode
            dry_run: env::var("DRY_RUN")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .unwrap_or(true),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),

            // Alerts
            discord_webhook: env::var("DISCORD_WEBHOOK").ok(),

            // Endpoints
            rest_url: env::var("EXCHANGE_REST_URL")
                .unwrap_or_else(|_| "https://api.binance.com".to_string()),
            ws_url: env::var("EXCHANGE_WS_URL")
                .unwrap_or_else(|_| "wss://stream.binance.com:9443".to_string()),
        })
    }
}
