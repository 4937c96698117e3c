use anyhow::Result;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use spot_surge_bot::alerts::AlertClient;
use spot_surge_bot::config::Config;
use spot_surge_bot::detector::{AnomalyDetector, DetectorKind, DetectorParams};
use spot_surge_bot::engine::{EngineSettings, PositionEngine};
use spot_surge_bot::exchange::{BinanceGateway, ExchangeGateway};
use spot_surge_bot::retry::retry_async;
use spot_surge_bot::stream::spawn_tick_stream;

#[tokio::main]
async fn main() -> Result<()> {
    // Load config
    let config = Config::from_env()?;

    // Setup logging
    let _subscriber = FmtSubscriber::builder()
        .with_max_level(match config.log_level.as_str() {
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        })
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    let detector_name = match config.detector {
        DetectorKind::Breakout => "breakout",
        DetectorKind::GuardedBreakout => "guarded breakout",
    };

    info!("╔═══════════════════════════════════════╗");
    info!("║        Spot Surge Bot                 ║");
    info!("╠═══════════════════════════════════════╣");
    info!("║ Mode: {:31} ║", if config.dry_run { "DRY RUN (no real orders)" } else { "LIVE TRADING" });
    info!("║ Quote asset: {:24} ║", config.quote_asset);
    info!("║ Detector: {:27} ║", detector_name);
    info!("║ Window capacity: {:20} ║", config.window_capacity);
    info!("║ Exit ratio: {:25} ║", config.exit_ratio.to_string());
    info!("║ Stop ratio: {:25} ║", config.stop_ratio.map(|r| r.to_string()).unwrap_or_else(|| "none".to_string()));
    info!("╚═══════════════════════════════════════╝");

    // Initialize alert client
    let alerts = Arc::new(AlertClient::new(config.discord_webhook.clone()));
    alerts.bot_started(config.dry_run).await;

    // Initialize gateway
    let gateway = Arc::new(BinanceGateway::new(config.clone())?);

    // Resolve the watch universe: explicit list or quote-asset discovery
    let symbols = if config.symbols.is_empty() {
        info!("No SYMBOLS configured, discovering {} pairs...", config.quote_asset);
        retry_async("tradable pair discovery", 5, || {
            gateway.tradable_pairs(&config.quote_asset)
        })
        .await?
    } else {
        config.symbols.clone()
    };

    if symbols.is_empty() {
        anyhow::bail!("No symbols to watch for quote asset {}", config.quote_asset);
    }
    info!("Watching {} symbols", symbols.len());

    let detector = AnomalyDetector::new(
        config.detector,
        DetectorParams {
            breakout_ratio: config.breakout_ratio,
            guard_ratio: config.guard_ratio,
            lookback_start: config.lookback_start,
            lookback_end: config.lookback_end,
        },
    );

    let mut engine = PositionEngine::new(
        gateway.clone(),
        detector,
        EngineSettings::from_config(&config),
        alerts.clone(),
    );

    // Stream ticks; the engine is the single consumer and processes each
    // tick to completion before the next one
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut ticks = spawn_tick_stream(config.ws_url.clone(), symbols, shutdown_rx);

    loop {
        tokio::select! {
            maybe_tick = ticks.recv() => {
                match maybe_tick {
                    Some(tick) => engine.on_tick(&tick).await,
                    None => {
                        warn!("Tick channel closed");
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C received, shutting down");
                break;
            }
        }
    }

    let _ = shutdown_tx.send(true);
    info!("Bot stopped");
    Ok(())
}
