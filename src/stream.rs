use anyhow::{Context, Result};
use backoff::backoff::Backoff;
use chrono::{TimeZone, Utc};
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::retry::reconnect_backoff;
use crate::types::{StreamEnvelope, Tick};

/// How a single stream session ended
enum StreamExit {
    /// Shutdown was signalled; do not reconnect
    Shutdown,
    /// Server closed the connection; reconnect
    Closed,
}

/// Spawn the tick stream task
///
/// Connects to the combined trade streams for the given symbols and fans
/// ticks into a bounded channel. The connection is re-established with
/// jittered backoff on every close or error until the shutdown signal
/// flips; the consumer side never observes reconnects, only a gap in ticks.
pub fn spawn_tick_stream(
    ws_url: String,
    symbols: Vec<String>,
    mut shutdown: watch::Receiver<bool>,
) -> mpsc::Receiver<Tick> {
    let (tx, rx) = mpsc::channel(10_000);
    let reconnect_count = Arc::new(RwLock::new(0u32));

    tokio::spawn(async move {
        let mut backoff = reconnect_backoff();

        loop {
            if *shutdown.borrow() {
                break;
            }

            match run_stream_connection(&ws_url, &symbols, &tx, &mut shutdown, &reconnect_count)
                .await
            {
                Ok(StreamExit::Shutdown) => break,
                Ok(StreamExit::Closed) => info!("Stream connection closed"),
                Err(e) => error!("Stream error: {}", e),
            }

            // A session that reached the connected state resets the policy;
            // only consecutive failed connects keep growing the delay
            let connected = *reconnect_count.read() == 0;
            if connected {
                backoff.reset();
            }
            let failures = {
                let mut count = reconnect_count.write();
                *count += 1;
                *count
            };
            if failures > 10 {
                warn!("{} consecutive reconnect attempts without a session", failures);
            }

            let delay = backoff.next_backoff().unwrap_or(Duration::from_secs(30));
            info!("Reconnecting in {:?}...", delay);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Tick stream task stopped");
    });

    rx
}

/// Run one WebSocket session until close, error or shutdown
async fn run_stream_connection(
    ws_url: &str,
    symbols: &[String],
    tx: &mpsc::Sender<Tick>,
    shutdown: &mut watch::Receiver<bool>,
    reconnect_count: &Arc<RwLock<u32>>,
) -> Result<StreamExit> {
    let streams: Vec<String> = symbols
        .iter()
        .map(|s| format!("{}@trade", s.to_lowercase()))
        .collect();
    let url = format!("{}/stream?streams={}", ws_url, streams.join("/"));

    info!("Connecting to trade streams for {} symbols", symbols.len());

    // Connect with timeout
    let connect_future = connect_async(url.as_str());
    let (ws_stream, _) = tokio::time::timeout(Duration::from_secs(10), connect_future)
        .await
        .context("Stream connection timeout")?
        .context("Failed to connect to stream")?;

    info!("Stream connected");
    *reconnect_count.write() = 0;

    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(StreamExit::Shutdown);
                }
            }
            msg = read.next() => {
                let Some(msg) = msg else {
                    return Ok(StreamExit::Closed);
                };
                match msg {
                    Ok(Message::Text(text)) => {
                        if let Some(tick) = parse_tick(&text) {
                            if tx.send(tick).await.is_err() {
                                // Consumer gone; nothing left to stream for
                                return Ok(StreamExit::Shutdown);
                            }
                        }
                    }
                    Ok(Message::Binary(data)) => {
                        if let Ok(text) = String::from_utf8(data) {
                            if let Some(tick) = parse_tick(&text) {
                                if tx.send(tick).await.is_err() {
                                    return Ok(StreamExit::Shutdown);
                                }
                            }
                        }
                    }
                    Ok(Message::Ping(data)) => {
                        let _ = write.send(Message::Pong(data)).await;
                    }
                    Ok(Message::Pong(_)) => {
                        // Connection is alive
                    }
                    Ok(Message::Close(_)) => {
                        info!("Stream closed by server");
                        return Ok(StreamExit::Closed);
                    }
                    Err(e) => {
                        return Err(e.into());
                    }
                    _ => {}
                }
            }
        }
    }
}

/// Parse a combined-stream message into a tick
///
/// Anything that is not a well-formed trade event with a positive price is
/// dropped here, so downstream windows only ever see valid prices.
fn parse_tick(text: &str) -> Option<Tick> {
    let envelope: StreamEnvelope = serde_json::from_str(text).ok()?;

    if envelope.data.event_type != "trade" {
        return None;
    }

    let price: Decimal = match envelope.data.price.parse() {
        Ok(p) => p,
        Err(_) => {
            debug!("Dropping tick with unparseable price: {}", envelope.data.price);
            return None;
        }
    };
    if price <= Decimal::ZERO {
        debug!("Dropping non-positive price tick for {}", envelope.data.symbol);
        return None;
    }

    let timestamp = Utc
        .timestamp_millis_opt(envelope.data.trade_time)
        .single()
        .unwrap_or_else(Utc::now);

    Some(Tick {
        symbol: envelope.data.symbol,
        price,
        timestamp,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_trade_tick() {
        let text = r#"{"stream":"maskbusd@trade","data":{"e":"trade","E":1690000000100,"s":"MASKBUSD","p":"2.4310","q":"12.5","T":1690000000000}}"#;

        let tick = parse_tick(text).expect("valid trade tick");
        assert_eq!(tick.symbol, "MASKBUSD");
        assert_eq!(tick.price, dec!(2.4310));
        assert_eq!(tick.timestamp.timestamp_millis(), 1690000000000);
    }

    #[test]
    fn test_parse_drops_non_trade_events() {
        let text = r#"{"stream":"maskbusd@depth","data":{"e":"depthUpdate","s":"MASKBUSD","p":"2.4","T":1690000000000}}"#;
        assert!(parse_tick(text).is_none());
    }

    #[test]
    fn test_parse_drops_invalid_prices() {
        let garbage = r#"{"stream":"x@trade","data":{"e":"trade","s":"X","p":"not-a-number","T":0}}"#;
        assert!(parse_tick(garbage).is_none());

        let zero = r#"{"stream":"x@trade","data":{"e":"trade","s":"X","p":"0","T":0}}"#;
        assert!(parse_tick(zero).is_none());
    }

    #[test]
    fn test_parse_drops_malformed_json() {
        assert!(parse_tick("not json").is_none());
        assert!(parse_tick(r#"{"stream":"x"}"#).is_none());
    }
}
