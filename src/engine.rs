use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::alerts::AlertClient;
use crate::detector::AnomalyDetector;
use crate::error::GatewayError;
use crate::exchange::ExchangeGateway;
use crate::quantize::{truncate_ceil, truncate_floor};
use crate::types::{Side, Tick};
use crate::window::PriceWindow;

/// An open long position
#[derive(Debug, Clone)]
pub struct Position {
    pub symbol: String,
    pub base_asset: String,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub stop_price: Option<Decimal>,
    /// Decimal places the lot-size filter allows for sell quantities
    pub step_size: u32,
    pub opened_at: DateTime<Utc>,
}

/// Position lifecycle state
///
/// Entering/Exiting mark an order in flight and block re-entrant triggers.
/// Invariant: at most one open position system-wide.
#[derive(Debug, Clone)]
pub enum EngineState {
    Flat,
    Entering,
    Open(Position),
    Exiting(Position),
}

impl EngineState {
    pub fn is_flat(&self) -> bool {
        matches!(self, EngineState::Flat)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExitReason {
    Target,
    Stop,
}

impl ExitReason {
    fn as_str(&self) -> &'static str {
        match self {
            ExitReason::Target => "take-profit",
            ExitReason::Stop => "stop-loss",
        }
    }
}

/// Trading parameters the engine needs (credentials stay in Config)
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub quote_asset: String,
    pub window_capacity: usize,
    pub exit_ratio: Decimal,
    pub stop_ratio: Option<Decimal>,
    pub position_risk: Decimal,
    pub quote_precision: u32,
}

impl EngineSettings {
    pub fn from_config(config: &crate::config::Config) -> Self {
        Self {
            quote_asset: config.quote_asset.clone(),
            window_capacity: config.window_capacity,
            exit_ratio: config.exit_ratio,
            stop_ratio: config.stop_ratio,
            position_risk: config.position_risk,
            quote_precision: config.quote_precision,
        }
    }
}

/// Streaming position engine
///
/// Owns all mutable trading state: per-symbol price windows, the watchlist
/// of flagged symbols, cached lot sizes and the position state machine.
/// Ticks are processed one at a time to completion; exchange calls are
/// awaited inline so no two orders are ever in flight together.
pub struct PositionEngine {
    gateway: Arc<dyn ExchangeGateway>,
    detector: AnomalyDetector,
    settings: EngineSettings,
    alerts: Arc<AlertClient>,
    windows: HashMap<String, PriceWindow>,
    watchlist: HashSet<String>,
    step_sizes: HashMap<String, u32>,
    state: EngineState,
}

impl PositionEngine {
    pub fn new(
        gateway: Arc<dyn ExchangeGateway>,
        detector: AnomalyDetector,
        settings: EngineSettings,
        alerts: Arc<AlertClient>,
    ) -> Self {
        Self {
            gateway,
            detector,
            settings,
            alerts,
            windows: HashMap::new(),
            watchlist: HashSet::new(),
            step_sizes: HashMap::new(),
            state: EngineState::Flat,
        }
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    pub fn watchlist(&self) -> &HashSet<String> {
        &self.watchlist
    }

    pub fn window(&self, symbol: &str) -> Option<&PriceWindow> {
        self.windows.get(symbol)
    }

    /// Process one tick to completion
    pub async fn on_tick(&mut self, tick: &Tick) {
        let window = self
            .windows
            .entry(tick.symbol.clone())
            .or_insert_with(|| PriceWindow::new(self.settings.window_capacity));
        window.push(tick.price);

        // A symbol with an open position belongs to the exit path only
        let exit_reason = match &self.state {
            EngineState::Open(position) if position.symbol == tick.symbol => {
                Some(exit_trigger(position, tick.price))
            }
            _ => None,
        };
        if let Some(maybe_reason) = exit_reason {
            if let Some(reason) = maybe_reason {
                self.try_exit(tick, reason).await;
            }
            return;
        }

        // Anomaly stage: flagged symbols are not re-evaluated
        if !self.watchlist.contains(&tick.symbol) {
            if self.detector.evaluate(&self.windows[&tick.symbol]) {
                info!("Anomaly flagged: {} at {}", tick.symbol, tick.price);
                self.watchlist.insert(tick.symbol.clone());
                self.alerts.anomaly_flagged(&tick.symbol, tick.price).await;
            }
        }

        // Entry stage: one position system-wide
        if self.state.is_flat() && self.watchlist.contains(&tick.symbol) {
            self.try_enter(tick).await;
        }
    }

    /// Attempt the Flat -> Open transition; any failure reverts to Flat
    async fn try_enter(&mut self, tick: &Tick) {
        let symbol = tick.symbol.clone();

        let Some(base_asset) = symbol
            .strip_suffix(&self.settings.quote_asset)
            .map(str::to_string)
        else {
            warn!(
                "Cannot derive base asset for {} (quote {}); unflagging",
                symbol, self.settings.quote_asset
            );
            self.watchlist.remove(&symbol);
            return;
        };

        self.state = EngineState::Entering;

        // Always a fresh balance; fills since the last query would make a
        // cached value wrong
        let balance = match self.gateway.free_balance(&self.settings.quote_asset).await {
            Ok(b) => b,
            Err(e) => {
                warn!("Entry aborted for {}: balance query failed: {}", symbol, e);
                self.state = EngineState::Flat;
                return;
            }
        };

        if balance <= Decimal::ZERO {
            let err = GatewayError::InsufficientBalance(self.settings.quote_asset.clone());
            warn!("Entry aborted for {}: {}", symbol, err);
            self.state = EngineState::Flat;
            return;
        }

        let mut order_amount = balance * self.settings.position_risk;
        if order_amount > balance {
            order_amount = balance;
        }
        let quote_qty = truncate_ceil(order_amount, self.settings.quote_precision);

        // The exit path cannot size a sell without the lot size, so resolve
        // it before committing any funds
        let step_size = match self.step_size_for(&symbol).await {
            Ok(s) => s,
            Err(e) => {
                warn!("Entry aborted for {}: step size lookup failed: {}", symbol, e);
                self.state = EngineState::Flat;
                return;
            }
        };

        match self
            .gateway
            .market_order_by_quote(&symbol, Side::Buy, quote_qty)
            .await
        {
            Ok(ack) => {
                let entry_price = tick.price;
                let exit_price = entry_price * (Decimal::ONE + self.settings.exit_ratio);
                let stop_price = self
                    .settings
                    .stop_ratio
                    .map(|r| entry_price * (Decimal::ONE - r));

                info!(
                    "Opened long {}: entry {} exit {} stop {} ({} {} spent, order {})",
                    symbol,
                    entry_price,
                    exit_price,
                    stop_price
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| "none".to_string()),
                    quote_qty,
                    self.settings.quote_asset,
                    ack.order_id
                );
                self.alerts
                    .position_opened(&symbol, entry_price, exit_price, stop_price)
                    .await;

                self.watchlist.remove(&symbol);
                self.state = EngineState::Open(Position {
                    symbol,
                    base_asset,
                    entry_price,
                    exit_price,
                    stop_price,
                    step_size,
                    opened_at: tick.timestamp,
                });
            }
            Err(e) => {
                warn!("Entry order failed for {}: {}", symbol, e);
                self.state = EngineState::Flat;
            }
        }
    }

    /// Attempt the Open -> Flat transition; any failure keeps the position
    /// open so the next qualifying tick retries the exit
    async fn try_exit(&mut self, tick: &Tick, reason: ExitReason) {
        let position = match std::mem::replace(&mut self.state, EngineState::Flat) {
            EngineState::Open(p) => p,
            other => {
                self.state = other;
                return;
            }
        };
        self.state = EngineState::Exiting(position.clone());

        debug!(
            "{} crossed for {} at {} (entry {})",
            reason.as_str(),
            position.symbol,
            tick.price,
            position.entry_price
        );

        let balance = match self.gateway.free_balance(&position.base_asset).await {
            Ok(b) => b,
            Err(e) => {
                warn!(
                    "Exit aborted for {}: balance query failed: {}",
                    position.symbol, e
                );
                self.state = EngineState::Open(position);
                return;
            }
        };

        // Floor so the sell can never exceed what we hold
        let quantity = truncate_floor(balance, position.step_size);
        if quantity <= Decimal::ZERO {
            let err = GatewayError::InsufficientBalance(position.base_asset.clone());
            warn!("Exit aborted for {}: {}", position.symbol, err);
            self.state = EngineState::Open(position);
            return;
        }

        match self
            .gateway
            .market_order_by_qty(&position.symbol, Side::Sell, quantity)
            .await
        {
            Ok(ack) => {
                let pnl_pct =
                    (tick.price - position.entry_price) / position.entry_price * dec!(100);
                info!(
                    "Closed {} via {}: entry {} exit {} pnl {}% (order {})",
                    position.symbol,
                    reason.as_str(),
                    position.entry_price,
                    tick.price,
                    pnl_pct.round_dp(4),
                    ack.order_id
                );
                self.alerts
                    .position_closed(
                        &position.symbol,
                        position.entry_price,
                        tick.price,
                        pnl_pct,
                        reason.as_str(),
                    )
                    .await;

                self.state = EngineState::Flat;
            }
            Err(e) => {
                warn!(
                    "Exit order failed for {}: {} (position stays open)",
                    position.symbol, e
                );
                self.state = EngineState::Open(position);
            }
        }
    }

    /// Lot size, fetched once per symbol
    async fn step_size_for(&mut self, symbol: &str) -> Result<u32, GatewayError> {
        if let Some(&cached) = self.step_sizes.get(symbol) {
            return Ok(cached);
        }
        let step = self.gateway.symbol_step_size(symbol).await?;
        self.step_sizes.insert(symbol.to_string(), step);
        Ok(step)
    }
}

/// Inclusive exit/stop check; the first threshold the price crosses wins
fn exit_trigger(position: &Position, price: Decimal) -> Option<ExitReason> {
    if price >= position.exit_price {
        return Some(ExitReason::Target);
    }
    if let Some(stop) = position.stop_price {
        if price <= stop {
            return Some(ExitReason::Stop);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::{DetectorKind, DetectorParams};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    struct MockState {
        quote_balance: Decimal,
        base_balance: Decimal,
        fail_balance: bool,
        fail_buy: bool,
        fail_sell: bool,
        step_size: u32,
        buys: Vec<(String, Decimal)>,
        sells: Vec<(String, Decimal)>,
    }

    struct MockGateway {
        state: Mutex<MockState>,
    }

    impl MockGateway {
        fn new(quote_balance: Decimal, base_balance: Decimal) -> Arc<Self> {
            Arc::new(Self {
                state: Mutex::new(MockState {
                    quote_balance,
                    base_balance,
                    fail_balance: false,
                    fail_buy: false,
                    fail_sell: false,
                    step_size: 2,
                    buys: Vec::new(),
                    sells: Vec::new(),
                }),
            })
        }

        fn network_err() -> GatewayError {
            GatewayError::InvalidResponse("simulated failure".to_string())
        }
    }

    #[async_trait]
    impl ExchangeGateway for MockGateway {
        async fn free_balance(&self, asset: &str) -> Result<Decimal, GatewayError> {
            let state = self.state.lock();
            if state.fail_balance {
                return Err(Self::network_err());
            }
            if asset == "BUSD" {
                Ok(state.quote_balance)
            } else {
                Ok(state.base_balance)
            }
        }

        async fn market_order_by_quote(
            &self,
            symbol: &str,
            _side: Side,
            quote_amount: Decimal,
        ) -> Result<crate::types::OrderResult, GatewayError> {
            let mut state = self.state.lock();
            if state.fail_buy {
                return Err(GatewayError::OrderRejected {
                    code: -2010,
                    message: "rejected".to_string(),
                });
            }
            state.buys.push((symbol.to_string(), quote_amount));
            Ok(crate::types::OrderResult {
                symbol: symbol.to_string(),
                order_id: 1,
                status: "FILLED".to_string(),
                executed_qty: Decimal::ZERO,
                cummulative_quote_qty: quote_amount,
            })
        }

        async fn market_order_by_qty(
            &self,
            symbol: &str,
            _side: Side,
            quantity: Decimal,
        ) -> Result<crate::types::OrderResult, GatewayError> {
            let mut state = self.state.lock();
            if state.fail_sell {
                return Err(GatewayError::OrderRejected {
                    code: -2010,
                    message: "rejected".to_string(),
                });
            }
            state.sells.push((symbol.to_string(), quantity));
            Ok(crate::types::OrderResult {
                symbol: symbol.to_string(),
                order_id: 2,
                status: "FILLED".to_string(),
                executed_qty: quantity,
                cummulative_quote_qty: Decimal::ZERO,
            })
        }

        async fn symbol_step_size(&self, _symbol: &str) -> Result<u32, GatewayError> {
            Ok(self.state.lock().step_size)
        }

        async fn tradable_pairs(&self, _quote_asset: &str) -> Result<Vec<String>, GatewayError> {
            Ok(vec!["MASKBUSD".to_string()])
        }
    }

    fn test_engine(gateway: Arc<MockGateway>) -> PositionEngine {
        let detector = AnomalyDetector::new(
            DetectorKind::Breakout,
            DetectorParams {
                breakout_ratio: dec!(0.1),
                guard_ratio: dec!(0.2),
                lookback_start: 0,
                lookback_end: 540,
            },
        );
        let settings = EngineSettings {
            quote_asset: "BUSD".to_string(),
            window_capacity: 10,
            exit_ratio: dec!(0.01),
            stop_ratio: Some(dec!(0.02)),
            position_risk: dec!(1),
            quote_precision: 6,
        };
        PositionEngine::new(gateway, detector, settings, Arc::new(AlertClient::new(None)))
    }

    fn tick(symbol: &str, price: Decimal) -> Tick {
        Tick {
            symbol: symbol.to_string(),
            price,
            timestamp: Utc::now(),
        }
    }

    fn test_position(entry: Decimal) -> Position {
        Position {
            symbol: "MASKBUSD".to_string(),
            base_asset: "MASK".to_string(),
            entry_price: entry,
            exit_price: entry * dec!(1.01),
            stop_price: Some(entry * dec!(0.98)),
            step_size: 2,
            opened_at: Utc::now(),
        }
    }

    #[test]
    fn test_exit_trigger_thresholds() {
        // entry 100, exit 101, stop 98
        let position = test_position(dec!(100));

        assert_eq!(exit_trigger(&position, dec!(101)), Some(ExitReason::Target));
        assert_eq!(exit_trigger(&position, dec!(97.9)), Some(ExitReason::Stop));
        assert_eq!(exit_trigger(&position, dec!(100.5)), None);

        // Inclusive comparisons on both thresholds
        assert_eq!(exit_trigger(&position, dec!(98)), Some(ExitReason::Stop));
        assert_eq!(exit_trigger(&position, dec!(101.5)), Some(ExitReason::Target));
    }

    #[test]
    fn test_exit_trigger_without_stop() {
        let mut position = test_position(dec!(100));
        position.stop_price = None;

        assert_eq!(exit_trigger(&position, dec!(1)), None);
        assert_eq!(exit_trigger(&position, dec!(101)), Some(ExitReason::Target));
    }

    #[tokio::test]
    async fn test_anomaly_opens_position() {
        let gateway = MockGateway::new(dec!(500), dec!(0));
        let mut engine = test_engine(gateway.clone());

        engine.on_tick(&tick("MASKBUSD", dec!(100))).await;
        assert!(engine.state().is_flat());
        assert!(engine.watchlist().is_empty());

        // 111 > 100 * 1.1 flags the symbol and enters on the same tick
        engine.on_tick(&tick("MASKBUSD", dec!(111))).await;

        let EngineState::Open(position) = engine.state() else {
            panic!("expected open position, got {:?}", engine.state());
        };
        assert_eq!(position.symbol, "MASKBUSD");
        assert_eq!(position.base_asset, "MASK");
        assert_eq!(position.entry_price, dec!(111));
        assert_eq!(position.exit_price, dec!(111) * dec!(1.01));
        assert_eq!(position.stop_price, Some(dec!(111) * dec!(0.98)));
        assert_eq!(position.step_size, 2);

        // Watchlist entry consumed by the fill
        assert!(engine.watchlist().is_empty());

        let buys = gateway.state.lock().buys.clone();
        assert_eq!(buys, vec![("MASKBUSD".to_string(), dec!(500))]);
    }

    #[tokio::test]
    async fn test_take_profit_closes_position() {
        let gateway = MockGateway::new(dec!(500), dec!(4.449));
        let mut engine = test_engine(gateway.clone());

        engine.on_tick(&tick("MASKBUSD", dec!(100))).await;
        engine.on_tick(&tick("MASKBUSD", dec!(111))).await;
        assert!(matches!(engine.state(), EngineState::Open(_)));

        // Below both thresholds: nothing happens
        engine.on_tick(&tick("MASKBUSD", dec!(111.5))).await;
        assert!(matches!(engine.state(), EngineState::Open(_)));

        // 112.11 = 111 * 1.01 crosses the target (inclusive)
        engine.on_tick(&tick("MASKBUSD", dec!(112.11))).await;
        assert!(engine.state().is_flat());

        // Sell quantity floored at step_size=2 from the held 4.449
        let sells = gateway.state.lock().sells.clone();
        assert_eq!(sells, vec![("MASKBUSD".to_string(), dec!(4.44))]);
    }

    #[tokio::test]
    async fn test_stop_loss_closes_position() {
        let gateway = MockGateway::new(dec!(500), dec!(4));
        let mut engine = test_engine(gateway.clone());

        engine.on_tick(&tick("MASKBUSD", dec!(100))).await;
        engine.on_tick(&tick("MASKBUSD", dec!(111))).await;

        // 111 * 0.98 = 108.78; a tick below it stops out
        engine.on_tick(&tick("MASKBUSD", dec!(108))).await;
        assert!(engine.state().is_flat());
        assert_eq!(gateway.state.lock().sells.len(), 1);
    }

    #[tokio::test]
    async fn test_entry_is_noop_while_open() {
        let gateway = MockGateway::new(dec!(500), dec!(4));
        let mut engine = test_engine(gateway.clone());

        engine.on_tick(&tick("MASKBUSD", dec!(100))).await;
        engine.on_tick(&tick("MASKBUSD", dec!(111))).await;
        let entry_before = match engine.state() {
            EngineState::Open(p) => p.entry_price,
            other => panic!("expected open, got {:?}", other),
        };

        // A second symbol spikes while the position is open: it is flagged
        // but no order is placed
        engine.on_tick(&tick("LITBUSD", dec!(10))).await;
        engine.on_tick(&tick("LITBUSD", dec!(20))).await;

        assert!(engine.watchlist().contains("LITBUSD"));
        assert_eq!(gateway.state.lock().buys.len(), 1);

        match engine.state() {
            EngineState::Open(p) => assert_eq!(p.entry_price, entry_before),
            other => panic!("expected open, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_watchlisted_symbol_enters_once_flat() {
        let gateway = MockGateway::new(dec!(500), dec!(4));
        let mut engine = test_engine(gateway.clone());

        engine.on_tick(&tick("MASKBUSD", dec!(100))).await;
        engine.on_tick(&tick("MASKBUSD", dec!(111))).await;

        // Flagged while busy
        engine.on_tick(&tick("LITBUSD", dec!(10))).await;
        engine.on_tick(&tick("LITBUSD", dec!(20))).await;

        // Close the open position
        engine.on_tick(&tick("MASKBUSD", dec!(113))).await;
        assert!(engine.state().is_flat());

        // The next LITBUSD tick enters off the watchlist without needing a
        // fresh anomaly
        engine.on_tick(&tick("LITBUSD", dec!(15))).await;
        match engine.state() {
            EngineState::Open(p) => {
                assert_eq!(p.symbol, "LITBUSD");
                assert_eq!(p.entry_price, dec!(15));
            }
            other => panic!("expected open, got {:?}", other),
        }
        assert!(!engine.watchlist().contains("LITBUSD"));
    }

    #[tokio::test]
    async fn test_balance_failure_aborts_entry() {
        let gateway = MockGateway::new(dec!(500), dec!(0));
        gateway.state.lock().fail_balance = true;
        let mut engine = test_engine(gateway.clone());

        engine.on_tick(&tick("MASKBUSD", dec!(100))).await;
        engine.on_tick(&tick("MASKBUSD", dec!(111))).await;

        assert!(engine.state().is_flat());
        assert!(gateway.state.lock().buys.is_empty());
        // Still flagged, so a later tick retries the entry
        assert!(engine.watchlist().contains("MASKBUSD"));
    }

    #[tokio::test]
    async fn test_zero_balance_aborts_entry() {
        let gateway = MockGateway::new(dec!(0), dec!(0));
        let mut engine = test_engine(gateway.clone());

        engine.on_tick(&tick("MASKBUSD", dec!(100))).await;
        engine.on_tick(&tick("MASKBUSD", dec!(111))).await;

        assert!(engine.state().is_flat());
        assert!(gateway.state.lock().buys.is_empty());
    }

    #[tokio::test]
    async fn test_buy_failure_reverts_to_flat() {
        let gateway = MockGateway::new(dec!(500), dec!(0));
        gateway.state.lock().fail_buy = true;
        let mut engine = test_engine(gateway.clone());

        engine.on_tick(&tick("MASKBUSD", dec!(100))).await;
        engine.on_tick(&tick("MASKBUSD", dec!(111))).await;

        assert!(engine.state().is_flat());
        assert!(gateway.state.lock().buys.is_empty());
    }

    #[tokio::test]
    async fn test_sell_failure_keeps_position_open_and_retries() {
        let gateway = MockGateway::new(dec!(500), dec!(4));
        let mut engine = test_engine(gateway.clone());

        engine.on_tick(&tick("MASKBUSD", dec!(100))).await;
        engine.on_tick(&tick("MASKBUSD", dec!(111))).await;
        let entry_before = match engine.state() {
            EngineState::Open(p) => p.clone(),
            other => panic!("expected open, got {:?}", other),
        };

        gateway.state.lock().fail_sell = true;
        engine.on_tick(&tick("MASKBUSD", dec!(113))).await;

        // Position untouched by the failed sell
        match engine.state() {
            EngineState::Open(p) => {
                assert_eq!(p.entry_price, entry_before.entry_price);
                assert_eq!(p.exit_price, entry_before.exit_price);
                assert_eq!(p.stop_price, entry_before.stop_price);
            }
            other => panic!("expected open, got {:?}", other),
        }

        // Next qualifying tick retries and succeeds
        gateway.state.lock().fail_sell = false;
        engine.on_tick(&tick("MASKBUSD", dec!(113))).await;
        assert!(engine.state().is_flat());
        assert_eq!(gateway.state.lock().sells.len(), 1);
    }

    #[tokio::test]
    async fn test_exit_balance_failure_keeps_position_open() {
        let gateway = MockGateway::new(dec!(500), dec!(4));
        let mut engine = test_engine(gateway.clone());

        engine.on_tick(&tick("MASKBUSD", dec!(100))).await;
        engine.on_tick(&tick("MASKBUSD", dec!(111))).await;

        gateway.state.lock().fail_balance = true;
        engine.on_tick(&tick("MASKBUSD", dec!(113))).await;

        assert!(matches!(engine.state(), EngineState::Open(_)));
        assert!(gateway.state.lock().sells.is_empty());
    }

    #[tokio::test]
    async fn test_state_survives_stream_gap() {
        // A disconnect/reconnect is invisible to the engine: windows and
        // the open position carry over untouched
        let gateway = MockGateway::new(dec!(500), dec!(4));
        let mut engine = test_engine(gateway.clone());

        engine.on_tick(&tick("MASKBUSD", dec!(100))).await;
        engine.on_tick(&tick("MASKBUSD", dec!(111))).await;
        let window_before: Vec<Decimal> = engine.window("MASKBUSD").unwrap().snapshot().to_vec();
        assert!(matches!(engine.state(), EngineState::Open(_)));

        // ...transport reconnects here; no ticks flow for a while...

        assert_eq!(engine.window("MASKBUSD").unwrap().snapshot(), &window_before[..]);
        engine.on_tick(&tick("MASKBUSD", dec!(112.11))).await;
        assert!(engine.state().is_flat());
        assert_eq!(engine.window("MASKBUSD").unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_watchlist_dedup() {
        let gateway = MockGateway::new(dec!(500), dec!(4));
        gateway.state.lock().fail_buy = true;
        let mut engine = test_engine(gateway.clone());

        // Every failed entry leaves the flag in place; repeated anomalies
        // do not duplicate it
        engine.on_tick(&tick("MASKBUSD", dec!(100))).await;
        engine.on_tick(&tick("MASKBUSD", dec!(111))).await;
        engine.on_tick(&tick("MASKBUSD", dec!(112))).await;
        engine.on_tick(&tick("MASKBUSD", dec!(113))).await;

        assert_eq!(engine.watchlist().len(), 1);
    }

    #[tokio::test]
    async fn test_unmatched_quote_suffix_is_unflagged() {
        let gateway = MockGateway::new(dec!(500), dec!(4));
        let mut engine = test_engine(gateway.clone());

        engine.on_tick(&tick("MASKUSDT", dec!(100))).await;
        engine.on_tick(&tick("MASKUSDT", dec!(111))).await;

        // Flagged, then dropped on entry because the base asset cannot be
        // derived against the configured quote
        assert!(engine.state().is_flat());
        assert!(!engine.watchlist().contains("MASKUSDT"));
        assert!(gateway.state.lock().buys.is_empty());
    }
}
