use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::sign_query;
use crate::config::Config;
use crate::error::GatewayError;
use crate::types::{AccountInfo, ApiError, ExchangeInfo, OrderResponse, OrderResult, Side};

/// The seam between the engine and the exchange
///
/// All calls are synchronous from the engine's point of view and may fail on
/// network, auth or validation errors; the engine degrades every failure to
/// a no-op for that cycle.
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    /// Free (unlocked) balance for one asset; missing asset reports zero
    async fn free_balance(&self, asset: &str) -> Result<Decimal, GatewayError>;

    /// Market order sized by quote currency amount
    async fn market_order_by_quote(
        &self,
        symbol: &str,
        side: Side,
        quote_amount: Decimal,
    ) -> Result<OrderResult, GatewayError>;

    /// Market order sized by base asset quantity
    async fn market_order_by_qty(
        &self,
        symbol: &str,
        side: Side,
        quantity: Decimal,
    ) -> Result<OrderResult, GatewayError>;

    /// Decimal places allowed by the symbol's lot-size filter
    async fn symbol_step_size(&self, symbol: &str) -> Result<u32, GatewayError>;

    /// Symbols currently tradable against the given quote asset
    async fn tradable_pairs(&self, quote_asset: &str) -> Result<Vec<String>, GatewayError>;
}

/// Signed REST client for the spot exchange
pub struct BinanceGateway {
    client: Client,
    config: Config,
}

impl BinanceGateway {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let client = Client::builder()
            .tcp_nodelay(true)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(std::time::Duration::from_secs(90))
            .timeout(std::time::Duration::from_secs(30))
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()?;

        Ok(Self { client, config })
    }

    /// Signed GET; query gets timestamp + signature appended
    async fn signed_get(&self, path: &str, query: &str) -> Result<reqwest::Response, GatewayError> {
        let signed = sign_query(&self.config.api_secret, query)
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;
        let url = format!("{}{}?{}", self.config.rest_url, path, signed);

        let response = self
            .client
            .get(&url)
            .header("X-MBX-APIKEY", &self.config.api_key)
            .send()
            .await?;

        Ok(response)
    }

    /// Signed POST with all parameters in the query string
    async fn signed_post(&self, path: &str, query: &str) -> Result<reqwest::Response, GatewayError> {
        let signed = sign_query(&self.config.api_secret, query)
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;
        let url = format!("{}{}?{}", self.config.rest_url, path, signed);

        let response = self
            .client
            .post(&url)
            .header("X-MBX-APIKEY", &self.config.api_key)
            .send()
            .await?;

        Ok(response)
    }

    /// Submit a market order and parse the ack
    async fn place_market_order(&self, query: &str, symbol: &str) -> Result<OrderResult, GatewayError> {
        let response = self.signed_post("/api/v3/order", query).await?;
        let status = response.status();

        if !status.is_success() {
            // The exchange reports rejections as {"code": ..., "msg": ...}
            let message = match response.json::<ApiError>().await {
                Ok(err) => {
                    return Err(GatewayError::OrderRejected {
                        code: err.code,
                        message: err.msg,
                    })
                }
                Err(_) => format!("order endpoint returned HTTP {}", status),
            };
            return Err(GatewayError::InvalidResponse(message));
        }

        let ack: OrderResponse = response.json().await?;
        parse_order_ack(ack, symbol)
    }

    fn dry_run_ack(&self, symbol: &str, side: Side, amount: Decimal) -> OrderResult {
        info!(
            "[DRY RUN] market {} {} for {}",
            side.as_str(),
            symbol,
            amount
        );
        OrderResult {
            symbol: symbol.to_string(),
            order_id: 0,
            status: "FILLED".to_string(),
            executed_qty: Decimal::ZERO,
            cummulative_quote_qty: Decimal::ZERO,
        }
    }

    async fn fetch_exchange_info(&self, symbol: Option<&str>) -> Result<ExchangeInfo, GatewayError> {
        let url = match symbol {
            Some(s) => format!("{}/api/v3/exchangeInfo?symbol={}", self.config.rest_url, s),
            None => format!("{}/api/v3/exchangeInfo", self.config.rest_url),
        };

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::InvalidResponse(format!(
                "exchangeInfo returned HTTP {}",
                status
            )));
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl ExchangeGateway for BinanceGateway {
    async fn free_balance(&self, asset: &str) -> Result<Decimal, GatewayError> {
        let response = self.signed_get("/api/v3/account", "").await?;
        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::InvalidResponse(format!(
                "account endpoint returned HTTP {}",
                status
            )));
        }

        let account: AccountInfo = response.json().await?;
        for balance in &account.balances {
            if balance.asset == asset {
                let free: Decimal = balance.free.parse().map_err(|_| {
                    GatewayError::InvalidResponse(format!(
                        "unparseable balance for {}: {}",
                        asset, balance.free
                    ))
                })?;
                debug!("Free balance: {} {}", free, asset);
                return Ok(free);
            }
        }

        // Asset absent from the account snapshot
        Ok(Decimal::ZERO)
    }

    async fn market_order_by_quote(
        &self,
        symbol: &str,
        side: Side,
        quote_amount: Decimal,
    ) -> Result<OrderResult, GatewayError> {
        if self.config.dry_run {
            return Ok(self.dry_run_ack(symbol, side, quote_amount));
        }

        let query = format!(
            "symbol={}&side={}&type=MARKET&quoteOrderQty={}&newClientOrderId={}",
            symbol,
            side.as_str(),
            quote_amount.normalize(),
            Uuid::new_v4().simple()
        );

        self.place_market_order(&query, symbol).await
    }

    async fn market_order_by_qty(
        &self,
        symbol: &str,
        side: Side,
        quantity: Decimal,
    ) -> Result<OrderResult, GatewayError> {
        if self.config.dry_run {
            return Ok(self.dry_run_ack(symbol, side, quantity));
        }

        let query = format!(
            "symbol={}&side={}&type=MARKET&quantity={}&newClientOrderId={}",
            symbol,
            side.as_str(),
            quantity.normalize(),
            Uuid::new_v4().simple()
        );

        self.place_market_order(&query, symbol).await
    }

    async fn symbol_step_size(&self, symbol: &str) -> Result<u32, GatewayError> {
        let info = self.fetch_exchange_info(Some(symbol)).await?;

        let entry = info
            .symbols
            .iter()
            .find(|s| s.symbol == symbol)
            .ok_or_else(|| {
                GatewayError::InvalidResponse(format!("symbol {} missing from exchangeInfo", symbol))
            })?;

        for filter in &entry.filters {
            if filter.filter_type == "LOT_SIZE" {
                if let Some(step) = &filter.step_size {
                    return step_size_decimals(step).ok_or_else(|| {
                        GatewayError::InvalidResponse(format!(
                            "unparseable stepSize for {}: {}",
                            symbol, step
                        ))
                    });
                }
            }
        }

        Err(GatewayError::InvalidResponse(format!(
            "no LOT_SIZE filter for {}",
            symbol
        )))
    }

    async fn tradable_pairs(&self, quote_asset: &str) -> Result<Vec<String>, GatewayError> {
        let info = self.fetch_exchange_info(None).await?;

        let pairs: Vec<String> = info
            .symbols
            .into_iter()
            .filter(|s| {
                s.status == "TRADING" && s.quote_asset == quote_asset && s.is_spot_trading_allowed
            })
            .map(|s| s.symbol)
            .collect();

        if pairs.is_empty() {
            warn!("No tradable pairs found for quote asset {}", quote_asset);
        }

        Ok(pairs)
    }
}

/// Number of significant decimal places in a lot-size step, e.g.
/// "0.00100000" -> 3, "1.00000000" -> 0
pub fn step_size_decimals(step: &str) -> Option<u32> {
    let step: Decimal = step.parse().ok()?;
    if step <= Decimal::ZERO {
        return None;
    }
    Some(step.normalize().scale())
}

fn parse_order_ack(ack: OrderResponse, symbol: &str) -> Result<OrderResult, GatewayError> {
    let executed_qty: Decimal = ack.executed_qty.parse().map_err(|_| {
        GatewayError::InvalidResponse(format!("unparseable executedQty: {}", ack.executed_qty))
    })?;
    let cummulative_quote_qty: Decimal = ack.cummulative_quote_qty.parse().map_err(|_| {
        GatewayError::InvalidResponse(format!(
            "unparseable cummulativeQuoteQty: {}",
            ack.cummulative_quote_qty
        ))
    })?;

    debug!(
        "Order ack for {}: id={} status={} executed={}",
        symbol, ack.order_id, ack.status, executed_qty
    );

    Ok(OrderResult {
        symbol: ack.symbol,
        order_id: ack.order_id,
        status: ack.status,
        executed_qty,
        cummulative_quote_qty,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_size_decimals() {
        assert_eq!(step_size_decimals("0.00100000"), Some(3));
        assert_eq!(step_size_decimals("1.00000000"), Some(0));
        assert_eq!(step_size_decimals("0.1"), Some(1));
        assert_eq!(step_size_decimals("0.00000001"), Some(8));
    }

    #[test]
    fn test_step_size_rejects_garbage() {
        assert_eq!(step_size_decimals("abc"), None);
        assert_eq!(step_size_decimals("0"), None);
        assert_eq!(step_size_decimals("-0.001"), None);
    }
}
