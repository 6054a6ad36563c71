//! Binance spot REST API client.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::{Client, Response, StatusCode};
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::Sha256;
use tracing::{debug, instrument, warn};

use crate::config::ExchangeConfig;
use crate::utils::decimal::{round_down_to_decimals, round_to_decimals};

use super::error::{ExchangeError, ExchangeResult};
use super::traits::ExchangeApi;
use super::types::{
    AssetBalance, Kline, NewOrderRequest, OrderAck, SymbolPrecision, Ticker,
};

const SPOT_BASE_URL: &str = "https://api.binance.com";
const SPOT_TESTNET_URL: &str = "https://testnet.binance.vision";

/// Per-request deadline; exceeding it is a transient failure (retryable).
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Binance API client for the spot market.
pub struct BinanceClient {
    http: Client,
    api_key: String,
    secret_key: String,
    base_url: String,
    precisions: HashMap<String, SymbolPrecision>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: i64,
    msg: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountInfo {
    balances: Vec<AssetBalance>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExchangeInfo {
    symbols: Vec<ExchangeSymbol>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExchangeSymbol {
    symbol: String,
    base_asset_precision: u32,
    quote_asset_precision: u32,
}

impl BinanceClient {
    /// Create a new client from configuration.
    pub fn new(config: &ExchangeConfig) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| anyhow::anyhow!("failed to create HTTP client: {e}"))?;

        let base_url = if config.testnet {
            SPOT_TESTNET_URL.to_string()
        } else {
            SPOT_BASE_URL.to_string()
        };

        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            secret_key: config.secret_key.clone(),
            base_url,
            precisions: HashMap::new(),
        })
    }

    /// Client bound to a custom base URL (testing against a local server).
    #[cfg(test)]
    pub fn with_base_url(base_url: String) -> Self {
        Self {
            http: Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .expect("HTTP client"),
            api_key: "test-key".into(),
            secret_key: "test-secret".into(),
            base_url,
            precisions: HashMap::new(),
        }
    }

    /// Fetch exchange info and cache per-symbol precisions.
    ///
    /// Call once at startup; symbols missing from the cache fall back to
    /// `SymbolPrecision::default()`.
    pub async fn load_precisions(&mut self, symbols: &[String]) -> ExchangeResult<()> {
        let url = format!("{}/api/v3/exchangeInfo", self.base_url);
        let response = self.http.get(&url).send().await?;
        let info: ExchangeInfo = Self::decode(response).await?;

        for sym in info.symbols {
            if symbols.contains(&sym.symbol) {
                self.precisions.insert(
                    sym.symbol.clone(),
                    SymbolPrecision {
                        price_decimals: sym.quote_asset_precision.min(8),
                        quantity_decimals: sym.base_asset_precision.min(8),
                    },
                );
            }
        }

        debug!(cached = self.precisions.len(), "Symbol precisions loaded");
        Ok(())
    }

    /// Generate HMAC-SHA256 signature for authenticated requests.
    fn sign(&self, query_string: &str) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.secret_key.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(query_string.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn timestamp_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    fn signed_url(&self, path: &str, params: &[(&str, String)]) -> String {
        let mut query: String = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        if !query.is_empty() {
            query.push('&');
        }
        query.push_str(&format!("timestamp={}", Self::timestamp_ms()));

        let signature = self.sign(&query);
        format!("{}{}?{}&signature={}", self.base_url, path, query, signature)
    }

    /// Convert an HTTP response into the expected payload or a typed error.
    async fn decode<T: serde::de::DeserializeOwned>(response: Response) -> ExchangeResult<T> {
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() == 418 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(ExchangeError::RateLimited { retry_after });
        }

        let body = response.text().await?;

        if !status.is_success() {
            return match serde_json::from_str::<ApiErrorBody>(&body) {
                Ok(err) => Err(ExchangeError::from_api_code(err.code, err.msg)),
                Err(_) => Err(ExchangeError::Unexpected(format!(
                    "HTTP {status}: {body}"
                ))),
            };
        }

        serde_json::from_str(&body)
            .map_err(|e| ExchangeError::Unexpected(format!("decode failed: {e}; body: {body}")))
    }

    fn parse_kline_row(row: &serde_json::Value) -> Option<Kline> {
        let arr = row.as_array()?;
        let dec = |v: &serde_json::Value| -> Option<Decimal> { v.as_str()?.parse().ok() };
        Some(Kline {
            open_time: arr.first()?.as_i64()?,
            open: dec(arr.get(1)?)?,
            high: dec(arr.get(2)?)?,
            low: dec(arr.get(3)?)?,
            close: dec(arr.get(4)?)?,
            volume: dec(arr.get(5)?)?,
            close_time: arr.get(6)?.as_i64()?,
        })
    }

    fn precision_for(&self, symbol: &str) -> SymbolPrecision {
        self.precisions.get(symbol).copied().unwrap_or_default()
    }
}

#[async_trait]
impl ExchangeApi for BinanceClient {
    #[instrument(skip(self))]
    async fn fetch_ticker(&self, symbol: &str) -> ExchangeResult<Ticker> {
        let url = format!(
            "{}/api/v3/ticker/price?symbol={}",
            self.base_url,
            urlencoding::encode(symbol)
        );
        let response = self.http.get(&url).send().await?;
        Self::decode(response).await
    }

    #[instrument(skip(self))]
    async fn fetch_klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: u16,
    ) -> ExchangeResult<Vec<Kline>> {
        let url = format!(
            "{}/api/v3/klines?symbol={}&interval={}&limit={}",
            self.base_url,
            urlencoding::encode(symbol),
            interval,
            limit
        );
        let response = self.http.get(&url).send().await?;
        let rows: Vec<serde_json::Value> = Self::decode(response).await?;

        let klines: Vec<Kline> = rows.iter().filter_map(Self::parse_kline_row).collect();
        if klines.len() < rows.len() {
            warn!(
                symbol,
                parsed = klines.len(),
                received = rows.len(),
                "Some kline rows failed to parse"
            );
        }
        Ok(klines)
    }

    #[instrument(skip(self))]
    async fn fetch_balances(&self) -> ExchangeResult<Vec<AssetBalance>> {
        let url = self.signed_url("/api/v3/account", &[]);
        let response = self
            .http
            .get(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await?;
        let account: AccountInfo = Self::decode(response).await?;

        Ok(account
            .balances
            .into_iter()
            .filter(|b| b.total() > Decimal::ZERO)
            .collect())
    }

    #[instrument(skip(self, order), fields(symbol = %order.symbol, side = %order.side))]
    async fn create_order(&self, order: &NewOrderRequest) -> ExchangeResult<OrderAck> {
        let mut params = vec![
            ("symbol", order.symbol.clone()),
            ("side", order.side.as_str().to_string()),
            ("type", order.order_type.as_str().to_string()),
            ("quantity", order.quantity.to_string()),
            ("newClientOrderId", order.client_order_id.clone()),
        ];

        if let Some(price) = order.price {
            params.push(("price", price.to_string()));
            params.push(("timeInForce", "GTC".to_string()));
        }

        let url = self.signed_url("/api/v3/order", &params);

        debug!(client_order_id = %order.client_order_id, "Submitting order");

        let response = self
            .http
            .post(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await?;
        Self::decode(response).await
    }

    #[instrument(skip(self))]
    async fn cancel_order(&self, symbol: &str, order_id: i64) -> ExchangeResult<()> {
        let params = vec![
            ("symbol", symbol.to_string()),
            ("orderId", order_id.to_string()),
        ];
        let url = self.signed_url("/api/v3/order", &params);
        let response = self
            .http
            .delete(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await?;
        let _ack: serde_json::Value = Self::decode(response).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn cancel_open_orders(&self, symbol: &str) -> ExchangeResult<u32> {
        let params = vec![("symbol", symbol.to_string())];
        let url = self.signed_url("/api/v3/openOrders", &params);
        let response = self
            .http
            .delete(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await;

        match response {
            Ok(resp) => {
                let canceled: Vec<serde_json::Value> = Self::decode(resp).await?;
                Ok(canceled.len() as u32)
            }
            // Binance rejects the call when there is nothing to cancel
            Err(e) => {
                warn!(symbol, error = %e, "cancel_open_orders returned an error, treating as none open");
                Ok(0)
            }
        }
    }

    fn amount_to_precision(&self, symbol: &str, amount: Decimal) -> Decimal {
        round_down_to_decimals(amount, self.precision_for(symbol).quantity_decimals)
    }

    fn price_to_precision(&self, symbol: &str, price: Decimal) -> Decimal {
        round_to_decimals(price, self.precision_for(symbol).price_decimals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::types::OrderSide;
    use rust_decimal_macros::dec;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_fetch_ticker() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v3/ticker/price"))
            .and(query_param("symbol", "BNBUSDT"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "symbol": "BNBUSDT",
                "price": "600.50"
            })))
            .mount(&server)
            .await;

        let client = BinanceClient::with_base_url(server.uri());
        let ticker = client.fetch_ticker("BNBUSDT").await.unwrap();
        assert_eq!(ticker.last_price, dec!(600.50));
    }

    #[tokio::test]
    async fn test_fetch_klines_parses_rows() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v3/klines"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                [1700000000000i64, "600.0", "610.0", "595.0", "605.0", "1000.0", 1700000059999i64, "0", 0, "0", "0", "0"],
                [1700000060000i64, "605.0", "612.0", "600.0", "608.0", "900.0", 1700000119999i64, "0", 0, "0", "0", "0"]
            ])))
            .mount(&server)
            .await;

        let client = BinanceClient::with_base_url(server.uri());
        let klines = client.fetch_klines("BNBUSDT", "1h", 2).await.unwrap();
        assert_eq!(klines.len(), 2);
        assert_eq!(klines[0].close, dec!(605.0));
        assert_eq!(klines[1].high, dec!(612.0));
    }

    #[tokio::test]
    async fn test_rate_limit_maps_to_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v3/ticker/price"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "3"))
            .mount(&server)
            .await;

        let client = BinanceClient::with_base_url(server.uri());
        let err = client.fetch_ticker("BNBUSDT").await.unwrap_err();
        assert!(err.is_transient());
        assert!(matches!(
            err,
            ExchangeError::RateLimited {
                retry_after: Some(d)
            } if d == Duration::from_secs(3)
        ));
    }

    #[tokio::test]
    async fn test_api_error_body_maps_to_typed_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v3/order"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "code": -2010,
                "msg": "Account has insufficient balance for requested action."
            })))
            .mount(&server)
            .await;

        let client = BinanceClient::with_base_url(server.uri());
        let order = NewOrderRequest {
            symbol: "BNBUSDT".into(),
            side: OrderSide::Buy,
            order_type: crate::exchange::types::OrderType::Market,
            quantity: dec!(1),
            price: None,
            client_order_id: "gh-test-1".into(),
        };
        let err = client.create_order(&order).await.unwrap_err();
        assert!(matches!(err, ExchangeError::InsufficientFunds(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_precision_fallback() {
        let client = BinanceClient::with_base_url("http://localhost".into());
        // No exchange info loaded: conservative defaults apply
        assert_eq!(
            client.amount_to_precision("BNBUSDT", dec!(1.23456789)),
            dec!(1.234567)
        );
        assert_eq!(
            client.price_to_precision("BNBUSDT", dec!(600.456)),
            dec!(600.46)
        );
    }
}
