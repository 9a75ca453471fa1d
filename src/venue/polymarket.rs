use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::domain::{Market, OrderBook, OrderBookEntry, Side};

use super::{OpenOrder, OrderSide, VenueClient, VenueError};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_ATTEMPTS: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 100;

/// HTTP client for the Polymarket CLOB REST API. Order construction and
/// cryptographic signing are out of scope for this engine — the same
/// boundary the domain model and risk engine draw — so
/// `place_limit_order` posts an order payload without an EIP-712
/// signature; a production deployment wires a signer in front of this
/// client.
pub struct PolymarketVenueClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl PolymarketVenueClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent("gabagool-accumulator/0.1")
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            api_key,
        })
    }

    async fn get_with_retry<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, VenueError> {
        let url = format!("{}{}", self.base_url, path);
        let mut backoff = INITIAL_BACKOFF_MS;

        for attempt in 1..=MAX_ATTEMPTS {
            let mut req = self.http.get(&url).query(query);
            if let Some(key) = &self.api_key {
                req = req.header("POLY-API-KEY", key);
            }

            match req.send().await {
                Ok(resp) if resp.status().is_success() => {
                    return resp
                        .json::<T>()
                        .await
                        .map_err(|e| VenueError::Transport(e.into()));
                }
                Ok(resp) if resp.status().as_u16() == 429 && attempt < MAX_ATTEMPTS => {
                    warn!(attempt, "venue rate limited, backing off");
                }
                Ok(resp) => {
                    return Err(VenueError::Rejected(format!(
                        "venue returned status {}",
                        resp.status()
                    )))
                }
                Err(e) if e.is_timeout() => return Err(VenueError::Timeout),
                Err(e) if attempt < MAX_ATTEMPTS => {
                    debug!(attempt, error = %e, "transient venue error, retrying");
                }
                Err(e) => return Err(VenueError::Transport(e.into())),
            }

            tokio::time::sleep(Duration::from_millis(backoff)).await;
            backoff = (backoff * 2).min(5_000);
        }

        Err(VenueError::Timeout)
    }

    fn parse_side(entries: Vec<RawBookEntry>) -> Vec<OrderBookEntry> {
        entries
            .into_iter()
            .filter_map(|e| {
                Some(OrderBookEntry {
                    price: e.price.parse().ok()?,
                    size: e.size.parse().ok()?,
                })
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct RawBookSide {
    #[serde(default)]
    bids: Vec<RawBookEntry>,
    #[serde(default)]
    asks: Vec<RawBookEntry>,
}

#[derive(Debug, Deserialize)]
struct RawBookEntry {
    price: String,
    size: String,
}

#[async_trait]
impl VenueClient for PolymarketVenueClient {
    async fn list_15min_markets(&self, asset: &str) -> Result<Vec<Market>, VenueError> {
        #[derive(Deserialize)]
        struct RawMarket {
            market_id: String,
            condition_id: String,
            token_id_yes: String,
            token_id_no: String,
            question: String,
            #[serde(default)]
            description: String,
            expiration: chrono::DateTime<chrono::Utc>,
            #[serde(default)]
            active: bool,
            #[serde(default)]
            closed: bool,
        }

        let markets: Vec<RawMarket> = self
            .get_with_retry("/markets", &[("asset", asset.to_string()), ("duration", "15m".to_string())])
            .await?;

        Ok(markets
            .into_iter()
            .filter(|m| !m.closed && m.question.contains("15"))
            .map(|m| Market {
                market_id: m.market_id,
                condition_id: m.condition_id,
                token_id_yes: m.token_id_yes,
                token_id_no: m.token_id_no,
                question: m.question,
                description: m.description,
                expiration: m.expiration,
                active: m.active,
                closed: m.closed,
                ..Market::default()
            })
            .collect())
    }

    async fn get_market_order_book(&self, market: &Market) -> Result<OrderBook, VenueError> {
        let yes: RawBookSide = self
            .get_with_retry("/book", &[("token_id", market.token_id_yes.clone())])
            .await?;
        let no: RawBookSide = self
            .get_with_retry("/book", &[("token_id", market.token_id_no.clone())])
            .await?;

        let mut yes_bids = Self::parse_side(yes.bids);
        let mut yes_asks = Self::parse_side(yes.asks);
        let mut no_bids = Self::parse_side(no.bids);
        let mut no_asks = Self::parse_side(no.asks);

        yes_bids.sort_by(|a, b| b.price.cmp(&a.price));
        no_bids.sort_by(|a, b| b.price.cmp(&a.price));
        yes_asks.sort_by(|a, b| a.price.cmp(&b.price));
        no_asks.sort_by(|a, b| a.price.cmp(&b.price));

        Ok(OrderBook {
            yes_bids,
            yes_asks,
            no_bids,
            no_asks,
            timestamp: chrono::Utc::now(),
        })
    }

    async fn get_order_book(&self, token_id: &str) -> Result<Vec<OrderBookEntry>, VenueError> {
        let side: RawBookSide = self
            .get_with_retry("/book", &[("token_id", token_id.to_string())])
            .await?;
        let mut bids = Self::parse_side(side.bids);
        bids.sort_by(|a, b| b.price.cmp(&a.price));
        Ok(bids)
    }

    async fn place_limit_order(
        &self,
        token_id: &str,
        _side: Side,
        order_side: OrderSide,
        price: Decimal,
        size: Decimal,
        post_only: bool,
    ) -> Result<Option<String>, VenueError> {
        #[derive(serde::Serialize)]
        struct OrderRequest<'a> {
            token_id: &'a str,
            side: &'a str,
            price: String,
            size: String,
            post_only: bool,
        }

        #[derive(Deserialize)]
        struct OrderResponse {
            #[serde(rename = "orderID")]
            order_id: Option<String>,
        }

        let body = OrderRequest {
            token_id,
            side: match order_side {
                OrderSide::Buy => "BUY",
                OrderSide::Sell => "SELL",
            },
            price: price.to_string(),
            size: size.to_string(),
            post_only,
        };

        let url = format!("{}/order", self.base_url);
        let resp = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    VenueError::Timeout
                } else {
                    VenueError::Transport(e.into())
                }
            })?;

        if !resp.status().is_success() {
            return Ok(None);
        }

        let parsed: OrderResponse = resp
            .json()
            .await
            .map_err(|e| VenueError::Transport(e.into()))?;
        Ok(parsed.order_id)
    }

    async fn cancel_order(&self, order_id: &str) -> Result<bool, VenueError> {
        let url = format!("{}/order/{order_id}", self.base_url);
        let resp = self
            .http
            .delete(&url)
            .send()
            .await
            .map_err(|e| VenueError::Transport(e.into()))?;
        Ok(resp.status().is_success())
    }

    async fn get_open_orders(&self) -> Result<Vec<OpenOrder>, VenueError> {
        #[derive(Deserialize)]
        struct RawOrder {
            #[serde(rename = "orderID")]
            order_id: String,
            asset_id: String,
            side: String,
            price: String,
            size: String,
        }

        let orders: Vec<RawOrder> = self.get_with_retry("/orders", &[]).await?;
        Ok(orders
            .into_iter()
            .filter_map(|o| {
                Some(OpenOrder {
                    order_id: o.order_id,
                    token_id: o.asset_id,
                    side: if o.side.eq_ignore_ascii_case("BUY") {
                        OrderSide::Buy
                    } else {
                        OrderSide::Sell
                    },
                    price: o.price.parse().ok()?,
                    size: o.size.parse().ok()?,
                })
            })
            .collect())
    }
}
