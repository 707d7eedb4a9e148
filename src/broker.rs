//! Opaque broker capability (spec §6 non-goal): order placement/modification behind a trait so
//! `TradeExecutor` never depends on a concrete broker SDK. The OAuth2 handshake and session
//! lifecycle for any real implementation are explicitly out of scope for this core.
//!
//! Grounded on the teacher's `DataSource` trait in `datafabric/sources.rs` for the
//! async-trait-object seam pattern.

use crate::errors::BrokerError;
use crate::types::{OrderType, Product, Side};
use async_trait::async_trait;

/// A placed or modified order's broker-assigned identity and fill data, when known immediately.
#[derive(Debug, Clone)]
pub struct BrokerOrderAck {
    pub order_id: String,
    pub filled_price: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub ticker: String,
    pub side: Side,
    pub quantity: u64,
    pub order_type: OrderType,
    pub product: Product,
    /// Required for `OrderType::Limit`; ignored for `OrderType::Market`.
    pub price: Option<f64>,
    /// Trigger price for stop orders; `None` for plain market/limit orders.
    pub trigger_price: Option<f64>,
}

#[async_trait]
pub trait BrokerClient: Send + Sync {
    async fn place_order(&self, request: OrderRequest) -> Result<BrokerOrderAck, BrokerError>;
    async fn modify_order(&self, order_id: &str, new_trigger_price: f64) -> Result<BrokerOrderAck, BrokerError>;
}
