//! Live broker adapter over the Dhan REST API.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::{Decimal, RoundingStrategy};
use serde_json::json;

use trend_trade_core::broker::nearest_weekly_expiry;
use trend_trade_core::{
    BrokerAdapter, BrokerError, IndexKind, MarketOrder, OptionContract, OptionSide, OrderState,
    OrderUpdate, Tick,
};

use crate::client::DhanClient;
use crate::types::{
    index_security_id, underlying_symbol, LtpResponse, OptionChainRow, OrderRequest,
    OrderResponse, OrderStatusResponse, SEGMENT_FNO, SEGMENT_INDEX,
};

/// Round a premium to the exchange's 0.05 tick.
#[must_use]
pub fn round_to_tick(price: Decimal) -> Decimal {
    let tick = Decimal::new(5, 2);
    (price / tick).round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero) * tick
}

pub struct DhanBroker {
    client: DhanClient,
}

impl DhanBroker {
    #[must_use]
    pub const fn new(client: DhanClient) -> Self {
        Self { client }
    }

    fn parse<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> Result<T, BrokerError> {
        serde_json::from_value(value)
            .map_err(|e| BrokerError::Transient(format!("unexpected response shape: {e}")))
    }
}

#[async_trait]
impl BrokerAdapter for DhanBroker {
    async fn resolve_option(
        &self,
        root: IndexKind,
        reference_spot: Decimal,
        side: OptionSide,
    ) -> Result<OptionContract, BrokerError> {
        let strike = root.atm_strike(reference_spot);
        let expiry = nearest_weekly_expiry(root, Utc::now());

        let response = self
            .client
            .post(
                "/optionchain",
                json!({
                    "underlying": underlying_symbol(root),
                    "segment": SEGMENT_FNO,
                    "expiry": expiry,
                }),
            )
            .await?;

        let rows: Vec<OptionChainRow> = Self::parse(
            response
                .get("data")
                .cloned()
                .ok_or_else(|| BrokerError::Transient("option chain missing data".into()))?,
        )?;

        let side_code = side.to_string();
        let row = rows
            .into_iter()
            .find(|r| r.strike_price == strike && r.option_type == side_code && r.expiry_date == expiry)
            .ok_or_else(|| {
                BrokerError::Resolve(format!(
                    "no contract for {root} {strike}{side_code} {expiry}"
                ))
            })?;

        Ok(OptionContract {
            root,
            expiry,
            strike,
            side,
            security_id: row.security_id,
        })
    }

    async fn quote_index(&self, root: IndexKind) -> Result<Tick, BrokerError> {
        let endpoint = format!(
            "/marketfeed/ltp?segment={SEGMENT_INDEX}&securityId={}",
            index_security_id(root)
        );
        let response = self.client.get(&endpoint).await?;
        let ltp: LtpResponse = Self::parse(response)?;
        Ok(Tick {
            at: Utc::now(),
            price: ltp.last_price,
        })
    }

    async fn quote_option(&self, contract: &OptionContract) -> Result<Tick, BrokerError> {
        let endpoint = format!(
            "/marketfeed/ltp?segment={SEGMENT_FNO}&securityId={}",
            contract.security_id
        );
        let response = self.client.get(&endpoint).await?;
        let ltp: LtpResponse = Self::parse(response)?;
        Ok(Tick {
            at: Utc::now(),
            price: round_to_tick(ltp.last_price),
        })
    }

    async fn place_market_order(&self, order: &MarketOrder) -> Result<String, BrokerError> {
        let request = OrderRequest {
            dhan_client_id: self.client.client_id().to_string(),
            correlation_id: order.client_tag.clone(),
            transaction_type: order.action.to_string(),
            exchange_segment: SEGMENT_FNO.to_string(),
            product_type: "INTRADAY".to_string(),
            order_type: "MARKET".to_string(),
            security_id: order.contract.security_id.clone(),
            quantity: order.qty,
        };

        let body = serde_json::to_value(&request)
            .map_err(|e| BrokerError::Fatal(format!("order serialization: {e}")))?;
        let response = self.client.post("/orders", body).await?;
        let placed: OrderResponse = Self::parse(response)?;

        if OrderState::from_vendor(&placed.order_status) == OrderState::Rejected {
            return Err(BrokerError::Rejected(format!(
                "order {} rejected at placement",
                placed.order_id
            )));
        }

        tracing::info!(
            order_id = %placed.order_id,
            tag = %order.client_tag,
            action = %order.action,
            qty = order.qty,
            security_id = %order.contract.security_id,
            "order placed"
        );
        Ok(placed.order_id)
    }

    async fn order_status(&self, broker_order_id: &str) -> Result<OrderUpdate, BrokerError> {
        let response = self.client.get(&format!("/orders/{broker_order_id}")).await?;
        let status: OrderStatusResponse = Self::parse(response)?;

        Ok(OrderUpdate {
            state: OrderState::from_vendor(&status.order_status),
            avg_fill_price: status.average_traded_price.map(round_to_tick),
            filled_qty: status.filled_qty,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn premiums_round_to_five_paise() {
        assert_eq!(round_to_tick(dec!(101.23)), dec!(101.25));
        assert_eq!(round_to_tick(dec!(101.22)), dec!(101.20));
        assert_eq!(round_to_tick(dec!(0.07)), dec!(0.05));
        assert_eq!(round_to_tick(dec!(0.08)), dec!(0.10));
    }
}
