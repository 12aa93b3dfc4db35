//! Paper trading broker.
//!
//! Fully simulated: a random-walk index and an option premium model of
//! intrinsic value plus distance-decayed time value. Real quotes never mix
//! in — the paper book is its own world, which keeps paper P&L honest about
//! what the simulator (not the market) did.

use async_trait::async_trait;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use std::collections::HashMap;
use tokio::sync::Mutex;

use trend_trade_core::broker::nearest_weekly_expiry;
use trend_trade_core::{
    BrokerAdapter, BrokerError, IndexKind, MarketOrder, OptionContract, OptionSide, OrderState,
    OrderUpdate, Tick,
};

use crate::adapter::round_to_tick;

/// ATM time value anchor in premium points.
const ATM_TIME_VALUE: i64 = 150;
/// Distance (index points) at which time value decays to zero.
const TIME_VALUE_RANGE: i64 = 500;

#[derive(Debug)]
struct PaperState {
    spots: HashMap<IndexKind, Decimal>,
    orders: HashMap<String, PaperOrder>,
    next_order_id: u64,
    rng: StdRng,
}

#[derive(Debug, Clone)]
struct PaperOrder {
    fill_price: Decimal,
}

pub struct PaperBroker {
    state: Mutex<PaperState>,
}

impl Default for PaperBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl PaperBroker {
    #[must_use]
    pub fn new() -> Self {
        Self::with_seed(rand::random())
    }

    /// Deterministic simulator for tests.
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self {
            state: Mutex::new(PaperState {
                spots: HashMap::new(),
                orders: HashMap::new(),
                next_order_id: 1,
                rng: StdRng::seed_from_u64(seed),
            }),
        }
    }

    fn base_spot(root: IndexKind) -> Decimal {
        match root {
            IndexKind::Nifty => Decimal::from_i128_with_scale(23_500, 0),
            IndexKind::BankNifty => Decimal::from_i128_with_scale(51_500, 0),
            IndexKind::FinNifty => Decimal::from_i128_with_scale(22_000, 0),
            IndexKind::Sensex => Decimal::from_i128_with_scale(70_000, 0),
        }
    }

    fn simulated_premium(spot: Decimal, contract: &OptionContract, jitter: Decimal) -> Decimal {
        let intrinsic = match contract.side {
            OptionSide::Call => (spot - contract.strike).max(Decimal::ZERO),
            OptionSide::Put => (contract.strike - spot).max(Decimal::ZERO),
        };
        let distance = (spot - contract.strike).abs();
        let decay =
            (Decimal::ONE - distance / Decimal::from(TIME_VALUE_RANGE)).max(Decimal::ZERO);
        let time_value = Decimal::from(ATM_TIME_VALUE) * decay;

        let premium = round_to_tick(intrinsic + time_value + jitter);
        premium.max(Decimal::new(5, 2))
    }
}

#[async_trait]
impl BrokerAdapter for PaperBroker {
    async fn resolve_option(
        &self,
        root: IndexKind,
        reference_spot: Decimal,
        side: OptionSide,
    ) -> Result<OptionContract, BrokerError> {
        let strike = root.atm_strike(reference_spot);
        let expiry = nearest_weekly_expiry(root, Utc::now());
        Ok(OptionContract {
            root,
            expiry,
            strike,
            side,
            security_id: format!("SIM-{root}-{strike}-{side}"),
        })
    }

    async fn quote_index(&self, root: IndexKind) -> Result<Tick, BrokerError> {
        let mut state = self.state.lock().await;
        let step = {
            let choices = [-15i64, -10, -5, -2, 0, 2, 5, 10, 15];
            let idx = state.rng.gen_range(0..choices.len());
            Decimal::from(choices[idx])
        };
        let spot = state
            .spots
            .entry(root)
            .or_insert_with(|| Self::base_spot(root));
        *spot += step;
        Ok(Tick {
            at: Utc::now(),
            price: *spot,
        })
    }

    async fn quote_option(&self, contract: &OptionContract) -> Result<Tick, BrokerError> {
        let mut state = self.state.lock().await;
        let jitter = {
            let choices = [-10i64, -5, 0, 5, 10];
            let idx = state.rng.gen_range(0..choices.len());
            Decimal::new(choices[idx], 2)
        };
        let spot = *state
            .spots
            .entry(contract.root)
            .or_insert_with(|| Self::base_spot(contract.root));
        Ok(Tick {
            at: Utc::now(),
            price: Self::simulated_premium(spot, contract, jitter),
        })
    }

    async fn place_market_order(&self, order: &MarketOrder) -> Result<String, BrokerError> {
        let mut state = self.state.lock().await;
        let spot = *state
            .spots
            .entry(order.contract.root)
            .or_insert_with(|| Self::base_spot(order.contract.root));
        let fill_price = Self::simulated_premium(spot, &order.contract, Decimal::ZERO);

        let order_id = format!("PAPER-{}", state.next_order_id);
        state.next_order_id += 1;
        state
            .orders
            .insert(order_id.clone(), PaperOrder { fill_price });

        tracing::info!(
            order_id = %order_id,
            tag = %order.client_tag,
            action = %order.action,
            qty = order.qty,
            price = %fill_price,
            "paper fill simulated"
        );
        Ok(order_id)
    }

    async fn order_status(&self, broker_order_id: &str) -> Result<OrderUpdate, BrokerError> {
        let state = self.state.lock().await;
        match state.orders.get(broker_order_id) {
            Some(order) => Ok(OrderUpdate {
                state: OrderState::Filled,
                avg_fill_price: Some(order.fill_price),
                filled_qty: None,
            }),
            None => Ok(OrderUpdate {
                state: OrderState::Unknown,
                avg_fill_price: None,
                filled_qty: None,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use trend_trade_core::OrderAction;

    #[tokio::test]
    async fn resolve_then_quote_produces_plausible_premium() {
        let broker = PaperBroker::with_seed(7);
        let spot = broker.quote_index(IndexKind::Nifty).await.unwrap().price;
        let contract = broker
            .resolve_option(IndexKind::Nifty, spot, OptionSide::Call)
            .await
            .unwrap();
        assert!(contract.security_id.starts_with("SIM-"));

        let quote = broker.quote_option(&contract).await.unwrap();
        assert!(quote.price >= dec!(0.05));
        // ATM premium is dominated by time value.
        assert!(quote.price <= dec!(200));
    }

    #[tokio::test]
    async fn orders_fill_immediately_at_model_price() {
        let broker = PaperBroker::with_seed(7);
        let spot = broker.quote_index(IndexKind::Nifty).await.unwrap().price;
        let contract = broker
            .resolve_option(IndexKind::Nifty, spot, OptionSide::Call)
            .await
            .unwrap();

        let order_id = broker
            .place_market_order(&MarketOrder {
                contract,
                action: OrderAction::Buy,
                qty: 50,
                client_tag: "inst-entry-1".to_string(),
            })
            .await
            .unwrap();
        assert!(order_id.starts_with("PAPER-"));

        let update = broker.order_status(&order_id).await.unwrap();
        assert_eq!(update.state, OrderState::Filled);
        assert!(update.avg_fill_price.unwrap() >= dec!(0.05));
    }

    #[tokio::test]
    async fn unknown_order_reports_unknown() {
        let broker = PaperBroker::with_seed(7);
        let update = broker.order_status("PAPER-404").await.unwrap();
        assert_eq!(update.state, OrderState::Unknown);
    }

    #[tokio::test]
    async fn deep_itm_call_prices_near_intrinsic() {
        let contract = OptionContract {
            root: IndexKind::Nifty,
            expiry: chrono::NaiveDate::from_ymd_opt(2026, 8, 6).unwrap(),
            strike: dec!(23000),
            side: OptionSide::Call,
            security_id: "SIM-X".to_string(),
        };
        let premium = PaperBroker::simulated_premium(dec!(23600), &contract, Decimal::ZERO);
        // Intrinsic 600, distance 600 past the decay range: no time value.
        assert_eq!(premium, dec!(600));
    }
}
