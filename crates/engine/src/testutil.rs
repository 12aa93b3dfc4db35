//! Shared fixtures and a scriptable broker for engine tests.

use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use trend_trade_core::broker::nearest_weekly_expiry;
use trend_trade_core::indicators::SuperTrendUpdate;
use trend_trade_core::{
    BrokerAdapter, BrokerError, EngineConfig, IndexKind, MarketOrder, OptionContract, OptionSide,
    OrderAction, OrderState, OrderUpdate, Position, PositionState, RiskAnchors, Tick,
    TrendDirection,
};

pub fn test_config() -> EngineConfig {
    EngineConfig {
        interval_secs: 5,
        supertrend_period: 7,
        supertrend_multiplier: Decimal::from(4),
        // Off by default here; HTF-filter tests opt in.
        htf_filter_enabled: false,
        order_fill_timeout_ms: 200,
        order_poll_interval_ms: 10,
        ..EngineConfig::default()
    }
}

pub fn open_position(entry_price: Decimal, qty: u32) -> Position {
    Position {
        trade_id: "t-test".to_string(),
        contract: OptionContract {
            root: IndexKind::Nifty,
            expiry: NaiveDate::from_ymd_opt(2026, 8, 6).unwrap(),
            strike: Decimal::from(23500),
            side: OptionSide::Call,
            security_id: "SIM-1".to_string(),
        },
        entry_time: Utc.with_ymd_and_hms(2026, 8, 5, 4, 30, 0).unwrap(),
        entry_price,
        qty,
        anchors: RiskAnchors::default(),
        open_order_id: "o-test".to_string(),
        exit_order_id: None,
        state: PositionState::Open,
    }
}

pub fn flip_update(direction: TrendDirection) -> SuperTrendUpdate {
    SuperTrendUpdate {
        value: Decimal::from(23450),
        direction,
        flipped: true,
    }
}

/// Scripted broker: orders always accept, statuses pop off a queue (the last
/// entry repeats), quotes return a fixed price. Counts placements by action.
pub struct ScriptedBroker {
    pub statuses: Mutex<VecDeque<OrderUpdate>>,
    pub placed: Mutex<Vec<MarketOrder>>,
    pub buys: AtomicUsize,
    pub sells: AtomicUsize,
    pub reject_placement: bool,
    pub quote_price: Decimal,
    next_id: AtomicUsize,
}

impl ScriptedBroker {
    pub fn filled_at(price: Decimal) -> Self {
        Self::with_statuses(vec![OrderUpdate {
            state: OrderState::Filled,
            avg_fill_price: Some(price),
            filled_qty: None,
        }])
    }

    pub fn with_statuses(statuses: Vec<OrderUpdate>) -> Self {
        Self {
            statuses: Mutex::new(statuses.into()),
            placed: Mutex::new(Vec::new()),
            buys: AtomicUsize::new(0),
            sells: AtomicUsize::new(0),
            reject_placement: false,
            quote_price: Decimal::from(100),
            next_id: AtomicUsize::new(1),
        }
    }

    pub fn rejecting_placement() -> Self {
        let mut broker = Self::with_statuses(vec![]);
        broker.reject_placement = true;
        broker
    }

    fn next_status(&self) -> OrderUpdate {
        let mut queue = self.statuses.lock().unwrap();
        if queue.len() > 1 {
            queue.pop_front().unwrap()
        } else {
            queue
                .front()
                .cloned()
                .unwrap_or(OrderUpdate {
                    state: OrderState::Unknown,
                    avg_fill_price: None,
                    filled_qty: None,
                })
        }
    }
}

#[async_trait]
impl BrokerAdapter for ScriptedBroker {
    async fn resolve_option(
        &self,
        root: IndexKind,
        reference_spot: Decimal,
        side: OptionSide,
    ) -> Result<OptionContract, BrokerError> {
        Ok(OptionContract {
            root,
            expiry: nearest_weekly_expiry(root, Utc::now()),
            strike: root.atm_strike(reference_spot),
            side,
            security_id: "SCRIPT-1".to_string(),
        })
    }

    async fn quote_index(&self, _root: IndexKind) -> Result<Tick, BrokerError> {
        Ok(Tick {
            at: Utc::now(),
            price: Decimal::from(23500),
        })
    }

    async fn quote_option(&self, _contract: &OptionContract) -> Result<Tick, BrokerError> {
        Ok(Tick {
            at: Utc::now(),
            price: self.quote_price,
        })
    }

    async fn place_market_order(&self, order: &MarketOrder) -> Result<String, BrokerError> {
        if self.reject_placement {
            return Err(BrokerError::Rejected("scripted rejection".into()));
        }
        match order.action {
            OrderAction::Buy => self.buys.fetch_add(1, Ordering::SeqCst),
            OrderAction::Sell => self.sells.fetch_add(1, Ordering::SeqCst),
        };
        self.placed.lock().unwrap().push(order.clone());
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(format!("SCRIPT-ORD-{id}"))
    }

    async fn order_status(&self, _broker_order_id: &str) -> Result<OrderUpdate, BrokerError> {
        Ok(self.next_status())
    }
}
