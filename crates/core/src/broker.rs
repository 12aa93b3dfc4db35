//! The contract the engine demands of a broker adapter.
//!
//! Adapters (live Dhan, paper simulation) implement this trait; the engine
//! awaits every call under a deadline so broker I/O can never stall the
//! decision loop.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{IndexKind, OptionContract, OptionSide, Tick};

/// Errors an adapter can surface.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Network/timeout class failure. Retryable; the engine treats it as a
    /// missing tick or a still-pending order for the cycle.
    #[error("transient broker error: {0}")]
    Transient(String),

    /// Broker rejected the request. Terminal for the attempt.
    #[error("broker rejected: {0}")]
    Rejected(String),

    /// No such contract could be resolved.
    #[error("contract resolution failed: {0}")]
    Resolve(String),

    /// Unrecoverable adapter failure.
    #[error("fatal broker error: {0}")]
    Fatal(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderAction {
    Buy,
    Sell,
}

impl std::fmt::Display for OrderAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// Normalized order state. Vendors report a zoo of strings; everything the
/// engine sees is one of these four.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderState {
    Pending,
    Filled,
    Rejected,
    Unknown,
}

impl OrderState {
    /// Map a vendor status string onto the normalized state.
    #[must_use]
    pub fn from_vendor(status: &str) -> Self {
        match status.to_ascii_uppercase().as_str() {
            "FILLED" | "TRADED" | "COMPLETE" | "COMPLETED" => Self::Filled,
            "REJECTED" | "CANCELLED" | "CANCELED" => Self::Rejected,
            "PENDING" | "TRANSIT" | "OPEN" | "PART_TRADED" => Self::Pending,
            _ => Self::Unknown,
        }
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Filled | Self::Rejected)
    }
}

/// Polled status of a broker order.
#[derive(Debug, Clone)]
pub struct OrderUpdate {
    pub state: OrderState,
    pub avg_fill_price: Option<Decimal>,
    pub filled_qty: Option<u32>,
}

/// A market order request. `client_tag` is the idempotency key — stable
/// across retries of the same intent.
#[derive(Debug, Clone)]
pub struct MarketOrder {
    pub contract: OptionContract,
    pub action: OrderAction,
    pub qty: u32,
    pub client_tag: String,
}

/// Broker adapter the engine drives. All methods are invoked from worker
/// tasks with caller-supplied deadlines; implementations must be safe to
/// share across tasks.
#[async_trait]
pub trait BrokerAdapter: Send + Sync {
    /// Resolve the ATM option for a side: strike = spot rounded to the
    /// strike step, nearest non-expired expiry per the index's weekly rule.
    async fn resolve_option(
        &self,
        root: IndexKind,
        reference_spot: Decimal,
        side: OptionSide,
    ) -> Result<OptionContract, BrokerError>;

    /// Last traded price of the index.
    async fn quote_index(&self, root: IndexKind) -> Result<Tick, BrokerError>;

    /// Last traded price of a resolved option.
    async fn quote_option(&self, contract: &OptionContract) -> Result<Tick, BrokerError>;

    /// Place a market order; returns the broker order id.
    async fn place_market_order(&self, order: &MarketOrder) -> Result<String, BrokerError>;

    /// Poll the status of a previously placed order.
    async fn order_status(&self, broker_order_id: &str) -> Result<OrderUpdate, BrokerError>;
}

/// Nearest non-expired weekly expiry for an index.
///
/// Same-day expiry stays tradeable through the session; after the session
/// close the contract rolls to the next week.
#[must_use]
pub fn nearest_weekly_expiry(root: IndexKind, now_utc: DateTime<Utc>) -> chrono::NaiveDate {
    use chrono::Datelike;

    let ist = crate::session::to_ist(now_utc);
    let today = ist.date_naive();
    let target = root.expiry_weekday();
    let mut days_ahead =
        (7 + target.num_days_from_monday() as i64 - today.weekday().num_days_from_monday() as i64)
            % 7;
    if days_ahead == 0 && ist.time() > crate::session::SESSION_CLOSE {
        days_ahead = 7;
    }
    today + chrono::Duration::days(days_ahead)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ist_datetime;
    use chrono::{NaiveDate, NaiveTime};

    #[test]
    fn vendor_fill_synonyms_collapse_to_filled() {
        for s in ["FILLED", "TRADED", "COMPLETE", "COMPLETED", "traded"] {
            assert_eq!(OrderState::from_vendor(s), OrderState::Filled);
        }
    }

    #[test]
    fn vendor_pending_and_reject_states_normalize() {
        assert_eq!(OrderState::from_vendor("PENDING"), OrderState::Pending);
        assert_eq!(OrderState::from_vendor("TRANSIT"), OrderState::Pending);
        assert_eq!(OrderState::from_vendor("REJECTED"), OrderState::Rejected);
        assert_eq!(OrderState::from_vendor("CANCELLED"), OrderState::Rejected);
        assert_eq!(OrderState::from_vendor("WEIRD"), OrderState::Unknown);
    }

    #[test]
    fn expiry_rolls_forward_to_index_weekday() {
        // Wednesday 2026-08-05, mid-session.
        let now = ist_datetime(
            NaiveDate::from_ymd_opt(2026, 8, 5).unwrap(),
            NaiveTime::from_hms_opt(11, 0, 0).unwrap(),
        );
        // NIFTY expires Thursday.
        assert_eq!(
            nearest_weekly_expiry(IndexKind::Nifty, now),
            NaiveDate::from_ymd_opt(2026, 8, 6).unwrap()
        );
        // BANKNIFTY expires Wednesday: same-day during the session.
        assert_eq!(
            nearest_weekly_expiry(IndexKind::BankNifty, now),
            NaiveDate::from_ymd_opt(2026, 8, 5).unwrap()
        );
    }

    #[test]
    fn same_day_expiry_rolls_after_session_close() {
        let after_close = ist_datetime(
            NaiveDate::from_ymd_opt(2026, 8, 5).unwrap(),
            NaiveTime::from_hms_opt(16, 0, 0).unwrap(),
        );
        assert_eq!(
            nearest_weekly_expiry(IndexKind::BankNifty, after_close),
            NaiveDate::from_ymd_opt(2026, 8, 12).unwrap()
        );
    }
}
