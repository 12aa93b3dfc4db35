//! Order placement and fill verification.
//!
//! Local state never advances on hope: a position opens or closes only on a
//! broker-confirmed fill. Placement and polling are split so the actor can
//! record the broker order id before the first poll, and can keep polling a
//! SELL across cycles after a timeout.

use rust_decimal::Decimal;
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};
use trend_trade_core::{BrokerAdapter, BrokerError, EngineConfig, MarketOrder, OrderState, OrderUpdate};

/// Per-call deadline for a single status poll.
const POLL_CALL_TIMEOUT: Duration = Duration::from_millis(1_500);

#[derive(Debug)]
pub enum PlaceError {
    /// Broker refused the order. Terminal for this attempt.
    Rejected(String),
    /// Transport failed or timed out before an order id came back.
    Failed(String),
}

/// Terminal outcome of polling an order to its deadline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Filled { price: Decimal },
    Rejected,
    /// Deadline passed with the order still Pending/Unknown.
    TimedOut { last_state: OrderState },
}

#[derive(Debug, Clone, Copy)]
pub struct OrderExecutor {
    poll_interval: Duration,
    fill_timeout: Duration,
}

impl OrderExecutor {
    #[must_use]
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            poll_interval: Duration::from_millis(config.order_poll_interval_ms),
            fill_timeout: Duration::from_millis(config.order_fill_timeout_ms),
        }
    }

    /// Stable idempotency tag for one order intent.
    #[must_use]
    pub fn client_tag(instance_id: &str, intent: &str, seq: u64) -> String {
        format!("{instance_id}-{intent}-{seq}")
    }

    /// Place a market order under the fill-timeout deadline.
    ///
    /// # Errors
    /// `Rejected` when the broker refuses, `Failed` on transport problems —
    /// the caller decides whether the intent is abandoned or retried.
    pub async fn place(
        &self,
        broker: &dyn BrokerAdapter,
        order: &MarketOrder,
    ) -> Result<String, PlaceError> {
        match timeout(self.fill_timeout, broker.place_market_order(order)).await {
            Ok(Ok(order_id)) => Ok(order_id),
            Ok(Err(BrokerError::Rejected(reason))) => Err(PlaceError::Rejected(reason)),
            Ok(Err(e)) => Err(PlaceError::Failed(e.to_string())),
            Err(_) => Err(PlaceError::Failed("order placement timed out".into())),
        }
    }

    /// Poll `order_status` every `poll_interval` until the fill timeout.
    /// `fallback_price` covers adapters that confirm a fill without an
    /// average price.
    pub async fn poll_until_deadline(
        &self,
        broker: &dyn BrokerAdapter,
        broker_order_id: &str,
        fallback_price: Decimal,
    ) -> PollOutcome {
        let deadline = Instant::now() + self.fill_timeout;
        let mut last_state = OrderState::Pending;

        loop {
            match self.poll_once(broker, broker_order_id).await {
                update if update.state == OrderState::Filled => {
                    return PollOutcome::Filled {
                        price: update.avg_fill_price.unwrap_or(fallback_price),
                    };
                }
                update if update.state == OrderState::Rejected => return PollOutcome::Rejected,
                update => last_state = update.state,
            }

            if Instant::now() + self.poll_interval > deadline {
                return PollOutcome::TimedOut { last_state };
            }
            sleep(self.poll_interval).await;
        }
    }

    /// One status check with a bounded deadline. Transport failures read as
    /// `Unknown` — the caller keeps polling.
    pub async fn poll_once(&self, broker: &dyn BrokerAdapter, broker_order_id: &str) -> OrderUpdate {
        match timeout(POLL_CALL_TIMEOUT, broker.order_status(broker_order_id)).await {
            Ok(Ok(update)) => update,
            Ok(Err(e)) => {
                tracing::warn!(order_id = %broker_order_id, error = %e, "order status failed");
                OrderUpdate {
                    state: OrderState::Unknown,
                    avg_fill_price: None,
                    filled_qty: None,
                }
            }
            Err(_) => {
                tracing::warn!(order_id = %broker_order_id, "order status timed out");
                OrderUpdate {
                    state: OrderState::Unknown,
                    avg_fill_price: None,
                    filled_qty: None,
                }
            }
        }
    }
}
