//! The per-strategy engine loop.
//!
//! One actor task owns one instance's position, risk book, aggregator and
//! indicator state — the single-writer rule. Broker and journal I/O are
//! awaited under deadlines so the 1-second cadence survives a slow broker.
//! Local state never advances ahead of a broker confirmation or a journal
//! commit.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::MissedTickBehavior;

use trend_trade_core::{
    session, BrokerAdapter, CandleAggregator, EngineConfig, EngineEvent, ExitReason,
    IndicatorSnapshot, LastAction, Macd, MarketOrder, OrderAction, OrderState, Position,
    PositionSnapshot, PositionState, RiskAnchors, RiskBook, RiskBookSnapshot, Snapshot,
    SuperTrend,
};
use trend_trade_data::{DayStatsRepository, DayStatsRow, TradeDatabase, TradeOpen, TradeRepository};

use crate::commands::{EngineCommand, StartAck, StopMode};
use crate::entry::{evaluate_entry, EntryDecision, EntrySignal};
use crate::executor::{OrderExecutor, PlaceError, PollOutcome};
use crate::risk::{evaluate_reversal, evaluate_tick_exit};

const QUOTE_TIMEOUT: Duration = Duration::from_millis(1_500);
const RESOLVE_TIMEOUT: Duration = Duration::from_millis(3_000);
const SELL_RETRY_BACKOFF_SECS: i64 = 2;
const EVENT_CHANNEL_CAPACITY: usize = 1_024;

/// In-flight SELL bookkeeping while the position is Closing.
#[derive(Debug, Clone)]
struct ClosingCtx {
    reason: ExitReason,
    placed_at: DateTime<Utc>,
    last_state: OrderState,
    price_hint: Decimal,
}

/// A confirmed SELL fill whose journal commit has not landed yet. The
/// position stays Closing until it does.
#[derive(Debug, Clone)]
struct PendingClose {
    trade_id: String,
    fill_price: Decimal,
    realized_pnl: Decimal,
    reason: ExitReason,
    fill_at: DateTime<Utc>,
}

pub struct EngineActor {
    instance_id: String,
    config: EngineConfig,
    broker: Arc<dyn BrokerAdapter>,
    journal: TradeRepository,
    day_stats: DayStatsRepository,
    executor: OrderExecutor,

    rx: mpsc::Receiver<EngineCommand>,
    status_tx: watch::Sender<Snapshot>,
    event_tx: broadcast::Sender<EngineEvent>,

    running: bool,
    stop_pending: bool,

    aggregator: CandleAggregator,
    supertrend: SuperTrend,
    macd: Macd,
    /// Higher-timeframe confirmation chain, present only while the HTF
    /// filter engages (same SuperTrend parameters, coarser candles).
    htf_aggregator: Option<CandleAggregator>,
    htf_supertrend: Option<SuperTrend>,

    position: Option<Position>,
    risk_book: RiskBook,
    closing_ctx: Option<ClosingCtx>,
    pending_close: Option<PendingClose>,
    pending_open: Option<TradeOpen>,
    sell_backoff_until: Option<DateTime<Utc>>,

    last_tick_at: Option<DateTime<Utc>>,
    last_candle_boundary: Option<DateTime<Utc>>,
    last_option_ltp: Option<Decimal>,
    /// Closed candles since the last exit; `None` before the first exit.
    candles_since_exit: Option<u32>,
    /// Set when an exit completed this cycle; blocks same-cycle re-entry.
    exit_fired_this_cycle: bool,
    last_action: Option<LastAction>,
    order_seq: u64,
}

impl EngineActor {
    /// Builds the actor plus the channel ends the registry hands out.
    #[must_use]
    pub fn new(
        instance_id: String,
        config: EngineConfig,
        broker: Arc<dyn BrokerAdapter>,
        database: &TradeDatabase,
        rx: mpsc::Receiver<EngineCommand>,
        status_tx: watch::Sender<Snapshot>,
        event_tx: broadcast::Sender<EngineEvent>,
    ) -> Self {
        let executor = OrderExecutor::from_config(&config);
        let aggregator = CandleAggregator::new(config.interval_secs);
        let supertrend = SuperTrend::new(config.supertrend_period, config.supertrend_multiplier);
        let macd = Macd::new(config.macd.fast, config.macd.slow, config.macd.signal);
        let (htf_aggregator, htf_supertrend) = Self::build_htf_chain(&config);
        let risk_book = RiskBook::new(session::ist_date(Utc::now()));
        Self {
            instance_id,
            config,
            broker,
            journal: TradeRepository::new(database.pool().clone()),
            day_stats: DayStatsRepository::new(database.pool().clone()),
            executor,
            rx,
            status_tx,
            event_tx,
            running: false,
            stop_pending: false,
            aggregator,
            supertrend,
            macd,
            htf_aggregator,
            htf_supertrend,
            position: None,
            risk_book,
            closing_ctx: None,
            pending_close: None,
            pending_open: None,
            sell_backoff_until: None,
            last_tick_at: None,
            last_candle_boundary: None,
            last_option_ltp: None,
            candles_since_exit: None,
            exit_fired_this_cycle: false,
            last_action: None,
            order_seq: 0,
        }
    }

    #[must_use]
    pub const fn event_capacity() -> usize {
        EVENT_CHANNEL_CAPACITY
    }

    /// Runs the command/heartbeat loop until shutdown.
    ///
    /// # Errors
    /// Never under normal operation; reserved for startup failures.
    pub async fn run(mut self) -> Result<()> {
        tracing::info!(instance = %self.instance_id, "engine actor started");

        let mut heartbeat = tokio::time::interval(Duration::from_secs(1));
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                cmd = self.rx.recv() => {
                    match cmd {
                        None => break,
                        Some(cmd) => {
                            if self.handle_command(cmd).await {
                                break;
                            }
                        }
                    }
                }
                _ = heartbeat.tick(), if self.running => {
                    self.cycle(Utc::now()).await;
                }
            }
        }

        tracing::info!(instance = %self.instance_id, "engine actor stopped");
        Ok(())
    }

    /// Returns true on shutdown.
    async fn handle_command(&mut self, cmd: EngineCommand) -> bool {
        match cmd {
            EngineCommand::Start(reply) => {
                let ack = if self.running {
                    StartAck::AlreadyRunning
                } else {
                    self.running = true;
                    self.stop_pending = false;
                    self.reset_market_state();
                    tracing::info!(instance = %self.instance_id, mode = %self.config.mode, root = %self.config.root, "engine started");
                    StartAck::Running
                };
                let _ = reply.send(ack);
                self.publish();
            }
            EngineCommand::Stop { mode, reply } => {
                let result = self.handle_stop(mode).await;
                let _ = reply.send(result);
                self.publish();
            }
            EngineCommand::Squareoff(reply) => {
                let result = if self.position.is_some() {
                    let hint = self.exit_price_hint();
                    self.request_exit(ExitReason::Manual, hint, Utc::now()).await;
                    Ok(())
                } else {
                    Err("no open position".to_string())
                };
                let _ = reply.send(result);
                self.publish();
            }
            EngineCommand::UpdateConfig { patch, reply } => {
                let closed = self.position.is_none();
                let result = self.config.apply_patch(&patch, closed);
                if result.is_ok() {
                    self.executor = OrderExecutor::from_config(&self.config);
                    if closed && patch.resets_indicators() {
                        self.reset_market_state();
                        tracing::info!(instance = %self.instance_id, "indicator chain rebuilt after config patch");
                    }
                }
                let _ = reply.send(result);
                self.publish();
            }
            EngineCommand::GetSnapshot(reply) => {
                let _ = reply.send(self.build_snapshot());
            }
            EngineCommand::Subscribe(reply) => {
                let _ = reply.send(self.event_tx.subscribe());
            }
            EngineCommand::Shutdown => return true,
        }
        false
    }

    async fn handle_stop(&mut self, mode: StopMode) -> Result<(), String> {
        match mode {
            StopMode::Graceful => {
                if self.position.is_some() {
                    return Err("position not closed; use force-flat".to_string());
                }
                self.running = false;
                tracing::info!(instance = %self.instance_id, "engine stopped");
                Ok(())
            }
            StopMode::ForceFlat => {
                if self.position.is_some() {
                    let hint = self.exit_price_hint();
                    self.request_exit(ExitReason::Manual, hint, Utc::now()).await;
                }
                if self.position.is_none() {
                    self.running = false;
                } else {
                    // Loop keeps running until the SELL confirms and journals.
                    self.stop_pending = true;
                }
                Ok(())
            }
        }
    }

    /// One heartbeat cycle.
    async fn cycle(&mut self, now: DateTime<Utc>) {
        self.exit_fired_this_cycle = false;

        if self.pending_close.is_some() {
            self.retry_pending_close(now).await;
        }
        if self.pending_open.is_some() {
            self.retry_pending_open().await;
        }

        if self.risk_book.roll(session::ist_date(now)) {
            self.reset_market_state();
            tracing::info!(instance = %self.instance_id, day = %self.risk_book.day_ist, "session day rollover");
        }

        if self.is_closing() && self.pending_close.is_none() {
            self.continue_closing(now).await;
        }

        if session::at_or_after(now, self.config.force_flat_ist) {
            if let Some(position) = &self.position {
                if position.state == PositionState::Open {
                    tracing::warn!(instance = %self.instance_id, "force-flat cutoff reached");
                    let hint = self.exit_price_hint();
                    self.request_exit(ExitReason::ForceSquareoff, hint, now).await;
                }
            }
        }

        if !session::within_session(now) && self.position.is_none() {
            self.publish();
            return;
        }

        let index_tick = match tokio::time::timeout(
            QUOTE_TIMEOUT,
            self.broker.quote_index(self.config.root),
        )
        .await
        {
            Ok(Ok(tick)) => Some(tick),
            Ok(Err(e)) => {
                tracing::debug!(instance = %self.instance_id, error = %e, "no index tick this cycle");
                None
            }
            Err(_) => {
                tracing::debug!(instance = %self.instance_id, "index quote timed out; no tick this cycle");
                None
            }
        };

        if self.has_open_position() {
            self.tick_risk_pass(now).await;
        }

        if let Some(tick) = index_tick {
            self.last_tick_at = Some(tick.at);
            self.fold_htf_tick(tick.at, tick.price);
            if let Some(candle) = self.aggregator.update(tick.at, tick.price) {
                self.on_candle_close(candle, now).await;
            }
        }

        if self.stop_pending && self.position.is_none() {
            self.stop_pending = false;
            self.running = false;
            tracing::info!(instance = %self.instance_id, "engine stopped after force-flat");
        }

        self.publish();
    }

    /// Tick-level risk: fetch the option LTP and run the priority chain.
    async fn tick_risk_pass(&mut self, now: DateTime<Utc>) {
        let Some(contract) = self.position.as_ref().map(|p| p.contract.clone()) else {
            return;
        };

        let ltp = match tokio::time::timeout(QUOTE_TIMEOUT, self.broker.quote_option(&contract))
            .await
        {
            Ok(Ok(tick)) => tick.price,
            Ok(Err(e)) => {
                tracing::debug!(instance = %self.instance_id, error = %e, "no option tick this cycle");
                return;
            }
            Err(_) => return,
        };
        self.last_option_ltp = Some(ltp);

        let reason = {
            let Some(position) = self.position.as_mut() else {
                return;
            };
            if position.state != PositionState::Open {
                return;
            }
            evaluate_tick_exit(&self.config, &self.risk_book, position, ltp)
        };

        if let Some(reason) = reason {
            if reason == ExitReason::DailyMaxLoss {
                self.risk_book.trip_daily_loss();
                tracing::warn!(instance = %self.instance_id, "daily max loss tripped");
            }
            self.request_exit(reason, ltp, now).await;
        }
    }

    /// Candle close: indicator update, reversal exit, entry evaluation.
    async fn on_candle_close(&mut self, candle: trend_trade_core::Candle, now: DateTime<Utc>) {
        self.last_candle_boundary = Some(candle.boundary_start);
        if let Some(count) = self.candles_since_exit.as_mut() {
            *count += 1;
        }

        let update = self.supertrend.update(&candle);
        self.macd.update(candle.close);

        self.emit(EngineEvent::CandleClosed {
            candle: candle.clone(),
            supertrend: update.as_ref().map(|u| u.value),
            direction: update.as_ref().map(|u| u.direction.as_i8()),
        });

        let Some(update) = update else {
            return;
        };

        if update.flipped {
            tracing::info!(
                instance = %self.instance_id,
                boundary = %candle.boundary_start,
                direction = %update.direction,
                "supertrend flipped"
            );
            self.emit(EngineEvent::SignalFlip {
                boundary: candle.boundary_start,
                direction: update.direction.as_i8(),
            });
        }

        if self.has_open_position() {
            let reason = {
                let position = self.position.as_ref().expect("checked above");
                evaluate_reversal(&self.config, position, update.direction, now)
            };
            if let Some(reason) = reason {
                let hint = self.exit_price_hint();
                self.request_exit(reason, hint, now).await;
            }
            return;
        }

        if self.position.is_some() {
            // Opening or Closing: no entries while an order is in flight.
            return;
        }

        if self.exit_fired_this_cycle {
            return;
        }

        if session::at_or_after(now, self.config.force_flat_ist) {
            return;
        }

        let htf_direction = self.htf_supertrend.as_ref().and_then(|st| st.direction());
        let decision = evaluate_entry(
            &self.config,
            &self.risk_book,
            now,
            &update,
            &self.macd,
            htf_direction,
            self.candles_since_exit,
            candle.close,
        );
        match decision {
            EntryDecision::Enter(signal) => self.try_enter(signal, candle.close, now).await,
            EntryDecision::Skip(reason) => {
                if update.flipped {
                    tracing::info!(instance = %self.instance_id, reason, "entry skipped");
                    self.note_skip(now, reason);
                }
            }
        }
    }

    /// Resolve, size, place and verify a BUY. The position exists only after
    /// the broker confirms the fill.
    async fn try_enter(&mut self, signal: EntrySignal, spot: Decimal, now: DateTime<Utc>) {
        let contract = match tokio::time::timeout(
            RESOLVE_TIMEOUT,
            self.broker
                .resolve_option(self.config.root, spot, signal.side),
        )
        .await
        {
            Ok(Ok(contract)) => contract,
            Ok(Err(e)) => {
                tracing::warn!(instance = %self.instance_id, error = %e, "option resolution failed; entry skipped");
                self.note_skip(now, "resolve failed");
                return;
            }
            Err(_) => {
                tracing::warn!(instance = %self.instance_id, "option resolution timed out; entry skipped");
                self.note_skip(now, "resolve timed out");
                return;
            }
        };

        let reference_price = match tokio::time::timeout(
            QUOTE_TIMEOUT,
            self.broker.quote_option(&contract),
        )
        .await
        {
            Ok(Ok(tick)) => tick.price,
            _ => {
                tracing::warn!(instance = %self.instance_id, "no option quote; entry skipped");
                self.note_skip(now, "no option quote");
                return;
            }
        };

        self.order_seq += 1;
        let tag = OrderExecutor::client_tag(&self.instance_id, "entry", self.order_seq);
        let order = MarketOrder {
            contract: contract.clone(),
            action: OrderAction::Buy,
            qty: signal.qty,
            client_tag: tag.clone(),
        };

        let order_id = match self.executor.place(self.broker.as_ref(), &order).await {
            Ok(id) => id,
            Err(PlaceError::Rejected(reason)) => {
                tracing::error!(instance = %self.instance_id, reason = %reason, "entry order rejected");
                self.set_last_action("entry_rejected", now, &reason);
                self.emit(EngineEvent::Error {
                    at: now,
                    message: format!("entry rejected: {reason}"),
                });
                return;
            }
            Err(PlaceError::Failed(reason)) => {
                tracing::warn!(instance = %self.instance_id, reason = %reason, "entry placement failed");
                self.note_skip(now, "placement failed");
                return;
            }
        };
        self.emit(EngineEvent::OrderPlaced {
            broker_order_id: order_id.clone(),
            action: OrderAction::Buy.to_string(),
            qty: signal.qty,
            client_tag: tag.clone(),
        });

        match self
            .executor
            .poll_until_deadline(self.broker.as_ref(), &order_id, reference_price)
            .await
        {
            PollOutcome::Filled { price } => {
                self.emit(EngineEvent::OrderFilled {
                    broker_order_id: order_id.clone(),
                    action: OrderAction::Buy.to_string(),
                    price,
                });
                self.open_position(contract, signal, price, order_id, now).await;
            }
            PollOutcome::Rejected => {
                tracing::error!(instance = %self.instance_id, order_id = %order_id, "entry order rejected at fill check");
                self.set_last_action("entry_rejected", now, "rejected by broker");
            }
            PollOutcome::TimedOut { last_state } => {
                // No local fill is fabricated; the attempt is abandoned on
                // durable record. The broker may still own an orphan order.
                tracing::error!(
                    instance = %self.instance_id,
                    order_id = %order_id,
                    ?last_state,
                    "entry fill unconfirmed within deadline; attempt abandoned"
                );
                if let Err(e) = self
                    .journal
                    .write_note(
                        now,
                        "entry_abandoned",
                        &format!("order {order_id} (tag {tag}) unconfirmed past deadline"),
                    )
                    .await
                {
                    tracing::warn!(error = %e, "failed to journal abandoned entry");
                }
                self.note_skip(now, "fill unconfirmed");
            }
        }
    }

    async fn open_position(
        &mut self,
        contract: trend_trade_core::OptionContract,
        signal: EntrySignal,
        entry_price: Decimal,
        order_id: String,
        now: DateTime<Utc>,
    ) {
        let anchors = RiskAnchors {
            initial_stop: (self.config.initial_stop_points > Decimal::ZERO)
                .then(|| entry_price - self.config.initial_stop_points),
            trailing_stop: None,
            target_price: (self.config.target_points > Decimal::ZERO)
                .then(|| entry_price + self.config.target_points),
            max_loss_rupees: (self.config.max_loss_per_trade_rupees > Decimal::ZERO)
                .then_some(self.config.max_loss_per_trade_rupees),
            high_water_mark: None,
        };
        let trade_id = uuid::Uuid::new_v4().to_string();
        let position = Position {
            trade_id: trade_id.clone(),
            contract: contract.clone(),
            entry_time: now,
            entry_price,
            qty: signal.qty,
            anchors,
            open_order_id: order_id,
            exit_order_id: None,
            state: PositionState::Open,
        };

        tracing::info!(
            instance = %self.instance_id,
            trade_id = %trade_id,
            contract = %contract.display_name(),
            entry_price = %entry_price,
            qty = signal.qty,
            "position opened"
        );

        self.risk_book.record_entry();
        self.last_option_ltp = Some(entry_price);
        self.position = Some(position);
        self.set_last_action("entry", now, &contract.display_name());

        let open = TradeOpen {
            trade_id: trade_id.clone(),
            open_at: now,
            side: contract.side,
            strike: contract.strike,
            expiry: contract.expiry,
            entry_price,
            qty: signal.qty,
            mode: self.config.mode,
            root: self.config.root,
        };
        match self.journal.write_open(&open).await {
            Ok(()) => {
                self.emit(EngineEvent::PositionOpened {
                    trade_id,
                    side: contract.side,
                    strike: contract.strike,
                    entry_price,
                    qty: signal.qty,
                });
            }
            Err(e) => {
                // Snapshot withholds the position until the open journals.
                tracing::error!(error = %e, trade_id = %trade_id, "trade open journal failed; retrying");
                self.pending_open = Some(open);
            }
        }
    }

    /// Single-SELL exit path. Every exit trigger funnels through here;
    /// requests while a SELL is in flight coalesce to no-ops.
    async fn request_exit(&mut self, reason: ExitReason, price_hint: Decimal, now: DateTime<Utc>) {
        let (contract, qty, trade_id) = {
            let Some(position) = self.position.as_ref() else {
                return;
            };
            if position.state == PositionState::Closing || position.exit_order_id.is_some() {
                tracing::debug!(trade_id = %position.trade_id, "exit already in flight; coalesced");
                return;
            }
            (
                position.contract.clone(),
                position.qty,
                position.trade_id.clone(),
            )
        };

        if let Some(until) = self.sell_backoff_until {
            if now < until {
                return;
            }
        }

        self.order_seq += 1;
        let tag = OrderExecutor::client_tag(&self.instance_id, "exit", self.order_seq);
        let order = MarketOrder {
            contract,
            action: OrderAction::Sell,
            qty,
            client_tag: tag.clone(),
        };

        if let Some(position) = self.position.as_mut() {
            position.state = PositionState::Closing;
        }
        tracing::info!(instance = %self.instance_id, trade_id = %trade_id, reason = %reason, "exit triggered");

        match self.executor.place(self.broker.as_ref(), &order).await {
            Ok(order_id) => {
                if let Some(position) = self.position.as_mut() {
                    if !position.assign_exit_order(order_id.clone()) {
                        tracing::error!(trade_id = %trade_id, "second SELL refused; exit order already assigned");
                        return;
                    }
                }
                self.emit(EngineEvent::OrderPlaced {
                    broker_order_id: order_id.clone(),
                    action: OrderAction::Sell.to_string(),
                    qty,
                    client_tag: tag,
                });
                self.closing_ctx = Some(ClosingCtx {
                    reason,
                    placed_at: now,
                    last_state: OrderState::Pending,
                    price_hint,
                });

                match self
                    .executor
                    .poll_until_deadline(self.broker.as_ref(), &order_id, price_hint)
                    .await
                {
                    PollOutcome::Filled { price } => {
                        self.emit(EngineEvent::OrderFilled {
                            broker_order_id: order_id,
                            action: OrderAction::Sell.to_string(),
                            price,
                        });
                        self.finalize_close(price, reason, Utc::now()).await;
                    }
                    PollOutcome::Rejected => self.sell_rejected(now),
                    PollOutcome::TimedOut { last_state } => {
                        tracing::warn!(
                            instance = %self.instance_id,
                            trade_id = %trade_id,
                            ?last_state,
                            "SELL unconfirmed within deadline; staying in Closing"
                        );
                        if let Some(ctx) = self.closing_ctx.as_mut() {
                            ctx.last_state = last_state;
                        }
                    }
                }
            }
            Err(PlaceError::Rejected(e)) | Err(PlaceError::Failed(e)) => {
                tracing::error!(instance = %self.instance_id, error = %e, "SELL placement failed; will retry");
                if let Some(position) = self.position.as_mut() {
                    position.state = PositionState::Open;
                }
                self.sell_backoff_until =
                    Some(now + chrono::Duration::seconds(SELL_RETRY_BACKOFF_SECS));
                self.emit(EngineEvent::Error {
                    at: now,
                    message: format!("sell placement failed: {e}"),
                });
            }
        }
    }

    /// Keep polling an in-flight SELL across cycles. At the force-flat
    /// cutoff a SELL that has sat Unknown past its absolute deadline is
    /// replaced with a fresh order under a new tag.
    async fn continue_closing(&mut self, now: DateTime<Utc>) {
        let Some(order_id) = self
            .position
            .as_ref()
            .and_then(|p| p.exit_order_id.clone())
        else {
            return;
        };
        let (reason, price_hint, placed_at) = match &self.closing_ctx {
            Some(ctx) => (ctx.reason, ctx.price_hint, ctx.placed_at),
            None => (
                ExitReason::Manual,
                self.exit_price_hint(),
                now,
            ),
        };

        let update = self.executor.poll_once(self.broker.as_ref(), &order_id).await;
        match update.state {
            OrderState::Filled => {
                let price = update.avg_fill_price.unwrap_or(price_hint);
                self.emit(EngineEvent::OrderFilled {
                    broker_order_id: order_id,
                    action: OrderAction::Sell.to_string(),
                    price,
                });
                self.finalize_close(price, reason, now).await;
            }
            OrderState::Rejected => self.sell_rejected(now),
            state @ (OrderState::Pending | OrderState::Unknown) => {
                if let Some(ctx) = self.closing_ctx.as_mut() {
                    ctx.last_state = state;
                }
                let fill_timeout = chrono::Duration::milliseconds(
                    i64::try_from(self.config.order_fill_timeout_ms).unwrap_or(i64::MAX),
                );
                let stale = now - placed_at > fill_timeout * 2;
                if state == OrderState::Unknown
                    && stale
                    && session::at_or_after(now, self.config.force_flat_ist)
                {
                    tracing::warn!(
                        instance = %self.instance_id,
                        order_id = %order_id,
                        "SELL unknown past absolute deadline at force-flat; submitting fresh order"
                    );
                    if let Some(position) = self.position.as_mut() {
                        position.exit_order_id = None;
                        position.state = PositionState::Open;
                    }
                    self.closing_ctx = None;
                    self.request_exit(ExitReason::ForceSquareoff, price_hint, now).await;
                }
            }
        }
    }

    fn sell_rejected(&mut self, now: DateTime<Utc>) {
        tracing::error!(instance = %self.instance_id, "SELL rejected; clearing exit order for retry");
        if let Some(position) = self.position.as_mut() {
            position.exit_order_id = None;
            position.state = PositionState::Open;
        }
        self.closing_ctx = None;
        self.sell_backoff_until = Some(now + chrono::Duration::seconds(SELL_RETRY_BACKOFF_SECS));
        self.emit(EngineEvent::Error {
            at: now,
            message: "sell rejected by broker".to_string(),
        });
    }

    /// Journal the close, then advance local state. A failed commit pins the
    /// position in Closing and the write retries next cycle.
    async fn finalize_close(&mut self, fill_price: Decimal, reason: ExitReason, now: DateTime<Utc>) {
        let Some(position) = self.position.as_ref() else {
            return;
        };
        let realized_pnl = position.unrealized_pnl(fill_price);
        let trade_id = position.trade_id.clone();

        match self
            .journal
            .write_close(
                &trade_id,
                now,
                session::ist_date(now),
                fill_price,
                realized_pnl,
                &reason.to_string(),
            )
            .await
        {
            Ok(applied) => {
                self.complete_close(&trade_id, fill_price, realized_pnl, reason, now, applied)
                    .await;
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    trade_id = %trade_id,
                    "trade close journal failed; position pinned in Closing"
                );
                self.pending_close = Some(PendingClose {
                    trade_id,
                    fill_price,
                    realized_pnl,
                    reason,
                    fill_at: now,
                });
            }
        }
    }

    async fn retry_pending_close(&mut self, now: DateTime<Utc>) {
        let Some(pending) = self.pending_close.clone() else {
            return;
        };
        match self
            .journal
            .write_close(
                &pending.trade_id,
                pending.fill_at,
                session::ist_date(pending.fill_at),
                pending.fill_price,
                pending.realized_pnl,
                &pending.reason.to_string(),
            )
            .await
        {
            Ok(applied) => {
                self.pending_close = None;
                self.complete_close(
                    &pending.trade_id,
                    pending.fill_price,
                    pending.realized_pnl,
                    pending.reason,
                    now,
                    applied,
                )
                .await;
            }
            Err(e) => {
                tracing::warn!(error = %e, trade_id = %pending.trade_id, "close journal retry failed");
            }
        }
    }

    async fn retry_pending_open(&mut self) {
        let Some(open) = self.pending_open.clone() else {
            return;
        };
        match self.journal.write_open(&open).await {
            Ok(()) => {
                self.pending_open = None;
                self.emit(EngineEvent::PositionOpened {
                    trade_id: open.trade_id,
                    side: open.side,
                    strike: open.strike,
                    entry_price: open.entry_price,
                    qty: open.qty,
                });
            }
            Err(e) => {
                tracing::warn!(error = %e, trade_id = %open.trade_id, "open journal retry failed");
            }
        }
    }

    async fn complete_close(
        &mut self,
        trade_id: &str,
        fill_price: Decimal,
        realized_pnl: Decimal,
        reason: ExitReason,
        now: DateTime<Utc>,
        journal_applied: bool,
    ) {
        if journal_applied {
            self.risk_book.record_close(realized_pnl);
        }
        self.position = None;
        self.closing_ctx = None;
        self.sell_backoff_until = None;
        self.last_option_ltp = None;
        self.candles_since_exit = Some(0);
        self.exit_fired_this_cycle = true;
        self.set_last_action("exit", now, &reason.to_string());

        tracing::info!(
            instance = %self.instance_id,
            trade_id = %trade_id,
            exit_price = %fill_price,
            pnl = %realized_pnl,
            reason = %reason,
            "position closed"
        );
        self.emit(EngineEvent::PositionClosed {
            trade_id: trade_id.to_string(),
            exit_price: fill_price,
            realized_pnl,
            reason,
        });

        let stats = DayStatsRow {
            date_ist: self.risk_book.day_ist,
            realized_pnl: self.risk_book.realized_pnl_today,
            trades_taken: self.risk_book.trades_taken_today,
            daily_loss_tripped: self.risk_book.daily_loss_tripped,
        };
        if let Err(e) = self.day_stats.upsert(&stats).await {
            tracing::warn!(error = %e, "day stats upsert failed");
        }
    }

    fn build_htf_chain(config: &EngineConfig) -> (Option<CandleAggregator>, Option<SuperTrend>) {
        if config.htf_filter_active() {
            (
                Some(CandleAggregator::new(config.htf_interval_secs)),
                Some(SuperTrend::new(
                    config.supertrend_period,
                    config.supertrend_multiplier,
                )),
            )
        } else {
            (None, None)
        }
    }

    /// Fold the index tick into the higher-timeframe chain.
    fn fold_htf_tick(&mut self, at: DateTime<Utc>, price: Decimal) {
        let (Some(aggregator), Some(supertrend)) =
            (self.htf_aggregator.as_mut(), self.htf_supertrend.as_mut())
        else {
            return;
        };
        if let Some(candle) = aggregator.update(at, price) {
            if let Some(update) = supertrend.update(&candle) {
                tracing::debug!(
                    instance = %self.instance_id,
                    boundary = %candle.boundary_start,
                    direction = %update.direction,
                    "htf supertrend updated"
                );
            }
        }
    }

    fn reset_market_state(&mut self) {
        self.aggregator = CandleAggregator::new(self.config.interval_secs);
        self.supertrend =
            SuperTrend::new(self.config.supertrend_period, self.config.supertrend_multiplier);
        self.macd = Macd::new(self.config.macd.fast, self.config.macd.slow, self.config.macd.signal);
        let (htf_aggregator, htf_supertrend) = Self::build_htf_chain(&self.config);
        self.htf_aggregator = htf_aggregator;
        self.htf_supertrend = htf_supertrend;
        self.candles_since_exit = None;
        self.last_candle_boundary = None;
    }

    fn has_open_position(&self) -> bool {
        self.position
            .as_ref()
            .is_some_and(|p| p.state == PositionState::Open)
    }

    fn is_closing(&self) -> bool {
        self.position
            .as_ref()
            .is_some_and(|p| p.state == PositionState::Closing)
    }

    fn exit_price_hint(&self) -> Decimal {
        self.last_option_ltp.unwrap_or_else(|| {
            self.position
                .as_ref()
                .map_or(Decimal::ZERO, |p| p.entry_price)
        })
    }

    fn note_skip(&mut self, now: DateTime<Utc>, reason: &str) {
        self.set_last_action("entry_skipped", now, reason);
        self.emit(EngineEvent::EntrySkipped {
            at: now,
            reason: reason.to_string(),
        });
    }

    fn set_last_action(&mut self, kind: &str, at: DateTime<Utc>, reason: &str) {
        self.last_action = Some(LastAction {
            kind: kind.to_string(),
            at,
            reason: reason.to_string(),
        });
    }

    fn emit(&self, event: EngineEvent) {
        // Best-effort fan-out; lagging subscribers see a Lagged error.
        let _ = self.event_tx.send(event);
    }

    fn build_snapshot(&self) -> Snapshot {
        let position = match (&self.position, &self.pending_open) {
            // Un-journaled opens stay private until the commit lands.
            (Some(p), None) => {
                let ltp = self.last_option_ltp.unwrap_or(p.entry_price);
                Some(PositionSnapshot {
                    side: p.contract.side,
                    strike: p.contract.strike,
                    expiry: p.contract.expiry,
                    entry_price: p.entry_price,
                    qty: p.qty,
                    unrealized_pnl: p.unrealized_pnl(ltp),
                    initial_stop: p.anchors.initial_stop,
                    trailing_stop: p.anchors.trailing_stop,
                    target_price: p.anchors.target_price,
                    high_water_mark: p.anchors.high_water_mark,
                })
            }
            _ => None,
        };

        Snapshot {
            strategy_instance_id: self.instance_id.clone(),
            mode: self.config.mode,
            root: self.config.root,
            running: self.running,
            last_tick_at: self.last_tick_at,
            last_candle_boundary_at: self.last_candle_boundary,
            indicator: IndicatorSnapshot {
                direction: self.supertrend.direction().map(trend_trade_core::TrendDirection::as_i8),
                flipped_at: self.supertrend.flipped_at(),
            },
            position,
            risk_book: RiskBookSnapshot {
                realized_pnl_today: self.risk_book.realized_pnl_today,
                trades_taken_today: self.risk_book.trades_taken_today,
                daily_loss_tripped: self.risk_book.daily_loss_tripped,
            },
            last_action: self.last_action.clone(),
        }
    }

    fn publish(&self) {
        let _ = self.status_tx.send(self.build_snapshot());
    }
}
