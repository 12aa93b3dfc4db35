//! Engine and application configuration.

use chrono::NaiveTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::IndexKind;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config: {0}")]
    Invalid(String),

    /// Patch touches fields that are not runtime-safe while a position is on.
    #[error("patch rejected: {0}")]
    PatchRejected(String),
}

/// Execution mode. Paper never mixes real quotes with simulated ones; the
/// mode is decided by which broker adapter the engine is wired to and is
/// recorded on every journal row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeMode {
    Paper,
    Live,
}

impl std::fmt::Display for TradeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Paper => write!(f, "paper"),
            Self::Live => write!(f, "live"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacdParams {
    pub fast: usize,
    pub slow: usize,
    pub signal: usize,
}

impl Default for MacdParams {
    fn default() -> Self {
        Self {
            fast: 12,
            slow: 26,
            signal: 9,
        }
    }
}

/// "HH:MM" wire format for IST cutoff times.
mod time_hm {
    use chrono::NaiveTime;
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(t: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&t.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveTime::parse_from_str(&raw, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(&raw, "%H:%M:%S"))
            .map_err(serde::de::Error::custom)
    }
}

/// Per-strategy engine configuration. Immutable during a run except through
/// [`ConfigPatch`] under the rules in [`EngineConfig::apply_patch`].
///
/// A zero on any optional rupee/point knob disables that rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub root: IndexKind,
    pub mode: TradeMode,

    pub interval_secs: u32,
    pub supertrend_period: usize,
    pub supertrend_multiplier: Decimal,
    pub use_macd: bool,
    pub macd: MacdParams,
    /// Require a higher-timeframe SuperTrend (same period/multiplier) to
    /// agree with the entry direction. Only engages when trading below the
    /// higher timeframe.
    pub htf_filter_enabled: bool,
    pub htf_interval_secs: u32,

    pub configured_lots: u32,
    pub initial_stop_points: Decimal,
    pub max_loss_per_trade_rupees: Decimal,
    pub target_points: Decimal,
    pub trail_start_points: Decimal,
    pub trail_step_points: Decimal,
    pub daily_max_loss_rupees: Decimal,
    pub max_trades_per_day: u32,
    pub risk_per_trade_rupees: Decimal,

    #[serde(with = "time_hm")]
    pub entry_open_ist: NaiveTime,
    #[serde(with = "time_hm")]
    pub entry_close_ist: NaiveTime,
    #[serde(with = "time_hm")]
    pub force_flat_ist: NaiveTime,
    #[serde(with = "time_hm")]
    pub session_close_ist: NaiveTime,

    pub order_fill_timeout_ms: u64,
    pub order_poll_interval_ms: u64,

    pub min_gap_candles_between_trades: u32,
    /// Minimum hold before a reversal exit may fire. Tick-level risk exits
    /// and manual squareoff ignore this.
    pub min_hold_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            root: IndexKind::Nifty,
            mode: TradeMode::Paper,
            interval_secs: 60,
            supertrend_period: 7,
            supertrend_multiplier: Decimal::from(4),
            use_macd: false,
            macd: MacdParams::default(),
            htf_filter_enabled: true,
            htf_interval_secs: 60,
            configured_lots: 1,
            initial_stop_points: Decimal::from(50),
            max_loss_per_trade_rupees: Decimal::ZERO,
            target_points: Decimal::ZERO,
            trail_start_points: Decimal::ZERO,
            trail_step_points: Decimal::ZERO,
            daily_max_loss_rupees: Decimal::from(2000),
            max_trades_per_day: 5,
            risk_per_trade_rupees: Decimal::ZERO,
            entry_open_ist: NaiveTime::from_hms_opt(9, 25, 0).unwrap(),
            entry_close_ist: NaiveTime::from_hms_opt(15, 10, 0).unwrap(),
            force_flat_ist: NaiveTime::from_hms_opt(15, 25, 0).unwrap(),
            session_close_ist: NaiveTime::from_hms_opt(15, 30, 0).unwrap(),
            order_fill_timeout_ms: 10_000,
            order_poll_interval_ms: 500,
            min_gap_candles_between_trades: 1,
            min_hold_secs: 0,
        }
    }
}

impl EngineConfig {
    /// Validate internal consistency.
    ///
    /// # Errors
    /// Returns `ConfigError::Invalid` describing the first failed check.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_secs == 0 {
            return Err(ConfigError::Invalid("interval_secs must be > 0".into()));
        }
        if self.supertrend_period == 0 {
            return Err(ConfigError::Invalid("supertrend_period must be > 0".into()));
        }
        if self.supertrend_multiplier <= Decimal::ZERO {
            return Err(ConfigError::Invalid(
                "supertrend_multiplier must be > 0".into(),
            ));
        }
        if self.htf_interval_secs == 0 {
            return Err(ConfigError::Invalid("htf_interval_secs must be > 0".into()));
        }
        if self.configured_lots == 0 {
            return Err(ConfigError::Invalid("configured_lots must be > 0".into()));
        }
        if self.max_trades_per_day == 0 {
            return Err(ConfigError::Invalid("max_trades_per_day must be > 0".into()));
        }
        if self.min_gap_candles_between_trades == 0 {
            return Err(ConfigError::Invalid(
                "min_gap_candles_between_trades must be >= 1".into(),
            ));
        }
        if self.risk_per_trade_rupees > Decimal::ZERO && self.initial_stop_points <= Decimal::ZERO {
            return Err(ConfigError::Invalid(
                "risk_per_trade_rupees requires initial_stop_points > 0".into(),
            ));
        }
        if self.entry_open_ist >= self.entry_close_ist {
            return Err(ConfigError::Invalid(
                "entry window must open before it closes".into(),
            ));
        }
        if self.entry_close_ist > self.force_flat_ist
            || self.force_flat_ist >= self.session_close_ist
        {
            return Err(ConfigError::Invalid(
                "cutoffs must be ordered entry_close <= force_flat < session_close".into(),
            ));
        }
        if self.order_poll_interval_ms == 0 || self.order_fill_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "order poll interval and fill timeout must be > 0".into(),
            ));
        }
        if (self.trail_start_points > Decimal::ZERO) != (self.trail_step_points > Decimal::ZERO) {
            return Err(ConfigError::Invalid(
                "trail_start_points and trail_step_points enable together".into(),
            ));
        }
        Ok(())
    }

    /// Whether the higher-timeframe confirmation filter engages: enabled and
    /// the trading interval is finer than the filter timeframe.
    #[must_use]
    pub const fn htf_filter_active(&self) -> bool {
        self.htf_filter_enabled && self.interval_secs < self.htf_interval_secs
    }

    /// Apply a patch.
    ///
    /// With no position on the books any valid patch is accepted. While a
    /// position exists only risk caps may change, and only toward the
    /// conservative side.
    ///
    /// # Errors
    /// `PatchRejected` when a non-runtime-safe field is patched while a
    /// position exists, or when a cap would be loosened live;
    /// `Invalid` when the patched config fails validation.
    pub fn apply_patch(&mut self, patch: &ConfigPatch, position_closed: bool) -> Result<(), ConfigError> {
        if !position_closed {
            if !patch.is_risk_only() {
                return Err(ConfigError::PatchRejected(
                    "only risk caps may change while a position is open".into(),
                ));
            }
            if !patch.tightens(self) {
                return Err(ConfigError::PatchRejected(
                    "risk caps may only be tightened while a position is open".into(),
                ));
            }
        }

        let mut next = self.clone();
        patch.write_into(&mut next);
        next.validate()?;
        *self = next;
        Ok(())
    }
}

/// A partial update to [`EngineConfig`]. Unset fields are untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigPatch {
    pub interval_secs: Option<u32>,
    pub supertrend_period: Option<usize>,
    pub supertrend_multiplier: Option<Decimal>,
    pub use_macd: Option<bool>,
    pub htf_filter_enabled: Option<bool>,
    pub htf_interval_secs: Option<u32>,
    pub configured_lots: Option<u32>,
    pub initial_stop_points: Option<Decimal>,
    pub max_loss_per_trade_rupees: Option<Decimal>,
    pub target_points: Option<Decimal>,
    pub trail_start_points: Option<Decimal>,
    pub trail_step_points: Option<Decimal>,
    pub daily_max_loss_rupees: Option<Decimal>,
    pub max_trades_per_day: Option<u32>,
    pub risk_per_trade_rupees: Option<Decimal>,
    pub min_gap_candles_between_trades: Option<u32>,
    pub min_hold_secs: Option<u64>,
}

impl ConfigPatch {
    /// True when every set field is a live-tightenable risk cap.
    #[must_use]
    pub const fn is_risk_only(&self) -> bool {
        self.interval_secs.is_none()
            && self.supertrend_period.is_none()
            && self.supertrend_multiplier.is_none()
            && self.use_macd.is_none()
            && self.htf_filter_enabled.is_none()
            && self.htf_interval_secs.is_none()
            && self.configured_lots.is_none()
            && self.initial_stop_points.is_none()
            && self.target_points.is_none()
            && self.trail_start_points.is_none()
            && self.trail_step_points.is_none()
            && self.risk_per_trade_rupees.is_none()
            && self.min_gap_candles_between_trades.is_none()
            && self.min_hold_secs.is_none()
    }

    /// True when every set risk cap moves toward the conservative side.
    /// Enabling a disabled cap (0 -> x) tightens; loosening or disabling
    /// does not.
    #[must_use]
    pub fn tightens(&self, current: &EngineConfig) -> bool {
        let cap_tightens = |new: Decimal, old: Decimal| {
            new > Decimal::ZERO && (old == Decimal::ZERO || new <= old)
        };
        if let Some(v) = self.daily_max_loss_rupees {
            if !cap_tightens(v, current.daily_max_loss_rupees) {
                return false;
            }
        }
        if let Some(v) = self.max_loss_per_trade_rupees {
            if !cap_tightens(v, current.max_loss_per_trade_rupees) {
                return false;
            }
        }
        if let Some(v) = self.max_trades_per_day {
            if v == 0 || v > current.max_trades_per_day {
                return false;
            }
        }
        true
    }

    fn write_into(&self, cfg: &mut EngineConfig) {
        if let Some(v) = self.interval_secs {
            cfg.interval_secs = v;
        }
        if let Some(v) = self.supertrend_period {
            cfg.supertrend_period = v;
        }
        if let Some(v) = self.supertrend_multiplier {
            cfg.supertrend_multiplier = v;
        }
        if let Some(v) = self.use_macd {
            cfg.use_macd = v;
        }
        if let Some(v) = self.htf_filter_enabled {
            cfg.htf_filter_enabled = v;
        }
        if let Some(v) = self.htf_interval_secs {
            cfg.htf_interval_secs = v;
        }
        if let Some(v) = self.configured_lots {
            cfg.configured_lots = v;
        }
        if let Some(v) = self.initial_stop_points {
            cfg.initial_stop_points = v;
        }
        if let Some(v) = self.max_loss_per_trade_rupees {
            cfg.max_loss_per_trade_rupees = v;
        }
        if let Some(v) = self.target_points {
            cfg.target_points = v;
        }
        if let Some(v) = self.trail_start_points {
            cfg.trail_start_points = v;
        }
        if let Some(v) = self.trail_step_points {
            cfg.trail_step_points = v;
        }
        if let Some(v) = self.daily_max_loss_rupees {
            cfg.daily_max_loss_rupees = v;
        }
        if let Some(v) = self.max_trades_per_day {
            cfg.max_trades_per_day = v;
        }
        if let Some(v) = self.risk_per_trade_rupees {
            cfg.risk_per_trade_rupees = v;
        }
        if let Some(v) = self.min_gap_candles_between_trades {
            cfg.min_gap_candles_between_trades = v;
        }
        if let Some(v) = self.min_hold_secs {
            cfg.min_hold_secs = v;
        }
    }

    /// Whether applying this patch requires the indicator/aggregator chain to
    /// restart (interval or indicator parameters changed).
    #[must_use]
    pub const fn resets_indicators(&self) -> bool {
        self.interval_secs.is_some()
            || self.supertrend_period.is_some()
            || self.supertrend_multiplier.is_some()
            || self.use_macd.is_some()
            || self.htf_filter_enabled.is_some()
            || self.htf_interval_secs.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://trend_trade.db?mode=rwc".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DhanConfig {
    pub api_url: String,
    pub access_token: String,
    pub client_id: String,
}

impl Default for DhanConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.dhan.co/v2".to_string(),
            access_token: String::new(),
            client_id: String::new(),
        }
    }
}

/// Top-level application configuration loaded by the CLI.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub dhan: DhanConfig,
    pub engine: EngineConfig,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn default_config_validates() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn risk_sizing_requires_an_initial_stop() {
        let cfg = EngineConfig {
            risk_per_trade_rupees: dec!(1000),
            initial_stop_points: Decimal::ZERO,
            ..EngineConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn trail_knobs_enable_together() {
        let cfg = EngineConfig {
            trail_start_points: dec!(10),
            trail_step_points: Decimal::ZERO,
            ..EngineConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn htf_filter_engages_only_below_its_timeframe() {
        let sub_minute = EngineConfig {
            interval_secs: 5,
            ..EngineConfig::default()
        };
        assert!(sub_minute.htf_filter_active());

        let minute = EngineConfig::default(); // 60s trading, 60s filter
        assert!(!minute.htf_filter_active());

        let disabled = EngineConfig {
            interval_secs: 5,
            htf_filter_enabled: false,
            ..EngineConfig::default()
        };
        assert!(!disabled.htf_filter_active());
    }

    #[test]
    fn htf_patch_is_structural_not_risk_only() {
        let patch = ConfigPatch {
            htf_filter_enabled: Some(false),
            ..ConfigPatch::default()
        };
        assert!(!patch.is_risk_only());
        assert!(patch.resets_indicators());
    }

    #[test]
    fn times_deserialize_from_hh_mm() {
        let cfg: EngineConfig =
            serde_json::from_str(r#"{"entry_open_ist": "09:30"}"#).unwrap();
        assert_eq!(cfg.entry_open_ist, NaiveTime::from_hms_opt(9, 30, 0).unwrap());
    }

    #[test]
    fn open_position_rejects_non_risk_patch() {
        let mut cfg = EngineConfig::default();
        let patch = ConfigPatch {
            interval_secs: Some(5),
            ..ConfigPatch::default()
        };
        assert!(matches!(
            cfg.apply_patch(&patch, false),
            Err(ConfigError::PatchRejected(_))
        ));
        assert_eq!(cfg.interval_secs, 60);
    }

    #[test]
    fn open_position_accepts_tightened_daily_cap() {
        let mut cfg = EngineConfig::default();
        let patch = ConfigPatch {
            daily_max_loss_rupees: Some(dec!(1500)),
            ..ConfigPatch::default()
        };
        cfg.apply_patch(&patch, false).unwrap();
        assert_eq!(cfg.daily_max_loss_rupees, dec!(1500));
    }

    #[test]
    fn open_position_rejects_loosened_daily_cap() {
        let mut cfg = EngineConfig::default();
        let patch = ConfigPatch {
            daily_max_loss_rupees: Some(dec!(99999)),
            ..ConfigPatch::default()
        };
        assert!(cfg.apply_patch(&patch, false).is_err());
    }

    #[test]
    fn enabling_a_disabled_cap_counts_as_tightening() {
        let mut cfg = EngineConfig {
            max_loss_per_trade_rupees: Decimal::ZERO,
            ..EngineConfig::default()
        };
        let patch = ConfigPatch {
            max_loss_per_trade_rupees: Some(dec!(750)),
            ..ConfigPatch::default()
        };
        cfg.apply_patch(&patch, false).unwrap();
        assert_eq!(cfg.max_loss_per_trade_rupees, dec!(750));
    }

    #[test]
    fn closed_position_accepts_structural_patch() {
        let mut cfg = EngineConfig::default();
        let patch = ConfigPatch {
            interval_secs: Some(5),
            supertrend_period: Some(10),
            ..ConfigPatch::default()
        };
        cfg.apply_patch(&patch, true).unwrap();
        assert_eq!(cfg.interval_secs, 5);
        assert!(patch.resets_indicators());
    }

    #[test]
    fn invalid_patched_value_is_rejected_even_when_closed() {
        let mut cfg = EngineConfig::default();
        let patch = ConfigPatch {
            interval_secs: Some(0),
            ..ConfigPatch::default()
        };
        assert!(cfg.apply_patch(&patch, true).is_err());
        assert_eq!(cfg.interval_secs, 60);
    }
}
