//! Core instrument and contract types for NSE/BSE index options.

use chrono::{DateTime, NaiveDate, Utc, Weekday};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Tradeable index underlying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IndexKind {
    Nifty,
    BankNifty,
    FinNifty,
    Sensex,
}

impl IndexKind {
    /// Contracts per lot as published by the exchange.
    #[must_use]
    pub const fn lot_size(self) -> u32 {
        match self {
            Self::Nifty => 50,
            Self::BankNifty => 15,
            Self::FinNifty => 40,
            Self::Sensex => 10,
        }
    }

    /// Strike spacing for the option chain.
    #[must_use]
    pub fn strike_step(self) -> Decimal {
        match self {
            Self::Nifty | Self::FinNifty => Decimal::from(50),
            Self::BankNifty | Self::Sensex => Decimal::from(100),
        }
    }

    /// Weekday of the weekly expiry for this index.
    #[must_use]
    pub const fn expiry_weekday(self) -> Weekday {
        match self {
            Self::Nifty => Weekday::Thu,
            Self::BankNifty => Weekday::Wed,
            Self::FinNifty => Weekday::Tue,
            Self::Sensex => Weekday::Fri,
        }
    }

    /// ATM strike: spot rounded to the nearest strike step, ties away from
    /// zero so a midpoint spot picks the higher strike.
    #[must_use]
    pub fn atm_strike(self, spot: Decimal) -> Decimal {
        let step = self.strike_step();
        (spot / step).round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero) * step
    }
}

impl std::fmt::Display for IndexKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Nifty => write!(f, "NIFTY"),
            Self::BankNifty => write!(f, "BANKNIFTY"),
            Self::FinNifty => write!(f, "FINNIFTY"),
            Self::Sensex => write!(f, "SENSEX"),
        }
    }
}

impl std::str::FromStr for IndexKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "NIFTY" => Ok(Self::Nifty),
            "BANKNIFTY" => Ok(Self::BankNifty),
            "FINNIFTY" => Ok(Self::FinNifty),
            "SENSEX" => Ok(Self::Sensex),
            other => Err(format!("unknown index: {other}")),
        }
    }
}

/// Option side (call or put).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptionSide {
    #[serde(rename = "CE")]
    Call,
    #[serde(rename = "PE")]
    Put,
}

impl std::fmt::Display for OptionSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Call => write!(f, "CE"),
            Self::Put => write!(f, "PE"),
        }
    }
}

/// A resolved option contract. Immutable once the broker hands back a
/// security id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionContract {
    pub root: IndexKind,
    pub expiry: NaiveDate,
    pub strike: Decimal,
    pub side: OptionSide,
    pub security_id: String,
}

impl OptionContract {
    /// Human-readable contract description (e.g., "NIFTY 23500CE 2026-08-06").
    #[must_use]
    pub fn display_name(&self) -> String {
        format!("{} {}{} {}", self.root, self.strike, self.side, self.expiry)
    }
}

/// A single last-traded-price observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tick {
    pub at: DateTime<Utc>,
    pub price: Decimal,
}
