//! Wire types for the Dhan REST API.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use trend_trade_core::IndexKind;

/// Exchange segment codes as Dhan names them.
pub const SEGMENT_INDEX: &str = "IDX_I";
pub const SEGMENT_FNO: &str = "NSE_FNO";

/// Dhan security ids for the index spot feeds.
#[must_use]
pub const fn index_security_id(root: IndexKind) -> &'static str {
    match root {
        IndexKind::Nifty => "13",
        IndexKind::BankNifty => "25",
        IndexKind::FinNifty => "27",
        IndexKind::Sensex => "51",
    }
}

/// Underlying symbol for option-chain requests.
#[must_use]
pub const fn underlying_symbol(root: IndexKind) -> &'static str {
    match root {
        IndexKind::Nifty => "NIFTY",
        IndexKind::BankNifty => "BANKNIFTY",
        IndexKind::FinNifty => "FINNIFTY",
        IndexKind::Sensex => "SENSEX",
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LtpResponse {
    pub last_price: Decimal,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRequest {
    pub dhan_client_id: String,
    /// Caller-supplied idempotency tag, echoed back on status queries.
    pub correlation_id: String,
    pub transaction_type: String,
    pub exchange_segment: String,
    pub product_type: String,
    pub order_type: String,
    pub security_id: String,
    pub quantity: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub order_id: String,
    pub order_status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderStatusResponse {
    pub order_status: String,
    #[serde(default)]
    pub average_traded_price: Option<Decimal>,
    #[serde(default)]
    pub filled_qty: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionChainRow {
    pub security_id: String,
    pub strike_price: Decimal,
    /// "CE" or "PE".
    pub option_type: String,
    pub expiry_date: NaiveDate,
}
