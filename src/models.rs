//! Persisted document shapes and business constants.
//!
//! Field names on the wire follow the stored documents (`isDelivery`,
//! `saldoInicial`, `entradasRecebimentos`, ...). Every numeric field is read
//! leniently; a stray string or null in an amount never fails a load.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::money::{de_amount, de_count, de_non_negative_amount, de_opt_amount};

/// Fixed base daily salary stamped on new employees (informational only).
pub const DAILY_SALARY: f64 = 60.00;
/// Credit every present employee earns per finalized day.
pub const DAILY_CONSUMPTION_CREDIT: f64 = 15.00;
/// Default commission per delivery.
pub const DEFAULT_DELIVERY_RATE: f64 = 6.00;
/// Default flat bonus for a delivery employee with at least one delivery.
pub const DEFAULT_FIXED_BONUS: f64 = 25.00;

// ---------------------------------------------------------------------------
// Employee
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Employee {
    /// Store-assigned document key; not part of the stored body.
    #[serde(default, skip_serializing)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub is_delivery: bool,
    /// Running balance. Negative means the employee consumed beyond it.
    #[serde(default, deserialize_with = "de_amount")]
    pub credit: f64,
    #[serde(default, deserialize_with = "de_amount")]
    pub salary_base: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Employee {
    /// First eight characters of the id, for compact listings.
    pub fn short_id(&self) -> &str {
        match self.id.char_indices().nth(8) {
            Some((idx, _)) => &self.id[..idx],
            None => &self.id,
        }
    }
}

// ---------------------------------------------------------------------------
// Work log
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkLogEntry {
    pub id: String,
    #[serde(default, deserialize_with = "de_count")]
    pub deliveries: u32,
    #[serde(default, deserialize_with = "de_non_negative_amount")]
    pub consumption: f64,
}

impl WorkLogEntry {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            deliveries: 0,
            consumption: 0.0,
        }
    }
}

/// Employees present on one date. At most one entry per employee id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkLog {
    #[serde(default)]
    pub employees: Vec<WorkLogEntry>,
}

// ---------------------------------------------------------------------------
// Daily closing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReceiptEntry {
    #[serde(rename = "nome", default)]
    pub name: String,
    #[serde(rename = "valor", default, deserialize_with = "de_amount")]
    pub amount: f64,
}

impl ReceiptEntry {
    pub fn new(name: impl Into<String>, amount: f64) -> Self {
        Self {
            name: name.into(),
            amount,
        }
    }
}

/// End-of-day closing record, keyed by date in the `daily_closings`
/// collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyClosing {
    #[serde(rename = "saldoInicial", default, deserialize_with = "de_amount")]
    pub opening_balance: f64,
    #[serde(rename = "entradaTroco", default, deserialize_with = "de_amount")]
    pub change_inflow: f64,
    #[serde(rename = "saidaCaixa", default, deserialize_with = "de_amount")]
    pub cash_outflow: f64,
    #[serde(rename = "entradasRecebimentos", default)]
    pub receipts: Vec<ReceiptEntry>,
    #[serde(rename = "trocoContado", default, deserialize_with = "de_amount")]
    pub counted_change: f64,
    #[serde(rename = "notasAltasContadas", default, deserialize_with = "de_amount")]
    pub counted_notes: f64,
    /// `None` when the stored document lacks a usable value.
    #[serde(rename = "valorEntrega", default, deserialize_with = "de_opt_amount")]
    pub delivery_rate: Option<f64>,
    #[serde(rename = "acrescimoFixo", default, deserialize_with = "de_opt_amount")]
    pub fixed_bonus: Option<f64>,
    #[serde(rename = "diferencaCaixa", default, deserialize_with = "de_amount")]
    pub cash_difference: f64,
    pub date: NaiveDate,
    #[serde(default)]
    pub closed_by: Option<String>,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
}

impl DailyClosing {
    pub fn is_finalized(&self) -> bool {
        self.closed_at.is_some()
    }
}
