//! Credit ledger: an employee records their own consumption against their
//! balance outside the closing flow.

use serde::Serialize;
use serde_json::json;
use tracing::info;

use crate::auth::Session;
use crate::error::{PosError, PosResult};
use crate::money::round_cents;
use crate::roster::employee_from_document;
use crate::store::{DocPath, DocumentStore};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumptionPreview {
    pub credit: f64,
    pub amount: f64,
    pub remaining: f64,
    /// Amount beyond the balance, or 0.
    pub excess: f64,
}

impl ConsumptionPreview {
    pub fn new(credit: f64, amount: f64) -> Self {
        let remaining = credit - amount;
        Self {
            credit,
            amount,
            remaining,
            excess: if remaining < 0.0 { -remaining } else { 0.0 },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumptionRecord {
    pub employee_id: String,
    pub previous_credit: f64,
    pub amount: f64,
    pub new_credit: f64,
    pub excess: f64,
}

/// Amounts below one cent after rounding would leave the balance unchanged.
fn validate_amount(amount: f64) -> PosResult<()> {
    if !amount.is_finite() || round_cents(amount) < 0.01 {
        return Err(PosError::Validation(
            "Consumption must be at least R$ 0,01".into(),
        ));
    }
    Ok(())
}

/// Debit `amount` from the logged-in employee's credit.
///
/// The balance is read inside the transaction, so a concurrent closing
/// accrual is never overwritten with a stale value. A negative result is
/// allowed and reported as excess.
pub fn record_consumption<S: DocumentStore>(
    store: &S,
    session: &Session,
    amount: f64,
) -> PosResult<ConsumptionRecord> {
    let employee_id = session.own_employee_id()?.to_string();
    validate_amount(amount)?;
    let path = DocPath::employee(&employee_id);

    let record = store.run_transaction(|tx| -> PosResult<ConsumptionRecord> {
        let doc = tx
            .get(&path)?
            .ok_or_else(|| PosError::NotFound("Employee not found".into()))?;
        let previous_credit = employee_from_document(&doc)?.credit;
        let new_credit = round_cents(previous_credit - amount);
        tx.update(&path, json!({ "credit": new_credit }))?;
        Ok(ConsumptionRecord {
            employee_id: employee_id.clone(),
            previous_credit,
            amount,
            new_credit,
            excess: if new_credit < 0.0 { -new_credit } else { 0.0 },
        })
    })?;

    info!(
        employee_id = %record.employee_id,
        amount,
        new_credit = record.new_credit,
        "Consumption recorded"
    );
    Ok(record)
}

/// What recording `amount` would leave, from the current stored balance.
pub fn preview_consumption<S: DocumentStore>(
    store: &S,
    session: &Session,
    amount: f64,
) -> PosResult<ConsumptionPreview> {
    let employee_id = session.own_employee_id()?;
    let doc = store
        .get(&DocPath::employee(employee_id))?
        .ok_or_else(|| PosError::NotFound("Employee not found".into()))?;
    let credit = employee_from_document(&doc)?.credit;
    let amount = if amount.is_finite() { amount } else { 0.0 };
    Ok(ConsumptionPreview::new(credit, amount))
}
