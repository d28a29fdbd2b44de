use serde_json::{json, Value};

use crate::auth;
use crate::ledger;
use crate::money::{format_brl, parse_amount};
use crate::{value_f64, AppState};

/// Accepts a bare amount or `{amount}` / `{valor}`. Unreadable input is 0,
/// which the ledger then rejects.
fn parse_amount_payload(arg0: Option<Value>) -> f64 {
    match arg0 {
        Some(v @ (Value::Number(_) | Value::String(_))) => parse_amount(&v),
        Some(v) => value_f64(&v, &["amount", "valor", "value"]).unwrap_or(0.0),
        None => 0.0,
    }
}

pub fn consumption_preview(arg0: Option<Value>, state: &AppState) -> Result<Value, String> {
    let session = auth::require_session(&state.auth)?;
    let amount = parse_amount_payload(arg0);
    let preview = ledger::preview_consumption(&state.store, &session, amount)?;
    let mut out = serde_json::to_value(preview).map_err(|e| e.to_string())?;
    out["formatted"] = json!({
        "credit": format_brl(preview.credit),
        "remaining": format_brl(preview.remaining),
        "excess": format_brl(preview.excess),
    });
    Ok(out)
}

pub fn consumption_record(arg0: Option<Value>, state: &AppState) -> Result<Value, String> {
    let session = auth::require_session(&state.auth)?;
    let amount = parse_amount_payload(arg0);
    let record = ledger::record_consumption(&state.store, &session, amount)?;

    let warning = (record.excess > 0.0).then(|| format!("Excess of {}", format_brl(record.excess)));
    Ok(json!({
        "success": true,
        "message": format!(
            "Consumption of {} recorded. Balance: {}",
            format_brl(record.amount),
            format_brl(record.new_credit)
        ),
        "warning": warning,
        "record": record,
    }))
}
