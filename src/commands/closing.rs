use chrono::{Local, NaiveDate};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::auth::Role;
use crate::closing::{self, ClosingField};
use crate::commands::{parse_payload, require_role};
use crate::daybook::DayBook;
use crate::error::PosError;
use crate::money::format_brl;
use crate::{value_str, AppState};

const STAFF: &[Role] = &[Role::Admin, Role::Cashier];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AttendancePayload {
    #[serde(alias = "employee_id", alias = "id")]
    employee_id: String,
    #[serde(default = "default_present")]
    present: bool,
}

fn default_present() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorkLogValuePayload {
    #[serde(alias = "employee_id", alias = "id")]
    employee_id: String,
    #[serde(default, alias = "deliveries", alias = "consumption", alias = "amount")]
    value: Value,
}

#[derive(Debug, Deserialize)]
struct SetFieldPayload {
    field: String,
    #[serde(default)]
    value: Value,
}

#[derive(Debug, Deserialize)]
struct ReceiptPayload {
    #[serde(default)]
    index: Option<usize>,
    #[serde(default, alias = "nome")]
    name: Option<String>,
    #[serde(default, alias = "valor")]
    amount: Option<Value>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct FinalizePayload {
    #[serde(default, alias = "allowRefinalize", alias = "confirmed")]
    confirm: bool,
}

fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| format!("Invalid date '{raw}' (expected YYYY-MM-DD)"))
}

/// Run `f` on the open day after merging pending remote snapshots.
fn with_day<T>(
    state: &AppState,
    action: &str,
    f: impl FnOnce(&mut DayBook) -> Result<T, String>,
) -> Result<T, String> {
    require_role(state, STAFF, action)?;
    let mut guard = state.day();
    let day = guard
        .as_mut()
        .ok_or("No day is open. Call day:open first")?;
    day.sync_remote();
    f(day)
}

// ---------------------------------------------------------------------------
// Day and work log
// ---------------------------------------------------------------------------

/// Payload `{date?: "YYYY-MM-DD"}`; defaults to today (local time).
pub fn day_open(arg0: Option<Value>, state: &AppState) -> Result<Value, String> {
    require_role(state, STAFF, "open a day")?;
    let payload = arg0.unwrap_or(Value::Null);
    let date = match value_str(&payload, &["date"]) {
        Some(raw) => parse_date(&raw)?,
        None => Local::now().date_naive(),
    };
    let day = DayBook::open(&state.store, date, state.rules()?)?;
    let snapshot = day.state_json();
    *state.day() = Some(day);
    Ok(snapshot)
}

pub fn day_state(state: &AppState) -> Result<Value, String> {
    with_day(state, "view the day", |day| Ok(day.state_json()))
}

pub fn attendance_mark(arg0: Option<Value>, state: &AppState) -> Result<Value, String> {
    let payload: AttendancePayload = parse_payload(arg0, "attendance")?;
    with_day(state, "mark attendance", |day| {
        if payload.present && day.roster().get(&payload.employee_id).is_none() {
            return Err("Employee not found".into());
        }
        day.work_log_mut()
            .mark_attendance(&payload.employee_id, payload.present);
        info!(
            date = %day.date(),
            employee_id = %payload.employee_id,
            present = payload.present,
            "Attendance marked"
        );
        Ok(day.state_json())
    })
}

pub fn work_log_set_deliveries(arg0: Option<Value>, state: &AppState) -> Result<Value, String> {
    let payload: WorkLogValuePayload = parse_payload(arg0, "deliveries")?;
    with_day(state, "edit the work log", |day| {
        let applied = day
            .work_log_mut()
            .set_deliveries(&payload.employee_id, &payload.value);
        Ok(work_log_edit_result(day, &payload.employee_id, applied))
    })
}

pub fn work_log_set_consumption(arg0: Option<Value>, state: &AppState) -> Result<Value, String> {
    let payload: WorkLogValuePayload = parse_payload(arg0, "consumption")?;
    with_day(state, "edit the work log", |day| {
        let applied = day
            .work_log_mut()
            .set_consumption(&payload.employee_id, &payload.value);
        Ok(work_log_edit_result(day, &payload.employee_id, applied))
    })
}

fn work_log_edit_result(day: &DayBook, employee_id: &str, applied: bool) -> Value {
    json!({
        "applied": applied,
        "entry": day.work_log().log().entry(employee_id),
        "totals": day.totals(),
    })
}

// ---------------------------------------------------------------------------
// Closing draft
// ---------------------------------------------------------------------------

pub fn closing_set_field(arg0: Option<Value>, state: &AppState) -> Result<Value, String> {
    let payload: SetFieldPayload = parse_payload(arg0, "closing field")?;
    let field = ClosingField::parse(payload.field.trim())
        .ok_or_else(|| format!("Unknown closing field: {}", payload.field))?;
    with_day(state, "edit the closing", |day| {
        day.closing_mut().set_field(field, &payload.value)?;
        Ok(json!({ "closing": day.closing().inputs(), "totals": day.totals() }))
    })
}

pub fn closing_add_receipt(arg0: Option<Value>, state: &AppState) -> Result<Value, String> {
    let payload: ReceiptPayload = parse_payload(arg0, "receipt")?;
    with_day(state, "edit the closing", |day| {
        let amount = payload.amount.unwrap_or(Value::Null);
        let index = day
            .closing_mut()
            .add_receipt(payload.name.as_deref().unwrap_or_default(), &amount);
        Ok(json!({ "index": index, "receipts": day.closing().inputs().receipts }))
    })
}

pub fn closing_update_receipt(arg0: Option<Value>, state: &AppState) -> Result<Value, String> {
    let payload: ReceiptPayload = parse_payload(arg0, "receipt")?;
    let index = payload.index.ok_or("Missing receipt index")?;
    with_day(state, "edit the closing", |day| {
        day.closing_mut().update_receipt(
            index,
            payload.name.as_deref(),
            payload.amount.as_ref(),
        )?;
        Ok(json!({ "receipts": day.closing().inputs().receipts }))
    })
}

pub fn closing_remove_receipt(arg0: Option<Value>, state: &AppState) -> Result<Value, String> {
    let payload: ReceiptPayload = parse_payload(arg0, "receipt")?;
    let index = payload.index.ok_or("Missing receipt index")?;
    with_day(state, "edit the closing", |day| {
        let removed = day.closing_mut().remove_receipt(index)?;
        Ok(json!({ "removed": removed, "receipts": day.closing().inputs().receipts }))
    })
}

pub fn closing_totals(state: &AppState) -> Result<Value, String> {
    with_day(state, "view the closing", |day| {
        let totals = day.totals();
        Ok(json!({
            "totals": totals,
            "formatted": {
                "receiptsTotal": format_brl(totals.cash.receipts_total),
                "countedTotal": format_brl(totals.cash.counted_total),
                "subtotal": format_brl(totals.cash.subtotal),
                "cashDifference": format_brl(totals.cash.cash_difference),
                "commissionsTotal": format_brl(totals.commissions_total),
            },
            "consumptionLimits": day.consumption_limits(),
        }))
    })
}

/// Payload `{confirm?: bool}`. Without `confirm`, a date that was already
/// finalized is refused.
pub fn closing_finalize(arg0: Option<Value>, state: &AppState) -> Result<Value, String> {
    let payload: FinalizePayload = parse_payload(arg0, "finalize")?;
    let session = require_role(state, STAFF, "finalize the closing")?;
    with_day(state, "finalize the closing", |day| {
        match day.finalize(&state.store, &session, payload.confirm) {
            Ok(outcome) => Ok(json!({
                "success": true,
                "message": format!(
                    "Closing for {} saved. Cash difference: {}",
                    outcome.date,
                    format_brl(outcome.cash_difference)
                ),
                "outcome": outcome,
            })),
            Err(err @ PosError::AlreadyFinalized(_)) => Err(format!(
                "{err}. Finalizing again adds the daily credit a second time; \
                 send confirm=true to proceed."
            )),
            Err(err) => Err(err.into()),
        }
    })
}

/// Stored closing for `{date}`, or null.
pub fn closing_get(arg0: Option<Value>, state: &AppState) -> Result<Value, String> {
    require_role(state, STAFF, "view closings")?;
    let payload = arg0.unwrap_or(Value::Null);
    let raw = value_str(&payload, &["date"]).ok_or("Missing date")?;
    let date = parse_date(&raw)?;
    let closing = closing::get_closing(&state.store, date)?;
    Ok(json!({ "date": date, "closing": closing }))
}
