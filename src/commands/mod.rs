//! Channel handlers. Each takes the raw JSON payload and returns JSON, or a
//! message the operator can read.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::auth::{require_session, Role, Session};
use crate::AppState;

pub mod auth;
pub mod closing;
pub mod consumption;
pub mod diagnostics;
pub mod employees;
pub mod settings;

pub fn dispatch(channel: &str, payload: Option<Value>, state: &AppState) -> Result<Value, String> {
    match channel {
        // Session
        "auth:login" => auth::auth_login(payload, state),
        "auth:logout" => auth::auth_logout(state),
        "auth:current" => Ok(auth::auth_current(state)),

        // Roster
        "employees:create" => employees::employees_create(payload, state),
        "employees:list" => employees::employees_list(state),

        // Day working set
        "day:open" => closing::day_open(payload, state),
        "day:state" => closing::day_state(state),
        "attendance:mark" => closing::attendance_mark(payload, state),
        "work-log:set-deliveries" => closing::work_log_set_deliveries(payload, state),
        "work-log:set-consumption" => closing::work_log_set_consumption(payload, state),

        // Closing
        "closing:set-field" => closing::closing_set_field(payload, state),
        "closing:add-receipt" => closing::closing_add_receipt(payload, state),
        "closing:update-receipt" => closing::closing_update_receipt(payload, state),
        "closing:remove-receipt" => closing::closing_remove_receipt(payload, state),
        "closing:totals" => closing::closing_totals(state),
        "closing:finalize" => closing::closing_finalize(payload, state),
        "closing:get" => closing::closing_get(payload, state),

        // Employee self-service
        "consumption:preview" => consumption::consumption_preview(payload, state),
        "consumption:record" => consumption::consumption_record(payload, state),

        // Settings
        "settings:get-business" => settings::settings_get_business(state),
        "settings:update-business" => settings::settings_update_business(payload, state),
        "settings:set-pin" => settings::settings_set_pin(payload, state),

        "system:status" => diagnostics::system_status(state),

        other => Err(format!("Unknown channel: {other}")),
    }
}

/// Decode a payload struct. A missing payload decodes from `{}`.
pub(crate) fn parse_payload<T: DeserializeOwned>(
    arg0: Option<Value>,
    what: &str,
) -> Result<T, String> {
    let payload = arg0.unwrap_or_else(|| Value::Object(Default::default()));
    serde_json::from_value(payload).map_err(|e| format!("Invalid {what} payload: {e}"))
}

/// Current session, refused unless its role is in `allowed`.
pub(crate) fn require_role(
    state: &AppState,
    allowed: &[Role],
    action: &str,
) -> Result<Session, String> {
    let session = require_session(&state.auth)?;
    session.require_role(allowed, action)?;
    Ok(session)
}
