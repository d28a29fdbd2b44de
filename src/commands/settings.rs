use serde::Deserialize;
use serde_json::{json, Value};

use crate::auth::{self, Role};
use crate::commands::{parse_payload, require_role};
use crate::AppState;

#[derive(Debug, Deserialize)]
struct SetPinPayload {
    role: Role,
    pin: String,
}

pub fn settings_get_business(state: &AppState) -> Result<Value, String> {
    auth::require_session(&state.auth)?;
    let rules = state.rules()?;
    serde_json::to_value(rules).map_err(|e| e.to_string())
}

/// Partial update, e.g. `{"defaultDeliveryRate": 7}`. Admin only. An open
/// day keeps the rules it was opened with until `day:open` runs again.
pub fn settings_update_business(arg0: Option<Value>, state: &AppState) -> Result<Value, String> {
    require_role(state, &[Role::Admin], "change business rules")?;
    let patch = arg0.ok_or("Missing business rules payload")?;
    let conn = state.store.db().conn.lock().map_err(|e| e.to_string())?;
    let current = crate::config::BusinessRules::load(&conn);
    let next = current.apply_patch(&patch)?;
    next.save(&conn)?;
    serde_json::to_value(next).map_err(|e| e.to_string())
}

pub fn settings_set_pin(arg0: Option<Value>, state: &AppState) -> Result<Value, String> {
    let payload: SetPinPayload = parse_payload(arg0, "PIN")?;
    let session = auth::require_session(&state.auth)?;
    auth::set_pin(&session, state.store.db(), payload.role, payload.pin.trim())?;
    Ok(json!({ "success": true }))
}
