use serde_json::{json, Value};

use crate::auth::{self, LoginRequest};
use crate::AppState;

/// Accepts `{"role": "admin"|"cashier", "pin"}` or
/// `{"role": "employee", "employeeId"}`.
pub fn auth_login(arg0: Option<Value>, state: &AppState) -> Result<Value, String> {
    let payload = arg0.ok_or("Missing login argument")?;
    let request: LoginRequest =
        serde_json::from_value(payload).map_err(|e| format!("Invalid login payload: {e}"))?;
    let session = auth::login(request, state.store.db(), &state.store, &state.auth)?;
    Ok(session.to_json())
}

/// Ends the session and drops the open day with any unsaved edits.
pub fn auth_logout(state: &AppState) -> Result<Value, String> {
    let ended = auth::logout(&state.auth);
    *state.day() = None;
    Ok(json!({ "success": true, "hadSession": ended.is_some() }))
}

pub fn auth_current(state: &AppState) -> Value {
    match auth::current_session(&state.auth) {
        Some(s) => s.to_json(),
        None => Value::Null,
    }
}
