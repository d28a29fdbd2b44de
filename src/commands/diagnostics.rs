use serde_json::Value;

use crate::{auth, diagnostics, AppState};

pub fn system_status(state: &AppState) -> Result<Value, String> {
    let mut status = diagnostics::get_status(state.store.db(), &state.config.log_dir)?;
    status["session"] = auth::current_session(&state.auth)
        .map(|s| s.to_json())
        .unwrap_or(Value::Null);
    status["openDay"] = state
        .day()
        .as_ref()
        .map(|day| Value::String(day.date().to_string()))
        .unwrap_or(Value::Null);
    Ok(status)
}
