use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::auth::{self, Role};
use crate::commands::{parse_payload, require_role};
use crate::models::Employee;
use crate::roster;
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateEmployeePayload {
    #[serde(default, alias = "nome")]
    name: String,
    #[serde(default, alias = "is_delivery", alias = "delivery")]
    is_delivery: bool,
}

/// Employee body plus its id and short id.
pub(crate) fn employee_json(emp: &Employee) -> Value {
    json!({
        "id": emp.id,
        "shortId": emp.short_id(),
        "name": emp.name,
        "isDelivery": emp.is_delivery,
        "credit": emp.credit,
        "salaryBase": emp.salary_base,
        "createdAt": emp.created_at,
    })
}

pub fn employees_create(arg0: Option<Value>, state: &AppState) -> Result<Value, String> {
    let session = auth::require_session(&state.auth)?;
    let payload: CreateEmployeePayload = parse_payload(arg0, "employee")?;
    let rules = state.rules()?;
    let emp = roster::create_employee(
        &state.store,
        &session,
        &payload.name,
        payload.is_delivery,
        rules.daily_salary,
    )?;
    Ok(json!({
        "success": true,
        "employee": employee_json(&emp),
        "message": format!("{} added (ID {})", emp.name, emp.short_id()),
    }))
}

pub fn employees_list(state: &AppState) -> Result<Value, String> {
    require_role(state, &[Role::Admin, Role::Cashier], "list employees")?;
    let employees = roster::list_employees(&state.store)?;
    debug!(count = employees.len(), "Employees listed");
    Ok(json!({
        "employees": employees.iter().map(employee_json).collect::<Vec<_>>(),
    }))
}
