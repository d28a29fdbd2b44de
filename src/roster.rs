//! Employee roster: admin creation, listing and lookup.

use chrono::Utc;
use tracing::{info, warn};

use crate::auth::{Role, Session};
use crate::error::{PosError, PosResult};
use crate::models::Employee;
use crate::store::{DocPath, Document, DocumentStore, StoreResult, EMPLOYEES};

/// Decode an employee document, filling in its id from the key.
pub fn employee_from_document(doc: &Document) -> StoreResult<Employee> {
    let mut emp: Employee = doc.decode()?;
    emp.id = doc.id().to_string();
    Ok(emp)
}

/// Add an employee with zero credit. Admin only.
pub fn create_employee<S: DocumentStore>(
    store: &S,
    session: &Session,
    name: &str,
    is_delivery: bool,
    daily_salary: f64,
) -> PosResult<Employee> {
    session.require_role(&[Role::Admin], "add employees")?;
    let name = name.trim();
    if name.is_empty() {
        return Err(PosError::Validation("Name is required".into()));
    }

    let mut emp = Employee {
        id: String::new(),
        name: name.to_string(),
        is_delivery,
        credit: 0.0,
        salary_base: daily_salary,
        created_at: Some(Utc::now()),
    };
    let body = serde_json::to_value(&emp).map_err(crate::store::StoreError::from)?;
    let path = store.create_with_generated_id(EMPLOYEES, body)?;
    emp.id = path.key().to_string();

    info!(employee_id = %emp.id, name = %emp.name, is_delivery, "Employee created");
    Ok(emp)
}

pub fn list_employees<S: DocumentStore>(store: &S) -> PosResult<Vec<Employee>> {
    Ok(Roster::from_documents(&store.list(EMPLOYEES)?).employees)
}

pub fn find_employee<S: DocumentStore>(store: &S, id: &str) -> PosResult<Option<Employee>> {
    match store.get(&DocPath::employee(id))? {
        Some(doc) => Ok(Some(employee_from_document(&doc)?)),
        None => Ok(None),
    }
}

/// Snapshot of the roster as delivered by a collection read or subscription.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Roster {
    employees: Vec<Employee>,
}

impl Roster {
    /// Documents that fail to decode are logged and left out.
    pub fn from_documents(docs: &[Document]) -> Self {
        let employees = docs
            .iter()
            .filter_map(|doc| match employee_from_document(doc) {
                Ok(emp) => Some(emp),
                Err(e) => {
                    warn!(path = %doc.path, error = %e, "Skipping unreadable employee");
                    None
                }
            })
            .collect();
        Self { employees }
    }

    pub fn get(&self, id: &str) -> Option<&Employee> {
        self.employees.iter().find(|e| e.id == id)
    }

    pub fn delivery(&self) -> impl Iterator<Item = &Employee> {
        self.employees.iter().filter(|e| e.is_delivery)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Employee> {
        self.employees.iter()
    }

    pub fn len(&self) -> usize {
        self.employees.len()
    }

    pub fn is_empty(&self) -> bool {
        self.employees.is_empty()
    }
}

impl From<Vec<Employee>> for Roster {
    fn from(employees: Vec<Employee>) -> Self {
        Self { employees }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_store;
    use serde_json::json;

    fn session(role: Role) -> Session {
        Session {
            session_id: "s1".into(),
            role,
            employee_id: None,
            login_time: Utc::now(),
        }
    }

    #[test]
    fn create_and_find() {
        let store = test_store();
        let emp = create_employee(&store, &session(Role::Admin), "  Ana  ", true, 60.0).unwrap();
        assert_eq!(emp.name, "Ana");
        assert_eq!(emp.credit, 0.0);

        let found = find_employee(&store, &emp.id).unwrap().unwrap();
        assert_eq!(found.id, emp.id);
        assert!(found.is_delivery);
        assert_eq!(found.salary_base, 60.0);
        assert!(found.created_at.is_some());

        let raw = store.get(&DocPath::employee(&emp.id)).unwrap().unwrap();
        assert!(raw.data.get("id").is_none());
        assert_eq!(raw.data["credit"], 0.0);

        assert!(find_employee(&store, "missing").unwrap().is_none());
    }

    #[test]
    fn create_requires_name_and_admin() {
        let store = test_store();
        let err = create_employee(&store, &session(Role::Admin), "   ", false, 60.0).unwrap_err();
        assert_eq!(err.to_string(), "Name is required");

        let err = create_employee(&store, &session(Role::Cashier), "Bia", false, 60.0).unwrap_err();
        assert!(matches!(err, PosError::Unauthorized(_)));
        assert!(list_employees(&store).unwrap().is_empty());
    }

    #[test]
    fn roster_helpers() {
        let store = test_store();
        let admin = session(Role::Admin);
        let a = create_employee(&store, &admin, "Ana", true, 60.0).unwrap();
        create_employee(&store, &admin, "Bia", false, 60.0).unwrap();
        store
            .run_transaction(|tx| tx.set(&DocPath::employee("broken"), json!({ "name": 7 })))
            .unwrap();

        let roster = Roster::from_documents(&store.list(EMPLOYEES).unwrap());
        assert_eq!(roster.len(), 2);
        assert_eq!(roster.get(&a.id).unwrap().name, "Ana");
        let delivery: Vec<_> = roster.delivery().map(|e| e.name.as_str()).collect();
        assert_eq!(delivery, ["Ana"]);
    }
}
