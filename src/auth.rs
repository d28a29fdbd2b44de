//! PIN-based local authentication with bcrypt, and the explicit session
//! every ledger operation receives.
//!
//! Admin and cashier log in with a shared PIN whose bcrypt hash lives in
//! `local_settings` (category "auth", keys "admin_pin_hash" /
//! "cashier_pin_hash"). Employees log in by their roster id. There is one
//! active session per process; logging in replaces it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::{self, DbState};
use crate::error::{PosError, PosResult};
use crate::roster;
use crate::store::DocumentStore;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const AUTH_CATEGORY: &str = "auth";
const ADMIN_PIN_KEY: &str = "admin_pin_hash";
const CASHIER_PIN_KEY: &str = "cashier_pin_hash";

/// PINs installed on first start.
const DEFAULT_ADMIN_PIN: &str = "1234";
const DEFAULT_CASHIER_PIN: &str = "0000";

#[cfg(not(test))]
const PIN_HASH_COST: u32 = bcrypt::DEFAULT_COST;
#[cfg(test)]
const PIN_HASH_COST: u32 = 4;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Cashier,
    Employee,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Cashier => "cashier",
            Role::Employee => "employee",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who is acting. `session_id` doubles as the `closedBy` audit identity.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub session_id: String,
    pub role: Role,
    /// Set only for employee sessions.
    pub employee_id: Option<String>,
    pub login_time: DateTime<Utc>,
}

impl Session {
    fn new(role: Role, employee_id: Option<String>) -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            role,
            employee_id,
            login_time: Utc::now(),
        }
    }

    /// Fail with `Unauthorized` unless the session role is in `allowed`.
    pub fn require_role(&self, allowed: &[Role], action: &str) -> PosResult<()> {
        if allowed.contains(&self.role) {
            return Ok(());
        }
        warn!(role = %self.role, action, "Action refused for role");
        Err(PosError::Unauthorized(format!(
            "The {} profile cannot {action}",
            self.role
        )))
    }

    /// The logged-in employee's own id.
    pub fn own_employee_id(&self) -> PosResult<&str> {
        match (self.role, self.employee_id.as_deref()) {
            (Role::Employee, Some(id)) => Ok(id),
            _ => Err(PosError::Unauthorized(
                "Only an employee can record their own consumption".into(),
            )),
        }
    }

    pub fn to_json(&self) -> Value {
        json!({
            "sessionId": self.session_id,
            "role": self.role,
            "employeeId": self.employee_id,
            "loginTime": self.login_time.to_rfc3339(),
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum LoginRequest {
    Admin {
        pin: String,
    },
    Cashier {
        pin: String,
    },
    Employee {
        #[serde(alias = "employeeId", alias = "id")]
        employee_id: String,
    },
}

/// Holds the current session in place of ambient browser storage.
#[derive(Default)]
pub struct AuthState {
    current: Mutex<Option<Session>>,
}

impl AuthState {
    pub fn new() -> Self {
        Self::default()
    }
}

// ---------------------------------------------------------------------------
// PIN storage
// ---------------------------------------------------------------------------

fn pin_key(role: Role) -> PosResult<&'static str> {
    match role {
        Role::Admin => Ok(ADMIN_PIN_KEY),
        Role::Cashier => Ok(CASHIER_PIN_KEY),
        Role::Employee => Err(PosError::Validation(
            "Employees log in by id, not PIN".into(),
        )),
    }
}

fn store_pin_hash(conn: &rusqlite::Connection, key: &str, pin: &str) -> PosResult<()> {
    let hash = bcrypt::hash(pin, PIN_HASH_COST)
        .map_err(|e| PosError::settings(format!("Failed to hash PIN: {e}")))?;
    db::set_setting(conn, AUTH_CATEGORY, key, &hash).map_err(PosError::settings)
}

/// Install the default PINs for any role that has none yet.
pub fn seed_default_pins(db: &DbState) -> PosResult<()> {
    let conn = db
        .conn
        .lock()
        .map_err(|e| PosError::settings(e.to_string()))?;
    for (key, pin) in [
        (ADMIN_PIN_KEY, DEFAULT_ADMIN_PIN),
        (CASHIER_PIN_KEY, DEFAULT_CASHIER_PIN),
    ] {
        if db::get_setting(&conn, AUTH_CATEGORY, key).is_none() {
            store_pin_hash(&conn, key, pin)?;
            info!(key, "Default PIN installed");
        }
    }
    Ok(())
}

fn verify_pin(db: &DbState, role: Role, pin: &str) -> PosResult<bool> {
    let key = pin_key(role)?;
    let hash = {
        let conn = db
            .conn
            .lock()
            .map_err(|e| PosError::settings(e.to_string()))?;
        db::get_setting(&conn, AUTH_CATEGORY, key)
    };
    Ok(match hash {
        Some(hash) => bcrypt::verify(pin, &hash).unwrap_or(false),
        None => false,
    })
}

// ---------------------------------------------------------------------------
// Session lifecycle
// ---------------------------------------------------------------------------

/// Start a session. Replaces whatever session was active.
pub fn login<S: DocumentStore>(
    request: LoginRequest,
    db: &DbState,
    store: &S,
    auth: &AuthState,
) -> PosResult<Session> {
    let session = match request {
        LoginRequest::Admin { pin } => pin_session(db, Role::Admin, &pin)?,
        LoginRequest::Cashier { pin } => pin_session(db, Role::Cashier, &pin)?,
        LoginRequest::Employee { employee_id } => {
            let id = employee_id.trim();
            if id.is_empty() || roster::find_employee(store, id)?.is_none() {
                warn!(employee_id = %id, "Employee login rejected");
                return Err(PosError::Unauthorized("Invalid employee ID".into()));
            }
            Session::new(Role::Employee, Some(id.to_string()))
        }
    };

    info!(
        session_id = %session.session_id,
        role = %session.role,
        employee_id = ?session.employee_id,
        "Login successful"
    );
    let mut current = auth.current.lock().unwrap_or_else(|e| e.into_inner());
    *current = Some(session.clone());
    Ok(session)
}

fn pin_session(db: &DbState, role: Role, pin: &str) -> PosResult<Session> {
    if !verify_pin(db, role, pin)? {
        warn!(role = %role, "Login rejected: incorrect PIN");
        return Err(PosError::Unauthorized("Incorrect PIN".into()));
    }
    Ok(Session::new(role, None))
}

/// End the current session, returning it if there was one.
pub fn logout(auth: &AuthState) -> Option<Session> {
    let mut current = auth.current.lock().unwrap_or_else(|e| e.into_inner());
    let ended = current.take();
    if let Some(ref s) = ended {
        info!(session_id = %s.session_id, role = %s.role, "Logged out");
    }
    ended
}

pub fn current_session(auth: &AuthState) -> Option<Session> {
    auth.current
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .clone()
}

pub fn require_session(auth: &AuthState) -> PosResult<Session> {
    current_session(auth).ok_or_else(|| PosError::Unauthorized("Not logged in".into()))
}

/// Replace the PIN for `role`. Admin only; at least 4 digits.
pub fn set_pin(session: &Session, db: &DbState, role: Role, pin: &str) -> PosResult<()> {
    session.require_role(&[Role::Admin], "change PINs")?;
    let key = pin_key(role)?;
    if pin.len() < 4 {
        return Err(PosError::Validation("PIN must be at least 4 digits".into()));
    }
    if !pin.chars().all(|c| c.is_ascii_digit()) {
        return Err(PosError::Validation("PIN must contain only digits".into()));
    }
    let conn = db
        .conn
        .lock()
        .map_err(|e| PosError::settings(e.to_string()))?;
    store_pin_hash(&conn, key, pin)?;
    info!(role = %role, "PIN changed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{test_store, SqliteDocumentStore};

    fn setup() -> (SqliteDocumentStore, AuthState) {
        let store = test_store();
        seed_default_pins(store.db()).unwrap();
        (store, AuthState::new())
    }

    fn admin_login(store: &SqliteDocumentStore, auth: &AuthState) -> Session {
        login(
            LoginRequest::Admin { pin: "1234".into() },
            store.db(),
            store,
            auth,
        )
        .unwrap()
    }

    #[test]
    fn default_pins_log_in_and_wrong_pin_fails() {
        let (store, auth) = setup();
        let admin = admin_login(&store, &auth);
        assert_eq!(admin.role, Role::Admin);
        assert_eq!(current_session(&auth), Some(admin));

        let cashier = login(
            LoginRequest::Cashier { pin: "0000".into() },
            store.db(),
            &store,
            &auth,
        )
        .unwrap();
        assert_eq!(cashier.role, Role::Cashier);

        let err = login(
            LoginRequest::Cashier { pin: "1234".into() },
            store.db(),
            &store,
            &auth,
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "Incorrect PIN");
        // A failed login leaves the previous session in place
        assert_eq!(current_session(&auth).unwrap().role, Role::Cashier);
    }

    #[test]
    fn seeding_keeps_changed_pins() {
        let (store, auth) = setup();
        let admin = admin_login(&store, &auth);
        set_pin(&admin, store.db(), Role::Cashier, "4321").unwrap();
        seed_default_pins(store.db()).unwrap();

        assert!(verify_pin(store.db(), Role::Cashier, "4321").unwrap());
        assert!(!verify_pin(store.db(), Role::Cashier, "0000").unwrap());
    }

    #[test]
    fn employee_login_needs_roster_entry() {
        let (store, auth) = setup();
        let admin = admin_login(&store, &auth);
        let emp = roster::create_employee(&store, &admin, "Ana", false, 60.0).unwrap();

        let session = login(
            LoginRequest::Employee {
                employee_id: emp.id.clone(),
            },
            store.db(),
            &store,
            &auth,
        )
        .unwrap();
        assert_eq!(session.own_employee_id().unwrap(), emp.id);

        let err = login(
            LoginRequest::Employee {
                employee_id: "nobody".into(),
            },
            store.db(),
            &store,
            &auth,
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "Invalid employee ID");
    }

    #[test]
    fn logout_clears_session() {
        let (store, auth) = setup();
        admin_login(&store, &auth);
        assert!(logout(&auth).is_some());
        assert!(current_session(&auth).is_none());
        assert!(logout(&auth).is_none());
        assert!(matches!(
            require_session(&auth),
            Err(PosError::Unauthorized(_))
        ));
    }

    #[test]
    fn set_pin_rules() {
        let (store, auth) = setup();
        let admin = admin_login(&store, &auth);
        assert!(matches!(
            set_pin(&admin, store.db(), Role::Admin, "12"),
            Err(PosError::Validation(_))
        ));
        assert!(matches!(
            set_pin(&admin, store.db(), Role::Admin, "12ab"),
            Err(PosError::Validation(_))
        ));
        assert!(matches!(
            set_pin(&admin, store.db(), Role::Employee, "1234"),
            Err(PosError::Validation(_))
        ));

        let cashier = Session::new(Role::Cashier, None);
        assert!(matches!(
            set_pin(&cashier, store.db(), Role::Cashier, "5555"),
            Err(PosError::Unauthorized(_))
        ));
    }

    #[test]
    fn login_request_parses_tagged_json() {
        let req: LoginRequest =
            serde_json::from_value(json!({ "role": "employee", "employeeId": "e1" })).unwrap();
        assert!(matches!(req, LoginRequest::Employee { employee_id } if employee_id == "e1"));
        let req: LoginRequest =
            serde_json::from_value(json!({ "role": "admin", "pin": "1234" })).unwrap();
        assert!(matches!(req, LoginRequest::Admin { .. }));
    }

    #[test]
    fn role_checks() {
        let cashier = Session::new(Role::Cashier, None);
        assert!(cashier
            .require_role(&[Role::Admin, Role::Cashier], "finalize")
            .is_ok());
        assert!(cashier.require_role(&[Role::Admin], "add employees").is_err());
        assert!(cashier.own_employee_id().is_err());
    }
}
