//! Work log aggregate: who is present on a date, with their delivery count
//! and consumption.
//!
//! All edits are in memory. The log reaches the store only as part of the
//! closing finalization transaction.

use chrono::NaiveDate;
use serde_json::Value;
use std::collections::{BTreeSet, HashSet};
use tracing::{debug, warn};

use crate::models::{WorkLog, WorkLogEntry};
use crate::money::{parse_count, parse_non_negative_amount};
use crate::store::{Document, StoreResult};

impl WorkLog {
    /// Decode a stored log. A missing document is an empty log; duplicate
    /// entries for one employee keep the first.
    pub fn from_document(doc: Option<&Document>) -> StoreResult<Self> {
        let Some(doc) = doc else {
            return Ok(Self::default());
        };
        let mut log: WorkLog = doc.decode()?;
        let mut seen = HashSet::new();
        log.employees.retain(|entry| {
            let first = seen.insert(entry.id.clone());
            if !first {
                warn!(path = %doc.path, employee_id = %entry.id, "Dropping duplicate work log entry");
            }
            first
        });
        Ok(log)
    }

    pub fn entry(&self, employee_id: &str) -> Option<&WorkLogEntry> {
        self.employees.iter().find(|e| e.id == employee_id)
    }

    fn entry_mut(&mut self, employee_id: &str) -> Option<&mut WorkLogEntry> {
        self.employees.iter_mut().find(|e| e.id == employee_id)
    }

    pub fn is_present(&self, employee_id: &str) -> bool {
        self.entry(employee_id).is_some()
    }

    /// Marking present keeps an existing entry as is or adds a zeroed one.
    /// Unmarking drops the entry with its deliveries and consumption.
    pub fn mark_attendance(&mut self, employee_id: &str, present: bool) {
        if present {
            if !self.is_present(employee_id) {
                self.employees.push(WorkLogEntry::new(employee_id));
            }
        } else {
            self.employees.retain(|e| e.id != employee_id);
        }
    }

    /// Returns false (and changes nothing) when the employee is absent.
    pub fn set_deliveries(&mut self, employee_id: &str, count: &Value) -> bool {
        match self.entry_mut(employee_id) {
            Some(entry) => {
                entry.deliveries = parse_count(count);
                true
            }
            None => false,
        }
    }

    /// Negative amounts are stored as 0. Returns false (and changes
    /// nothing) when the employee is absent.
    pub fn set_consumption(&mut self, employee_id: &str, amount: &Value) -> bool {
        match self.entry_mut(employee_id) {
            Some(entry) => {
                entry.consumption = parse_non_negative_amount(amount);
                true
            }
            None => false,
        }
    }
}

/// The cashier's working copy of one date's log.
///
/// Employees touched locally are listed in `edited`; remote snapshots never
/// overwrite them until the draft is marked clean.
#[derive(Debug, Clone)]
pub struct WorkLogDraft {
    date: NaiveDate,
    log: WorkLog,
    edited: BTreeSet<String>,
}

impl WorkLogDraft {
    pub fn new(date: NaiveDate, log: WorkLog) -> Self {
        Self {
            date,
            log,
            edited: BTreeSet::new(),
        }
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn log(&self) -> &WorkLog {
        &self.log
    }

    pub fn is_dirty(&self) -> bool {
        !self.edited.is_empty()
    }

    pub fn mark_attendance(&mut self, employee_id: &str, present: bool) {
        self.log.mark_attendance(employee_id, present);
        self.edited.insert(employee_id.to_string());
    }

    pub fn set_deliveries(&mut self, employee_id: &str, count: &Value) -> bool {
        let applied = self.log.set_deliveries(employee_id, count);
        if applied {
            self.edited.insert(employee_id.to_string());
        }
        applied
    }

    pub fn set_consumption(&mut self, employee_id: &str, amount: &Value) -> bool {
        let applied = self.log.set_consumption(employee_id, amount);
        if applied {
            self.edited.insert(employee_id.to_string());
        }
        applied
    }

    /// Merge a remote snapshot: untouched employees follow the remote,
    /// edited ones keep their local presence and values.
    pub fn apply_remote(&mut self, remote: &WorkLog) {
        let mut merged: Vec<WorkLogEntry> = remote
            .employees
            .iter()
            .filter(|e| !self.edited.contains(&e.id))
            .cloned()
            .collect();
        merged.extend(
            self.log
                .employees
                .iter()
                .filter(|e| self.edited.contains(&e.id))
                .cloned(),
        );
        debug!(
            date = %self.date,
            remote = remote.employees.len(),
            kept_local = self.edited.len(),
            "Work log snapshot merged"
        );
        self.log.employees = merged;
    }

    pub fn mark_clean(&mut self) {
        self.edited.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::DocPath;
    use serde_json::json;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
    }

    #[test]
    fn attendance_adds_keeps_and_removes() {
        let mut log = WorkLog::default();
        log.mark_attendance("e1", true);
        assert_eq!(log.entry("e1"), Some(&WorkLogEntry::new("e1")));

        log.set_deliveries("e1", &json!(3));
        log.set_consumption("e1", &json!("7.5"));
        log.mark_attendance("e1", true);
        assert_eq!(log.employees.len(), 1);
        assert_eq!(log.entry("e1").unwrap().deliveries, 3);

        log.mark_attendance("e1", false);
        assert!(log.employees.is_empty());

        // Re-marking starts from zero again
        log.mark_attendance("e1", true);
        assert_eq!(log.entry("e1").unwrap().consumption, 0.0);
    }

    #[test]
    fn edits_on_absent_employee_are_noops() {
        let mut log = WorkLog::default();
        assert!(!log.set_deliveries("ghost", &json!(2)));
        assert!(!log.set_consumption("ghost", &json!(2)));
        assert!(log.employees.is_empty());
    }

    #[test]
    fn invalid_input_coerces_to_zero() {
        let mut log = WorkLog::default();
        log.mark_attendance("e1", true);
        log.set_deliveries("e1", &json!("lots"));
        log.set_consumption("e1", &json!("??"));
        let e = log.entry("e1").unwrap();
        assert_eq!(e.deliveries, 0);
        assert_eq!(e.consumption, 0.0);

        log.set_deliveries("e1", &json!(-4));
        assert_eq!(log.entry("e1").unwrap().deliveries, 0);
    }

    #[test]
    fn negative_consumption_is_stored_as_zero() {
        let mut log = WorkLog::default();
        log.mark_attendance("e1", true);
        assert!(log.set_consumption("e1", &json!("-50")));
        assert_eq!(log.entry("e1").unwrap().consumption, 0.0);

        let doc = Document {
            path: DocPath::work_log(date()),
            data: json!({ "employees": [{ "id": "e2", "deliveries": 1, "consumption": -12 }] }),
        };
        let loaded = WorkLog::from_document(Some(&doc)).unwrap();
        assert_eq!(loaded.entry("e2").unwrap().consumption, 0.0);
    }

    #[test]
    fn stored_duplicates_are_dropped() {
        let doc = Document {
            path: DocPath::work_log(date()),
            data: json!({ "employees": [
                { "id": "e1", "deliveries": 1 },
                { "id": "e1", "deliveries": 9 },
                { "id": "e2" }
            ]}),
        };
        let log = WorkLog::from_document(Some(&doc)).unwrap();
        assert_eq!(log.employees.len(), 2);
        assert_eq!(log.entry("e1").unwrap().deliveries, 1);
        assert_eq!(WorkLog::from_document(None).unwrap(), WorkLog::default());
    }

    #[test]
    fn draft_merge_keeps_local_edits() {
        let mut remote = WorkLog::default();
        remote.mark_attendance("e1", true);
        remote.mark_attendance("e2", true);

        let mut draft = WorkLogDraft::new(date(), remote.clone());
        draft.set_consumption("e1", &json!(4));
        draft.mark_attendance("e2", false);
        assert!(draft.is_dirty());

        // Another terminal changes every entry and adds e3
        let mut incoming = WorkLog::default();
        incoming.mark_attendance("e1", true);
        incoming.set_consumption("e1", &json!(99));
        incoming.mark_attendance("e2", true);
        incoming.set_deliveries("e2", &json!(5));
        incoming.mark_attendance("e3", true);
        draft.apply_remote(&incoming);

        let log = draft.log();
        assert_eq!(log.entry("e1").unwrap().consumption, 4.0);
        assert!(!log.is_present("e2"), "local unmark survives");
        assert!(log.is_present("e3"));

        draft.mark_clean();
        draft.apply_remote(&incoming);
        assert_eq!(draft.log().entry("e1").unwrap().consumption, 99.0);
        assert!(draft.log().is_present("e2"));
    }
}
