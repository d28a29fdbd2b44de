//! The cashier's working set for one date: the closing draft, the work log
//! draft and the roster, each fed by a live subscription.
//!
//! Remote snapshots are pulled in with [`DayBook::sync_remote`]; local
//! edits survive them through the drafts' dirty tracking.

use chrono::NaiveDate;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::auth::Session;
use crate::closing::{
    compute_totals, consumption_limits, finalize_closing, ClosingDraft, ConsumptionLimit,
    DerivedTotals, FinalizeOutcome, FinalizeRequest,
};
use crate::config::BusinessRules;
use crate::error::PosResult;
use crate::models::{DailyClosing, WorkLog};
use crate::roster::Roster;
use crate::store::{DocPath, Document, DocumentStore, Subscription, EMPLOYEES};
use crate::work_log::WorkLogDraft;

pub struct DayBook {
    date: NaiveDate,
    rules: BusinessRules,
    closing: ClosingDraft,
    work_log: WorkLogDraft,
    roster: Roster,
    closing_sub: Subscription<Option<Document>>,
    work_log_sub: Subscription<Option<Document>>,
    roster_sub: Subscription<Vec<Document>>,
}

impl DayBook {
    /// Subscribe to the date's documents and the roster and build clean drafts.
    pub fn open<S: DocumentStore>(
        store: &S,
        date: NaiveDate,
        rules: BusinessRules,
    ) -> PosResult<Self> {
        let closing_sub = store.watch_document(&DocPath::closing(date))?;
        let work_log_sub = store.watch_document(&DocPath::work_log(date))?;
        let roster_sub = store.watch_collection(EMPLOYEES)?;

        let remote_closing = decode_closing(closing_sub.current().as_ref());
        let closing = ClosingDraft::new(date, rules, remote_closing.as_ref());
        let remote_log = WorkLog::from_document(work_log_sub.current().as_ref())?;
        let work_log = WorkLogDraft::new(date, remote_log);
        let roster = Roster::from_documents(&roster_sub.current());

        info!(
            date = %date,
            employees = roster.len(),
            present = work_log.log().employees.len(),
            "Day opened"
        );
        Ok(Self {
            date,
            rules,
            closing,
            work_log,
            roster,
            closing_sub,
            work_log_sub,
            roster_sub,
        })
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn rules(&self) -> &BusinessRules {
        &self.rules
    }

    pub fn closing(&self) -> &ClosingDraft {
        &self.closing
    }

    pub fn closing_mut(&mut self) -> &mut ClosingDraft {
        &mut self.closing
    }

    pub fn work_log(&self) -> &WorkLogDraft {
        &self.work_log
    }

    pub fn work_log_mut(&mut self) -> &mut WorkLogDraft {
        &mut self.work_log
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    /// Merge any snapshots published since the last call. Returns whether
    /// anything arrived.
    pub fn sync_remote(&mut self) -> bool {
        let mut changed = false;

        if let Some(snapshot) = self.closing_sub.poll_change() {
            self.closing.apply_remote(decode_closing(snapshot.as_ref()).as_ref());
            changed = true;
        }
        if let Some(snapshot) = self.work_log_sub.poll_change() {
            match WorkLog::from_document(snapshot.as_ref()) {
                Ok(remote) => self.work_log.apply_remote(&remote),
                Err(e) => {
                    warn!(date = %self.date, error = %e, "Ignoring unreadable work log snapshot")
                }
            }
            changed = true;
        }
        if let Some(docs) = self.roster_sub.poll_change() {
            self.roster = Roster::from_documents(&docs);
            changed = true;
        }

        if changed {
            debug!(date = %self.date, "Remote changes merged");
        }
        changed
    }

    pub fn totals(&self) -> DerivedTotals {
        compute_totals(self.closing.inputs(), self.work_log.log(), &self.roster)
    }

    pub fn consumption_limits(&self) -> Vec<ConsumptionLimit> {
        consumption_limits(
            self.work_log.log(),
            &self.roster,
            self.rules.daily_consumption_credit,
        )
    }

    /// Finalize with the current drafts. On success both drafts are marked
    /// clean and the committed documents are merged back in.
    pub fn finalize<S: DocumentStore>(
        &mut self,
        store: &S,
        session: &Session,
        allow_refinalize: bool,
    ) -> PosResult<FinalizeOutcome> {
        let outcome = finalize_closing(
            store,
            session,
            &self.rules,
            FinalizeRequest {
                date: self.date,
                inputs: self.closing.inputs(),
                work_log: self.work_log.log(),
                allow_refinalize,
            },
        )?;
        self.closing.mark_clean();
        self.work_log.mark_clean();
        self.sync_remote();
        Ok(outcome)
    }

    pub fn state_json(&self) -> Value {
        let dirty: Vec<_> = self.closing.dirty_fields().collect();
        let employees: Vec<Value> = self
            .roster
            .iter()
            .map(|emp| {
                let entry = self.work_log.log().entry(&emp.id);
                json!({
                    "id": emp.id,
                    "shortId": emp.short_id(),
                    "name": emp.name,
                    "isDelivery": emp.is_delivery,
                    "credit": emp.credit,
                    "present": entry.is_some(),
                    "deliveries": entry.map(|e| e.deliveries),
                    "consumption": entry.map(|e| e.consumption),
                })
            })
            .collect();
        json!({
            "date": self.date,
            "closing": self.closing.inputs(),
            "dirtyFields": dirty,
            "workLogDirty": self.work_log.is_dirty(),
            "closedBy": self.closing.closed_by(),
            "closedAt": self.closing.closed_at(),
            "employees": employees,
            "totals": self.totals(),
            "consumptionLimits": self.consumption_limits(),
        })
    }
}

fn decode_closing(doc: Option<&Document>) -> Option<DailyClosing> {
    let doc = doc?;
    match doc.decode::<DailyClosing>() {
        Ok(closing) => Some(closing),
        Err(e) => {
            warn!(path = %doc.path, error = %e, "Ignoring unreadable closing document");
            None
        }
    }
}
