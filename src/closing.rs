//! Daily closing: cash reconciliation, delivery commissions and the
//! finalization transaction that accrues employee credit.
//!
//! Totals are pure functions of the draft inputs, the work log and the
//! roster. Finalizing writes the closing record, the work log and every
//! present employee's new credit in one store transaction.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

use crate::auth::{Role, Session};
use crate::config::BusinessRules;
use crate::error::{PosError, PosResult};
use crate::models::{DailyClosing, ReceiptEntry, WorkLog};
use crate::money::{amount_if_numeric, parse_amount, round_cents};
use crate::roster::{employee_from_document, Roster};
use crate::store::{DocPath, DocumentStore, StoreError};

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// Editable fields of the closing form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ClosingField {
    OpeningBalance,
    ChangeInflow,
    CashOutflow,
    Receipts,
    CountedChange,
    CountedNotes,
    DeliveryRate,
    FixedBonus,
}

impl ClosingField {
    pub const ALL: [ClosingField; 8] = [
        ClosingField::OpeningBalance,
        ClosingField::ChangeInflow,
        ClosingField::CashOutflow,
        ClosingField::Receipts,
        ClosingField::CountedChange,
        ClosingField::CountedNotes,
        ClosingField::DeliveryRate,
        ClosingField::FixedBonus,
    ];

    /// Accepts the camelCase field name or the stored document key.
    pub fn parse(name: &str) -> Option<Self> {
        let field = match name {
            "openingBalance" | "saldoInicial" => ClosingField::OpeningBalance,
            "changeInflow" | "entradaTroco" => ClosingField::ChangeInflow,
            "cashOutflow" | "saidaCaixa" => ClosingField::CashOutflow,
            "receipts" | "entradasRecebimentos" => ClosingField::Receipts,
            "countedChange" | "trocoContado" => ClosingField::CountedChange,
            "countedNotes" | "notasAltasContadas" => ClosingField::CountedNotes,
            "deliveryRate" | "valorEntrega" => ClosingField::DeliveryRate,
            "fixedBonus" | "acrescimoFixo" => ClosingField::FixedBonus,
            _ => return None,
        };
        Some(field)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosingInputs {
    pub opening_balance: f64,
    pub change_inflow: f64,
    pub cash_outflow: f64,
    pub receipts: Vec<ReceiptEntry>,
    pub counted_change: f64,
    pub counted_notes: f64,
    pub delivery_rate: f64,
    pub fixed_bonus: f64,
}

impl ClosingInputs {
    /// Blank form with the configured commission parameters.
    pub fn with_defaults(rules: &BusinessRules) -> Self {
        Self {
            opening_balance: 0.0,
            change_inflow: 0.0,
            cash_outflow: 0.0,
            receipts: Vec::new(),
            counted_change: 0.0,
            counted_notes: 0.0,
            delivery_rate: rules.default_delivery_rate,
            fixed_bonus: rules.default_fixed_bonus,
        }
    }

    pub fn from_closing(closing: &DailyClosing, rules: &BusinessRules) -> Self {
        Self {
            opening_balance: closing.opening_balance,
            change_inflow: closing.change_inflow,
            cash_outflow: closing.cash_outflow,
            receipts: closing.receipts.clone(),
            counted_change: closing.counted_change,
            counted_notes: closing.counted_notes,
            delivery_rate: closing.delivery_rate.unwrap_or(rules.default_delivery_rate),
            fixed_bonus: closing.fixed_bonus.unwrap_or(rules.default_fixed_bonus),
        }
    }

    fn copy_field(&mut self, field: ClosingField, from: &ClosingInputs) {
        match field {
            ClosingField::OpeningBalance => self.opening_balance = from.opening_balance,
            ClosingField::ChangeInflow => self.change_inflow = from.change_inflow,
            ClosingField::CashOutflow => self.cash_outflow = from.cash_outflow,
            ClosingField::Receipts => self.receipts = from.receipts.clone(),
            ClosingField::CountedChange => self.counted_change = from.counted_change,
            ClosingField::CountedNotes => self.counted_notes = from.counted_notes,
            ClosingField::DeliveryRate => self.delivery_rate = from.delivery_rate,
            ClosingField::FixedBonus => self.fixed_bonus = from.fixed_bonus,
        }
    }
}

// ---------------------------------------------------------------------------
// Derived totals
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CashTotals {
    pub receipts_total: f64,
    pub counted_total: f64,
    /// Expected cash: opening + change inflow + receipts - outflow.
    pub subtotal: f64,
    /// Counted minus expected. Positive means surplus.
    pub cash_difference: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Commission {
    pub employee_id: String,
    pub name: String,
    pub deliveries: u32,
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedTotals {
    #[serde(flatten)]
    pub cash: CashTotals,
    pub commissions: Vec<Commission>,
    pub commissions_total: f64,
}

pub fn receipts_total(receipts: &[ReceiptEntry]) -> f64 {
    receipts.iter().map(|r| finite_or_zero(r.amount)).sum()
}

fn finite_or_zero(v: f64) -> f64 {
    if v.is_finite() {
        v
    } else {
        0.0
    }
}

pub fn cash_totals(inputs: &ClosingInputs) -> CashTotals {
    let receipts_total = receipts_total(&inputs.receipts);
    let counted_total = finite_or_zero(inputs.counted_change) + finite_or_zero(inputs.counted_notes);
    let subtotal = finite_or_zero(inputs.opening_balance)
        + finite_or_zero(inputs.change_inflow)
        + receipts_total
        - finite_or_zero(inputs.cash_outflow);
    CashTotals {
        receipts_total,
        counted_total,
        subtotal,
        cash_difference: counted_total - subtotal,
    }
}

/// `deliveries * rate`, plus the bonus once there is at least one delivery.
pub fn commission(deliveries: u32, rate: f64, bonus: f64) -> f64 {
    if deliveries == 0 {
        return 0.0;
    }
    f64::from(deliveries) * rate + bonus
}

/// One line per delivery employee on the roster, present or not.
pub fn compute_commissions(roster: &Roster, log: &WorkLog, rate: f64, bonus: f64) -> Vec<Commission> {
    roster
        .delivery()
        .map(|emp| {
            let deliveries = log.entry(&emp.id).map_or(0, |e| e.deliveries);
            Commission {
                employee_id: emp.id.clone(),
                name: emp.name.clone(),
                deliveries,
                amount: commission(deliveries, rate, bonus),
            }
        })
        .collect()
}

pub fn compute_totals(inputs: &ClosingInputs, log: &WorkLog, roster: &Roster) -> DerivedTotals {
    let commissions =
        compute_commissions(roster, log, inputs.delivery_rate, inputs.fixed_bonus);
    let commissions_total = commissions.iter().map(|c| c.amount).sum();
    DerivedTotals {
        cash: cash_totals(inputs),
        commissions,
        commissions_total,
    }
}

/// Consumption headroom for one present employee on the closing screen.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumptionLimit {
    pub employee_id: String,
    pub name: String,
    pub credit: f64,
    /// Stored credit plus today's accrual.
    pub limit: f64,
    pub consumption: f64,
    pub remaining: f64,
    /// How far consumption went past the limit, or 0.
    pub excess: f64,
}

/// Present employees missing from the roster are left out.
pub fn consumption_limits(log: &WorkLog, roster: &Roster, daily_credit: f64) -> Vec<ConsumptionLimit> {
    log.employees
        .iter()
        .filter_map(|entry| {
            let emp = roster.get(&entry.id)?;
            let limit = emp.credit + daily_credit;
            let remaining = limit - entry.consumption;
            Some(ConsumptionLimit {
                employee_id: emp.id.clone(),
                name: emp.name.clone(),
                credit: emp.credit,
                limit,
                consumption: entry.consumption,
                remaining,
                excess: if remaining < 0.0 { -remaining } else { 0.0 },
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Draft with dirty-field merge
// ---------------------------------------------------------------------------

/// The cashier's working copy of a closing form.
///
/// Local edits mark their field dirty. Remote snapshots only replace clean
/// fields, so a value being typed is never clobbered by a push from another
/// terminal.
#[derive(Debug, Clone)]
pub struct ClosingDraft {
    date: NaiveDate,
    rules: BusinessRules,
    inputs: ClosingInputs,
    dirty: BTreeSet<ClosingField>,
    closed_by: Option<String>,
    closed_at: Option<DateTime<Utc>>,
}

impl ClosingDraft {
    pub fn new(date: NaiveDate, rules: BusinessRules, remote: Option<&DailyClosing>) -> Self {
        let mut draft = Self {
            date,
            rules,
            inputs: ClosingInputs::with_defaults(&rules),
            dirty: BTreeSet::new(),
            closed_by: None,
            closed_at: None,
        };
        draft.apply_remote(remote);
        draft
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn inputs(&self) -> &ClosingInputs {
        &self.inputs
    }

    pub fn dirty_fields(&self) -> impl Iterator<Item = ClosingField> + '_ {
        self.dirty.iter().copied()
    }

    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    pub fn closed_at(&self) -> Option<DateTime<Utc>> {
        self.closed_at
    }

    pub fn closed_by(&self) -> Option<&str> {
        self.closed_by.as_deref()
    }

    /// Set one field from raw form input and mark it dirty.
    pub fn set_field(&mut self, field: ClosingField, raw: &Value) -> PosResult<()> {
        match field {
            ClosingField::OpeningBalance => self.inputs.opening_balance = parse_amount(raw),
            ClosingField::ChangeInflow => self.inputs.change_inflow = parse_amount(raw),
            ClosingField::CashOutflow => self.inputs.cash_outflow = parse_amount(raw),
            ClosingField::CountedChange => self.inputs.counted_change = parse_amount(raw),
            ClosingField::CountedNotes => self.inputs.counted_notes = parse_amount(raw),
            ClosingField::DeliveryRate => {
                self.inputs.delivery_rate =
                    amount_if_numeric(raw).unwrap_or(self.rules.default_delivery_rate)
            }
            ClosingField::FixedBonus => {
                self.inputs.fixed_bonus =
                    amount_if_numeric(raw).unwrap_or(self.rules.default_fixed_bonus)
            }
            ClosingField::Receipts => {
                let receipts: Vec<ReceiptEntry> = match raw {
                    Value::Null => Vec::new(),
                    Value::Array(items) => items.iter().map(receipt_from_value).collect(),
                    _ => {
                        return Err(PosError::Validation(
                            "Receipts must be a list of {name, amount}".into(),
                        ))
                    }
                };
                self.inputs.receipts = receipts;
            }
        }
        self.dirty.insert(field);
        Ok(())
    }

    /// Append a receipt line and return its position.
    pub fn add_receipt(&mut self, name: &str, amount: &Value) -> usize {
        self.inputs
            .receipts
            .push(ReceiptEntry::new(name.trim(), parse_amount(amount)));
        self.dirty.insert(ClosingField::Receipts);
        self.inputs.receipts.len() - 1
    }

    pub fn update_receipt(
        &mut self,
        index: usize,
        name: Option<&str>,
        amount: Option<&Value>,
    ) -> PosResult<()> {
        let receipt = self
            .inputs
            .receipts
            .get_mut(index)
            .ok_or_else(|| PosError::Validation(format!("No receipt at position {index}")))?;
        if let Some(name) = name {
            receipt.name = name.trim().to_string();
        }
        if let Some(amount) = amount {
            receipt.amount = parse_amount(amount);
        }
        self.dirty.insert(ClosingField::Receipts);
        Ok(())
    }

    pub fn remove_receipt(&mut self, index: usize) -> PosResult<ReceiptEntry> {
        if index >= self.inputs.receipts.len() {
            return Err(PosError::Validation(format!("No receipt at position {index}")));
        }
        self.dirty.insert(ClosingField::Receipts);
        Ok(self.inputs.receipts.remove(index))
    }

    /// Three-way merge of a remote snapshot: clean fields take the remote
    /// value (or the blank-form default when the document is gone), dirty
    /// fields keep the local edit.
    pub fn apply_remote(&mut self, remote: Option<&DailyClosing>) {
        let incoming = match remote {
            Some(closing) => ClosingInputs::from_closing(closing, &self.rules),
            None => ClosingInputs::with_defaults(&self.rules),
        };
        for field in ClosingField::ALL {
            if !self.dirty.contains(&field) {
                self.inputs.copy_field(field, &incoming);
            }
        }
        self.closed_by = remote.and_then(|c| c.closed_by.clone());
        self.closed_at = remote.and_then(|c| c.closed_at);
        debug!(date = %self.date, dirty = self.dirty.len(), "Closing snapshot merged");
    }

    pub fn mark_clean(&mut self) {
        self.dirty.clear();
    }
}

fn receipt_from_value(v: &Value) -> ReceiptEntry {
    let name = v
        .get("name")
        .or_else(|| v.get("nome"))
        .and_then(Value::as_str)
        .unwrap_or_default();
    let amount = v
        .get("amount")
        .or_else(|| v.get("valor"))
        .map(parse_amount)
        .unwrap_or(0.0);
    ReceiptEntry::new(name.trim(), amount)
}

// ---------------------------------------------------------------------------
// Finalization
// ---------------------------------------------------------------------------

pub struct FinalizeRequest<'a> {
    pub date: NaiveDate,
    pub inputs: &'a ClosingInputs,
    pub work_log: &'a WorkLog,
    /// Confirmation to finalize a date that already carries `closedAt`.
    /// Re-finalizing applies the accrual again.
    pub allow_refinalize: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditChange {
    pub employee_id: String,
    pub previous_credit: f64,
    pub consumption: f64,
    pub new_credit: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeOutcome {
    pub date: NaiveDate,
    pub cash_difference: f64,
    pub closed_by: String,
    pub closed_at: DateTime<Utc>,
    pub credited: Vec<CreditChange>,
    /// Work log ids with no employee document; their credit was not touched.
    pub skipped: Vec<String>,
    pub refinalized: bool,
}

/// Finalize the closing for `request.date`.
///
/// In one transaction: refuse if the date is already finalized (unless
/// confirmed), write the closing record and the work log, and set each
/// present employee's credit to `current + daily credit - consumption`.
pub fn finalize_closing<S: DocumentStore>(
    store: &S,
    session: &Session,
    rules: &BusinessRules,
    request: FinalizeRequest<'_>,
) -> PosResult<FinalizeOutcome> {
    session.require_role(&[Role::Admin, Role::Cashier], "finalize the closing")?;

    let date = request.date;
    let cash_difference = round_cents(cash_totals(request.inputs).cash_difference);
    let closed_at = Utc::now();
    let closing = DailyClosing {
        opening_balance: request.inputs.opening_balance,
        change_inflow: request.inputs.change_inflow,
        cash_outflow: request.inputs.cash_outflow,
        receipts: request.inputs.receipts.clone(),
        counted_change: request.inputs.counted_change,
        counted_notes: request.inputs.counted_notes,
        delivery_rate: Some(request.inputs.delivery_rate),
        fixed_bonus: Some(request.inputs.fixed_bonus),
        cash_difference,
        date,
        closed_by: Some(session.session_id.clone()),
        closed_at: Some(closed_at),
    };
    let closing_body = serde_json::to_value(&closing).map_err(StoreError::from)?;
    let log_body = serde_json::to_value(request.work_log).map_err(StoreError::from)?;

    let outcome = store.run_transaction(|tx| -> PosResult<FinalizeOutcome> {
        let closing_path = DocPath::closing(date);
        let already_closed = tx
            .get(&closing_path)?
            .is_some_and(|doc| doc.data.get("closedAt").is_some_and(|v| !v.is_null()));
        if already_closed && !request.allow_refinalize {
            return Err(PosError::AlreadyFinalized(date));
        }

        // Every read happens before the first write.
        let mut credited = Vec::new();
        let mut skipped = Vec::new();
        for entry in &request.work_log.employees {
            let Some(doc) = tx.get(&DocPath::employee(&entry.id))? else {
                warn!(date = %date, employee_id = %entry.id, "Employee missing, credit not applied");
                skipped.push(entry.id.clone());
                continue;
            };
            let emp = employee_from_document(&doc)?;
            let consumption = entry.consumption.max(0.0);
            credited.push(CreditChange {
                employee_id: entry.id.clone(),
                previous_credit: emp.credit,
                consumption,
                new_credit: round_cents(emp.credit + rules.daily_consumption_credit - consumption),
            });
        }

        tx.set(&closing_path, closing_body)?;
        tx.set(&DocPath::work_log(date), log_body)?;
        for change in &credited {
            tx.update(
                &DocPath::employee(&change.employee_id),
                json!({ "credit": change.new_credit }),
            )?;
        }

        Ok(FinalizeOutcome {
            date,
            cash_difference,
            closed_by: session.session_id.clone(),
            closed_at,
            credited,
            skipped,
            refinalized: already_closed,
        })
    })?;

    info!(
        date = %date,
        cash_difference,
        credited = outcome.credited.len(),
        skipped = outcome.skipped.len(),
        refinalized = outcome.refinalized,
        closed_by = %outcome.closed_by,
        "Closing finalized"
    );
    Ok(outcome)
}

pub fn get_closing<S: DocumentStore>(store: &S, date: NaiveDate) -> PosResult<Option<DailyClosing>> {
    match store.get(&DocPath::closing(date))? {
        Some(doc) => Ok(Some(doc.decode()?)),
        None => Ok(None),
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Employee, WorkLogEntry};
    use crate::store::{test_store, SqliteDocumentStore};

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
    }

    fn cashier() -> Session {
        Session {
            session_id: "sess-cashier".into(),
            role: Role::Cashier,
            employee_id: None,
            login_time: Utc::now(),
        }
    }

    fn seed_employee(store: &SqliteDocumentStore, id: &str, credit: f64) {
        store
            .run_transaction(|tx| {
                tx.set(
                    &DocPath::employee(id),
                    json!({ "name": id, "isDelivery": false, "credit": credit, "salaryBase": 60 }),
                )
            })
            .unwrap();
    }

    fn credit_of(store: &SqliteDocumentStore, id: &str) -> f64 {
        let doc = store.get(&DocPath::employee(id)).unwrap().unwrap();
        employee_from_document(&doc).unwrap().credit
    }

    fn log_of(entries: &[(&str, u32, f64)]) -> WorkLog {
        WorkLog {
            employees: entries
                .iter()
                .map(|(id, deliveries, consumption)| WorkLogEntry {
                    id: id.to_string(),
                    deliveries: *deliveries,
                    consumption: *consumption,
                })
                .collect(),
        }
    }

    fn finalize(
        store: &SqliteDocumentStore,
        inputs: &ClosingInputs,
        log: &WorkLog,
        allow_refinalize: bool,
    ) -> PosResult<FinalizeOutcome> {
        finalize_closing(
            store,
            &cashier(),
            &BusinessRules::default(),
            FinalizeRequest {
                date: date(),
                inputs,
                work_log: log,
                allow_refinalize,
            },
        )
    }

    fn delivery_employee(id: &str) -> Employee {
        Employee {
            id: id.into(),
            name: id.to_uppercase(),
            is_delivery: true,
            credit: 0.0,
            salary_base: 60.0,
            created_at: None,
        }
    }

    // -- totals ------------------------------------------------------------

    #[test]
    fn subtotal_and_difference() {
        let rules = BusinessRules::default();
        let mut draft = ClosingDraft::new(date(), rules, None);
        draft.set_field(ClosingField::OpeningBalance, &json!("100")).unwrap();
        draft.set_field(ClosingField::ChangeInflow, &json!(50)).unwrap();
        draft.set_field(ClosingField::CashOutflow, &json!("20.5")).unwrap();
        draft.add_receipt("Pix", &json!(30));
        draft.add_receipt("Cartão", &json!("abc"));
        draft.set_field(ClosingField::CountedChange, &json!(59.5)).unwrap();
        draft.set_field(ClosingField::CountedNotes, &json!(100)).unwrap();

        let totals = cash_totals(draft.inputs());
        assert_eq!(totals.receipts_total, 30.0);
        assert_eq!(totals.subtotal, 159.5);
        assert_eq!(totals.counted_total, 159.5);
        assert_eq!(totals.cash_difference, 0.0);

        draft.set_field(ClosingField::CountedNotes, &json!(90)).unwrap();
        assert_eq!(cash_totals(draft.inputs()).cash_difference, -10.0);
    }

    #[test]
    fn blank_inputs_total_zero() {
        let totals = cash_totals(&ClosingInputs::with_defaults(&BusinessRules::default()));
        assert_eq!(totals.subtotal, 0.0);
        assert_eq!(totals.cash_difference, 0.0);
    }

    #[test]
    fn commission_rules() {
        assert_eq!(commission(0, 6.0, 25.0), 0.0);
        assert_eq!(commission(3, 6.0, 25.0), 43.0);
        assert_eq!(commission(2, 6.0, 0.0), 12.0);
    }

    #[test]
    fn commissions_cover_every_delivery_employee() {
        let mut staff = vec![delivery_employee("d1"), delivery_employee("d2")];
        staff.push(Employee {
            is_delivery: false,
            ..delivery_employee("c1")
        });
        let roster = Roster::from(staff);
        let log = log_of(&[("d1", 3, 0.0), ("c1", 5, 0.0)]);

        let inputs = ClosingInputs::with_defaults(&BusinessRules::default());
        let totals = compute_totals(&inputs, &log, &roster);
        assert_eq!(totals.commissions.len(), 2);
        assert_eq!(totals.commissions[0].amount, 43.0);
        assert_eq!(totals.commissions[1].deliveries, 0);
        assert_eq!(totals.commissions[1].amount, 0.0);
        assert_eq!(totals.commissions_total, 43.0);
    }

    #[test]
    fn unmarked_employee_earns_no_commission() {
        let roster = Roster::from(vec![delivery_employee("d1")]);
        let mut log = log_of(&[("d1", 4, 0.0)]);
        log.mark_attendance("d1", false);
        let c = compute_commissions(&roster, &log, 6.0, 25.0);
        assert_eq!(c[0].amount, 0.0);
    }

    #[test]
    fn consumption_limit_reports_excess() {
        let mut ana = delivery_employee("ana");
        ana.credit = 5.0;
        let roster = Roster::from(vec![ana]);
        let log = log_of(&[("ana", 0, 30.0), ("ghost", 0, 1.0)]);
        let limits = consumption_limits(&log, &roster, 15.0);
        assert_eq!(limits.len(), 1);
        assert_eq!(limits[0].limit, 20.0);
        assert_eq!(limits[0].remaining, -10.0);
        assert_eq!(limits[0].excess, 10.0);
    }

    // -- draft -------------------------------------------------------------

    #[test]
    fn commission_params_default_but_keep_zero() {
        let rules = BusinessRules::default();
        let remote: DailyClosing = serde_json::from_value(json!({
            "date": "2024-03-01",
            "valorEntrega": 0,
            "acrescimoFixo": "x"
        }))
        .unwrap();
        let mut draft = ClosingDraft::new(date(), rules, Some(&remote));
        assert_eq!(draft.inputs().delivery_rate, 0.0);
        assert_eq!(draft.inputs().fixed_bonus, 25.0);

        draft.set_field(ClosingField::DeliveryRate, &json!("")).unwrap();
        assert_eq!(draft.inputs().delivery_rate, 6.0);
    }

    #[test]
    fn remote_snapshot_skips_dirty_fields() {
        let rules = BusinessRules::default();
        let mut draft = ClosingDraft::new(date(), rules, None);
        draft.set_field(ClosingField::OpeningBalance, &json!(80)).unwrap();
        draft.add_receipt("Pix", &json!(10));

        let remote: DailyClosing = serde_json::from_value(json!({
            "date": "2024-03-01",
            "saldoInicial": 100,
            "saidaCaixa": 12,
            "entradasRecebimentos": [{ "nome": "iFood", "valor": 55 }],
            "closedAt": "2024-03-01T23:00:00Z",
            "closedBy": "other"
        }))
        .unwrap();
        draft.apply_remote(Some(&remote));

        assert_eq!(draft.inputs().opening_balance, 80.0);
        assert_eq!(draft.inputs().cash_outflow, 12.0);
        assert_eq!(draft.inputs().receipts, vec![ReceiptEntry::new("Pix", 10.0)]);
        assert_eq!(draft.closed_by(), Some("other"));
        assert!(draft.closed_at().is_some());

        draft.mark_clean();
        draft.apply_remote(Some(&remote));
        assert_eq!(draft.inputs().opening_balance, 100.0);
        assert_eq!(draft.inputs().receipts[0].name, "iFood");
    }

    #[test]
    fn receipt_edits() {
        let mut draft = ClosingDraft::new(date(), BusinessRules::default(), None);
        let i = draft.add_receipt(" Pix ", &json!("12.5"));
        draft.add_receipt("Dinheiro", &json!(3));
        draft.update_receipt(i, None, Some(&json!(20))).unwrap();
        draft.update_receipt(1, Some("Cartão"), None).unwrap();
        assert_eq!(
            draft.inputs().receipts,
            vec![ReceiptEntry::new("Pix", 20.0), ReceiptEntry::new("Cartão", 3.0)]
        );

        let removed = draft.remove_receipt(0).unwrap();
        assert_eq!(removed.name, "Pix");
        assert!(matches!(draft.remove_receipt(5), Err(PosError::Validation(_))));
        assert!(draft.update_receipt(9, Some("x"), None).is_err());

        draft
            .set_field(
                ClosingField::Receipts,
                &json!([{ "name": "A", "amount": 1 }, { "nome": "B", "valor": "2" }]),
            )
            .unwrap();
        assert_eq!(receipts_total(&draft.inputs().receipts), 3.0);
        assert!(draft.set_field(ClosingField::Receipts, &json!("oops")).is_err());
    }

    #[test]
    fn field_names_parse_both_spellings() {
        assert_eq!(ClosingField::parse("saldoInicial"), Some(ClosingField::OpeningBalance));
        assert_eq!(ClosingField::parse("countedNotes"), Some(ClosingField::CountedNotes));
        assert_eq!(ClosingField::parse("tip"), None);
    }

    // -- finalize ----------------------------------------------------------

    #[test]
    fn negative_consumption_never_adds_credit() {
        let store = test_store();
        seed_employee(&store, "E1", 0.0);
        let mut log = WorkLog::default();
        log.mark_attendance("E1", true);
        log.set_consumption("E1", &json!("-50"));
        assert_eq!(log.entry("E1").unwrap().consumption, 0.0);

        let inputs = ClosingInputs::with_defaults(&BusinessRules::default());
        finalize(&store, &inputs, &log, false).unwrap();
        assert_eq!(credit_of(&store, "E1"), 15.0);

        // A hand-built log with a negative value is clamped at accrual
        let store = test_store();
        seed_employee(&store, "E1", 0.0);
        let outcome = finalize(&store, &inputs, &log_of(&[("E1", 0, -50.0)]), false).unwrap();
        assert_eq!(outcome.credited[0].consumption, 0.0);
        assert_eq!(credit_of(&store, "E1"), 15.0);
    }

    #[test]
    fn finalize_accrues_credit_and_persists_documents() {
        let store = test_store();
        seed_employee(&store, "E1", 5.0);
        seed_employee(&store, "E2", 0.0);
        let log = log_of(&[("E1", 0, 10.0), ("E2", 0, 0.0)]);
        let mut inputs = ClosingInputs::with_defaults(&BusinessRules::default());
        inputs.opening_balance = 100.0;
        inputs.counted_change = 99.999;

        let outcome = finalize(&store, &inputs, &log, false).unwrap();
        assert_eq!(credit_of(&store, "E1"), 10.0);
        assert_eq!(credit_of(&store, "E2"), 15.0);
        assert_eq!(outcome.credited.len(), 2);
        assert_eq!(outcome.cash_difference, 0.0);
        assert!(!outcome.refinalized);

        let closing = get_closing(&store, date()).unwrap().unwrap();
        assert_eq!(closing.closed_by.as_deref(), Some("sess-cashier"));
        assert!(closing.is_finalized());
        assert_eq!(closing.delivery_rate, Some(6.0));

        let stored_log = store.get(&DocPath::work_log(date())).unwrap().unwrap();
        assert_eq!(WorkLog::from_document(Some(&stored_log)).unwrap(), log);
    }

    #[test]
    fn second_finalize_needs_confirmation_and_doubles_accrual() {
        let store = test_store();
        seed_employee(&store, "E1", 5.0);
        seed_employee(&store, "E2", 0.0);
        let log = log_of(&[("E1", 0, 10.0), ("E2", 0, 0.0)]);
        let inputs = ClosingInputs::with_defaults(&BusinessRules::default());
        finalize(&store, &inputs, &log, false).unwrap();

        let err = finalize(&store, &inputs, &log, false).unwrap_err();
        assert!(matches!(err, PosError::AlreadyFinalized(d) if d == date()));
        assert_eq!(credit_of(&store, "E1"), 10.0);

        let outcome = finalize(&store, &inputs, &log, true).unwrap();
        assert!(outcome.refinalized);
        assert_eq!(credit_of(&store, "E1"), 15.0);
        assert_eq!(credit_of(&store, "E2"), 30.0);
    }

    #[test]
    fn missing_employee_is_skipped_not_fatal() {
        let store = test_store();
        seed_employee(&store, "E1", 1.0);
        let log = log_of(&[("E1", 0, 0.0), ("gone", 2, 4.0)]);
        let inputs = ClosingInputs::with_defaults(&BusinessRules::default());

        let outcome = finalize(&store, &inputs, &log, false).unwrap();
        assert_eq!(outcome.skipped, vec!["gone".to_string()]);
        assert_eq!(credit_of(&store, "E1"), 16.0);
        assert!(store.get(&DocPath::employee("gone")).unwrap().is_none());
    }

    #[test]
    fn failure_mid_transaction_leaves_everything_untouched() {
        let store = test_store();
        seed_employee(&store, "E1", 5.0);
        // Stored body is not an object, so the credit update fails.
        {
            let conn = store.db().conn.lock().unwrap();
            conn.execute(
                "INSERT INTO documents (collection, doc_key, data) VALUES ('employees', 'E2', '[]')",
                [],
            )
            .unwrap();
        }
        let log = log_of(&[("E1", 0, 0.0), ("E2", 0, 0.0)]);
        let inputs = ClosingInputs::with_defaults(&BusinessRules::default());

        assert!(finalize(&store, &inputs, &log, false).is_err());
        assert_eq!(credit_of(&store, "E1"), 5.0);
        assert!(get_closing(&store, date()).unwrap().is_none());
        assert!(store.get(&DocPath::work_log(date())).unwrap().is_none());
    }

    #[test]
    fn employees_cannot_finalize() {
        let store = test_store();
        let session = Session {
            role: Role::Employee,
            employee_id: Some("E1".into()),
            ..cashier()
        };
        let inputs = ClosingInputs::with_defaults(&BusinessRules::default());
        let err = finalize_closing(
            &store,
            &session,
            &BusinessRules::default(),
            FinalizeRequest {
                date: date(),
                inputs: &inputs,
                work_log: &WorkLog::default(),
                allow_refinalize: false,
            },
        )
        .unwrap_err();
        assert!(matches!(err, PosError::Unauthorized(_)));
        assert!(get_closing(&store, date()).unwrap().is_none());
    }
}
