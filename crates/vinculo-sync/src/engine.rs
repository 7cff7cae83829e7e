//! Reconciliation engine.
//!
//! Consolidates a worker's scattered lifecycle events - arriving out of
//! order, across multiple event types - into one authoritative record.
//! The fold is deterministic for a fixed input set: grouping is keyed by
//! taxpayer id, events are sorted by date and fields fold left to right.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

use vinculo_events::EventType;

use crate::raw::{dedup_events, RawLifecycleEvent};

/// Employment state derived from the full event history.
///
/// Never set directly: always recomputed from the chronologically ordered
/// events of the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Active,
    Terminated,
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Terminated => write!(f, "terminated"),
        }
    }
}

impl FromStr for WorkerStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "terminated" => Ok(Self::Terminated),
            other => Err(format!("unknown worker status: {other}")),
        }
    }
}

/// The authoritative consolidated record of one worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsolidatedWorker {
    pub cpf: String,
    pub name: Option<String>,
    pub registration: Option<String>,
    pub role: Option<String>,
    pub category: Option<String>,
    pub admission_date: Option<NaiveDate>,
    /// Retained as history even when a later hire re-activated the worker.
    pub termination_date: Option<NaiveDate>,
    pub status: WorkerStatus,
    /// Content hash over the folded fields, used for change detection.
    pub change_hash: String,
    pub event_count: u64,
    pub last_event_type: EventType,
    pub last_event_date: NaiveDate,
}

/// Consolidate raw lifecycle events into one record per worker.
///
/// Events without a taxpayer id are discarded; duplicates (same worker,
/// type, date) are dropped; each worker's group is sorted ascending by
/// event date and folded left to right, later non-empty values overwriting
/// earlier ones - except the admission date (first occurrence wins) and the
/// termination date (last occurrence wins).
#[must_use]
pub fn reconcile(raw_events: Vec<RawLifecycleEvent>) -> Vec<ConsolidatedWorker> {
    let with_cpf: Vec<RawLifecycleEvent> = raw_events
        .into_iter()
        .filter(|event| !event.cpf.trim().is_empty())
        .collect();
    let deduped = dedup_events(with_cpf);

    // BTreeMap keeps output ordering deterministic across runs.
    let mut groups: BTreeMap<String, Vec<RawLifecycleEvent>> = BTreeMap::new();
    for event in deduped {
        groups.entry(event.cpf.clone()).or_default().push(event);
    }

    let mut workers = Vec::with_capacity(groups.len());
    for (cpf, mut events) in groups {
        events.sort_by_key(|event| event.event_date);
        let worker = fold_worker(cpf, &events);
        debug!(cpf = %worker.cpf, status = %worker.status, events = worker.event_count, "worker consolidated");
        workers.push(worker);
    }
    workers
}

fn fold_worker(cpf: String, events: &[RawLifecycleEvent]) -> ConsolidatedWorker {
    let mut name = None;
    let mut registration = None;
    let mut role = None;
    let mut category = None;
    let mut admission_date = None;
    let mut termination_date = None;

    for event in events {
        if let Some(value) = non_empty(&event.name) {
            name = Some(value);
        }
        if let Some(value) = non_empty(&event.registration) {
            registration = Some(value);
        }
        if let Some(value) = non_empty(&event.role) {
            role = Some(value);
        }
        if let Some(value) = non_empty(&event.category) {
            category = Some(value);
        }
        if admission_date.is_none() {
            admission_date = event.admission_date;
        }
        if let Some(date) = event.termination_date {
            termination_date = Some(date);
        }
    }

    let status = derive_status(events);
    let last = events.last().expect("fold_worker requires events");

    let mut worker = ConsolidatedWorker {
        cpf,
        name,
        registration,
        role,
        category,
        admission_date,
        termination_date,
        status,
        change_hash: String::new(),
        event_count: events.len() as u64,
        last_event_type: last.event_type,
        last_event_date: last.event_date,
    };
    worker.change_hash = content_hash(&worker);
    worker
}

/// Terminated iff a bond-ending event exists with no strictly later
/// bond-starting event.
fn derive_status(events: &[RawLifecycleEvent]) -> WorkerStatus {
    let last_end = events
        .iter()
        .filter(|e| e.event_type.ends_bond())
        .map(|e| e.event_date)
        .max();
    let Some(ended_at) = last_end else {
        return WorkerStatus::Active;
    };
    let rehired = events
        .iter()
        .any(|e| e.event_type.starts_bond() && e.event_date > ended_at);
    if rehired {
        WorkerStatus::Active
    } else {
        WorkerStatus::Terminated
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// SHA-256 over the folded fields. The event counters are deliberately
/// excluded: re-processing the same stream must hash identically.
fn content_hash(worker: &ConsolidatedWorker) -> String {
    let mut hasher = Sha256::new();
    for field in [
        Some(worker.cpf.as_str()),
        worker.name.as_deref(),
        worker.registration.as_deref(),
        worker.role.as_deref(),
        worker.category.as_deref(),
    ] {
        hasher.update(field.unwrap_or(""));
        hasher.update([0u8]);
    }
    hasher.update(
        worker
            .admission_date
            .map(|d| d.to_string())
            .unwrap_or_default(),
    );
    hasher.update([0u8]);
    hasher.update(
        worker
            .termination_date
            .map(|d| d.to_string())
            .unwrap_or_default(),
    );
    hasher.update([0u8]);
    hasher.update(worker.status.to_string());
    hex::encode(hasher.finalize())
}

/// How a consolidated record relates to what is already stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// No prior record for this worker.
    New,
    /// Stored hash differs: the record changed.
    Updated,
    /// Stored hash matches: skip the write.
    Unchanged,
}

/// Classify a consolidated record against the previously stored hash.
#[must_use]
pub fn classify_change(prior_hash: Option<&str>, new_hash: &str) -> ChangeKind {
    match prior_hash {
        None => ChangeKind::New,
        Some(prior) if prior == new_hash => ChangeKind::Unchanged,
        Some(_) => ChangeKind::Updated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(
        cpf: &str,
        event_type: EventType,
        date: (i32, u32, u32),
    ) -> RawLifecycleEvent {
        let event_date = NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap();
        RawLifecycleEvent {
            event_type,
            cpf: cpf.to_string(),
            event_date,
            receipt: None,
            name: None,
            registration: None,
            role: None,
            category: None,
            admission_date: event_type.starts_bond().then_some(event_date),
            termination_date: event_type.ends_bond().then_some(event_date),
            raw_xml: String::new(),
        }
    }

    const CPF: &str = "52998224725";

    #[test]
    fn test_rehire_after_termination_is_active() {
        // hire, terminate, later hire: active again, first admission kept,
        // termination retained as history.
        let workers = reconcile(vec![
            raw(CPF, EventType::Hire, (2023, 1, 1)),
            raw(CPF, EventType::Termination, (2023, 6, 1)),
            raw(CPF, EventType::Hire, (2023, 7, 1)),
        ]);
        assert_eq!(workers.len(), 1);
        let worker = &workers[0];
        assert_eq!(worker.status, WorkerStatus::Active);
        assert_eq!(
            worker.admission_date,
            NaiveDate::from_ymd_opt(2023, 1, 1)
        );
        assert_eq!(
            worker.termination_date,
            NaiveDate::from_ymd_opt(2023, 6, 1)
        );
        assert_eq!(worker.event_count, 3);
    }

    #[test]
    fn test_hire_only_is_active_without_termination() {
        let workers = reconcile(vec![raw(CPF, EventType::Hire, (2023, 1, 1))]);
        assert_eq!(workers[0].status, WorkerStatus::Active);
        assert!(workers[0].termination_date.is_none());
    }

    #[test]
    fn test_termination_after_hire_is_terminated() {
        let workers = reconcile(vec![
            raw(CPF, EventType::Hire, (2023, 1, 1)),
            raw(CPF, EventType::Termination, (2023, 6, 1)),
        ]);
        assert_eq!(workers[0].status, WorkerStatus::Terminated);
    }

    #[test]
    fn test_out_of_order_input_is_sorted() {
        let workers = reconcile(vec![
            raw(CPF, EventType::Termination, (2023, 6, 1)),
            raw(CPF, EventType::Hire, (2023, 1, 1)),
        ]);
        let worker = &workers[0];
        assert_eq!(worker.status, WorkerStatus::Terminated);
        assert_eq!(worker.last_event_type, EventType::Termination);
        assert_eq!(
            worker.last_event_date,
            NaiveDate::from_ymd_opt(2023, 6, 1).unwrap()
        );
    }

    #[test]
    fn test_no_bond_family_counts_for_status() {
        let workers = reconcile(vec![
            raw(CPF, EventType::NoBondStart, (2023, 1, 1)),
            raw(CPF, EventType::NoBondEnd, (2023, 3, 1)),
        ]);
        assert_eq!(workers[0].status, WorkerStatus::Terminated);

        let workers = reconcile(vec![
            raw(CPF, EventType::NoBondEnd, (2023, 3, 1)),
            raw(CPF, EventType::NoBondStart, (2023, 4, 1)),
        ]);
        assert_eq!(workers[0].status, WorkerStatus::Active);
    }

    #[test]
    fn test_later_fields_overwrite_earlier() {
        let mut first = raw(CPF, EventType::Hire, (2023, 1, 1));
        first.name = Some("Ana Souza".to_string());
        first.role = Some("Soldadora".to_string());
        let mut amendment = raw(CPF, EventType::ContractAmendment, (2023, 5, 1));
        amendment.role = Some("Supervisora".to_string());
        amendment.name = Some("  ".to_string()); // blank: must not overwrite

        let workers = reconcile(vec![first, amendment]);
        let worker = &workers[0];
        assert_eq!(worker.role.as_deref(), Some("Supervisora"));
        assert_eq!(worker.name.as_deref(), Some("Ana Souza"));
    }

    #[test]
    fn test_events_without_cpf_are_discarded() {
        let workers = reconcile(vec![raw("", EventType::Hire, (2023, 1, 1))]);
        assert!(workers.is_empty());
    }

    #[test]
    fn test_duplicate_events_fold_once() {
        // Same event delivered twice consolidates identically to once.
        let once = reconcile(vec![raw(CPF, EventType::Hire, (2023, 1, 1))]);
        let twice = reconcile(vec![
            raw(CPF, EventType::Hire, (2023, 1, 1)),
            raw(CPF, EventType::Hire, (2023, 1, 1)),
        ]);
        assert_eq!(once[0].change_hash, twice[0].change_hash);
        assert_eq!(twice[0].event_count, 1);
    }

    #[test]
    fn test_output_order_is_deterministic() {
        let a = reconcile(vec![
            raw("98765432100", EventType::Hire, (2023, 1, 1)),
            raw(CPF, EventType::Hire, (2023, 1, 1)),
        ]);
        let b = reconcile(vec![
            raw(CPF, EventType::Hire, (2023, 1, 1)),
            raw("98765432100", EventType::Hire, (2023, 1, 1)),
        ]);
        let cpfs_a: Vec<&str> = a.iter().map(|w| w.cpf.as_str()).collect();
        let cpfs_b: Vec<&str> = b.iter().map(|w| w.cpf.as_str()).collect();
        assert_eq!(cpfs_a, cpfs_b);
    }

    #[test]
    fn test_hash_changes_with_content() {
        let before = reconcile(vec![raw(CPF, EventType::Hire, (2023, 1, 1))]);
        let after = reconcile(vec![
            raw(CPF, EventType::Hire, (2023, 1, 1)),
            raw(CPF, EventType::Termination, (2023, 6, 1)),
        ]);
        assert_ne!(before[0].change_hash, after[0].change_hash);
    }

    #[test]
    fn test_classify_change() {
        assert_eq!(classify_change(None, "abc"), ChangeKind::New);
        assert_eq!(classify_change(Some("abc"), "abc"), ChangeKind::Unchanged);
        assert_eq!(classify_change(Some("xyz"), "abc"), ChangeKind::Updated);
    }
}
