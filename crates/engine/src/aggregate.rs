//! Run results and the task that accumulates them.
//!
//! Workers never touch the result map directly. They send events over a
//! channel to a single aggregator task, which owns the map until the run
//! completes.

use crate::error::{EngineError, EngineResult};
use crate::state::TaskState;
use rodwatch_core::{ObjectClass, ReferenceStatus, RepairOutcome, Violation, ViolationKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

/// Whether a run only verifies or also repairs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Check,
    Repair,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Check => "check",
            RunMode::Repair => "repair",
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A repair attempted for one violation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairRecord {
    pub violation: Violation,
    pub outcome: RepairOutcome,
}

/// Everything recorded for one data object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObjectOutcome {
    pub path: String,
    pub class: ObjectClass,
    pub reference: ReferenceStatus,
    pub state: TaskState,
    #[serde(default)]
    pub violations: Vec<Violation>,
    #[serde(default)]
    pub repairs: Vec<RepairRecord>,
    /// Unexpected errors (transport failures, panics, pool timeouts).
    #[serde(default)]
    pub errors: Vec<String>,
    pub attempts: u32,
    /// Set when the object hit a pool fault that stops the run.
    #[serde(skip)]
    pub fatal: bool,
}

impl ObjectOutcome {
    pub fn new(path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            class: ObjectClass::infer(&path),
            path,
            reference: ReferenceStatus::NoKey,
            state: TaskState::Pending,
            violations: Vec::new(),
            repairs: Vec::new(),
            errors: Vec::new(),
            attempts: 0,
            fatal: false,
        }
    }

    /// Verified with no violations and no errors.
    pub fn passed(&self) -> bool {
        self.errors.is_empty() && self.violations.is_empty() && !self.state.is_failure()
    }

    /// Violations that no repair resolved.
    pub fn unrepaired(&self) -> Vec<&Violation> {
        self.violations
            .iter()
            .filter(|v| {
                !self
                    .repairs
                    .iter()
                    .any(|r| &r.violation == *v && r.outcome.resolves())
            })
            .collect()
    }

    fn merge(&mut self, other: ObjectOutcome) {
        self.violations.extend(other.violations);
        self.repairs.extend(other.repairs);
        self.errors.extend(other.errors);
        self.attempts += other.attempts;
        if other.state.is_failure() || self.state == TaskState::Pending {
            self.state = other.state;
        }
    }
}

/// A collection the enumerator could not list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingFailure {
    pub collection: String,
    pub error: String,
}

/// Run-level counts.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunTotals {
    pub objects_scanned: usize,
    pub objects_passed: usize,
    pub objects_failed: usize,
    pub violations: usize,
    pub violations_by_kind: BTreeMap<ViolationKind, usize>,
    pub repairs_succeeded: usize,
    pub repairs_skipped: usize,
    pub repairs_failed: usize,
    pub unrepaired: usize,
    pub unexpected_errors: usize,
    pub listing_failures: usize,
    pub warehouse_unavailable: usize,
}

impl RunTotals {
    fn from_outcomes<'a>(
        outcomes: impl Iterator<Item = &'a ObjectOutcome>,
        listing_failures: usize,
    ) -> Self {
        let mut totals = RunTotals {
            listing_failures,
            ..RunTotals::default()
        };
        for outcome in outcomes {
            totals.objects_scanned += 1;
            if outcome.passed() {
                totals.objects_passed += 1;
            } else {
                totals.objects_failed += 1;
            }
            totals.violations += outcome.violations.len();
            for violation in &outcome.violations {
                *totals.violations_by_kind.entry(violation.kind()).or_default() += 1;
            }
            for repair in &outcome.repairs {
                match repair.outcome {
                    RepairOutcome::Succeeded => totals.repairs_succeeded += 1,
                    RepairOutcome::Skipped(_) => totals.repairs_skipped += 1,
                    RepairOutcome::Failed(_) => totals.repairs_failed += 1,
                }
            }
            totals.unrepaired += outcome.unrepaired().len();
            totals.unexpected_errors += outcome.errors.len();
            if outcome.reference == ReferenceStatus::Unavailable {
                totals.warehouse_unavailable += 1;
            }
        }
        totals
    }
}

/// The finalized result of one run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: Uuid,
    pub mode: RunMode,
    #[serde(with = "time::serde::rfc3339")]
    pub started: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub finished: OffsetDateTime,
    pub objects: BTreeMap<String, ObjectOutcome>,
    #[serde(default)]
    pub listing_failures: Vec<ListingFailure>,
    /// Reason the run stopped early, if it did.
    #[serde(default)]
    pub aborted: Option<String>,
    #[serde(default)]
    pub timed_out: bool,
    pub totals: RunTotals,
}

impl RunResult {
    /// True if nothing is left to fix and nothing went wrong.
    pub fn succeeded(&self) -> bool {
        self.aborted.is_none()
            && !self.timed_out
            && self.totals.unrepaired == 0
            && self.totals.unexpected_errors == 0
            && self.totals.listing_failures == 0
    }

    pub fn passed(&self) -> impl Iterator<Item = &ObjectOutcome> {
        self.objects.values().filter(|o| o.passed())
    }

    pub fn failed(&self) -> impl Iterator<Item = &ObjectOutcome> {
        self.objects.values().filter(|o| !o.passed())
    }
}

/// Events sent by workers and the enumerator.
#[derive(Debug)]
pub enum AggregateEvent {
    Object(Box<ObjectOutcome>),
    ListingFailed(ListingFailure),
    Abort(String),
}

/// Mutable run state owned by the aggregator task.
#[derive(Debug, Default)]
pub struct Accumulator {
    objects: BTreeMap<String, ObjectOutcome>,
    listing_failures: Vec<ListingFailure>,
    aborted: Option<String>,
}

impl Accumulator {
    pub fn apply(&mut self, event: AggregateEvent) {
        match event {
            AggregateEvent::Object(outcome) => {
                let outcome = *outcome;
                match self.objects.get_mut(&outcome.path) {
                    Some(existing) => existing.merge(outcome),
                    None => {
                        self.objects.insert(outcome.path.clone(), outcome);
                    }
                }
            }
            AggregateEvent::ListingFailed(failure) => self.listing_failures.push(failure),
            AggregateEvent::Abort(reason) => {
                // Keep the first reason.
                self.aborted.get_or_insert(reason);
            }
        }
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Freeze the accumulated state into a run result.
    pub fn finalize(
        self,
        run_id: Uuid,
        mode: RunMode,
        started: OffsetDateTime,
        timed_out: bool,
    ) -> RunResult {
        let totals = RunTotals::from_outcomes(self.objects.values(), self.listing_failures.len());
        RunResult {
            run_id,
            mode,
            started,
            finished: OffsetDateTime::now_utc(),
            objects: self.objects,
            listing_failures: self.listing_failures,
            aborted: self.aborted,
            timed_out,
            totals,
        }
    }
}

/// Cloneable handle workers use to report results.
#[derive(Clone)]
pub struct AggregateSender {
    tx: mpsc::UnboundedSender<AggregateEvent>,
}

impl AggregateSender {
    pub fn object(&self, outcome: ObjectOutcome) {
        self.send(AggregateEvent::Object(Box::new(outcome)));
    }

    pub fn listing_failed(&self, collection: String, error: String) {
        self.send(AggregateEvent::ListingFailed(ListingFailure { collection, error }));
    }

    pub fn abort(&self, reason: impl Into<String>) {
        self.send(AggregateEvent::Abort(reason.into()));
    }

    fn send(&self, event: AggregateEvent) {
        if let Err(e) = self.tx.send(event) {
            debug!(event = ?e.0, "Result aggregator already stopped");
        }
    }
}

/// The single owner of a run's results.
pub struct ResultAggregator {
    handle: JoinHandle<Accumulator>,
}

impl ResultAggregator {
    /// Spawn the aggregator task.
    pub fn start() -> (AggregateSender, Self) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(async move {
            let mut acc = Accumulator::default();
            while let Some(event) = rx.recv().await {
                acc.apply(event);
            }
            acc
        });
        (AggregateSender { tx }, Self { handle })
    }

    /// Wait for every sender to be dropped and return the accumulated state.
    pub async fn finish(self) -> EngineResult<Accumulator> {
        self.handle
            .await
            .map_err(|e| EngineError::Internal(format!("result aggregator failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rodwatch_core::SkipReason;

    fn outcome(
        path: &str,
        violations: Vec<Violation>,
        repairs: Vec<RepairRecord>,
    ) -> ObjectOutcome {
        let mut o = ObjectOutcome::new(path);
        o.state = TaskState::Verified;
        o.violations = violations;
        o.repairs = repairs;
        o
    }

    #[tokio::test]
    async fn test_aggregates_from_many_senders() {
        let (sender, aggregator) = ResultAggregator::start();
        let mut handles = Vec::new();
        for i in 0..8 {
            let sender = sender.clone();
            handles.push(tokio::spawn(async move {
                sender.object(outcome(&format!("/z/{i}"), Vec::new(), Vec::new()));
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        sender.listing_failed("/z/bad".into(), "reset".into());
        drop(sender);

        let acc = aggregator.finish().await.unwrap();
        assert_eq!(acc.object_count(), 8);
        let result = acc.finalize(Uuid::new_v4(), RunMode::Check, OffsetDateTime::now_utc(), false);
        assert_eq!(result.totals.objects_scanned, 8);
        assert_eq!(result.totals.objects_passed, 8);
        assert_eq!(result.totals.listing_failures, 1);
        assert!(!result.succeeded());
    }

    #[test]
    fn test_unrepaired_and_exit_rule() {
        let missing = Violation::metadata_missing("sample_id");
        let stale = Violation::metadata_stale("md5", "abc", vec!["abd".into()]);
        let mut acc = Accumulator::default();
        acc.apply(AggregateEvent::Object(Box::new(outcome(
            "/z/a",
            vec![missing.clone(), stale.clone()],
            vec![
                RepairRecord {
                    violation: missing,
                    outcome: RepairOutcome::Succeeded,
                },
                RepairRecord {
                    violation: stale,
                    outcome: RepairOutcome::Skipped(SkipReason::NeedsOverwrite),
                },
            ],
        ))));

        let result = acc.finalize(
            Uuid::new_v4(),
            RunMode::Repair,
            OffsetDateTime::now_utc(),
            false,
        );
        assert_eq!(result.totals.violations, 2);
        assert_eq!(result.totals.repairs_succeeded, 1);
        assert_eq!(result.totals.repairs_skipped, 1);
        assert_eq!(result.totals.unrepaired, 1);
        assert_eq!(
            result.totals.violations_by_kind.get(&ViolationKind::MetadataMissing),
            Some(&1)
        );
        assert!(!result.succeeded());
    }

    #[test]
    fn test_first_abort_reason_is_kept() {
        let mut acc = Accumulator::default();
        acc.apply(AggregateEvent::Abort("pool exhausted".into()));
        acc.apply(AggregateEvent::Abort("later".into()));
        let result = acc.finalize(Uuid::new_v4(), RunMode::Check, OffsetDateTime::now_utc(), false);
        assert_eq!(result.aborted.as_deref(), Some("pool exhausted"));
        assert!(!result.succeeded());
    }

    #[test]
    fn test_result_serializes_to_json() {
        let mut acc = Accumulator::default();
        acc.apply(AggregateEvent::Object(Box::new(outcome(
            "/z/a",
            vec![Violation::ReplicaCountWrong {
                expected: 2,
                actual: 1,
            }],
            Vec::new(),
        ))));
        let result = acc.finalize(Uuid::new_v4(), RunMode::Check, OffsetDateTime::now_utc(), false);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["mode"], "check");
        assert_eq!(json["objects"]["/z/a"]["violations"][0]["kind"], "replica_count_wrong");
        assert_eq!(json["totals"]["violations_by_kind"]["replica_count_wrong"], 1);
    }
}
