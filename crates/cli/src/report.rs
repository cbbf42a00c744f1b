//! Rendering of run results for terminals, files and machines.

use anyhow::{Context, Result};
use rodwatch_engine::{ObjectOutcome, RunMode, RunResult};
use std::fmt::Write as _;
use std::path::Path;

/// Which object paths to list.
#[derive(Clone, Copy, Debug, Default)]
pub struct LineOptions {
    pub print_pass: bool,
    pub print_fail: bool,
}

/// True if nothing is left wrong with the object after this run.
///
/// In repair mode an object whose violations were all repaired counts as ok.
pub fn object_ok(outcome: &ObjectOutcome, mode: RunMode) -> bool {
    match mode {
        RunMode::Check => outcome.passed(),
        RunMode::Repair => {
            outcome.errors.is_empty()
                && !outcome.state.is_failure()
                && outcome.unrepaired().is_empty()
        }
    }
}

/// One object path per line, in path order.
pub fn render_lines(result: &RunResult, options: LineOptions) -> String {
    let mut out = String::new();
    for outcome in result.objects.values() {
        let ok = object_ok(outcome, result.mode);
        if (ok && options.print_pass) || (!ok && options.print_fail) {
            out.push_str(&outcome.path);
            out.push('\n');
        }
    }
    out
}

/// Human-readable summary of a run.
pub fn render_summary(result: &RunResult) -> String {
    let totals = &result.totals;
    let mut out = String::new();

    let _ = writeln!(
        out,
        "{} run {}: {} objects, {} passed, {} failed",
        result.mode,
        result.run_id,
        totals.objects_scanned,
        totals.objects_passed,
        totals.objects_failed
    );
    if totals.violations > 0 {
        let by_kind: Vec<String> = totals
            .violations_by_kind
            .iter()
            .map(|(kind, count)| format!("{kind}={count}"))
            .collect();
        let _ = writeln!(out, "  violations: {} ({})", totals.violations, by_kind.join(", "));
    }
    if result.mode == RunMode::Repair {
        let _ = writeln!(
            out,
            "  repairs: {} succeeded, {} skipped, {} failed",
            totals.repairs_succeeded, totals.repairs_skipped, totals.repairs_failed
        );
    }
    if totals.unrepaired > 0 {
        let _ = writeln!(out, "  unrepaired violations: {}", totals.unrepaired);
    }
    if totals.unexpected_errors > 0 {
        let _ = writeln!(out, "  unexpected errors: {}", totals.unexpected_errors);
    }
    for failure in &result.listing_failures {
        let _ = writeln!(out, "  could not list {}: {}", failure.collection, failure.error);
    }
    if totals.warehouse_unavailable > 0 {
        let _ = writeln!(
            out,
            "  warehouse unavailable for {} objects",
            totals.warehouse_unavailable
        );
    }
    if result.timed_out {
        let _ = writeln!(out, "  run timed out before all objects were processed");
    }
    if let Some(reason) = &result.aborted {
        let _ = writeln!(out, "  aborted: {reason}");
    }
    out
}

/// Describe every object that is not ok, with its violations and errors.
pub fn render_failures(result: &RunResult) -> String {
    let mut out = String::new();
    for outcome in result
        .objects
        .values()
        .filter(|o| !object_ok(o, result.mode))
    {
        let _ = writeln!(out, "{} [{}]", outcome.path, outcome.state);
        for violation in &outcome.violations {
            let repair = outcome
                .repairs
                .iter()
                .find(|r| &r.violation == violation)
                .map(|r| format!(" -> {}", r.outcome))
                .unwrap_or_default();
            let _ = writeln!(out, "  {}: {violation}{repair}", violation.kind());
        }
        for error in &outcome.errors {
            let _ = writeln!(out, "  error: {error}");
        }
    }
    out
}

/// Write the full result as pretty-printed JSON.
pub async fn write_json(result: &RunResult, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(result).context("failed to serialize run result")?;
    tokio::fs::write(path, json + "\n")
        .await
        .with_context(|| format!("failed to write report to {}", path.display()))
}
