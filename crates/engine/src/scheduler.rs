//! Fan-out of per-object work over a fixed set of workers.
//!
//! The enumerator feeds paths into a bounded channel. `num_threads` workers
//! pull from it, each checking out a client from the pool for one object at
//! a time. Outcomes go to the result aggregator. A pool fault, an expired run
//! timeout or (without best-effort) the first object error stops the run:
//! the enumerator stops producing and workers finish their current object.

use crate::aggregate::{
    AggregateSender, ObjectOutcome, RepairRecord, ResultAggregator, RunMode, RunResult,
};
use crate::enumerator::{Enumerated, PathEnumerator, PathSource};
use crate::error::{EngineError, EngineResult, PoolError};
use crate::pool::{ClientPool, PoolConfig, PooledClient};
use crate::repair::Repairer;
use crate::state::{ObjectTask, TaskState};
use crate::verify::Verifier;
use futures::StreamExt;
use rodwatch_core::config::EngineConfig;
use rodwatch_core::{RepairOutcome, StoredObject, Violation, WarehouseRecord};
use rodwatch_storage::{ClientFactory, StorageError};
use rodwatch_warehouse::{WarehouseLookup, WarehouseStore};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use time::OffsetDateTime;
use tokio::sync::{Mutex, mpsc, watch};
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

/// The verify-and-repair engine.
pub struct Engine {
    config: EngineConfig,
    factory: Arc<dyn ClientFactory>,
    warehouse: Option<Arc<dyn WarehouseStore>>,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        factory: Arc<dyn ClientFactory>,
        warehouse: Option<Arc<dyn WarehouseStore>>,
    ) -> EngineResult<Self> {
        config.validate().map_err(EngineError::Config)?;
        Ok(Self {
            config,
            factory,
            warehouse,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run over every object from `source`.
    ///
    /// Per-object failures are recorded in the result; only internal faults
    /// are returned as errors.
    pub async fn run(&self, source: PathSource, mode: RunMode) -> EngineResult<RunResult> {
        let run_id = Uuid::new_v4();
        let started = OffsetDateTime::now_utc();
        let span = info_span!("run", %run_id, mode = %mode);

        async move {
            info!(
                threads = self.config.num_threads,
                clients = self.config.num_clients,
                backend = self.factory.backend_name(),
                warehouse = self.warehouse.as_ref().map_or("none", |w| w.backend_name()),
                "Starting run"
            );

            let pool = ClientPool::new(
                Arc::clone(&self.factory),
                PoolConfig::from_engine(&self.config),
            );
            let (results, aggregator) = ResultAggregator::start();
            let (stop_tx, stop_rx) = watch::channel(false);
            let stop_tx = Arc::new(stop_tx);
            let timed_out = Arc::new(AtomicBool::new(false));

            let timer = self.config.run_timeout().map(|limit| {
                let stop_tx = Arc::clone(&stop_tx);
                let timed_out = Arc::clone(&timed_out);
                tokio::spawn(async move {
                    tokio::time::sleep(limit).await;
                    warn!(limit_secs = limit.as_secs(), "Run timeout elapsed, stopping");
                    timed_out.store(true, Ordering::SeqCst);
                    stop_tx.send_replace(true);
                })
            });

            let (work_tx, work_rx) = mpsc::channel::<String>(self.config.num_threads);
            let enumerator = PathEnumerator::new(pool.clone(), source)
                .with_attempts(self.config.max_object_attempts);
            let feeder = tokio::spawn(
                feed(enumerator, work_tx, results.clone(), Arc::clone(&stop_tx), stop_rx.clone())
                    .in_current_span(),
            );

            let repairer = Repairer::new(&self.config);
            let ctx = Arc::new(WorkerContext {
                pool: pool.clone(),
                lookup: WarehouseLookup::new(self.warehouse.clone()),
                verifier: Verifier::new(&self.config),
                repairer,
                mode,
                max_attempts: self.config.max_object_attempts,
                best_effort: self.config.best_effort,
                results: results.clone(),
                stop_tx: Arc::clone(&stop_tx),
            });

            let work_rx = Arc::new(Mutex::new(work_rx));
            let mut workers = Vec::with_capacity(self.config.num_threads);
            for id in 0..self.config.num_threads {
                let ctx = Arc::clone(&ctx);
                let work_rx = Arc::clone(&work_rx);
                let stop_rx = stop_rx.clone();
                workers.push(tokio::spawn(
                    worker(id, ctx, work_rx, stop_rx).in_current_span(),
                ));
            }

            for handle in workers {
                if let Err(e) = handle.await {
                    error!(error = %e, "Worker task failed");
                    results.abort(format!("worker task failed: {e}"));
                }
            }
            stop_tx.send_replace(true);
            if let Err(e) = feeder.await {
                error!(error = %e, "Enumerator task failed");
                results.abort(format!("enumerator task failed: {e}"));
            }
            if let Some(timer) = timer {
                timer.abort();
            }

            let lookup_stats = ctx.lookup.stats();
            let pool_stats = pool.stats();
            drop(ctx);
            drop(results);
            pool.close();

            let result = aggregator.finish().await?.finalize(
                run_id,
                mode,
                started,
                timed_out.load(Ordering::SeqCst),
            );

            info!(
                objects = result.totals.objects_scanned,
                passed = result.totals.objects_passed,
                violations = result.totals.violations,
                repaired = result.totals.repairs_succeeded,
                repair_failures = result.totals.repairs_failed,
                errors = result.totals.unexpected_errors,
                listing_failures = result.totals.listing_failures,
                warehouse_queries = lookup_stats.queries,
                warehouse_cache_hits = lookup_stats.cache_hits,
                clients_created = pool_stats.created,
                clients_discarded = pool_stats.discarded,
                aborted = result.aborted.as_deref().unwrap_or(""),
                timed_out = result.timed_out,
                "Run complete"
            );
            Ok(result)
        }
        .instrument(span)
        .await
    }
}

/// Drive the enumerator into the work channel until it ends or the run stops.
async fn feed(
    enumerator: PathEnumerator,
    work_tx: mpsc::Sender<String>,
    results: AggregateSender,
    stop_tx: Arc<watch::Sender<bool>>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut stream = Box::pin(enumerator.into_stream());
    loop {
        let item = tokio::select! {
            biased;
            _ = stopped(&mut stop_rx) => break,
            item = stream.next() => item,
        };
        match item {
            Some(Ok(Enumerated::Object(path))) => {
                tokio::select! {
                    biased;
                    _ = stopped(&mut stop_rx) => break,
                    sent = work_tx.send(path) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
            }
            Some(Ok(Enumerated::ListingFailed { collection, error })) => {
                results.listing_failed(collection, error);
            }
            Some(Err(e)) => {
                error!(error = %e, "Enumeration aborted by pool fault");
                results.abort(format!("enumeration failed: {e}"));
                stop_tx.send_replace(true);
                break;
            }
            None => break,
        }
    }
    debug!("Enumeration finished");
}

/// Resolve once the stop flag is set.
async fn stopped(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Verify-and-repair rounds per object. Violations exposed by the last
/// round are recorded but left unrepaired.
const REPAIR_PASSES: u32 = 3;

struct WorkerContext {
    pool: ClientPool,
    lookup: WarehouseLookup,
    verifier: Verifier,
    repairer: Repairer,
    mode: RunMode,
    max_attempts: u32,
    best_effort: bool,
    results: AggregateSender,
    stop_tx: Arc<watch::Sender<bool>>,
}

async fn worker(
    id: usize,
    ctx: Arc<WorkerContext>,
    work_rx: Arc<Mutex<mpsc::Receiver<String>>>,
    stop_rx: watch::Receiver<bool>,
) {
    loop {
        if *stop_rx.borrow() {
            break;
        }
        let next = {
            let mut rx = work_rx.lock().await;
            rx.recv().await
        };
        let Some(path) = next else {
            break;
        };
        if *stop_rx.borrow() {
            break;
        }

        let outcome = process_isolated(&ctx, path).await;
        let stop_reason = if outcome.fatal {
            Some(format!(
                "pool fault on {}: {}",
                outcome.path,
                outcome.errors.last().map_or("", String::as_str)
            ))
        } else if !ctx.best_effort && !outcome.errors.is_empty() {
            Some(format!("error on {} without best-effort continuation", outcome.path))
        } else {
            None
        };
        ctx.results.object(outcome);

        if let Some(reason) = stop_reason {
            error!(worker = id, reason = %reason, "Stopping run");
            ctx.results.abort(reason);
            ctx.stop_tx.send_replace(true);
            break;
        }
    }
    debug!(worker = id, "Worker finished");
}

/// Process one object in its own task so a panic is recorded, not propagated.
async fn process_isolated(ctx: &Arc<WorkerContext>, path: String) -> ObjectOutcome {
    let task_ctx = Arc::clone(ctx);
    let task_path = path.clone();
    let handle = tokio::spawn(
        async move { process_object(&task_ctx, task_path).await }.in_current_span(),
    );
    match handle.await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(path = %path, error = %e, "Object task failed");
            let mut outcome = ObjectOutcome::new(path);
            outcome.state = TaskState::VerifyFailed;
            outcome.errors.push(format!("object task failed: {e}"));
            outcome
        }
    }
}

#[tracing::instrument(skip(ctx), fields(mode = %ctx.mode))]
async fn process_object(ctx: &WorkerContext, path: String) -> ObjectOutcome {
    let mut task = ObjectTask::new();
    let mut outcome = ObjectOutcome::new(path.as_str());

    let Some(mut client) = checkout(ctx, &mut outcome).await else {
        fail(&mut task, &mut outcome, TaskState::VerifyFailed);
        return outcome;
    };
    transition(&mut task, &mut outcome, TaskState::Running);

    let object = loop {
        outcome.attempts += 1;
        match client.fetch_object(&path).await {
            Ok(object) => break object,
            Err(e) if e.is_transient() && outcome.attempts < ctx.max_attempts => {
                warn!(
                    attempt = outcome.attempts,
                    error = %e,
                    "Transient error reading object, retrying"
                );
                client.release(false);
                client = match checkout(ctx, &mut outcome).await {
                    Some(client) => client,
                    None => {
                        fail(&mut task, &mut outcome, TaskState::VerifyFailed);
                        return outcome;
                    }
                };
            }
            Err(e) => {
                warn!(error = %e, "Failed to read object");
                client.release_after(Some(&e));
                outcome.errors.push(format!("reading object: {e}"));
                fail(&mut task, &mut outcome, TaskState::VerifyFailed);
                return outcome;
            }
        }
    };

    let (status, reference) = ctx.lookup.lookup(&object).await;
    outcome.reference = status;
    outcome.class = object.class();
    outcome.violations = ctx.verifier.verify(&object, reference.as_ref());
    transition(&mut task, &mut outcome, TaskState::Verified);

    for violation in &outcome.violations {
        debug!(kind = %violation.kind(), violation = %violation, "Violation");
    }

    if ctx.mode == RunMode::Check || outcome.violations.is_empty() {
        client.release(true);
        finish(&mut task, &mut outcome);
        return outcome;
    }

    transition(&mut task, &mut outcome, TaskState::Repairing);
    let mut client = Some(client);
    let mut current = object;
    let mut pending = outcome.violations.clone();
    for pass in 1..=REPAIR_PASSES {
        for violation in pending {
            let repair = repair_with_retry(
                ctx,
                &mut client,
                &current,
                reference.as_ref(),
                &violation,
                &mut outcome,
            )
            .await;
            outcome.repairs.push(RepairRecord {
                violation,
                outcome: repair,
            });
        }

        // A repair can expose a check that was masked before it, such as
        // the md5 attribute behind an incomplete set of replica checksums.
        let Some(refreshed) = reread(ctx, &mut client, &path, &mut outcome).await else {
            break;
        };
        let exposed: Vec<Violation> = ctx
            .verifier
            .verify(&refreshed, reference.as_ref())
            .into_iter()
            .filter(|v| !outcome.violations.contains(v))
            .collect();
        if exposed.is_empty() {
            break;
        }
        for violation in &exposed {
            debug!(
                pass,
                kind = %violation.kind(),
                violation = %violation,
                "Violation exposed by repair"
            );
        }
        outcome.violations.extend(exposed.iter().cloned());
        current = refreshed;
        pending = exposed;
        if pass == REPAIR_PASSES {
            warn!(
                unrepaired = pending.len(),
                "Violations still exposed after the last repair pass"
            );
        }
    }
    if let Some(client) = client {
        client.release(true);
    }

    let failed = outcome
        .repairs
        .iter()
        .any(|r| matches!(r.outcome, RepairOutcome::Failed(_)));
    let next = if failed {
        TaskState::RepairFailed
    } else {
        TaskState::Repaired
    };
    transition(&mut task, &mut outcome, next);
    finish(&mut task, &mut outcome);
    outcome
}

/// Re-read an object after repairs, checking out a client if needed.
async fn reread(
    ctx: &WorkerContext,
    client: &mut Option<PooledClient>,
    path: &str,
    outcome: &mut ObjectOutcome,
) -> Option<StoredObject> {
    let current = match client.take() {
        Some(current) => current,
        None => checkout(ctx, outcome).await?,
    };
    match current.fetch_object(path).await {
        Ok(object) => {
            *client = Some(current);
            Some(object)
        }
        Err(e) => {
            warn!(error = %e, "Failed to re-read object after repair");
            current.release_after(Some(&e));
            outcome.errors.push(format!("re-reading object: {e}"));
            None
        }
    }
}

/// Apply one repair, replacing the client after transient errors.
async fn repair_with_retry(
    ctx: &WorkerContext,
    client: &mut Option<PooledClient>,
    object: &StoredObject,
    reference: Option<&WarehouseRecord>,
    violation: &Violation,
    outcome: &mut ObjectOutcome,
) -> RepairOutcome {
    let mut last_error: Option<StorageError> = None;
    for attempt in 1..=ctx.max_attempts {
        let current = match client.take() {
            Some(current) => current,
            None => match checkout(ctx, outcome).await {
                Some(fresh) => fresh,
                None => return RepairOutcome::failed("no storage client available"),
            },
        };
        match ctx.repairer.repair(&*current, object, reference, violation).await {
            Ok(result) => {
                *client = Some(current);
                return result;
            }
            Err(e) if e.is_transient() => {
                warn!(
                    attempt,
                    kind = %violation.kind(),
                    error = %e,
                    "Transient error during repair"
                );
                current.release(false);
                last_error = Some(e);
            }
            Err(e) => {
                *client = Some(current);
                return RepairOutcome::failed(e.to_string());
            }
        }
    }
    RepairOutcome::failed(
        last_error.map_or_else(|| "repair not attempted".to_string(), |e| e.to_string()),
    )
}

/// Check out a client, recording pool errors on the outcome.
async fn checkout(ctx: &WorkerContext, outcome: &mut ObjectOutcome) -> Option<PooledClient> {
    match ctx.pool.acquire().await {
        Ok(client) => Some(client),
        Err(e) => {
            let reason = match &e {
                PoolError::Timeout(_) => format!("pool exhausted: {e}"),
                _ => e.to_string(),
            };
            warn!(error = %e, "Could not check out a storage client");
            outcome.fatal |= e.is_fatal();
            outcome.errors.push(reason);
            None
        }
    }
}

fn transition(task: &mut ObjectTask, outcome: &mut ObjectOutcome, next: TaskState) {
    match task.advance(next) {
        Ok(()) => outcome.state = task.outcome(),
        Err(e) => {
            error!(error = %e, "Task state error");
            outcome.errors.push(e.to_string());
        }
    }
}

fn fail(task: &mut ObjectTask, outcome: &mut ObjectOutcome, state: TaskState) {
    transition(task, outcome, state);
    finish(task, outcome);
}

fn finish(task: &mut ObjectTask, outcome: &mut ObjectOutcome) {
    if let Err(e) = task.finish() {
        error!(error = %e, "Task state error");
        outcome.errors.push(e.to_string());
    }
    outcome.state = task.outcome();
}
