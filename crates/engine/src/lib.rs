//! Verification and repair engine for rodwatch.
//!
//! This crate provides the reconciliation core:
//! - A bounded pool of storage clients shared by all workers
//! - Lazy enumeration of data objects under root collections
//! - Pure per-object verification against fixed and warehouse-derived invariants
//! - Idempotent repairs, one violation at a time
//! - The worker scheduler and the single-owner result aggregator

pub mod aggregate;
pub mod enumerator;
pub mod error;
pub mod pool;
pub mod repair;
pub mod scheduler;
pub mod state;
pub mod verify;

pub use aggregate::{ListingFailure, ObjectOutcome, RepairRecord, RunMode, RunResult, RunTotals};
pub use enumerator::{Enumerated, PathEnumerator, PathSource};
pub use error::{EngineError, EngineResult, PoolError};
pub use pool::{ClientPool, PoolConfig, PoolStats, PooledClient};
pub use repair::Repairer;
pub use scheduler::Engine;
pub use state::{ObjectTask, TaskState};
pub use verify::Verifier;
