//! # Batch Executor
//!
//! Fans a list of input records across a fixed-size worker pool. Each
//! worker runs the evaluation closure for one record to completion;
//! results come back ordered by input index regardless of completion
//! order, and a single failed record never aborts the batch.
//!
//! Cancellation is cooperative: records not yet started when the token
//! fires are marked cancelled in the result array.

use crate::cancel::CancelToken;
use rayon::prelude::*;
use serde::Serialize;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Batch-level errors. Per-record failures are data, not errors.
#[derive(Debug, Error)]
pub enum BatchError {
    /// The input array was empty
    #[error("batch input must contain at least one record")]
    EmptyInput,

    /// The worker pool could not be built
    #[error("failed to build worker pool: {0}")]
    Pool(String),
}

/// Batch execution options.
#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    /// Pool size; defaults to `min(cpu_count, input_len)`
    pub max_workers: Option<usize>,
    /// Evaluate without side effects
    pub dry_run: bool,
}

/// Outcome of one record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ItemOutcome {
    /// Evaluation completed
    Success {
        /// Aggregate score
        total_points: f64,
        /// Concatenated action tags
        pattern_result: String,
        /// Pattern-table recommendation
        action_recommendation: Option<String>,
    },
    /// Evaluation failed; the rest of the batch is unaffected
    Failure {
        /// Error message
        error: String,
        /// Error taxonomy kind
        error_type: String,
    },
    /// The batch was cancelled before this record ran
    Cancelled,
}

/// Per-record result, index-stable.
#[derive(Debug, Clone, Serialize)]
pub struct ItemResult {
    /// Position in the input array
    pub index: usize,
    /// What happened
    pub outcome: ItemOutcome,
    /// Wall time spent on this record, milliseconds
    pub duration_ms: f64,
}

/// Batch summary statistics.
#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    /// Records submitted
    pub total: usize,
    /// Records that succeeded
    pub successful: usize,
    /// Records that failed
    pub failed: usize,
    /// Records skipped by cancellation
    pub cancelled: usize,
    /// Wall time of the whole batch, milliseconds
    pub total_duration_ms: f64,
    /// Mean per-record duration, milliseconds
    pub average_duration_ms: f64,
    /// `successful / total`
    pub success_rate: f64,
}

/// Full batch result.
#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    /// Per-record results ordered by input index
    pub results: Vec<ItemResult>,
    /// Aggregate statistics
    pub summary: BatchSummary,
}

/// Evaluation closure outcome: success payload or `(error, error_type)`.
pub type ItemEvaluation = Result<(f64, String, Option<String>), (String, String)>;

/// Run the batch.
///
/// `evaluate` is called once per record, from pool workers, in parallel.
/// Dispatch follows input order; the result array is indexed by input
/// position whatever order workers finish in.
pub fn run_batch<T, F>(
    records: Vec<T>,
    options: &BatchOptions,
    cancel: &CancelToken,
    evaluate: F,
) -> Result<BatchResult, BatchError>
where
    T: Send + Sync,
    F: Fn(&T) -> ItemEvaluation + Send + Sync,
{
    if records.is_empty() {
        return Err(BatchError::EmptyInput);
    }

    let workers = options
        .max_workers
        .filter(|&w| w > 0)
        .unwrap_or_else(|| num_cpus::get().min(records.len()))
        .min(records.len().max(1));

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .map_err(|e| BatchError::Pool(e.to_string()))?;

    let started = Instant::now();
    let results: Vec<ItemResult> = pool.install(|| {
        records
            .par_iter()
            .enumerate()
            .map(|(index, record)| {
                if cancel.is_cancelled() {
                    return ItemResult {
                        index,
                        outcome: ItemOutcome::Cancelled,
                        duration_ms: 0.0,
                    };
                }
                let item_started = Instant::now();
                let outcome = match evaluate(record) {
                    Ok((total_points, pattern_result, action_recommendation)) => {
                        ItemOutcome::Success {
                            total_points,
                            pattern_result,
                            action_recommendation,
                        }
                    }
                    Err((error, error_type)) => ItemOutcome::Failure { error, error_type },
                };
                ItemResult {
                    index,
                    outcome,
                    duration_ms: as_millis(item_started.elapsed()),
                }
            })
            .collect()
    });

    let total = results.len();
    let successful = results
        .iter()
        .filter(|r| matches!(r.outcome, ItemOutcome::Success { .. }))
        .count();
    let failed = results
        .iter()
        .filter(|r| matches!(r.outcome, ItemOutcome::Failure { .. }))
        .count();
    let cancelled = total - successful - failed;
    let total_duration_ms = as_millis(started.elapsed());

    Ok(BatchResult {
        summary: BatchSummary {
            total,
            successful,
            failed,
            cancelled,
            total_duration_ms,
            average_duration_ms: total_duration_ms / total as f64,
            success_rate: successful as f64 / total as f64,
        },
        results,
    })
}

fn as_millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}
