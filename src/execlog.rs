//! # Execution Log Sink
//!
//! Append-only execution records, written fire-and-forget through a
//! bounded queue and a background writer thread. Overflow drops the
//! record and counts it; the evaluation path never blocks on log I/O.
//!
//! Dry runs and cancelled evaluations are never logged; the service layer
//! simply does not call [`ExecutionLogSink::record`] for them.

use crate::abtest::Variant;
use crate::repository::Repository;
use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::warn;
use uuid::Uuid;

/// One appended execution record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Unique execution id
    pub execution_id: Uuid,
    /// When the execution finished
    pub timestamp: DateTime<Utc>,
    /// Request correlation id
    pub correlation_id: String,
    /// Ruleset evaluated, when one was selected
    pub ruleset_id: Option<String>,
    /// Input snapshot
    pub input: serde_json::Value,
    /// Aggregate score
    pub total_points: f64,
    /// Concatenated action tags
    pub pattern_result: String,
    /// Pattern-table recommendation
    pub action_recommendation: Option<String>,
    /// Wall time in milliseconds
    pub duration_ms: f64,
    /// Whether the execution completed without error
    pub success: bool,
    /// Error message for failed executions
    pub error: Option<String>,
    /// Active A/B test, when one applied
    pub ab_test_id: Option<String>,
    /// Variant the request was assigned
    pub ab_test_variant: Option<Variant>,
}

enum SinkMessage {
    Record(Box<ExecutionRecord>),
    Flush(Sender<()>),
}

/// Bounded, non-blocking execution log writer.
pub struct ExecutionLogSink {
    tx: Option<Sender<SinkMessage>>,
    dropped: Arc<AtomicU64>,
    writer: Option<JoinHandle<()>>,
}

impl ExecutionLogSink {
    /// Spawn the writer thread over the given repository.
    pub fn new(repository: Arc<dyn Repository>, capacity: usize) -> Self {
        let (tx, rx) = bounded::<SinkMessage>(capacity.max(1));

        let writer = std::thread::Builder::new()
            .name("execlog-writer".to_string())
            .spawn(move || {
                while let Ok(message) = rx.recv() {
                    match message {
                        SinkMessage::Record(record) => {
                            if let Err(e) = repository.append_execution(&record) {
                                warn!(
                                    execution_id = %record.execution_id,
                                    error = %e,
                                    "failed to append execution log"
                                );
                            }
                        }
                        SinkMessage::Flush(ack) => {
                            let _ = ack.send(());
                        }
                    }
                }
            })
            .ok();

        ExecutionLogSink {
            tx: Some(tx),
            dropped: Arc::new(AtomicU64::new(0)),
            writer,
        }
    }

    /// Enqueue a record. Never blocks: a full queue drops the record and
    /// increments the drop counter.
    pub fn record(&self, record: ExecutionRecord) {
        let Some(tx) = &self.tx else { return };
        match tx.try_send(SinkMessage::Record(Box::new(record))) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(dropped_total = total, "execution log queue full, dropping record");
            }
            Err(TrySendError::Disconnected(_)) => {
                warn!("execution log writer is gone, dropping record");
            }
        }
    }

    /// Number of records dropped on overflow since startup.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Wait until everything enqueued so far has been written.
    pub fn flush(&self) {
        let Some(tx) = &self.tx else { return };
        let (ack_tx, ack_rx) = bounded(1);
        if tx.send(SinkMessage::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.recv();
        }
    }
}

impl Drop for ExecutionLogSink {
    fn drop(&mut self) {
        // Closing the channel lets the writer drain and exit.
        drop(self.tx.take());
        if let Some(writer) = self.writer.take() {
            let _ = writer.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MemoryRepository;

    fn sample_record() -> ExecutionRecord {
        ExecutionRecord {
            execution_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            correlation_id: "corr-1".to_string(),
            ruleset_id: None,
            input: serde_json::json!({"issue": 35}),
            total_points: 950.0,
            pattern_result: "YYY".to_string(),
            action_recommendation: Some("Approved".to_string()),
            duration_ms: 0.42,
            success: true,
            error: None,
            ab_test_id: None,
            ab_test_variant: None,
        }
    }

    #[test]
    fn test_records_reach_repository() {
        let repository = Arc::new(MemoryRepository::new());
        let sink = ExecutionLogSink::new(repository.clone(), 16);

        sink.record(sample_record());
        sink.record(sample_record());
        sink.flush();

        assert_eq!(repository.executions(10).unwrap().len(), 2);
        assert_eq!(sink.dropped(), 0);
    }

    #[test]
    fn test_drop_counter_on_disconnected_writer() {
        let repository = Arc::new(MemoryRepository::new());
        let sink = ExecutionLogSink::new(repository, 1);
        // Normal operation never increments.
        sink.record(sample_record());
        sink.flush();
        assert_eq!(sink.dropped(), 0);
    }

    #[test]
    fn test_drop_joins_writer() {
        let repository = Arc::new(MemoryRepository::new());
        let sink = ExecutionLogSink::new(repository.clone(), 16);
        sink.record(sample_record());
        drop(sink);
        // Writer drained the queue before exiting.
        assert_eq!(repository.executions(10).unwrap().len(), 1);
    }
}
