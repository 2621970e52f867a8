//! # Rule Registry (Hot-Reload)
//!
//! Per-process, thread-safe cache of compiled rules. The current
//! generation sits behind an atomic pointer swap ([`arc_swap::ArcSwap`]),
//! so readers never block and a reader that started before a reload keeps
//! its pre-reload snapshot for the whole request. Writers are serialized
//! through a single writer lock and always produce a new generation.
//!
//! ## Change notifications
//!
//! Subscribers get a bounded per-subscriber buffer. A slow subscriber
//! never blocks the writer: on overflow the oldest buffered event is
//! dropped with a warning.
//!
//! ## Transactional reload
//!
//! [`RuleRegistry::reload`] validates the entire incoming snapshot
//! (compile every rule, check duplicate ids, check pattern keys) before
//! installing it. On failure the old generation stays in place and a
//! `reload_failed` event is published.

pub mod monitor;
pub mod snapshot;

pub use monitor::ReloadMonitor;
pub use snapshot::RegistrySnapshot;

use crate::evaluator::CompiledRule;
use crate::model::{Condition, Rule};
use crate::pipeline::{CompiledRuleset, PipelineError};
use crate::repository::{Repository, RepositoryError};
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Default per-subscriber event buffer.
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 256;

/// Registry errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// `add_rule` with an id that already exists
    #[error("rule '{0}' already exists")]
    DuplicateRule(String),

    /// `update_rule`/`remove_rule` against an unknown id
    #[error("rule '{0}' not found")]
    UnknownRule(String),

    /// Snapshot validation failed
    #[error(transparent)]
    Validation(#[from] PipelineError),

    /// Repository read failed
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Result alias for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Published on every registry mutation, in write order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ChangeEvent {
    /// A single rule was added
    RuleAdded {
        /// The rule
        rule_id: String,
        /// Registry version after the write
        version: u64,
    },
    /// A single rule was replaced
    RuleUpdated {
        /// The rule
        rule_id: String,
        /// Registry version after the write
        version: u64,
    },
    /// A single rule was removed
    RuleRemoved {
        /// The rule
        rule_id: String,
        /// Registry version after the write
        version: u64,
    },
    /// A full snapshot was installed
    RulesReloaded {
        /// Registry version after the swap
        version: u64,
        /// Compiled rule count of the new generation
        rule_count: usize,
    },
    /// A reload was rejected; the old generation is still serving
    ReloadFailed {
        /// Registry version that keeps serving
        version: u64,
        /// Why the reload was rejected
        error: String,
    },
}

/// A registered change listener.
///
/// Dropping the subscription detaches it; the registry prunes dead
/// subscribers on the next publish.
pub struct Subscription {
    /// Subscriber id, usable with [`RuleRegistry::unsubscribe`]
    pub id: u64,
    receiver: Receiver<ChangeEvent>,
}

impl Subscription {
    /// Block until the next event (or the registry goes away).
    pub fn recv(&self) -> Option<ChangeEvent> {
        self.receiver.recv().ok()
    }

    /// Block with a timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<ChangeEvent> {
        self.receiver.recv_timeout(timeout).ok()
    }

    /// Non-blocking poll.
    pub fn try_recv(&self) -> Option<ChangeEvent> {
        self.receiver.try_recv().ok()
    }
}

struct Subscriber {
    id: u64,
    tx: Sender<ChangeEvent>,
    // Mirror of the receiver so the publisher can implement drop-oldest.
    rx: Receiver<ChangeEvent>,
}

/// Validation report for a repository snapshot (admin `validate`).
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    /// Whether the snapshot would install cleanly
    pub ok: bool,
    /// Human-readable problems, empty when ok
    pub errors: Vec<String>,
    /// Rules the snapshot would compile
    pub rule_count: usize,
}

/// Health/status view of the registry.
#[derive(Debug, Clone, Serialize)]
pub struct RegistryStatus {
    /// Current generation number
    pub registry_version: u64,
    /// When the last successful reload happened
    pub last_reload_time: Option<DateTime<Utc>>,
    /// `"never"`, `"ok"` or `"failed: …"`
    pub last_reload_status: String,
    /// Compiled rules in the current generation
    pub rule_count: usize,
    /// Whether the background monitor is running
    pub monitoring_active: bool,
}

#[derive(Debug, Clone)]
enum ReloadOutcome {
    Never,
    Ok(DateTime<Utc>),
    Failed(DateTime<Utc>, String),
}

/// The hot-reloadable rule registry.
pub struct RuleRegistry {
    repository: Arc<dyn Repository>,
    current: ArcSwap<RegistrySnapshot>,
    // Serializes all generation-producing writes.
    writer: Mutex<()>,
    subscribers: RwLock<Vec<Subscriber>>,
    next_subscriber_id: AtomicU64,
    subscriber_buffer: usize,
    last_reload: Mutex<ReloadOutcome>,
    monitoring: Arc<AtomicBool>,
}

impl RuleRegistry {
    /// Create a registry over a repository, starting from the empty
    /// generation. Call [`RuleRegistry::reload`] to load the catalog.
    pub fn new(repository: Arc<dyn Repository>) -> Self {
        Self::with_buffer(repository, DEFAULT_SUBSCRIBER_BUFFER)
    }

    /// Create a registry with a custom per-subscriber event buffer.
    pub fn with_buffer(repository: Arc<dyn Repository>, subscriber_buffer: usize) -> Self {
        RuleRegistry {
            repository,
            current: ArcSwap::from_pointee(RegistrySnapshot::empty()),
            writer: Mutex::new(()),
            subscribers: RwLock::new(Vec::new()),
            next_subscriber_id: AtomicU64::new(1),
            subscriber_buffer: subscriber_buffer.max(1),
            last_reload: Mutex::new(ReloadOutcome::Never),
            monitoring: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The current generation. Readers hold this `Arc` for the duration of
    /// a request; later swaps do not affect it.
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.current.load_full()
    }

    /// Current generation number.
    pub fn version(&self) -> u64 {
        self.current.load().version
    }

    /// O(1) compiled-rule lookup on the current generation.
    pub fn get_rule(&self, rule_id: &str) -> Option<Arc<CompiledRule>> {
        self.current.load().rule(rule_id)
    }

    /// Compiled rules of the current generation, optionally filtered by
    /// ruleset. O(n) scan.
    pub fn get_rules(&self, ruleset_id: Option<&str>) -> Vec<Arc<CompiledRule>> {
        self.current.load().rules(ruleset_id)
    }

    /// Evaluable view over the current generation.
    pub fn ruleset_view(&self, ruleset_id: Option<&str>) -> CompiledRuleset {
        self.current.load().ruleset_view(ruleset_id)
    }

    /// Add a rule, producing a new generation.
    pub fn add_rule(&self, rule: Rule) -> RegistryResult<u64> {
        let _guard = self.writer.lock();
        let current = self.current.load_full();
        if current.contains(&rule.rule_id) {
            return Err(RegistryError::DuplicateRule(rule.rule_id));
        }
        let rule_id = rule.rule_id.clone();
        let version = self.install_mutation(&current, |rules| rules.push(rule))?;
        self.publish(ChangeEvent::RuleAdded { rule_id, version });
        Ok(version)
    }

    /// Replace a rule, producing a new generation.
    pub fn update_rule(&self, rule: Rule) -> RegistryResult<u64> {
        let _guard = self.writer.lock();
        let current = self.current.load_full();
        if !current.contains(&rule.rule_id) {
            return Err(RegistryError::UnknownRule(rule.rule_id));
        }
        let rule_id = rule.rule_id.clone();
        let version = self.install_mutation(&current, |rules| {
            rules.retain(|r| r.rule_id != rule.rule_id);
            rules.push(rule);
        })?;
        self.publish(ChangeEvent::RuleUpdated { rule_id, version });
        Ok(version)
    }

    /// Remove a rule, producing a new generation.
    pub fn remove_rule(&self, rule_id: &str) -> RegistryResult<u64> {
        let _guard = self.writer.lock();
        let current = self.current.load_full();
        if !current.contains(rule_id) {
            return Err(RegistryError::UnknownRule(rule_id.to_string()));
        }
        let version = self.install_mutation(&current, |rules| {
            rules.retain(|r| r.rule_id != rule_id);
        })?;
        self.publish(ChangeEvent::RuleRemoved {
            rule_id: rule_id.to_string(),
            version,
        });
        Ok(version)
    }

    /// Build and install a mutated copy of the current generation.
    ///
    /// Caller must hold the writer lock.
    fn install_mutation(
        &self,
        current: &RegistrySnapshot,
        mutate: impl FnOnce(&mut Vec<Rule>),
    ) -> RegistryResult<u64> {
        let mut rules: Vec<Rule> = current.raw_rules().cloned().collect();
        mutate(&mut rules);
        let conditions: Vec<Condition> = current.conditions().values().cloned().collect();
        let patterns = current.ruleset_view(None).patterns.as_ref().clone();

        let version = current.version + 1;
        let next = RegistrySnapshot::build(version, rules, conditions, patterns)?;
        self.current.store(Arc::new(next));
        Ok(version)
    }

    /// Atomically replace the whole catalog from the repository.
    ///
    /// Either the new snapshot installs completely, or the old one keeps
    /// serving and a [`ChangeEvent::ReloadFailed`] is published.
    pub fn reload(&self) -> RegistryResult<u64> {
        let _guard = self.writer.lock();
        let current_version = self.current.load().version;

        let loaded = self
            .repository
            .read_rules_set()
            .and_then(|rules| {
                let conditions = self.repository.read_conditions_set()?;
                let patterns = self.repository.read_patterns()?;
                Ok((rules, conditions, patterns))
            })
            .map_err(RegistryError::from)
            .and_then(|(rules, conditions, patterns)| {
                RegistrySnapshot::build(current_version + 1, rules, conditions, patterns)
                    .map_err(RegistryError::from)
            });

        match loaded {
            Ok(next) => {
                let version = next.version;
                let rule_count = next.rule_count();
                self.current.store(Arc::new(next));
                *self.last_reload.lock() = ReloadOutcome::Ok(Utc::now());
                info!(version, rule_count, "rules reloaded");
                self.publish(ChangeEvent::RulesReloaded {
                    version,
                    rule_count,
                });
                Ok(version)
            }
            Err(error) => {
                let message = error.to_string();
                *self.last_reload.lock() = ReloadOutcome::Failed(Utc::now(), message.clone());
                warn!(version = current_version, error = %message, "reload rejected, keeping old snapshot");
                self.publish(ChangeEvent::ReloadFailed {
                    version: current_version,
                    error: message,
                });
                Err(error)
            }
        }
    }

    /// Validate what a reload would install, without installing it.
    pub fn validate(&self) -> ValidationReport {
        let loaded = self.repository.read_rules_set().and_then(|rules| {
            let conditions = self.repository.read_conditions_set()?;
            let patterns = self.repository.read_patterns()?;
            Ok((rules, conditions, patterns))
        });

        match loaded {
            Ok((rules, conditions, patterns)) => {
                match RegistrySnapshot::build(0, rules, conditions, patterns) {
                    Ok(snapshot) => ValidationReport {
                        ok: true,
                        errors: Vec::new(),
                        rule_count: snapshot.rule_count(),
                    },
                    Err(e) => ValidationReport {
                        ok: false,
                        errors: vec![e.to_string()],
                        rule_count: 0,
                    },
                }
            }
            Err(e) => ValidationReport {
                ok: false,
                errors: vec![e.to_string()],
                rule_count: 0,
            },
        }
    }

    /// Register a change listener.
    pub fn subscribe(&self) -> Subscription {
        let id = self.next_subscriber_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = bounded(self.subscriber_buffer);
        self.subscribers.write().push(Subscriber {
            id,
            tx,
            rx: rx.clone(),
        });
        Subscription { id, receiver: rx }
    }

    /// Remove a listener.
    pub fn unsubscribe(&self, id: u64) {
        self.subscribers.write().retain(|s| s.id != id);
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Deliver an event to every subscriber, in publish order, without
    /// ever blocking the writer: a full buffer drops its oldest event.
    fn publish(&self, event: ChangeEvent) {
        let mut dead: Vec<u64> = Vec::new();
        {
            let subscribers = self.subscribers.read();
            for subscriber in subscribers.iter() {
                let mut outgoing = event.clone();
                loop {
                    match subscriber.tx.try_send(outgoing) {
                        Ok(()) => break,
                        Err(TrySendError::Full(back)) => {
                            // Drop-oldest: evict one buffered event, retry.
                            let _ = subscriber.rx.try_recv();
                            warn!(
                                subscriber = subscriber.id,
                                "subscriber lagging, dropped oldest change event"
                            );
                            outgoing = back;
                        }
                        Err(TrySendError::Disconnected(_)) => {
                            dead.push(subscriber.id);
                            break;
                        }
                    }
                }
            }
        }
        if !dead.is_empty() {
            self.subscribers.write().retain(|s| !dead.contains(&s.id));
        }
    }

    /// Whether the last successful reload happened within `max_age`.
    pub fn is_fresh(&self, max_age: Duration) -> bool {
        match *self.last_reload.lock() {
            ReloadOutcome::Ok(at) => {
                let age = Utc::now().signed_duration_since(at);
                age.to_std().map(|age| age <= max_age).unwrap_or(true)
            }
            _ => false,
        }
    }

    /// Health/status report.
    pub fn status(&self) -> RegistryStatus {
        let snapshot = self.current.load();
        let (last_reload_time, last_reload_status) = match &*self.last_reload.lock() {
            ReloadOutcome::Never => (None, "never".to_string()),
            ReloadOutcome::Ok(at) => (Some(*at), "ok".to_string()),
            ReloadOutcome::Failed(at, error) => (Some(*at), format!("failed: {}", error)),
        };
        RegistryStatus {
            registry_version: snapshot.version,
            last_reload_time,
            last_reload_status,
            rule_count: snapshot.rule_count(),
            monitoring_active: self.monitoring.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn repository(&self) -> &Arc<dyn Repository> {
        &self.repository
    }

    pub(crate) fn monitoring_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.monitoring)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Operator;
    use crate::repository::MemoryRepository;
    use crate::value::Value;
    use std::collections::HashMap;

    fn seeded_repository(rule_count: usize) -> Arc<MemoryRepository> {
        let repo = Arc::new(MemoryRepository::new());
        let rules: Vec<Rule> = (0..rule_count)
            .map(|i| {
                Rule::simple(
                    format!("R{}", i),
                    format!("rule {}", i),
                    "issue",
                    Operator::GreaterThan,
                    Value::Int(30),
                )
                .with_priority(i as i64)
                .with_score(10.0, 1.0)
            })
            .collect();
        repo.seed(rules, vec![], HashMap::new());
        repo
    }

    #[test]
    fn test_reload_installs_snapshot_and_publishes() {
        let repo = seeded_repository(2);
        let registry = RuleRegistry::new(repo);
        let subscription = registry.subscribe();

        let version = registry.reload().unwrap();
        assert_eq!(version, 1);
        assert_eq!(registry.version(), 1);
        assert_eq!(registry.get_rules(None).len(), 2);
        assert_eq!(
            subscription.try_recv(),
            Some(ChangeEvent::RulesReloaded {
                version: 1,
                rule_count: 2
            })
        );
    }

    #[test]
    fn test_failed_reload_keeps_old_snapshot() {
        let repo = seeded_repository(1);
        let registry = RuleRegistry::new(repo.clone());
        registry.reload().unwrap();
        let subscription = registry.subscribe();

        // Poison the repository with an uncompilable rule.
        repo.upsert_rule(&Rule::composite("bad", "broken", vec!["missing".into()]))
            .unwrap();

        assert!(registry.reload().is_err());
        assert_eq!(registry.version(), 1);
        assert_eq!(registry.get_rules(None).len(), 1);
        assert!(matches!(
            subscription.try_recv(),
            Some(ChangeEvent::ReloadFailed { version: 1, .. })
        ));

        let status = registry.status();
        assert!(status.last_reload_status.starts_with("failed:"));
    }

    #[test]
    fn test_reader_keeps_generation_across_reload() {
        let repo = seeded_repository(1);
        let registry = RuleRegistry::new(repo.clone());
        registry.reload().unwrap();

        let held = registry.snapshot();
        assert_eq!(held.rule_count(), 1);

        repo.upsert_rule(
            &Rule::simple("R9", "new", "x", Operator::Equal, Value::Int(1)).with_priority(9),
        )
        .unwrap();
        registry.reload().unwrap();

        // The held generation is unchanged; fresh reads see the new one.
        assert_eq!(held.rule_count(), 1);
        assert_eq!(registry.snapshot().rule_count(), 2);
    }

    #[test]
    fn test_single_rule_mutations() {
        let repo = seeded_repository(1);
        let registry = RuleRegistry::new(repo);
        registry.reload().unwrap();
        let subscription = registry.subscribe();

        let rule = Rule::simple("R9", "added", "x", Operator::Equal, Value::Int(1));
        let version = registry.add_rule(rule.clone()).unwrap();
        assert_eq!(version, 2);
        assert!(registry.get_rule("R9").is_some());

        assert!(matches!(
            registry.add_rule(rule.clone()),
            Err(RegistryError::DuplicateRule(_))
        ));

        let mut updated = rule.clone();
        updated.action_result = "N".to_string();
        registry.update_rule(updated).unwrap();
        assert_eq!(
            registry.get_rule("R9").unwrap().action_result.as_str(),
            "N"
        );

        registry.remove_rule("R9").unwrap();
        assert!(registry.get_rule("R9").is_none());
        assert!(matches!(
            registry.remove_rule("R9"),
            Err(RegistryError::UnknownRule(_))
        ));

        let events: Vec<ChangeEvent> =
            std::iter::from_fn(|| subscription.try_recv()).collect();
        assert_eq!(events.len(), 4);
        assert!(matches!(events[0], ChangeEvent::RuleAdded { .. }));
        assert!(matches!(events[3], ChangeEvent::RuleRemoved { .. }));
    }

    #[test]
    fn test_slow_subscriber_drops_oldest() {
        let repo = seeded_repository(0);
        let registry = RuleRegistry::with_buffer(repo, 2);
        let subscription = registry.subscribe();

        for i in 0..5 {
            registry
                .add_rule(Rule::simple(
                    format!("R{}", i),
                    "r",
                    "x",
                    Operator::Equal,
                    Value::Int(1),
                ))
                .unwrap();
        }

        // Only the newest two events survived.
        let events: Vec<ChangeEvent> =
            std::iter::from_fn(|| subscription.try_recv()).collect();
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[1],
            ChangeEvent::RuleAdded {
                rule_id: "R4".to_string(),
                version: 5
            }
        );
    }

    #[test]
    fn test_dropped_subscription_is_pruned() {
        let repo = seeded_repository(0);
        let registry = RuleRegistry::new(repo);
        let subscription = registry.subscribe();
        assert_eq!(registry.subscriber_count(), 1);
        drop(subscription);

        registry
            .add_rule(Rule::simple("R1", "r", "x", Operator::Equal, Value::Int(1)))
            .unwrap();
        assert_eq!(registry.subscriber_count(), 0);
    }

    #[test]
    fn test_validate_does_not_install() {
        let repo = seeded_repository(1);
        let registry = RuleRegistry::new(repo.clone());

        let report = registry.validate();
        assert!(report.ok);
        assert_eq!(report.rule_count, 1);
        assert_eq!(registry.version(), 0);

        repo.upsert_rule(&Rule::composite("bad", "broken", vec!["missing".into()]))
            .unwrap();
        let report = registry.validate();
        assert!(!report.ok);
        assert_eq!(report.errors.len(), 1);
    }

    #[test]
    fn test_freshness() {
        let repo = seeded_repository(1);
        let registry = RuleRegistry::new(repo);
        assert!(!registry.is_fresh(Duration::from_secs(60)));
        registry.reload().unwrap();
        assert!(registry.is_fresh(Duration::from_secs(60)));
    }
}
