//! # Rule Versioning & Rollback
//!
//! Every write to a rule produces an immutable [`RuleVersion`] snapshot;
//! exactly one version per rule is current at any time. Rollback never
//! rewrites history: it clones the target snapshot into a new version and
//! makes that current.

use crate::model::Rule;
use crate::repository::{Repository, RepositoryError, RepositoryResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Fields excluded from version comparison: they change on every write by
/// construction.
const METADATA_FIELDS: &[&str] = &["version", "updated_at"];

/// An immutable snapshot of a rule at one version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleVersion {
    /// Rule the snapshot belongs to
    pub rule_id: String,
    /// Monotonic per-rule version number
    pub version_number: u64,
    /// Full copy of the rule's fields at this version
    pub snapshot: Rule,
    /// Whether this is the serving version
    pub is_current: bool,
    /// Why the change was made
    pub change_reason: String,
    /// Who made the change
    pub changed_by: String,
    /// When the version row was written
    pub created_at: DateTime<Utc>,
}

/// One differing field between two versions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldDiff {
    /// Field name (JSON key of the rule shape)
    pub field: String,
    /// Value in the `from` version
    pub from: serde_json::Value,
    /// Value in the `to` version
    pub to: serde_json::Value,
}

/// Versioning operations over the repository.
#[derive(Clone)]
pub struct VersionStore {
    repository: Arc<dyn Repository>,
}

impl VersionStore {
    /// Create a store backed by the given repository.
    pub fn new(repository: Arc<dyn Repository>) -> Self {
        VersionStore { repository }
    }

    /// Record a new version for the (already updated) rule.
    ///
    /// Assigns the next version number, flips `is_current` off the prior
    /// version and on the new one.
    pub fn record_change(
        &self,
        rule: &Rule,
        reason: impl Into<String>,
        author: impl Into<String>,
    ) -> RepositoryResult<RuleVersion> {
        let next = self
            .repository
            .versions(&rule.rule_id)?
            .iter()
            .map(|v| v.version_number)
            .max()
            .unwrap_or(0)
            + 1;

        let mut snapshot = rule.clone();
        snapshot.version = next;

        let version = RuleVersion {
            rule_id: rule.rule_id.clone(),
            version_number: next,
            snapshot,
            is_current: true,
            change_reason: reason.into(),
            changed_by: author.into(),
            created_at: Utc::now(),
        };
        self.repository.insert_version(&version)?;
        Ok(version)
    }

    /// All versions of a rule, oldest first.
    pub fn list(&self, rule_id: &str) -> RepositoryResult<Vec<RuleVersion>> {
        let mut versions = self.repository.versions(rule_id)?;
        versions.sort_by_key(|v| v.version_number);
        Ok(versions)
    }

    /// A specific version of a rule.
    pub fn get(&self, rule_id: &str, version_number: u64) -> RepositoryResult<RuleVersion> {
        self.repository
            .version(rule_id, version_number)?
            .ok_or_else(|| {
                RepositoryError::NotFound(format!(
                    "rule '{}' has no version {}",
                    rule_id, version_number
                ))
            })
    }

    /// The serving version of a rule, if any version exists.
    pub fn current(&self, rule_id: &str) -> RepositoryResult<Option<RuleVersion>> {
        self.repository.current_version(rule_id)
    }

    /// Roll back to a prior version.
    ///
    /// Clones the target snapshot into a brand-new current version and
    /// returns it; the caller is responsible for installing the returned
    /// snapshot into the serving registry.
    pub fn rollback(
        &self,
        rule_id: &str,
        version_number: u64,
        reason: impl Into<String>,
        author: impl Into<String>,
    ) -> RepositoryResult<RuleVersion> {
        let target = self.get(rule_id, version_number)?;
        let reason = format!(
            "rollback to version {}: {}",
            version_number,
            reason.into()
        );
        self.record_change(&target.snapshot, reason, author)
    }

    /// Field-by-field diff between two versions.
    ///
    /// Metadata fields (`version`, `updated_at`) are excluded: they differ
    /// on every write by construction.
    pub fn compare(
        &self,
        rule_id: &str,
        from: u64,
        to: u64,
    ) -> RepositoryResult<Vec<FieldDiff>> {
        let from = self.get(rule_id, from)?;
        let to = self.get(rule_id, to)?;
        Ok(diff_snapshots(&from.snapshot, &to.snapshot))
    }
}

/// Diff two rule snapshots as JSON objects.
pub fn diff_snapshots(from: &Rule, to: &Rule) -> Vec<FieldDiff> {
    let from_json = serde_json::to_value(from).unwrap_or_default();
    let to_json = serde_json::to_value(to).unwrap_or_default();
    let empty = serde_json::Map::new();
    let from_map = from_json.as_object().unwrap_or(&empty);
    let to_map = to_json.as_object().unwrap_or(&empty);

    let mut fields: Vec<&String> = from_map.keys().chain(to_map.keys()).collect();
    fields.sort();
    fields.dedup();

    fields
        .into_iter()
        .filter(|field| !METADATA_FIELDS.contains(&field.as_str()))
        .filter_map(|field| {
            let left = from_map.get(field).cloned().unwrap_or(serde_json::Value::Null);
            let right = to_map.get(field).cloned().unwrap_or(serde_json::Value::Null);
            (left != right).then(|| FieldDiff {
                field: field.clone(),
                from: left,
                to: right,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Operator;
    use crate::repository::MemoryRepository;
    use crate::value::Value;

    fn store() -> VersionStore {
        VersionStore::new(Arc::new(MemoryRepository::new()))
    }

    fn rule(point: f64) -> Rule {
        Rule::simple("R1", "issue threshold", "issue", Operator::GreaterThan, Value::Int(30))
            .with_score(point, 1.0)
    }

    #[test]
    fn test_record_change_assigns_sequential_versions() {
        let store = store();
        let v1 = store.record_change(&rule(10.0), "initial", "alice").unwrap();
        let v2 = store.record_change(&rule(20.0), "raise score", "bob").unwrap();

        assert_eq!(v1.version_number, 1);
        assert_eq!(v2.version_number, 2);

        let versions = store.list("R1").unwrap();
        assert_eq!(versions.len(), 2);
        assert!(!versions[0].is_current);
        assert!(versions[1].is_current);
    }

    #[test]
    fn test_rollback_creates_new_current_version() {
        let store = store();
        store.record_change(&rule(10.0), "initial", "alice").unwrap();
        store.record_change(&rule(20.0), "raise score", "alice").unwrap();

        let rolled = store.rollback("R1", 1, "regression", "carol").unwrap();
        assert_eq!(rolled.version_number, 3);
        assert!(rolled.is_current);
        assert_eq!(rolled.snapshot.rule_point, Value::Float(10.0));

        let current = store.current("R1").unwrap().unwrap();
        assert_eq!(current.version_number, 3);

        // Field-equal to v1 apart from metadata.
        assert!(diff_snapshots(&store.get("R1", 1).unwrap().snapshot, &current.snapshot)
            .is_empty());
    }

    #[test]
    fn test_compare_reports_differing_fields() {
        let store = store();
        store.record_change(&rule(10.0), "initial", "alice").unwrap();
        let mut changed = rule(20.0);
        changed.action_result = "N".to_string();
        store.record_change(&changed, "flip", "alice").unwrap();

        let mut diff = store.compare("R1", 1, 2).unwrap();
        diff.sort_by(|a, b| a.field.cmp(&b.field));
        let fields: Vec<&str> = diff.iter().map(|d| d.field.as_str()).collect();
        assert_eq!(fields, vec!["action_result", "rule_point"]);
        assert_eq!(diff[0].from, serde_json::json!("Y"));
        assert_eq!(diff[0].to, serde_json::json!("N"));
    }

    #[test]
    fn test_get_missing_version_is_not_found() {
        let store = store();
        store.record_change(&rule(10.0), "initial", "alice").unwrap();
        assert!(matches!(
            store.get("R1", 9),
            Err(RepositoryError::NotFound(_))
        ));
    }
}
