//! File-Backed Repository
//!
//! Persists the catalog in the rule-set JSON file format, conditions in a
//! sibling JSON file, and append-only data (execution logs, versions, A/B
//! state) under a data directory:
//!
//! ```text
//! {data_dir}/executions.jsonl   execution log, one JSON record per line
//! {data_dir}/versions.json      rule version snapshots
//! {data_dir}/abtests.json       tests, counters and assignments
//! ```
//!
//! Reads go to disk every time, so edits made by an operator (or another
//! process) are visible to the reload monitor through the freshness token
//! without any coordination.

use super::{Repository, RepositoryError, RepositoryResult};
use crate::abtest::{AbTest, Variant, VariantCounters};
use crate::execlog::ExecutionRecord;
use crate::model::{Condition, ConditionsFile, Rule, RulesFile};
use crate::versioning::RuleVersion;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Sidecar state persisted under the data directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct AbTestFile {
    tests: HashMap<String, AbTest>,
    counters: HashMap<String, (VariantCounters, VariantCounters)>,
    assignments: HashMap<String, HashMap<String, Variant>>,
}

/// File-backed implementation of [`Repository`].
pub struct FileRepository {
    rules_path: PathBuf,
    conditions_path: Option<PathBuf>,
    data_dir: PathBuf,
    // Serializes read-modify-write cycles on the backing files.
    write_lock: Mutex<()>,
}

impl FileRepository {
    /// Open a repository over the given paths, creating the data directory
    /// if needed.
    pub fn new(
        rules_path: impl Into<PathBuf>,
        conditions_path: Option<PathBuf>,
        data_dir: impl Into<PathBuf>,
    ) -> RepositoryResult<Self> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir)?;
        Ok(FileRepository {
            rules_path: rules_path.into(),
            conditions_path,
            data_dir,
            write_lock: Mutex::new(()),
        })
    }

    fn executions_path(&self) -> PathBuf {
        self.data_dir.join("executions.jsonl")
    }

    fn versions_path(&self) -> PathBuf {
        self.data_dir.join("versions.json")
    }

    fn abtests_path(&self) -> PathBuf {
        self.data_dir.join("abtests.json")
    }

    fn load_rules_file(&self) -> RepositoryResult<RulesFile> {
        load_json_or_default(&self.rules_path)
    }

    fn save_rules_file(&self, file: &RulesFile) -> RepositoryResult<()> {
        save_json(&self.rules_path, file)
    }

    fn load_conditions_file(&self) -> RepositoryResult<ConditionsFile> {
        match &self.conditions_path {
            Some(path) => load_json_or_default(path),
            None => Ok(ConditionsFile::default()),
        }
    }

    fn save_conditions_file(&self, file: &ConditionsFile) -> RepositoryResult<()> {
        let path = self.conditions_path.as_ref().ok_or_else(|| {
            RepositoryError::Backend("no conditions file configured".to_string())
        })?;
        save_json(path, file)
    }

    fn load_versions(&self) -> RepositoryResult<HashMap<String, Vec<RuleVersion>>> {
        load_json_or_default(&self.versions_path())
    }

    fn save_versions(&self, versions: &HashMap<String, Vec<RuleVersion>>) -> RepositoryResult<()> {
        save_json(&self.versions_path(), versions)
    }

    fn load_abtests(&self) -> RepositoryResult<AbTestFile> {
        load_json_or_default(&self.abtests_path())
    }

    fn save_abtests(&self, file: &AbTestFile) -> RepositoryResult<()> {
        save_json(&self.abtests_path(), file)
    }
}

fn load_json_or_default<T: Default + for<'de> Deserialize<'de>>(
    path: &Path,
) -> RepositoryResult<T> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(serde_json::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(e) => Err(e.into()),
    }
}

fn save_json<T: Serialize>(path: &Path, value: &T) -> RepositoryResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let content = serde_json::to_string_pretty(value)?;
    fs::write(path, content)?;
    Ok(())
}

impl Repository for FileRepository {
    fn read_rules_set(&self) -> RepositoryResult<Vec<Rule>> {
        Ok(self.load_rules_file()?.rules_set)
    }

    fn read_patterns(&self) -> RepositoryResult<HashMap<String, String>> {
        Ok(self.load_rules_file()?.patterns)
    }

    fn read_conditions_set(&self) -> RepositoryResult<Vec<Condition>> {
        Ok(self.load_conditions_file()?.conditions)
    }

    fn freshness_token(&self) -> RepositoryResult<u64> {
        // Hash raw file bytes: any external edit flips the token.
        let mut hasher = crc32fast::Hasher::new();
        for path in std::iter::once(&self.rules_path).chain(self.conditions_path.iter()) {
            match fs::read(path) {
                Ok(bytes) => hasher.update(&bytes),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(u64::from(hasher.finalize()))
    }

    fn upsert_rule(&self, rule: &Rule) -> RepositoryResult<()> {
        let _guard = self.write_lock.lock();
        let mut file = self.load_rules_file()?;
        match file.rules_set.iter_mut().find(|r| r.rule_id == rule.rule_id) {
            Some(existing) => *existing = rule.clone(),
            None => file.rules_set.push(rule.clone()),
        }
        self.save_rules_file(&file)
    }

    fn delete_rule(&self, rule_id: &str) -> RepositoryResult<bool> {
        let _guard = self.write_lock.lock();
        let mut file = self.load_rules_file()?;
        let before = file.rules_set.len();
        file.rules_set.retain(|r| r.rule_id != rule_id);
        let removed = file.rules_set.len() != before;
        if removed {
            self.save_rules_file(&file)?;
        }
        Ok(removed)
    }

    fn upsert_condition(&self, condition: &Condition) -> RepositoryResult<()> {
        let _guard = self.write_lock.lock();
        let mut file = self.load_conditions_file()?;
        match file
            .conditions
            .iter_mut()
            .find(|c| c.condition_id == condition.condition_id)
        {
            Some(existing) => *existing = condition.clone(),
            None => file.conditions.push(condition.clone()),
        }
        self.save_conditions_file(&file)
    }

    fn delete_condition(&self, condition_id: &str) -> RepositoryResult<bool> {
        let _guard = self.write_lock.lock();
        let mut file = self.load_conditions_file()?;
        let before = file.conditions.len();
        file.conditions.retain(|c| c.condition_id != condition_id);
        let removed = file.conditions.len() != before;
        if removed {
            self.save_conditions_file(&file)?;
        }
        Ok(removed)
    }

    fn upsert_pattern(&self, pattern: &str, recommendation: &str) -> RepositoryResult<()> {
        let _guard = self.write_lock.lock();
        let mut file = self.load_rules_file()?;
        file.patterns
            .insert(pattern.to_string(), recommendation.to_string());
        self.save_rules_file(&file)
    }

    fn delete_pattern(&self, pattern: &str) -> RepositoryResult<bool> {
        let _guard = self.write_lock.lock();
        let mut file = self.load_rules_file()?;
        let removed = file.patterns.remove(pattern).is_some();
        if removed {
            self.save_rules_file(&file)?;
        }
        Ok(removed)
    }

    fn append_execution(&self, record: &ExecutionRecord) -> RepositoryResult<()> {
        let _guard = self.write_lock.lock();
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.executions_path())?;
        let line = serde_json::to_string(record)?;
        writeln!(file, "{}", line)?;
        Ok(())
    }

    fn executions(&self, limit: usize) -> RepositoryResult<Vec<ExecutionRecord>> {
        let content = match fs::read_to_string(self.executions_path()) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut records: Vec<ExecutionRecord> = Vec::new();
        for line in content.lines().rev() {
            if records.len() == limit {
                break;
            }
            if line.trim().is_empty() {
                continue;
            }
            records.push(serde_json::from_str(line)?);
        }
        Ok(records)
    }

    fn insert_version(&self, version: &RuleVersion) -> RepositoryResult<()> {
        let _guard = self.write_lock.lock();
        let mut versions = self.load_versions()?;
        let rows = versions.entry(version.rule_id.clone()).or_default();
        if rows
            .iter()
            .any(|v| v.version_number == version.version_number)
        {
            return Err(RepositoryError::Conflict(format!(
                "version {} already exists for rule '{}'",
                version.version_number, version.rule_id
            )));
        }
        if version.is_current {
            for row in rows.iter_mut() {
                row.is_current = false;
            }
        }
        rows.push(version.clone());
        self.save_versions(&versions)
    }

    fn versions(&self, rule_id: &str) -> RepositoryResult<Vec<RuleVersion>> {
        Ok(self.load_versions()?.remove(rule_id).unwrap_or_default())
    }

    fn version(
        &self,
        rule_id: &str,
        version_number: u64,
    ) -> RepositoryResult<Option<RuleVersion>> {
        Ok(self
            .versions(rule_id)?
            .into_iter()
            .find(|v| v.version_number == version_number))
    }

    fn current_version(&self, rule_id: &str) -> RepositoryResult<Option<RuleVersion>> {
        Ok(self.versions(rule_id)?.into_iter().find(|v| v.is_current))
    }

    fn insert_ab_test(&self, test: &AbTest) -> RepositoryResult<()> {
        let _guard = self.write_lock.lock();
        let mut file = self.load_abtests()?;
        if file.tests.contains_key(&test.test_id) {
            return Err(RepositoryError::Conflict(format!(
                "A/B test '{}' already exists",
                test.test_id
            )));
        }
        file.tests.insert(test.test_id.clone(), test.clone());
        self.save_abtests(&file)
    }

    fn update_ab_test(&self, test: &AbTest) -> RepositoryResult<()> {
        let _guard = self.write_lock.lock();
        let mut file = self.load_abtests()?;
        if !file.tests.contains_key(&test.test_id) {
            return Err(RepositoryError::NotFound(format!(
                "A/B test '{}'",
                test.test_id
            )));
        }
        file.tests.insert(test.test_id.clone(), test.clone());
        self.save_abtests(&file)
    }

    fn ab_test(&self, test_id: &str) -> RepositoryResult<Option<AbTest>> {
        Ok(self.load_abtests()?.tests.get(test_id).cloned())
    }

    fn ab_tests(&self) -> RepositoryResult<Vec<AbTest>> {
        Ok(self.load_abtests()?.tests.into_values().collect())
    }

    fn upsert_assignment(
        &self,
        test_id: &str,
        assignment_key: &str,
        variant: Variant,
    ) -> RepositoryResult<Variant> {
        let _guard = self.write_lock.lock();
        let mut file = self.load_abtests()?;
        let per_test = file.assignments.entry(test_id.to_string()).or_default();
        if let Some(existing) = per_test.get(assignment_key) {
            return Ok(*existing);
        }
        per_test.insert(assignment_key.to_string(), variant);
        let (a, b) = file.counters.entry(test_id.to_string()).or_default();
        match variant {
            Variant::A => a.assignments += 1,
            Variant::B => b.assignments += 1,
        }
        self.save_abtests(&file)?;
        Ok(variant)
    }

    fn assignment(
        &self,
        test_id: &str,
        assignment_key: &str,
    ) -> RepositoryResult<Option<Variant>> {
        Ok(self
            .load_abtests()?
            .assignments
            .get(test_id)
            .and_then(|per_test| per_test.get(assignment_key))
            .copied())
    }

    fn record_outcome(
        &self,
        test_id: &str,
        variant: Variant,
        success: bool,
    ) -> RepositoryResult<()> {
        let _guard = self.write_lock.lock();
        let mut file = self.load_abtests()?;
        let (a, b) = file.counters.entry(test_id.to_string()).or_default();
        let counters = match variant {
            Variant::A => a,
            Variant::B => b,
        };
        if success {
            counters.successes += 1;
        } else {
            counters.failures += 1;
        }
        self.save_abtests(&file)
    }

    fn counters(&self, test_id: &str) -> RepositoryResult<(VariantCounters, VariantCounters)> {
        Ok(self
            .load_abtests()?
            .counters
            .get(test_id)
            .copied()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Operator;
    use crate::value::Value;
    use tempfile::TempDir;

    fn repository(tmp: &TempDir) -> FileRepository {
        FileRepository::new(
            tmp.path().join("rules.json"),
            Some(tmp.path().join("conditions.json")),
            tmp.path().join("data"),
        )
        .unwrap()
    }

    #[test]
    fn test_missing_files_read_as_empty() {
        let tmp = TempDir::new().unwrap();
        let repo = repository(&tmp);
        assert!(repo.read_rules_set().unwrap().is_empty());
        assert!(repo.read_patterns().unwrap().is_empty());
        assert!(repo.read_conditions_set().unwrap().is_empty());
        assert!(repo.executions(10).unwrap().is_empty());
    }

    #[test]
    fn test_rules_file_round_trip() {
        let tmp = TempDir::new().unwrap();
        let repo = repository(&tmp);

        let rule = Rule::simple("R1", "r", "issue", Operator::GreaterThan, Value::Int(30))
            .with_score(20.0, 30.0);
        repo.upsert_rule(&rule).unwrap();
        repo.upsert_pattern("Y", "Approved").unwrap();

        let rules = repo.read_rules_set().unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0], rule);
        assert_eq!(
            repo.read_patterns().unwrap().get("Y").map(String::as_str),
            Some("Approved")
        );

        // The on-disk shape is the documented file format.
        let raw = fs::read_to_string(tmp.path().join("rules.json")).unwrap();
        assert!(raw.contains("\"rules_set\""));
        assert!(raw.contains("\"patterns\""));
    }

    #[test]
    fn test_freshness_token_sees_external_edits() {
        let tmp = TempDir::new().unwrap();
        let repo = repository(&tmp);
        repo.upsert_rule(&Rule::simple("R1", "r", "x", Operator::Equal, Value::Int(1)))
            .unwrap();
        let before = repo.freshness_token().unwrap();

        // Simulate an operator editing the file out-of-band.
        let raw = fs::read_to_string(tmp.path().join("rules.json")).unwrap();
        fs::write(tmp.path().join("rules.json"), raw.replace("\"x\"", "\"y\"")).unwrap();

        assert_ne!(before, repo.freshness_token().unwrap());
    }

    #[test]
    fn test_execution_log_appends_jsonl() {
        let tmp = TempDir::new().unwrap();
        let repo = repository(&tmp);
        for i in 0..3 {
            let record = ExecutionRecord {
                execution_id: uuid::Uuid::new_v4(),
                timestamp: chrono::Utc::now(),
                correlation_id: format!("corr-{}", i),
                ruleset_id: None,
                input: serde_json::json!({}),
                total_points: 0.0,
                pattern_result: String::new(),
                action_recommendation: None,
                duration_ms: 0.1,
                success: true,
                error: None,
                ab_test_id: None,
                ab_test_variant: None,
            };
            repo.append_execution(&record).unwrap();
        }

        let latest = repo.executions(2).unwrap();
        assert_eq!(latest.len(), 2);
        // Newest first.
        assert_eq!(latest[0].correlation_id, "corr-2");
    }

    #[test]
    fn test_assignments_persist_across_instances() {
        let tmp = TempDir::new().unwrap();
        {
            let repo = repository(&tmp);
            assert_eq!(
                repo.upsert_assignment("T1", "k", Variant::B).unwrap(),
                Variant::B
            );
        }
        let repo = repository(&tmp);
        assert_eq!(repo.assignment("T1", "k").unwrap(), Some(Variant::B));
        assert_eq!(
            repo.upsert_assignment("T1", "k", Variant::A).unwrap(),
            Variant::B
        );
    }
}
