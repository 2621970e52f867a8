//! Decision Dependency Scheduler
//!
//! Topologically orders decisions (Kahn's algorithm) so that a decision
//! runs only after every decision it depends on. Malformed documents must
//! degrade rather than crash: cycles fall back to the XML-declared order
//! with a warning, and missing dependency ids are treated as independent.

use super::Decision;
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::warn;

/// Result of scheduling a document's decisions.
#[derive(Debug, Clone, PartialEq)]
pub struct Schedule {
    /// Indices into the decision list, in execution order
    pub order: Vec<usize>,
    /// Decision ids left unordered by a dependency cycle, when one exists
    pub cycle: Option<Vec<String>>,
}

/// Compute a topological execution order over the decisions.
///
/// When a cycle leaves decisions unemitted, the declared (XML) order is
/// returned instead and the remaining node ids are reported in
/// [`Schedule::cycle`].
pub fn schedule(decisions: &[Decision]) -> Schedule {
    let index_by_id: HashMap<&str, usize> = decisions
        .iter()
        .enumerate()
        .map(|(i, d)| (d.decision_id.as_str(), i))
        .collect();

    // dependents[i] = decisions that must wait for i
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); decisions.len()];
    let mut in_degree: Vec<usize> = vec![0; decisions.len()];

    for (i, decision) in decisions.iter().enumerate() {
        for dep_id in &decision.requirements {
            match index_by_id.get(dep_id.as_str()) {
                Some(&dep_idx) => {
                    dependents[dep_idx].push(i);
                    in_degree[i] += 1;
                }
                None => {
                    // Unknown dependency: count as satisfied, keep going.
                    warn!(
                        decision_id = %decision.decision_id,
                        dependency = %dep_id,
                        "decision requires unknown dependency, treating as independent"
                    );
                }
            }
        }
    }

    let mut queue: VecDeque<usize> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, &degree)| degree == 0)
        .map(|(i, _)| i)
        .collect();

    let mut order = Vec::with_capacity(decisions.len());
    let mut emitted: HashSet<usize> = HashSet::new();

    while let Some(idx) = queue.pop_front() {
        if !emitted.insert(idx) {
            continue;
        }
        order.push(idx);
        for &dependent in &dependents[idx] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                queue.push_back(dependent);
            }
        }
    }

    if order.len() < decisions.len() {
        let remaining: Vec<String> = decisions
            .iter()
            .enumerate()
            .filter(|(i, _)| !emitted.contains(i))
            .map(|(_, d)| d.decision_id.clone())
            .collect();
        warn!(
            remaining = ?remaining,
            "dependency cycle detected, falling back to declared decision order"
        );
        return Schedule {
            order: (0..decisions.len()).collect(),
            cycle: Some(remaining),
        };
    }

    Schedule { order, cycle: None }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dmn::HitPolicy;

    fn decision(id: &str, requirements: &[&str]) -> Decision {
        Decision {
            decision_id: id.to_string(),
            decision_name: id.to_string(),
            requirements: requirements.iter().map(|s| (*s).to_string()).collect(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            hit_policy: HitPolicy::Unique,
            rows: Vec::new(),
        }
    }

    #[test]
    fn test_independent_decisions_keep_declared_order() {
        let decisions = vec![decision("A", &[]), decision("B", &[]), decision("C", &[])];
        let schedule = schedule(&decisions);
        assert_eq!(schedule.order, vec![0, 1, 2]);
        assert!(schedule.cycle.is_none());
    }

    #[test]
    fn test_dependency_runs_after_requirements() {
        // NguHanh depends on Can and Chi, declared first.
        let decisions = vec![
            decision("NguHanh", &["Can", "Chi"]),
            decision("Can", &[]),
            decision("Chi", &[]),
        ];
        let s = schedule(&decisions);
        assert!(s.cycle.is_none());

        let pos = |id: &str| {
            s.order
                .iter()
                .position(|&i| decisions[i].decision_id == id)
                .unwrap()
        };
        assert!(pos("Can") < pos("NguHanh"));
        assert!(pos("Chi") < pos("NguHanh"));
    }

    #[test]
    fn test_cycle_falls_back_to_declared_order() {
        let decisions = vec![decision("A", &["B"]), decision("B", &["A"])];
        let s = schedule(&decisions);
        assert_eq!(s.order, vec![0, 1]);
        let mut cycle = s.cycle.unwrap();
        cycle.sort();
        assert_eq!(cycle, vec!["A", "B"]);
    }

    #[test]
    fn test_partial_cycle_still_reports_only_cycle_members() {
        let decisions = vec![
            decision("A", &[]),
            decision("B", &["C"]),
            decision("C", &["B"]),
        ];
        let s = schedule(&decisions);
        assert_eq!(s.order, vec![0, 1, 2]);
        let mut cycle = s.cycle.unwrap();
        cycle.sort();
        assert_eq!(cycle, vec!["B", "C"]);
    }

    #[test]
    fn test_missing_dependency_is_independent() {
        let decisions = vec![decision("A", &["Ghost"]), decision("B", &[])];
        let s = schedule(&decisions);
        assert_eq!(s.order, vec![0, 1]);
        assert!(s.cycle.is_none());
    }
}
