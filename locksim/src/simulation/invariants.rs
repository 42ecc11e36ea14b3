//! Invariant checking for simulation results.
//!
//! Given a finished [`SimulationResult`], the checker verifies the
//! properties each protocol promises and records every violation instead of
//! stopping at the first.

use std::collections::HashMap;

use serde::Serialize;

use super::events::Phase;
use super::result::{Protocol, SimulationResult};
use super::worker::{FailureReason, Outcome};

/// An invariant violation detected in a simulation result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvariantViolation {
    /// Description of the violation.
    pub description: String,
    /// The worker involved, if one is.
    pub worker: Option<String>,
}

impl std::fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.worker {
            Some(worker) => write!(f, "{worker}: {}", self.description),
            None => f.write_str(&self.description),
        }
    }
}

/// Checks protocol invariants over simulation results.
#[derive(Debug, Default)]
pub struct InvariantChecker {
    violations: Vec<InvariantViolation>,
}

/// Canonical phase order. A worker may skip phases but never go back.
const PHASE_ORDER: [Phase; 6] = [
    Phase::Started,
    Phase::Loaded,
    Phase::Locked,
    Phase::Mutated,
    Phase::CommitAttempted,
    Phase::Committed,
];

fn phase_rank(phase: Phase) -> usize {
    match phase {
        // Rolled back ranks with Committed: both are terminal.
        Phase::RolledBack => PHASE_ORDER.len() - 1,
        other => PHASE_ORDER
            .iter()
            .position(|p| *p == other)
            .unwrap_or(PHASE_ORDER.len()),
    }
}

impl InvariantChecker {
    /// Create a checker with no violations.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a violation.
    pub fn add_violation(&mut self, violation: InvariantViolation) {
        self.violations.push(violation);
    }

    /// All violations found so far.
    #[must_use]
    pub fn violations(&self) -> &[InvariantViolation] {
        &self.violations
    }

    /// Whether no violation has been found.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }

    /// Check every invariant that applies to `result`.
    pub fn check(&mut self, result: &SimulationResult) {
        self.check_settled(result);
        self.check_phase_sequences(result);
        self.check_final_state(result);
        match result.protocol {
            Protocol::Pessimistic => {
                self.check_mutual_exclusion(result);
                self.check_serialized_commits(result);
            }
            Protocol::Optimistic => self.check_single_winner(result),
        }
    }

    fn violation(&mut self, worker: Option<&str>, description: String) {
        self.add_violation(InvariantViolation {
            description,
            worker: worker.map(str::to_string),
        });
    }

    /// Every worker reached a terminal outcome.
    fn check_settled(&mut self, result: &SimulationResult) {
        for report in &result.reports {
            if report.outcome == Outcome::Pending {
                self.violation(Some(&report.name), "worker never settled".to_string());
            }
            if report.finished_at_ms < report.started_at_ms {
                self.violation(
                    Some(&report.name),
                    format!(
                        "finished at {}ms before starting at {}ms",
                        report.finished_at_ms, report.started_at_ms
                    ),
                );
            }
        }
    }

    /// Each worker's phases move forward and end in exactly one terminal event.
    fn check_phase_sequences(&mut self, result: &SimulationResult) {
        for report in &result.reports {
            let phases: Vec<Phase> = result
                .events
                .iter()
                .filter(|event| event.worker_name == report.name)
                .map(|event| event.phase)
                .collect();

            if phases.windows(2).any(|w| phase_rank(w[1]) <= phase_rank(w[0])) {
                self.violation(
                    Some(&report.name),
                    format!("phases out of order: {phases:?}"),
                );
            }

            let terminal = phases.iter().filter(|phase| phase.is_terminal()).count();
            let aborted = report.outcome == Outcome::Failed(FailureReason::Aborted);
            if terminal != 1 && !aborted {
                self.violation(
                    Some(&report.name),
                    format!("expected one terminal event, found {terminal}"),
                );
            }

            if !report.uses_explicit_lock && phases.contains(&Phase::Locked) {
                self.violation(
                    Some(&report.name),
                    "optimistic worker took a lock".to_string(),
                );
            }
        }
    }

    /// The stored record reflects exactly the committed writes.
    fn check_final_state(&mut self, result: &SimulationResult) {
        let Some(final_record) = &result.final_record else {
            self.violation(None, format!("record {} missing after run", result.record_id()));
            return;
        };

        let commits = u64::try_from(result.success_count()).unwrap_or(u64::MAX);
        let expected_version = result.seed.version + commits;
        if final_record.version != expected_version {
            self.violation(
                None,
                format!(
                    "final version {} but {commits} commits on seed version {}",
                    final_record.version, result.seed.version
                ),
            );
        }

        let expected_name = result
            .last_committer()
            .map_or(result.seed.name.as_str(), |report| report.written_name.as_str());
        if final_record.name != expected_name {
            self.violation(
                None,
                format!(
                    "final name {:?} but last committed write was {expected_name:?}",
                    final_record.name
                ),
            );
        }
    }

    /// No two lock-holding spans overlap.
    fn check_mutual_exclusion(&mut self, result: &SimulationResult) {
        let intervals = result.lock_intervals();
        for (i, a) in intervals.iter().enumerate() {
            for b in &intervals[i + 1..] {
                if a.overlaps(b) {
                    self.violation(
                        Some(&b.worker),
                        format!(
                            "held the lock [{}ms, {}ms] while {} held it [{}ms, {}ms]",
                            b.acquired_ms, b.released_ms, a.worker, a.acquired_ms, a.released_ms
                        ),
                    );
                }
            }
        }
    }

    /// Commits follow lock order and never lose an update.
    fn check_serialized_commits(&mut self, result: &SimulationResult) {
        let lock_order = result.lock_order();
        let commit_order = result.commit_order();
        let locked_commits: Vec<&str> = lock_order
            .iter()
            .copied()
            .filter(|name| commit_order.contains(name))
            .collect();
        if locked_commits != commit_order {
            self.violation(
                None,
                format!("commit order {commit_order:?} differs from lock order {lock_order:?}"),
            );
        }

        for report in &result.reports {
            if report.outcome == Outcome::Failed(FailureReason::VersionConflict) {
                self.violation(
                    Some(&report.name),
                    "lost an update under an exclusive lock".to_string(),
                );
            }
        }
    }

    /// Among workers that read the same version, at most one commits, and
    /// when one does the others fail with a version conflict.
    fn check_single_winner(&mut self, result: &SimulationResult) {
        let mut by_snapshot: HashMap<u64, Vec<&str>> = HashMap::new();
        for report in &result.reports {
            if let Some(version) = report.snapshot_version {
                by_snapshot.entry(version).or_default().push(&report.name);
            }
        }

        for (version, names) in by_snapshot {
            let reports: Vec<_> = names.iter().filter_map(|name| result.report(name)).collect();
            let winners = reports.iter().filter(|r| r.outcome.is_success()).count();
            if winners > 1 {
                self.violation(
                    None,
                    format!("{winners} workers committed from snapshot version {version}"),
                );
            }
            if winners == 1 {
                for report in reports.iter().filter(|r| !r.outcome.is_success()) {
                    if report.outcome != Outcome::Failed(FailureReason::VersionConflict) {
                        self.violation(
                            Some(&report.name),
                            format!(
                                "lost the race from version {version} but failed with {:?}",
                                report.outcome
                            ),
                        );
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::events::WorkerEvent;
    use crate::simulation::worker::{Priority, WorkerReport};
    use crate::types::Record;

    fn event(worker: &str, phase: Phase, timestamp_ms: u64) -> WorkerEvent {
        WorkerEvent {
            worker_name: worker.to_string(),
            phase,
            timestamp_ms,
        }
    }

    fn report(name: &str, locked: bool, outcome: Outcome, written: &str) -> WorkerReport {
        WorkerReport {
            name: name.to_string(),
            priority: Priority::Low,
            uses_explicit_lock: locked,
            delay_ms: 0,
            outcome,
            started_at_ms: 0,
            finished_at_ms: 0,
            snapshot_version: Some(0),
            committed_version: None,
            written_name: written.to_string(),
        }
    }

    fn full_run(worker: &str, locked: bool, from: u64, to: u64, committed: bool) -> Vec<WorkerEvent> {
        let mut events = vec![event(worker, Phase::Started, from), event(worker, Phase::Loaded, from)];
        if locked {
            events.push(event(worker, Phase::Locked, from));
        }
        events.push(event(worker, Phase::Mutated, to));
        events.push(event(worker, Phase::CommitAttempted, to));
        events.push(event(
            worker,
            if committed { Phase::Committed } else { Phase::RolledBack },
            to,
        ));
        events
    }

    #[test]
    fn test_serialized_pessimistic_run_passes() {
        let mut events = full_run("Thread 0", true, 0, 10_000, true);
        events.extend(full_run("Thread 1", true, 10_000, 13_000, true));
        let result = SimulationResult {
            protocol: Protocol::Pessimistic,
            seed: Record::new("321", "X"),
            reports: vec![
                report("Thread 0", true, Outcome::Success, "Thread 0"),
                report("Thread 1", true, Outcome::Success, "Thread 1"),
            ],
            events,
            final_record: Some(Record::new("321", "Thread 1").with_version(2)),
            elapsed_ms: 13_000,
        };

        let mut checker = InvariantChecker::new();
        checker.check(&result);
        assert!(checker.passed(), "{:?}", checker.violations());
    }

    #[test]
    fn test_overlapping_locks_detected() {
        let mut events = full_run("Thread 0", true, 0, 10_000, true);
        events.extend(full_run("Thread 1", true, 3_000, 13_000, true));
        let result = SimulationResult {
            protocol: Protocol::Pessimistic,
            seed: Record::new("321", "X"),
            reports: vec![
                report("Thread 0", true, Outcome::Success, "Thread 0"),
                report("Thread 1", true, Outcome::Success, "Thread 1"),
            ],
            events,
            final_record: Some(Record::new("321", "Thread 1").with_version(2)),
            elapsed_ms: 13_000,
        };

        let mut checker = InvariantChecker::new();
        checker.check(&result);
        assert!(!checker.passed());
        assert!(
            checker
                .violations()
                .iter()
                .any(|v| v.description.contains("held the lock"))
        );
    }

    #[test]
    fn test_two_optimistic_winners_detected() {
        let mut events = full_run("Thread 0", false, 0, 10_000, true);
        events.extend(full_run("Thread 1", false, 0, 200, true));
        let result = SimulationResult {
            protocol: Protocol::Optimistic,
            seed: Record::new("123", "Y"),
            reports: vec![
                report("Thread 0", false, Outcome::Success, "mk Thread 0"),
                report("Thread 1", false, Outcome::Success, "mk Thread 1"),
            ],
            events,
            final_record: Some(Record::new("123", "mk Thread 0").with_version(2)),
            elapsed_ms: 10_000,
        };

        let mut checker = InvariantChecker::new();
        checker.check(&result);
        assert!(
            checker
                .violations()
                .iter()
                .any(|v| v.description.contains("2 workers committed"))
        );
    }

    #[test]
    fn test_lost_update_detected_by_final_state() {
        let mut events = full_run("Thread 1", false, 0, 200, true);
        events.extend(full_run("Thread 0", false, 0, 10_000, false));
        let result = SimulationResult {
            protocol: Protocol::Optimistic,
            seed: Record::new("123", "Y"),
            reports: vec![
                report(
                    "Thread 0",
                    false,
                    Outcome::Failed(FailureReason::VersionConflict),
                    "mk Thread 0",
                ),
                report("Thread 1", false, Outcome::Success, "mk Thread 1"),
            ],
            events,
            // The losing write leaked into the store.
            final_record: Some(Record::new("123", "mk Thread 0").with_version(1)),
            elapsed_ms: 10_000,
        };

        let mut checker = InvariantChecker::new();
        checker.check(&result);
        assert_eq!(checker.violations().len(), 1);
        assert!(checker.violations()[0].description.contains("final name"));
    }

    #[test]
    fn test_unsettled_worker_detected() {
        let result = SimulationResult {
            protocol: Protocol::Optimistic,
            seed: Record::new("123", "Y"),
            reports: vec![report("Thread 0", false, Outcome::Pending, "mk Thread 0")],
            events: vec![event("Thread 0", Phase::Started, 0)],
            final_record: Some(Record::new("123", "Y")),
            elapsed_ms: 0,
        };

        let mut checker = InvariantChecker::new();
        checker.check(&result);
        assert!(
            checker
                .violations()
                .iter()
                .any(|v| v.to_string() == "Thread 0: worker never settled")
        );
    }
}
