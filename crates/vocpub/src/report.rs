//! Aggregating per-target results into a run outcome.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::publish::{TargetOutcome, TargetResult};

/// Final state of one vocabulary in a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetReport {
    pub repository: Option<String>,
    #[serde(flatten)]
    pub outcome: TargetOutcome,
}

/// Outcome of a run, keyed (and sorted) by vocabulary id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunOutcome {
    pub per_target: BTreeMap<String, TargetReport>,
}

/// Counts over a [`RunOutcome`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutcomeCounts {
    pub published: usize,
    /// Published with a newly opened pull request.
    pub created: usize,
    /// Published by updating an existing pull request's branch.
    pub updated: usize,
    pub unchanged: usize,
    pub failed: usize,
}

/// Merge terminal results into a run outcome. Never fails.
///
/// When an id appears more than once the first failure wins; without
/// failures the last result is kept.
pub fn report(results: impl IntoIterator<Item = TargetResult>) -> RunOutcome {
    let mut per_target: BTreeMap<String, TargetReport> = BTreeMap::new();

    for result in results {
        let entry = TargetReport {
            repository: result.repository,
            outcome: result.outcome,
        };
        match per_target.get(&result.vocabulary) {
            Some(existing) if existing.outcome.is_failed() => {}
            _ => {
                per_target.insert(result.vocabulary, entry);
            }
        }
    }

    RunOutcome { per_target }
}

impl RunOutcome {
    pub fn counts(&self) -> OutcomeCounts {
        let mut counts = OutcomeCounts::default();
        for report in self.per_target.values() {
            match &report.outcome {
                TargetOutcome::Published { created, .. } => {
                    counts.published += 1;
                    if *created {
                        counts.created += 1;
                    } else {
                        counts.updated += 1;
                    }
                }
                TargetOutcome::NoChange => counts.unchanged += 1,
                TargetOutcome::Failed { .. } => counts.failed += 1,
            }
        }
        counts
    }

    pub fn has_failures(&self) -> bool {
        self.per_target.values().any(|r| r.outcome.is_failed())
    }

    pub fn get(&self, vocabulary_id: &str) -> Option<&TargetOutcome> {
        self.per_target.get(vocabulary_id).map(|r| &r.outcome)
    }

    pub fn len(&self) -> usize {
        self.per_target.len()
    }

    pub fn is_empty(&self) -> bool {
        self.per_target.is_empty()
    }
}
