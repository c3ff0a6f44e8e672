use crate::coordinator::{Outcome, OutcomeKind};
use crate::core::EntityId;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

fn millis(elapsed: Duration) -> f64 {
    elapsed.as_nanos() as f64 / 1_000_000.0
}

fn serialize_millis<S: Serializer>(elapsed: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(millis(*elapsed))
}

/// What happened to one labelled attempt
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptReport {
    pub outcome: Outcome,
    /// Time spent inside the coordinator call
    #[serde(rename = "elapsed_ms", serialize_with = "serialize_millis")]
    pub elapsed: Duration,
}

/// Outcomes of one concurrent session, keyed by attempt label
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionReport {
    pub entity_id: EntityId,
    pub attempts: BTreeMap<String, AttemptReport>,
}

impl SessionReport {
    pub fn new(entity_id: EntityId) -> Self {
        Self {
            entity_id,
            attempts: BTreeMap::new(),
        }
    }

    pub(crate) fn record(&mut self, label: String, report: AttemptReport) {
        self.attempts.insert(label, report);
    }

    pub fn len(&self) -> usize {
        self.attempts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }

    pub fn outcome(&self, label: &str) -> Option<&Outcome> {
        self.attempts.get(label).map(|report| &report.outcome)
    }

    pub fn elapsed(&self, label: &str) -> Option<Duration> {
        self.attempts.get(label).map(|report| report.elapsed)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttemptReport)> {
        self.attempts
            .iter()
            .map(|(label, report)| (label.as_str(), report))
    }

    /// Number of attempts that ended with `kind`
    pub fn count(&self, kind: OutcomeKind) -> usize {
        self.attempts
            .values()
            .filter(|report| report.outcome.kind() == kind)
            .count()
    }

    pub fn counts(&self) -> BTreeMap<OutcomeKind, usize> {
        let mut counts = BTreeMap::new();
        for report in self.attempts.values() {
            *counts.entry(report.outcome.kind()).or_insert(0) += 1;
        }
        counts
    }

    pub fn committed_labels(&self) -> Vec<&str> {
        self.iter()
            .filter(|(_, report)| report.outcome.is_committed())
            .map(|(label, _)| label)
            .collect()
    }
}

impl fmt::Display for SessionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Session on entity {} ({} attempts)", self.entity_id, self.len())?;
        for (label, report) in self.iter() {
            writeln!(
                f,
                "  {:<16} {:>8.1} ms  {}",
                label,
                millis(report.elapsed),
                report.outcome
            )?;
        }
        let summary = self
            .counts()
            .into_iter()
            .map(|(kind, count)| format!("{}={}", kind, count))
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "  totals: {}", summary)
    }
}
