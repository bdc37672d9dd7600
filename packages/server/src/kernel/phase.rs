//! Phase table (spec §3 "Phase", §4.5).
//!
//! A `Phase` tag from the closed set {source, expensive, transform, process,
//! export}. Each job belongs to exactly one phase. The phase table also
//! defines the *ordered* list of jobs within that phase — this ordering is
//! the dependency DAG serialized into a sequence (spec §9: attendees →
//! persons → bunk-assignments, etc.).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Source,
    Expensive,
    Transform,
    Process,
    Export,
}

impl Phase {
    pub const ALL: [Phase; 5] = [
        Phase::Source,
        Phase::Expensive,
        Phase::Transform,
        Phase::Process,
        Phase::Export,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Source => "source",
            Phase::Expensive => "expensive",
            Phase::Transform => "transform",
            Phase::Process => "process",
            Phase::Export => "export",
        }
    }

    pub fn parse(s: &str) -> Option<Phase> {
        Phase::ALL.into_iter().find(|p| p.as_str() == s)
    }
}

/// The static job-name → phase → execution-order mapping for this repo's
/// three demonstration jobs. A real deployment's ~30 jobs would extend this
/// table; the ordering within a phase is load-bearing (spec §5: "jobs run
/// strictly sequentially in declared dependency order").
pub const PHASE_TABLE: &[(&str, Phase)] = &[
    ("sessions", Phase::Source),
    ("persons", Phase::Source),
    ("attendees", Phase::Process),
];

/// Jobs in `phase`, in declared order.
pub fn jobs_in_phase(phase: Phase) -> Vec<&'static str> {
    PHASE_TABLE
        .iter()
        .filter(|(_, p)| *p == phase)
        .map(|(name, _)| *name)
        .collect()
}

/// All job names across every phase, in declared order — the sequence a
/// full/unified run drives (spec §4.5 `RunSyncWithOptions`).
pub fn all_jobs_in_order() -> Vec<&'static str> {
    PHASE_TABLE.iter().map(|(name, _)| *name).collect()
}

pub fn phase_of(job_name: &str) -> Option<Phase> {
    PHASE_TABLE
        .iter()
        .find(|(name, _)| *name == job_name)
        .map(|(_, p)| *p)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_round_trips_through_string() {
        for phase in Phase::ALL {
            assert_eq!(Phase::parse(phase.as_str()), Some(phase));
        }
    }

    #[test]
    fn unknown_phase_string_is_none() {
        assert_eq!(Phase::parse("bogus"), None);
    }

    #[test]
    fn jobs_in_phase_preserves_declared_order() {
        let source_jobs = jobs_in_phase(Phase::Source);
        assert_eq!(source_jobs, vec!["sessions", "persons"]);
    }

    #[test]
    fn all_jobs_in_order_covers_every_table_entry() {
        assert_eq!(all_jobs_in_order().len(), PHASE_TABLE.len());
    }
}
