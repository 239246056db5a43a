//! Fan-out control for stateful runs.
//!
//! The controller counts, per source operation and per source case, how many
//! calls were derived from it. Following the same link over and over adds
//! little beyond catching "double-click" bugs, so each (source, target) pair
//! is capped for the whole run, and only a few root chains of the same
//! operation are explored side by side.

use indexmap::IndexMap;
use tracing::trace;

use crate::case::{CaseId, StepInput};
use crate::config::StatefulConfig;
use crate::recorder::ScenarioRecorder;
use crate::transitions::ApiTransitions;

/// Derived calls per target label.
pub type TargetCounts = IndexMap<String, usize>;

#[derive(Debug, Clone)]
pub struct TransitionController {
    /// Target label -> labels of the operations linking to it.
    incoming: IndexMap<String, Vec<String>>,
    /// Labels of operations with at least one outgoing link.
    sources: Vec<String>,
    max_operations_per_source: usize,
    max_root_sources: usize,
    /// Source label -> source case -> derived calls.
    statistic: IndexMap<String, IndexMap<CaseId, TargetCounts>>,
}

impl TransitionController {
    pub fn new(transitions: &ApiTransitions, config: &StatefulConfig) -> Self {
        let mut incoming: IndexMap<String, Vec<String>> = IndexMap::new();
        for link in transitions.links() {
            incoming
                .entry(link.target.label())
                .or_default()
                .push(link.source.label());
        }
        let sources = transitions
            .operations()
            .iter()
            .filter(|(_, operation)| !operation.outgoing.is_empty())
            .map(|(label, _)| label.clone())
            .collect();
        TransitionController {
            incoming,
            sources,
            max_operations_per_source: max_operations_per_source(
                config.step_budget,
                config.max_operations_per_source_cap,
                transitions.sources_with_outgoing(),
            ),
            max_root_sources: config.max_root_sources,
            statistic: IndexMap::new(),
        }
    }

    pub fn max_operations_per_source(&self) -> usize {
        self.max_operations_per_source
    }

    pub fn max_root_sources(&self) -> usize {
        self.max_root_sources
    }

    /// Per-case counters of a source operation.
    pub fn statistic(&self, source: &str) -> Option<&IndexMap<CaseId, TargetCounts>> {
        self.statistic.get(source)
    }

    /// Registers an executed step.
    ///
    /// A case of an operation with outgoing links opens a fresh counter; a
    /// step reached through a link is counted against its parent case. A
    /// parent missing from `recorder` is ignored.
    pub fn record_step(&mut self, input: &StepInput, recorder: &ScenarioRecorder) {
        let label = input.case.label();
        if self.sources.contains(&label) {
            self.statistic
                .entry(label.clone())
                .or_default()
                .insert(input.case.id, TargetCounts::new());
        }

        let Some(transition) = &input.transition else {
            return;
        };
        let Some(parent) = recorder.case(transition.parent_id) else {
            return;
        };
        let parent_label = parent.value.label();
        if let Some(counts) = self
            .statistic
            .get_mut(&parent_label)
            .and_then(|buckets| buckets.get_mut(&parent.value.id))
        {
            *counts.entry(label).or_default() += 1;
        }
    }

    /// Whether `source` may derive one more call to `target`.
    pub fn allow_transition(&self, source: &str, target: &str) -> bool {
        let total: usize = self
            .statistic
            .get(source)
            .map(|buckets| buckets.values().filter_map(|counts| counts.get(target)).sum())
            .unwrap_or(0);
        let allowed = total < self.max_operations_per_source;
        if !allowed {
            trace!(source, target, total, "transition limit reached");
        }
        allowed
    }

    /// Whether a new root chain may start at `source`.
    ///
    /// `active_bundles` maps driver bundle names (`"POST /users -> 201"` or a
    /// plain label) to the number of cases they hold. Past the root limit a
    /// new root is still allowed when every pending non-root transition is
    /// blocked, so the run can always make progress.
    pub fn allow_root_transition(&self, source: &str, active_bundles: &IndexMap<String, usize>) -> bool {
        let roots = self.statistic.get(source).map_or(0, IndexMap::len);
        if roots < self.max_root_sources {
            return true;
        }
        let history: Vec<&str> = active_bundles
            .iter()
            .filter(|(_, &count)| count > 0)
            .map(|(name, _)| name.split("->").next().unwrap_or(name).trim())
            .collect();
        let allowed = self.incoming.iter().all(|(target, sources)| {
            sources
                .iter()
                .all(|source| !history.contains(&source.as_str()) || !self.allow_transition(source, target))
        });
        if !allowed {
            trace!(source, roots, "root limit reached");
        }
        allowed
    }
}

/// Per-source limit: the step budget spread over link sources, never below
/// `cap`.
pub fn max_operations_per_source(step_budget: usize, cap: usize, sources: usize) -> usize {
    if sources == 0 {
        return cap;
    }
    cap.max(step_budget / sources)
}
