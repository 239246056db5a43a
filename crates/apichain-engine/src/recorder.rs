//! Execution ledger of one scenario.
//!
//! Cases form a forest: chain roots have no parent, every other case points
//! at the case whose response fed it. Checks and HTTP interactions are
//! attached to cases by id. The recorder is append-only and owned by a
//! single scenario, so it needs no locking.

use std::collections::{HashSet, VecDeque};

use indexmap::IndexMap;

use crate::case::{Case, CaseId, Interaction, Request, Response, Transition};

/// A recorded case and how it was reached.
#[derive(Debug, Clone, PartialEq)]
pub struct CaseNode {
    pub value: Case,
    pub parent_id: Option<CaseId>,
    /// `None` for roots, and for children created inside checks rather
    /// than by following a link.
    pub transition: Option<Transition>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Success,
    Failure,
}

/// A failed check as reported by the check itself.
#[derive(Debug, Clone, PartialEq)]
pub struct Failure {
    pub title: String,
    pub message: String,
    /// Set when the check issued its own request and that one failed.
    pub case_id: Option<CaseId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckFailureInfo {
    /// Snippet reproducing the failing call.
    pub code_sample: String,
    pub failure: Failure,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckNode {
    pub name: String,
    pub status: CheckStatus,
    pub failure_info: Option<CheckFailureInfo>,
}

/// What a failure report needs about the failing call.
#[derive(Debug, Clone, PartialEq)]
pub struct FailureData {
    pub case: Case,
    /// First value of every request header.
    pub headers: IndexMap<String, String>,
    pub verify: bool,
}

/// Cases, checks and interactions of one logical test scenario.
#[derive(Debug, Clone, Default)]
pub struct ScenarioRecorder {
    pub label: String,
    cases: IndexMap<CaseId, CaseNode>,
    children: IndexMap<CaseId, Vec<CaseId>>,
    checks: IndexMap<CaseId, Vec<CheckNode>>,
    interactions: IndexMap<CaseId, Interaction>,
}

impl ScenarioRecorder {
    pub fn new(label: impl Into<String>) -> Self {
        ScenarioRecorder {
            label: label.into(),
            ..Self::default()
        }
    }

    // -----------------------------------------------------------------------
    // Recording
    // -----------------------------------------------------------------------

    /// # Panics
    ///
    /// Panics if `parent_id` names a case that was never recorded; parents
    /// are always recorded before their children.
    pub fn record_case(&mut self, parent_id: Option<CaseId>, transition: Option<Transition>, case: Case) {
        if let Some(parent_id) = parent_id {
            assert!(
                self.cases.contains_key(&parent_id),
                "parent case {parent_id} is not recorded"
            );
            self.children.entry(parent_id).or_default().push(case.id);
        }
        self.cases.insert(
            case.id,
            CaseNode {
                value: case,
                parent_id,
                transition,
            },
        );
    }

    pub fn record_response(&mut self, case_id: CaseId, response: Response) {
        let request = response.request.clone();
        self.interactions
            .insert(case_id, Interaction::new(request, Some(response)));
    }

    /// A request that never got a response (network-level error).
    pub fn record_request(&mut self, case_id: CaseId, request: Request) {
        self.interactions.insert(case_id, Interaction::new(request, None));
    }

    pub fn record_check_failure(&mut self, name: &str, case_id: CaseId, code_sample: String, failure: Failure) {
        self.checks.entry(case_id).or_default().push(CheckNode {
            name: name.to_string(),
            status: CheckStatus::Failure,
            failure_info: Some(CheckFailureInfo { code_sample, failure }),
        });
    }

    pub fn record_check_success(&mut self, name: &str, case_id: CaseId) {
        self.checks.entry(case_id).or_default().push(CheckNode {
            name: name.to_string(),
            status: CheckStatus::Success,
            failure_info: None,
        });
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn case(&self, case_id: CaseId) -> Option<&CaseNode> {
        self.cases.get(&case_id)
    }

    /// All recorded cases in insertion order.
    pub fn cases(&self) -> impl Iterator<Item = &CaseNode> {
        self.cases.values()
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    pub fn checks(&self, case_id: CaseId) -> &[CheckNode] {
        self.checks.get(&case_id).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn interaction(&self, case_id: CaseId) -> Option<&Interaction> {
        self.interactions.get(&case_id)
    }

    pub fn roots(&self) -> impl Iterator<Item = &Case> {
        self.cases
            .values()
            .filter(|node| node.parent_id.is_none())
            .map(|node| &node.value)
    }

    /// Case and request context of a failure.
    ///
    /// A check may have issued its own request; its case id then wins over
    /// `parent_id`.
    ///
    /// # Panics
    ///
    /// Panics if the case, its interaction or the response is missing. Checks
    /// only run on cases that received a response.
    pub fn find_failure_data(&self, parent_id: CaseId, failure: &Failure) -> FailureData {
        let case_id = failure.case_id.unwrap_or(parent_id);
        let Some(node) = self.cases.get(&case_id) else {
            panic!("case {case_id} is not recorded");
        };
        let Some(interaction) = self.interactions.get(&case_id) else {
            panic!("case {case_id} has no recorded interaction");
        };
        let Some(response) = &interaction.response else {
            panic!("case {case_id} has no recorded response");
        };
        let headers = interaction
            .request
            .headers
            .iter()
            .filter_map(|(name, values)| values.first().map(|value| (name.clone(), value.clone())))
            .collect();
        FailureData {
            case: node.value.clone(),
            headers,
            verify: response.verify,
        }
    }

    /// # Panics
    ///
    /// Panics if the case has a parent id that is not recorded.
    pub fn find_parent(&self, case_id: CaseId) -> Option<&Case> {
        let parent_id = self.cases.get(&case_id)?.parent_id?;
        match self.cases.get(&parent_id) {
            Some(parent) => Some(&parent.value),
            None => panic!("parent case {parent_id} is not recorded"),
        }
    }

    /// Siblings of every ancestor of `case_id`, walking towards the root.
    ///
    /// At each level the siblings come first, then the ancestor itself. The
    /// query case is never yielded.
    pub fn find_related(&self, case_id: CaseId) -> Related<'_> {
        Related {
            recorder: self,
            seen: HashSet::from([case_id]),
            current: Some(case_id),
            pending: VecDeque::new(),
        }
    }

    pub fn find_response(&self, case_id: CaseId) -> Option<&Response> {
        self.interactions.get(&case_id)?.response.as_ref()
    }
}

/// Lazy upward walk returned by [`ScenarioRecorder::find_related`].
#[derive(Debug)]
pub struct Related<'a> {
    recorder: &'a ScenarioRecorder,
    seen: HashSet<CaseId>,
    current: Option<CaseId>,
    pending: VecDeque<CaseId>,
}

impl<'a> Iterator for Related<'a> {
    type Item = &'a Case;

    fn next(&mut self) -> Option<&'a Case> {
        loop {
            while let Some(id) = self.pending.pop_front() {
                if !self.seen.insert(id) {
                    continue;
                }
                if let Some(node) = self.recorder.cases.get(&id) {
                    return Some(&node.value);
                }
            }
            let parent_id = self
                .current
                .take()
                .and_then(|id| self.recorder.cases.get(&id))
                .and_then(|node| node.parent_id)?;
            if let Some(siblings) = self.recorder.children.get(&parent_id) {
                self.pending.extend(siblings.iter().copied());
            }
            self.pending.push_back(parent_id);
            self.current = Some(parent_id);
        }
    }
}
