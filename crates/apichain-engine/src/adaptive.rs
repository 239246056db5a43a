//! Learned link-vs-fresh decisions for link parameters.
//!
//! Every time a link is followed the driver may either reuse the value the
//! link extracted from the previous response or let the case generator pick
//! a fresh one. Per-parameter success statistics decide which. Statistics
//! are shared across all scenarios of a run; concurrent updates go through
//! [`DashMap`] shard locks.

use std::sync::{Mutex, PoisonError};

use dashmap::DashMap;
use indexmap::IndexMap;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde_json::Value;
use tracing::trace;

use apichain_core::{Operation, ParameterLocation};

use crate::case::{plain_text, Case, Transition};
use crate::config::StatefulConfig;
use crate::transitions::StatefulLink;

/// Optimistic probability used before enough evidence exists.
pub const INITIAL_SUCCESS_RATE: f64 = 0.7;
pub const BASE_EXPLORATION_RATE: f64 = 0.15;
pub const MEDIUM_CONFIDENCE_THRESHOLD: f64 = 50.0;
pub const HIGH_CONFIDENCE_THRESHOLD: f64 = 100.0;
/// Floor for parameters that keep failing.
pub const CONSISTENT_FAILURE_PENALTY: f64 = 0.03;
pub const MAX_BOOST: f64 = 0.25;

const MAX_PROBABILITY: f64 = 0.95;
const COLD_START_MINIMUM: f64 = 0.15;
const MINIMUM_EVIDENCE: f64 = 3.0;

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

/// Statistics of one link parameter, e.g. `path.userId`.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterState {
    pub location: ParameterLocation,
    pub name: String,
    pub is_required: bool,
    pub successes: f64,
    /// Fractional: blame for a failed call is split across its parameters.
    pub failures: f64,
}

impl ParameterState {
    pub fn new(location: ParameterLocation, name: impl Into<String>, is_required: bool) -> Self {
        ParameterState {
            location,
            name: name.into(),
            is_required,
            successes: 0.0,
            failures: 0.0,
        }
    }

    pub fn qualified_name(&self) -> String {
        self.location.qualify(&self.name)
    }

    pub fn total(&self) -> f64 {
        self.successes + self.failures
    }

    /// Probability of reusing the link value instead of generating one.
    pub fn use_probability(&self) -> f64 {
        let total = self.total();
        if total < MINIMUM_EVIDENCE {
            return self.adjust_for_location(INITIAL_SUCCESS_RATE);
        }
        if total > MEDIUM_CONFIDENCE_THRESHOLD && self.successes == 0.0 {
            return CONSISTENT_FAILURE_PENALTY;
        }

        let raw_rate = self.successes / total;
        let rate = if total > MEDIUM_CONFIDENCE_THRESHOLD {
            raw_rate.powf(0.7)
        } else {
            raw_rate
        };
        let exploration = BASE_EXPLORATION_RATE * if self.is_required { 0.5 } else { 1.0 };
        let mut probability = rate * (1.0 - exploration) + (1.0 - rate) * exploration;

        // Good parameters are sometimes blamed for a bad partner's failure.
        if total > HIGH_CONFIDENCE_THRESHOLD && rate > 0.2 {
            let boost = MAX_BOOST.min((total - HIGH_CONFIDENCE_THRESHOLD) / 1000.0);
            probability = MAX_PROBABILITY.min(probability + boost);
        }

        let minimum = if total > MEDIUM_CONFIDENCE_THRESHOLD {
            CONSISTENT_FAILURE_PENALTY
        } else {
            COLD_START_MINIMUM
        };
        self.adjust_for_location(probability.clamp(minimum, MAX_PROBABILITY))
    }

    /// Path parameters route the request, so link values are preferred.
    fn adjust_for_location(&self, rate: f64) -> f64 {
        match self.location {
            ParameterLocation::Path => rate + (1.0 - rate) / 2.0,
            _ => rate,
        }
    }
}

/// Statistics of one link, keyed by qualified parameter name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransitionState {
    pub parameters: IndexMap<String, ParameterState>,
    pub successes: u64,
    pub failures: u64,
}

impl TransitionState {
    pub fn new(parameters: impl IntoIterator<Item = ParameterState>) -> Self {
        TransitionState {
            parameters: parameters
                .into_iter()
                .map(|parameter| (parameter.qualified_name(), parameter))
                .collect(),
            successes: 0,
            failures: 0,
        }
    }

    /// One state per link parameter, plus `body` when the link sets one.
    pub fn for_link(link: &StatefulLink, target: &Operation) -> Self {
        let mut parameters: Vec<ParameterState> = link
            .parameters
            .iter()
            .map(|parameter| {
                let is_required = target
                    .get_parameter(parameter.location, &parameter.name)
                    .is_some_and(|declared| declared.required);
                ParameterState::new(parameter.location, parameter.name.clone(), is_required)
            })
            .collect();
        if link.body.is_some() {
            let is_required = target.body.as_ref().is_some_and(|body| body.required);
            parameters.push(ParameterState::new(
                ParameterLocation::Body,
                BODY_PARAMETER,
                is_required,
            ));
        }
        Self::new(parameters)
    }

    pub fn update(&mut self, is_success: bool, applied: &[String]) {
        if is_success {
            self.successes += 1;
        } else {
            self.failures += 1;
        }
        // Blame is split between the parameters this link tracks.
        let known = applied
            .iter()
            .filter(|name| self.parameters.contains_key(name.as_str()))
            .count();
        let share = 1.0 / known.max(1) as f64;
        for name in applied {
            let Some(parameter) = self.parameters.get_mut(name) else {
                continue;
            };
            if is_success {
                parameter.successes += 1.0;
            } else {
                parameter.failures += share;
            }
        }
    }

    pub fn use_probability(&self, qualified_name: &str) -> f64 {
        self.parameters
            .get(qualified_name)
            .map(ParameterState::use_probability)
            .unwrap_or(INITIAL_SUCCESS_RATE)
    }
}

/// Name under which a link body is tracked (`body.body` once qualified).
const BODY_PARAMETER: &str = "body";

// ---------------------------------------------------------------------------
// Case generation boundary
// ---------------------------------------------------------------------------

/// Link values the generator must use as-is.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PinnedParameters {
    pub values: IndexMap<ParameterLocation, IndexMap<String, Value>>,
    pub body: Option<Value>,
    pub merge_body: bool,
}

impl PinnedParameters {
    pub fn is_empty(&self) -> bool {
        self.values.values().all(IndexMap::is_empty) && self.body.is_none()
    }

    pub fn get(&self, location: ParameterLocation, name: &str) -> Option<&Value> {
        self.values.get(&location)?.get(name)
    }

    /// Writes the pinned values over a generated case.
    ///
    /// With `merge_body`, object bodies are merged key by key; anything else
    /// replaces the generated body.
    pub fn apply_to(&self, case: &mut Case) {
        for (location, values) in &self.values {
            for (name, value) in values {
                match location {
                    ParameterLocation::Path => {
                        case.path_parameters.insert(name.clone(), value.clone());
                    }
                    ParameterLocation::Query => {
                        case.query.insert(name.clone(), value.clone());
                    }
                    ParameterLocation::Header => {
                        case.headers.insert(name.clone(), plain_text(value));
                    }
                    ParameterLocation::Cookie => {
                        case.cookies.insert(name.clone(), plain_text(value));
                    }
                    ParameterLocation::Body => {}
                }
            }
        }
        if let Some(body) = &self.body {
            case.body = Some(match (self.merge_body, case.body.take()) {
                (true, Some(Value::Object(mut generated))) if body.is_object() => {
                    if let Value::Object(pinned) = body {
                        generated.extend(pinned.clone());
                    }
                    Value::Object(generated)
                }
                _ => body.clone(),
            });
        }
    }
}

/// Produces test cases for an operation; fills everything not pinned.
pub trait CaseGenerator {
    fn generate_case(&self, operation: &Operation, pinned: &PinnedParameters) -> Case;
}

/// A generated case and the link parameters it reused.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedCase {
    pub case: Case,
    /// Qualified names to pass back to [`AdaptiveParameters::update`].
    pub applied: Vec<String>,
}

// ---------------------------------------------------------------------------
// AdaptiveParameters
// ---------------------------------------------------------------------------

/// Run-wide statistics table keyed by link id.
#[derive(Debug)]
pub struct AdaptiveParameters {
    states: DashMap<String, TransitionState>,
    rng: Mutex<ChaCha8Rng>,
}

impl AdaptiveParameters {
    pub fn new(seed: Option<u64>) -> Self {
        let seed = seed.unwrap_or_else(rand::random);
        AdaptiveParameters {
            states: DashMap::new(),
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(seed)),
        }
    }

    pub fn from_config(config: &StatefulConfig) -> Self {
        Self::new(config.seed)
    }

    /// Decides which extracted values to reuse, then asks `generator` for
    /// the rest.
    ///
    /// Values whose expression failed to resolve are never pinned.
    pub fn prepare_case(
        &self,
        link: &StatefulLink,
        target: &Operation,
        transition: &Transition,
        generator: &impl CaseGenerator,
    ) -> PreparedCase {
        let mut pinned = PinnedParameters {
            merge_body: link.merge_body,
            ..PinnedParameters::default()
        };
        let mut applied = Vec::new();
        {
            let state = self
                .states
                .entry(transition.id.clone())
                .or_insert_with(|| TransitionState::for_link(link, target));
            let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);

            for (location, parameters) in &transition.parameters {
                for (name, extracted) in parameters {
                    let Ok(value) = &extracted.value else {
                        continue;
                    };
                    let qualified = location.qualify(name);
                    let probability = state.use_probability(&qualified);
                    if rng.gen::<f64>() < probability {
                        pinned
                            .values
                            .entry(*location)
                            .or_default()
                            .insert(name.clone(), value.clone());
                        applied.push(qualified);
                    } else {
                        trace!(transition = %transition.id, parameter = %qualified, probability, "generating fresh value");
                    }
                }
            }

            if let Some(Ok(body)) = transition.request_body.as_ref().map(|body| &body.value) {
                let qualified = ParameterLocation::Body.qualify(BODY_PARAMETER);
                if rng.gen::<f64>() < state.use_probability(&qualified) {
                    pinned.body = Some(body.clone());
                    applied.push(qualified);
                }
            }
        }

        let mut case = generator.generate_case(target, &pinned);
        pinned.apply_to(&mut case);
        PreparedCase { case, applied }
    }

    /// Feeds back the outcome of a call made with `applied` link values.
    pub fn update(&self, link_id: &str, is_success: bool, applied: &[String]) {
        if let Some(mut state) = self.states.get_mut(link_id) {
            state.update(is_success, applied);
        }
    }

    pub fn use_probability(&self, link_id: &str, qualified_name: &str) -> Option<f64> {
        let state = self.states.get(link_id)?;
        state.parameters.get(qualified_name).map(ParameterState::use_probability)
    }

    /// Copy of the statistics of one link.
    pub fn snapshot(&self, link_id: &str) -> Option<TransitionState> {
        self.states.get(link_id).map(|state| state.clone())
    }
}
