//! Runtime side of stateful API testing.
//!
//! Given a schema with declared and inferred links, this crate turns links
//! into executable transitions, decides which of them a driver may follow
//! next, learns whether link-supplied values or freshly generated ones work
//! better, and keeps a ledger of every executed case for failure reports.
//! It performs no I/O: the driver sends requests and feeds results back.

pub mod adaptive;
pub mod case;
pub mod config;
pub mod control;
pub mod error;
pub mod expressions;
pub mod recorder;
pub mod transitions;

// Re-export commonly used types
pub use adaptive::{AdaptiveParameters, CaseGenerator, ParameterState, PinnedParameters, PreparedCase, TransitionState};
pub use case::{Case, CaseId, ExtractedParam, Interaction, Request, Response, StepInput, StepOutput, Transition};
pub use config::StatefulConfig;
pub use control::TransitionController;
pub use error::{ConfigError, ExpressionError, TransitionError};
pub use recorder::{CaseNode, CheckNode, CheckStatus, Failure, FailureData, ScenarioRecorder};
pub use transitions::{ApiTransitions, LinkParameter, StatefulLink};
