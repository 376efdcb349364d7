//! The vigil assessment pipeline.
//!
//! [`PipelineCoordinator`] runs each [`AssessmentRequest`](vigil_core::request::AssessmentRequest)
//! through four bounded dialogues between the roles held by a [`RoleRegistry`],
//! folds the risk stage's scores into the shared [`RiskMatrix`], and lets the
//! [`AlertDecisionPolicy`] decide whether an alert goes out.

pub mod coordinator;
pub mod dialogue;
pub mod error;
pub mod extract;
pub mod matrix;
pub mod policy;
pub mod prompts;
pub mod registry;
pub mod state;

pub use coordinator::{AlertOutcome, AssessmentOutcome, CoordinatorConfig, PipelineCoordinator};
pub use dialogue::DialogueSession;
pub use error::EngineError;
pub use extract::{AssessmentExtractor, JsonBlockExtractor};
pub use matrix::RiskMatrix;
pub use policy::AlertDecisionPolicy;
pub use registry::RoleRegistry;
