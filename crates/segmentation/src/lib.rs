//! Contact segmentation — declarative segment definitions, streaming
//! evaluation against the contact directory, and materialized builds.

pub mod builder;
pub mod definition;
pub mod engine;
pub mod evaluator;
pub mod membership;
pub mod predicates;
pub mod registry;
pub mod source;

pub use builder::DefinitionBuilder;
pub use definition::SegmentDefinition;
pub use engine::{EvaluationMode, EvaluationResult, MemberResolution, Segment, SegmentationEngine};
pub use evaluator::{EvaluatorSettings, MembershipEvaluator, ScanOutcome};
pub use predicates::{compile, DefinitionWarning, Predicate};
pub use registry::{SegmentRecord, SegmentRegistry};
pub use source::{ContactSource, InMemoryDirectory, MembershipSource};
