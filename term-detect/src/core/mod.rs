//! Core detection types.
//!
//! ```text
//! Detector
//!     ├── RuleRegistry ── RuleConfig → Box<dyn Rule>
//!     ├── Extractors (fetch, decode, probe)
//!     └── Dataset
//!           ├── __ROW_HASH__
//!           ├── __{col}_{FEATURE}__            derived, reused across rules
//!           └── __VALID_{rule}_{label}_{col}__ one per check
//! ```
//!
//! - **[`Dataset`]**: the table handle every rule consumes and returns
//! - **[`Constraint`]**: a compiled constraint, turned into a boolean
//!   expression by [`ConstraintEvaluator`]
//! - **[`Detector`]**: applies rule configurations in order and isolates
//!   failures
//! - **[`naming`]**: the column naming scheme that ties it together

pub mod constraint;
pub mod dataset;
pub mod detector;
pub mod evaluator;
pub mod naming;

pub use constraint::{Constraint, ConstraintKind, ConstraintSpec, Literal};
pub use dataset::Dataset;
pub use detector::{
    AppliedRule, CancellationToken, DetectionOutcome, Detector, DetectorBuilder, DetectorConfig,
    SkippedRule,
};
pub use evaluator::ConstraintEvaluator;
