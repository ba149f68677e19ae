//! Prelude for commonly used types and traits in term-detect.

pub use crate::config::{DetectionConfig, RuleConfig};
pub use crate::core::{
    CancellationToken, ConstraintKind, ConstraintSpec, Dataset, DetectionOutcome, Detector,
    DetectorConfig,
};
pub use crate::error::{ErrorContext, Result, TermError};
pub use crate::extract::{Extractors, FetchOptions};
pub use crate::logging::LogConfig;
pub use crate::report::{ReportFormatter, Reporter};
pub use crate::rules::{Rule, RuleRegistry};
