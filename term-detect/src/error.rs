//! Error types for term-detect.
//!
//! All fallible operations return [`TermError`] through the [`Result`] alias.
//! Rule-level errors (unknown rule type, bad configuration, unsupported
//! constraints, type mismatches, missing columns) are recovered by the
//! [`Detector`](crate::core::Detector), which skips the failing rule and keeps
//! going. Only failures that break a structural precondition of a run, such
//! as attaching row identities, escape to the caller.

use thiserror::Error;

/// The main error type for term-detect.
#[derive(Error, Debug)]
pub enum TermError {
    /// The rule type is not present in the registry.
    #[error("Unknown rule type: {rule_type}")]
    UnknownRuleType { rule_type: String },

    /// A rule configuration is missing a required field or carries an
    /// invalid parameter.
    #[error("Invalid configuration for rule '{rule}': {message}")]
    InvalidConfig { rule: String, message: String },

    /// The constraint kind is unknown, or not supported by the rule it was
    /// attached to.
    #[error("Unsupported constraint '{kind}'{}", for_rule(.rule))]
    UnsupportedConstraint { kind: String, rule: Option<String> },

    /// A constraint or rule was applied to a column of an incompatible type.
    #[error("Type mismatch on column '{column}': expected {expected}, found {found}")]
    TypeMismatch {
        column: String,
        expected: String,
        found: String,
    },

    /// The column a rule targets does not exist in the dataset.
    #[error("Column '{column}' not found in dataset")]
    MissingColumn { column: String },

    /// A regular expression failed to compile.
    #[error("Invalid pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    /// A column with this name already exists and would be overwritten.
    #[error("Column '{column}' already exists in dataset")]
    DuplicateColumn { column: String },

    /// A media payload could not be fetched.
    #[error("Failed to fetch '{location}': {message}")]
    Fetch { location: String, message: String },

    /// Two rule configurations share the same `(name, on_column)` pair.
    #[error("Rule '{name}' on column '{column}' is declared more than once")]
    DuplicateRule { name: String, column: String },

    /// The run was cancelled between two rules.
    #[error("Detection cancelled after {completed} rule(s)")]
    Cancelled { completed: usize },

    /// Error from DataFusion operations.
    #[error("DataFusion error: {0}")]
    DataFusion(#[from] datafusion::error::DataFusionError),

    /// Error from Arrow operations.
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Error from I/O operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Error from serialization/deserialization operations.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic internal error for unexpected conditions.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A type alias for `Result<T, TermError>`.
pub type Result<T> = std::result::Result<T, TermError>;

fn for_rule(rule: &Option<String>) -> String {
    rule.as_deref()
        .map(|r| format!(" for rule type {r}"))
        .unwrap_or_default()
}

impl TermError {
    /// Creates an invalid configuration error for the named rule.
    pub fn invalid_config(rule: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            rule: rule.into(),
            message: message.into(),
        }
    }

    /// Creates a type mismatch error.
    pub fn type_mismatch(
        column: impl Into<String>,
        expected: impl Into<String>,
        found: impl std::fmt::Display,
    ) -> Self {
        Self::TypeMismatch {
            column: column.into(),
            expected: expected.into(),
            found: found.to_string(),
        }
    }

    /// Creates a fetch error for `location`.
    pub fn fetch(location: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Fetch {
            location: location.into(),
            message: message.to_string(),
        }
    }

    /// Creates a missing column error.
    pub fn missing_column(column: impl Into<String>) -> Self {
        Self::MissingColumn {
            column: column.into(),
        }
    }

    /// Short, stable identifier of the error kind, used in run summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            TermError::UnknownRuleType { .. } => "UnknownRuleType",
            TermError::InvalidConfig { .. } => "InvalidConfig",
            TermError::UnsupportedConstraint { .. } => "UnsupportedConstraint",
            TermError::TypeMismatch { .. } => "TypeMismatch",
            TermError::MissingColumn { .. } => "MissingColumn",
            TermError::InvalidPattern { .. } => "InvalidPattern",
            TermError::DuplicateColumn { .. } => "DuplicateColumn",
            TermError::DuplicateRule { .. } => "DuplicateRule",
            TermError::Fetch { .. } => "Fetch",
            TermError::Cancelled { .. } => "Cancelled",
            TermError::DataFusion(_) => "DataFusion",
            TermError::Arrow(_) => "Arrow",
            TermError::Io(_) => "Io",
            TermError::Serialization(_) => "Serialization",
            TermError::Internal(_) => "Internal",
        }
    }
}

impl From<serde_json::Error> for TermError {
    fn from(err: serde_json::Error) -> Self {
        TermError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for TermError {
    fn from(err: serde_yaml::Error) -> Self {
        TermError::Serialization(err.to_string())
    }
}

/// Extension trait for adding context to errors.
pub trait ErrorContext<T> {
    /// Adds context to an error.
    fn context(self, msg: &str) -> Result<T>;

    /// Adds context with a lazy message.
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: Into<TermError>,
{
    fn context(self, msg: &str) -> Result<T> {
        self.map_err(|e| match e.into() {
            TermError::Internal(inner) => TermError::Internal(format!("{msg}: {inner}")),
            other => TermError::Internal(format!("{msg}: {other}")),
        })
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let msg = f();
            match e.into() {
                TermError::Internal(inner) => TermError::Internal(format!("{msg}: {inner}")),
                other => TermError::Internal(format!("{msg}: {other}")),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_rule_type() {
        let err = TermError::UnknownRuleType {
            rule_type: "IMAGE_HUE".to_string(),
        };
        assert_eq!(err.to_string(), "Unknown rule type: IMAGE_HUE");
        assert_eq!(err.kind(), "UnknownRuleType");
    }

    #[test]
    fn test_unsupported_constraint_message() {
        let bare = TermError::UnsupportedConstraint {
            kind: "FUZZY".to_string(),
            rule: None,
        };
        assert_eq!(bare.to_string(), "Unsupported constraint 'FUZZY'");

        let scoped = TermError::UnsupportedConstraint {
            kind: "CONTAINS".to_string(),
            rule: Some("NUMERIC".to_string()),
        };
        assert_eq!(
            scoped.to_string(),
            "Unsupported constraint 'CONTAINS' for rule type NUMERIC"
        );
    }

    #[test]
    fn test_type_mismatch() {
        let err = TermError::type_mismatch("price", "text", "Int64");
        assert_eq!(
            err.to_string(),
            "Type mismatch on column 'price': expected text, found Int64"
        );
    }

    #[test]
    fn test_missing_column() {
        let err = TermError::missing_column("img");
        assert_eq!(err.to_string(), "Column 'img' not found in dataset");
    }

    #[test]
    fn test_error_context() {
        fn failing_operation() -> Result<()> {
            Err(TermError::Internal("row hashing failed".to_string()))
        }

        let err = failing_operation()
            .context("While attaching row identity")
            .unwrap_err();
        assert!(err.to_string().contains("While attaching row identity"));
        assert!(err.to_string().contains("row hashing failed"));
    }

    #[test]
    fn test_serde_errors_convert() {
        let err: TermError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert_eq!(err.kind(), "Serialization");
    }
}
