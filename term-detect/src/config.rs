//! Rule configuration records and loading them from JSON or YAML.
//!
//! ```yaml
//! rules:
//!   - type: IMAGE_RESOLUTION
//!     name: H
//!     on_column: img
//!     dimension: height
//!     constraints:
//!       - kind: LESS_THAN
//!         value: 400
//! ```
//!
//! Every key other than `type`, `name`, `on_column` and `constraints` is a
//! family parameter and is kept as raw JSON until the rule is built. A
//! malformed entry therefore fails only its own rule, never the whole file.

use crate::core::constraint::ConstraintSpec;
use crate::error::{Result, TermError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

/// Configuration for one rule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Registry identifier, matched case-insensitively.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub rule_type: Option<String>,
    /// Name used in validity column names. Defaults to the type identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Column the rule inspects.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_column: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constraints: Vec<ConstraintSpec>,
    /// Family-specific parameters.
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

impl RuleConfig {
    /// Creates a configuration for `rule_type` on `on_column`.
    pub fn new(rule_type: impl Into<String>, on_column: impl Into<String>) -> Self {
        Self {
            rule_type: Some(rule_type.into()),
            on_column: Some(on_column.into()),
            ..Self::default()
        }
    }

    /// Sets the rule name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Appends a constraint.
    pub fn with_constraint(mut self, constraint: ConstraintSpec) -> Self {
        self.constraints.push(constraint);
        self
    }

    /// Sets a family parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// The effective rule name: `name`, else `type`, else `<unnamed>`.
    pub fn rule_name(&self) -> &str {
        self.name
            .as_deref()
            .or(self.rule_type.as_deref())
            .unwrap_or("<unnamed>")
    }

    /// Deserializes the family parameters into a typed struct.
    pub fn params<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(Value::Object(self.params.clone()))
            .map_err(|e| TermError::invalid_config(self.rule_name(), e.to_string()))
    }
}

/// A list of rule configurations, as loaded from a file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionConfig {
    #[serde(alias = "detectors", default)]
    pub rules: Vec<RuleConfig>,
}

impl DetectionConfig {
    /// Parses a JSON document.
    pub fn from_json(input: &str) -> Result<Self> {
        Ok(serde_json::from_str(input)?)
    }

    /// Parses a YAML document.
    pub fn from_yaml(input: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(input)?)
    }

    /// Loads a file, choosing the format from its extension.
    ///
    /// `.json` is parsed as JSON; anything else as YAML, which also accepts
    /// plain JSON.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            Self::from_json(&input)
        } else {
            Self::from_yaml(&input)
        }
    }
}
