//! Constraint kinds, raw specifications and their typed form.
//!
//! A [`ConstraintSpec`] is what configuration files carry: a kind name and a
//! loosely shaped value. Rules compile each spec into a [`Constraint`] once,
//! at construction, so payload shape errors and invalid regular expressions
//! are reported before any row is touched.

use crate::error::{Result, TermError};
use datafusion::prelude::{lit, Expr};
use datafusion::scalar::ScalarValue;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// The closed set of constraint kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConstraintKind {
    LessThan,
    GreaterThan,
    Equal,
    NotEqual,
    Between,
    In,
    NotIn,
    IsNull,
    IsNotNull,
    Contains,
    StartsWith,
    EndsWith,
    RegexMatch,
    WithinTolerance,
}

impl ConstraintKind {
    /// Every kind, in declaration order.
    pub const ALL: [ConstraintKind; 14] = [
        ConstraintKind::LessThan,
        ConstraintKind::GreaterThan,
        ConstraintKind::Equal,
        ConstraintKind::NotEqual,
        ConstraintKind::Between,
        ConstraintKind::In,
        ConstraintKind::NotIn,
        ConstraintKind::IsNull,
        ConstraintKind::IsNotNull,
        ConstraintKind::Contains,
        ConstraintKind::StartsWith,
        ConstraintKind::EndsWith,
        ConstraintKind::RegexMatch,
        ConstraintKind::WithinTolerance,
    ];

    /// Configuration identifier, also used in validity column labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConstraintKind::LessThan => "LESS_THAN",
            ConstraintKind::GreaterThan => "GREATER_THAN",
            ConstraintKind::Equal => "EQUAL",
            ConstraintKind::NotEqual => "NOT_EQUAL",
            ConstraintKind::Between => "BETWEEN",
            ConstraintKind::In => "IN",
            ConstraintKind::NotIn => "NOT_IN",
            ConstraintKind::IsNull => "IS_NULL",
            ConstraintKind::IsNotNull => "IS_NOT_NULL",
            ConstraintKind::Contains => "CONTAINS",
            ConstraintKind::StartsWith => "STARTS_WITH",
            ConstraintKind::EndsWith => "ENDS_WITH",
            ConstraintKind::RegexMatch => "REGEX_MATCH",
            ConstraintKind::WithinTolerance => "WITHIN_TOLERANCE",
        }
    }

    /// Kinds that only make sense on text columns.
    pub fn requires_text(&self) -> bool {
        matches!(
            self,
            ConstraintKind::Contains
                | ConstraintKind::StartsWith
                | ConstraintKind::EndsWith
                | ConstraintKind::RegexMatch
        )
    }
}

impl fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConstraintKind {
    type Err = TermError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_uppercase();
        ConstraintKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| TermError::UnsupportedConstraint {
                kind: s.to_string(),
                rule: None,
            })
    }
}

/// A constraint as written in configuration.
///
/// `kind` is kept as a string so that an unknown kind fails only the rule it
/// belongs to, not the whole configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintSpec {
    #[serde(alias = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Size unit (`B`, `KB`, `MB`, `GB`) for byte-size rules.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    /// Alternative spellings such as `min`/`max` or `expected`/`tolerance`.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ConstraintSpec {
    /// Creates a spec with a kind and a value.
    pub fn new(kind: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            kind: kind.into(),
            value: Some(value.into()),
            unit: None,
            extra: Map::new(),
        }
    }

    /// Creates a spec that carries no value, e.g. `IS_NULL`.
    pub fn bare(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            value: None,
            unit: None,
            extra: Map::new(),
        }
    }

    /// Sets the size unit.
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Parses the kind name.
    pub fn kind(&self) -> Result<ConstraintKind> {
        self.kind.parse()
    }

    /// Compiles this spec into a typed constraint.
    ///
    /// `rule` is only used to label errors.
    pub fn compile(&self, rule: &str) -> Result<Constraint> {
        let kind = self.kind()?;
        let constraint = match kind {
            ConstraintKind::LessThan => Constraint::LessThan(self.scalar(rule)?),
            ConstraintKind::GreaterThan => Constraint::GreaterThan(self.scalar(rule)?),
            ConstraintKind::Equal => Constraint::Equal(self.scalar(rule)?),
            ConstraintKind::NotEqual => Constraint::NotEqual(self.scalar(rule)?),
            ConstraintKind::Between => {
                let (min, max) = self.pair(rule, "min", "max")?;
                Constraint::Between { min, max }
            }
            ConstraintKind::In => Constraint::In(self.list(rule)?),
            ConstraintKind::NotIn => Constraint::NotIn(self.list(rule)?),
            ConstraintKind::IsNull => Constraint::IsNull,
            ConstraintKind::IsNotNull => Constraint::IsNotNull,
            ConstraintKind::Contains => Constraint::Contains(self.text(rule)?),
            ConstraintKind::StartsWith => Constraint::StartsWith(self.text(rule)?),
            ConstraintKind::EndsWith => Constraint::EndsWith(self.text(rule)?),
            ConstraintKind::RegexMatch => {
                let pattern = self.text(rule)?;
                validate_pattern(&pattern)?;
                Constraint::RegexMatch(pattern)
            }
            ConstraintKind::WithinTolerance => {
                let (expected, tolerance) = self.pair(rule, "expected", "tolerance")?;
                let expected = expected.as_f64().ok_or_else(|| {
                    TermError::invalid_config(rule, "WITHIN_TOLERANCE expects numeric values")
                })?;
                let tolerance = tolerance.as_f64().ok_or_else(|| {
                    TermError::invalid_config(rule, "WITHIN_TOLERANCE expects numeric values")
                })?;
                if tolerance < 0.0 {
                    return Err(TermError::invalid_config(
                        rule,
                        "WITHIN_TOLERANCE tolerance must not be negative",
                    ));
                }
                Constraint::WithinTolerance {
                    expected,
                    tolerance,
                }
            }
        };
        Ok(constraint)
    }

    fn require_value(&self, rule: &str) -> Result<&Value> {
        self.value.as_ref().ok_or_else(|| {
            TermError::invalid_config(rule, format!("constraint {} requires a value", self.kind))
        })
    }

    fn scalar(&self, rule: &str) -> Result<Literal> {
        Literal::from_json(self.require_value(rule)?).ok_or_else(|| {
            TermError::invalid_config(
                rule,
                format!("constraint {} expects a scalar value", self.kind),
            )
        })
    }

    fn text(&self, rule: &str) -> Result<String> {
        match self.require_value(rule)? {
            Value::String(s) => Ok(s.clone()),
            other => Ok(other.to_string()),
        }
    }

    fn list(&self, rule: &str) -> Result<Vec<Literal>> {
        let items = match self.require_value(rule)? {
            Value::Array(items) => items,
            _ => {
                return Err(TermError::invalid_config(
                    rule,
                    format!("constraint {} expects a list", self.kind),
                ))
            }
        };
        items
            .iter()
            .map(|item| {
                Literal::from_json(item).ok_or_else(|| {
                    TermError::invalid_config(
                        rule,
                        format!("constraint {} list items must be scalars", self.kind),
                    )
                })
            })
            .collect()
    }

    /// Reads a two element payload either from `value: [a, b]` or from the
    /// named keys.
    fn pair(&self, rule: &str, first: &str, second: &str) -> Result<(Literal, Literal)> {
        let malformed = || {
            TermError::invalid_config(
                rule,
                format!(
                    "constraint {} expects `value: [{first}, {second}]` or `{first}`/`{second}`",
                    self.kind
                ),
            )
        };

        if let Some(Value::Array(items)) = &self.value {
            if items.len() != 2 {
                return Err(malformed());
            }
            let a = Literal::from_json(&items[0]).ok_or_else(malformed)?;
            let b = Literal::from_json(&items[1]).ok_or_else(malformed)?;
            return Ok((a, b));
        }

        let a = self
            .extra
            .get(first)
            .and_then(Literal::from_json)
            .ok_or_else(malformed)?;
        let b = self
            .extra
            .get(second)
            .and_then(Literal::from_json)
            .ok_or_else(malformed)?;
        Ok((a, b))
    }
}

/// Compiles `pattern` to make sure it is a valid regular expression.
pub fn validate_pattern(pattern: &str) -> Result<()> {
    regex::Regex::new(pattern)
        .map(|_| ())
        .map_err(|e| TermError::InvalidPattern {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })
}

/// A scalar constraint operand.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i64),
    Float(f64),
    Text(String),
    Bool(bool),
}

impl Literal {
    /// Converts a JSON scalar; arrays, objects and null yield `None`.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(Literal::Bool(*b)),
            Value::Number(n) => n
                .as_i64()
                .map(Literal::Int)
                .or_else(|| n.as_f64().map(Literal::Float)),
            Value::String(s) => Some(Literal::Text(s.clone())),
            Value::Null | Value::Array(_) | Value::Object(_) => None,
        }
    }

    /// Numeric view of the literal.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Literal::Int(i) => Some(*i as f64),
            Literal::Float(f) => Some(*f),
            Literal::Text(_) | Literal::Bool(_) => None,
        }
    }

    /// Returns true for text literals.
    pub fn is_text(&self) -> bool {
        matches!(self, Literal::Text(_))
    }

    /// Multiplies a numeric literal, keeping integers integral.
    pub fn scaled(&self, factor: i64) -> Option<Literal> {
        match self {
            Literal::Int(i) => i.checked_mul(factor).map(Literal::Int),
            Literal::Float(f) => Some(Literal::Float(f * factor as f64)),
            Literal::Text(_) | Literal::Bool(_) => None,
        }
    }

    /// The literal as a DataFusion scalar.
    pub fn to_scalar(&self) -> ScalarValue {
        match self {
            Literal::Int(i) => ScalarValue::Int64(Some(*i)),
            Literal::Float(f) => ScalarValue::Float64(Some(*f)),
            Literal::Text(s) => ScalarValue::Utf8(Some(s.clone())),
            Literal::Bool(b) => ScalarValue::Boolean(Some(*b)),
        }
    }

    /// The literal as a DataFusion expression.
    pub fn to_expr(&self) -> Expr {
        lit(self.to_scalar())
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Int(i) => write!(f, "{i}"),
            Literal::Float(v) => write!(f, "{v}"),
            Literal::Text(s) => write!(f, "'{s}'"),
            Literal::Bool(b) => write!(f, "{b}"),
        }
    }
}

/// A compiled constraint with a payload shaped for its kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    LessThan(Literal),
    GreaterThan(Literal),
    Equal(Literal),
    NotEqual(Literal),
    /// Inclusive on both ends.
    Between {
        min: Literal,
        max: Literal,
    },
    In(Vec<Literal>),
    NotIn(Vec<Literal>),
    IsNull,
    IsNotNull,
    Contains(String),
    StartsWith(String),
    EndsWith(String),
    /// Full-match semantics.
    RegexMatch(String),
    WithinTolerance {
        expected: f64,
        tolerance: f64,
    },
}

impl Constraint {
    /// The kind of this constraint.
    pub fn kind(&self) -> ConstraintKind {
        match self {
            Constraint::LessThan(_) => ConstraintKind::LessThan,
            Constraint::GreaterThan(_) => ConstraintKind::GreaterThan,
            Constraint::Equal(_) => ConstraintKind::Equal,
            Constraint::NotEqual(_) => ConstraintKind::NotEqual,
            Constraint::Between { .. } => ConstraintKind::Between,
            Constraint::In(_) => ConstraintKind::In,
            Constraint::NotIn(_) => ConstraintKind::NotIn,
            Constraint::IsNull => ConstraintKind::IsNull,
            Constraint::IsNotNull => ConstraintKind::IsNotNull,
            Constraint::Contains(_) => ConstraintKind::Contains,
            Constraint::StartsWith(_) => ConstraintKind::StartsWith,
            Constraint::EndsWith(_) => ConstraintKind::EndsWith,
            Constraint::RegexMatch(_) => ConstraintKind::RegexMatch,
            Constraint::WithinTolerance { .. } => ConstraintKind::WithinTolerance,
        }
    }

    /// Applies a byte multiplier to every numeric operand.
    ///
    /// Used by size rules to turn `10 KB` into `10240`.
    pub fn scaled(&self, factor: i64, rule: &str) -> Result<Constraint> {
        let scale = |l: &Literal| {
            l.scaled(factor).ok_or_else(|| {
                TermError::invalid_config(rule, format!("cannot apply a size unit to {l}"))
            })
        };
        let scaled = match self {
            Constraint::LessThan(v) => Constraint::LessThan(scale(v)?),
            Constraint::GreaterThan(v) => Constraint::GreaterThan(scale(v)?),
            Constraint::Equal(v) => Constraint::Equal(scale(v)?),
            Constraint::NotEqual(v) => Constraint::NotEqual(scale(v)?),
            Constraint::Between { min, max } => Constraint::Between {
                min: scale(min)?,
                max: scale(max)?,
            },
            Constraint::In(values) => {
                Constraint::In(values.iter().map(scale).collect::<Result<_>>()?)
            }
            Constraint::NotIn(values) => {
                Constraint::NotIn(values.iter().map(scale).collect::<Result<_>>()?)
            }
            Constraint::WithinTolerance {
                expected,
                tolerance,
            } => Constraint::WithinTolerance {
                expected: expected * factor as f64,
                tolerance: tolerance * factor as f64,
            },
            other => other.clone(),
        };
        Ok(scaled)
    }
}
