//! Text rules: `TEXT` and `CATEGORY`.

use super::registry::{RuleDescriptor, RuleRegistry};
use super::{Rule, RuleBase};
use crate::config::RuleConfig;
use crate::core::constraint::{validate_pattern, ConstraintKind, Literal};
use crate::core::evaluator::{full_match, is_text};
use crate::core::Dataset;
use crate::error::{Result, TermError};
use async_trait::async_trait;
use datafusion::prelude::*;
use serde::Deserialize;
use serde_json::Value;
use tracing::instrument;

const SUPPORTED: &[ConstraintKind] = &[
    ConstraintKind::Equal,
    ConstraintKind::NotEqual,
    ConstraintKind::In,
    ConstraintKind::NotIn,
    ConstraintKind::Contains,
    ConstraintKind::StartsWith,
    ConstraintKind::EndsWith,
    ConstraintKind::RegexMatch,
    ConstraintKind::IsNull,
    ConstraintKind::IsNotNull,
];

const EMAIL_PATTERN: &str = r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}";
const PHONE_PATTERN: &str = r"\+?[\d\s\-\(\)]{10,}";
const URL_PATTERN: &str = r"https?://[^\s/$.?#].[^\s]*";

/// Registers `TEXT` and `CATEGORY`.
pub fn register(registry: &mut RuleRegistry) {
    registry.register(
        "TEXT",
        RuleDescriptor::new(
            "Length, pattern, format and character set checks on text columns",
            SUPPORTED,
            |config, _| Ok(Box::new(TextRule::new(config, "TEXT")?) as Box<dyn Rule>),
        ),
    );
    registry.register(
        "CATEGORY",
        RuleDescriptor::new(
            "Text checks plus membership in a fixed set of categories",
            SUPPORTED,
            |config, _| Ok(Box::new(TextRule::new(config, "CATEGORY")?) as Box<dyn Rule>),
        ),
    );
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LengthParams {
    pub exact: Option<i64>,
    pub min: Option<i64>,
    pub max: Option<i64>,
    pub range: Option<[i64; 2]>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PatternParams {
    pub pattern: String,
    /// `match` (full match, the default) or `contains` (found anywhere).
    #[serde(rename = "type", default = "default_match_type")]
    pub match_type: String,
}

fn default_match_type() -> String {
    "match".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct FormatParams {
    /// `EMAIL`, `PHONE`, `URL` or `CUSTOM`.
    #[serde(rename = "type")]
    pub format_type: String,
    /// Required for `CUSTOM`, overrides the default for `PHONE`.
    pub pattern: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CharsetParams {
    pub allowed_chars: Option<String>,
    pub forbidden_chars: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TextParams {
    #[serde(default)]
    pub length: Option<LengthParams>,
    #[serde(default)]
    pub patterns: Vec<PatternParams>,
    #[serde(default)]
    pub format: Option<FormatParams>,
    #[serde(default)]
    pub charset: Option<CharsetParams>,
    #[serde(default)]
    pub valid_categories: Option<Vec<Value>>,
}

/// A compiled pattern check.
#[derive(Debug, Clone)]
enum PatternCheck {
    FullMatch(String),
    Search(String),
}

#[derive(Debug, Clone)]
pub struct TextRule {
    base: RuleBase,
    length: Option<LengthParams>,
    patterns: Vec<PatternCheck>,
    /// `(label, pattern)` of the format check.
    format: Option<(String, String)>,
    allowed_charset: Option<String>,
    forbidden: Vec<char>,
    categories: Option<Vec<Literal>>,
}

impl TextRule {
    /// Builds a `TEXT` rule, or a `CATEGORY` rule when `rule_type` says so.
    pub fn new(config: &RuleConfig, rule_type: &'static str) -> Result<Self> {
        let base = RuleBase::new(config, rule_type, SUPPORTED)?;
        let params: TextParams = config.params()?;
        let invalid = |message: String| TermError::invalid_config(base.name(), message);

        let patterns = params
            .patterns
            .iter()
            .map(|p| {
                validate_pattern(&p.pattern)?;
                match p.match_type.to_ascii_lowercase().as_str() {
                    "match" => Ok(PatternCheck::FullMatch(p.pattern.clone())),
                    "contains" => Ok(PatternCheck::Search(p.pattern.clone())),
                    other => Err(invalid(format!("unsupported pattern match type '{other}'"))),
                }
            })
            .collect::<Result<Vec<_>>>()?;

        let format = match &params.format {
            Some(format) => {
                let format_type = format.format_type.to_ascii_uppercase();
                let pattern = match format_type.as_str() {
                    "EMAIL" => EMAIL_PATTERN.to_string(),
                    "PHONE" => format
                        .pattern
                        .clone()
                        .unwrap_or_else(|| PHONE_PATTERN.to_string()),
                    "URL" => URL_PATTERN.to_string(),
                    "CUSTOM" => format
                        .pattern
                        .clone()
                        .ok_or_else(|| invalid("CUSTOM format requires a pattern".to_string()))?,
                    other => return Err(invalid(format!("unsupported format type '{other}'"))),
                };
                validate_pattern(&pattern)?;
                Some((format!("{format_type}_FORMAT"), pattern))
            }
            None => None,
        };

        let (allowed_charset, forbidden) = match params.charset {
            Some(charset) => {
                let allowed = charset.allowed_chars.map(|chars| {
                    if chars.is_empty() {
                        String::new()
                    } else {
                        format!("[{}]*", regex::escape(&chars))
                    }
                });
                let mut forbidden: Vec<char> = Vec::new();
                for c in charset.forbidden_chars.unwrap_or_default().chars() {
                    if !forbidden.contains(&c) {
                        forbidden.push(c);
                    }
                }
                (allowed, forbidden)
            }
            None => (None, Vec::new()),
        };

        let categories = match (rule_type, params.valid_categories) {
            ("CATEGORY", Some(values)) => Some(
                values
                    .iter()
                    .map(|v| {
                        Literal::from_json(v)
                            .ok_or_else(|| invalid("valid_categories must be scalars".to_string()))
                    })
                    .collect::<Result<Vec<_>>>()?,
            ),
            _ => None,
        };

        Ok(Self {
            base,
            length: params.length,
            patterns,
            format,
            allowed_charset,
            forbidden,
            categories,
        })
    }

    fn length_checks(
        &self,
        mut dataset: Dataset,
        column: &Expr,
        length: &LengthParams,
    ) -> Result<Dataset> {
        let len = character_length(column.clone());
        if let Some(exact) = length.exact {
            dataset = self
                .base
                .add_validity(dataset, "LENGTH_EXACT", len.clone().eq(lit(exact)))?;
        }
        if let Some(min) = length.min {
            dataset = self
                .base
                .add_validity(dataset, "LENGTH_MIN", len.clone().gt_eq(lit(min)))?;
        }
        if let Some(max) = length.max {
            dataset = self
                .base
                .add_validity(dataset, "LENGTH_MAX", len.clone().lt_eq(lit(max)))?;
        }
        if let Some([min, max]) = length.range {
            let expr = len.clone().gt_eq(lit(min)).and(len.lt_eq(lit(max)));
            dataset = self.base.add_validity(dataset, "LENGTH_RANGE", expr)?;
        }
        Ok(dataset)
    }
}

#[async_trait]
impl Rule for TextRule {
    fn base(&self) -> &RuleBase {
        &self.base
    }

    #[instrument(skip_all, fields(rule = %self.base.name(), column = %self.base.on_column()))]
    async fn detect(&self, dataset: Dataset) -> Result<Dataset> {
        let on_column = self.base.on_column();
        let data_type = self.base.column_type(&dataset, "text", is_text)?;
        let column = dataset.column(on_column)?;

        let mut dataset = self.base.apply_constraints(
            dataset,
            &column,
            on_column,
            &data_type,
            "",
            self.base.constraints(),
        )?;

        if let Some(length) = &self.length {
            dataset = self.length_checks(dataset, &column, length)?;
        }

        for (i, pattern) in self.patterns.iter().enumerate() {
            let expr = match pattern {
                PatternCheck::FullMatch(p) => full_match(column.clone(), p),
                PatternCheck::Search(p) => regexp_like(column.clone(), lit(p.as_str()), None),
            };
            dataset = self
                .base
                .add_validity(dataset, &format!("PATTERN_{i}"), expr)?;
        }

        if let Some((label, pattern)) = &self.format {
            dataset = self
                .base
                .add_validity(dataset, label, full_match(column.clone(), pattern))?;
        }

        if let Some(allowed) = &self.allowed_charset {
            dataset = self.base.add_validity(
                dataset,
                "ALLOWED_CHARSET",
                full_match(column.clone(), allowed),
            )?;
        }
        for c in &self.forbidden {
            let expr = strpos(column.clone(), lit(c.to_string())).eq(lit(0i64));
            dataset = self.base.add_validity(
                dataset,
                &format!("NO_FORBIDDEN_CHAR_{}", u32::from(*c)),
                expr,
            )?;
        }

        if let Some(categories) = &self.categories {
            let expr = in_list(
                column.clone(),
                categories.iter().map(Literal::to_expr).collect(),
                false,
            );
            dataset = self.base.add_validity(dataset, "VALID_CATEGORY", expr)?;
        }

        Ok(dataset)
    }
}
