//! The rule family.
//!
//! A [`Rule`] takes a [`Dataset`] by value and returns it augmented with
//! derived feature columns and one validity column per check. Rules are built
//! by the [`RuleRegistry`](registry::RuleRegistry) from a
//! [`RuleConfig`](crate::config::RuleConfig); every constraint is compiled at
//! construction, so a rule that builds successfully can only fail on the
//! shape of the data it is given.

pub mod audio;
pub mod image;
pub mod numeric;
pub mod registry;
pub mod text;

use crate::config::RuleConfig;
use crate::core::constraint::{Constraint, ConstraintKind};
use crate::core::evaluator::ConstraintEvaluator;
use crate::core::naming::validity_column_name;
use crate::core::Dataset;
use crate::error::{Result, TermError};
use arrow::datatypes::DataType;
use async_trait::async_trait;
use datafusion::prelude::Expr;
use std::fmt::Debug;
use tracing::debug;

pub use registry::{RuleDescriptor, RuleFactory, RuleInfo, RuleRegistry};

/// A pluggable validator for one data family.
#[async_trait]
pub trait Rule: Debug + Send + Sync {
    /// Identity and compiled constraints shared by every rule.
    fn base(&self) -> &RuleBase;

    /// Name used in validity column names.
    fn name(&self) -> &str {
        &self.base().name
    }

    /// Canonical registry identifier.
    fn rule_type(&self) -> &str {
        self.base().rule_type
    }

    /// Column the rule inspects.
    fn on_column(&self) -> &str {
        &self.base().on_column
    }

    /// Constraint kinds accepted in the `constraints` list.
    fn supported_constraints(&self) -> &'static [ConstraintKind] {
        self.base().supported
    }

    /// Adds this rule's derived and validity columns.
    ///
    /// Never removes or renames an existing column.
    async fn detect(&self, dataset: Dataset) -> Result<Dataset>;
}

/// State every rule carries.
#[derive(Debug, Clone)]
pub struct RuleBase {
    name: String,
    rule_type: &'static str,
    on_column: String,
    supported: &'static [ConstraintKind],
    constraints: Vec<Constraint>,
}

impl RuleBase {
    /// Validates the common fields of `config` and compiles its constraints.
    ///
    /// Fails with [`TermError::UnsupportedConstraint`] for a kind outside
    /// `supported`.
    pub fn new(
        config: &RuleConfig,
        rule_type: &'static str,
        supported: &'static [ConstraintKind],
    ) -> Result<Self> {
        let name = config.rule_name().to_string();
        let on_column = config
            .on_column
            .clone()
            .ok_or_else(|| TermError::invalid_config(&name, "missing required field `on_column`"))?;

        let constraints = config
            .constraints
            .iter()
            .map(|spec| {
                let kind = spec.kind()?;
                if !supported.contains(&kind) {
                    return Err(TermError::UnsupportedConstraint {
                        kind: kind.to_string(),
                        rule: Some(rule_type.to_string()),
                    });
                }
                spec.compile(&name)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            name,
            rule_type,
            on_column,
            supported,
            constraints,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn on_column(&self) -> &str {
        &self.on_column
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    /// Name of the validity column for `label`.
    pub fn validity_column(&self, label: &str) -> String {
        validity_column_name(&self.name, label, &self.on_column)
    }

    /// Adds one validity column.
    pub fn add_validity(&self, dataset: Dataset, label: &str, expr: Expr) -> Result<Dataset> {
        let column = self.validity_column(label);
        debug!(rule = %self.name, column = %column, "Adding validity column");
        dataset.with_column(&column, expr)
    }

    /// Adds `{prefix}{KIND}_{i}` validity columns for `constraints` applied
    /// to `target`.
    pub fn apply_constraints(
        &self,
        mut dataset: Dataset,
        target: &Expr,
        target_name: &str,
        data_type: &DataType,
        prefix: &str,
        constraints: &[Constraint],
    ) -> Result<Dataset> {
        for (i, constraint) in constraints.iter().enumerate() {
            let expr =
                ConstraintEvaluator::evaluate(target.clone(), target_name, data_type, constraint)?;
            let label = format!("{prefix}{}_{i}", constraint.kind());
            dataset = self.add_validity(dataset, &label, expr)?;
        }
        Ok(dataset)
    }

    /// The on-column's type, failing with `TypeMismatch` unless `accept`
    /// holds for it.
    pub fn column_type(
        &self,
        dataset: &Dataset,
        expected: &str,
        accept: impl Fn(&DataType) -> bool,
    ) -> Result<DataType> {
        let data_type = dataset.data_type(&self.on_column)?;
        if accept(&data_type) {
            Ok(data_type)
        } else {
            Err(TermError::type_mismatch(
                &self.on_column,
                expected,
                &data_type,
            ))
        }
    }
}
