//! Numeric rules: `NUMERIC`, `INTEGER` and `FLOAT`.
//!
//! All three apply their constraints, an optional range and optional outlier
//! statistics. `INTEGER` adds an integer-ness check and `FLOAT` adds
//! infinity, NaN and decimal precision checks.

use super::registry::{RuleDescriptor, RuleRegistry};
use super::{Rule, RuleBase};
use crate::config::RuleConfig;
use crate::core::constraint::ConstraintKind;
use crate::core::Dataset;
use crate::error::{Result, TermError};
use arrow::array::{Array, AsArray};
use arrow::datatypes::{DataType, Float64Type};
use async_trait::async_trait;
use datafusion::functions_aggregate::expr_fn::{avg, stddev_pop};
use datafusion::prelude::*;
use datafusion::scalar::ScalarValue;
use serde::Deserialize;
use tracing::{debug, instrument};

const SUPPORTED: &[ConstraintKind] = &[
    ConstraintKind::LessThan,
    ConstraintKind::GreaterThan,
    ConstraintKind::Equal,
    ConstraintKind::NotEqual,
    ConstraintKind::Between,
    ConstraintKind::In,
    ConstraintKind::NotIn,
    ConstraintKind::IsNull,
    ConstraintKind::IsNotNull,
    ConstraintKind::WithinTolerance,
];

/// Largest supported `decimal_places`.
const MAX_DECIMAL_PLACES: u32 = 15;

/// Registers `NUMERIC`, `INTEGER` and `FLOAT`.
pub fn register(registry: &mut RuleRegistry) {
    for kind in [NumericKind::Numeric, NumericKind::Integer, NumericKind::Float] {
        registry.register(
            kind.type_id(),
            RuleDescriptor::new(kind.description(), SUPPORTED, move |config, _| {
                Ok(Box::new(NumericRule::new(config, kind)?) as Box<dyn Rule>)
            }),
        );
    }
}

/// Which numeric specialization a rule is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericKind {
    Numeric,
    Integer,
    Float,
}

impl NumericKind {
    pub fn type_id(&self) -> &'static str {
        match self {
            NumericKind::Numeric => "NUMERIC",
            NumericKind::Integer => "INTEGER",
            NumericKind::Float => "FLOAT",
        }
    }

    fn description(&self) -> &'static str {
        match self {
            NumericKind::Numeric => "Constraints, ranges and outlier statistics on numeric columns",
            NumericKind::Integer => "Numeric checks plus an integer-ness check",
            NumericKind::Float => "Numeric checks plus infinity, NaN and decimal precision checks",
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RangeParams {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatisticsParams {
    /// Maximum allowed `|x - mean| / stddev`.
    pub z_score_threshold: Option<f64>,
    /// `k` in `[q1 - k * iqr, q3 + k * iqr]`.
    pub iqr_multiplier: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NumericParams {
    #[serde(default)]
    pub range: Option<RangeParams>,
    #[serde(default)]
    pub statistics: Option<StatisticsParams>,
    #[serde(default)]
    pub strict_integer: bool,
    #[serde(default)]
    pub check_infinity: bool,
    #[serde(default)]
    pub check_nan: bool,
    #[serde(default)]
    pub decimal_places: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct NumericRule {
    base: RuleBase,
    kind: NumericKind,
    params: NumericParams,
}

impl NumericRule {
    pub fn new(config: &RuleConfig, kind: NumericKind) -> Result<Self> {
        let base = RuleBase::new(config, kind.type_id(), SUPPORTED)?;
        let params: NumericParams = config.params()?;
        let invalid = |message: &str| TermError::invalid_config(base.name(), message);

        if let Some(RangeParams {
            min: Some(min),
            max: Some(max),
        }) = params.range
        {
            if min > max {
                return Err(invalid("range min is greater than max"));
            }
        }
        if let Some(stats) = &params.statistics {
            if stats.z_score_threshold.is_some_and(|t| t.is_nan() || t < 0.0) {
                return Err(invalid("z_score_threshold must not be negative"));
            }
            if stats.iqr_multiplier.is_some_and(|k| k.is_nan() || k < 0.0) {
                return Err(invalid("iqr_multiplier must not be negative"));
            }
        }
        if params.decimal_places.is_some_and(|p| p > MAX_DECIMAL_PLACES) {
            return Err(invalid("decimal_places must be at most 15"));
        }

        Ok(Self { base, kind, params })
    }

    fn range_check(&self, dataset: Dataset, column: &Expr, range: &RangeParams) -> Result<Dataset> {
        let check = match (range.min, range.max) {
            (Some(min), Some(max)) => Some((
                "RANGE",
                column.clone().gt_eq(lit(min)).and(column.clone().lt_eq(lit(max))),
            )),
            (Some(min), None) => Some(("MIN_RANGE", column.clone().gt_eq(lit(min)))),
            (None, Some(max)) => Some(("MAX_RANGE", column.clone().lt_eq(lit(max)))),
            (None, None) => None,
        };
        match check {
            Some((label, expr)) => self.base.add_validity(dataset, label, expr),
            None => Ok(dataset),
        }
    }

    async fn z_score_check(
        &self,
        dataset: Dataset,
        column: &Expr,
        threshold: f64,
    ) -> Result<Dataset> {
        let (mean, stddev) = mean_and_stddev(&dataset, column).await?;
        debug!(rule = %self.base.name(), ?mean, ?stddev, "Computed z-score statistics");

        let value = as_float(column);
        let expr = match (mean, stddev) {
            (Some(mean), Some(stddev)) if stddev > 0.0 => {
                abs((value - lit(mean)) / lit(stddev)).lt_eq(lit(threshold))
            }
            // Constant column: only the mean itself is within any threshold.
            (Some(mean), Some(_)) => abs(value - lit(mean)).lt_eq(lit(0.0)),
            _ => lit(ScalarValue::Boolean(None)),
        };
        self.base.add_validity(dataset, "Z_SCORE_OUTLIER", expr)
    }

    async fn iqr_check(&self, dataset: Dataset, column: &Expr, multiplier: f64) -> Result<Dataset> {
        let quartiles = quartiles(&dataset, column).await?;
        debug!(rule = %self.base.name(), ?quartiles, "Computed quartiles");

        let expr = match quartiles {
            Some((q1, q3)) => {
                let iqr = q3 - q1;
                let value = as_float(column);
                value
                    .clone()
                    .gt_eq(lit(q1 - multiplier * iqr))
                    .and(value.lt_eq(lit(q3 + multiplier * iqr)))
            }
            None => lit(ScalarValue::Boolean(None)),
        };
        self.base.add_validity(dataset, "IQR_OUTLIER", expr)
    }

    fn integer_checks(&self, dataset: Dataset, column: &Expr) -> Result<Dataset> {
        if !self.params.strict_integer {
            return Ok(dataset);
        }
        self.base
            .add_validity(dataset, "IS_INTEGER", is_whole(as_float(column)))
    }

    fn float_checks(&self, mut dataset: Dataset, column: &Expr) -> Result<Dataset> {
        let value = as_float(column);
        if self.params.check_infinity {
            let expr = abs(value.clone()).not_eq(lit(f64::INFINITY));
            dataset = self.base.add_validity(dataset, "NOT_INFINITY", expr)?;
        }
        if self.params.check_nan {
            let expr = !isnan(value.clone());
            dataset = self.base.add_validity(dataset, "NOT_NAN", expr)?;
        }
        if let Some(places) = self.params.decimal_places {
            let scale = 10f64.powi(places as i32);
            let expr = is_whole(value * lit(scale));
            dataset = self
                .base
                .add_validity(dataset, &format!("DECIMAL_PRECISION_{places}"), expr)?;
        }
        Ok(dataset)
    }
}

#[async_trait]
impl Rule for NumericRule {
    fn base(&self) -> &RuleBase {
        &self.base
    }

    #[instrument(skip_all, fields(rule = %self.base.name(), column = %self.base.on_column()))]
    async fn detect(&self, dataset: Dataset) -> Result<Dataset> {
        let on_column = self.base.on_column();
        let data_type = self
            .base
            .column_type(&dataset, "numeric", |t| t.is_numeric())?;
        let column = dataset.column(on_column)?;

        let mut dataset = self.base.apply_constraints(
            dataset,
            &column,
            on_column,
            &data_type,
            "",
            self.base.constraints(),
        )?;

        if let Some(range) = &self.params.range {
            dataset = self.range_check(dataset, &column, range)?;
        }
        if let Some(stats) = &self.params.statistics {
            if let Some(threshold) = stats.z_score_threshold {
                dataset = self.z_score_check(dataset, &column, threshold).await?;
            }
            if let Some(multiplier) = stats.iqr_multiplier {
                dataset = self.iqr_check(dataset, &column, multiplier).await?;
            }
        }

        match self.kind {
            NumericKind::Numeric => Ok(dataset),
            NumericKind::Integer => self.integer_checks(dataset, &column),
            NumericKind::Float => self.float_checks(dataset, &column),
        }
    }
}

fn as_float(column: &Expr) -> Expr {
    cast(column.clone(), DataType::Float64)
}

/// True when `value` is within 1e-6 of the nearest whole number.
fn is_whole(value: Expr) -> Expr {
    abs(value.clone() - floor(value + lit(0.5))).lt(lit(1e-6))
}

/// True for values that are neither NaN nor infinite.
fn is_finite(value: Expr) -> Expr {
    (!isnan(value.clone())).and(abs(value).lt(lit(f64::INFINITY)))
}

/// Population mean and standard deviation over the finite values.
async fn mean_and_stddev(
    dataset: &Dataset,
    column: &Expr,
) -> Result<(Option<f64>, Option<f64>)> {
    let value = as_float(column);
    let batches = dataset
        .frame()
        .clone()
        .filter(is_finite(value.clone()))?
        .aggregate(
            vec![],
            vec![
                avg(value.clone()).alias("mean"),
                stddev_pop(value).alias("stddev"),
            ],
        )?
        .collect()
        .await?;

    let Some(batch) = batches.iter().find(|b| b.num_rows() > 0) else {
        return Ok((None, None));
    };
    let read = |i: usize| {
        let array = batch.column(i).as_primitive::<Float64Type>();
        (!array.is_null(0)).then(|| array.value(0))
    };
    Ok((read(0), read(1)))
}

/// First and third quartile over the finite values, using linear
/// interpolation between closest ranks.
async fn quartiles(dataset: &Dataset, column: &Expr) -> Result<Option<(f64, f64)>> {
    let batches = dataset
        .frame()
        .clone()
        .select(vec![as_float(column).alias("value")])?
        .collect()
        .await?;

    let mut values = Vec::new();
    for batch in &batches {
        let array = batch.column(0).as_primitive::<Float64Type>();
        values.extend(array.iter().flatten().filter(|v| v.is_finite()));
    }
    if values.is_empty() {
        return Ok(None);
    }
    values.sort_by(f64::total_cmp);
    Ok(Some((quantile(&values, 0.25), quantile(&values, 0.75))))
}

fn quantile(sorted: &[f64], q: f64) -> f64 {
    let position = q * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    sorted[lower] + (sorted[upper] - sorted[lower]) * (position - lower as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::constraint::ConstraintSpec;
    use crate::test_helpers::{apply, bool_values, context_with_columns};
    use arrow::array::{ArrayRef, Float64Array, Int64Array, StringArray};
    use serde_json::json;
    use std::sync::Arc;

    fn ints(values: Vec<Option<i64>>) -> Dataset {
        context_with_columns(vec![("x", Arc::new(Int64Array::from(values)) as ArrayRef)])
    }

    fn floats(values: Vec<Option<f64>>) -> Dataset {
        context_with_columns(vec![(
            "x",
            Arc::new(Float64Array::from(values)) as ArrayRef,
        )])
    }

    #[tokio::test]
    async fn test_range_scenario() {
        let config = RuleConfig::new("NUMERIC", "x")
            .with_name("R")
            .with_param("range", json!({"min": 0, "max": 100}));
        let out = apply(ints(vec![Some(-5), Some(50), Some(150), None]), &config)
            .await
            .unwrap();

        assert_eq!(
            bool_values(&out, "__VALID_R_RANGE_x__").await,
            vec![Some(false), Some(true), Some(false), None]
        );
    }

    #[tokio::test]
    async fn test_single_sided_ranges() {
        let min_only = RuleConfig::new("NUMERIC", "x").with_param("range", json!({"min": 10}));
        let out = apply(ints(vec![Some(5), Some(10)]), &min_only).await.unwrap();
        assert_eq!(
            bool_values(&out, "__VALID_NUMERIC_MIN_RANGE_x__").await,
            vec![Some(false), Some(true)]
        );

        let max_only = RuleConfig::new("NUMERIC", "x").with_param("range", json!({"max": 7.5}));
        let out = apply(ints(vec![Some(5), Some(10)]), &max_only).await.unwrap();
        assert_eq!(
            bool_values(&out, "__VALID_NUMERIC_MAX_RANGE_x__").await,
            vec![Some(true), Some(false)]
        );
    }

    #[tokio::test]
    async fn test_constraints_are_indexed() {
        let config = RuleConfig::new("NUMERIC", "x")
            .with_name("N")
            .with_constraint(ConstraintSpec::new("GREATER_THAN", 0))
            .with_constraint(ConstraintSpec::new("BETWEEN", json!([1, 3])));
        let out = apply(ints(vec![Some(0), Some(2)]), &config).await.unwrap();

        assert_eq!(
            bool_values(&out, "__VALID_N_GREATER_THAN_0_x__").await,
            vec![Some(false), Some(true)]
        );
        assert_eq!(
            bool_values(&out, "__VALID_N_BETWEEN_1_x__").await,
            vec![Some(false), Some(true)]
        );
    }

    #[tokio::test]
    async fn test_z_score_outliers() {
        let config = RuleConfig::new("NUMERIC", "x")
            .with_name("Z")
            .with_param("statistics", json!({"z_score_threshold": 1.5}));
        let data = ints(vec![Some(10), Some(10), Some(10), Some(10), Some(100), None]);
        let out = apply(data, &config).await.unwrap();

        assert_eq!(
            bool_values(&out, "__VALID_Z_Z_SCORE_OUTLIER_x__").await,
            vec![Some(true), Some(true), Some(true), Some(true), Some(false), None]
        );
    }

    #[tokio::test]
    async fn test_z_score_constant_column() {
        let config = RuleConfig::new("NUMERIC", "x")
            .with_name("Z")
            .with_param("statistics", json!({"z_score_threshold": 3}));
        let out = apply(ints(vec![Some(4), Some(4)]), &config).await.unwrap();
        assert_eq!(
            bool_values(&out, "__VALID_Z_Z_SCORE_OUTLIER_x__").await,
            vec![Some(true), Some(true)]
        );
    }

    #[tokio::test]
    async fn test_z_score_ignores_non_finite_values() {
        let config = RuleConfig::new("FLOAT", "x")
            .with_name("Z")
            .with_param("statistics", json!({"z_score_threshold": 1.5}));
        // Finite values: mean 28, population stddev 36.
        let data = floats(vec![
            Some(10.0),
            Some(10.0),
            Some(10.0),
            Some(10.0),
            Some(100.0),
            Some(f64::NAN),
            Some(f64::INFINITY),
        ]);
        let out = apply(data, &config).await.unwrap();

        assert_eq!(
            bool_values(&out, "__VALID_Z_Z_SCORE_OUTLIER_x__").await,
            vec![
                Some(true),
                Some(true),
                Some(true),
                Some(true),
                Some(false),
                Some(false),
                Some(false)
            ]
        );
    }

    #[tokio::test]
    async fn test_iqr_outliers() {
        let config = RuleConfig::new("NUMERIC", "x")
            .with_name("Q")
            .with_param("statistics", json!({"iqr_multiplier": 1.5}));
        let data = ints(vec![Some(1), Some(2), Some(3), Some(4), Some(100)]);
        let out = apply(data, &config).await.unwrap();

        assert_eq!(
            bool_values(&out, "__VALID_Q_IQR_OUTLIER_x__").await,
            vec![Some(true), Some(true), Some(true), Some(true), Some(false)]
        );
    }

    #[test]
    fn test_quantile_interpolates() {
        let values = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(quantile(&values, 0.25), 1.75);
        assert_eq!(quantile(&values, 0.75), 3.25);
        assert_eq!(quantile(&[5.0], 0.25), 5.0);
    }

    #[tokio::test]
    async fn test_strict_integer() {
        let config = RuleConfig::new("INTEGER", "x")
            .with_name("I")
            .with_param("strict_integer", true);
        let out = apply(floats(vec![Some(3.0), Some(3.5), None]), &config)
            .await
            .unwrap();
        assert_eq!(
            bool_values(&out, "__VALID_I_IS_INTEGER_x__").await,
            vec![Some(true), Some(false), None]
        );
    }

    #[tokio::test]
    async fn test_float_checks() {
        let config = RuleConfig::new("FLOAT", "x")
            .with_name("F")
            .with_param("check_infinity", true)
            .with_param("check_nan", true)
            .with_param("decimal_places", 2);
        let data = floats(vec![
            Some(1.23),
            Some(1.234),
            Some(f64::INFINITY),
            Some(f64::NAN),
            None,
        ]);
        let out = apply(data, &config).await.unwrap();

        assert_eq!(
            bool_values(&out, "__VALID_F_NOT_INFINITY_x__").await,
            vec![Some(true), Some(true), Some(false), Some(true), None]
        );
        assert_eq!(
            bool_values(&out, "__VALID_F_NOT_NAN_x__").await,
            vec![Some(true), Some(true), Some(true), Some(false), None]
        );
        let precision = bool_values(&out, "__VALID_F_DECIMAL_PRECISION_2_x__").await;
        assert_eq!(&precision[..2], &[Some(true), Some(false)]);
        assert_eq!(precision[4], None);
    }

    #[tokio::test]
    async fn test_numeric_rule_rejects_text_column() {
        let data = context_with_columns(vec![(
            "x",
            Arc::new(StringArray::from(vec!["a"])) as ArrayRef,
        )]);
        let config = RuleConfig::new("NUMERIC", "x").with_param("range", json!({"min": 0}));
        let err = apply(data, &config).await.unwrap_err();
        assert!(matches!(err, TermError::TypeMismatch { .. }));
    }

    #[test]
    fn test_invalid_params() {
        let reversed =
            RuleConfig::new("NUMERIC", "x").with_param("range", json!({"min": 5, "max": 1}));
        assert!(NumericRule::new(&reversed, NumericKind::Numeric).is_err());

        let negative = RuleConfig::new("NUMERIC", "x")
            .with_param("statistics", json!({"iqr_multiplier": -1}));
        assert!(NumericRule::new(&negative, NumericKind::Numeric).is_err());

        let unsupported =
            RuleConfig::new("NUMERIC", "x").with_constraint(ConstraintSpec::new("CONTAINS", "1"));
        assert!(matches!(
            NumericRule::new(&unsupported, NumericKind::Numeric),
            Err(TermError::UnsupportedConstraint { .. })
        ));
    }
}
