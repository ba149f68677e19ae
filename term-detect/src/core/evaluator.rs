//! Translation of typed constraints into DataFusion boolean expressions.

use super::constraint::{Constraint, Literal};
use crate::error::{Result, TermError};
use arrow::datatypes::DataType;
use datafusion::prelude::*;

/// Pure mapping from `(column, constraint)` to a boolean expression.
///
/// Nulls in the tested column propagate to null in the result for every kind
/// except `IS_NULL` and `IS_NOT_NULL`. Callers must treat null as "not valid"
/// rather than as an error.
pub struct ConstraintEvaluator;

impl ConstraintEvaluator {
    /// Builds the boolean expression for `constraint` applied to `column`.
    ///
    /// `column_name` and `data_type` describe the tested column and are used
    /// to reject text predicates on non-text columns and numeric tolerance
    /// checks on non-numeric columns.
    pub fn evaluate(
        column: Expr,
        column_name: &str,
        data_type: &DataType,
        constraint: &Constraint,
    ) -> Result<Expr> {
        if constraint.kind().requires_text() && !is_text(data_type) {
            return Err(TermError::type_mismatch(column_name, "text", data_type));
        }

        let expr = match constraint {
            Constraint::LessThan(v) => column.lt(v.to_expr()),
            Constraint::GreaterThan(v) => column.gt(v.to_expr()),
            Constraint::Equal(v) => column.eq(v.to_expr()),
            Constraint::NotEqual(v) => column.not_eq(v.to_expr()),
            Constraint::Between { min, max } => column
                .clone()
                .gt_eq(min.to_expr())
                .and(column.lt_eq(max.to_expr())),
            Constraint::In(values) => Self::membership(column, values),
            Constraint::NotIn(values) => !Self::membership(column, values),
            Constraint::IsNull => column.is_null(),
            Constraint::IsNotNull => column.is_not_null(),
            Constraint::Contains(needle) => strpos(column, lit(needle.as_str())).gt(lit(0i64)),
            Constraint::StartsWith(prefix) => starts_with(column, lit(prefix.as_str())),
            Constraint::EndsWith(suffix) => ends_with(column, lit(suffix.as_str())),
            Constraint::RegexMatch(pattern) => full_match(column, pattern),
            Constraint::WithinTolerance {
                expected,
                tolerance,
            } => {
                if !data_type.is_numeric() {
                    return Err(TermError::type_mismatch(column_name, "numeric", data_type));
                }
                within_tolerance(column, *expected, *tolerance)
            }
        };
        Ok(expr)
    }

    fn membership(column: Expr, values: &[Literal]) -> Expr {
        in_list(column, values.iter().map(Literal::to_expr).collect(), false)
    }
}

/// Returns true for the Arrow string types.
pub fn is_text(data_type: &DataType) -> bool {
    matches!(
        data_type,
        DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View
    )
}

/// `column` matches `pattern` in full.
pub fn full_match(column: Expr, pattern: &str) -> Expr {
    regexp_like(column, lit(format!("^(?:{pattern})$")), None)
}

/// `abs(column - expected) <= tolerance`, evaluated in double precision.
pub fn within_tolerance(column: Expr, expected: f64, tolerance: f64) -> Expr {
    abs(cast(column, DataType::Float64) - lit(expected)).lt_eq(lit(tolerance))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{bool_values, context_with_columns};
    use arrow::array::{ArrayRef, Float64Array, Int64Array, StringArray};
    use std::sync::Arc;

    async fn evaluate_on(array: ArrayRef, constraint: Constraint) -> Result<Vec<Option<bool>>> {
        let data_type = array.data_type().clone();
        let dataset = context_with_columns(vec![("v", array)]);
        let expr = ConstraintEvaluator::evaluate(ident("v"), "v", &data_type, &constraint)?;
        let dataset = dataset.with_column("out", expr)?;
        Ok(bool_values(&dataset, "out").await)
    }

    fn ints(values: Vec<Option<i64>>) -> ArrayRef {
        Arc::new(Int64Array::from(values))
    }

    fn texts(values: Vec<Option<&str>>) -> ArrayRef {
        Arc::new(StringArray::from(values))
    }

    #[tokio::test]
    async fn test_comparisons_propagate_nulls() {
        let out = evaluate_on(
            ints(vec![Some(1), Some(5), None]),
            Constraint::LessThan(Literal::Int(3)),
        )
        .await
        .unwrap();
        assert_eq!(out, vec![Some(true), Some(false), None]);

        let out = evaluate_on(
            ints(vec![Some(1), Some(5), None]),
            Constraint::NotEqual(Literal::Int(5)),
        )
        .await
        .unwrap();
        assert_eq!(out, vec![Some(true), Some(false), None]);
    }

    #[tokio::test]
    async fn test_between_is_inclusive() {
        let out = evaluate_on(
            ints(vec![Some(0), Some(10), Some(11), Some(-1), None]),
            Constraint::Between {
                min: Literal::Int(0),
                max: Literal::Int(10),
            },
        )
        .await
        .unwrap();
        assert_eq!(
            out,
            vec![Some(true), Some(true), Some(false), Some(false), None]
        );
    }

    #[tokio::test]
    async fn test_not_in_negates_in() {
        let values = vec![Literal::Text("a".into()), Literal::Text("b".into())];
        let input = texts(vec![Some("a"), Some("c"), None]);

        let is_in = evaluate_on(input.clone(), Constraint::In(values.clone()))
            .await
            .unwrap();
        let not_in = evaluate_on(input, Constraint::NotIn(values)).await.unwrap();

        assert_eq!(is_in, vec![Some(true), Some(false), None]);
        assert_eq!(not_in, vec![Some(false), Some(true), None]);
    }

    #[tokio::test]
    async fn test_null_checks_never_null() {
        let input = ints(vec![Some(1), None]);
        let out = evaluate_on(input.clone(), Constraint::IsNull).await.unwrap();
        assert_eq!(out, vec![Some(false), Some(true)]);
        let out = evaluate_on(input, Constraint::IsNotNull).await.unwrap();
        assert_eq!(out, vec![Some(true), Some(false)]);
    }

    #[tokio::test]
    async fn test_substring_predicates() {
        let input = texts(vec![Some("image.png"), Some("notes.txt"), None]);

        let out = evaluate_on(input.clone(), Constraint::Contains("age".into()))
            .await
            .unwrap();
        assert_eq!(out, vec![Some(true), Some(false), None]);

        let out = evaluate_on(input.clone(), Constraint::StartsWith("notes".into()))
            .await
            .unwrap();
        assert_eq!(out, vec![Some(false), Some(true), None]);

        let out = evaluate_on(input, Constraint::EndsWith(".png".into()))
            .await
            .unwrap();
        assert_eq!(out, vec![Some(true), Some(false), None]);
    }

    #[tokio::test]
    async fn test_regex_is_full_match() {
        let input = texts(vec![Some("abc"), Some("abc123"), None]);
        let out = evaluate_on(input, Constraint::RegexMatch("[a-z]+".into()))
            .await
            .unwrap();
        assert_eq!(out, vec![Some(true), Some(false), None]);
    }

    #[tokio::test]
    async fn test_within_tolerance() {
        let input: ArrayRef = Arc::new(Float64Array::from(vec![Some(1.0), Some(1.25), None]));
        let out = evaluate_on(
            input,
            Constraint::WithinTolerance {
                expected: 1.0,
                tolerance: 0.1,
            },
        )
        .await
        .unwrap();
        assert_eq!(out, vec![Some(true), Some(false), None]);
    }

    #[tokio::test]
    async fn test_text_predicate_on_numeric_column() {
        let err = evaluate_on(ints(vec![Some(1)]), Constraint::Contains("1".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, TermError::TypeMismatch { .. }));
    }

    #[tokio::test]
    async fn test_tolerance_on_text_column() {
        let err = evaluate_on(
            texts(vec![Some("1")]),
            Constraint::WithinTolerance {
                expected: 1.0,
                tolerance: 0.0,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, TermError::TypeMismatch { .. }));
    }
}
