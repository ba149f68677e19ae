//! Aggregating validity columns into reports.
//!
//! The [`Reporter`] relies on nothing but the validity column naming scheme:
//! every column starting with `__VALID_` is one check. A row counts as valid
//! for a check only when its value is `true`; `false` and null are both
//! invalid, and nulls are additionally counted on their own.
//!
//! # Examples
//!
//! ```rust,no_run
//! use term_detect::report::{HumanFormatter, ReportFormatter, Reporter};
//! # use term_detect::core::DetectionOutcome;
//! # async fn example(outcome: DetectionOutcome) -> term_detect::error::Result<()> {
//! let report = Reporter::from_outcome(&outcome).generate().await?;
//! println!("{}", HumanFormatter::new().format(&report)?);
//! # Ok(())
//! # }
//! ```

use crate::core::naming::{is_validity_column, validity_check_id, ROW_HASH_COLUMN};
use crate::core::{Dataset, DetectionOutcome, SkippedRule};
use crate::error::{Result, TermError};
use arrow::array::{Array, AsArray};
use arrow::compute::cast;
use arrow::datatypes::DataType;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::Write;
use std::path::Path;
use tracing::{info, instrument};

const RULE: &str =
    "================================================================================";
const SEPARATOR: &str =
    "--------------------------------------------------------------------------------";

/// Outcome of one check across all rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckSummary {
    /// Full validity column name.
    pub column: String,
    /// `{rule}_{label}_{on_column}` part of the column name.
    pub check: String,
    pub valid: usize,
    /// Rows that are false or null.
    pub invalid: usize,
    /// Rows that are null.
    pub null: usize,
    /// Zero-based positions of the invalid rows.
    pub invalid_rows: Vec<usize>,
    /// Row identities of the invalid rows, when the dataset carries them.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub invalid_row_ids: Vec<String>,
}

impl CheckSummary {
    fn new(column: &str) -> Self {
        Self {
            column: column.to_string(),
            check: validity_check_id(column).unwrap_or(column).to_string(),
            valid: 0,
            invalid: 0,
            null: 0,
            invalid_rows: Vec::new(),
            invalid_row_ids: Vec::new(),
        }
    }

    pub fn total(&self) -> usize {
        self.valid + self.invalid
    }

    pub fn valid_percentage(&self) -> f64 {
        percentage(self.valid, self.total())
    }

    pub fn invalid_percentage(&self) -> f64 {
        percentage(self.invalid, self.total())
    }
}

fn percentage(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

/// Aggregated results of a detection run.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub generated_at: DateTime<Utc>,
    pub total_rows: usize,
    pub checks: Vec<CheckSummary>,
    /// Rules that contributed no columns.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<SkippedRule>,
}

impl ValidationReport {
    /// True when every row passes every check.
    pub fn is_clean(&self) -> bool {
        self.checks.iter().all(|check| check.invalid == 0)
    }

    /// Summary for the check whose column is `column`.
    pub fn check(&self, column: &str) -> Option<&CheckSummary> {
        self.checks.iter().find(|check| check.column == column)
    }
}

/// Builds a [`ValidationReport`] from a dataset.
#[derive(Debug, Clone)]
pub struct Reporter {
    dataset: Dataset,
    skipped: Vec<SkippedRule>,
}

impl Reporter {
    pub fn new(dataset: Dataset) -> Self {
        Self {
            dataset,
            skipped: Vec::new(),
        }
    }

    /// Reports on the outcome's dataset and lists its skipped rules.
    pub fn from_outcome(outcome: &DetectionOutcome) -> Self {
        Self {
            dataset: outcome.dataset.clone(),
            skipped: outcome.skipped.clone(),
        }
    }

    /// Validity columns in dataset order.
    pub fn validity_columns(&self) -> Vec<String> {
        self.dataset
            .column_names()
            .into_iter()
            .filter(|name| is_validity_column(name))
            .collect()
    }

    /// Collects the validity columns and aggregates them.
    #[instrument(skip(self))]
    pub async fn generate(&self) -> Result<ValidationReport> {
        let columns = self.validity_columns();
        let generated_at = Utc::now();

        if columns.is_empty() {
            return Ok(ValidationReport {
                generated_at,
                total_rows: self.dataset.count().await?,
                checks: Vec::new(),
                skipped: self.skipped.clone(),
            });
        }

        let with_ids = self.dataset.has_column(ROW_HASH_COLUMN);
        let mut names: Vec<&str> = columns.iter().map(String::as_str).collect();
        if with_ids {
            names.push(ROW_HASH_COLUMN);
        }
        let batches = self.dataset.collect_columns(&names).await?;

        let mut checks: Vec<CheckSummary> = columns.iter().map(|c| CheckSummary::new(c)).collect();
        let mut offset = 0;
        for batch in &batches {
            let ids = if with_ids {
                Some(cast(batch.column(columns.len()), &DataType::Utf8)?)
            } else {
                None
            };
            let ids = ids.as_ref().map(|ids| ids.as_string::<i32>());

            for (summary, column) in checks.iter_mut().zip(batch.columns()) {
                let values = cast(column, &DataType::Boolean)?;
                let values = values.as_boolean();
                for (row, value) in values.iter().enumerate() {
                    match value {
                        Some(true) => {
                            summary.valid += 1;
                            continue;
                        }
                        Some(false) => summary.invalid += 1,
                        None => {
                            summary.invalid += 1;
                            summary.null += 1;
                        }
                    }
                    summary.invalid_rows.push(offset + row);
                    if let Some(ids) = ids.filter(|ids| !ids.is_null(row)) {
                        summary.invalid_row_ids.push(ids.value(row).to_string());
                    }
                }
            }
            offset += batch.num_rows();
        }

        info!(checks = checks.len(), rows = offset, "Report generated");
        Ok(ValidationReport {
            generated_at,
            total_rows: offset,
            checks,
            skipped: self.skipped.clone(),
        })
    }
}

/// Renders a [`ValidationReport`].
pub trait ReportFormatter {
    fn format(&self, report: &ValidationReport) -> Result<String>;
}

/// Plain text layout for terminals and report files.
#[derive(Debug, Clone)]
pub struct HumanFormatter {
    include_timestamp: bool,
    max_indexes: Option<usize>,
}

impl Default for HumanFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl HumanFormatter {
    pub fn new() -> Self {
        Self {
            include_timestamp: true,
            max_indexes: None,
        }
    }

    pub fn with_timestamp(mut self, include: bool) -> Self {
        self.include_timestamp = include;
        self
    }

    /// Lists at most `max` invalid row indexes per check.
    pub fn with_max_indexes(mut self, max: usize) -> Self {
        self.max_indexes = Some(max);
        self
    }

    fn render(&self, report: &ValidationReport, out: &mut String) -> std::fmt::Result {
        writeln!(out, "{RULE}")?;
        writeln!(out, "DATA VALIDATION REPORT")?;
        writeln!(out, "{RULE}")?;
        if self.include_timestamp {
            writeln!(out, "Generated: {}", report.generated_at.to_rfc3339())?;
        }
        writeln!(out)?;
        writeln!(out, "Total rows: {}", report.total_rows)?;
        writeln!(out)?;

        if report.checks.is_empty() {
            writeln!(out, "No validation results found.")?;
            writeln!(out)?;
        }

        for check in &report.checks {
            writeln!(out, "{}", check.check)?;
            writeln!(out, "{SEPARATOR}")?;
            writeln!(
                out,
                "Valid rows: {} ({:.2}%)",
                check.valid,
                check.valid_percentage()
            )?;
            writeln!(
                out,
                "Invalid rows: {} ({:.2}%)",
                check.invalid,
                check.invalid_percentage()
            )?;
            if check.null > 0 {
                writeln!(out, "Null rows: {}", check.null)?;
            }

            let shown = match self.max_indexes {
                Some(max) => &check.invalid_rows[..max.min(check.invalid_rows.len())],
                None => check.invalid_rows.as_slice(),
            };
            write!(out, "Invalid rows indexes: {shown:?}")?;
            if shown.len() < check.invalid_rows.len() {
                write!(out, " ... and {} more", check.invalid_rows.len() - shown.len())?;
            }
            writeln!(out)?;
            writeln!(out)?;
        }

        if !report.skipped.is_empty() {
            writeln!(out, "Skipped rules")?;
            writeln!(out, "{SEPARATOR}")?;
            for rule in &report.skipped {
                writeln!(
                    out,
                    "{} on {}: [{}] {}",
                    rule.name,
                    rule.on_column.as_deref().unwrap_or("<none>"),
                    rule.kind,
                    rule.reason
                )?;
            }
            writeln!(out)?;
        }

        writeln!(out, "{RULE}")?;
        writeln!(out, "END OF REPORT")?;
        writeln!(out, "{RULE}")
    }
}

impl ReportFormatter for HumanFormatter {
    fn format(&self, report: &ValidationReport) -> Result<String> {
        let mut out = String::new();
        self.render(report, &mut out)
            .map_err(|e| TermError::Internal(format!("Failed to render report: {e}")))?;
        Ok(out)
    }
}

/// Serializes the report as JSON.
#[derive(Debug, Clone)]
pub struct JsonFormatter {
    pretty: bool,
}

impl Default for JsonFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonFormatter {
    pub fn new() -> Self {
        Self { pretty: true }
    }

    pub fn with_pretty(mut self, pretty: bool) -> Self {
        self.pretty = pretty;
        self
    }
}

impl ReportFormatter for JsonFormatter {
    fn format(&self, report: &ValidationReport) -> Result<String> {
        let json = if self.pretty {
            serde_json::to_string_pretty(report)
        } else {
            serde_json::to_string(report)
        };
        json.map_err(|e| TermError::Serialization(format!("Failed to serialize report: {e}")))
    }
}

/// Formats `report` and writes it to `path`, creating parent directories.
pub fn write_report(
    report: &ValidationReport,
    path: impl AsRef<Path>,
    formatter: &dyn ReportFormatter,
) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, formatter.format(report)?)?;
    info!(path = %path.display(), "Report written");
    Ok(())
}
