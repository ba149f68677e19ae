//! # term-detect - Row-level data and media validation
//!
//! term-detect applies a declarative list of validation rules to a tabular
//! dataset and records, for every row and every check, whether the row is
//! valid. Rules cover numeric columns, text and categories, images
//! referenced by URL or path, and audio files. Results are plain boolean
//! columns added to a DataFusion data frame, so any downstream tool can
//! consume them.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use term_detect::prelude::*;
//! use term_detect::report::{HumanFormatter, ReportFormatter, Reporter};
//! use term_detect::sources::{load_csv, CsvOptions};
//! use datafusion::prelude::SessionContext;
//!
//! # async fn example() -> Result<()> {
//! let ctx = SessionContext::new();
//! let dataset = load_csv(&ctx, "data/products.csv", CsvOptions::default()).await?;
//! let config = DetectionConfig::from_path("rules.yaml")?;
//!
//! let outcome = Detector::new().detect_issues(dataset, &config.rules).await?;
//! let report = Reporter::from_outcome(&outcome).generate().await?;
//! println!("{}", HumanFormatter::new().format(&report)?);
//! # Ok(())
//! # }
//! ```
//!
//! ## Columns
//!
//! | Column | Meaning |
//! |--------|---------|
//! | `__ROW_HASH__` | Stable identity of the row's original values |
//! | `__{col}_{FEATURE}__` | A feature derived from `col`, shared by every rule that needs it |
//! | `__VALID_{rule}_{label}_{col}__` | Outcome of one check: true, false or null |
//!
//! A null validity value means the check could not be evaluated for that row,
//! for example because the image behind it failed to download. Reports count
//! it as invalid.
//!
//! ## Failure handling
//!
//! A rule that cannot be built or applied is skipped and listed in
//! [`DetectionOutcome::skipped`](core::DetectionOutcome); the remaining rules
//! still run. Per-row fetch and decode failures never surface as errors.

pub mod config;
pub mod core;
pub mod error;
pub mod extract;
pub mod logging;
pub mod prelude;
pub mod report;
pub mod rules;
pub mod sources;

#[cfg(test)]
pub(crate) mod test_helpers;
