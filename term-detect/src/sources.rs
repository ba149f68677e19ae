//! Loading datasets from files.

use crate::core::Dataset;
use crate::error::{ErrorContext, Result};
use datafusion::prelude::{CsvReadOptions, SessionContext};
use std::path::Path;
use tracing::{debug, instrument};

/// Options for reading CSV files.
#[derive(Debug, Clone, Copy)]
pub struct CsvOptions {
    pub has_header: bool,
    pub delimiter: u8,
    /// Rows read to infer the schema.
    pub schema_infer_max_records: usize,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            has_header: true,
            delimiter: b',',
            schema_infer_max_records: 1000,
        }
    }
}

impl CsvOptions {
    pub fn with_header(mut self, has_header: bool) -> Self {
        self.has_header = has_header;
        self
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }
}

/// Reads a CSV file into a dataset owned by `ctx`.
#[instrument(skip(ctx, options), fields(path = %path.as_ref().display()))]
pub async fn load_csv(
    ctx: &SessionContext,
    path: impl AsRef<Path>,
    options: CsvOptions,
) -> Result<Dataset> {
    let path = path.as_ref();
    let location = path.to_string_lossy();
    let read_options = CsvReadOptions::new()
        .has_header(options.has_header)
        .delimiter(options.delimiter)
        .schema_infer_max_records(options.schema_infer_max_records);

    let frame = ctx
        .read_csv(location.as_ref(), read_options)
        .await
        .with_context(|| format!("Failed to read CSV file '{location}'"))?;
    debug!(columns = frame.schema().fields().len(), "CSV loaded");
    Ok(Dataset::new(ctx.clone(), frame))
}
