//! The dataset handle that flows through a detection run.

use super::naming::ROW_HASH_COLUMN;
use crate::error::{ErrorContext, Result, TermError};
use crate::extract::ColumnExtractor;
use arrow::array::{ArrayRef, StringBuilder};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use arrow::row::{RowConverter, SortField};
use datafusion::execution::session_state::SessionStateBuilder;
use datafusion::prelude::*;
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, instrument};

/// A lazily evaluated, immutable-per-step columnar table.
///
/// `Dataset` wraps a DataFusion [`DataFrame`] together with the
/// [`SessionContext`] that owns it. Every transformation consumes the value
/// and returns a new one. Column names stay unique: adding a column under an
/// existing name fails with [`TermError::DuplicateColumn`] instead of
/// replacing it.
///
/// Rows always come back in input order. Collecting runs the plan in a
/// single partition with repartitioning disabled, so row positions in
/// materialized columns and reports match the source rows.
#[derive(Clone)]
pub struct Dataset {
    ctx: SessionContext,
    frame: DataFrame,
}

impl fmt::Debug for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dataset")
            .field("columns", &self.column_names())
            .finish()
    }
}

impl Dataset {
    /// Wraps a data frame created from `ctx`.
    pub fn new(ctx: SessionContext, frame: DataFrame) -> Self {
        Self { ctx, frame }
    }

    /// Builds a dataset from in-memory record batches.
    pub fn from_batches(
        ctx: &SessionContext,
        schema: SchemaRef,
        batches: Vec<RecordBatch>,
    ) -> Result<Self> {
        let batches = if batches.is_empty() {
            vec![RecordBatch::new_empty(schema)]
        } else {
            batches
        };
        let frame = ctx.read_batches(batches)?;
        Ok(Self::new(ctx.clone(), frame))
    }

    /// Builds a dataset from a single record batch.
    pub fn from_batch(ctx: &SessionContext, batch: RecordBatch) -> Result<Self> {
        let frame = ctx.read_batch(batch)?;
        Ok(Self::new(ctx.clone(), frame))
    }

    /// The underlying data frame.
    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    /// Consumes the dataset, returning the underlying data frame.
    pub fn into_frame(self) -> DataFrame {
        self.frame
    }

    /// The session context the dataset belongs to.
    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    /// Column names in schema order.
    pub fn column_names(&self) -> Vec<String> {
        self.frame
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect()
    }

    /// Returns true if a column with exactly this name exists.
    pub fn has_column(&self, name: &str) -> bool {
        self.frame
            .schema()
            .fields()
            .iter()
            .any(|f| f.name() == name)
    }

    /// Expression referencing an existing column.
    pub fn column(&self, name: &str) -> Result<Expr> {
        if self.has_column(name) {
            Ok(ident(name))
        } else {
            Err(TermError::missing_column(name))
        }
    }

    /// Data type of an existing column.
    pub fn data_type(&self, name: &str) -> Result<DataType> {
        self.frame
            .schema()
            .fields()
            .iter()
            .find(|f| f.name() == name)
            .map(|f| f.data_type().clone())
            .ok_or_else(|| TermError::missing_column(name))
    }

    /// Adds a new column computed from `expr`.
    pub fn with_column(self, name: &str, expr: Expr) -> Result<Self> {
        if self.has_column(name) {
            return Err(TermError::DuplicateColumn {
                column: name.to_string(),
            });
        }
        let frame = self.frame.with_column(name, expr)?;
        Ok(Self {
            ctx: self.ctx,
            frame,
        })
    }

    /// Adds a cheap derived column unless one with this name already exists.
    ///
    /// `build` is only invoked when the column is missing.
    pub fn ensure_expr<F>(self, name: &str, build: F) -> Result<Self>
    where
        F: FnOnce(&Self) -> Result<Expr>,
    {
        if self.has_column(name) {
            debug!(column = %name, "Reusing derived column");
            return Ok(self);
        }
        let expr = build(&self)?;
        self.with_column(name, expr)
    }

    /// Adds an expensive derived column unless it already exists.
    ///
    /// The dataset is collected once, `extractor` computes the new column
    /// from `source` batch by batch, and the result is re-wrapped as an
    /// in-memory dataset. Later collects therefore never repeat the
    /// extraction.
    #[instrument(skip_all, fields(column = %name, source = %source))]
    pub async fn ensure_materialized(
        self,
        name: &str,
        source: &str,
        extractor: &dyn ColumnExtractor,
    ) -> Result<Self> {
        if self.has_column(name) {
            debug!(column = %name, "Reusing derived column");
            return Ok(self);
        }
        if !self.has_column(source) {
            return Err(TermError::missing_column(source));
        }

        let output = extractor.output_type();
        self.append_columns(name, output, |batch| async move {
            let input = batch
                .column_by_name(source)
                .cloned()
                .ok_or_else(|| TermError::missing_column(source))?;
            extractor.extract(input).await
        })
        .await
    }

    /// Attaches the row identity column.
    ///
    /// The identity is the hex encoded prefix of a SHA-256 digest over the
    /// row's values in Arrow row format, so identical rows always share the
    /// same identity.
    #[instrument(skip(self))]
    pub async fn with_row_identity(self) -> Result<Self> {
        if self.has_column(ROW_HASH_COLUMN) {
            return Err(TermError::DuplicateColumn {
                column: ROW_HASH_COLUMN.to_string(),
            });
        }
        self.append_columns(ROW_HASH_COLUMN, DataType::Utf8, |batch| async move {
            hash_rows(&batch)
        })
        .await
        .context("Failed to attach row identity")
    }

    /// Builds the physical plan without executing it.
    ///
    /// Surfaces type coercion and planning errors at the point the dataset
    /// was last transformed.
    pub async fn validate(&self) -> Result<()> {
        self.frame.clone().create_physical_plan().await?;
        Ok(())
    }

    /// Executes the plan and returns all record batches in row order.
    pub async fn collect(&self) -> Result<Vec<RecordBatch>> {
        Ok(self.ordered_frame().collect().await?)
    }

    /// Collects only `columns`, in row order.
    pub async fn collect_columns(&self, columns: &[&str]) -> Result<Vec<RecordBatch>> {
        for column in columns {
            if !self.has_column(column) {
                return Err(TermError::missing_column(*column));
            }
        }
        Ok(self
            .ordered_frame()
            .select_columns(columns)?
            .collect()
            .await?)
    }

    /// Number of rows in the dataset.
    pub async fn count(&self) -> Result<usize> {
        Ok(self.frame.clone().count().await?)
    }

    /// The frame re-planned to run in one partition without round-robin
    /// repartitioning.
    fn ordered_frame(&self) -> DataFrame {
        let (state, plan) = self.frame.clone().into_parts();
        let config = state
            .config()
            .clone()
            .with_target_partitions(1)
            .with_round_robin_repartition(false)
            .with_repartition_file_scans(false);
        let state = SessionStateBuilder::new_from_existing(state)
            .with_config(config)
            .build();
        DataFrame::new(state, plan)
    }

    async fn append_columns<F, Fut>(
        self,
        name: &str,
        data_type: DataType,
        compute: F,
    ) -> Result<Self>
    where
        F: Fn(RecordBatch) -> Fut,
        Fut: std::future::Future<Output = Result<ArrayRef>>,
    {
        let base_schema = Arc::new(self.frame.schema().as_arrow().clone());
        let batches = self.collect().await?;

        let schema = match batches.first() {
            Some(first) => first.schema(),
            None => base_schema,
        };
        let mut fields: Vec<Arc<Field>> = schema.fields().iter().cloned().collect();
        fields.push(Arc::new(Field::new(name, data_type.clone(), true)));
        let extended = Arc::new(Schema::new_with_metadata(
            fields,
            schema.metadata().clone(),
        ));

        let mut out = Vec::with_capacity(batches.len());
        for batch in batches {
            let rows = batch.num_rows();
            let column = compute(batch.clone()).await?;
            if column.len() != rows || column.data_type() != &data_type {
                return Err(TermError::Internal(format!(
                    "derived column '{name}' produced {} values of type {} \
                     for {rows} rows of {data_type}",
                    column.len(),
                    column.data_type()
                )));
            }
            let mut columns = batch.columns().to_vec();
            columns.push(column);
            out.push(RecordBatch::try_new(extended.clone(), columns)?);
        }

        debug!(column = %name, batches = out.len(), "Materialized derived column");
        Self::from_batches(&self.ctx, extended, out)
    }
}

fn hash_rows(batch: &RecordBatch) -> Result<ArrayRef> {
    let mut builder = StringBuilder::with_capacity(batch.num_rows(), batch.num_rows() * 32);
    if batch.num_columns() == 0 {
        for _ in 0..batch.num_rows() {
            builder.append_value(hex::encode(&Sha256::digest(b"")[..16]));
        }
        return Ok(Arc::new(builder.finish()));
    }

    let converter = RowConverter::new(
        batch
            .schema()
            .fields()
            .iter()
            .map(|f| SortField::new(f.data_type().clone()))
            .collect(),
    )?;
    let rows = converter.convert_columns(batch.columns())?;
    for row in rows.iter() {
        let digest = Sha256::digest(row.as_ref());
        builder.append_value(hex::encode(&digest[..16]));
    }
    Ok(Arc::new(builder.finish()))
}
