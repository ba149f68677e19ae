//! Fixtures shared by the unit tests.

use crate::config::RuleConfig;
use crate::core::Dataset;
use crate::error::{Result, TermError};
use crate::extract::{Extractors, FaceDetector, ImageAnalyzer, MediaFetcher};
use crate::rules::RuleRegistry;
use arrow::array::{Array, ArrayRef, AsArray};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use datafusion::prelude::SessionContext;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A single-batch dataset in a fresh context.
pub fn context_with_columns(columns: Vec<(&str, ArrayRef)>) -> Dataset {
    let fields: Vec<Field> = columns
        .iter()
        .map(|(name, array)| Field::new(*name, array.data_type().clone(), true))
        .collect();
    let schema = Arc::new(Schema::new(fields));
    let arrays = columns.into_iter().map(|(_, array)| array).collect();
    let batch = RecordBatch::try_new(schema, arrays).unwrap();
    Dataset::from_batch(&SessionContext::new(), batch).unwrap()
}

async fn column_values(dataset: &Dataset, column: &str, data_type: &DataType) -> Vec<ArrayRef> {
    let batches = dataset.collect_columns(&[column]).await.unwrap();
    batches
        .iter()
        .map(|batch| cast(batch.column(0), data_type).unwrap())
        .collect()
}

pub async fn bool_values(dataset: &Dataset, column: &str) -> Vec<Option<bool>> {
    column_values(dataset, column, &DataType::Boolean)
        .await
        .iter()
        .flat_map(|array| array.as_boolean().iter().collect::<Vec<_>>())
        .collect()
}

pub async fn f64_values(dataset: &Dataset, column: &str) -> Vec<Option<f64>> {
    column_values(dataset, column, &DataType::Float64)
        .await
        .iter()
        .flat_map(|array| {
            array
                .as_primitive::<arrow::datatypes::Float64Type>()
                .iter()
                .collect::<Vec<_>>()
        })
        .collect()
}

pub async fn string_values(dataset: &Dataset, column: &str) -> Vec<Option<String>> {
    column_values(dataset, column, &DataType::Utf8)
        .await
        .iter()
        .flat_map(|array| {
            let array = array.as_string::<i32>();
            (0..array.len())
                .map(|i| (!array.is_null(i)).then(|| array.value(i).to_string()))
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Builds `config` from the built-in registry with default extractors and
/// applies it.
pub async fn apply(dataset: Dataset, config: &RuleConfig) -> Result<Dataset> {
    apply_with(dataset, config, &Extractors::default()).await
}

/// Like [`apply`], with the given extractors. The resulting plan is
/// validated so type errors surface here.
pub async fn apply_with(
    dataset: Dataset,
    config: &RuleConfig,
    extractors: &Extractors,
) -> Result<Dataset> {
    let rule = RuleRegistry::global().create(config, extractors)?;
    let dataset = rule.detect(dataset).await?;
    dataset.validate().await?;
    Ok(dataset)
}

/// Serves payloads from memory and counts fetch calls.
#[derive(Debug, Default)]
pub struct MapFetcher {
    payloads: HashMap<String, Vec<u8>>,
    calls: Arc<AtomicUsize>,
}

impl MapFetcher {
    pub fn new<'a>(entries: impl IntoIterator<Item = (&'a str, &'a [u8])>) -> Self {
        Self {
            payloads: entries
                .into_iter()
                .map(|(location, bytes)| (location.to_string(), bytes.to_vec()))
                .collect(),
            calls: Arc::default(),
        }
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl MediaFetcher for MapFetcher {
    async fn fetch(&self, location: &str) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.payloads
            .get(location)
            .cloned()
            .ok_or_else(|| TermError::fetch(location, "not found"))
    }
}

/// Reads `"{width}x{height}[@{sharpness}]"` payloads, ignoring anything after
/// the first space.
#[derive(Debug, Clone, Copy)]
pub struct TextImageAnalyzer;

impl TextImageAnalyzer {
    fn parse(payload: &[u8]) -> Option<((u32, u32), Option<f64>)> {
        let text = std::str::from_utf8(payload).ok()?;
        let head = text.split_whitespace().next()?;
        let (dims, sharpness) = match head.split_once('@') {
            Some((dims, score)) => (dims, Some(score.parse().ok()?)),
            None => (head, None),
        };
        let (width, height) = dims.split_once('x')?;
        Some(((width.parse().ok()?, height.parse().ok()?), sharpness))
    }
}

impl ImageAnalyzer for TextImageAnalyzer {
    fn dimensions(&self, payload: &[u8]) -> Option<(u32, u32)> {
        Self::parse(payload).map(|(dims, _)| dims)
    }

    fn sharpness(&self, payload: &[u8]) -> Option<f64> {
        Self::parse(payload).and_then(|(_, sharpness)| sharpness)
    }
}

/// Counts `:)` occurrences as faces.
#[derive(Debug, Clone, Copy)]
pub struct CountingFaces;

impl FaceDetector for CountingFaces {
    fn count_faces(&self, payload: &[u8]) -> Option<u32> {
        let text = std::str::from_utf8(payload).ok()?;
        Some(text.matches(":)").count() as u32)
    }
}
