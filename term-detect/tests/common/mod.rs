//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use arrow::array::{Array, ArrayRef, AsArray};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use datafusion::prelude::SessionContext;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use term_detect::core::Dataset;
use term_detect::error::{Result, TermError};
use term_detect::extract::MediaFetcher;

/// A single-batch dataset in a fresh context.
pub fn dataset(columns: Vec<(&str, ArrayRef)>) -> Dataset {
    let fields: Vec<Field> = columns
        .iter()
        .map(|(name, array)| Field::new(*name, array.data_type().clone(), true))
        .collect();
    let batch = RecordBatch::try_new(
        Arc::new(Schema::new(fields)),
        columns.into_iter().map(|(_, array)| array).collect(),
    )
    .unwrap();
    Dataset::from_batch(&SessionContext::new(), batch).unwrap()
}

/// Values of a boolean-or-null column, in row order.
pub async fn bool_column(dataset: &Dataset, column: &str) -> Vec<Option<bool>> {
    let batches = dataset.collect().await.unwrap();
    batches
        .iter()
        .flat_map(|batch| {
            let array = cast(batch.column_by_name(column).unwrap(), &DataType::Boolean).unwrap();
            array.as_boolean().iter().collect::<Vec<_>>()
        })
        .collect()
}

/// Null count of any column.
pub async fn null_count(dataset: &Dataset, column: &str) -> usize {
    dataset
        .collect()
        .await
        .unwrap()
        .iter()
        .map(|batch| batch.column_by_name(column).unwrap().null_count())
        .sum()
}

/// In-memory fetcher that counts calls per location.
#[derive(Debug, Default)]
pub struct CountingFetcher {
    payloads: HashMap<String, Vec<u8>>,
    calls: Arc<AtomicUsize>,
}

impl CountingFetcher {
    pub fn new<'a>(entries: impl IntoIterator<Item = (&'a str, Vec<u8>)>) -> Self {
        Self {
            payloads: entries
                .into_iter()
                .map(|(location, bytes)| (location.to_string(), bytes))
                .collect(),
            calls: Arc::default(),
        }
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl MediaFetcher for CountingFetcher {
    async fn fetch(&self, location: &str) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.payloads
            .get(location)
            .cloned()
            .ok_or_else(|| TermError::fetch(location, "no such payload"))
    }
}

/// PNG-encoded checkerboard of the given size.
pub fn png(width: u32, height: u32) -> Vec<u8> {
    let image = image::GrayImage::from_fn(width, height, |x, y| {
        image::Luma([if (x + y) % 2 == 0 { 0 } else { 255 }])
    });
    let mut bytes = std::io::Cursor::new(Vec::new());
    image
        .write_to(&mut bytes, image::ImageFormat::Png)
        .unwrap();
    bytes.into_inner()
}
