//! Column-at-a-time wrappers around the extraction capabilities.

use super::{AudioProbe, ColumnExtractor, FaceDetector, ImageAnalyzer, MediaFetcher};
use crate::error::{Result, TermError};
use arrow::array::{
    Array, ArrayRef, AsArray, BinaryArray, BooleanArray, Float64Array, Int64Array, Int64Builder,
    ListBuilder, StructArray,
};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Field, Fields};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use rayon::prelude::*;
use std::sync::Arc;
use tracing::{debug, warn};

/// Field of the audio metadata struct telling whether the payload decoded.
pub const AUDIO_READABLE: &str = "readable";
/// Field of the audio metadata struct holding the duration in seconds.
pub const AUDIO_DURATION: &str = "duration";
/// Field of the audio metadata struct holding the sample rate in Hz.
pub const AUDIO_SAMPLE_RATE: &str = "sample_rate";
/// Field of the audio metadata struct holding the channel count.
pub const AUDIO_CHANNELS: &str = "channels";

/// Applies `per_row` to every payload of a binary column.
///
/// Runs on the blocking pool and fans out across rows with rayon. Output
/// order matches input order.
async fn map_payloads<T, F>(input: ArrayRef, per_row: F) -> Result<Vec<T>>
where
    T: Send + 'static,
    F: Fn(Option<&[u8]>) -> T + Send + Sync + 'static,
{
    let payloads = cast(&input, &DataType::Binary)?;
    tokio::task::spawn_blocking(move || {
        let rows: Vec<Option<&[u8]>> = payloads.as_binary::<i32>().iter().collect();
        rows.par_iter().map(|payload| per_row(*payload)).collect()
    })
    .await
    .map_err(|e| TermError::Internal(format!("extraction task failed: {e}")))
}

/// Downloads the payload behind every location in a text column.
pub struct FetchColumn {
    fetcher: Arc<dyn MediaFetcher>,
    concurrency: usize,
}

impl FetchColumn {
    pub fn new(fetcher: Arc<dyn MediaFetcher>, concurrency: usize) -> Self {
        Self {
            fetcher,
            concurrency: concurrency.max(1),
        }
    }
}

#[async_trait]
impl ColumnExtractor for FetchColumn {
    fn output_type(&self) -> DataType {
        DataType::Binary
    }

    async fn extract(&self, input: ArrayRef) -> Result<ArrayRef> {
        let locations = cast(&input, &DataType::Utf8)?;
        let locations: Vec<Option<String>> = locations
            .as_string::<i32>()
            .iter()
            .map(|location| location.map(str::to_owned))
            .collect();

        let payloads: Vec<Option<Vec<u8>>> = stream::iter(locations)
            .map(|location| {
                let fetcher = Arc::clone(&self.fetcher);
                async move {
                    let location = location?;
                    match fetcher.fetch(&location).await {
                        Ok(bytes) => Some(bytes),
                        Err(e) => {
                            warn!(location = %location, error = %e, "Fetch failed, recording null");
                            None
                        }
                    }
                }
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        let fetched = payloads.iter().filter(|p| p.is_some()).count();
        debug!(rows = payloads.len(), fetched, "Fetched media payloads");

        let array: BinaryArray = payloads.iter().map(|p| p.as_deref()).collect();
        Ok(Arc::new(array))
    }
}

/// `[width, height]` of each decoded image.
pub struct DimensionsColumn {
    images: Arc<dyn ImageAnalyzer>,
}

impl DimensionsColumn {
    pub fn new(images: Arc<dyn ImageAnalyzer>) -> Self {
        Self { images }
    }
}

#[async_trait]
impl ColumnExtractor for DimensionsColumn {
    fn output_type(&self) -> DataType {
        DataType::new_list(DataType::Int64, true)
    }

    async fn extract(&self, input: ArrayRef) -> Result<ArrayRef> {
        let images = Arc::clone(&self.images);
        let dims = map_payloads(input, move |payload| {
            payload.and_then(|bytes| images.dimensions(bytes))
        })
        .await?;

        let mut builder = ListBuilder::new(Int64Builder::with_capacity(dims.len() * 2));
        for dim in dims {
            match dim {
                Some((width, height)) => {
                    builder.values().append_value(i64::from(width));
                    builder.values().append_value(i64::from(height));
                    builder.append(true);
                }
                None => builder.append_null(),
            }
        }
        Ok(Arc::new(builder.finish()))
    }
}

/// Laplacian variance of each decoded image.
pub struct SharpnessColumn {
    images: Arc<dyn ImageAnalyzer>,
}

impl SharpnessColumn {
    pub fn new(images: Arc<dyn ImageAnalyzer>) -> Self {
        Self { images }
    }
}

#[async_trait]
impl ColumnExtractor for SharpnessColumn {
    fn output_type(&self) -> DataType {
        DataType::Float64
    }

    async fn extract(&self, input: ArrayRef) -> Result<ArrayRef> {
        let images = Arc::clone(&self.images);
        let scores = map_payloads(input, move |payload| {
            payload.and_then(|bytes| images.sharpness(bytes))
        })
        .await?;
        Ok(Arc::new(Float64Array::from(scores)))
    }
}

/// Number of faces found in each image.
pub struct FaceCountColumn {
    faces: Arc<dyn FaceDetector>,
}

impl FaceCountColumn {
    pub fn new(faces: Arc<dyn FaceDetector>) -> Self {
        Self { faces }
    }
}

#[async_trait]
impl ColumnExtractor for FaceCountColumn {
    fn output_type(&self) -> DataType {
        DataType::Int64
    }

    async fn extract(&self, input: ArrayRef) -> Result<ArrayRef> {
        let faces = Arc::clone(&self.faces);
        let counts = map_payloads(input, move |payload| {
            payload
                .and_then(|bytes| faces.count_faces(bytes))
                .map(i64::from)
        })
        .await?;
        Ok(Arc::new(Int64Array::from(counts)))
    }
}

/// Payload length in bytes.
pub struct ByteLengthColumn;

#[async_trait]
impl ColumnExtractor for ByteLengthColumn {
    fn output_type(&self) -> DataType {
        DataType::Int64
    }

    async fn extract(&self, input: ArrayRef) -> Result<ArrayRef> {
        let payloads = cast(&input, &DataType::Binary)?;
        let lengths: Int64Array = payloads
            .as_binary::<i32>()
            .iter()
            .map(|payload| payload.map(|bytes| bytes.len() as i64))
            .collect();
        Ok(Arc::new(lengths))
    }
}

/// Readability, duration, sample rate and channel count of each payload.
///
/// The struct is never null. Unreadable or missing payloads report
/// `readable = false` and zero for every other field.
pub struct AudioMetadataColumn {
    probe: Arc<dyn AudioProbe>,
}

impl AudioMetadataColumn {
    pub fn new(probe: Arc<dyn AudioProbe>) -> Self {
        Self { probe }
    }

    fn fields() -> Fields {
        Fields::from(vec![
            Field::new(AUDIO_READABLE, DataType::Boolean, false),
            Field::new(AUDIO_DURATION, DataType::Float64, false),
            Field::new(AUDIO_SAMPLE_RATE, DataType::Int64, false),
            Field::new(AUDIO_CHANNELS, DataType::Int64, false),
        ])
    }
}

#[async_trait]
impl ColumnExtractor for AudioMetadataColumn {
    fn output_type(&self) -> DataType {
        DataType::Struct(Self::fields())
    }

    async fn extract(&self, input: ArrayRef) -> Result<ArrayRef> {
        let probe = Arc::clone(&self.probe);
        let metas = map_payloads(input, move |payload| {
            payload.and_then(|bytes| probe.probe(bytes))
        })
        .await?;

        let readable: BooleanArray = metas.iter().map(|m| Some(m.is_some())).collect();
        let duration: Float64Array = metas
            .iter()
            .map(|m| Some(m.map_or(0.0, |m| m.duration)))
            .collect();
        let sample_rate: Int64Array = metas
            .iter()
            .map(|m| Some(m.map_or(0, |m| i64::from(m.sample_rate))))
            .collect();
        let channels: Int64Array = metas
            .iter()
            .map(|m| Some(m.map_or(0, |m| i64::from(m.channels))))
            .collect();

        let array = StructArray::try_new(
            Self::fields(),
            vec![
                Arc::new(readable) as ArrayRef,
                Arc::new(duration),
                Arc::new(sample_rate),
                Arc::new(channels),
            ],
            None,
        )?;
        Ok(Arc::new(array))
    }
}
