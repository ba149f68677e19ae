//! Feature extraction capabilities.
//!
//! Rules never talk to the network or decode media themselves. They receive
//! an [`Extractors`] bundle holding one implementation per capability:
//!
//! - [`MediaFetcher`] turns a location string into raw bytes
//! - [`ImageAnalyzer`] reads dimensions and a sharpness score
//! - [`FaceDetector`] counts faces (no default implementation is bundled)
//! - [`AudioProbe`] reads readability, duration, sample rate and channels
//!
//! Each capability is wrapped in a [`ColumnExtractor`] that maps a whole
//! Arrow column at a time. Per-row failures never surface as errors: a row
//! whose payload cannot be fetched or decoded yields null.

pub mod audio;
pub mod columns;
pub mod fetch;
pub mod raster;

use crate::error::Result;
use arrow::array::ArrayRef;
use arrow::datatypes::DataType;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub use audio::WavProbe;
pub use columns::{
    AudioMetadataColumn, ByteLengthColumn, DimensionsColumn, FaceCountColumn, FetchColumn,
    SharpnessColumn,
};
pub use fetch::StdFetcher;
pub use raster::StdImageAnalyzer;

/// Computes a derived column from a source column.
///
/// The returned array must have the same length as `input` and the type
/// reported by [`output_type`](Self::output_type).
#[async_trait]
pub trait ColumnExtractor: Send + Sync {
    /// Arrow type of the produced column.
    fn output_type(&self) -> DataType;

    /// Maps one batch worth of source values.
    async fn extract(&self, input: ArrayRef) -> Result<ArrayRef>;
}

/// Retrieves the raw bytes behind a location string.
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch(&self, location: &str) -> Result<Vec<u8>>;
}

/// Decodes image payloads.
pub trait ImageAnalyzer: Send + Sync {
    /// `(width, height)` in pixels, or `None` if the payload is not an image.
    fn dimensions(&self, payload: &[u8]) -> Option<(u32, u32)>;

    /// Variance of the Laplacian over the grayscale image. Higher is sharper.
    fn sharpness(&self, payload: &[u8]) -> Option<f64>;
}

/// Counts faces in an image payload.
pub trait FaceDetector: Send + Sync {
    fn count_faces(&self, payload: &[u8]) -> Option<u32>;
}

/// Metadata read from an audio payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioMetadata {
    /// Duration in seconds.
    pub duration: f64,
    pub sample_rate: u32,
    pub channels: u16,
}

/// Reads audio metadata.
pub trait AudioProbe: Send + Sync {
    /// `None` when the payload is not readable audio.
    fn probe(&self, payload: &[u8]) -> Option<AudioMetadata>;
}

/// Options for the default fetcher.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FetchOptions {
    /// Maximum number of in-flight fetches.
    pub concurrency: usize,
    /// Per-request timeout for remote locations.
    pub timeout: Duration,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            concurrency: num_cpus::get().max(1) * 4,
            timeout: Duration::from_secs(30),
        }
    }
}

/// The capability implementations handed to rule factories.
#[derive(Clone)]
pub struct Extractors {
    fetcher: Arc<dyn MediaFetcher>,
    images: Arc<dyn ImageAnalyzer>,
    faces: Option<Arc<dyn FaceDetector>>,
    audio: Arc<dyn AudioProbe>,
    fetch_concurrency: usize,
    custom_fetcher: bool,
}

impl fmt::Debug for Extractors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Extractors")
            .field("face_detector", &self.faces.is_some())
            .field("fetch_concurrency", &self.fetch_concurrency)
            .field("custom_fetcher", &self.custom_fetcher)
            .finish_non_exhaustive()
    }
}

impl Default for Extractors {
    fn default() -> Self {
        Self::with_options(FetchOptions::default())
    }
}

impl Extractors {
    /// Default implementations with the given fetch options.
    pub fn with_options(options: FetchOptions) -> Self {
        Self {
            fetcher: Arc::new(StdFetcher::new(options.timeout)),
            images: Arc::new(StdImageAnalyzer),
            faces: None,
            audio: Arc::new(WavProbe),
            fetch_concurrency: options.concurrency.max(1),
            custom_fetcher: false,
        }
    }

    /// Applies `options` to an existing bundle.
    ///
    /// The concurrency limit always applies. The timeout only reaches the
    /// default fetcher; a fetcher installed with [`Self::with_fetcher`] keeps
    /// its own.
    pub fn with_fetch_options(mut self, options: FetchOptions) -> Self {
        self.fetch_concurrency = options.concurrency.max(1);
        if !self.custom_fetcher {
            self.fetcher = Arc::new(StdFetcher::new(options.timeout));
        }
        self
    }

    /// Replaces the media fetcher.
    pub fn with_fetcher(mut self, fetcher: impl MediaFetcher + 'static) -> Self {
        self.fetcher = Arc::new(fetcher);
        self.custom_fetcher = true;
        self
    }

    /// Replaces the image analyzer.
    pub fn with_image_analyzer(mut self, images: impl ImageAnalyzer + 'static) -> Self {
        self.images = Arc::new(images);
        self
    }

    /// Installs a face detector, enabling `IMAGE_FACE_COUNT` rules.
    pub fn with_face_detector(mut self, faces: impl FaceDetector + 'static) -> Self {
        self.faces = Some(Arc::new(faces));
        self
    }

    /// Replaces the audio probe.
    pub fn with_audio_probe(mut self, audio: impl AudioProbe + 'static) -> Self {
        self.audio = Arc::new(audio);
        self
    }

    /// Sets the maximum number of in-flight fetches.
    pub fn with_fetch_concurrency(mut self, concurrency: usize) -> Self {
        self.fetch_concurrency = concurrency.max(1);
        self
    }

    pub fn fetch_concurrency(&self) -> usize {
        self.fetch_concurrency
    }

    pub fn has_face_detector(&self) -> bool {
        self.faces.is_some()
    }

    /// Extractor for the `BYTES` feature.
    pub fn bytes(&self) -> FetchColumn {
        FetchColumn::new(Arc::clone(&self.fetcher), self.fetch_concurrency)
    }

    /// Extractor for the `RESOLUTION` feature.
    pub fn dimensions(&self) -> DimensionsColumn {
        DimensionsColumn::new(Arc::clone(&self.images))
    }

    /// Extractor for the `BLUR_SCORE` feature.
    pub fn sharpness(&self) -> SharpnessColumn {
        SharpnessColumn::new(Arc::clone(&self.images))
    }

    /// Extractor for the `FACE_COUNT` feature, if a detector is installed.
    pub fn face_count(&self) -> Option<FaceCountColumn> {
        self.faces
            .as_ref()
            .map(|faces| FaceCountColumn::new(Arc::clone(faces)))
    }

    /// Extractor for the `SIZE_BYTES` feature.
    pub fn byte_length(&self) -> ByteLengthColumn {
        ByteLengthColumn
    }

    /// Extractor for the `AUDIO_META` feature.
    pub fn audio_metadata(&self) -> AudioMetadataColumn {
        AudioMetadataColumn::new(Arc::clone(&self.audio))
    }
}
