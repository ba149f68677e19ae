//! Image rules.
//!
//! Every image rule except `IMAGE_FORMAT` downloads the payload behind the
//! on-column into the shared `__{col}_BYTES__` column first. Resolution and
//! aspect ratio also share the decoded `__{col}_RESOLUTION__` pair. Rows
//! whose download or decode fails carry null features and therefore never
//! pass a check.

use super::registry::{RuleDescriptor, RuleRegistry};
use super::{Rule, RuleBase};
use crate::config::RuleConfig;
use crate::core::constraint::{Constraint, ConstraintKind};
use crate::core::evaluator::{is_text, within_tolerance};
use crate::core::naming::{derived_column_name, Feature};
use crate::core::Dataset;
use crate::error::{Result, TermError};
use crate::extract::Extractors;
use arrow::datatypes::DataType;
use async_trait::async_trait;
use datafusion::functions_nested::expr_fn::array_element;
use datafusion::prelude::*;
use serde::Deserialize;
use tracing::instrument;

const MEASURE_CONSTRAINTS: &[ConstraintKind] = &[
    ConstraintKind::LessThan,
    ConstraintKind::GreaterThan,
    ConstraintKind::Equal,
    ConstraintKind::NotEqual,
    ConstraintKind::Between,
    ConstraintKind::WithinTolerance,
];

const NO_CONSTRAINTS: &[ConstraintKind] = &[];

const DEFAULT_FORMATS: [&str; 4] = [".jpg", ".jpeg", ".png", ".gif"];

/// Registers the `IMAGE_*` rule types.
pub fn register(registry: &mut RuleRegistry) {
    let types: [(&'static str, &str, &'static [ConstraintKind]); 6] = [
        (
            "IMAGE_RESOLUTION",
            "Constraints on the decoded width or height",
            MEASURE_CONSTRAINTS,
        ),
        (
            "IMAGE_BLUR",
            "Laplacian variance at or above a threshold",
            NO_CONSTRAINTS,
        ),
        (
            "IMAGE_ASPECT_RATIO",
            "Width over height within a tolerance of the expected ratio",
            NO_CONSTRAINTS,
        ),
        (
            "IMAGE_FACE_COUNT",
            "Detected face count equal to the expected count",
            NO_CONSTRAINTS,
        ),
        (
            "IMAGE_FORMAT",
            "File extension in an allowed list",
            NO_CONSTRAINTS,
        ),
        (
            "IMAGE_SIZE",
            "Constraints on the payload size, with optional units",
            MEASURE_CONSTRAINTS,
        ),
    ];
    for (type_id, description, supported) in types {
        registry.register(
            type_id,
            RuleDescriptor::new(description, supported, move |config, extractors| {
                Ok(Box::new(ImageRule::new(config, type_id, extractors)?) as Box<dyn Rule>)
            }),
        );
    }
}

/// Which decoded dimension a resolution rule checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dimension {
    Width,
    Height,
}

impl Dimension {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "width" => Some(Dimension::Width),
            "height" => Some(Dimension::Height),
            _ => None,
        }
    }

    /// One-based position inside the `[width, height]` list.
    fn position(&self) -> i64 {
        match self {
            Dimension::Width => 1,
            Dimension::Height => 2,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Dimension::Width => "WIDTH",
            Dimension::Height => "HEIGHT",
        }
    }
}

#[derive(Debug, Deserialize)]
struct ResolutionParams {
    #[serde(default = "default_dimension")]
    dimension: String,
}

fn default_dimension() -> String {
    "width".to_string()
}

#[derive(Debug, Deserialize)]
struct BlurParams {
    #[serde(default = "default_blur_threshold")]
    threshold: f64,
}

fn default_blur_threshold() -> f64 {
    100.0
}

#[derive(Debug, Deserialize)]
struct AspectRatioParams {
    #[serde(default = "default_expected_ratio")]
    expected: f64,
    #[serde(default = "default_ratio_tolerance")]
    tolerance: f64,
}

fn default_expected_ratio() -> f64 {
    1.0
}

fn default_ratio_tolerance() -> f64 {
    0.1
}

#[derive(Debug, Deserialize)]
struct FaceCountParams {
    #[serde(default)]
    expected_count: u32,
}

#[derive(Debug, Deserialize)]
struct FormatParams {
    #[serde(default = "default_formats")]
    allowed_formats: Vec<String>,
}

fn default_formats() -> Vec<String> {
    DEFAULT_FORMATS.iter().map(|f| f.to_string()).collect()
}

#[derive(Debug, Clone)]
enum ImageCheck {
    Resolution {
        dimension: Dimension,
    },
    Blur {
        threshold: f64,
    },
    AspectRatio {
        expected: f64,
        tolerance: f64,
    },
    FaceCount {
        expected: u32,
    },
    /// Lower-cased allowed extensions.
    Format {
        allowed: Vec<String>,
    },
    /// Constraints with size units already applied.
    Size {
        constraints: Vec<Constraint>,
    },
}

#[derive(Debug, Clone)]
pub struct ImageRule {
    base: RuleBase,
    check: ImageCheck,
    extractors: Extractors,
}

impl ImageRule {
    pub fn new(
        config: &RuleConfig,
        rule_type: &'static str,
        extractors: &Extractors,
    ) -> Result<Self> {
        let supported = match rule_type {
            "IMAGE_RESOLUTION" | "IMAGE_SIZE" => MEASURE_CONSTRAINTS,
            _ => NO_CONSTRAINTS,
        };
        let base = RuleBase::new(config, rule_type, supported)?;
        let invalid = |message: String| TermError::invalid_config(base.name(), message);

        let check = match rule_type {
            "IMAGE_RESOLUTION" => {
                let params: ResolutionParams = config.params()?;
                let dimension = Dimension::parse(&params.dimension).ok_or_else(|| {
                    invalid(format!(
                        "dimension must be 'width' or 'height', got '{}'",
                        params.dimension
                    ))
                })?;
                ImageCheck::Resolution { dimension }
            }
            "IMAGE_BLUR" => {
                let params: BlurParams = config.params()?;
                ImageCheck::Blur {
                    threshold: params.threshold,
                }
            }
            "IMAGE_ASPECT_RATIO" => {
                let params: AspectRatioParams = config.params()?;
                if params.tolerance.is_nan() || params.tolerance < 0.0 {
                    return Err(invalid("tolerance must not be negative".to_string()));
                }
                ImageCheck::AspectRatio {
                    expected: params.expected,
                    tolerance: params.tolerance,
                }
            }
            "IMAGE_FACE_COUNT" => {
                if !extractors.has_face_detector() {
                    return Err(invalid("no face detector is configured".to_string()));
                }
                let params: FaceCountParams = config.params()?;
                ImageCheck::FaceCount {
                    expected: params.expected_count,
                }
            }
            "IMAGE_FORMAT" => {
                let params: FormatParams = config.params()?;
                if params.allowed_formats.is_empty() {
                    return Err(invalid("allowed_formats must not be empty".to_string()));
                }
                ImageCheck::Format {
                    allowed: params
                        .allowed_formats
                        .iter()
                        .map(|f| f.to_lowercase())
                        .collect(),
                }
            }
            "IMAGE_SIZE" => {
                let constraints = base
                    .constraints()
                    .iter()
                    .zip(&config.constraints)
                    .map(|(constraint, spec)| {
                        let factor = unit_factor(spec.unit.as_deref()).ok_or_else(|| {
                            invalid(format!(
                                "unknown size unit '{}'",
                                spec.unit.as_deref().unwrap_or_default()
                            ))
                        })?;
                        constraint.scaled(factor, base.name())
                    })
                    .collect::<Result<Vec<_>>>()?;
                ImageCheck::Size { constraints }
            }
            other => {
                return Err(TermError::UnknownRuleType {
                    rule_type: other.to_string(),
                })
            }
        };

        Ok(Self {
            base,
            check,
            extractors: extractors.clone(),
        })
    }

    /// Ensures the shared payload column and returns its name.
    async fn ensure_bytes(&self, dataset: Dataset) -> Result<(Dataset, String)> {
        let on_column = self.base.on_column();
        self.base
            .column_type(&dataset, "text (media location)", is_text)?;
        let name = derived_column_name(on_column, Feature::Bytes);
        let dataset = dataset
            .ensure_materialized(&name, on_column, &self.extractors.bytes())
            .await?;
        Ok((dataset, name))
    }

    /// Ensures the shared `[width, height]` column and returns its name.
    async fn ensure_resolution(&self, dataset: Dataset) -> Result<(Dataset, String)> {
        let (dataset, bytes) = self.ensure_bytes(dataset).await?;
        let name = derived_column_name(self.base.on_column(), Feature::Resolution);
        let dataset = dataset
            .ensure_materialized(&name, &bytes, &self.extractors.dimensions())
            .await?;
        Ok((dataset, name))
    }

    async fn resolution(&self, dataset: Dataset, dimension: Dimension) -> Result<Dataset> {
        let (dataset, resolution) = self.ensure_resolution(dataset).await?;
        let target = array_element(dataset.column(&resolution)?, lit(dimension.position()));
        let prefix = format!("{}_", dimension.label());
        self.base.apply_constraints(
            dataset,
            &target,
            &resolution,
            &DataType::Int64,
            &prefix,
            self.base.constraints(),
        )
    }

    async fn aspect_ratio(
        &self,
        dataset: Dataset,
        expected: f64,
        tolerance: f64,
    ) -> Result<Dataset> {
        let (dataset, resolution) = self.ensure_resolution(dataset).await?;
        let name = derived_column_name(self.base.on_column(), Feature::AspectRatio);
        let dataset = dataset.ensure_expr(&name, |d| {
            let dims = d.column(&resolution)?;
            let width = cast(array_element(dims.clone(), lit(1i64)), DataType::Float64);
            let height = cast(array_element(dims, lit(2i64)), DataType::Float64);
            Ok(width / nullif(height, lit(0.0)))
        })?;
        let expr = within_tolerance(dataset.column(&name)?, expected, tolerance);
        self.base.add_validity(dataset, "ASPECT_RATIO", expr)
    }

    async fn blur(&self, dataset: Dataset, threshold: f64) -> Result<Dataset> {
        let (dataset, bytes) = self.ensure_bytes(dataset).await?;
        let name = derived_column_name(self.base.on_column(), Feature::BlurScore);
        let dataset = dataset
            .ensure_materialized(&name, &bytes, &self.extractors.sharpness())
            .await?;
        let expr = dataset.column(&name)?.gt_eq(lit(threshold));
        self.base.add_validity(dataset, "BLUR", expr)
    }

    async fn face_count(&self, dataset: Dataset, expected: u32) -> Result<Dataset> {
        let extractor = self.extractors.face_count().ok_or_else(|| {
            TermError::invalid_config(self.base.name(), "no face detector is configured")
        })?;
        let (dataset, bytes) = self.ensure_bytes(dataset).await?;
        let name = derived_column_name(self.base.on_column(), Feature::FaceCount);
        let dataset = dataset
            .ensure_materialized(&name, &bytes, &extractor)
            .await?;
        let expr = dataset.column(&name)?.eq(lit(i64::from(expected)));
        self.base.add_validity(dataset, "FACE_COUNT", expr)
    }

    fn format(&self, dataset: Dataset, allowed: &[String]) -> Result<Dataset> {
        self.base
            .column_type(&dataset, "text (media location)", is_text)?;
        let lowered = lower(dataset.column(self.base.on_column())?);
        let expr = allowed
            .iter()
            .map(|ext| ends_with(lowered.clone(), lit(ext.as_str())))
            .reduce(Expr::or)
            .ok_or_else(|| {
                TermError::invalid_config(self.base.name(), "allowed_formats must not be empty")
            })?;
        self.base.add_validity(dataset, "FORMAT", expr)
    }

    async fn size(&self, dataset: Dataset, constraints: &[Constraint]) -> Result<Dataset> {
        let (dataset, bytes) = self.ensure_bytes(dataset).await?;
        let name = derived_column_name(self.base.on_column(), Feature::SizeBytes);
        let dataset = dataset
            .ensure_materialized(&name, &bytes, &self.extractors.byte_length())
            .await?;
        let target = dataset.column(&name)?;
        self.base.apply_constraints(
            dataset,
            &target,
            &name,
            &DataType::Int64,
            "SIZE_",
            constraints,
        )
    }
}

#[async_trait]
impl Rule for ImageRule {
    fn base(&self) -> &RuleBase {
        &self.base
    }

    #[instrument(skip_all, fields(rule = %self.base.name(), column = %self.base.on_column()))]
    async fn detect(&self, dataset: Dataset) -> Result<Dataset> {
        match &self.check {
            ImageCheck::Resolution { dimension } => self.resolution(dataset, *dimension).await,
            ImageCheck::Blur { threshold } => self.blur(dataset, *threshold).await,
            ImageCheck::AspectRatio {
                expected,
                tolerance,
            } => self.aspect_ratio(dataset, *expected, *tolerance).await,
            ImageCheck::FaceCount { expected } => self.face_count(dataset, *expected).await,
            ImageCheck::Format { allowed } => self.format(dataset, allowed),
            ImageCheck::Size { constraints } => self.size(dataset, constraints).await,
        }
    }
}

/// Bytes per unit; `None` for an unknown unit.
fn unit_factor(unit: Option<&str>) -> Option<i64> {
    match unit.map(|u| u.trim().to_ascii_uppercase()).as_deref() {
        None | Some("B") => Some(1),
        Some("KB") => Some(1024),
        Some("MB") => Some(1024 * 1024),
        Some("GB") => Some(1024 * 1024 * 1024),
        Some(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::constraint::ConstraintSpec;
    use crate::test_helpers::{
        apply_with, bool_values, context_with_columns, f64_values, CountingFaces, MapFetcher,
        TextImageAnalyzer,
    };
    use arrow::array::{ArrayRef, StringArray};
    use serde_json::json;
    use std::sync::Arc;

    fn images(locations: Vec<Option<&str>>) -> Dataset {
        context_with_columns(vec![(
            "img",
            Arc::new(StringArray::from(locations)) as ArrayRef,
        )])
    }

    fn extractors() -> Extractors {
        Extractors::default()
            .with_fetcher(MapFetcher::new([
                ("wide.png", b"640x300@250".as_slice()),
                ("square.png", b"500x500@20".as_slice()),
                ("flat.png", b"640x0".as_slice()),
                ("faces.png", b"10x10 :) :)".as_slice()),
            ]))
            .with_image_analyzer(TextImageAnalyzer)
    }

    #[tokio::test]
    async fn test_height_scenario() {
        let config = RuleConfig::new("IMAGE_RESOLUTION", "img")
            .with_name("H")
            .with_param("dimension", "height")
            .with_constraint(ConstraintSpec::new("LESS_THAN", 400));
        let out = apply_with(
            images(vec![Some("wide.png"), Some("missing.png")]),
            &config,
            &extractors(),
        )
        .await
        .unwrap();

        assert_eq!(
            bool_values(&out, "__VALID_H_HEIGHT_LESS_THAN_0_img__").await,
            vec![Some(true), None]
        );
        assert!(out.has_column("__img_BYTES__"));
        assert!(out.has_column("__img_RESOLUTION__"));
    }

    #[tokio::test]
    async fn test_width_between() {
        let config = RuleConfig::new("IMAGE_RESOLUTION", "img")
            .with_name("W")
            .with_constraint(ConstraintSpec::new("BETWEEN", json!([600, 700])));
        let out = apply_with(
            images(vec![Some("wide.png"), Some("square.png")]),
            &config,
            &extractors(),
        )
        .await
        .unwrap();
        assert_eq!(
            bool_values(&out, "__VALID_W_WIDTH_BETWEEN_0_img__").await,
            vec![Some(true), Some(false)]
        );
    }

    #[test]
    fn test_unknown_dimension() {
        let config = RuleConfig::new("IMAGE_RESOLUTION", "img").with_param("dimension", "depth");
        assert!(matches!(
            ImageRule::new(&config, "IMAGE_RESOLUTION", &Extractors::default()),
            Err(TermError::InvalidConfig { .. })
        ));
    }

    #[tokio::test]
    async fn test_aspect_ratio_nulls_zero_height() {
        let config = RuleConfig::new("IMAGE_ASPECT_RATIO", "img").with_name("A");
        let out = apply_with(
            images(vec![Some("square.png"), Some("wide.png"), Some("flat.png")]),
            &config,
            &extractors(),
        )
        .await
        .unwrap();

        assert_eq!(
            bool_values(&out, "__VALID_A_ASPECT_RATIO_img__").await,
            vec![Some(true), Some(false), None]
        );
        let ratios = f64_values(&out, "__img_ASPECT_RATIO__").await;
        assert_eq!(ratios[0], Some(1.0));
        assert_eq!(ratios[2], None);
    }

    #[tokio::test]
    async fn test_blur_threshold() {
        let config = RuleConfig::new("IMAGE_BLUR", "img").with_name("B");
        let out = apply_with(
            images(vec![Some("wide.png"), Some("square.png"), Some("missing.png")]),
            &config,
            &extractors(),
        )
        .await
        .unwrap();
        assert_eq!(
            bool_values(&out, "__VALID_B_BLUR_img__").await,
            vec![Some(true), Some(false), None]
        );
    }

    #[tokio::test]
    async fn test_face_count() {
        let extractors = extractors().with_face_detector(CountingFaces);
        let config = RuleConfig::new("IMAGE_FACE_COUNT", "img")
            .with_name("F")
            .with_param("expected_count", 2);
        let out = apply_with(
            images(vec![Some("faces.png"), Some("square.png")]),
            &config,
            &extractors,
        )
        .await
        .unwrap();
        assert_eq!(
            bool_values(&out, "__VALID_F_FACE_COUNT_img__").await,
            vec![Some(true), Some(false)]
        );
    }

    #[test]
    fn test_face_count_requires_detector() {
        let config = RuleConfig::new("IMAGE_FACE_COUNT", "img");
        assert!(matches!(
            ImageRule::new(&config, "IMAGE_FACE_COUNT", &Extractors::default()),
            Err(TermError::InvalidConfig { .. })
        ));
    }

    #[tokio::test]
    async fn test_format_is_case_insensitive() {
        let config = RuleConfig::new("IMAGE_FORMAT", "img").with_name("X");
        let out = apply_with(
            images(vec![
                Some("photo.JPG"),
                Some("photo.png"),
                Some("photo.tiff"),
                None,
            ]),
            &config,
            &Extractors::default(),
        )
        .await
        .unwrap();

        assert_eq!(
            bool_values(&out, "__VALID_X_FORMAT_img__").await,
            vec![Some(true), Some(true), Some(false), None]
        );
        // Format never downloads.
        assert!(!out.has_column("__img_BYTES__"));
    }

    #[test]
    fn test_format_rejects_empty_list() {
        let config =
            RuleConfig::new("IMAGE_FORMAT", "img").with_param("allowed_formats", json!([]));
        assert!(ImageRule::new(&config, "IMAGE_FORMAT", &Extractors::default()).is_err());
    }

    #[tokio::test]
    async fn test_size_with_units() {
        let fetcher = MapFetcher::new([
            ("small.png", vec![0u8; 512].as_slice()),
            ("large.png", vec![0u8; 4096].as_slice()),
        ]);
        let extractors = Extractors::default().with_fetcher(fetcher);
        let config = RuleConfig::new("IMAGE_SIZE", "img")
            .with_name("S")
            .with_constraint(ConstraintSpec::new("LESS_THAN", 1).with_unit("KB"))
            .with_constraint(ConstraintSpec::new("GREATER_THAN", 1000));
        let out = apply_with(
            images(vec![Some("small.png"), Some("large.png"), Some("gone.png")]),
            &config,
            &extractors,
        )
        .await
        .unwrap();

        assert_eq!(
            bool_values(&out, "__VALID_S_SIZE_LESS_THAN_0_img__").await,
            vec![Some(true), Some(false), None]
        );
        assert_eq!(
            bool_values(&out, "__VALID_S_SIZE_GREATER_THAN_1_img__").await,
            vec![Some(false), Some(true), None]
        );
    }

    #[test]
    fn test_unit_factor() {
        assert_eq!(unit_factor(None), Some(1));
        assert_eq!(unit_factor(Some("kb")), Some(1024));
        assert_eq!(unit_factor(Some("GB")), Some(1 << 30));
        assert_eq!(unit_factor(Some("TB")), None);
    }

    #[test]
    fn test_measure_free_rules_reject_constraints() {
        let config = RuleConfig::new("IMAGE_BLUR", "img")
            .with_constraint(ConstraintSpec::new("LESS_THAN", 1));
        assert!(matches!(
            ImageRule::new(&config, "IMAGE_BLUR", &Extractors::default()),
            Err(TermError::UnsupportedConstraint { .. })
        ));
    }
}
