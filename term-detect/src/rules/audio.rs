//! The `AUDIO` rule.

use super::registry::{RuleDescriptor, RuleRegistry};
use super::{Rule, RuleBase};
use crate::config::RuleConfig;
use crate::core::constraint::ConstraintKind;
use crate::core::evaluator::is_text;
use crate::core::naming::{derived_column_name, Feature};
use crate::core::Dataset;
use crate::error::{Result, TermError};
use crate::extract::columns::{AUDIO_CHANNELS, AUDIO_DURATION, AUDIO_READABLE, AUDIO_SAMPLE_RATE};
use crate::extract::Extractors;
use async_trait::async_trait;
use datafusion::prelude::*;
use serde::Deserialize;
use tracing::instrument;

const SUPPORTED: &[ConstraintKind] = &[
    ConstraintKind::Equal,
    ConstraintKind::NotEqual,
    ConstraintKind::IsNull,
    ConstraintKind::IsNotNull,
];

pub fn register(registry: &mut RuleRegistry) {
    registry.register(
        "AUDIO",
        RuleDescriptor::new(
            "Audio readability, duration, sample rate and channel count",
            SUPPORTED,
            |config, extractors| Ok(Box::new(AudioRule::new(config, extractors)?) as Box<dyn Rule>),
        ),
    );
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct DurationRange {
    #[serde(default)]
    min: f64,
    #[serde(default = "unbounded")]
    max: f64,
}

fn unbounded() -> f64 {
    f64::INFINITY
}

fn default_validate() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct AudioParams {
    #[serde(default = "default_validate")]
    validate_audio_files: bool,
    #[serde(default)]
    duration_range: Option<DurationRange>,
    #[serde(default)]
    sample_rate: Option<i64>,
    #[serde(default)]
    channels: Option<i64>,
}

/// Validates audio locations.
///
/// Metadata is read once into `__{col}_AUDIO_META__`. Payloads that cannot be
/// fetched or decoded read as unreadable with zero duration, sample rate and
/// channels, so media checks on them are false rather than null.
#[derive(Debug, Clone)]
pub struct AudioRule {
    base: RuleBase,
    validate_files: bool,
    duration: Option<DurationRange>,
    sample_rate: Option<i64>,
    channels: Option<i64>,
    extractors: Extractors,
}

impl AudioRule {
    pub fn new(config: &RuleConfig, extractors: &Extractors) -> Result<Self> {
        let base = RuleBase::new(config, "AUDIO", SUPPORTED)?;
        let params: AudioParams = config.params()?;
        if let Some(range) = params.duration_range {
            if range.min > range.max {
                return Err(TermError::invalid_config(
                    base.name(),
                    format!(
                        "duration_range min ({}) exceeds max ({})",
                        range.min, range.max
                    ),
                ));
            }
        }
        Ok(Self {
            base,
            validate_files: params.validate_audio_files,
            duration: params.duration_range,
            sample_rate: params.sample_rate,
            channels: params.channels,
            extractors: extractors.clone(),
        })
    }

    fn inspects_media(&self) -> bool {
        self.validate_files
            || self.duration.is_some()
            || self.sample_rate.is_some()
            || self.channels.is_some()
    }

    async fn ensure_metadata(&self, dataset: Dataset) -> Result<(Dataset, String)> {
        let on_column = self.base.on_column();
        self.base
            .column_type(&dataset, "text (media location)", is_text)?;

        let bytes = derived_column_name(on_column, Feature::Bytes);
        let dataset = dataset
            .ensure_materialized(&bytes, on_column, &self.extractors.bytes())
            .await?;
        let meta = derived_column_name(on_column, Feature::AudioMeta);
        let dataset = dataset
            .ensure_materialized(&meta, &bytes, &self.extractors.audio_metadata())
            .await?;
        Ok((dataset, meta))
    }
}

#[async_trait]
impl Rule for AudioRule {
    fn base(&self) -> &RuleBase {
        &self.base
    }

    #[instrument(skip_all, fields(rule = %self.base.name(), column = %self.base.on_column()))]
    async fn detect(&self, dataset: Dataset) -> Result<Dataset> {
        let on_column = self.base.on_column();
        let data_type = dataset.data_type(on_column)?;
        let target = dataset.column(on_column)?;
        let dataset = self.base.apply_constraints(
            dataset,
            &target,
            on_column,
            &data_type,
            "",
            self.base.constraints(),
        )?;

        if !self.inspects_media() {
            return Ok(dataset);
        }
        let (mut dataset, meta) = self.ensure_metadata(dataset).await?;
        let field = |name: &str| -> Result<Expr> { Ok(get_field(dataset.column(&meta)?, name)) };

        let mut checks = Vec::new();
        if self.validate_files {
            checks.push(("VALID_AUDIO_FILE", field(AUDIO_READABLE)?.is_true()));
        }
        if let Some(range) = self.duration {
            let duration = field(AUDIO_DURATION)?;
            checks.push((
                "DURATION_RANGE",
                duration
                    .clone()
                    .gt_eq(lit(range.min))
                    .and(duration.lt_eq(lit(range.max))),
            ));
        }
        if let Some(rate) = self.sample_rate {
            checks.push(("SAMPLE_RATE", field(AUDIO_SAMPLE_RATE)?.eq(lit(rate))));
        }
        if let Some(channels) = self.channels {
            checks.push(("CHANNELS", field(AUDIO_CHANNELS)?.eq(lit(channels))));
        }

        for (label, expr) in checks {
            dataset = self.base.add_validity(dataset, label, expr)?;
        }
        Ok(dataset)
    }
}
