//! The detection orchestrator.
//!
//! A [`Detector`] applies a list of rule configurations to a [`Dataset`] in
//! declaration order. Row identities are attached first; after that, a rule
//! that fails for any reason is recorded as skipped and the run moves on with
//! the dataset as it was before that rule.

use super::naming::is_validity_column;
use super::Dataset;
use crate::config::RuleConfig;
use crate::error::{Result, TermError};
use crate::extract::{Extractors, FetchOptions};
use crate::logging::{truncate_field, LogConfig};
use crate::rules::{Rule, RuleRegistry};
use crate::{log_extraction, log_rule};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, instrument, warn};

/// Runtime options for a [`Detector`].
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    validate_plans: bool,
    fetch: FetchOptions,
    log: LogConfig,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            validate_plans: true,
            fetch: FetchOptions::default(),
            log: LogConfig::default(),
        }
    }
}

impl DetectorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether each rule's output plan is built before it is adopted.
    ///
    /// On by default. Without it, type errors in a rule's expressions only
    /// show up when the final dataset is collected.
    pub fn with_plan_validation(mut self, enabled: bool) -> Self {
        self.validate_plans = enabled;
        self
    }

    /// Maximum number of in-flight media fetches.
    pub fn with_fetch_concurrency(mut self, concurrency: usize) -> Self {
        self.fetch.concurrency = concurrency.max(1);
        self
    }

    /// Timeout for each remote fetch.
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch.timeout = timeout;
        self
    }

    pub fn with_log_config(mut self, log: LogConfig) -> Self {
        self.log = log;
        self
    }

    pub fn validate_plans(&self) -> bool {
        self.validate_plans
    }

    pub fn fetch_options(&self) -> FetchOptions {
        self.fetch
    }

    pub fn log_config(&self) -> &LogConfig {
        &self.log
    }
}

/// Cooperative cancellation, checked between rules.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A rule that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedRule {
    pub name: String,
    pub rule_type: String,
    pub on_column: String,
    /// Validity columns this rule added.
    pub validity_columns: Vec<String>,
}

/// A rule that was not applied, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedRule {
    pub name: String,
    pub on_column: Option<String>,
    /// Stable error kind, see [`TermError::kind`].
    pub kind: String,
    pub reason: String,
}

impl SkippedRule {
    fn new(config: &RuleConfig, error: &TermError) -> Self {
        Self {
            name: config.rule_name().to_string(),
            on_column: config.on_column.clone(),
            kind: error.kind().to_string(),
            reason: error.to_string(),
        }
    }
}

/// Result of [`Detector::detect_issues`].
#[derive(Debug, Clone)]
pub struct DetectionOutcome {
    /// The input columns plus row identity, derived and validity columns.
    pub dataset: Dataset,
    pub applied: Vec<AppliedRule>,
    pub skipped: Vec<SkippedRule>,
}

impl DetectionOutcome {
    /// True when every rule was applied.
    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty()
    }

    /// Human-readable summary of applied and skipped rules.
    pub fn summary(&self) -> String {
        let mut out = format!(
            "Applied {} rule(s), skipped {}",
            self.applied.len(),
            self.skipped.len()
        );
        for rule in &self.skipped {
            let column = rule.on_column.as_deref().unwrap_or("<none>");
            let _ = write!(
                out,
                "\n  - {} on {}: [{}] {}",
                rule.name, column, rule.kind, rule.reason
            );
        }
        out
    }
}

/// Applies rule configurations to datasets.
///
/// ```rust,no_run
/// use term_detect::prelude::*;
///
/// # async fn example(dataset: Dataset) -> Result<()> {
/// let rules = DetectionConfig::from_yaml(
///     "rules:\n  - type: NUMERIC\n    on_column: price\n    range: {min: 0, max: 100}\n",
/// )?;
/// let outcome = Detector::new().detect_issues(dataset, &rules.rules).await?;
/// println!("{}", outcome.summary());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Detector {
    registry: Arc<RuleRegistry>,
    extractors: Extractors,
    config: DetectorConfig,
    cancellation: Option<CancellationToken>,
}

impl Default for Detector {
    fn default() -> Self {
        Self::new()
    }
}

impl Detector {
    /// A detector with the built-in rules and default extractors.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> DetectorBuilder {
        DetectorBuilder::default()
    }

    pub fn registry(&self) -> &RuleRegistry {
        &self.registry
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn extractors(&self) -> &Extractors {
        &self.extractors
    }

    /// Applies `configs` to `dataset` in order.
    ///
    /// Only a failure to attach row identities is returned as an error.
    /// Every other failure, including cancellation, is recorded in
    /// [`DetectionOutcome::skipped`].
    #[instrument(skip_all, fields(rules = configs.len()))]
    pub async fn detect_issues(
        &self,
        dataset: Dataset,
        configs: &[RuleConfig],
    ) -> Result<DetectionOutcome> {
        info!(rules = configs.len(), "Starting detection run");
        let start = Instant::now();
        let mut dataset = dataset.with_row_identity().await?;

        let duplicates = find_duplicates(configs);
        let mut applied = Vec::new();
        let mut skipped = Vec::new();

        for (index, config) in configs.iter().enumerate() {
            if self.is_cancelled() {
                let error = TermError::Cancelled { completed: index };
                warn!(remaining = configs.len() - index, "Detection run cancelled");
                skipped.extend(configs[index..].iter().map(|c| SkippedRule::new(c, &error)));
                break;
            }

            if duplicates.contains(&index) {
                let error = TermError::DuplicateRule {
                    name: config.rule_name().to_string(),
                    column: config.on_column.clone().unwrap_or_default(),
                };
                self.record_skip(config, &error, &mut skipped);
                continue;
            }

            match self.apply_rule(&dataset, config).await {
                Ok((next, rule)) => {
                    let added = added_columns(&dataset, &next);
                    let (validity, derived): (Vec<_>, Vec<_>) =
                        added.into_iter().partition(|c| is_validity_column(c));
                    if !derived.is_empty() {
                        log_extraction!(
                            self.config.log,
                            rule = %rule.name(),
                            columns = ?derived,
                            "Derived feature columns added"
                        );
                    }
                    applied.push(AppliedRule {
                        name: rule.name().to_string(),
                        rule_type: rule.rule_type().to_string(),
                        on_column: rule.on_column().to_string(),
                        validity_columns: validity,
                    });
                    dataset = next;
                }
                Err(error) => self.record_skip(config, &error, &mut skipped),
            }
        }

        let outcome = DetectionOutcome {
            dataset,
            applied,
            skipped,
        };
        if self.config.log.log_summary {
            info!(
                applied = outcome.applied.len(),
                skipped = outcome.skipped.len(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Detection run finished"
            );
            if !outcome.is_complete() {
                warn!(
                    "{}",
                    truncate_field(&outcome.summary(), self.config.log.max_field_length * 8)
                );
            }
        }
        Ok(outcome)
    }

    async fn apply_rule(
        &self,
        dataset: &Dataset,
        config: &RuleConfig,
    ) -> Result<(Dataset, Box<dyn Rule>)> {
        let rule = self.registry.create(config, &self.extractors)?;
        log_rule!(
            self.config.log,
            rule = %rule.name(),
            rule_type = %rule.rule_type(),
            column = %rule.on_column(),
            "Applying rule"
        );

        let next = rule.detect(dataset.clone()).await?;
        if self.config.validate_plans {
            next.validate().await?;
        }
        ensure_augments(dataset, &next, rule.name())?;
        Ok((next, rule))
    }

    fn record_skip(&self, config: &RuleConfig, error: &TermError, skipped: &mut Vec<SkippedRule>) {
        warn!(
            rule = %config.rule_name(),
            kind = error.kind(),
            reason = %truncate_field(&error.to_string(), self.config.log.max_field_length),
            "Skipping rule"
        );
        skipped.push(SkippedRule::new(config, error));
    }

    fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }
}

/// Builder for [`Detector`].
#[derive(Debug, Default)]
pub struct DetectorBuilder {
    registry: Option<Arc<RuleRegistry>>,
    extractors: Option<Extractors>,
    config: Option<DetectorConfig>,
    cancellation: Option<CancellationToken>,
}

impl DetectorBuilder {
    /// Uses `registry` instead of the built-in one.
    pub fn registry(mut self, registry: RuleRegistry) -> Self {
        self.registry = Some(Arc::new(registry));
        self
    }

    /// Uses `extractors` instead of the defaults.
    ///
    /// When a [`DetectorConfig`] is also given, its fetch options are applied
    /// to these extractors (see [`Extractors::with_fetch_options`]).
    pub fn extractors(mut self, extractors: Extractors) -> Self {
        self.extractors = Some(extractors);
        self
    }

    pub fn config(mut self, config: DetectorConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn build(self) -> Detector {
        let extractors = match (self.extractors, &self.config) {
            (Some(extractors), Some(config)) => extractors.with_fetch_options(config.fetch),
            (Some(extractors), None) => extractors,
            (None, config) => Extractors::with_options(
                config.as_ref().map(|c| c.fetch).unwrap_or_default(),
            ),
        };
        Detector {
            registry: self
                .registry
                .unwrap_or_else(|| Arc::new(RuleRegistry::global().clone())),
            extractors,
            config: self.config.unwrap_or_default(),
            cancellation: self.cancellation,
        }
    }
}

/// Indexes of configs whose `(name, on_column)` pair appeared earlier.
fn find_duplicates(configs: &[RuleConfig]) -> HashSet<usize> {
    let mut seen = HashSet::new();
    configs
        .iter()
        .enumerate()
        .filter(|(_, config)| {
            config.on_column.is_some()
                && !seen.insert((config.rule_name().to_string(), config.on_column.clone()))
        })
        .map(|(index, _)| index)
        .collect()
}

fn added_columns(before: &Dataset, after: &Dataset) -> Vec<String> {
    let existing: HashSet<String> = before.column_names().into_iter().collect();
    after
        .column_names()
        .into_iter()
        .filter(|name| !existing.contains(name))
        .collect()
}

/// Fails unless `after` keeps every column of `before`, in order.
fn ensure_augments(before: &Dataset, after: &Dataset, rule: &str) -> Result<()> {
    let before = before.column_names();
    let after = after.column_names();
    if after.len() >= before.len() && after[..before.len()] == before[..] {
        Ok(())
    } else {
        Err(TermError::Internal(format!(
            "rule '{rule}' removed or reordered existing columns"
        )))
    }
}
