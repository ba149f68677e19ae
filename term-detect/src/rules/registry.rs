//! Mapping from rule type identifiers to rule factories.

use super::Rule;
use crate::config::RuleConfig;
use crate::core::constraint::ConstraintKind;
use crate::error::{Result, TermError};
use crate::extract::Extractors;
use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Builds a rule from its configuration and the extraction capabilities.
pub type RuleFactory = Arc<dyn Fn(&RuleConfig, &Extractors) -> Result<Box<dyn Rule>> + Send + Sync>;

/// A registered rule type.
#[derive(Clone)]
pub struct RuleDescriptor {
    description: String,
    supported_constraints: Vec<ConstraintKind>,
    factory: RuleFactory,
}

impl RuleDescriptor {
    pub fn new<F>(
        description: impl Into<String>,
        supported_constraints: &[ConstraintKind],
        factory: F,
    ) -> Self
    where
        F: Fn(&RuleConfig, &Extractors) -> Result<Box<dyn Rule>> + Send + Sync + 'static,
    {
        Self {
            description: description.into(),
            supported_constraints: supported_constraints.to_vec(),
            factory: Arc::new(factory),
        }
    }
}

impl fmt::Debug for RuleDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleDescriptor")
            .field("description", &self.description)
            .field("supported_constraints", &self.supported_constraints)
            .finish_non_exhaustive()
    }
}

/// Introspection data for one rule type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleInfo {
    pub rule_type: String,
    pub description: String,
    pub supported_constraints: Vec<ConstraintKind>,
}

/// Case-insensitive lookup table of rule types.
///
/// Build it once before the first lookup, then share it read-only. The
/// built-in types are available through [`RuleRegistry::builtin`], or as a
/// process-wide instance through [`RuleRegistry::global`].
#[derive(Debug, Clone, Default)]
pub struct RuleRegistry {
    rules: BTreeMap<String, RuleDescriptor>,
}

static GLOBAL: Lazy<RuleRegistry> = Lazy::new(RuleRegistry::builtin);

impl RuleRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every built-in rule type.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        super::numeric::register(&mut registry);
        super::text::register(&mut registry);
        super::image::register(&mut registry);
        super::audio::register(&mut registry);
        registry
    }

    /// The lazily initialised process-wide built-in registry.
    pub fn global() -> &'static RuleRegistry {
        &GLOBAL
    }

    /// Registers `descriptor` under `type_id`, replacing any previous entry.
    pub fn register(&mut self, type_id: &str, descriptor: RuleDescriptor) {
        self.rules.insert(normalize(type_id), descriptor);
    }

    /// Returns true if `type_id` is registered.
    pub fn contains(&self, type_id: &str) -> bool {
        self.rules.contains_key(&normalize(type_id))
    }

    /// Builds the rule described by `config`.
    pub fn create(&self, config: &RuleConfig, extractors: &Extractors) -> Result<Box<dyn Rule>> {
        let type_id = config.rule_type.as_deref().ok_or_else(|| {
            TermError::invalid_config(config.rule_name(), "missing required field `type`")
        })?;
        let descriptor =
            self.rules
                .get(&normalize(type_id))
                .ok_or_else(|| TermError::UnknownRuleType {
                    rule_type: type_id.to_string(),
                })?;
        if config.on_column.is_none() {
            return Err(TermError::invalid_config(
                config.rule_name(),
                "missing required field `on_column`",
            ));
        }
        (descriptor.factory)(config, extractors)
    }

    /// Registered identifiers, sorted.
    pub fn list_types(&self) -> Vec<String> {
        self.rules.keys().cloned().collect()
    }

    /// Description and supported constraints of `type_id`.
    pub fn describe(&self, type_id: &str) -> Result<RuleInfo> {
        let key = normalize(type_id);
        let descriptor = self
            .rules
            .get(&key)
            .ok_or_else(|| TermError::UnknownRuleType {
                rule_type: type_id.to_string(),
            })?;
        Ok(RuleInfo {
            rule_type: key,
            description: descriptor.description.clone(),
            supported_constraints: descriptor.supported_constraints.clone(),
        })
    }
}

fn normalize(type_id: &str) -> String {
    type_id.trim().to_ascii_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_types() {
        let types = RuleRegistry::builtin().list_types();
        assert_eq!(
            types,
            vec![
                "AUDIO",
                "CATEGORY",
                "FLOAT",
                "IMAGE_ASPECT_RATIO",
                "IMAGE_BLUR",
                "IMAGE_FACE_COUNT",
                "IMAGE_FORMAT",
                "IMAGE_RESOLUTION",
                "IMAGE_SIZE",
                "INTEGER",
                "NUMERIC",
                "TEXT",
            ]
        );
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let registry = RuleRegistry::global();
        assert!(registry.contains("numeric"));
        let rule = registry
            .create(&RuleConfig::new("image_blur", "img"), &Extractors::default())
            .unwrap();
        assert_eq!(rule.rule_type(), "IMAGE_BLUR");
        assert_eq!(rule.name(), "image_blur");
    }

    #[test]
    fn test_unknown_type() {
        let err = RuleRegistry::builtin()
            .create(&RuleConfig::new("IMAGE_HUE", "img"), &Extractors::default())
            .unwrap_err();
        assert!(matches!(err, TermError::UnknownRuleType { .. }));
    }

    #[test]
    fn test_missing_required_fields() {
        let registry = RuleRegistry::builtin();
        let extractors = Extractors::default();

        let mut no_type = RuleConfig::new("NUMERIC", "x");
        no_type.rule_type = None;
        assert!(matches!(
            registry.create(&no_type, &extractors),
            Err(TermError::InvalidConfig { .. })
        ));

        let mut no_column = RuleConfig::new("NUMERIC", "x");
        no_column.on_column = None;
        assert!(matches!(
            registry.create(&no_column, &extractors),
            Err(TermError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_describe() {
        let info = RuleRegistry::builtin().describe("text").unwrap();
        assert_eq!(info.rule_type, "TEXT");
        assert!(info
            .supported_constraints
            .contains(&ConstraintKind::RegexMatch));
        assert!(RuleRegistry::builtin().describe("nope").is_err());
    }
}
