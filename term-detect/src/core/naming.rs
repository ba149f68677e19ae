//! Deterministic column naming.
//!
//! Derived feature columns and validity columns are discovered purely by
//! name: derived columns as `__{source}_{FEATURE}__`, validity columns as
//! `__VALID_{rule}_{label}_{column}__`. Nothing else records which columns
//! a rule produced.

use std::fmt;

/// Name of the row identity column attached before any rule runs.
pub const ROW_HASH_COLUMN: &str = "__ROW_HASH__";

/// Prefix shared by every validity column.
pub const VALIDITY_PREFIX: &str = "__VALID_";

const SUFFIX: &str = "__";

/// Reusable features derived from a source column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    /// Downloaded payload bytes.
    Bytes,
    /// `[width, height]` of a decoded image.
    Resolution,
    /// Width divided by height.
    AspectRatio,
    /// Laplacian variance of the decoded image.
    BlurScore,
    /// Number of detected faces.
    FaceCount,
    /// Payload length in bytes.
    SizeBytes,
    /// Audio readability, duration, sample rate and channel count.
    AudioMeta,
}

impl Feature {
    /// Upper-case label used inside the derived column name.
    pub fn label(&self) -> &'static str {
        match self {
            Feature::Bytes => "BYTES",
            Feature::Resolution => "RESOLUTION",
            Feature::AspectRatio => "ASPECT_RATIO",
            Feature::BlurScore => "BLUR_SCORE",
            Feature::FaceCount => "FACE_COUNT",
            Feature::SizeBytes => "SIZE_BYTES",
            Feature::AudioMeta => "AUDIO_META",
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Name of the derived column holding `feature` computed from `source`.
pub fn derived_column_name(source: &str, feature: Feature) -> String {
    format!("__{source}_{}{SUFFIX}", feature.label())
}

/// Name of the validity column for one check of one rule.
pub fn validity_column_name(rule_name: &str, check_label: &str, on_column: &str) -> String {
    format!("{VALIDITY_PREFIX}{rule_name}_{check_label}_{on_column}{SUFFIX}")
}

/// Returns true if `name` follows the validity column convention.
pub fn is_validity_column(name: &str) -> bool {
    name.len() > VALIDITY_PREFIX.len() + SUFFIX.len()
        && name.starts_with(VALIDITY_PREFIX)
        && name.ends_with(SUFFIX)
}

/// Strips the validity prefix and suffix, leaving `{rule}_{label}_{column}`.
pub fn validity_check_id(name: &str) -> Option<&str> {
    if is_validity_column(name) {
        Some(&name[VALIDITY_PREFIX.len()..name.len() - SUFFIX.len()])
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_names() {
        assert_eq!(derived_column_name("img", Feature::Bytes), "__img_BYTES__");
        assert_eq!(
            derived_column_name("photo_url", Feature::Resolution),
            "__photo_url_RESOLUTION__"
        );
        assert_eq!(
            derived_column_name("clip", Feature::AudioMeta),
            "__clip_AUDIO_META__"
        );
    }

    #[test]
    fn test_validity_names_round_trip() {
        let name = validity_column_name("H", "HEIGHT_LESS_THAN_0", "img");
        assert_eq!(name, "__VALID_H_HEIGHT_LESS_THAN_0_img__");
        assert!(is_validity_column(&name));
        assert_eq!(validity_check_id(&name), Some("H_HEIGHT_LESS_THAN_0_img"));
    }

    #[test]
    fn test_non_validity_columns() {
        assert!(!is_validity_column(ROW_HASH_COLUMN));
        assert!(!is_validity_column("__img_BYTES__"));
        assert!(!is_validity_column("__VALID___"));
        assert_eq!(validity_check_id("price"), None);
    }
}
