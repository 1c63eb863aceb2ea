//! Canonical section names and their default ordering.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Top-level key holding run metadata.
pub const METADATA_KEY: &str = "metadata";

/// Top-level key holding the node declarations.
pub const IMPLEMENTATION_KEY: &str = "implementation_config";

/// The built-in sections, declared in their default execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SectionType {
    /// Nodes that bring data into the run.
    #[serde(rename = "reader_config")]
    Reader,
    /// Transformation stages.
    #[serde(rename = "pipeline_config")]
    Pipeline,
    /// Model fitting or prediction.
    #[serde(rename = "model_config")]
    Model,
    /// Post-processing of model output.
    #[serde(rename = "postprocess_config")]
    Postprocess,
    /// Nodes that persist results.
    #[serde(rename = "writer_config")]
    Writer,
    /// Visualisation.
    #[serde(rename = "dataviz_config")]
    Dataviz,
    /// Final cleanup and success signalling.
    #[serde(rename = "cleanup_config")]
    Cleanup,
}

impl SectionType {
    /// All sections in canonical order.
    pub const ALL: [Self; 7] = [
        Self::Reader,
        Self::Pipeline,
        Self::Model,
        Self::Postprocess,
        Self::Writer,
        Self::Dataviz,
        Self::Cleanup,
    ];

    /// Returns the configuration key of the section.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Reader => "reader_config",
            Self::Pipeline => "pipeline_config",
            Self::Model => "model_config",
            Self::Postprocess => "postprocess_config",
            Self::Writer => "writer_config",
            Self::Dataviz => "dataviz_config",
            Self::Cleanup => "cleanup_config",
        }
    }

    /// Returns the short operation name (`reader`, `writer`, ...).
    #[must_use]
    pub const fn operation(&self) -> &'static str {
        match self {
            Self::Reader => "reader",
            Self::Pipeline => "pipeline",
            Self::Model => "model",
            Self::Postprocess => "postprocess",
            Self::Writer => "writer",
            Self::Dataviz => "dataviz",
            Self::Cleanup => "cleanup",
        }
    }

    /// Returns true if `key` is one of the built-in section keys.
    #[must_use]
    pub fn is_supported(key: &str) -> bool {
        key.parse::<Self>().is_ok()
    }

    /// Returns the section keys in canonical order.
    #[must_use]
    pub fn canonical_keys() -> Vec<&'static str> {
        Self::ALL.iter().map(Self::as_str).collect()
    }
}

impl fmt::Display for SectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SectionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|section| section.as_str() == s)
            .ok_or_else(|| format!("unsupported section: {s}"))
    }
}

/// Where an ordered list of sections came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionSource {
    /// `metadata.section_run`.
    SectionRun,
    /// `metadata.section_registry`.
    SectionRegistry,
    /// Canonical order restricted to the sections present.
    Default,
}

impl fmt::Display for SectionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SectionRun => write!(f, "section_run"),
            Self::SectionRegistry => write!(f, "section_registry"),
            Self::Default => write!(f, "default"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_order() {
        assert_eq!(
            SectionType::canonical_keys(),
            vec![
                "reader_config",
                "pipeline_config",
                "model_config",
                "postprocess_config",
                "writer_config",
                "dataviz_config",
                "cleanup_config",
            ]
        );
    }

    #[test]
    fn test_parse_roundtrip() {
        for section in SectionType::ALL {
            assert_eq!(section.as_str().parse::<SectionType>().unwrap(), section);
        }
        assert!(!SectionType::is_supported("reader"));
        assert!(SectionType::is_supported("cleanup_config"));
    }

    #[test]
    fn test_section_source_display() {
        assert_eq!(SectionSource::SectionRun.to_string(), "section_run");
        assert_eq!(SectionSource::SectionRegistry.to_string(), "section_registry");
        assert_eq!(SectionSource::Default.to_string(), "default");
    }

    #[test]
    fn test_section_serialize() {
        let json = serde_json::to_string(&SectionType::Writer).unwrap();
        assert_eq!(json, r#""writer_config""#);
    }
}
