use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::{ParameterFormat, ValidationError};

/// Workflow description language of an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Cwl,
    Wdl,
    Nextflow,
    Unknown,
}

impl Language {
    /// Content probes run in this order; the first match wins
    pub const PROBE_ORDER: [Language; 3] = [Language::Cwl, Language::Wdl, Language::Nextflow];

    /// Name accepted by `--descriptor`
    pub fn short_name(&self) -> &'static str {
        match self {
            Language::Cwl => "cwl",
            Language::Wdl => "wdl",
            Language::Nextflow => "nextflow",
            Language::Unknown => "unknown",
        }
    }

    /// TRS descriptor type used in registry URLs
    pub fn trs_type(&self) -> Option<&'static str> {
        match self {
            Language::Cwl => Some("CWL"),
            Language::Wdl => Some("WDL"),
            Language::Nextflow => Some("NFL"),
            Language::Unknown => None,
        }
    }

    /// Whether files with this extension belong to the language
    pub fn owns_extension(&self, extension: &str) -> bool {
        let extension = extension.to_ascii_lowercase();
        match self {
            Language::Cwl => matches!(extension.as_str(), "cwl" | "yaml" | "yml"),
            Language::Wdl => extension == "wdl",
            Language::Nextflow => matches!(extension.as_str(), "nf" | "config"),
            Language::Unknown => false,
        }
    }

    pub fn supports_parameter_format(&self, format: ParameterFormat) -> bool {
        match self {
            Language::Cwl => true,
            Language::Wdl | Language::Nextflow => format == ParameterFormat::Json,
            Language::Unknown => false,
        }
    }

    /// Fails with a validation error when the format is not accepted
    pub fn check_parameter_format(&self, format: ParameterFormat) -> Result<(), ValidationError> {
        if self.supports_parameter_format(format) {
            Ok(())
        } else {
            Err(ValidationError::UnsupportedParameterFormat {
                language: *self,
                format: format.to_string(),
            })
        }
    }

    pub fn is_known(&self) -> bool {
        *self != Language::Unknown
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Language::Cwl => "CWL",
            Language::Wdl => "WDL",
            Language::Nextflow => "Nextflow",
            Language::Unknown => "an unknown language",
        };
        f.write_str(name)
    }
}

impl FromStr for Language {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cwl" => Ok(Language::Cwl),
            "wdl" => Ok(Language::Wdl),
            "nextflow" | "nfl" => Ok(Language::Nextflow),
            other => Err(ValidationError::UnknownLanguage(other.to_string())),
        }
    }
}

/// Language suggested by a file name alone
pub fn language_for_path(path: &Path) -> Language {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    if name.ends_with("nextflow.config") {
        return Language::Nextflow;
    }
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if Language::Cwl.owns_extension(ext) => Language::Cwl,
        Some(ext) if Language::Wdl.owns_extension(ext) => Language::Wdl,
        _ => Language::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_mapping() {
        assert_eq!(language_for_path(Path::new("a/tool.cwl")), Language::Cwl);
        assert_eq!(language_for_path(Path::new("tool.YML")), Language::Cwl);
        assert_eq!(language_for_path(Path::new("hello.wdl")), Language::Wdl);
        assert_eq!(language_for_path(Path::new("repo/nextflow.config")), Language::Nextflow);
        assert_eq!(language_for_path(Path::new("pipeline.txt")), Language::Unknown);
        assert_eq!(language_for_path(Path::new("Makefile")), Language::Unknown);
    }

    #[test]
    fn descriptor_names_parse() {
        assert_eq!("CWL".parse::<Language>().unwrap(), Language::Cwl);
        assert_eq!("nfl".parse::<Language>().unwrap(), Language::Nextflow);
        assert!("python".parse::<Language>().is_err());
    }

    #[test]
    fn parameter_formats_per_language() {
        assert!(Language::Cwl.supports_parameter_format(ParameterFormat::Yaml));
        assert!(Language::Wdl.supports_parameter_format(ParameterFormat::Json));
        assert!(!Language::Wdl.supports_parameter_format(ParameterFormat::Tsv));
        assert!(!Language::Wdl.supports_parameter_format(ParameterFormat::Yaml));
        assert!(Language::Nextflow.check_parameter_format(ParameterFormat::Tsv).is_err());
    }
}
