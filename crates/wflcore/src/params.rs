use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::ValidationError;

/// Serialization of a runtime parameter file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterFormat {
    Yaml,
    Json,
    Tsv,
}

impl ParameterFormat {
    /// Format of the rewritten file handed to an engine. TSV rows become JSON objects.
    pub fn provisioned(&self) -> ParameterFormat {
        match self {
            ParameterFormat::Tsv => ParameterFormat::Json,
            other => *other,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ParameterFormat::Yaml => "yaml",
            ParameterFormat::Json => "json",
            ParameterFormat::Tsv => "tsv",
        }
    }
}

impl fmt::Display for ParameterFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterFormat::Yaml => f.write_str("YAML"),
            ParameterFormat::Json => f.write_str("JSON"),
            ParameterFormat::Tsv => f.write_str("TSV"),
        }
    }
}

/// The single parameter file supplied for a launch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterSource {
    format: ParameterFormat,
    path: PathBuf,
}

impl ParameterSource {
    pub fn new(format: ParameterFormat, path: impl Into<PathBuf>) -> Self {
        Self {
            format,
            path: path.into(),
        }
    }

    /// Pick the one supplied source. Touches nothing on disk.
    pub fn from_args(
        yaml: Option<PathBuf>,
        json: Option<PathBuf>,
        tsv: Option<PathBuf>,
    ) -> Result<Self, ValidationError> {
        let supplied: Vec<(ParameterFormat, PathBuf)> = [
            (ParameterFormat::Yaml, yaml),
            (ParameterFormat::Json, json),
            (ParameterFormat::Tsv, tsv),
        ]
        .into_iter()
        .filter_map(|(format, path)| path.map(|p| (format, p)))
        .collect();

        match <[(ParameterFormat, PathBuf); 1]>::try_from(supplied) {
            Ok([(format, path)]) => Ok(Self::new(format, path)),
            Err(supplied) => Err(ValidationError::ParameterSourceCount {
                count: supplied.len(),
            }),
        }
    }

    pub fn format(&self) -> ParameterFormat {
        self.format
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory that relative file references are resolved against
    pub fn base_dir(&self) -> PathBuf {
        self.path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exactly_one_source() {
        let none = ParameterSource::from_args(None, None, None);
        assert_eq!(none, Err(ValidationError::ParameterSourceCount { count: 0 }));

        let two = ParameterSource::from_args(Some("a.yml".into()), Some("a.json".into()), None);
        assert_eq!(two, Err(ValidationError::ParameterSourceCount { count: 2 }));

        let three = ParameterSource::from_args(
            Some("a.yml".into()),
            Some("a.json".into()),
            Some("a.tsv".into()),
        );
        assert_eq!(three, Err(ValidationError::ParameterSourceCount { count: 3 }));

        let tsv = ParameterSource::from_args(None, None, Some("rows.tsv".into())).unwrap();
        assert_eq!(tsv.format(), ParameterFormat::Tsv);
        assert_eq!(tsv.format().provisioned(), ParameterFormat::Json);
    }

    #[test]
    fn source_paths_need_not_exist() {
        let src = ParameterSource::from_args(None, Some("/definitely/missing.json".into()), None);
        assert!(src.is_ok());
        assert_eq!(src.unwrap().base_dir(), PathBuf::from("/definitely"));
        assert_eq!(ParameterSource::new(ParameterFormat::Json, "x.json").base_dir(), PathBuf::from("."));
    }
}
