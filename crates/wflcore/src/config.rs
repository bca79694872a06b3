use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::{LaunchError, Result, ValidationError};

pub const DEFAULT_SERVER_URL: &str = "https://dockstore.org/api";
pub const DEFAULT_CROMWELL_VERSION: &str = "36";
pub const DEFAULT_NEXTFLOW_VERSION: &str = "19.01.0";

/// Launcher configuration, read from `~/.wfl/config.toml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchConfig {
    /// Registry base URL
    pub server_url: String,
    pub token: Option<String>,
    /// Webhook receiving lifecycle notifications
    pub notifications: Option<String>,
    pub cwltool: CwltoolConfig,
    pub cromwell: EngineVersion,
    pub nextflow: EngineVersion,
    pub wes: WesConfig,
    /// Engine-binary cache
    pub library_dir: Option<PathBuf>,
    pub max_parallel_runs: usize,
    pub run_timeout_secs: Option<u64>,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            token: None,
            notifications: None,
            cwltool: CwltoolConfig::default(),
            cromwell: EngineVersion::new(DEFAULT_CROMWELL_VERSION),
            nextflow: EngineVersion::new(DEFAULT_NEXTFLOW_VERSION),
            wes: WesConfig::default(),
            library_dir: None,
            max_parallel_runs: 1,
            run_timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CwltoolConfig {
    /// Executable invoked for CWL runs
    pub runner: String,
}

impl Default for CwltoolConfig {
    fn default() -> Self {
        Self {
            runner: "cwltool".to_string(),
        }
    }
}

/// Version of a downloaded engine. An empty table falls back to the
/// engine's default, so `Default` is only used for partial files.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineVersion {
    pub version: Option<String>,
}

impl EngineVersion {
    pub fn new(version: &str) -> Self {
        Self {
            version: Some(version.to_string()),
        }
    }

    pub fn or_default<'a>(&'a self, default: &'a str) -> &'a str {
        self.version.as_deref().unwrap_or(default)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WesConfig {
    pub url: Option<String>,
    /// Value of the `Authorization` header
    pub auth: Option<String>,
}

impl LaunchConfig {
    /// Load from `path`, `WFL_CONFIG` or the default location. A missing
    /// default file yields the defaults; a missing explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let explicit = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os("WFL_CONFIG").map(PathBuf::from));
        match explicit {
            Some(path) => Self::from_file(&path),
            None => {
                let path = default_config_path();
                if path.is_file() {
                    Self::from_file(&path)
                } else {
                    tracing::debug!("no config at {}, using defaults", path.display());
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| LaunchError::io(path, e))?;
        Self::parse(&text).map_err(|message| {
            ValidationError::InvalidConfig {
                path: path.display().to_string(),
                message,
            }
            .into()
        })
    }

    pub fn parse(text: &str) -> std::result::Result<Self, String> {
        toml::from_str(text).map_err(|e| e.to_string())
    }

    pub fn cromwell_version(&self) -> &str {
        self.cromwell.or_default(DEFAULT_CROMWELL_VERSION)
    }

    pub fn nextflow_version(&self) -> &str {
        self.nextflow.or_default(DEFAULT_NEXTFLOW_VERSION)
    }

    pub fn library_dir(&self) -> PathBuf {
        self.library_dir
            .clone()
            .unwrap_or_else(|| wfl_home().join("libraries"))
    }

    /// Worker-pool width for multi-row launches, never zero
    pub fn parallelism(&self) -> usize {
        self.max_parallel_runs.max(1)
    }
}

/// `WFL_HOME`, else `~/.wfl`
pub fn wfl_home() -> PathBuf {
    if let Some(home) = std::env::var_os("WFL_HOME") {
        return PathBuf::from(home);
    }
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".wfl")
}

pub fn default_config_path() -> PathBuf {
    wfl_home().join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_empty() {
        let config = LaunchConfig::parse("").unwrap();
        assert_eq!(config, LaunchConfig::default());
        assert_eq!(config.cromwell_version(), "36");
        assert_eq!(config.nextflow_version(), "19.01.0");
        assert_eq!(config.cwltool.runner, "cwltool");
        assert_eq!(config.parallelism(), 1);
    }

    #[test]
    fn partial_tables() {
        let config = LaunchConfig::parse(
            r#"
server_url = "http://localhost:8080/api"
notifications = "http://hooks.local/x"
max_parallel_runs = 4
library_dir = "/opt/wfl/libs"

[cromwell]
version = "40"

[nextflow]

[wes]
url = "http://wes.local/ga4gh/wes/v1"
"#,
        )
        .unwrap();
        assert_eq!(config.server_url, "http://localhost:8080/api");
        assert_eq!(config.cromwell_version(), "40");
        assert_eq!(config.nextflow_version(), "19.01.0");
        assert_eq!(config.parallelism(), 4);
        assert_eq!(config.library_dir(), PathBuf::from("/opt/wfl/libs"));
        assert_eq!(config.wes.url.as_deref(), Some("http://wes.local/ga4gh/wes/v1"));
    }

    #[test]
    fn bad_file_is_a_validation_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "max_parallel_runs = \"lots\"").unwrap();
        let err = LaunchConfig::from_file(&path).unwrap_err();
        assert_eq!(err.category(), "ValidationError");

        let missing = LaunchConfig::from_file(&dir.path().join("nope.toml")).unwrap_err();
        assert_eq!(missing.category(), "IOError");
    }
}
