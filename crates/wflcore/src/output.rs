use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Final resting place for a provisioned file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    /// Where the file sits locally, once known
    pub local_path: Option<PathBuf>,
    /// Destination: a local path or a URI
    pub url: String,
    /// Opaque metadata forwarded to the transfer plugin
    pub metadata: Option<String>,
    /// Destination is a directory that receives one or more files
    pub directory: bool,
}

impl FileInfo {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn directory(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            directory: true,
            ..Default::default()
        }
    }

    pub fn with_metadata(mut self, metadata: Option<String>) -> Self {
        self.metadata = metadata;
        self
    }
}

/// A declared output and where its files must go
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputBinding {
    pub name: String,
    pub destinations: Vec<FileInfo>,
}

/// One concrete copy/upload produced by matching bindings to a run report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputTransfer {
    pub name: String,
    pub source: PathBuf,
    pub destination: FileInfo,
}

impl OutputTransfer {
    pub fn new(name: impl Into<String>, source: impl Into<PathBuf>, destination: FileInfo) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            destination,
        }
    }
}

/// A single file that could not be provisioned
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionFailure {
    /// Parameter field path or output name
    pub name: String,
    pub target: String,
    pub reason: String,
}

impl fmt::Display for ProvisionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.name, self.target, self.reason)
    }
}

/// Every failure of a provisioning stage, never only the first
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{} file(s) could not be provisioned:{}", .0.len(), render(.0))]
pub struct ProvisioningFailures(pub Vec<ProvisionFailure>);

fn render(failures: &[ProvisionFailure]) -> String {
    failures.iter().map(|f| format!("\n  - {}", f)).collect()
}

/// Outcome of output provisioning; partial success is representable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionReport {
    pub succeeded: Vec<OutputTransfer>,
    pub failed: Vec<ProvisionFailure>,
}

impl ProvisionReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// Aggregate error for the failed part, if any
    pub fn failures(&self) -> Option<ProvisioningFailures> {
        if self.failed.is_empty() {
            None
        } else {
            Some(ProvisioningFailures(self.failed.clone()))
        }
    }
}
