use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::{EntryKind, Language, ProvisioningFailures};

/// Longest stdout/stderr excerpt carried by an execution error
const EXCERPT_LIMIT: usize = 2000;

#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("{0}")]
    Validation(#[from] ValidationError),

    #[error("the {kind} entry '{path}' could not be found. {hint}")]
    EntryNotFound {
        kind: EntryKind,
        path: String,
        hint: String,
    },

    #[error("remote access failed while {context}: {message}")]
    RemoteAccess { context: String, message: String },

    #[error("IO error at '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{message}{}", excerpt(.stdout, .stderr))]
    Execution {
        message: String,
        stdout: String,
        stderr: String,
    },

    #[error("{0}")]
    Provisioning(#[from] ProvisioningFailures),

    #[error("run cancelled after {seconds}s")]
    Cancelled { seconds: u64 },
}

impl LaunchError {
    /// Missing entry, with a hint toward the other entry kind or location
    pub fn entry_not_found(kind: EntryKind, path: impl Into<String>, local: bool) -> Self {
        let hint = if local {
            format!(
                "Did you mean to launch a remote {} with --entry, or a local {}?",
                kind,
                kind.other()
            )
        } else {
            format!(
                "Did you mean to launch a local {} with --local-entry, or a remote {}?",
                kind,
                kind.other()
            )
        };
        LaunchError::EntryNotFound {
            kind,
            path: path.into(),
            hint,
        }
    }

    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        LaunchError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn remote(context: impl Into<String>, message: impl ToString) -> Self {
        LaunchError::RemoteAccess {
            context: context.into(),
            message: message.to_string(),
        }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        LaunchError::Execution {
            message: message.into(),
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    /// Execution error carrying tails of the engine's captured streams
    pub fn execution_with_output(message: impl Into<String>, stdout: &str, stderr: &str) -> Self {
        LaunchError::Execution {
            message: message.into(),
            stdout: tail(stdout),
            stderr: tail(stderr),
        }
    }

    /// Error category as printed to the user
    pub fn category(&self) -> &'static str {
        match self {
            LaunchError::Validation(_) => "ValidationError",
            LaunchError::EntryNotFound { .. } => "EntryNotFoundError",
            LaunchError::RemoteAccess { .. } => "RemoteAccessError",
            LaunchError::Io { .. } => "IOError",
            LaunchError::Execution { .. } => "ExecutionError",
            LaunchError::Provisioning(_) => "ProvisioningError",
            LaunchError::Cancelled { .. } => "CancelledError",
        }
    }

    /// Process exit code for this category
    pub fn exit_code(&self) -> i32 {
        match self {
            LaunchError::Validation(_) => 4,
            LaunchError::EntryNotFound { .. } => 5,
            LaunchError::RemoteAccess { .. } => 6,
            LaunchError::Io { .. } => 3,
            LaunchError::Execution { .. } => 10,
            LaunchError::Provisioning(_) => 7,
            LaunchError::Cancelled { .. } => 130,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("exactly one of --entry or --local-entry must be given, got {count}")]
    EntrySourceCount { count: usize },

    #[error("exactly one of --json, --yaml or --tsv must be given, got {count}")]
    ParameterSourceCount { count: usize },

    #[error(
        "Entry file '{path}' is ambiguous: the extension suggests {extension} but the content looks like {content}. \
         Please re-enter the command with '--descriptor <descriptor>' (e.g. '--descriptor {suggestion}')"
    )]
    AmbiguousDescriptor {
        path: String,
        extension: Language,
        content: Language,
        suggestion: String,
    },

    #[error("Entry file '{path}' is not a recognizable CWL, WDL or Nextflow file")]
    UnknownDescriptor { path: String },

    #[error("Entry file '{path}' is not a valid {language} file")]
    InvalidDescriptor { path: String, language: Language },

    #[error("unknown descriptor language '{0}', expected one of cwl, wdl or nextflow")]
    UnknownLanguage(String),

    #[error("{language} entries do not accept {format} parameter files")]
    UnsupportedParameterFormat { language: Language, format: String },

    #[error("malformed parameter file '{path}': {message}")]
    MalformedParameters { path: String, message: String },

    #[error("descriptor path '{0}' escapes the workspace")]
    UnsafeDescriptorPath(String),

    #[error("{language} entries cannot be launched {mode}")]
    UnsupportedMode { language: Language, mode: String },

    #[error("missing setting '{0}': pass it on the command line or set it in the config file")]
    MissingSetting(String),

    #[error("no launcher registered for the {0} backend")]
    NoLauncher(String),

    #[error("invalid configuration '{path}': {message}")]
    InvalidConfig { path: String, message: String },
}

fn tail(text: &str) -> String {
    if text.len() <= EXCERPT_LIMIT {
        return text.to_string();
    }
    let mut start = text.len() - EXCERPT_LIMIT;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    format!("...{}", &text[start..])
}

fn excerpt(stdout: &str, stderr: &str) -> String {
    let mut out = String::new();
    if !stdout.trim().is_empty() {
        out.push_str("\n--- stdout ---\n");
        out.push_str(stdout.trim_end());
    }
    if !stderr.trim().is_empty() {
        out.push_str("\n--- stderr ---\n");
        out.push_str(stderr.trim_end());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_map_to_distinct_exit_codes() {
        let errors = vec![
            LaunchError::from(ValidationError::ParameterSourceCount { count: 2 }),
            LaunchError::entry_not_found(EntryKind::Workflow, "x.cwl", true),
            LaunchError::remote("fetching descriptor", "404"),
            LaunchError::io("/tmp/x", std::io::Error::other("boom")),
            LaunchError::execution("engine exited with status 1"),
            LaunchError::Provisioning(ProvisioningFailures(Vec::new())),
            LaunchError::Cancelled { seconds: 3 },
        ];
        let mut codes: Vec<i32> = errors.iter().map(|e| e.exit_code()).collect();
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
        assert!(errors.iter().all(|e| e.exit_code() != 0));
    }

    #[test]
    fn entry_not_found_suggests_alternative() {
        let err = LaunchError::entry_not_found(EntryKind::Tool, "missing.cwl", true);
        let message = err.to_string();
        assert!(message.contains("--entry"));
        assert!(message.contains("local workflow"));
    }

    #[test]
    fn execution_error_keeps_tail_of_output() {
        let noisy = "x".repeat(EXCERPT_LIMIT * 2);
        let err = LaunchError::execution_with_output("failed", &noisy, "stack trace");
        match &err {
            LaunchError::Execution { stdout, stderr, .. } => {
                assert!(stdout.len() <= EXCERPT_LIMIT + 3);
                assert_eq!(stderr, "stack trace");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(err.to_string().contains("--- stderr ---"));
    }
}
