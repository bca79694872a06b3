use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::{
    Backend, DescriptorSet, EntryKind, EntryReference, Language, LaunchError, ParameterSource,
    Result,
};

pub type RunId = Uuid;

/// Lifecycle of a single run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    Created,
    Staged,
    ParamsProvisioned,
    Executing,
    Succeeded,
    Failed,
    OutputsProvisioned,
}

impl RunState {
    /// Forward edges only; any non-terminal state may fail.
    pub fn can_transition_to(&self, next: RunState) -> bool {
        use RunState::*;
        if next == Failed {
            return !self.is_terminal();
        }
        matches!(
            (self, next),
            (Created, Staged)
                | (Staged, ParamsProvisioned)
                | (ParamsProvisioned, Executing)
                | (Executing, Succeeded)
                | (Succeeded, OutputsProvisioned)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Failed | RunState::OutputsProvisioned)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Created => "CREATED",
            RunState::Staged => "STAGED",
            RunState::ParamsProvisioned => "PARAMS_PROVISIONED",
            RunState::Executing => "EXECUTING",
            RunState::Succeeded => "SUCCEEDED",
            RunState::Failed => "FAILED",
            RunState::OutputsProvisioned => "OUTPUTS_PROVISIONED",
        };
        f.write_str(name)
    }
}

/// Everything one run accumulates as it moves through the pipeline.
///
/// Each stage fills in its own fields; no two stages touch it at once.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: RunId,
    /// Row of a multi-run parameter source (0 for single runs)
    pub row: usize,
    pub entry: EntryReference,
    pub kind: EntryKind,
    pub language: Language,
    pub backend: Backend,
    pub descriptors: Option<DescriptorSet>,
    pub archive: Option<PathBuf>,
    pub parameters: ParameterSource,
    pub working_dir: Option<PathBuf>,
    pub provisioned_parameter_file: Option<PathBuf>,
    /// Parameters naming output destinations, kept out of input provisioning
    pub output_parameters: Map<String, Value>,
    pub stdout: String,
    pub stderr: String,
    pub notification_id: Option<String>,
    state: RunState,
}

impl RunContext {
    pub fn new(
        entry: EntryReference,
        kind: EntryKind,
        language: Language,
        backend: Backend,
        parameters: ParameterSource,
    ) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            row: 0,
            entry,
            kind,
            language,
            backend,
            descriptors: None,
            archive: None,
            parameters,
            working_dir: None,
            provisioned_parameter_file: None,
            output_parameters: Map::new(),
            stdout: String::new(),
            stderr: String::new(),
            notification_id: None,
            state: RunState::Created,
        }
    }

    pub fn with_row(mut self, row: usize) -> Self {
        self.row = row;
        self
    }

    pub fn with_notification_id(mut self, id: Option<String>) -> Self {
        self.notification_id = id;
        self
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Move to `next`, returning the previous state
    pub fn advance(&mut self, next: RunState) -> Result<RunState> {
        if !self.state.can_transition_to(next) {
            return Err(LaunchError::execution(format!(
                "run {} cannot move from {} to {}",
                self.run_id, self.state, next
            )));
        }
        let previous = self.state;
        self.state = next;
        Ok(previous)
    }

    /// Mark the run failed. Returns the previous state, or `None` if already terminal.
    pub fn fail(&mut self) -> Option<RunState> {
        if self.state.is_terminal() {
            return None;
        }
        let previous = self.state;
        self.state = RunState::Failed;
        Some(previous)
    }

    /// Snapshot of the staged files handed to a launcher
    pub fn staged(&self, output_target: Option<&str>) -> Result<StagedRun> {
        let missing = |what: &str| {
            LaunchError::execution(format!("run {} has no {} yet", self.run_id, what))
        };
        let descriptors = self.descriptors.as_ref().ok_or_else(|| missing("descriptor set"))?;
        Ok(StagedRun {
            working_dir: self.working_dir.clone().ok_or_else(|| missing("working directory"))?,
            primary: descriptors.primary().to_path_buf(),
            archive: self.archive.clone(),
            parameter_file: self
                .provisioned_parameter_file
                .clone()
                .ok_or_else(|| missing("provisioned parameter file"))?,
            original_parameter_file: self.parameters.path().to_path_buf(),
            output_parameters: self.output_parameters.clone(),
            language: self.language,
            kind: self.kind,
            output_target: output_target.map(str::to_string),
        })
    }
}

/// Files a launcher works from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedRun {
    pub working_dir: PathBuf,
    pub primary: PathBuf,
    pub archive: Option<PathBuf>,
    pub parameter_file: PathBuf,
    pub original_parameter_file: PathBuf,
    pub output_parameters: Map<String, Value>,
    pub language: Language,
    pub kind: EntryKind,
    /// Destination prefix for engine-reported outputs
    pub output_target: Option<String>,
}

impl StagedRun {
    pub fn outputs_dir(&self) -> PathBuf {
        self.working_dir.join("outputs")
    }

    pub fn primary_name(&self) -> String {
        file_name(&self.primary)
    }
}

/// Captured result of running an engine
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the engine was not a local process or was killed
    pub exit_code: Option<i32>,
    /// Identifier assigned by a remote execution service
    pub remote_run_id: Option<String>,
    pub success: bool,
}

impl ExecutionOutput {
    pub fn from_process(stdout: String, stderr: String, exit_code: Option<i32>) -> Self {
        Self {
            success: exit_code == Some(0),
            stdout,
            stderr,
            exit_code,
            remote_run_id: None,
        }
    }
}

pub(crate) fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
