use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::{
    events::EventEmitter, ExecutionOutput, Language, OutputBinding, OutputTransfer, Result, RunId,
    StagedRun,
};

/// Execution engines a run can be handed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Cwltool,
    Cromwell,
    Nextflow,
    Wes,
}

impl Backend {
    /// Local engine for a language
    pub fn for_language(language: Language) -> Option<Backend> {
        match language {
            Language::Cwl => Some(Backend::Cwltool),
            Language::Wdl => Some(Backend::Cromwell),
            Language::Nextflow => Some(Backend::Nextflow),
            Language::Unknown => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Backend::Cwltool => "cwltool",
            Backend::Cromwell => "cromwell",
            Backend::Nextflow => "nextflow",
            Backend::Wes => "wes",
        }
    }

    /// Remote services fetch their own inputs
    pub fn provisions_inputs(&self) -> bool {
        !matches!(self, Backend::Wes)
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What a launcher will do, built without side effects
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunCommand {
    Process {
        program: String,
        args: Vec<String>,
        working_dir: PathBuf,
    },
    Remote {
        endpoint: String,
        workflow_url: String,
        attachments: Vec<PathBuf>,
    },
}

impl fmt::Display for RunCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunCommand::Process { program, args, .. } => {
                write!(f, "{}", program)?;
                for arg in args {
                    write!(f, " {}", arg)?;
                }
                Ok(())
            }
            RunCommand::Remote {
                endpoint,
                workflow_url,
                attachments,
            } => write!(
                f,
                "POST {} (workflow_url={}, {} attachment(s))",
                endpoint,
                workflow_url,
                attachments.len()
            ),
        }
    }
}

/// Per-run handles passed to `Launcher::execute`
#[derive(Clone)]
pub struct LaunchContext {
    pub run_id: RunId,
    pub events: EventEmitter,
    pub cancellation: CancellationToken,
    /// Caller-level limit; the engine is killed when it elapses
    pub timeout: Option<Duration>,
}

impl LaunchContext {
    pub fn new(run_id: RunId, events: EventEmitter) -> Self {
        Self {
            run_id,
            events,
            cancellation: CancellationToken::new(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }
}

/// Core trait every execution backend implements
#[async_trait]
pub trait Launcher: Send + Sync {
    fn backend(&self) -> Backend;

    /// Acquire engine binaries. Must be a no-op once they are cached.
    /// `script` skips interactive checks such as probing the engine version.
    async fn setup(&mut self, _script: bool) -> Result<()> {
        Ok(())
    }

    /// Top-level parameter keys that name output destinations rather than inputs
    fn output_keys(&self, _primary: &Path) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    /// Build the command for a staged run. Executes nothing.
    fn build_run_command(&self, run: &StagedRun) -> Result<RunCommand>;

    /// Run the command. A non-zero exit or refused API call is an
    /// unsuccessful `ExecutionOutput`, not an `Err`; errors mean the
    /// engine never ran.
    async fn execute(
        &self,
        command: &RunCommand,
        run: &StagedRun,
        ctx: &LaunchContext,
    ) -> Result<ExecutionOutput>;

    /// Structured run report, if this engine produces one for the run.
    /// A missing or malformed report is an execution error.
    fn parse_report(&self, _output: &ExecutionOutput, _run: &StagedRun) -> Result<Option<Value>> {
        Ok(None)
    }

    /// Output bindings declared for this run
    fn declared_outputs(&self, _report: Option<&Value>, _run: &StagedRun) -> Result<Vec<OutputBinding>> {
        Ok(Vec::new())
    }

    /// Match declared bindings against the run report
    fn register_outputs(
        &self,
        _report: Option<&Value>,
        _bindings: &[OutputBinding],
        _run: &StagedRun,
    ) -> Result<Vec<OutputTransfer>> {
        Ok(Vec::new())
    }
}
