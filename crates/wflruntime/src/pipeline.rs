use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use wflcore::{
    resolve_language, Backend, EntryKind, EntryReference, EventBus, EventEmitter, ExecutionOutput,
    Language, LaunchConfig, LaunchContext, LaunchError, LaunchEvent, Launcher, ParameterFormat,
    ParameterSource, ProvisionReport, Result, RunCommand, RunContext, RunId, RunState, StagedRun,
    ValidationError,
};

use crate::entry::{DescriptorRegistry, EntryResolver, HttpRegistry};
use crate::notify::{NotificationClient, Phase};
use crate::outputs::OutputProvisioner;
use crate::params::{load_runs, write_parameters, InputProvisioner};
use crate::registry::LauncherRegistry;
use crate::stager::WorkspaceStager;
use crate::transfer::TransferRegistry;

/// Subdirectory of a working directory that receives fetched descriptors
pub const DESCRIPTOR_DIR: &str = "descriptors";

/// Raw launch arguments as they arrive from a command line
#[derive(Debug, Clone, Default)]
pub struct LaunchArgs {
    pub entry: Option<String>,
    pub local_entry: Option<String>,
    pub json: Option<PathBuf>,
    pub yaml: Option<PathBuf>,
    pub tsv: Option<PathBuf>,
    pub descriptor: Option<String>,
    pub entry_type: EntryKind,
    pub wdl_output_target: Option<String>,
    pub uuid: Option<String>,
    pub wes: bool,
    pub wes_url: Option<String>,
    pub script: bool,
    pub timeout: Option<Duration>,
    pub parallel: Option<usize>,
}

/// A validated launch
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub entry: EntryReference,
    pub kind: EntryKind,
    pub parameters: ParameterSource,
    /// Explicit `--descriptor` language
    pub descriptor: Option<Language>,
    pub output_target: Option<String>,
    pub notification_id: Option<String>,
    /// Run on a remote execution service instead of a local engine
    pub wes: bool,
    pub wes_url: Option<String>,
    /// Non-interactive mode
    pub script: bool,
    pub timeout: Option<Duration>,
    pub parallelism: Option<usize>,
}

impl LaunchRequest {
    pub fn new(entry: EntryReference, parameters: ParameterSource) -> Self {
        Self {
            entry,
            kind: EntryKind::default(),
            parameters,
            descriptor: None,
            output_target: None,
            notification_id: None,
            wes: false,
            wes_url: None,
            script: false,
            timeout: None,
            parallelism: None,
        }
    }

    /// Validate raw arguments. Touches neither the filesystem nor the network.
    pub fn from_args(args: LaunchArgs) -> std::result::Result<Self, ValidationError> {
        let parameters = ParameterSource::from_args(args.yaml, args.json, args.tsv)?;
        let entry = EntryReference::from_args(args.entry, args.local_entry)?;
        let descriptor = args
            .descriptor
            .as_deref()
            .map(str::parse::<Language>)
            .transpose()?;
        Ok(Self {
            entry,
            kind: args.entry_type,
            parameters,
            descriptor,
            output_target: args.wdl_output_target,
            notification_id: args.uuid,
            wes: args.wes || args.wes_url.is_some(),
            wes_url: args.wes_url,
            script: args.script,
            timeout: args.timeout,
            parallelism: args.parallel,
        })
    }

    pub fn with_kind(mut self, kind: EntryKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_descriptor(mut self, language: Language) -> Self {
        self.descriptor = Some(language);
        self
    }

    pub fn with_output_target(mut self, target: impl Into<String>) -> Self {
        self.output_target = Some(target.into());
        self
    }

    pub fn with_notification_id(mut self, id: impl Into<String>) -> Self {
        self.notification_id = Some(id.into());
        self
    }

    pub fn with_wes(mut self, url: Option<String>) -> Self {
        self.wes = true;
        self.wes_url = url;
        self
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = Some(parallelism);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Outcome of one run
#[derive(Debug)]
pub struct RunSummary {
    pub run_id: RunId,
    pub row: usize,
    pub state: RunState,
    pub working_dir: Option<PathBuf>,
    pub command: Option<String>,
    pub remote_run_id: Option<String>,
    pub outputs: Option<ProvisionReport>,
    pub error: Option<LaunchError>,
    pub duration_ms: u64,
}

impl RunSummary {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Outcome of a launch: one summary per parameter row, in row order
#[derive(Debug)]
pub struct LaunchSummary {
    pub language: Language,
    pub backend: Backend,
    pub runs: Vec<RunSummary>,
}

impl LaunchSummary {
    pub fn succeeded(&self) -> bool {
        self.runs.iter().all(RunSummary::succeeded)
    }

    pub fn first_error(&self) -> Option<&LaunchError> {
        self.runs.iter().find_map(|r| r.error.as_ref())
    }

    pub fn exit_code(&self) -> i32 {
        self.first_error().map(LaunchError::exit_code).unwrap_or(0)
    }
}

/// Language and backend chosen for a launch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchPlan {
    pub language: Language,
    pub backend: Backend,
}

#[derive(Default)]
struct RunOutcome {
    phase: Option<Phase>,
    command: Option<String>,
    remote_run_id: Option<String>,
    outputs: Option<ProvisionReport>,
}

/// Drives entries through resolve, stage, provision, execute and output provisioning
pub struct LaunchPipeline {
    config: LaunchConfig,
    registry: Arc<LauncherRegistry>,
    resolver: EntryResolver,
    stager: WorkspaceStager,
    inputs: InputProvisioner,
    outputs: OutputProvisioner,
    event_bus: Arc<EventBus>,
    client: reqwest::Client,
    cancellation: CancellationToken,
}

impl LaunchPipeline {
    pub fn new(config: LaunchConfig, registry: Arc<LauncherRegistry>) -> Self {
        let client = reqwest::Client::new();
        let descriptors = HttpRegistry::new(config.server_url.clone())
            .with_client(client.clone())
            .with_token(config.token.clone());
        let transfers = Arc::new(TransferRegistry::with_defaults(client.clone()));
        Self {
            config,
            registry,
            resolver: EntryResolver::new(Arc::new(descriptors)),
            stager: WorkspaceStager::new(),
            inputs: InputProvisioner::new(transfers.clone()),
            outputs: OutputProvisioner::new(transfers),
            event_bus: Arc::new(EventBus::default()),
            client,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_descriptor_registry(mut self, registry: Arc<dyn DescriptorRegistry>) -> Self {
        self.resolver = EntryResolver::new(registry);
        self
    }

    pub fn with_stager(mut self, stager: WorkspaceStager) -> Self {
        self.stager = stager;
        self
    }

    pub fn with_transfers(mut self, transfers: TransferRegistry) -> Self {
        let transfers = Arc::new(transfers);
        self.inputs = InputProvisioner::new(transfers.clone());
        self.outputs = OutputProvisioner::new(transfers);
        self
    }

    pub fn config(&self) -> &LaunchConfig {
        &self.config
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<LaunchEvent> {
        self.event_bus.subscribe()
    }

    /// Cancelling this token kills running engines
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Validate raw arguments, then launch
    pub async fn launch_args(&self, args: LaunchArgs) -> Result<LaunchSummary> {
        let request = LaunchRequest::from_args(args)?;
        self.launch(request).await
    }

    /// Pick the language and backend. Reads only a local primary descriptor.
    pub fn plan(&self, request: &LaunchRequest) -> Result<LaunchPlan> {
        let language = if request.entry.is_local() {
            let path = Path::new(request.entry.identifier());
            if !path.is_file() {
                return Err(LaunchError::entry_not_found(
                    request.kind,
                    request.entry.identifier(),
                    true,
                ));
            }
            resolve_language(path, request.descriptor)?
        } else {
            request.descriptor.unwrap_or(Language::Cwl)
        };

        if !request.entry.is_local() && language == Language::Nextflow {
            return Err(ValidationError::UnsupportedMode {
                language,
                mode: "from a remote registry".to_string(),
            }
            .into());
        }

        let backend = if request.wes {
            if language == Language::Nextflow {
                return Err(ValidationError::UnsupportedMode {
                    language,
                    mode: "on a remote execution service".to_string(),
                }
                .into());
            }
            Backend::Wes
        } else {
            Backend::for_language(language).ok_or_else(|| ValidationError::UnknownDescriptor {
                path: request.entry.identifier().to_string(),
            })?
        };

        language.check_parameter_format(request.parameters.format())?;
        Ok(LaunchPlan { language, backend })
    }

    /// Launch every run described by the request's parameter source
    pub async fn launch(&self, request: LaunchRequest) -> Result<LaunchSummary> {
        let plan = self.plan(&request)?;
        tracing::info!(
            "Launching {} as {} on the {} backend",
            request.entry,
            plan.language,
            plan.backend
        );

        let (rows, launcher) = match self.prepare(plan, &request).await {
            Ok(prepared) => prepared,
            Err(e) => {
                tracing::error!("Could not prepare launch of {}: {}", request.entry, e);
                self.notifier(&request).send(Phase::Completed, false).await;
                return Err(e);
            }
        };
        let launcher: &dyn Launcher = launcher.as_ref();

        let parallelism = request
            .parallelism
            .unwrap_or_else(|| self.config.parallelism())
            .max(1);
        if rows.len() > 1 {
            tracing::info!("{} runs, at most {} at a time", rows.len(), parallelism);
        }

        let mut runs: Vec<RunSummary> = stream::iter(rows.into_iter().enumerate())
            .map(|(row, params)| self.run_one(launcher, plan, &request, row, params))
            .buffer_unordered(parallelism)
            .collect()
            .await;
        runs.sort_by_key(|r| r.row);

        Ok(LaunchSummary {
            language: plan.language,
            backend: plan.backend,
            runs,
        })
    }

    /// Read the parameter rows and get the backend ready to run them
    async fn prepare(
        &self,
        plan: LaunchPlan,
        request: &LaunchRequest,
    ) -> Result<(Vec<Value>, Box<dyn Launcher>)> {
        let rows = load_runs(&request.parameters)?;

        let mut config = self.config.clone();
        if let Some(url) = &request.wes_url {
            config.wes.url = Some(url.clone());
        }
        let mut launcher = self.registry.create_launcher(plan.backend, &config)?;
        launcher.setup(request.script).await?;
        Ok((rows, launcher))
    }

    fn notifier(&self, request: &LaunchRequest) -> NotificationClient {
        NotificationClient::new(
            self.config.notifications.clone(),
            request.notification_id.clone(),
        )
        .with_client(self.client.clone())
    }

    async fn run_one(
        &self,
        launcher: &dyn Launcher,
        plan: LaunchPlan,
        request: &LaunchRequest,
        row: usize,
        params: Value,
    ) -> RunSummary {
        let mut ctx = RunContext::new(
            request.entry.clone(),
            request.kind,
            plan.language,
            plan.backend,
            request.parameters.clone(),
        )
        .with_row(row)
        .with_notification_id(request.notification_id.clone());
        let emitter = self.event_bus.create_emitter(ctx.run_id);
        self.event_bus.emit(LaunchEvent::RunCreated {
            run_id: ctx.run_id,
            entry: request.entry.identifier().to_string(),
            row,
            timestamp: Utc::now(),
        });

        let notifier = self.notifier(request);

        let started = Instant::now();
        let mut outcome = RunOutcome::default();
        let result = self
            .drive(&mut ctx, &mut outcome, launcher, request, params, &emitter, &notifier)
            .await;

        let error = match result {
            Ok(()) => None,
            Err(e) => {
                tracing::error!("Run {} (row {}) failed: {}", ctx.run_id, row, e);
                if let Some(previous) = ctx.fail() {
                    emitter.state_changed(previous, RunState::Failed);
                }
                if let Some(phase) = outcome.phase {
                    notifier.send(phase, false).await;
                }
                Some(e)
            }
        };
        notifier.send(Phase::Completed, error.is_none()).await;

        let duration_ms = started.elapsed().as_millis() as u64;
        self.event_bus.emit(LaunchEvent::RunFinished {
            run_id: ctx.run_id,
            success: error.is_none(),
            duration_ms,
            timestamp: Utc::now(),
        });

        RunSummary {
            run_id: ctx.run_id,
            row,
            state: ctx.state(),
            working_dir: ctx.working_dir.clone(),
            command: outcome.command,
            remote_run_id: outcome.remote_run_id,
            outputs: outcome.outputs,
            error,
            duration_ms,
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn drive(
        &self,
        ctx: &mut RunContext,
        outcome: &mut RunOutcome,
        launcher: &dyn Launcher,
        request: &LaunchRequest,
        params: Value,
        emitter: &EventEmitter,
        notifier: &NotificationClient,
    ) -> Result<()> {
        // Stage
        let working_dir = self.stager.create_workspace()?;
        ctx.working_dir = Some(working_dir.clone());
        let descriptors = self
            .resolver
            .resolve(&ctx.entry, ctx.kind, ctx.language, &working_dir.join(DESCRIPTOR_DIR))
            .await?;
        let archive = if ctx.entry.is_local() {
            self.stager.package_local(descriptors.primary(), &working_dir)?
        } else {
            self.stager.package_remote(&ctx.entry, &descriptors, &working_dir)?
        };
        let output_keys = launcher.output_keys(descriptors.primary())?;
        ctx.descriptors = Some(descriptors);
        ctx.archive = Some(archive);
        transition(ctx, emitter, RunState::Staged)?;

        // Parameters
        let mut params = params;
        if let Value::Object(map) = &mut params {
            for key in output_keys {
                if let Some(destination) = map.remove(&key) {
                    ctx.output_parameters.insert(key, destination);
                }
            }
        }
        outcome.phase = Some(Phase::ProvisionInput);
        notifier.send(Phase::ProvisionInput, true).await;
        let parameter_file = if ctx.backend.provisions_inputs() {
            self.inputs
                .provision(params, ctx.language, &ctx.parameters, &working_dir)
                .await?
        } else {
            tracing::info!("Skipping input provisioning, {} fetches its own inputs", ctx.backend);
            write_parameters(&params, &working_dir, &ctx.parameters, ParameterFormat::Json)?
        };
        ctx.provisioned_parameter_file = Some(parameter_file);
        transition(ctx, emitter, RunState::ParamsProvisioned)?;

        // Execute
        outcome.phase = Some(Phase::Run);
        let staged = ctx.staged(request.output_target.as_deref())?;
        let command = launcher.build_run_command(&staged)?;
        tracing::info!("Executing: {}", command);
        outcome.command = Some(command.to_string());
        self.event_bus.emit(LaunchEvent::Executing {
            run_id: ctx.run_id,
            command: command.to_string(),
            timestamp: Utc::now(),
        });
        transition(ctx, emitter, RunState::Executing)?;
        notifier.send(Phase::Run, true).await;

        let launch_ctx = LaunchContext::new(ctx.run_id, emitter.clone())
            .with_timeout(self.run_timeout(request))
            .with_cancellation(self.cancellation.child_token());
        let output = launcher.execute(&command, &staged, &launch_ctx).await?;
        ctx.stdout = output.stdout.clone();
        ctx.stderr = output.stderr.clone();
        outcome.remote_run_id = output.remote_run_id.clone();
        if matches!(command, RunCommand::Process { .. }) {
            save_engine_output(&staged, ctx.backend, &output)?;
        }
        if !output.success {
            let status = match output.exit_code {
                Some(code) => format!("exited with status {}", code),
                None => "did not complete".to_string(),
            };
            return Err(LaunchError::execution_with_output(
                format!("{} {}", ctx.backend, status),
                &output.stdout,
                &output.stderr,
            ));
        }
        let report = launcher.parse_report(&output, &staged)?;
        transition(ctx, emitter, RunState::Succeeded)?;

        // Outputs
        outcome.phase = Some(Phase::ProvisionOutput);
        notifier.send(Phase::ProvisionOutput, true).await;
        let bindings = launcher.declared_outputs(report.as_ref(), &staged)?;
        if bindings.is_empty() {
            tracing::info!("No output bindings declared, nothing to provision");
        } else {
            let transfers = launcher.register_outputs(report.as_ref(), &bindings, &staged)?;
            let provisioned = self.outputs.provision(transfers).await;
            let failures = provisioned.failures();
            outcome.outputs = Some(provisioned);
            if let Some(failures) = failures {
                return Err(failures.into());
            }
        }
        transition(ctx, emitter, RunState::OutputsProvisioned)?;
        outcome.phase = None;
        Ok(())
    }

    fn run_timeout(&self, request: &LaunchRequest) -> Option<Duration> {
        request
            .timeout
            .or_else(|| self.config.run_timeout_secs.map(Duration::from_secs))
    }
}

fn transition(ctx: &mut RunContext, emitter: &EventEmitter, next: RunState) -> Result<()> {
    let previous = ctx.advance(next)?;
    tracing::info!("Run {}: {} -> {}", ctx.run_id, previous, next);
    emitter.state_changed(previous, next);
    Ok(())
}

/// Keep copies of the engine's streams next to its outputs
fn save_engine_output(staged: &StagedRun, backend: Backend, output: &ExecutionOutput) -> Result<()> {
    let dir = staged.outputs_dir();
    std::fs::create_dir_all(&dir).map_err(|e| LaunchError::io(&dir, e))?;
    for (stream, text) in [("stdout", &output.stdout), ("stderr", &output.stderr)] {
        let path = dir.join(format!("{}.{}.txt", backend.name(), stream));
        std::fs::write(&path, text).map_err(|e| LaunchError::io(&path, e))?;
        tracing::debug!("Saved copy of {} {} to {}", backend, stream, path.display());
    }
    Ok(())
}
