use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use wflcore::{
    Backend, ExecutionOutput, Language, LaunchConfig, LaunchContext, LaunchError, Launcher,
    Result, RunCommand, StagedRun, ValidationError,
};
use wflruntime::{unzip_archive, LauncherFactory, LauncherMetadata};

#[derive(Debug, Deserialize)]
struct RunResponse {
    run_id: String,
}

/// Language version advertised as `workflow_type_version`
fn type_version(language: Language) -> &'static str {
    match language {
        Language::Cwl => "v1.0",
        _ => "1.0",
    }
}

/// Top-level files of an unpacked descriptor tree that belong in a workflow
/// attachment: the language's own descriptors plus JSON files, sorted by name.
pub fn select_attachments(dir: &Path, language: Language) -> Result<Vec<PathBuf>> {
    let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(|e| LaunchError::io(dir, e))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .collect();
    entries.sort();

    let mut selected = Vec::new();
    for path in entries {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if path.is_dir() {
            tracing::info!("Found directory {}", name);
            continue;
        }
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        if language.owns_extension(&extension) || extension == "json" {
            tracing::info!("Adding file {} to workflow attachment", name);
            selected.push(path);
        } else {
            tracing::warn!(
                "File {} is not the correct type for the workflow so it will not be added to the workflow attachment",
                name
            );
        }
    }
    Ok(selected)
}

/// Keep the first file for each name
fn dedupe_by_name(files: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    files
        .into_iter()
        .filter(|path| seen.insert(path.file_name().map(|n| n.to_os_string())))
        .collect()
}

/// Submits runs to a GA4GH Workflow Execution Service
pub struct WesLauncher {
    client: reqwest::Client,
    url: String,
    auth: Option<String>,
}

impl WesLauncher {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            auth: None,
        }
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn with_auth(mut self, auth: Option<String>) -> Self {
        self.auth = auth;
        self
    }

    async fn build_form(
        &self,
        run: &StagedRun,
        workflow_url: &str,
        attachments: &[PathBuf],
        unpacked: &Path,
    ) -> Result<Form> {
        let params = tokio::fs::read_to_string(&run.parameter_file)
            .await
            .map_err(|e| LaunchError::io(&run.parameter_file, e))?;

        let mut files = attachments.to_vec();
        if let Some(archive) = run.archive.as_ref().filter(|a| a.is_file()) {
            unzip_archive(archive, unpacked)?;
            files.extend(select_attachments(unpacked, run.language)?);
        }

        let mut form = Form::new()
            .text("workflow_params", params)
            .text("workflow_type", run.language.trs_type().unwrap_or("CWL").to_string())
            .text("workflow_type_version", type_version(run.language))
            .text("tags", json!({ "client": "wfl" }).to_string())
            .text("workflow_url", workflow_url.to_string());

        for path in dedupe_by_name(files) {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let bytes = tokio::fs::read(&path)
                .await
                .map_err(|e| LaunchError::io(&path, e))?;
            tracing::debug!("Attaching {} ({} bytes)", name, bytes.len());
            form = form.part("workflow_attachment", Part::bytes(bytes).file_name(name));
        }
        Ok(form)
    }
}

#[async_trait]
impl Launcher for WesLauncher {
    fn backend(&self) -> Backend {
        Backend::Wes
    }

    fn build_run_command(&self, run: &StagedRun) -> Result<RunCommand> {
        Ok(RunCommand::Remote {
            endpoint: format!("{}/runs", self.url.trim_end_matches('/')),
            workflow_url: run.primary_name(),
            attachments: vec![run.primary.clone(), run.parameter_file.clone()],
        })
    }

    async fn execute(
        &self,
        command: &RunCommand,
        run: &StagedRun,
        ctx: &LaunchContext,
    ) -> Result<ExecutionOutput> {
        let RunCommand::Remote {
            endpoint,
            workflow_url,
            attachments,
        } = command
        else {
            return Err(LaunchError::execution(
                "the WES backend only submits remote commands",
            ));
        };

        let unpacked = tempfile::Builder::new()
            .prefix("wes-attachments-")
            .tempdir_in(&run.working_dir)
            .map_err(|e| LaunchError::io(&run.working_dir, e))?;
        let form = self
            .build_form(run, workflow_url, attachments, unpacked.path())
            .await?;

        ctx.events.info(format!("📤 Submitting {} to {}", workflow_url, endpoint));
        let mut request = self.client.post(endpoint).multipart(form);
        if let Some(auth) = &self.auth {
            request = request.header(reqwest::header::AUTHORIZATION, auth);
        }
        let context = format!("submitting to {}", endpoint);
        let submit = async {
            request
                .send()
                .await
                .map_err(|e| LaunchError::remote(&context, e))
        };
        let response = tokio::select! {
            response = submit => response?,
            _ = ctx.cancellation.cancelled() => return Err(LaunchError::Cancelled { seconds: 0 }),
        };

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| LaunchError::remote(&context, e))?;

        if !status.is_success() {
            ctx.events.warn(format!("⚠️  WES refused the run: {}", status));
            return Ok(ExecutionOutput {
                stdout: String::new(),
                stderr: format!("HTTP {}: {}", status, body),
                exit_code: None,
                remote_run_id: None,
                success: false,
            });
        }

        let run_id = serde_json::from_str::<RunResponse>(&body)
            .map(|r| r.run_id)
            .map_err(|e| {
                LaunchError::remote(&context, format!("unexpected response '{}': {}", body, e))
            })?;
        tracing::info!("Launched WES run with id: {}", run_id);
        ctx.events.info(format!("✅ WES run {} submitted", run_id));
        Ok(ExecutionOutput {
            stdout: body,
            stderr: String::new(),
            exit_code: None,
            remote_run_id: Some(run_id),
            success: true,
        })
    }
}

pub struct WesLauncherFactory;

impl LauncherFactory for WesLauncherFactory {
    fn create(&self, config: &LaunchConfig) -> Result<Box<dyn Launcher>> {
        let url = config
            .wes
            .url
            .clone()
            .ok_or_else(|| ValidationError::MissingSetting("wes.url".to_string()))?;
        Ok(Box::new(WesLauncher::new(url).with_auth(config.wes.auth.clone())))
    }

    fn backend(&self) -> Backend {
        Backend::Wes
    }

    fn metadata(&self) -> LauncherMetadata {
        LauncherMetadata {
            description: "Submits CWL and WDL runs to a GA4GH WES endpoint".to_string(),
            languages: vec![Language::Cwl, Language::Wdl],
        }
    }
}
