use async_trait::async_trait;
use base64::Engine as _;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use wflcore::{
    Backend, EntryKind, ExecutionOutput, FileInfo, Language, LaunchConfig, LaunchContext,
    LaunchError, Launcher, OutputBinding, OutputTransfer, Result, RunCommand, StagedRun,
    DEFAULT_CROMWELL_VERSION,
};
use wflruntime::{LauncherFactory, LauncherMetadata, LibraryCache};

use crate::process::run_process;

/// Line that precedes the outputs block in Cromwell's run-mode stdout
pub const FINAL_OUTPUTS_MARKER: &str = "Final Outputs:";

static OUTPUT_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\boutput\s*\{([^}]*)\}").expect("valid regex"));

static FILE_DECLARATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*File\??\s+([A-Za-z_][A-Za-z0-9_]*)\s*=").expect("valid regex")
});

/// Names of `File` outputs declared in a WDL document's output sections
pub fn declared_file_outputs(wdl: &str) -> HashSet<String> {
    OUTPUT_BLOCK
        .captures_iter(wdl)
        .filter_map(|block| block.get(1))
        .flat_map(|body| FILE_DECLARATION.captures_iter(body.as_str()))
        .filter_map(|decl| decl.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

pub fn cromwell_url(version: &str) -> String {
    format!(
        "https://github.com/broadinstitute/cromwell/releases/download/{v}/cromwell-{v}.jar",
        v = version
    )
}

/// WDL engine run as `java -jar cromwell.jar run`
pub struct CromwellLauncher {
    cache: LibraryCache,
    version: String,
    java: String,
    jar: Option<PathBuf>,
}

impl CromwellLauncher {
    pub fn new(cache: LibraryCache, version: impl Into<String>) -> Self {
        Self {
            cache,
            version: version.into(),
            java: "java".to_string(),
            jar: None,
        }
    }

    /// Use an already present jar instead of the cached download
    pub fn with_jar(mut self, jar: impl Into<PathBuf>) -> Self {
        self.jar = Some(jar.into());
        self
    }

    pub fn with_java(mut self, java: impl Into<String>) -> Self {
        self.java = java.into();
        self
    }

    fn jar_path(&self) -> Result<PathBuf> {
        match &self.jar {
            Some(jar) => Ok(jar.clone()),
            None => self.cache.path_for(&cromwell_url(&self.version)),
        }
    }
}

#[async_trait]
impl Launcher for CromwellLauncher {
    fn backend(&self) -> Backend {
        Backend::Cromwell
    }

    async fn setup(&mut self, _script: bool) -> Result<()> {
        if self.jar.is_some() {
            return Ok(());
        }
        if self.version != DEFAULT_CROMWELL_VERSION {
            tracing::info!(
                "Running with Cromwell {}, tested with {}",
                self.version,
                DEFAULT_CROMWELL_VERSION
            );
        }
        let jar = self.cache.ensure(&cromwell_url(&self.version)).await?;
        self.jar = Some(jar);
        Ok(())
    }

    fn build_run_command(&self, run: &StagedRun) -> Result<RunCommand> {
        let mut args = vec![
            "-jar".to_string(),
            self.jar_path()?.display().to_string(),
            "run".to_string(),
            run.primary.display().to_string(),
            "--inputs".to_string(),
            run.parameter_file.display().to_string(),
        ];
        // Imports only apply to workflows
        if let Some(archive) = run.archive.as_ref().filter(|a| a.is_file()) {
            if run.kind == EntryKind::Workflow {
                args.push("--imports".to_string());
                args.push(archive.display().to_string());
            }
        }
        Ok(RunCommand::Process {
            program: self.java.clone(),
            args,
            working_dir: run.working_dir.clone(),
        })
    }

    async fn execute(
        &self,
        command: &RunCommand,
        _run: &StagedRun,
        ctx: &LaunchContext,
    ) -> Result<ExecutionOutput> {
        match command {
            RunCommand::Process {
                program,
                args,
                working_dir,
            } => {
                tracing::info!("Calling out to Cromwell to run your workflow");
                run_process(program, args, working_dir, ctx).await
            }
            RunCommand::Remote { .. } => Err(LaunchError::execution(
                "Cromwell runs locally and cannot execute a remote command",
            )),
        }
    }

    fn parse_report(&self, output: &ExecutionOutput, run: &StagedRun) -> Result<Option<Value>> {
        // Outputs are only read back when they have somewhere to go
        if run.output_target.is_none() {
            return Ok(None);
        }
        let block = extract_report(&output.stdout)?;
        let report: Value = serde_json::from_str(block).map_err(|e| {
            LaunchError::execution_with_output(
                format!("Cromwell outputs are not valid JSON: {}", e),
                block,
                "",
            )
        })?;
        Ok(Some(report))
    }

    fn declared_outputs(&self, report: Option<&Value>, run: &StagedRun) -> Result<Vec<OutputBinding>> {
        let Some(target) = run.output_target.as_deref() else {
            tracing::info!("Output files left in place");
            return Ok(Vec::new());
        };
        let Some(outputs) = report.and_then(Value::as_object) else {
            return Ok(Vec::new());
        };
        let inputs = read_original_inputs(&run.original_parameter_file);
        let target = target.trim_end_matches('/');
        // Report keys are `<workflow>.<output>`
        let files = std::fs::read_to_string(&run.primary)
            .map(|wdl| declared_file_outputs(&wdl))
            .map_err(|e| LaunchError::io(&run.primary, e))?;
        Ok(outputs
            .iter()
            .filter(|(_, value)| value.is_string())
            .filter(|(name, _)| {
                let short = name.rsplit('.').next().unwrap_or_default();
                let declared = files.contains(short);
                if !declared {
                    tracing::debug!("Skipping {}, not a File output", name);
                }
                declared
            })
            .map(|(name, _)| OutputBinding {
                name: name.clone(),
                destinations: vec![FileInfo::new(format!("{}/{}", target, name))
                    .with_metadata(metadata_for(&inputs, name))],
            })
            .collect())
    }

    fn register_outputs(
        &self,
        report: Option<&Value>,
        bindings: &[OutputBinding],
        run: &StagedRun,
    ) -> Result<Vec<OutputTransfer>> {
        let Some(outputs) = report.and_then(Value::as_object) else {
            return Ok(Vec::new());
        };
        let mut transfers = Vec::new();
        for binding in bindings {
            let Some(reported) = outputs.get(&binding.name).and_then(Value::as_str) else {
                continue;
            };
            let mut source = PathBuf::from(reported);
            if source.is_relative() {
                source = run.working_dir.join(source);
            }
            for destination in &binding.destinations {
                tracing::info!(
                    "Uploading: {} from {} to {}",
                    binding.name,
                    source.display(),
                    destination.url
                );
                transfers.push(OutputTransfer::new(&binding.name, &source, destination.clone()));
            }
        }
        Ok(transfers)
    }
}

/// Parameter file as the user wrote it; metadata keys live there
fn read_original_inputs(path: &Path) -> Map<String, Value> {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|text| serde_json::from_str::<Value>(&text).ok())
        .and_then(|value| match value {
            Value::Object(map) => Some(map),
            _ => None,
        })
        .unwrap_or_default()
}

fn metadata_for(inputs: &Map<String, Value>, name: &str) -> Option<String> {
    let encoded = inputs.get(&format!("{}.metadata", name))?.as_str()?;
    let bytes = base64::engine::general_purpose::STANDARD.decode(encoded).ok()?;
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

/// The JSON block after `Final Outputs:` in Cromwell's stdout
pub fn extract_report(stdout: &str) -> Result<&str> {
    if cfg!(feature = "balanced-report-scan") {
        extract_report_balanced(stdout)
    } else {
        extract_report_legacy(stdout)
    }
}

fn no_outputs(stdout: &str) -> LaunchError {
    LaunchError::execution_with_output("No Cromwell output found after 'Final Outputs:'", stdout, "")
}

/// Substring contract: the block opens at the first `"\n{\n"` after the
/// marker and closes at the first `"\n}\n"` after that.
pub fn extract_report_legacy(stdout: &str) -> Result<&str> {
    let marker = stdout.find(FINAL_OUTPUTS_MARKER).ok_or_else(|| no_outputs(stdout))?;
    let start = stdout[marker..]
        .find("\n{\n")
        .map(|i| marker + i)
        .ok_or_else(|| no_outputs(stdout))?;
    let end = stdout[start..]
        .find("\n}\n")
        .map(|i| start + i + 2)
        .ok_or_else(|| no_outputs(stdout))?;
    let block = stdout[start..end].trim();
    if block.is_empty() {
        return Err(no_outputs(stdout));
    }
    Ok(block)
}

/// Brace scan from the first `{` after the marker that skips braces inside
/// JSON strings
pub fn extract_report_balanced(stdout: &str) -> Result<&str> {
    let marker = stdout.find(FINAL_OUTPUTS_MARKER).ok_or_else(|| no_outputs(stdout))?;
    let start = stdout[marker..]
        .find('{')
        .map(|i| marker + i)
        .ok_or_else(|| no_outputs(stdout))?;

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, c) in stdout[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Ok(&stdout[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    Err(no_outputs(stdout))
}

pub struct CromwellLauncherFactory;

impl LauncherFactory for CromwellLauncherFactory {
    fn create(&self, config: &LaunchConfig) -> Result<Box<dyn Launcher>> {
        let cache = LibraryCache::new(config.library_dir());
        Ok(Box::new(CromwellLauncher::new(cache, config.cromwell_version())))
    }

    fn backend(&self) -> Backend {
        Backend::Cromwell
    }

    fn metadata(&self) -> LauncherMetadata {
        LauncherMetadata {
            description: "Runs WDL workflows with a cached Cromwell jar".to_string(),
            languages: vec![Language::Wdl],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine as _;

    #[test]
    fn download_url_per_version() {
        assert_eq!(
            cromwell_url("36"),
            "https://github.com/broadinstitute/cromwell/releases/download/36/cromwell-36.jar"
        );
    }

    #[test]
    fn balanced_scan_skips_braces_in_strings() {
        let stdout = "Final Outputs:\n{\"a\": \"x}y\", \"b\": {\"c\": 1}} trailing\n";
        assert_eq!(
            extract_report_balanced(stdout).unwrap(),
            "{\"a\": \"x}y\", \"b\": {\"c\": 1}}"
        );
    }

    #[test]
    fn legacy_scan_requires_line_braces() {
        // The legacy contract only sees braces alone on their own lines
        let stdout = "Final Outputs:\n{\"a\": 1}\n";
        assert!(extract_report_legacy(stdout).is_err());
        assert!(extract_report_balanced(stdout).is_ok());
    }

    #[test]
    fn metadata_is_base64_decoded() {
        let mut inputs = Map::new();
        inputs.insert(
            "wf.out.metadata".to_string(),
            Value::String(base64::engine::general_purpose::STANDARD.encode("meta")),
        );
        assert_eq!(metadata_for(&inputs, "wf.out").as_deref(), Some("meta"));
        assert_eq!(metadata_for(&inputs, "wf.other"), None);
    }
}
