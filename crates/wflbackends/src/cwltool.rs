use async_trait::async_trait;
use base64::Engine as _;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use wflcore::{
    Backend, ExecutionOutput, FileInfo, Language, LaunchConfig, LaunchContext, LaunchError,
    Launcher, OutputBinding, OutputTransfer, Result, RunCommand, StagedRun, ValidationError,
};
use wflruntime::transfer::local_path;
use wflruntime::{LauncherFactory, LauncherMetadata};

use crate::process::run_process;

/// CWL reference runner
pub struct CwltoolLauncher {
    runner: String,
}

impl CwltoolLauncher {
    pub fn new(runner: impl Into<String>) -> Self {
        Self {
            runner: runner.into(),
        }
    }

    pub fn runner(&self) -> &str {
        &self.runner
    }

    fn read_descriptor(primary: &Path) -> Result<Value> {
        let text = std::fs::read_to_string(primary).map_err(|e| LaunchError::io(primary, e))?;
        serde_yaml::from_str(&text).map_err(|_| {
            ValidationError::InvalidDescriptor {
                path: primary.display().to_string(),
                language: Language::Cwl,
            }
            .into()
        })
    }
}

#[async_trait]
impl Launcher for CwltoolLauncher {
    fn backend(&self) -> Backend {
        Backend::Cwltool
    }

    async fn setup(&mut self, script: bool) -> Result<()> {
        if script {
            return Ok(());
        }
        let probe = tokio::process::Command::new(&self.runner)
            .arg("--version")
            .output()
            .await
            .map_err(|e| {
                LaunchError::execution(format!(
                    "could not run '{} --version', is it installed and on your PATH? ({})",
                    self.runner, e
                ))
            })?;
        let version = String::from_utf8_lossy(&probe.stdout);
        if probe.status.success() {
            tracing::info!("Using {}", version.trim());
        } else {
            tracing::warn!("'{} --version' exited with {}", self.runner, probe.status);
        }
        Ok(())
    }

    fn output_keys(&self, primary: &Path) -> Result<Vec<String>> {
        let document = Self::read_descriptor(primary)?;
        Ok(declared_output_ids(&document))
    }

    fn build_run_command(&self, run: &StagedRun) -> Result<RunCommand> {
        let wd = &run.working_dir;
        let dir_arg = |name: &str| format!("{}/", wd.join(name).display());
        Ok(RunCommand::Process {
            program: self.runner.clone(),
            args: vec![
                "--enable-dev".to_string(),
                "--non-strict".to_string(),
                "--outdir".to_string(),
                dir_arg("outputs"),
                "--tmpdir-prefix".to_string(),
                dir_arg("tmp"),
                "--tmp-outdir-prefix".to_string(),
                dir_arg("working"),
                run.primary.display().to_string(),
                run.parameter_file.display().to_string(),
            ],
            working_dir: wd.clone(),
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
            } => run_process(program, args, working_dir, ctx).await,
            RunCommand::Remote { .. } => Err(LaunchError::execution(
                "cwltool runs locally and cannot execute a remote command",
            )),
        }
    }

    fn parse_report(&self, output: &ExecutionOutput, _run: &StagedRun) -> Result<Option<Value>> {
        parse_json_report(&output.stdout).map(Some)
    }

    fn declared_outputs(&self, _report: Option<&Value>, run: &StagedRun) -> Result<Vec<OutputBinding>> {
        let mut bindings = Vec::new();
        for id in self.output_keys(&run.primary)? {
            match run.output_parameters.get(&id) {
                Some(value) => {
                    let destinations = destinations_for(&id, value);
                    if !destinations.is_empty() {
                        bindings.push(OutputBinding {
                            name: id,
                            destinations,
                        });
                    }
                }
                None => tracing::warn!(
                    "Output location not found for \"{}\", leaving it in {}",
                    id,
                    run.outputs_dir().display()
                ),
            }
        }
        Ok(bindings)
    }

    fn register_outputs(
        &self,
        report: Option<&Value>,
        bindings: &[OutputBinding],
        run: &StagedRun,
    ) -> Result<Vec<OutputTransfer>> {
        let report = report
            .and_then(Value::as_object)
            .ok_or_else(|| LaunchError::execution("cwltool produced no output object"))?;
        let mut transfers = Vec::new();
        for binding in bindings {
            register_binding(binding, report.get(&binding.name), &run.working_dir, &mut transfers);
        }
        Ok(transfers)
    }
}

/// Output ids of the descriptor's process, without `#` or step prefixes
pub fn declared_output_ids(document: &Value) -> Vec<String> {
    let process = match document.get("$graph").and_then(Value::as_array) {
        Some(graph) => graph
            .iter()
            .find(|p| p.get("id").and_then(Value::as_str).map(short_id) == Some("main"))
            .or_else(|| {
                graph
                    .iter()
                    .find(|p| p.get("class").and_then(Value::as_str) == Some("Workflow"))
            })
            .or_else(|| graph.first()),
        None => Some(document),
    };
    let Some(outputs) = process.and_then(|p| p.get("outputs")) else {
        return Vec::new();
    };
    match outputs {
        Value::Array(items) => items
            .iter()
            .filter_map(|o| o.get("id").and_then(Value::as_str))
            .map(|id| short_id(id).to_string())
            .collect(),
        Value::Object(map) => map.keys().map(|id| short_id(id).to_string()).collect(),
        _ => Vec::new(),
    }
}

fn short_id(id: &str) -> &str {
    let id = id.trim_start_matches('#');
    id.rsplit('/').next().unwrap_or(id)
}

/// The output object cwltool prints: the whole of stdout, or the JSON
/// object that starts on the first line beginning with `{`.
pub fn parse_json_report(stdout: &str) -> Result<Value> {
    let missing = || {
        LaunchError::execution_with_output("cwltool did not print a JSON output object", stdout, "")
    };
    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(stdout.trim()) {
        return Ok(value);
    }
    let mut offset = 0;
    for line in stdout.split_inclusive('\n') {
        if line.starts_with('{') {
            let mut stream = serde_json::Deserializer::from_str(&stdout[offset..]).into_iter::<Value>();
            return match stream.next() {
                Some(Ok(value @ Value::Object(_))) => Ok(value),
                _ => Err(missing()),
            };
        }
        offset += line.len();
    }
    Err(missing())
}

fn destinations_for(id: &str, value: &Value) -> Vec<FileInfo> {
    match value {
        Value::Object(param) => file_info(id, param).into_iter().collect(),
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_object)
            .filter_map(|param| file_info(id, param))
            .collect(),
        _ => {
            tracing::warn!("Output malformed for \"{}\", leaving it in place", id);
            Vec::new()
        }
    }
}

fn file_info(id: &str, param: &Map<String, Value>) -> Option<FileInfo> {
    let Some(url) = location_of(param) else {
        tracing::warn!("Output \"{}\" has no path or location, skipping", id);
        return None;
    };
    let metadata = param
        .get("metadata")
        .and_then(Value::as_str)
        .and_then(|encoded| base64::engine::general_purpose::STANDARD.decode(encoded).ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned());
    let is_directory = param
        .get("class")
        .and_then(Value::as_str)
        .is_some_and(|class| class.eq_ignore_ascii_case("Directory"));
    let info = if is_directory {
        FileInfo::directory(url)
    } else {
        FileInfo::new(url)
    };
    Some(info.with_metadata(metadata))
}

fn location_of(param: &Map<String, Value>) -> Option<&str> {
    param
        .get("path")
        .and_then(Value::as_str)
        .or_else(|| param.get("location").and_then(Value::as_str))
}

fn register_binding(
    binding: &OutputBinding,
    entry: Option<&Value>,
    working_dir: &Path,
    transfers: &mut Vec<OutputTransfer>,
) {
    let key = binding.name.as_str();
    match (entry, binding.destinations.as_slice()) {
        (Some(Value::Array(items)), [single]) if single.directory => {
            for item in items {
                fan_out(key, single, item, working_dir, transfers);
            }
        }
        (Some(Value::Array(items)), destinations) => {
            if items.len() != destinations.len() {
                tracing::warn!(
                    "#{} produced {} file(s) for {} destination(s), pairing in order",
                    key,
                    items.len(),
                    destinations.len()
                );
            }
            for (destination, item) in destinations.iter().zip(items) {
                register_file(key, destination, item, working_dir, transfers);
            }
        }
        (entry, destinations) => {
            if destinations.len() > 1 {
                tracing::warn!("#{} produced one file for {} destinations", key, destinations.len());
            }
            match (entry, destinations.first()) {
                (Some(item), Some(destination)) => {
                    register_file(key, destination, item, working_dir, transfers)
                }
                _ => tracing::info!("Skipping: #{} was not in the output object", key),
            }
        }
    }
}

/// Nested lists unwrap into the same directory destination
fn fan_out(
    key: &str,
    destination: &FileInfo,
    item: &Value,
    working_dir: &Path,
    transfers: &mut Vec<OutputTransfer>,
) {
    match item {
        Value::Object(_) => register_file(key, destination, item, working_dir, transfers),
        Value::Array(nested) => {
            for inner in nested {
                fan_out(key, destination, inner, working_dir, transfers);
            }
        }
        _ => tracing::warn!("Ignoring odd output structure for #{}, skipping", key),
    }
}

fn register_file(
    key: &str,
    destination: &FileInfo,
    item: &Value,
    working_dir: &Path,
    transfers: &mut Vec<OutputTransfer>,
) {
    let Some(reported) = item.as_object() else {
        tracing::info!("Skipping: #{} was null in the output object", key);
        return;
    };
    let Some(location) = location_of(reported) else {
        tracing::info!("Skipping: #{} has no path in the output object", key);
        return;
    };
    let source = resolve_reported(location, working_dir);
    tracing::info!(
        "Registering: #{} to provision from {} to {}",
        key,
        source.display(),
        destination.url
    );
    transfers.push(OutputTransfer::new(key, source, destination.clone()));

    let Some(secondaries) = reported.get("secondaryFiles").and_then(Value::as_array) else {
        return;
    };
    let primary_name = reported_basename(reported);
    for secondary in secondaries {
        let Some(secondary_map) = secondary.as_object() else {
            continue;
        };
        let secondary_name = reported_basename(secondary_map);
        let renamed;
        let mut segments: Vec<&str> = destination.url.split('/').collect();
        if destination.directory {
            segments.push(&secondary_name);
        } else {
            let target = segments.pop().unwrap_or_default();
            renamed = rename_secondary(target, &primary_name, &secondary_name);
            segments.push(&renamed);
        }
        let secondary_destination = FileInfo {
            local_path: destination.local_path.clone(),
            url: segments.join("/"),
            metadata: None,
            directory: false,
        };
        register_file(key, &secondary_destination, secondary, working_dir, transfers);
    }
}

fn reported_basename(reported: &Map<String, Value>) -> String {
    let location = reported
        .get("location")
        .and_then(Value::as_str)
        .or_else(|| reported.get("path").and_then(Value::as_str))
        .unwrap_or_default();
    location.rsplit('/').next().unwrap_or(location).to_string()
}

fn resolve_reported(location: &str, working_dir: &Path) -> PathBuf {
    let path = local_path(location).unwrap_or_else(|_| PathBuf::from(location));
    if path.is_absolute() {
        path
    } else {
        working_dir.join(path)
    }
}

/// Name for a secondary file at the destination: the suffix that turns the
/// reported primary name into the reported secondary name is applied to the
/// destination name.
pub fn rename_secondary(target: &str, primary: &str, secondary: &str) -> String {
    let common = primary
        .char_indices()
        .zip(secondary.chars())
        .find(|((_, a), b)| a != b)
        .map(|((i, _), _)| i)
        .unwrap_or_else(|| primary.len().min(secondary.len()));
    let from = &primary[common..];
    let to = &secondary[common..];
    match target.rfind(from) {
        Some(index) => format!("{}{}", &target[..index], to),
        None => {
            let stem = match target.rfind('.') {
                Some(dot) if dot > 0 => &target[..dot],
                _ => target,
            };
            format!("{}.{}", stem, to)
        }
    }
}

pub struct CwltoolLauncherFactory;

impl LauncherFactory for CwltoolLauncherFactory {
    fn create(&self, config: &LaunchConfig) -> Result<Box<dyn Launcher>> {
        Ok(Box::new(CwltoolLauncher::new(config.cwltool.runner.clone())))
    }

    fn backend(&self) -> Backend {
        Backend::Cwltool
    }

    fn metadata(&self) -> LauncherMetadata {
        LauncherMetadata {
            description: "Runs CWL tools and workflows with a local cwltool".to_string(),
            languages: vec![Language::Cwl],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine as _;
    use serde_json::json;

    #[test]
    fn output_ids_from_list_and_map() {
        let listed = json!({"class": "Workflow", "outputs": [{"id": "#main/bam"}, {"id": "report"}]});
        assert_eq!(declared_output_ids(&listed), vec!["bam", "report"]);
        let mapped = json!({"class": "CommandLineTool", "outputs": {"out": "File"}});
        assert_eq!(declared_output_ids(&mapped), vec!["out"]);
        let packed = json!({"$graph": [
            {"id": "#tool", "class": "CommandLineTool", "outputs": [{"id": "#tool/x"}]},
            {"id": "#main", "class": "Workflow", "outputs": [{"id": "#main/final"}]}
        ]});
        assert_eq!(declared_output_ids(&packed), vec!["final"]);
    }

    #[test]
    fn report_after_log_lines() {
        let stdout = "INFO starting\n{\n  \"out\": {\"path\": \"/w/out.txt\"}\n}\nFinal process status is success\n";
        let report = parse_json_report(stdout).unwrap();
        assert_eq!(report["out"]["path"], "/w/out.txt");
    }

    #[test]
    fn missing_report_is_execution_error() {
        let err = parse_json_report("Final process status is success\n").unwrap_err();
        assert_eq!(err.category(), "ExecutionError");
    }

    #[test]
    fn secondary_names_follow_destination() {
        assert_eq!(rename_secondary("result.bam", "aligned.bam", "aligned.bam.bai"), "result.bam.bai");
        assert_eq!(rename_secondary("result.bam", "aligned.bam", "aligned.bai"), "result.bai");
        assert_eq!(rename_secondary("final.out", "reads.bam", "reads.crai"), "final.crai");
    }

    #[test]
    fn destinations_decode_metadata() {
        let encoded = base64::engine::general_purpose::STANDARD.encode("{\"owner\":\"me\"}");
        let value = json!({"class": "File", "path": "s3://bucket/out.txt", "metadata": encoded});
        let destinations = destinations_for("out", &value);
        assert_eq!(destinations.len(), 1);
        assert_eq!(destinations[0].url, "s3://bucket/out.txt");
        assert_eq!(destinations[0].metadata.as_deref(), Some("{\"owner\":\"me\"}"));
        assert!(!destinations[0].directory);
    }
}
