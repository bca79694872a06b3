use async_trait::async_trait;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use wflcore::{
    Backend, ExecutionOutput, Language, LaunchConfig, LaunchContext, LaunchError, Launcher,
    Result, RunCommand, StagedRun, DEFAULT_NEXTFLOW_VERSION,
};
use wflruntime::{LauncherFactory, LauncherMetadata, LibraryCache};

use crate::process::run_process;

const DEFAULT_MAIN_SCRIPT: &str = "main.nf";

static MAIN_SCRIPT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"mainScript\s*=\s*['"]([^'"]+)['"]"#).expect("valid regex")
});

pub fn nextflow_url(version: &str) -> String {
    format!(
        "https://github.com/nextflow-io/nextflow/releases/download/v{v}/nextflow-{v}-all",
        v = version
    )
}

/// Script a Nextflow entry runs: the primary itself when it is a script,
/// otherwise `manifest.mainScript` (or `main.nf`) beside the config.
pub fn main_script(primary: &Path) -> Result<PathBuf> {
    if primary.extension().is_some_and(|ext| ext == "nf") {
        return Ok(primary.to_path_buf());
    }
    let config = std::fs::read_to_string(primary).map_err(|e| LaunchError::io(primary, e))?;
    let script = MAIN_SCRIPT
        .captures(&config)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(DEFAULT_MAIN_SCRIPT);
    let dir = primary.parent().unwrap_or_else(|| Path::new("."));
    Ok(dir.join(script))
}

/// Nextflow run from its self-contained jar
pub struct NextflowLauncher {
    cache: LibraryCache,
    version: String,
    java: String,
    jar: Option<PathBuf>,
}

impl NextflowLauncher {
    pub fn new(cache: LibraryCache, version: impl Into<String>) -> Self {
        Self {
            cache,
            version: version.into(),
            java: "java".to_string(),
            jar: None,
        }
    }

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
            None => self.cache.path_for(&nextflow_url(&self.version)),
        }
    }
}

#[async_trait]
impl Launcher for NextflowLauncher {
    fn backend(&self) -> Backend {
        Backend::Nextflow
    }

    async fn setup(&mut self, _script: bool) -> Result<()> {
        if self.jar.is_some() {
            return Ok(());
        }
        if self.version != DEFAULT_NEXTFLOW_VERSION {
            tracing::info!(
                "Running with Nextflow {}, tested with {}",
                self.version,
                DEFAULT_NEXTFLOW_VERSION
            );
        }
        self.jar = Some(self.cache.ensure(&nextflow_url(&self.version)).await?);
        Ok(())
    }

    fn build_run_command(&self, run: &StagedRun) -> Result<RunCommand> {
        let script = main_script(&run.primary)?;
        Ok(RunCommand::Process {
            program: self.java.clone(),
            args: vec![
                "-jar".to_string(),
                self.jar_path()?.display().to_string(),
                "run".to_string(),
                "-with-docker".to_string(),
                "--outdir".to_string(),
                run.outputs_dir().display().to_string(),
                "-work-dir".to_string(),
                run.working_dir.join("working").display().to_string(),
                "-params-file".to_string(),
                run.parameter_file.display().to_string(),
                script.display().to_string(),
            ],
            working_dir: run.working_dir.clone(),
        })
    }

    async fn execute(
        &self,
        command: &RunCommand,
        _run: &StagedRun,
        ctx: &LaunchContext,
    ) -> Result<ExecutionOutput> {
        let RunCommand::Process {
            program,
            args,
            working_dir,
        } = command
        else {
            return Err(LaunchError::execution(
                "Nextflow runs locally and cannot execute a remote command",
            ));
        };
        let output = run_process(program, args, working_dir, ctx).await?;
        tracing::info!("Nextflow exit code: {:?}", output.exit_code);
        Ok(output)
    }

    // No structured report: the captured streams are the whole record
}

pub struct NextflowLauncherFactory;

impl LauncherFactory for NextflowLauncherFactory {
    fn create(&self, config: &LaunchConfig) -> Result<Box<dyn Launcher>> {
        let cache = LibraryCache::new(config.library_dir());
        Ok(Box::new(NextflowLauncher::new(cache, config.nextflow_version())))
    }

    fn backend(&self) -> Backend {
        Backend::Nextflow
    }

    fn metadata(&self) -> LauncherMetadata {
        LauncherMetadata {
            description: "Runs local Nextflow pipelines with a cached Nextflow jar".to_string(),
            languages: vec![Language::Nextflow],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn main_script_from_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("nextflow.config");
        std::fs::write(&config, "manifest {\n  mainScript = 'pipeline.nf'\n}\n").unwrap();
        assert_eq!(main_script(&config).unwrap(), dir.path().join("pipeline.nf"));

        std::fs::write(&config, "manifest {\n  description = 'x'\n}\n").unwrap();
        assert_eq!(main_script(&config).unwrap(), dir.path().join("main.nf"));
    }

    #[test]
    fn script_primary_runs_itself() {
        let path = Path::new("/w/descriptors/main.nf");
        assert_eq!(main_script(path).unwrap(), path);
    }

    #[test]
    fn download_url_per_version() {
        assert_eq!(
            nextflow_url("19.01.0"),
            "https://github.com/nextflow-io/nextflow/releases/download/v19.01.0/nextflow-19.01.0-all"
        );
    }
}
