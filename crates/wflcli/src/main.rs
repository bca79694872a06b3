// crates/wflcli/src/main.rs

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;
use wflcore::{Detection, EntryKind, LaunchConfig, LaunchError, LaunchEvent, RunMessage};
use wflruntime::{LaunchArgs, LaunchPipeline, LaunchSummary, LauncherRegistry};

#[derive(Parser)]
#[command(name = "wfl")]
#[command(about = "Launch CWL, WDL and Nextflow entries locally or on a WES service", long_about = None)]
struct Cli {
    /// Config file (default: ~/.wfl/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Show debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch a registry entry or a local descriptor
    Launch(LaunchCommand),

    /// Show how a descriptor file is classified
    Detect {
        /// Descriptor to inspect
        file: PathBuf,
    },

    /// List available backends
    Backends,
}

#[derive(Args, Debug)]
struct LaunchCommand {
    /// Registry entry, as path[:version]
    #[arg(long)]
    entry: Option<String>,

    /// Local primary descriptor
    #[arg(long)]
    local_entry: Option<String>,

    /// Parameters as a JSON object or array of objects
    #[arg(long)]
    json: Option<PathBuf>,

    /// Parameters as YAML (CWL only)
    #[arg(long)]
    yaml: Option<PathBuf>,

    /// One run per row (CWL only)
    #[arg(long)]
    tsv: Option<PathBuf>,

    /// Language override: cwl, wdl or nextflow
    #[arg(long)]
    descriptor: Option<String>,

    /// tool or workflow
    #[arg(long, default_value = "workflow")]
    entry_type: EntryKind,

    /// Where WDL outputs are provisioned
    #[arg(long)]
    wdl_output_target: Option<String>,

    /// Correlation id for notifications
    #[arg(long)]
    uuid: Option<String>,

    /// Run on the WES service from the config file
    #[arg(long)]
    wes: bool,

    /// Run on this WES service
    #[arg(long)]
    wes_url: Option<String>,

    /// Runs to execute at once for multi-row parameter files
    #[arg(long)]
    parallel: Option<usize>,

    /// Kill the engine after this many seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Non-interactive mode: skip engine probes
    #[arg(long)]
    script: bool,
}

impl From<LaunchCommand> for LaunchArgs {
    fn from(cmd: LaunchCommand) -> Self {
        LaunchArgs {
            entry: cmd.entry,
            local_entry: cmd.local_entry,
            json: cmd.json,
            yaml: cmd.yaml,
            tsv: cmd.tsv,
            descriptor: cmd.descriptor,
            entry_type: cmd.entry_type,
            wdl_output_target: cmd.wdl_output_target,
            uuid: cmd.uuid,
            wes: cmd.wes,
            wes_url: cmd.wes_url,
            script: cmd.script,
            timeout: cmd.timeout.map(Duration::from_secs),
            parallel: cmd.parallel,
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Launch(cmd) => launch(cli.config, cmd).await,
        Commands::Detect { file } => detect(file).map(|_| ExitCode::SUCCESS),
        Commands::Backends => {
            list_backends();
            Ok(ExitCode::SUCCESS)
        }
    };

    match result {
        Ok(code) => code,
        Err(e) => match e.downcast_ref::<LaunchError>() {
            Some(err) => report_error(err),
            None => {
                eprintln!("Error: {:#}", e);
                ExitCode::FAILURE
            }
        },
    }
}

fn report_error(err: &LaunchError) -> ExitCode {
    eprintln!("{}: error launching entry: {}", err.category(), err);
    ExitCode::from(err.exit_code() as u8)
}

fn registry() -> LauncherRegistry {
    let mut registry = LauncherRegistry::new();
    wflbackends::register_all(&mut registry);
    registry
}

async fn launch(config_path: Option<PathBuf>, cmd: LaunchCommand) -> Result<ExitCode> {
    let config = LaunchConfig::load(config_path.as_deref())?;
    let pipeline = LaunchPipeline::new(config, Arc::new(registry()));

    let token = pipeline.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("🛑 Interrupted, stopping running engines");
            token.cancel();
        }
    });

    let events = pipeline.subscribe_events();
    let event_task = tokio::spawn(print_events(events));

    let summary = pipeline.launch_args(cmd.into()).await;

    // The bus closes with the pipeline; the listener prints what is left and stops
    drop(pipeline);
    let _ = event_task.await;

    let summary = summary?;
    print_summary(&summary);

    match summary.first_error() {
        Some(err) => Ok(report_error(err)),
        None => Ok(ExitCode::SUCCESS),
    }
}

/// Print launch events until the bus closes. Returns how many were printed.
async fn print_events(mut events: broadcast::Receiver<LaunchEvent>) -> usize {
    let mut printed = 0;
    loop {
        match events.recv().await {
            Ok(event) => {
                print_event(event);
                printed += 1;
            }
            Err(RecvError::Lagged(skipped)) => eprintln!("⚠️  Missed {} events", skipped),
            Err(RecvError::Closed) => return printed,
        }
    }
}

fn print_event(event: LaunchEvent) {
    match event {
        LaunchEvent::RunCreated { run_id, entry, row, .. } => {
            println!("▶️  Run {} for {} (row {})", run_id, entry, row);
        }
        LaunchEvent::StateChanged { run_id, to, .. } => {
            println!("  🔄 [{}] {}", run_id, to);
        }
        LaunchEvent::Executing { command, .. } => {
            println!("  ⚡ {}", command);
        }
        LaunchEvent::Message { run_id, message, .. } => match message {
            RunMessage::Info { message } => println!("     ℹ️  [{}] {}", run_id, message),
            RunMessage::Warning { message } => println!("     ⚠️  [{}] {}", run_id, message),
        },
        LaunchEvent::RunFinished { run_id, success, duration_ms, .. } => {
            if success {
                println!("✨ Run {} finished in {}ms", run_id, duration_ms);
            } else {
                println!("💥 Run {} failed after {}ms", run_id, duration_ms);
            }
        }
    }
}

fn print_summary(summary: &LaunchSummary) {
    println!();
    println!("📊 Launch Summary:");
    println!("   Language: {}", summary.language);
    println!("   Backend: {}", summary.backend);
    for run in &summary.runs {
        let status = if run.succeeded() { "✅" } else { "❌" };
        println!("   {} Row {}: {} ({}ms)", status, run.row, run.state, run.duration_ms);
        if let Some(dir) = &run.working_dir {
            println!("      Working directory: {}", dir.display());
        }
        if let Some(id) = &run.remote_run_id {
            println!("      Remote run id: {}", id);
        }
        if let Some(outputs) = &run.outputs {
            for transfer in &outputs.succeeded {
                println!("      📤 {} -> {}", transfer.name, transfer.destination.url);
            }
            for failure in &outputs.failed {
                println!("      ⚠️  {}", failure);
            }
        }
    }
}

fn detect(file: PathBuf) -> Result<()> {
    println!("🔍 Inspecting: {}", file.display());
    let detection = Detection::of_file(&file)?;
    println!("   Extension: {}", detection.extension);
    println!("   Content: {}", detection.content);

    match detection.resolve(&file.display().to_string(), None) {
        Ok(language) => println!("✅ Launches as {}", language),
        Err(e) => println!("⚠️  {}", e),
    }
    Ok(())
}

fn list_backends() {
    println!("📦 Available Backends:");
    println!();

    let registry = registry();
    for backend in registry.list_backends() {
        if let Some(metadata) = registry.get_metadata(backend) {
            let languages: Vec<String> = metadata.languages.iter().map(|l| l.to_string()).collect();
            println!("  • {} ({})", backend, languages.join(", "));
            println!("    {}", metadata.description);
        } else {
            println!("  • {}", backend);
        }
    }
}
