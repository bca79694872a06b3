use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use wflcore::{ExecutionOutput, LaunchContext, LaunchError, Result};

/// Trailing stderr lines repeated in the debug log
const STDERR_ECHO_LINES: usize = 10;

enum Ending {
    Exited(std::io::Result<ExitStatus>),
    TimedOut(Duration),
    Cancelled,
}

/// Run an engine to completion, capturing both streams in full.
///
/// A non-zero exit comes back as an unsuccessful `ExecutionOutput`. `Err` means
/// the process never started, or was killed by timeout or cancellation.
pub async fn run_process(
    program: &str,
    args: &[String],
    working_dir: &Path,
    ctx: &LaunchContext,
) -> Result<ExecutionOutput> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    ctx.events.info(format!("▶️  Starting {}", program));
    tracing::debug!("Spawning {} {:?} in {}", program, args, working_dir.display());

    let mut child = cmd
        .spawn()
        .map_err(|e| LaunchError::execution(format!("failed to start {}: {}", program, e)))?;

    // Read on separate tasks so a chatty engine never blocks on a full pipe
    let stdout_task = tokio::spawn(read_all(child.stdout.take()));
    let stderr_task = tokio::spawn(read_all(child.stderr.take()));

    let started = Instant::now();
    let deadline = async {
        match ctx.timeout {
            Some(limit) => {
                tokio::time::sleep(limit).await;
                limit
            }
            None => std::future::pending().await,
        }
    };

    let ending = tokio::select! {
        status = child.wait() => Ending::Exited(status),
        limit = deadline => Ending::TimedOut(limit),
        _ = ctx.cancellation.cancelled() => Ending::Cancelled,
    };

    let status = match ending {
        Ending::Exited(status) => status.map_err(|e| {
            LaunchError::execution(format!("failed to wait for {}: {}", program, e))
        })?,
        Ending::TimedOut(limit) => {
            ctx.events.warn(format!("⏱️  {} timed out after {}s, killing it", program, limit.as_secs()));
            let _ = child.kill().await;
            return Err(LaunchError::Cancelled {
                seconds: limit.as_secs(),
            });
        }
        Ending::Cancelled => {
            ctx.events.warn(format!("🛑 {} cancelled, killing it", program));
            let _ = child.kill().await;
            return Err(LaunchError::Cancelled {
                seconds: started.elapsed().as_secs(),
            });
        }
    };

    let stdout = stdout_task.await.unwrap_or_default();
    let stderr = stderr_task.await.unwrap_or_default();

    let lines: Vec<&str> = stderr.lines().collect();
    for line in &lines[lines.len().saturating_sub(STDERR_ECHO_LINES)..] {
        tracing::debug!("{} stderr: {}", program, line);
    }

    let output = ExecutionOutput::from_process(stdout, stderr, status.code());
    if output.success {
        ctx.events.info(format!("✅ {} completed", program));
    } else {
        ctx.events.warn(format!(
            "⚠️  {} exited with code {}",
            program,
            status.code().map(|c| c.to_string()).unwrap_or_else(|| "none".to_string())
        ));
    }
    Ok(output)
}

async fn read_all<R: AsyncRead + Unpin>(reader: Option<R>) -> String {
    let mut data = Vec::new();
    if let Some(mut reader) = reader {
        let _ = reader.read_to_end(&mut data).await;
    }
    String::from_utf8_lossy(&data).into_owned()
}
