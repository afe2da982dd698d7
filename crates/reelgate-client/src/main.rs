//! `reelgate` caller CLI.
//!
//! Submits a job through the gateway and optionally follows it to a
//! terminal state, printing progress along the way.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use tokio::task::JoinHandle;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use reelgate_client::{
    HttpBackendConfig, HttpJobBackend, JobBackend, PollOutcome, PollerConfig, SubmissionError,
    TaskStatusPoller, TaskSubmitter,
};
use reelgate_models::{AdmissionDecision, TaskId, TaskStatus};

#[derive(Parser)]
#[command(name = "reelgate", version, about = "Start and follow video generation jobs")]
struct Cli {
    /// Gateway base URL
    #[arg(long, env = "REELGATE_API_URL", default_value = "http://localhost:8000")]
    api_url: String,

    /// Bearer token for the identity provider
    #[arg(long, env = "REELGATE_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 10)]
    timeout_secs: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start a job for a source URL
    Submit {
        /// Source post URL
        source: String,

        /// Poll until the job finishes
        #[arg(long)]
        wait: bool,

        /// Delay between status queries in milliseconds
        #[arg(long, default_value_t = 2000)]
        interval_ms: u64,

        /// Give up after this many consecutive failed status queries
        #[arg(long)]
        give_up_after: Option<u32>,
    },
    /// Show the current status of a task
    Status {
        task_id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();
    let config = HttpBackendConfig::gateway(&cli.api_url, cli.token.clone())
        .with_timeout(Duration::from_secs(cli.timeout_secs));
    let backend: Arc<dyn JobBackend> =
        Arc::new(HttpJobBackend::new(config).context("Failed to build HTTP client")?);

    match cli.command {
        Command::Submit {
            source,
            wait,
            interval_ms,
            give_up_after,
        } => {
            let submitter = TaskSubmitter::new(Arc::clone(&backend));
            let submission = match submitter.submit(&source).await {
                Ok(s) => s,
                Err(SubmissionError::AdmissionDenied(decision)) => {
                    print_admission(&decision);
                    bail!("Job quota exceeded; next slot frees at {}", decision.reset_at);
                }
                Err(e) => return Err(e.into()),
            };

            println!("task_id: {}", submission.task_id);
            if let Some(decision) = &submission.admission {
                print_admission(decision);
            }

            if wait {
                let config = PollerConfig::default()
                    .with_interval(Duration::from_millis(interval_ms))
                    .with_give_up_after(give_up_after);
                follow(backend, config, submission.task_id, tokio::signal::ctrl_c()).await?;
            }
        }
        Command::Status { task_id } => {
            let record = backend
                .get_status(&TaskId::from(task_id))
                .await
                .context("Status query failed")?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
    }

    Ok(())
}

fn print_admission(decision: &AdmissionDecision) {
    println!(
        "quota: {}/{} remaining, resets at {}",
        decision.remaining, decision.limit, decision.reset_at
    );
}

/// How long the progress printer gets to flush after polling ends.
const PRINTER_GRACE: Duration = Duration::from_secs(1);

/// Follow a task until it finishes or `interrupt` resolves.
async fn follow<F>(
    backend: Arc<dyn JobBackend>,
    config: PollerConfig,
    task_id: TaskId,
    interrupt: F,
) -> anyhow::Result<()>
where
    F: Future,
{
    let handle = TaskStatusPoller::new(backend, config).spawn(task_id.clone());
    let mut updates = handle.subscribe();

    let printer = tokio::spawn(async move {
        let mut last_status: Option<String> = None;
        while updates.changed().await.is_ok() {
            let snapshot = updates.borrow_and_update().clone();
            if let Some(record) = &snapshot.latest {
                let status = record.status.as_str().to_string();
                if last_status.as_deref() != Some(status.as_str()) {
                    match &record.status {
                        TaskStatus::InProgress(tag) => {
                            eprintln!("status: {} ({})", tag, tag.description())
                        }
                        other => eprintln!("status: {}", other),
                    }
                    last_status = Some(status);
                }
            }
            if snapshot.consecutive_failures > 0 {
                eprintln!(
                    "status query failed ({} in a row): {}",
                    snapshot.consecutive_failures,
                    snapshot.last_error.as_deref().unwrap_or("unknown error")
                );
            }
            if snapshot.state.is_final() {
                break;
            }
        }
    });

    let outcome = tokio::select! {
        outcome = handle.wait() => outcome,
        _ = interrupt => {
            // The pending wait future owns the handle; dropping it cancels polling.
            printer.abort();
            return Err(anyhow!(
                "Interrupted; task {} keeps running on the backend",
                task_id
            ));
        }
    };
    finish_printer(printer).await;

    match outcome {
        PollOutcome::Completed(record) => match record.result_url {
            Some(url) => println!("video: {}", url),
            None => bail!("Task completed but no video URL was returned"),
        },
        PollOutcome::Failed { error, .. } => bail!("Task failed: {}", error),
        PollOutcome::Abandoned { reason, .. } => bail!("Stopped polling: {:?}", reason),
    }
    Ok(())
}

/// Let the printer report the final snapshot, then stop it.
async fn finish_printer(mut printer: JoinHandle<()>) {
    if tokio::time::timeout(PRINTER_GRACE, &mut printer).await.is_err() {
        printer.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use reelgate_client::{BackendResult, Submission};
    use reelgate_models::TaskRecord;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    struct StuckBackend {
        queries: AtomicU32,
    }

    #[async_trait]
    impl JobBackend for StuckBackend {
        async fn submit(&self, _source_reference: &str) -> BackendResult<Submission> {
            Ok(Submission::new(TaskId::from("task-1")))
        }

        async fn get_status(&self, task_id: &TaskId) -> BackendResult<TaskRecord> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            Ok(TaskRecord::new(
                task_id.clone(),
                TaskStatus::in_progress("rendering"),
            ))
        }
    }

    fn fast_polling() -> PollerConfig {
        PollerConfig::default().with_interval(Duration::from_millis(100))
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_is_an_error() {
        let backend = Arc::new(StuckBackend {
            queries: AtomicU32::new(0),
        });

        let result = follow(
            backend.clone(),
            fast_polling(),
            TaskId::from("task-1"),
            tokio::time::sleep(Duration::from_millis(450)),
        )
        .await;

        let err = result.unwrap_err().to_string();
        assert!(err.contains("Interrupted"), "{err}");
        assert!(err.contains("task-1"), "{err}");
        assert!(backend.queries.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_printer_gets_to_finish() {
        let printed = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&printed);
        let printer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            flag.store(true, Ordering::SeqCst);
        });

        finish_printer(printer).await;
        assert!(printed.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_printer_is_stopped() {
        let printer = tokio::spawn(std::future::pending::<()>());
        finish_printer(printer).await;
    }
}
