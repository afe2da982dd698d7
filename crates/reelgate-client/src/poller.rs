//! Task status polling.
//!
//! One independent, cancellable loop per task. The loop queries the backend
//! at a fixed interval, adopts each reported snapshot, and stops at the first
//! terminal status. Query failures never end the loop on their own; they are
//! counted and retried at the next tick.
//!
//! The backend's transient sub-statuses are carried along for display but
//! never change what the loop does next.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use reelgate_models::{TaskId, TaskRecord, TaskStatus};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::JobBackend;
use crate::error::{BackendError, BackendResult};
use crate::failure::FailureTracker;

pub const POLL_QUERIES_TOTAL: &str = "reelgate_poll_queries_total";
pub const POLL_QUERY_FAILURES_TOTAL: &str = "reelgate_poll_query_failures_total";

/// Poller lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PollState {
    /// No task yet
    #[default]
    Idle,
    /// Task submitted, waiting for a terminal status
    Polling,
    /// Backend reported `completed`
    Completed,
    /// Backend reported `failed`
    Failed,
    /// Caller stopped caring, or the give-up policy fired
    Abandoned,
}

impl PollState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PollState::Idle => "idle",
            PollState::Polling => "polling",
            PollState::Completed => "completed",
            PollState::Failed => "failed",
            PollState::Abandoned => "abandoned",
        }
    }

    /// No further queries will be issued from this state.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            PollState::Completed | PollState::Failed | PollState::Abandoned
        )
    }
}

impl fmt::Display for PollState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Delay policy between queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backoff {
    /// Always wait `interval`
    #[default]
    Fixed,
    /// Double the interval per consecutive failure, capped at `max`
    Exponential { max: Duration },
}

/// Poller configuration.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Base delay between queries
    pub interval: Duration,
    /// Upper bound on one status query
    pub query_timeout: Duration,
    /// Delay policy
    pub backoff: Backoff,
    /// Abandon after this many consecutive query failures; `None` polls forever
    pub give_up_after: Option<u32>,
    /// Consecutive failures logged before log suppression kicks in
    pub max_logged_failures: u32,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            query_timeout: Duration::from_secs(5),
            backoff: Backoff::Fixed,
            give_up_after: None,
            max_logged_failures: 5,
        }
    }
}

impl PollerConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_give_up_after(mut self, failures: Option<u32>) -> Self {
        self.give_up_after = failures;
        self
    }

    /// Delay before the next query.
    pub fn delay_for(&self, consecutive_failures: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.interval,
            Backoff::Exponential { max } => {
                let factor = 2u32.saturating_pow(consecutive_failures.min(16));
                self.interval.saturating_mul(factor).min(max)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbandonReason {
    /// The caller cancelled or dropped its handle
    Cancelled,
    /// `give_up_after` consecutive query failures
    TooManyFailures(u32),
    /// The polling task itself died
    Aborted,
}

/// How a poll ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Completed(TaskRecord),
    Failed {
        record: TaskRecord,
        error: String,
    },
    Abandoned {
        reason: AbandonReason,
        latest: Option<TaskRecord>,
    },
}

impl PollOutcome {
    pub fn state(&self) -> PollState {
        match self {
            PollOutcome::Completed(_) => PollState::Completed,
            PollOutcome::Failed { .. } => PollState::Failed,
            PollOutcome::Abandoned { .. } => PollState::Abandoned,
        }
    }

    /// Location of the finished video, if the task completed with one.
    pub fn result_url(&self) -> Option<&str> {
        match self {
            PollOutcome::Completed(record) => record.result_url.as_deref(),
            _ => None,
        }
    }
}

/// What the caller can observe while a poll is running.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollSnapshot {
    pub state: PollState,
    pub task_id: Option<TaskId>,
    /// Last snapshot the backend returned
    pub latest: Option<TaskRecord>,
    /// Status queries issued so far
    pub queries: u32,
    pub consecutive_failures: u32,
    pub total_failures: u32,
    pub last_error: Option<String>,
}

/// Result of feeding one query result into the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStep {
    /// Keep polling at the next interval
    Continue,
    /// Stop; the outcome is final
    Done(PollOutcome),
    /// The machine was not polling; the result was discarded
    Ignored,
}

/// Pure poll state machine, independent of timers and I/O.
#[derive(Debug, Clone)]
pub struct PollMachine {
    snapshot: PollSnapshot,
    failures: FailureTracker,
    give_up_after: Option<u32>,
    max_logged_failures: u32,
}

impl PollMachine {
    pub fn new(config: &PollerConfig) -> Self {
        Self {
            snapshot: PollSnapshot::default(),
            failures: FailureTracker::new(config.max_logged_failures),
            give_up_after: config.give_up_after,
            max_logged_failures: config.max_logged_failures,
        }
    }

    pub fn snapshot(&self) -> &PollSnapshot {
        &self.snapshot
    }

    pub fn state(&self) -> PollState {
        self.snapshot.state
    }

    /// Idle -> Polling for a freshly submitted task.
    pub fn start(&mut self, task_id: TaskId) {
        self.snapshot = PollSnapshot {
            state: PollState::Polling,
            task_id: Some(task_id),
            ..Default::default()
        };
        self.failures = FailureTracker::new(self.max_logged_failures);
    }

    /// Apply the result of one status query.
    pub fn apply(&mut self, result: BackendResult<TaskRecord>) -> PollStep {
        if self.snapshot.state != PollState::Polling {
            return PollStep::Ignored;
        }
        self.snapshot.queries += 1;

        match result {
            Ok(record) => {
                self.failures.record_success();
                self.snapshot.consecutive_failures = 0;
                self.snapshot.last_error = None;
                self.snapshot.latest = Some(record.clone());

                match &record.status {
                    TaskStatus::Completed => {
                        self.snapshot.state = PollState::Completed;
                        PollStep::Done(PollOutcome::Completed(record))
                    }
                    TaskStatus::Failed => {
                        self.snapshot.state = PollState::Failed;
                        let error = record
                            .error
                            .clone()
                            .unwrap_or_else(|| "Video generation failed".to_string());
                        PollStep::Done(PollOutcome::Failed { record, error })
                    }
                    TaskStatus::InProgress(_) => PollStep::Continue,
                }
            }
            Err(e) => {
                let should_log = self.failures.record_failure();
                self.snapshot.consecutive_failures = self.failures.consecutive();
                self.snapshot.total_failures = self.failures.total();
                if should_log {
                    warn!(
                        task_id = ?self.snapshot.task_id,
                        consecutive = self.snapshot.consecutive_failures,
                        error = %e,
                        "Status query failed, retrying at next interval"
                    );
                }
                self.snapshot.last_error = Some(e.to_string());

                match self.give_up_after {
                    Some(limit) if self.snapshot.consecutive_failures >= limit => {
                        self.snapshot.state = PollState::Abandoned;
                        PollStep::Done(PollOutcome::Abandoned {
                            reason: AbandonReason::TooManyFailures(limit),
                            latest: self.snapshot.latest.clone(),
                        })
                    }
                    _ => PollStep::Continue,
                }
            }
        }
    }

    /// Polling -> Abandoned on caller request. A no-op once final.
    pub fn abandon(&mut self, reason: AbandonReason) -> PollOutcome {
        if !self.snapshot.state.is_final() {
            self.snapshot.state = PollState::Abandoned;
        }
        PollOutcome::Abandoned {
            reason,
            latest: self.snapshot.latest.clone(),
        }
    }
}

/// Spawns poll loops against a job backend.
#[derive(Clone)]
pub struct TaskStatusPoller {
    backend: Arc<dyn JobBackend>,
    config: PollerConfig,
}

impl TaskStatusPoller {
    pub fn new(backend: Arc<dyn JobBackend>, config: PollerConfig) -> Self {
        Self { backend, config }
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    /// Start polling `task_id` on the current runtime.
    ///
    /// Dropping the returned handle cancels the loop.
    pub fn spawn(&self, task_id: TaskId) -> PollHandle {
        let mut machine = PollMachine::new(&self.config);
        machine.start(task_id.clone());

        let (tx, rx) = watch::channel(machine.snapshot().clone());
        let cancel = CancellationToken::new();

        let join = tokio::spawn(run_poll_loop(
            Arc::clone(&self.backend),
            self.config.clone(),
            machine,
            cancel.clone(),
            tx,
        ));

        PollHandle {
            task_id,
            cancel,
            updates: rx,
            join: Some(join),
        }
    }
}

async fn run_poll_loop(
    backend: Arc<dyn JobBackend>,
    config: PollerConfig,
    mut machine: PollMachine,
    cancel: CancellationToken,
    tx: watch::Sender<PollSnapshot>,
) -> PollOutcome {
    let Some(task_id) = machine.snapshot().task_id.clone() else {
        return machine.abandon(AbandonReason::Aborted);
    };
    info!(task_id = %task_id, "Polling task status");

    loop {
        let delay = config.delay_for(machine.snapshot().consecutive_failures);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return finish_cancelled(&mut machine, &tx, &task_id),
            _ = tokio::time::sleep(delay) => {}
        }

        counter!(POLL_QUERIES_TOTAL).increment(1);
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return finish_cancelled(&mut machine, &tx, &task_id),
            result = tokio::time::timeout(config.query_timeout, backend.get_status(&task_id)) => {
                result.unwrap_or_else(|_| {
                    Err(BackendError::Timeout(config.query_timeout.as_millis() as u64))
                })
            }
        };

        if let Err(e) = &result {
            counter!(POLL_QUERY_FAILURES_TOTAL, "kind" => e.kind()).increment(1);
        }

        let step = machine.apply(result);
        tx.send_replace(machine.snapshot().clone());

        match step {
            PollStep::Continue => {
                if let Some(record) = &machine.snapshot().latest {
                    debug!(task_id = %task_id, status = %record.status, "Task still running");
                }
            }
            PollStep::Done(outcome) => {
                info!(task_id = %task_id, state = %outcome.state(), "Polling finished");
                return outcome;
            }
            PollStep::Ignored => return machine.abandon(AbandonReason::Aborted),
        }
    }
}

fn finish_cancelled(
    machine: &mut PollMachine,
    tx: &watch::Sender<PollSnapshot>,
    task_id: &TaskId,
) -> PollOutcome {
    let outcome = machine.abandon(AbandonReason::Cancelled);
    tx.send_replace(machine.snapshot().clone());
    info!(task_id = %task_id, "Polling cancelled");
    outcome
}

/// Caller's handle on a running poll loop.
pub struct PollHandle {
    task_id: TaskId,
    cancel: CancellationToken,
    updates: watch::Receiver<PollSnapshot>,
    join: Option<JoinHandle<PollOutcome>>,
}

impl PollHandle {
    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    /// Stop the loop. No query is issued after this returns.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Latest observable state.
    pub fn snapshot(&self) -> PollSnapshot {
        self.updates.borrow().clone()
    }

    /// Receiver notified on every state change.
    pub fn subscribe(&self) -> watch::Receiver<PollSnapshot> {
        self.updates.clone()
    }

    /// Wait for the loop to finish.
    pub async fn wait(mut self) -> PollOutcome {
        let latest = self.snapshot().latest;
        match self.join.take() {
            Some(join) => match join.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(task_id = %self.task_id, error = %e, "Poll loop aborted");
                    PollOutcome::Abandoned {
                        reason: AbandonReason::Aborted,
                        latest,
                    }
                }
            },
            None => PollOutcome::Abandoned {
                reason: AbandonReason::Aborted,
                latest,
            },
        }
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
