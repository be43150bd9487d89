//! Poller-side scheduler: tracks when each assigned monitor is next due and
//! dispatches due checks to a runner, forwarding every outcome to a sink.
use async_trait::async_trait;
use chrono::Utc;
use futures_util::future::join_all;
use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{Id, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::executor::{CheckExecutor, ExecutionError};
use crate::models::{Assignment, CheckResult, CheckStatus, ResultRecord};

#[async_trait]
pub trait AssignmentRunner: Send + Sync + 'static {
    async fn run(&self, assignment: &Assignment) -> Result<CheckResult, ExecutionError>;
}

#[async_trait]
impl AssignmentRunner for CheckExecutor {
    async fn run(&self, assignment: &Assignment) -> Result<CheckResult, ExecutionError> {
        self.execute(assignment).await
    }
}

pub trait ResultSink: Send + Sync + 'static {
    fn push(&self, record: ResultRecord);
}

/// Bounded FIFO of results waiting for the next heartbeat. When full the
/// oldest record is dropped.
pub struct ResultQueue {
    capacity: usize,
    records: Mutex<VecDeque<ResultRecord>>,
}

impl ResultQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            records: Mutex::new(VecDeque::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<ResultRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn drain(&self) -> Vec<ResultRecord> {
        self.lock().drain(..).collect()
    }

    /// Puts undelivered records back in front of anything queued since.
    pub fn requeue(&self, records: Vec<ResultRecord>) {
        let mut queue = self.lock();
        for record in records.into_iter().rev() {
            queue.push_front(record);
        }
        let overflow = queue.len().saturating_sub(self.capacity);
        if overflow > 0 {
            queue.drain(..overflow);
            warn!(dropped = overflow, "Result queue full, dropped oldest results.");
        }
    }
}

impl ResultSink for ResultQueue {
    fn push(&self, record: ResultRecord) {
        let mut queue = self.lock();
        if queue.len() >= self.capacity {
            queue.pop_front();
            warn!(capacity = self.capacity, "Result queue full, dropped oldest result.");
        }
        queue.push_back(record);
    }
}

/// Execution errors are recorded as DOWN with the error flagged, never dropped.
pub fn result_record(monitor_id: i64, outcome: Result<CheckResult, ExecutionError>) -> ResultRecord {
    match outcome {
        Ok(result) => ResultRecord {
            monitor_id,
            status: result.status,
            message: result.message,
            latency_ms: result.latency_ms,
            execution_error: false,
            checked_at: Utc::now(),
        },
        Err(e) => ResultRecord {
            monitor_id,
            status: CheckStatus::Down,
            message: e.to_string(),
            latency_ms: None,
            execution_error: true,
            checked_at: Utc::now(),
        },
    }
}

async fn execute_one<R: AssignmentRunner>(runner: &R, assignment: &Assignment) -> ResultRecord {
    let outcome = runner.run(assignment).await;
    if let Err(e) = &outcome {
        debug!(monitor_id = assignment.monitor_id, error = %e, "Check could not be executed.");
    }
    result_record(assignment.monitor_id, outcome)
}

fn interval_of(assignment: &Assignment) -> Duration {
    Duration::from_secs(assignment.interval.max(1))
}

pub struct Scheduler<R: AssignmentRunner, S: ResultSink> {
    runner: Arc<R>,
    sink: Arc<S>,
    assignments: Vec<Assignment>,
    next_due: HashMap<i64, Instant>,
    in_flight: HashSet<i64>,
}

impl<R: AssignmentRunner, S: ResultSink> Scheduler<R, S> {
    pub fn new(runner: Arc<R>, sink: Arc<S>) -> Self {
        Self {
            runner,
            sink,
            assignments: Vec::new(),
            next_due: HashMap::new(),
            in_flight: HashSet::new(),
        }
    }

    pub fn assignments(&self) -> &[Assignment] {
        &self.assignments
    }

    /// Replaces the list wholesale. Removed monitors lose their due state; new
    /// ones are due immediately.
    pub fn update_assignments(&mut self, assignments: Vec<Assignment>) {
        let now = Instant::now();
        let ids: HashSet<i64> = assignments.iter().map(|a| a.monitor_id).collect();
        self.next_due.retain(|id, _| ids.contains(id));
        for id in &ids {
            self.next_due.entry(*id).or_insert(now);
        }
        info!(count = assignments.len(), "Assignment list replaced.");
        self.assignments = assignments;
    }

    /// Due, idle assignments, marked in flight.
    fn take_due(&mut self, now: Instant) -> Vec<Assignment> {
        let due: Vec<Assignment> = self
            .assignments
            .iter()
            .filter(|a| !self.in_flight.contains(&a.monitor_id))
            .filter(|a| self.next_due.get(&a.monitor_id).is_none_or(|due| *due <= now))
            .cloned()
            .collect();
        for assignment in &due {
            self.in_flight.insert(assignment.monitor_id);
        }
        due
    }

    fn complete(&mut self, record: ResultRecord) {
        let monitor_id = record.monitor_id;
        self.in_flight.remove(&monitor_id);
        if let Some(assignment) = self.assignments.iter().find(|a| a.monitor_id == monitor_id) {
            self.next_due.insert(monitor_id, Instant::now() + interval_of(assignment));
        }
        self.sink.push(record);
    }

    /// Runs every due assignment concurrently and waits for all of them.
    /// Returns how many ran.
    pub async fn tick(&mut self) -> usize {
        let due = self.take_due(Instant::now());
        let count = due.len();
        let runner = Arc::clone(&self.runner);
        let records = join_all(due.iter().map(|assignment| execute_one(runner.as_ref(), assignment))).await;
        for record in records {
            self.complete(record);
        }
        count
    }

    /// Long-lived loop. Due checks run as independent tasks so a slow probe
    /// never holds up the others; completions are folded back here.
    pub async fn run<F>(mut self, tick_every: Duration, mut updates: watch::Receiver<Vec<Assignment>>, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(tick_every.max(Duration::from_millis(10)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut running: JoinSet<ResultRecord> = JoinSet::new();
        let mut task_monitors: HashMap<Id, i64> = HashMap::new();
        let mut updates_open = true;
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!(in_flight = running.len(), "Scheduler shutting down.");
                    break;
                }
                changed = updates.changed(), if updates_open => {
                    if changed.is_err() {
                        warn!("Assignment channel closed, keeping the current list.");
                        updates_open = false;
                    } else {
                        let assignments = updates.borrow_and_update().clone();
                        self.update_assignments(assignments);
                    }
                }
                _ = ticker.tick() => {
                    for assignment in self.take_due(Instant::now()) {
                        let runner = Arc::clone(&self.runner);
                        let monitor_id = assignment.monitor_id;
                        let handle = running.spawn(async move { execute_one(runner.as_ref(), &assignment).await });
                        task_monitors.insert(handle.id(), monitor_id);
                    }
                }
                Some(joined) = running.join_next_with_id(), if !running.is_empty() => {
                    match joined {
                        Ok((id, record)) => {
                            task_monitors.remove(&id);
                            self.complete(record);
                        }
                        Err(e) => {
                            if let Some(monitor_id) = task_monitors.remove(&e.id()) {
                                warn!(monitor_id = monitor_id, error = %e, "Check task failed.");
                                self.complete(result_record(
                                    monitor_id,
                                    Err(ExecutionError::Transport(format!("Check task failed: {e}"))),
                                ));
                            }
                        }
                    }
                }
            }
        }
        running.shutdown().await;
    }
}
