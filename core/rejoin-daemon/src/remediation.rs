//! Bounded remediation pool.
//!
//! A single timer thread holds accepted jobs until their due time, then hands
//! them to a fixed set of worker threads that run stop, settle, start. Jobs are
//! never cancelled: shutting the pool down only stops new submissions, and
//! queued jobs still run if the process stays alive long enough.

use chrono::Utc;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::io;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::accounts::Account;
use crate::executor::SessionExecutor;
use crate::state::MonitorStore;

#[derive(Debug, Clone)]
pub struct RemediationJob {
    pub account: Account,
    pub due: Instant,
    pub first: bool,
    pub reason: String,
}

struct Pending {
    seq: u64,
    job: RemediationJob,
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    fn cmp(&self, other: &Self) -> Ordering {
        self.job
            .due
            .cmp(&other.job.due)
            .then(self.seq.cmp(&other.seq))
    }
}

pub struct RemediationPool {
    sender: Sender<RemediationJob>,
}

impl RemediationPool {
    pub fn start(
        workers: usize,
        settle: Duration,
        executor: Arc<dyn SessionExecutor>,
        store: Arc<MonitorStore>,
    ) -> io::Result<Self> {
        let (sender, receiver) = mpsc::channel::<RemediationJob>();
        let (work_tx, work_rx) = mpsc::channel::<RemediationJob>();
        let work_rx = Arc::new(Mutex::new(work_rx));

        for index in 0..workers.max(1) {
            let work_rx = Arc::clone(&work_rx);
            let executor = Arc::clone(&executor);
            let store = Arc::clone(&store);
            thread::Builder::new()
                .name(format!("remediate-{}", index))
                .spawn(move || worker_loop(work_rx, executor, store, settle))?;
        }

        thread::Builder::new()
            .name("remediate-timer".to_string())
            .spawn(move || timer_loop(receiver, work_tx))?;

        Ok(Self { sender })
    }

    /// Queues a job. Hands the job back if the pool has shut down.
    pub fn submit(&self, job: RemediationJob) -> Result<(), RemediationJob> {
        self.sender.send(job).map_err(|err| err.0)
    }
}

fn timer_loop(receiver: Receiver<RemediationJob>, work_tx: Sender<RemediationJob>) {
    let mut pending: BinaryHeap<Reverse<Pending>> = BinaryHeap::new();
    let mut next_seq: u64 = 0;
    let mut closed = false;

    loop {
        let wait = pending
            .peek()
            .map(|Reverse(next)| next.job.due.saturating_duration_since(Instant::now()));

        match (closed, wait) {
            (true, None) => break,
            (true, Some(wait)) => thread::sleep(wait),
            (false, None) => match receiver.recv() {
                Ok(job) => {
                    pending.push(Reverse(Pending { seq: next_seq, job }));
                    next_seq += 1;
                }
                Err(_) => closed = true,
            },
            (false, Some(wait)) => match receiver.recv_timeout(wait) {
                Ok(job) => {
                    pending.push(Reverse(Pending { seq: next_seq, job }));
                    next_seq += 1;
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => closed = true,
            },
        }

        let now = Instant::now();
        while pending
            .peek()
            .map_or(false, |Reverse(next)| next.job.due <= now)
        {
            let Some(Reverse(ready)) = pending.pop() else {
                break;
            };
            if work_tx.send(ready.job).is_err() {
                warn!("Remediation workers gone; dropping pending jobs");
                return;
            }
        }
    }
    debug!("Remediation timer stopped");
}

fn worker_loop(
    work_rx: Arc<Mutex<Receiver<RemediationJob>>>,
    executor: Arc<dyn SessionExecutor>,
    store: Arc<MonitorStore>,
    settle: Duration,
) {
    loop {
        let next = {
            let receiver = work_rx
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            receiver.recv()
        };
        let Ok(job) = next else {
            break;
        };
        execute(&job, executor.as_ref(), &store, settle);
    }
}

/// Runs one stop/settle/start cycle. Both steps are best-effort; the attempt
/// is recorded as complete either way.
pub fn execute(
    job: &RemediationJob,
    executor: &dyn SessionExecutor,
    store: &MonitorStore,
    settle: Duration,
) {
    let account = &job.account;
    info!(
        account = %account.id,
        package = %account.package(),
        reason = %job.reason,
        first = job.first,
        "Remediation starting"
    );

    if let Err(err) = executor.stop(account) {
        warn!(account = %account.id, error = %err, "Stop failed; launching anyway");
    }
    if !settle.is_zero() {
        thread::sleep(settle);
    }
    match executor.start(account) {
        Ok(method) => info!(account = %account.id, method = ?method, "Session relaunched"),
        Err(err) => warn!(account = %account.id, error = %err, "Relaunch failed"),
    }

    store.complete_remediation(&account.id, Utc::now());
}


#[cfg(test)]
mod tests {
    use super::testing::{Call, RecordingExecutor};
    use super::*;
    use rejoin_protocol::AccountEntry;
    use std::path::Path;

    fn job(id: &str, due: Instant) -> RemediationJob {
        RemediationJob {
            account: Account::new(id, AccountEntry::new("com.roblox.client", "1"), Path::new("/tmp")),
            due,
            first: true,
            reason: "test".to_string(),
        }
    }

    #[test]
    fn execute_records_completion_even_when_stop_fails() {
        let store = MonitorStore::new(["u1"]);
        store.try_begin_dispatch("u1", Utc::now(), Duration::from_secs(20));
        let executor = RecordingExecutor {
            fail_stop: true,
            ..RecordingExecutor::default()
        };

        execute(&job("u1", Instant::now()), &executor, &store, Duration::ZERO);

        assert_eq!(
            executor.calls(),
            vec![Call::Stop("u1".to_string()), Call::Start("u1".to_string())]
        );
        let state = store.get("u1").expect("state");
        assert!(state.first_remediation_done);
        assert!(!state.in_flight);
        assert_eq!(state.remediation_count, 1);
    }

    #[test]
    fn pool_runs_jobs_in_due_order() {
        let store = Arc::new(MonitorStore::new(["late", "early"]));
        let executor = Arc::new(RecordingExecutor::default());
        let pool = RemediationPool::start(
            1,
            Duration::ZERO,
            Arc::clone(&executor) as Arc<dyn SessionExecutor>,
            Arc::clone(&store),
        )
        .expect("start pool");

        let now = Instant::now();
        pool.submit(job("late", now + Duration::from_millis(150)))
            .expect("submit late");
        pool.submit(job("early", now + Duration::from_millis(20)))
            .expect("submit early");

        let calls = executor.wait_for_calls(4, Duration::from_secs(5));
        assert_eq!(
            calls,
            vec![
                Call::Stop("early".to_string()),
                Call::Start("early".to_string()),
                Call::Stop("late".to_string()),
                Call::Start("late".to_string()),
            ]
        );
    }

    #[test]
    fn pool_waits_until_due() {
        let store = Arc::new(MonitorStore::new(["u1"]));
        let executor = Arc::new(RecordingExecutor::default());
        let pool = RemediationPool::start(
            2,
            Duration::ZERO,
            Arc::clone(&executor) as Arc<dyn SessionExecutor>,
            Arc::clone(&store),
        )
        .expect("start pool");

        let submitted = Instant::now();
        pool.submit(job("u1", submitted + Duration::from_millis(100)))
            .expect("submit");
        executor.wait_for_calls(1, Duration::from_secs(5));

        let calls = executor.calls.lock().expect("calls lock");
        let (_, stopped_at) = calls.first().expect("stop call");
        assert!(stopped_at.duration_since(submitted) >= Duration::from_millis(100));
    }
}
