use crate::{
    models::{ApiError, RunReport},
    pipeline::Pipeline,
};
use serde::Serialize;
use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::Duration,
};
use tokio::{
    sync::{Mutex, mpsc},
    task::JoinHandle,
    time::{MissedTickBehavior, interval},
};
use tracing::{info, warn};
use uuid::Uuid;

/// Background runner for normalization passes. Runs are executed one at a
/// time in submission order, so two passes never select the same batch.
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<Job>,
    statuses: Arc<Mutex<JobBook>>,
}

/// Job states by id. Queued and running jobs are always kept; finished ones
/// are evicted oldest first once more than `history` have accumulated.
struct JobBook {
    states: HashMap<Uuid, JobState>,
    finished: VecDeque<Uuid>,
    history: usize,
}

impl JobBook {
    fn new(history: usize) -> Self {
        Self {
            states: HashMap::new(),
            finished: VecDeque::new(),
            history,
        }
    }

    fn set(&mut self, id: Uuid, state: JobState) {
        self.states.insert(id, state);
    }

    fn finish(&mut self, id: Uuid, state: JobState) {
        self.states.insert(id, state);
        self.finished.push_back(id);
        while self.finished.len() > self.history {
            if let Some(oldest) = self.finished.pop_front() {
                self.states.remove(&oldest);
            }
        }
    }
}

#[derive(Debug, Clone)]
struct Job {
    id: Uuid,
    trigger: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Completed { report: RunReport },
    Failed { error: String, stage: Option<String> },
}

#[derive(Debug, Clone, Serialize)]
pub struct JobInfo {
    pub id: String,
    #[serde(flatten)]
    pub state: JobState,
}

impl JobQueue {
    pub fn spawn(pipeline: Pipeline) -> (Self, JoinHandle<()>) {
        Self::spawn_with(pipeline, queue_capacity_from_env(), history_capacity_from_env())
    }

    fn spawn_with(pipeline: Pipeline, capacity: usize, history: usize) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Job>(capacity);
        let statuses = Arc::new(Mutex::new(JobBook::new(history)));
        let statuses_bg = statuses.clone();

        let handle = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                {
                    let mut guard = statuses_bg.lock().await;
                    guard.set(job.id, JobState::Running);
                }
                info!(target = "normalizer.jobs", job_id = %job.id, trigger = %job.trigger, "run started");

                let result = pipeline.run().await;
                let mut guard = statuses_bg.lock().await;
                match result {
                    Ok(report) => {
                        guard.finish(job.id, JobState::Completed { report });
                    }
                    Err(err) => {
                        warn!(target = "normalizer.jobs", job_id = %job.id, error = %err, "run failed");
                        guard.finish(
                            job.id,
                            JobState::Failed {
                                error: err.detail().to_string(),
                                stage: Some(err.stage().to_string()),
                            },
                        );
                    }
                }
            }
        });

        (Self { tx, statuses }, handle)
    }

    pub async fn enqueue_run(&self, trigger: impl Into<String>) -> Result<Uuid, ApiError> {
        let id = Uuid::new_v4();
        {
            let mut guard = self.statuses.lock().await;
            guard.set(id, JobState::Queued);
        }
        let job = Job {
            id,
            trigger: trigger.into(),
        };
        if self.tx.send(job).await.is_err() {
            self.statuses.lock().await.states.remove(&id);
            return Err(ApiError {
                error: "queue_send_failed".into(),
                detail: Some("worker not available".into()),
            });
        }
        Ok(id)
    }

    pub async fn get(&self, id: Uuid) -> Option<JobInfo> {
        let guard = self.statuses.lock().await;
        guard.states.get(&id).cloned().map(|state| JobInfo {
            id: id.to_string(),
            state,
        })
    }

    /// Enqueues a run every `period`. A tick is skipped while the queue is
    /// full instead of piling up runs.
    pub fn spawn_schedule(&self, period: Duration) -> JoinHandle<()> {
        let queue = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if queue.tx.capacity() == 0 {
                    warn!(target = "normalizer.jobs", "queue full; skipping scheduled run");
                    continue;
                }
                if let Err(err) = queue.enqueue_run("schedule").await {
                    warn!(target = "normalizer.jobs", error = %err.error, "scheduler stopped");
                    return;
                }
            }
        })
    }
}

pub fn schedule_from_env() -> Option<Duration> {
    std::env::var("NORMALIZE_INTERVAL_SECS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|v| *v > 0)
        .map(Duration::from_secs)
}

fn history_capacity_from_env() -> usize {
    std::env::var("JOB_HISTORY_CAPACITY")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(256)
}

fn queue_capacity_from_env() -> usize {
    std::env::var("QUEUE_CAPACITY")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(16)
}
