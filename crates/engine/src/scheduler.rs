//! Cron-driven trigger scheduling.
//!
//! An in-memory job table maps script ids to parsed trigger expressions
//! and their next fire time. A one-second tick polls for due jobs and
//! hands each one to the executor; a script whose previous run is still
//! in flight is skipped for that fire, not queued. Fires missed by more
//! than the script's misfire grace are skipped entirely and the job
//! advances to its next occurrence.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use cronhost_core::schedule::Schedule;
use cronhost_core::types::{DbId, Timestamp};
use cronhost_db::models::execution::TriggerSource;
use cronhost_db::models::script::Script;
use cronhost_db::repositories::script_repo::ScriptRepo;
use cronhost_db::SqlitePool;
use tracing::{debug, error, info, warn};

use crate::executor::{ExecuteError, Executor};

/// One scheduled job.
struct Job {
    name: String,
    schedule: Schedule,
    misfire_grace: chrono::Duration,
    next_run: Timestamp,
}

/// Read-only snapshot of a scheduled job, for listing endpoints.
#[derive(Debug, Clone)]
pub struct JobInfo {
    pub script_id: DbId,
    pub name: String,
    pub next_run: Timestamp,
    pub description: String,
}

struct SchedulerInner {
    pool: SqlitePool,
    executor: Executor,
    jobs: Mutex<HashMap<DbId, Job>>,
}

/// Maps trigger expressions onto executor invocations.
/// Cheap to clone; all clones share the job table.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    pub fn new(pool: SqlitePool, executor: Executor) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                pool,
                executor,
                jobs: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Register (or replace) the job for a script.
    ///
    /// Returns `false` without registering when the script is disabled,
    /// its expression does not parse, or the expression can never fire
    /// again.
    pub fn add_job(&self, script: &Script) -> bool {
        if !script.enabled {
            return false;
        }
        let schedule = match Schedule::parse(&script.cron_expression) {
            Ok(schedule) => schedule,
            Err(e) => {
                error!(
                    script = %script.name,
                    expression = %script.cron_expression,
                    error = %e,
                    "invalid trigger expression, not scheduling"
                );
                return false;
            }
        };
        let Some(next_run) = schedule.next_after(Utc::now()) else {
            warn!(script = %script.name, "trigger can never fire again, not scheduling");
            return false;
        };

        info!(
            script = %script.name,
            trigger = %schedule.describe(),
            %next_run,
            "job scheduled"
        );
        let mut jobs = self.inner.jobs.lock().expect("job table poisoned");
        jobs.insert(
            script.id,
            Job {
                name: script.name.clone(),
                schedule,
                misfire_grace: chrono::Duration::seconds(script.misfire_grace_secs.max(0)),
                next_run,
            },
        );
        true
    }

    /// Remove the job for a script. Returns whether one was present.
    pub fn remove_job(&self, script_id: DbId) -> bool {
        let mut jobs = self.inner.jobs.lock().expect("job table poisoned");
        jobs.remove(&script_id).is_some()
    }

    /// Re-register a script after an edit: the old job is dropped and a
    /// new one added when the script is still enabled.
    pub fn update_job(&self, script: &Script) -> bool {
        self.remove_job(script.id);
        if !script.enabled {
            return true;
        }
        self.add_job(script)
    }

    /// Next fire time for a script, if it is scheduled.
    pub fn next_run_time(&self, script_id: DbId) -> Option<Timestamp> {
        let jobs = self.inner.jobs.lock().expect("job table poisoned");
        jobs.get(&script_id).map(|job| job.next_run)
    }

    /// Snapshot of all scheduled jobs, ordered by next fire time.
    pub fn list_jobs(&self) -> Vec<JobInfo> {
        let jobs = self.inner.jobs.lock().expect("job table poisoned");
        let mut infos: Vec<JobInfo> = jobs
            .iter()
            .map(|(&script_id, job)| JobInfo {
                script_id,
                name: job.name.clone(),
                next_run: job.next_run,
                description: job.schedule.describe(),
            })
            .collect();
        infos.sort_by_key(|info| (info.next_run, info.script_id));
        infos
    }

    /// Rebuild the job table from every enabled script in the database.
    /// Returns the number of jobs registered.
    pub async fn reload_all(&self) -> Result<usize, sqlx::Error> {
        let scripts = ScriptRepo::list_enabled(&self.inner.pool).await?;
        {
            let mut jobs = self.inner.jobs.lock().expect("job table poisoned");
            jobs.clear();
        }
        let mut registered = 0;
        for script in &scripts {
            if self.add_job(script) {
                registered += 1;
            }
        }
        info!(registered, "job table reloaded");
        Ok(registered)
    }

    /// Collect jobs due at `now` and advance each one's next fire time.
    ///
    /// A job whose fire is older than its misfire grace is skipped for
    /// this occurrence but still advanced, so one long stall never causes
    /// a burst of catch-up runs.
    pub fn poll_due(&self, now: Timestamp) -> Vec<DbId> {
        let mut due = Vec::new();
        let mut jobs = self.inner.jobs.lock().expect("job table poisoned");
        let mut exhausted = Vec::new();

        for (&script_id, job) in jobs.iter_mut() {
            if job.next_run > now {
                continue;
            }
            if now - job.next_run <= job.misfire_grace {
                due.push(script_id);
            } else {
                warn!(
                    script = %job.name,
                    missed = %job.next_run,
                    "fire missed beyond misfire grace, skipping occurrence"
                );
            }
            match job.schedule.next_after(now) {
                Some(next) => job.next_run = next,
                None => exhausted.push(script_id),
            }
        }
        for script_id in exhausted {
            jobs.remove(&script_id);
        }
        due
    }

    /// Scheduler loop: tick once a second, firing due jobs. Runs until the
    /// future is dropped.
    pub async fn run(self) {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            self.tick().await;
        }
    }

    async fn tick(&self) {
        let due = self.poll_due(Utc::now());
        for script_id in due {
            match self
                .inner
                .executor
                .execute(script_id, TriggerSource::Scheduler, false)
                .await
            {
                Ok(execution_id) => {
                    debug!(script_id, execution_id, "scheduled fire started");
                }
                Err(ExecuteError::AlreadyRunning(_)) => {
                    warn!(script_id, "previous run still in flight, skipping this fire");
                }
                Err(e) => {
                    error!(script_id, error = %e, "scheduled fire failed to start");
                }
            }
        }
    }
}
