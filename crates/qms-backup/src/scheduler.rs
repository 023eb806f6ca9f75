//! Calendar-trigger job scheduler.
//!
//! An explicit [`Scheduler`] instance owns its job table; construction and
//! registration are side-effect free, so tests can assert on the table
//! without spawning anything. [`Scheduler::start`] spawns one tokio task
//! per job, each looping fire-time by fire-time. A job's runs are strictly
//! sequential — a run that overlaps its next fire time simply delays it.

use std::{
  pin::Pin,
  sync::{Arc, Mutex},
};

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc, Weekday};

// ─── Triggers ────────────────────────────────────────────────────────────────

/// When a job fires, in UTC. All triggers fire at the top of the hour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
  Daily { hour: u32 },
  Weekly { weekday: Weekday, hour: u32 },
  Monthly { day: u32, hour: u32 },
  Yearly { month: u32, day: u32, hour: u32 },
}

impl Trigger {
  /// The first fire time strictly after `after`.
  pub fn next_fire(&self, after: DateTime<Utc>) -> DateTime<Utc> {
    let mut candidate = match *self {
      Self::Daily { hour } => at_hour(after, hour),
      Self::Weekly { weekday, hour } => {
        let days_ahead =
          (7 + weekday.num_days_from_monday() - after.weekday().num_days_from_monday()) % 7;
        at_hour(after + Duration::days(days_ahead as i64), hour)
      }
      Self::Monthly { day, hour } => on_day(after.year(), after.month(), day, hour),
      Self::Yearly { month, day, hour } => on_day(after.year(), month, day, hour),
    };

    while candidate <= after {
      candidate = match *self {
        Self::Daily { .. } => candidate + Duration::days(1),
        Self::Weekly { .. } => candidate + Duration::days(7),
        Self::Monthly { day, hour } => {
          let (year, month) = if candidate.month() == 12 {
            (candidate.year() + 1, 1)
          } else {
            (candidate.year(), candidate.month() + 1)
          };
          on_day(year, month, day, hour)
        }
        Self::Yearly { month, day, hour } => on_day(candidate.year() + 1, month, day, hour),
      };
    }
    candidate
  }
}

fn at_hour(base: DateTime<Utc>, hour: u32) -> DateTime<Utc> {
  Utc
    .with_ymd_and_hms(base.year(), base.month(), base.day(), hour, 0, 0)
    .single()
    .unwrap_or(base)
}

fn on_day(year: i32, month: u32, day: u32, hour: u32) -> DateTime<Utc> {
  Utc
    .with_ymd_and_hms(year, month, day, hour, 0, 0)
    .single()
    .unwrap_or_else(|| Utc.with_ymd_and_hms(year, month, 1, hour, 0, 0).single().unwrap_or_default())
}

// ─── Jobs ────────────────────────────────────────────────────────────────────

type JobAction =
  Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// A registered job: a stable id, a trigger, and the work to run.
#[derive(Clone)]
pub struct Job {
  pub id:      &'static str,
  pub name:    String,
  pub trigger: Trigger,
  action:      JobAction,
}

impl Job {
  pub fn new<F, Fut>(id: &'static str, name: impl Into<String>, trigger: Trigger, action: F) -> Self
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
  {
    Self {
      id,
      name: name.into(),
      trigger,
      action: Arc::new(move || Box::pin(action())),
    }
  }
}

impl std::fmt::Debug for Job {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Job")
      .field("id", &self.id)
      .field("name", &self.name)
      .field("trigger", &self.trigger)
      .finish_non_exhaustive()
  }
}

/// How a run ended. Jobs handle their own errors internally, so the only
/// abnormal ending visible here is a panic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
  Completed,
  Panicked,
}

/// One completed run, kept in the in-memory history.
#[derive(Debug, Clone)]
pub struct RunRecord {
  pub job_id:      &'static str,
  pub started_at:  DateTime<Utc>,
  pub finished_at: DateTime<Utc>,
  pub outcome:     RunOutcome,
}

// ─── Scheduler ───────────────────────────────────────────────────────────────

/// Owns the job table and, once started, the per-job tasks.
#[derive(Default)]
pub struct Scheduler {
  jobs:    Vec<Job>,
  history: Arc<Mutex<Vec<RunRecord>>>,
}

impl Scheduler {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a job. Re-registering an id replaces the existing job, so
  /// startup code can run repeatedly without duplicating work.
  pub fn register(&mut self, job: Job) {
    if let Some(existing) = self.jobs.iter_mut().find(|j| j.id == job.id) {
      *existing = job;
    } else {
      self.jobs.push(job);
    }
  }

  pub fn jobs(&self) -> &[Job] {
    &self.jobs
  }

  /// Completed runs, newest last.
  pub fn history(&self) -> Vec<RunRecord> {
    match self.history.lock() {
      Ok(history) => history.clone(),
      Err(_) => Vec::new(),
    }
  }

  /// Drop run records older than `cutoff`.
  pub fn prune_history(&self, cutoff: DateTime<Utc>) {
    self.history_handle().prune_before(cutoff);
  }

  /// A clonable handle to the run history. Outlives [`Scheduler::start`],
  /// so a registered job can prune the history it is recorded in.
  pub fn history_handle(&self) -> HistoryHandle {
    HistoryHandle(Arc::clone(&self.history))
  }

  /// Spawn one task per registered job. Consumes the scheduler; the handle
  /// aborts all tasks on [`SchedulerHandle::shutdown`] or drop.
  pub fn start(self) -> SchedulerHandle {
    let mut tasks = Vec::with_capacity(self.jobs.len());
    for job in self.jobs {
      let history = Arc::clone(&self.history);
      tracing::info!(job = job.id, next_fire = %job.trigger.next_fire(Utc::now()), "job scheduled");
      tasks.push(tokio::spawn(run_job(job, history)));
    }
    SchedulerHandle { tasks }
  }
}

async fn run_job(job: Job, history: Arc<Mutex<Vec<RunRecord>>>) {
  loop {
    let now = Utc::now();
    let fire_at = job.trigger.next_fire(now);
    let wait = (fire_at - now).to_std().unwrap_or_default();
    tokio::time::sleep(wait).await;

    let started_at = Utc::now();
    tracing::info!(job = job.id, "job run starting");
    // The run gets its own task so a panicking job doesn't take its
    // schedule loop down with it.
    let outcome = match tokio::spawn((job.action)()).await {
      Ok(()) => RunOutcome::Completed,
      Err(e) => {
        tracing::error!(job = job.id, error = %e, "job run panicked");
        RunOutcome::Panicked
      }
    };
    let finished_at = Utc::now();
    tracing::info!(job = job.id, ?outcome, "job run finished");

    if let Ok(mut history) = history.lock() {
      history.push(RunRecord { job_id: job.id, started_at, finished_at, outcome });
    }
  }
}

/// Shared view of the run history.
#[derive(Clone)]
pub struct HistoryHandle(Arc<Mutex<Vec<RunRecord>>>);

impl HistoryHandle {
  pub fn prune_before(&self, cutoff: DateTime<Utc>) {
    if let Ok(mut history) = self.0.lock() {
      let before = history.len();
      history.retain(|r| r.finished_at >= cutoff);
      let dropped = before - history.len();
      if dropped > 0 {
        tracing::info!(dropped, "pruned job run history");
      }
    }
  }
}

/// Aborts the job tasks when shut down or dropped.
pub struct SchedulerHandle {
  tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl SchedulerHandle {
  pub fn shutdown(&self) {
    for task in &self.tasks {
      task.abort();
    }
  }
}

impl Drop for SchedulerHandle {
  fn drop(&mut self) {
    self.shutdown();
  }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
  use super::*;

  fn dt(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
  }

  #[test]
  fn daily_fires_today_or_tomorrow() {
    let t = Trigger::Daily { hour: 3 };
    assert_eq!(t.next_fire(dt(2025, 5, 10, 1, 0)), dt(2025, 5, 10, 3, 0));
    assert_eq!(t.next_fire(dt(2025, 5, 10, 3, 0)), dt(2025, 5, 11, 3, 0));
    assert_eq!(t.next_fire(dt(2025, 5, 10, 22, 0)), dt(2025, 5, 11, 3, 0));
  }

  #[test]
  fn weekly_fires_on_the_requested_weekday() {
    let t = Trigger::Weekly { weekday: Weekday::Mon, hour: 4 };
    // 2025-05-10 is a Saturday.
    assert_eq!(t.next_fire(dt(2025, 5, 10, 0, 0)), dt(2025, 5, 12, 4, 0));
    // A Monday before the hour fires the same day.
    assert_eq!(t.next_fire(dt(2025, 5, 12, 2, 0)), dt(2025, 5, 12, 4, 0));
    // A Monday at the hour rolls a full week.
    assert_eq!(t.next_fire(dt(2025, 5, 12, 4, 0)), dt(2025, 5, 19, 4, 0));
  }

  #[test]
  fn monthly_rolls_over_the_year_boundary() {
    let t = Trigger::Monthly { day: 1, hour: 2 };
    assert_eq!(t.next_fire(dt(2025, 12, 15, 0, 0)), dt(2026, 1, 1, 2, 0));
    assert_eq!(t.next_fire(dt(2025, 3, 1, 1, 59)), dt(2025, 3, 1, 2, 0));
  }

  #[test]
  fn yearly_fires_next_january() {
    let t = Trigger::Yearly { month: 1, day: 1, hour: 3 };
    assert_eq!(t.next_fire(dt(2025, 6, 1, 0, 0)), dt(2026, 1, 1, 3, 0));
    assert_eq!(t.next_fire(dt(2026, 1, 1, 3, 0)), dt(2027, 1, 1, 3, 0));
  }

  #[test]
  fn next_fire_is_strictly_after() {
    let triggers = [
      Trigger::Daily { hour: 0 },
      Trigger::Weekly { weekday: Weekday::Wed, hour: 12 },
      Trigger::Monthly { day: 28, hour: 23 },
      Trigger::Yearly { month: 7, day: 4, hour: 6 },
    ];
    let after = dt(2025, 1, 1, 0, 0);
    for t in triggers {
      assert!(t.next_fire(after) > after, "{t:?}");
    }
  }

  #[test]
  fn register_replaces_by_id() {
    let mut scheduler = Scheduler::new();
    scheduler.register(Job::new("demo", "first", Trigger::Daily { hour: 1 }, || async {}));
    scheduler.register(Job::new("demo", "second", Trigger::Daily { hour: 2 }, || async {}));
    scheduler.register(Job::new("other", "other", Trigger::Daily { hour: 3 }, || async {}));

    assert_eq!(scheduler.jobs().len(), 2);
    let demo = scheduler.jobs().iter().find(|j| j.id == "demo").unwrap();
    assert_eq!(demo.name, "second");
    assert_eq!(demo.trigger, Trigger::Daily { hour: 2 });
  }

  #[test]
  fn history_pruning_drops_old_runs() {
    let scheduler = Scheduler::new();
    {
      let mut history = scheduler.history.lock().unwrap();
      history.push(RunRecord {
        job_id:      "old",
        started_at:  dt(2025, 1, 1, 0, 0),
        finished_at: dt(2025, 1, 1, 0, 5),
        outcome:     RunOutcome::Completed,
      });
      history.push(RunRecord {
        job_id:      "new",
        started_at:  dt(2025, 2, 1, 0, 0),
        finished_at: dt(2025, 2, 1, 0, 5),
        outcome:     RunOutcome::Panicked,
      });
    }

    scheduler.prune_history(dt(2025, 1, 15, 0, 0));
    let history = scheduler.history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].job_id, "new");
  }

  #[tokio::test]
  async fn handle_drop_aborts_job_tasks() {
    let mut scheduler = Scheduler::new();
    scheduler.register(Job::new("idle", "idle", Trigger::Yearly { month: 1, day: 1, hour: 0 }, || async {}));

    let handle = scheduler.start();
    let task_count = handle.tasks.len();
    assert_eq!(task_count, 1);
    drop(handle);
    // Dropping the handle aborts the spawned task; nothing to await on.
  }
}
