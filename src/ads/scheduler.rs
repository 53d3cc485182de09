//! Trigger engine behind the ad rotation. Each daily trigger is a spawned
//! task that sleeps until the next wall-clock occurrence of its (hour,
//! minute), fires its job, then sleeps for the next day's occurrence.
//!
//! Registering a trigger under an id that already exists replaces the old
//! task, so re-planning the same day is idempotent.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use chrono::Duration as ChronoDuration;
use chrono::Local;
use chrono::NaiveDateTime;
use chrono::NaiveTime;
use futures::future::BoxFuture;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::info;
use tracing::instrument;
use tracing::warn;

use crate::ads::planner;
use crate::ads::planner::AD_TRIGGER_PREFIX;
use crate::ads::planner::PlanError;
use crate::ads::planner::PlannerConfig;
use crate::ads::planner::SlotTime;

/// A job run by a trigger. Boxed so heterogeneous closures can share one
/// registry and be re-spawned each day.
pub type TriggerJob = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Wraps an async closure into a [`TriggerJob`].
pub fn trigger_job<F, Fut>(job: F) -> TriggerJob
where
  F: Fn() -> Fut + Send + Sync + 'static,
  Fut: Future<Output = ()> + Send + 'static,
{
  Arc::new(move || Box::pin(job()) as BoxFuture<'static, ()>)
}

/// Sleep length until the next occurrence of `at`, relative to `now`. A
/// target at or before `now` rolls over to tomorrow.
fn until_next_occurrence(at: SlotTime, now: NaiveDateTime) -> std::time::Duration {
  let time = NaiveTime::from_hms_opt(u32::from(at.hour), u32::from(at.minute), 0)
    .unwrap_or(NaiveTime::MIN);
  let mut target = now.date().and_time(time);
  if target <= now {
    target += ChronoDuration::days(1);
  }
  (target - now).to_std().unwrap_or_default()
}

#[derive(Default)]
struct TriggerRegistry {
  tasks: HashMap<String, JoinHandle<()>>,
}

impl TriggerRegistry {
  /// Replaces any existing trigger under the same id.
  fn register(&mut self, id: String, at: SlotTime, job: TriggerJob) {
    let handle = spawn_daily(at, job);
    if let Some(previous) = self.tasks.insert(id.clone(), handle) {
      previous.abort();
      debug!(trigger_id = %id, "replaced existing trigger");
    }
  }

  fn remove_prefix(&mut self, prefix: &str) -> usize {
    let ids: Vec<String> = self.tasks.keys().filter(|id| id.starts_with(prefix)).cloned().collect();
    for id in &ids {
      if let Some(handle) = self.tasks.remove(id) {
        handle.abort();
      }
    }
    ids.len()
  }

  fn cancel_all(&mut self) -> usize {
    let count = self.tasks.len();
    for (_, handle) in self.tasks.drain() {
      handle.abort();
    }
    count
  }

  fn ids(&self) -> Vec<String> {
    let mut ids: Vec<String> = self.tasks.keys().cloned().collect();
    ids.sort();
    ids
  }
}

fn spawn_daily(at: SlotTime, job: TriggerJob) -> JoinHandle<()> {
  tokio::spawn(async move {
    loop {
      let pause = until_next_occurrence(at, Local::now().naive_local());
      tokio::time::sleep(pause).await;
      job().await;
    }
  })
}

const REPLAN_TRIGGER_ID: &str = "replan:midnight";

/// An extra trigger the scheduler keeps alive alongside the ad slots, such
/// as the nightly bestseller refresh. Not touched by re-planning.
struct DailyJob {
  id: String,
  at: SlotTime,
  job: TriggerJob,
}

struct Inner {
  planner: PlannerConfig,
  slot_job: TriggerJob,
  daily_jobs: Mutex<Vec<DailyJob>>,
  triggers: Mutex<TriggerRegistry>,
  running: AtomicBool,
}

impl Inner {
  fn lock(&self) -> std::sync::MutexGuard<'_, TriggerRegistry> {
    self.triggers.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

/// Plans a fresh set of ad slot times each midnight and keeps one trigger
/// per slot registered.
#[derive(Clone)]
pub struct AdScheduler {
  inner: Arc<Inner>,
}

impl AdScheduler {
  pub fn new(planner: PlannerConfig, slot_job: TriggerJob) -> Self {
    Self {
      inner: Arc::new(Inner {
        planner,
        slot_job,
        daily_jobs: Mutex::new(Vec::new()),
        triggers: Mutex::new(TriggerRegistry::default()),
        running: AtomicBool::new(false),
      }),
    }
  }

  /// Adds a standalone daily trigger, kept across re-plans. Only valid
  /// before [`start`](Self::start).
  pub fn with_daily_job<F, Fut>(self, id: &str, at: SlotTime, job: F) -> Self
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
  {
    self
      .inner
      .daily_jobs
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .push(DailyJob {
        id: id.to_string(),
        at,
        job: trigger_job(job),
      });
    self
  }

  /// Plans today's slots and registers all triggers. A second call while
  /// running is a no-op. An invalid planner config leaves the scheduler
  /// stopped.
  #[instrument(skip(self))]
  pub fn start(&self) -> Result<(), PlanError> {
    if self.inner.running.swap(true, Ordering::SeqCst) {
      debug!("scheduler already running");
      return Ok(());
    }

    let slots = match planner::plan_daily_slots(&self.inner.planner, &mut rand::thread_rng()) {
      Ok(slots) => slots,
      Err(err) => {
        self.inner.running.store(false, Ordering::SeqCst);
        return Err(err);
      },
    };

    let mut registry = self.inner.lock();
    self.register_slots(&mut registry, &slots);
    registry.register(
      REPLAN_TRIGGER_ID.to_string(),
      SlotTime { hour: 0, minute: 0 },
      self.replan_job(),
    );
    let daily_jobs = self.inner.daily_jobs.lock().unwrap_or_else(PoisonError::into_inner);
    for daily in daily_jobs.iter() {
      registry.register(daily.id.clone(), daily.at, Arc::clone(&daily.job));
    }

    info!(
      slots = slots.len(),
      daily_jobs = daily_jobs.len(),
      "ad scheduler started"
    );
    Ok(())
  }

  /// Cancels every trigger. Safe to call when already stopped.
  #[instrument(skip(self))]
  pub fn stop(&self) {
    if !self.inner.running.swap(false, Ordering::SeqCst) {
      return;
    }
    let cancelled = self.inner.lock().cancel_all();
    info!(cancelled, "ad scheduler stopped");
  }

  pub fn is_running(&self) -> bool {
    self.inner.running.load(Ordering::SeqCst)
  }

  /// Registered trigger ids, sorted. Admin status screen.
  pub fn trigger_ids(&self) -> Vec<String> {
    self.inner.lock().ids()
  }

  /// Number of ad slot triggers currently registered.
  pub fn ad_slot_count(&self) -> usize {
    self
      .inner
      .lock()
      .ids()
      .iter()
      .filter(|id| id.starts_with(AD_TRIGGER_PREFIX))
      .count()
  }

  /// Replaces the ad slot triggers with a fresh plan. Other triggers (the
  /// midnight re-plan itself, daily jobs) are untouched. On a planning
  /// failure the previous slots are kept.
  fn replan(&self) {
    if !self.is_running() {
      return;
    }
    let slots = match planner::plan_daily_slots(&self.inner.planner, &mut rand::thread_rng()) {
      Ok(slots) => slots,
      Err(err) => {
        warn!(error = %err, "daily re-plan failed, keeping yesterday's slots");
        return;
      },
    };

    let mut registry = self.inner.lock();
    let removed = registry.remove_prefix(AD_TRIGGER_PREFIX);
    self.register_slots(&mut registry, &slots);
    info!(removed, planned = slots.len(), "re-planned ad slots");
  }

  fn register_slots(&self, registry: &mut TriggerRegistry, slots: &[SlotTime]) {
    if slots.is_empty() {
      warn!("ad plan is empty, no slot fits the posting window");
    }
    for slot in slots {
      registry.register(slot.trigger_id(), *slot, Arc::clone(&self.inner.slot_job));
      debug!(trigger_id = %slot.trigger_id(), "registered ad slot");
    }
  }

  fn replan_job(&self) -> TriggerJob {
    let scheduler = self.clone();
    trigger_job(move || {
      let scheduler = scheduler.clone();
      async move {
        scheduler.replan();
      }
    })
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;
  use std::sync::atomic::AtomicUsize;
  use std::sync::atomic::Ordering;
  use std::time::Duration;

  use chrono::NaiveDate;

  use super::AdScheduler;
  use super::REPLAN_TRIGGER_ID;
  use super::trigger_job;
  use super::until_next_occurrence;
  use crate::ads::planner::AD_TRIGGER_PREFIX;
  use crate::ads::planner::PlannerConfig;
  use crate::ads::planner::SlotTime;

  fn config() -> PlannerConfig {
    PlannerConfig {
      daily_count: 5,
      start_hour: 9,
      end_hour: 21,
      min_interval_minutes: 30,
      max_interval_minutes: 90,
    }
  }

  fn noop_scheduler(config: PlannerConfig) -> AdScheduler {
    AdScheduler::new(config, trigger_job(|| async {}))
  }

  fn at(hour: u32, minute: u32, second: u32) -> chrono::NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 3, 14)
      .unwrap()
      .and_hms_opt(hour, minute, second)
      .unwrap()
  }

  #[test]
  fn next_occurrence_later_today() {
    let pause = until_next_occurrence(SlotTime { hour: 12, minute: 30 }, at(9, 0, 0));
    assert_eq!(pause, Duration::from_secs(3 * 3600 + 30 * 60));
  }

  #[test]
  fn next_occurrence_rolls_over_to_tomorrow() {
    let pause = until_next_occurrence(SlotTime { hour: 9, minute: 0 }, at(9, 0, 0));
    assert_eq!(pause, Duration::from_secs(24 * 3600));

    let pause = until_next_occurrence(SlotTime { hour: 0, minute: 0 }, at(23, 59, 30));
    assert_eq!(pause, Duration::from_secs(30));
  }

  #[tokio::test]
  async fn start_registers_slots_replan_and_daily_jobs() {
    let scheduler = noop_scheduler(config()).with_daily_job(
      "bestsellers:refresh",
      SlotTime { hour: 0, minute: 5 },
      || async {},
    );
    scheduler.start().unwrap();

    assert!(scheduler.is_running());
    assert_eq!(scheduler.ad_slot_count(), 5);
    let ids = scheduler.trigger_ids();
    assert!(ids.contains(&REPLAN_TRIGGER_ID.to_string()));
    assert!(ids.contains(&"bestsellers:refresh".to_string()));
    assert_eq!(ids.len(), 7);
    scheduler.stop();
  }

  #[tokio::test]
  async fn double_start_is_a_no_op() {
    let scheduler = noop_scheduler(config());
    scheduler.start().unwrap();
    let before = scheduler.trigger_ids();
    scheduler.start().unwrap();
    assert_eq!(scheduler.trigger_ids(), before);
    scheduler.stop();
  }

  #[tokio::test]
  async fn replan_replaces_only_ad_triggers() {
    let scheduler = noop_scheduler(config()).with_daily_job(
      "bestsellers:refresh",
      SlotTime { hour: 0, minute: 5 },
      || async {},
    );
    scheduler.start().unwrap();

    for _ in 0 .. 3 {
      scheduler.replan();
      assert_eq!(scheduler.ad_slot_count(), 5);
      let ids = scheduler.trigger_ids();
      assert!(ids.contains(&REPLAN_TRIGGER_ID.to_string()));
      assert!(ids.contains(&"bestsellers:refresh".to_string()));
      assert!(ids.iter().filter(|id| id.starts_with(AD_TRIGGER_PREFIX)).count() <= 5);
    }
    scheduler.stop();
  }

  #[tokio::test]
  async fn stop_clears_triggers_and_allows_restart() {
    let scheduler = noop_scheduler(config());
    scheduler.start().unwrap();
    scheduler.stop();

    assert!(!scheduler.is_running());
    assert!(scheduler.trigger_ids().is_empty());

    // A replan while stopped must not resurrect triggers.
    scheduler.replan();
    assert!(scheduler.trigger_ids().is_empty());

    scheduler.start().unwrap();
    assert_eq!(scheduler.ad_slot_count(), 5);
    scheduler.stop();
  }

  #[tokio::test]
  async fn invalid_config_leaves_scheduler_stopped() {
    let scheduler = noop_scheduler(PlannerConfig {
      start_hour: 21,
      end_hour: 9,
      ..config()
    });
    assert!(scheduler.start().is_err());
    assert!(!scheduler.is_running());
    assert!(scheduler.trigger_ids().is_empty());
  }

  #[tokio::test]
  async fn window_with_no_room_still_registers_replan() {
    let scheduler = noop_scheduler(PlannerConfig {
      daily_count: 0,
      ..config()
    });
    scheduler.start().unwrap();
    assert_eq!(scheduler.ad_slot_count(), 0);
    assert_eq!(scheduler.trigger_ids(), vec![REPLAN_TRIGGER_ID.to_string()]);
    scheduler.stop();
  }

  #[tokio::test(start_paused = true)]
  async fn daily_trigger_fires_once_per_day() {
    let fired = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&fired);
    let scheduler = AdScheduler::new(
      PlannerConfig {
        daily_count: 1,
        ..config()
      },
      trigger_job(move || {
        let counter = Arc::clone(&counter);
        async move {
          counter.fetch_add(1, Ordering::SeqCst);
        }
      }),
    );
    scheduler.start().unwrap();

    // Two full days of virtual time cover at least two fires of the single
    // daily slot regardless of where in the day the test starts.
    tokio::time::sleep(Duration::from_secs(49 * 3600)).await;
    assert!(fired.load(Ordering::SeqCst) >= 2);
    scheduler.stop();
  }
}
