//! AggregateCache - プロジェクト別合計時間のキャッシュ
//!
//! The report is computed lazily from the two repositories, memoized until
//! `clear_cache`, and shared by any number of threads.
//!
//! # ロック戦略（double-checked locking）
//! 1. read lock で確認し、計算済みならコピーを返す
//! 2. write lock を取り直して再確認（待っている間に他の誰かが計算したかもしれない）
//! 3. まだなら計算して格納
//!
//! Guards are released on every exit path, including repository errors and
//! panics (`parking_lot` locks do not poison).

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::domain::{DataAccessError, ProjectHoursReport, ProjectId, TaskId};
use crate::observability::CacheStats;
use crate::ports::{Clock, SystemClock, TaskRepository, TimeLogRepository};

/// One epoch's computed result.
struct Computed {
    report: ProjectHoursReport,
    processed: HashSet<ProjectId>,
    computed_at: DateTime<Utc>,
}

/// Lock-protected state. `computed` is `None` until the first report of the
/// current epoch has been stored, so readers never observe a partial report.
#[derive(Default)]
struct CacheState {
    epoch: u64,
    computed: Option<Computed>,
}

/// Memoized "total hours per project" report.
pub struct AggregateCache {
    tasks: Arc<dyn TaskRepository>,
    time_logs: Arc<dyn TimeLogRepository>,
    clock: Arc<dyn Clock>,
    state: RwLock<CacheState>,
    hits: AtomicU64,
    computations: AtomicU64,
    failures: AtomicU64,
}

impl AggregateCache {
    pub fn new(tasks: Arc<dyn TaskRepository>, time_logs: Arc<dyn TimeLogRepository>) -> Self {
        Self::with_clock(tasks, time_logs, Arc::new(SystemClock))
    }

    pub fn with_clock(
        tasks: Arc<dyn TaskRepository>,
        time_logs: Arc<dyn TimeLogRepository>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            tasks,
            time_logs,
            clock,
            state: RwLock::new(CacheState::default()),
            hits: AtomicU64::new(0),
            computations: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    /// Hours per project, computed at most once per epoch.
    ///
    /// A repository failure is returned to the caller; the cache stays empty
    /// and the next call retries.
    pub fn get_report(&self) -> Result<ProjectHoursReport, DataAccessError> {
        {
            let state = self.state.read();
            if let Some(computed) = &state.computed {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(computed.report.clone());
            }
        }

        let mut state = self.state.write();
        // 再確認: write lock を待っている間に計算済みになったかもしれない
        if let Some(computed) = &state.computed {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(computed.report.clone());
        }

        let report = match self.compute() {
            Ok(report) => report,
            Err(err) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                return Err(err);
            }
        };

        state.computed = Some(Computed {
            processed: report.projects().collect(),
            report: report.clone(),
            computed_at: self.clock.now(),
        });
        self.computations.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            epoch = state.epoch,
            projects = report.len(),
            "project hours report computed"
        );
        Ok(report)
    }

    /// Drop the current report and start a new epoch.
    pub fn clear_cache(&self) {
        let mut state = self.state.write();
        state.computed = None;
        state.epoch += 1;
        tracing::debug!(epoch = state.epoch, "project hours cache cleared");
    }

    /// Projects covered by the current epoch's report (a copy).
    pub fn get_processed_projects(&self) -> HashSet<ProjectId> {
        self.state
            .read()
            .computed
            .as_ref()
            .map(|computed| computed.processed.clone())
            .unwrap_or_default()
    }

    pub fn is_cached(&self) -> bool {
        self.state.read().computed.is_some()
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.read();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            computations: self.computations.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            epoch: state.epoch,
            last_computed_at: state.computed.as_ref().map(|computed| computed.computed_at),
        }
    }

    /// One full scan: list tasks, group by project, sum hours per task.
    fn compute(&self) -> Result<ProjectHoursReport, DataAccessError> {
        let tasks = self.tasks.list_all_tasks()?;

        let mut by_project: BTreeMap<ProjectId, Vec<TaskId>> = BTreeMap::new();
        for task in tasks {
            by_project.entry(task.project_id).or_default().push(task.id);
        }

        let mut totals = Vec::with_capacity(by_project.len());
        for (project, task_ids) in by_project {
            let mut total = 0.0;
            for task in task_ids {
                let hours = self.time_logs.total_hours_for_task(task)?;
                // NaN もここで弾く
                if !(hours >= 0.0) {
                    return Err(DataAccessError::new(format!(
                        "invalid hour total {hours} for {task}"
                    )));
                }
                total += hours;
            }
            totals.push((project, total));
        }

        Ok(totals.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TrackedTask;
    use crate::impls::{InMemoryTaskRepository, InMemoryTimeLogRepository};
    use crate::ports::FixedClock;
    use chrono::TimeZone;
    use rstest::rstest;
    use std::collections::HashMap;
    use std::sync::Barrier;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::time::Duration;

    #[derive(Default)]
    struct CountingTasks {
        tasks: Vec<TrackedTask>,
        calls: AtomicUsize,
        delay: Duration,
        fail: AtomicBool,
    }

    impl CountingTasks {
        fn new(tasks: Vec<TrackedTask>) -> Self {
            Self {
                tasks,
                ..Default::default()
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl TaskRepository for CountingTasks {
        fn list_all_tasks(&self) -> Result<Vec<TrackedTask>, DataAccessError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            if self.fail.load(Ordering::SeqCst) {
                return Err(DataAccessError::new("task table unavailable"));
            }
            Ok(self.tasks.clone())
        }
    }

    #[derive(Default)]
    struct CountingLogs {
        hours: HashMap<TaskId, f64>,
        calls: AtomicUsize,
        fail: AtomicBool,
    }

    impl CountingLogs {
        fn new(hours: &[(i64, f64)]) -> Self {
            Self {
                hours: hours.iter().map(|(id, h)| (TaskId(*id), *h)).collect(),
                ..Default::default()
            }
        }
    }

    impl TimeLogRepository for CountingLogs {
        fn total_hours_for_task(&self, task: TaskId) -> Result<f64, DataAccessError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(DataAccessError::new("time log table unavailable"));
            }
            Ok(self.hours.get(&task).copied().unwrap_or(0.0))
        }
    }

    fn scenario_a() -> (Arc<CountingTasks>, Arc<CountingLogs>) {
        let tasks = CountingTasks::new(vec![
            TrackedTask::new(1, 10),
            TrackedTask::new(2, 10),
            TrackedTask::new(3, 20),
        ]);
        let logs = CountingLogs::new(&[(1, 2.5), (2, 3.0), (3, 1.0)]);
        (Arc::new(tasks), Arc::new(logs))
    }

    fn report(entries: &[(i64, f64)]) -> ProjectHoursReport {
        entries.iter().map(|(p, h)| (ProjectId(*p), *h)).collect()
    }

    #[test]
    fn hours_are_summed_per_project() {
        let (tasks, logs) = scenario_a();
        let cache = AggregateCache::new(tasks, logs);

        assert_eq!(cache.get_report().unwrap(), report(&[(10, 5.5), (20, 1.0)]));
        assert_eq!(
            cache.get_processed_projects(),
            HashSet::from([ProjectId(10), ProjectId(20)])
        );
    }

    #[test]
    fn empty_task_list_yields_empty_report() {
        let tasks = Arc::new(CountingTasks::new(Vec::new()));
        let cache = AggregateCache::new(tasks.clone(), Arc::new(CountingLogs::default()));

        assert!(cache.get_report().unwrap().is_empty());
        assert!(cache.get_processed_projects().is_empty());

        // 空のレポートも計算済みとして扱う
        assert!(cache.get_report().unwrap().is_empty());
        assert_eq!(tasks.calls(), 1);
    }

    #[test]
    fn second_read_is_served_from_memory() {
        let (tasks, logs) = scenario_a();
        let cache = AggregateCache::new(tasks.clone(), logs.clone());

        let first = cache.get_report().unwrap();
        let second = cache.get_report().unwrap();

        assert_eq!(first, second);
        assert_eq!(tasks.calls(), 1);
        assert_eq!(logs.calls.load(Ordering::SeqCst), 3);

        let stats = cache.stats();
        assert_eq!(stats.computations, 1);
        assert_eq!(stats.hits, 1);
    }

    #[test]
    fn clear_forces_recomputation() {
        let (tasks, logs) = scenario_a();
        let cache = AggregateCache::new(tasks.clone(), logs);

        cache.get_report().unwrap();
        cache.clear_cache();
        assert!(!cache.is_cached());
        assert!(cache.get_processed_projects().is_empty());

        cache.get_report().unwrap();
        assert_eq!(tasks.calls(), 2);
        assert_eq!(cache.stats().epoch, 1);
    }

    #[test]
    fn concurrent_first_readers_compute_once() {
        let (tasks, logs) = scenario_a();
        let tasks = Arc::new(CountingTasks {
            tasks: tasks.tasks.clone(),
            delay: Duration::from_millis(50),
            ..Default::default()
        });
        let cache = Arc::new(AggregateCache::new(tasks.clone(), logs));
        let readers = 16;
        let barrier = Arc::new(Barrier::new(readers));

        let threads: Vec<_> = (0..readers)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    cache.get_report().unwrap()
                })
            })
            .collect();
        let reports: Vec<_> = threads.into_iter().map(|t| t.join().unwrap()).collect();

        assert_eq!(tasks.calls(), 1);
        let expected = report(&[(10, 5.5), (20, 1.0)]);
        assert!(reports.iter().all(|r| *r == expected));
        assert_eq!(cache.stats().hits, (readers - 1) as u64);
    }

    #[rstest]
    #[case::task_repository(true, false)]
    #[case::time_log_repository(false, true)]
    fn repository_failure_leaves_cache_empty_and_retryable(
        #[case] tasks_fail: bool,
        #[case] logs_fail: bool,
    ) {
        let (tasks, logs) = scenario_a();
        tasks.fail.store(tasks_fail, Ordering::SeqCst);
        logs.fail.store(logs_fail, Ordering::SeqCst);
        let cache = AggregateCache::new(tasks.clone(), logs.clone());

        assert!(cache.get_report().is_err());
        assert!(!cache.is_cached());
        assert!(cache.get_processed_projects().is_empty());
        assert_eq!(cache.stats().failures, 1);

        // write lock は解放されている
        tasks.fail.store(false, Ordering::SeqCst);
        logs.fail.store(false, Ordering::SeqCst);
        assert_eq!(cache.get_report().unwrap(), report(&[(10, 5.5), (20, 1.0)]));
        assert_eq!(tasks.calls(), 2);
    }

    #[test]
    fn panicking_repository_does_not_wedge_the_lock() {
        struct Exploding;
        impl TaskRepository for Exploding {
            fn list_all_tasks(&self) -> Result<Vec<TrackedTask>, DataAccessError> {
                panic!("driver crashed")
            }
        }

        let cache = Arc::new(AggregateCache::new(
            Arc::new(Exploding),
            Arc::new(CountingLogs::default()),
        ));
        let worker = Arc::clone(&cache);
        assert!(std::thread::spawn(move || worker.get_report()).join().is_err());

        // ロックは取れるし、状態は空のまま
        cache.clear_cache();
        assert!(!cache.is_cached());
    }

    #[rstest]
    #[case(-0.5)]
    #[case(f64::NAN)]
    fn invalid_hour_totals_are_rejected(#[case] hours: f64) {
        let tasks = Arc::new(CountingTasks::new(vec![TrackedTask::new(1, 10)]));
        let logs = Arc::new(CountingLogs::new(&[(1, hours)]));
        let cache = AggregateCache::new(tasks, logs);

        let err = cache.get_report().unwrap_err();
        assert!(err.message().contains("invalid hour total"));
        assert!(!cache.is_cached());
    }

    #[test]
    fn stats_record_when_the_epoch_was_computed() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap();
        let (tasks, logs) = scenario_a();
        let cache = AggregateCache::with_clock(tasks, logs, Arc::new(FixedClock::new(at)));

        assert_eq!(cache.stats().last_computed_at, None);
        cache.get_report().unwrap();
        assert_eq!(cache.stats().last_computed_at, Some(at));
        cache.clear_cache();
        assert_eq!(cache.stats().last_computed_at, None);
    }

    #[test]
    fn readers_never_mix_epochs() {
        let tasks = Arc::new(InMemoryTaskRepository::with_tasks([
            TrackedTask::new(1, 10),
            TrackedTask::new(2, 20),
        ]));
        let logs = Arc::new(InMemoryTimeLogRepository::new());
        logs.log_hours(TaskId(1), 1.0).unwrap();
        logs.log_hours(TaskId(2), 2.0).unwrap();
        let cache = Arc::new(AggregateCache::new(tasks.clone(), logs.clone()));

        let before = cache.get_report().unwrap();
        let stop = Arc::new(AtomicBool::new(false));
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let stop = Arc::clone(&stop);
                std::thread::spawn(move || {
                    let mut seen = Vec::new();
                    while !stop.load(Ordering::SeqCst) {
                        seen.push(cache.get_report().unwrap());
                    }
                    seen
                })
            })
            .collect();

        std::thread::sleep(Duration::from_millis(10));
        tasks.insert(TrackedTask::new(3, 30));
        logs.log_hours(TaskId(3), 4.0).unwrap();
        logs.log_hours(TaskId(1), 0.5).unwrap();
        cache.clear_cache();
        std::thread::sleep(Duration::from_millis(10));
        stop.store(true, Ordering::SeqCst);

        let after = report(&[(10, 1.5), (20, 2.0), (30, 4.0)]);
        for seen in readers.into_iter().map(|t| t.join().unwrap()) {
            assert!(seen.iter().all(|r| *r == before || *r == after));
        }
        assert_eq!(cache.get_report().unwrap(), after);
    }
}
