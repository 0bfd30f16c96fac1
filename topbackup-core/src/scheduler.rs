use crate::constants::scheduler as consts;
use crate::error::Result;
use crate::models::Schedule;
use chrono::{DateTime, Datelike, Local, NaiveTime, TimeZone, Weekday};
use futures::FutureExt;
use futures::future::BoxFuture;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 任务回调
pub type JobCallback = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// 备份任务回调，参数为触发该任务的计划（手动任务为 None）
pub type BackupCallback =
    Arc<dyn Fn(Option<Schedule>) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// 各类任务的回调
#[derive(Clone)]
pub struct JobCallbacks {
    pub backup: BackupCallback,
    pub config_sync: JobCallback,
    pub update_check: JobCallback,
}

impl JobCallbacks {
    fn job_future(
        &self,
        kind: JobKind,
        schedule: Option<Schedule>,
    ) -> BoxFuture<'static, Result<()>> {
        match kind {
            JobKind::Backup => (self.backup)(schedule),
            JobKind::ConfigSync => (self.config_sync)(),
            JobKind::UpdateCheck => (self.update_check)(),
        }
    }
}

/// 任务类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Backup,
    ConfigSync,
    UpdateCheck,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobKind::Backup => "backup",
            JobKind::ConfigSync => "config-sync",
            JobKind::UpdateCheck => "update-check",
        };
        f.write_str(name)
    }
}

/// 触发规则
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// 每周指定星期的固定时刻
    Weekly {
        hour: u32,
        minute: u32,
        days: Vec<Weekday>,
    },
    /// 固定间隔
    Interval(Duration),
    /// 只执行一次
    Once(DateTime<Local>),
}

impl Trigger {
    /// 从备份计划生成触发规则，计划无效时返回 None
    pub fn from_schedule(schedule: &Schedule) -> Option<Self> {
        let (hour, minute) = schedule.hour_minute()?;
        let days = schedule.active_weekdays();
        if days.is_empty() {
            return None;
        }
        Some(Trigger::Weekly { hour, minute, days })
    }

    /// 注册或启动时的首次触发时间
    pub fn first_fire(&self, now: DateTime<Local>) -> Option<DateTime<Local>> {
        match self {
            Trigger::Once(at) => Some(*at),
            _ => self.next_fire_after(now),
        }
    }

    /// 严格晚于 `after` 的下一次触发时间
    pub fn next_fire_after(&self, after: DateTime<Local>) -> Option<DateTime<Local>> {
        match self {
            Trigger::Weekly { hour, minute, days } => {
                let time = NaiveTime::from_hms_opt(*hour, *minute, 0)?;
                let today = after.date_naive();
                (0..=7)
                    .filter_map(|offset| today.checked_add_days(chrono::Days::new(offset)))
                    .filter(|date| days.contains(&date.weekday()))
                    // 夏令时跳过的时刻没有对应的本地时间
                    .filter_map(|date| Local.from_local_datetime(&date.and_time(time)).earliest())
                    .find(|candidate| *candidate > after)
            }
            Trigger::Interval(interval) => {
                chrono::Duration::from_std(*interval).ok().map(|d| after + d)
            }
            Trigger::Once(at) => (*at > after).then_some(*at),
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Weekly { hour, minute, days } => {
                let days = days
                    .iter()
                    .map(|d| d.to_string())
                    .collect::<Vec<_>>()
                    .join(",");
                write!(f, "weekly {days} {hour:02}:{minute:02}")
            }
            Trigger::Interval(interval) => {
                let secs = interval.as_secs();
                if secs >= 60 && secs % 60 == 0 {
                    write!(f, "every {} min", secs / 60)
                } else {
                    write!(f, "every {secs} s")
                }
            }
            Trigger::Once(at) => write!(f, "once at {}", at.format("%Y-%m-%d %H:%M:%S")),
        }
    }
}

/// 错过触发时间后的处理
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FireDecision {
    Run,
    Skip,
}

/// 宽限期内补跑一次，超出则跳过
fn misfire_decision(
    scheduled: DateTime<Local>,
    now: DateTime<Local>,
    grace: chrono::Duration,
) -> FireDecision {
    if now - scheduled <= grace {
        FireDecision::Run
    } else {
        FireDecision::Skip
    }
}

struct Job {
    kind: JobKind,
    trigger: Trigger,
    next_fire: Option<DateTime<Local>>,
    /// 停止时尚未触发的时间，重新启动后交给宽限期判断
    parked_fire: Option<DateTime<Local>>,
    /// 备份任务对应的计划；手动任务为 None
    schedule: Option<Schedule>,
}

/// 任务快照（用于状态展示）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobInfo {
    pub id: String,
    pub kind: JobKind,
    pub trigger: String,
    pub next_fire: Option<DateTime<Local>>,
}

/// 调度器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    Stopped,
    Running,
    Paused,
}

struct EngineState {
    jobs: BTreeMap<String, Job>,
    running_jobs: HashSet<String>,
    status: EngineStatus,
    next_backup: Option<DateTime<Local>>,
    shutdown: Option<CancellationToken>,
}

impl EngineState {
    fn recompute_next_backup(&mut self) {
        self.next_backup = self
            .jobs
            .values()
            .filter(|job| job.kind == JobKind::Backup && !matches!(job.trigger, Trigger::Once(_)))
            .filter_map(|job| job.next_fire)
            .min();
    }

    fn insert_job(
        &mut self,
        id: String,
        kind: JobKind,
        trigger: Trigger,
        schedule: Option<Schedule>,
        now: DateTime<Local>,
    ) {
        let next_fire = match self.status {
            EngineStatus::Stopped => None,
            _ => trigger.first_fire(now),
        };
        self.jobs.insert(
            id,
            Job {
                kind,
                trigger,
                next_fire,
                parked_fire: None,
                schedule,
            },
        );
    }
}

struct EngineShared {
    state: Mutex<EngineState>,
    callbacks: JobCallbacks,
    wake: Notify,
    misfire_grace: chrono::Duration,
}

impl EngineShared {
    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 触发所有到期任务，返回距下一次检查的等待时间
    fn dispatch_due(self: &Arc<Self>, now: DateTime<Local>) -> Duration {
        let max_idle = Duration::from_secs(consts::MAX_IDLE_SECS);
        let mut to_spawn = Vec::new();

        {
            let mut state = self.lock();
            if state.status != EngineStatus::Running {
                return max_idle;
            }

            let EngineState {
                jobs, running_jobs, ..
            } = &mut *state;
            let mut finished = Vec::new();

            for (id, job) in jobs.iter_mut() {
                let Some(scheduled) = job.next_fire else {
                    continue;
                };
                if scheduled > now {
                    continue;
                }

                match misfire_decision(scheduled, now, self.misfire_grace) {
                    FireDecision::Run if running_jobs.contains(id) => {
                        warn!("任务 {} 上一次执行尚未结束，本次跳过", id);
                    }
                    FireDecision::Run => {
                        running_jobs.insert(id.clone());
                        to_spawn.push((id.clone(), job.kind, job.schedule.clone()));
                    }
                    FireDecision::Skip => {
                        warn!(
                            "任务 {} 错过触发时间 {}，已超出宽限期，跳过",
                            id,
                            scheduled.format("%Y-%m-%d %H:%M")
                        );
                    }
                }

                job.next_fire = job.trigger.next_fire_after(now);
                if job.next_fire.is_none() {
                    finished.push(id.clone());
                }
            }

            for id in finished {
                jobs.remove(&id);
            }
            state.recompute_next_backup();
        }

        for (id, kind, schedule) in to_spawn {
            self.spawn_job(id, kind, schedule);
        }

        let state = self.lock();
        state
            .jobs
            .values()
            .filter_map(|job| job.next_fire)
            .min()
            .map(|next| (next - Local::now()).to_std().unwrap_or(Duration::ZERO))
            .unwrap_or(max_idle)
            .min(max_idle)
    }

    fn spawn_job(self: &Arc<Self>, id: String, kind: JobKind, schedule: Option<Schedule>) {
        let shared = self.clone();

        tokio::spawn(async move {
            info!("执行任务: {} ({})", id, kind);
            let callbacks = shared.callbacks.clone();
            let job = async move { callbacks.job_future(kind, schedule).await };
            match AssertUnwindSafe(job).catch_unwind().await {
                Ok(Ok(())) => debug!("任务 {} 执行完成", id),
                Ok(Err(e)) => error!("任务 {} 执行失败: {}", id, e),
                Err(_) => error!("任务 {} 执行时发生 panic", id),
            }

            let mut state = shared.lock();
            state.running_jobs.remove(&id);
            state.recompute_next_backup();
        });
    }
}

/// 调度引擎：备份计划 + 配置同步 + 更新检查
#[derive(Clone)]
pub struct ScheduleEngine {
    shared: Arc<EngineShared>,
}

impl ScheduleEngine {
    pub fn new(callbacks: JobCallbacks) -> Self {
        Self {
            shared: Arc::new(EngineShared {
                state: Mutex::new(EngineState {
                    jobs: BTreeMap::new(),
                    running_jobs: HashSet::new(),
                    status: EngineStatus::Stopped,
                    next_backup: None,
                    shutdown: None,
                }),
                callbacks,
                wake: Notify::new(),
                misfire_grace: chrono::Duration::seconds(consts::MISFIRE_GRACE_SECS),
            }),
        }
    }

    /// 用新的计划列表替换全部备份任务，返回注册的任务数
    pub fn configure(&self, schedules: &[Schedule]) -> usize {
        let now = Local::now();
        let registered = {
            let mut state = self.shared.lock();
            state.jobs.retain(|id, job| {
                !(job.kind == JobKind::Backup && id.starts_with(consts::BACKUP_JOB_PREFIX))
            });

            let mut registered = 0;
            for (index, schedule) in schedules.iter().enumerate() {
                let Some(trigger) = Trigger::from_schedule(schedule) else {
                    warn!(
                        "跳过无效的备份计划 #{}: 时间={} 星期数={}",
                        index,
                        schedule.time_of_day,
                        schedule.active_weekdays().len()
                    );
                    continue;
                };

                let id = format!("{}_{}", consts::BACKUP_JOB_PREFIX, index);
                info!("注册备份任务 {}: {}", id, trigger);
                state.insert_job(id, JobKind::Backup, trigger, Some(schedule.clone()), now);
                registered += 1;
            }

            state.recompute_next_backup();
            registered
        };

        self.shared.wake.notify_one();
        registered
    }

    /// 注册配置同步和更新检查任务
    pub fn configure_maintenance_jobs(&self, sync_interval: Duration, update_interval: Duration) {
        let now = Local::now();
        {
            let mut state = self.shared.lock();
            state.insert_job(
                consts::CONFIG_SYNC_JOB_ID.to_string(),
                JobKind::ConfigSync,
                Trigger::Interval(sync_interval),
                None,
                now,
            );
            state.insert_job(
                consts::UPDATE_CHECK_JOB_ID.to_string(),
                JobKind::UpdateCheck,
                Trigger::Interval(update_interval),
                None,
                now,
            );
        }
        info!(
            "已注册维护任务: 配置同步每 {}s，更新检查每 {}s",
            sync_interval.as_secs(),
            update_interval.as_secs()
        );
        self.shared.wake.notify_one();
    }

    /// 立即执行一次备份
    pub fn trigger_now(&self) {
        let now = Local::now();
        {
            let mut state = self.shared.lock();
            state.insert_job(
                consts::MANUAL_BACKUP_JOB_ID.to_string(),
                JobKind::Backup,
                Trigger::Once(now),
                None,
                now,
            );
        }
        info!("已添加手动备份任务");
        self.shared.wake.notify_one();
    }

    /// 启动调度循环
    pub fn start(&self) {
        let now = Local::now();
        let token = {
            let mut state = self.shared.lock();
            if state.status != EngineStatus::Stopped {
                return;
            }

            state.status = EngineStatus::Running;
            for job in state.jobs.values_mut() {
                // 停止期间错过的触发保留下来，由 dispatch_due 按宽限期补跑一次或跳过
                job.next_fire = job
                    .parked_fire
                    .take()
                    .or_else(|| job.trigger.first_fire(now));
            }
            state.recompute_next_backup();

            let token = CancellationToken::new();
            state.shutdown = Some(token.clone());
            token
        };

        let shared = self.shared.clone();
        tokio::spawn(async move {
            info!("调度器已启动");
            loop {
                let wait = shared.dispatch_due(Local::now());
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = shared.wake.notified() => {}
                    _ = tokio::time::sleep(wait) => {}
                }
            }
            info!("调度器已停止");
        });
    }

    /// 停止调度，不等待正在执行的任务
    pub fn stop(&self) {
        let mut state = self.shared.lock();
        if let Some(token) = state.shutdown.take() {
            token.cancel();
        }
        state.status = EngineStatus::Stopped;
        for job in state.jobs.values_mut() {
            if let Some(at) = job.next_fire.take() {
                job.parked_fire = Some(at);
            }
        }
        state.next_backup = None;
    }

    pub fn pause(&self) {
        let mut state = self.shared.lock();
        if state.status == EngineStatus::Running {
            state.status = EngineStatus::Paused;
            info!("调度器已暂停");
        }
    }

    pub fn resume(&self) {
        {
            let mut state = self.shared.lock();
            if state.status != EngineStatus::Paused {
                return;
            }
            state.status = EngineStatus::Running;
        }
        info!("调度器已恢复");
        self.shared.wake.notify_one();
    }

    pub fn status(&self) -> EngineStatus {
        self.shared.lock().status
    }

    pub fn is_running(&self) -> bool {
        self.status() == EngineStatus::Running
    }

    /// 周期备份任务中最早的下一次触发时间
    pub fn next_backup_time(&self) -> Option<DateTime<Local>> {
        self.shared.lock().next_backup
    }

    pub fn jobs(&self) -> Vec<JobInfo> {
        self.shared
            .lock()
            .jobs
            .iter()
            .map(|(id, job)| JobInfo {
                id: id.clone(),
                kind: job.kind,
                trigger: job.trigger.to_string(),
                next_fire: job.next_fire,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn local(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    fn counting(counter: Arc<AtomicUsize>) -> JobCallback {
        Arc::new(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            .boxed()
        })
    }

    fn noop() -> JobCallback {
        Arc::new(|| async { Ok(()) }.boxed())
    }

    fn noop_backup() -> BackupCallback {
        Arc::new(|_: Option<Schedule>| async { Ok(()) }.boxed())
    }

    /// 记录每次备份收到的计划时间
    fn recording_backup(seen: Arc<Mutex<Vec<Option<String>>>>) -> BackupCallback {
        Arc::new(move |schedule: Option<Schedule>| {
            let seen = seen.clone();
            async move {
                seen.lock().unwrap().push(schedule.map(|s| s.time_of_day));
                Ok(())
            }
            .boxed()
        })
    }

    fn engine_with_backup(seen: Arc<Mutex<Vec<Option<String>>>>) -> ScheduleEngine {
        ScheduleEngine::new(JobCallbacks {
            backup: recording_backup(seen),
            config_sync: noop(),
            update_check: noop(),
        })
    }

    fn recorder() -> Arc<Mutex<Vec<Option<String>>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    fn schedule(time: &str, days: &[Weekday]) -> Schedule {
        Schedule {
            time_of_day: time.to_string(),
            monday: days.contains(&Weekday::Mon),
            tuesday: days.contains(&Weekday::Tue),
            wednesday: days.contains(&Weekday::Wed),
            thursday: days.contains(&Weekday::Thu),
            friday: days.contains(&Weekday::Fri),
            saturday: days.contains(&Weekday::Sat),
            sunday: days.contains(&Weekday::Sun),
            ..Default::default()
        }
    }

    #[test]
    fn test_weekly_next_fire() {
        let trigger = Trigger::Weekly {
            hour: 23,
            minute: 0,
            days: vec![Weekday::Mon, Weekday::Fri],
        };

        // 2024-03-06 是周三
        let wednesday = local(2024, 3, 6, 10, 0);
        assert_eq!(
            trigger.next_fire_after(wednesday),
            Some(local(2024, 3, 8, 23, 0))
        );

        let friday_late = local(2024, 3, 8, 23, 30);
        assert_eq!(
            trigger.next_fire_after(friday_late),
            Some(local(2024, 3, 11, 23, 0))
        );
    }

    #[test]
    fn test_weekly_same_day_and_exact_time() {
        let trigger = Trigger::Weekly {
            hour: 23,
            minute: 0,
            days: vec![Weekday::Wed],
        };
        assert_eq!(
            trigger.next_fire_after(local(2024, 3, 6, 10, 0)),
            Some(local(2024, 3, 6, 23, 0))
        );
        // 恰好在触发时刻时取下一周
        assert_eq!(
            trigger.next_fire_after(local(2024, 3, 6, 23, 0)),
            Some(local(2024, 3, 13, 23, 0))
        );
    }

    #[test]
    fn test_once_and_interval() {
        let at = local(2024, 3, 6, 10, 0);
        let once = Trigger::Once(at);
        assert_eq!(once.first_fire(local(2024, 3, 6, 11, 0)), Some(at));
        assert_eq!(once.next_fire_after(at), None);

        let interval = Trigger::Interval(Duration::from_secs(1800));
        assert_eq!(interval.next_fire_after(at), Some(local(2024, 3, 6, 10, 30)));
        assert_eq!(interval.to_string(), "every 30 min");
    }

    #[test]
    fn test_misfire_decision() {
        let grace = chrono::Duration::hours(1);
        let scheduled = local(2024, 3, 6, 23, 0);
        assert_eq!(
            misfire_decision(scheduled, local(2024, 3, 6, 23, 30), grace),
            FireDecision::Run
        );
        assert_eq!(
            misfire_decision(scheduled, local(2024, 3, 7, 1, 0), grace),
            FireDecision::Skip
        );
    }

    #[test]
    fn test_invalid_schedules_register_no_jobs() {
        let engine = engine_with_backup(recorder());

        let registered = engine.configure(&[
            schedule("23:00", &[]),
            schedule("99:00", &[Weekday::Mon]),
            schedule("22:15", &[Weekday::Tue, Weekday::Thu]),
        ]);

        assert_eq!(registered, 1);
        let jobs = engine.jobs();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, "backup_job_2");
        assert_eq!(jobs[0].trigger, "weekly Tue,Thu 22:15");
    }

    #[tokio::test]
    async fn test_configure_keeps_maintenance_jobs() {
        let engine = engine_with_backup(recorder());
        engine.configure_maintenance_jobs(Duration::from_secs(1800), Duration::from_secs(3600));
        engine.configure(&[schedule("23:00", &[Weekday::Mon])]);
        engine.configure(&[schedule("08:00", &[Weekday::Sat])]);

        let ids: Vec<String> = engine.jobs().into_iter().map(|j| j.id).collect();
        assert_eq!(ids, vec!["backup_job_0", "config_sync_job", "update_check_job"]);
    }

    #[tokio::test]
    async fn test_next_backup_only_while_running() {
        let engine = engine_with_backup(recorder());
        engine.configure(&[schedule("23:00", &[Weekday::Mon, Weekday::Wed])]);
        assert!(engine.next_backup_time().is_none());

        engine.start();
        let next = engine.next_backup_time().unwrap();
        assert!(next > Local::now());

        engine.stop();
        assert!(engine.next_backup_time().is_none());
        assert!(engine.jobs().iter().all(|j| j.next_fire.is_none()));
    }

    #[tokio::test]
    async fn test_trigger_now_runs_once() {
        let seen = recorder();
        let engine = engine_with_backup(seen.clone());
        engine.start();

        engine.trigger_now();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(*seen.lock().unwrap(), vec![None]);
        assert!(engine.jobs().is_empty());
        engine.stop();
    }

    #[tokio::test]
    async fn test_late_job_is_skipped_beyond_grace() {
        let seen = recorder();
        let engine = engine_with_backup(seen.clone());
        engine.configure(&[schedule("23:00", &[Weekday::Mon])]);

        {
            let mut state = engine.shared.lock();
            state.status = EngineStatus::Running;
            let job = state.jobs.get_mut("backup_job_0").unwrap();
            job.next_fire = Some(Local::now() - chrono::Duration::hours(3));
        }

        engine.shared.dispatch_due(Local::now());
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(seen.lock().unwrap().is_empty());
        let next = engine.jobs()[0].next_fire.unwrap();
        assert!(next > Local::now());
    }

    #[tokio::test]
    async fn test_single_running_instance_per_job() {
        let current = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let runs = Arc::new(AtomicUsize::new(0));

        let slow: JobCallback = {
            let (current, max_seen, runs) = (current.clone(), max_seen.clone(), runs.clone());
            Arc::new(move || {
                let (current, max_seen, runs) = (current.clone(), max_seen.clone(), runs.clone());
                async move {
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    runs.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(150)).await;
                    current.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                }
                .boxed()
            })
        };

        let engine = ScheduleEngine::new(JobCallbacks {
            backup: noop_backup(),
            config_sync: slow,
            update_check: noop(),
        });
        engine.configure_maintenance_jobs(Duration::from_millis(20), Duration::from_secs(3600));
        engine.start();

        tokio::time::sleep(Duration::from_millis(400)).await;
        engine.stop();

        assert!(runs.load(Ordering::SeqCst) >= 2);
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_paused_engine_does_not_fire() {
        let counter = Arc::new(AtomicUsize::new(0));
        let engine = ScheduleEngine::new(JobCallbacks {
            backup: noop_backup(),
            config_sync: noop(),
            update_check: counting(counter.clone()),
        });
        engine.configure_maintenance_jobs(Duration::from_secs(3600), Duration::from_millis(30));
        engine.start();
        engine.pause();
        assert_eq!(engine.status(), EngineStatus::Paused);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        engine.resume();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(counter.load(Ordering::SeqCst) >= 1);
        engine.stop();
    }

    #[tokio::test]
    async fn test_failing_job_is_contained() {
        let engine = ScheduleEngine::new(JobCallbacks {
            backup: Arc::new(|_: Option<Schedule>| {
                async { Err(crate::error::BackupError::backup("磁盘已满")) }.boxed()
            }),
            config_sync: noop(),
            update_check: noop(),
        });
        engine.start();
        engine.trigger_now();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(engine.is_running());
        assert!(engine.shared.lock().running_jobs.is_empty());
        engine.stop();
    }

    #[tokio::test]
    async fn test_each_backup_job_carries_its_schedule() {
        let seen = recorder();
        let engine = engine_with_backup(seen.clone());
        engine.configure(&[
            schedule("23:00", &[Weekday::Mon]),
            schedule("08:00", &[Weekday::Sun]),
        ]);

        {
            let mut state = engine.shared.lock();
            state.status = EngineStatus::Running;
            let job = state.jobs.get_mut("backup_job_1").unwrap();
            job.next_fire = Some(Local::now() - chrono::Duration::minutes(1));
        }

        engine.shared.dispatch_due(Local::now());
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(*seen.lock().unwrap(), vec![Some("08:00".to_string())]);
    }

    #[tokio::test]
    async fn test_restart_keeps_pending_fire_time() {
        let engine = engine_with_backup(recorder());
        engine.configure(&[schedule("23:00", &[Weekday::Mon, Weekday::Thu])]);

        engine.start();
        let before = engine.jobs()[0].next_fire;
        assert!(before.is_some());

        engine.stop();
        assert!(engine.jobs()[0].next_fire.is_none());

        engine.start();
        assert_eq!(engine.jobs()[0].next_fire, before);
        engine.stop();
    }

    #[tokio::test]
    async fn test_missed_fires_coalesce_after_restart() {
        let counter = Arc::new(AtomicUsize::new(0));
        let engine = ScheduleEngine::new(JobCallbacks {
            backup: noop_backup(),
            config_sync: counting(counter.clone()),
            update_check: noop(),
        });
        engine.configure_maintenance_jobs(Duration::from_secs(10), Duration::from_secs(3600));
        engine.start();
        engine.stop();

        // 停止期间错过了三个周期，仍在宽限期内
        {
            let mut state = engine.shared.lock();
            let job = state.jobs.get_mut("config_sync_job").unwrap();
            job.parked_fire = Some(Local::now() - chrono::Duration::seconds(35));
        }

        engine.start();
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        let sync_job = engine
            .jobs()
            .into_iter()
            .find(|j| j.id == "config_sync_job")
            .unwrap();
        assert!(sync_job.next_fire.unwrap() > Local::now());
        engine.stop();
    }
}
