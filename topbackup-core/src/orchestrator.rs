use crate::collaborators::{DumpTool, LocalDatabase, RemoteStore, RemoteUploader};
use crate::config::{AppConfig, ConfigStore, UploadConfig};
use crate::constants::{store, timeout};
use crate::error::{BackupError, Result};
use crate::guarded::{GuardedLocalDatabase, GuardedRemoteStore, GuardedUploader};
use crate::models::{BackupRun, Company, NamingMode, Schedule};
use crate::pipeline::{BackupOutcome, BackupPipeline, BackupResult};
use crate::reconcile::{ReconciliationManager, apply_config_destinations};
use crate::scheduler::{BackupCallback, JobCallback, JobCallbacks, JobInfo, ScheduleEngine};
use crate::update::UpdateChecker;
use chrono::{DateTime, Local};
use futures::FutureExt;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

/// 应用状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AppState {
    Initializing,
    Running,
    BackupRunning,
    Paused,
    Error,
    Stopped,
}

impl fmt::Display for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            AppState::Initializing => "初始化中",
            AppState::Running => "运行中",
            AppState::BackupRunning => "备份中",
            AppState::Paused => "已暂停",
            AppState::Error => "错误",
            AppState::Stopped => "已停止",
        };
        f.write_str(text)
    }
}

pub type StateCallback = Arc<dyn Fn(AppState) + Send + Sync>;
/// 空字符串表示清除进度
pub type ProgressObserver = Arc<dyn Fn(&str) + Send + Sync>;
/// (标题, 内容)
pub type NotificationCallback = Arc<dyn Fn(&str, &str) + Send + Sync>;
pub type UploaderFactory =
    Arc<dyn Fn(&UploadConfig) -> Result<Arc<dyn RemoteUploader>> + Send + Sync>;

/// 界面层观察者，回调在调用线程上同步执行
#[derive(Clone, Default)]
pub struct Observers {
    pub on_state_change: Option<StateCallback>,
    pub on_progress: Option<ProgressObserver>,
    pub on_notification: Option<NotificationCallback>,
}

impl Observers {
    fn state(&self, state: AppState) {
        if let Some(callback) = &self.on_state_change {
            callback(state);
        }
    }

    fn progress(&self, message: &str) {
        if let Some(callback) = &self.on_progress {
            callback(message);
        }
    }

    fn notify(&self, title: &str, message: &str) {
        if let Some(callback) = &self.on_notification {
            callback(title, message);
        }
    }
}

/// 外部协作者
pub struct Collaborators {
    pub local: Arc<dyn LocalDatabase>,
    pub remote: Arc<dyn RemoteStore>,
    pub dump_tool: Arc<dyn DumpTool>,
    pub uploader_factory: Option<UploaderFactory>,
}

/// 状态快照
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub state: AppState,
    pub error_message: Option<String>,
    pub company_name: Option<String>,
    pub tax_id: Option<String>,
    pub destination1: Option<String>,
    pub destination2: Option<String>,
    pub naming_mode: Option<NamingMode>,
    pub next_backup: Option<DateTime<Local>>,
    pub last_result: Option<BackupResult>,
    pub remote_reachable: bool,
    #[serde(skip)]
    pub jobs: Vec<JobInfo>,
}

/// 初始化成功后才提交的组件
#[derive(Clone)]
struct Components {
    reconcile: Arc<ReconciliationManager>,
    pipeline: Arc<BackupPipeline>,
    engine: ScheduleEngine,
    uploader: Option<Arc<dyn RemoteUploader>>,
    updater: Arc<UpdateChecker>,
}

struct Runtime {
    state: AppState,
    error_message: Option<String>,
    components: Option<Components>,
    company: Option<Company>,
    schedule: Option<Schedule>,
    last_result: Option<BackupResult>,
}

struct Inner {
    config: ConfigStore,
    local: Arc<dyn LocalDatabase>,
    remote: Arc<dyn RemoteStore>,
    dump_tool: Arc<dyn DumpTool>,
    uploader_factory: Option<UploaderFactory>,
    observers: Observers,
    runtime: Mutex<Runtime>,
    tasks: TaskTracker,
}

/// 应用控制器：初始化、调度、备份执行和状态管理
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new(config: ConfigStore, collaborators: Collaborators, observers: Observers) -> Self {
        let local: Arc<dyn LocalDatabase> =
            Arc::new(GuardedLocalDatabase::new(collaborators.local));
        let remote: Arc<dyn RemoteStore> =
            Arc::new(GuardedRemoteStore::new(collaborators.remote));

        Self {
            inner: Arc::new(Inner {
                config,
                local,
                remote,
                dump_tool: collaborators.dump_tool,
                uploader_factory: collaborators.uploader_factory,
                observers,
                runtime: Mutex::new(Runtime {
                    state: AppState::Initializing,
                    error_message: None,
                    components: None,
                    company: None,
                    schedule: None,
                    last_result: None,
                }),
                tasks: TaskTracker::new(),
            }),
        }
    }

    fn runtime(&self) -> MutexGuard<'_, Runtime> {
        self.inner
            .runtime
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: AppState) {
        let changed = {
            let mut runtime = self.runtime();
            let changed = runtime.state != state;
            runtime.state = state;
            changed
        };
        if changed {
            info!("状态变更: {}", state);
            self.inner.observers.state(state);
        }
    }

    pub fn state(&self) -> AppState {
        self.runtime().state
    }

    pub fn config(&self) -> &ConfigStore {
        &self.inner.config
    }

    fn components(&self) -> Result<Components> {
        self.runtime()
            .components
            .clone()
            .ok_or_else(|| BackupError::configuration("应用尚未初始化"))
    }

    /// 初始化：连通性检查、建表、同步、组件装配
    pub async fn initialize(&self) -> Result<()> {
        self.set_state(AppState::Initializing);

        let previous = self.runtime().components.take();
        if let Some(previous) = previous {
            previous.engine.stop();
        }

        match self.build_components().await {
            Ok((components, company, schedule)) => {
                let mut runtime = self.runtime();
                runtime.components = Some(components);
                runtime.company = Some(company);
                runtime.schedule = schedule;
                runtime.error_message = None;
                info!("初始化完成");
                Ok(())
            }
            Err(e) => {
                error!("初始化失败: {}", e);
                self.runtime().error_message = Some(e.to_string());
                self.set_state(AppState::Error);
                self.inner.observers.notify("初始化失败", &e.to_string());
                Err(e)
            }
        }
    }

    async fn build_components(&self) -> Result<(Components, Company, Option<Schedule>)> {
        let inner = &self.inner;

        inner.local.test_connection().await.map_err(|e| {
            BackupError::connectivity(format!("无法连接本地数据库: {e}"))
        })?;
        inner.remote.test_connection().await.map_err(|e| {
            BackupError::connectivity(format!("无法连接远程存储: {e}"))
        })?;
        inner.remote.ensure_schema().await?;

        let reconcile = Arc::new(ReconciliationManager::new(
            inner.local.clone(),
            inner.remote.clone(),
            inner.config.clone(),
        ));

        reconcile.sync_company().await?;
        if let Err(e) = reconcile.sync_schedule().await {
            warn!("备份计划同步失败，继续使用现有配置: {}", e);
        }

        let company = reconcile
            .company()
            .await?
            .ok_or_else(|| BackupError::configuration("本地数据源中未找到公司信息"))?;
        let schedule = reconcile.schedule().await.unwrap_or_else(|e| {
            warn!("读取备份计划失败: {}", e);
            None
        });

        let pipeline = Arc::new(BackupPipeline::new(
            inner.config.clone(),
            inner.dump_tool.clone(),
            Some(inner.remote.clone()),
        ));
        let observers = inner.observers.clone();
        pipeline.set_progress_callback(Arc::new(move |message: &str| observers.progress(message)));

        let engine = ScheduleEngine::new(self.job_callbacks());
        let config = inner.config.snapshot();
        let schedules = self.effective_schedules(&reconcile, schedule.as_ref()).await;
        engine.configure(&schedules);
        engine.configure_maintenance_jobs(
            Duration::from_secs(config.app.sync_interval_minutes.max(1) * 60),
            Duration::from_secs(config.app.update_check_interval_minutes.max(1) * 60),
        );

        let components = Components {
            reconcile,
            pipeline,
            engine,
            uploader: self.build_uploader(&config, &schedules),
            updater: Arc::new(UpdateChecker::new(inner.remote.clone())),
        };
        Ok((components, company, schedule))
    }

    /// 全部计划；数据源中没有时退回缓存的主计划
    async fn effective_schedules(
        &self,
        reconcile: &ReconciliationManager,
        cached: Option<&Schedule>,
    ) -> Vec<Schedule> {
        match reconcile.all_schedules().await {
            Ok(schedules) if !schedules.is_empty() => schedules,
            Ok(_) => cached.cloned().into_iter().collect(),
            Err(e) => {
                warn!("读取备份计划列表失败，使用缓存计划: {}", e);
                cached.cloned().into_iter().collect()
            }
        }
    }

    /// 任一计划启用远程备份且上传服务器已配置时才创建上传器
    fn build_uploader(
        &self,
        config: &AppConfig,
        schedules: &[Schedule],
    ) -> Option<Arc<dyn RemoteUploader>> {
        let remote_wanted =
            config.backup.remote_backup || schedules.iter().any(|s| s.remote_backup);
        if !remote_wanted || !config.upload.is_configured() {
            return None;
        }
        let factory = self.inner.uploader_factory.as_ref()?;
        match factory(&config.upload) {
            Ok(uploader) => Some(Arc::new(GuardedUploader::new(uploader))),
            Err(e) => {
                warn!("创建上传器失败，远程备份不可用: {}", e);
                None
            }
        }
    }

    fn job_callbacks(&self) -> JobCallbacks {
        let weak = Arc::downgrade(&self.inner);

        JobCallbacks {
            backup: backup_job(&weak),
            config_sync: job(&weak, |app| async move { app.sync_and_reschedule().await }.boxed()),
            update_check: job(&weak, |app| async move { app.periodic_update_check().await }.boxed()),
        }
    }

    /// 启动调度
    pub async fn start(&self) -> Result<()> {
        let components = self.components()?;
        components.engine.start();
        self.touch_interaction().await;
        self.set_state(AppState::Running);

        if let Some(next) = components.engine.next_backup_time() {
            info!("下次备份时间: {}", next.format("%Y-%m-%d %H:%M"));
        }

        if self.inner.config.snapshot().app.auto_update {
            let app = self.clone();
            self.inner.tasks.spawn(async move {
                app.check_for_updates().await;
            });
        }
        Ok(())
    }

    /// 手动备份
    pub async fn execute_backup_manual(&self) -> BackupResult {
        self.execute_backup(true, None).await
    }

    /// 共用的备份执行路径；`schedule` 为空时使用主计划
    async fn execute_backup(&self, is_manual: bool, schedule: Option<Schedule>) -> BackupResult {
        let (components, company, schedule, previous) = {
            let mut runtime = self.runtime();
            if runtime.state == AppState::BackupRunning {
                warn!("备份正在进行中，忽略新的请求");
                return BackupResult::rejected("备份正在进行中");
            }
            if matches!(runtime.state, AppState::Error | AppState::Stopped) {
                return BackupResult::rejected(format!("当前状态无法备份: {}", runtime.state));
            }
            let (Some(components), Some(company)) =
                (runtime.components.clone(), runtime.company.clone())
            else {
                return BackupResult::rejected("应用尚未初始化");
            };
            let schedule = schedule
                .or_else(|| runtime.schedule.clone())
                .unwrap_or_else(|| schedule_from_config(&self.inner.config.snapshot()));

            let previous = runtime.state;
            runtime.state = AppState::BackupRunning;
            (components, company, schedule, previous)
        };
        self.inner.observers.state(AppState::BackupRunning);
        let _running = BackupStateGuard {
            app: self,
            previous,
        };

        let result = components
            .pipeline
            .execute(&company, &schedule, is_manual)
            .await;

        match result.outcome {
            BackupOutcome::Success => {
                self.touch_interaction().await;
                let message = format!(
                    "{} ({})",
                    result.file_name.as_deref().unwrap_or_default(),
                    result.size_formatted
                );
                self.inner.observers.notify("备份完成", &message);

                if schedule.remote_backup {
                    self.spawn_upload(&components, &result);
                }
            }
            BackupOutcome::Failed => self.inner.observers.notify("备份失败", &result.message),
            BackupOutcome::Cancelled => self.inner.observers.notify("备份已取消", &result.message),
            BackupOutcome::NotScheduled => {}
        }

        self.runtime().last_result = Some(result.clone());
        result
    }

    fn spawn_upload(&self, components: &Components, result: &BackupResult) {
        let (Some(uploader), Some(path)) = (components.uploader.clone(), result.path.clone()) else {
            warn!("远程备份已启用，但上传服务器未配置");
            return;
        };
        let run = result.run.clone();
        let remote = self.inner.remote.clone();
        let observers = self.inner.observers.clone();

        self.inner.tasks.spawn(async move {
            upload_and_record(uploader, remote, path, run, observers).await;
        });
    }

    /// 取消正在进行的备份
    pub fn cancel_backup(&self) -> bool {
        let runtime = self.runtime();
        match (&runtime.components, runtime.state) {
            (Some(components), AppState::BackupRunning) => {
                components.pipeline.cancel();
                true
            }
            _ => false,
        }
    }

    pub fn pause(&self) {
        if self.state() != AppState::Running {
            return;
        }
        if let Ok(components) = self.components() {
            components.engine.pause();
        }
        self.set_state(AppState::Paused);
    }

    pub fn resume(&self) {
        if self.state() != AppState::Paused {
            return;
        }
        if let Ok(components) = self.components() {
            components.engine.resume();
        }
        self.set_state(AppState::Running);
    }

    pub fn stop(&self) {
        if let Ok(components) = self.components() {
            components.engine.stop();
        }
        self.set_state(AppState::Stopped);
    }

    /// 停止调度并等待后台任务（上传、更新检查）结束
    pub async fn shutdown(&self) {
        self.cancel_backup();
        self.stop();

        self.inner.tasks.close();
        let grace = Duration::from_secs(timeout::SHUTDOWN_GRACE);
        if tokio::time::timeout(grace, self.inner.tasks.wait())
            .await
            .is_err()
        {
            warn!("后台任务在 {}s 内未结束，强制退出", grace.as_secs());
        }
        info!("已关闭");
    }

    /// 轻量刷新：重新读取配置并修正缓存计划的目标目录
    pub fn refresh_settings(&self) -> Result<()> {
        let config = self.inner.config.reload()?;

        let mut runtime = self.runtime();
        if let Some(schedule) = runtime.schedule.as_mut() {
            apply_config_destinations(schedule, &config);
        }
        if let Some(components) = &runtime.components {
            components.reconcile.patch_cached_schedule(&config);
        }
        info!("设置已刷新");
        Ok(())
    }

    /// 完整重载；`force_from_local` 时以本地数据源的目标目录和命名方式为准
    pub async fn reload_config(&self, force_from_local: bool) -> Result<()> {
        let components = self.components()?;
        self.inner.config.reload()?;
        components.reconcile.refresh();

        let schedule = if force_from_local {
            Some(components.reconcile.sync_schedule_from_local().await?)
        } else {
            components.reconcile.full_sync().await?;
            components.reconcile.schedule().await?
        };
        let company = components.reconcile.company().await?;

        let schedules = self
            .effective_schedules(&components.reconcile, schedule.as_ref())
            .await;
        components.engine.configure(&schedules);

        let config = self.inner.config.snapshot();
        components.engine.configure_maintenance_jobs(
            Duration::from_secs(config.app.sync_interval_minutes.max(1) * 60),
            Duration::from_secs(config.app.update_check_interval_minutes.max(1) * 60),
        );
        let uploader = self.build_uploader(&config, &schedules);

        {
            let mut runtime = self.runtime();
            if let Some(company) = company {
                runtime.company = Some(company);
            }
            if schedule.is_some() {
                runtime.schedule = schedule;
            }
            if let Some(current) = runtime.components.as_mut() {
                current.uploader = uploader;
            }
        }
        info!("配置已重新加载");
        Ok(())
    }

    /// 配置同步任务：同步计划并重新注册备份任务
    async fn sync_and_reschedule(&self) -> Result<()> {
        let components = self.components()?;
        let schedule = components.reconcile.sync_schedule().await?;
        let schedules = self
            .effective_schedules(&components.reconcile, Some(&schedule))
            .await;
        let registered = components.engine.configure(&schedules);
        self.runtime().schedule = Some(schedule);
        info!("配置同步完成，已注册 {} 个备份任务", registered);
        Ok(())
    }

    /// 更新检查任务：先更新交互时间，再按设置检查更新
    async fn periodic_update_check(&self) -> Result<()> {
        self.touch_interaction().await;
        if self.inner.config.snapshot().app.auto_update {
            self.check_for_updates().await;
        }
        Ok(())
    }

    async fn check_for_updates(&self) {
        let Ok(components) = self.components() else {
            return;
        };
        match components.updater.check().await {
            Ok(Some(update)) => {
                let message = format!(
                    "{} -> {}",
                    components.updater.current_version(),
                    update.version
                );
                self.inner.observers.notify("发现新版本", &message);
            }
            Ok(None) => {}
            Err(e) => warn!("检查更新失败: {}", e),
        }
    }

    async fn touch_interaction(&self) {
        let Some(company_id) = self.company_id() else {
            return;
        };
        if let Err(e) = self.inner.remote.touch_interaction(company_id).await {
            warn!("更新交互时间失败: {}", e);
        }
    }

    fn company_id(&self) -> Option<i64> {
        let from_cache = self.runtime().company.as_ref().and_then(|c| c.id);
        from_cache.or(self.inner.config.snapshot().app.company_id)
    }

    /// 备份历史（最新在前）
    pub async fn backup_history(&self, limit: Option<usize>) -> Result<Vec<BackupRun>> {
        let company_id = self
            .company_id()
            .ok_or_else(|| BackupError::configuration("公司尚未同步"))?;
        self.inner
            .remote
            .runs_by_company(company_id, limit.unwrap_or(store::DEFAULT_HISTORY_LIMIT))
            .await
    }

    pub fn last_backup_result(&self) -> Option<BackupResult> {
        self.runtime().last_result.clone()
    }

    pub fn next_backup_time(&self) -> Option<DateTime<Local>> {
        self.components()
            .ok()
            .and_then(|c| c.engine.next_backup_time())
    }

    /// 当前状态快照
    pub async fn status(&self) -> StatusSnapshot {
        let remote_reachable = self.inner.remote.test_connection().await.is_ok();
        let config = self.inner.config.snapshot();
        let runtime = self.runtime();

        let schedule = runtime.schedule.as_ref();
        let (next_backup, jobs) = match &runtime.components {
            Some(c) => (c.engine.next_backup_time(), c.engine.jobs()),
            None => (None, Vec::new()),
        };

        StatusSnapshot {
            state: runtime.state,
            error_message: runtime.error_message.clone(),
            company_name: runtime.company.as_ref().map(|c| c.display_name.clone()),
            tax_id: runtime.company.as_ref().map(|c| c.normalized_tax_id()),
            destination1: schedule
                .map(|s| s.destination1.clone())
                .or_else(|| non_empty(&config.backup.destination1)),
            destination2: schedule
                .and_then(|s| s.secondary_destination().map(str::to_string))
                .or_else(|| non_empty(&config.backup.destination2)),
            naming_mode: Some(schedule.map_or(config.backup.naming_mode, |s| s.naming_mode)),
            next_backup,
            last_result: runtime.last_result.clone(),
            remote_reachable,
            jobs,
        }
    }
}

/// 备份结束时释放 `BackupRunning`，future 被取消或丢弃时同样生效
///
/// 期间状态已被 stop/shutdown 改变时保持不动。
struct BackupStateGuard<'a> {
    app: &'a Orchestrator,
    previous: AppState,
}

impl Drop for BackupStateGuard<'_> {
    fn drop(&mut self) {
        let restored = if self.previous == AppState::Paused {
            AppState::Paused
        } else {
            AppState::Running
        };

        let released = {
            let mut runtime = self.app.runtime();
            let still_running = runtime.state == AppState::BackupRunning;
            if still_running {
                runtime.state = restored;
            }
            still_running
        };

        if released {
            info!("状态变更: {}", restored);
            self.app.inner.observers.state(restored);
        }
        self.app.inner.observers.progress("");
    }
}

/// 计划备份任务回调，每个任务带着自己的计划执行
fn backup_job(weak: &Weak<Inner>) -> BackupCallback {
    let weak = weak.clone();
    Arc::new(move |schedule: Option<Schedule>| match weak.upgrade() {
        Some(inner) => {
            let app = Orchestrator { inner };
            async move {
                let result = app.execute_backup(false, schedule).await;
                if result.outcome == BackupOutcome::Failed {
                    warn!("计划备份未成功: {}", result.message);
                }
                Ok(())
            }
            .boxed()
        }
        None => async { Ok(()) }.boxed(),
    })
}

/// 以弱引用构造任务回调，控制器释放后任务直接返回
fn job<F>(weak: &Weak<Inner>, run: F) -> JobCallback
where
    F: Fn(Orchestrator) -> futures::future::BoxFuture<'static, Result<()>> + Send + Sync + 'static,
{
    let weak = weak.clone();
    Arc::new(move || match weak.upgrade() {
        Some(inner) => run(Orchestrator { inner }),
        None => async { Ok(()) }.boxed(),
    })
}

async fn upload_and_record(
    uploader: Arc<dyn RemoteUploader>,
    remote: Arc<dyn RemoteStore>,
    path: PathBuf,
    run: Option<BackupRun>,
    observers: Observers,
) {
    match uploader.upload(&path).await {
        Ok(()) => {
            if let Some(mut run) = run.filter(|r| r.id.is_some()) {
                run.mark_uploaded();
                if let Err(e) = remote.update_backup_run(&run).await {
                    warn!("更新上传状态失败: {}", e);
                }
            }
        }
        Err(e) => {
            warn!("远程上传失败 {}: {}", path.display(), e);
            observers.notify("远程上传失败", &e.to_string());
        }
    }
}

/// 本地数据源没有计划时，按配置构造一个
fn schedule_from_config(config: &AppConfig) -> Schedule {
    Schedule {
        destination1: config.backup.destination1.clone(),
        destination2: non_empty(&config.backup.destination2),
        remote_backup: config.backup.remote_backup,
        naming_mode: config.backup.naming_mode,
        ..Default::default()
    }
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::DumpRequest;
    use crate::models::RunStatus;
    use crate::store::HistoryStore;
    use async_trait::async_trait;
    use chrono::{Datelike, Weekday};
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::{TempDir, tempdir};

    struct MemoryLocal {
        company: Option<Company>,
        schedules: Vec<Schedule>,
    }

    #[async_trait]
    impl LocalDatabase for MemoryLocal {
        async fn test_connection(&self) -> Result<()> {
            Ok(())
        }

        async fn company(&self) -> Result<Option<Company>> {
            Ok(self.company.clone())
        }

        async fn schedule(&self) -> Result<Option<Schedule>> {
            Ok(self.schedules.first().cloned())
        }

        async fn all_schedules(&self) -> Result<Vec<Schedule>> {
            Ok(self.schedules.clone())
        }

        async fn system_version(&self) -> Result<Option<String>> {
            Ok(None)
        }
    }

    struct FakeDump {
        calls: AtomicUsize,
        delay: Duration,
    }

    #[async_trait]
    impl DumpTool for FakeDump {
        async fn dump(&self, request: &DumpRequest) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            tokio::fs::write(&request.output, vec![1u8; 8192]).await?;
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingUploader {
        uploaded: Mutex<Vec<PathBuf>>,
    }

    #[async_trait]
    impl RemoteUploader for RecordingUploader {
        async fn upload(&self, path: &Path) -> Result<()> {
            assert!(path.exists());
            self.uploaded.lock().unwrap().push(path.to_path_buf());
            Ok(())
        }
    }

    struct Harness {
        root: TempDir,
        destination: PathBuf,
        app: Orchestrator,
        dump: Arc<FakeDump>,
        uploader: Arc<RecordingUploader>,
        store: HistoryStore,
        states: Arc<Mutex<Vec<AppState>>>,
        progress: Arc<Mutex<Vec<String>>>,
    }

    async fn harness(with_company: bool, remote_backup: bool, delay: Duration) -> Harness {
        harness_with(with_company, delay, |destination| {
            vec![Schedule {
                time_of_day: "23:30".to_string(),
                destination1: destination.to_string_lossy().to_string(),
                remote_backup,
                ..Default::default()
            }]
        })
        .await
    }

    /// 只在指定星期执行的计划
    fn only_on(weekday: Weekday, destination: &Path) -> Schedule {
        let mut schedule = Schedule {
            time_of_day: "23:30".to_string(),
            monday: false,
            tuesday: false,
            wednesday: false,
            thursday: false,
            friday: false,
            destination1: destination.to_string_lossy().to_string(),
            ..Default::default()
        };
        match weekday {
            Weekday::Mon => schedule.monday = true,
            Weekday::Tue => schedule.tuesday = true,
            Weekday::Wed => schedule.wednesday = true,
            Weekday::Thu => schedule.thursday = true,
            Weekday::Fri => schedule.friday = true,
            Weekday::Sat => schedule.saturday = true,
            Weekday::Sun => schedule.sunday = true,
        }
        schedule
    }

    /// `schedules` 收到主备份目录，返回本地数据源中的计划列表
    async fn harness_with(
        with_company: bool,
        delay: Duration,
        schedules: impl FnOnce(&Path) -> Vec<Schedule>,
    ) -> Harness {
        let root = tempdir().unwrap();
        let tool = root.path().join("gbak");
        let database = root.path().join("ERP.FDB");
        std::fs::write(&tool, b"tool").unwrap();
        std::fs::write(&database, b"db").unwrap();
        let destination = root.path().join("destino");

        let mut config = AppConfig::default();
        config.local_db.dump_tool_path = tool.to_string_lossy().to_string();
        config.local_db.database_path = database.to_string_lossy().to_string();
        config.backup.temp_dir = root.path().join("temp").to_string_lossy().to_string();
        config.upload.host = "files.example.com".to_string();
        config.app.auto_update = false;

        let company = Company {
            id: None,
            local_id: Some(1),
            display_name: "Farmácia Boa Saúde".to_string(),
            legal_name: "Farmácia Boa Saúde LTDA".to_string(),
            tax_id: "11.222.333/0001-44".to_string(),
            last_interaction: None,
            local_version: None,
            created_at: None,
            active: true,
        };
        let local = MemoryLocal {
            company: with_company.then_some(company),
            schedules: schedules(&destination),
        };
        let store = HistoryStore::open_in_memory().await.unwrap();
        let dump = Arc::new(FakeDump {
            calls: AtomicUsize::new(0),
            delay,
        });
        let uploader = Arc::new(RecordingUploader::default());
        let factory_uploader = uploader.clone();

        let states = Arc::new(Mutex::new(Vec::new()));
        let progress = Arc::new(Mutex::new(Vec::new()));
        let (state_sink, progress_sink) = (states.clone(), progress.clone());
        let observers = Observers {
            on_state_change: Some(Arc::new(move |s: AppState| state_sink.lock().unwrap().push(s))),
            on_progress: Some(Arc::new(move |m: &str| {
                progress_sink.lock().unwrap().push(m.to_string())
            })),
            on_notification: None,
        };

        let app = Orchestrator::new(
            ConfigStore::in_memory(config),
            Collaborators {
                local: Arc::new(local),
                remote: Arc::new(store.clone()),
                dump_tool: dump.clone(),
                uploader_factory: Some(Arc::new(
                    move |_: &UploadConfig| -> Result<Arc<dyn RemoteUploader>> {
                        Ok(factory_uploader.clone())
                    },
                )),
            },
            observers,
        );

        Harness {
            root,
            destination,
            app,
            dump,
            uploader,
            store,
            states,
            progress,
        }
    }

    #[tokio::test]
    async fn test_initialize_and_start() {
        let h = harness(true, false, Duration::ZERO).await;
        h.app.initialize().await.unwrap();
        h.app.start().await.unwrap();

        assert_eq!(h.app.state(), AppState::Running);
        assert!(h.app.next_backup_time().is_some());

        let status = h.app.status().await;
        assert_eq!(status.tax_id.as_deref(), Some("11222333000144"));
        assert!(status.remote_reachable);
        assert!(status.jobs.iter().any(|j| j.id == "config_sync_job"));

        // 同步结果写回配置
        let config = h.app.config().snapshot();
        assert!(config.app.company_id.is_some());
        assert_eq!(config.backup.destination1, h.destination.to_string_lossy());
        h.app.shutdown().await;
        assert_eq!(h.app.state(), AppState::Stopped);
    }

    #[tokio::test]
    async fn test_initialize_failure_sets_error_state() {
        let h = harness(false, false, Duration::ZERO).await;

        let err = h.app.initialize().await.unwrap_err();
        assert_eq!(h.app.state(), AppState::Error);
        let status = h.app.status().await;
        assert_eq!(status.error_message, Some(err.to_string()));
        assert!(h.app.start().await.is_err());
    }

    #[tokio::test]
    async fn test_manual_backup_records_history() {
        let h = harness(true, false, Duration::ZERO).await;
        h.app.initialize().await.unwrap();
        h.app.start().await.unwrap();

        let result = h.app.execute_backup_manual().await;
        assert!(result.is_success(), "{}", result.message);
        assert_eq!(h.app.state(), AppState::Running);
        assert!(h.states.lock().unwrap().contains(&AppState::BackupRunning));
        assert_eq!(h.progress.lock().unwrap().last().map(String::as_str), Some(""));

        let history = h.app.backup_history(Some(10)).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, RunStatus::Success);
        assert!(history[0].manual);
        assert!(h.app.last_backup_result().unwrap().is_success());
        h.app.shutdown().await;
    }

    #[tokio::test]
    async fn test_manual_backup_rejected_while_running() {
        let h = harness(true, false, Duration::ZERO).await;
        h.app.initialize().await.unwrap();
        h.app.start().await.unwrap();
        h.app.runtime().state = AppState::BackupRunning;

        let result = h.app.execute_backup_manual().await;

        assert_eq!(result.outcome, BackupOutcome::Failed);
        assert!(result.message.contains("正在进行"));
        assert_eq!(h.app.state(), AppState::BackupRunning);
        assert_eq!(h.dump.calls.load(Ordering::SeqCst), 0);
        h.app.shutdown().await;
    }

    #[tokio::test]
    async fn test_concurrent_requests_run_single_pipeline() {
        let h = harness(true, false, Duration::from_millis(200)).await;
        h.app.initialize().await.unwrap();
        h.app.start().await.unwrap();

        let (a, b) = tokio::join!(h.app.execute_backup_manual(), h.app.execute_backup_manual());

        assert_eq!([a.is_success(), b.is_success()].iter().filter(|s| **s).count(), 1);
        assert_eq!(h.dump.calls.load(Ordering::SeqCst), 1);
        h.app.shutdown().await;
    }

    #[tokio::test]
    async fn test_upload_after_success_marks_run() {
        let h = harness(true, true, Duration::ZERO).await;
        h.app.initialize().await.unwrap();
        h.app.start().await.unwrap();

        let result = h.app.execute_backup_manual().await;
        assert!(result.is_success(), "{}", result.message);

        h.app.shutdown().await;
        assert_eq!(h.uploader.uploaded.lock().unwrap().len(), 1);

        let company_id = h.app.config().snapshot().app.company_id.unwrap();
        let runs = h.store.runs_by_company(company_id, 1).await.unwrap();
        assert!(runs[0].uploaded);
    }

    #[tokio::test]
    async fn test_pause_resume_and_cancel() {
        let h = harness(true, false, Duration::ZERO).await;
        h.app.initialize().await.unwrap();
        h.app.start().await.unwrap();

        h.app.pause();
        assert_eq!(h.app.state(), AppState::Paused);
        assert!(!h.app.cancel_backup());

        // 暂停期间的手动备份结束后保持暂停
        assert!(h.app.execute_backup_manual().await.is_success());
        assert_eq!(h.app.state(), AppState::Paused);

        h.app.resume();
        assert_eq!(h.app.state(), AppState::Running);
        h.app.shutdown().await;
    }

    #[tokio::test]
    async fn test_reload_config_from_local() {
        let h = harness(true, false, Duration::ZERO).await;
        h.app.initialize().await.unwrap();

        h.app
            .config()
            .update(|cfg| cfg.backup.destination1 = "/outro/destino".to_string())
            .unwrap();
        h.app.refresh_settings().unwrap();
        assert_eq!(
            h.app.status().await.destination1.as_deref(),
            Some("/outro/destino")
        );

        h.app.reload_config(true).await.unwrap();
        let expected = h.destination.to_string_lossy().to_string();
        assert_eq!(h.app.config().snapshot().backup.destination1, expected);
        assert_eq!(h.app.status().await.destination1, Some(expected));
    }

    #[tokio::test]
    async fn test_shutdown_during_backup_stays_stopped() {
        let h = harness(true, false, Duration::from_millis(300)).await;
        h.app.initialize().await.unwrap();
        h.app.start().await.unwrap();

        let (result, _) = tokio::join!(h.app.execute_backup_manual(), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            h.app.shutdown().await;
        });

        assert_eq!(result.outcome, BackupOutcome::Cancelled);
        assert_eq!(h.app.state(), AppState::Stopped);
        assert_eq!(h.states.lock().unwrap().last(), Some(&AppState::Stopped));
        assert!(h.app.execute_backup_manual().await.message.contains("已停止"));
    }

    #[tokio::test]
    async fn test_dropped_backup_releases_running_state() {
        let h = harness(true, false, Duration::from_millis(300)).await;
        h.app.initialize().await.unwrap();
        h.app.start().await.unwrap();

        let timed_out =
            tokio::time::timeout(Duration::from_millis(50), h.app.execute_backup_manual()).await;
        assert!(timed_out.is_err());

        assert_eq!(h.app.state(), AppState::Running);
        assert_eq!(h.progress.lock().unwrap().last().map(String::as_str), Some(""));
        assert!(h.app.execute_backup_manual().await.is_success());
        h.app.shutdown().await;
    }

    #[tokio::test]
    async fn test_scheduled_job_backs_up_its_own_schedule() {
        let today = Local::now().weekday();
        let h = harness_with(true, Duration::ZERO, |destination| {
            let second_destination = destination.with_file_name("loja2");
            let mut second = only_on(today, &second_destination);
            second.time_of_day = "08:00".to_string();
            second.naming_mode = NamingMode::Single;
            vec![only_on(today.succ(), destination), second]
        })
        .await;
        h.app.initialize().await.unwrap();
        h.app.start().await.unwrap();

        let jobs: Vec<String> = h.app.status().await.jobs.into_iter().map(|j| j.id).collect();
        assert!(jobs.contains(&"backup_job_1".to_string()));

        let schedules = h
            .app
            .components()
            .unwrap()
            .reconcile
            .all_schedules()
            .await
            .unwrap();
        let second_destination = h.root.path().join("loja2");
        assert_eq!(schedules[1].destination1, second_destination.to_string_lossy());

        let backup = h.app.job_callbacks().backup;
        backup(Some(schedules[1].clone())).await.unwrap();

        let result = h.app.last_backup_result().unwrap();
        assert!(result.is_success(), "{}", result.message);
        assert_eq!(result.file_name.as_deref(), Some("11222333000144.zip"));
        assert!(second_destination.join("11222333000144.zip").exists());
        assert!(!result.run.unwrap().manual);
        assert!(!h.destination.exists());

        // 没有指定计划时使用主计划，今天不在其执行日
        backup(None).await.unwrap();
        assert_eq!(
            h.app.last_backup_result().unwrap().outcome,
            BackupOutcome::NotScheduled
        );
        h.app.shutdown().await;
    }
}
