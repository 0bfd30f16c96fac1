use crate::collaborators::{DumpRequest, DumpTool, RemoteStore};
use crate::config::{AppConfig, ConfigStore};
use crate::constants::backup;
use crate::error::{BackupError, Result};
use crate::file_ops::{
    backup_file_name, cleanup_temp_files, compress_file, default_temp_max_age, format_size,
    resolve_tool, safe_copy, safe_move, temp_artifact_name, validate_min_size, verify_archive,
};
use crate::models::{BackupRun, Company, Schedule};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use uuid::Uuid;

/// 进度回调，参数为当前阶段描述
pub type ProgressCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// 备份结果类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupOutcome {
    Success,
    Failed,
    Cancelled,
    /// 今天不在计划内，未执行
    NotScheduled,
}

/// 单次备份的执行结果
#[derive(Debug, Clone, Serialize)]
pub struct BackupResult {
    pub outcome: BackupOutcome,
    pub message: String,
    pub file_name: Option<String>,
    pub path: Option<PathBuf>,
    pub secondary_path: Option<PathBuf>,
    pub size_bytes: u64,
    pub size_formatted: String,
    pub duration_secs: f64,
    /// 本次运行的记录（写入历史库后带ID）
    pub run: Option<BackupRun>,
}

impl BackupResult {
    fn without_artifact(outcome: BackupOutcome, message: impl Into<String>) -> Self {
        Self {
            outcome,
            message: message.into(),
            file_name: None,
            path: None,
            secondary_path: None,
            size_bytes: 0,
            size_formatted: String::new(),
            duration_secs: 0.0,
            run: None,
        }
    }

    /// 拒绝执行（已有备份在运行等）
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::without_artifact(BackupOutcome::Failed, message)
    }

    pub fn is_success(&self) -> bool {
        self.outcome == BackupOutcome::Success
    }
}

/// 成功生成的备份文件
#[derive(Debug)]
struct Artifact {
    file_name: String,
    path: PathBuf,
    secondary_path: Option<PathBuf>,
    size_bytes: u64,
}

/// 备份流水线：导出 → 校验 → 压缩 → 分发 → 记录
pub struct BackupPipeline {
    config: ConfigStore,
    dump_tool: Arc<dyn DumpTool>,
    store: Option<Arc<dyn RemoteStore>>,
    cancel_requested: AtomicBool,
    progress: Mutex<Option<ProgressCallback>>,
    temp_max_age: Duration,
}

impl BackupPipeline {
    pub fn new(
        config: ConfigStore,
        dump_tool: Arc<dyn DumpTool>,
        store: Option<Arc<dyn RemoteStore>>,
    ) -> Self {
        Self {
            config,
            dump_tool,
            store,
            cancel_requested: AtomicBool::new(false),
            progress: Mutex::new(None),
            temp_max_age: default_temp_max_age(),
        }
    }

    /// 临时文件保留时长
    pub fn with_temp_max_age(mut self, max_age: Duration) -> Self {
        self.temp_max_age = max_age;
        self
    }

    pub fn set_progress_callback(&self, callback: ProgressCallback) {
        *self.progress.lock().unwrap_or_else(PoisonError::into_inner) = Some(callback);
    }

    fn report_progress(&self, message: &str) {
        let callback = self
            .progress
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(callback) = callback {
            callback(message);
        }
    }

    /// 请求取消，在阶段之间生效
    pub fn cancel(&self) {
        info!("已请求取消备份");
        self.cancel_requested.store(true, Ordering::SeqCst);
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.is_cancel_requested() {
            Err(BackupError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// 执行一次完整备份，错误不会向外传播
    pub async fn execute(
        &self,
        company: &Company,
        schedule: &Schedule,
        is_manual: bool,
    ) -> BackupResult {
        self.cancel_requested.store(false, Ordering::SeqCst);

        if !is_manual && !schedule.should_run_today() {
            return BackupResult::without_artifact(
                BackupOutcome::NotScheduled,
                "今天不在备份计划内",
            );
        }

        let started = Instant::now();
        let now = Local::now();
        let config = self.config.snapshot();

        let company_id = company.id.or(config.app.company_id).unwrap_or(0);
        let mut run = BackupRun::started(company_id, schedule.naming_mode, is_manual);
        run.id = self.persist_new_run(&run).await;

        info!(
            "开始备份: {} (命名方式: {}, 手动: {})",
            company.display_name, schedule.naming_mode, is_manual
        );

        let mut temp_files = Vec::new();
        let outcome = self
            .run_stages(&config, company, schedule, now, &mut temp_files)
            .await;

        remove_temp_files(&temp_files).await;
        self.cleanup(&config.backup.temp_dir()).await;

        let duration_secs = started.elapsed().as_secs_f64();
        let result = match outcome {
            Ok(artifact) => {
                let size_formatted = format_size(artifact.size_bytes);
                run.mark_success(
                    artifact.file_name.clone(),
                    artifact.path.to_string_lossy().to_string(),
                    artifact.size_bytes,
                    size_formatted.clone(),
                    artifact
                        .secondary_path
                        .as_ref()
                        .map(|p| p.to_string_lossy().to_string()),
                );
                info!(
                    "备份成功: {} ({}, {:.1}s)",
                    artifact.path.display(),
                    size_formatted,
                    duration_secs
                );
                BackupResult {
                    outcome: BackupOutcome::Success,
                    message: "备份成功".to_string(),
                    file_name: Some(artifact.file_name),
                    path: Some(artifact.path),
                    secondary_path: artifact.secondary_path,
                    size_bytes: artifact.size_bytes,
                    size_formatted,
                    duration_secs,
                    run: None,
                }
            }
            Err(e) if e.is_cancelled() => {
                warn!("备份已取消");
                run.mark_failure(e.to_string());
                BackupResult {
                    duration_secs,
                    ..BackupResult::without_artifact(BackupOutcome::Cancelled, e.to_string())
                }
            }
            Err(e) => {
                error!("备份失败 ({}): {}", company.display_name, e);
                run.mark_failure(e.to_string());
                BackupResult {
                    duration_secs,
                    ..BackupResult::without_artifact(BackupOutcome::Failed, e.to_string())
                }
            }
        };

        self.persist_finished_run(&run).await;
        BackupResult {
            run: Some(run),
            ..result
        }
    }

    async fn run_stages(
        &self,
        config: &AppConfig,
        company: &Company,
        schedule: &Schedule,
        now: DateTime<Local>,
        temp_files: &mut Vec<PathBuf>,
    ) -> Result<Artifact> {
        let tax_id = company.normalized_tax_id();
        if tax_id.is_empty() {
            return Err(BackupError::configuration("公司税号为空，无法生成备份文件名"));
        }

        // 1. 导出
        self.report_progress("正在导出数据库...");
        let dump_path = self.dump(config, now, temp_files).await?;
        self.check_cancelled()?;

        // 2. 校验
        self.report_progress("正在校验备份文件...");
        let dump_size = validate_min_size(&dump_path, backup::MIN_DUMP_SIZE).await?;
        info!("导出文件大小: {}", format_size(dump_size));
        self.check_cancelled()?;

        // 3. 压缩
        let (packaged_path, file_name) = if config.backup.compress {
            self.report_progress("正在压缩备份文件...");
            let zip_name =
                backup_file_name(&tax_id, schedule.naming_mode, backup::ZIP_EXTENSION, now);
            let entry_name =
                backup_file_name(&tax_id, schedule.naming_mode, backup::DUMP_EXTENSION, now);
            let zip_path = config.backup.temp_dir().join(temp_artifact_name(&zip_name));
            temp_files.push(zip_path.clone());

            compress_file(&dump_path, &zip_path, &entry_name).await?;
            tokio::fs::remove_file(&dump_path).await?;
            if config.backup.verify {
                verify_archive(&zip_path).await?;
            }
            (zip_path, zip_name)
        } else {
            let name =
                backup_file_name(&tax_id, schedule.naming_mode, backup::DUMP_EXTENSION, now);
            (dump_path, name)
        };
        self.check_cancelled()?;

        // 4. 主目标
        let destination = effective_destination(schedule, config)?;
        self.report_progress(&format!("正在移动到: {}", destination.display()));
        let final_path = destination.join(&file_name);
        safe_move(&packaged_path, &final_path).await?;
        let size_bytes = tokio::fs::metadata(&final_path).await?.len();

        // 5. 次目标（失败只告警）
        let secondary_path = match schedule.secondary_destination() {
            Some(dir) => {
                self.report_progress("正在复制到次备份目录...");
                let target = Path::new(dir).join(&file_name);
                match safe_copy(&final_path, &target).await {
                    Ok(_) => Some(target),
                    Err(e) => {
                        warn!("复制到次备份目录失败 {}: {}", target.display(), e);
                        None
                    }
                }
            }
            None => None,
        };

        Ok(Artifact {
            file_name,
            path: final_path,
            secondary_path,
            size_bytes,
        })
    }

    async fn dump(
        &self,
        config: &AppConfig,
        now: DateTime<Local>,
        temp_files: &mut Vec<PathBuf>,
    ) -> Result<PathBuf> {
        let local_db = &config.local_db;

        let tool_path = resolve_tool(&local_db.dump_tool_path).ok_or_else(|| {
            BackupError::configuration(format!(
                "导出工具未找到: {}",
                local_db.dump_tool_path
            ))
        })?;

        let source = PathBuf::from(&local_db.database_path);
        if local_db.database_path.trim().is_empty() || !source.exists() {
            return Err(BackupError::configuration(format!(
                "数据库文件未找到: {}",
                local_db.database_path
            )));
        }

        let temp_dir = config.backup.temp_dir();
        tokio::fs::create_dir_all(&temp_dir).await?;

        let unique = Uuid::new_v4().simple().to_string();
        let output = temp_dir.join(temp_artifact_name(&format!(
            "{}_{}.{}",
            now.format("%Y%m%d_%H%M%S"),
            &unique[..8],
            backup::DUMP_EXTENSION
        )));
        temp_files.push(output.clone());

        let request = DumpRequest {
            tool_path,
            source,
            output: output.clone(),
            user: local_db.user.clone(),
            password: local_db.password.clone(),
            arguments: local_db.dump_arguments.clone(),
            timeout: config.backup.dump_timeout(),
        };

        tokio::time::timeout(request.timeout, self.dump_tool.dump(&request))
            .await
            .map_err(|_| {
                BackupError::timeout(format!(
                    "导出超过 {} 秒未完成",
                    request.timeout.as_secs()
                ))
            })??;

        if !output.exists() {
            return Err(BackupError::backup("导出工具未生成备份文件"));
        }
        Ok(output)
    }

    async fn persist_new_run(&self, run: &BackupRun) -> Option<i64> {
        let store = self.store.as_ref()?;
        match store.insert_backup_run(run).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!("备份记录写入失败，继续执行: {}", e);
                None
            }
        }
    }

    async fn persist_finished_run(&self, run: &BackupRun) {
        let (Some(store), Some(_)) = (self.store.as_ref(), run.id) else {
            return;
        };
        if let Err(e) = store.update_backup_run(run).await {
            warn!("备份记录更新失败: {}", e);
        }
    }

    async fn cleanup(&self, temp_dir: &Path) {
        match cleanup_temp_files(temp_dir, self.temp_max_age).await {
            Ok(0) => {}
            Ok(removed) => info!("已清理 {} 个过期临时文件", removed),
            Err(e) => warn!("清理临时文件失败: {}", e),
        }
    }
}

/// 主目标目录：计划中的值优先，其次是配置
fn effective_destination(schedule: &Schedule, config: &AppConfig) -> Result<PathBuf> {
    let from_schedule = schedule.destination1.trim();
    if !from_schedule.is_empty() {
        return Ok(PathBuf::from(from_schedule));
    }

    let from_config = config.backup.destination1.trim();
    if !from_config.is_empty() {
        warn!("计划未设置目标目录，使用配置: {}", from_config);
        return Ok(PathBuf::from(from_config));
    }

    Err(BackupError::configuration("未配置备份目标目录"))
}

/// 删除本次运行遗留的临时文件
async fn remove_temp_files(paths: &[PathBuf]) {
    for path in paths {
        match tokio::fs::remove_file(path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("删除临时文件失败 {}: {}", path.display(), e),
        }
    }
}
