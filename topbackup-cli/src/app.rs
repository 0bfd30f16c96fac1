use crate::cli::Commands;
use crate::commands;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use topbackup_core::{
    collaborators::RemoteUploader,
    config::{ConfigStore, UploadConfig},
    constants,
    error::{BackupError, Result},
    local_source::FileLocalSource,
    orchestrator::{AppState, Collaborators, Observers, Orchestrator},
    process_dump::ProcessDumpTool,
    store::HistoryStore,
    upload::HttpUploader,
};
use tracing::{debug, info, warn};

/// 本地数据源导出文件的默认文件名
pub const DEFAULT_SOURCE_FILE_NAME: &str = "local_source.toml";

#[derive(Clone)]
pub struct CliApp {
    pub config_path: PathBuf,
    pub source_path: PathBuf,
    pub config: ConfigStore,
    pub store: HistoryStore,
    pub orchestrator: Orchestrator,
}

/// 未指定时使用默认配置路径
pub fn resolve_config_path(config_path: Option<PathBuf>) -> PathBuf {
    config_path.unwrap_or_else(constants::config::get_default_config_path)
}

/// 未指定时数据源文件与配置文件同目录
pub fn resolve_source_path(source_path: Option<PathBuf>, config_path: &Path) -> PathBuf {
    source_path.unwrap_or_else(|| {
        config_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(DEFAULT_SOURCE_FILE_NAME)
    })
}

impl CliApp {
    /// 加载配置并装配具体的协作者
    pub async fn new(config_path: Option<PathBuf>, source_path: Option<PathBuf>) -> Result<Self> {
        let config_path = resolve_config_path(config_path);
        let source_path = resolve_source_path(source_path, &config_path);

        let config = ConfigStore::open(&config_path)?;
        let store_path = config.snapshot().remote_db.store_path.clone();
        let store = HistoryStore::open(&store_path).await.map_err(|e| {
            if matches!(e, BackupError::StoreLocked(_)) {
                warn!("💡 'topbackup run' 正在运行时，请停止守护进程后再执行此命令");
            }
            e
        })?;

        let collaborators = Collaborators {
            local: Arc::new(FileLocalSource::new(&source_path)),
            remote: Arc::new(store.clone()),
            dump_tool: Arc::new(ProcessDumpTool::new()),
            uploader_factory: Some(Arc::new(
                |upload: &UploadConfig| -> Result<Arc<dyn RemoteUploader>> {
                    Ok(Arc::new(HttpUploader::new(upload.clone())?))
                },
            )),
        };
        let orchestrator = Orchestrator::new(config.clone(), collaborators, log_observers());

        Ok(Self {
            config_path,
            source_path,
            config,
            store,
            orchestrator,
        })
    }

    /// 运行应用命令
    pub async fn run_command(&self, command: Commands) -> Result<()> {
        match command {
            Commands::Init { .. } => unreachable!(), // 已经在 main.rs 中处理
            Commands::Run => commands::run_daemon(self).await,
            Commands::Backup => commands::run_backup(self).await,
            Commands::Sync { force } => commands::run_sync(self, force).await,
            Commands::Status { json } => commands::run_status(self, json).await,
            Commands::History { limit, json } => commands::run_history(self, limit, json).await,
            Commands::CheckUpdate => commands::run_check_update(self).await,
            Commands::PublishVersion {
                version,
                url,
                sha256,
                changelog,
                mandatory,
            } => {
                commands::run_publish_version(self, version, url, sha256, changelog, mandatory)
                    .await
            }
        }
    }
}

/// 终端没有界面层，状态和通知都写入日志
fn log_observers() -> Observers {
    Observers {
        on_state_change: Some(Arc::new(|state: AppState| debug!("应用状态: {}", state))),
        on_progress: Some(Arc::new(|message: &str| {
            if !message.is_empty() {
                info!("⏳ {}", message);
            }
        })),
        on_notification: Some(Arc::new(|title: &str, message: &str| {
            info!("🔔 {}: {}", title, message);
        })),
    }
}
