use crate::constants::{backup, config, scheduler, store, timeout, upload};
use crate::error::Result;
use crate::models::NamingMode;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

/// 应用配置结构
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub local_db: LocalDbConfig,
    #[serde(default)]
    pub remote_db: RemoteDbConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub backup: BackupConfig,
}

/// 本地数据库（备份来源）配置
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct LocalDbConfig {
    pub database_path: String,
    pub dump_tool_path: String,
    pub user: String,
    pub password: String,
    pub dump_arguments: Vec<String>,
}

/// 远程存储配置
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct RemoteDbConfig {
    pub store_path: String,
}

/// 远程上传配置
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct UploadConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub remote_path: String,
    pub use_tls: bool,
}

/// 应用通用配置
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct AppSection {
    pub first_run: bool,
    pub auto_update: bool,
    pub company_id: Option<i64>,
    pub company_tax_id: String,
    pub sync_interval_minutes: u64,
    pub update_check_interval_minutes: u64,
}

/// 备份策略配置
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct BackupConfig {
    pub destination1: String,
    pub destination2: String,
    pub remote_backup: bool,
    pub naming_mode: NamingMode,
    pub compress: bool,
    pub verify: bool,
    pub temp_dir: String,
    pub dump_timeout_secs: u64,
}

impl Default for LocalDbConfig {
    fn default() -> Self {
        Self {
            database_path: String::new(),
            dump_tool_path: String::new(),
            user: "SYSDBA".to_string(),
            password: "masterkey".to_string(),
            dump_arguments: backup::DEFAULT_DUMP_ARGUMENTS
                .iter()
                .map(|arg| arg.to_string())
                .collect(),
        }
    }
}

impl Default for RemoteDbConfig {
    fn default() -> Self {
        Self {
            store_path: config::get_default_app_dir()
                .join(store::DEFAULT_STORE_FILE)
                .to_string_lossy()
                .to_string(),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: upload::DEFAULT_PORT,
            user: String::new(),
            password: String::new(),
            remote_path: upload::DEFAULT_REMOTE_PATH.to_string(),
            use_tls: true,
        }
    }
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            first_run: true,
            auto_update: true,
            company_id: None,
            company_tax_id: String::new(),
            sync_interval_minutes: scheduler::CONFIG_SYNC_INTERVAL_MINUTES,
            update_check_interval_minutes: scheduler::UPDATE_CHECK_INTERVAL_MINUTES,
        }
    }
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            destination1: String::new(),
            destination2: String::new(),
            remote_backup: false,
            naming_mode: NamingMode::Versioned,
            compress: true,
            verify: true,
            temp_dir: backup::get_default_temp_dir().to_string_lossy().to_string(),
            dump_timeout_secs: timeout::DUMP_TIMEOUT,
        }
    }
}

impl UploadConfig {
    /// 上传是否已配置
    pub fn is_configured(&self) -> bool {
        !self.host.trim().is_empty()
    }
}

impl BackupConfig {
    pub fn temp_dir(&self) -> PathBuf {
        PathBuf::from(&self.temp_dir)
    }

    pub fn dump_timeout(&self) -> Duration {
        Duration::from_secs(self.dump_timeout_secs)
    }
}

impl AppConfig {
    /// 从指定文件加载配置；文件不存在时先用模板初始化
    pub fn load_or_seed<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }

            let example = path.with_file_name(config::CONFIG_EXAMPLE_FILE_NAME);
            if example.exists() {
                tracing::info!("未找到配置文件，从模板初始化: {}", example.display());
                fs::copy(&example, path)?;
            } else {
                tracing::warn!("未找到配置文件，创建默认配置: {}", path.display());
                Self::default().save_to_file(path)?;
            }
        }

        Self::load_from_file(path)
    }

    /// 从指定文件加载配置
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)?;
        let config: AppConfig = toml::from_str(&content)?;

        Ok(config)
    }

    /// 保存配置到文件（整体重写）
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        let content = self.to_toml_with_comments();
        fs::write(&path, content)?;
        Ok(())
    }

    /// 生成带注释的TOML配置
    fn to_toml_with_comments(&self) -> String {
        const TEMPLATE: &str = include_str!("../templates/config.toml.template");

        let company_id_line = match self.app.company_id {
            Some(id) => format!("company_id = {id}"),
            None => "# company_id 尚未同步".to_string(),
        };

        TEMPLATE
            .replace("{local_db.database_path}", &quote(&self.local_db.database_path))
            .replace("{local_db.dump_tool_path}", &quote(&self.local_db.dump_tool_path))
            .replace("{local_db.user}", &quote(&self.local_db.user))
            .replace("{local_db.password}", &quote(&self.local_db.password))
            .replace(
                "{local_db.dump_arguments}",
                &quote_list(&self.local_db.dump_arguments),
            )
            .replace("{remote_db.store_path}", &quote(&self.remote_db.store_path))
            .replace("{upload.host}", &quote(&self.upload.host))
            .replace("{upload.port}", &self.upload.port.to_string())
            .replace("{upload.user}", &quote(&self.upload.user))
            .replace("{upload.password}", &quote(&self.upload.password))
            .replace("{upload.remote_path}", &quote(&self.upload.remote_path))
            .replace("{upload.use_tls}", &self.upload.use_tls.to_string())
            .replace("{app.first_run}", &self.app.first_run.to_string())
            .replace("{app.auto_update}", &self.app.auto_update.to_string())
            .replace("{app.company_id}", &company_id_line)
            .replace("{app.company_tax_id}", &quote(&self.app.company_tax_id))
            .replace(
                "{app.sync_interval_minutes}",
                &self.app.sync_interval_minutes.to_string(),
            )
            .replace(
                "{app.update_check_interval_minutes}",
                &self.app.update_check_interval_minutes.to_string(),
            )
            .replace("{backup.destination1}", &quote(&self.backup.destination1))
            .replace("{backup.destination2}", &quote(&self.backup.destination2))
            .replace("{backup.remote_backup}", &self.backup.remote_backup.to_string())
            .replace("{backup.naming_mode}", &quote(self.backup.naming_mode.as_str()))
            .replace("{backup.compress}", &self.backup.compress.to_string())
            .replace("{backup.verify}", &self.backup.verify.to_string())
            .replace("{backup.temp_dir}", &quote(&self.backup.temp_dir))
            .replace(
                "{backup.dump_timeout_secs}",
                &self.backup.dump_timeout_secs.to_string(),
            )
    }

    /// 基础配置是否已填写
    pub fn is_configured(&self) -> bool {
        !self.local_db.database_path.is_empty()
            && !self.local_db.dump_tool_path.is_empty()
            && !self.remote_db.store_path.is_empty()
    }
}

/// TOML 字符串字面量（处理 Windows 路径中的反斜杠等转义）
fn quote(value: &str) -> String {
    toml::Value::String(value.to_string()).to_string()
}

fn quote_list(values: &[String]) -> String {
    toml::Value::Array(
        values
            .iter()
            .map(|v| toml::Value::String(v.clone()))
            .collect(),
    )
    .to_string()
}

/// 配置持有者：每次修改产生新的不可变快照
///
/// 组件在每个任务周期通过 `snapshot()` 取最新配置，不直接修改共享字段。
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: Option<PathBuf>,
    current: Arc<RwLock<Arc<AppConfig>>>,
}

impl ConfigStore {
    /// 加载（必要时初始化）配置文件
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let config = AppConfig::load_or_seed(&path)?;
        tracing::info!("配置已加载: {}", path.display());
        Ok(Self {
            path: Some(path),
            current: Arc::new(RwLock::new(Arc::new(config))),
        })
    }

    /// 不落盘的配置（测试和一次性命令使用）
    pub fn in_memory(config: AppConfig) -> Self {
        Self {
            path: None,
            current: Arc::new(RwLock::new(Arc::new(config))),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// 当前配置快照
    pub fn snapshot(&self) -> Arc<AppConfig> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// 复制当前配置、修改、保存并替换
    pub fn update<F>(&self, mutate: F) -> Result<Arc<AppConfig>>
    where
        F: FnOnce(&mut AppConfig),
    {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = AppConfig::clone(&guard);
        mutate(&mut next);

        if let Some(path) = &self.path {
            next.save_to_file(path)?;
        }

        let next = Arc::new(next);
        *guard = next.clone();
        Ok(next)
    }

    /// 从文件重新读取配置
    pub fn reload(&self) -> Result<Arc<AppConfig>> {
        let Some(path) = &self.path else {
            return Ok(self.snapshot());
        };

        let next = Arc::new(AppConfig::load_from_file(path)?);
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = next.clone();
        tracing::info!("配置已从文件重新加载");
        Ok(next)
    }
}
