use crate::collaborators::LocalDatabase;
use crate::error::{BackupError, Result};
use crate::models::{Company, Schedule};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// ERP 导出的本地数据（公司 + 备份计划）
#[derive(Debug, Clone, Default, Deserialize)]
struct LocalExport {
    #[serde(default)]
    system_version: Option<String>,
    #[serde(default)]
    company: Option<Company>,
    #[serde(default)]
    schedules: Vec<Schedule>,
}

/// 基于 TOML 导出文件的本地数据源
///
/// 每次调用都重新读取文件，ERP 侧修改后无需重启。
#[derive(Debug, Clone)]
pub struct FileLocalSource {
    path: PathBuf,
}

impl FileLocalSource {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self) -> Result<LocalExport> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BackupError::connectivity(format!(
                    "本地数据源未找到: {}",
                    self.path.display()
                )));
            }
            Err(e) => return Err(e.into()),
        };

        toml::from_str(&content).map_err(|e| {
            BackupError::configuration(format!(
                "本地数据源格式错误 {}: {}",
                self.path.display(),
                e
            ))
        })
    }
}

#[async_trait]
impl LocalDatabase for FileLocalSource {
    async fn test_connection(&self) -> Result<()> {
        self.read().await.map(|_| ())
    }

    async fn company(&self) -> Result<Option<Company>> {
        Ok(self.read().await?.company)
    }

    async fn schedule(&self) -> Result<Option<Schedule>> {
        Ok(self.read().await?.schedules.into_iter().next())
    }

    async fn all_schedules(&self) -> Result<Vec<Schedule>> {
        Ok(self.read().await?.schedules)
    }

    async fn system_version(&self) -> Result<Option<String>> {
        Ok(self.read().await?.system_version)
    }
}
