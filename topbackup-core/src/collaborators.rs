//! 外部协作者接口
//!
//! 核心逻辑只依赖这些 trait；具体实现（本地数据源、历史库、上传、导出工具）
//! 可以独立替换，测试中使用内存实现。

use crate::error::Result;
use crate::models::{BackupRun, Company, Schedule, VersionInfo};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 本地数据库（ERP 系统的数据来源）
#[async_trait]
pub trait LocalDatabase: Send + Sync {
    async fn test_connection(&self) -> Result<()>;

    /// 本地登记的公司信息
    async fn company(&self) -> Result<Option<Company>>;

    /// 主备份计划
    async fn schedule(&self) -> Result<Option<Schedule>>;

    /// 全部备份计划
    async fn all_schedules(&self) -> Result<Vec<Schedule>>;

    /// 本地系统版本号
    async fn system_version(&self) -> Result<Option<String>>;
}

/// 远程存储（公司登记、备份日志、版本发布）
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn test_connection(&self) -> Result<()>;

    async fn company_by_tax_id(&self, tax_id: &str) -> Result<Option<Company>>;

    /// 插入公司，返回分配的ID
    async fn insert_company(&self, company: &Company) -> Result<i64>;

    async fn update_company(&self, id: i64, company: &Company) -> Result<()>;

    /// 插入备份记录，返回分配的ID
    async fn insert_backup_run(&self, run: &BackupRun) -> Result<i64>;

    async fn update_backup_run(&self, run: &BackupRun) -> Result<()>;

    /// 指定公司最近的备份记录（按开始时间倒序）
    async fn runs_by_company(&self, company_id: i64, limit: usize) -> Result<Vec<BackupRun>>;

    async fn latest_version_info(&self) -> Result<Option<VersionInfo>>;

    /// 更新公司最后交互时间
    async fn touch_interaction(&self, company_id: i64) -> Result<()>;

    /// 建表并补齐旧版本缺失的列
    async fn ensure_schema(&self) -> Result<()>;
}

/// 远程上传
#[async_trait]
pub trait RemoteUploader: Send + Sync {
    async fn upload(&self, path: &Path) -> Result<()>;
}

/// 导出请求
#[derive(Debug, Clone)]
pub struct DumpRequest {
    pub tool_path: PathBuf,
    pub source: PathBuf,
    pub output: PathBuf,
    pub user: String,
    pub password: String,
    /// 参数模板，可使用 {user} {password} {source} {output}
    pub arguments: Vec<String>,
    pub timeout: Duration,
}

impl DumpRequest {
    /// 展开参数模板
    pub fn render_arguments(&self) -> Vec<String> {
        let source = self.source.to_string_lossy();
        let output = self.output.to_string_lossy();
        self.arguments
            .iter()
            .map(|arg| {
                arg.replace("{user}", &self.user)
                    .replace("{password}", &self.password)
                    .replace("{source}", &source)
                    .replace("{output}", &output)
            })
            .collect()
    }
}

/// 数据库原生导出工具
#[async_trait]
pub trait DumpTool: Send + Sync {
    /// 执行导出，超时由实现负责强制终止
    async fn dump(&self, request: &DumpRequest) -> Result<()>;
}
