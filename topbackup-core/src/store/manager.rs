use crate::collaborators::RemoteStore;
use crate::error::BackupError;
use crate::models::{BackupRun, Company, VersionInfo};
use crate::Result;
use async_trait::async_trait;
use std::path::Path;
use tokio::sync::{mpsc, oneshot};

use super::actor::StoreActor;
use super::messages::StoreMessage;

/// 基于 DuckDB 的历史库（公司登记、备份日志、版本发布）
#[derive(Debug, Clone)]
pub struct HistoryStore {
    sender: mpsc::Sender<StoreMessage>,
}

impl HistoryStore {
    /// 打开（必要时创建）历史库文件
    pub async fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();

        // 确保数据库文件的父目录存在
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let (sender, receiver) = mpsc::channel(100);
        let actor = StoreActor::new(db_path.clone()).map_err(|e| describe_open_error(e, &db_path))?;
        tokio::spawn(actor.run(receiver));

        let store = Self { sender };
        store.request(|respond_to| StoreMessage::InitTables { respond_to }).await?;
        Ok(store)
    }

    /// 内存历史库
    pub async fn open_in_memory() -> Result<Self> {
        let (sender, receiver) = mpsc::channel(100);
        let actor = StoreActor::new_memory()?;
        tokio::spawn(actor.run(receiver));

        let store = Self { sender };
        store.request(|respond_to| StoreMessage::InitTables { respond_to }).await?;
        Ok(store)
    }

    /// 发送消息并等待 Actor 响应
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T>>) -> StoreMessage,
    ) -> Result<T> {
        let (respond_to, receiver) = oneshot::channel();

        self.sender
            .send(build(respond_to))
            .await
            .map_err(|_| BackupError::custom("历史库Actor已关闭"))?;

        receiver
            .await
            .map_err(|_| BackupError::custom("等待历史库响应失败"))?
    }

    /// 发布新版本信息
    pub async fn publish_version(&self, info: VersionInfo) -> Result<i64> {
        self.request(|respond_to| StoreMessage::PublishVersion { info, respond_to })
            .await
    }
}

/// DuckDB 文件锁被其他进程持有时（通常是正在运行的守护进程）给出明确错误
fn describe_open_error(err: BackupError, db_path: &Path) -> BackupError {
    match &err {
        BackupError::DuckDb(message) if is_lock_conflict(message) => {
            BackupError::StoreLocked(format!(
                "{} 正被另一个 TopBackup 进程使用，请先停止守护进程后重试",
                db_path.display()
            ))
        }
        _ => err,
    }
}

fn is_lock_conflict(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("could not set lock") || message.contains("conflicting lock")
}

#[async_trait]
impl RemoteStore for HistoryStore {
    async fn test_connection(&self) -> Result<()> {
        self.request(|respond_to| StoreMessage::Ping { respond_to })
            .await
    }

    async fn company_by_tax_id(&self, tax_id: &str) -> Result<Option<Company>> {
        let tax_id = tax_id.to_string();
        self.request(|respond_to| StoreMessage::CompanyByTaxId { tax_id, respond_to })
            .await
    }

    async fn insert_company(&self, company: &Company) -> Result<i64> {
        let company = company.clone();
        self.request(|respond_to| StoreMessage::InsertCompany {
            company,
            respond_to,
        })
        .await
    }

    async fn update_company(&self, id: i64, company: &Company) -> Result<()> {
        let company = company.clone();
        self.request(|respond_to| StoreMessage::UpdateCompany {
            id,
            company,
            respond_to,
        })
        .await
    }

    async fn insert_backup_run(&self, run: &BackupRun) -> Result<i64> {
        let run = run.clone();
        self.request(|respond_to| StoreMessage::InsertBackupRun { run, respond_to })
            .await
    }

    async fn update_backup_run(&self, run: &BackupRun) -> Result<()> {
        let run = run.clone();
        self.request(|respond_to| StoreMessage::UpdateBackupRun { run, respond_to })
            .await
    }

    async fn runs_by_company(&self, company_id: i64, limit: usize) -> Result<Vec<BackupRun>> {
        self.request(|respond_to| StoreMessage::RunsByCompany {
            company_id,
            limit,
            respond_to,
        })
        .await
    }

    async fn latest_version_info(&self) -> Result<Option<VersionInfo>> {
        self.request(|respond_to| StoreMessage::LatestVersion { respond_to })
            .await
    }

    async fn touch_interaction(&self, company_id: i64) -> Result<()> {
        self.request(|respond_to| StoreMessage::TouchInteraction {
            company_id,
            respond_to,
        })
        .await
    }

    async fn ensure_schema(&self) -> Result<()> {
        self.request(|respond_to| StoreMessage::InitTables { respond_to })
            .await?;
        self.request(|respond_to| StoreMessage::UpgradeSchema { respond_to })
            .await
    }
}
