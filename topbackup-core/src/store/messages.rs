use crate::Result;
use crate::models::{BackupRun, Company, VersionInfo};
use tokio::sync::oneshot;

/// 历史库操作消息
#[derive(Debug)]
pub enum StoreMessage {
    /// 初始化数据库表
    InitTables {
        respond_to: oneshot::Sender<Result<()>>,
    },
    /// 补齐旧版本缺失的列
    UpgradeSchema {
        respond_to: oneshot::Sender<Result<()>>,
    },
    /// 连通性检查
    Ping {
        respond_to: oneshot::Sender<Result<()>>,
    },

    // ========== 公司 ==========
    CompanyByTaxId {
        tax_id: String,
        respond_to: oneshot::Sender<Result<Option<Company>>>,
    },
    InsertCompany {
        company: Company,
        respond_to: oneshot::Sender<Result<i64>>,
    },
    UpdateCompany {
        id: i64,
        company: Company,
        respond_to: oneshot::Sender<Result<()>>,
    },
    TouchInteraction {
        company_id: i64,
        respond_to: oneshot::Sender<Result<()>>,
    },

    // ========== 备份记录 ==========
    InsertBackupRun {
        run: BackupRun,
        respond_to: oneshot::Sender<Result<i64>>,
    },
    UpdateBackupRun {
        run: BackupRun,
        respond_to: oneshot::Sender<Result<()>>,
    },
    RunsByCompany {
        company_id: i64,
        limit: usize,
        respond_to: oneshot::Sender<Result<Vec<BackupRun>>>,
    },

    // ========== 版本发布 ==========
    LatestVersion {
        respond_to: oneshot::Sender<Result<Option<VersionInfo>>>,
    },
    PublishVersion {
        info: VersionInfo,
        respond_to: oneshot::Sender<Result<i64>>,
    },
}
