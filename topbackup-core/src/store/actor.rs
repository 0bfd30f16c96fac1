use crate::Result;
use crate::error::BackupError;
use crate::models::{BackupRun, Company, NamingMode, RunStatus, VersionInfo};
use chrono::Utc;
use duckdb::{Connection, Row, params};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::messages::StoreMessage;

const COMPANY_COLUMNS: &str = "id, local_id, display_name, legal_name, tax_id, \
     last_interaction, local_version, created_at, active";

const RUN_COLUMNS: &str = "id, company_id, started_at, finished_at, file_name, \
     destination_path, destination2_path, size_bytes, size_formatted, status, \
     error_message, naming_mode, uploaded, uploaded_at, manual";

/// 历史库 Actor - 确保单线程访问DuckDB
pub struct StoreActor {
    connection: Connection,
}

impl StoreActor {
    pub fn new(db_path: PathBuf) -> Result<Self> {
        let connection = Connection::open(db_path)?;
        Ok(Self { connection })
    }

    pub fn new_memory() -> Result<Self> {
        let connection = Connection::open_in_memory()?;
        Ok(Self { connection })
    }

    /// 运行Actor消息循环
    pub async fn run(mut self, mut receiver: mpsc::Receiver<StoreMessage>) {
        info!("历史库 Actor 已启动");

        while let Some(message) = receiver.recv().await {
            self.handle_message(message);
        }

        info!("历史库 Actor 已关闭");
    }

    fn handle_message(&mut self, message: StoreMessage) {
        match message {
            StoreMessage::InitTables { respond_to } => {
                let _ = respond_to.send(self.run_script(include_str!(
                    "../../migrations/init_duckdb.sql"
                )));
            }
            StoreMessage::UpgradeSchema { respond_to } => {
                let _ = respond_to.send(self.run_script(include_str!(
                    "../../migrations/upgrade_schema.sql"
                )));
            }
            StoreMessage::Ping { respond_to } => {
                let result = self
                    .connection
                    .query_row("SELECT 1", [], |row| row.get::<_, i32>(0))
                    .map(|_| ())
                    .map_err(BackupError::from);
                let _ = respond_to.send(result);
            }
            StoreMessage::CompanyByTaxId { tax_id, respond_to } => {
                let _ = respond_to.send(self.company_by_tax_id(&tax_id));
            }
            StoreMessage::InsertCompany {
                company,
                respond_to,
            } => {
                let _ = respond_to.send(self.insert_company(&company));
            }
            StoreMessage::UpdateCompany {
                id,
                company,
                respond_to,
            } => {
                let _ = respond_to.send(self.update_company(id, &company));
            }
            StoreMessage::TouchInteraction {
                company_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.touch_interaction(company_id));
            }
            StoreMessage::InsertBackupRun { run, respond_to } => {
                let _ = respond_to.send(self.insert_backup_run(&run));
            }
            StoreMessage::UpdateBackupRun { run, respond_to } => {
                let _ = respond_to.send(self.update_backup_run(&run));
            }
            StoreMessage::RunsByCompany {
                company_id,
                limit,
                respond_to,
            } => {
                let _ = respond_to.send(self.runs_by_company(company_id, limit));
            }
            StoreMessage::LatestVersion { respond_to } => {
                let _ = respond_to.send(self.latest_version());
            }
            StoreMessage::PublishVersion { info, respond_to } => {
                let _ = respond_to.send(self.publish_version(&info));
            }
        }
    }

    /// 按分号分割SQL语句并执行
    fn run_script(&mut self, sql_content: &str) -> Result<()> {
        for statement in sql_content.split(';') {
            let trimmed = statement.trim();
            if !trimmed.is_empty() {
                self.connection.execute(trimmed, [])?;
            }
        }
        debug!("SQL脚本执行完成");
        Ok(())
    }

    fn company_by_tax_id(&mut self, tax_id: &str) -> Result<Option<Company>> {
        let sql = format!(
            "SELECT {COMPANY_COLUMNS} FROM companies WHERE tax_id = ? ORDER BY id LIMIT 1"
        );
        let mut stmt = self.connection.prepare(&sql)?;
        let mut rows = stmt.query(params![tax_id])?;

        match rows.next()? {
            Some(row) => Ok(Some(company_from_row(row)?)),
            None => Ok(None),
        }
    }

    fn insert_company(&mut self, company: &Company) -> Result<i64> {
        let created_at = company.created_at.unwrap_or_else(Utc::now);
        let id: i64 = self.connection.query_row(
            "INSERT INTO companies (local_id, display_name, legal_name, tax_id, \
             last_interaction, local_version, created_at, active) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?) RETURNING id",
            params![
                company.local_id,
                company.display_name,
                company.legal_name,
                company.normalized_tax_id(),
                company.last_interaction,
                company.local_version,
                created_at,
                company.active,
            ],
            |row| row.get(0),
        )?;

        info!("公司已登记: {} (ID: {})", company.display_name, id);
        Ok(id)
    }

    fn update_company(&mut self, id: i64, company: &Company) -> Result<()> {
        self.connection.execute(
            "UPDATE companies SET local_id = ?, display_name = ?, legal_name = ?, \
             last_interaction = ?, local_version = ?, active = ? WHERE id = ?",
            params![
                company.local_id,
                company.display_name,
                company.legal_name,
                company.last_interaction,
                company.local_version,
                company.active,
                id,
            ],
        )?;
        Ok(())
    }

    fn touch_interaction(&mut self, company_id: i64) -> Result<()> {
        self.connection.execute(
            "UPDATE companies SET last_interaction = ? WHERE id = ?",
            params![Utc::now(), company_id],
        )?;
        Ok(())
    }

    fn insert_backup_run(&mut self, run: &BackupRun) -> Result<i64> {
        let id: i64 = self.connection.query_row(
            "INSERT INTO backup_runs (company_id, started_at, finished_at, file_name, \
             destination_path, destination2_path, size_bytes, size_formatted, status, \
             error_message, naming_mode, uploaded, uploaded_at, manual) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING id",
            params![
                run.company_id,
                run.started_at,
                run.finished_at,
                run.file_name,
                run.destination_path,
                run.destination2_path,
                run.size_bytes,
                run.size_formatted,
                run.status.as_str(),
                run.error_message,
                run.naming_mode.as_str(),
                run.uploaded,
                run.uploaded_at,
                run.manual,
            ],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    fn update_backup_run(&mut self, run: &BackupRun) -> Result<()> {
        let id = run
            .id
            .ok_or_else(|| BackupError::custom("备份记录缺少ID，无法更新"))?;

        self.connection.execute(
            "UPDATE backup_runs SET finished_at = ?, file_name = ?, destination_path = ?, \
             destination2_path = ?, size_bytes = ?, size_formatted = ?, status = ?, \
             error_message = ?, uploaded = ?, uploaded_at = ? WHERE id = ?",
            params![
                run.finished_at,
                run.file_name,
                run.destination_path,
                run.destination2_path,
                run.size_bytes,
                run.size_formatted,
                run.status.as_str(),
                run.error_message,
                run.uploaded,
                run.uploaded_at,
                id,
            ],
        )?;
        Ok(())
    }

    fn runs_by_company(&mut self, company_id: i64, limit: usize) -> Result<Vec<BackupRun>> {
        let sql = format!(
            "SELECT {RUN_COLUMNS} FROM backup_runs WHERE company_id = ? \
             ORDER BY started_at DESC, id DESC LIMIT ?"
        );
        let mut stmt = self.connection.prepare(&sql)?;
        let run_iter = stmt.query_map(params![company_id, limit as i64], run_from_row)?;

        let mut runs = Vec::new();
        for run in run_iter {
            runs.push(run?);
        }
        Ok(runs)
    }

    fn latest_version(&mut self) -> Result<Option<VersionInfo>> {
        let mut stmt = self.connection.prepare(
            "SELECT version, released_at, download_url, sha256, changelog, mandatory \
             FROM app_versions WHERE active \
             ORDER BY released_at DESC NULLS LAST, id DESC LIMIT 1",
        )?;
        let mut rows = stmt.query([])?;

        match rows.next()? {
            Some(row) => Ok(Some(VersionInfo {
                version: row.get(0)?,
                released_at: row.get(1)?,
                download_url: row.get(2)?,
                sha256: row.get(3)?,
                changelog: row.get(4)?,
                mandatory: row.get(5)?,
            })),
            None => Ok(None),
        }
    }

    fn publish_version(&mut self, info: &VersionInfo) -> Result<i64> {
        let id: i64 = self.connection.query_row(
            "INSERT INTO app_versions (version, released_at, download_url, sha256, \
             changelog, mandatory) VALUES (?, ?, ?, ?, ?, ?) RETURNING id",
            params![
                info.version,
                info.released_at.unwrap_or_else(Utc::now),
                info.download_url,
                info.sha256,
                info.changelog,
                info.mandatory,
            ],
            |row| row.get(0),
        )?;
        info!("已发布版本 {}", info.version);
        Ok(id)
    }
}

fn company_from_row(row: &Row<'_>) -> duckdb::Result<Company> {
    Ok(Company {
        id: row.get(0)?,
        local_id: row.get(1)?,
        display_name: row.get(2)?,
        legal_name: row.get(3)?,
        tax_id: row.get(4)?,
        last_interaction: row.get(5)?,
        local_version: row.get(6)?,
        created_at: row.get(7)?,
        active: row.get(8)?,
    })
}

fn run_from_row(row: &Row<'_>) -> duckdb::Result<BackupRun> {
    let status: String = row.get(9)?;
    let naming_mode: String = row.get(11)?;
    let manual: Option<bool> = row.get(14)?;

    Ok(BackupRun {
        id: row.get(0)?,
        company_id: row.get(1)?,
        started_at: row.get(2)?,
        finished_at: row.get(3)?,
        file_name: row.get(4)?,
        destination_path: row.get(5)?,
        destination2_path: row.get(6)?,
        size_bytes: row.get(7)?,
        size_formatted: row.get(8)?,
        status: RunStatus::parse(&status),
        error_message: row.get(10)?,
        naming_mode: NamingMode::parse(&naming_mode).unwrap_or_default(),
        uploaded: row.get(12)?,
        uploaded_at: row.get(13)?,
        manual: manual.unwrap_or(false),
    })
}
