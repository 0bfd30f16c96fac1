use crate::collaborators::{LocalDatabase, RemoteStore};
use crate::config::{AppConfig, ConfigStore};
use crate::constants::version::APP_VERSION;
use crate::error::{BackupError, Result};
use crate::models::{Company, Schedule};
use chrono::Utc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{error, info};

/// 合并规则：目标目录以配置为准，配置为空时采用数据源的值；
/// 命名方式和远程备份开关总是来自数据源
pub fn merge_schedule_into_config(schedule: &mut Schedule, config: &mut AppConfig) {
    let backup = &mut config.backup;

    if backup.destination1.trim().is_empty() {
        backup.destination1 = schedule.destination1.clone();
        info!("采用数据源的主备份目录: {}", schedule.destination1);
    } else {
        schedule.destination1 = backup.destination1.clone();
        info!("保留配置中的主备份目录: {}", backup.destination1);
    }

    if backup.destination2.trim().is_empty() {
        backup.destination2 = schedule.destination2.clone().unwrap_or_default();
    } else {
        schedule.destination2 = Some(backup.destination2.clone());
    }

    backup.naming_mode = schedule.naming_mode;
    backup.remote_backup = schedule.remote_backup;
}

/// 把配置中非空的目标目录覆盖到计划上（仅用于主计划）
pub fn apply_config_destinations(schedule: &mut Schedule, config: &AppConfig) {
    if !config.backup.destination1.trim().is_empty() {
        schedule.destination1 = config.backup.destination1.clone();
    }
    if !config.backup.destination2.trim().is_empty() {
        schedule.destination2 = Some(config.backup.destination2.clone());
    }
}

/// 计划自身未设置目标目录时才采用配置中的值
pub fn fill_missing_destinations(schedule: &mut Schedule, config: &AppConfig) {
    if schedule.destination1.trim().is_empty() {
        schedule.destination1 = config.backup.destination1.clone();
    }
    if schedule.secondary_destination().is_none() && !config.backup.destination2.trim().is_empty()
    {
        schedule.destination2 = Some(config.backup.destination2.clone());
    }
}

#[derive(Default)]
struct Cache {
    company: Option<Company>,
    remote_company: Option<Company>,
    schedule: Option<Schedule>,
}

/// 本地数据源与远程存储之间的同步
pub struct ReconciliationManager {
    local: Arc<dyn LocalDatabase>,
    remote: Arc<dyn RemoteStore>,
    config: ConfigStore,
    cache: Mutex<Cache>,
}

impl ReconciliationManager {
    pub fn new(
        local: Arc<dyn LocalDatabase>,
        remote: Arc<dyn RemoteStore>,
        config: ConfigStore,
    ) -> Self {
        Self {
            local,
            remote,
            config,
            cache: Mutex::new(Cache::default()),
        }
    }

    fn cache(&self) -> MutexGuard<'_, Cache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 同步公司信息到远程存储，返回远程ID
    pub async fn sync_company(&self) -> Result<i64> {
        let mut company = self
            .local
            .company()
            .await?
            .ok_or_else(|| BackupError::configuration("本地数据源中未找到公司信息"))?;

        let tax_id = company.normalized_tax_id();
        if tax_id.is_empty() {
            return Err(BackupError::configuration("公司税号为空"));
        }

        company.local_version = Some(APP_VERSION.to_string());
        company.last_interaction = Some(Utc::now());

        let id = match self.remote.company_by_tax_id(&tax_id).await? {
            Some(existing) => {
                let id = existing
                    .id
                    .ok_or_else(|| BackupError::custom("远程公司记录缺少ID"))?;
                self.remote.update_company(id, &company).await?;
                id
            }
            None => self.remote.insert_company(&company).await?,
        };

        let remote_company = self.remote.company_by_tax_id(&tax_id).await?;
        company.id = Some(id);
        {
            let mut cache = self.cache();
            cache.company = Some(company.clone());
            cache.remote_company = remote_company;
        }

        self.config.update(|cfg| {
            cfg.app.company_id = Some(id);
            cfg.app.company_tax_id = tax_id.clone();
        })?;

        info!("公司已同步: {} (ID: {})", company.display_name, id);
        Ok(id)
    }

    /// 同步主备份计划，按合并规则更新配置
    pub async fn sync_schedule(&self) -> Result<Schedule> {
        let mut schedule = self
            .local
            .schedule()
            .await?
            .ok_or_else(|| BackupError::configuration("本地数据源中未找到备份计划"))?;

        self.config
            .update(|cfg| merge_schedule_into_config(&mut schedule, cfg))?;

        self.cache().schedule = Some(schedule.clone());
        info!("备份计划已同步: {}", schedule.time_of_day);
        Ok(schedule)
    }

    /// 强制以数据源为准：目标目录和命名方式写入配置
    pub async fn sync_schedule_from_local(&self) -> Result<Schedule> {
        let schedule = self
            .local
            .schedule()
            .await?
            .ok_or_else(|| BackupError::configuration("本地数据源中未找到备份计划"))?;

        self.config.update(|cfg| {
            cfg.backup.destination1 = schedule.destination1.clone();
            cfg.backup.destination2 = schedule.destination2.clone().unwrap_or_default();
            cfg.backup.naming_mode = schedule.naming_mode;
            cfg.backup.remote_backup = schedule.remote_backup;
        })?;

        self.cache().schedule = Some(schedule.clone());
        info!("已按本地数据源重置备份目录: {}", schedule.destination1);
        Ok(schedule)
    }

    /// 完整同步：公司失败则中止
    pub async fn full_sync(&self) -> Result<()> {
        self.sync_company().await.map_err(|e| {
            error!("公司同步失败: {}", e);
            e
        })?;
        self.sync_schedule().await?;
        Ok(())
    }

    /// 本地公司信息（缓存）
    pub async fn company(&self) -> Result<Option<Company>> {
        if let Some(company) = self.cache().company.clone() {
            return Ok(Some(company));
        }

        let mut company = self.local.company().await?;
        if let Some(company) = company.as_mut() {
            company.id = company.id.or(self.config.snapshot().app.company_id);
        }
        self.cache().company = company.clone();
        Ok(company)
    }

    /// 远程公司记录（缓存）
    pub async fn remote_company(&self) -> Result<Option<Company>> {
        if let Some(company) = self.cache().remote_company.clone() {
            return Ok(Some(company));
        }

        let tax_id = self.config.snapshot().app.company_tax_id.clone();
        if tax_id.is_empty() {
            return Ok(None);
        }

        let company = self.remote.company_by_tax_id(&tax_id).await?;
        self.cache().remote_company = company.clone();
        Ok(company)
    }

    /// 主备份计划（缓存）
    pub async fn schedule(&self) -> Result<Option<Schedule>> {
        if let Some(schedule) = self.cache().schedule.clone() {
            return Ok(Some(schedule));
        }

        let schedule = self.local.schedule().await?;
        self.cache().schedule = schedule.clone();
        Ok(schedule)
    }

    /// 全部备份计划
    ///
    /// 主计划（第一个）与 `sync_schedule` 一致，以配置的目标目录为准；
    /// 其余计划保留各自的目标目录，为空时才采用配置。
    pub async fn all_schedules(&self) -> Result<Vec<Schedule>> {
        let config = self.config.snapshot();
        let mut schedules = self.local.all_schedules().await?;
        for (index, schedule) in schedules.iter_mut().enumerate() {
            if index == 0 {
                apply_config_destinations(schedule, &config);
            } else {
                fill_missing_destinations(schedule, &config);
            }
        }
        Ok(schedules)
    }

    /// 用最新配置修正缓存中的计划
    pub fn patch_cached_schedule(&self, config: &AppConfig) -> Option<Schedule> {
        let mut cache = self.cache();
        let schedule = cache.schedule.as_mut()?;
        apply_config_destinations(schedule, config);
        Some(schedule.clone())
    }

    /// 清空缓存
    pub fn refresh(&self) {
        *self.cache() = Cache::default();
    }

    pub async fn is_local_reachable(&self) -> bool {
        self.local.test_connection().await.is_ok()
    }

    pub async fn is_remote_reachable(&self) -> bool {
        self.remote.test_connection().await.is_ok()
    }

    pub fn local(&self) -> &Arc<dyn LocalDatabase> {
        &self.local
    }

    pub fn remote(&self) -> &Arc<dyn RemoteStore> {
        &self.remote
    }
}
