use crate::app::CliApp;
use chrono::Utc;
use std::sync::Arc;
use topbackup_core::{error::Result, models::VersionInfo, update::UpdateChecker};
use tracing::{info, instrument, warn};

/// 检查历史库中登记的最新版本
#[instrument(skip(app))]
pub async fn run_check_update(app: &CliApp) -> Result<()> {
    let checker = UpdateChecker::new(Arc::new(app.store.clone()));

    match checker.check().await? {
        Some(latest) => {
            info!(
                "🆕 发现新版本: v{} -> v{}",
                checker.current_version(),
                latest.version
            );
            info!("   下载地址: {}", latest.download_url);
            if let Some(changelog) = &latest.changelog {
                info!("   更新说明: {}", changelog);
            }
            if latest.mandatory {
                warn!("   ⚠️  该版本为强制更新");
            }
        }
        None => info!("✅ 当前已是最新版本: v{}", checker.current_version()),
    }
    Ok(())
}

/// 登记新版本
#[instrument(skip(app))]
pub async fn run_publish_version(
    app: &CliApp,
    version: String,
    url: String,
    sha256: Option<String>,
    changelog: Option<String>,
    mandatory: bool,
) -> Result<()> {
    let id = app
        .store
        .publish_version(VersionInfo {
            version: version.clone(),
            released_at: Some(Utc::now()),
            download_url: url,
            sha256,
            changelog,
            mandatory,
        })
        .await?;

    info!("✅ 版本 v{} 已登记 (ID: {})", version, id);
    Ok(())
}
