use crate::app::CliApp;
use topbackup_core::error::Result;
use tracing::{info, instrument};

/// 同步公司和备份计划；`force` 时以本地数据源的目标目录为准
#[instrument(skip(app))]
pub async fn run_sync(app: &CliApp, force: bool) -> Result<()> {
    info!("🔄 同步本地数据源: {}", app.source_path.display());

    app.orchestrator.initialize().await?;
    if force {
        app.orchestrator.reload_config(true).await?;
    }

    let status = app.orchestrator.status().await;
    info!(
        "✅ 公司: {} ({})",
        status.company_name.as_deref().unwrap_or("-"),
        status.tax_id.as_deref().unwrap_or("-")
    );
    info!("   主备份目录: {}", status.destination1.as_deref().unwrap_or("未配置"));
    if let Some(destination2) = &status.destination2 {
        info!("   次备份目录: {}", destination2);
    }
    if let Some(mode) = status.naming_mode {
        info!("   命名方式: {}", mode);
    }
    info!("   配置已写入: {}", app.config_path.display());
    Ok(())
}
