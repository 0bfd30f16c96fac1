use crate::app::CliApp;
use crate::project_info::get_version_string;
use topbackup_core::error::Result;
use topbackup_core::pipeline::BackupOutcome;
use tracing::{info, instrument, warn};

/// 显示客户端版本信息
pub fn show_client_version() {
    info!("🗄️  {}", get_version_string());
    info!("==================");
}

/// 显示当前状态（会先执行一次初始化同步）
#[instrument(skip(app))]
pub async fn run_status(app: &CliApp, json: bool) -> Result<()> {
    if let Err(e) = app.orchestrator.initialize().await {
        warn!("初始化未完成: {}", e);
    }
    let status = app.orchestrator.status().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    show_client_version();
    info!("📋 基本信息:");
    info!("   状态: {}", status.state);
    if let Some(error) = &status.error_message {
        warn!("   ❌ 错误: {}", error);
    }
    info!("   配置文件: {}", app.config_path.display());
    info!("   本地数据源: {}", app.source_path.display());
    info!(
        "   历史库: {}",
        if status.remote_reachable { "✅ 可用" } else { "❌ 不可用" }
    );

    info!("🏢 公司:");
    info!("   名称: {}", status.company_name.as_deref().unwrap_or("-"));
    info!("   税号: {}", status.tax_id.as_deref().unwrap_or("-"));

    info!("📁 备份目标:");
    info!("   主目录: {}", status.destination1.as_deref().unwrap_or("未配置"));
    info!("   次目录: {}", status.destination2.as_deref().unwrap_or("-"));
    if let Some(mode) = status.naming_mode {
        info!("   命名方式: {}", mode);
    }

    let snapshot = app.config.snapshot();
    info!(
        "   远程上传: {}",
        if snapshot.backup.remote_backup && snapshot.upload.is_configured() {
            snapshot.upload.host.as_str()
        } else {
            "未启用"
        }
    );

    info!("📅 计划任务:");
    for job in &status.jobs {
        let next = job
            .next_fire
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        info!("   - {} {} (下次: {})", job.id, job.trigger, next);
    }

    match &status.last_result {
        Some(result) if result.outcome == BackupOutcome::Success => {
            info!("   上次备份: ✅ {}", result.file_name.as_deref().unwrap_or("-"));
        }
        Some(result) => info!("   上次备份: ❌ {}", result.message),
        None => {}
    }
    Ok(())
}
