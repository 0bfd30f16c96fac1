use crate::app::CliApp;
use chrono::Local;
use topbackup_core::{
    error::{BackupError, Result},
    models::{BackupRun, RunStatus},
    pipeline::BackupOutcome,
};
use tracing::{info, instrument, warn};

/// 立即执行一次手动备份
#[instrument(skip(app))]
pub async fn run_backup(app: &CliApp) -> Result<()> {
    info!("💾 手动备份");
    info!("===========");

    app.orchestrator.initialize().await?;
    let result = app.orchestrator.execute_backup_manual().await;

    // 等待远程上传等后台任务结束
    app.orchestrator.shutdown().await;

    match result.outcome {
        BackupOutcome::Success => {
            if let Some(path) = &result.path {
                info!("✅ 备份完成: {}", path.display());
            }
            if let Some(secondary) = &result.secondary_path {
                info!("   副本: {}", secondary.display());
            }
            info!("   大小: {}", result.size_formatted);
            info!("   耗时: {:.1}s", result.duration_secs);
            Ok(())
        }
        BackupOutcome::Cancelled => {
            warn!("⚠️  {}", result.message);
            Ok(())
        }
        BackupOutcome::Failed | BackupOutcome::NotScheduled => {
            Err(BackupError::backup(result.message))
        }
    }
}

/// 显示备份历史
#[instrument(skip(app))]
pub async fn run_history(app: &CliApp, limit: usize, json: bool) -> Result<()> {
    let runs = app.orchestrator.backup_history(Some(limit)).await.map_err(|e| {
        warn!("💡 请先运行 'topbackup sync' 同步公司信息");
        e
    })?;

    if json {
        println!("{}", serde_json::to_string_pretty(&runs)?);
        return Ok(());
    }

    if runs.is_empty() {
        info!("📭 暂无备份记录");
        return Ok(());
    }

    info!("📚 备份历史（最近 {} 条）:", runs.len());
    for run in &runs {
        info!("   {}", history_line(run));
        if let Some(error) = &run.error_message {
            info!("      错误: {}", error);
        }
    }
    Ok(())
}

fn history_line(run: &BackupRun) -> String {
    let icon = match run.status {
        RunStatus::Success => "✅",
        RunStatus::Failure => "❌",
        RunStatus::Pending | RunStatus::Running => "⏳",
    };
    format!(
        "{} {} {} {} [{}]{}",
        icon,
        run.started_at
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M:%S"),
        run.file_name.as_deref().unwrap_or("-"),
        run.size_formatted.as_deref().unwrap_or("-"),
        if run.manual { "手动" } else { "计划" },
        if run.uploaded { " ☁️" } else { "" },
    )
}
