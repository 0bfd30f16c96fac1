use crate::app::CliApp;
use crate::project_info::get_version_string;
use topbackup_core::error::Result;
use tracing::{info, instrument};

/// 守护进程：初始化、启动调度，等待 Ctrl-C 后优雅退出
#[instrument(skip(app))]
pub async fn run_daemon(app: &CliApp) -> Result<()> {
    info!("🚀 {} 启动", get_version_string());
    info!("   配置文件: {}", app.config_path.display());
    info!("   本地数据源: {}", app.source_path.display());

    app.orchestrator.initialize().await?;
    app.orchestrator.start().await?;

    let status = app.orchestrator.status().await;
    info!("📅 已注册任务:");
    for job in &status.jobs {
        let next = job
            .next_fire
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        info!("   - {} [{}] {} 下次: {}", job.id, job.kind, job.trigger, next);
    }

    tokio::signal::ctrl_c().await?;
    info!("收到退出信号，正在关闭...");
    app.orchestrator.shutdown().await;
    Ok(())
}
