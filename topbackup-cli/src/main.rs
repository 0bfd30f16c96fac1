use anyhow::Context;
use clap::Parser;
use topbackup_cli::{Cli, CliApp, Commands, run_init, setup_logging};
use tracing::error;

async fn run(cli: Cli) -> anyhow::Result<()> {
    // `init` 命令是特例，它不需要预先加载配置
    if let Commands::Init { force } = cli.command {
        return run_init(cli.config, cli.source, force)
            .await
            .context("初始化失败");
    }

    let app = CliApp::new(cli.config, cli.source)
        .await
        .context("应用初始化失败")?;
    app.run_command(cli.command).await.context("操作失败")
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // 保持到进程退出，确保文件日志全部写出
    let log_guard = setup_logging(cli.verbose);

    if let Err(e) = run(cli).await {
        error!("❌ {:#}", e);
        drop(log_guard);
        std::process::exit(1);
    }
}
