use crate::app::{resolve_config_path, resolve_source_path};
use std::path::{Path, PathBuf};
use topbackup_core::{config::AppConfig, error::Result, store::HistoryStore};
use tracing::{info, warn};

/// 本地数据源样例：ERP 按此格式导出公司和备份计划
const SAMPLE_LOCAL_SOURCE: &str = r#"# ERP 导出的本地数据（公司 + 备份计划）
system_version = "1.0.0"

[company]
local_id = 1
display_name = "Minha Empresa"
legal_name = "Minha Empresa LTDA"
tax_id = "00.000.000/0001-00"

[[schedules]]
time_of_day = "23:00"
monday = true
tuesday = true
wednesday = true
thursday = true
friday = true
destination1 = ""
remote_backup = false
naming_mode = "versioned"
"#;

/// 运行独立的初始化流程
pub async fn run_init(
    config_path: Option<PathBuf>,
    source_path: Option<PathBuf>,
    force: bool,
) -> Result<()> {
    let config_path = resolve_config_path(config_path);
    let source_path = resolve_source_path(source_path, &config_path);

    info!("🗄️  TopBackup 初始化");
    info!("======================");

    if !force && config_path.exists() {
        warn!("⚠️  检测到已存在的配置文件: {}", config_path.display());
        info!("如果您要重新初始化，请使用 --force 参数");
        info!("示例: topbackup init --force");
        return Ok(());
    }

    info!("📋 步骤 1: 创建配置文件");
    let config = AppConfig::default();
    config.save_to_file(&config_path)?;
    info!("   ✅ 创建配置文件: {}", config_path.display());

    info!("📋 步骤 2: 准备本地数据源");
    if write_sample_source(&source_path)? {
        info!("   ✅ 创建数据源样例: {}", source_path.display());
    } else {
        info!("   ✅ 使用已有数据源: {}", source_path.display());
    }

    info!("📋 步骤 3: 初始化历史库");
    HistoryStore::open(&config.remote_db.store_path).await?;
    info!("   ✅ DuckDB历史库: {}", config.remote_db.store_path);

    info!("🎉 初始化完成！");
    info!("");
    info!("📝 接下来的步骤:");
    info!("   1️⃣  编辑配置文件，填写数据库路径和备份工具路径");
    info!("   2️⃣  运行 'topbackup sync' 同步公司信息和备份计划");
    info!("   3️⃣  运行 'topbackup backup' 验证一次手动备份");
    info!("   4️⃣  运行 'topbackup run' 启动定时备份");
    Ok(())
}

/// 数据源文件不存在时写入样例，返回是否新建
fn write_sample_source(path: &Path) -> Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, SAMPLE_LOCAL_SOURCE)?;
    Ok(true)
}
