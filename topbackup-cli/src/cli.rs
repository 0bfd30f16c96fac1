use crate::project_info::{metadata, version_info};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// TopBackup - 数据库自动备份服务
#[derive(Parser, Debug)]
#[command(name = "topbackup")]
#[command(about = metadata::PROJECT_DESCRIPTION)]
#[command(version = version_info::CLI_VERSION)]
#[command(long_about = metadata::display::DESCRIPTION_LONG)]
#[command(author = metadata::PROJECT_AUTHORS)]
pub struct Cli {
    /// 配置文件路径（默认位于应用数据目录）
    #[arg(short, long, env = "TOPBACKUP_CONFIG")]
    pub config: Option<PathBuf>,

    /// 本地数据源导出文件（公司与备份计划），默认与配置文件同目录
    #[arg(short, long, env = "TOPBACKUP_SOURCE")]
    pub source: Option<PathBuf>,

    /// 详细输出
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 首次使用时初始化：创建配置文件、数据源样例和历史库
    Init {
        /// 如果配置文件已存在，强制覆盖
        #[arg(long)]
        force: bool,
    },
    /// 以守护进程方式运行调度器，Ctrl-C 退出
    Run,
    /// 立即执行一次手动备份
    Backup,
    /// 与本地数据源同步公司和备份计划
    Sync {
        /// 以本地数据源的目标目录和命名方式覆盖配置
        #[arg(long)]
        force: bool,
    },
    /// 显示当前状态
    Status {
        /// 以 JSON 格式输出
        #[arg(long)]
        json: bool,
    },
    /// 显示备份历史
    History {
        /// 显示条数
        #[arg(long, short = 'n', default_value_t = 20)]
        limit: usize,
        /// 以 JSON 格式输出
        #[arg(long)]
        json: bool,
    },
    /// 检查是否有新版本发布
    CheckUpdate,
    /// 在历史库中登记新版本（供各客户端的更新检查读取）
    PublishVersion {
        /// 版本号，例如 1.2.0
        version: String,
        /// 安装包下载地址
        #[arg(long)]
        url: String,
        #[arg(long)]
        sha256: Option<String>,
        #[arg(long)]
        changelog: Option<String>,
        /// 标记为强制更新
        #[arg(long)]
        mandatory: bool,
    },
}
