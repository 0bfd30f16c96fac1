/// 应用版本相关常量
pub mod version {
    /// 当前程序版本（写入公司记录的 versao_local）
    pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
}

/// 配置文件相关常量
pub mod config {
    use std::path::PathBuf;

    /// 配置文件名
    pub const CONFIG_FILE_NAME: &str = "config.toml";

    /// 首次运行时用于初始化配置的模板文件名
    pub const CONFIG_EXAMPLE_FILE_NAME: &str = "config.toml.example";

    /// 应用数据目录名
    pub const APP_DIR_NAME: &str = "topbackup";

    /// 获取默认的应用数据目录（跨平台）
    pub fn get_default_app_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(APP_DIR_NAME)
    }

    /// 获取默认配置文件路径
    pub fn get_default_config_path() -> PathBuf {
        get_default_app_dir().join(CONFIG_FILE_NAME)
    }
}

/// 备份相关常量
pub mod backup {
    use std::path::PathBuf;

    /// 数据库导出文件扩展名
    pub const DUMP_EXTENSION: &str = "fbk";

    /// 压缩包扩展名
    pub const ZIP_EXTENSION: &str = "zip";

    /// 导出文件最小合理大小（字节），小于此值视为损坏或空文件
    pub const MIN_DUMP_SIZE: u64 = 1024;

    /// 临时目录名
    pub const TEMP_DIR_NAME: &str = "topbackup_temp";

    /// 流水线临时文件名前缀，清理时只处理带此前缀的文件
    pub const TEMP_FILE_PREFIX: &str = "TopBackup_";

    /// 临时文件保留时长（小时）
    pub const TEMP_MAX_AGE_HOURS: u64 = 24;

    /// 默认导出命令参数模板
    pub const DEFAULT_DUMP_ARGUMENTS: [&str; 7] = [
        "-b",
        "-user",
        "{user}",
        "-pass",
        "{password}",
        "{source}",
        "{output}",
    ];

    /// 获取默认临时目录
    pub fn get_default_temp_dir() -> PathBuf {
        std::env::temp_dir().join(TEMP_DIR_NAME)
    }
}

/// 超时相关常量（秒）
pub mod timeout {
    /// 数据库导出的硬超时（大型数据库需要较长时间）
    pub const DUMP_TIMEOUT: u64 = 3600;

    /// 远程上传超时
    pub const UPLOAD_TIMEOUT: u64 = 60;

    /// 关闭时等待后台任务结束的最长时间
    pub const SHUTDOWN_GRACE: u64 = 10;
}

/// 调度相关常量
pub mod scheduler {
    /// 配置同步间隔（分钟）
    pub const CONFIG_SYNC_INTERVAL_MINUTES: u64 = 30;

    /// 更新检查间隔（分钟）
    pub const UPDATE_CHECK_INTERVAL_MINUTES: u64 = 60;

    /// 错过触发时间后仍允许补跑的宽限期（秒）
    pub const MISFIRE_GRACE_SECS: i64 = 3600;

    /// 调度循环的最长休眠时间（秒）
    pub const MAX_IDLE_SECS: u64 = 60;

    /// 备份任务ID前缀
    pub const BACKUP_JOB_PREFIX: &str = "backup_job";

    /// 手动触发的一次性备份任务ID
    pub const MANUAL_BACKUP_JOB_ID: &str = "backup_manual";

    /// 配置同步任务ID
    pub const CONFIG_SYNC_JOB_ID: &str = "config_sync_job";

    /// 更新检查任务ID
    pub const UPDATE_CHECK_JOB_ID: &str = "update_check_job";
}

/// 容错相关常量
pub mod resilience {
    /// 默认最大尝试次数
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

    /// 本地数据库重试初始延迟（毫秒）
    pub const LOCAL_DB_INITIAL_DELAY_MS: u64 = 1000;

    /// 远程数据库重试初始延迟（毫秒）
    pub const REMOTE_DB_INITIAL_DELAY_MS: u64 = 2000;

    /// 退避倍数
    pub const BACKOFF_MULTIPLIER: f64 = 2.0;

    /// 最大重试延迟（毫秒）
    pub const MAX_DELAY_MS: u64 = 30_000;

    /// 熔断阈值：连续失败次数
    pub const FAILURE_THRESHOLD: u32 = 5;

    /// 熔断恢复等待时间（秒）
    pub const RECOVERY_TIMEOUT_SECS: u64 = 30;

    /// 半开状态下恢复所需的连续成功次数
    pub const HALF_OPEN_SUCCESSES: u32 = 3;
}

/// 远程上传相关常量
pub mod upload {
    /// 默认上传端口
    pub const DEFAULT_PORT: u16 = 443;

    /// 默认远程目录
    pub const DEFAULT_REMOTE_PATH: &str = "/backups";

    /// User-Agent头
    pub const USER_AGENT: &str = "topbackup/1.0";
}

/// 历史记录存储相关常量
pub mod store {
    /// 默认历史库文件名
    pub const DEFAULT_STORE_FILE: &str = "history.duckdb";

    /// 查询备份历史时的默认条数
    pub const DEFAULT_HISTORY_LIMIT: usize = 50;
}
