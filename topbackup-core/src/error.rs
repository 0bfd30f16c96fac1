use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, BackupError>;

/// 错误分类，用于重试策略和告警判断
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Configuration,
    Connectivity,
    Validation,
    Cancelled,
    Timeout,
    CircuitOpen,
    Io,
    Storage,
    Other,
}

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("连接失败: {0}")]
    Connectivity(String),

    #[error("校验失败: {0}")]
    Validation(String),

    #[error("备份已被用户取消")]
    Cancelled,

    #[error("操作超时: {0}")]
    Timeout(String),

    #[error("熔断器已打开，请在 {:.1}s 后重试", retry_after.as_secs_f64())]
    CircuitOpen { retry_after: Duration },

    #[error("配置文件解析错误: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("配置文件序列化错误: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("DuckDB数据库错误: {0}")]
    DuckDb(String),

    #[error("历史库已被其他进程占用: {0}")]
    StoreLocked(String),

    #[error("HTTP 请求错误: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("任务执行错误: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("ZIP 文件错误: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("目录遍历错误: {0}")]
    WalkDir(#[from] walkdir::Error),

    #[error("备份操作失败: {0}")]
    Backup(String),

    #[error("自定义错误: {0}")]
    Custom(String),
}

// 为DuckDB错误实现From trait
impl From<duckdb::Error> for BackupError {
    fn from(err: duckdb::Error) -> Self {
        BackupError::DuckDb(err.to_string())
    }
}

impl BackupError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn connectivity(msg: impl Into<String>) -> Self {
        Self::Connectivity(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn backup(msg: impl Into<String>) -> Self {
        Self::Backup(msg.into())
    }

    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }

    /// 错误所属分类
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) | Self::TomlDe(_) | Self::TomlSer(_) => {
                ErrorKind::Configuration
            }
            Self::Connectivity(_) => ErrorKind::Connectivity,
            // 网络层错误里只有连接/超时类属于瞬时故障
            Self::Http(e) if e.is_connect() || e.is_timeout() => ErrorKind::Connectivity,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            Self::Io(_) | Self::WalkDir(_) | Self::Zip(_) => ErrorKind::Io,
            Self::DuckDb(_) | Self::StoreLocked(_) => ErrorKind::Storage,
            _ => ErrorKind::Other,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
