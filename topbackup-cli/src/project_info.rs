/// TopBackup 项目信息模块
///
/// 面向用户的元数据统一在这里定义，topbackup-core 只提供技术性常量

/// 项目元数据（从 Cargo.toml 同步）
pub mod metadata {
    pub const PROJECT_NAME: &str = env!("CARGO_PKG_NAME");

    pub const PROJECT_DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

    pub const PROJECT_AUTHORS: &str = env!("CARGO_PKG_AUTHORS");

    /// 用户友好的显示名称（手动维护）
    pub mod display {
        pub const FRIENDLY_NAME: &str = "TopBackup";

        /// 项目详细描述
        pub const DESCRIPTION_LONG: &str = "本地数据库自动备份服务：按计划导出、校验、压缩并分发备份文件，记录备份历史，支持手动备份和远程上传";
    }
}

/// 版本信息
pub mod version_info {
    /// CLI 版本
    pub const CLI_VERSION: &str = env!("CARGO_PKG_VERSION");

    /// 核心库版本（写入远程公司记录的版本号）
    pub const CORE_VERSION: &str = topbackup_core::constants::version::APP_VERSION;
}

/// 获取版本信息字符串
pub fn get_version_string() -> String {
    format!(
        "{} v{} (core v{})",
        metadata::display::FRIENDLY_NAME,
        version_info::CLI_VERSION,
        version_info::CORE_VERSION
    )
}
