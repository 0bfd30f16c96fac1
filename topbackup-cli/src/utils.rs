use tracing_appender::non_blocking::WorkerGuard;

/// # TopBackup 日志系统使用说明
///
/// 库代码只使用 `tracing` 宏，日志配置在 `main.rs` 中通过 `setup_logging()` 完成。
///
/// ## 日志配置选项
///
/// - `-v, --verbose`：启用详细日志模式（DEBUG 级别）
/// - `RUST_LOG`：标准的日志级别控制（如 `debug`, `topbackup_core::scheduler=trace`）
/// - `TOPBACKUP_LOG_FILE`：日志文件路径，设置后日志输出到文件而非终端
///
/// ```bash
/// # 守护进程，日志写入文件
/// TOPBACKUP_LOG_FILE=topbackup.log topbackup run
///
/// # 详细日志
/// topbackup -v backup
/// ```
///
/// 返回的 `WorkerGuard` 需要保持到进程退出，否则缓冲中的日志会丢失。
pub fn setup_logging(verbose: bool) -> Option<WorkerGuard> {
    use tracing_subscriber::{EnvFilter, fmt};

    let default_level = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let log_file = std::env::var("TOPBACKUP_LOG_FILE").ok().and_then(|path| {
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| eprintln!("无法打开日志文件 {path}: {e}，改为输出到终端"))
            .ok()
    });

    match log_file {
        Some(file) => {
            // 文件输出：包含模块路径和行号
            let (writer, guard) = tracing_appender::non_blocking(file);
            fmt()
                .with_env_filter(env_filter)
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .with_thread_names(true)
                .with_line_number(true)
                .init();
            Some(guard)
        }
        None => {
            // 终端输出：简洁格式
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_thread_names(false)
                .with_line_number(false)
                .compact()
                .init();
            None
        }
    }
}
