use crate::constants::backup;
use crate::error::{BackupError, Result};
use crate::models::{NamingMode, normalize_tax_id};
use chrono::{DateTime, Datelike, Local, Weekday};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};
use walkdir::WalkDir;
use zip::CompressionMethod;
use zip::write::{SimpleFileOptions, ZipWriter};

/// 常见安装位置，配置的导出工具找不到时依次尝试
const KNOWN_TOOL_LOCATIONS: &[&str] = &[
    r"C:\Program Files\Firebird\Firebird_5_0\gbak.exe",
    r"C:\Program Files\Firebird\Firebird_4_0\gbak.exe",
    r"C:\Program Files\Firebird\Firebird_3_0\gbak.exe",
    r"C:\Program Files (x86)\Firebird\Firebird_2_5\bin\gbak.exe",
    "/opt/firebird/bin/gbak",
    "/usr/bin/gbak",
];

/// 格式化文件大小，保留两位小数
pub fn format_size(size_bytes: u64) -> String {
    if size_bytes == 0 {
        return "0 B".to_string();
    }

    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut size = size_bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }

    format!("{:.2} {}", size, UNITS[unit])
}

/// 星期缩写（周一在前，七个互不相同的值）
fn weekday_code(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "SEG",
        Weekday::Tue => "TER",
        Weekday::Wed => "QUA",
        Weekday::Thu => "QUI",
        Weekday::Fri => "SEX",
        Weekday::Sat => "SAB",
        Weekday::Sun => "DOM",
    }
}

/// 按命名方式生成备份文件名
pub fn backup_file_name(
    tax_id: &str,
    mode: NamingMode,
    extension: &str,
    now: DateTime<Local>,
) -> String {
    let tax_id = normalize_tax_id(tax_id);
    match mode {
        NamingMode::Versioned => {
            format!("{}_{}.{}", tax_id, now.format("%Y%m%d_%H%M%S"), extension)
        }
        NamingMode::Weekly => {
            format!("{}_{}.{}", tax_id, weekday_code(now.weekday()), extension)
        }
        NamingMode::Single => format!("{tax_id}.{extension}"),
    }
}

/// 查找导出工具：绝对路径、PATH 中的命令名，最后尝试常见安装位置
pub fn resolve_tool(configured: &str) -> Option<PathBuf> {
    let configured = configured.trim();
    if !configured.is_empty() {
        let path = Path::new(configured);
        if path.is_file() {
            return Some(path.to_path_buf());
        }
        if let Ok(found) = which::which(configured) {
            return Some(found);
        }
        return None;
    }

    KNOWN_TOOL_LOCATIONS
        .iter()
        .map(PathBuf::from)
        .find(|p| p.is_file())
        .or_else(|| which::which("gbak").ok())
}

/// 移动文件，目标已存在时覆盖；跨设备时退化为复制后删除
pub async fn safe_move(source: &Path, destination: &Path) -> Result<()> {
    prepare_destination(destination).await?;

    match tokio::fs::rename(source, destination).await {
        Ok(()) => Ok(()),
        Err(e) => {
            debug!("重命名失败，改用复制: {}", e);
            tokio::fs::copy(source, destination).await?;
            tokio::fs::remove_file(source).await?;
            Ok(())
        }
    }
}

/// 复制文件，目标已存在时覆盖
pub async fn safe_copy(source: &Path, destination: &Path) -> Result<u64> {
    prepare_destination(destination).await?;
    Ok(tokio::fs::copy(source, destination).await?)
}

async fn prepare_destination(destination: &Path) -> Result<()> {
    if let Some(parent) = destination.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    if tokio::fs::try_exists(destination).await? {
        tokio::fs::remove_file(destination).await?;
    }
    Ok(())
}

/// 将单个文件压缩为 zip，压缩包内只保留文件名
pub async fn compress_file(source: &Path, zip_path: &Path, entry_name: &str) -> Result<u64> {
    let source = source.to_path_buf();
    let zip_path = zip_path.to_path_buf();
    let entry_name = entry_name.to_string();

    tokio::task::spawn_blocking(move || -> Result<u64> {
        let zip_file = File::create(&zip_path)?;
        let mut zip = ZipWriter::new(zip_file);
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .large_file(true);

        zip.start_file(entry_name, options)?;
        let mut input = File::open(&source)?;
        io::copy(&mut input, &mut zip)?;
        zip.finish()?;

        Ok(std::fs::metadata(&zip_path)?.len())
    })
    .await?
}

/// 完整读取压缩包内每个条目，校验 CRC
pub async fn verify_archive(zip_path: &Path) -> Result<()> {
    let zip_path = zip_path.to_path_buf();

    tokio::task::spawn_blocking(move || -> Result<()> {
        let mut archive = zip::ZipArchive::new(File::open(&zip_path)?)?;
        if archive.len() == 0 {
            return Err(BackupError::validation("压缩包为空"));
        }
        for i in 0..archive.len() {
            let mut entry = archive.by_index(i)?;
            let name = entry.name().to_string();
            io::copy(&mut entry, &mut io::sink()).map_err(|e| {
                BackupError::validation(format!("压缩包校验失败 {name}: {e}"))
            })?;
        }
        Ok(())
    })
    .await?
}

/// 清理临时目录中本程序生成且超过指定时长的文件，返回删除数量
///
/// 只处理带 `TEMP_FILE_PREFIX` 前缀的普通文件，其他文件和子目录保持不动。
/// 单个文件删除失败只记录日志。
pub async fn cleanup_temp_files(temp_dir: &Path, max_age: Duration) -> Result<usize> {
    let temp_dir = temp_dir.to_path_buf();
    if !temp_dir.exists() {
        return Ok(0);
    }

    tokio::task::spawn_blocking(move || -> Result<usize> {
        let now = SystemTime::now();
        let mut removed = 0;

        for entry in WalkDir::new(&temp_dir).min_depth(1).max_depth(1) {
            let entry = entry?;
            if !entry.file_type().is_file() || !is_temp_artifact(entry.file_name()) {
                continue;
            }

            let age = entry
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .and_then(|modified| now.duration_since(modified).ok());

            let Some(age) = age else { continue };
            if age <= max_age {
                continue;
            }

            let path = entry.path();
            match std::fs::remove_file(path) {
                Ok(()) => removed += 1,
                Err(e) => warn!("清理临时文件失败 {}: {}", path.display(), e),
            }
        }

        Ok(removed)
    })
    .await?
}

/// 流水线临时文件名
pub fn temp_artifact_name(name: &str) -> String {
    format!("{}{}", backup::TEMP_FILE_PREFIX, name)
}

fn is_temp_artifact(file_name: &std::ffi::OsStr) -> bool {
    file_name
        .to_str()
        .is_some_and(|name| name.starts_with(backup::TEMP_FILE_PREFIX))
}

/// 临时文件默认保留时长
pub fn default_temp_max_age() -> Duration {
    Duration::from_secs(backup::TEMP_MAX_AGE_HOURS * 3600)
}

/// 检查文件大小是否达到最小值
pub async fn validate_min_size(path: &Path, min_size: u64) -> Result<u64> {
    let metadata = match tokio::fs::metadata(path).await {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(BackupError::validation(format!(
                "备份文件未生成: {}",
                path.display()
            )));
        }
        Err(e) => return Err(e.into()),
    };

    let size = metadata.len();
    if size == 0 {
        return Err(BackupError::validation(format!(
            "备份文件为空: {}",
            path.display()
        )));
    }
    if size < min_size {
        return Err(BackupError::validation(format!(
            "备份文件太小 ({})，可能已损坏",
            format_size(size)
        )));
    }
    Ok(size)
}
