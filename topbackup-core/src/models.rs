use chrono::{DateTime, Datelike, Local, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 公司（备份归属方）信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Company {
    /// 远程存储分配的ID
    #[serde(default)]
    pub id: Option<i64>,
    /// 本地系统中的ID
    #[serde(default)]
    pub local_id: Option<i64>,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub legal_name: String,
    /// 税号，用于生成备份文件名
    #[serde(default)]
    pub tax_id: String,
    #[serde(default)]
    pub last_interaction: Option<DateTime<Utc>>,
    #[serde(default)]
    pub local_version: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

impl Company {
    /// 只保留数字的税号
    pub fn normalized_tax_id(&self) -> String {
        normalize_tax_id(&self.tax_id)
    }
}

/// 税号规范化：去掉所有非数字字符
pub fn normalize_tax_id(tax_id: &str) -> String {
    tax_id.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// 备份文件命名方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NamingMode {
    /// {税号}_{YYYYMMDD}_{HHMMSS}，每次一个新文件
    #[default]
    #[serde(alias = "V")]
    Versioned,
    /// {税号}_{星期}，每周覆盖一次，最多保留7个
    #[serde(alias = "S")]
    Weekly,
    /// {税号}，每次覆盖，只保留1个
    #[serde(alias = "U")]
    Single,
}

impl NamingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            NamingMode::Versioned => "versioned",
            NamingMode::Weekly => "weekly",
            NamingMode::Single => "single",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "versioned" | "V" => Some(NamingMode::Versioned),
            "weekly" | "S" => Some(NamingMode::Weekly),
            "single" | "U" => Some(NamingMode::Single),
            _ => None,
        }
    }
}

impl fmt::Display for NamingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 备份计划：何时、备份到哪里
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    #[serde(default)]
    pub id: Option<i64>,
    /// 执行时间，格式 HH:MM
    pub time_of_day: String,
    #[serde(default)]
    pub monday: bool,
    #[serde(default)]
    pub tuesday: bool,
    #[serde(default)]
    pub wednesday: bool,
    #[serde(default)]
    pub thursday: bool,
    #[serde(default)]
    pub friday: bool,
    #[serde(default)]
    pub saturday: bool,
    #[serde(default)]
    pub sunday: bool,
    /// 主备份目录
    #[serde(default)]
    pub destination1: String,
    /// 次备份目录（可选）
    #[serde(default)]
    pub destination2: Option<String>,
    /// 是否上传到远程
    #[serde(default)]
    pub remote_backup: bool,
    #[serde(default)]
    pub naming_mode: NamingMode,
    /// 来源数据库标识
    #[serde(default)]
    pub source_database: String,
}

impl Default for Schedule {
    fn default() -> Self {
        Self {
            id: None,
            time_of_day: "23:00".to_string(),
            monday: true,
            tuesday: true,
            wednesday: true,
            thursday: true,
            friday: true,
            saturday: false,
            sunday: false,
            destination1: String::new(),
            destination2: None,
            remote_backup: false,
            naming_mode: NamingMode::Versioned,
            source_database: String::new(),
        }
    }
}

impl Schedule {
    /// 指定星期是否需要执行
    pub fn runs_on(&self, weekday: Weekday) -> bool {
        match weekday {
            Weekday::Mon => self.monday,
            Weekday::Tue => self.tuesday,
            Weekday::Wed => self.wednesday,
            Weekday::Thu => self.thursday,
            Weekday::Fri => self.friday,
            Weekday::Sat => self.saturday,
            Weekday::Sun => self.sunday,
        }
    }

    /// 所有启用的星期（周一在前）
    pub fn active_weekdays(&self) -> Vec<Weekday> {
        [
            Weekday::Mon,
            Weekday::Tue,
            Weekday::Wed,
            Weekday::Thu,
            Weekday::Fri,
            Weekday::Sat,
            Weekday::Sun,
        ]
        .into_iter()
        .filter(|day| self.runs_on(*day))
        .collect()
    }

    /// 今天是否需要执行
    pub fn should_run_today(&self) -> bool {
        self.runs_on(Local::now().weekday())
    }

    /// 解析执行时间，格式错误时返回 None
    pub fn hour_minute(&self) -> Option<(u32, u32)> {
        let mut parts = self.time_of_day.trim().split(':');
        let hour = parts.next()?.trim().parse::<u32>().ok()?;
        let minute = parts.next()?.trim().parse::<u32>().ok()?;
        if hour > 23 || minute > 59 {
            return None;
        }
        Some((hour, minute))
    }

    /// 次备份目录（空字符串视为未配置）
    pub fn secondary_destination(&self) -> Option<&str> {
        self.destination2
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
    }
}

/// 备份执行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Success,
    Failure,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Failure => "failure",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "running" => RunStatus::Running,
            "success" => RunStatus::Success,
            "failure" => RunStatus::Failure,
            _ => RunStatus::Pending,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单次备份的执行记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupRun {
    pub id: Option<i64>,
    pub company_id: i64,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub file_name: Option<String>,
    pub destination_path: Option<String>,
    pub destination2_path: Option<String>,
    pub size_bytes: Option<i64>,
    pub size_formatted: Option<String>,
    pub status: RunStatus,
    pub error_message: Option<String>,
    pub naming_mode: NamingMode,
    pub uploaded: bool,
    pub uploaded_at: Option<DateTime<Utc>>,
    pub manual: bool,
}

impl BackupRun {
    /// 创建一条“执行中”的记录
    pub fn started(company_id: i64, naming_mode: NamingMode, manual: bool) -> Self {
        Self {
            id: None,
            company_id,
            started_at: Utc::now(),
            finished_at: None,
            file_name: None,
            destination_path: None,
            destination2_path: None,
            size_bytes: None,
            size_formatted: None,
            status: RunStatus::Running,
            error_message: None,
            naming_mode,
            uploaded: false,
            uploaded_at: None,
            manual,
        }
    }

    pub fn mark_success(
        &mut self,
        file_name: String,
        destination_path: String,
        size_bytes: u64,
        size_formatted: String,
        destination2_path: Option<String>,
    ) {
        self.status = RunStatus::Success;
        self.finished_at = Some(Utc::now());
        self.file_name = Some(file_name);
        self.destination_path = Some(destination_path);
        self.destination2_path = destination2_path;
        self.size_bytes = Some(size_bytes as i64);
        self.size_formatted = Some(size_formatted);
    }

    pub fn mark_failure(&mut self, error: impl Into<String>) {
        self.status = RunStatus::Failure;
        self.finished_at = Some(Utc::now());
        self.error_message = Some(error.into());
    }

    pub fn mark_uploaded(&mut self) {
        self.uploaded = true;
        self.uploaded_at = Some(Utc::now());
    }

    /// 执行耗时（秒）
    pub fn duration_secs(&self) -> Option<f64> {
        self.finished_at
            .map(|end| (end - self.started_at).num_milliseconds() as f64 / 1000.0)
    }
}

/// 远程发布的版本信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: String,
    pub released_at: Option<DateTime<Utc>>,
    pub download_url: String,
    pub sha256: Option<String>,
    pub changelog: Option<String>,
    pub mandatory: bool,
}
