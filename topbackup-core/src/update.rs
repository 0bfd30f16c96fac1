use crate::collaborators::RemoteStore;
use crate::constants::version::APP_VERSION;
use crate::error::Result;
use crate::models::VersionInfo;
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, info};

/// 比较版本号，格式为 v1.2.3 或 1.2.3，缺少的段按 0 处理
pub fn compare_versions(current: &str, latest: &str) -> Ordering {
    let parse_version = |v: &str| -> Vec<u32> {
        v.trim()
            .trim_start_matches('v')
            .split('.')
            .map(|s| s.trim().parse::<u32>().unwrap_or(0))
            .collect()
    };

    let mut current_parts = parse_version(current);
    let mut latest_parts = parse_version(latest);
    let len = current_parts.len().max(latest_parts.len());
    current_parts.resize(len, 0);
    latest_parts.resize(len, 0);

    current_parts.cmp(&latest_parts)
}

/// 从远程存储检查是否有新版本
pub struct UpdateChecker {
    store: Arc<dyn RemoteStore>,
    current_version: String,
}

impl UpdateChecker {
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self::with_version(store, APP_VERSION)
    }

    pub fn with_version(store: Arc<dyn RemoteStore>, current_version: impl Into<String>) -> Self {
        Self {
            store,
            current_version: current_version.into(),
        }
    }

    pub fn current_version(&self) -> &str {
        &self.current_version
    }

    /// 有更新时返回新版本信息
    pub async fn check(&self) -> Result<Option<VersionInfo>> {
        let Some(latest) = self.store.latest_version_info().await? else {
            debug!("远程没有发布版本信息");
            return Ok(None);
        };

        if compare_versions(&self.current_version, &latest.version) == Ordering::Less {
            info!(
                "发现新版本: {} -> {}",
                self.current_version, latest.version
            );
            Ok(Some(latest))
        } else {
            debug!("当前已是最新版本: {}", self.current_version);
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::HistoryStore;

    #[test]
    fn test_compare_versions() {
        assert_eq!(compare_versions("1.0.0", "1.0.1"), Ordering::Less);
        assert_eq!(compare_versions("v1.2.0", "1.2"), Ordering::Equal);
        assert_eq!(compare_versions("1.10.0", "1.9.9"), Ordering::Greater);
        assert_eq!(compare_versions("v2", "v1.99"), Ordering::Greater);
    }

    #[tokio::test]
    async fn test_check_reports_newer_version() {
        let store = HistoryStore::open_in_memory().await.unwrap();
        let checker = UpdateChecker::with_version(Arc::new(store.clone()), "1.0.0");
        assert!(checker.check().await.unwrap().is_none());

        store
            .publish_version(VersionInfo {
                version: "1.1.0".to_string(),
                released_at: None,
                download_url: "https://example.com/topbackup-1.1.0".to_string(),
                sha256: None,
                changelog: Some("修复上传重试".to_string()),
                mandatory: false,
            })
            .await
            .unwrap();

        let update = checker.check().await.unwrap().unwrap();
        assert_eq!(update.version, "1.1.0");

        let up_to_date = UpdateChecker::with_version(Arc::new(store), "v1.1.0");
        assert!(up_to_date.check().await.unwrap().is_none());
    }
}
