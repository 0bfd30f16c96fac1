//! 带重试和熔断保护的协作者包装
//!
//! 核心组件只通过这些包装访问外部依赖。

use crate::collaborators::{LocalDatabase, RemoteStore, RemoteUploader};
use crate::error::{BackupError, Result};
use crate::models::{BackupRun, Company, Schedule, VersionInfo};
use crate::resilience::{CircuitBreaker, RetryPolicy, retry};
use async_trait::async_trait;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

/// 重试 + 熔断
#[derive(Debug)]
struct Guard {
    policy: RetryPolicy,
    breaker: CircuitBreaker,
}

impl Guard {
    fn new(name: &str, policy: RetryPolicy) -> Self {
        Self {
            policy,
            breaker: CircuitBreaker::with_defaults(name),
        }
    }

    async fn run<T, F, Fut>(&self, operation: &str, op: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let name = self.breaker.name();
        retry(
            &self.policy,
            || self.breaker.call(&op),
            |attempt, e: &BackupError| {
                warn!("{name}.{operation} 第 {attempt} 次调用失败，准备重试: {e}");
            },
        )
        .await
    }
}

/// 受保护的本地数据库
pub struct GuardedLocalDatabase {
    inner: Arc<dyn LocalDatabase>,
    guard: Guard,
}

impl GuardedLocalDatabase {
    pub fn new(inner: Arc<dyn LocalDatabase>) -> Self {
        Self::with_policy(inner, RetryPolicy::local_database())
    }

    pub fn with_policy(inner: Arc<dyn LocalDatabase>, policy: RetryPolicy) -> Self {
        Self {
            inner,
            guard: Guard::new("local_db", policy),
        }
    }
}

#[async_trait]
impl LocalDatabase for GuardedLocalDatabase {
    async fn test_connection(&self) -> Result<()> {
        self.guard
            .run("test_connection", || self.inner.test_connection())
            .await
    }

    async fn company(&self) -> Result<Option<Company>> {
        self.guard.run("company", || self.inner.company()).await
    }

    async fn schedule(&self) -> Result<Option<Schedule>> {
        self.guard.run("schedule", || self.inner.schedule()).await
    }

    async fn all_schedules(&self) -> Result<Vec<Schedule>> {
        self.guard
            .run("all_schedules", || self.inner.all_schedules())
            .await
    }

    async fn system_version(&self) -> Result<Option<String>> {
        self.guard
            .run("system_version", || self.inner.system_version())
            .await
    }
}

/// 受保护的远程存储
pub struct GuardedRemoteStore {
    inner: Arc<dyn RemoteStore>,
    guard: Guard,
}

impl GuardedRemoteStore {
    pub fn new(inner: Arc<dyn RemoteStore>) -> Self {
        Self::with_policy(inner, RetryPolicy::remote_store())
    }

    pub fn with_policy(inner: Arc<dyn RemoteStore>, policy: RetryPolicy) -> Self {
        Self {
            inner,
            guard: Guard::new("remote_store", policy),
        }
    }
}

#[async_trait]
impl RemoteStore for GuardedRemoteStore {
    async fn test_connection(&self) -> Result<()> {
        self.guard
            .run("test_connection", || self.inner.test_connection())
            .await
    }

    async fn company_by_tax_id(&self, tax_id: &str) -> Result<Option<Company>> {
        self.guard
            .run("company_by_tax_id", || self.inner.company_by_tax_id(tax_id))
            .await
    }

    async fn insert_company(&self, company: &Company) -> Result<i64> {
        self.guard
            .run("insert_company", || self.inner.insert_company(company))
            .await
    }

    async fn update_company(&self, id: i64, company: &Company) -> Result<()> {
        self.guard
            .run("update_company", || self.inner.update_company(id, company))
            .await
    }

    async fn insert_backup_run(&self, run: &BackupRun) -> Result<i64> {
        self.guard
            .run("insert_backup_run", || self.inner.insert_backup_run(run))
            .await
    }

    async fn update_backup_run(&self, run: &BackupRun) -> Result<()> {
        self.guard
            .run("update_backup_run", || self.inner.update_backup_run(run))
            .await
    }

    async fn runs_by_company(&self, company_id: i64, limit: usize) -> Result<Vec<BackupRun>> {
        self.guard
            .run("runs_by_company", || {
                self.inner.runs_by_company(company_id, limit)
            })
            .await
    }

    async fn latest_version_info(&self) -> Result<Option<VersionInfo>> {
        self.guard
            .run("latest_version_info", || self.inner.latest_version_info())
            .await
    }

    async fn touch_interaction(&self, company_id: i64) -> Result<()> {
        self.guard
            .run("touch_interaction", || {
                self.inner.touch_interaction(company_id)
            })
            .await
    }

    async fn ensure_schema(&self) -> Result<()> {
        self.guard
            .run("ensure_schema", || self.inner.ensure_schema())
            .await
    }
}

/// 受保护的上传器
pub struct GuardedUploader {
    inner: Arc<dyn RemoteUploader>,
    guard: Guard,
}

impl GuardedUploader {
    pub fn new(inner: Arc<dyn RemoteUploader>) -> Self {
        Self {
            inner,
            guard: Guard::new("uploader", RetryPolicy::remote_store()),
        }
    }
}

#[async_trait]
impl RemoteUploader for GuardedUploader {
    async fn upload(&self, path: &Path) -> Result<()> {
        self.guard.run("upload", || self.inner.upload(path)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct FlakyLocal {
        calls: AtomicU32,
        failures: u32,
    }

    #[async_trait]
    impl LocalDatabase for FlakyLocal {
        async fn test_connection(&self) -> Result<()> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.failures {
                Err(BackupError::connectivity("数据库服务未响应"))
            } else {
                Ok(())
            }
        }

        async fn company(&self) -> Result<Option<Company>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(BackupError::configuration("数据库文件损坏"))
        }

        async fn schedule(&self) -> Result<Option<Schedule>> {
            Ok(None)
        }

        async fn all_schedules(&self) -> Result<Vec<Schedule>> {
            Ok(Vec::new())
        }

        async fn system_version(&self) -> Result<Option<String>> {
            Ok(None)
        }
    }

    fn guarded(failures: u32) -> (Arc<FlakyLocal>, GuardedLocalDatabase) {
        let inner = Arc::new(FlakyLocal {
            calls: AtomicU32::new(0),
            failures,
        });
        let policy = RetryPolicy::local_database().with_initial_delay(Duration::from_millis(1));
        let guarded = GuardedLocalDatabase::with_policy(inner.clone(), policy);
        (inner, guarded)
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let (inner, db) = guarded(2);
        assert!(db.test_connection().await.is_ok());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_configuration_errors_are_not_retried() {
        let (inner, db) = guarded(0);
        let err = db.company().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_breaker_opens_after_repeated_failures() {
        let (inner, db) = guarded(u32::MAX);

        // 每次 test_connection 内部重试 3 次，两轮后连续失败数达到阈值 5
        let _ = db.test_connection().await;
        let _ = db.test_connection().await;
        let calls_before = inner.calls.load(Ordering::SeqCst);
        assert_eq!(calls_before, 5);

        let err = db.test_connection().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CircuitOpen);
        assert_eq!(inner.calls.load(Ordering::SeqCst), calls_before);
    }
}
