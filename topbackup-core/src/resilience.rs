use crate::constants::resilience as defaults;
use crate::error::{BackupError, ErrorKind, Result};
use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// 重试策略
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 最大尝试次数（包含第一次）
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    /// 可重试的错误类型，其余错误立即返回
    pub retry_on: Vec<ErrorKind>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: defaults::DEFAULT_MAX_ATTEMPTS,
            initial_delay: Duration::from_millis(defaults::LOCAL_DB_INITIAL_DELAY_MS),
            multiplier: defaults::BACKOFF_MULTIPLIER,
            max_delay: Duration::from_millis(defaults::MAX_DELAY_MS),
            retry_on: vec![ErrorKind::Connectivity],
        }
    }
}

impl RetryPolicy {
    /// 本地数据库调用：3 次，初始 1 秒
    pub fn local_database() -> Self {
        Self::default()
    }

    /// 远程存储调用：3 次，初始 2 秒
    pub fn remote_store() -> Self {
        Self {
            initial_delay: Duration::from_millis(defaults::REMOTE_DB_INITIAL_DELAY_MS),
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn is_retryable(&self, error: &BackupError) -> bool {
        self.retry_on.contains(&error.kind())
    }

    fn next_delay(&self, current: Duration) -> Duration {
        current.mul_f64(self.multiplier).min(self.max_delay)
    }
}

/// 按策略执行异步操作，可重试错误按指数退避重试
///
/// `on_retry` 在每次重试前收到 (第几次尝试, 错误)。重试耗尽后返回最后一次的错误。
pub async fn retry<T, F, Fut, R>(policy: &RetryPolicy, mut op: F, mut on_retry: R) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    R: FnMut(u32, &BackupError),
{
    let max_attempts = policy.max_attempts.max(1);
    let mut delay = policy.initial_delay;
    let mut attempt = 1;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < max_attempts && policy.is_retryable(&e) => {
                on_retry(attempt, &e);
                debug!(
                    "第 {}/{} 次尝试失败，{:?} 后重试: {}",
                    attempt, max_attempts, delay, e
                );
                tokio::time::sleep(delay).await;
                delay = policy.next_delay(delay);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// 熔断器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failures: u32,
    half_open_successes: u32,
    last_failure: Option<Instant>,
    /// 半开状态下是否已有试探调用在执行
    trial_in_flight: bool,
}

/// 熔断器
///
/// 连续失败达到阈值后打开，恢复时间过后的下一次调用进入半开状态；
/// 半开状态下同一时刻只放行一个试探调用，连续成功若干次才关闭，任何失败都会重新打开。
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    recovery_timeout: Duration,
    success_threshold: u32,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(
        name: impl Into<String>,
        failure_threshold: u32,
        recovery_timeout: Duration,
        success_threshold: u32,
    ) -> Self {
        Self {
            name: name.into(),
            failure_threshold: failure_threshold.max(1),
            recovery_timeout,
            success_threshold: success_threshold.max(1),
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failures: 0,
                half_open_successes: 0,
                last_failure: None,
                trial_in_flight: false,
            }),
        }
    }

    /// 默认参数：5 次失败，30 秒恢复，半开 3 次成功
    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self::new(
            name,
            defaults::FAILURE_THRESHOLD,
            Duration::from_secs(defaults::RECOVERY_TIMEOUT_SECS),
            defaults::HALF_OPEN_SUCCESSES,
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 检查是否允许调用；打开状态或半开试探进行中返回 CircuitOpen
    ///
    /// 半开状态下返回试探许可，许可释放前其他调用都被拒绝。
    fn try_acquire(&self) -> Result<Option<TrialPermit<'_>>> {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => return Ok(None),
            CircuitState::HalfOpen if inner.trial_in_flight => {
                return Err(BackupError::CircuitOpen {
                    retry_after: Duration::ZERO,
                });
            }
            CircuitState::HalfOpen => {}
            CircuitState::Open => {
                let elapsed = inner
                    .last_failure
                    .map(|at| at.elapsed())
                    .unwrap_or(self.recovery_timeout);

                if elapsed < self.recovery_timeout {
                    return Err(BackupError::CircuitOpen {
                        retry_after: self.recovery_timeout - elapsed,
                    });
                }
                info!("熔断器 {} 进入半开状态", self.name);
                inner.state = CircuitState::HalfOpen;
                inner.half_open_successes = 0;
            }
        }

        inner.trial_in_flight = true;
        Ok(Some(TrialPermit { breaker: self }))
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.success_threshold {
                    info!("熔断器 {} 已恢复", self.name);
                    inner.state = CircuitState::Closed;
                    inner.failures = 0;
                    inner.half_open_successes = 0;
                }
            }
            CircuitState::Closed => inner.failures = 0,
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.last_failure = Some(Instant::now());
        match inner.state {
            CircuitState::HalfOpen => {
                warn!("熔断器 {} 半开状态调用失败，重新打开", self.name);
                inner.state = CircuitState::Open;
                inner.half_open_successes = 0;
            }
            CircuitState::Closed => {
                inner.failures += 1;
                if inner.failures >= self.failure_threshold {
                    warn!(
                        "熔断器 {} 已打开：连续失败 {} 次",
                        self.name, inner.failures
                    );
                    inner.state = CircuitState::Open;
                }
            }
            CircuitState::Open => {}
        }
    }

    /// 通过熔断器执行一次调用
    pub async fn call<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let _permit = self.try_acquire()?;
        match op().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                self.record_failure();
                Err(e)
            }
        }
    }
}

/// 半开状态的试探许可，调用结束或被取消时释放
struct TrialPermit<'a> {
    breaker: &'a CircuitBreaker,
}

impl Drop for TrialPermit<'_> {
    fn drop(&mut self) {
        self.breaker.lock().trial_in_flight = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_attempts(max_attempts)
            .with_initial_delay(Duration::from_millis(1))
    }

    async fn flaky(calls: &AtomicU32, failures: u32) -> Result<&'static str> {
        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
        if n <= failures {
            Err(BackupError::connectivity(format!("第 {n} 次连接失败")))
        } else {
            Ok("ok")
        }
    }

    #[tokio::test]
    async fn test_retry_succeeds_on_last_attempt() {
        let calls = AtomicU32::new(0);
        let mut retries = Vec::new();

        let result = retry(&fast_policy(4), || flaky(&calls, 3), |attempt, _| {
            retries.push(attempt)
        })
        .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(retries, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_retry_exhausted_returns_last_error() {
        let calls = AtomicU32::new(0);

        let result = retry(&fast_policy(3), || flaky(&calls, 3), |_, _| {}).await;

        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connectivity);
        assert!(err.to_string().contains("第 3 次"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_error_propagates_immediately() {
        let calls = AtomicU32::new(0);

        let result: Result<()> = retry(
            &fast_policy(5),
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(BackupError::configuration("缺少目标目录"))
            },
            |_, _| {},
        )
        .await;

        assert_eq!(result.unwrap_err().kind(), ErrorKind::Configuration);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = RetryPolicy {
            max_delay: Duration::from_secs(3),
            ..RetryPolicy::remote_store()
        };
        let next = policy.next_delay(Duration::from_secs(2));
        assert_eq!(next, Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_breaker_opens_and_rejects_without_calling() {
        let breaker = CircuitBreaker::new("test", 3, Duration::from_secs(60), 1);
        let calls = AtomicU32::new(0);

        for _ in 0..3 {
            let _ = breaker.call(|| flaky(&calls, u32::MAX)).await;
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        let result = breaker.call(|| flaky(&calls, u32::MAX)).await;
        assert!(matches!(result, Err(BackupError::CircuitOpen { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_breaker_half_open_recovery() {
        let breaker = CircuitBreaker::new("test", 1, Duration::from_millis(20), 2);
        let calls = AtomicU32::new(0);

        let _ = breaker.call(|| flaky(&calls, 1)).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(breaker.call(|| flaky(&calls, 1)).await.is_ok());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(breaker.call(|| flaky(&calls, 1)).await.is_ok());
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_breaker_half_open_failure_reopens() {
        let breaker = CircuitBreaker::new("test", 1, Duration::from_millis(20), 3);
        let calls = AtomicU32::new(0);

        let _ = breaker.call(|| flaky(&calls, u32::MAX)).await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        // 恢复时间已过，委托会被调用一次
        let result = breaker.call(|| flaky(&calls, u32::MAX)).await;
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Connectivity);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(breaker.state(), CircuitState::Open);

        let result = breaker.call(|| flaky(&calls, u32::MAX)).await;
        assert!(matches!(result, Err(BackupError::CircuitOpen { .. })));
    }

    #[tokio::test]
    async fn test_half_open_allows_single_trial() {
        let breaker = CircuitBreaker::new("test", 1, Duration::from_millis(20), 1);
        let calls = AtomicU32::new(0);

        let _ = breaker.call(|| flaky(&calls, u32::MAX)).await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        let release = tokio::sync::Notify::new();
        let trial = breaker.call(|| async {
            release.notified().await;
            Ok::<_, BackupError>("recovered")
        });
        tokio::pin!(trial);
        assert!(futures::poll!(trial.as_mut()).is_pending());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        // 试探调用未结束前，其余调用被拒绝且不执行
        let rejected = breaker.call(|| flaky(&calls, 0)).await;
        assert!(matches!(rejected, Err(BackupError::CircuitOpen { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        release.notify_one();
        assert_eq!(trial.await.unwrap(), "recovered");
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.call(|| flaky(&calls, 0)).await.is_ok());
    }

    #[tokio::test]
    async fn test_cancelled_trial_releases_permit() {
        let breaker = CircuitBreaker::new("test", 1, Duration::from_millis(20), 1);
        let calls = AtomicU32::new(0);

        let _ = breaker.call(|| flaky(&calls, u32::MAX)).await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        let stalled = tokio::time::timeout(
            Duration::from_millis(20),
            breaker.call(|| std::future::pending::<Result<()>>()),
        )
        .await;
        assert!(stalled.is_err());

        assert!(breaker.call(|| flaky(&calls, 0)).await.is_ok());
        assert_eq!(breaker.state(), CircuitState::Closed);
    }
}
