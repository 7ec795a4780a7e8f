use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::{TaskbusError, TaskbusResult};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    /// Calls pass through
    Closed,
    /// Calls are rejected without invoking the operation
    Open,
    /// Trial calls pass through until the breaker closes or re-opens
    HalfOpen,
}

/// Circuit breaker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures in Closed before opening
    pub failure_threshold: u32,
    /// Consecutive successes in HalfOpen before closing
    pub success_threshold: u32,
    /// Time spent Open before the next state read moves to HalfOpen
    pub timeout: Duration,
    /// Optional per-call timeout, a timed out call counts as a failure
    pub call_timeout: Option<Duration>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout: Duration::from_secs(60),
            call_timeout: None,
        }
    }
}

/// Point-in-time snapshot for observability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerStats {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub total_calls: u64,
    pub rejected_calls: u64,
    pub failed_calls: u64,
    /// Milliseconds since the last counted failure
    pub last_failure_elapsed_ms: Option<u64>,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_time: Option<Instant>,
    total_calls: u64,
    rejected_calls: u64,
    failed_calls: u64,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure_time: None,
            total_calls: 0,
            rejected_calls: 0,
            failed_calls: 0,
        }
    }
}

type FailurePredicate = Arc<dyn Fn(&TaskbusError) -> bool + Send + Sync>;

/// Circuit breaker - Provides fault tolerance and service protection
///
/// All state mutation happens under an internal lock, the wrapped operation
/// itself runs without holding it.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    is_failure: FailurePredicate,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            is_failure: Arc::new(|_| true),
            inner: Mutex::new(BreakerState::new()),
        }
    }

    /// Errors rejected by the predicate still propagate but do not count against the circuit
    pub fn with_failure_predicate<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&TaskbusError) -> bool + Send + Sync + 'static,
    {
        self.is_failure = Arc::new(predicate);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state; an Open breaker whose timeout elapsed moves to HalfOpen here
    pub async fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock().await;
        self.refresh(&mut inner);
        inner.state
    }

    fn refresh(&self, inner: &mut BreakerState) {
        if inner.state != CircuitState::Open {
            return;
        }
        let elapsed_enough = inner
            .last_failure_time
            .map(|at| at.elapsed() >= self.config.timeout)
            .unwrap_or(true);
        if elapsed_enough {
            info!("熔断器 {} 进入半开状态", self.name);
            inner.state = CircuitState::HalfOpen;
            inner.success_count = 0;
        }
    }

    /// Execute operation with circuit breaker protection
    pub async fn execute<F, Fut, T>(&self, operation: F) -> TaskbusResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = TaskbusResult<T>>,
    {
        {
            let mut inner = self.inner.lock().await;
            self.refresh(&mut inner);
            inner.total_calls += 1;
            if inner.state == CircuitState::Open {
                inner.rejected_calls += 1;
                return Err(TaskbusError::CircuitOpen {
                    name: self.name.clone(),
                });
            }
        }

        let result = match self.config.call_timeout {
            Some(limit) => match tokio::time::timeout(limit, operation()).await {
                Ok(result) => result,
                Err(_) => Err(TaskbusError::Timeout(format!(
                    "熔断器 {} 保护的调用超过 {}ms",
                    self.name,
                    limit.as_millis()
                ))),
            },
            None => operation().await,
        };

        match &result {
            Ok(_) => self.record_success().await,
            Err(e) if (self.is_failure)(e) => self.record_failure().await,
            Err(_) => {}
        }
        result
    }

    async fn record_success(&self) {
        let mut inner = self.inner.lock().await;
        match inner.state {
            CircuitState::Closed => inner.failure_count = 0,
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    info!("熔断器 {} 恢复为关闭状态", self.name);
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                    inner.success_count = 0;
                }
            }
            CircuitState::Open => {}
        }
    }

    async fn record_failure(&self) {
        let mut inner = self.inner.lock().await;
        inner.failed_calls += 1;
        inner.last_failure_time = Some(Instant::now());
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    warn!(
                        "熔断器 {} 连续失败 {} 次，进入打开状态",
                        self.name, inner.failure_count
                    );
                    inner.state = CircuitState::Open;
                }
            }
            CircuitState::HalfOpen => {
                warn!("熔断器 {} 半开试探失败，重新打开", self.name);
                inner.state = CircuitState::Open;
                inner.success_count = 0;
            }
            CircuitState::Open => {}
        }
    }

    /// Get circuit breaker statistics
    pub async fn get_stats(&self) -> CircuitBreakerStats {
        let mut inner = self.inner.lock().await;
        self.refresh(&mut inner);
        CircuitBreakerStats {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            total_calls: inner.total_calls,
            rejected_calls: inner.rejected_calls,
            failed_calls: inner.failed_calls,
            last_failure_elapsed_ms: inner
                .last_failure_time
                .map(|at| at.elapsed().as_millis() as u64),
        }
    }

    /// Force the breaker closed and clear all counters
    pub async fn reset(&self) {
        let mut inner = self.inner.lock().await;
        *inner = BreakerState::new();
        info!("熔断器 {} 已重置", self.name);
    }
}

/// Named breakers shared by the components of one process
#[derive(Default)]
pub struct CircuitBreakerRegistry {
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Existing breakers keep their original configuration
    pub async fn get_or_create(
        &self,
        name: &str,
        config: CircuitBreakerConfig,
    ) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().await;
        breakers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(name, config)))
            .clone()
    }

    pub async fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.lock().await.get(name).cloned()
    }

    pub async fn all_stats(&self) -> Vec<CircuitBreakerStats> {
        let breakers: Vec<Arc<CircuitBreaker>> =
            self.breakers.lock().await.values().cloned().collect();
        let mut stats = Vec::with_capacity(breakers.len());
        for breaker in breakers {
            stats.push(breaker.get_stats().await);
        }
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    pub async fn reset_all(&self) {
        let breakers: Vec<Arc<CircuitBreaker>> =
            self.breakers.lock().await.values().cloned().collect();
        for breaker in breakers {
            breaker.reset().await;
        }
    }
}
