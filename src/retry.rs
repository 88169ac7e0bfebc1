//! Retry pacing and status-gated retry for aggregator RPCs.
//!
//! Transient transport failures (endpoint unavailable while the aggregator
//! restarts, for example) are absorbed here: the call is paced by a pluggable
//! [`Backoff`] policy and reissued. Any status outside the configured
//! retryable set propagates immediately. The same loop serves unary and
//! client-streaming calls, because the caller hands us a closure that
//! rebuilds the request (including any frame stream) on every attempt.
//!
//! # Example
//!
//! ```ignore
//! use fedlink::retry::{retry_rpc, ConstantBackoff, RetryPolicy};
//!
//! let policy = RetryPolicy::default();
//! let backoff = ConstantBackoff::new(Duration::from_secs(1), uri);
//! let response = retry_rpc(&policy, &backoff, "get_tasks", || {
//!     let mut stub = stub.clone();
//!     let request = request.clone();
//!     async move { Ok(stub.get_tasks(request).await?.into_inner()) }
//! })
//! .await?;
//! ```

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tonic::{Code, Status};
use tracing::{error, info, warn};

/// Pacing strategy invoked between retry attempts.
///
/// Implementations emit their own observability events before sleeping, so
/// the retry loop stays policy-agnostic. Tests inject a no-op implementation
/// to count waits without real sleeps.
#[async_trait]
pub trait Backoff: Send + Sync {
    /// Block the calling task for one pacing interval.
    async fn wait(&self);
}

/// Constant-interval backoff, the default pacing policy.
pub struct ConstantBackoff {
    interval: Duration,
    uri: String,
}

impl ConstantBackoff {
    /// Create a constant backoff that logs the target endpoint before each sleep
    pub fn new(interval: Duration, uri: impl Into<String>) -> Self {
        Self {
            interval,
            uri: uri.into(),
        }
    }
}

#[async_trait]
impl Backoff for ConstantBackoff {
    async fn wait(&self) {
        info!(endpoint = %self.uri, "Attempting to connect to aggregator");
        tokio::time::sleep(self.interval).await;
    }
}

/// Exponential backoff with jitter.
///
/// Grows the delay by `multiplier` per wait, capped at `max_delay`, and
/// jitters each sleep by 0.5x-1.5x to avoid thundering herd when many
/// collaborators reconnect at once.
pub struct ExponentialBackoff {
    max_delay: Duration,
    multiplier: f64,
    uri: String,
    delay: Mutex<Duration>,
}

impl ExponentialBackoff {
    /// Create an exponential backoff starting at `initial_delay`
    pub fn new(
        initial_delay: Duration,
        max_delay: Duration,
        multiplier: f64,
        uri: impl Into<String>,
    ) -> Self {
        Self {
            max_delay,
            multiplier,
            uri: uri.into(),
            delay: Mutex::new(initial_delay),
        }
    }
}

#[async_trait]
impl Backoff for ExponentialBackoff {
    async fn wait(&self) {
        // Take the current delay and advance it; the guard must not be held
        // across the sleep.
        let current = {
            let mut delay = self.delay.lock().expect("backoff delay lock poisoned");
            let current = *delay;
            *delay = Duration::from_secs_f64(
                (current.as_secs_f64() * self.multiplier).min(self.max_delay.as_secs_f64()),
            );
            current
        };

        let jitter = rand::thread_rng().gen_range(0.5..1.5);
        let jittered = Duration::from_secs_f64(current.as_secs_f64() * jitter);

        info!(
            endpoint = %self.uri,
            delay_ms = jittered.as_millis(),
            "Attempting to connect to aggregator"
        );
        tokio::time::sleep(jittered).await;
    }
}

/// Which transport failures are transient, and how long to keep trying.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Status codes considered transient. An empty set retries every code.
    pub retryable: Vec<Code>,
    /// Maximum number of attempts (0 = unbounded)
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retryable: vec![Code::Unavailable],
            max_attempts: 0, // unbounded
        }
    }
}

impl RetryPolicy {
    /// Create a policy with a maximum number of attempts
    pub fn with_max_attempts(attempts: u32) -> Self {
        Self {
            max_attempts: attempts,
            ..Default::default()
        }
    }

    /// Whether a failure with this status code should be retried
    pub fn is_retryable(&self, code: Code) -> bool {
        self.retryable.is_empty() || self.retryable.contains(&code)
    }
}

/// Execute an RPC with status-gated retry and backoff pacing.
///
/// On each attempt, a failure whose code is retryable under `policy` waits on
/// `backoff` and reissues the call; any other failure is returned untouched,
/// with zero waits. Works uniformly for unary and client-streaming calls
/// since `call` rebuilds the request per attempt.
///
/// # Arguments
/// * `policy` - Retryable status set and optional attempt cap
/// * `backoff` - Pacing strategy invoked between attempts
/// * `operation` - Name for logging purposes
/// * `call` - The RPC invocation to (re)issue
///
/// # Returns
/// The successful response, or the first non-retryable status, or the last
/// status if the attempt cap is exhausted.
pub async fn retry_rpc<T, F, Fut>(
    policy: &RetryPolicy,
    backoff: &dyn Backoff,
    operation: &str,
    mut call: F,
) -> Result<T, Status>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Status>>,
{
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        match call().await {
            Ok(response) => return Ok(response),
            Err(status) => {
                if !policy.is_retryable(status.code()) {
                    return Err(status);
                }

                if policy.max_attempts > 0 && attempt >= policy.max_attempts {
                    error!(
                        operation = %operation,
                        attempt = attempt,
                        code = ?status.code(),
                        "RPC failed after max retries"
                    );
                    return Err(status);
                }

                warn!(
                    operation = %operation,
                    attempt = attempt,
                    code = ?status.code(),
                    error = %status.message(),
                    "Transient RPC failure, retrying"
                );
                backoff.wait().await;
            }
        }
    }
}
