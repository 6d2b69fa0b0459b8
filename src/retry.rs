//! Generic retry-until-accepted control structure.
//!
//! Every component that needs bounded resilience (acquisition under pool
//! exhaustion, deadlocked statements, the close-protocol drain waits) funnels
//! through [`retry_until`] with a [`RetryPolicy`]. Policies are stateless: the
//! attempt counter is local to each invocation, so one policy value can be
//! shared across concurrent calls.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

/// Base delay for the default backoff, in milliseconds.
pub const BACKOFF_BASE_MS: u64 = 100;

/// Cap for the default backoff delay, in milliseconds.
pub const BACKOFF_CAP_MS: u64 = 2000;

/// Fraction of the exponential delay used as random jitter.
const BACKOFF_JITTER_FACTOR: f64 = 0.5;

type BackoffFn = Box<dyn Fn(u32) -> Duration + Send + Sync>;
type RetryFn<E> = Box<dyn Fn(Option<&E>, u32) -> bool + Send + Sync>;
type AcceptFn<T> = Box<dyn Fn(&T, u32) -> bool + Send + Sync>;

/// Retry decision surface: pluggable backoff, retry predicate, and acceptance
/// predicate.
///
/// The defaults accept any non-error result and retry every error, with
/// [`exponential_backoff_with_jitter`] between attempts.
pub struct RetryPolicy<T, E> {
    backoff: BackoffFn,
    retry: RetryFn<E>,
    accept: AcceptFn<T>,
}

impl<T, E> RetryPolicy<T, E> {
    /// Policy with default backoff, unconditional retry, and unconditional
    /// acceptance.
    pub fn new() -> Self {
        Self {
            backoff: Box::new(exponential_backoff_with_jitter),
            retry: Box::new(|_, _| true),
            accept: Box::new(|_, _| true),
        }
    }

    /// Integer shorthand: retry while the attempt index is below `max`,
    /// regardless of the error.
    pub fn times(max: u32) -> Self {
        Self::new().with_retry(move |_, attempt| attempt < max)
    }

    /// Replace the retry predicate. It receives the error of the rejected
    /// attempt (`None` when the result was merely not accepted) and the
    /// current attempt index.
    pub fn with_retry(
        mut self,
        retry: impl Fn(Option<&E>, u32) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.retry = Box::new(retry);
        self
    }

    /// Replace the acceptance predicate applied to non-error results.
    pub fn with_accept(mut self, accept: impl Fn(&T, u32) -> bool + Send + Sync + 'static) -> Self {
        self.accept = Box::new(accept);
        self
    }

    /// Replace the backoff schedule. Called with the attempt index about to
    /// run (starting at 1 for the first retry).
    pub fn with_backoff(
        mut self,
        backoff: impl Fn(u32) -> Duration + Send + Sync + 'static,
    ) -> Self {
        self.backoff = Box::new(backoff);
        self
    }
}

impl<T, E> Default for RetryPolicy<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Default backoff: exponential with random jitter.
///
/// The exponential delay is `min(base * 2^attempt, cap)`, perturbed by up to
/// ±50%, floored at zero.
pub fn exponential_backoff_with_jitter(attempt: u32) -> Duration {
    let exponential =
        (BACKOFF_BASE_MS as f64 * 2f64.powi(attempt.min(16) as i32)).min(BACKOFF_CAP_MS as f64);

    let mut rng = rand::thread_rng();
    let jitter = rng.gen_range(0.0..1.0) * exponential * BACKOFF_JITTER_FACTOR;
    let wait = if rng.gen_bool(0.5) {
        exponential - jitter
    } else {
        exponential + jitter
    };

    Duration::from_millis(wait.max(0.0) as u64)
}

/// Run `operation` until the policy accepts its result or declines to retry.
///
/// The attempt index starts at 0 and increments only after a rejected
/// attempt. On a rejected result without an error the last unaccepted result
/// is returned once the policy declines; errors are surfaced unchanged.
pub async fn retry_until<T, E, F, Fut>(mut operation: F, policy: &RetryPolicy<T, E>) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt: u32 = 0;
    loop {
        match operation().await {
            Ok(result) => {
                if (policy.accept)(&result, attempt) {
                    return Ok(result);
                }
                if !(policy.retry)(None, attempt) {
                    return Ok(result);
                }
            }
            Err(error) => {
                if !(policy.retry)(Some(&error), attempt) {
                    return Err(error);
                }
            }
        }
        attempt += 1;
        tokio::time::sleep((policy.backoff)(attempt)).await;
    }
}
