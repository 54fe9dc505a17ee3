//! Bounded retries with exponential backoff around remote operations.
//!
//! Every remote call a run makes goes through [`execute`]. Transient
//! network failures and terminal remote failures both consume the
//! attempt budget (terminal failures rarely clear up, but the retry
//! keeps parity with the service this replaces); they are logged
//! distinctly so operators can tell them apart. The last observed
//! error is always surfaced when the budget runs out.

use std::time::Duration;

use crate::config::RetryConfig;
use crate::error::PipelineError;

/// Backoff slept before attempt `attempt` (1-based). Attempt 1 has no
/// prior delay; attempt k >= 2 waits `initial * 2^(k-2)`.
pub fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    if attempt < 2 {
        return Duration::ZERO;
    }
    let exp = (attempt - 2).min(20);
    let millis = config
        .initial_delay_ms
        .saturating_mul(2u64.saturating_pow(exp));
    Duration::from_millis(millis)
}

/// Run `op` up to `config.max_attempts` times, sleeping the backoff
/// between attempts. `op` receives the 1-based attempt index.
pub async fn execute<T, Op, Fut>(
    name: &str,
    config: &RetryConfig,
    mut op: Op,
) -> Result<T, PipelineError>
where
    Op: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = Result<T, PipelineError>>,
{
    let max = config.max_attempts.max(1);
    let mut attempt = 1u32;
    loop {
        match op(attempt).await {
            Ok(value) => {
                log::info!("{}: attempt {}/{} succeeded", name, attempt, max);
                return Ok(value);
            }
            Err(err) if attempt >= max => {
                log::error!(
                    "{}: attempt {}/{} failed, budget exhausted: {}",
                    name,
                    attempt,
                    max,
                    err
                );
                return Err(err);
            }
            Err(err) => {
                if err.is_retryable() {
                    log::warn!(
                        "{}: attempt {}/{} failed (transient): {}",
                        name,
                        attempt,
                        max,
                        err
                    );
                } else {
                    log::error!("{}: attempt {}/{} failed: {}", name, attempt, max, err);
                }
                attempt += 1;
                let delay = backoff_delay(config, attempt);
                tokio::time::sleep(delay).await;
            }
        }
    }
}
