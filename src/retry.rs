use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{info, warn};

/// Coarse classification of a failed remote call, derived from its message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    ServerOverload,
    RateLimited,
    Other,
}

impl ErrorClass {
    pub fn of(message: &str) -> Self {
        let lower = message.to_ascii_lowercase();
        if lower.contains("503")
            || lower.contains("internal server error")
            || lower.contains("internalservererror")
        {
            ErrorClass::ServerOverload
        } else if lower.contains("429") || lower.contains("rate") {
            ErrorClass::RateLimited
        } else {
            ErrorClass::Other
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Option<Duration>,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(2),
            max_delay: Some(Duration::from_secs(60)),
            jitter: false,
        }
    }
}

impl RetryPolicy {
    /// Delay before retrying after the failed `attempt` (0-based).
    pub fn delay_for(&self, class: ErrorClass, attempt: u32) -> Duration {
        let factor: u64 = match class {
            ErrorClass::ServerOverload => 2_u64.saturating_pow(attempt),
            ErrorClass::RateLimited => 3_u64.saturating_pow(attempt),
            ErrorClass::Other => 1,
        };
        let base_ms = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX);
        let mut delay = Duration::from_millis(base_ms.saturating_mul(factor));
        if let Some(cap) = self.max_delay {
            delay = delay.min(cap);
        }
        if self.jitter && !delay.is_zero() {
            let extra = rand::thread_rng().gen_range(0.0..0.25);
            delay = delay.mul_f64(1.0 + extra);
        }
        delay
    }

    fn attempts(&self) -> u32 {
        self.max_retries.max(1)
    }
}

/// Runs `op` until it succeeds or the policy's attempts are spent.
///
/// The error of the final attempt is returned unchanged; there is no
/// "exhausted" sentinel.
pub async fn safe_api_call<T, E, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let attempts = policy.attempts();
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                let message = e.to_string();
                warn!(attempt = attempt + 1, max_retries = attempts, error = %message, "api call failed");
                if attempt + 1 >= attempts {
                    warn!(max_retries = attempts, "max retries reached");
                    return Err(e);
                }
                let class = ErrorClass::of(&message);
                let delay = policy.delay_for(class, attempt);
                info!(class = ?class, delay_secs = delay.as_secs_f64(), "waiting before retry");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    fn uncapped(base: u64) -> RetryPolicy {
        RetryPolicy { max_retries: 5, base_delay: secs(base), max_delay: None, jitter: false }
    }

    #[test]
    fn classifies_by_message() {
        assert_eq!(ErrorClass::of("503 Server Error"), ErrorClass::ServerOverload);
        assert_eq!(ErrorClass::of("InternalServerError: boom"), ErrorClass::ServerOverload);
        assert_eq!(ErrorClass::of("HTTP 429 Too Many Requests"), ErrorClass::RateLimited);
        assert_eq!(ErrorClass::of("Rate limit exceeded"), ErrorClass::RateLimited);
        assert_eq!(ErrorClass::of("connection reset"), ErrorClass::Other);
    }

    #[test]
    fn delay_grows_per_class() {
        let p = uncapped(2);
        for n in 0..6 {
            assert_eq!(p.delay_for(ErrorClass::ServerOverload, n), secs(2 * 2_u64.pow(n)));
            assert_eq!(p.delay_for(ErrorClass::RateLimited, n), secs(2 * 3_u64.pow(n)));
            assert_eq!(p.delay_for(ErrorClass::Other, n), secs(2));
        }
    }

    #[test]
    fn delay_is_capped() {
        let p = RetryPolicy { max_delay: Some(secs(10)), ..uncapped(2) };
        assert_eq!(p.delay_for(ErrorClass::RateLimited, 4), secs(10));
        assert_eq!(p.delay_for(ErrorClass::ServerOverload, 1), secs(4));
    }

    #[test]
    fn uncapped_delay_keeps_doubling_until_saturation() {
        let p = uncapped(2);
        assert_eq!(p.delay_for(ErrorClass::ServerOverload, 21), secs(4_194_304));
        assert_eq!(p.delay_for(ErrorClass::RateLimited, 25), Duration::from_millis(2000 * 3_u64.pow(25)));
        assert_eq!(p.delay_for(ErrorClass::ServerOverload, 200), Duration::from_millis(u64::MAX));
    }

    #[test]
    fn jitter_stays_within_a_quarter() {
        let p = RetryPolicy { jitter: true, ..uncapped(4) };
        for _ in 0..50 {
            let d = p.delay_for(ErrorClass::Other, 0);
            assert!(d >= secs(4) && d < secs(5), "{d:?}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn overload_backoff_then_fatal_error() {
        let p = uncapped(2);
        let stamps = Arc::new(Mutex::new(Vec::new()));
        let recorded = stamps.clone();
        let res: Result<(), String> = safe_api_call(&p, || {
            let recorded = recorded.clone();
            async move {
                recorded.lock().unwrap().push(Instant::now());
                Err("503 Server Error".to_string())
            }
        })
        .await;

        assert_eq!(res, Err("503 Server Error".to_string()));
        let stamps = stamps.lock().unwrap();
        assert_eq!(stamps.len(), 5);
        let waits: Vec<Duration> = stamps.windows(2).map(|w| w[1] - w[0]).collect();
        assert_eq!(waits, vec![secs(2), secs(4), secs(8), secs(16)]);
    }

    #[tokio::test(start_paused = true)]
    async fn returns_first_success_without_more_attempts() {
        let p = uncapped(1);
        let mut calls = 0;
        let res: Result<u32, String> = safe_api_call(&p, || {
            calls += 1;
            let n = calls;
            async move {
                if n < 3 {
                    Err("429 slow down".to_string())
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(res, Ok(3));
        assert_eq!(calls, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_retries_still_attempts_once() {
        let p = RetryPolicy { max_retries: 0, ..uncapped(1) };
        let mut calls = 0;
        let res: Result<(), &str> = safe_api_call(&p, || {
            calls += 1;
            async { Err("nope") }
        })
        .await;
        assert!(res.is_err());
        assert_eq!(calls, 1);
    }
}
