//! A small exponential backoff helper shared by every retry loop in the
//! pipeline (§4.3 item 6, §4.6, §4.7, §5 "Backoff"): copy retries, the
//! remote vulnerability oracle's discovery wait, and attestation
//! list/create retries. Base 500 ms, factor 2, capped at 30 s, matching
//! the documented policy in every one of those sections.

use std::time::Duration;

/// The base delay before the first retry.
pub const BASE: Duration = Duration::from_millis(500);
/// The multiplier applied to the delay after every attempt.
pub const FACTOR: u32 = 2;
/// The maximum delay between attempts, regardless of attempt count.
pub const CAP: Duration = Duration::from_secs(30);

/// The delay before retry attempt `attempt` (1-indexed): `BASE * FACTOR^(attempt-1)`, capped at `CAP`.
pub fn delay_for_attempt(attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1);
    let scaled = FACTOR.saturating_pow(exponent).saturating_mul(BASE.as_millis() as u32);
    Duration::from_millis(scaled as u64).min(CAP)
}

/// Sleep for the backoff delay associated with `attempt`.
pub async fn sleep_for_attempt(attempt: u32) {
    tokio::time::sleep(delay_for_attempt(attempt)).await;
}

/// Retry `f` up to `max_attempts` times (the "small fixed budget" of
/// §4.3 item 6), sleeping with exponential backoff between attempts.
/// Returns the last error if every attempt fails.
pub async fn retry<T, E, F, Fut>(max_attempts: u32, mut f: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) if attempt >= max_attempts => return Err(e),
            Err(_) => sleep_for_attempt(attempt).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_doubles_and_caps() {
        assert_eq!(delay_for_attempt(1), Duration::from_millis(500));
        assert_eq!(delay_for_attempt(2), Duration::from_millis(1000));
        assert_eq!(delay_for_attempt(3), Duration::from_millis(2000));
        assert_eq!(delay_for_attempt(20), CAP);
    }

    #[tokio::test]
    async fn retry_stops_after_budget() {
        let mut calls = 0;
        let result: Result<(), &str> = retry(3, || {
            calls += 1;
            async { Err("nope") }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn retry_returns_first_success() {
        let mut calls = 0;
        let result: Result<i32, &str> = retry(5, || {
            calls += 1;
            let attempt = calls;
            async move {
                if attempt < 2 {
                    Err("nope")
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result, Ok(42));
        assert_eq!(calls, 2);
    }
}
