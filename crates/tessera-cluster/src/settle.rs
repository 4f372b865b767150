//! Bounded poll with exponential backoff around cluster verification.

use std::thread;
use std::time::Instant;

use tracing::debug;

use crate::{Result, SettleConfig};

/// Waits for the configured delay, then runs `attempt` until it succeeds,
/// fails with a non-retryable error, or the timeout passes.
///
/// The last error is returned once the deadline is reached.
pub(crate) fn settle<T>(policy: &SettleConfig, mut attempt: impl FnMut() -> Result<T>) -> Result<T> {
    if !policy.delay().is_zero() {
        thread::sleep(policy.delay());
    }

    let deadline = Instant::now() + policy.timeout();
    let mut backoff = policy.initial_backoff();
    let mut attempts = 1u32;
    loop {
        match attempt() {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && Instant::now() < deadline => {
                debug!(attempts, backoff_ms = backoff.as_millis(), error = %err, "cluster not settled yet");
                thread::sleep(backoff.min(deadline.saturating_duration_since(Instant::now())));
                backoff = (backoff * 2).min(policy.max_backoff());
                attempts += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;
    use crate::Error;

    fn policy(timeout_ms: u64) -> SettleConfig {
        SettleConfig {
            delay_ms: 0,
            timeout_ms,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
        }
    }

    #[test]
    fn test_retries_until_consistent() {
        let mut calls = 0;
        let result = settle(&policy(5_000), || {
            calls += 1;
            if calls < 3 {
                Err(Error::inconsistent(Value::Null, Value::Bool(true)))
            } else {
                Ok(calls)
            }
        });
        assert_eq!(result.unwrap(), 3);
    }

    #[test]
    fn test_fatal_errors_are_not_retried() {
        let mut calls = 0;
        let result: Result<()> = settle(&policy(5_000), || {
            calls += 1;
            Err(Error::NoReachableMachine)
        });
        assert!(matches!(result, Err(Error::NoReachableMachine)));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_zero_timeout_tries_once() {
        let mut calls = 0;
        let result: Result<()> = settle(&SettleConfig::immediate(), || {
            calls += 1;
            Err(Error::inconsistent(Value::Null, Value::Null))
        });
        assert!(matches!(result, Err(Error::InconsistentCluster { .. })));
        assert_eq!(calls, 1);
    }
}
