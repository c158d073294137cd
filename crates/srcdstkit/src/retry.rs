//! Bounded local retry for transient errors.

use crate::error::Result;
use crate::types::RetryConfig;
use log::warn;
use std::thread;

/// Run `operation` until it succeeds, fails permanently, or `config` runs out
/// of attempts.
///
/// Only errors with [`crate::Error::is_retryable`] are retried; the last
/// error is returned as-is. `what` names the operation in the retry log.
pub fn with_retry<T>(
    config: &RetryConfig,
    what: &str,
    mut operation: impl FnMut() -> Result<T>,
) -> Result<T> {
    let attempts = config.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        match operation() {
            Err(e) if e.is_retryable() && attempt + 1 < attempts => {
                let delay = config.delay_for_attempt(attempt);
                attempt += 1;
                warn!("{what} failed (attempt {attempt}/{attempts}): {e}; retrying in {delay:?}");
                thread::sleep(delay);
            }
            result => return result,
        }
    }
}
