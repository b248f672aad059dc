//! Fixed-delay retry for transient upstream failures.
//!
//! The OCR service is usually a GPU container that takes a while to come
//! up, so the only failure worth waiting on is "connection refused".
//! Everything else (HTTP 500, malformed JSON) is returned to the caller on
//! the first attempt.
//!
//! With the defaults the wait sequence is 2 s → 2 s → 2 s: four attempts in
//! total, roughly six seconds of waiting before the caller gives up.

use std::error::Error as StdError;
use std::future::Future;
use std::io;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

/// Default number of retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default pause between attempts.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 2000;

/// How many times to retry, and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
        }
    }
}

/// Why [`RetryPolicy::run`] gave up.
#[derive(Debug)]
pub enum RetryError<E> {
    /// The operation failed with a non-transient error. Not retried.
    Permanent(E),
    /// Every attempt failed with a transient error.
    Exhausted { attempts: u32, last: E },
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    /// Total attempts including the first one.
    pub fn attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// `op` is called afresh for each attempt so request bodies (which are
    /// consumed on send) can be rebuilt every time.
    pub async fn run<T, E, F, Fut>(
        &self,
        is_transient: impl Fn(&E) -> bool,
        mut op: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt = 0u32;
        loop {
            match op(attempt).await {
                Ok(v) => return Ok(v),
                Err(e) if !is_transient(&e) => return Err(RetryError::Permanent(e)),
                Err(e) if attempt >= self.max_retries => {
                    return Err(RetryError::Exhausted {
                        attempts: attempt + 1,
                        last: e,
                    })
                }
                Err(e) => {
                    attempt += 1;
                    warn!(
                        "Transient failure, retry {}/{} in {:?}: {}",
                        attempt, self.max_retries, self.delay, e
                    );
                    sleep(self.delay).await;
                }
            }
        }
    }
}

/// Whether `err`, or anything in its source chain, is an
/// [`io::ErrorKind::ConnectionRefused`].
pub fn is_connection_refused(err: &(dyn StdError + 'static)) -> bool {
    let mut current: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(e) = current {
        if let Some(io_err) = e.downcast_ref::<io::Error>() {
            if io_err.kind() == io::ErrorKind::ConnectionRefused {
                return true;
            }
        }
        current = e.source();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct Wrapped(io::Error);

    impl std::fmt::Display for Wrapped {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "wrapped: {}", self.0)
        }
    }

    impl StdError for Wrapped {
        fn source(&self) -> Option<&(dyn StdError + 'static)> {
            Some(&self.0)
        }
    }

    fn fast(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(max_retries, Duration::ZERO)
    }

    #[test]
    fn default_is_four_attempts_two_seconds_apart() {
        let p = RetryPolicy::default();
        assert_eq!(p.attempts(), 4);
        assert_eq!(p.delay, Duration::from_secs(2));
    }

    #[test]
    fn finds_connection_refused_in_source_chain() {
        let refused = Wrapped(io::Error::from(io::ErrorKind::ConnectionRefused));
        assert!(is_connection_refused(&refused));

        let reset = Wrapped(io::Error::from(io::ErrorKind::ConnectionReset));
        assert!(!is_connection_refused(&reset));
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, RetryError<String>> = fast(3)
            .run(
                |_| true,
                |attempt| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if attempt < 2 {
                            Err("refused".to_string())
                        } else {
                            Ok(attempt)
                        }
                    }
                },
            )
            .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausts_after_max_retries() {
        let calls = AtomicU32::new(0);
        let result: Result<(), RetryError<String>> = fast(3)
            .run(
                |_| true,
                |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err("refused".to_string()) }
                },
            )
            .await;
        match result {
            Err(RetryError::Exhausted { attempts, last }) => {
                assert_eq!(attempts, 4);
                assert_eq!(last, "refused");
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn permanent_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), RetryError<String>> = fast(3)
            .run(
                |_| false,
                |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err("http 500".to_string()) }
                },
            )
            .await;
        assert!(matches!(result, Err(RetryError::Permanent(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
