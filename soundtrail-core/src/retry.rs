//! Bounded exponential-backoff retry for transient failures.
//!
//! [`RetryPolicy`] wraps a [`Transport`] call: outcomes classified as
//! `network` or `timeout` are retried with a doubling delay, anything
//! else is returned immediately. This layer is unaware of
//! authentication; 401 handling belongs to the client above it.

use std::time::Duration;

use crate::envelope::ResponseEnvelope;
use crate::transport::{ApiRequest, Transport};

/// Default number of retries after the initial attempt.
const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default delay before the first retry.
const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(1);

/// Bounded exponential-backoff policy.
///
/// A logical call performs between 1 and `max_retries + 1` transport
/// dispatches. The delay is applied only between attempts, never
/// before the first or after the last, and doubles after each
/// retry-eligible failure.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    initial_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_delay: DEFAULT_INITIAL_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay,
        }
    }

    /// Dispatch `request`, retrying transient failures with backoff.
    pub async fn execute(
        &self,
        transport: &dyn Transport,
        request: &ApiRequest,
    ) -> ResponseEnvelope {
        let mut attempt: u32 = 0;
        let mut delay = self.initial_delay;

        loop {
            let envelope = transport.dispatch(request).await;

            if !envelope.is_transient() {
                return envelope;
            }
            if attempt >= self.max_retries {
                tracing::warn!(
                    url = %request.url,
                    attempts = attempt + 1,
                    "transient failures exhausted retry budget"
                );
                return envelope;
            }

            tracing::debug!(
                url = %request.url,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "transient failure, backing off before retry"
            );
            tokio::time::sleep(delay).await;
            delay *= 2;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::ErrorKind;
    use crate::transport::Method;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;
    use url::Url;

    struct ScriptedTransport {
        calls: AtomicU32,
        outcomes: Vec<ResponseEnvelope>,
    }

    impl ScriptedTransport {
        fn new(outcomes: Vec<ResponseEnvelope>) -> Self {
            Self {
                calls: AtomicU32::new(0),
                outcomes,
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn dispatch(&self, _request: &ApiRequest) -> ResponseEnvelope {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
            self.outcomes[n.min(self.outcomes.len() - 1)].clone()
        }
    }

    fn request() -> ApiRequest {
        ApiRequest::new(Method::Get, Url::parse("https://api.test/pins").unwrap())
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_bound_and_schedule() {
        let transport = ScriptedTransport::new(vec![ResponseEnvelope::failure(
            ErrorKind::Network,
            "unreachable",
        )]);
        let policy = RetryPolicy::new(3, Duration::from_secs(1));

        let started = Instant::now();
        let envelope = policy.execute(&transport, &request()).await;
        let elapsed = started.elapsed();

        // 4 attempts, sleeping 1 + 2 + 4 units between them.
        assert_eq!(transport.calls(), 4);
        assert_eq!(envelope.error, Some(ErrorKind::Network));
        assert!(elapsed >= Duration::from_secs(7));
        assert!(elapsed < Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_retry_on_client_error() {
        let transport = ScriptedTransport::new(vec![ResponseEnvelope::from_status(
            422,
            None,
            Some("unprocessable".into()),
        )]);
        let policy = RetryPolicy::default();

        let started = Instant::now();
        let envelope = policy.execute(&transport, &request()).await;

        assert_eq!(transport.calls(), 1);
        assert_eq!(envelope.error, Some(ErrorKind::ClientError));
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_retry_on_parse_or_server_error() {
        for envelope in [
            ResponseEnvelope::parse_failure(200, "bad body"),
            ResponseEnvelope::from_status(500, None, None),
            ResponseEnvelope::from_status(401, None, None),
        ] {
            let transport = ScriptedTransport::new(vec![envelope]);
            let policy = RetryPolicy::default();
            policy.execute(&transport, &request()).await;
            assert_eq!(transport.calls(), 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_mid_schedule() {
        let transport = ScriptedTransport::new(vec![
            ResponseEnvelope::failure(ErrorKind::Timeout, "deadline"),
            ResponseEnvelope::failure(ErrorKind::Network, "reset"),
            ResponseEnvelope::ok(200, None),
        ]);
        let policy = RetryPolicy::new(3, Duration::from_millis(100));

        let envelope = policy.execute(&transport, &request()).await;

        assert_eq!(transport.calls(), 3);
        assert!(envelope.success);
    }
}
