//! Extraction stage contract and the shared retry loop.

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

use crate::http_client::{HttpClient, HttpRequest, HttpResponse};
use crate::retry::RetryConfig;
use crate::throttling::RequestThrottle;
use crate::{AssetId, PriceRecord, TimeWindow};

/// Extraction failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The upstream could not be reached, or kept failing, after all attempts.
    #[error("source unavailable for '{asset_id}' after {attempts} attempt(s): {cause}")]
    SourceUnavailable {
        asset_id: AssetId,
        attempts: u32,
        cause: String,
    },
    /// The upstream answered with a payload that does not have the expected shape.
    #[error("malformed response for '{asset_id}': {cause}")]
    MalformedResponse { asset_id: AssetId, cause: String },
}

impl FetchError {
    pub fn malformed(asset_id: &AssetId, cause: impl Into<String>) -> Self {
        Self::MalformedResponse {
            asset_id: asset_id.clone(),
            cause: cause.into(),
        }
    }

    pub fn asset_id(&self) -> &AssetId {
        match self {
            Self::SourceUnavailable { asset_id, .. } | Self::MalformedResponse { asset_id, .. } => {
                asset_id
            }
        }
    }
}

/// A price API that yields raw, unvalidated records for one asset and window.
pub trait PriceSource: Send + Sync {
    /// Value stored in the `source` column.
    fn id(&self) -> &'static str;

    fn fetch<'a>(
        &'a self,
        asset_id: &'a AssetId,
        window: TimeWindow,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<PriceRecord>, FetchError>> + Send + 'a>>;
}

/// Execute `request`, retrying transient failures according to `policy`.
///
/// Transport errors flagged retryable and statuses listed in
/// `policy.retry_on_status` are retried. Any other non-2xx status fails at
/// once. Each attempt first waits for `throttle`.
pub async fn execute_with_retry(
    client: &dyn HttpClient,
    request: &HttpRequest,
    policy: &RetryConfig,
    throttle: &RequestThrottle,
    asset_id: &AssetId,
) -> Result<HttpResponse, FetchError> {
    let max_attempts = policy.max_attempts();
    let mut last_cause = String::from("no attempt made");

    for attempt in 0..max_attempts {
        throttle.ready().await;
        let attempts = attempt + 1;

        match client.execute(request.clone()).await {
            Ok(response) if response.is_success() => return Ok(response),
            Ok(response) if policy.should_retry_status(response.status) => {
                last_cause = format!("upstream returned HTTP {}", response.status);
            }
            Ok(response) => {
                return Err(FetchError::SourceUnavailable {
                    asset_id: asset_id.clone(),
                    attempts,
                    cause: format!("upstream returned HTTP {}", response.status),
                });
            }
            Err(error) if error.retryable() => {
                last_cause = error.message().to_owned();
            }
            Err(error) => {
                return Err(FetchError::SourceUnavailable {
                    asset_id: asset_id.clone(),
                    attempts,
                    cause: error.message().to_owned(),
                });
            }
        }

        if attempts < max_attempts {
            let delay = policy.delay_for_attempt(attempt);
            tracing::warn!(
                asset_id = %asset_id,
                attempt = attempts,
                max_attempts,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                cause = %last_cause,
                "transient upstream failure, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    Err(FetchError::SourceUnavailable {
        asset_id: asset_id.clone(),
        attempts: max_attempts,
        cause: last_cause,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::http_client::HttpError;

    struct ScriptedClient {
        responses: Mutex<VecDeque<Result<HttpResponse, HttpError>>>,
        calls: Mutex<usize>,
    }

    impl ScriptedClient {
        fn new(responses: Vec<Result<HttpResponse, HttpError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> usize {
            *self.calls.lock().expect("calls lock")
        }
    }

    impl HttpClient for ScriptedClient {
        fn execute<'a>(
            &'a self,
            _request: HttpRequest,
        ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>> {
            *self.calls.lock().expect("calls lock") += 1;
            let next = self
                .responses
                .lock()
                .expect("responses lock")
                .pop_front()
                .unwrap_or_else(|| Err(HttpError::new("script exhausted")));
            Box::pin(async move { next })
        }
    }

    fn asset() -> AssetId {
        AssetId::parse("bitcoin").expect("valid asset")
    }

    fn instant_policy(max_retries: u32) -> RetryConfig {
        RetryConfig::fixed(Duration::ZERO, max_retries)
    }

    #[tokio::test]
    async fn recovers_after_transient_failures() {
        let client = ScriptedClient::new(vec![
            Err(HttpError::new("timeout")),
            Ok(HttpResponse::with_status(503, "")),
            Ok(HttpResponse::ok_json("{}")),
        ]);

        let response = execute_with_retry(
            &client,
            &HttpRequest::get("https://example.test"),
            &instant_policy(4),
            &RequestThrottle::unlimited(),
            &asset(),
        )
        .await
        .expect("third attempt succeeds");

        assert_eq!(response.status, 200);
        assert_eq!(client.calls(), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries_plus_one_attempts() {
        let client = ScriptedClient::new(
            (0..10)
                .map(|_| Ok(HttpResponse::with_status(429, "")))
                .collect(),
        );

        let err = execute_with_retry(
            &client,
            &HttpRequest::get("https://example.test"),
            &instant_policy(3),
            &RequestThrottle::unlimited(),
            &asset(),
        )
        .await
        .expect_err("must exhaust retries");

        assert_eq!(client.calls(), 4);
        assert!(matches!(
            err,
            FetchError::SourceUnavailable { attempts: 4, ref cause, .. } if cause.contains("429")
        ));
    }

    #[tokio::test]
    async fn permanent_status_fails_without_retry() {
        let client = ScriptedClient::new(vec![Ok(HttpResponse::with_status(404, ""))]);

        let err = execute_with_retry(
            &client,
            &HttpRequest::get("https://example.test"),
            &instant_policy(4),
            &RequestThrottle::unlimited(),
            &asset(),
        )
        .await
        .expect_err("404 is permanent");

        assert_eq!(client.calls(), 1);
        assert!(matches!(err, FetchError::SourceUnavailable { attempts: 1, .. }));
    }

    #[tokio::test]
    async fn non_retryable_transport_error_fails_at_once() {
        let client = ScriptedClient::new(vec![Err(HttpError::non_retryable("bad url"))]);

        let err = execute_with_retry(
            &client,
            &HttpRequest::get("not a url"),
            &instant_policy(4),
            &RequestThrottle::unlimited(),
            &asset(),
        )
        .await
        .expect_err("must fail");

        assert_eq!(client.calls(), 1);
        assert_eq!(err.asset_id().as_str(), "bitcoin");
    }
}
