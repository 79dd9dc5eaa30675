//! Retry controller.
//!
//! A [`RetryPolicy`] decides whether an attempt should be repeated and how long
//! to wait first. [`RetryLayer`] applies a policy around the transport send of a
//! single call: hooks are never re-run, only the send is.

use crate::config::{
    DEFAULT_RETRY_RESPONSE_DRAIN_LIMIT, ExponentialBackoff, RetryConfig, RetryTrigger,
};
use crate::context::Context as CallContext;
use crate::error::HttpError;
use crate::response::ResponseBody;
use bytes::Bytes;
use http::{HeaderMap, HeaderValue, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use rand::Rng;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tower::{Layer, Service, ServiceExt};

/// Header name for retry attempt number (1-indexed).
/// Added to retried requests to indicate which retry attempt this is.
pub const RETRY_ATTEMPT_HEADER: &str = "X-Retry-Attempt";

/// Hard cap on attempts per call, whatever the policy reports.
pub const ABSOLUTE_MAX_ATTEMPTS: usize = 10;

/// Result of one attempt, as seen by a [`RetryPolicy`].
#[derive(Debug, Clone, Copy)]
pub enum Outcome<'a> {
    /// The transport returned a response
    Response {
        status: StatusCode,
        headers: &'a HeaderMap,
    },
    /// The transport failed
    Error(&'a HttpError),
}

/// Decides whether and when to re-attempt a send.
///
/// `attempt` is the zero-based index of the attempt that just finished.
pub trait RetryPolicy: Send + Sync {
    /// Whether `outcome` of attempt `attempt` should be retried.
    fn should_retry(&self, attempt: usize, outcome: Outcome<'_>) -> bool;

    /// Delay before the attempt following `attempt`.
    fn backoff_delay(&self, attempt: usize) -> Duration;

    /// Total attempts allowed, including the first. Clamped to
    /// `1..=ABSOLUTE_MAX_ATTEMPTS`.
    fn max_attempts(&self) -> usize {
        ABSOLUTE_MAX_ATTEMPTS
    }

    /// Bytes to drain from a discarded response before the next attempt.
    fn drain_limit(&self) -> usize {
        DEFAULT_RETRY_RESPONSE_DRAIN_LIMIT
    }
}

impl RetryPolicy for RetryConfig {
    fn should_retry(&self, _attempt: usize, outcome: Outcome<'_>) -> bool {
        match outcome {
            Outcome::Response { status, .. } => self.is_retryable_status(status),
            Outcome::Error(err) => {
                get_retry_trigger(err).is_some_and(|trigger| self.is_trigger(trigger))
            }
        }
    }

    fn backoff_delay(&self, attempt: usize) -> Duration {
        calculate_backoff(&self.backoff, attempt)
    }

    fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    fn drain_limit(&self) -> usize {
        self.retry_response_drain_limit
    }
}

/// Tower layer that re-sends a buffered request according to a [`RetryPolicy`]
///
/// Backoff waits end early when the call context is cancelled.
#[derive(Clone)]
pub struct RetryLayer {
    policy: Arc<dyn RetryPolicy>,
    ctx: CallContext,
}

impl RetryLayer {
    #[must_use]
    pub fn new(policy: Arc<dyn RetryPolicy>, ctx: CallContext) -> Self {
        Self { policy, ctx }
    }
}

impl<S> Layer<S> for RetryLayer {
    type Service = RetryService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RetryService {
            inner,
            policy: Arc::clone(&self.policy),
            ctx: self.ctx.clone(),
        }
    }
}

/// Service that implements the retry loop.
///
/// When the policy still wants a retry for a response status after the last
/// allowed attempt, the call fails with [`HttpError::RetriesExhausted`]. When
/// the last attempt failed with an error, that error is returned as is. An
/// outcome the policy does not want to retry is returned unchanged.
#[derive(Clone)]
pub struct RetryService<S> {
    inner: S,
    policy: Arc<dyn RetryPolicy>,
    ctx: CallContext,
}

impl<S> Service<Request<Full<Bytes>>> for RetryService<S>
where
    S: Service<Request<Full<Bytes>>, Response = Response<ResponseBody>, Error = HttpError>
        + Clone
        + Send
        + 'static,
    S::Future: Send,
{
    type Response = S::Response;
    type Error = HttpError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Full<Bytes>>) -> Self::Future {
        // Consume the instance that was poll_ready'd.
        let clone = self.inner.clone();
        let inner = std::mem::replace(&mut self.inner, clone);
        let policy = Arc::clone(&self.policy);
        let ctx = self.ctx.clone();

        let (parts, body) = req.into_parts();
        let http_version = parts.version;
        let extensions = parts.extensions.clone();
        let parts = Arc::new(parts);

        Box::pin(async move {
            let method = parts.method.clone();
            let url_host = parts
                .uri
                .authority()
                .map_or_else(|| "unknown".to_owned(), ToString::to_string);
            let max_attempts = policy.max_attempts().clamp(1, ABSOLUTE_MAX_ATTEMPTS);

            let mut attempt = 0usize;
            loop {
                let mut req = Request::from_parts((*parts).clone(), body.clone());
                *req.version_mut() = http_version;
                *req.extensions_mut() = extensions.clone();

                if attempt > 0
                    && let Ok(value) = HeaderValue::try_from(attempt.to_string())
                {
                    req.headers_mut().insert(RETRY_ATTEMPT_HEADER, value);
                }

                let mut svc = inner.clone();
                svc.ready().await?;
                let result = svc.call(req).await;

                let wants_retry = match &result {
                    Ok(resp) => policy.should_retry(
                        attempt,
                        Outcome::Response {
                            status: resp.status(),
                            headers: resp.headers(),
                        },
                    ),
                    Err(err) => policy.should_retry(attempt, Outcome::Error(err)),
                };
                if !wants_retry {
                    return result;
                }

                let attempts_made = attempt + 1;
                match result {
                    Ok(resp) => {
                        let status = resp.status();
                        if let Err(e) = drain_response_body(resp, policy.drain_limit()).await {
                            tracing::debug!(
                                error = %e,
                                "Failed to drain response body before retry; connection may not be reused"
                            );
                        }
                        if attempts_made >= max_attempts {
                            tracing::debug!(
                                attempts = attempts_made,
                                status = status.as_u16(),
                                method = %method,
                                host = %url_host,
                                "Retries exhausted"
                            );
                            return Err(HttpError::RetriesExhausted {
                                attempts: attempts_made,
                                status,
                            });
                        }
                        tracing::debug!(
                            attempt = attempts_made,
                            max_attempts,
                            status = status.as_u16(),
                            method = %method,
                            host = %url_host,
                            "Retrying request after status code"
                        );
                    }
                    Err(err) => {
                        if attempts_made >= max_attempts {
                            return Err(err);
                        }
                        tracing::debug!(
                            attempt = attempts_made,
                            max_attempts,
                            error = %err,
                            method = %method,
                            host = %url_host,
                            "Retrying request after error"
                        );
                    }
                }

                let delay = policy.backoff_delay(attempt);
                ctx.sleep(delay).await.map_err(HttpError::Cancelled)?;
                attempt += 1;
            }
        })
    }
}

/// Drain response body up to `limit` bytes so the connection can be reused.
///
/// Operates on decompressed bytes. Stops early once the limit is reached.
async fn drain_response_body(
    response: Response<ResponseBody>,
    limit: usize,
) -> Result<(), HttpError> {
    let (_parts, body) = response.into_parts();
    let mut body = std::pin::pin!(body);
    let mut drained = 0usize;

    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(HttpError::Transport)?;
        if let Some(chunk) = frame.data_ref() {
            drained += chunk.len();
            if drained >= limit {
                break;
            }
        }
    }

    Ok(())
}

/// Map an error to the trigger it represents, if any
fn get_retry_trigger(err: &HttpError) -> Option<RetryTrigger> {
    match err {
        HttpError::Transport(_) | HttpError::Tls(_) => Some(RetryTrigger::TransportError),
        HttpError::Timeout(_) => Some(RetryTrigger::Timeout),
        _ => None,
    }
}

/// Calculate backoff duration for a given attempt
///
/// Safely handles edge cases (NaN, infinity, negative values) to avoid panics.
#[must_use]
pub fn calculate_backoff(backoff: &ExponentialBackoff, attempt: usize) -> Duration {
    // 1 day
    const MAX_BACKOFF_SECS: f64 = 86400.0;

    let attempt_i32 = i32::try_from(attempt).unwrap_or(i32::MAX);

    let multiplier = if backoff.multiplier.is_finite() && backoff.multiplier >= 0.0 {
        backoff.multiplier
    } else {
        1.0
    };

    let initial_secs = backoff.initial.as_secs_f64();
    let initial_secs = if initial_secs.is_finite() && initial_secs >= 0.0 {
        initial_secs
    } else {
        0.0
    };

    let max_secs = backoff.max.as_secs_f64();
    let max_secs = if max_secs.is_finite() && max_secs >= 0.0 {
        max_secs.min(MAX_BACKOFF_SECS)
    } else {
        MAX_BACKOFF_SECS
    };

    let base_duration = initial_secs * multiplier.powi(attempt_i32);
    let clamped = if base_duration.is_finite() {
        base_duration.min(max_secs).max(0.0)
    } else {
        max_secs
    };
    let duration = Duration::from_secs_f64(clamped);

    let duration = if backoff.jitter {
        let mut rng = rand::rng();
        let jitter_factor = rng.random_range(0.0..=0.25);
        duration + duration.mul_f64(jitter_factor)
    } else {
        duration
    };

    duration.min(Duration::from_secs_f64(max_secs))
}
