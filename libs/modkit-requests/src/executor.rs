//! Cancellable, panic-safe call execution.
//!
//! Each call runs in its own tokio task: before hooks, the transport send
//! (cookie jar, optional retries) and after hooks. The caller waits for that
//! task or for its [`Context`] to finish, whichever comes first. A cancelled
//! caller returns at once; the task is left to finish on its own and its
//! result is dropped. A panic in the task becomes an error.

use crate::context::Context;
use crate::error::{CancelReason, HttpError};
use crate::jar::CookieJar;
use crate::layers::CookieLayer;
use crate::middleware::{
    AfterResponse, BeforeRequest, DumpRequest, DumpResponse, Request, run_after, run_before,
};
use crate::option::RequestOptions;
use crate::response::{Response, ResponseBody};
use crate::retry::{RetryLayer, RetryPolicy};
use crate::transport::{HttpClient, TransportService};
use bytes::Bytes;
use http_body_util::Full;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tower::{Layer, ServiceExt};

/// Everything a call needs once its request is built.
pub struct Dispatch {
    pub(crate) client: HttpClient,
    pub(crate) jar: Arc<CookieJar>,
    pub(crate) before: Vec<Arc<dyn BeforeRequest>>,
    pub(crate) after: Vec<Arc<dyn AfterResponse>>,
    pub(crate) retry: Option<Arc<dyn RetryPolicy>>,
}

impl Dispatch {
    /// Hooks and retry policy from `options`; debug dumps go first.
    pub(crate) fn new(options: &RequestOptions, client: HttpClient, jar: Arc<CookieJar>) -> Self {
        let mut before = Vec::with_capacity(options.before.len() + 1);
        let mut after = Vec::with_capacity(options.after.len() + 1);
        if options.debug {
            before.push(Arc::new(DumpRequest) as Arc<dyn BeforeRequest>);
            after.push(Arc::new(DumpResponse) as Arc<dyn AfterResponse>);
        }
        before.extend(options.before.iter().cloned());
        after.extend(options.after.iter().cloned());

        Self {
            client,
            jar,
            before,
            after,
            retry: options.retry.clone(),
        }
    }
}

/// The jar a call uses: the transport's shared jar in session mode, a fresh
/// one otherwise.
pub fn call_jar(options: &RequestOptions, client: &HttpClient) -> Arc<CookieJar> {
    if options.session {
        Arc::clone(client.cookie_jar())
    } else {
        Arc::new(CookieJar::new())
    }
}

fn cancelled(ctx: &Context) -> HttpError {
    HttpError::Cancelled(ctx.err().unwrap_or(CancelReason::Canceled))
}

/// Run `request` through hooks and transport, racing `ctx`.
///
/// # Errors
/// Returns `HttpError::Cancelled` as soon as `ctx` finishes,
/// `HttpError::Panic` if the worker panicked, or the first error of the
/// hooks or transport.
pub async fn execute(
    ctx: &Context,
    request: http::Request<Bytes>,
    dispatch: Dispatch,
) -> Result<Response, HttpError> {
    if ctx.is_done() {
        return Err(cancelled(ctx));
    }

    let worker = tokio::spawn(run(ctx.clone(), request, dispatch));

    tokio::select! {
        biased;
        () = ctx.done() => {
            tracing::debug!("Call cancelled; request worker left to finish in the background");
            Err(cancelled(ctx))
        }
        joined = worker => match joined {
            Ok(result) => result,
            Err(e) if e.is_panic() => {
                let err = HttpError::from_panic(e.into_panic());
                tracing::error!(error = %err, "Request worker panicked");
                Err(err)
            }
            Err(e) => Err(HttpError::Transport(Box::new(e))),
        },
    }
}

async fn run(
    ctx: Context,
    request: http::Request<Bytes>,
    dispatch: Dispatch,
) -> Result<Response, HttpError> {
    let Dispatch {
        client,
        jar,
        before,
        after,
        retry,
    } = dispatch;

    let mut req = Request::new(request);
    run_before(&before, &mut req).await?;

    let (parts, body) = req.into_inner().into_parts();
    // Hooks may have replaced the request.
    client.validate_url(&parts.uri.to_string())?;
    let sent = parts.clone();
    let outgoing = http::Request::from_parts(parts, Full::new(body));

    let raw = tokio::select! {
        biased;
        () = ctx.done() => return Err(cancelled(&ctx)),
        result = send(&ctx, client.service.clone(), jar, retry, outgoing) => result?,
    };

    let mut resp = Response::new(raw, sent, client.max_body_size);
    run_after(&after, &mut resp).await?;
    Ok(resp)
}

type SendFuture =
    Pin<Box<dyn Future<Output = Result<http::Response<ResponseBody>, HttpError>> + Send>>;

fn send(
    ctx: &Context,
    service: TransportService,
    jar: Arc<CookieJar>,
    retry: Option<Arc<dyn RetryPolicy>>,
    req: http::Request<Full<Bytes>>,
) -> SendFuture {
    let cookies = CookieLayer::new(jar);
    match retry {
        Some(policy) => {
            let svc = cookies.layer(RetryLayer::new(policy, ctx.clone()).layer(service));
            Box::pin(svc.oneshot(req))
        }
        None => Box::pin(cookies.layer(service).oneshot(req)),
    }
}
