use crate::context::Context;
use crate::error::{CancelReason, HttpError};
use crate::executor::{self, Dispatch, call_jar};
use crate::option::{RequestOption, RequestOptions};
use crate::response::Response;
use crate::transport::{HttpClient, default_http_client};
use bytes::Bytes;
use http::Method;
use std::sync::LazyLock;

static DEFAULT: LazyLock<Requests> = LazyLock::new(Requests::default);

/// Option-driven HTTP client
///
/// Holds default options applied to every call. Each call copies the
/// defaults, applies its own options on top and runs the request, so a
/// `Requests` value is never changed by the calls made through it and can be
/// shared freely.
///
/// Without [`with_client`](crate::with_client), calls go through a
/// process-wide [`HttpClient`] with the default configuration (HTTPS only).
///
/// # Example
///
/// ```ignore
/// let api = Requests::new(vec![
///     with_client(HttpClient::builder().timeout(Duration::from_secs(5)).build()?),
///     with_header("authorization", "Bearer token"),
///     with_retry(None),
/// ]);
///
/// let ctx = Context::background().with_timeout(Duration::from_secs(10));
/// let mut resp = api
///     .get(&ctx, "https://api.example.com/users", vec![with_param([("page", "2")])])
///     .await?;
/// let users: Vec<User> = resp.json().await?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct Requests {
    defaults: RequestOptions,
}

impl Requests {
    /// Create a client whose calls start from `options`.
    ///
    /// A failing option is reported by every call made through the client.
    #[must_use]
    pub fn new(options: impl IntoIterator<Item = RequestOption>) -> Self {
        let mut defaults = RequestOptions::new();
        defaults.apply(options);
        Self { defaults }
    }

    /// The default options of this client.
    #[must_use]
    pub fn defaults(&self) -> &RequestOptions {
        &self.defaults
    }

    /// # Errors
    /// See [`request`](Self::request).
    pub async fn get(
        &self,
        ctx: &Context,
        url: &str,
        options: Vec<RequestOption>,
    ) -> Result<Response, HttpError> {
        self.request(ctx, Method::GET, url, options).await
    }

    /// # Errors
    /// See [`request`](Self::request).
    pub async fn post(
        &self,
        ctx: &Context,
        url: &str,
        options: Vec<RequestOption>,
    ) -> Result<Response, HttpError> {
        self.request(ctx, Method::POST, url, options).await
    }

    /// # Errors
    /// See [`request`](Self::request).
    pub async fn put(
        &self,
        ctx: &Context,
        url: &str,
        options: Vec<RequestOption>,
    ) -> Result<Response, HttpError> {
        self.request(ctx, Method::PUT, url, options).await
    }

    /// # Errors
    /// See [`request`](Self::request).
    pub async fn patch(
        &self,
        ctx: &Context,
        url: &str,
        options: Vec<RequestOption>,
    ) -> Result<Response, HttpError> {
        self.request(ctx, Method::PATCH, url, options).await
    }

    /// # Errors
    /// See [`request`](Self::request).
    pub async fn delete(
        &self,
        ctx: &Context,
        url: &str,
        options: Vec<RequestOption>,
    ) -> Result<Response, HttpError> {
        self.request(ctx, Method::DELETE, url, options).await
    }

    /// # Errors
    /// See [`request`](Self::request).
    pub async fn head(
        &self,
        ctx: &Context,
        url: &str,
        options: Vec<RequestOption>,
    ) -> Result<Response, HttpError> {
        self.request(ctx, Method::HEAD, url, options).await
    }

    /// # Errors
    /// See [`request`](Self::request).
    pub async fn connect(
        &self,
        ctx: &Context,
        url: &str,
        options: Vec<RequestOption>,
    ) -> Result<Response, HttpError> {
        self.request(ctx, Method::CONNECT, url, options).await
    }

    /// # Errors
    /// See [`request`](Self::request).
    pub async fn options(
        &self,
        ctx: &Context,
        url: &str,
        options: Vec<RequestOption>,
    ) -> Result<Response, HttpError> {
        self.request(ctx, Method::OPTIONS, url, options).await
    }

    /// # Errors
    /// See [`request`](Self::request).
    pub async fn trace(
        &self,
        ctx: &Context,
        url: &str,
        options: Vec<RequestOption>,
    ) -> Result<Response, HttpError> {
        self.request(ctx, Method::TRACE, url, options).await
    }

    /// Build and run a request with `method`.
    ///
    /// `url` must be absolute; the encoded query from the options is appended
    /// after a `?`. Headers from the options replace any value with the same
    /// name. Without [`with_session(true)`](crate::with_session) the call
    /// uses a cookie jar of its own, seeded with the cookies from the options.
    ///
    /// # Errors
    ///
    /// - `HttpError::OptionConfig` if an option failed, before any I/O
    /// - `HttpError::InvalidUri` / `HttpError::InvalidScheme` for a URL the
    ///   transport refuses
    /// - `HttpError::Cancelled` once `ctx` is done
    /// - `HttpError::Hook`, `HttpError::Panic`, or the transport error
    pub async fn request(
        &self,
        ctx: &Context,
        method: Method,
        url: &str,
        options: Vec<RequestOption>,
    ) -> Result<Response, HttpError> {
        let mut opts = self.defaults.clone();
        opts.apply(options);
        if let Some(err) = opts.take_error() {
            return Err(err);
        }

        let client = resolve_client(&opts)?;
        let url = if opts.query.is_empty() {
            url.to_owned()
        } else {
            format!("{url}?{}", opts.query)
        };
        let uri = client.validate_url(&url)?;

        let body = tokio::select! {
            biased;
            () = ctx.done() => {
                return Err(HttpError::Cancelled(ctx.err().unwrap_or(CancelReason::Canceled)));
            }
            body = std::mem::take(&mut opts.body).materialize() => body?,
        };

        let mut request = http::Request::builder()
            .method(method)
            .uri(uri.clone())
            .body(body)?;
        for (name, value) in &opts.headers {
            request.headers_mut().insert(name.clone(), value.clone());
        }

        let jar = call_jar(&opts, &client);
        if !opts.cookies.is_empty() {
            jar.set_cookies(&uri, opts.cookies.iter().cloned());
        }

        executor::execute(ctx, request, Dispatch::new(&opts, client, jar)).await
    }

    /// Run a request built by the caller.
    ///
    /// No per-call options apply; the client's default hooks, retry policy,
    /// session mode and transport do.
    ///
    /// # Errors
    /// As for [`request`](Self::request).
    pub async fn execute(
        &self,
        ctx: &Context,
        request: http::Request<Bytes>,
    ) -> Result<Response, HttpError> {
        let mut opts = self.defaults.clone();
        if let Some(err) = opts.take_error() {
            return Err(err);
        }
        let client = resolve_client(&opts)?;
        let jar = call_jar(&opts, &client);
        executor::execute(ctx, request, Dispatch::new(&opts, client, jar)).await
    }
}

fn resolve_client(opts: &RequestOptions) -> Result<HttpClient, HttpError> {
    match &opts.client {
        Some(client) => Ok(client.clone()),
        None => default_http_client(),
    }
}

/// GET through the process-wide default client.
///
/// # Errors
/// See [`Requests::request`].
pub async fn get(ctx: &Context, url: &str, options: Vec<RequestOption>) -> Result<Response, HttpError> {
    DEFAULT.get(ctx, url, options).await
}

/// POST through the process-wide default client.
///
/// # Errors
/// See [`Requests::request`].
pub async fn post(ctx: &Context, url: &str, options: Vec<RequestOption>) -> Result<Response, HttpError> {
    DEFAULT.post(ctx, url, options).await
}

/// PUT through the process-wide default client.
///
/// # Errors
/// See [`Requests::request`].
pub async fn put(ctx: &Context, url: &str, options: Vec<RequestOption>) -> Result<Response, HttpError> {
    DEFAULT.put(ctx, url, options).await
}

/// PATCH through the process-wide default client.
///
/// # Errors
/// See [`Requests::request`].
pub async fn patch(ctx: &Context, url: &str, options: Vec<RequestOption>) -> Result<Response, HttpError> {
    DEFAULT.patch(ctx, url, options).await
}

/// DELETE through the process-wide default client.
///
/// # Errors
/// See [`Requests::request`].
pub async fn delete(ctx: &Context, url: &str, options: Vec<RequestOption>) -> Result<Response, HttpError> {
    DEFAULT.delete(ctx, url, options).await
}

/// HEAD through the process-wide default client.
///
/// # Errors
/// See [`Requests::request`].
pub async fn head(ctx: &Context, url: &str, options: Vec<RequestOption>) -> Result<Response, HttpError> {
    DEFAULT.head(ctx, url, options).await
}

/// CONNECT through the process-wide default client.
///
/// # Errors
/// See [`Requests::request`].
pub async fn connect(ctx: &Context, url: &str, options: Vec<RequestOption>) -> Result<Response, HttpError> {
    DEFAULT.connect(ctx, url, options).await
}

/// OPTIONS through the process-wide default client.
///
/// # Errors
/// See [`Requests::request`].
pub async fn options(ctx: &Context, url: &str, options: Vec<RequestOption>) -> Result<Response, HttpError> {
    DEFAULT.options(ctx, url, options).await
}

/// TRACE through the process-wide default client.
///
/// # Errors
/// See [`Requests::request`].
pub async fn trace(ctx: &Context, url: &str, options: Vec<RequestOption>) -> Result<Response, HttpError> {
    DEFAULT.trace(ctx, url, options).await
}

/// Run a caller-built request through the process-wide default client.
///
/// # Errors
/// See [`Requests::execute`].
pub async fn execute(ctx: &Context, request: http::Request<Bytes>) -> Result<Response, HttpError> {
    DEFAULT.execute(ctx, request).await
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::error::{BoxError, ErrorKind};
    use crate::option::{with_body, with_client, with_cookies, with_header, with_param, with_session};
    use crate::response::ResponseBody;
    use http::StatusCode;
    use http::header::{COOKIE, SET_COOKIE};
    use http_body_util::{BodyExt, Full};
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// In-process transport that records what it receives.
    #[derive(Clone, Default)]
    struct Recorder {
        seen: Arc<Mutex<Vec<(Method, String, http::HeaderMap, Bytes)>>>,
    }

    impl Recorder {
        fn client(&self) -> HttpClient {
            let seen = Arc::clone(&self.seen);
            HttpClient::from_service(tower::service_fn(
                move |req: http::Request<Full<Bytes>>| {
                    let seen = Arc::clone(&seen);
                    async move {
                        let (parts, body) = req.into_parts();
                        let body = body.collect().await.unwrap().to_bytes();
                        seen.lock()
                            .push((parts.method, parts.uri.to_string(), parts.headers, body));
                        let body: ResponseBody = Full::new(Bytes::from_static(b"done"))
                            .map_err(|e| -> BoxError { Box::new(e) })
                            .boxed();
                        Ok::<_, HttpError>(
                            http::Response::builder()
                                .status(StatusCode::OK)
                                .header(SET_COOKIE, "visit=1; Path=/")
                                .body(body)
                                .unwrap(),
                        )
                    }
                },
            ))
        }

        fn last(&self) -> (Method, String, http::HeaderMap, Bytes) {
            self.seen.lock().last().cloned().unwrap()
        }
    }

    #[tokio::test]
    async fn test_every_verb_uses_its_method() {
        let recorder = Recorder::default();
        let api = Requests::new(vec![with_client(recorder.client())]);
        let ctx = Context::background();
        let url = "http://svc.local/";

        api.get(&ctx, url, vec![]).await.unwrap();
        api.post(&ctx, url, vec![]).await.unwrap();
        api.put(&ctx, url, vec![]).await.unwrap();
        api.patch(&ctx, url, vec![]).await.unwrap();
        api.delete(&ctx, url, vec![]).await.unwrap();
        api.head(&ctx, url, vec![]).await.unwrap();
        api.connect(&ctx, url, vec![]).await.unwrap();
        api.options(&ctx, url, vec![]).await.unwrap();
        api.trace(&ctx, url, vec![]).await.unwrap();

        let methods: Vec<Method> = recorder.seen.lock().iter().map(|r| r.0.clone()).collect();
        assert_eq!(
            methods,
            vec![
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::PATCH,
                Method::DELETE,
                Method::HEAD,
                Method::CONNECT,
                Method::OPTIONS,
                Method::TRACE,
            ]
        );
    }

    #[tokio::test]
    async fn test_query_headers_and_body_reach_transport() {
        let recorder = Recorder::default();
        let api = Requests::new(vec![
            with_client(recorder.client()),
            with_header("x-default", "yes"),
        ]);

        api.post(
            &Context::background(),
            "http://svc.local/x",
            vec![
                with_param([("b", "2"), ("a", "1")]),
                with_header("x-default", "overridden"),
                with_body("raw"),
            ],
        )
        .await
        .unwrap();

        let (_, uri, headers, body) = recorder.last();
        assert_eq!(uri, "http://svc.local/x?a=1&b=2");
        assert_eq!(headers["x-default"], "overridden");
        assert_eq!(body, Bytes::from_static(b"raw"));
    }

    #[tokio::test]
    async fn test_calls_do_not_change_defaults() {
        let recorder = Recorder::default();
        let api = Requests::new(vec![with_client(recorder.client())]);
        let ctx = Context::background();

        api.get(&ctx, "http://svc.local/", vec![with_header("x-once", "1")])
            .await
            .unwrap();
        api.get(&ctx, "http://svc.local/", vec![]).await.unwrap();

        let (_, _, headers, _) = recorder.last();
        assert!(headers.get("x-once").is_none());
        assert!(api.defaults().headers().is_empty());
    }

    #[tokio::test]
    async fn test_session_cookies() {
        let recorder = Recorder::default();
        let client = recorder.client();
        let ctx = Context::background();

        let stateless = Requests::new(vec![with_client(client.clone())]);
        stateless.get(&ctx, "http://svc.local/", vec![]).await.unwrap();
        stateless.get(&ctx, "http://svc.local/", vec![]).await.unwrap();
        assert!(recorder.last().2.get(COOKIE).is_none());
        assert!(client.cookie_jar().is_empty());

        let session = Requests::new(vec![with_client(client.clone()), with_session(true)]);
        session.get(&ctx, "http://svc.local/", vec![]).await.unwrap();
        session.get(&ctx, "http://svc.local/", vec![]).await.unwrap();
        assert_eq!(recorder.last().2[COOKIE], "visit=1");

        // A session-less call on the same transport sees none of it.
        stateless.get(&ctx, "http://svc.local/", vec![]).await.unwrap();
        assert!(recorder.last().2.get(COOKIE).is_none());
    }

    #[tokio::test]
    async fn test_supplied_cookies_are_sent() {
        let recorder = Recorder::default();
        let api = Requests::new(vec![with_client(recorder.client())]);

        api.get(
            &Context::background(),
            "http://svc.local/account",
            vec![with_cookies([cookie::Cookie::new("token", "t1")])],
        )
        .await
        .unwrap();

        assert_eq!(recorder.last().2[COOKIE], "token=t1");
    }

    #[tokio::test]
    async fn test_option_error_short_circuits() {
        let recorder = Recorder::default();
        let api = Requests::new(vec![with_client(recorder.client())]);

        let err = api
            .get(
                &Context::background(),
                "http://svc.local/",
                vec![with_header("bad header", "v")],
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::OptionConfig);
        assert!(recorder.seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_default_option_error_reported_by_every_call() {
        let api = Requests::new(vec![with_header("bad header", "v")]);
        let ctx = Context::background();

        for _ in 0..2 {
            let err = api.get(&ctx, "https://svc.local/", vec![]).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::OptionConfig);
        }
    }

    #[tokio::test]
    async fn test_execute_runs_caller_request() {
        let recorder = Recorder::default();
        let api = Requests::new(vec![with_client(recorder.client())]);
        let request = http::Request::put("http://svc.local/raw")
            .header("x-custom", "1")
            .body(Bytes::from_static(b"payload"))
            .unwrap();

        let mut resp = api.execute(&Context::background(), request).await.unwrap();

        assert_eq!(resp.text().await.unwrap(), "done");
        let (method, uri, headers, body) = recorder.last();
        assert_eq!(method, Method::PUT);
        assert_eq!(uri, "http://svc.local/raw");
        assert_eq!(headers["x-custom"], "1");
        assert_eq!(body, Bytes::from_static(b"payload"));
    }

    #[tokio::test]
    async fn test_default_instance_enforces_https() {
        let err = get(&Context::background(), "http://example.com/", vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, HttpError::InvalidScheme { .. }));
    }

    #[tokio::test]
    async fn test_default_instance_cancelled() {
        let ctx = Context::background().with_cancel();
        ctx.cancel();
        let err = get(&ctx, "https://example.com/", vec![]).await.unwrap_err();
        assert!(err.is_cancelled());
    }
}
