//! Request and response hooks.
//!
//! Before hooks run once per call, after the request is built and before it
//! is sent; they may edit or replace the request. After hooks run once on the
//! final response. The first failing hook stops its chain and the call
//! returns [`HttpError::Hook`] with no response.
//!
//! Synchronous closures are hooks too:
//!
//! ```ignore
//! let api = Requests::new(vec![
//!     with_before(|req: &mut Request| -> Result<(), BoxError> {
//!         req.headers_mut().insert("x-token", HeaderValue::from_static("abc"));
//!         Ok(())
//!     }),
//! ]);
//! ```

use crate::error::{BoxError, HttpError};
use crate::response::Response;
use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Method, Uri, Version};
use std::fmt::Write as _;
use std::sync::Arc;

/// Log target of the request/response dumps enabled by
/// [`with_debug`](crate::with_debug).
pub const DEBUG_TARGET: &str = "modkit_requests::debug";

/// The request a call is about to send.
#[derive(Debug)]
pub struct Request {
    inner: http::Request<Bytes>,
}

impl Request {
    #[must_use]
    pub fn new(inner: http::Request<Bytes>) -> Self {
        Self { inner }
    }

    #[must_use]
    pub fn method(&self) -> &Method {
        self.inner.method()
    }

    #[must_use]
    pub fn uri(&self) -> &Uri {
        self.inner.uri()
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        self.inner.headers_mut()
    }

    #[must_use]
    pub fn body(&self) -> &Bytes {
        self.inner.body()
    }

    /// Typed values carried to the transport with the request.
    pub fn extensions_mut(&mut self) -> &mut http::Extensions {
        self.inner.extensions_mut()
    }

    #[must_use]
    pub fn inner(&self) -> &http::Request<Bytes> {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut http::Request<Bytes> {
        &mut self.inner
    }

    /// Swap in a different request, returning the previous one.
    pub fn replace(&mut self, request: http::Request<Bytes>) -> http::Request<Bytes> {
        std::mem::replace(&mut self.inner, request)
    }

    #[must_use]
    pub fn into_inner(self) -> http::Request<Bytes> {
        self.inner
    }
}

/// Hook run before the request is sent.
#[async_trait]
pub trait BeforeRequest: Send + Sync {
    /// # Errors
    /// Any error stops the call before the request is sent.
    async fn before(&self, req: &mut Request) -> Result<(), BoxError>;
}

/// Hook run on the final response.
#[async_trait]
pub trait AfterResponse: Send + Sync {
    /// # Errors
    /// Any error discards the response and becomes the call's error.
    async fn after(&self, resp: &mut Response) -> Result<(), BoxError>;
}

#[async_trait]
impl<F> BeforeRequest for F
where
    F: Fn(&mut Request) -> Result<(), BoxError> + Send + Sync,
{
    async fn before(&self, req: &mut Request) -> Result<(), BoxError> {
        self(req)
    }
}

#[async_trait]
impl<F> AfterResponse for F
where
    F: Fn(&mut Response) -> Result<(), BoxError> + Send + Sync,
{
    async fn after(&self, resp: &mut Response) -> Result<(), BoxError> {
        self(resp)
    }
}

/// Run `hooks` in order, stopping at the first failure.
pub async fn run_before(
    hooks: &[Arc<dyn BeforeRequest>],
    req: &mut Request,
) -> Result<(), HttpError> {
    for hook in hooks {
        hook.before(req).await.map_err(HttpError::Hook)?;
    }
    Ok(())
}

/// Run `hooks` in order, stopping at the first failure.
pub async fn run_after(
    hooks: &[Arc<dyn AfterResponse>],
    resp: &mut Response,
) -> Result<(), HttpError> {
    for hook in hooks {
        hook.after(resp).await.map_err(HttpError::Hook)?;
    }
    Ok(())
}

/// Logs an HTTP/1.1 style dump of the outgoing request.
pub struct DumpRequest;

#[async_trait]
impl BeforeRequest for DumpRequest {
    async fn before(&self, req: &mut Request) -> Result<(), BoxError> {
        let dump = dump_request(req.inner())?;
        tracing::info!(target: DEBUG_TARGET, "[request]\n{dump}");
        Ok(())
    }
}

/// Logs an HTTP/1.1 style dump of the response, reading its body.
pub struct DumpResponse;

#[async_trait]
impl AfterResponse for DumpResponse {
    async fn after(&self, resp: &mut Response) -> Result<(), BoxError> {
        let body = resp.bytes().await?;
        let dump = dump_response(resp, &body)?;
        tracing::info!(target: DEBUG_TARGET, "[response]\n{dump}");
        Ok(())
    }
}

fn dump_request(req: &http::Request<Bytes>) -> Result<String, std::fmt::Error> {
    let target = req.uri().path_and_query().map_or("/", |pq| pq.as_str());
    let mut out = String::new();
    write!(
        out,
        "{} {target} {}\r\n",
        req.method(),
        version_str(req.version())
    )?;
    if !req.headers().contains_key(http::header::HOST)
        && let Some(authority) = req.uri().authority()
    {
        write!(out, "Host: {authority}\r\n")?;
    }
    write_headers(&mut out, req.headers())?;
    out.push_str("\r\n");
    out.push_str(&String::from_utf8_lossy(req.body()));
    Ok(out)
}

fn dump_response(resp: &Response, body: &Bytes) -> Result<String, std::fmt::Error> {
    let mut out = String::new();
    write!(out, "{} {}\r\n", version_str(resp.version()), resp.status())?;
    write_headers(&mut out, resp.headers())?;
    out.push_str("\r\n");
    out.push_str(&String::from_utf8_lossy(body));
    Ok(out)
}

fn write_headers(out: &mut String, headers: &HeaderMap) -> std::fmt::Result {
    for (name, value) in headers {
        write!(out, "{name}: {}\r\n", String::from_utf8_lossy(value.as_bytes()))?;
    }
    Ok(())
}

fn version_str(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "HTTP/0.9",
        Version::HTTP_10 => "HTTP/1.0",
        Version::HTTP_2 => "HTTP/2",
        Version::HTTP_3 => "HTTP/3",
        _ => "HTTP/1.1",
    }
}
