use crate::error::HttpError;
use crate::jar::parse_set_cookies;
use bytes::Bytes;
use cookie::Cookie;
use http::{HeaderMap, StatusCode, Version};
use http_body_util::BodyExt;
use serde::de::DeserializeOwned;

/// Type alias for the boxed response body that supports decompression.
///
/// This type can hold either a raw body or a decompressed body (gzip/br/deflate).
/// The body is type-erased to allow the decompression layer to work transparently.
pub type ResponseBody =
    http_body_util::combinators::BoxBody<Bytes, Box<dyn std::error::Error + Send + Sync>>;

/// HTTP response returned by every call
///
/// The body is read at most once: the first call to [`bytes`](Self::bytes),
/// [`text`](Self::text), [`json`](Self::json) or [`xml`](Self::xml)
/// materialises it into a buffer and releases the stream. Later calls decode
/// the cached buffer, so the same response can be decoded more than once.
/// A body that is never read is released when the response is dropped.
///
/// All body reads enforce the transport's `max_body_size` limit.
#[derive(Debug)]
pub struct Response {
    parts: http::response::Parts,
    body: Option<ResponseBody>,
    cached: Option<Bytes>,
    request: http::request::Parts,
    max_body_size: usize,
}

impl Response {
    pub(crate) fn new(
        inner: http::Response<ResponseBody>,
        request: http::request::Parts,
        max_body_size: usize,
    ) -> Self {
        let (parts, body) = inner.into_parts();
        Self {
            parts,
            body: Some(body),
            cached: None,
            request,
            max_body_size,
        }
    }

    /// Get the response status code
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.parts.status
    }

    /// Get the response headers
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.parts.headers
    }

    /// Mutable access to the response headers, for after hooks.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.parts.headers
    }

    #[must_use]
    pub fn version(&self) -> Version {
        self.parts.version
    }

    /// Cookies set by this response through `Set-Cookie` headers
    #[must_use]
    pub fn cookies(&self) -> Vec<Cookie<'static>> {
        parse_set_cookies(&self.parts.headers)
    }

    /// The request that produced this response, as it left the before hooks.
    #[must_use]
    pub fn request(&self) -> &http::request::Parts {
        &self.request
    }

    /// Value of the `Content-Length` header, if present and valid
    #[must_use]
    pub fn content_length(&self) -> Option<u64> {
        self.parts
            .headers
            .get(http::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
    }

    #[must_use]
    pub fn max_body_size(&self) -> usize {
        self.max_body_size
    }

    /// Check status and return error for non-2xx responses
    ///
    /// Does NOT read the response body.
    ///
    /// # Errors
    ///
    /// Returns `HttpError::HttpStatus` if the response status is not 2xx.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let mut resp = requests.get(&ctx, "https://example.com/api", vec![]).await?;
    /// let mut resp = resp.error_for_status()?;  // Fails if not 2xx
    /// let body = resp.bytes().await?;
    /// ```
    pub fn error_for_status(self) -> Result<Self, HttpError> {
        if self.parts.status.is_success() {
            return Ok(self);
        }

        let content_type = self
            .parts
            .headers
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        Err(HttpError::HttpStatus {
            status: self.parts.status,
            content_type,
        })
    }

    /// Read the response body, caching it for later reads
    ///
    /// # Errors
    /// Returns `HttpError::BodyTooLarge` if the body exceeds the limit, or
    /// `HttpError::Transport` if reading the stream fails. A body whose first
    /// read failed cannot be read again.
    pub async fn bytes(&mut self) -> Result<Bytes, HttpError> {
        if let Some(cached) = &self.cached {
            return Ok(cached.clone());
        }
        let Some(body) = self.body.take() else {
            return Err(HttpError::Transport(
                "response body was lost to an earlier read error".into(),
            ));
        };
        let bytes = read_body_limited(body, self.max_body_size).await?;
        self.cached = Some(bytes.clone());
        Ok(bytes)
    }

    /// Read response body as UTF-8 text
    ///
    /// # Errors
    /// Returns `HttpError::Utf8` if the body is not valid UTF-8, plus the
    /// errors of [`bytes`](Self::bytes).
    pub async fn text(&mut self) -> Result<String, HttpError> {
        let bytes = self.bytes().await?;
        Ok(std::str::from_utf8(&bytes)?.to_owned())
    }

    /// Decode the body as JSON
    ///
    /// # Errors
    /// Returns `HttpError::Json` if parsing fails, plus the errors of
    /// [`bytes`](Self::bytes). The status code is not checked.
    pub async fn json<T: DeserializeOwned>(&mut self) -> Result<T, HttpError> {
        let bytes = self.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Decode the body as XML
    ///
    /// # Errors
    /// Returns `HttpError::Utf8` or `HttpError::Xml` if decoding fails, plus
    /// the errors of [`bytes`](Self::bytes).
    pub async fn xml<T: DeserializeOwned>(&mut self) -> Result<T, HttpError> {
        let bytes = self.bytes().await?;
        let text = std::str::from_utf8(&bytes)?;
        Ok(quick_xml::de::from_str(text)?)
    }
}

/// Read a body into memory, failing once more than `limit` bytes arrive.
///
/// The limit applies to decompressed bytes, so a small compressed payload
/// that expands past it is rejected as well.
pub async fn read_body_limited(body: ResponseBody, limit: usize) -> Result<Bytes, HttpError> {
    let mut collected = Vec::new();
    let mut body = std::pin::pin!(body);

    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(HttpError::Transport)?;
        if let Some(chunk) = frame.data_ref() {
            if collected.len() + chunk.len() > limit {
                return Err(HttpError::BodyTooLarge {
                    limit,
                    actual: collected.len() + chunk.len(),
                });
            }
            collected.extend_from_slice(chunk);
        }
    }

    Ok(Bytes::from(collected))
}
