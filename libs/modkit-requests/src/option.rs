//! Per-call request options.
//!
//! Each `with_*` builder returns a [`RequestOption`] that edits a
//! [`RequestOptions`] set. Options are applied in order; when two options
//! touch the same field the later one wins. An option that fails (a value
//! that does not serialize, a file that cannot be read, an invalid header)
//! records the error instead, and the call returns it before any I/O. Only
//! the first such error is kept.

use crate::config::RetryConfig;
use crate::encode::{encode_map, encode_struct};
use crate::error::HttpError;
use crate::middleware::{AfterResponse, BeforeRequest};
use crate::multipart::{self, File};
use crate::retry::RetryPolicy;
use crate::transport::HttpClient;
use bytes::Bytes;
use cookie::Cookie;
use http::header::{CONTENT_TYPE, HeaderName};
use http::{HeaderMap, HeaderValue};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};

pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
pub const JSON_CONTENT_TYPE: &str = "application/json";
pub const XML_CONTENT_TYPE: &str = "application/xml";

/// Caller supplied streaming body.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Request body as configured by the options.
#[derive(Clone, Default)]
pub enum Body {
    #[default]
    Empty,
    Bytes(Bytes),
    /// Read to the end when the request is built; usable by one call only.
    Reader(Arc<Mutex<Option<BoxedReader>>>),
}

impl Body {
    /// Produce the body bytes, consuming a reader body.
    ///
    /// # Errors
    /// Returns `HttpError::RequestBody` if the reader fails or was already used.
    pub(crate) async fn materialize(self) -> Result<Bytes, HttpError> {
        match self {
            Body::Empty => Ok(Bytes::new()),
            Body::Bytes(bytes) => Ok(bytes),
            Body::Reader(slot) => {
                let reader = slot.lock().take();
                let Some(mut reader) = reader else {
                    return Err(HttpError::RequestBody(
                        "request body reader was already consumed by an earlier call".into(),
                    ));
                };
                let mut buf = Vec::new();
                reader
                    .read_to_end(&mut buf)
                    .await
                    .map_err(|e| HttpError::RequestBody(Box::new(e)))?;
                Ok(Bytes::from(buf))
            }
        }
    }

    fn is_empty(&self) -> bool {
        matches!(self, Body::Empty)
    }
}

/// Accumulated request settings.
///
/// A [`Requests`](crate::Requests) facade keeps one set as its defaults and
/// applies each call's options to a copy, so calls never change the defaults.
#[derive(Clone, Default)]
pub struct RequestOptions {
    pub(crate) error: Option<Arc<HttpError>>,
    pub(crate) client: Option<HttpClient>,
    pub(crate) headers: HeaderMap,
    pub(crate) cookies: Vec<Cookie<'static>>,
    pub(crate) query: String,
    pub(crate) body: Body,
    pub(crate) session: bool,
    pub(crate) before: Vec<Arc<dyn BeforeRequest>>,
    pub(crate) after: Vec<Arc<dyn AfterResponse>>,
    pub(crate) retry: Option<Arc<dyn RetryPolicy>>,
    pub(crate) debug: bool,
}

impl RequestOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `options` in order.
    pub fn apply(&mut self, options: impl IntoIterator<Item = RequestOption>) {
        for option in options {
            option.apply(self);
        }
    }

    /// The deferred option error, if any option failed.
    #[must_use]
    pub fn error(&self) -> Option<&HttpError> {
        self.error.as_deref()
    }

    /// Encoded query string, without the leading `?`.
    #[must_use]
    pub fn query(&self) -> &str {
        &self.query
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    #[must_use]
    pub fn cookies(&self) -> &[Cookie<'static>] {
        &self.cookies
    }

    #[must_use]
    pub fn has_body(&self) -> bool {
        !self.body.is_empty()
    }

    #[must_use]
    pub fn is_session(&self) -> bool {
        self.session
    }

    #[must_use]
    pub fn is_debug(&self) -> bool {
        self.debug
    }

    #[must_use]
    pub fn has_retry(&self) -> bool {
        self.retry.is_some()
    }

    /// Record `err` unless an earlier option already failed.
    pub(crate) fn fail(&mut self, err: HttpError) {
        if self.error.is_none() {
            self.error = Some(Arc::new(err));
        }
    }

    pub(crate) fn take_error(&mut self) -> Option<HttpError> {
        let shared = self.error.take()?;
        // Only a copy of the defaults still holds another reference.
        Some(Arc::try_unwrap(shared).unwrap_or_else(|shared| {
            HttpError::OptionConfig(shared.to_string().into())
        }))
    }

    fn set_body(&mut self, body: Bytes, content_type: Option<HeaderValue>) {
        self.body = Body::Bytes(body);
        if let Some(content_type) = content_type {
            self.headers.insert(CONTENT_TYPE, content_type);
        }
    }
}

impl std::fmt::Debug for RequestOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestOptions")
            .field("error", &self.error)
            .field("client", &self.client)
            .field("headers", &self.headers)
            .field("cookies", &self.cookies)
            .field("query", &self.query)
            .field("has_body", &self.has_body())
            .field("session", &self.session)
            .field("before", &self.before.len())
            .field("after", &self.after.len())
            .field("retry", &self.retry.is_some())
            .field("debug", &self.debug)
            .finish()
    }
}

/// One edit of a [`RequestOptions`] set.
pub struct RequestOption(Box<dyn FnOnce(&mut RequestOptions) + Send>);

impl RequestOption {
    /// Wrap a custom edit.
    #[must_use]
    pub fn new(f: impl FnOnce(&mut RequestOptions) + Send + 'static) -> Self {
        Self(Box::new(f))
    }

    pub fn apply(self, options: &mut RequestOptions) {
        (self.0)(options);
    }
}

impl std::fmt::Debug for RequestOption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RequestOption")
    }
}

/// Set the query string from string pairs, keys sorted.
#[must_use]
pub fn with_param<I, K, V>(values: I) -> RequestOption
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    let query = encode_map(values);
    RequestOption::new(move |opts| opts.query = query)
}

/// Set the query string from a serializable record or map.
///
/// See [`encode_struct`] for the field rules.
#[must_use]
pub fn with_query<T>(value: &T) -> RequestOption
where
    T: Serialize + ?Sized,
{
    let encoded = encode_struct(value);
    RequestOption::new(move |opts| match encoded {
        Ok(query) => opts.query = query,
        Err(e) => opts.fail(HttpError::OptionConfig(Box::new(e))),
    })
}

/// URL-encoded form body.
#[must_use]
pub fn with_form<I, K, V>(values: I) -> RequestOption
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    let body = Bytes::from(encode_map(values));
    RequestOption::new(move |opts| {
        opts.set_body(body, Some(HeaderValue::from_static(FORM_CONTENT_TYPE)));
    })
}

/// JSON body.
#[must_use]
pub fn with_json<T>(value: &T) -> RequestOption
where
    T: Serialize + ?Sized,
{
    let encoded = serde_json::to_vec(value);
    RequestOption::new(move |opts| match encoded {
        Ok(body) => opts.set_body(
            Bytes::from(body),
            Some(HeaderValue::from_static(JSON_CONTENT_TYPE)),
        ),
        Err(e) => opts.fail(HttpError::OptionConfig(Box::new(e))),
    })
}

/// XML body. The root element is named after the serialized type.
#[must_use]
pub fn with_xml<T>(value: &T) -> RequestOption
where
    T: Serialize + ?Sized,
{
    let encoded = quick_xml::se::to_string(value);
    RequestOption::new(move |opts| match encoded {
        Ok(body) => opts.set_body(
            Bytes::from(body),
            Some(HeaderValue::from_static(XML_CONTENT_TYPE)),
        ),
        Err(e) => opts.fail(HttpError::OptionConfig(Box::new(e))),
    })
}

/// Raw body; `Content-Type` is left as is.
#[must_use]
pub fn with_body(body: impl Into<Bytes>) -> RequestOption {
    let body = body.into();
    RequestOption::new(move |opts| opts.set_body(body, None))
}

/// Body read from `reader` when the request is built.
///
/// The reader is consumed by the first call that uses it; a later call with
/// the same options fails with `HttpError::RequestBody`.
#[must_use]
pub fn with_reader<R>(reader: R) -> RequestOption
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let slot: Arc<Mutex<Option<BoxedReader>>> = Arc::new(Mutex::new(Some(Box::new(reader))));
    RequestOption::new(move |opts| opts.body = Body::Reader(slot))
}

/// Set headers, replacing earlier values with the same name.
#[must_use]
pub fn with_headers<I, K, V>(headers: I) -> RequestOption
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let parsed: Result<Vec<(HeaderName, HeaderValue)>, HttpError> = headers
        .into_iter()
        .map(|(name, value)| {
            let name = HeaderName::from_bytes(name.as_ref().as_bytes())
                .map_err(|e| HttpError::OptionConfig(Box::new(e)))?;
            let value = HeaderValue::from_str(value.as_ref())
                .map_err(|e| HttpError::OptionConfig(Box::new(e)))?;
            Ok((name, value))
        })
        .collect();
    RequestOption::new(move |opts| match parsed {
        Ok(headers) => {
            for (name, value) in headers {
                opts.headers.insert(name, value);
            }
        }
        Err(e) => opts.fail(e),
    })
}

/// Set a single header.
#[must_use]
pub fn with_header(name: impl AsRef<str>, value: impl AsRef<str>) -> RequestOption {
    with_headers([(name, value)])
}

/// Cookies to send, scoped to the request URL. Replaces earlier cookies.
#[must_use]
pub fn with_cookies<I>(cookies: I) -> RequestOption
where
    I: IntoIterator<Item = Cookie<'static>>,
{
    let cookies: Vec<Cookie<'static>> = cookies.into_iter().collect();
    RequestOption::new(move |opts| opts.cookies = cookies)
}

/// Keep cookies across calls in the transport's shared jar.
///
/// Off by default: each call then gets its own empty jar.
#[must_use]
pub fn with_session(session: bool) -> RequestOption {
    RequestOption::new(move |opts| opts.session = session)
}

/// Send through `client` instead of the process-wide default transport.
#[must_use]
pub fn with_client(client: HttpClient) -> RequestOption {
    RequestOption::new(move |opts| opts.client = Some(client))
}

/// Append a before hook.
#[must_use]
pub fn with_before<H>(hook: H) -> RequestOption
where
    H: BeforeRequest + 'static,
{
    let hook: Arc<dyn BeforeRequest> = Arc::new(hook);
    RequestOption::new(move |opts| opts.before.push(hook))
}

/// Append an after hook.
#[must_use]
pub fn with_after<H>(hook: H) -> RequestOption
where
    H: AfterResponse + 'static,
{
    let hook: Arc<dyn AfterResponse> = Arc::new(hook);
    RequestOption::new(move |opts| opts.after.push(hook))
}

/// Append several before hooks, in order.
#[must_use]
pub fn with_before_hooks<I>(hooks: I) -> RequestOption
where
    I: IntoIterator<Item = Arc<dyn BeforeRequest>>,
{
    let hooks: Vec<_> = hooks.into_iter().collect();
    RequestOption::new(move |opts| opts.before.extend(hooks))
}

/// Append several after hooks, in order.
#[must_use]
pub fn with_after_hooks<I>(hooks: I) -> RequestOption
where
    I: IntoIterator<Item = Arc<dyn AfterResponse>>,
{
    let hooks: Vec<_> = hooks.into_iter().collect();
    RequestOption::new(move |opts| opts.after.extend(hooks))
}

/// Log a dump of each request and response at `info` level.
///
/// The dumps run ahead of every other hook: the request dump before the
/// first before hook, the response dump before the first after hook. The
/// response dump reads the body, which stays readable from its cache.
#[must_use]
pub fn with_debug(debug: bool) -> RequestOption {
    RequestOption::new(move |opts| opts.debug = debug)
}

/// Retry the transport send. `None` installs [`RetryConfig::default`].
#[must_use]
pub fn with_retry(policy: Option<Arc<dyn RetryPolicy>>) -> RequestOption {
    let policy = policy.unwrap_or_else(|| Arc::new(RetryConfig::default()));
    RequestOption::new(move |opts| opts.retry = Some(policy))
}

/// Upload a file as `multipart/form-data`.
///
/// The file is read into memory and closed while the option is applied,
/// with blocking `std::fs` I/O on the calling task. Fine for small uploads;
/// for large files read them with `tokio::fs` and pass the bytes to
/// [`with_body`] instead.
#[must_use]
pub fn with_file(file: &File) -> RequestOption {
    let file = file.clone();
    RequestOption::new(move |opts| match multipart::file_envelope(&file) {
        Ok(envelope) => {
            let content_type = HeaderValue::from_str(&envelope.content_type());
            match content_type {
                Ok(content_type) => opts.set_body(envelope.finish(), Some(content_type)),
                Err(e) => opts.fail(HttpError::OptionConfig(Box::new(e))),
            }
        }
        Err(e) => {
            tracing::debug!(path = %file.path.display(), error = %e, "Failed to read upload file");
            opts.fail(HttpError::OptionConfig(Box::new(e)));
        }
    })
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use serde::Serialize;
    use std::collections::HashMap;
    use std::io::Write;

    fn build(options: Vec<RequestOption>) -> RequestOptions {
        let mut opts = RequestOptions::new();
        opts.apply(options);
        opts
    }

    async fn body_of(opts: &RequestOptions) -> Bytes {
        opts.body.clone().materialize().await.unwrap()
    }

    #[test]
    fn test_param_sorted_query() {
        let opts = build(vec![with_param([("b", "2"), ("a", "1")])]);
        assert_eq!(opts.query(), "a=1&b=2");
        assert!(!opts.has_body());
    }

    #[test]
    fn test_query_from_struct() {
        #[derive(Serialize)]
        struct Anon {
            #[serde(rename = "f")]
            flag: bool,
        }

        #[derive(Serialize)]
        struct Params {
            #[serde(rename = "id")]
            id: u32,
            #[serde(flatten)]
            anon: Anon,
        }

        let opts = build(vec![with_query(&Params {
            id: 2,
            anon: Anon { flag: true },
        })]);
        assert_eq!(opts.query(), "f=true&id=2");
    }

    #[test]
    fn test_query_rejects_sequences() {
        let opts = build(vec![with_query(&[1, 2, 3])]);
        assert_eq!(opts.error().unwrap().kind(), ErrorKind::OptionConfig);
    }

    #[tokio::test]
    async fn test_json_body_and_content_type() {
        let mut value = HashMap::new();
        value.insert("k", 1);
        let opts = build(vec![with_json(&value)]);

        assert_eq!(opts.headers()[CONTENT_TYPE], JSON_CONTENT_TYPE);
        assert_eq!(body_of(&opts).await, Bytes::from_static(br#"{"k":1}"#));
    }

    #[tokio::test]
    async fn test_form_body_and_content_type() {
        let opts = build(vec![with_form([("a", "1")])]);

        assert_eq!(opts.headers()[CONTENT_TYPE], FORM_CONTENT_TYPE);
        assert_eq!(body_of(&opts).await, Bytes::from_static(b"a=1"));
    }

    #[tokio::test]
    async fn test_xml_body_and_content_type() {
        #[derive(Serialize)]
        struct Note {
            to: String,
        }

        let opts = build(vec![with_xml(&Note {
            to: "Tove".to_owned(),
        })]);

        assert_eq!(opts.headers()[CONTENT_TYPE], XML_CONTENT_TYPE);
        assert_eq!(
            body_of(&opts).await,
            Bytes::from_static(b"<Note><to>Tove</to></Note>")
        );
    }

    #[tokio::test]
    async fn test_raw_body_keeps_content_type() {
        let opts = build(vec![
            with_header("content-type", "text/csv"),
            with_body("a,b\n1,2\n"),
        ]);

        assert_eq!(opts.headers()[CONTENT_TYPE], "text/csv");
        assert_eq!(body_of(&opts).await, Bytes::from_static(b"a,b\n1,2\n"));
    }

    #[tokio::test]
    async fn test_reader_body_is_single_shot() {
        let opts = build(vec![with_reader(std::io::Cursor::new(b"streamed".to_vec()))]);
        let copy = opts.clone();

        assert_eq!(body_of(&opts).await, Bytes::from_static(b"streamed"));
        let err = copy.body.materialize().await.unwrap_err();
        assert!(matches!(err, HttpError::RequestBody(_)));
        assert_eq!(err.kind(), ErrorKind::RequestBuild);
    }

    #[test]
    fn test_headers_last_writer_wins() {
        let opts = build(vec![
            with_headers([("X-Token", "one"), ("Accept", "text/plain")]),
            with_header("x-token", "two"),
        ]);

        assert_eq!(opts.headers().get_all("x-token").iter().count(), 1);
        assert_eq!(opts.headers()["x-token"], "two");
        assert_eq!(opts.headers()["accept"], "text/plain");
    }

    #[test]
    fn test_invalid_header_is_deferred() {
        let opts = build(vec![with_header("bad header", "v")]);
        assert_eq!(opts.error().unwrap().kind(), ErrorKind::OptionConfig);
    }

    #[test]
    fn test_first_error_wins() {
        let opts = build(vec![
            with_header("first bad", "v"),
            with_query(&"not a record"),
            with_param([("still", "applied")]),
        ]);

        let err = opts.error().unwrap();
        assert!(matches!(err, HttpError::OptionConfig(e) if e.is::<http::header::InvalidHeaderName>()));
        assert_eq!(opts.query(), "still=applied");
    }

    #[test]
    fn test_take_error_from_shared_copy() {
        let defaults = build(vec![with_header("bad header", "v")]);
        let mut copy = defaults.clone();

        let err = copy.take_error().unwrap();
        assert_eq!(err.kind(), ErrorKind::OptionConfig);
        assert!(copy.error().is_none());
        assert!(defaults.error().is_some());
    }

    #[test]
    fn test_cookies_replace() {
        let opts = build(vec![
            with_cookies([Cookie::new("a", "1")]),
            with_cookies([Cookie::new("b", "2"), Cookie::new("c", "3")]),
        ]);

        let names: Vec<_> = opts.cookies().iter().map(Cookie::name).collect();
        assert_eq!(names, vec!["b", "c"]);
    }

    #[test]
    fn test_flags_and_hooks() {
        let opts = build(vec![
            with_session(true),
            with_debug(true),
            with_retry(None),
            with_before(|_req: &mut crate::Request| -> Result<(), crate::BoxError> { Ok(()) }),
            with_after(|_resp: &mut crate::Response| -> Result<(), crate::BoxError> { Ok(()) }),
            with_debug(false),
        ]);

        assert!(opts.is_session());
        assert!(!opts.is_debug());
        assert!(opts.has_retry());
        assert_eq!(opts.before.len(), 1);
        assert_eq!(opts.after.len(), 1);

        let defaults = RequestOptions::new();
        assert!(!defaults.is_session());
        assert!(!defaults.has_retry());
    }

    #[tokio::test]
    async fn test_hook_lists_keep_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let first = Arc::clone(&seen);
        let second = Arc::clone(&seen);
        let befores: Vec<Arc<dyn BeforeRequest>> = vec![
            Arc::new(move |_req: &mut crate::Request| -> Result<(), crate::BoxError> {
                first.lock().push(1);
                Ok(())
            }),
            Arc::new(move |_req: &mut crate::Request| -> Result<(), crate::BoxError> {
                second.lock().push(2);
                Ok(())
            }),
        ];
        let afters: Vec<Arc<dyn AfterResponse>> = vec![Arc::new(
            |_resp: &mut crate::Response| -> Result<(), crate::BoxError> { Ok(()) },
        )];

        let opts = build(vec![
            with_before(|_req: &mut crate::Request| -> Result<(), crate::BoxError> { Ok(()) }),
            with_before_hooks(befores),
            with_after_hooks(afters),
        ]);
        assert_eq!(opts.before.len(), 3);
        assert_eq!(opts.after.len(), 1);

        let mut req = crate::Request::new(
            http::Request::get("https://svc.local/")
                .body(Bytes::new())
                .unwrap(),
        );
        crate::middleware::run_before(&opts.before, &mut req)
            .await
            .unwrap();
        assert_eq!(*seen.lock(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_file_upload_envelope() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("LICENSE");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(b"MIT")
            .unwrap();

        let opts = build(vec![with_file(
            &File::new(&path, "license").extra("author", "test"),
        )]);

        let content_type = opts.headers()[CONTENT_TYPE].to_str().unwrap().to_owned();
        assert!(content_type.starts_with("multipart/form-data; boundary="));
        let body = String::from_utf8(body_of(&opts).await.to_vec()).unwrap();
        assert!(body.contains("name=\"license\"; filename=\"LICENSE\""));
        assert!(body.contains("name=\"author\"\r\n\r\ntest\r\n"));
    }

    #[test]
    fn test_missing_file_is_deferred() {
        let opts = build(vec![with_file(&File::new("/no/such/file.txt", "f"))]);
        let err = opts.error().unwrap();
        assert!(matches!(err, HttpError::OptionConfig(e) if e.is::<std::io::Error>()));
    }
}
