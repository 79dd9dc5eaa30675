use crate::builder::HttpClientBuilder;
use crate::config::{HttpClientConfig, TransportSecurity};
use crate::error::{HttpError, InvalidUriKind};
use crate::jar::CookieJar;
use crate::response::ResponseBody;
use bytes::Bytes;
use http::{Request, Response, Uri};
use http_body_util::Full;
use std::sync::{Arc, OnceLock};
use tower::util::BoxCloneSyncService;
use tower::{Service, ServiceExt};

/// Type-erased tower service behind an [`HttpClient`].
pub type TransportService =
    BoxCloneSyncService<Request<Full<Bytes>>, Response<ResponseBody>, HttpError>;

static DEFAULT_CLIENT: OnceLock<HttpClient> = OnceLock::new();

/// Transport handle used by [`Requests`](crate::Requests)
///
/// Wraps a tower service stack (hyper-util legacy client + rustls, timeout,
/// user agent, decompression, redirects) together with the cookie jar that
/// session-enabled calls share. Every HTTP status comes back as `Ok(Response)`.
///
/// # Thread Safety
///
/// `HttpClient` is `Clone + Send + Sync`. Cloning is cheap: clones share the
/// connection pool and the cookie jar.
///
/// # Example
///
/// ```ignore
/// let client = HttpClient::builder()
///     .timeout(Duration::from_secs(5))
///     .build()?;
/// let api = Requests::new(vec![with_client(client)]);
/// ```
#[derive(Clone)]
pub struct HttpClient {
    pub(crate) service: TransportService,
    pub(crate) max_body_size: usize,
    pub(crate) transport_security: TransportSecurity,
    pub(crate) cookie_jar: Arc<CookieJar>,
}

impl HttpClient {
    /// Create a new HTTP client with default configuration
    ///
    /// # Errors
    /// Returns an error if TLS initialization fails
    pub fn new() -> Result<Self, HttpError> {
        HttpClientBuilder::new().build()
    }

    /// Create a builder for configuring the HTTP client
    #[must_use]
    pub fn builder() -> HttpClientBuilder {
        HttpClientBuilder::new()
    }

    /// Adapt any compatible tower service into a transport.
    ///
    /// URL schemes are not restricted: the service decides what it can reach.
    /// The body limit is the default one from [`HttpClientConfig`].
    #[must_use]
    pub fn from_service<S>(service: S) -> Self
    where
        S: Service<Request<Full<Bytes>>, Response = Response<ResponseBody>, Error = HttpError>
            + Clone
            + Send
            + Sync
            + 'static,
        S::Future: Send + 'static,
    {
        Self {
            service: BoxCloneSyncService::new(service),
            max_body_size: HttpClientConfig::default().max_body_size,
            transport_security: TransportSecurity::AllowInsecureHttp,
            cookie_jar: Arc::default(),
        }
    }

    /// Override the response body limit.
    #[must_use]
    pub fn with_max_body_size(mut self, max_body_size: usize) -> Self {
        self.max_body_size = max_body_size;
        self
    }

    /// Jar shared by session-enabled calls on this transport.
    #[must_use]
    pub fn cookie_jar(&self) -> &Arc<CookieJar> {
        &self.cookie_jar
    }

    #[must_use]
    pub fn max_body_size(&self) -> usize {
        self.max_body_size
    }

    /// Send one request through the transport stack, without hooks, retries
    /// or cookies.
    ///
    /// # Errors
    /// Returns `HttpError` on transport, TLS or timeout failures.
    pub async fn send(&self, req: Request<Full<Bytes>>) -> Result<Response<ResponseBody>, HttpError> {
        self.service.clone().oneshot(req).await
    }

    /// Parse `url` and check its scheme against the transport security mode.
    ///
    /// # Errors
    /// Returns `HttpError::InvalidUri` for malformed or relative URLs and
    /// `HttpError::InvalidScheme` for schemes this transport refuses.
    pub(crate) fn validate_url(&self, url: &str) -> Result<Uri, HttpError> {
        let uri: Uri = url
            .parse()
            .map_err(|e: http::uri::InvalidUri| HttpError::InvalidUri {
                url: url.to_owned(),
                kind: InvalidUriKind::ParseError,
                reason: e.to_string(),
            })?;

        if uri.authority().is_none() {
            return Err(HttpError::InvalidUri {
                url: url.to_owned(),
                kind: InvalidUriKind::MissingAuthority,
                reason: "missing host/authority".to_owned(),
            });
        }

        match uri.scheme_str() {
            Some("https") => Ok(uri),
            Some("http") => match self.transport_security {
                TransportSecurity::AllowInsecureHttp => Ok(uri),
                TransportSecurity::TlsOnly => Err(HttpError::InvalidScheme {
                    scheme: "http".to_owned(),
                    reason: "HTTPS required (transport security is TlsOnly)".to_owned(),
                }),
            },
            Some(scheme) => Err(HttpError::InvalidScheme {
                scheme: scheme.to_owned(),
                reason: "only http:// and https:// schemes are supported".to_owned(),
            }),
            None => Err(HttpError::InvalidUri {
                url: url.to_owned(),
                kind: InvalidUriKind::MissingScheme,
                reason: "missing scheme".to_owned(),
            }),
        }
    }
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("max_body_size", &self.max_body_size)
            .field("transport_security", &self.transport_security)
            .field("cookies", &self.cookie_jar.len())
            .finish_non_exhaustive()
    }
}

/// Process-wide transport used when no client is configured.
///
/// Built on first use; a failed build is retried by the next call.
pub fn default_http_client() -> Result<HttpClient, HttpError> {
    if let Some(client) = DEFAULT_CLIENT.get() {
        return Ok(client.clone());
    }
    let client = HttpClient::new()?;
    Ok(DEFAULT_CLIENT.get_or_init(|| client).clone())
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use http::StatusCode;
    use http_body_util::BodyExt;

    fn echo_client() -> HttpClient {
        HttpClient::from_service(tower::service_fn(|req: Request<Full<Bytes>>| async move {
            let body: ResponseBody = Full::new(Bytes::from(req.uri().to_string()))
                .map_err(|e| -> Box<dyn std::error::Error + Send + Sync> { Box::new(e) })
                .boxed();
            Ok::<_, HttpError>(Response::builder().status(StatusCode::OK).body(body).unwrap())
        }))
    }

    fn tls_only() -> HttpClient {
        let mut client = echo_client();
        client.transport_security = TransportSecurity::TlsOnly;
        client
    }

    #[tokio::test]
    async fn test_from_service_send() {
        let client = echo_client();
        let req = Request::get("http://svc.local/ping")
            .body(Full::new(Bytes::new()))
            .unwrap();

        let resp = client.send(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, Bytes::from_static(b"http://svc.local/ping"));
    }

    #[test]
    fn test_clones_share_cookie_jar() {
        let client = echo_client();
        let clone = client.clone();
        assert!(Arc::ptr_eq(client.cookie_jar(), clone.cookie_jar()));
        assert_eq!(client.with_max_body_size(7).max_body_size(), 7);
    }

    #[test]
    fn test_validate_url_accepts_https() {
        let uri = tls_only().validate_url("https://example.com/a?b=1").unwrap();
        assert_eq!(uri.host(), Some("example.com"));
        assert_eq!(uri.query(), Some("b=1"));
    }

    #[test]
    fn test_validate_url_rejects_http_when_tls_only() {
        let err = tls_only().validate_url("http://example.com/").unwrap_err();
        assert!(matches!(err, HttpError::InvalidScheme { ref scheme, .. } if scheme == "http"));
        assert!(echo_client().validate_url("http://example.com/").is_ok());
    }

    #[test]
    fn test_validate_url_rejects_other_schemes() {
        let err = echo_client().validate_url("ftp://example.com/file").unwrap_err();
        assert!(matches!(err, HttpError::InvalidScheme { ref scheme, .. } if scheme == "ftp"));
    }

    #[test]
    fn test_validate_url_relative_and_malformed() {
        let err = echo_client().validate_url("/just/a/path").unwrap_err();
        assert!(matches!(
            err,
            HttpError::InvalidUri {
                kind: InvalidUriKind::MissingAuthority,
                ..
            }
        ));

        let err = echo_client().validate_url("http://exa mple.com/").unwrap_err();
        assert!(matches!(
            err,
            HttpError::InvalidUri {
                kind: InvalidUriKind::ParseError,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_default_http_client_is_shared() {
        let first = default_http_client().unwrap();
        let second = default_http_client().unwrap();
        assert!(Arc::ptr_eq(first.cookie_jar(), second.cookie_jar()));
        assert_eq!(first.transport_security, TransportSecurity::TlsOnly);
    }
}
