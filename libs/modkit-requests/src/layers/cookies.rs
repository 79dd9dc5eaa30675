use crate::error::HttpError;
use crate::jar::CookieJar;
use crate::response::ResponseBody;
use bytes::Bytes;
use http::{Request, Response};
use http_body_util::Full;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};

/// Tower layer that sends cookies from a [`CookieJar`] and stores the ones a
/// response sets.
///
/// Sits outside the retry layer, so every attempt of a call shares the same
/// `Cookie` header and only the final response feeds the jar.
#[derive(Clone)]
pub struct CookieLayer {
    jar: Arc<CookieJar>,
}

impl CookieLayer {
    #[must_use]
    pub fn new(jar: Arc<CookieJar>) -> Self {
        Self { jar }
    }
}

impl<S> Layer<S> for CookieLayer {
    type Service = CookieService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CookieService {
            inner,
            jar: Arc::clone(&self.jar),
        }
    }
}

#[derive(Clone)]
pub struct CookieService<S> {
    inner: S,
    jar: Arc<CookieJar>,
}

impl<S> Service<Request<Full<Bytes>>> for CookieService<S>
where
    S: Service<Request<Full<Bytes>>, Response = Response<ResponseBody>, Error = HttpError>,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = HttpError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<Full<Bytes>>) -> Self::Future {
        let uri = req.uri().clone();
        self.jar.apply_to(&uri, req.headers_mut());

        let jar = Arc::clone(&self.jar);
        let fut = self.inner.call(req);
        Box::pin(async move {
            let resp = fut.await?;
            jar.store_response_cookies(&uri, resp.headers());
            Ok(resp)
        })
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use http::header::{COOKIE, SET_COOKIE};
    use http::{HeaderValue, StatusCode};
    use http_body_util::BodyExt;
    use std::sync::Mutex;
    use tower::ServiceExt;

    fn empty_body() -> ResponseBody {
        Full::new(Bytes::new())
            .map_err(|e| -> Box<dyn std::error::Error + Send + Sync> { Box::new(e) })
            .boxed()
    }

    fn request(uri: &str) -> Request<Full<Bytes>> {
        Request::builder()
            .uri(uri)
            .body(Full::new(Bytes::new()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_cookies_stored_then_sent() {
        let jar = Arc::new(CookieJar::new());
        let sent = Arc::new(Mutex::new(Vec::new()));
        let recorder = Arc::clone(&sent);
        let inner = tower::service_fn(move |req: Request<Full<Bytes>>| {
            recorder
                .lock()
                .unwrap()
                .push(req.headers().get(COOKIE).cloned());
            async {
                Ok::<_, HttpError>(
                    Response::builder()
                        .status(StatusCode::OK)
                        .header(SET_COOKIE, "session=s1; Path=/")
                        .body(empty_body())
                        .unwrap(),
                )
            }
        });
        let service = CookieLayer::new(Arc::clone(&jar)).layer(inner);

        service
            .clone()
            .oneshot(request("http://localhost/login"))
            .await
            .unwrap();
        service
            .oneshot(request("http://localhost/profile"))
            .await
            .unwrap();

        assert_eq!(
            *sent.lock().unwrap(),
            vec![None, Some(HeaderValue::from_static("session=s1"))]
        );
        assert_eq!(jar.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_call_stores_nothing() {
        let jar = Arc::new(CookieJar::new());
        let inner = tower::service_fn(|_req: Request<Full<Bytes>>| async {
            Err::<Response<ResponseBody>, _>(HttpError::Transport("down".into()))
        });
        let service = CookieLayer::new(Arc::clone(&jar)).layer(inner);

        let err = service.oneshot(request("http://localhost/")).await.unwrap_err();
        assert!(matches!(err, HttpError::Transport(_)));
        assert!(jar.is_empty());
    }
}
