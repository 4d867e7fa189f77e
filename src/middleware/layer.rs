//! Tower layer for admission control in Axum.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::extract::ConnectInfo;
use http::{HeaderMap, HeaderName, HeaderValue, Request, Response, StatusCode, header};
use tower::{Layer, Service};

use crate::decision::{Decision, Rejection};
use crate::headers::RateLimitHeaders;
use crate::key::RequestInfo;
use crate::limiter::RateLimiter;

/// Authenticated subject attached to a request by an upstream layer.
///
/// [`SubjectKey`](crate::key::SubjectKey) reads it through [`RequestInfo`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject(pub String);

/// Tower layer for admission control.
#[derive(Debug, Clone)]
pub struct RateLimitLayer {
    limiter: Arc<RateLimiter<RequestInfo>>,
}

impl RateLimitLayer {
    /// Create a new layer running `limiter`.
    pub fn new(limiter: RateLimiter<RequestInfo>) -> Self {
        Self {
            limiter: Arc::new(limiter),
        }
    }
}

impl<Inner> Layer<Inner> for RateLimitLayer {
    type Service = RateLimitService<Inner>;

    fn layer(&self, inner: Inner) -> Self::Service {
        RateLimitService {
            inner,
            limiter: self.limiter.clone(),
        }
    }
}

/// The admission control service.
#[derive(Debug, Clone)]
pub struct RateLimitService<Inner> {
    inner: Inner,
    limiter: Arc<RateLimiter<RequestInfo>>,
}

/// Build the request context the key strategies read from.
///
/// The client address is the connection peer when `ConnectInfo` is
/// available, otherwise the first `X-Forwarded-For` entry or `X-Real-IP`.
pub fn request_info<B>(request: &Request<B>) -> RequestInfo {
    let client_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .or_else(|| forwarded_addr(request.headers()))
        .unwrap_or_default();

    RequestInfo {
        client_addr,
        path: request.uri().path().to_string(),
        subject: request
            .extensions()
            .get::<Subject>()
            .map(|Subject(subject)| subject.clone()),
    }
}

fn forwarded_addr(headers: &HeaderMap) -> Option<String> {
    let header_str = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    if let Some(first) = header_str("x-forwarded-for").and_then(|v| v.split(',').next()) {
        let first = first.trim();
        if !first.is_empty() {
            return Some(first.to_string());
        }
    }

    header_str("x-real-ip")
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl<Inner> Service<Request<Body>> for RateLimitService<Inner>
where
    Inner: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    Inner::Future: Send,
{
    type Response = Response<Body>;
    type Error = Inner::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let limiter = self.limiter.clone();
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let info = request_info(&request);
            let (allowed, headers, rejection) = limiter.check(&info).await.into_parts();

            if allowed {
                let mut response = inner.call(request).await?;
                apply_headers(response.headers_mut(), &headers);
                Ok(response)
            } else {
                Ok(rejected_response(&headers, rejection.unwrap_or_else(Rejection::fallback)))
            }
        })
    }
}

fn apply_headers(target: &mut HeaderMap, headers: &RateLimitHeaders) {
    for (name, value) in headers.to_vec() {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            target.insert(name, value);
        }
    }
}

/// Create a 429 Too Many Requests response.
fn rejected_response(headers: &RateLimitHeaders, rejection: Rejection) -> Response<Body> {
    let mut response = Response::new(Body::from(rejection.to_json()));
    *response.status_mut() = StatusCode::TOO_MANY_REQUESTS;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    apply_headers(response.headers_mut(), headers);
    response
}

/// Render a decision as a response without running a handler.
///
/// Allowed decisions produce an empty 200 carrying the quota headers.
pub fn decision_response(decision: Decision) -> Response<Body> {
    let (allowed, headers, rejection) = decision.into_parts();
    if allowed {
        let mut response = Response::new(Body::empty());
        apply_headers(response.headers_mut(), &headers);
        response
    } else {
        rejected_response(&headers, rejection.unwrap_or_else(Rejection::fallback))
    }
}
