//! Tower layer that gates requests on a sliding rate window.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Request, StatusCode};
use axum::response::Response;
use serde::{Deserialize, Serialize};
use tower::{Layer, Service};
use tracing::{debug, error, instrument};

use super::client::ClientAddress;
use crate::ratelimit::{Admission, RatePolicy, RateWindow};
use crate::store::StoreError;

pub const HEADER_RATE_LIMIT_TOTAL: &str = "x-rate-limit-total";
pub const HEADER_RATE_LIMIT_REMAINING: &str = "x-rate-limit-remaining";
pub const HEADER_RATE_LIMIT_DURATION: &str = "x-rate-limit-duration";
pub const HEADER_RATE_LIMIT_FORWARDED_FOR: &str = "x-rate-limit-forwarded-for";
pub const HEADER_RATE_LIMIT_REMOTE_ADDR: &str = "x-rate-limit-remote-addr";

/// Body of a `429 Too Many Requests` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitExceeded {
    pub max_calls: u64,
    pub window_seconds: f64,
}

impl From<&RatePolicy> for LimitExceeded {
    fn from(policy: &RatePolicy) -> Self {
        Self {
            max_calls: policy.max_calls(),
            window_seconds: policy.window_seconds(),
        }
    }
}

/// Layer admitting requests through a [`RateWindow`].
///
/// All services produced by one layer share its window, so they share one
/// policy and one identifier space.
#[derive(Debug, Clone)]
pub struct AdmissionLayer {
    window: Arc<RateWindow>,
    trust_forwarded: bool,
}

impl AdmissionLayer {
    pub fn new(window: RateWindow) -> Self {
        Self {
            window: Arc::new(window),
            trust_forwarded: false,
        }
    }

    /// Key clients by a validated `X-Forwarded-For`/`X-Real-Ip` address
    /// instead of the connection address. Only enable behind a proxy that
    /// overwrites these headers.
    pub fn trust_forwarded_for(mut self, trust: bool) -> Self {
        self.trust_forwarded = trust;
        self
    }
}

impl<S> Layer<S> for AdmissionLayer {
    type Service = AdmissionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AdmissionService {
            inner,
            window: Arc::clone(&self.window),
            trust_forwarded: self.trust_forwarded,
        }
    }
}

/// Service produced by [`AdmissionLayer`].
#[derive(Debug, Clone)]
pub struct AdmissionService<S> {
    inner: S,
    window: Arc<RateWindow>,
    trust_forwarded: bool,
}

impl<S> Service<Request<Body>> for AdmissionService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let window = Arc::clone(&self.window);
        let trust_forwarded = self.trust_forwarded;
        // The clone may not be ready; keep the one that was polled.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let client = ClientAddress::from_request(&req);
            let identifier = client.identifier(req.uri().path(), trust_forwarded);

            let admission = match admit(&window, &identifier).await {
                Ok(admission) => admission,
                Err(e) => return Ok(store_error_response(&e)),
            };

            if !admission.allowed {
                return Ok(limit_exceeded_response(window.policy()));
            }

            let mut response = inner.call(req).await?;
            set_rate_headers(
                response.headers_mut(),
                window.policy(),
                admission.remaining,
                &client,
            );
            Ok(response)
        })
    }
}

#[instrument(level = "debug", skip(window))]
async fn admit(window: &RateWindow, identifier: &str) -> Result<Admission, StoreError> {
    let result = window.allowed(identifier).await;
    match &result {
        Ok(admission) if !admission.allowed => {
            debug!(identifier = %identifier, "Rejecting request over its rate limit");
        }
        Ok(_) => {}
        Err(e) => {
            error!(identifier = %identifier, error = %e, "Rate limit store unavailable");
        }
    }
    result
}

fn set_rate_headers(
    headers: &mut HeaderMap,
    policy: &RatePolicy,
    remaining: u64,
    client: &ClientAddress,
) {
    let values = [
        (HEADER_RATE_LIMIT_TOTAL, policy.max_calls().to_string()),
        (HEADER_RATE_LIMIT_REMAINING, remaining.to_string()),
        (
            HEADER_RATE_LIMIT_DURATION,
            format!("{:.0}s", policy.window_seconds()),
        ),
        (HEADER_RATE_LIMIT_FORWARDED_FOR, client.forwarded_raw()),
        (HEADER_RATE_LIMIT_REMOTE_ADDR, client.remote_raw()),
    ];

    for (name, value) in values {
        // Every value is numeric or an IP/socket address, so always valid.
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(HeaderName::from_static(name), value);
        }
    }
}

fn limit_exceeded_response(policy: &RatePolicy) -> Response {
    let body = serde_json::to_vec(&LimitExceeded::from(policy)).unwrap_or_default();

    let mut response = Response::new(Body::from(body));
    *response.status_mut() = StatusCode::TOO_MANY_REQUESTS;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

fn store_error_response(err: &StoreError) -> Response {
    let mut response = Response::new(Body::from(err.to_string()));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}
