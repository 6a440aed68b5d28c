//! Tower middleware that admits or throttles HTTP requests per client.

use crate::config::{AdmissionConfig, DEFAULT_REJECTION_MESSAGE};
use crate::error::ConfigError;
use crate::rate_limit::{BucketRegistry, Decision, ForwardedHeaders, KeyExtractor};
use crate::telemetry::{emit_best_effort, AdmissionEvent, NullSink};
use futures::future::BoxFuture;
use http::header::{HeaderValue, CONTENT_TYPE, RETRY_AFTER};
use http::{HeaderMap, Request, Response, StatusCode};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::task::JoinHandle;
use tower_layer::Layer;
use tower_service::Service;
use tracing::debug;

/// `X-RateLimit-Limit`: bucket capacity.
pub const X_RATELIMIT_LIMIT: &str = "x-ratelimit-limit";
/// `X-RateLimit-Remaining`: tokens left after this request.
pub const X_RATELIMIT_REMAINING: &str = "x-ratelimit-remaining";
/// `X-RateLimit-Reset`: unix seconds hint for the next token.
pub const X_RATELIMIT_RESET: &str = "x-ratelimit-reset";

const RETRY_AFTER_SECS: &str = "1";
const TEXT_PLAIN: &str = "text/plain; charset=utf-8";

/// Rate-limit headers attached to every response, admitted or throttled.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitHeaders {
    /// Bucket capacity.
    pub limit: f64,
    /// Tokens remaining after the decision.
    pub remaining: f64,
    /// Unix seconds, one second after the decision.
    pub reset: u64,
}

impl RateLimitHeaders {
    /// Write the three headers, replacing any the inner service set.
    ///
    /// ```
    /// use http::HeaderMap;
    /// use tollgate::RateLimitHeaders;
    ///
    /// let mut headers = HeaderMap::new();
    /// RateLimitHeaders { limit: 30.0, remaining: 28.5, reset: 1_700_000_001 }.apply(&mut headers);
    /// assert_eq!(headers["x-ratelimit-limit"], "30");
    /// assert_eq!(headers["x-ratelimit-remaining"], "28.50");
    /// assert_eq!(headers["x-ratelimit-reset"], "1700000001");
    /// ```
    pub fn apply(&self, headers: &mut HeaderMap) {
        if let Ok(value) = HeaderValue::try_from(format!("{:.0}", self.limit)) {
            headers.insert(X_RATELIMIT_LIMIT, value);
        }
        if let Ok(value) = HeaderValue::try_from(format!("{:.2}", self.remaining)) {
            headers.insert(X_RATELIMIT_REMAINING, value);
        }
        headers.insert(X_RATELIMIT_RESET, HeaderValue::from(self.reset));
    }
}

/// Layer applying per-client token-bucket admission to an HTTP service.
///
/// Every clone of the layer, and every service it produces, shares one [`BucketRegistry`].
///
/// ```
/// use std::convert::Infallible;
/// use std::sync::Arc;
/// use http::{Request, Response, StatusCode};
/// use tollgate::{AdmissionLayer, BucketRegistry, LimiterConfig};
/// use tower::{service_fn, Layer, ServiceExt};
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let registry = Arc::new(BucketRegistry::new(LimiterConfig::new(1.0, 0.0).unwrap()));
/// let layer = AdmissionLayer::new(registry);
/// let handler = service_fn(|_req: Request<()>| async {
///     Ok::<_, Infallible>(Response::new(String::from("ok")))
/// });
///
/// let req = || Request::builder().header("x-real-ip", "203.0.113.7").body(()).unwrap();
/// let first = layer.layer(handler.clone()).oneshot(req()).await.unwrap();
/// assert_eq!(first.status(), StatusCode::OK);
/// let second = layer.layer(handler).oneshot(req()).await.unwrap();
/// assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
/// # });
/// ```
#[derive(Clone, Debug)]
pub struct AdmissionLayer<K = ForwardedHeaders, T = NullSink> {
    registry: Arc<BucketRegistry>,
    extractor: K,
    sink: T,
    message: Arc<str>,
    sweep: Option<(Duration, Duration)>,
}

impl AdmissionLayer {
    /// Layer over `registry`, keying clients with [`ForwardedHeaders`] and no telemetry.
    pub fn new(registry: Arc<BucketRegistry>) -> Self {
        Self {
            registry,
            extractor: ForwardedHeaders::default(),
            sink: NullSink,
            message: Arc::from(DEFAULT_REJECTION_MESSAGE),
            sweep: None,
        }
    }

    /// Build a fresh registry and layer from validated settings.
    ///
    /// Idle eviction, when configured, is not started until
    /// [`spawn_sweeper`](Self::spawn_sweeper) is called from inside a tokio runtime.
    pub fn from_config(config: &AdmissionConfig) -> Result<Self, ConfigError> {
        let limiter = config.validate()?;
        let mut layer = Self::new(Arc::new(BucketRegistry::new(limiter)));
        layer.message = Arc::from(config.rejection_message.as_str());
        layer.sweep = config.sweep();
        Ok(layer)
    }
}

impl<K, T> AdmissionLayer<K, T> {
    /// Replace the client key policy.
    pub fn with_extractor<K2: KeyExtractor>(self, extractor: K2) -> AdmissionLayer<K2, T> {
        AdmissionLayer {
            registry: self.registry,
            extractor,
            sink: self.sink,
            message: self.message,
            sweep: self.sweep,
        }
    }

    /// Attach a telemetry sink receiving an [`AdmissionEvent`] per decision.
    pub fn with_sink<T2>(self, sink: T2) -> AdmissionLayer<K, T2>
    where
        T2: tower::Service<AdmissionEvent, Response = ()> + Clone + Send + 'static,
    {
        AdmissionLayer {
            registry: self.registry,
            extractor: self.extractor,
            sink,
            message: self.message,
            sweep: self.sweep,
        }
    }

    /// Body of throttled responses.
    pub fn with_rejection_message(mut self, message: impl Into<String>) -> Self {
        self.message = Arc::from(message.into());
        self
    }

    /// Evict buckets idle for `max_idle`, checking every `interval`.
    ///
    /// # Errors
    /// [`ConfigError::InvalidSweep`] if `interval` is zero.
    pub fn with_idle_eviction(
        mut self,
        interval: Duration,
        max_idle: Duration,
    ) -> Result<Self, ConfigError> {
        if interval.is_zero() {
            return Err(ConfigError::InvalidSweep {
                interval_secs: 0,
                ttl_secs: max_idle.as_secs(),
            });
        }
        self.sweep = Some((interval, max_idle));
        Ok(self)
    }

    /// The shared registry.
    pub fn registry(&self) -> &Arc<BucketRegistry> {
        &self.registry
    }
}

impl<K, T> AdmissionLayer<K, T>
where
    T: tower::Service<AdmissionEvent, Response = ()> + Clone + Send + 'static,
    T::Error: std::error::Error + Send + 'static,
    T::Future: Send + 'static,
{
    /// Start the idle sweeper if eviction is configured. Must be called within a tokio
    /// runtime. Evictions are reported to the layer's sink.
    pub fn spawn_sweeper(&self) -> Option<JoinHandle<()>> {
        let (interval, max_idle) = self.sweep?;
        // Settings were validated when stored, so the registry accepts them.
        self.registry.spawn_sweeper_with_sink(interval, max_idle, self.sink.clone()).ok()
    }
}

impl<S, K: Clone, T: Clone> Layer<S> for AdmissionLayer<K, T> {
    type Service = AdmissionService<S, K, T>;

    fn layer(&self, inner: S) -> Self::Service {
        AdmissionService {
            inner,
            registry: self.registry.clone(),
            extractor: self.extractor.clone(),
            sink: self.sink.clone(),
            message: self.message.clone(),
        }
    }
}

/// Middleware service produced by [`AdmissionLayer`].
///
/// Throttled requests are answered directly and never reach the inner service. Errors from
/// the inner service pass through unchanged.
#[derive(Clone, Debug)]
pub struct AdmissionService<S, K = ForwardedHeaders, T = NullSink> {
    inner: S,
    registry: Arc<BucketRegistry>,
    extractor: K,
    sink: T,
    message: Arc<str>,
}

impl<S, K, T> AdmissionService<S, K, T> {
    /// The shared registry.
    pub fn registry(&self) -> &Arc<BucketRegistry> {
        &self.registry
    }
}

impl<S, K, T, ReqBody, ResBody> Service<Request<ReqBody>> for AdmissionService<S, K, T>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    K: KeyExtractor,
    T: tower::Service<AdmissionEvent, Response = ()> + Clone + Send + 'static,
    T::Error: std::error::Error + Send + 'static,
    T::Future: Send + 'static,
    ResBody: From<String> + Send + 'static,
{
    type Response = Response<ResBody>;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let key = self.extractor.resolve_key(&req);
        let (bucket, created) = self.registry.get_or_insert(&key);
        let decision = bucket.try_consume();
        let headers = RateLimitHeaders {
            limit: bucket.capacity(),
            remaining: decision.remaining(),
            reset: (self.registry.clock().unix_time() + Duration::from_secs(1)).as_secs(),
        };
        drop(bucket);

        let sink = self.sink.clone();
        match decision {
            Decision::Allowed { remaining } => {
                debug!(target: "tollgate::admission", client = %key, remaining, "admitted");
                let created = created.then(|| AdmissionEvent::BucketCreated { key: key.clone() });
                let event = AdmissionEvent::Admitted { key, remaining };
                let fut = self.inner.call(req);
                Box::pin(async move {
                    report(sink, created, event).await;
                    let mut response = fut.await?;
                    headers.apply(response.headers_mut());
                    Ok(response)
                })
            }
            Decision::Denied { remaining, wait } => {
                debug!(
                    target: "tollgate::admission",
                    client = %key,
                    remaining,
                    wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                    "throttled"
                );
                let created = created.then(|| AdmissionEvent::BucketCreated { key: key.clone() });
                let event = AdmissionEvent::Throttled { key, remaining };
                let response = reject(&self.message, headers);
                Box::pin(async move {
                    report(sink, created, event).await;
                    Ok(response)
                })
            }
        }
    }
}

async fn report<T>(sink: T, created: Option<AdmissionEvent>, decision: AdmissionEvent)
where
    T: tower::Service<AdmissionEvent, Response = ()> + Clone + Send + 'static,
    T::Error: std::error::Error + Send + 'static,
    T::Future: Send + 'static,
{
    if let Some(created) = created {
        emit_best_effort(sink.clone(), created).await;
    }
    emit_best_effort(sink, decision).await;
}

fn reject<B: From<String>>(message: &str, headers: RateLimitHeaders) -> Response<B> {
    let mut response = Response::new(B::from(message.to_string()));
    *response.status_mut() = StatusCode::TOO_MANY_REQUESTS;
    let map = response.headers_mut();
    headers.apply(map);
    map.insert(RETRY_AFTER, HeaderValue::from_static(RETRY_AFTER_SECS));
    map.insert(CONTENT_TYPE, HeaderValue::from_static(TEXT_PLAIN));
    response
}
