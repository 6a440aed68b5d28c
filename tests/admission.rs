mod common;

use common::test_helpers::{ok, request_from, SteppedClock, EPOCH_SECS};
use http::{Request, Response, StatusCode};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tollgate::telemetry::{AdmissionEvent, MemorySink};
use tollgate::{AdmissionConfig, AdmissionLayer, BucketRegistry, LimiterConfig};
use tower::{service_fn, Layer, Service, ServiceBuilder, ServiceExt};

fn default_gate(clock: &SteppedClock) -> AdmissionLayer {
    let registry = BucketRegistry::new(LimiterConfig::default()).with_clock(clock.clone());
    AdmissionLayer::new(Arc::new(registry))
}

fn header<'a>(res: &'a Response<String>, name: &str) -> &'a str {
    res.headers().get(name).and_then(|v| v.to_str().ok()).unwrap_or_default()
}

#[tokio::test]
async fn thirty_requests_then_throttle_then_refill() {
    let clock = SteppedClock::new();
    let mut svc = ServiceBuilder::new().layer(default_gate(&clock)).service_fn(ok);

    for i in 0..30u32 {
        let res = svc.ready().await.unwrap().call(request_from("203.0.113.7")).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK, "request {} should pass", i + 1);
        assert_eq!(header(&res, "x-ratelimit-limit"), "30");
        assert_eq!(header(&res, "x-ratelimit-remaining"), format!("{:.2}", f64::from(29 - i)));
        assert_eq!(header(&res, "x-ratelimit-reset"), (EPOCH_SECS + 1).to_string());
        assert!(res.headers().get("retry-after").is_none());
        assert_eq!(res.body(), "ok");
    }

    let res = svc.ready().await.unwrap().call(request_from("203.0.113.7")).await.unwrap();
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(header(&res, "retry-after"), "1");
    assert_eq!(header(&res, "x-ratelimit-remaining"), "0.00");
    assert_eq!(header(&res, "x-ratelimit-limit"), "30");
    assert_eq!(header(&res, "content-type"), "text/plain; charset=utf-8");
    assert_eq!(res.body(), "Rate limit exceeded. Please try again later.");

    clock.advance(Duration::from_secs(2));
    let res = svc.ready().await.unwrap().call(request_from("203.0.113.7")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(header(&res, "x-ratelimit-remaining"), "0.00");
    assert_eq!(header(&res, "x-ratelimit-reset"), (EPOCH_SECS + 3).to_string());
}

#[tokio::test]
async fn one_second_is_not_enough_at_half_a_token_per_second() {
    let clock = SteppedClock::new();
    let mut svc = ServiceBuilder::new().layer(default_gate(&clock)).service_fn(ok);
    for _ in 0..30 {
        svc.ready().await.unwrap().call(request_from("a")).await.unwrap();
    }

    clock.advance(Duration::from_secs(1));
    let res = svc.ready().await.unwrap().call(request_from("a")).await.unwrap();
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(header(&res, "x-ratelimit-remaining"), "0.50");
}

#[tokio::test]
async fn throttled_request_never_reaches_handler() {
    let calls = Arc::new(AtomicUsize::new(0));
    let handler = {
        let calls = calls.clone();
        service_fn(move |req: Request<()>| {
            calls.fetch_add(1, Ordering::SeqCst);
            ok(req)
        })
    };
    let clock = SteppedClock::new();
    let registry = BucketRegistry::new(LimiterConfig::new(2.0, 0.5).unwrap()).with_clock(clock);
    let mut svc = AdmissionLayer::new(Arc::new(registry)).layer(handler);

    let mut statuses = Vec::new();
    for _ in 0..5 {
        let res = svc.ready().await.unwrap().call(request_from("a")).await.unwrap();
        statuses.push(res.status().as_u16());
    }
    assert_eq!(statuses, vec![200, 200, 429, 429, 429]);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn clients_are_limited_independently() {
    let clock = SteppedClock::new();
    let layer = default_gate(&clock);
    let mut svc = ServiceBuilder::new().layer(layer.clone()).service_fn(ok);

    for _ in 0..31 {
        svc.ready().await.unwrap().call(request_from("198.51.100.1")).await.unwrap();
    }
    let blocked = svc.ready().await.unwrap().call(request_from("198.51.100.1")).await.unwrap();
    let fresh = svc.ready().await.unwrap().call(request_from("198.51.100.2")).await.unwrap();

    assert_eq!(blocked.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(fresh.status(), StatusCode::OK);
    assert_eq!(header(&fresh, "x-ratelimit-remaining"), "29.00");
    assert_eq!(layer.registry().len(), 2);
}

#[tokio::test]
async fn clones_of_the_layer_share_quota() {
    let clock = SteppedClock::new();
    let registry = BucketRegistry::new(LimiterConfig::new(1.0, 0.0).unwrap()).with_clock(clock);
    let layer = AdmissionLayer::new(Arc::new(registry));

    let first = layer.clone().layer(service_fn(ok)).oneshot(request_from("a")).await.unwrap();
    let second = layer.layer(service_fn(ok)).oneshot(request_from("a")).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn real_ip_and_peer_address_are_fallback_keys() {
    let clock = SteppedClock::new();
    let registry = BucketRegistry::new(LimiterConfig::new(1.0, 0.0).unwrap()).with_clock(clock);
    let layer = AdmissionLayer::new(Arc::new(registry));

    let via_real_ip = Request::builder().header("x-real-ip", "192.0.2.1").body(()).unwrap();
    let mut via_peer = Request::new(());
    via_peer.extensions_mut().insert("192.0.2.50:41000".parse::<SocketAddr>().unwrap());
    let anonymous = Request::new(());

    for req in [via_real_ip, via_peer, anonymous] {
        let res = layer.layer(service_fn(ok)).oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    let keys: Vec<String> = layer.registry().snapshot().into_iter().map(|(k, _)| k).collect();
    assert_eq!(keys, vec!["192.0.2.1", "192.0.2.50:41000", "unknown"]);
}

#[tokio::test]
async fn inner_errors_pass_through_unchanged() {
    let failing = service_fn(|_req: Request<()>| async {
        let err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "upstream gone");
        Err::<Response<String>, _>(err)
    });
    let clock = SteppedClock::new();
    let svc = default_gate(&clock).layer(failing);

    let err = svc.oneshot(request_from("a")).await.expect_err("inner error");
    assert_eq!(err.kind(), std::io::ErrorKind::BrokenPipe);
    assert_eq!(err.to_string(), "upstream gone");
}

#[tokio::test]
async fn layer_from_overlaid_config() {
    let config = AdmissionConfig::default()
        .overlay(|name| match name {
            "TOLLGATE_CAPACITY" => Some("2".into()),
            "TOLLGATE_REFILL_RATE" => Some("0".into()),
            "TOLLGATE_REJECTION_MESSAGE" => Some("quota exhausted".into()),
            _ => None,
        })
        .unwrap();
    let layer = AdmissionLayer::from_config(&config).unwrap();
    let mut svc = ServiceBuilder::new().layer(layer).service_fn(ok);

    let mut last = None;
    for _ in 0..3 {
        last = Some(svc.ready().await.unwrap().call(request_from("a")).await.unwrap());
    }
    let last = last.unwrap();
    assert_eq!(last.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(header(&last, "x-ratelimit-limit"), "2");
    assert_eq!(last.body(), "quota exhausted");
}

#[tokio::test]
async fn telemetry_sees_every_decision() {
    let clock = SteppedClock::new();
    let registry = BucketRegistry::new(LimiterConfig::new(1.0, 0.0).unwrap()).with_clock(clock);
    let sink = MemorySink::new();
    let layer = AdmissionLayer::new(Arc::new(registry)).with_sink(sink.clone());

    for ip in ["a", "a", "b"] {
        layer.layer(service_fn(ok)).oneshot(request_from(ip)).await.unwrap();
    }

    let kinds: Vec<&str> = sink.events().iter().map(AdmissionEvent::kind).collect();
    assert_eq!(
        kinds,
        vec!["bucket_created", "admitted", "throttled", "bucket_created", "admitted"]
    );
}
