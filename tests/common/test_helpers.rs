use http::{Request, Response};
use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tollgate::Clock;

/// Unix seconds reported by [`SteppedClock`] at its origin.
pub const EPOCH_SECS: u64 = 1_700_000_000;

/// Clock that only moves when told to.
#[derive(Debug, Clone, Default)]
pub struct SteppedClock {
    nanos: Arc<AtomicU64>,
}

impl SteppedClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        self.nanos.fetch_add(by.as_nanos() as u64, Ordering::SeqCst);
    }
}

impl Clock for SteppedClock {
    fn now_nanos(&self) -> u64 {
        self.nanos.load(Ordering::SeqCst)
    }

    fn unix_time(&self) -> Duration {
        Duration::from_secs(EPOCH_SECS) + Duration::from_nanos(self.now_nanos())
    }
}

pub fn request_from(ip: &str) -> Request<()> {
    Request::builder()
        .uri("/tasks")
        .header("x-forwarded-for", ip)
        .body(())
        .expect("valid request")
}

pub async fn ok(_req: Request<()>) -> Result<Response<String>, Infallible> {
    Ok(Response::new("ok".to_string()))
}
