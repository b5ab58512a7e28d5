use std::future::ready;
use std::time::Instant;

use axum::{
    body::Body, extract::MatchedPath, http::Request, middleware::Next, response::IntoResponse,
    routing::get, Router,
};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

use crate::health::HealthRegistry;

const HTTP_REQUESTS: &str = "http_requests_total";
const HTTP_REQUEST_TIME: &str = "http_request_duration_ms";

/// Serve the status router until the listener fails.
pub async fn serve(router: Router, bind: &str) -> Result<(), std::io::Error> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(bind, "serving status and metrics routes");
    axum::serve(listener, router).await
}

/// Index, readiness and liveness routes shared by every service.
pub fn status_router(name: &'static str, liveness: HealthRegistry) -> Router {
    Router::new()
        .route("/", get(move || ready(name)))
        .route("/_readiness", get(move || ready(name)))
        .route("/_liveness", get(move || ready(liveness.get_status())))
}

/// Add the prometheus endpoint and middleware to a router, should be called last.
pub fn setup_metrics_routes(router: Router) -> Result<Router, BuildError> {
    let recorder_handle = setup_metrics_recorder()?;

    Ok(router
        .route(
            "/metrics",
            get(move || ready(recorder_handle.render())),
        )
        .layer(axum::middleware::from_fn(track_metrics)))
}

pub fn setup_metrics_recorder() -> Result<PrometheusHandle, BuildError> {
    // Milliseconds: every histogram we record is a latency.
    const BUCKETS: &[f64] = &[
        1.0, 5.0, 10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2000.0, 5000.0, 10000.0,
    ];

    PrometheusBuilder::new()
        .set_buckets(BUCKETS)?
        .install_recorder()
}

/// Counts and times every request by matched route and status.
async fn track_metrics(req: Request<Body>, next: Next) -> impl IntoResponse {
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| req.uri().path().to_owned(), |p| p.as_str().to_owned());
    let mut labels = vec![
        ("method".to_string(), req.method().to_string()),
        ("path".to_string(), path),
    ];
    let timing = timing_guard(HTTP_REQUEST_TIME, &labels);

    let response = next.run(req).await;

    let status = response.status().as_u16().to_string();
    timing.label("status", &status).fin();
    labels.push(("status".to_string(), status));
    inc(HTTP_REQUESTS, &labels, 1);

    response
}

pub fn inc(name: &'static str, labels: &[(String, String)], value: u64) {
    metrics::counter!(name, labels).increment(value);
}

/// Records the time between creation and drop, in milliseconds, as a histogram entry.
pub struct TimingGuard {
    name: &'static str,
    labels: Vec<(String, String)>,
    start: Instant,
}

pub fn timing_guard(name: &'static str, labels: &[(String, String)]) -> TimingGuard {
    TimingGuard {
        name,
        labels: labels.to_vec(),
        start: Instant::now(),
    }
}

impl TimingGuard {
    pub fn label(mut self, key: &str, value: &str) -> Self {
        self.labels.push((key.to_string(), value.to_string()));
        self
    }

    pub fn fin(self) {}
}

impl Drop for TimingGuard {
    fn drop(&mut self) {
        metrics::histogram!(self.name, &self.labels).record(self.start.elapsed().as_millis() as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_serve_fails_on_unusable_bind() {
        assert!(serve(Router::new(), "not an address").await.is_err());
    }

    #[tokio::test]
    async fn test_tracked_routes_still_answer() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let router = status_router("card test", HealthRegistry::new("liveness"))
            .layer(axum::middleware::from_fn(track_metrics));
        tokio::spawn(async move { axum::serve(listener, router).await });

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /_readiness HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();

        assert!(response.starts_with("HTTP/1.1 200"), "{response}");
        assert!(response.ends_with("card test"), "{response}");
    }
}
