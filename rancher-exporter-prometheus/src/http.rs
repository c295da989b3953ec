//! HTTP server for the liveness and Prometheus metrics endpoints.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::collector::SnapshotCollector;
use crate::config::RESERVED_PATHS;
use crate::registry::SharedRegistry;
use crate::scrape::refresh;

/// Body of the liveness endpoint.
pub const LIVENESS_BODY: &str = "Rancher Prometheus Exporter";

/// Content type of the exposition format.
pub const METRICS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// Where the metrics endpoint gets its data.
#[derive(Clone)]
pub enum ScrapeMode {
    /// Collect on every scrape.
    OnScrape(Arc<SnapshotCollector>),
    /// Render what the background refresher last projected.
    Cached,
}

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    registry: SharedRegistry,
    mode: ScrapeMode,
}

/// Create the HTTP router.
pub fn create_router(registry: SharedRegistry, mode: ScrapeMode, metrics_path: &str) -> Router {
    let state = AppState { registry, mode };

    Router::new()
        .route("/", get(root_handler))
        .route(metrics_path, get(metrics_handler))
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Handler for the metrics endpoint.
///
/// Collection failures answer 500 with a generic message; details stay in the logs.
async fn metrics_handler(State(state): State<AppState>) -> Response {
    if let ScrapeMode::OnScrape(collector) = &state.mode
        && let Err(e) = refresh(collector, &state.registry).await
    {
        let body = if e.is_timeout() {
            "Timed out collecting the data count\n"
        } else {
            "Failed to get the data count\n"
        };
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", TEXT_CONTENT_TYPE)],
            body,
        )
            .into_response();
    }

    let body = state.registry.render();

    (
        StatusCode::OK,
        [("content-type", METRICS_CONTENT_TYPE)],
        body,
    )
        .into_response()
}

/// Handler for the / endpoint.
async fn root_handler() -> Response {
    (StatusCode::OK, LIVENESS_BODY).into_response()
}

/// Handler for the /health endpoint.
async fn health_handler() -> Response {
    (StatusCode::OK, "healthy\n").into_response()
}

/// Handler for the /ready endpoint.
async fn ready_handler(State(state): State<AppState>) -> Response {
    // Ready once a snapshot has been projected
    if state.registry.has_data() {
        (StatusCode::OK, "ready\n").into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            "not ready - no inventory collected yet\n",
        )
            .into_response()
    }
}

/// HTTP server bound to its listen address.
pub struct HttpServer {
    router: Router,
    listener: TcpListener,
    metrics_path: String,
}

impl HttpServer {
    /// Bind the listen address.
    ///
    /// Binding happens up front so the caller can fail startup on error.
    pub async fn bind(
        registry: SharedRegistry,
        mode: ScrapeMode,
        listen_addr: SocketAddr,
        metrics_path: String,
    ) -> anyhow::Result<Self> {
        if RESERVED_PATHS.contains(&metrics_path.as_str()) {
            anyhow::bail!("Metrics path {} collides with a fixed route", metrics_path);
        }
        let router = create_router(registry, mode, &metrics_path);

        let listener = TcpListener::bind(listen_addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", listen_addr, e))?;

        Ok(Self {
            router,
            listener,
            metrics_path,
        })
    }

    /// Address actually bound (useful with port 0).
    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Run the HTTP server until the shutdown signal is received.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        info!(
            addr = %self.local_addr()?,
            path = %self.metrics_path,
            "HTTP server listening"
        );

        // Run server with graceful shutdown
        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(async move {
                // Wait for shutdown signal
                loop {
                    if shutdown.changed().await.is_err() {
                        break;
                    }
                    if *shutdown.borrow() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
            .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))?;

        info!("HTTP server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{InventoryClient, InventoryRecord, UpstreamError};
    use crate::config::CollectionConfig;
    use crate::registry::MetricRegistry;
    use async_trait::async_trait;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use rancher_exporter_common::{ResourceKind, Snapshot};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tower::ServiceExt;

    struct StaticClient {
        fail: bool,
        delay: Duration,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl InventoryClient for StaticClient {
        async fn list_all(&self, kind: ResourceKind) -> Result<Vec<InventoryRecord>, UpstreamError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail {
                return Err(UpstreamError::Protocol("token-secret leaked?".to_string()));
            }
            Ok(vec![InventoryRecord::new(format!("{kind}-1"))])
        }
    }

    fn on_scrape(fail: bool) -> (Arc<StaticClient>, ScrapeMode) {
        let client = Arc::new(StaticClient {
            fail,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        });
        let collector = SnapshotCollector::new(client.clone(), &CollectionConfig::default());
        (client, ScrapeMode::OnScrape(Arc::new(collector)))
    }

    async fn body_string(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_root_endpoint() {
        let (client, mode) = on_scrape(true);
        let router = create_router(Arc::new(MetricRegistry::default()), mode, "/metrics");

        let response = router
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, LIVENESS_BODY);
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let (_, mode) = on_scrape(false);
        let router = create_router(Arc::new(MetricRegistry::default()), mode, "/metrics");

        let response = router
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers().get("content-type").unwrap();
        assert_eq!(content_type.to_str().unwrap(), METRICS_CONTENT_TYPE);

        let body = body_string(response).await;
        assert!(body.contains("rancher_cluster_count 1\n"));
        assert!(body.contains("rancher_user_count 1\n"));
    }

    #[tokio::test]
    async fn test_metrics_endpoint_failure_is_generic() {
        let (_, mode) = on_scrape(true);
        let registry = Arc::new(MetricRegistry::default());
        let router = create_router(registry.clone(), mode, "/metrics");

        let response = router
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_string(response).await;
        assert_eq!(body, "Failed to get the data count\n");
        assert!(!registry.has_data());
    }

    #[tokio::test]
    async fn test_metrics_endpoint_timeout_message() {
        let client = Arc::new(StaticClient {
            fail: false,
            delay: Duration::from_secs(5),
            calls: AtomicUsize::new(0),
        });
        let collector = SnapshotCollector::new(client, &CollectionConfig::default())
            .with_timeout(Duration::from_millis(50));
        let registry = Arc::new(MetricRegistry::default());
        let router = create_router(
            registry.clone(),
            ScrapeMode::OnScrape(Arc::new(collector)),
            "/metrics",
        );

        let response = router
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_string(response).await, "Timed out collecting the data count\n");
        assert_eq!(registry.stats().scrape_failures_total, 1);
        assert!(!registry.has_data());
    }

    #[tokio::test]
    async fn test_cached_mode_does_not_collect() {
        let registry = Arc::new(MetricRegistry::default());
        registry.project(&Snapshot::new().with_count(ResourceKind::Cluster, 4));
        let router = create_router(registry, ScrapeMode::Cached, "/metrics");

        let response = router
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_string(response).await.contains("rancher_cluster_count 4\n"));
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let router = create_router(
            Arc::new(MetricRegistry::default()),
            ScrapeMode::Cached,
            "/metrics",
        );

        let response = router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_ready_endpoint() {
        let registry = Arc::new(MetricRegistry::default());
        let router = create_router(registry.clone(), ScrapeMode::Cached, "/metrics");

        let response = router
            .clone()
            .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        registry.project(&Snapshot::new().with_count(ResourceKind::User, 1));

        let response = router
            .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_custom_metrics_path() {
        let router = create_router(
            Arc::new(MetricRegistry::default()),
            ScrapeMode::Cached,
            "/rancher/metrics",
        );

        // Custom path should work
        let response = router
            .clone()
            .oneshot(
                Request::get("/rancher/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // Default path should 404
        let response = router
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
