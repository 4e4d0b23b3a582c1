//! HTTP host for the worker: every site request goes through the fetch
//! interceptor, and lifecycle events arrive on `/__worker/*` endpoints.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::{Query, State};
use axum::http::header::{ACCEPT, CONNECTION, CONTENT_LENGTH, TRANSFER_ENCODING};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use bytes::Bytes;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use crate::cache::CacheStorage;
use crate::config::{ServerConfig, WorkerConfig};
use crate::error::{Error, Result};
use crate::http::{Request, RequestMode, Response};
use crate::lifecycle::WorkerState;
use crate::network::Network;
use crate::push::{Notification, PushPresenter};
use crate::registration::Registration;
use crate::stats::StatsSnapshot;
use crate::worker::{SubmitOutcome, SyncReport};

/// Shared state of the host server.
pub struct AppState<S: CacheStorage + 'static, N: Network + 'static> {
    registration: Arc<Registration<S, N>>,
    push: Arc<PushPresenter>,
    origin: Url,
    submit_url: Url,
    sync_tag: String,
}

impl<S: CacheStorage + 'static, N: Network + 'static> Clone for AppState<S, N> {
    fn clone(&self) -> Self {
        Self {
            registration: Arc::clone(&self.registration),
            push: Arc::clone(&self.push),
            origin: self.origin.clone(),
            submit_url: self.submit_url.clone(),
            sync_tag: self.sync_tag.clone(),
        }
    }
}

impl<S: CacheStorage + 'static, N: Network + 'static> AppState<S, N> {
    /// # Errors
    ///
    /// Returns an error if the origin or submission endpoint in `worker`
    /// does not resolve.
    pub fn new(
        registration: Arc<Registration<S, N>>,
        push: Arc<PushPresenter>,
        worker: &WorkerConfig,
    ) -> Result<Self> {
        Ok(Self {
            registration,
            push,
            origin: worker.origin_url()?,
            submit_url: worker.resolve(&worker.submit_endpoint)?,
            sync_tag: worker.sync_tag.clone(),
        })
    }
}

struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = match self.0 {
            Error::NoActiveWorker => StatusCode::SERVICE_UNAVAILABLE,
            ref e if e.is_network() => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        log::error!("Request failed: {}", self.0);
        (status, self.0.to_string()).into_response()
    }
}

#[derive(Deserialize)]
struct SyncQuery {
    tag: Option<String>,
}

#[derive(Deserialize)]
struct ClickRequest {
    id: Option<Uuid>,
    action: Option<String>,
}

#[derive(Serialize)]
struct ClickResponse {
    opened: Option<String>,
}

#[derive(Serialize)]
struct QueuedResponse {
    queued: bool,
    id: Uuid,
}

#[derive(Serialize)]
struct StatusResponse {
    cache_name: Option<String>,
    version: Option<String>,
    state: Option<WorkerState>,
    pending: usize,
    stats: Option<StatsSnapshot>,
    /// Percentage of intercepted GETs answered from cache.
    hit_ratio: Option<f64>,
}

fn into_axum(response: Response) -> axum::response::Response {
    let mut headers = response.headers;
    for name in [CONNECTION, TRANSFER_ENCODING, CONTENT_LENGTH] {
        headers.remove(name);
    }
    (response.status, headers, response.body).into_response()
}

/// Navigations are recognised by `Sec-Fetch-Mode`, or failing that by a GET
/// that accepts HTML.
fn request_mode(method: &Method, headers: &HeaderMap) -> RequestMode {
    if let Some(mode) = headers.get("sec-fetch-mode").and_then(|v| v.to_str().ok()) {
        return if mode == "navigate" {
            RequestMode::Navigate
        } else {
            RequestMode::Subresource
        };
    }
    let wants_html = headers
        .get(ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|accept| accept.contains("text/html"));
    if method == Method::GET && wants_html {
        RequestMode::Navigate
    } else {
        RequestMode::Subresource
    }
}

/// Maps the request target onto the site origin. Only the path and query
/// are taken from the request, so a target like `//other.host/x` stays on
/// the origin.
fn site_url(origin: &Url, uri: &Uri) -> Url {
    let mut url = origin.clone();
    url.set_path(uri.path());
    url.set_query(uri.query());
    url
}

async fn proxy<S: CacheStorage + 'static, N: Network + 'static>(
    State(state): State<AppState<S, N>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> std::result::Result<axum::response::Response, ApiError> {
    let url = site_url(&state.origin, &uri);

    if method == Method::POST
        && url == state.submit_url
        && let Ok(payload) = serde_json::from_slice::<serde_json::Value>(&body)
    {
        return match state.registration.submit_or_queue(payload).await? {
            SubmitOutcome::Delivered(response) => Ok(into_axum(response)),
            SubmitOutcome::Queued(record) => Ok((
                StatusCode::ACCEPTED,
                axum::Json(QueuedResponse {
                    queued: true,
                    id: record.id,
                }),
            )
                .into_response()),
        };
    }

    let request = Request {
        mode: request_mode(&method, &headers),
        method,
        url,
        headers,
        body,
    };
    Ok(into_axum(state.registration.handle_fetch(&request).await))
}

async fn sync_event<S: CacheStorage + 'static, N: Network + 'static>(
    State(state): State<AppState<S, N>>,
    Query(query): Query<SyncQuery>,
) -> std::result::Result<axum::Json<SyncReport>, ApiError> {
    let tag = query.tag.unwrap_or_else(|| state.sync_tag.clone());
    Ok(axum::Json(state.registration.handle_sync(&tag).await?))
}

async fn push_event<S: CacheStorage + 'static, N: Network + 'static>(
    State(state): State<AppState<S, N>>,
    body: Bytes,
) -> std::result::Result<axum::Json<Notification>, ApiError> {
    let payload = (!body.is_empty()).then_some(&body[..]);
    Ok(axum::Json(state.push.handle_push(payload).await?))
}

async fn notification_click<S: CacheStorage + 'static, N: Network + 'static>(
    State(state): State<AppState<S, N>>,
    axum::Json(click): axum::Json<ClickRequest>,
) -> std::result::Result<axum::Json<ClickResponse>, ApiError> {
    let opened = state
        .push
        .handle_notification_click(click.id.unwrap_or_else(Uuid::nil), click.action.as_deref())
        .await?;
    Ok(axum::Json(ClickResponse {
        opened: opened.map(|url| url.to_string()),
    }))
}

async fn status<S: CacheStorage + 'static, N: Network + 'static>(
    State(state): State<AppState<S, N>>,
) -> std::result::Result<axum::Json<StatusResponse>, ApiError> {
    let Some(worker) = state.registration.active().await else {
        return Ok(axum::Json(StatusResponse {
            cache_name: None,
            version: None,
            state: None,
            pending: 0,
            stats: None,
            hit_ratio: None,
        }));
    };
    let stats = worker.stats().snapshot();
    Ok(axum::Json(StatusResponse {
        cache_name: Some(worker.cache_name().to_string()),
        version: Some(worker.config().version.clone()),
        state: Some(worker.state()),
        pending: worker.queue().len().await?,
        stats: Some(stats),
        hit_ratio: Some(stats.hit_ratio()),
    }))
}

/// Builds the router: control endpoints plus a catch-all proxy.
pub fn router<S: CacheStorage + 'static, N: Network + 'static>(state: AppState<S, N>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/__worker/status", get(status::<S, N>))
        .route("/__worker/sync", post(sync_event::<S, N>))
        .route("/__worker/push", post(push_event::<S, N>))
        .route("/__worker/notificationclick", post(notification_click::<S, N>))
        .fallback(proxy::<S, N>)
        .layer(cors)
        .with_state(state)
}

/// Serves the site until `shutdown` is cancelled.
///
/// # Errors
///
/// Returns an error if the address is invalid or cannot be bound.
pub async fn run_server<S: CacheStorage + 'static, N: Network + 'static>(
    config: &ServerConfig,
    state: AppState<S, N>,
    shutdown: CancellationToken,
) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| Error::Config(format!("invalid listen address: {e}")))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!("Serving on http://{addr}");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    Ok(())
}

/// Fires a sync event every `interval` while submissions are queued, until
/// `shutdown` is cancelled.
pub async fn run_sync_ticker<S: CacheStorage + 'static, N: Network + 'static>(
    registration: Arc<Registration<S, N>>,
    tag: String,
    interval: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let Some(worker) = registration.active().await else { continue };
                match worker.queue().len().await {
                    Ok(0) => {}
                    Ok(pending) => {
                        log::debug!("Sync tick with {pending} queued submissions");
                        match worker.handle_sync(&tag).await {
                            Ok(report) => log::info!(
                                "Sync delivered {}/{} submissions, {} remaining",
                                report.delivered,
                                report.attempted,
                                report.remaining
                            ),
                            Err(e) => log::warn!("Sync failed: {e}"),
                        }
                    }
                    Err(e) => log::warn!("Cannot read submission queue: {e}"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCacheStorage;
    use crate::config::PushConfig;
    use crate::queue::{MemoryQueue, SubmissionQueue};
    use crate::testing::{MockNetwork, RecordingHost, ok};
    use crate::worker::OfflineWorker;
    use crate::worker::test_support::{config, url};

    struct TestServer {
        base: String,
        network: Arc<MockNetwork>,
        queue: Arc<MemoryQueue>,
        host: Arc<RecordingHost>,
        shutdown: CancellationToken,
    }

    impl Drop for TestServer {
        fn drop(&mut self) {
            self.shutdown.cancel();
        }
    }

    async fn start() -> TestServer {
        let network = Arc::new(MockNetwork::new());
        let queue = Arc::new(MemoryQueue::new());
        let host = Arc::new(RecordingHost::new());
        let worker_config = config("v1", &["/", "/offline.html"]);
        network.serve(url("/").as_str(), "home");
        network.serve(url("/offline.html").as_str(), "offline page");

        let registration = Arc::new(Registration::new(Arc::clone(&network)));
        let worker = OfflineWorker::new(
            worker_config.clone(),
            Arc::new(MemoryCacheStorage::new()),
            Arc::clone(&network),
            queue.clone(),
            host.clone(),
        )
        .unwrap();
        registration.update(worker).await.unwrap();

        let push = Arc::new(PushPresenter::new(PushConfig::default(), &worker_config, host.clone()).unwrap());
        let state = AppState::new(registration, push, &worker_config).unwrap();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        tokio::spawn(async move {
            axum::serve(listener, router(state))
                .with_graceful_shutdown(token.cancelled_owned())
                .await
                .unwrap();
        });

        TestServer {
            base: format!("http://{addr}"),
            network,
            queue,
            host,
            shutdown,
        }
    }

    #[test]
    fn navigation_detection() {
        let mut headers = HeaderMap::new();
        assert_eq!(request_mode(&Method::GET, &headers), RequestMode::Subresource);

        headers.insert(ACCEPT, "text/html,application/xhtml+xml".parse().unwrap());
        assert_eq!(request_mode(&Method::GET, &headers), RequestMode::Navigate);
        assert_eq!(request_mode(&Method::POST, &headers), RequestMode::Subresource);

        headers.insert("sec-fetch-mode", "cors".parse().unwrap());
        assert_eq!(request_mode(&Method::GET, &headers), RequestMode::Subresource);
        headers.insert("sec-fetch-mode", "navigate".parse().unwrap());
        assert_eq!(request_mode(&Method::GET, &headers), RequestMode::Navigate);
    }

    #[test]
    fn request_target_stays_on_origin() {
        let origin = Url::parse("https://site.test").unwrap();

        let url = site_url(&origin, &"//evil.test/secret?x=1".parse().unwrap());
        assert_eq!(url.host_str(), Some("site.test"));
        assert_eq!(url.path(), "//evil.test/secret");
        assert_eq!(url.query(), Some("x=1"));

        let url = site_url(&origin, &"/css/style.css".parse().unwrap());
        assert_eq!(url.as_str(), "https://site.test/css/style.css");
    }

    #[tokio::test]
    async fn proxy_never_forwards_to_another_host() {
        let server = start().await;
        server.network.serve("https://evil.test/secret", "leaked");

        let response = reqwest::get(format!("{}//evil.test/secret", server.base))
            .await
            .unwrap();

        assert_ne!(response.text().await.unwrap(), "leaked");
        assert!(
            server
                .network
                .calls()
                .iter()
                .all(|(_, called)| called.host_str() == Some("site.test"))
        );
    }

    #[tokio::test]
    async fn proxy_serves_from_cache_while_offline() {
        let server = start().await;
        server.network.set_offline(true);
        let client = reqwest::Client::new();

        let home = client.get(format!("{}/", server.base)).send().await.unwrap();
        assert_eq!(home.status(), StatusCode::OK);
        assert_eq!(home.text().await.unwrap(), "home");

        let page = client
            .get(format!("{}/about", server.base))
            .header("sec-fetch-mode", "navigate")
            .send()
            .await
            .unwrap();
        assert_eq!(page.text().await.unwrap(), "offline page");

        let script = client
            .get(format!("{}/js/main.js", server.base))
            .send()
            .await
            .unwrap();
        assert_eq!(script.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn offline_submission_is_queued_then_synced() {
        let server = start().await;
        server.network.set_offline(true);
        let client = reqwest::Client::new();

        let queued = client
            .post(format!("{}/api/contact", server.base))
            .header("content-type", "application/json")
            .body(r#"{"name":"Anna"}"#)
            .send()
            .await
            .unwrap();
        assert_eq!(queued.status(), StatusCode::ACCEPTED);
        assert_eq!(server.queue.len().await.unwrap(), 1);

        server.network.set_offline(false);
        server
            .network
            .route(Method::POST, url("/api/contact").as_str(), ok("thanks"));
        let report: serde_json::Value = serde_json::from_str(
            &client
                .post(format!("{}/__worker/sync?tag=contact-form-sync", server.base))
                .send()
                .await
                .unwrap()
                .text()
                .await
                .unwrap(),
        )
        .unwrap();
        assert_eq!(report["delivered"], 1);
        assert_eq!(report["remaining"], 0);
        assert_eq!(server.queue.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn push_and_click_reach_the_host() {
        let server = start().await;
        let client = reqwest::Client::new();

        let shown: serde_json::Value = serde_json::from_str(
            &client
                .post(format!("{}/__worker/push", server.base))
                .send()
                .await
                .unwrap()
                .text()
                .await
                .unwrap(),
        )
        .unwrap();
        assert_eq!(shown["body"], "Nowa wiadomość od Milewska Design");
        assert_eq!(server.host.notifications().len(), 1);

        let click: serde_json::Value = serde_json::from_str(
            &client
                .post(format!("{}/__worker/notificationclick", server.base))
                .header("content-type", "application/json")
                .body(r#"{"action":"explore"}"#)
                .send()
                .await
                .unwrap()
                .text()
                .await
                .unwrap(),
        )
        .unwrap();
        assert_eq!(click["opened"], "https://site.test/#portfolio");
        assert_eq!(server.host.windows(), vec![url("/#portfolio")]);
    }

    #[tokio::test]
    async fn status_reports_active_version() {
        let server = start().await;
        let status: serde_json::Value = serde_json::from_str(
            &reqwest::get(format!("{}/__worker/status", server.base))
                .await
                .unwrap()
                .text()
                .await
                .unwrap(),
        )
        .unwrap();

        assert_eq!(status["cache_name"], "milewska-design-v1");
        assert_eq!(status["state"], "activated");
        assert_eq!(status["pending"], 0);
        assert_eq!(status["hit_ratio"], 0.0);
    }

    #[tokio::test]
    async fn ticker_drains_queue() {
        let network = Arc::new(MockNetwork::new());
        network.serve(url("/").as_str(), "home");
        network.route(Method::POST, url("/api/contact").as_str(), ok("thanks"));
        let queue = Arc::new(MemoryQueue::new());
        let registration = Arc::new(Registration::new(Arc::clone(&network)));
        let worker = OfflineWorker::new(
            config("v1", &["/"]),
            Arc::new(MemoryCacheStorage::new()),
            Arc::clone(&network),
            queue.clone(),
            Arc::new(RecordingHost::new()),
        )
        .unwrap();
        registration.update(worker).await.unwrap();
        queue.enqueue(serde_json::json!({ "n": 1 })).await.unwrap();

        let shutdown = CancellationToken::new();
        let ticker = tokio::spawn(run_sync_ticker(
            registration,
            "contact-form-sync".to_string(),
            Duration::from_millis(10),
            shutdown.clone(),
        ));

        for _ in 0..100 {
            if queue.len().await.unwrap() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        shutdown.cancel();
        ticker.await.unwrap();
        assert_eq!(queue.len().await.unwrap(), 0);
    }
}
