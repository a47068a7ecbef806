/// HTTP surface of the panel: one embedded page plus a small JSON API the
/// page polls on a fixed cadence.
use crate::config::{AgentConfig, Credentials, PanelConfig};
use crate::supervisor::{AgentStatus, StartError, StopError, Supervisor};
use axum::{
    extract::State,
    http::StatusCode,
    response::Html,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;

const PANEL_HTML: &str = include_str!("panel.html");

/// Shared handler state. The supervisor sits behind one mutex so a
/// precondition check and its effect happen under a single guard; two racing
/// start requests can never both spawn.
#[derive(Clone)]
pub struct AppState {
    supervisor: Arc<Mutex<Supervisor>>,
    agent: Arc<AgentConfig>,
    configured: bool,
    poll_interval_ms: u64,
}

impl AppState {
    pub fn new(config: &PanelConfig, credentials: &Credentials) -> Self {
        Self {
            supervisor: Arc::new(Mutex::new(Supervisor::new())),
            agent: Arc::new(config.agent.clone()),
            configured: credentials.is_complete(),
            poll_interval_ms: config.panel.poll_interval_ms,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/health", get(health))
        .route("/api/status", get(status))
        .route("/api/start", post(start))
        .route("/api/stop", post(stop))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind, serve until SIGINT/SIGTERM, then terminate any live agent.
pub async fn run(
    config: &PanelConfig,
    credentials: &Credentials,
) -> Result<(), Box<dyn std::error::Error>> {
    let state = AppState::new(config, credentials);
    let supervisor = Arc::clone(&state.supervisor);
    let app = router(state);

    let addr = format!("{}:{}", config.panel.bind, config.panel.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;
    tracing::info!("panel listening on http://{local_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(crate::signals::shutdown_signal())
        .await?;

    // No agent may outlive the panel.
    supervisor.lock().await.shutdown();
    tracing::info!("panel shut down");
    Ok(())
}

async fn index(State(state): State<AppState>) -> Html<String> {
    Html(PANEL_HTML.replace("__POLL_INTERVAL_MS__", &state.poll_interval_ms.to_string()))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"ok": true}))
}

#[derive(Debug, serde::Serialize)]
struct StatusResponse {
    status: AgentStatus,
    pid: Option<u32>,
    started_at: Option<DateTime<Utc>>,
    configured: bool,
}

/// Side-effecting read: each status request runs one liveness poll, which is
/// how an agent that died on its own surfaces as `errored`.
async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let mut sup = state.supervisor.lock().await;
    let status = sup.poll();
    Json(StatusResponse {
        status,
        pid: sup.pid(),
        started_at: sup.started_at(),
        configured: state.configured,
    })
}

type ApiError = (StatusCode, Json<serde_json::Value>);

fn api_error(code: StatusCode, message: String) -> ApiError {
    (code, Json(serde_json::json!({"error": message})))
}

async fn start(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    if !state.configured {
        return Err(api_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "credentials missing: set AGENT_ID and ELEVENLABS_API_KEY and restart".to_string(),
        ));
    }

    let mut sup = state.supervisor.lock().await;
    match sup.start(&state.agent) {
        Ok(()) => Ok(Json(serde_json::json!({"ok": true, "pid": sup.pid()}))),
        Err(e @ StartError::AlreadyRunning) => {
            Err(api_error(StatusCode::CONFLICT, e.to_string()))
        }
        Err(e) => Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    }
}

async fn stop(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let mut sup = state.supervisor.lock().await;
    match sup.stop() {
        Ok(()) => Ok(Json(serde_json::json!({"ok": true}))),
        Err(e @ StopError::NotRunning) => Err(api_error(StatusCode::CONFLICT, e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use std::path::Path;
    use tower::ServiceExt;

    fn test_state(configured: bool, dir: &Path) -> AppState {
        let config = PanelConfig {
            agent: AgentConfig {
                command: "sleep".to_string(),
                args: vec!["30".to_string()],
                working_dir: dir.to_path_buf(),
                log_file: dir.join("agent.log"),
            },
            ..Default::default()
        };
        let credentials = if configured {
            Credentials {
                agent_id: "agent_test".to_string(),
                api_key: "sk_test".to_string(),
            }
        } else {
            Credentials {
                agent_id: String::new(),
                api_key: String::new(),
            }
        };
        AppState::new(&config, &credentials)
    }

    async fn request(app: Router, method: &str, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let code = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (code, body)
    }

    #[tokio::test]
    async fn test_health_ok() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(test_state(true, dir.path()));
        let (code, body) = request(app, "GET", "/api/health").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["ok"], true);
    }

    #[tokio::test]
    async fn test_index_serves_panel_page() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(test_state(true, dir.path()));
        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let page = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(page.contains("Asa"));
        // Poll cadence baked into the page, placeholder gone.
        assert!(page.contains("500"));
        assert!(!page.contains("__POLL_INTERVAL_MS__"));
    }

    #[tokio::test]
    async fn test_status_starts_idle() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(test_state(true, dir.path()));
        let (code, body) = request(app, "GET", "/api/status").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["status"], "idle");
        assert_eq!(body["configured"], true);
        assert!(body["pid"].is_null());
    }

    #[tokio::test]
    async fn test_start_without_credentials_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(false, dir.path());
        let app = router(state.clone());
        let (code, body) = request(app, "POST", "/api/start").await;
        assert_eq!(code, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["error"].as_str().unwrap().contains("credentials"));
        // Nothing was spawned.
        assert_eq!(state.supervisor.lock().await.status(), AgentStatus::Idle);
    }

    #[tokio::test]
    async fn test_stop_when_idle_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(test_state(true, dir.path()));
        let (code, body) = request(app, "POST", "/api/stop").await;
        assert_eq!(code, StatusCode::CONFLICT);
        assert!(body["error"].as_str().unwrap().contains("not running"));
    }

    #[tokio::test]
    async fn test_start_status_stop_flow() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(true, dir.path());

        let (code, body) = request(router(state.clone()), "POST", "/api/start").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["ok"], true);
        assert!(body["pid"].is_u64());

        let (code, body) = request(router(state.clone()), "GET", "/api/status").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["status"], "running");
        assert!(body["started_at"].is_string());

        // Second start while running is a conflict, not a second child.
        let (code, _) = request(router(state.clone()), "POST", "/api/start").await;
        assert_eq!(code, StatusCode::CONFLICT);

        let (code, body) = request(router(state.clone()), "POST", "/api/stop").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["ok"], true);

        let (code, body) = request(router(state.clone()), "GET", "/api/status").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["status"], "idle");

        state.supervisor.lock().await.shutdown();
    }
}
