//! # Reference Control Plane REST Surface
//!
//! Exposes a [`MockControlPlane`] over HTTP so operators and scripts can
//! drive the registry while an agent is running.
//!
//! ## Routes
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Base: /api/fleet/v1/agents/{cluster_id}                               │
//! │                                                                         │
//! │  GET    /                               agent document                 │
//! │  PUT    /                               create/replace agent document  │
//! │  GET    /status                         last agent status (404 if none)│
//! │  PUT    /status                         agent status push              │
//! │  GET    /workloads                      { "items": [...] }             │
//! │  POST   /workloads                      create/update (400 bad id)     │
//! │  DELETE /workloads                      mark every workload deleted    │
//! │  PUT    /workloads/status               status map report              │
//! │  DELETE /workloads/{workload_id}        mark one workload deleted      │
//! │  GET    /workloads/{workload_id}/status last workload status (404)     │
//! │                                                                         │
//! │  A cluster id other than the registry's answers 404.                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, put},
    Json, Router,
};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use fleet_core::validation::validate_workload;
use fleet_core::{
    FleetAgent, FleetAgentStatus, ManagedWorkload, ManagedWorkloadList, StatusMap, WorkloadStatus,
};

use crate::error::{SyncError, SyncResult};
use crate::mock_control_plane::MockControlPlane;

/// Route prefix of every endpoint.
pub const API_BASE_PATH: &str = "/api/fleet/v1/agents";

// =============================================================================
// API Error
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn check_cluster(state: &MockControlPlane, cluster_id: &str) -> ApiResult<()> {
    if state.cluster_id() == cluster_id {
        Ok(())
    } else {
        Err(ApiError::NotFound(format!("cluster {}", cluster_id)))
    }
}

// =============================================================================
// Router
// =============================================================================

/// Builds the router over a shared registry.
pub fn router(state: Arc<MockControlPlane>) -> Router {
    Router::new()
        .route(
            &format!("{}/{{cluster_id}}", API_BASE_PATH),
            get(get_agent).put(put_agent),
        )
        .route(
            &format!("{}/{{cluster_id}}/status", API_BASE_PATH),
            get(get_agent_status).put(put_agent_status),
        )
        .route(
            &format!("{}/{{cluster_id}}/workloads", API_BASE_PATH),
            get(list_workloads)
                .post(create_workload)
                .delete(delete_all_workloads),
        )
        .route(
            &format!("{}/{{cluster_id}}/workloads/status", API_BASE_PATH),
            put(report_status),
        )
        .route(
            &format!("{}/{{cluster_id}}/workloads/{{workload_id}}", API_BASE_PATH),
            delete(delete_workload),
        )
        .route(
            &format!("{}/{{cluster_id}}/workloads/{{workload_id}}/status", API_BASE_PATH),
            get(get_workload_status),
        )
        .with_state(state)
}

// =============================================================================
// Handlers
// =============================================================================

async fn get_agent(
    State(state): State<Arc<MockControlPlane>>,
    Path(cluster_id): Path<String>,
) -> ApiResult<Json<FleetAgent>> {
    check_cluster(&state, &cluster_id)?;
    Ok(Json(state.get_agent().await))
}

async fn put_agent(
    State(state): State<Arc<MockControlPlane>>,
    Path(cluster_id): Path<String>,
    Json(agent): Json<FleetAgent>,
) -> ApiResult<StatusCode> {
    check_cluster(&state, &cluster_id)?;
    if agent.cluster_id != cluster_id {
        return Err(ApiError::BadRequest(format!(
            "agent document is for cluster {}",
            agent.cluster_id
        )));
    }
    state.replace_agent(agent).await;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_agent_status(
    State(state): State<Arc<MockControlPlane>>,
    Path(cluster_id): Path<String>,
) -> ApiResult<Json<FleetAgentStatus>> {
    check_cluster(&state, &cluster_id)?;
    state
        .get_agent_status()
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("agent status".to_string()))
}

async fn put_agent_status(
    State(state): State<Arc<MockControlPlane>>,
    Path(cluster_id): Path<String>,
    Json(status): Json<FleetAgentStatus>,
) -> ApiResult<StatusCode> {
    check_cluster(&state, &cluster_id)?;
    state.put_agent_status(status).await;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_workloads(
    State(state): State<Arc<MockControlPlane>>,
    Path(cluster_id): Path<String>,
) -> ApiResult<Json<ManagedWorkloadList>> {
    check_cluster(&state, &cluster_id)?;
    Ok(Json(ManagedWorkloadList {
        items: state.list_workloads(),
    }))
}

async fn create_workload(
    State(state): State<Arc<MockControlPlane>>,
    Path(cluster_id): Path<String>,
    Json(workload): Json<ManagedWorkload>,
) -> ApiResult<StatusCode> {
    check_cluster(&state, &cluster_id)?;
    validate_workload(&workload).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    state.create_or_update(workload);
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_all_workloads(
    State(state): State<Arc<MockControlPlane>>,
    Path(cluster_id): Path<String>,
) -> ApiResult<StatusCode> {
    check_cluster(&state, &cluster_id)?;
    state.mark_all_for_deletion();
    Ok(StatusCode::NO_CONTENT)
}

async fn report_status(
    State(state): State<Arc<MockControlPlane>>,
    Path(cluster_id): Path<String>,
    Json(statuses): Json<StatusMap>,
) -> ApiResult<StatusCode> {
    check_cluster(&state, &cluster_id)?;
    state.report_status(&cluster_id, &statuses);
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_workload(
    State(state): State<Arc<MockControlPlane>>,
    Path((cluster_id, workload_id)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    check_cluster(&state, &cluster_id)?;
    state.mark_for_deletion(&workload_id);
    Ok(StatusCode::NO_CONTENT)
}

async fn get_workload_status(
    State(state): State<Arc<MockControlPlane>>,
    Path((cluster_id, workload_id)): Path<(String, String)>,
) -> ApiResult<Json<WorkloadStatus>> {
    check_cluster(&state, &cluster_id)?;
    state
        .get_status(&workload_id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("status of workload {}", workload_id)))
}

// =============================================================================
// Server
// =============================================================================

/// Serves [`router`] on a TCP address.
pub struct ControlPlaneServer {
    bind_addr: String,
    state: Arc<MockControlPlane>,
}

/// Handle for stopping a running [`ControlPlaneServer`].
pub struct ControlPlaneServerHandle {
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
    local_addr: std::net::SocketAddr,
}

impl ControlPlaneServerHandle {
    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.local_addr
    }

    /// Stops accepting requests and waits for in-flight ones.
    pub async fn shutdown(self) -> SyncResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| SyncError::ChannelError("API shutdown channel closed".into()))?;
        self.task
            .await
            .map_err(|e| SyncError::Internal(format!("API server task failed: {}", e)))
    }
}

impl ControlPlaneServer {
    pub fn new(bind_addr: impl Into<String>, state: Arc<MockControlPlane>) -> Self {
        ControlPlaneServer {
            bind_addr: bind_addr.into(),
            state,
        }
    }

    /// Binds the listener and spawns the server.
    pub async fn start(self) -> SyncResult<ControlPlaneServerHandle> {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let listener = TcpListener::bind(&self.bind_addr).await.map_err(|e| {
            SyncError::Transport(format!("Failed to bind to {}: {}", self.bind_addr, e))
        })?;
        let local_addr = listener.local_addr()?;
        let app = router(self.state);

        info!(addr = %local_addr, base = API_BASE_PATH, "Control plane API started");

        let task = tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    shutdown_rx.recv().await;
                    info!("Control plane API shutting down");
                })
                .await;
            if let Err(e) = served {
                warn!(?e, "Control plane API exited with error");
            }
        });

        Ok(ControlPlaneServerHandle {
            shutdown_tx,
            task,
            local_addr,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Method, Request};
    use tower::ServiceExt;

    fn base(path: &str) -> String {
        format!("{}/testing{}", API_BASE_PATH, path)
    }

    async fn call(
        state: &Arc<MockControlPlane>,
        method: Method,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, Option<serde_json::Value>) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(value) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };

        let response = router(state.clone())
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).ok();
        (status, json)
    }

    #[tokio::test]
    async fn test_create_list_and_delete_workload() {
        let state = Arc::new(MockControlPlane::new("testing", 3));
        let workload = serde_json::to_value(ManagedWorkload::dummy(5)).unwrap();

        let (status, _) = call(&state, Method::POST, &base("/workloads"), Some(workload)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, body) = call(&state, Method::GET, &base("/workloads"), None).await;
        assert_eq!(status, StatusCode::OK);
        let body = body.unwrap();
        assert_eq!(body["items"][0]["id"], "5");
        assert_eq!(body["items"][0]["spec"]["deleted"], false);

        let (status, _) = call(&state, Method::DELETE, &base("/workloads/5"), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(state.list_workloads()[0].is_deleted());

        // Unknown id is a no-op
        let (status, _) = call(&state, Method::DELETE, &base("/workloads/77"), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_invalid_workload_id_is_rejected() {
        let state = Arc::new(MockControlPlane::new("testing", 3));
        let mut workload = ManagedWorkload::dummy(1);
        workload.id = "Not Valid".to_string();
        let body = serde_json::to_value(workload).unwrap();

        let (status, body) = call(&state, Method::POST, &base("/workloads"), Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.unwrap()["error"].as_str().unwrap().contains("id"));
        assert!(state.list_workloads().is_empty());
    }

    #[tokio::test]
    async fn test_status_report_applies_termination_rule() {
        let state = Arc::new(MockControlPlane::new("testing", 3));
        state.create_or_update(ManagedWorkload::dummy(1));
        state.mark_for_deletion("1");

        let (status, _) = call(&state, Method::GET, &base("/workloads/1/status"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let report = serde_json::to_value(StatusMap::from([(
            "1".to_string(),
            WorkloadStatus::deleted(),
        )]))
        .unwrap();
        let (status, _) = call(&state, Method::PUT, &base("/workloads/status"), Some(report)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(state.list_workloads().is_empty());
    }

    #[tokio::test]
    async fn test_agent_document_and_status() {
        let state = Arc::new(MockControlPlane::new("testing", 3));

        let (status, _) = call(&state, Method::GET, &base("/status"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let mut agent = FleetAgent::placeholder("testing");
        agent.spec.allowed_versions = vec!["3.0.0".into()];
        let (status, _) = call(
            &state,
            Method::PUT,
            &base(""),
            Some(serde_json::to_value(&agent).unwrap()),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, body) = call(&state, Method::GET, &base(""), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.unwrap()["spec"]["allowedVersions"][0], "3.0.0");

        // Document for another cluster under this path
        let other = serde_json::to_value(FleetAgent::placeholder("other")).unwrap();
        let (status, _) = call(&state, Method::PUT, &base(""), Some(other)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unknown_cluster_is_not_found() {
        let state = Arc::new(MockControlPlane::new("testing", 3));
        let uri = format!("{}/elsewhere/workloads", API_BASE_PATH);
        let (status, _) = call(&state, Method::GET, &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_server_binds_and_shuts_down() {
        let state = Arc::new(MockControlPlane::new("testing", 3));
        let handle = ControlPlaneServer::new("127.0.0.1:0", state)
            .start()
            .await
            .unwrap();
        assert_ne!(handle.local_addr().port(), 0);
        handle.shutdown().await.unwrap();
    }
}
