//! HTTP route handlers for the orchestrator API.
//!
//! Library calls are synchronous and may block on the store or an agent
//! backend, so every handler runs its call through [`blocking`].

use std::sync::Arc;

use anyhow::anyhow;
use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use orchestrator::core::brief::IntakeRequest;
use orchestrator::core::types::TaskStatus;
use orchestrator::devops::{RepairOutcome, TriageOutcome};
use orchestrator::error::{InvalidInput, MissingRecord};
use orchestrator::heartbeat::HeartbeatReport;
use orchestrator::intake::IntakeOutcome;
use orchestrator::io::store::StoreHealth;
use orchestrator::model::{ProjectRecord, RunRecord, TaskRecord};
use orchestrator::tracker::{Board, ProjectSnapshot};
use orchestrator::webhooks::{CiWebhook, PreviewWebhook, WebhookReceipt};
use orchestrator::{Orchestrator, StepResult};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::error;

use crate::state::AppState;

/// Build the API router.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/intake", post(intake))
        .route("/orchestrator/step", post(step))
        .route("/orchestrator/heartbeat", get(heartbeat).post(heartbeat))
        .route("/projects/{id}", get(project))
        .route("/projects/{id}/status", post(override_status))
        .route("/tracker", get(board).post(move_task))
        .route("/devops/run", post(start_run))
        .route("/devops/triage", post(triage))
        .route("/devops/repair", post(repair))
        .route("/webhooks/ci", post(ci_webhook))
        .route("/webhooks/preview", post(preview_webhook))
}

/// Error response: `{"error": "..."}` with a status derived from the marker
/// error at the root of the chain.
#[derive(Debug)]
pub struct ApiError(anyhow::Error);

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        let message = format!("{:#}", self.0);
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %message, "request failed");
        }
        (status, Json(json!({ "error": message }))).into_response()
    }
}

fn status_for(err: &anyhow::Error) -> StatusCode {
    if err.downcast_ref::<MissingRecord>().is_some() {
        StatusCode::NOT_FOUND
    } else if err.downcast_ref::<InvalidInput>().is_some() {
        StatusCode::UNPROCESSABLE_ENTITY
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Run `op` on the blocking pool against the shared orchestrator.
async fn blocking<T, F>(state: &AppState, op: F) -> ApiResult<T>
where
    F: FnOnce(&Orchestrator) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let orchestrator = Arc::clone(&state.orchestrator);
    let value = tokio::task::spawn_blocking(move || op(&orchestrator))
        .await
        .map_err(|err| anyhow!("orchestrator task failed: {err}"))??;
    Ok(Json(value))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    store: StoreHealth,
    agent_backend: Option<String>,
}

/// GET /api/health - store health and the active agent backend.
async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        store: state.health.clone(),
        agent_backend: state.orchestrator.gateway().backend_name().map(str::to_string),
    })
}

/// POST /api/intake - create a project from a request and step it once.
async fn intake(
    State(state): State<AppState>,
    Json(request): Json<IntakeRequest>,
) -> ApiResult<IntakeOutcome> {
    blocking(&state, move |orchestrator| orchestrator.intake(&request)).await
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StepBody {
    project_id: String,
}

/// POST /api/orchestrator/step
async fn step(State(state): State<AppState>, Json(body): Json<StepBody>) -> ApiResult<StepResult> {
    blocking(&state, move |orchestrator| orchestrator.step(&body.project_id)).await
}

#[derive(Debug, Default, Deserialize)]
struct HeartbeatQuery {
    limit: Option<usize>,
}

/// GET|POST /api/orchestrator/heartbeat?limit=
async fn heartbeat(
    State(state): State<AppState>,
    Query(query): Query<HeartbeatQuery>,
) -> ApiResult<HeartbeatReport> {
    blocking(&state, move |orchestrator| orchestrator.advance_active(query.limit)).await
}

/// GET /api/projects/:id - project with brief, plan, board and recent events.
async fn project(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<ProjectSnapshot> {
    blocking(&state, move |orchestrator| orchestrator.snapshot(&id)).await
}

#[derive(Debug, Deserialize)]
struct StatusBody {
    status: String,
}

/// POST /api/projects/:id/status - manual accept/reject or stage override.
async fn override_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<StatusBody>,
) -> ApiResult<ProjectRecord> {
    blocking(&state, move |orchestrator| {
        orchestrator.override_project_status(&id, &body.status)
    })
    .await
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BoardQuery {
    project_id: String,
}

/// GET /api/tracker?projectId=
async fn board(State(state): State<AppState>, Query(query): Query<BoardQuery>) -> ApiResult<Board> {
    blocking(&state, move |orchestrator| orchestrator.board(&query.project_id)).await
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MoveTaskBody {
    task_id: String,
    status: TaskStatus,
}

/// POST /api/tracker - move a task on the board.
async fn move_task(
    State(state): State<AppState>,
    Json(body): Json<MoveTaskBody>,
) -> ApiResult<TaskRecord> {
    blocking(&state, move |orchestrator| {
        orchestrator.update_task_status(&body.task_id, body.status)
    })
    .await
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartRunBody {
    task_id: String,
    #[serde(default)]
    metadata: Option<Value>,
}

/// POST /api/devops/run
async fn start_run(
    State(state): State<AppState>,
    Json(body): Json<StartRunBody>,
) -> ApiResult<RunRecord> {
    blocking(&state, move |orchestrator| {
        orchestrator.start_task_run(&body.task_id, body.metadata)
    })
    .await
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TriageBody {
    run_id: String,
    ci_log: String,
    #[serde(default)]
    failing_tests: Option<Vec<String>>,
}

/// POST /api/devops/triage
async fn triage(
    State(state): State<AppState>,
    Json(body): Json<TriageBody>,
) -> ApiResult<TriageOutcome> {
    blocking(&state, move |orchestrator| {
        orchestrator.triage_failure(&body.run_id, &body.ci_log, body.failing_tests)
    })
    .await
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RepairBody {
    run_id: String,
    triage: Value,
}

/// POST /api/devops/repair
async fn repair(
    State(state): State<AppState>,
    Json(body): Json<RepairBody>,
) -> ApiResult<RepairOutcome> {
    blocking(&state, move |orchestrator| {
        orchestrator.propose_repair(&body.run_id, body.triage)
    })
    .await
}

/// POST /api/webhooks/ci
async fn ci_webhook(
    State(state): State<AppState>,
    Json(payload): Json<CiWebhook>,
) -> ApiResult<WebhookReceipt> {
    blocking(&state, move |orchestrator| orchestrator.ingest_ci(&payload)).await
}

/// POST /api/webhooks/preview
async fn preview_webhook(
    State(state): State<AppState>,
    Json(payload): Json<PreviewWebhook>,
) -> ApiResult<WebhookReceipt> {
    blocking(&state, move |orchestrator| orchestrator.ingest_preview(&payload)).await
}

#[cfg(test)]
mod tests {
    use orchestrator::test_support::{intake_request, memory_orchestrator, seed_project};
    use orchestrator::webhooks::CiStatus;

    use super::*;

    fn app_state() -> AppState {
        AppState::new(memory_orchestrator(), StoreHealth::Healthy)
    }

    fn status_of<T>(result: ApiResult<T>) -> StatusCode {
        match result {
            Ok(_) => StatusCode::OK,
            Err(err) => err.into_response().status(),
        }
    }

    #[test]
    fn marker_errors_map_to_status_codes() {
        let missing = anyhow::Error::new(MissingRecord::new("project", "p1"));
        assert_eq!(status_for(&missing), StatusCode::NOT_FOUND);
        let wrapped = missing.context("load project p1");
        assert_eq!(status_for(&wrapped), StatusCode::NOT_FOUND);
        let invalid = anyhow::Error::new(InvalidInput::new("title must not be empty"));
        assert_eq!(status_for(&invalid), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(
            status_for(&anyhow!("disk full")),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn intake_then_step_advances_project() {
        let state = app_state();
        let Json(outcome) = intake(
            State(state.clone()),
            Json(intake_request("Portal", Some("development"))),
        )
        .await
        .expect("intake");
        assert_eq!(outcome.next.stage, "planning");

        let Json(result) = step(
            State(state.clone()),
            Json(StepBody {
                project_id: outcome.project_id.clone(),
            }),
        )
        .await
        .expect("step");
        assert_eq!(result.stage, "estimated");

        let Json(snapshot) = project(State(state), Path(outcome.project_id))
            .await
            .expect("snapshot");
        assert!(snapshot.plan.is_some());
    }

    #[tokio::test]
    async fn empty_intake_is_unprocessable() {
        let state = app_state();
        let request = intake_request("   ", None);
        let result = intake(State(state), Json(request)).await;
        assert_eq!(status_of(result), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn unknown_records_are_not_found() {
        let state = app_state();
        let result = project(State(state.clone()), Path("ghost".to_string())).await;
        assert_eq!(status_of(result), StatusCode::NOT_FOUND);

        let payload = CiWebhook {
            run_id: "no-such-run".to_string(),
            status: CiStatus::Passed,
            ci_url: None,
            logs: None,
            preview_url: None,
        };
        let result = ci_webhook(State(state), Json(payload)).await;
        assert_eq!(status_of(result), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn status_override_validates_status() {
        let state = app_state();
        seed_project(&state.orchestrator, "p1", "intake", None);

        let result = override_status(
            State(state.clone()),
            Path("p1".to_string()),
            Json(StatusBody {
                status: "archived".to_string(),
            }),
        )
        .await;
        assert_eq!(status_of(result), StatusCode::UNPROCESSABLE_ENTITY);

        let Json(project) = override_status(
            State(state),
            Path("p1".to_string()),
            Json(StatusBody {
                status: "rejected".to_string(),
            }),
        )
        .await
        .expect("override");
        assert_eq!(project.stage, "rejected");
    }

    #[tokio::test]
    async fn heartbeat_steps_seeded_projects() {
        let state = app_state();
        seed_project(&state.orchestrator, "p1", "intake", Some("research"));
        seed_project(&state.orchestrator, "p2", "review", None);

        let Json(report) = heartbeat(State(state), Query(HeartbeatQuery::default()))
            .await
            .expect("heartbeat");
        assert_eq!(report.results.len(), 1);
        assert_eq!(report.failures(), 0);
    }

    #[tokio::test]
    async fn health_reports_degraded_store() {
        let state = AppState::new(
            memory_orchestrator(),
            StoreHealth::Degraded {
                reason: "unable to open database file".to_string(),
            },
        );
        let Json(response) = health(State(state)).await;
        let value = serde_json::to_value(&response).expect("serialize");
        assert_eq!(value["store"]["status"], "degraded");
        assert_eq!(value["agentBackend"], Value::Null);
    }
}
