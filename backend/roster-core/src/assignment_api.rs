// src/assignment_api.rs
use axum::{
    extract::{rejection::JsonRejection, FromRequest, FromRequestParts, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use crate::allocation::RandomSource;
use crate::clock::Clock;
use crate::daily_run::{DailyAssignmentRunner, RunReport};
use crate::eligibility::resolve_eligible;
use crate::lifecycle::{
    AssignmentService, AssignmentsByDate, BatchResult, BatchUpdateItem, CreateAssignmentRequest,
    UpdateAssignmentRequest,
};
use crate::models::{Assignment, AssignmentHistory, AssignmentView, EmployeeRef, TestDefinition};
use crate::store::SchedulerStore;
use crate::AppError;

/// Shared handler context; every handler receives the scheduler through it.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn SchedulerStore>,
    pub runner: Arc<DailyAssignmentRunner>,
    pub assignments: Arc<AssignmentService>,
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn SchedulerStore>,
        rng: Arc<RandomSource>,
        clock: Arc<dyn Clock>,
        today_only_edits: bool,
    ) -> Self {
        let runner = DailyAssignmentRunner::new(store.clone(), rng, clock.clone());
        let assignments = AssignmentService::new(store.clone(), clock.clone())
            .with_today_only_edits(today_only_edits);
        Self {
            store,
            runner: Arc::new(runner),
            assignments: Arc::new(assignments),
            clock,
        }
    }
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/assignments", get(get_assignments).post(create_assignment))
        .route("/assignments/run", post(run_daily_assignment))
        .route("/assignments/batch", post(batch_update_assignments))
        .route("/assignments/history", get(get_history))
        .route(
            "/assignments/{id}",
            patch(update_assignment).delete(delete_assignment),
        )
        .route("/employees/eligible", get(get_eligible_employees))
        .route("/employees/{id}/assignments", get(get_employee_assignments))
        .route("/tests", get(get_active_tests));

    Router::new()
        .route("/health", get(health_check))
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Default, Deserialize)]
pub struct DateQuery {
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RunRequest {
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EligibleEmployees {
    pub date: NaiveDate,
    pub count: usize,
    pub employees: Vec<EmployeeRef>,
}

// --- Extractors ---

/// `Json` body whose rejections render as an `AppError`.
#[derive(FromRequest)]
#[from_request(via(Json), rejection(AppError))]
pub struct AppJson<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(Query), rejection(AppError))]
pub struct AppQuery<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(Path), rejection(AppError))]
pub struct AppPath<T>(pub T);

fn parse_id(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| AppError::BadRequest(format!("invalid assignment id '{}'", raw)))
}

// --- Handlers ---

async fn health_check(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    state.store.ping().await?;
    Ok(Json(json!({ "status": "ok" })))
}

async fn run_daily_assignment(
    State(state): State<AppState>,
    body: Result<Option<Json<RunRequest>>, JsonRejection>,
) -> Result<(StatusCode, Json<RunReport>), AppError> {
    let date = body?
        .and_then(|Json(request)| request.date)
        .unwrap_or_else(|| state.clock.today());
    info!("Daily assignment run requested for {}", date);

    let report = state.runner.run(date).await;
    let status = if report.success {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    Ok((status, Json(report)))
}

async fn get_assignments(
    State(state): State<AppState>,
    AppQuery(query): AppQuery<DateQuery>,
) -> Result<Json<AssignmentsByDate>, AppError> {
    let date = query.date.unwrap_or_else(|| state.clock.today());
    Ok(Json(state.assignments.get_by_date(date).await?))
}

async fn create_assignment(
    State(state): State<AppState>,
    AppJson(request): AppJson<CreateAssignmentRequest>,
) -> Result<(StatusCode, Json<Assignment>), AppError> {
    let assignment = state.assignments.create(request).await?;
    Ok((StatusCode::CREATED, Json(assignment)))
}

async fn update_assignment(
    State(state): State<AppState>,
    AppPath(id): AppPath<String>,
    AppJson(request): AppJson<UpdateAssignmentRequest>,
) -> Result<Json<Assignment>, AppError> {
    let id = parse_id(&id)?;
    Ok(Json(state.assignments.update(id, request).await?))
}

async fn delete_assignment(
    State(state): State<AppState>,
    AppPath(id): AppPath<String>,
) -> Result<StatusCode, AppError> {
    let id = parse_id(&id)?;
    state.assignments.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn batch_update_assignments(
    State(state): State<AppState>,
    AppJson(items): AppJson<Vec<BatchUpdateItem>>,
) -> Result<Json<BatchResult>, AppError> {
    Ok(Json(state.assignments.batch_update(items).await?))
}

async fn get_history(
    State(state): State<AppState>,
    AppQuery(query): AppQuery<DateQuery>,
) -> Result<Json<Vec<AssignmentHistory>>, AppError> {
    let date = query.date.unwrap_or_else(|| state.clock.today());
    Ok(Json(state.assignments.history_on(date).await?))
}

async fn get_eligible_employees(
    State(state): State<AppState>,
    AppQuery(query): AppQuery<DateQuery>,
) -> Result<Json<EligibleEmployees>, AppError> {
    let date = query.date.unwrap_or_else(|| state.clock.today());
    let mut employees = resolve_eligible(state.store.as_ref(), date).await?;
    employees.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
    Ok(Json(EligibleEmployees {
        date,
        count: employees.len(),
        employees,
    }))
}

async fn get_employee_assignments(
    State(state): State<AppState>,
    AppPath(employee_id): AppPath<String>,
    AppQuery(query): AppQuery<DateQuery>,
) -> Result<Json<Vec<AssignmentView>>, AppError> {
    Ok(Json(
        state
            .assignments
            .assignments_for_employee(&employee_id, query.date)
            .await?,
    ))
}

async fn get_active_tests(
    State(state): State<AppState>,
) -> Result<Json<Vec<TestDefinition>>, AppError> {
    Ok(Json(state.store.active_tests().await?))
}
