use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use super::access::{Actor, Role};
use super::dispatch::{DocumentGenerator, NotificationSink};
use super::domain::{AllocationPlan, BuildingId, NewLoanRequest, RequestId, ResponseSubmission};
use super::errors::WorkflowError;
use super::service::LoanWorkflowService;
use super::store::LoanStore;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_NAME_HEADER: &str = "x-user-name";
pub const USER_ROLES_HEADER: &str = "x-user-roles";
const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

type Shared<S, N, D> = State<Arc<LoanWorkflowService<S, N, D>>>;

/// Router builder exposing the loan request workflow.
pub fn loan_router<S, N, D>(service: Arc<LoanWorkflowService<S, N, D>>) -> Router
where
    S: LoanStore + 'static,
    N: NotificationSink + 'static,
    D: DocumentGenerator + 'static,
{
    Router::new()
        .route("/api/v1/requests", post(create_handler::<S, N, D>))
        .route(
            "/api/v1/requests/:request_id",
            get(detail_handler::<S, N, D>),
        )
        .route(
            "/api/v1/requests/:request_id/close",
            post(close_handler::<S, N, D>),
        )
        .route(
            "/api/v1/requests/:request_id/reject",
            post(reject_handler::<S, N, D>),
        )
        .route(
            "/api/v1/requests/:request_id/approve-inquiry",
            post(approve_inquiry_handler::<S, N, D>),
        )
        .route(
            "/api/v1/requests/:request_id/response-tokens",
            post(issue_token_handler::<S, N, D>),
        )
        .route(
            "/api/v1/requests/:request_id/building-responses",
            get(building_responses_handler::<S, N, D>),
        )
        .route(
            "/api/v1/requests/:request_id/allocate",
            post(allocate_handler::<S, N, D>),
        )
        .route(
            "/api/v1/requests/:request_id/allocation",
            get(allocation_summary_handler::<S, N, D>),
        )
        .route(
            "/api/v1/requests/:request_id/resend-notification",
            post(resend_notification_handler::<S, N, D>),
        )
        .route(
            "/api/v1/building-response/:token",
            get(response_form_handler::<S, N, D>).post(submit_response_handler::<S, N, D>),
        )
        .with_state(service)
}

/// Map a workflow failure to its HTTP status and `{"error": {code, message, details}}` body.
pub fn error_response(error: WorkflowError) -> Response {
    let status = match &error {
        WorkflowError::NotFound { .. } => StatusCode::NOT_FOUND,
        WorkflowError::InvalidState { .. } => StatusCode::CONFLICT,
        WorkflowError::InvalidToken => StatusCode::BAD_REQUEST,
        WorkflowError::Expired | WorkflowError::Completed => StatusCode::GONE,
        WorkflowError::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        WorkflowError::Forbidden(_) => StatusCode::FORBIDDEN,
        WorkflowError::Repository(source) => {
            tracing::error!(error = %source, "loan store failure");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };

    let payload = json!({
        "error": {
            "code": error.code(),
            "message": error.to_string(),
            "details": error.details(),
        }
    });
    (status, Json(payload)).into_response()
}

/// Read the caller identity forwarded by the gateway.
pub(crate) fn actor_from_headers(headers: &HeaderMap) -> Result<Actor, Response> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    };

    let Some(user_id) = header(USER_ID_HEADER) else {
        let payload = json!({
            "error": {
                "code": "UNAUTHENTICATED",
                "message": format!("missing {USER_ID_HEADER} header"),
                "details": serde_json::Value::Null,
            }
        });
        return Err((StatusCode::UNAUTHORIZED, Json(payload)).into_response());
    };

    let name = header(USER_NAME_HEADER).unwrap_or(user_id);
    let roles = header(USER_ROLES_HEADER)
        .map(|raw| raw.split(',').filter_map(Role::parse).collect())
        .unwrap_or_default();

    Ok(Actor::new(user_id, name, roles))
}

fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get(FORWARDED_FOR_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|raw| raw.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(str::to_string)
}

fn respond<T: serde::Serialize>(status: StatusCode, result: Result<T, WorkflowError>) -> Response {
    match result {
        Ok(body) => (status, Json(body)).into_response(),
        Err(error) => error_response(error),
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct RejectBody {
    #[serde(default)]
    reason: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FormQuery {
    building_id: Option<BuildingId>,
}

pub(crate) async fn create_handler<S, N, D>(
    State(service): Shared<S, N, D>,
    headers: HeaderMap,
    Json(input): Json<NewLoanRequest>,
) -> Response
where
    S: LoanStore + 'static,
    N: NotificationSink + 'static,
    D: DocumentGenerator + 'static,
{
    let actor = match actor_from_headers(&headers) {
        Ok(actor) => actor,
        Err(response) => return response,
    };
    respond(StatusCode::CREATED, service.create_request(&actor, input))
}

pub(crate) async fn detail_handler<S, N, D>(
    State(service): Shared<S, N, D>,
    Path(request_id): Path<String>,
    headers: HeaderMap,
) -> Response
where
    S: LoanStore + 'static,
    N: NotificationSink + 'static,
    D: DocumentGenerator + 'static,
{
    let actor = match actor_from_headers(&headers) {
        Ok(actor) => actor,
        Err(response) => return response,
    };
    respond(
        StatusCode::OK,
        service.request_detail(&actor, &RequestId(request_id)),
    )
}

pub(crate) async fn close_handler<S, N, D>(
    State(service): Shared<S, N, D>,
    Path(request_id): Path<String>,
    headers: HeaderMap,
) -> Response
where
    S: LoanStore + 'static,
    N: NotificationSink + 'static,
    D: DocumentGenerator + 'static,
{
    let actor = match actor_from_headers(&headers) {
        Ok(actor) => actor,
        Err(response) => return response,
    };
    respond(
        StatusCode::OK,
        service.close_request(&actor, &RequestId(request_id)),
    )
}

pub(crate) async fn reject_handler<S, N, D>(
    State(service): Shared<S, N, D>,
    Path(request_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<RejectBody>,
) -> Response
where
    S: LoanStore + 'static,
    N: NotificationSink + 'static,
    D: DocumentGenerator + 'static,
{
    let actor = match actor_from_headers(&headers) {
        Ok(actor) => actor,
        Err(response) => return response,
    };
    respond(
        StatusCode::OK,
        service.reject_request(&actor, &RequestId(request_id), &body.reason),
    )
}

pub(crate) async fn approve_inquiry_handler<S, N, D>(
    State(service): Shared<S, N, D>,
    Path(request_id): Path<String>,
    headers: HeaderMap,
) -> Response
where
    S: LoanStore + 'static,
    N: NotificationSink + 'static,
    D: DocumentGenerator + 'static,
{
    let actor = match actor_from_headers(&headers) {
        Ok(actor) => actor,
        Err(response) => return response,
    };
    let result = service
        .approve_inquiry(&actor, &RequestId(request_id))
        .await;
    respond(StatusCode::OK, result)
}

pub(crate) async fn issue_token_handler<S, N, D>(
    State(service): Shared<S, N, D>,
    Path(request_id): Path<String>,
    headers: HeaderMap,
) -> Response
where
    S: LoanStore + 'static,
    N: NotificationSink + 'static,
    D: DocumentGenerator + 'static,
{
    let actor = match actor_from_headers(&headers) {
        Ok(actor) => actor,
        Err(response) => return response,
    };
    let result = service
        .issue_response_token(&actor, &RequestId(request_id))
        .map(|grant| {
            let form_url = service.form_url(&grant.token);
            json!({
                "request_id": grant.request_id,
                "token": grant.token,
                "expires_at": grant.expires_at,
                "form_url": form_url,
            })
        });
    respond(StatusCode::CREATED, result)
}

pub(crate) async fn building_responses_handler<S, N, D>(
    State(service): Shared<S, N, D>,
    Path(request_id): Path<String>,
    headers: HeaderMap,
) -> Response
where
    S: LoanStore + 'static,
    N: NotificationSink + 'static,
    D: DocumentGenerator + 'static,
{
    let actor = match actor_from_headers(&headers) {
        Ok(actor) => actor,
        Err(response) => return response,
    };
    respond(
        StatusCode::OK,
        service.building_responses(&actor, &RequestId(request_id)),
    )
}

pub(crate) async fn allocate_handler<S, N, D>(
    State(service): Shared<S, N, D>,
    Path(request_id): Path<String>,
    headers: HeaderMap,
    Json(plan): Json<AllocationPlan>,
) -> Response
where
    S: LoanStore + 'static,
    N: NotificationSink + 'static,
    D: DocumentGenerator + 'static,
{
    let actor = match actor_from_headers(&headers) {
        Ok(actor) => actor,
        Err(response) => return response,
    };
    let result = service
        .allocate(&actor, &RequestId(request_id), plan)
        .await;
    respond(StatusCode::OK, result)
}

pub(crate) async fn allocation_summary_handler<S, N, D>(
    State(service): Shared<S, N, D>,
    Path(request_id): Path<String>,
    headers: HeaderMap,
) -> Response
where
    S: LoanStore + 'static,
    N: NotificationSink + 'static,
    D: DocumentGenerator + 'static,
{
    let actor = match actor_from_headers(&headers) {
        Ok(actor) => actor,
        Err(response) => return response,
    };
    respond(
        StatusCode::OK,
        service.allocation_summary(&actor, &RequestId(request_id)),
    )
}

pub(crate) async fn resend_notification_handler<S, N, D>(
    State(service): Shared<S, N, D>,
    Path(request_id): Path<String>,
    headers: HeaderMap,
) -> Response
where
    S: LoanStore + 'static,
    N: NotificationSink + 'static,
    D: DocumentGenerator + 'static,
{
    let actor = match actor_from_headers(&headers) {
        Ok(actor) => actor,
        Err(response) => return response,
    };
    let result = service
        .resend_notification(&actor, &RequestId(request_id))
        .await;
    respond(StatusCode::OK, result)
}

pub(crate) async fn response_form_handler<S, N, D>(
    State(service): Shared<S, N, D>,
    Path(token): Path<String>,
    Query(query): Query<FormQuery>,
) -> Response
where
    S: LoanStore + 'static,
    N: NotificationSink + 'static,
    D: DocumentGenerator + 'static,
{
    respond(
        StatusCode::OK,
        service.response_form(&token, query.building_id.as_ref()),
    )
}

pub(crate) async fn submit_response_handler<S, N, D>(
    State(service): Shared<S, N, D>,
    Path(token): Path<String>,
    headers: HeaderMap,
    Json(submission): Json<ResponseSubmission>,
) -> Response
where
    S: LoanStore + 'static,
    N: NotificationSink + 'static,
    D: DocumentGenerator + 'static,
{
    respond(
        StatusCode::OK,
        service.submit_response(&token, submission, client_ip(&headers)),
    )
}
