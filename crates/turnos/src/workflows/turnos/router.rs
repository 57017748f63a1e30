use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{NaiveDate, NaiveDateTime};
use serde::Deserialize;
use serde_json::json;

use super::domain::{
    EvidenceUpload, LineItemId, LineItemRequest, RequesterId, StaffId, TurnoId, TurnoStatus,
    TurnoSubmission,
};
use super::error::TurnoError;
use super::evidence::EvidenceKind;
use super::notify::NotificationDispatcher;
use super::repository::TurnoRepository;
use super::review::Approval;
use super::service::TurnoService;

type SharedService<R, N> = Arc<TurnoService<R, N>>;

/// Router builder exposing the turno endpoints under `/api/v1`.
pub fn turno_router<R, N>(service: Arc<TurnoService<R, N>>) -> Router
where
    R: TurnoRepository + 'static,
    N: NotificationDispatcher + 'static,
{
    Router::new()
        .route(
            "/api/v1/turnos",
            post(submit_handler::<R, N>).get(list_handler::<R, N>),
        )
        .route("/api/v1/turnos/lookup", post(lookup_handler::<R, N>))
        .route("/api/v1/turnos/:turno_id", get(get_handler::<R, N>))
        .route(
            "/api/v1/turnos/:turno_id/approve",
            post(approve_handler::<R, N>),
        )
        .route(
            "/api/v1/turnos/:turno_id/reject",
            post(reject_handler::<R, N>),
        )
        .route(
            "/api/v1/turnos/:turno_id/complete",
            post(complete_handler::<R, N>),
        )
        .route(
            "/api/v1/turnos/:turno_id/cancel",
            post(cancel_handler::<R, N>),
        )
        .route(
            "/api/v1/turnos/:turno_id/reprogram",
            post(reprogram_handler::<R, N>),
        )
        .route("/api/v1/capacity/:date", get(capacity_handler::<R, N>))
        .route(
            "/api/v1/requesters/:requester_id/quota",
            get(quota_handler::<R, N>),
        )
        .route("/api/v1/slots/next", get(next_slot_handler::<R, N>))
        .with_state(service)
}

#[derive(Debug, Deserialize)]
pub(crate) struct SubmitTurnoRequest {
    pub(crate) requester_id: String,
    pub(crate) identity_document: String,
    #[serde(default)]
    pub(crate) preferred_at: Option<NaiveDateTime>,
    #[serde(default)]
    pub(crate) notes: Option<String>,
    pub(crate) line_items: Vec<LineItemRequest>,
    #[serde(default)]
    pub(crate) evidence: Vec<EvidencePayload>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EvidencePayload {
    pub(crate) kind: EvidenceKind,
    pub(crate) file_name: String,
    #[serde(default)]
    pub(crate) content_type: Option<String>,
    pub(crate) content_base64: String,
}

impl SubmitTurnoRequest {
    fn into_submission(self) -> Result<TurnoSubmission, TurnoError> {
        let evidence = self
            .evidence
            .into_iter()
            .map(|payload| {
                let bytes = BASE64.decode(payload.content_base64.trim()).map_err(|_| {
                    TurnoError::validation(format!(
                        "{} is not valid base64",
                        payload.file_name
                    ))
                })?;
                Ok(EvidenceUpload {
                    kind: payload.kind,
                    file_name: payload.file_name,
                    content_type: payload.content_type,
                    bytes,
                })
            })
            .collect::<Result<Vec<_>, TurnoError>>()?;

        Ok(TurnoSubmission {
            requester_id: RequesterId(self.requester_id),
            identity_document: self.identity_document,
            preferred_at: self.preferred_at,
            notes: self.notes,
            line_items: self.line_items,
            evidence,
        })
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApproveRequest {
    pub(crate) reviewer_id: String,
    #[serde(default)]
    pub(crate) approved_quantities: BTreeMap<u64, u32>,
    #[serde(default)]
    pub(crate) comments: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RejectRequest {
    pub(crate) reviewer_id: String,
    pub(crate) motive: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CancelRequest {
    pub(crate) requester_id: String,
    pub(crate) motive: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ReprogramRequest {
    pub(crate) admin_id: String,
    pub(crate) new_at: NaiveDateTime,
    #[serde(default)]
    pub(crate) motive: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LookupRequest {
    pub(crate) identity_document: String,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ListQuery {
    #[serde(default)]
    pub(crate) status: Option<String>,
    #[serde(default)]
    pub(crate) date: Option<NaiveDate>,
}

/// Maps workflow errors onto HTTP statuses with a JSON `error` body.
pub(crate) fn error_response(error: TurnoError) -> Response {
    let status = match &error {
        TurnoError::Validation(_) => StatusCode::BAD_REQUEST,
        TurnoError::QuotaExceeded { .. }
        | TurnoError::CapacityExceeded { .. }
        | TurnoError::NoSlotAvailable { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        TurnoError::NotFound(_) | TurnoError::CatalogItemNotFound(_) => StatusCode::NOT_FOUND,
        TurnoError::NotOwner { .. } => StatusCode::FORBIDDEN,
        TurnoError::InvalidStateTransition { .. } | TurnoError::InsufficientStock { .. } => {
            StatusCode::CONFLICT
        }
        TurnoError::Persistence(_) | TurnoError::Evidence(_) => {
            tracing::error!(%error, "turno request failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    let payload = json!({ "error": error.to_string() });
    (status, axum::Json(payload)).into_response()
}

fn respond<T: serde::Serialize>(status: StatusCode, result: Result<T, TurnoError>) -> Response {
    match result {
        Ok(body) => (status, axum::Json(body)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn submit_handler<R, N>(
    State(service): State<SharedService<R, N>>,
    axum::Json(request): axum::Json<SubmitTurnoRequest>,
) -> Response
where
    R: TurnoRepository + 'static,
    N: NotificationDispatcher + 'static,
{
    let result = request
        .into_submission()
        .and_then(|submission| service.submit(submission));
    respond(StatusCode::CREATED, result)
}

pub(crate) async fn get_handler<R, N>(
    State(service): State<SharedService<R, N>>,
    Path(turno_id): Path<u64>,
) -> Response
where
    R: TurnoRepository + 'static,
    N: NotificationDispatcher + 'static,
{
    respond(StatusCode::OK, service.get(TurnoId(turno_id)))
}

pub(crate) async fn list_handler<R, N>(
    State(service): State<SharedService<R, N>>,
    Query(query): Query<ListQuery>,
) -> Response
where
    R: TurnoRepository + 'static,
    N: NotificationDispatcher + 'static,
{
    let result = match (query.status.as_deref(), query.date) {
        (_, Some(date)) => service.on_date(date),
        (Some(raw), None) => match TurnoStatus::parse(raw) {
            Some(status) => service.with_status(status),
            None => Err(TurnoError::validation(format!("unknown status '{raw}'"))),
        },
        (None, None) => service.with_status(TurnoStatus::Pending),
    };
    respond(StatusCode::OK, result)
}

pub(crate) async fn lookup_handler<R, N>(
    State(service): State<SharedService<R, N>>,
    axum::Json(request): axum::Json<LookupRequest>,
) -> Response
where
    R: TurnoRepository + 'static,
    N: NotificationDispatcher + 'static,
{
    respond(
        StatusCode::OK,
        service.find_by_document(&request.identity_document),
    )
}

pub(crate) async fn approve_handler<R, N>(
    State(service): State<SharedService<R, N>>,
    Path(turno_id): Path<u64>,
    axum::Json(request): axum::Json<ApproveRequest>,
) -> Response
where
    R: TurnoRepository + 'static,
    N: NotificationDispatcher + 'static,
{
    let approval = Approval {
        reviewer: StaffId(request.reviewer_id),
        quantities: request
            .approved_quantities
            .into_iter()
            .map(|(line_id, quantity)| (LineItemId(line_id), quantity))
            .collect(),
        comments: request.comments,
    };
    respond(StatusCode::OK, service.approve(TurnoId(turno_id), approval))
}

pub(crate) async fn reject_handler<R, N>(
    State(service): State<SharedService<R, N>>,
    Path(turno_id): Path<u64>,
    axum::Json(request): axum::Json<RejectRequest>,
) -> Response
where
    R: TurnoRepository + 'static,
    N: NotificationDispatcher + 'static,
{
    respond(
        StatusCode::OK,
        service.reject(
            TurnoId(turno_id),
            StaffId(request.reviewer_id),
            &request.motive,
        ),
    )
}

pub(crate) async fn complete_handler<R, N>(
    State(service): State<SharedService<R, N>>,
    Path(turno_id): Path<u64>,
) -> Response
where
    R: TurnoRepository + 'static,
    N: NotificationDispatcher + 'static,
{
    respond(StatusCode::OK, service.complete(TurnoId(turno_id)))
}

pub(crate) async fn cancel_handler<R, N>(
    State(service): State<SharedService<R, N>>,
    Path(turno_id): Path<u64>,
    axum::Json(request): axum::Json<CancelRequest>,
) -> Response
where
    R: TurnoRepository + 'static,
    N: NotificationDispatcher + 'static,
{
    respond(
        StatusCode::OK,
        service.cancel(
            TurnoId(turno_id),
            &RequesterId(request.requester_id),
            &request.motive,
        ),
    )
}

pub(crate) async fn reprogram_handler<R, N>(
    State(service): State<SharedService<R, N>>,
    Path(turno_id): Path<u64>,
    axum::Json(request): axum::Json<ReprogramRequest>,
) -> Response
where
    R: TurnoRepository + 'static,
    N: NotificationDispatcher + 'static,
{
    respond(
        StatusCode::OK,
        service.reprogram(
            TurnoId(turno_id),
            StaffId(request.admin_id),
            request.new_at,
            request.motive.as_deref(),
        ),
    )
}

pub(crate) async fn capacity_handler<R, N>(
    State(service): State<SharedService<R, N>>,
    Path(date): Path<NaiveDate>,
) -> Response
where
    R: TurnoRepository + 'static,
    N: NotificationDispatcher + 'static,
{
    respond(StatusCode::OK, service.capacity(date))
}

pub(crate) async fn quota_handler<R, N>(
    State(service): State<SharedService<R, N>>,
    Path(requester_id): Path<String>,
) -> Response
where
    R: TurnoRepository + 'static,
    N: NotificationDispatcher + 'static,
{
    respond(StatusCode::OK, service.quota(&RequesterId(requester_id)))
}

pub(crate) async fn next_slot_handler<R, N>(State(service): State<SharedService<R, N>>) -> Response
where
    R: TurnoRepository + 'static,
    N: NotificationDispatcher + 'static,
{
    respond(
        StatusCode::OK,
        service.next_slot().map(|slot| json!({ "slot": slot })),
    )
}
