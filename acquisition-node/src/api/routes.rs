//! API routes
//!
//! Handlers for case transitions, case inspection and project views

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::Deserialize;

use acquisition_workflow::{
    AttachmentRef, AwardPayload, BulkOutcome, BulkRequest, CaseFlag, CaseStatus,
    MeasurementPayload, NoticePayload, PaymentPayload, ProjectProgress, ReconcileReport, Stage,
    Transition,
};
use land_ledger::{LedgerBlock, VerificationReport};

use super::SharedState;
use crate::error::{ApiError, ApiResult};

/// Health check endpoint
pub async fn health() -> impl IntoResponse {
    "OK"
}

// === Request bodies ===

/// Transition payload attributed to an officer
#[derive(Debug, Deserialize)]
pub struct OfficerRequest<T> {
    pub officer_id: String,
    #[serde(flatten)]
    pub payload: T,
}

#[derive(Debug, Deserialize)]
pub struct DocumentsRequest {
    pub officer_id: String,
    pub attachments: Vec<AttachmentRef>,
}

#[derive(Debug, Deserialize)]
pub struct ReleaseRequest {
    pub officer_id: String,
    /// Reference issued by the settlement gateway
    pub settlement_ref: String,
}

#[derive(Debug, Deserialize)]
pub struct FailRequest {
    pub officer_id: String,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdateRequest {
    pub officer_id: String,
    pub stage: Stage,
    pub note: String,
}

#[derive(Debug, Deserialize)]
pub struct RetractRequest {
    pub officer_id: String,
    pub stage: Stage,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct ClearFlagRequest {
    pub officer_id: String,
}

type Created = (StatusCode, Json<Transition>);

fn created(transition: Transition) -> Created {
    (StatusCode::CREATED, Json(transition))
}

// === Transitions ===

/// POST /api/cases/:case_id/measurement
pub async fn record_measurement(
    State(state): State<SharedState>,
    Path(case_id): Path<String>,
    Json(req): Json<OfficerRequest<MeasurementPayload>>,
) -> ApiResult<Created> {
    let transition = state
        .engine
        .record_measurement(&case_id, req.payload, &req.officer_id)
        .await?;
    Ok(created(transition))
}

/// POST /api/cases/:case_id/award
pub async fn declare_award(
    State(state): State<SharedState>,
    Path(case_id): Path<String>,
    Json(req): Json<OfficerRequest<AwardPayload>>,
) -> ApiResult<Created> {
    let transition = state
        .engine
        .declare_award(&case_id, req.payload, &req.officer_id)
        .await?;
    Ok(created(transition))
}

/// POST /api/cases/:case_id/notice
pub async fn generate_notice(
    State(state): State<SharedState>,
    Path(case_id): Path<String>,
    Json(req): Json<OfficerRequest<NoticePayload>>,
) -> ApiResult<Created> {
    let transition = state
        .engine
        .generate_notice(&case_id, req.payload, &req.officer_id)
        .await?;

    if let Some(notifier) = &state.notifier {
        if let Err(e) = notifier.notice_generated(&transition).await {
            tracing::warn!(case_id = %case_id, error = %e, "Notice dispatch failed");
        }
    }
    Ok(created(transition))
}

/// POST /api/cases/:case_id/documents
pub async fn upload_documents(
    State(state): State<SharedState>,
    Path(case_id): Path<String>,
    Json(req): Json<DocumentsRequest>,
) -> ApiResult<Created> {
    let transition = state
        .engine
        .upload_documents(&case_id, req.attachments, &req.officer_id)
        .await?;
    Ok(created(transition))
}

/// POST /api/cases/:case_id/payment
pub async fn create_payment_slip(
    State(state): State<SharedState>,
    Path(case_id): Path<String>,
    Json(req): Json<OfficerRequest<PaymentPayload>>,
) -> ApiResult<Created> {
    let transition = state
        .engine
        .create_payment_slip(&case_id, req.payload, &req.officer_id)
        .await?;
    Ok(created(transition))
}

/// POST /api/cases/:case_id/payment/release
pub async fn release_payment(
    State(state): State<SharedState>,
    Path(case_id): Path<String>,
    Json(req): Json<ReleaseRequest>,
) -> ApiResult<Created> {
    let transition = state
        .engine
        .release_payment(&case_id, &req.settlement_ref, &req.officer_id)
        .await?;

    if let Some(notifier) = &state.notifier {
        if let Err(e) = notifier.payment_released(&transition).await {
            tracing::warn!(case_id = %case_id, error = %e, "Payment confirmation dispatch failed");
        }
    }
    Ok(created(transition))
}

/// POST /api/cases/:case_id/payment/fail
pub async fn fail_payment(
    State(state): State<SharedState>,
    Path(case_id): Path<String>,
    Json(req): Json<FailRequest>,
) -> ApiResult<Created> {
    let transition = state
        .engine
        .fail_payment(&case_id, &req.reason, &req.officer_id)
        .await?;
    Ok(created(transition))
}

/// POST /api/cases/:case_id/status-update
pub async fn record_status_update(
    State(state): State<SharedState>,
    Path(case_id): Path<String>,
    Json(req): Json<StatusUpdateRequest>,
) -> ApiResult<Created> {
    let transition = state
        .engine
        .record_status_update(&case_id, req.stage, &req.note, &req.officer_id)
        .await?;
    Ok(created(transition))
}

/// POST /api/cases/:case_id/retract
pub async fn retract_stage(
    State(state): State<SharedState>,
    Path(case_id): Path<String>,
    Json(req): Json<RetractRequest>,
) -> ApiResult<Created> {
    let transition = state
        .engine
        .retract_stage(&case_id, req.stage, &req.reason, &req.officer_id)
        .await?;
    Ok(created(transition))
}

// === Inspection ===

/// GET /api/cases/:case_id
pub async fn case_status(
    State(state): State<SharedState>,
    Path(case_id): Path<String>,
) -> ApiResult<Json<CaseStatus>> {
    Ok(Json(state.engine.get_case_status(&case_id).await?))
}

/// GET /api/cases/:case_id/verify
pub async fn verify_case(
    State(state): State<SharedState>,
    Path(case_id): Path<String>,
) -> ApiResult<Json<VerificationReport>> {
    Ok(Json(state.engine.verify_case(&case_id).await?))
}

/// POST /api/cases/:case_id/reconcile
pub async fn reconcile(
    State(state): State<SharedState>,
    Path(case_id): Path<String>,
) -> ApiResult<Json<ReconcileReport>> {
    Ok(Json(state.engine.reconcile(&case_id).await?))
}

/// POST /api/cases/:case_id/flag/clear
pub async fn clear_flag(
    State(state): State<SharedState>,
    Path(case_id): Path<String>,
    Json(req): Json<ClearFlagRequest>,
) -> ApiResult<Json<VerificationReport>> {
    Ok(Json(state.engine.clear_flag(&case_id, &req.officer_id).await?))
}

/// GET /api/flags
pub async fn flagged_cases(State(state): State<SharedState>) -> Json<Vec<CaseFlag>> {
    Json(state.engine.flagged_cases())
}

// === Projects ===

/// GET /api/projects/:project_id/progress
pub async fn project_progress(
    State(state): State<SharedState>,
    Path(project_id): Path<String>,
) -> ApiResult<Json<ProjectProgress>> {
    Ok(Json(state.engine.project_progress(&project_id).await?))
}

/// GET /api/projects/:project_id/history
pub async fn project_history(
    State(state): State<SharedState>,
    Path(project_id): Path<String>,
) -> ApiResult<Json<Vec<LedgerBlock>>> {
    Ok(Json(state.engine.project_history(&project_id).await?))
}

/// POST /api/bulk
pub async fn bulk(
    State(state): State<SharedState>,
    Json(req): Json<BulkRequest>,
) -> ApiResult<Json<BulkOutcome>> {
    if req.batch.is_empty() {
        return Err(ApiError::BadRequest("bulk batch has no items".to_string()));
    }
    Ok(Json(state.engine.bulk(req).await))
}
