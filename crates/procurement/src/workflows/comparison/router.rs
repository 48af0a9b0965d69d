use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::error;

use super::domain::{NegotiationSession, OfferId, RequisitionId, SelectionChannel, UserId};
use super::report::ReportError;
use super::repository::RepositoryError;
use super::selection::{SelectionError, SelectionRequest};
use super::service::{ComparisonError, ComparisonService};

/// Router exposing the comparison, report and selection endpoints.
pub fn comparison_router(service: Arc<ComparisonService>) -> Router {
    Router::new()
        .route(
            "/api/v1/requisitions/:requisition_id/comparison",
            get(status_handler),
        )
        .route("/api/v1/requisitions/:requisition_id/bids", get(bids_handler))
        .route(
            "/api/v1/requisitions/:requisition_id/bids/top",
            get(top_handler),
        )
        .route(
            "/api/v1/requisitions/:requisition_id/comparison/report",
            get(report_handler),
        )
        .route(
            "/api/v1/requisitions/:requisition_id/comparison/generate",
            post(generate_handler),
        )
        .route(
            "/api/v1/requisitions/:requisition_id/comparison/resend",
            post(resend_handler),
        )
        .route(
            "/api/v1/requisitions/:requisition_id/selection",
            get(selection_audit_handler).post(select_handler),
        )
        .route(
            "/api/v1/requisitions/:requisition_id/selection/notifications/retry",
            post(retry_notifications_handler),
        )
        .route(
            "/api/v1/requisitions/:requisition_id/selection/purchase-order",
            post(retry_purchase_order_handler),
        )
        .route("/api/v1/admin/check-deadlines", post(check_deadlines_handler))
        .route("/api/v1/negotiations", post(negotiation_handler))
        .with_state(service)
}

#[derive(Debug, Deserialize)]
pub(crate) struct TopQuery {
    n: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SelectionBody {
    offer_id: OfferId,
    acting_user: UserId,
    #[serde(default)]
    channel: Option<SelectionChannel>,
    #[serde(default)]
    reason: Option<String>,
}

pub(crate) async fn status_handler(
    State(service): State<Arc<ComparisonService>>,
    Path(requisition_id): Path<String>,
) -> Response {
    match service
        .status(&RequisitionId(requisition_id), Utc::now())
        .await
    {
        Ok(view) => (StatusCode::OK, Json(view)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn bids_handler(
    State(service): State<Arc<ComparisonService>>,
    Path(requisition_id): Path<String>,
) -> Response {
    match service.bids(&RequisitionId(requisition_id)).await {
        Ok(view) => (StatusCode::OK, Json(view)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn top_handler(
    State(service): State<Arc<ComparisonService>>,
    Path(requisition_id): Path<String>,
    Query(query): Query<TopQuery>,
) -> Response {
    let n = query.n.unwrap_or_else(|| service.default_top_n());
    match service.top(&RequisitionId(requisition_id), n).await {
        Ok(view) => (StatusCode::OK, Json(view)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn report_handler(
    State(service): State<Arc<ComparisonService>>,
    Path(requisition_id): Path<String>,
) -> Response {
    match service
        .report_artifact(&RequisitionId(requisition_id))
        .await
    {
        Ok(artifact) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, artifact.content_type)],
            artifact.bytes,
        )
            .into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn generate_handler(
    State(service): State<Arc<ComparisonService>>,
    Path(requisition_id): Path<String>,
) -> Response {
    match service
        .generate(&RequisitionId(requisition_id), Utc::now())
        .await
    {
        Ok(view) if view.generated => (StatusCode::CREATED, Json(view)).into_response(),
        Ok(view) => (StatusCode::OK, Json(view)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn resend_handler(
    State(service): State<Arc<ComparisonService>>,
    Path(requisition_id): Path<String>,
) -> Response {
    match service
        .resend_report_email(&RequisitionId(requisition_id))
        .await
    {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn select_handler(
    State(service): State<Arc<ComparisonService>>,
    Path(requisition_id): Path<String>,
    Json(body): Json<SelectionBody>,
) -> Response {
    let request = SelectionRequest {
        requisition_id: RequisitionId(requisition_id),
        offer_id: body.offer_id,
        acting_user: body.acting_user,
        channel: body.channel.unwrap_or(SelectionChannel::Api),
        reason: body.reason,
    };
    match service.select(request, Utc::now()).await {
        Ok(outcome) => (StatusCode::CREATED, Json(outcome)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn selection_audit_handler(
    State(service): State<Arc<ComparisonService>>,
    Path(requisition_id): Path<String>,
) -> Response {
    match service
        .selection_audit(&RequisitionId(requisition_id))
        .await
    {
        Ok(audit) => (StatusCode::OK, Json(audit)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn retry_notifications_handler(
    State(service): State<Arc<ComparisonService>>,
    Path(requisition_id): Path<String>,
) -> Response {
    match service
        .retry_notifications(&RequisitionId(requisition_id), Utc::now())
        .await
    {
        Ok(retry) => (StatusCode::OK, Json(retry)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn retry_purchase_order_handler(
    State(service): State<Arc<ComparisonService>>,
    Path(requisition_id): Path<String>,
) -> Response {
    match service
        .retry_purchase_order(&RequisitionId(requisition_id))
        .await
    {
        Ok(purchase_order_id) => (
            StatusCode::OK,
            Json(json!({ "purchase_order_id": purchase_order_id })),
        )
            .into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn check_deadlines_handler(
    State(service): State<Arc<ComparisonService>>,
) -> Response {
    let summary = service.check_deadlines(Utc::now()).await;
    (StatusCode::OK, Json(summary)).into_response()
}

pub(crate) async fn negotiation_handler(
    State(service): State<Arc<ComparisonService>>,
    Json(session): Json<NegotiationSession>,
) -> Response {
    match service.record_negotiation(session, Utc::now()).await {
        Ok(recorded) => (StatusCode::ACCEPTED, Json(recorded)).into_response(),
        Err(err) => error_response(err),
    }
}

fn error_response(err: ComparisonError) -> Response {
    let status = match &err {
        ComparisonError::RequisitionNotFound
        | ComparisonError::Repository(RepositoryError::NotFound)
        | ComparisonError::Report(ReportError::RequisitionNotFound | ReportError::ReportNotFound)
        | ComparisonError::Selection(
            SelectionError::RequisitionNotFound
            | SelectionError::OfferNotFound
            | SelectionError::SelectionNotFound,
        ) => StatusCode::NOT_FOUND,
        ComparisonError::Selection(SelectionError::AlreadyAwarded)
        | ComparisonError::Selection(SelectionError::Repository(RepositoryError::AlreadyAwarded))
        | ComparisonError::Repository(RepositoryError::AlreadyAwarded | RepositoryError::Conflict) => {
            StatusCode::CONFLICT
        }
        ComparisonError::Selection(
            SelectionError::OfferExcluded
            | SelectionError::OfferSuperseded
            | SelectionError::OfferRequisitionMismatch,
        )
        | ComparisonError::Report(ReportError::MissingOwner | ReportError::MissingOwnerEmail) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        ComparisonError::Report(ReportError::NoCompletedOffers) => StatusCode::BAD_REQUEST,
        ComparisonError::Report(ReportError::Render(_))
        | ComparisonError::Selection(SelectionError::PurchaseOrder(_)) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status.is_server_error() {
        error!(error = %err, status = status.as_u16(), "comparison request failed");
    }

    let payload = json!({
        "error": err.to_string(),
    });
    (status, Json(payload)).into_response()
}
