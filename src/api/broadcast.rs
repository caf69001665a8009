//! Broadcast endpoints.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::broadcast::{BroadcastRequest, BroadcastSummary, MessageTag, StopReason};
use crate::error::{AppError, Result};
use crate::ratelimit::RateLimitResult;
use crate::server::{AppState, PageToken};
use crate::store::{BroadcastRecord, BroadcastStatus, DeliveryRecord, StoreError};

const DEFAULT_LIST_LIMIT: usize = 20;
const MAX_LIST_LIMIT: usize = 100;

/// Body of `POST /api/v1/broadcasts`
#[derive(Debug, Deserialize)]
pub struct CreateBroadcastRequest {
    #[serde(default)]
    pub page_id: String,
    /// Spintax template
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub message_tag: Option<MessageTag>,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub recipient_ids: Option<Vec<String>>,
}

impl From<CreateBroadcastRequest> for BroadcastRequest {
    fn from(body: CreateBroadcastRequest) -> Self {
        BroadcastRequest {
            page_id: body.page_id.trim().to_string(),
            template: body.message,
            message_tag: body.message_tag,
            scheduled_at: body.scheduled_at,
            recipient_ids: body.recipient_ids,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SummaryBody {
    pub total: usize,
    pub sent: usize,
    pub failed: usize,
}

impl From<BroadcastSummary> for SummaryBody {
    fn from(summary: BroadcastSummary) -> Self {
        Self {
            total: summary.total,
            sent: summary.succeeded,
            failed: summary.failed,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BroadcastResponse {
    pub success: bool,
    pub broadcast_id: Uuid,
    pub status: BroadcastStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<SummaryBody>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct ListBroadcastsQuery {
    pub page_id: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct ListBroadcastsResponse {
    pub broadcasts: Vec<BroadcastRecord>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct BroadcastDetail {
    #[serde(flatten)]
    pub record: BroadcastRecord,
    /// Whether the broadcast is currently running or waiting to run
    pub active: bool,
}

#[derive(Debug, Serialize)]
pub struct DeliveriesResponse {
    pub broadcast_id: Uuid,
    pub deliveries: Vec<DeliveryRecord>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub broadcast_id: Uuid,
    pub cancelled: bool,
}

/// POST /api/v1/broadcasts
///
/// Runs the broadcast to completion and returns its summary, or stores it
/// for later when `scheduled_at` is in the future (202).
#[tracing::instrument(
    name = "http.create_broadcast",
    skip(state, token, payload),
    fields(page_id = tracing::field::Empty)
)]
pub async fn create_broadcast(
    State(state): State<AppState>,
    PageToken(token): PageToken,
    payload: std::result::Result<Json<CreateBroadcastRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<BroadcastResponse>)> {
    let Json(body) = payload.map_err(|e| AppError::Validation(e.body_text()))?;
    let request = BroadcastRequest::from(body);
    tracing::Span::current().record("page_id", request.page_id.as_str());
    request.validate()?;

    if let RateLimitResult::Denied { retry_after } = state.limiter.check(&request.page_id) {
        return Err(AppError::RateLimited { retry_after });
    }

    let messenger = Arc::new(
        state
            .graph
            .page(request.page_id.as_str(), token, request.message_tag),
    );

    if request.is_scheduled(Utc::now()) {
        let record = state
            .service
            .schedule(request, messenger.clone(), messenger)
            .await?;

        return Ok((
            StatusCode::ACCEPTED,
            Json(BroadcastResponse {
                success: true,
                broadcast_id: record.id,
                status: record.status,
                summary: None,
                stop_reason: None,
                scheduled_at: record.scheduled_at,
            }),
        ));
    }

    let report = state
        .service
        .send_now(request, messenger.clone(), messenger)
        .await?;

    Ok((
        StatusCode::OK,
        Json(BroadcastResponse {
            success: true,
            broadcast_id: report.broadcast_id,
            status: report.status,
            summary: Some(report.summary.into()),
            stop_reason: Some(report.stop),
            scheduled_at: None,
        }),
    ))
}

/// GET /api/v1/broadcasts
pub async fn list_broadcasts(
    State(state): State<AppState>,
    Query(query): Query<ListBroadcastsQuery>,
) -> Result<Json<ListBroadcastsResponse>> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);
    let page_id = query.page_id.as_deref().filter(|p| !p.is_empty());

    let broadcasts = state.store().list(page_id, limit).await?;
    let total = broadcasts.len();
    Ok(Json(ListBroadcastsResponse { broadcasts, total }))
}

/// GET /api/v1/broadcasts/{id}
pub async fn get_broadcast(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<BroadcastDetail>> {
    let id = parse_broadcast_id(&id)?;
    let record = state
        .store()
        .get(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Broadcast {} not found", id)))?;

    Ok(Json(BroadcastDetail {
        record,
        active: state.service.is_active(id),
    }))
}

/// GET /api/v1/broadcasts/{id}/deliveries
pub async fn list_deliveries(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeliveriesResponse>> {
    let id = parse_broadcast_id(&id)?;
    let deliveries = state.store().deliveries(id).await.map_err(|e| match e {
        StoreError::NotFound(id) => AppError::NotFound(format!("Broadcast {} not found", id)),
        other => AppError::Store(other),
    })?;

    let total = deliveries.len();
    Ok(Json(DeliveriesResponse {
        broadcast_id: id,
        deliveries,
        total,
    }))
}

/// POST /api/v1/broadcasts/{id}/cancel
#[tracing::instrument(name = "http.cancel_broadcast", skip(state))]
pub async fn cancel_broadcast(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CancelResponse>> {
    let id = parse_broadcast_id(&id)?;
    if state.service.cancel(id) {
        return Ok(Json(CancelResponse {
            broadcast_id: id,
            cancelled: true,
        }));
    }

    // Finished broadcasts cannot be cancelled; unknown ones are a 404
    match state.store().get(id).await? {
        Some(_) => Ok(Json(CancelResponse {
            broadcast_id: id,
            cancelled: false,
        })),
        None => Err(AppError::NotFound(format!("Broadcast {} not found", id))),
    }
}

fn parse_broadcast_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|_| AppError::Validation(format!("Invalid broadcast id: {}", raw)))
}
