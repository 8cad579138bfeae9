use std::net::SocketAddr;
use std::sync::OnceLock;

use anyhow::Result as AnyResult;
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, patch, post},
};
use ballast_core::{
    BulkReviewDisposition, CcStatus, DirectAction, ManagerAction, NewRequestItem, RequestStatus,
    ReviewOutcome, Role, SPLIT_FULFILLMENT_APPROVED_NOTE, VendorQuote, WorkflowError,
    authorize_transition, bulk_review_disposition, can_approve_split_fulfillment, can_edit_details,
    ensure_selected_vendor, format_draft_number, format_request_number, fulfillment_outcome,
    has_split_fulfillment_approval, is_draft_number, plan_inventory_split, quote_total,
    review_pending, validate_cc_transition, validate_quotes, validate_transition,
};
use ballast_inventory::{StockError, StockPosition};
use ballast_platform::{
    AddRequestNoteRequest, BulkReviewRequest, BulkReviewResponse, CostComparisonDecisionResponse,
    CostComparisonView, CreateMaterialRequestBatchRequest, CreateMaterialRequestRequest,
    CreateMaterialRequestResponse, DeductStockRequest, DeductStockResponse, DeleteDraftResponse,
    ListRequestsQuery, MarkDeliveryResponse, MaterialRequestBatchResponse,
    MaterialRequestListResponse, MaterialRequestView, QuoteTotal, RequestDetailResponse,
    RequestNoteListResponse, RequestNoteView, RequestStatusResponse, ReviewCostComparisonRequest,
    ReviewRequestRequest, SaveDraftBatchRequest, SendDraftRequest, SendDraftResponse,
    ServiceConfig, SplitDeliverRequest, SplitDeliverResponse, SplitFulfillmentResponse,
    UpdateDraftRequest, UpdatePurchaseStatusRequest, UpdateRequestDetailsRequest,
    UpsertCostComparisonRequest, connect_database,
};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{PgPool, Row, postgres::PgRow};
use tracing::info;
use uuid::Uuid;

const AUTH_SUBJECT_HEADER: &str = "x-auth-subject";
const COUNTER_REQUEST_NUMBER: &str = "request_number";
const COUNTER_DRAFT_NUMBER: &str = "draft_number";

#[derive(Clone)]
struct AppState {
    pool: PgPool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CreateVendorRequest {
    name: String,
    contact_email: String,
    phone: Option<String>,
    gst_number: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct VendorView {
    vendor_id: Uuid,
    name: String,
    contact_email: String,
    phone: Option<String>,
    gst_number: Option<String>,
    active: bool,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct VendorListResponse {
    items: Vec<VendorView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CreateSiteRequest {
    name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SiteView {
    site_id: Uuid,
    name: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SiteListResponse {
    items: Vec<SiteView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CreateInventoryItemRequest {
    item_name: String,
    #[serde(default)]
    central_stock: i64,
    #[serde(default)]
    vendor_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct InventoryItemView {
    item_id: Uuid,
    item_name: String,
    central_stock: i64,
    vendor_ids: Vec<Uuid>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct InventoryListResponse {
    items: Vec<InventoryItemView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct UpsertUserRequest {
    subject: String,
    name: String,
    email: String,
    role: Role,
    site_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct UserView {
    user_id: Uuid,
    subject: String,
    name: String,
    email: String,
    role: Role,
    site_id: Option<Uuid>,
    active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct UserListResponse {
    items: Vec<UserView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SendChatMessageRequest {
    recipient_id: Uuid,
    body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessageView {
    message_id: Uuid,
    sender_id: Uuid,
    recipient_id: Uuid,
    body: String,
    sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatHistoryQuery {
    peer: Uuid,
    limit: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatHistoryResponse {
    items: Vec<ChatMessageView>,
}

#[derive(Debug, Clone)]
struct Caller {
    user_id: Uuid,
    role: Role,
}

#[derive(Debug, Clone)]
struct RequestRecord {
    id: Uuid,
    request_number: String,
    item_order: i32,
    item_name: String,
    description: Option<String>,
    quantity: i64,
    unit: String,
    status: RequestStatus,
    direct_action: Option<DirectAction>,
    created_by: Uuid,
    approved_by: Option<Uuid>,
    site_id: Uuid,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl RequestRecord {
    fn into_view(self) -> MaterialRequestView {
        MaterialRequestView {
            request_id: self.id,
            request_number: self.request_number,
            item_order: self.item_order,
            item_name: self.item_name,
            description: self.description,
            quantity: self.quantity,
            unit: self.unit,
            status: self.status,
            direct_action: self.direct_action,
            created_by: self.created_by,
            approved_by: self.approved_by,
            site_id: self.site_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, Clone)]
struct ComparisonRecord {
    id: Uuid,
    request_id: Uuid,
    status: CcStatus,
    vendor_quotes: Vec<VendorQuote>,
    selected_vendor_id: Option<Uuid>,
    manager_notes: Option<String>,
    inventory_fulfillment_quantity: Option<i64>,
    updated_at: DateTime<Utc>,
}

impl ComparisonRecord {
    fn into_view(self, request_quantity: i64) -> CostComparisonView {
        let quote_totals = self
            .vendor_quotes
            .iter()
            .map(|quote| QuoteTotal {
                vendor_id: quote.vendor_id,
                total: quote_total(quote, request_quantity),
            })
            .collect();
        CostComparisonView {
            comparison_id: self.id,
            request_id: self.request_id,
            status: self.status,
            split_fulfillment_approved: has_split_fulfillment_approval(
                self.manager_notes.as_deref(),
            ),
            vendor_quotes: self.vendor_quotes,
            quote_totals,
            selected_vendor_id: self.selected_vendor_id,
            manager_notes: self.manager_notes,
            inventory_fulfillment_quantity: self.inventory_fulfillment_quantity,
            updated_at: self.updated_at,
        }
    }
}

#[tokio::main]
async fn main() -> AnyResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "ballast_gateway=info".to_string()),
        )
        .init();

    let config = ServiceConfig::from_env("0.0.0.0:8080")?;
    let pool = connect_database(&config).await?;
    sqlx::migrate!("../../migrations").run(&pool).await?;

    let state = AppState { pool };

    let router = Router::new()
        .route("/healthz", get(healthz))
        .route("/requests", get(list_requests).post(create_request))
        .route("/requests/batch", post(create_request_batch))
        .route("/requests/drafts", post(save_draft_batch))
        .route("/requests/drafts/send", post(send_draft))
        .route(
            "/requests/drafts/{request_id}",
            patch(update_draft).delete(delete_draft),
        )
        .route("/requests/bulk-review", post(bulk_review_requests))
        .route(
            "/requests/{request_id}",
            get(get_request).patch(update_request_details),
        )
        .route("/requests/{request_id}/review", post(review_request))
        .route("/requests/{request_id}/status", post(update_purchase_status))
        .route("/requests/{request_id}/direct-to-po", post(direct_to_po))
        .route("/requests/{request_id}/deliver", post(mark_delivery))
        .route(
            "/requests/{request_id}/split-deliver",
            post(split_and_deliver),
        )
        .route(
            "/requests/{request_id}/notes",
            get(list_request_notes).post(add_request_note),
        )
        .route(
            "/requests/{request_id}/cost-comparison",
            get(get_cost_comparison).put(upsert_cost_comparison),
        )
        .route(
            "/requests/{request_id}/cost-comparison/submit",
            post(submit_cost_comparison),
        )
        .route(
            "/requests/{request_id}/cost-comparison/review",
            post(review_cost_comparison),
        )
        .route(
            "/requests/{request_id}/cost-comparison/resubmit",
            post(resubmit_cost_comparison),
        )
        .route(
            "/requests/{request_id}/split-fulfillment/approve",
            post(approve_split_fulfillment),
        )
        .route(
            "/inventory",
            get(list_inventory).post(create_inventory_item),
        )
        .route("/inventory/deduct", post(deduct_inventory))
        .route("/vendors", get(list_vendors).post(create_vendor))
        .route("/vendors/{vendor_id}/deactivate", post(deactivate_vendor))
        .route("/sites", get(list_sites).post(create_site))
        .route("/users", get(list_users).post(upsert_user))
        .route(
            "/chat/messages",
            get(list_chat_messages).post(send_chat_message),
        )
        .with_state(state);

    let addr: SocketAddr = config.http_addr.parse()?;
    info!("gateway listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}

async fn healthz() -> &'static str {
    "ok"
}

async fn list_requests(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListRequestsQuery>,
) -> Result<Json<MaterialRequestListResponse>, (StatusCode, String)> {
    let caller = resolve_caller(&state.pool, &headers).await?;

    let limit = query.limit.unwrap_or(50).clamp(1, 200);
    let status_filter = query.status.map(|status| status.as_str().to_string());
    // Site engineers only ever see their own requests.
    let creator_filter = match caller.role {
        Role::SiteEngineer => Some(caller.user_id),
        Role::Manager | Role::PurchaseOfficer => None,
    };

    let rows = sqlx::query(
        r#"
        SELECT id, request_number, item_order, item_name, description, quantity, unit,
               status, direct_action, created_by, approved_by, site_id, created_at, updated_at
        FROM material_requests
        WHERE ($1::text IS NULL OR status = $1)
          AND ($2::text IS NULL OR request_number = $2)
          AND ($3::uuid IS NULL OR site_id = $3)
          AND ($4::uuid IS NULL OR created_by = $4)
        ORDER BY created_at DESC, item_order
        LIMIT $5
        "#,
    )
    .bind(status_filter)
    .bind(query.request_number)
    .bind(query.site_id)
    .bind(creator_filter)
    .bind(limit)
    .fetch_all(&state.pool)
    .await
    .map_err(internal_error)?;

    let mut items = Vec::with_capacity(rows.len());
    for row in &rows {
        let record = request_record_from_row(row).map_err(internal_error)?;
        items.push(record.into_view());
    }

    Ok(Json(MaterialRequestListResponse { items }))
}

async fn create_request(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateMaterialRequestRequest>,
) -> Result<(StatusCode, Json<CreateMaterialRequestResponse>), (StatusCode, String)> {
    let caller = resolve_caller(&state.pool, &headers).await?;
    if caller.role != Role::SiteEngineer {
        return Err(error_response(WorkflowError::unauthorized(
            "only a site engineer can raise a material request",
        )));
    }

    let item = normalize_item(NewRequestItem {
        item_name: payload.item_name,
        description: payload.description,
        quantity: payload.quantity,
        unit: payload.unit,
    })
    .map_err(error_response)?;

    ensure_site_exists(&state.pool, payload.site_id).await?;

    let now = Utc::now();
    let mut tx = state.pool.begin().await.map_err(internal_error)?;

    let sequence = next_counter(&mut tx, COUNTER_REQUEST_NUMBER)
        .await
        .map_err(internal_error)?;
    let request_number = format_request_number(sequence);

    let request_id = insert_request_row(
        &mut tx,
        &request_number,
        1,
        &item,
        RequestStatus::Pending,
        None,
        caller.user_id,
        payload.site_id,
        now,
    )
    .await
    .map_err(internal_error)?;

    tx.commit().await.map_err(internal_error)?;

    Ok((
        StatusCode::CREATED,
        Json(CreateMaterialRequestResponse {
            request_id,
            request_number,
            status: RequestStatus::Pending,
            created_at: now,
        }),
    ))
}

async fn create_request_batch(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateMaterialRequestBatchRequest>,
) -> Result<(StatusCode, Json<MaterialRequestBatchResponse>), (StatusCode, String)> {
    let caller = resolve_caller(&state.pool, &headers).await?;
    if caller.role != Role::SiteEngineer {
        return Err(error_response(WorkflowError::unauthorized(
            "only a site engineer can raise a material request",
        )));
    }

    let items = normalize_items(payload.items).map_err(error_response)?;
    ensure_site_exists(&state.pool, payload.site_id).await?;

    let now = Utc::now();
    let mut tx = state.pool.begin().await.map_err(internal_error)?;

    let sequence = next_counter(&mut tx, COUNTER_REQUEST_NUMBER)
        .await
        .map_err(internal_error)?;
    let request_number = format_request_number(sequence);

    let mut request_ids = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        let request_id = insert_request_row(
            &mut tx,
            &request_number,
            index as i32 + 1,
            item,
            RequestStatus::Pending,
            None,
            caller.user_id,
            payload.site_id,
            now,
        )
        .await
        .map_err(internal_error)?;
        request_ids.push(request_id);
    }

    tx.commit().await.map_err(internal_error)?;

    Ok((
        StatusCode::CREATED,
        Json(MaterialRequestBatchResponse {
            request_number,
            request_ids,
            status: RequestStatus::Pending,
        }),
    ))
}

async fn save_draft_batch(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<SaveDraftBatchRequest>,
) -> Result<(StatusCode, Json<MaterialRequestBatchResponse>), (StatusCode, String)> {
    let caller = resolve_caller(&state.pool, &headers).await?;
    if caller.role != Role::SiteEngineer {
        return Err(error_response(WorkflowError::unauthorized(
            "only a site engineer can save a material request draft",
        )));
    }

    let items = normalize_items(payload.items).map_err(error_response)?;
    ensure_site_exists(&state.pool, payload.site_id).await?;

    let now = Utc::now();
    let mut tx = state.pool.begin().await.map_err(internal_error)?;

    // Drafts number from their own counter so sent requests keep a gapless
    // request_number sequence.
    let sequence = next_counter(&mut tx, COUNTER_DRAFT_NUMBER)
        .await
        .map_err(internal_error)?;
    let draft_number = format_draft_number(sequence);

    let mut request_ids = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        let request_id = insert_request_row(
            &mut tx,
            &draft_number,
            index as i32 + 1,
            item,
            RequestStatus::Draft,
            None,
            caller.user_id,
            payload.site_id,
            now,
        )
        .await
        .map_err(internal_error)?;
        request_ids.push(request_id);
    }

    tx.commit().await.map_err(internal_error)?;

    Ok((
        StatusCode::CREATED,
        Json(MaterialRequestBatchResponse {
            request_number: draft_number,
            request_ids,
            status: RequestStatus::Draft,
        }),
    ))
}

async fn send_draft(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<SendDraftRequest>,
) -> Result<Json<SendDraftResponse>, (StatusCode, String)> {
    let caller = resolve_caller(&state.pool, &headers).await?;

    let draft_number = payload.draft_number.trim().to_string();
    if !is_draft_number(&draft_number) {
        return Err(error_response(WorkflowError::validation(
            "draft number must start with DRAFT-",
        )));
    }

    let now = Utc::now();
    let mut tx = state.pool.begin().await.map_err(internal_error)?;

    let rows = sqlx::query(
        r#"
        SELECT id, status, created_by
        FROM material_requests
        WHERE request_number = $1
        ORDER BY item_order
        FOR UPDATE
        "#,
    )
    .bind(&draft_number)
    .fetch_all(&mut *tx)
    .await
    .map_err(internal_error)?;

    if rows.is_empty() {
        return Err(error_response(WorkflowError::not_found("draft request")));
    }

    let mut request_ids = Vec::with_capacity(rows.len());
    for row in &rows {
        let status: String = row.try_get("status").map_err(internal_error)?;
        let created_by: Uuid = row.try_get("created_by").map_err(internal_error)?;
        if status != RequestStatus::Draft.as_str() {
            return Err(error_response(WorkflowError::validation(
                "every item of the draft must still be in draft",
            )));
        }
        if created_by != caller.user_id {
            return Err(error_response(WorkflowError::validation(
                "draft items can only be sent by their creator",
            )));
        }
        request_ids.push(row.try_get::<Uuid, _>("id").map_err(internal_error)?);
    }

    let sequence = next_counter(&mut tx, COUNTER_REQUEST_NUMBER)
        .await
        .map_err(internal_error)?;
    let request_number = format_request_number(sequence);

    sqlx::query(
        "UPDATE material_requests SET request_number = $2, status = $3, updated_at = $4 WHERE request_number = $1",
    )
    .bind(&draft_number)
    .bind(&request_number)
    .bind(RequestStatus::Pending.as_str())
    .bind(now)
    .execute(&mut *tx)
    .await
    .map_err(internal_error)?;

    // Notes follow the order to its new number; moved, not copied.
    sqlx::query("UPDATE request_notes SET request_number = $2 WHERE request_number = $1")
        .bind(&draft_number)
        .bind(&request_number)
        .execute(&mut *tx)
        .await
        .map_err(internal_error)?;

    tx.commit().await.map_err(internal_error)?;

    Ok(Json(SendDraftResponse {
        request_number,
        request_ids,
        status: RequestStatus::Pending,
    }))
}

async fn update_draft(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(request_id): Path<Uuid>,
    Json(payload): Json<UpdateDraftRequest>,
) -> Result<Json<MaterialRequestView>, (StatusCode, String)> {
    let caller = resolve_caller(&state.pool, &headers).await?;

    let now = Utc::now();
    let mut tx = state.pool.begin().await.map_err(internal_error)?;

    let record = lock_request(&mut tx, request_id)
        .await
        .map_err(internal_error)?;
    let Some(record) = record else {
        return Err(error_response(WorkflowError::not_found("draft request")));
    };
    if record.created_by != caller.user_id {
        return Err(error_response(WorkflowError::unauthorized(
            "only the draft creator can edit it",
        )));
    }
    if record.status != RequestStatus::Draft {
        return Err(error_response(WorkflowError::validation(
            "only draft requests can be edited",
        )));
    }

    let item = normalize_item(NewRequestItem {
        item_name: payload.item_name.unwrap_or_else(|| record.item_name.clone()),
        description: payload.description.or_else(|| record.description.clone()),
        quantity: payload.quantity.unwrap_or(record.quantity),
        unit: payload.unit.unwrap_or_else(|| record.unit.clone()),
    })
    .map_err(error_response)?;

    sqlx::query(
        "UPDATE material_requests SET item_name = $2, description = $3, quantity = $4, unit = $5, updated_at = $6 WHERE id = $1",
    )
    .bind(request_id)
    .bind(&item.item_name)
    .bind(&item.description)
    .bind(item.quantity)
    .bind(&item.unit)
    .bind(now)
    .execute(&mut *tx)
    .await
    .map_err(internal_error)?;

    tx.commit().await.map_err(internal_error)?;

    let record = RequestRecord {
        item_name: item.item_name,
        description: item.description,
        quantity: item.quantity,
        unit: item.unit,
        updated_at: now,
        ..record
    };
    Ok(Json(record.into_view()))
}

async fn delete_draft(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(request_id): Path<Uuid>,
) -> Result<Json<DeleteDraftResponse>, (StatusCode, String)> {
    let caller = resolve_caller(&state.pool, &headers).await?;

    let mut tx = state.pool.begin().await.map_err(internal_error)?;

    let record = lock_request(&mut tx, request_id)
        .await
        .map_err(internal_error)?;
    let Some(record) = record else {
        return Err(error_response(WorkflowError::not_found("draft request")));
    };
    if record.created_by != caller.user_id {
        return Err(error_response(WorkflowError::unauthorized(
            "only the draft creator can delete it",
        )));
    }
    if record.status != RequestStatus::Draft {
        return Err(error_response(WorkflowError::validation(
            "only draft requests can be deleted",
        )));
    }

    sqlx::query("DELETE FROM material_requests WHERE id = $1")
        .bind(request_id)
        .execute(&mut *tx)
        .await
        .map_err(internal_error)?;

    let remaining = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM material_requests WHERE request_number = $1",
    )
    .bind(&record.request_number)
    .fetch_one(&mut *tx)
    .await
    .map_err(internal_error)?;

    // Notes belong to the draft number; once the last item is gone they have
    // nothing left to annotate.
    if remaining == 0 {
        sqlx::query("DELETE FROM request_notes WHERE request_number = $1")
            .bind(&record.request_number)
            .execute(&mut *tx)
            .await
            .map_err(internal_error)?;
    }

    tx.commit().await.map_err(internal_error)?;

    Ok(Json(DeleteDraftResponse {
        request_id,
        deleted: true,
    }))
}

async fn bulk_review_requests(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<BulkReviewRequest>,
) -> Result<Json<BulkReviewResponse>, (StatusCode, String)> {
    let caller = resolve_caller(&state.pool, &headers).await?;
    if caller.role != Role::Manager {
        return Err(error_response(WorkflowError::unauthorized(
            "only a manager can review a pending request",
        )));
    }
    if payload.request_ids.is_empty() {
        return Err(error_response(WorkflowError::validation(
            "at least one request id is required",
        )));
    }
    if payload.action == ManagerAction::Reject {
        let reason = payload.reason.as_deref().map(str::trim).unwrap_or_default();
        if reason.is_empty() {
            return Err(error_response(WorkflowError::validation(
                "Rejection reason is required",
            )));
        }
    }

    let mut updated_count = 0_i64;
    let mut skipped_ids = Vec::new();

    // Each id commits on its own; one bad id never rolls back the rest.
    for request_id in payload.request_ids {
        let now = Utc::now();
        let mut tx = state.pool.begin().await.map_err(internal_error)?;

        let record = lock_request(&mut tx, request_id)
            .await
            .map_err(internal_error)?;
        let disposition = bulk_review_disposition(
            record.as_ref().map(|record| record.status),
            payload.action,
            payload.reason.as_deref(),
        );
        let (record, outcome) = match (record, disposition) {
            (Some(record), BulkReviewDisposition::Updated(outcome)) => (record, outcome),
            _ => {
                skipped_ids.push(request_id);
                continue;
            }
        };

        let direct_action = match payload.action {
            ManagerAction::Approve => payload.direct_action.or(record.direct_action),
            ManagerAction::Reject => record.direct_action,
        };
        apply_review_outcome(&mut tx, &record, &outcome, caller.user_id, direct_action, now)
            .await
            .map_err(internal_error)?;

        tx.commit().await.map_err(internal_error)?;
        updated_count += 1;
    }

    Ok(Json(BulkReviewResponse {
        updated_count,
        skipped_ids,
    }))
}

async fn get_request(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(request_id): Path<Uuid>,
) -> Result<Json<RequestDetailResponse>, (StatusCode, String)> {
    let caller = resolve_caller(&state.pool, &headers).await?;

    let record = fetch_request(&state.pool, request_id)
        .await
        .map_err(internal_error)?;
    let Some(record) = record else {
        return Err(error_response(WorkflowError::not_found("request")));
    };
    if caller.role == Role::SiteEngineer && record.created_by != caller.user_id {
        return Err(error_response(WorkflowError::unauthorized(
            "site engineers can only view their own requests",
        )));
    }

    let notes = fetch_notes(&state.pool, &record.request_number).await?;
    let comparison = fetch_comparison(&state.pool, request_id)
        .await
        .map_err(internal_error)?;
    let cost_comparison = comparison.map(|comparison| comparison.into_view(record.quantity));

    Ok(Json(RequestDetailResponse {
        request: record.into_view(),
        notes,
        cost_comparison,
    }))
}

async fn update_request_details(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(request_id): Path<Uuid>,
    Json(payload): Json<UpdateRequestDetailsRequest>,
) -> Result<Json<MaterialRequestView>, (StatusCode, String)> {
    let caller = resolve_caller(&state.pool, &headers).await?;
    if caller.role != Role::PurchaseOfficer {
        return Err(error_response(WorkflowError::unauthorized(
            "only a purchase officer can edit request details",
        )));
    }

    let now = Utc::now();
    let mut tx = state.pool.begin().await.map_err(internal_error)?;

    let record = lock_request(&mut tx, request_id)
        .await
        .map_err(internal_error)?;
    let Some(record) = record else {
        return Err(error_response(WorkflowError::not_found("request")));
    };
    if !can_edit_details(record.status) {
        return Err(error_response(WorkflowError::business_rule(
            "request details can only be edited during the cost comparison stage",
        )));
    }

    let item = normalize_item(NewRequestItem {
        item_name: payload.item_name.unwrap_or_else(|| record.item_name.clone()),
        description: payload.description.or_else(|| record.description.clone()),
        quantity: payload.quantity.unwrap_or(record.quantity),
        unit: payload.unit.unwrap_or_else(|| record.unit.clone()),
    })
    .map_err(error_response)?;

    sqlx::query(
        "UPDATE material_requests SET item_name = $2, description = $3, quantity = $4, unit = $5, updated_at = $6 WHERE id = $1",
    )
    .bind(request_id)
    .bind(&item.item_name)
    .bind(&item.description)
    .bind(item.quantity)
    .bind(&item.unit)
    .bind(now)
    .execute(&mut *tx)
    .await
    .map_err(internal_error)?;

    tx.commit().await.map_err(internal_error)?;

    let record = RequestRecord {
        item_name: item.item_name,
        description: item.description,
        quantity: item.quantity,
        unit: item.unit,
        updated_at: now,
        ..record
    };
    Ok(Json(record.into_view()))
}

async fn review_request(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(request_id): Path<Uuid>,
    Json(payload): Json<ReviewRequestRequest>,
) -> Result<Json<RequestStatusResponse>, (StatusCode, String)> {
    let caller = resolve_caller(&state.pool, &headers).await?;
    if caller.role != Role::Manager {
        return Err(error_response(WorkflowError::unauthorized(
            "only a manager can review a pending request",
        )));
    }

    let now = Utc::now();
    let mut tx = state.pool.begin().await.map_err(internal_error)?;

    let record = lock_request(&mut tx, request_id)
        .await
        .map_err(internal_error)?;
    let Some(record) = record else {
        return Err(error_response(WorkflowError::not_found("request")));
    };

    let outcome = review_pending(record.status, payload.action, payload.reason.as_deref())
        .map_err(error_response)?;
    let direct_action = match payload.action {
        ManagerAction::Approve => payload.direct_action.or(record.direct_action),
        ManagerAction::Reject => record.direct_action,
    };
    apply_review_outcome(&mut tx, &record, &outcome, caller.user_id, direct_action, now)
        .await
        .map_err(internal_error)?;

    tx.commit().await.map_err(internal_error)?;

    Ok(Json(RequestStatusResponse {
        request_id,
        request_number: record.request_number,
        status: outcome.next_status,
    }))
}

async fn update_purchase_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(request_id): Path<Uuid>,
    Json(payload): Json<UpdatePurchaseStatusRequest>,
) -> Result<Json<RequestStatusResponse>, (StatusCode, String)> {
    let caller = resolve_caller(&state.pool, &headers).await?;
    let target = payload.status;

    let now = Utc::now();
    let mut tx = state.pool.begin().await.map_err(internal_error)?;

    let record = lock_request(&mut tx, request_id)
        .await
        .map_err(internal_error)?;
    let Some(record) = record else {
        return Err(error_response(WorkflowError::not_found("request")));
    };

    authorize_transition(
        caller.role,
        record.created_by == caller.user_id,
        record.status,
        target,
    )
    .map_err(error_response)?;
    validate_transition(record.status, target).map_err(error_response)?;

    // Reaching delivered through the generic endpoint still books the stock.
    if target == RequestStatus::Delivered {
        receive_delivery_stock(&mut tx, &record, now)
            .await
            .map_err(internal_error)?;
    }

    sqlx::query("UPDATE material_requests SET status = $2, updated_at = $3 WHERE id = $1")
        .bind(request_id)
        .bind(target.as_str())
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(internal_error)?;

    tx.commit().await.map_err(internal_error)?;

    Ok(Json(RequestStatusResponse {
        request_id,
        request_number: record.request_number,
        status: target,
    }))
}

async fn direct_to_po(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(request_id): Path<Uuid>,
) -> Result<Json<RequestStatusResponse>, (StatusCode, String)> {
    let caller = resolve_caller(&state.pool, &headers).await?;

    let now = Utc::now();
    let mut tx = state.pool.begin().await.map_err(internal_error)?;

    let record = lock_request(&mut tx, request_id)
        .await
        .map_err(internal_error)?;
    let Some(record) = record else {
        return Err(error_response(WorkflowError::not_found("request")));
    };

    authorize_transition(
        caller.role,
        record.created_by == caller.user_id,
        record.status,
        RequestStatus::ReadyForPo,
    )
    .map_err(error_response)?;
    // Only the cost comparison stage can be fast-pathed; a rejected PO takes
    // its own retry edge instead.
    if !matches!(
        record.status,
        RequestStatus::Recheck | RequestStatus::ReadyForCc
    ) {
        return Err(error_response(WorkflowError::invalid_transition(
            record.status,
            RequestStatus::ReadyForPo,
        )));
    }
    validate_transition(record.status, RequestStatus::ReadyForPo).map_err(error_response)?;

    sqlx::query(
        "UPDATE material_requests SET status = $2, direct_action = $3, updated_at = $4 WHERE id = $1",
    )
    .bind(request_id)
    .bind(RequestStatus::ReadyForPo.as_str())
    .bind(DirectAction::Po.as_str())
    .bind(now)
    .execute(&mut *tx)
    .await
    .map_err(internal_error)?;

    tx.commit().await.map_err(internal_error)?;

    Ok(Json(RequestStatusResponse {
        request_id,
        request_number: record.request_number,
        status: RequestStatus::ReadyForPo,
    }))
}

async fn mark_delivery(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(request_id): Path<Uuid>,
) -> Result<Json<MarkDeliveryResponse>, (StatusCode, String)> {
    let caller = resolve_caller(&state.pool, &headers).await?;

    let now = Utc::now();
    let mut tx = state.pool.begin().await.map_err(internal_error)?;

    let record = lock_request(&mut tx, request_id)
        .await
        .map_err(internal_error)?;
    let Some(record) = record else {
        return Err(error_response(WorkflowError::not_found("request")));
    };

    authorize_transition(
        caller.role,
        record.created_by == caller.user_id,
        record.status,
        RequestStatus::Delivered,
    )
    .map_err(error_response)?;
    validate_transition(record.status, RequestStatus::Delivered).map_err(error_response)?;

    let central_stock = receive_delivery_stock(&mut tx, &record, now)
        .await
        .map_err(internal_error)?;

    sqlx::query("UPDATE material_requests SET status = $2, updated_at = $3 WHERE id = $1")
        .bind(request_id)
        .bind(RequestStatus::Delivered.as_str())
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(internal_error)?;

    tx.commit().await.map_err(internal_error)?;

    Ok(Json(MarkDeliveryResponse {
        request_id,
        status: RequestStatus::Delivered,
        item_name: record.item_name,
        central_stock,
    }))
}

async fn split_and_deliver(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(request_id): Path<Uuid>,
    Json(payload): Json<SplitDeliverRequest>,
) -> Result<Json<SplitDeliverResponse>, (StatusCode, String)> {
    let caller = resolve_caller(&state.pool, &headers).await?;

    let now = Utc::now();
    let mut tx = state.pool.begin().await.map_err(internal_error)?;

    let record = lock_request(&mut tx, request_id)
        .await
        .map_err(internal_error)?;
    let Some(record) = record else {
        return Err(error_response(WorkflowError::not_found("request")));
    };

    authorize_transition(
        caller.role,
        record.created_by == caller.user_id,
        record.status,
        RequestStatus::DeliveryStage,
    )
    .map_err(error_response)?;
    validate_transition(record.status, RequestStatus::DeliveryStage).map_err(error_response)?;

    let plan =
        plan_inventory_split(record.quantity, payload.inventory_quantity).map_err(error_response)?;

    let stock_row = sqlx::query(
        "SELECT id, item_name, central_stock FROM inventory_items WHERE item_name = $1 FOR UPDATE",
    )
    .bind(&record.item_name)
    .fetch_optional(&mut *tx)
    .await
    .map_err(internal_error)?;
    let Some(stock_row) = stock_row else {
        return Err(error_response(WorkflowError::not_found("inventory item")));
    };
    let item_id: Uuid = stock_row.try_get("id").map_err(internal_error)?;
    let mut position = StockPosition::new(
        stock_row
            .try_get::<String, _>("item_name")
            .map_err(internal_error)?,
        stock_row
            .try_get::<i64, _>("central_stock")
            .map_err(internal_error)?,
    );
    position.issue(plan.inventory_quantity).map_err(stock_error)?;

    sqlx::query("UPDATE inventory_items SET central_stock = $2, updated_at = $3 WHERE id = $1")
        .bind(item_id)
        .bind(position.central_stock)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(internal_error)?;

    // The covered part becomes a sibling line under the same request number.
    let next_order = sqlx::query_scalar::<_, i32>(
        "SELECT COALESCE(MAX(item_order), 0) + 1 FROM material_requests WHERE request_number = $1",
    )
    .bind(&record.request_number)
    .fetch_one(&mut *tx)
    .await
    .map_err(internal_error)?;

    let delivery_item = NewRequestItem {
        item_name: record.item_name.clone(),
        description: record.description.clone(),
        quantity: plan.inventory_quantity,
        unit: record.unit.clone(),
    };
    let delivery_request_id = insert_request_row(
        &mut tx,
        &record.request_number,
        next_order,
        &delivery_item,
        RequestStatus::DeliveryStage,
        Some(DirectAction::Delivery),
        record.created_by,
        record.site_id,
        now,
    )
    .await
    .map_err(internal_error)?;

    sqlx::query("UPDATE material_requests SET quantity = $2, updated_at = $3 WHERE id = $1")
        .bind(record.id)
        .bind(plan.remainder)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(internal_error)?;

    tx.commit().await.map_err(internal_error)?;

    Ok(Json(SplitDeliverResponse {
        request_id: record.id,
        remaining_quantity: plan.remainder,
        delivery_request_id,
        delivery_quantity: plan.inventory_quantity,
        central_stock: position.central_stock,
    }))
}

async fn list_request_notes(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(request_id): Path<Uuid>,
) -> Result<Json<RequestNoteListResponse>, (StatusCode, String)> {
    let caller = resolve_caller(&state.pool, &headers).await?;

    let record = fetch_request(&state.pool, request_id)
        .await
        .map_err(internal_error)?;
    let Some(record) = record else {
        return Err(error_response(WorkflowError::not_found("request")));
    };
    if caller.role == Role::SiteEngineer && record.created_by != caller.user_id {
        return Err(error_response(WorkflowError::unauthorized(
            "site engineers can only view their own requests",
        )));
    }

    let items = fetch_notes(&state.pool, &record.request_number).await?;
    Ok(Json(RequestNoteListResponse { items }))
}

async fn add_request_note(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(request_id): Path<Uuid>,
    Json(payload): Json<AddRequestNoteRequest>,
) -> Result<(StatusCode, Json<RequestNoteView>), (StatusCode, String)> {
    let caller = resolve_caller(&state.pool, &headers).await?;

    let body = payload.body.trim().to_string();
    if body.is_empty() {
        return Err(error_response(WorkflowError::validation(
            "note body is required",
        )));
    }

    let now = Utc::now();
    let mut tx = state.pool.begin().await.map_err(internal_error)?;

    let record = lock_request(&mut tx, request_id)
        .await
        .map_err(internal_error)?;
    let Some(record) = record else {
        return Err(error_response(WorkflowError::not_found("request")));
    };
    if caller.role == Role::SiteEngineer && record.created_by != caller.user_id {
        return Err(error_response(WorkflowError::unauthorized(
            "site engineers can only annotate their own requests",
        )));
    }

    let note_id = insert_note(&mut tx, &record.request_number, caller.user_id, &body, now)
        .await
        .map_err(internal_error)?;

    tx.commit().await.map_err(internal_error)?;

    Ok((
        StatusCode::CREATED,
        Json(RequestNoteView {
            note_id,
            request_number: record.request_number,
            author_id: caller.user_id,
            body,
            created_at: now,
        }),
    ))
}

async fn get_cost_comparison(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(request_id): Path<Uuid>,
) -> Result<Json<CostComparisonView>, (StatusCode, String)> {
    let caller = resolve_caller(&state.pool, &headers).await?;

    let record = fetch_request(&state.pool, request_id)
        .await
        .map_err(internal_error)?;
    let Some(record) = record else {
        return Err(error_response(WorkflowError::not_found("request")));
    };
    if caller.role == Role::SiteEngineer && record.created_by != caller.user_id {
        return Err(error_response(WorkflowError::unauthorized(
            "site engineers can only view their own requests",
        )));
    }

    let comparison = fetch_comparison(&state.pool, request_id)
        .await
        .map_err(internal_error)?;
    let Some(comparison) = comparison else {
        return Err(error_response(WorkflowError::not_found("cost comparison")));
    };

    Ok(Json(comparison.into_view(record.quantity)))
}

async fn upsert_cost_comparison(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(request_id): Path<Uuid>,
    Json(payload): Json<UpsertCostComparisonRequest>,
) -> Result<Json<CostComparisonView>, (StatusCode, String)> {
    let caller = resolve_caller(&state.pool, &headers).await?;
    if caller.role != Role::PurchaseOfficer {
        return Err(error_response(WorkflowError::unauthorized(
            "only a purchase officer can edit a cost comparison",
        )));
    }

    validate_quotes(&payload.vendor_quotes).map_err(error_response)?;
    if let Some(quantity) = payload.inventory_fulfillment_quantity {
        if quantity <= 0 {
            return Err(error_response(WorkflowError::validation(
                "inventory fulfillment quantity must be greater than zero",
            )));
        }
    }

    let now = Utc::now();
    let mut tx = state.pool.begin().await.map_err(internal_error)?;

    let record = lock_request(&mut tx, request_id)
        .await
        .map_err(internal_error)?;
    let Some(record) = record else {
        return Err(error_response(WorkflowError::not_found("request")));
    };
    if record.status != RequestStatus::ReadyForCc {
        return Err(error_response(WorkflowError::business_rule(
            "cost comparison is only editable while the request is ready for cost comparison",
        )));
    }

    let vendor_ids: Vec<Uuid> = payload
        .vendor_quotes
        .iter()
        .map(|quote| quote.vendor_id)
        .collect();
    ensure_vendors_active(&mut tx, &vendor_ids).await?;

    let quotes_value = serde_json::to_value(&payload.vendor_quotes).map_err(internal_error)?;
    let existing = lock_comparison(&mut tx, request_id)
        .await
        .map_err(internal_error)?;

    match existing {
        Some(comparison) => {
            if !matches!(comparison.status, CcStatus::Draft | CcStatus::CcRejected) {
                return Err(error_response(WorkflowError::business_rule(
                    "a submitted cost comparison can no longer be edited",
                )));
            }
            sqlx::query(
                "UPDATE cost_comparisons SET vendor_quotes = $2, inventory_fulfillment_quantity = $3, updated_at = $4 WHERE id = $1",
            )
            .bind(comparison.id)
            .bind(&quotes_value)
            .bind(payload.inventory_fulfillment_quantity)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(internal_error)?;
        }
        None => {
            sqlx::query(
                "INSERT INTO cost_comparisons (id, request_id, status, vendor_quotes, inventory_fulfillment_quantity, updated_at) VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(Uuid::new_v4())
            .bind(request_id)
            .bind(CcStatus::Draft.as_str())
            .bind(&quotes_value)
            .bind(payload.inventory_fulfillment_quantity)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(internal_error)?;
        }
    }

    let comparison = lock_comparison(&mut tx, request_id)
        .await
        .map_err(internal_error)?;
    let Some(comparison) = comparison else {
        return Err(error_response(WorkflowError::not_found("cost comparison")));
    };

    tx.commit().await.map_err(internal_error)?;

    Ok(Json(comparison.into_view(record.quantity)))
}

async fn submit_cost_comparison(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(request_id): Path<Uuid>,
) -> Result<Json<CostComparisonDecisionResponse>, (StatusCode, String)> {
    let caller = resolve_caller(&state.pool, &headers).await?;
    if caller.role != Role::PurchaseOfficer {
        return Err(error_response(WorkflowError::unauthorized(
            "only a purchase officer can submit a cost comparison",
        )));
    }

    let now = Utc::now();
    let mut tx = state.pool.begin().await.map_err(internal_error)?;

    let record = lock_request(&mut tx, request_id)
        .await
        .map_err(internal_error)?;
    let Some(record) = record else {
        return Err(error_response(WorkflowError::not_found("request")));
    };
    let comparison = lock_comparison(&mut tx, request_id)
        .await
        .map_err(internal_error)?;
    let Some(comparison) = comparison else {
        return Err(error_response(WorkflowError::not_found("cost comparison")));
    };

    validate_cc_transition(comparison.status, CcStatus::CcPending).map_err(error_response)?;
    if comparison.vendor_quotes.is_empty() {
        return Err(error_response(WorkflowError::validation(
            "at least one vendor quote is required",
        )));
    }
    validate_transition(record.status, RequestStatus::CcPending).map_err(error_response)?;

    sqlx::query("UPDATE cost_comparisons SET status = $2, updated_at = $3 WHERE id = $1")
        .bind(comparison.id)
        .bind(CcStatus::CcPending.as_str())
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(internal_error)?;

    sqlx::query("UPDATE material_requests SET status = $2, updated_at = $3 WHERE id = $1")
        .bind(record.id)
        .bind(RequestStatus::CcPending.as_str())
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(internal_error)?;

    tx.commit().await.map_err(internal_error)?;

    Ok(Json(CostComparisonDecisionResponse {
        request_id,
        comparison_status: CcStatus::CcPending,
        request_status: RequestStatus::CcPending,
    }))
}

async fn review_cost_comparison(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(request_id): Path<Uuid>,
    Json(payload): Json<ReviewCostComparisonRequest>,
) -> Result<Json<CostComparisonDecisionResponse>, (StatusCode, String)> {
    let caller = resolve_caller(&state.pool, &headers).await?;
    if caller.role != Role::Manager {
        return Err(error_response(WorkflowError::unauthorized(
            "only a manager can review a cost comparison",
        )));
    }

    let now = Utc::now();
    let mut tx = state.pool.begin().await.map_err(internal_error)?;

    let record = lock_request(&mut tx, request_id)
        .await
        .map_err(internal_error)?;
    let Some(record) = record else {
        return Err(error_response(WorkflowError::not_found("request")));
    };
    let comparison = lock_comparison(&mut tx, request_id)
        .await
        .map_err(internal_error)?;
    let Some(comparison) = comparison else {
        return Err(error_response(WorkflowError::not_found("cost comparison")));
    };

    match payload.action {
        ManagerAction::Approve => {
            let Some(vendor_id) = payload.selected_vendor_id else {
                return Err(error_response(WorkflowError::validation(
                    "selected vendor is required",
                )));
            };
            validate_cc_transition(comparison.status, CcStatus::CcApproved)
                .map_err(error_response)?;
            ensure_selected_vendor(&comparison.vendor_quotes, vendor_id).map_err(error_response)?;
            // The request marches through cc_approved straight to ready_for_po.
            validate_transition(record.status, RequestStatus::CcApproved)
                .map_err(error_response)?;
            validate_transition(RequestStatus::CcApproved, RequestStatus::ReadyForPo)
                .map_err(error_response)?;

            let manager_notes = normalize_optional_text(payload.notes);
            sqlx::query(
                "UPDATE cost_comparisons SET status = $2, selected_vendor_id = $3, manager_notes = COALESCE($4, manager_notes), updated_at = $5 WHERE id = $1",
            )
            .bind(comparison.id)
            .bind(CcStatus::CcApproved.as_str())
            .bind(vendor_id)
            .bind(&manager_notes)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(internal_error)?;

            sqlx::query("UPDATE material_requests SET status = $2, updated_at = $3 WHERE id = $1")
                .bind(record.id)
                .bind(RequestStatus::ReadyForPo.as_str())
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(internal_error)?;

            insert_note(
                &mut tx,
                &record.request_number,
                caller.user_id,
                "Cost comparison approved",
                now,
            )
            .await
            .map_err(internal_error)?;

            tx.commit().await.map_err(internal_error)?;

            Ok(Json(CostComparisonDecisionResponse {
                request_id,
                comparison_status: CcStatus::CcApproved,
                request_status: RequestStatus::ReadyForPo,
            }))
        }
        ManagerAction::Reject => {
            let Some(reason) = normalize_optional_text(payload.notes) else {
                return Err(error_response(WorkflowError::validation(
                    "Rejection reason is required",
                )));
            };
            validate_cc_transition(comparison.status, CcStatus::CcRejected)
                .map_err(error_response)?;
            validate_transition(record.status, RequestStatus::ReadyForCc)
                .map_err(error_response)?;

            sqlx::query(
                "UPDATE cost_comparisons SET status = $2, manager_notes = $3, updated_at = $4 WHERE id = $1",
            )
            .bind(comparison.id)
            .bind(CcStatus::CcRejected.as_str())
            .bind(&reason)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(internal_error)?;

            sqlx::query("UPDATE material_requests SET status = $2, updated_at = $3 WHERE id = $1")
                .bind(record.id)
                .bind(RequestStatus::ReadyForCc.as_str())
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(internal_error)?;

            let audit = format!("Cost comparison rejected: {reason}");
            insert_note(&mut tx, &record.request_number, caller.user_id, &audit, now)
                .await
                .map_err(internal_error)?;

            tx.commit().await.map_err(internal_error)?;

            Ok(Json(CostComparisonDecisionResponse {
                request_id,
                comparison_status: CcStatus::CcRejected,
                request_status: RequestStatus::ReadyForCc,
            }))
        }
    }
}

async fn resubmit_cost_comparison(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(request_id): Path<Uuid>,
) -> Result<Json<CostComparisonDecisionResponse>, (StatusCode, String)> {
    let caller = resolve_caller(&state.pool, &headers).await?;
    if caller.role != Role::PurchaseOfficer {
        return Err(error_response(WorkflowError::unauthorized(
            "only a purchase officer can resubmit a cost comparison",
        )));
    }

    let now = Utc::now();
    let mut tx = state.pool.begin().await.map_err(internal_error)?;

    let record = lock_request(&mut tx, request_id)
        .await
        .map_err(internal_error)?;
    let Some(record) = record else {
        return Err(error_response(WorkflowError::not_found("request")));
    };
    let comparison = lock_comparison(&mut tx, request_id)
        .await
        .map_err(internal_error)?;
    let Some(comparison) = comparison else {
        return Err(error_response(WorkflowError::not_found("cost comparison")));
    };

    if comparison.status != CcStatus::CcRejected {
        return Err(error_response(WorkflowError::business_rule(
            "only a rejected cost comparison can be resubmitted",
        )));
    }
    validate_cc_transition(comparison.status, CcStatus::CcPending).map_err(error_response)?;
    if comparison.vendor_quotes.is_empty() {
        return Err(error_response(WorkflowError::validation(
            "at least one vendor quote is required",
        )));
    }
    validate_transition(record.status, RequestStatus::CcPending).map_err(error_response)?;

    sqlx::query("UPDATE cost_comparisons SET status = $2, updated_at = $3 WHERE id = $1")
        .bind(comparison.id)
        .bind(CcStatus::CcPending.as_str())
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(internal_error)?;

    sqlx::query("UPDATE material_requests SET status = $2, updated_at = $3 WHERE id = $1")
        .bind(record.id)
        .bind(RequestStatus::CcPending.as_str())
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(internal_error)?;

    tx.commit().await.map_err(internal_error)?;

    Ok(Json(CostComparisonDecisionResponse {
        request_id,
        comparison_status: CcStatus::CcPending,
        request_status: RequestStatus::CcPending,
    }))
}

async fn approve_split_fulfillment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(request_id): Path<Uuid>,
) -> Result<Json<SplitFulfillmentResponse>, (StatusCode, String)> {
    let caller = resolve_caller(&state.pool, &headers).await?;
    if caller.role != Role::Manager {
        return Err(error_response(WorkflowError::unauthorized(
            "only a manager can approve split fulfillment",
        )));
    }

    let now = Utc::now();
    let mut tx = state.pool.begin().await.map_err(internal_error)?;

    let record = lock_request(&mut tx, request_id)
        .await
        .map_err(internal_error)?;
    let Some(record) = record else {
        return Err(error_response(WorkflowError::not_found("request")));
    };
    if !can_approve_split_fulfillment(record.status) {
        return Err(error_response(WorkflowError::business_rule(
            "split fulfillment can only be approved during the cost comparison stage",
        )));
    }

    let comparison = lock_comparison(&mut tx, request_id)
        .await
        .map_err(internal_error)?;
    let Some(comparison) = comparison else {
        return Err(error_response(WorkflowError::not_found("cost comparison")));
    };
    let Some(fulfilled) = comparison.inventory_fulfillment_quantity else {
        return Err(error_response(WorkflowError::business_rule(
            "no inventory fulfillment has been proposed for this request",
        )));
    };
    if has_split_fulfillment_approval(comparison.manager_notes.as_deref()) {
        return Err(error_response(WorkflowError::business_rule(
            "split fulfillment is already approved",
        )));
    }

    let manager_notes = match &comparison.manager_notes {
        Some(notes) => format!("{notes}\n{SPLIT_FULFILLMENT_APPROVED_NOTE}"),
        None => SPLIT_FULFILLMENT_APPROVED_NOTE.to_string(),
    };
    // The outstanding quantity is read at approval time, not proposal time.
    let next_status = fulfillment_outcome(record.quantity, fulfilled);

    sqlx::query("UPDATE cost_comparisons SET manager_notes = $2, updated_at = $3 WHERE id = $1")
        .bind(comparison.id)
        .bind(&manager_notes)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(internal_error)?;

    sqlx::query("UPDATE material_requests SET status = $2, updated_at = $3 WHERE id = $1")
        .bind(record.id)
        .bind(next_status.as_str())
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(internal_error)?;

    tx.commit().await.map_err(internal_error)?;

    Ok(Json(SplitFulfillmentResponse {
        request_id,
        status: next_status,
        inventory_fulfillment_quantity: fulfilled,
    }))
}

async fn list_inventory(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<InventoryListResponse>, (StatusCode, String)> {
    resolve_caller(&state.pool, &headers).await?;

    let rows = sqlx::query(
        "SELECT id, item_name, central_stock, vendor_ids, updated_at FROM inventory_items ORDER BY item_name",
    )
    .fetch_all(&state.pool)
    .await
    .map_err(internal_error)?;

    let mut items = Vec::with_capacity(rows.len());
    for row in &rows {
        items.push(InventoryItemView {
            item_id: row.try_get("id").map_err(internal_error)?,
            item_name: row.try_get("item_name").map_err(internal_error)?,
            central_stock: row.try_get("central_stock").map_err(internal_error)?,
            vendor_ids: row.try_get("vendor_ids").map_err(internal_error)?,
            updated_at: row.try_get("updated_at").map_err(internal_error)?,
        });
    }

    Ok(Json(InventoryListResponse { items }))
}

async fn create_inventory_item(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateInventoryItemRequest>,
) -> Result<(StatusCode, Json<InventoryItemView>), (StatusCode, String)> {
    let caller = resolve_caller(&state.pool, &headers).await?;
    if caller.role != Role::PurchaseOfficer {
        return Err(error_response(WorkflowError::unauthorized(
            "only a purchase officer can register inventory",
        )));
    }

    let item_name = payload.item_name.trim().to_string();
    if item_name.is_empty() {
        return Err(error_response(WorkflowError::validation(
            "item name is required",
        )));
    }
    if payload.central_stock < 0 {
        return Err(error_response(WorkflowError::validation(
            "central stock must not be negative",
        )));
    }

    let now = Utc::now();
    let mut tx = state.pool.begin().await.map_err(internal_error)?;

    if !payload.vendor_ids.is_empty() {
        ensure_vendors_active(&mut tx, &payload.vendor_ids).await?;
    }

    // The unique index arbitrates concurrent creates; a losing insert shows
    // up as zero rows, not a constraint error.
    let item_id = Uuid::new_v4();
    let inserted = sqlx::query(
        "INSERT INTO inventory_items (id, item_name, central_stock, vendor_ids, updated_at) VALUES ($1, $2, $3, $4, $5) ON CONFLICT (item_name) DO NOTHING",
    )
    .bind(item_id)
    .bind(&item_name)
    .bind(payload.central_stock)
    .bind(&payload.vendor_ids)
    .bind(now)
    .execute(&mut *tx)
    .await
    .map_err(internal_error)?;
    if inserted.rows_affected() == 0 {
        return Err(error_response(WorkflowError::business_rule(
            "an inventory item with this name already exists",
        )));
    }

    tx.commit().await.map_err(internal_error)?;

    Ok((
        StatusCode::CREATED,
        Json(InventoryItemView {
            item_id,
            item_name,
            central_stock: payload.central_stock,
            vendor_ids: payload.vendor_ids,
            updated_at: now,
        }),
    ))
}

async fn deduct_inventory(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<DeductStockRequest>,
) -> Result<Json<DeductStockResponse>, (StatusCode, String)> {
    let caller = resolve_caller(&state.pool, &headers).await?;
    if caller.role != Role::PurchaseOfficer {
        return Err(error_response(WorkflowError::unauthorized(
            "only a purchase officer can deduct stock",
        )));
    }

    let item_name = payload.item_name.trim().to_string();
    if item_name.is_empty() {
        return Err(error_response(WorkflowError::validation(
            "item name is required",
        )));
    }
    if payload.quantity <= 0 {
        return Err(error_response(WorkflowError::validation(
            "deduction quantity must be greater than zero",
        )));
    }

    let now = Utc::now();
    let mut tx = state.pool.begin().await.map_err(internal_error)?;

    let stock_row = sqlx::query(
        "SELECT id, item_name, central_stock FROM inventory_items WHERE item_name = $1 FOR UPDATE",
    )
    .bind(&item_name)
    .fetch_optional(&mut *tx)
    .await
    .map_err(internal_error)?;
    let Some(stock_row) = stock_row else {
        return Err(error_response(WorkflowError::not_found("inventory item")));
    };
    let item_id: Uuid = stock_row.try_get("id").map_err(internal_error)?;
    let mut position = StockPosition::new(
        stock_row
            .try_get::<String, _>("item_name")
            .map_err(internal_error)?,
        stock_row
            .try_get::<i64, _>("central_stock")
            .map_err(internal_error)?,
    );
    position.issue(payload.quantity).map_err(stock_error)?;

    sqlx::query("UPDATE inventory_items SET central_stock = $2, updated_at = $3 WHERE id = $1")
        .bind(item_id)
        .bind(position.central_stock)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(internal_error)?;

    tx.commit().await.map_err(internal_error)?;

    Ok(Json(DeductStockResponse {
        item_name: position.item_name,
        central_stock: position.central_stock,
    }))
}

async fn list_vendors(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<VendorListResponse>, (StatusCode, String)> {
    resolve_caller(&state.pool, &headers).await?;

    let rows = sqlx::query(
        "SELECT id, name, contact_email, phone, gst_number, active, created_at FROM vendors ORDER BY name",
    )
    .fetch_all(&state.pool)
    .await
    .map_err(internal_error)?;

    let mut items = Vec::with_capacity(rows.len());
    for row in &rows {
        items.push(vendor_view_from_row(row).map_err(internal_error)?);
    }

    Ok(Json(VendorListResponse { items }))
}

async fn create_vendor(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateVendorRequest>,
) -> Result<(StatusCode, Json<VendorView>), (StatusCode, String)> {
    let caller = resolve_caller(&state.pool, &headers).await?;
    if caller.role != Role::PurchaseOfficer {
        return Err(error_response(WorkflowError::unauthorized(
            "only a purchase officer can register vendors",
        )));
    }

    let name = payload.name.trim().to_string();
    if name.is_empty() {
        return Err(error_response(WorkflowError::validation(
            "vendor name is required",
        )));
    }
    let contact_email = normalize_email(&payload.contact_email).map_err(invalid_request)?;
    let gst_number = payload
        .gst_number
        .as_deref()
        .map(normalize_gst)
        .transpose()
        .map_err(invalid_request)?;
    let phone = normalize_optional_text(payload.phone);

    let now = Utc::now();
    let mut tx = state.pool.begin().await.map_err(internal_error)?;

    let vendor_id = Uuid::new_v4();
    let inserted = sqlx::query(
        "INSERT INTO vendors (id, name, contact_email, phone, gst_number, active, created_at) VALUES ($1, $2, $3, $4, $5, TRUE, $6) ON CONFLICT (lower(name)) DO NOTHING",
    )
    .bind(vendor_id)
    .bind(&name)
    .bind(&contact_email)
    .bind(&phone)
    .bind(&gst_number)
    .bind(now)
    .execute(&mut *tx)
    .await
    .map_err(internal_error)?;
    if inserted.rows_affected() == 0 {
        return Err(error_response(WorkflowError::business_rule(
            "a vendor with this name already exists",
        )));
    }

    tx.commit().await.map_err(internal_error)?;

    Ok((
        StatusCode::CREATED,
        Json(VendorView {
            vendor_id,
            name,
            contact_email,
            phone,
            gst_number,
            active: true,
            created_at: now,
        }),
    ))
}

async fn deactivate_vendor(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(vendor_id): Path<Uuid>,
) -> Result<Json<VendorView>, (StatusCode, String)> {
    let caller = resolve_caller(&state.pool, &headers).await?;
    if caller.role != Role::PurchaseOfficer {
        return Err(error_response(WorkflowError::unauthorized(
            "only a purchase officer can deactivate vendors",
        )));
    }

    // Deactivation keeps the row so past quotes stay resolvable.
    let row = sqlx::query(
        "UPDATE vendors SET active = FALSE WHERE id = $1 RETURNING id, name, contact_email, phone, gst_number, active, created_at",
    )
    .bind(vendor_id)
    .fetch_optional(&state.pool)
    .await
    .map_err(internal_error)?;
    let Some(row) = row else {
        return Err(error_response(WorkflowError::not_found("vendor")));
    };

    Ok(Json(vendor_view_from_row(&row).map_err(internal_error)?))
}

async fn list_sites(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<SiteListResponse>, (StatusCode, String)> {
    resolve_caller(&state.pool, &headers).await?;

    let rows = sqlx::query("SELECT id, name, created_at FROM sites ORDER BY name")
        .fetch_all(&state.pool)
        .await
        .map_err(internal_error)?;

    let mut items = Vec::with_capacity(rows.len());
    for row in &rows {
        items.push(SiteView {
            site_id: row.try_get("id").map_err(internal_error)?,
            name: row.try_get("name").map_err(internal_error)?,
            created_at: row.try_get("created_at").map_err(internal_error)?,
        });
    }

    Ok(Json(SiteListResponse { items }))
}

async fn create_site(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateSiteRequest>,
) -> Result<(StatusCode, Json<SiteView>), (StatusCode, String)> {
    let caller = resolve_caller(&state.pool, &headers).await?;
    if caller.role != Role::Manager {
        return Err(error_response(WorkflowError::unauthorized(
            "only a manager can register sites",
        )));
    }

    let name = payload.name.trim().to_string();
    if name.is_empty() {
        return Err(error_response(WorkflowError::validation(
            "site name is required",
        )));
    }

    let now = Utc::now();
    let mut tx = state.pool.begin().await.map_err(internal_error)?;

    let site_id = Uuid::new_v4();
    let inserted = sqlx::query(
        "INSERT INTO sites (id, name, created_at) VALUES ($1, $2, $3) ON CONFLICT (lower(name)) DO NOTHING",
    )
    .bind(site_id)
    .bind(&name)
    .bind(now)
    .execute(&mut *tx)
    .await
    .map_err(internal_error)?;
    if inserted.rows_affected() == 0 {
        return Err(error_response(WorkflowError::business_rule(
            "a site with this name already exists",
        )));
    }

    tx.commit().await.map_err(internal_error)?;

    Ok((
        StatusCode::CREATED,
        Json(SiteView {
            site_id,
            name,
            created_at: now,
        }),
    ))
}

async fn list_users(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<UserListResponse>, (StatusCode, String)> {
    resolve_caller(&state.pool, &headers).await?;

    let rows =
        sqlx::query("SELECT id, subject, name, email, role, site_id, active FROM users ORDER BY name")
            .fetch_all(&state.pool)
            .await
            .map_err(internal_error)?;

    let mut items = Vec::with_capacity(rows.len());
    for row in &rows {
        let role = row
            .try_get::<String, _>("role")
            .map_err(internal_error)?
            .parse::<Role>()
            .map_err(internal_error)?;
        items.push(UserView {
            user_id: row.try_get("id").map_err(internal_error)?,
            subject: row.try_get("subject").map_err(internal_error)?,
            name: row.try_get("name").map_err(internal_error)?,
            email: row.try_get("email").map_err(internal_error)?,
            role,
            site_id: row.try_get("site_id").map_err(internal_error)?,
            active: row.try_get("active").map_err(internal_error)?,
        });
    }

    Ok(Json(UserListResponse { items }))
}

async fn upsert_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<UpsertUserRequest>,
) -> Result<(StatusCode, Json<UserView>), (StatusCode, String)> {
    let caller = resolve_caller(&state.pool, &headers).await?;
    if caller.role != Role::Manager {
        return Err(error_response(WorkflowError::unauthorized(
            "only a manager can register users",
        )));
    }

    let subject = payload.subject.trim().to_string();
    if subject.is_empty() {
        return Err(error_response(WorkflowError::validation(
            "subject is required",
        )));
    }
    let name = payload.name.trim().to_string();
    if name.is_empty() {
        return Err(error_response(WorkflowError::validation(
            "name is required",
        )));
    }
    let email = normalize_email(&payload.email).map_err(invalid_request)?;
    if let Some(site_id) = payload.site_id {
        ensure_site_exists(&state.pool, site_id).await?;
    }

    let now = Utc::now();
    // Re-registering a subject reactivates the account under its new role.
    let user_id = sqlx::query_scalar::<_, Uuid>(
        r#"
        INSERT INTO users (id, subject, name, email, role, site_id, active, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, TRUE, $7)
        ON CONFLICT (subject)
        DO UPDATE SET name = EXCLUDED.name, email = EXCLUDED.email, role = EXCLUDED.role,
                      site_id = EXCLUDED.site_id, active = TRUE
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(&subject)
    .bind(&name)
    .bind(&email)
    .bind(payload.role.as_str())
    .bind(payload.site_id)
    .bind(now)
    .fetch_one(&state.pool)
    .await
    .map_err(internal_error)?;

    Ok((
        StatusCode::CREATED,
        Json(UserView {
            user_id,
            subject,
            name,
            email,
            role: payload.role,
            site_id: payload.site_id,
            active: true,
        }),
    ))
}

async fn list_chat_messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ChatHistoryQuery>,
) -> Result<Json<ChatHistoryResponse>, (StatusCode, String)> {
    let caller = resolve_caller(&state.pool, &headers).await?;

    let limit = query.limit.unwrap_or(50).clamp(1, 200);
    let rows = sqlx::query(
        r#"
        SELECT id, sender_id, recipient_id, body, sent_at
        FROM chat_messages
        WHERE (sender_id = $1 AND recipient_id = $2)
           OR (sender_id = $2 AND recipient_id = $1)
        ORDER BY sent_at DESC
        LIMIT $3
        "#,
    )
    .bind(caller.user_id)
    .bind(query.peer)
    .bind(limit)
    .fetch_all(&state.pool)
    .await
    .map_err(internal_error)?;

    let mut items = Vec::with_capacity(rows.len());
    for row in &rows {
        items.push(ChatMessageView {
            message_id: row.try_get("id").map_err(internal_error)?,
            sender_id: row.try_get("sender_id").map_err(internal_error)?,
            recipient_id: row.try_get("recipient_id").map_err(internal_error)?,
            body: row.try_get("body").map_err(internal_error)?,
            sent_at: row.try_get("sent_at").map_err(internal_error)?,
        });
    }

    Ok(Json(ChatHistoryResponse { items }))
}

async fn send_chat_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<SendChatMessageRequest>,
) -> Result<(StatusCode, Json<ChatMessageView>), (StatusCode, String)> {
    let caller = resolve_caller(&state.pool, &headers).await?;

    let body = payload.body.trim().to_string();
    if body.is_empty() {
        return Err(error_response(WorkflowError::validation(
            "message body is required",
        )));
    }
    if payload.recipient_id == caller.user_id {
        return Err(error_response(WorkflowError::validation(
            "recipient must be another user",
        )));
    }

    let recipient_active = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM users WHERE id = $1 AND active = TRUE)",
    )
    .bind(payload.recipient_id)
    .fetch_one(&state.pool)
    .await
    .map_err(internal_error)?;
    if !recipient_active {
        return Err(error_response(WorkflowError::not_found("user")));
    }

    let now = Utc::now();
    let message_id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO chat_messages (id, sender_id, recipient_id, body, sent_at) VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(message_id)
    .bind(caller.user_id)
    .bind(payload.recipient_id)
    .bind(&body)
    .bind(now)
    .execute(&state.pool)
    .await
    .map_err(internal_error)?;

    Ok((
        StatusCode::CREATED,
        Json(ChatMessageView {
            message_id,
            sender_id: caller.user_id,
            recipient_id: payload.recipient_id,
            body,
            sent_at: now,
        }),
    ))
}

async fn resolve_caller(pool: &PgPool, headers: &HeaderMap) -> Result<Caller, (StatusCode, String)> {
    let subject = headers
        .get(AUTH_SUBJECT_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| error_response(WorkflowError::Unauthenticated))?;

    let row = sqlx::query("SELECT id, role, active FROM users WHERE subject = $1")
        .bind(subject)
        .fetch_optional(pool)
        .await
        .map_err(internal_error)?;
    let Some(row) = row else {
        return Err(error_response(WorkflowError::UserNotFound));
    };

    // A deactivated account is indistinguishable from a missing one.
    let active: bool = row.try_get("active").map_err(internal_error)?;
    if !active {
        return Err(error_response(WorkflowError::UserNotFound));
    }

    let role = row
        .try_get::<String, _>("role")
        .map_err(internal_error)?
        .parse::<Role>()
        .map_err(internal_error)?;

    Ok(Caller {
        user_id: row.try_get("id").map_err(internal_error)?,
        role,
    })
}

async fn ensure_site_exists(pool: &PgPool, site_id: Uuid) -> Result<(), (StatusCode, String)> {
    let exists = sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM sites WHERE id = $1)")
        .bind(site_id)
        .fetch_one(pool)
        .await
        .map_err(internal_error)?;

    if !exists {
        return Err(error_response(WorkflowError::not_found("site")));
    }

    Ok(())
}

async fn ensure_vendors_active(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    vendor_ids: &[Uuid],
) -> Result<(), (StatusCode, String)> {
    let mut unique = vendor_ids.to_vec();
    unique.sort_unstable();
    unique.dedup();

    let active_count =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM vendors WHERE id = ANY($1) AND active = TRUE")
            .bind(&unique)
            .fetch_one(&mut **tx)
            .await
            .map_err(internal_error)?;

    if active_count != unique.len() as i64 {
        return Err(error_response(WorkflowError::not_found("vendor")));
    }

    Ok(())
}

async fn next_counter(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    name: &str,
) -> AnyResult<i64> {
    let value = sqlx::query_scalar::<_, i64>(
        "UPDATE counters SET value = value + 1 WHERE name = $1 RETURNING value",
    )
    .bind(name)
    .fetch_one(&mut **tx)
    .await?;

    Ok(value)
}

async fn lock_request(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    request_id: Uuid,
) -> AnyResult<Option<RequestRecord>> {
    let row = sqlx::query(
        r#"
        SELECT id, request_number, item_order, item_name, description, quantity, unit,
               status, direct_action, created_by, approved_by, site_id, created_at, updated_at
        FROM material_requests
        WHERE id = $1
        FOR UPDATE
        "#,
    )
    .bind(request_id)
    .fetch_optional(&mut **tx)
    .await?;

    row.as_ref().map(request_record_from_row).transpose()
}

async fn fetch_request(pool: &PgPool, request_id: Uuid) -> AnyResult<Option<RequestRecord>> {
    let row = sqlx::query(
        r#"
        SELECT id, request_number, item_order, item_name, description, quantity, unit,
               status, direct_action, created_by, approved_by, site_id, created_at, updated_at
        FROM material_requests
        WHERE id = $1
        "#,
    )
    .bind(request_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(request_record_from_row).transpose()
}

fn request_record_from_row(row: &PgRow) -> AnyResult<RequestRecord> {
    let status = row.try_get::<String, _>("status")?.parse::<RequestStatus>()?;
    let direct_action = row
        .try_get::<Option<String>, _>("direct_action")?
        .map(|value| value.parse::<DirectAction>())
        .transpose()?;

    Ok(RequestRecord {
        id: row.try_get("id")?,
        request_number: row.try_get("request_number")?,
        item_order: row.try_get("item_order")?,
        item_name: row.try_get("item_name")?,
        description: row.try_get("description")?,
        quantity: row.try_get("quantity")?,
        unit: row.try_get("unit")?,
        status,
        direct_action,
        created_by: row.try_get("created_by")?,
        approved_by: row.try_get("approved_by")?,
        site_id: row.try_get("site_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

async fn lock_comparison(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    request_id: Uuid,
) -> AnyResult<Option<ComparisonRecord>> {
    let row = sqlx::query(
        r#"
        SELECT id, request_id, status, vendor_quotes, selected_vendor_id, manager_notes,
               inventory_fulfillment_quantity, updated_at
        FROM cost_comparisons
        WHERE request_id = $1
        FOR UPDATE
        "#,
    )
    .bind(request_id)
    .fetch_optional(&mut **tx)
    .await?;

    row.as_ref().map(comparison_record_from_row).transpose()
}

async fn fetch_comparison(pool: &PgPool, request_id: Uuid) -> AnyResult<Option<ComparisonRecord>> {
    let row = sqlx::query(
        r#"
        SELECT id, request_id, status, vendor_quotes, selected_vendor_id, manager_notes,
               inventory_fulfillment_quantity, updated_at
        FROM cost_comparisons
        WHERE request_id = $1
        "#,
    )
    .bind(request_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(comparison_record_from_row).transpose()
}

fn comparison_record_from_row(row: &PgRow) -> AnyResult<ComparisonRecord> {
    let status = row.try_get::<String, _>("status")?.parse::<CcStatus>()?;
    let quotes_value: Value = row.try_get("vendor_quotes")?;
    let vendor_quotes: Vec<VendorQuote> = serde_json::from_value(quotes_value)?;

    Ok(ComparisonRecord {
        id: row.try_get("id")?,
        request_id: row.try_get("request_id")?,
        status,
        vendor_quotes,
        selected_vendor_id: row.try_get("selected_vendor_id")?,
        manager_notes: row.try_get("manager_notes")?,
        inventory_fulfillment_quantity: row.try_get("inventory_fulfillment_quantity")?,
        updated_at: row.try_get("updated_at")?,
    })
}

async fn fetch_notes(
    pool: &PgPool,
    request_number: &str,
) -> Result<Vec<RequestNoteView>, (StatusCode, String)> {
    let rows = sqlx::query(
        "SELECT id, request_number, author_id, body, created_at FROM request_notes WHERE request_number = $1 ORDER BY created_at",
    )
    .bind(request_number)
    .fetch_all(pool)
    .await
    .map_err(internal_error)?;

    let mut notes = Vec::with_capacity(rows.len());
    for row in &rows {
        notes.push(RequestNoteView {
            note_id: row.try_get("id").map_err(internal_error)?,
            request_number: row.try_get("request_number").map_err(internal_error)?,
            author_id: row.try_get("author_id").map_err(internal_error)?,
            body: row.try_get("body").map_err(internal_error)?,
            created_at: row.try_get("created_at").map_err(internal_error)?,
        });
    }

    Ok(notes)
}

async fn insert_request_row(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    request_number: &str,
    item_order: i32,
    item: &NewRequestItem,
    status: RequestStatus,
    direct_action: Option<DirectAction>,
    created_by: Uuid,
    site_id: Uuid,
    now: DateTime<Utc>,
) -> AnyResult<Uuid> {
    let request_id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO material_requests (
            id, request_number, item_order, item_name, description, quantity, unit,
            status, direct_action, created_by, site_id, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $12)
        "#,
    )
    .bind(request_id)
    .bind(request_number)
    .bind(item_order)
    .bind(&item.item_name)
    .bind(&item.description)
    .bind(item.quantity)
    .bind(&item.unit)
    .bind(status.as_str())
    .bind(direct_action.map(DirectAction::as_str))
    .bind(created_by)
    .bind(site_id)
    .bind(now)
    .execute(&mut **tx)
    .await?;

    Ok(request_id)
}

async fn insert_note(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    request_number: &str,
    author_id: Uuid,
    body: &str,
    now: DateTime<Utc>,
) -> AnyResult<Uuid> {
    let note_id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO request_notes (id, request_number, author_id, body, created_at) VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(note_id)
    .bind(request_number)
    .bind(author_id)
    .bind(body)
    .bind(now)
    .execute(&mut **tx)
    .await?;

    Ok(note_id)
}

async fn apply_review_outcome(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    record: &RequestRecord,
    outcome: &ReviewOutcome,
    reviewer: Uuid,
    direct_action: Option<DirectAction>,
    now: DateTime<Utc>,
) -> AnyResult<()> {
    let approved_by = if outcome.next_status == RequestStatus::Recheck {
        Some(reviewer)
    } else {
        record.approved_by
    };

    sqlx::query(
        "UPDATE material_requests SET status = $2, approved_by = $3, direct_action = $4, updated_at = $5 WHERE id = $1",
    )
    .bind(record.id)
    .bind(outcome.next_status.as_str())
    .bind(approved_by)
    .bind(direct_action.map(DirectAction::as_str))
    .bind(now)
    .execute(&mut **tx)
    .await?;

    if let Some(note) = &outcome.audit_note {
        insert_note(tx, &record.request_number, reviewer, note, now).await?;
    }

    Ok(())
}

async fn receive_delivery_stock(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    record: &RequestRecord,
    now: DateTime<Utc>,
) -> AnyResult<i64> {
    // Stock rows are keyed by exact item name; a first delivery creates one.
    let central_stock = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO inventory_items (id, item_name, central_stock, vendor_ids, updated_at)
        VALUES ($1, $2, $3, '{}', $4)
        ON CONFLICT (item_name)
        DO UPDATE SET central_stock = inventory_items.central_stock + EXCLUDED.central_stock,
                      updated_at = EXCLUDED.updated_at
        RETURNING central_stock
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(&record.item_name)
    .bind(record.quantity)
    .bind(now)
    .fetch_one(&mut **tx)
    .await?;

    Ok(central_stock)
}

fn normalize_item(item: NewRequestItem) -> Result<NewRequestItem, WorkflowError> {
    let item = NewRequestItem {
        item_name: item.item_name.trim().to_string(),
        description: item
            .description
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string),
        quantity: item.quantity,
        unit: item.unit.trim().to_string(),
    };
    item.validate()?;
    Ok(item)
}

fn normalize_items(items: Vec<NewRequestItem>) -> Result<Vec<NewRequestItem>, WorkflowError> {
    if items.is_empty() {
        return Err(WorkflowError::validation("at least one item is required"));
    }
    items.into_iter().map(normalize_item).collect()
}

fn normalize_optional_text(value: Option<String>) -> Option<String> {
    value
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}

fn email_regex() -> &'static Regex {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    EMAIL.get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("invalid email pattern"))
}

fn gst_regex() -> &'static Regex {
    static GST: OnceLock<Regex> = OnceLock::new();
    GST.get_or_init(|| {
        Regex::new(r"^[0-9]{2}[A-Z]{5}[0-9]{4}[A-Z][1-9A-Z]Z[0-9A-Z]$")
            .expect("invalid gstin pattern")
    })
}

fn normalize_email(value: &str) -> AnyResult<String> {
    let normalized = value.trim().to_ascii_lowercase();
    if !email_regex().is_match(&normalized) {
        anyhow::bail!("contact email is not a valid email address");
    }
    Ok(normalized)
}

fn normalize_gst(value: &str) -> AnyResult<String> {
    let normalized = value.trim().to_ascii_uppercase();
    if !gst_regex().is_match(&normalized) {
        anyhow::bail!("gst number is not a valid GSTIN");
    }
    Ok(normalized)
}

fn vendor_view_from_row(row: &PgRow) -> AnyResult<VendorView> {
    Ok(VendorView {
        vendor_id: row.try_get("id")?,
        name: row.try_get("name")?,
        contact_email: row.try_get("contact_email")?,
        phone: row.try_get("phone")?,
        gst_number: row.try_get("gst_number")?,
        active: row.try_get("active")?,
        created_at: row.try_get("created_at")?,
    })
}

fn stock_error(err: StockError) -> (StatusCode, String) {
    error_response(WorkflowError::business_rule(err.to_string()))
}

fn error_response(err: WorkflowError) -> (StatusCode, String) {
    let status = match &err {
        WorkflowError::Unauthenticated | WorkflowError::UserNotFound => StatusCode::UNAUTHORIZED,
        WorkflowError::Unauthorized(_) => StatusCode::FORBIDDEN,
        WorkflowError::NotFound(_) => StatusCode::NOT_FOUND,
        WorkflowError::Validation(_) => StatusCode::BAD_REQUEST,
        WorkflowError::InvalidTransition { .. } => StatusCode::CONFLICT,
        WorkflowError::BusinessRule(_) => StatusCode::UNPROCESSABLE_ENTITY,
    };
    (status, err.to_string())
}

fn invalid_request(err: anyhow::Error) -> (StatusCode, String) {
    (StatusCode::BAD_REQUEST, err.to_string())
}

fn internal_error<E: std::fmt::Display>(err: E) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn emails_normalize_to_lowercase() {
        assert_eq!(
            normalize_email(" Ops@Vendor.Example ").unwrap(),
            "ops@vendor.example"
        );
    }

    #[test]
    fn malformed_emails_are_rejected() {
        assert!(normalize_email("not-an-email").is_err());
        assert!(normalize_email("missing@dot").is_err());
        assert!(normalize_email("two words@vendor.example").is_err());
    }

    #[test]
    fn gst_numbers_normalize_to_uppercase() {
        assert_eq!(normalize_gst("27aapfu0939f1zv").unwrap(), "27AAPFU0939F1ZV");
        assert!(normalize_gst("INVALID").is_err());
        assert!(normalize_gst("27AAPFU0939F1").is_err());
    }

    #[test]
    fn workflow_errors_map_onto_http_statuses() {
        assert_eq!(
            error_response(WorkflowError::Unauthenticated).0,
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            error_response(WorkflowError::UserNotFound).0,
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            error_response(WorkflowError::unauthorized("nope")).0,
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            error_response(WorkflowError::not_found("request")).0,
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            error_response(WorkflowError::validation("bad input")).0,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            error_response(WorkflowError::invalid_transition("pending", "delivered")).0,
            StatusCode::CONFLICT
        );
        assert_eq!(
            error_response(WorkflowError::business_rule("no stock")).0,
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn item_normalization_trims_fields_and_drops_empty_descriptions() {
        let items = normalize_items(vec![NewRequestItem {
            item_name: "  Cement  ".to_string(),
            description: Some("   ".to_string()),
            quantity: 10,
            unit: " bags ".to_string(),
        }])
        .unwrap();
        assert_eq!(items[0].item_name, "Cement");
        assert_eq!(items[0].description, None);
        assert_eq!(items[0].unit, "bags");
    }

    #[test]
    fn empty_item_batches_are_rejected() {
        assert!(normalize_items(vec![]).is_err());
    }

    #[test]
    fn comparison_views_compute_quote_totals() {
        let vendor_id = Uuid::new_v4();
        let record = ComparisonRecord {
            id: Uuid::new_v4(),
            request_id: Uuid::new_v4(),
            status: CcStatus::Draft,
            vendor_quotes: vec![VendorQuote {
                vendor_id,
                unit_price: Decimal::new(1000, 2), // 10.00
                amount: None,
                unit: None,
                discount_percent: None,
                gst_percent: Some(Decimal::from(18)),
            }],
            selected_vendor_id: None,
            manager_notes: Some(SPLIT_FULFILLMENT_APPROVED_NOTE.to_string()),
            inventory_fulfillment_quantity: Some(40),
            updated_at: Utc::now(),
        };

        let view = record.into_view(10);
        assert_eq!(view.quote_totals.len(), 1);
        assert_eq!(view.quote_totals[0].vendor_id, vendor_id);
        assert_eq!(view.quote_totals[0].total, Decimal::new(11800, 2)); // 118.00
        assert!(view.split_fulfillment_approved);
    }
}
