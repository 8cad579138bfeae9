use ballast_core::{
    CcStatus, DirectAction, ManagerAction, NewRequestItem, RequestStatus, VendorQuote,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateMaterialRequestRequest {
    pub site_id: Uuid,
    pub item_name: String,
    pub description: Option<String>,
    pub quantity: i64,
    pub unit: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateMaterialRequestResponse {
    pub request_id: Uuid,
    pub request_number: String,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateMaterialRequestBatchRequest {
    pub site_id: Uuid,
    pub items: Vec<NewRequestItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaterialRequestBatchResponse {
    pub request_number: String,
    pub request_ids: Vec<Uuid>,
    pub status: RequestStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveDraftBatchRequest {
    pub site_id: Uuid,
    pub items: Vec<NewRequestItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateDraftRequest {
    pub item_name: Option<String>,
    pub description: Option<String>,
    pub quantity: Option<i64>,
    pub unit: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendDraftRequest {
    pub draft_number: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendDraftResponse {
    pub request_number: String,
    pub request_ids: Vec<Uuid>,
    pub status: RequestStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteDraftResponse {
    pub request_id: Uuid,
    pub deleted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListRequestsQuery {
    pub status: Option<RequestStatus>,
    pub request_number: Option<String>,
    pub site_id: Option<Uuid>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaterialRequestView {
    pub request_id: Uuid,
    pub request_number: String,
    pub item_order: i32,
    pub item_name: String,
    pub description: Option<String>,
    pub quantity: i64,
    pub unit: String,
    pub status: RequestStatus,
    pub direct_action: Option<DirectAction>,
    pub created_by: Uuid,
    pub approved_by: Option<Uuid>,
    pub site_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaterialRequestListResponse {
    pub items: Vec<MaterialRequestView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestDetailResponse {
    pub request: MaterialRequestView,
    pub notes: Vec<RequestNoteView>,
    pub cost_comparison: Option<CostComparisonView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewRequestRequest {
    pub action: ManagerAction,
    pub reason: Option<String>,
    pub direct_action: Option<DirectAction>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestStatusResponse {
    pub request_id: Uuid,
    pub request_number: String,
    pub status: RequestStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkReviewRequest {
    pub request_ids: Vec<Uuid>,
    pub action: ManagerAction,
    pub reason: Option<String>,
    pub direct_action: Option<DirectAction>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkReviewResponse {
    pub updated_count: i64,
    pub skipped_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdatePurchaseStatusRequest {
    pub status: RequestStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateRequestDetailsRequest {
    pub item_name: Option<String>,
    pub description: Option<String>,
    pub quantity: Option<i64>,
    pub unit: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkDeliveryResponse {
    pub request_id: Uuid,
    pub status: RequestStatus,
    pub item_name: String,
    pub central_stock: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitDeliverRequest {
    pub inventory_quantity: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitDeliverResponse {
    pub request_id: Uuid,
    pub remaining_quantity: i64,
    pub delivery_request_id: Uuid,
    pub delivery_quantity: i64,
    pub central_stock: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddRequestNoteRequest {
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestNoteView {
    pub note_id: Uuid,
    pub request_number: String,
    pub author_id: Uuid,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestNoteListResponse {
    pub items: Vec<RequestNoteView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertCostComparisonRequest {
    pub vendor_quotes: Vec<VendorQuote>,
    pub inventory_fulfillment_quantity: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteTotal {
    pub vendor_id: Uuid,
    pub total: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostComparisonView {
    pub comparison_id: Uuid,
    pub request_id: Uuid,
    pub status: CcStatus,
    pub vendor_quotes: Vec<VendorQuote>,
    pub quote_totals: Vec<QuoteTotal>,
    pub selected_vendor_id: Option<Uuid>,
    pub manager_notes: Option<String>,
    pub split_fulfillment_approved: bool,
    pub inventory_fulfillment_quantity: Option<i64>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewCostComparisonRequest {
    pub action: ManagerAction,
    pub selected_vendor_id: Option<Uuid>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostComparisonDecisionResponse {
    pub request_id: Uuid,
    pub comparison_status: CcStatus,
    pub request_status: RequestStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitFulfillmentResponse {
    pub request_id: Uuid,
    pub status: RequestStatus,
    pub inventory_fulfillment_quantity: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeductStockRequest {
    pub item_name: String,
    pub quantity: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeductStockResponse {
    pub item_name: String,
    pub central_stock: i64,
}
