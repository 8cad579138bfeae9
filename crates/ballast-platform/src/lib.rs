pub mod config;
pub mod contracts;
pub mod db;

pub use config::ServiceConfig;
pub use contracts::{
    AddRequestNoteRequest, BulkReviewRequest, BulkReviewResponse, CostComparisonDecisionResponse,
    CostComparisonView, CreateMaterialRequestBatchRequest, CreateMaterialRequestRequest,
    CreateMaterialRequestResponse, DeductStockRequest, DeductStockResponse, DeleteDraftResponse,
    ListRequestsQuery, MarkDeliveryResponse, MaterialRequestBatchResponse,
    MaterialRequestListResponse, MaterialRequestView, QuoteTotal, RequestDetailResponse,
    RequestNoteListResponse, RequestNoteView, RequestStatusResponse,
    ReviewCostComparisonRequest, ReviewRequestRequest, SaveDraftBatchRequest, SendDraftRequest,
    SendDraftResponse, SplitDeliverRequest, SplitDeliverResponse, SplitFulfillmentResponse,
    UpdateDraftRequest, UpdatePurchaseStatusRequest, UpdateRequestDetailsRequest,
    UpsertCostComparisonRequest,
};
pub use db::connect_database;
