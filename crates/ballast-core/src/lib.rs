pub mod error;
pub mod quotes;
pub mod request;
pub mod role;
pub mod split;
pub mod status;

pub use error::WorkflowError;
pub use quotes::{
    SPLIT_FULFILLMENT_APPROVED_NOTE, VendorQuote, ensure_selected_vendor,
    has_split_fulfillment_approval, quote_total, validate_quotes,
};
pub use request::{
    BulkReviewDisposition, DirectAction, MAX_ITEM_QUANTITY, ManagerAction, NewRequestItem,
    ReviewOutcome, bulk_review_disposition, can_edit_details, format_draft_number,
    format_request_number, is_draft_number, review_pending,
};
pub use role::{Role, authorize_transition};
pub use split::{
    SplitPlan, can_approve_split_fulfillment, fulfillment_outcome, plan_inventory_split,
};
pub use status::{
    CcStatus, RequestStatus, allowed_targets, cc_allowed_targets, validate_cc_transition,
    validate_transition,
};
