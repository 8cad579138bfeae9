use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::WorkflowError;
use crate::status::RequestStatus;

pub const MAX_ITEM_QUANTITY: i64 = 1_000_000;

const DRAFT_PREFIX: &str = "DRAFT-";

pub fn format_request_number(sequence: i64) -> String {
    format!("{sequence:03}")
}

pub fn format_draft_number(sequence: i64) -> String {
    format!("{DRAFT_PREFIX}{sequence:03}")
}

pub fn is_draft_number(number: &str) -> bool {
    number.starts_with(DRAFT_PREFIX)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectAction {
    Po,
    Delivery,
}

impl DirectAction {
    pub fn as_str(self) -> &'static str {
        match self {
            DirectAction::Po => "po",
            DirectAction::Delivery => "delivery",
        }
    }
}

impl fmt::Display for DirectAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DirectAction {
    type Err = WorkflowError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "po" => Ok(DirectAction::Po),
            "delivery" => Ok(DirectAction::Delivery),
            other => Err(WorkflowError::validation(format!(
                "unknown direct action: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRequestItem {
    pub item_name: String,
    pub description: Option<String>,
    pub quantity: i64,
    pub unit: String,
}

impl NewRequestItem {
    pub fn validate(&self) -> Result<(), WorkflowError> {
        if self.item_name.trim().is_empty() {
            return Err(WorkflowError::validation("item name is required"));
        }
        if self.unit.trim().is_empty() {
            return Err(WorkflowError::validation("unit is required"));
        }
        if self.quantity <= 0 {
            return Err(WorkflowError::validation(
                "quantity must be greater than zero",
            ));
        }
        if self.quantity > MAX_ITEM_QUANTITY {
            return Err(WorkflowError::validation("quantity out of range"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManagerAction {
    Approve,
    Reject,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewOutcome {
    pub next_status: RequestStatus,
    pub audit_note: Option<String>,
}

// Manager review is one of the two rule sets that live outside the transition
// table: approval lands on recheck for purchase routing, rejection is final.
pub fn review_pending(
    current: RequestStatus,
    action: ManagerAction,
    reason: Option<&str>,
) -> Result<ReviewOutcome, WorkflowError> {
    let target = match action {
        ManagerAction::Approve => RequestStatus::Recheck,
        ManagerAction::Reject => RequestStatus::Rejected,
    };
    if current != RequestStatus::Pending {
        return Err(WorkflowError::invalid_transition(current, target));
    }

    match action {
        ManagerAction::Approve => Ok(ReviewOutcome {
            next_status: RequestStatus::Recheck,
            audit_note: None,
        }),
        ManagerAction::Reject => {
            let reason = reason.map(str::trim).unwrap_or_default();
            if reason.is_empty() {
                return Err(WorkflowError::validation("Rejection reason is required"));
            }
            Ok(ReviewOutcome {
                next_status: RequestStatus::Rejected,
                audit_note: Some(format!("Rejected: {reason}")),
            })
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BulkReviewDisposition {
    Updated(ReviewOutcome),
    Skipped,
}

// Bulk review is best effort: an id whose request is missing or no longer
// pending is skipped and excluded from the updated count, never a batch error.
pub fn bulk_review_disposition(
    current: Option<RequestStatus>,
    action: ManagerAction,
    reason: Option<&str>,
) -> BulkReviewDisposition {
    let Some(status) = current else {
        return BulkReviewDisposition::Skipped;
    };
    match review_pending(status, action, reason) {
        Ok(outcome) => BulkReviewDisposition::Updated(outcome),
        Err(_) => BulkReviewDisposition::Skipped,
    }
}

pub fn can_edit_details(status: RequestStatus) -> bool {
    matches!(
        status,
        RequestStatus::Recheck | RequestStatus::ReadyForCc | RequestStatus::CcRejected
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_numbers_are_zero_padded() {
        assert_eq!(format_request_number(7), "007");
        assert_eq!(format_request_number(42), "042");
        assert_eq!(format_request_number(1234), "1234");
    }

    #[test]
    fn draft_numbers_carry_the_prefix() {
        assert_eq!(format_draft_number(3), "DRAFT-003");
        assert!(is_draft_number("DRAFT-003"));
        assert!(!is_draft_number("003"));
    }

    #[test]
    fn item_validation_rejects_bad_input() {
        let base = NewRequestItem {
            item_name: "OPC 53 Cement".to_string(),
            description: None,
            quantity: 100,
            unit: "bags".to_string(),
        };
        assert!(base.validate().is_ok());

        let mut item = base.clone();
        item.item_name = "  ".to_string();
        assert!(item.validate().is_err());

        let mut item = base.clone();
        item.unit = String::new();
        assert!(item.validate().is_err());

        let mut item = base.clone();
        item.quantity = 0;
        assert_eq!(
            item.validate().unwrap_err(),
            WorkflowError::Validation("quantity must be greater than zero".to_string())
        );

        let mut item = base;
        item.quantity = MAX_ITEM_QUANTITY + 1;
        assert_eq!(
            item.validate().unwrap_err(),
            WorkflowError::Validation("quantity out of range".to_string())
        );
    }

    #[test]
    fn approval_routes_to_recheck() {
        let outcome =
            review_pending(RequestStatus::Pending, ManagerAction::Approve, None).unwrap();
        assert_eq!(outcome.next_status, RequestStatus::Recheck);
        assert!(outcome.audit_note.is_none());
    }

    #[test]
    fn rejection_requires_a_reason_and_records_it() {
        let err = review_pending(RequestStatus::Pending, ManagerAction::Reject, Some("  "))
            .unwrap_err();
        assert_eq!(
            err,
            WorkflowError::Validation("Rejection reason is required".to_string())
        );

        let outcome = review_pending(
            RequestStatus::Pending,
            ManagerAction::Reject,
            Some("over budget"),
        )
        .unwrap();
        assert_eq!(outcome.next_status, RequestStatus::Rejected);
        assert_eq!(outcome.audit_note.as_deref(), Some("Rejected: over budget"));
    }

    #[test]
    fn review_is_only_admissible_from_pending() {
        for current in RequestStatus::ALL {
            if current == RequestStatus::Pending {
                continue;
            }
            let err =
                review_pending(current, ManagerAction::Approve, None).unwrap_err();
            assert!(matches!(err, WorkflowError::InvalidTransition { .. }), "{current}");
        }
    }

    #[test]
    fn bulk_review_updates_exactly_the_pending_subset() {
        let batch = [
            Some(RequestStatus::Pending),
            Some(RequestStatus::Recheck),
            None,
            Some(RequestStatus::Pending),
            Some(RequestStatus::Delivered),
        ];

        let mut updated_count = 0_i64;
        let mut skipped = Vec::new();
        for (index, current) in batch.into_iter().enumerate() {
            match bulk_review_disposition(current, ManagerAction::Approve, None) {
                BulkReviewDisposition::Updated(outcome) => {
                    assert_eq!(outcome.next_status, RequestStatus::Recheck);
                    updated_count += 1;
                }
                BulkReviewDisposition::Skipped => skipped.push(index),
            }
        }

        assert_eq!(updated_count, 2);
        assert_eq!(skipped, vec![1, 2, 4]);
    }

    #[test]
    fn bulk_rejection_carries_the_audit_note_per_id() {
        let disposition = bulk_review_disposition(
            Some(RequestStatus::Pending),
            ManagerAction::Reject,
            Some("wrong site"),
        );
        let BulkReviewDisposition::Updated(outcome) = disposition else {
            panic!("pending id must be updated");
        };
        assert_eq!(outcome.next_status, RequestStatus::Rejected);
        assert_eq!(outcome.audit_note.as_deref(), Some("Rejected: wrong site"));

        assert_eq!(
            bulk_review_disposition(Some(RequestStatus::Rejected), ManagerAction::Reject, Some("x")),
            BulkReviewDisposition::Skipped
        );
    }

    #[test]
    fn details_are_editable_only_during_the_cc_stage() {
        assert!(can_edit_details(RequestStatus::Recheck));
        assert!(can_edit_details(RequestStatus::ReadyForCc));
        assert!(can_edit_details(RequestStatus::CcRejected));
        assert!(!can_edit_details(RequestStatus::Pending));
        assert!(!can_edit_details(RequestStatus::CcPending));
        assert!(!can_edit_details(RequestStatus::Delivered));
    }
}
