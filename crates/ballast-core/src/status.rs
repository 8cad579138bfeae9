use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::WorkflowError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Draft,
    Pending,
    Approved,
    Rejected,
    ReadyForCc,
    CcPending,
    CcApproved,
    CcRejected,
    ReadyForPo,
    PendingPo,
    RejectedPo,
    ReadyForDelivery,
    DeliveryStage,
    Delivered,
    Recheck,
}

impl RequestStatus {
    pub const ALL: [RequestStatus; 15] = [
        RequestStatus::Draft,
        RequestStatus::Pending,
        RequestStatus::Approved,
        RequestStatus::Rejected,
        RequestStatus::ReadyForCc,
        RequestStatus::CcPending,
        RequestStatus::CcApproved,
        RequestStatus::CcRejected,
        RequestStatus::ReadyForPo,
        RequestStatus::PendingPo,
        RequestStatus::RejectedPo,
        RequestStatus::ReadyForDelivery,
        RequestStatus::DeliveryStage,
        RequestStatus::Delivered,
        RequestStatus::Recheck,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RequestStatus::Draft => "draft",
            RequestStatus::Pending => "pending",
            RequestStatus::Approved => "approved",
            RequestStatus::Rejected => "rejected",
            RequestStatus::ReadyForCc => "ready_for_cc",
            RequestStatus::CcPending => "cc_pending",
            RequestStatus::CcApproved => "cc_approved",
            RequestStatus::CcRejected => "cc_rejected",
            RequestStatus::ReadyForPo => "ready_for_po",
            RequestStatus::PendingPo => "pending_po",
            RequestStatus::RejectedPo => "rejected_po",
            RequestStatus::ReadyForDelivery => "ready_for_delivery",
            RequestStatus::DeliveryStage => "delivery_stage",
            RequestStatus::Delivered => "delivered",
            RequestStatus::Recheck => "recheck",
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = WorkflowError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        RequestStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == value)
            .ok_or_else(|| WorkflowError::validation(format!("unknown request status: {value}")))
    }
}

// The purchase-driven transition table. `draft` and `pending` are absent on
// purpose: the draft submission and the manager's pending review are separate
// rule sets enforced by their own handlers.
pub fn allowed_targets(from: RequestStatus) -> &'static [RequestStatus] {
    match from {
        RequestStatus::Recheck => &[
            RequestStatus::ReadyForCc,
            RequestStatus::Rejected,
            RequestStatus::ReadyForPo,
            RequestStatus::ReadyForDelivery,
            RequestStatus::DeliveryStage,
        ],
        RequestStatus::ReadyForCc => &[
            RequestStatus::CcPending,
            RequestStatus::CcRejected,
            RequestStatus::ReadyForPo,
            RequestStatus::DeliveryStage,
            RequestStatus::ReadyForDelivery,
        ],
        RequestStatus::CcPending => &[
            RequestStatus::CcApproved,
            RequestStatus::CcRejected,
            RequestStatus::ReadyForCc,
        ],
        RequestStatus::CcApproved => &[RequestStatus::ReadyForPo],
        RequestStatus::CcRejected => &[RequestStatus::ReadyForCc],
        RequestStatus::ReadyForPo => &[
            RequestStatus::PendingPo,
            RequestStatus::DeliveryStage,
            RequestStatus::ReadyForDelivery,
        ],
        RequestStatus::PendingPo => &[
            RequestStatus::ReadyForDelivery,
            RequestStatus::RejectedPo,
        ],
        RequestStatus::RejectedPo => &[RequestStatus::ReadyForPo],
        RequestStatus::ReadyForDelivery => &[RequestStatus::Delivered],
        RequestStatus::DeliveryStage => &[
            RequestStatus::Delivered,
            RequestStatus::ReadyForDelivery,
        ],
        RequestStatus::Draft
        | RequestStatus::Pending
        | RequestStatus::Approved
        | RequestStatus::Rejected
        | RequestStatus::Delivered => &[],
    }
}

pub fn validate_transition(from: RequestStatus, to: RequestStatus) -> Result<(), WorkflowError> {
    if allowed_targets(from).contains(&to) {
        return Ok(());
    }
    Err(WorkflowError::invalid_transition(from, to))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CcStatus {
    Draft,
    CcPending,
    CcApproved,
    CcRejected,
}

impl CcStatus {
    pub const ALL: [CcStatus; 4] = [
        CcStatus::Draft,
        CcStatus::CcPending,
        CcStatus::CcApproved,
        CcStatus::CcRejected,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CcStatus::Draft => "draft",
            CcStatus::CcPending => "cc_pending",
            CcStatus::CcApproved => "cc_approved",
            CcStatus::CcRejected => "cc_rejected",
        }
    }
}

impl fmt::Display for CcStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CcStatus {
    type Err = WorkflowError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        CcStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == value)
            .ok_or_else(|| {
                WorkflowError::validation(format!("unknown cost comparison status: {value}"))
            })
    }
}

pub fn cc_allowed_targets(from: CcStatus) -> &'static [CcStatus] {
    match from {
        CcStatus::Draft => &[CcStatus::CcPending],
        CcStatus::CcPending => &[CcStatus::CcApproved, CcStatus::CcRejected],
        CcStatus::CcRejected => &[CcStatus::CcPending],
        CcStatus::CcApproved => &[],
    }
}

pub fn validate_cc_transition(from: CcStatus, to: CcStatus) -> Result<(), WorkflowError> {
    if cc_allowed_targets(from).contains(&to) {
        return Ok(());
    }
    Err(WorkflowError::invalid_transition(from, to))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_strings_round_trip() {
        for status in RequestStatus::ALL {
            assert_eq!(status.as_str().parse::<RequestStatus>().unwrap(), status);
        }
        for status in CcStatus::ALL {
            assert_eq!(status.as_str().parse::<CcStatus>().unwrap(), status);
        }
    }

    #[test]
    fn serde_matches_as_str() {
        for status in RequestStatus::ALL {
            let encoded = serde_json::to_string(&status).unwrap();
            assert_eq!(encoded, format!("\"{}\"", status.as_str()));
        }
    }

    #[test]
    fn unknown_status_is_a_validation_error() {
        let err = "shipped".parse::<RequestStatus>().unwrap_err();
        assert_eq!(
            err,
            WorkflowError::Validation("unknown request status: shipped".to_string())
        );
    }

    #[test]
    fn every_table_edge_is_admissible() {
        for from in RequestStatus::ALL {
            for to in allowed_targets(from) {
                assert!(validate_transition(from, *to).is_ok(), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn transitions_outside_the_table_are_rejected() {
        for from in RequestStatus::ALL {
            for to in RequestStatus::ALL {
                if allowed_targets(from).contains(&to) {
                    continue;
                }
                let err = validate_transition(from, to).unwrap_err();
                assert_eq!(
                    err,
                    WorkflowError::InvalidTransition {
                        from: from.as_str().to_string(),
                        to: to.as_str().to_string(),
                    }
                );
            }
        }
    }

    #[test]
    fn terminal_and_handler_owned_statuses_have_no_table_successors() {
        for status in [
            RequestStatus::Draft,
            RequestStatus::Pending,
            RequestStatus::Approved,
            RequestStatus::Rejected,
            RequestStatus::Delivered,
        ] {
            assert!(allowed_targets(status).is_empty(), "{status}");
        }
    }

    #[test]
    fn recheck_fans_out_to_every_fulfillment_lane() {
        let targets = allowed_targets(RequestStatus::Recheck);
        assert!(targets.contains(&RequestStatus::ReadyForCc));
        assert!(targets.contains(&RequestStatus::Rejected));
        assert!(targets.contains(&RequestStatus::ReadyForPo));
        assert!(targets.contains(&RequestStatus::ReadyForDelivery));
        assert!(targets.contains(&RequestStatus::DeliveryStage));
        assert_eq!(targets.len(), 5);
    }

    #[test]
    fn cc_rejection_cycles_back_through_resubmission() {
        assert!(validate_cc_transition(CcStatus::Draft, CcStatus::CcPending).is_ok());
        assert!(validate_cc_transition(CcStatus::CcPending, CcStatus::CcRejected).is_ok());
        assert!(validate_cc_transition(CcStatus::CcRejected, CcStatus::CcPending).is_ok());
        assert!(validate_cc_transition(CcStatus::CcApproved, CcStatus::CcPending).is_err());
        assert!(validate_cc_transition(CcStatus::Draft, CcStatus::CcApproved).is_err());
    }
}
