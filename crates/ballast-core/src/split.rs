use crate::error::WorkflowError;
use crate::status::RequestStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitPlan {
    pub inventory_quantity: i64,
    pub remainder: i64,
}

// Invariant: inventory_quantity + remainder == requested, and both parts are
// strictly positive.
pub fn plan_inventory_split(
    requested: i64,
    inventory_quantity: i64,
) -> Result<SplitPlan, WorkflowError> {
    if inventory_quantity <= 0 || inventory_quantity >= requested {
        return Err(WorkflowError::business_rule(
            "split quantity must be strictly between zero and the requested quantity",
        ));
    }
    Ok(SplitPlan {
        inventory_quantity,
        remainder: requested - inventory_quantity,
    })
}

pub fn fulfillment_outcome(outstanding: i64, fulfilled: i64) -> RequestStatus {
    if fulfilled >= outstanding {
        RequestStatus::DeliveryStage
    } else {
        RequestStatus::Recheck
    }
}

pub fn can_approve_split_fulfillment(status: RequestStatus) -> bool {
    matches!(status, RequestStatus::ReadyForCc | RequestStatus::Recheck)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_preserves_the_total_quantity() {
        let plan = plan_inventory_split(100, 40).unwrap();
        assert_eq!(plan.inventory_quantity, 40);
        assert_eq!(plan.remainder, 60);
        assert_eq!(plan.inventory_quantity + plan.remainder, 100);
    }

    #[test]
    fn split_bounds_are_strict() {
        for inventory_quantity in [0, -5, 100, 150] {
            let err = plan_inventory_split(100, inventory_quantity).unwrap_err();
            assert_eq!(
                err,
                WorkflowError::BusinessRule(
                    "split quantity must be strictly between zero and the requested quantity"
                        .to_string()
                ),
                "inventory_quantity={inventory_quantity}"
            );
        }
        assert!(plan_inventory_split(100, 1).is_ok());
        assert!(plan_inventory_split(100, 99).is_ok());
    }

    #[test]
    fn full_coverage_routes_to_delivery_stage() {
        assert_eq!(fulfillment_outcome(50, 50), RequestStatus::DeliveryStage);
        assert_eq!(fulfillment_outcome(50, 80), RequestStatus::DeliveryStage);
    }

    #[test]
    fn partial_coverage_routes_back_to_recheck() {
        assert_eq!(fulfillment_outcome(50, 49), RequestStatus::Recheck);
        assert_eq!(fulfillment_outcome(50, 0), RequestStatus::Recheck);
    }

    #[test]
    fn split_fulfillment_is_approved_from_the_cc_stage_only() {
        assert!(can_approve_split_fulfillment(RequestStatus::ReadyForCc));
        assert!(can_approve_split_fulfillment(RequestStatus::Recheck));
        assert!(!can_approve_split_fulfillment(RequestStatus::Pending));
        assert!(!can_approve_split_fulfillment(RequestStatus::CcPending));
        assert!(!can_approve_split_fulfillment(RequestStatus::ReadyForPo));
    }
}
