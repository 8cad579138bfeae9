use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::WorkflowError;
use crate::status::RequestStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    SiteEngineer,
    Manager,
    PurchaseOfficer,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::SiteEngineer, Role::Manager, Role::PurchaseOfficer];

    pub fn as_str(self) -> &'static str {
        match self {
            Role::SiteEngineer => "site_engineer",
            Role::Manager => "manager",
            Role::PurchaseOfficer => "purchase_officer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = WorkflowError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|role| role.as_str() == value)
            .ok_or_else(|| WorkflowError::validation(format!("unknown role: {value}")))
    }
}

// Checked before the transition table is consulted: a wrong-role attempt must
// fail Unauthorized even when the edge itself would be legal.
pub fn authorize_transition(
    role: Role,
    is_creator: bool,
    from: RequestStatus,
    to: RequestStatus,
) -> Result<(), WorkflowError> {
    if to == RequestStatus::Delivered {
        if role == Role::SiteEngineer && is_creator {
            return Ok(());
        }
        return Err(WorkflowError::unauthorized(
            "only the requesting site engineer can confirm delivery",
        ));
    }

    if from == RequestStatus::Pending {
        if role == Role::Manager {
            return Ok(());
        }
        return Err(WorkflowError::unauthorized(
            "only a manager can review a pending request",
        ));
    }

    if role == Role::PurchaseOfficer {
        return Ok(());
    }
    Err(WorkflowError::unauthorized(
        "only a purchase officer can drive this transition",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_strings_round_trip() {
        for role in Role::ALL {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        assert!("admin".parse::<Role>().is_err());
    }

    #[test]
    fn only_the_manager_moves_a_request_out_of_pending() {
        let from = RequestStatus::Pending;
        let to = RequestStatus::Recheck;
        assert!(authorize_transition(Role::Manager, false, from, to).is_ok());
        assert!(matches!(
            authorize_transition(Role::PurchaseOfficer, false, from, to),
            Err(WorkflowError::Unauthorized(_))
        ));
        assert!(matches!(
            authorize_transition(Role::SiteEngineer, true, from, to),
            Err(WorkflowError::Unauthorized(_))
        ));
    }

    #[test]
    fn only_the_creator_confirms_delivery() {
        let from = RequestStatus::DeliveryStage;
        let to = RequestStatus::Delivered;
        assert!(authorize_transition(Role::SiteEngineer, true, from, to).is_ok());
        assert!(authorize_transition(Role::SiteEngineer, false, from, to).is_err());
        assert!(authorize_transition(Role::PurchaseOfficer, false, from, to).is_err());
        assert!(authorize_transition(Role::Manager, true, from, to).is_err());
    }

    #[test]
    fn purchase_officer_drives_everything_from_recheck_onward() {
        for from in [
            RequestStatus::Recheck,
            RequestStatus::ReadyForCc,
            RequestStatus::CcPending,
            RequestStatus::ReadyForPo,
            RequestStatus::PendingPo,
            RequestStatus::DeliveryStage,
        ] {
            let to = RequestStatus::ReadyForDelivery;
            assert!(authorize_transition(Role::PurchaseOfficer, false, from, to).is_ok());
            assert!(authorize_transition(Role::SiteEngineer, true, from, to).is_err());
            assert!(authorize_transition(Role::Manager, false, from, to).is_err());
        }
    }
}
