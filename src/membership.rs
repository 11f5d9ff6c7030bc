use std::fmt;

use anyhow::anyhow;
use serde::{Deserialize, Serialize};

use crate::error::{LibError, Result};
use crate::models::MembershipStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MembershipEvent {
    Apply,
    Approve,
    Deny,
    Cancel,
}

/// Who may fire an event against a club.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authority {
    /// Admin role, or an `authorizes/vorstand` edge to the club.
    Board,
    GlobalAdmin,
}

impl MembershipEvent {
    pub const fn as_str(self) -> &'static str {
        match self {
            MembershipEvent::Apply => "apply",
            MembershipEvent::Approve => "approve",
            MembershipEvent::Deny => "deny",
            MembershipEvent::Cancel => "cancel",
        }
    }

    pub const fn required_authority(self) -> Authority {
        match self {
            MembershipEvent::Apply | MembershipEvent::Cancel => Authority::Board,
            MembershipEvent::Approve | MembershipEvent::Deny => Authority::GlobalAdmin,
        }
    }
}

impl fmt::Display for MembershipEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Next status for `event` fired in `current`.
///
/// Cancel always succeeds: an active membership becomes `cancelled`, any other
/// state falls back to `inactive`.
pub fn transition(current: MembershipStatus, event: MembershipEvent) -> Result<MembershipStatus> {
    use MembershipEvent::*;
    use MembershipStatus::*;

    match (event, current) {
        (Apply, Inactive | Cancelled) => Ok(Requested),
        (Approve, Requested) => Ok(Active),
        (Deny, Requested) => Ok(Denied),
        (Cancel, Active) => Ok(Cancelled),
        (Cancel, _) => Ok(Inactive),
        (Apply, _) => Err(rejected("cannot apply: current status is %s", event, current)),
        (Approve, _) => Err(rejected(
            "cannot approve: current status is %s",
            event,
            current,
        )),
        (Deny, _) => Err(rejected("cannot deny: current status is %s", event, current)),
    }
}

fn rejected(public: &'static str, event: MembershipEvent, current: MembershipStatus) -> LibError {
    LibError::invalid_transition(
        public,
        event.as_str(),
        current.as_db_value(),
        anyhow!("membership event {event} not allowed in state {current}"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorDetails, ErrorKind};

    const ALL_STATES: [MembershipStatus; 5] = [
        MembershipStatus::Inactive,
        MembershipStatus::Requested,
        MembershipStatus::Active,
        MembershipStatus::Denied,
        MembershipStatus::Cancelled,
    ];

    #[test]
    fn apply_approve_cancel_walks_the_happy_path() {
        let requested = transition(MembershipStatus::Inactive, MembershipEvent::Apply).expect("apply");
        let active = transition(requested, MembershipEvent::Approve).expect("approve");
        let cancelled = transition(active, MembershipEvent::Cancel).expect("cancel");
        assert_eq!(requested, MembershipStatus::Requested);
        assert_eq!(active, MembershipStatus::Active);
        assert_eq!(cancelled, MembershipStatus::Cancelled);
    }

    #[test]
    fn cancelled_club_may_reapply() {
        assert_eq!(
            transition(MembershipStatus::Cancelled, MembershipEvent::Apply).expect("apply"),
            MembershipStatus::Requested
        );
    }

    #[test]
    fn deny_only_from_requested() {
        assert_eq!(
            transition(MembershipStatus::Requested, MembershipEvent::Deny).expect("deny"),
            MembershipStatus::Denied
        );
        for state in ALL_STATES {
            if state == MembershipStatus::Requested {
                continue;
            }
            let err = transition(state, MembershipEvent::Deny).expect_err("deny rejected");
            assert_eq!(err.kind, ErrorKind::InvalidTransition);
            assert_eq!(
                err.to_string(),
                format!("cannot deny: current status is {state}")
            );
        }
    }

    #[test]
    fn approve_outside_requested_names_current_state() {
        let err = transition(MembershipStatus::Active, MembershipEvent::Approve)
            .expect_err("approve rejected");
        assert_eq!(
            err.details,
            Some(ErrorDetails::InvalidTransition {
                event: "approve".to_string(),
                current: "active".to_string(),
            })
        );
    }

    #[test]
    fn apply_rejected_while_pending_or_active() {
        for state in [
            MembershipStatus::Requested,
            MembershipStatus::Active,
            MembershipStatus::Denied,
        ] {
            let err = transition(state, MembershipEvent::Apply).expect_err("apply rejected");
            assert_eq!(err.public, "cannot apply: current status is %s");
        }
    }

    #[test]
    fn cancel_never_fails() {
        for state in ALL_STATES {
            let next = transition(state, MembershipEvent::Cancel).expect("cancel");
            let expected = if state == MembershipStatus::Active {
                MembershipStatus::Cancelled
            } else {
                MembershipStatus::Inactive
            };
            assert_eq!(next, expected);
        }
    }

    #[test]
    fn approve_and_deny_need_global_admin() {
        assert_eq!(
            MembershipEvent::Approve.required_authority(),
            Authority::GlobalAdmin
        );
        assert_eq!(
            MembershipEvent::Deny.required_authority(),
            Authority::GlobalAdmin
        );
        assert_eq!(MembershipEvent::Apply.required_authority(), Authority::Board);
        assert_eq!(MembershipEvent::Cancel.required_authority(), Authority::Board);
    }
}
