use anyhow::anyhow;

use crate::error::{LibError, Result};
use crate::models::{ClubId, UserId};

/// Ways a board change can break the rule that every club keeps at least one
/// `authorizes/vorstand` edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoardInvariantViolation {
    LastRemainingMember { board_size: usize },
    SelfRemoval { user: UserId },
}

impl BoardInvariantViolation {
    pub const fn error_code(&self) -> &'static str {
        match self {
            BoardInvariantViolation::LastRemainingMember { .. } => "board_last_member",
            BoardInvariantViolation::SelfRemoval { .. } => "board_self_removal",
        }
    }

    pub const fn public_message(&self) -> &'static str {
        match self {
            BoardInvariantViolation::LastRemainingMember { .. } => {
                "cannot remove the last remaining owner"
            }
            BoardInvariantViolation::SelfRemoval { .. } => "cannot remove yourself from the board",
        }
    }
}

/// Checks a removal of `target` from a board of `board_size` members.
/// The size check applies regardless of who the target is.
pub fn board_removal_violations(
    board_size: usize,
    actor: UserId,
    target: UserId,
    actor_is_admin: bool,
) -> Vec<BoardInvariantViolation> {
    let mut violations = Vec::new();
    if board_size <= 1 {
        violations.push(BoardInvariantViolation::LastRemainingMember { board_size });
    }
    if actor == target && !actor_is_admin {
        violations.push(BoardInvariantViolation::SelfRemoval { user: actor });
    }
    violations
}

pub fn ensure_board_removal_allowed(
    club: ClubId,
    board_size: usize,
    actor: UserId,
    target: UserId,
    actor_is_admin: bool,
) -> Result<()> {
    let violations = board_removal_violations(board_size, actor, target, actor_is_admin);
    if let Some(first) = violations.first() {
        tracing::warn!(
            club = %club,
            actor = %actor,
            target = %target,
            code = first.error_code(),
            "rejected board removal"
        );
        return Err(LibError::invariant(
            first.error_code(),
            first.public_message(),
            anyhow!("board invariant failed for club {club}: {violations:?}"),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::error::ErrorKind;

    fn user() -> UserId {
        UserId(Uuid::new_v4())
    }

    #[test]
    fn last_member_cannot_be_removed_by_anyone() {
        let actor = user();
        let violations = board_removal_violations(1, actor, user(), true);
        assert_eq!(
            violations,
            vec![BoardInvariantViolation::LastRemainingMember { board_size: 1 }]
        );
    }

    #[test]
    fn empty_board_is_treated_as_last_member() {
        let violations = board_removal_violations(0, user(), user(), false);
        assert!(
            violations
                .iter()
                .any(|v| matches!(v, BoardInvariantViolation::LastRemainingMember { .. }))
        );
    }

    #[test]
    fn non_admin_cannot_remove_themselves() {
        let actor = user();
        let err = ensure_board_removal_allowed(ClubId(Uuid::new_v4()), 3, actor, actor, false)
            .expect_err("self removal rejected");
        assert_eq!(err.kind, ErrorKind::InvariantViolation);
        assert_eq!(err.code, "board_self_removal");
    }

    #[test]
    fn admin_may_remove_themselves_from_larger_board() {
        let actor = user();
        assert!(board_removal_violations(2, actor, actor, true).is_empty());
    }

    #[test]
    fn removing_another_member_of_larger_board_is_allowed() {
        ensure_board_removal_allowed(ClubId(Uuid::new_v4()), 2, user(), user(), false)
            .expect("removal allowed");
    }

    #[test]
    fn last_member_error_uses_owner_message() {
        let err = ensure_board_removal_allowed(ClubId(Uuid::new_v4()), 1, user(), user(), false)
            .expect_err("last member");
        assert_eq!(err.to_string(), "cannot remove the last remaining owner");
        assert_eq!(err.code, "board_last_member");
    }
}
