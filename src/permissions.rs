use std::collections::BTreeSet;

use crate::error::Result;
use crate::models::{ClubId, NodeRef, User, UserId};
use crate::store::{DocumentStore, RelationFilter, Traversal};

/// Global role that may administer every club and decide membership applications.
pub const ADMIN_ROLE: &str = "admin";
/// Role granted to every newly registered user.
pub const USER_ROLE: &str = "user";
/// Role carried on `authorizes` edges from a board member to their club.
pub const BOARD_ROLE: &str = "vorstand";

/// Edge type granting a user administrative rights over a club.
pub const AUTHORIZES_RELATION: &str = "authorizes";
/// Edge type linking a club to one of its yearly census submissions.
pub const CENSUS_RELATION: &str = "census";

pub fn is_global_admin(user: &User) -> bool {
    user.has_role(ADMIN_ROLE)
}

/// Every club the user reaches over an outbound `authorizes/vorstand` edge.
/// Edges to deleted clubs are skipped by the traversal.
pub async fn administered_clubs<S: DocumentStore>(
    store: &S,
    user: UserId,
) -> Result<BTreeSet<ClubId>> {
    let hits = store
        .traverse(&Traversal::outbound(
            NodeRef::user(user),
            RelationFilter::vorstand(),
        ))
        .await?;
    tracing::debug!(user = %user, clubs = hits.len(), "resolved administered clubs");
    Ok(hits.into_iter().map(|hit| ClubId(hit.node.key)).collect())
}

/// Whether `user` may administer `club`. A user without a stored key can only
/// pass through the admin role.
pub async fn is_authorized<S: DocumentStore>(store: &S, user: &User, club: ClubId) -> Result<bool> {
    if is_global_admin(user) {
        return Ok(true);
    }
    let Some(user_id) = user.key else {
        return Ok(false);
    };
    let clubs = administered_clubs(store, user_id).await?;
    Ok(clubs.contains(&club))
}
