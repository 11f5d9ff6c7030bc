pub mod census;
pub mod config;
#[cfg(feature = "sqlx")]
pub mod db;
pub mod edges;
pub mod entity;
pub mod error;
pub mod i18n;
pub mod invariants;
pub mod membership;
pub mod memory;
pub mod models;
pub mod operations;
pub mod permissions;
pub mod security;
pub mod store;

pub mod prelude {
    pub use crate::census::{parse_csv, sample_csv, validate_members, validate_rows};
    pub use crate::config::Config;
    #[cfg(feature = "sqlx")]
    pub use crate::db::{PgStore, create_membership_tables};
    pub use crate::edges::EdgeStore;
    pub use crate::entity::{Entity, EntityManager};
    pub use crate::error::{ErrorKind, LibError, Result};
    pub use crate::i18n::{Catalog, Message, MessageArg};
    pub use crate::membership::{MembershipEvent, transition};
    pub use crate::memory::MemoryStore;
    pub use crate::models::{
        BoardMember, Census, CensusId, CensusSummary, Club, ClubId, CreateClubPayload,
        CreateUserPayload, Edge, EdgeId, ListClubsQuery, MemberRow, Membership, MembershipStatus,
        NodeRef, PaymentDetails, Relation, UpdateClubPayload, UpdateUserPayload, User, UserId,
        mask_iban,
    };
    pub use crate::operations::{MembershipOperation, MembershipOperations, OperationResult};
    pub use crate::permissions::is_authorized;
    pub use crate::security::{IssuedToken, check_password, hash_password};
    pub use crate::store::{DocumentStore, RelationFilter, Traversal};
}
