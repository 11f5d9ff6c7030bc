use std::sync::Arc;

use anyhow::anyhow;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::census;
use crate::config::Config;
use crate::edges::EdgeStore;
use crate::entity::EntityManager;
use crate::error::{ErrorKind, LibError, Result};
use crate::invariants;
use crate::membership::{self, Authority, MembershipEvent};
use crate::models::{
    BoardMember, Census, CensusSummary, Club, ClubId, Collection, CreateClubPayload,
    CreateUserPayload, Edge, ListClubsQuery, NodeRef, PaymentDetails, UpdateClubPayload,
    UpdateUserPayload, User, UserId,
};
use crate::permissions;
use crate::security::{self, IssuedToken, TokenClaims, TokenPurpose};
use crate::store::{DocumentQuery, DocumentStore, RelationFilter, field_text};

const NOT_BOARD_OR_ADMIN: &str = "unauthorized: you are not a board member or admin";
const NOT_ADMIN: &str = "you are not an administrator";

/// Club and membership actions that can be routed as data.
///
/// The `actor` passed to [`MembershipOperations::execute`] must come from an
/// authenticated session, never from the operation payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum MembershipOperation {
    CreateClub {
        payload: CreateClubPayload,
    },
    GetClub {
        club_key: ClubId,
    },
    ListClubs,
    ListAllClubs {
        #[serde(default)]
        query: ListClubsQuery,
    },
    UpdateClub {
        club_key: ClubId,
        payload: UpdateClubPayload,
    },
    DeleteClub {
        club_key: ClubId,
    },
    RepairBoard {
        club_key: ClubId,
    },
    IsAuthorized {
        club_key: ClubId,
    },
    Apply {
        club_key: ClubId,
    },
    Approve {
        club_key: ClubId,
    },
    Deny {
        club_key: ClubId,
    },
    Cancel {
        club_key: ClubId,
    },
    AddBoardMember {
        club_key: ClubId,
        user_key: UserId,
    },
    RemoveBoardMember {
        club_key: ClubId,
        user_key: UserId,
    },
    CountBoardMembers {
        club_key: ClubId,
    },
    GetPaymentDetails {
        club_key: ClubId,
    },
    GetCensus {
        club_key: ClubId,
        year: i32,
    },
    UpsertCensus {
        club_key: ClubId,
        census: Census,
    },
    SubmitCensusCsv {
        club_key: ClubId,
        year: i32,
        csv: String,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum OperationResult {
    Club {
        club: Club,
    },
    Clubs {
        items: Vec<Club>,
    },
    ClubsPage {
        skip: u32,
        limit: Option<u32>,
        items: Vec<Club>,
    },
    Authorized {
        authorized: bool,
    },
    Board {
        members: Vec<BoardMember>,
    },
    BoardCount {
        count: usize,
    },
    PaymentDetails {
        details: PaymentDetails,
    },
    Census {
        census: Census,
    },
    Deleted,
}

pub struct MembershipOperations<S> {
    store: Arc<S>,
    validation_secret: Option<Arc<str>>,
}

impl<S> Clone for MembershipOperations<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            validation_secret: self.validation_secret.clone(),
        }
    }
}

impl<S: DocumentStore> MembershipOperations<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            validation_secret: None,
        }
    }

    pub fn from_store(store: S) -> Self {
        Self::new(Arc::new(store))
    }

    /// Secret used to sign email validation and password reset links.
    pub fn with_validation_secret(mut self, secret: impl Into<String>) -> Self {
        let secret = secret.into();
        self.validation_secret = (!secret.is_empty()).then(|| Arc::from(secret));
        self
    }

    pub fn with_config(self, config: &Config) -> Self {
        match &config.email_validation_secret {
            Some(secret) => self.with_validation_secret(secret.as_str()),
            None => self,
        }
    }

    pub fn store(&self) -> Arc<S> {
        Arc::clone(&self.store)
    }

    fn users(&self) -> EntityManager<'_, S, User> {
        EntityManager::new(&*self.store)
    }

    fn clubs(&self) -> EntityManager<'_, S, Club> {
        EntityManager::new(&*self.store)
    }

    fn censuses(&self) -> EntityManager<'_, S, Census> {
        EntityManager::new(&*self.store)
    }

    fn edges(&self) -> EdgeStore<'_, S> {
        EdgeStore::new(&*self.store)
    }

    pub async fn execute(&self, actor: &User, operation: MembershipOperation) -> Result<OperationResult> {
        match operation {
            MembershipOperation::CreateClub { payload } => {
                let club = self.create_club(actor, payload).await?;
                Ok(OperationResult::Club { club })
            }
            MembershipOperation::GetClub { club_key } => {
                let club = self.get_club(actor, club_key).await?;
                Ok(OperationResult::Club { club })
            }
            MembershipOperation::ListClubs => {
                let items = self.list_clubs(actor).await?;
                Ok(OperationResult::Clubs { items })
            }
            MembershipOperation::ListAllClubs { query } => {
                let (skip, limit) = query.pagination();
                let items = self.list_all_clubs(actor, query).await?;
                Ok(OperationResult::ClubsPage { skip, limit, items })
            }
            MembershipOperation::UpdateClub { club_key, payload } => {
                let club = self.update_club(actor, club_key, payload).await?;
                Ok(OperationResult::Club { club })
            }
            MembershipOperation::DeleteClub { club_key } => {
                self.delete_club(actor, club_key).await?;
                Ok(OperationResult::Deleted)
            }
            MembershipOperation::RepairBoard { club_key } => {
                let members = self.repair_board(actor, club_key).await?;
                Ok(OperationResult::Board { members })
            }
            MembershipOperation::IsAuthorized { club_key } => {
                let authorized = self.is_authorized(actor, club_key).await?;
                Ok(OperationResult::Authorized { authorized })
            }
            MembershipOperation::Apply { club_key } => {
                let club = self.apply(actor, club_key).await?;
                Ok(OperationResult::Club { club })
            }
            MembershipOperation::Approve { club_key } => {
                let club = self.approve(actor, club_key).await?;
                Ok(OperationResult::Club { club })
            }
            MembershipOperation::Deny { club_key } => {
                let club = self.deny(actor, club_key).await?;
                Ok(OperationResult::Club { club })
            }
            MembershipOperation::Cancel { club_key } => {
                let club = self.cancel(actor, club_key).await?;
                Ok(OperationResult::Club { club })
            }
            MembershipOperation::AddBoardMember { club_key, user_key } => {
                let members = self.add_board_member(actor, club_key, user_key).await?;
                Ok(OperationResult::Board { members })
            }
            MembershipOperation::RemoveBoardMember { club_key, user_key } => {
                let members = self.remove_board_member(actor, club_key, user_key).await?;
                Ok(OperationResult::Board { members })
            }
            MembershipOperation::CountBoardMembers { club_key } => {
                let count = self.count_board_members(actor, club_key).await?;
                Ok(OperationResult::BoardCount { count })
            }
            MembershipOperation::GetPaymentDetails { club_key } => {
                let details = self.get_payment_details(actor, club_key).await?;
                Ok(OperationResult::PaymentDetails { details })
            }
            MembershipOperation::GetCensus { club_key, year } => {
                let census = self.get_census(actor, club_key, year).await?;
                Ok(OperationResult::Census { census })
            }
            MembershipOperation::UpsertCensus { club_key, census } => {
                let census = self.upsert_census(actor, club_key, census).await?;
                Ok(OperationResult::Census { census })
            }
            MembershipOperation::SubmitCensusCsv {
                club_key,
                year,
                csv,
            } => {
                let census = self
                    .submit_census_csv(actor, club_key, year, csv.as_bytes())
                    .await?;
                Ok(OperationResult::Census { census })
            }
        }
    }

    // Users

    /// Registers a user with the plain user role. The password is checked for
    /// strength and stored as a bcrypt hash.
    pub async fn create_user(&self, payload: CreateUserPayload) -> Result<User> {
        let mut user = payload.normalize()?;
        let existing = self
            .find_users_by_email(&user.email)
            .await
            .map_err(|err| err.context("could not check for existing user: %w"))?;
        if !existing.is_empty() {
            return Err(LibError::invalid(
                "user with this email already exists",
                anyhow!("duplicate registration for {}", user.email),
            ));
        }

        let key = self.users().create(&mut user).await?;
        tracing::info!(user = %key, "created user");
        Ok(user)
    }

    pub async fn get_user(&self, actor: &User, key: UserId) -> Result<User> {
        if !permissions::is_global_admin(actor) && actor.key != Some(key) {
            return Err(LibError::unauthorized(
                "unauthorized: you cannot view this user",
                anyhow!("{} requested user {key}", actor_label(actor)),
            ));
        }
        self.users().read(key).await
    }

    pub async fn find_users_by_email(&self, email: &str) -> Result<Vec<User>> {
        self.users()
            .query(DocumentQuery::new(Collection::Users).filter("email", email.trim()))
            .await
    }

    pub async fn update_user(
        &self,
        actor: &User,
        key: UserId,
        payload: UpdateUserPayload,
    ) -> Result<User> {
        if !permissions::is_global_admin(actor) && actor.key != Some(key) {
            return Err(LibError::unauthorized(
                "unauthorized: you cannot update this user",
                anyhow!("{} tried to update user {key}", actor_label(actor)),
            ));
        }

        let mut user = self.users().read(key).await?;
        if let Some(email) = payload.apply_to(&mut user) {
            self.ensure_email_available(&email, key).await?;
        }
        self.users().update(&mut user).await?;
        tracing::info!(user = %key, "updated user");
        Ok(user)
    }

    /// Adds `role` to a user. Global admins only.
    pub async fn grant_role(&self, actor: &User, key: UserId, role: &str) -> Result<User> {
        require_admin(actor)?;
        let role = role.trim();
        if role.is_empty() {
            return Err(LibError::invalid(
                "role must not be empty",
                anyhow!("blank role for user {key}"),
            ));
        }
        let mut user = self.users().read(key).await?;
        if user.roles.insert(role.to_string()) {
            self.users().update(&mut user).await?;
            tracing::info!(user = %key, role, actor = %actor_label(actor), "granted role");
        }
        Ok(user)
    }

    /// Removes `role` from a user. Global admins only; the plain user role stays.
    pub async fn revoke_role(&self, actor: &User, key: UserId, role: &str) -> Result<User> {
        require_admin(actor)?;
        if role == permissions::USER_ROLE {
            return Err(LibError::invalid(
                "the user role cannot be revoked",
                anyhow!("attempt to revoke the base role of {key}"),
            ));
        }
        let mut user = self.users().read(key).await?;
        if user.roles.remove(role) {
            self.users().update(&mut user).await?;
            tracing::info!(user = %key, role, actor = %actor_label(actor), "revoked role");
        }
        Ok(user)
    }

    /// Issues a signed link confirming `email`, or the current address when
    /// `email` is blank. Delivery is up to the caller.
    pub async fn request_email_validation(
        &self,
        actor: &User,
        key: UserId,
        email: Option<&str>,
    ) -> Result<IssuedToken> {
        if !permissions::is_global_admin(actor) && actor.key != Some(key) {
            return Err(LibError::unauthorized(
                "unauthorized: you cannot update this user",
                anyhow!("{} requested validation for user {key}", actor_label(actor)),
            ));
        }
        let user = self
            .users()
            .read(key)
            .await
            .map_err(|err| err.context("user not found: %w"))?;
        let target = match email.map(str::trim).filter(|email| !email.is_empty()) {
            Some(email) if email != user.email => {
                self.ensure_email_available(email, key).await?;
                email.to_string()
            }
            _ => user.email.clone(),
        };

        let issued = self.issue_token(TokenPurpose::ValidateEmail, &user, key, target)?;
        tracing::info!(user = %key, expiry = issued.expiry, "issued email validation link");
        Ok(issued)
    }

    /// Checks a validation link and marks `email` as verified, switching the
    /// user to it if it differs from the stored address.
    pub async fn mark_email_verified(
        &self,
        key: UserId,
        email: &str,
        expiry: i64,
        token: &str,
    ) -> Result<User> {
        let mut user = self
            .checked_token_user(TokenPurpose::ValidateEmail, key, email, expiry, token)
            .await?;
        let email = email.trim();
        if !email.is_empty() && email != user.email {
            self.ensure_email_available(email, key).await?;
            user.email = email.to_string();
        }
        user.email_verified_at = Some(Utc::now());
        self.users().update(&mut user).await?;
        tracing::info!(user = %key, "verified email");
        Ok(user)
    }

    /// Issues a password reset link for the user registered under `email`.
    /// Returns `None` when no such user exists.
    pub async fn request_password_reset(&self, email: &str) -> Result<Option<IssuedToken>> {
        let Some(user) = self.find_users_by_email(email).await?.into_iter().next() else {
            tracing::info!("password reset requested for unknown address");
            return Ok(None);
        };
        let key = user.key.ok_or_else(|| {
            LibError::store(
                "stored user has no key",
                anyhow!("user {} returned without key", user.email),
            )
        })?;
        let issued = self.issue_token(TokenPurpose::ChangePassword, &user, key, String::new())?;
        tracing::info!(user = %key, expiry = issued.expiry, "issued password reset link");
        Ok(Some(issued))
    }

    /// Sets a new password through a reset link. The link stops working once
    /// the password has changed.
    pub async fn reset_password(
        &self,
        key: UserId,
        expiry: i64,
        token: &str,
        new_password: &str,
    ) -> Result<User> {
        let mut user = self
            .checked_token_user(TokenPurpose::ChangePassword, key, "", expiry, token)
            .await?;
        security::ensure_strong_password(new_password)?;
        user.password_hash = security::hash_password(new_password)?;
        self.users().update(&mut user).await?;
        tracing::info!(user = %key, "reset password");
        Ok(user)
    }

    fn secret(&self) -> Result<&str> {
        self.validation_secret.as_deref().ok_or_else(|| {
            LibError::unknown(
                "email validation is not configured",
                anyhow!("no validation secret set"),
            )
        })
    }

    fn issue_token(
        &self,
        purpose: TokenPurpose,
        user: &User,
        key: UserId,
        parameter: String,
    ) -> Result<IssuedToken> {
        let expiry = (Utc::now() + security::token_ttl()).timestamp();
        let token = TokenClaims {
            purpose,
            user_key: key,
            expiry,
            parameter: &parameter,
            password_hash: &user.password_hash,
        }
        .sign(self.secret()?)?;
        Ok(IssuedToken {
            user_key: key,
            parameter,
            expiry,
            token,
        })
    }

    async fn checked_token_user(
        &self,
        purpose: TokenPurpose,
        key: UserId,
        parameter: &str,
        expiry: i64,
        token: &str,
    ) -> Result<User> {
        let secret = self.secret()?;
        if security::is_expired(expiry, Utc::now()) {
            return Err(LibError::invalid(
                "validation link has expired",
                anyhow!("{} link for {key} expired at {expiry}", purpose.as_str()),
            ));
        }
        let user = self
            .users()
            .read(key)
            .await
            .map_err(|err| err.context("user not found: %w"))?;
        let claims = TokenClaims {
            purpose,
            user_key: key,
            expiry,
            parameter,
            password_hash: &user.password_hash,
        };
        if !claims.verify(secret, token) {
            tracing::warn!(user = %key, purpose = purpose.as_str(), "rejected validation token");
            return Err(LibError::unauthorized(
                "invalid validation token",
                anyhow!("{} token mismatch for {key}", purpose.as_str()),
            ));
        }
        Ok(user)
    }

    async fn ensure_email_available(&self, email: &str, owner: UserId) -> Result<()> {
        let taken = self
            .find_users_by_email(email)
            .await
            .map_err(|err| err.context("could not check email availability: %w"))?
            .into_iter()
            .any(|user| user.key != Some(owner));
        if taken {
            return Err(LibError::invalid(
                "email address already in use",
                anyhow!("{email} belongs to another user"),
            ));
        }
        Ok(())
    }

    // Clubs

    /// Creates the club node, then the creator's `authorizes/vorstand` edge.
    /// The two writes are independent; if the second fails the club exists
    /// without a board until [`Self::repair_board`] runs.
    pub async fn create_club(&self, actor: &User, payload: CreateClubPayload) -> Result<Club> {
        let owner = actor_key(actor)?;
        let mut club = payload.normalize(owner)?;
        let key = self.clubs().create(&mut club).await?;

        if let Err(err) = self.edges().upsert(&Edge::vorstand(owner, key)).await {
            tracing::warn!(club = %key, owner = %owner, "club created without board edge");
            return Err(err.context("could not create authorization edge: %w"));
        }

        tracing::info!(club = %key, owner = %owner, "created club");
        self.hydrate(&mut club).await?;
        Ok(visible_to(actor, club))
    }

    pub async fn get_club(&self, actor: &User, key: ClubId) -> Result<Club> {
        self.authorize(actor, key, NOT_BOARD_OR_ADMIN).await?;
        let club = self.load_club(key).await?;
        Ok(visible_to(actor, club))
    }

    /// Banking data of a club: complete for global admins, a masked IBAN
    /// without mandate reference for board members.
    pub async fn get_payment_details(&self, actor: &User, key: ClubId) -> Result<PaymentDetails> {
        self.authorize(actor, key, NOT_BOARD_OR_ADMIN).await?;
        let club = self.load_club(key).await?;
        if permissions::is_global_admin(actor) {
            Ok(PaymentDetails::full(&club.membership))
        } else {
            Ok(PaymentDetails::masked(&club.membership))
        }
    }

    /// Clubs the actor sits on the board of.
    pub async fn list_clubs(&self, actor: &User) -> Result<Vec<Club>> {
        let owner = actor_key(actor)?;
        let hits = self
            .edges()
            .outbound(NodeRef::user(owner), RelationFilter::vorstand())
            .await
            .map_err(|err| err.context("query for administered clubs failed: %w"))?;

        let mut clubs = Vec::with_capacity(hits.len());
        for hit in hits {
            let mut club: Club = serde_json::from_value(hit.document).map_err(|err| {
                LibError::store(
                    "obtaining club document failed",
                    anyhow!("{}: {err}", hit.node),
                )
            })?;
            club.key = Some(ClubId(hit.node.key));
            self.hydrate(&mut club).await?;
            clubs.push(visible_to(actor, club));
        }
        clubs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(clubs)
    }

    /// Every club, sorted by name. Global admins only.
    pub async fn list_all_clubs(&self, actor: &User, query: ListClubsQuery) -> Result<Vec<Club>> {
        require_admin(actor)?;
        let (skip, limit) = query.pagination();
        let mut documents = DocumentQuery::new(Collection::Clubs)
            .sort_by("name")
            .page(skip, limit);
        if let Some(status) = query.status {
            documents = documents.filter("membership.status", status.as_db_value());
        }

        let mut clubs = self
            .clubs()
            .query(documents)
            .await
            .map_err(|err| err.context("query for clubs failed: %w"))?;
        for club in &mut clubs {
            self.hydrate(club).await?;
        }
        Ok(clubs)
    }

    pub async fn update_club(
        &self,
        actor: &User,
        key: ClubId,
        payload: UpdateClubPayload,
    ) -> Result<Club> {
        self.authorize(actor, key, "unauthorized: you cannot update this club")
            .await?;
        let mut club = self.clubs().read(key).await?;
        payload.apply_to(&mut club);
        self.clubs().update(&mut club).await?;
        tracing::info!(club = %key, "updated club");
        self.hydrate(&mut club).await?;
        Ok(visible_to(actor, club))
    }

    /// Removes every edge touching the club, then the club itself.
    pub async fn delete_club(&self, actor: &User, key: ClubId) -> Result<()> {
        self.authorize(actor, key, "unauthorized: you cannot delete this club")
            .await?;
        let removed = self
            .edges()
            .remove_touching(NodeRef::club(key))
            .await
            .map_err(|err| err.context("failed to remove club edges: %w"))?;
        self.clubs().delete(key).await?;
        tracing::info!(club = %key, edges = removed, "deleted club");
        Ok(())
    }

    /// Restores the owner's board edge for a club left without any board
    /// member. Does nothing when the board is not empty.
    pub async fn repair_board(&self, actor: &User, key: ClubId) -> Result<Vec<BoardMember>> {
        require_admin(actor)?;
        let club = self.clubs().read(key).await?;
        if self.edges().count_vorstand(key).await? == 0 {
            let owner = club.owner_key.ok_or_else(|| {
                LibError::invariant(
                    "board_no_owner",
                    "club has no owner to restore",
                    anyhow!("club {key} has neither board edges nor owner"),
                )
            })?;
            if !self.users().has(owner).await? {
                return Err(LibError::not_found(
                    "user not found",
                    anyhow!("owner {owner} of club {key} no longer exists"),
                ));
            }
            self.edges().upsert(&Edge::vorstand(owner, key)).await?;
            tracing::info!(club = %key, owner = %owner, "restored board edge");
        }
        self.board_members(key).await
    }

    // Membership lifecycle

    pub async fn is_authorized(&self, actor: &User, club: ClubId) -> Result<bool> {
        permissions::is_authorized(&*self.store, actor, club).await
    }

    pub async fn apply(&self, actor: &User, key: ClubId) -> Result<Club> {
        self.fire(actor, key, MembershipEvent::Apply).await
    }

    pub async fn approve(&self, actor: &User, key: ClubId) -> Result<Club> {
        self.fire(actor, key, MembershipEvent::Approve).await
    }

    pub async fn deny(&self, actor: &User, key: ClubId) -> Result<Club> {
        self.fire(actor, key, MembershipEvent::Deny).await
    }

    pub async fn cancel(&self, actor: &User, key: ClubId) -> Result<Club> {
        self.fire(actor, key, MembershipEvent::Cancel).await
    }

    /// Read-modify-write of the club's status. Concurrent events on the same
    /// club are not serialized; the last write wins.
    async fn fire(&self, actor: &User, key: ClubId, event: MembershipEvent) -> Result<Club> {
        let (load_failed, store_failed) = event_messages(event);
        match event.required_authority() {
            Authority::Board => self.authorize(actor, key, NOT_BOARD_OR_ADMIN).await?,
            Authority::GlobalAdmin => require_admin(actor)?,
        }

        let mut club = self
            .clubs()
            .read(key)
            .await
            .map_err(|err| err.context(load_failed))?;
        let previous = club.membership.status;
        club.membership.status = membership::transition(previous, event)?;
        self.clubs()
            .update(&mut club)
            .await
            .map_err(|err| err.context(store_failed))?;

        tracing::info!(
            club = %key,
            event = %event,
            from = %previous,
            to = %club.membership.status,
            "membership status changed"
        );
        self.hydrate(&mut club).await?;
        Ok(visible_to(actor, club))
    }

    // Board

    pub async fn add_board_member(
        &self,
        actor: &User,
        club: ClubId,
        user: UserId,
    ) -> Result<Vec<BoardMember>> {
        self.authorize(actor, club, "unauthorized: you cannot manage this board")
            .await?;
        if !self.clubs().has(club).await? {
            return Err(club_not_found(club));
        }
        if !self.users().has(user).await? {
            return Err(LibError::not_found(
                "user not found",
                anyhow!("board candidate {user} does not exist"),
            ));
        }

        self.edges().upsert(&Edge::vorstand(user, club)).await?;
        tracing::info!(club = %club, user = %user, "added board member");
        self.board_members(club).await
    }

    /// Removes `user` from the board. The board never drops below one member,
    /// and only a global admin may remove themselves.
    pub async fn remove_board_member(
        &self,
        actor: &User,
        club: ClubId,
        user: UserId,
    ) -> Result<Vec<BoardMember>> {
        self.authorize(actor, club, "unauthorized: you cannot manage this board")
            .await?;
        let actor_id = actor_key(actor)?;
        let board_size = self.edges().count_vorstand(club).await?;
        invariants::ensure_board_removal_allowed(
            club,
            board_size,
            actor_id,
            user,
            permissions::is_global_admin(actor),
        )?;

        let edge = self.edges().board_edge(club, user).await?.ok_or_else(|| {
            LibError::not_found(
                "user is not a board member of this club",
                anyhow!("no vorstand edge from {user} to {club}"),
            )
        })?;
        let edge_key = edge.key.ok_or_else(|| {
            LibError::store(
                "stored edge has no key",
                anyhow!("vorstand edge {} returned without key", edge.identity()),
            )
        })?;
        self.edges().remove(edge_key).await?;

        tracing::info!(club = %club, user = %user, actor = %actor_id, "removed board member");
        self.board_members(club).await
    }

    pub async fn count_board_members(&self, actor: &User, club: ClubId) -> Result<usize> {
        self.authorize(actor, club, NOT_BOARD_OR_ADMIN).await?;
        self.edges().count_vorstand(club).await
    }

    // Census

    pub async fn get_census(&self, actor: &User, club: ClubId, year: i32) -> Result<Census> {
        self.authorize(actor, club, NOT_BOARD_OR_ADMIN).await?;
        let key = self.edges().census_key(club, year).await?.ok_or_else(|| {
            LibError::not_found(
                "census not found",
                anyhow!("club {club} has no census for {year}"),
            )
        })?;
        self.censuses().read(key).await
    }

    /// Stores the roster for `(club, census.year)`, replacing an earlier
    /// submission for the same year in place. Rows get the same checks as a
    /// CSV upload.
    pub async fn upsert_census(&self, actor: &User, club: ClubId, census: Census) -> Result<Census> {
        self.authorize(actor, club, NOT_BOARD_OR_ADMIN).await?;
        self.store_census(club, census).await
    }

    /// Parses and validates a CSV roster, then stores it.
    pub async fn submit_census_csv<R: std::io::Read>(
        &self,
        actor: &User,
        club: ClubId,
        year: i32,
        csv: R,
    ) -> Result<Census> {
        self.authorize(actor, club, NOT_BOARD_OR_ADMIN).await?;
        let census = census::parse_csv(csv, year)?;
        self.store_census(club, census).await
    }

    async fn store_census(&self, club: ClubId, census: Census) -> Result<Census> {
        let year = census.year;
        census::validate_members(&census.members, year)?;
        if !self.clubs().has(club).await? {
            return Err(club_not_found(club));
        }

        match self.edges().census_key(club, year).await? {
            Some(key) => {
                let mut stored = self.censuses().read(key).await?;
                stored.member_count = census.members.len();
                stored.members = census.members;
                self.censuses().update(&mut stored).await?;
                tracing::info!(club = %club, census = %key, year, members = stored.member_count, "updated census");
                Ok(stored)
            }
            None => {
                let mut created = Census::new(year, census.members);
                let key = self.censuses().create(&mut created).await?;
                self.edges()
                    .upsert(&Edge::census(club, key, year))
                    .await
                    .map_err(|err| {
                        tracing::warn!(club = %club, census = %key, year, "census stored without edge");
                        err.context("could not link census to club: %w")
                    })?;
                tracing::info!(club = %club, census = %key, year, members = created.member_count, "created census");
                Ok(created)
            }
        }
    }

    // Helpers

    async fn authorize(&self, actor: &User, club: ClubId, public: &'static str) -> Result<()> {
        if self.is_authorized(actor, club).await? {
            return Ok(());
        }
        tracing::warn!(club = %club, actor = %actor_label(actor), "rejected club access");
        Err(LibError::unauthorized(
            public,
            anyhow!("{} may not administer club {club}", actor_label(actor)),
        ))
    }

    async fn load_club(&self, key: ClubId) -> Result<Club> {
        let mut club = self.clubs().read(key).await.map_err(|err| {
            if err.kind == ErrorKind::NotFound {
                club_not_found(key)
            } else {
                err.context("obtaining club document failed: %w")
            }
        })?;
        self.hydrate(&mut club).await?;
        Ok(club)
    }

    async fn board_members(&self, club: ClubId) -> Result<Vec<BoardMember>> {
        let hits = self.edges().board(club).await?;
        Ok(hits
            .into_iter()
            .map(|hit| BoardMember {
                key: UserId(hit.node.key),
                firstname: field_text(&hit.document, "firstname").unwrap_or_default(),
                lastname: field_text(&hit.document, "lastname").unwrap_or_default(),
            })
            .collect())
    }

    /// Fills the read-time projections from the edges collection.
    async fn hydrate(&self, club: &mut Club) -> Result<()> {
        let Some(key) = club.key else {
            return Ok(());
        };
        club.vorstand = self.board_members(key).await?;

        let mut summaries: Vec<CensusSummary> = self
            .edges()
            .censuses(key, None)
            .await?
            .into_iter()
            .map(|hit| CensusSummary {
                year: hit
                    .edge
                    .relation
                    .year()
                    .unwrap_or_else(|| year_of(&hit.document)),
                member_count: hit
                    .document
                    .get("memberCount")
                    .and_then(Value::as_u64)
                    .map(|count| count as usize)
                    .unwrap_or_default(),
            })
            .collect();
        summaries.sort_by_key(|summary| summary.year);
        club.censuses = summaries;
        Ok(())
    }
}

/// Banking fields stay in the admin view.
fn visible_to(actor: &User, mut club: Club) -> Club {
    if !permissions::is_global_admin(actor) {
        club.redact_payment_details();
    }
    club
}

fn year_of(document: &Value) -> i32 {
    document
        .get("year")
        .and_then(Value::as_i64)
        .and_then(|year| i32::try_from(year).ok())
        .unwrap_or_default()
}

fn event_messages(event: MembershipEvent) -> (&'static str, &'static str) {
    match event {
        MembershipEvent::Apply => (
            "failed to load club for membership application: %w",
            "failed to update club for membership application: %w",
        ),
        MembershipEvent::Approve => (
            "failed to load club for approval: %w",
            "failed to update club for membership approval: %w",
        ),
        MembershipEvent::Deny => (
            "failed to load club for denial: %w",
            "failed to update club for membership denial: %w",
        ),
        MembershipEvent::Cancel => (
            "failed to load club for membership cancellation: %w",
            "failed to update club for membership cancellation: %w",
        ),
    }
}

fn actor_key(actor: &User) -> Result<UserId> {
    actor.key.ok_or_else(|| {
        LibError::unauthorized(
            "user not found in context",
            anyhow!("actor {} has no stored key", actor.email),
        )
    })
}

fn actor_label(actor: &User) -> String {
    match actor.key {
        Some(key) => key.to_string(),
        None => actor.email.clone(),
    }
}

fn require_admin(actor: &User) -> Result<()> {
    if permissions::is_global_admin(actor) {
        return Ok(());
    }
    Err(LibError::unauthorized(
        NOT_ADMIN,
        anyhow!("{} lacks the admin role", actor_label(actor)),
    ))
}

fn club_not_found(key: ClubId) -> LibError {
    LibError::not_found("club not found", anyhow!("club {key} does not exist"))
}
