use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{LibError, Result};
use crate::permissions;
use crate::security;

macro_rules! document_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
        pub struct $name(pub Uuid);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                Uuid::from_str(s).map(Self)
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl From<$name> for Uuid {
            fn from(value: $name) -> Self {
                value.0
            }
        }
    };
}

document_id!(UserId);
document_id!(ClubId);
document_id!(CensusId);
document_id!(EdgeId);

/// Document collections. Edges live in one shared table instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
    Users,
    Clubs,
    Censuses,
}

impl Collection {
    pub const fn as_db_value(self) -> &'static str {
        match self {
            Collection::Users => "users",
            Collection::Clubs => "clubs",
            Collection::Censuses => "censuses",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "users" => Some(Collection::Users),
            "clubs" => Some(Collection::Clubs),
            "censuses" => Some(Collection::Censuses),
            _ => None,
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_db_value())
    }
}

/// Address of a document in the graph, rendered as `collection/key`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeRef {
    pub collection: Collection,
    pub key: Uuid,
}

impl NodeRef {
    pub const fn new(collection: Collection, key: Uuid) -> Self {
        Self { collection, key }
    }

    pub const fn user(id: UserId) -> Self {
        Self::new(Collection::Users, id.0)
    }

    pub const fn club(id: ClubId) -> Self {
        Self::new(Collection::Clubs, id.0)
    }

    pub const fn census(id: CensusId) -> Self {
        Self::new(Collection::Censuses, id.0)
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.key)
    }
}

impl FromStr for NodeRef {
    type Err = LibError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (collection, key) = s.split_once('/').ok_or_else(|| {
            LibError::invalid("Malformed node reference", anyhow!("missing '/' in {s}"))
        })?;
        let collection = Collection::from_db_value(collection).ok_or_else(|| {
            LibError::invalid(
                "Malformed node reference",
                anyhow!("unknown collection {collection}"),
            )
        })?;
        let key = Uuid::from_str(key).map_err(|err| {
            LibError::invalid("Malformed node reference", anyhow!("bad key in {s}: {err}"))
        })?;
        Ok(Self { collection, key })
    }
}

impl Serialize for NodeRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for NodeRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NodeRef::from_str(&raw).map_err(|err| D::Error::custom(err.source))
    }
}

/// Membership status of a club. Older documents use `none` and `approved`,
/// which read as `inactive` and `active`; writes always use the canonical names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MembershipStatus {
    #[default]
    #[serde(alias = "none", alias = "")]
    Inactive,
    Requested,
    #[serde(alias = "approved")]
    Active,
    Denied,
    Cancelled,
}

impl MembershipStatus {
    pub const fn as_db_value(self) -> &'static str {
        match self {
            MembershipStatus::Inactive => "inactive",
            MembershipStatus::Requested => "requested",
            MembershipStatus::Active => "active",
            MembershipStatus::Denied => "denied",
            MembershipStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "inactive" | "none" | "" => Some(MembershipStatus::Inactive),
            "requested" => Some(MembershipStatus::Requested),
            "active" | "approved" => Some(MembershipStatus::Active),
            "denied" => Some(MembershipStatus::Denied),
            "cancelled" => Some(MembershipStatus::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for MembershipStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_db_value())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Membership {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iban: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sepa_mandate_number: Option<String>,
    #[serde(default)]
    pub contribution: f64,
    #[serde(default)]
    pub status: MembershipStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(rename = "_key", default, skip_serializing_if = "Option::is_none")]
    pub key: Option<UserId>,
    pub email: String,
    #[serde(default)]
    pub password_hash: String,
    #[serde(default)]
    pub firstname: String,
    #[serde(default)]
    pub lastname: String,
    #[serde(default)]
    pub roles: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_verified_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub membership: Membership,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }
}

/// Board member as shown on a club; a projection of the user document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardMember {
    #[serde(rename = "_key")]
    pub key: UserId,
    pub firstname: String,
    pub lastname: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CensusSummary {
    pub year: i32,
    pub member_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Club {
    #[serde(rename = "_key", default, skip_serializing_if = "Option::is_none")]
    pub key: Option<ClubId>,
    pub name: String,
    #[serde(default)]
    pub legal_form: String,
    #[serde(default)]
    pub membership: Membership,
    #[serde(default)]
    pub votes: i32,
    #[serde(default)]
    pub member_count: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_person: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_key: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_key: Option<ClubId>,
    #[serde(default)]
    pub website_ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website_checked_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub statute_ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statute_checked_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub register_ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub register_checked_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<DateTime<Utc>>,
    /// Populated from inbound `authorizes` edges on read; never stored.
    #[serde(default)]
    pub vorstand: Vec<BoardMember>,
    /// Populated from outbound `census` edges on read; never stored.
    #[serde(default)]
    pub censuses: Vec<CensusSummary>,
}

impl Club {
    /// Drops the banking fields from a copy that leaves the admin view.
    pub fn redact_payment_details(&mut self) {
        self.membership.iban = None;
        self.membership.sepa_mandate_number = None;
    }
}

/// Banking data of a club as shown to one reader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct PaymentDetails {
    pub iban: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sepa_mandate_number: Option<String>,
}

impl PaymentDetails {
    pub fn full(membership: &Membership) -> Self {
        Self {
            iban: membership.iban.clone().unwrap_or_default(),
            sepa_mandate_number: membership.sepa_mandate_number.clone(),
        }
    }

    /// Board view: masked IBAN, no mandate reference.
    pub fn masked(membership: &Membership) -> Self {
        Self {
            iban: mask_iban(membership.iban.as_deref().unwrap_or_default()),
            sepa_mandate_number: None,
        }
    }
}

/// Keeps the first four and last three characters of an IBAN and masks the
/// rest in groups of four. Short values are masked entirely.
pub fn mask_iban(iban: &str) -> String {
    let cleaned: Vec<char> = iban.chars().filter(|c| *c != ' ').collect();
    if cleaned.len() <= 7 {
        return "*".repeat(cleaned.len());
    }

    let mut groups = vec![cleaned[..4].iter().collect::<String>()];
    let mut remaining = cleaned.len() - 7;
    while remaining > 0 {
        let width = remaining.min(4);
        groups.push("*".repeat(width));
        remaining -= width;
    }
    groups.push(cleaned[cleaned.len() - 3..].iter().collect());
    groups.join(" ")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MemberRow {
    pub firstname: String,
    pub lastname: String,
    pub gender: String,
    pub birth_year: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Census {
    #[serde(rename = "_key", default, skip_serializing_if = "Option::is_none")]
    pub key: Option<CensusId>,
    pub year: i32,
    #[serde(default)]
    pub member_count: usize,
    #[serde(default)]
    pub members: Vec<MemberRow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<DateTime<Utc>>,
}

impl Census {
    pub fn new(year: i32, members: Vec<MemberRow>) -> Self {
        Self {
            key: None,
            year,
            member_count: members.len(),
            members,
            created_at: None,
            modified_at: None,
        }
    }
}

/// Kind of relation an edge expresses. Stored flat next to `_from`/`_to`
/// with the discriminant under `type`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Relation {
    Authorizes { role: String },
    Census { year: i32 },
    Labeled { label: String },
}

impl Relation {
    pub fn vorstand() -> Self {
        Relation::Authorizes {
            role: permissions::BOARD_ROLE.to_string(),
        }
    }

    pub const fn kind(&self) -> &'static str {
        match self {
            Relation::Authorizes { .. } => permissions::AUTHORIZES_RELATION,
            Relation::Census { .. } => permissions::CENSUS_RELATION,
            Relation::Labeled { .. } => "labeled",
        }
    }

    pub fn role(&self) -> Option<&str> {
        match self {
            Relation::Authorizes { role } => Some(role.as_str()),
            _ => None,
        }
    }

    pub fn year(&self) -> Option<i32> {
        match self {
            Relation::Census { year } => Some(*year),
            _ => None,
        }
    }

    pub fn label(&self) -> Option<&str> {
        match self {
            Relation::Labeled { label } => Some(label.as_str()),
            _ => None,
        }
    }

    /// Everything that distinguishes two relations between the same endpoints.
    pub fn identity(&self) -> String {
        match self {
            Relation::Authorizes { role } => format!("authorizes:{role}"),
            Relation::Census { year } => format!("census:{year}"),
            Relation::Labeled { label } => format!("labeled:{label}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    #[serde(rename = "_key", default, skip_serializing_if = "Option::is_none")]
    pub key: Option<EdgeId>,
    #[serde(rename = "_from")]
    pub from: NodeRef,
    #[serde(rename = "_to")]
    pub to: NodeRef,
    #[serde(flatten)]
    pub relation: Relation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub attributes: Map<String, Value>,
}

impl Edge {
    pub fn new(from: NodeRef, to: NodeRef, relation: Relation) -> Self {
        Self {
            key: None,
            from,
            to,
            relation,
            priority: None,
            attributes: Map::new(),
        }
    }

    pub fn vorstand(user: UserId, club: ClubId) -> Self {
        Self::new(NodeRef::user(user), NodeRef::club(club), Relation::vorstand())
    }

    pub fn census(club: ClubId, census: CensusId, year: i32) -> Self {
        Self::new(
            NodeRef::club(club),
            NodeRef::census(census),
            Relation::Census { year },
        )
    }

    /// Full relation identity used for insert-or-update.
    pub fn identity(&self) -> String {
        format!("{}>{}#{}", self.from, self.to, self.relation.identity())
    }

    pub fn touches(&self, node: &NodeRef) -> bool {
        self.from == *node || self.to == *node
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateClubPayload {
    pub name: String,
    pub legal_form: String,
    pub email: Option<String>,
    pub address: Option<String>,
    pub contact_person: Option<String>,
    pub contribution: Option<f64>,
    pub parent_key: Option<ClubId>,
}

impl CreateClubPayload {
    /// Validates the payload and builds an unsaved club owned by `owner`.
    /// The membership status always starts out `inactive`.
    pub fn normalize(self, owner: UserId) -> Result<Club> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(LibError::invalid(
                "club name must not be empty",
                anyhow!("empty club name"),
            ));
        }
        let legal_form = self.legal_form.trim().to_string();
        if legal_form.is_empty() {
            return Err(LibError::invalid(
                "legal form must not be empty",
                anyhow!("empty legal form for club {name}"),
            ));
        }

        Ok(Club {
            name,
            legal_form,
            email: non_blank(self.email),
            contact_person: non_blank(self.contact_person),
            parent_key: self.parent_key,
            owner_key: Some(owner),
            membership: Membership {
                contribution: self.contribution.unwrap_or_default(),
                status: MembershipStatus::Inactive,
                address: non_blank(self.address),
                ..Membership::default()
            },
            ..Club::default()
        })
    }
}

/// Partial club update. Status, contribution, member count and votes change
/// only through their own workflows.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateClubPayload {
    pub name: Option<String>,
    pub legal_form: Option<String>,
    pub email: Option<String>,
    pub contact_person: Option<String>,
    pub iban: Option<String>,
    pub sepa_mandate_number: Option<String>,
    pub address: Option<String>,
}

impl UpdateClubPayload {
    pub fn apply_to(self, club: &mut Club) {
        if let Some(name) = self.name.map(|name| name.trim().to_string()) {
            if !name.is_empty() {
                club.name = name;
            }
        }
        if let Some(legal_form) = self.legal_form.map(|value| value.trim().to_string()) {
            if !legal_form.is_empty() {
                club.legal_form = legal_form;
            }
        }
        if let Some(email) = self.email {
            club.email = non_blank(Some(email));
        }
        if let Some(contact_person) = self.contact_person {
            club.contact_person = non_blank(Some(contact_person));
        }
        if let Some(iban) = self.iban {
            club.membership.iban = non_blank(Some(iban));
        }
        if let Some(sepa) = self.sepa_mandate_number {
            club.membership.sepa_mandate_number = non_blank(Some(sepa));
        }
        if let Some(address) = self.address {
            club.membership.address = non_blank(Some(address));
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListClubsQuery {
    pub status: Option<MembershipStatus>,
    pub skip: Option<u32>,
    pub limit: Option<u32>,
}

impl ListClubsQuery {
    pub fn pagination(&self) -> (u32, Option<u32>) {
        let skip = self.skip.unwrap_or(0);
        let limit = self.limit.filter(|limit| *limit > 0);
        (skip, limit)
    }
}

/// Self-registration. Every registered user starts with the plain user role;
/// other roles are granted afterwards by a global admin.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserPayload {
    pub email: String,
    pub password: String,
    pub firstname: String,
    pub lastname: String,
}

impl CreateUserPayload {
    /// Checks the fields and password strength, then hashes the password.
    pub fn normalize(self) -> Result<User> {
        let firstname = self.firstname.trim().to_string();
        if firstname.is_empty() {
            return Err(LibError::invalid(
                "first name must not be empty",
                anyhow!("empty first name"),
            ));
        }
        let lastname = self.lastname.trim().to_string();
        if lastname.is_empty() {
            return Err(LibError::invalid(
                "last name must not be empty",
                anyhow!("empty last name"),
            ));
        }
        let email = self.email.trim().to_string();
        if email.is_empty() {
            return Err(LibError::invalid(
                "email must not be empty",
                anyhow!("empty email"),
            ));
        }
        security::ensure_strong_password(&self.password)?;
        let password_hash = security::hash_password(&self.password)?;

        Ok(User {
            email,
            password_hash,
            firstname,
            lastname,
            roles: BTreeSet::from([permissions::USER_ROLE.to_string()]),
            ..User::default()
        })
    }
}

/// Profile changes a user may make. A changed email drops the verification mark.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserPayload {
    pub firstname: Option<String>,
    pub lastname: Option<String>,
    pub email: Option<String>,
}

impl UpdateUserPayload {
    /// Applies the change and returns the new email if it differs from the old one.
    pub fn apply_to(self, user: &mut User) -> Option<String> {
        if let Some(firstname) = non_blank(self.firstname) {
            user.firstname = firstname;
        }
        if let Some(lastname) = non_blank(self.lastname) {
            user.lastname = lastname;
        }
        let email = non_blank(self.email).filter(|email| *email != user.email)?;
        user.email = email.clone();
        user.email_verified_at = None;
        Some(email)
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
