//! Typed CRUD over one document collection.

use std::marker::PhantomData;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use uuid::Uuid;

use crate::error::{LibError, Result};
use crate::models::{Census, CensusId, Club, ClubId, Collection, User, UserId};
use crate::store::{DocumentQuery, DocumentStore};

/// A document type stored in its own collection.
pub trait Entity: Serialize + DeserializeOwned + Default + Send + Sync {
    type Key: Copy + Into<Uuid> + From<Uuid> + std::fmt::Display + Send + Sync;

    const COLLECTION: Collection;
    /// Read-time projections that must never be written back.
    const PROJECTED_FIELDS: &'static [&'static str] = &[];

    fn key(&self) -> Option<Self::Key>;
    fn set_key(&mut self, key: Self::Key);
    fn set_created_at(&mut self, at: DateTime<Utc>);
    fn set_modified_at(&mut self, at: DateTime<Utc>);
}

impl Entity for User {
    type Key = UserId;
    const COLLECTION: Collection = Collection::Users;

    fn key(&self) -> Option<UserId> {
        self.key
    }

    fn set_key(&mut self, key: UserId) {
        self.key = Some(key);
    }

    fn set_created_at(&mut self, at: DateTime<Utc>) {
        self.created_at = Some(at);
    }

    fn set_modified_at(&mut self, at: DateTime<Utc>) {
        self.modified_at = Some(at);
    }
}

impl Entity for Club {
    type Key = ClubId;
    const COLLECTION: Collection = Collection::Clubs;
    const PROJECTED_FIELDS: &'static [&'static str] = &["vorstand", "censuses"];

    fn key(&self) -> Option<ClubId> {
        self.key
    }

    fn set_key(&mut self, key: ClubId) {
        self.key = Some(key);
    }

    fn set_created_at(&mut self, at: DateTime<Utc>) {
        self.created_at = Some(at);
    }

    fn set_modified_at(&mut self, at: DateTime<Utc>) {
        self.modified_at = Some(at);
    }
}

impl Entity for Census {
    type Key = CensusId;
    const COLLECTION: Collection = Collection::Censuses;

    fn key(&self) -> Option<CensusId> {
        self.key
    }

    fn set_key(&mut self, key: CensusId) {
        self.key = Some(key);
    }

    fn set_created_at(&mut self, at: DateTime<Utc>) {
        self.created_at = Some(at);
    }

    fn set_modified_at(&mut self, at: DateTime<Utc>) {
        self.modified_at = Some(at);
    }
}

/// Serializes an entity for storage: the key lives in metadata, and
/// projected fields are dropped.
fn encode<T: Entity>(entity: &T) -> Result<Value> {
    let mut value = serde_json::to_value(entity)?;
    if let Value::Object(map) = &mut value {
        map.remove("_key");
        for field in T::PROJECTED_FIELDS {
            map.remove(*field);
        }
    }
    Ok(value)
}

fn decode<T: Entity>(key: Uuid, body: Value) -> Result<T> {
    let mut entity: T = serde_json::from_value(body).map_err(|err| {
        LibError::store(
            "stored document could not be decoded",
            anyhow!("{}/{key}: {err}", T::COLLECTION),
        )
    })?;
    entity.set_key(T::Key::from(key));
    Ok(entity)
}

fn missing<T: Entity>(key: T::Key) -> LibError {
    LibError::not_found(
        "document not found",
        anyhow!("{}/{key} does not exist", T::COLLECTION),
    )
}

pub struct EntityManager<'a, S, T> {
    store: &'a S,
    entity: PhantomData<fn() -> T>,
}

impl<'a, S: DocumentStore, T: Entity> EntityManager<'a, S, T> {
    pub fn new(store: &'a S) -> Self {
        Self {
            store,
            entity: PhantomData,
        }
    }

    /// Stores `entity` and writes the generated key and timestamps back onto it.
    pub async fn create(&self, entity: &mut T) -> Result<T::Key> {
        let now = Utc::now();
        entity.set_created_at(now);
        entity.set_modified_at(now);
        let body = encode(entity)?;
        let key = self
            .store
            .insert_document(T::COLLECTION, body)
            .await
            .map_err(|err| err.context("could not create document: %w"))?;
        let key = T::Key::from(key);
        entity.set_key(key);
        Ok(key)
    }

    pub async fn read(&self, key: T::Key) -> Result<T> {
        let body = self
            .store
            .read_document(T::COLLECTION, key.into())
            .await?
            .ok_or_else(|| missing::<T>(key))?;
        decode(key.into(), body)
    }

    pub async fn has(&self, key: T::Key) -> Result<bool> {
        self.store.document_exists(T::COLLECTION, key.into()).await
    }

    /// Replaces the stored document with `entity`. The entity must carry a key.
    pub async fn update(&self, entity: &mut T) -> Result<()> {
        let key = entity.key().ok_or_else(|| {
            LibError::invalid(
                "document key is required",
                anyhow!("update of {} without key", T::COLLECTION),
            )
        })?;
        entity.set_modified_at(Utc::now());
        let body = encode(entity)?;
        let replaced = self
            .store
            .replace_document(T::COLLECTION, key.into(), body)
            .await
            .map_err(|err| err.context("could not update document: %w"))?;
        if !replaced {
            return Err(missing::<T>(key));
        }
        Ok(())
    }

    pub async fn delete(&self, key: T::Key) -> Result<()> {
        let removed = self
            .store
            .remove_document(T::COLLECTION, key.into())
            .await
            .map_err(|err| err.context("could not delete document: %w"))?;
        if !removed {
            return Err(missing::<T>(key));
        }
        Ok(())
    }

    /// Runs `query` against this entity's collection.
    pub async fn query(&self, mut query: DocumentQuery) -> Result<Vec<T>> {
        query.collection = T::COLLECTION;
        self.store
            .query_documents(&query)
            .await?
            .into_iter()
            .map(|(key, body)| decode(key, body))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::memory::MemoryStore;
    use crate::models::{BoardMember, CensusSummary};

    #[tokio::test]
    async fn create_assigns_key_and_read_restores_it() {
        let store = MemoryStore::new();
        let users = EntityManager::<_, User>::new(&store);
        let mut user = User {
            email: "erika@example.org".to_string(),
            firstname: "Erika".to_string(),
            ..User::default()
        };

        let key = users.create(&mut user).await.expect("create user");
        assert_eq!(user.key, Some(key));
        assert!(user.created_at.is_some());

        let loaded = users.read(key).await.expect("read user");
        assert_eq!(loaded.key, Some(key));
        assert_eq!(loaded.firstname, "Erika");
        assert!(users.has(key).await.expect("has"));
    }

    #[tokio::test]
    async fn projected_fields_are_not_stored() {
        let store = MemoryStore::new();
        let clubs = EntityManager::<_, Club>::new(&store);
        let mut club = Club {
            name: "Nord".to_string(),
            vorstand: vec![BoardMember {
                key: UserId(Uuid::new_v4()),
                firstname: "A".to_string(),
                lastname: "B".to_string(),
            }],
            censuses: vec![CensusSummary {
                year: 2024,
                member_count: 3,
            }],
            ..Club::default()
        };
        let key = clubs.create(&mut club).await.expect("create club");

        let raw = store
            .read_document(Collection::Clubs, key.0)
            .await
            .expect("read raw")
            .expect("document exists");
        assert!(raw.get("vorstand").is_none());
        assert!(raw.get("censuses").is_none());
        assert!(raw.get("_key").is_none());
    }

    #[tokio::test]
    async fn update_and_delete_of_missing_key_are_not_found() {
        let store = MemoryStore::new();
        let censuses = EntityManager::<_, Census>::new(&store);
        let mut census = Census::new(2024, Vec::new());
        census.key = Some(CensusId(Uuid::new_v4()));

        let err = censuses.update(&mut census).await.expect_err("missing");
        assert_eq!(err.kind, ErrorKind::NotFound);
        let err = censuses
            .delete(CensusId(Uuid::new_v4()))
            .await
            .expect_err("missing");
        assert_eq!(err.kind, ErrorKind::NotFound);
        let err = censuses
            .read(CensusId(Uuid::new_v4()))
            .await
            .expect_err("missing");
        assert_eq!(err.kind, ErrorKind::NotFound);
    }
}
