use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::anyhow;
use parking_lot::RwLock;
use serde_json::Value;
use uuid::Uuid;

use crate::error::{LibError, Result};
use crate::models::{Collection, Edge, EdgeId, NodeRef};
use crate::store::{
    Direction, DocumentQuery, DocumentStore, Traversal, TraversalHit, field_text,
};

#[derive(Debug, Default)]
struct State {
    documents: BTreeMap<(Collection, Uuid), Value>,
    edges: Vec<Edge>,
}

/// In-process document store with the same semantics as the Postgres backend.
/// Edge upserts run under the write lock, which makes them atomic.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<State>,
    traversals: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn document_count(&self, collection: Collection) -> usize {
        self.state
            .read()
            .documents
            .keys()
            .filter(|(stored, _)| *stored == collection)
            .count()
    }

    pub fn edge_count(&self) -> usize {
        self.state.read().edges.len()
    }

    /// Number of traversals served so far.
    pub fn traversal_count(&self) -> u64 {
        self.traversals.load(Ordering::Relaxed)
    }

    /// Every stored edge, in insertion order.
    pub fn edges(&self) -> Vec<Edge> {
        self.state.read().edges.clone()
    }
}

fn stored_edge(edge: &Edge, key: EdgeId) -> Edge {
    let mut stored = edge.clone();
    stored.key = Some(key);
    stored
}

impl DocumentStore for MemoryStore {
    async fn insert_document(&self, collection: Collection, body: Value) -> Result<Uuid> {
        let key = Uuid::new_v4();
        self.state.write().documents.insert((collection, key), body);
        Ok(key)
    }

    async fn read_document(&self, collection: Collection, key: Uuid) -> Result<Option<Value>> {
        Ok(self.state.read().documents.get(&(collection, key)).cloned())
    }

    async fn replace_document(&self, collection: Collection, key: Uuid, body: Value) -> Result<bool> {
        let mut state = self.state.write();
        match state.documents.get_mut(&(collection, key)) {
            Some(existing) => {
                *existing = body;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn remove_document(&self, collection: Collection, key: Uuid) -> Result<bool> {
        Ok(self
            .state
            .write()
            .documents
            .remove(&(collection, key))
            .is_some())
    }

    async fn document_exists(&self, collection: Collection, key: Uuid) -> Result<bool> {
        Ok(self.state.read().documents.contains_key(&(collection, key)))
    }

    async fn query_documents(&self, query: &DocumentQuery) -> Result<Vec<(Uuid, Value)>> {
        let state = self.state.read();
        let mut matches: Vec<(Uuid, Value)> = state
            .documents
            .iter()
            .filter(|((collection, _), _)| *collection == query.collection)
            .filter(|(_, body)| {
                query.filters.iter().all(|filter| {
                    field_text(body, &filter.path).as_deref() == Some(filter.equals.as_str())
                })
            })
            .map(|((_, key), body)| (*key, body.clone()))
            .collect();

        if let Some(sort_by) = &query.sort_by {
            matches.sort_by(|(a_key, a), (b_key, b)| {
                field_text(a, sort_by)
                    .cmp(&field_text(b, sort_by))
                    .then_with(|| a_key.cmp(b_key))
            });
        }

        let limit = query.limit.map(|limit| limit as usize).unwrap_or(usize::MAX);
        Ok(matches
            .into_iter()
            .skip(query.skip as usize)
            .take(limit)
            .collect())
    }

    async fn insert_edge(&self, edge: &Edge) -> Result<EdgeId> {
        let key = EdgeId(Uuid::new_v4());
        self.state.write().edges.push(stored_edge(edge, key));
        Ok(key)
    }

    async fn upsert_edge(&self, edge: &Edge) -> Result<EdgeId> {
        let identity = edge.identity();
        let mut state = self.state.write();
        if let Some(existing) = state
            .edges
            .iter_mut()
            .find(|stored| stored.identity() == identity)
        {
            let key = existing.key.ok_or_else(|| {
                LibError::store(
                    "could not update edge",
                    anyhow!("stored edge {identity} has no key"),
                )
            })?;
            existing.priority = edge.priority;
            existing.attributes = edge.attributes.clone();
            return Ok(key);
        }

        let key = EdgeId(Uuid::new_v4());
        state.edges.push(stored_edge(edge, key));
        Ok(key)
    }

    async fn traverse(&self, traversal: &Traversal) -> Result<Vec<TraversalHit>> {
        self.traversals.fetch_add(1, Ordering::Relaxed);
        let state = self.state.read();
        let hits = state
            .edges
            .iter()
            .filter(|edge| traversal.filter.matches(&edge.relation))
            .filter_map(|edge| {
                let (near, far) = match traversal.direction {
                    Direction::Outbound => (edge.from, edge.to),
                    Direction::Inbound => (edge.to, edge.from),
                };
                if near != traversal.start {
                    return None;
                }
                let document = state.documents.get(&(far.collection, far.key))?;
                Some(TraversalHit {
                    edge: edge.clone(),
                    node: far,
                    document: document.clone(),
                })
            })
            .collect();
        Ok(hits)
    }

    async fn remove_edge(&self, key: EdgeId) -> Result<bool> {
        let mut state = self.state.write();
        let before = state.edges.len();
        state.edges.retain(|edge| edge.key != Some(key));
        Ok(state.edges.len() != before)
    }

    async fn remove_edges_touching(&self, node: NodeRef) -> Result<u64> {
        let mut state = self.state.write();
        let before = state.edges.len();
        state.edges.retain(|edge| !edge.touches(&node));
        Ok((before - state.edges.len()) as u64)
    }

    async fn edges_touching(&self, node: NodeRef) -> Result<Vec<Edge>> {
        Ok(self
            .state
            .read()
            .edges
            .iter()
            .filter(|edge| edge.touches(&node))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::models::{ClubId, Relation, UserId};
    use crate::store::RelationFilter;

    #[tokio::test]
    async fn upsert_edge_keeps_one_edge_per_identity() {
        let store = MemoryStore::new();
        let user = UserId(Uuid::new_v4());
        let club = ClubId(Uuid::new_v4());

        let first = store
            .upsert_edge(&Edge::vorstand(user, club))
            .await
            .expect("first upsert");
        let mut again = Edge::vorstand(user, club);
        again.priority = Some(1);
        let second = store.upsert_edge(&again).await.expect("second upsert");

        assert_eq!(first, second);
        assert_eq!(store.edge_count(), 1);
        assert_eq!(store.edges()[0].priority, Some(1));
    }

    #[tokio::test]
    async fn traversal_skips_edges_to_missing_documents() {
        let store = MemoryStore::new();
        let user = store
            .insert_document(Collection::Users, json!({"email": "a@example.org"}))
            .await
            .expect("insert user");
        let club = store
            .insert_document(Collection::Clubs, json!({"name": "Nord"}))
            .await
            .expect("insert club");
        let gone = ClubId(Uuid::new_v4());

        store
            .insert_edge(&Edge::vorstand(UserId(user), ClubId(club)))
            .await
            .expect("edge to club");
        store
            .insert_edge(&Edge::vorstand(UserId(user), gone))
            .await
            .expect("orphan edge");

        let hits = store
            .traverse(&Traversal::outbound(
                NodeRef::user(UserId(user)),
                RelationFilter::vorstand(),
            ))
            .await
            .expect("traverse");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].node, NodeRef::club(ClubId(club)));
        assert_eq!(hits[0].document["name"], "Nord");
    }

    #[tokio::test]
    async fn traversal_of_unknown_node_is_empty() {
        let store = MemoryStore::new();
        let hits = store
            .traverse(&Traversal::inbound(
                NodeRef::club(ClubId(Uuid::new_v4())),
                RelationFilter::Census { year: None },
            ))
            .await
            .expect("traverse");
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn query_documents_filters_sorts_and_pages() {
        let store = MemoryStore::new();
        for (name, status) in [
            ("Caesar", "active"),
            ("Anton", "active"),
            ("Berta", "requested"),
            ("Dora", "active"),
        ] {
            store
                .insert_document(
                    Collection::Clubs,
                    json!({"name": name, "membership": {"status": status}}),
                )
                .await
                .expect("insert club");
        }

        let query = DocumentQuery::new(Collection::Clubs)
            .filter("membership.status", "active")
            .sort_by("name")
            .page(1, Some(2));
        let names: Vec<String> = store
            .query_documents(&query)
            .await
            .expect("query")
            .into_iter()
            .filter_map(|(_, body)| field_text(&body, "name"))
            .collect();
        assert_eq!(names, vec!["Caesar".to_string(), "Dora".to_string()]);
    }

    #[tokio::test]
    async fn remove_edges_touching_clears_both_directions() {
        let store = MemoryStore::new();
        let club = ClubId(Uuid::new_v4());
        let other = ClubId(Uuid::new_v4());
        store
            .insert_edge(&Edge::vorstand(UserId(Uuid::new_v4()), club))
            .await
            .expect("inbound edge");
        store
            .insert_edge(&Edge::new(
                NodeRef::club(club),
                NodeRef::club(other),
                Relation::Labeled {
                    label: "subsidiary_of".to_string(),
                },
            ))
            .await
            .expect("outbound edge");
        store
            .insert_edge(&Edge::vorstand(UserId(Uuid::new_v4()), other))
            .await
            .expect("unrelated edge");

        let removed = store
            .remove_edges_touching(NodeRef::club(club))
            .await
            .expect("remove edges");
        assert_eq!(removed, 2);
        assert_eq!(store.edge_count(), 1);
    }
}
