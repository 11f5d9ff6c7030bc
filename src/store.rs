//! Storage seam: per-collection document CRUD with server-assigned keys, field
//! filter queries, and one-hop traversals over the shared edges collection.
//!
//! Every method is a single round-trip. Multi-step workflows are composed by
//! the callers without a spanning transaction.

use std::future::Future;

use serde_json::Value;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{Collection, Edge, EdgeId, NodeRef, Relation};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outbound,
    Inbound,
}

/// Edge pattern for a traversal. `None` fields match anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationFilter {
    Any,
    Authorizes { role: Option<String> },
    Census { year: Option<i32> },
    Labeled { label: String },
}

impl RelationFilter {
    pub fn vorstand() -> Self {
        RelationFilter::Authorizes {
            role: Some(crate::permissions::BOARD_ROLE.to_string()),
        }
    }

    pub fn matches(&self, relation: &Relation) -> bool {
        match (self, relation) {
            (RelationFilter::Any, _) => true,
            (RelationFilter::Authorizes { role: None }, Relation::Authorizes { .. }) => true,
            (RelationFilter::Authorizes { role: Some(wanted) }, Relation::Authorizes { role }) => {
                wanted == role
            }
            (RelationFilter::Census { year: None }, Relation::Census { .. }) => true,
            (RelationFilter::Census { year: Some(wanted) }, Relation::Census { year }) => {
                wanted == year
            }
            (RelationFilter::Labeled { label: wanted }, Relation::Labeled { label }) => {
                wanted == label
            }
            _ => false,
        }
    }
}

/// One-hop traversal from `start`, e.g. all clubs a user authorizes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Traversal {
    pub start: NodeRef,
    pub direction: Direction,
    pub filter: RelationFilter,
}

impl Traversal {
    pub fn outbound(start: NodeRef, filter: RelationFilter) -> Self {
        Self {
            start,
            direction: Direction::Outbound,
            filter,
        }
    }

    pub fn inbound(start: NodeRef, filter: RelationFilter) -> Self {
        Self {
            start,
            direction: Direction::Inbound,
            filter,
        }
    }
}

/// A traversed edge together with the document at its far end.
#[derive(Debug, Clone, PartialEq)]
pub struct TraversalHit {
    pub edge: Edge,
    pub node: NodeRef,
    pub document: Value,
}

/// Equality test on a dotted document path, compared as text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldFilter {
    pub path: String,
    pub equals: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentQuery {
    pub collection: Collection,
    pub filters: Vec<FieldFilter>,
    pub sort_by: Option<String>,
    pub skip: u32,
    pub limit: Option<u32>,
}

impl DocumentQuery {
    pub fn new(collection: Collection) -> Self {
        Self {
            collection,
            filters: Vec::new(),
            sort_by: None,
            skip: 0,
            limit: None,
        }
    }

    pub fn filter(mut self, path: impl Into<String>, equals: impl Into<String>) -> Self {
        self.filters.push(FieldFilter {
            path: path.into(),
            equals: equals.into(),
        });
        self
    }

    pub fn sort_by(mut self, path: impl Into<String>) -> Self {
        self.sort_by = Some(path.into());
        self
    }

    pub fn page(mut self, skip: u32, limit: Option<u32>) -> Self {
        self.skip = skip;
        self.limit = limit;
        self
    }

    pub fn path_segments(path: &str) -> Vec<String> {
        path.split('.').map(str::to_string).collect()
    }
}

/// Text value at a dotted path, the way filters and sorting see it.
pub fn field_text(document: &Value, path: &str) -> Option<String> {
    let mut current = document;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    match current {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}

pub trait DocumentStore: Send + Sync {
    /// Stores `body` under a freshly generated key and returns the key.
    fn insert_document(
        &self,
        collection: Collection,
        body: Value,
    ) -> impl Future<Output = Result<Uuid>> + Send;

    fn read_document(
        &self,
        collection: Collection,
        key: Uuid,
    ) -> impl Future<Output = Result<Option<Value>>> + Send;

    /// Returns `false` when no document exists at `key`.
    fn replace_document(
        &self,
        collection: Collection,
        key: Uuid,
        body: Value,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// Returns `false` when no document exists at `key`.
    fn remove_document(
        &self,
        collection: Collection,
        key: Uuid,
    ) -> impl Future<Output = Result<bool>> + Send;

    fn document_exists(
        &self,
        collection: Collection,
        key: Uuid,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// Returns `(key, body)` pairs matching every filter.
    fn query_documents(
        &self,
        query: &DocumentQuery,
    ) -> impl Future<Output = Result<Vec<(Uuid, Value)>>> + Send;

    fn insert_edge(&self, edge: &Edge) -> impl Future<Output = Result<EdgeId>> + Send;

    /// Insert-or-update keyed on [`Edge::identity`]. Repeated or concurrent
    /// calls with the same identity leave exactly one edge.
    fn upsert_edge(&self, edge: &Edge) -> impl Future<Output = Result<EdgeId>> + Send;

    /// One-hop traversal. Edges whose far end no longer exists are skipped.
    fn traverse(
        &self,
        traversal: &Traversal,
    ) -> impl Future<Output = Result<Vec<TraversalHit>>> + Send;

    fn remove_edge(&self, key: EdgeId) -> impl Future<Output = Result<bool>> + Send;

    /// Removes every edge with `node` as source or target; returns the count.
    fn remove_edges_touching(&self, node: NodeRef) -> impl Future<Output = Result<u64>> + Send;

    /// Every edge with `node` as source or target, orphans included.
    fn edges_touching(&self, node: NodeRef) -> impl Future<Output = Result<Vec<Edge>>> + Send;
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn field_text_walks_nested_paths() {
        let doc = json!({"membership": {"status": "active", "contribution": 12.5}});
        assert_eq!(
            field_text(&doc, "membership.status").as_deref(),
            Some("active")
        );
        assert_eq!(
            field_text(&doc, "membership.contribution").as_deref(),
            Some("12.5")
        );
        assert_eq!(field_text(&doc, "membership.iban"), None);
    }

    #[test]
    fn relation_filter_matches_role_and_year() {
        let vorstand = Relation::vorstand();
        let census = Relation::Census { year: 2024 };

        assert!(RelationFilter::vorstand().matches(&vorstand));
        assert!(!RelationFilter::vorstand().matches(&census));
        assert!(RelationFilter::Census { year: None }.matches(&census));
        assert!(RelationFilter::Census { year: Some(2024) }.matches(&census));
        assert!(!RelationFilter::Census { year: Some(2023) }.matches(&census));
        assert!(
            !RelationFilter::Authorizes {
                role: Some("kassenwart".to_string())
            }
            .matches(&vorstand)
        );
    }
}
