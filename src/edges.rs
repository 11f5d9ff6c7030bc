use crate::error::Result;
use crate::models::{CensusId, ClubId, Edge, EdgeId, NodeRef, UserId};
use crate::store::{DocumentStore, RelationFilter, Traversal, TraversalHit};

/// Relationship queries used by the membership workflows, on top of the raw
/// edge primitives of a [`DocumentStore`].
pub struct EdgeStore<'a, S> {
    store: &'a S,
}

impl<'a, S: DocumentStore> EdgeStore<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    pub async fn upsert(&self, edge: &Edge) -> Result<EdgeId> {
        let key = self.store.upsert_edge(edge).await?;
        tracing::debug!(identity = %edge.identity(), key = %key, "upserted edge");
        Ok(key)
    }

    pub async fn outbound(&self, from: NodeRef, filter: RelationFilter) -> Result<Vec<TraversalHit>> {
        let hits = self.store.traverse(&Traversal::outbound(from, filter)).await?;
        tracing::debug!(from = %from, hits = hits.len(), "outbound traversal");
        Ok(hits)
    }

    pub async fn inbound(&self, to: NodeRef, filter: RelationFilter) -> Result<Vec<TraversalHit>> {
        let hits = self.store.traverse(&Traversal::inbound(to, filter)).await?;
        tracing::debug!(to = %to, hits = hits.len(), "inbound traversal");
        Ok(hits)
    }

    /// Board members of `club`, one hit per `authorizes/vorstand` edge.
    pub async fn board(&self, club: ClubId) -> Result<Vec<TraversalHit>> {
        self.inbound(NodeRef::club(club), RelationFilter::vorstand())
            .await
    }

    /// Live board size. Always traversed, never cached.
    pub async fn count_vorstand(&self, club: ClubId) -> Result<usize> {
        Ok(self.board(club).await?.len())
    }

    /// The vorstand edge from `user` to `club`, if one exists.
    pub async fn board_edge(&self, club: ClubId, user: UserId) -> Result<Option<Edge>> {
        let member = NodeRef::user(user);
        Ok(self
            .board(club)
            .await?
            .into_iter()
            .find(|hit| hit.node == member)
            .map(|hit| hit.edge))
    }

    /// Census nodes linked from `club`, optionally restricted to one year.
    pub async fn censuses(&self, club: ClubId, year: Option<i32>) -> Result<Vec<TraversalHit>> {
        self.outbound(NodeRef::club(club), RelationFilter::Census { year })
            .await
    }

    pub async fn census_key(&self, club: ClubId, year: i32) -> Result<Option<CensusId>> {
        Ok(self
            .censuses(club, Some(year))
            .await?
            .into_iter()
            .next()
            .map(|hit| CensusId(hit.node.key)))
    }

    pub async fn remove(&self, key: EdgeId) -> Result<bool> {
        self.store.remove_edge(key).await
    }

    pub async fn remove_touching(&self, node: NodeRef) -> Result<u64> {
        let removed = self.store.remove_edges_touching(node).await?;
        tracing::debug!(node = %node, removed, "removed edges touching node");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use uuid::Uuid;

    use super::*;
    use crate::memory::MemoryStore;
    use crate::models::Collection;

    #[tokio::test]
    async fn count_follows_live_edges() {
        let store = MemoryStore::new();
        let edges = EdgeStore::new(&store);
        let club = ClubId(Uuid::new_v4());
        let first = UserId(
            store
                .insert_document(Collection::Users, json!({"email": "a@example.org"}))
                .await
                .expect("user"),
        );
        let second = UserId(
            store
                .insert_document(Collection::Users, json!({"email": "b@example.org"}))
                .await
                .expect("user"),
        );

        edges.upsert(&Edge::vorstand(first, club)).await.expect("edge");
        edges.upsert(&Edge::vorstand(second, club)).await.expect("edge");
        edges.upsert(&Edge::vorstand(second, club)).await.expect("edge");
        assert_eq!(edges.count_vorstand(club).await.expect("count"), 2);

        let edge = edges
            .board_edge(club, second)
            .await
            .expect("lookup")
            .expect("edge exists");
        let key = edge.key.expect("stored edge has key");
        assert!(edges.remove(key).await.expect("remove"));
        assert_eq!(edges.count_vorstand(club).await.expect("count"), 1);
        assert!(edges.board_edge(club, second).await.expect("lookup").is_none());
    }

    #[tokio::test]
    async fn census_key_selects_year() {
        let store = MemoryStore::new();
        let edges = EdgeStore::new(&store);
        let club = ClubId(Uuid::new_v4());
        let census = CensusId(
            store
                .insert_document(Collection::Censuses, json!({"year": 2024}))
                .await
                .expect("census"),
        );
        edges
            .upsert(&Edge::census(club, census, 2024))
            .await
            .expect("edge");

        assert_eq!(edges.census_key(club, 2024).await.expect("lookup"), Some(census));
        assert_eq!(edges.census_key(club, 2023).await.expect("lookup"), None);
    }
}
