use std::sync::Arc;

use anyhow::anyhow;
use once_cell::sync::Lazy;
use serde_json::{Map, Value};
use sqlx::migrate::{MigrateError, Migrator};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{LibError, Result};
use crate::models::{Collection, Edge, EdgeId, NodeRef, Relation};
use crate::store::{
    Direction, DocumentQuery, DocumentStore, RelationFilter, Traversal, TraversalHit,
};

pub static MIGRATOR: Lazy<Migrator> = Lazy::new(|| {
    let mut migrator = sqlx::migrate!("./migrations");
    migrator.set_ignore_missing(true);
    migrator
});

pub async fn create_membership_tables(pool: &PgPool) -> std::result::Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}

#[derive(Debug, Clone, FromRow)]
struct DocumentRow {
    key: Uuid,
    body: Value,
}

#[derive(Debug, Clone, FromRow)]
struct EdgeRow {
    key: Uuid,
    from_collection: String,
    from_key: Uuid,
    to_collection: String,
    to_key: Uuid,
    kind: String,
    role: Option<String>,
    year: Option<i32>,
    label: Option<String>,
    priority: Option<i32>,
    attributes: Value,
}

#[derive(Debug, Clone, FromRow)]
struct TraversalRow {
    #[sqlx(flatten)]
    edge: EdgeRow,
    document: Value,
}

fn db_err(public: &'static str, err: sqlx::Error) -> LibError {
    LibError::store(public, anyhow!(err))
}

fn node_ref(collection: &str, key: Uuid) -> Result<NodeRef> {
    let collection = Collection::from_db_value(collection).ok_or_else(|| {
        LibError::store(
            "Stored edge references an unknown collection",
            anyhow!("unknown collection {collection}"),
        )
    })?;
    Ok(NodeRef::new(collection, key))
}

impl TryFrom<EdgeRow> for Edge {
    type Error = LibError;

    fn try_from(row: EdgeRow) -> Result<Self> {
        let relation = match (row.kind.as_str(), row.role, row.year, row.label) {
            ("authorizes", Some(role), _, _) => Relation::Authorizes { role },
            ("census", _, Some(year), _) => Relation::Census { year },
            ("labeled", _, _, Some(label)) => Relation::Labeled { label },
            (kind, ..) => {
                return Err(LibError::store(
                    "Stored edge has an unknown shape",
                    anyhow!("edge {} has kind {kind} without its attribute", row.key),
                ));
            }
        };
        let attributes = match row.attributes {
            Value::Object(map) => map,
            _ => Map::new(),
        };

        Ok(Edge {
            key: Some(EdgeId(row.key)),
            from: node_ref(&row.from_collection, row.from_key)?,
            to: node_ref(&row.to_collection, row.to_key)?,
            relation,
            priority: row.priority,
            attributes,
        })
    }
}

struct FilterBinds {
    kind: Option<&'static str>,
    role: Option<String>,
    year: Option<i32>,
    label: Option<String>,
}

impl From<&RelationFilter> for FilterBinds {
    fn from(filter: &RelationFilter) -> Self {
        match filter {
            RelationFilter::Any => Self {
                kind: None,
                role: None,
                year: None,
                label: None,
            },
            RelationFilter::Authorizes { role } => Self {
                kind: Some("authorizes"),
                role: role.clone(),
                year: None,
                label: None,
            },
            RelationFilter::Census { year } => Self {
                kind: Some("census"),
                role: None,
                year: *year,
                label: None,
            },
            RelationFilter::Labeled { label } => Self {
                kind: Some("labeled"),
                role: None,
                year: None,
                label: Some(label.clone()),
            },
        }
    }
}

const EDGE_COLUMNS: &str = r#"
    e.key,
    e.from_collection,
    e.from_key,
    e.to_collection,
    e.to_key,
    e.kind,
    e.role,
    e.year,
    e.label,
    e.priority,
    e.attributes
"#;

/// Postgres-backed document store: one JSONB documents table keyed by
/// `(collection, key)` and one shared edges table.
#[derive(Clone)]
pub struct PgStore {
    pool: Arc<PgPool>,
}

impl PgStore {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Connects with the configured pool limits and applies migrations.
    pub async fn connect(config: &Config) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.database_url)
            .await
            .map_err(|err| db_err("Failed to connect to database", err))?;

        create_membership_tables(&pool).await.map_err(|err| {
            LibError::store("Failed to run membership migrations", anyhow!(err))
        })?;

        tracing::info!(
            max_connections = config.max_connections,
            "connected membership store"
        );
        Ok(Self::new(Arc::new(pool)))
    }

    pub fn pool(&self) -> Arc<PgPool> {
        Arc::clone(&self.pool)
    }
}

impl DocumentStore for PgStore {
    async fn insert_document(&self, collection: Collection, body: Value) -> Result<Uuid> {
        let key: (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO membership.documents (collection, body)
            VALUES ($1, $2)
            RETURNING key
            "#,
        )
        .bind(collection.as_db_value())
        .bind(&body)
        .fetch_one(&*self.pool)
        .await
        .map_err(|err| db_err("Failed to create document", err))?;

        Ok(key.0)
    }

    async fn read_document(&self, collection: Collection, key: Uuid) -> Result<Option<Value>> {
        let row = sqlx::query_as::<_, DocumentRow>(
            r#"
            SELECT key, body
            FROM membership.documents
            WHERE collection = $1
              AND key = $2
            "#,
        )
        .bind(collection.as_db_value())
        .bind(key)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|err| db_err("Failed to read document", err))?;

        Ok(row.map(|row| row.body))
    }

    async fn replace_document(&self, collection: Collection, key: Uuid, body: Value) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE membership.documents
            SET body = $3,
                modified_at = CURRENT_TIMESTAMP
            WHERE collection = $1
              AND key = $2
            "#,
        )
        .bind(collection.as_db_value())
        .bind(key)
        .bind(&body)
        .execute(&*self.pool)
        .await
        .map_err(|err| db_err("Failed to update document", err))?;

        Ok(result.rows_affected() > 0)
    }

    async fn remove_document(&self, collection: Collection, key: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM membership.documents
            WHERE collection = $1
              AND key = $2
            "#,
        )
        .bind(collection.as_db_value())
        .bind(key)
        .execute(&*self.pool)
        .await
        .map_err(|err| db_err("Failed to delete document", err))?;

        Ok(result.rows_affected() > 0)
    }

    async fn document_exists(&self, collection: Collection, key: Uuid) -> Result<bool> {
        let exists: (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS(
                SELECT 1
                FROM membership.documents
                WHERE collection = $1
                  AND key = $2
            )
            "#,
        )
        .bind(collection.as_db_value())
        .bind(key)
        .fetch_one(&*self.pool)
        .await
        .map_err(|err| db_err("Failed to query document", err))?;

        Ok(exists.0)
    }

    async fn query_documents(&self, query: &DocumentQuery) -> Result<Vec<(Uuid, Value)>> {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "SELECT key, body FROM membership.documents WHERE collection = ",
        );
        builder.push_bind(query.collection.as_db_value());
        for filter in &query.filters {
            builder.push(" AND body #>> ");
            builder.push_bind(DocumentQuery::path_segments(&filter.path));
            builder.push("::text[] = ");
            builder.push_bind(filter.equals.clone());
        }

        match &query.sort_by {
            Some(path) => {
                builder.push(" ORDER BY body #>> ");
                builder.push_bind(DocumentQuery::path_segments(path));
                builder.push("::text[] ASC, key ASC");
            }
            None => {
                builder.push(" ORDER BY created_at ASC, key ASC");
            }
        }

        builder.push(" OFFSET ");
        builder.push_bind(i64::from(query.skip));
        if let Some(limit) = query.limit {
            builder.push(" LIMIT ");
            builder.push_bind(i64::from(limit));
        }

        let rows = builder
            .build_query_as::<DocumentRow>()
            .fetch_all(&*self.pool)
            .await
            .map_err(|err| db_err("Failed to query documents", err))?;

        Ok(rows.into_iter().map(|row| (row.key, row.body)).collect())
    }

    async fn insert_edge(&self, edge: &Edge) -> Result<EdgeId> {
        let key: (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO membership.edges (
                from_collection,
                from_key,
                to_collection,
                to_key,
                kind,
                role,
                year,
                label,
                priority,
                attributes
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING key
            "#,
        )
        .bind(edge.from.collection.as_db_value())
        .bind(edge.from.key)
        .bind(edge.to.collection.as_db_value())
        .bind(edge.to.key)
        .bind(edge.relation.kind())
        .bind(edge.relation.role())
        .bind(edge.relation.year())
        .bind(edge.relation.label())
        .bind(edge.priority)
        .bind(Value::Object(edge.attributes.clone()))
        .fetch_one(&*self.pool)
        .await
        .map_err(|err| db_err("Failed to create edge", err))?;

        Ok(EdgeId(key.0))
    }

    async fn upsert_edge(&self, edge: &Edge) -> Result<EdgeId> {
        let identity = edge.identity();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|err| db_err("Failed to start transaction", err))?;

        // Serializes writers of the same relation identity until commit.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(&identity)
            .execute(&mut *tx)
            .await
            .map_err(|err| db_err("Failed to lock edge identity", err))?;

        let existing: Option<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT key
            FROM membership.edges
            WHERE from_collection = $1
              AND from_key = $2
              AND to_collection = $3
              AND to_key = $4
              AND kind = $5
              AND role IS NOT DISTINCT FROM $6
              AND year IS NOT DISTINCT FROM $7
              AND label IS NOT DISTINCT FROM $8
            ORDER BY created_at ASC
            LIMIT 1
            "#,
        )
        .bind(edge.from.collection.as_db_value())
        .bind(edge.from.key)
        .bind(edge.to.collection.as_db_value())
        .bind(edge.to.key)
        .bind(edge.relation.kind())
        .bind(edge.relation.role())
        .bind(edge.relation.year())
        .bind(edge.relation.label())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|err| db_err("Failed to query edge", err))?;

        let key = match existing {
            Some((key,)) => {
                sqlx::query(
                    r#"
                    UPDATE membership.edges
                    SET priority = $2,
                        attributes = $3
                    WHERE key = $1
                    "#,
                )
                .bind(key)
                .bind(edge.priority)
                .bind(Value::Object(edge.attributes.clone()))
                .execute(&mut *tx)
                .await
                .map_err(|err| db_err("Failed to update edge", err))?;
                key
            }
            None => {
                let inserted: (Uuid,) = sqlx::query_as(
                    r#"
                    INSERT INTO membership.edges (
                        from_collection,
                        from_key,
                        to_collection,
                        to_key,
                        kind,
                        role,
                        year,
                        label,
                        priority,
                        attributes
                    )
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                    RETURNING key
                    "#,
                )
                .bind(edge.from.collection.as_db_value())
                .bind(edge.from.key)
                .bind(edge.to.collection.as_db_value())
                .bind(edge.to.key)
                .bind(edge.relation.kind())
                .bind(edge.relation.role())
                .bind(edge.relation.year())
                .bind(edge.relation.label())
                .bind(edge.priority)
                .bind(Value::Object(edge.attributes.clone()))
                .fetch_one(&mut *tx)
                .await
                .map_err(|err| db_err("Failed to create edge", err))?;
                inserted.0
            }
        };

        tx.commit()
            .await
            .map_err(|err| db_err("Failed to commit transaction", err))?;

        Ok(EdgeId(key))
    }

    async fn traverse(&self, traversal: &Traversal) -> Result<Vec<TraversalHit>> {
        let (near, far) = match traversal.direction {
            Direction::Outbound => ("from", "to"),
            Direction::Inbound => ("to", "from"),
        };
        let sql = format!(
            r#"
            SELECT {EDGE_COLUMNS}, d.body AS document
            FROM membership.edges e
            JOIN membership.documents d
              ON d.collection = e.{far}_collection
             AND d.key = e.{far}_key
            WHERE e.{near}_collection = $1
              AND e.{near}_key = $2
              AND ($3::text IS NULL OR e.kind = $3)
              AND ($4::text IS NULL OR e.role = $4)
              AND ($5::integer IS NULL OR e.year = $5)
              AND ($6::text IS NULL OR e.label = $6)
            ORDER BY e.created_at ASC, e.key ASC
            "#
        );
        let binds = FilterBinds::from(&traversal.filter);

        let rows = sqlx::query_as::<_, TraversalRow>(&sql)
            .bind(traversal.start.collection.as_db_value())
            .bind(traversal.start.key)
            .bind(binds.kind)
            .bind(binds.role)
            .bind(binds.year)
            .bind(binds.label)
            .fetch_all(&*self.pool)
            .await
            .map_err(|err| db_err("Failed to traverse edges", err))?;

        rows.into_iter()
            .map(|row| -> Result<TraversalHit> {
                let edge = Edge::try_from(row.edge)?;
                let node = match traversal.direction {
                    Direction::Outbound => edge.to,
                    Direction::Inbound => edge.from,
                };
                Ok(TraversalHit {
                    edge,
                    node,
                    document: row.document,
                })
            })
            .collect()
    }

    async fn remove_edge(&self, key: EdgeId) -> Result<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM membership.edges
            WHERE key = $1
            "#,
        )
        .bind(key.0)
        .execute(&*self.pool)
        .await
        .map_err(|err| db_err("Failed to delete edge", err))?;

        Ok(result.rows_affected() > 0)
    }

    async fn remove_edges_touching(&self, node: NodeRef) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM membership.edges
            WHERE (from_collection = $1 AND from_key = $2)
               OR (to_collection = $1 AND to_key = $2)
            "#,
        )
        .bind(node.collection.as_db_value())
        .bind(node.key)
        .execute(&*self.pool)
        .await
        .map_err(|err| db_err("Failed to remove node edges", err))?;

        Ok(result.rows_affected())
    }

    async fn edges_touching(&self, node: NodeRef) -> Result<Vec<Edge>> {
        let sql = format!(
            r#"
            SELECT {EDGE_COLUMNS}
            FROM membership.edges e
            WHERE (e.from_collection = $1 AND e.from_key = $2)
               OR (e.to_collection = $1 AND e.to_key = $2)
            ORDER BY e.created_at ASC, e.key ASC
            "#
        );
        let rows = sqlx::query_as::<_, EdgeRow>(&sql)
            .bind(node.collection.as_db_value())
            .bind(node.key)
            .fetch_all(&*self.pool)
            .await
            .map_err(|err| db_err("Failed to query node edges", err))?;

        rows.into_iter().map(Edge::try_from).collect()
    }
}
