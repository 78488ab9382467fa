//! Postgres implementation of the processing register.
//!
//! Uses the sqlx runtime query API throughout; rows decode into the typed
//! structs in [`crate::models`] at this boundary and nowhere else.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::error::{Result, RobotError};
use crate::models::{CurrentStep, EventMatch, Node, ProcessingActivity};

use super::register::{OutstandingFilter, ProcessingRegister};

const DEFAULT_LOOKBACK_SECS: f64 = 24.0 * 60.0 * 60.0;

/// Trigger-capable nodes with their watched event types. Action nodes with
/// no associated event type are filtered out so they never join against
/// semaphores.
const EVENT_NODES_SUBQUERY: &str = "SELECT n.id AS node_id, \
            n.type AS node_type, \
            net.event_type_id AS event_type_id, \
            n.event_trigger AS event_trigger \
     FROM nodes AS n \
     LEFT JOIN nodes_event_types AS net ON net.node_id = n.id \
     WHERE CASE WHEN n.type = 'action' AND net.event_type_id IS NULL \
           THEN false ELSE true END";

/// Schema for the tables this register reads and writes. Applied by
/// integration environments and the daemon's `--init-schema` path.
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS event_types (
    id bigserial PRIMARY KEY,
    name varchar NOT NULL
);

CREATE TABLE IF NOT EXISTS orders (
    id bigserial PRIMARY KEY,
    name varchar NOT NULL
);

CREATE TABLE IF NOT EXISTS lots (
    id bigserial PRIMARY KEY,
    name varchar NOT NULL,
    order_id bigint REFERENCES orders (id) ON DELETE CASCADE,
    thread int NOT NULL DEFAULT 1,
    weight int NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS events (
    id bigserial PRIMARY KEY,
    name varchar NOT NULL,
    event_type_id bigint REFERENCES event_types (id) ON DELETE CASCADE,
    lot_id bigint REFERENCES lots (id) ON DELETE CASCADE,
    created_at timestamp WITH TIME ZONE DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS nodes (
    id bigserial PRIMARY KEY,
    name varchar NOT NULL,
    type varchar NOT NULL,
    action varchar,
    waiting_time int NOT NULL DEFAULT 0,
    event_trigger bigint
);

-- The current step register: at most one live row per lot.
CREATE TABLE IF NOT EXISTS lots_nodes (
    id bigserial PRIMARY KEY,
    lot_id bigint REFERENCES lots (id) ON UPDATE CASCADE ON DELETE CASCADE,
    node_id bigint REFERENCES nodes (id) ON UPDATE CASCADE,
    thread int NOT NULL DEFAULT 1,
    entry_time timestamp WITH TIME ZONE DEFAULT CURRENT_TIMESTAMP,
    CONSTRAINT lots_nodes_lot_key UNIQUE (lot_id)
);

CREATE TABLE IF NOT EXISTS nodes_event_types (
    id bigserial,
    node_id bigint REFERENCES nodes (id) ON UPDATE CASCADE ON DELETE CASCADE,
    event_type_id bigint REFERENCES event_types (id) ON UPDATE CASCADE,
    CONSTRAINT nodes_event_types_pkey PRIMARY KEY (node_id, event_type_id)
);

CREATE TABLE IF NOT EXISTS event_semaphores (
    id bigserial,
    lot_id bigint REFERENCES lots (id) ON UPDATE CASCADE ON DELETE CASCADE,
    semaphore_id bigint REFERENCES event_types (id) ON UPDATE CASCADE,
    event_id bigint REFERENCES events (id),
    CONSTRAINT event_semaphores_pkey PRIMARY KEY (lot_id, semaphore_id)
);

-- Manager leases: the unique constraint on order_id is the lock.
CREATE TABLE IF NOT EXISTS processing_activities (
    thread_key uuid NOT NULL,
    thread_id int NOT NULL DEFAULT 0,
    order_id bigint NOT NULL UNIQUE,
    group_id int NOT NULL DEFAULT 0,
    start_time timestamp WITH TIME ZONE DEFAULT CURRENT_TIMESTAMP
);
"#;

/// Pool-holding register over the Postgres schema above.
#[derive(Debug, Clone)]
pub struct PgProcessingRegister {
    pool: PgPool,
}

impl PgProcessingRegister {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The full workflow graph, in graph order. Used to validate action
    /// names against the registry before the scheduler starts.
    pub async fn list_nodes(&self) -> Result<Vec<Node>> {
        let nodes = sqlx::query_as::<_, Node>(
            "SELECT id AS node_id, name, type, action, waiting_time, event_trigger \
             FROM nodes ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(nodes)
    }

    /// Apply the engine schema. Idempotent.
    pub async fn init_schema(&self) -> Result<()> {
        for statement in SCHEMA_SQL.split(';') {
            let statement = statement.trim();
            if statement.is_empty() {
                continue;
            }
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

#[async_trait]
impl ProcessingRegister for PgProcessingRegister {
    #[instrument(skip(self))]
    async fn list_outstanding(&self, filter: &OutstandingFilter) -> Result<Vec<CurrentStep>> {
        let lookback_secs = filter
            .lookback
            .map(|d| d.as_secs_f64())
            .unwrap_or(DEFAULT_LOOKBACK_SECS);

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "SELECT ln.id AS proc_id, \
                    l.id AS lot_id, \
                    l.order_id AS order_id, \
                    n.id AS node_id, \
                    ln.thread AS thread, \
                    l.weight AS weight, \
                    n.name AS name, \
                    n.type AS type, \
                    n.action AS action, \
                    n.waiting_time AS waiting_time, \
                    ln.entry_time AS entry_time \
             FROM lots_nodes AS ln \
             INNER JOIN lots AS l ON ln.lot_id = l.id \
             INNER JOIN nodes AS n ON ln.node_id = n.id \
             WHERE (n.type <> 'wait' \
                    OR ln.entry_time + make_interval(secs => n.waiting_time) <= now() \
                    OR EXISTS (SELECT 1 FROM event_semaphores AS es \
                               INNER JOIN events AS e ON es.event_id = e.id \
                               WHERE es.lot_id = l.id \
                                 AND e.created_at >= now() - make_interval(secs => ",
        );
        builder.push_bind(lookback_secs);
        builder.push(")))");

        if let Some((group_id, group_count)) = filter.group {
            builder.push(" AND l.order_id % ");
            builder.push_bind(i64::from(group_count));
            builder.push(" = ");
            builder.push_bind(i64::from(group_id));
        }

        builder.push(" ORDER BY l.weight DESC, l.id ASC");

        if let Some(limit) = filter.limit {
            builder.push(" LIMIT ");
            builder.push_bind(limit);
        }

        let steps = builder
            .build_query_as::<CurrentStep>()
            .fetch_all(&self.pool)
            .await?;

        debug!(count = steps.len(), "listed outstanding lots");
        Ok(steps)
    }

    #[instrument(skip(self, candidates))]
    async fn find_event_matches(&self, candidates: Option<&[i64]>) -> Result<Vec<EventMatch>> {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "SELECT ln.id AS proc_id, \
                    e.lot_id AS lot_id, \
                    e.event_type_id AS event_type_id, \
                    ne.node_id AS node_id, \
                    ln.node_id AS prev_node_id \
             FROM event_semaphores AS es \
             LEFT JOIN events AS e ON es.event_id = e.id \
             INNER JOIN lots_nodes AS ln ON e.lot_id = ln.lot_id \
             INNER JOIN ({EVENT_NODES_SUBQUERY}) AS nodes \
                     ON e.event_type_id = nodes.event_type_id \
                    AND ln.node_id = nodes.node_id \
             INNER JOIN ({EVENT_NODES_SUBQUERY}) AS ne \
                     ON e.event_type_id = ne.event_trigger \
                    AND nodes.node_id <= ne.node_id \
             WHERE e.lot_id IS NOT NULL"
        ));

        if let Some(lot_ids) = candidates {
            builder.push(" AND e.lot_id = ANY(");
            builder.push_bind(lot_ids.to_vec());
            builder.push(")");
        }

        let matches = builder
            .build_query_as::<EventMatch>()
            .fetch_all(&self.pool)
            .await?;

        Ok(matches)
    }

    async fn find_next_node(&self, after_node_id: i64) -> Result<Option<i64>> {
        let row = sqlx::query("SELECT id FROM nodes WHERE id > $1 ORDER BY id ASC LIMIT 1")
            .bind(after_node_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| r.get::<i64, _>("id")))
    }

    #[instrument(skip(self))]
    async fn advance_step(&self, lot_id: i64, proc_id: Option<i64>, node_id: i64) -> Result<i64> {
        let row = match proc_id {
            Some(proc_id) => {
                sqlx::query(
                    "UPDATE lots_nodes SET node_id = $2, entry_time = now() \
                     WHERE id = $1 RETURNING id",
                )
                .bind(proc_id)
                .bind(node_id)
                .fetch_one(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "INSERT INTO lots_nodes (lot_id, node_id, entry_time) \
                     VALUES ($1, $2, now()) RETURNING id",
                )
                .bind(lot_id)
                .bind(node_id)
                .fetch_one(&self.pool)
                .await?
            }
        };

        Ok(row.get::<i64, _>("id"))
    }

    async fn delete_step(&self, proc_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM lots_nodes WHERE id = $1")
            .bind(proc_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    #[instrument(skip(self, order_ids), fields(orders = order_ids.len()))]
    async fn claim_batch(&self, order_ids: &[i64], group_id: i32, thread_key: Uuid) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for &order_id in order_ids {
            let inserted = sqlx::query(
                "INSERT INTO processing_activities \
                     (thread_key, order_id, group_id, start_time) \
                 VALUES ($1, $2, $3, now())",
            )
            .bind(thread_key)
            .bind(order_id)
            .bind(group_id)
            .execute(&mut *tx)
            .await;

            if let Err(err) = inserted {
                tx.rollback().await.ok();
                if is_unique_violation(&err) {
                    return Err(RobotError::ClaimConflict { order_id });
                }
                return Err(err.into());
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn release_batch(&self, thread_key: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM processing_activities WHERE thread_key = $1")
            .bind(thread_key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn active_leases(&self) -> Result<Vec<ProcessingActivity>> {
        let leases = sqlx::query_as::<_, ProcessingActivity>(
            "SELECT thread_key, thread_id, order_id, group_id, start_time \
             FROM processing_activities",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(leases)
    }

    async fn reap_expired_leases(&self, ttl: Duration) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM processing_activities \
             WHERE start_time < now() - make_interval(secs => $1)",
        )
        .bind(ttl.as_secs_f64())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
