use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::{TryStreamExt, stream};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::table::{already_exists, conflict, not_found};
use crate::{
    Entity, EntityStream, Properties, QueueMessage, QueueStore, Result, StorageError, TableStore,
    VersionToken,
};

/// Rows fetched per round trip while scanning.
const SCAN_PAGE_SIZE: i64 = 200;

const SCAN_PAGE_SQL: &str = r#"
    SELECT partition_key, row_key, properties, etag, timestamp
    FROM entities
    WHERE table_name = $1
      AND ($2::TEXT IS NULL OR partition_key = $2)
      AND ($3::TEXT IS NULL OR (partition_key, row_key) > ($3, $4))
    ORDER BY partition_key ASC, row_key ASC
    LIMIT $5
"#;

/// Runs the database migrations for both table and queue storage.
pub async fn run_migrations(pool: &PgPool) -> std::result::Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("../../migrations").run(pool).await
}

/// Maps a write error, turning a missing parent row into `not_provisioned`.
fn map_write_error(e: sqlx::Error, not_provisioned: impl FnOnce() -> StorageError) -> StorageError {
    if let sqlx::Error::Database(ref db_err) = e
        && db_err.is_foreign_key_violation()
    {
        return not_provisioned();
    }
    StorageError::Database(e)
}

#[derive(Debug, Default)]
struct ScanCursor {
    after: Option<(String, String)>,
    done: bool,
}

/// PostgreSQL-backed table store.
///
/// All logical tables share the `entities` relation; the version token is a
/// UUID regenerated on every write and compared in the `UPDATE` predicate.
#[derive(Clone)]
pub struct PostgresTableStore {
    pool: PgPool,
}

impl PostgresTableStore {
    /// Creates a new PostgreSQL table store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        run_migrations(&self.pool).await
    }

    fn row_to_entity(row: PgRow) -> Result<Entity> {
        let properties_json: serde_json::Value = row.try_get("properties")?;
        let properties: Properties = serde_json::from_value(properties_json)?;

        Ok(Entity {
            partition_key: row.try_get("partition_key")?,
            row_key: row.try_get("row_key")?,
            properties,
            version: Some(VersionToken::from(row.try_get::<Uuid, _>("etag")?)),
            timestamp: Some(row.try_get::<DateTime<Utc>, _>("timestamp")?),
        })
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM entity_tables WHERE name = $1)")
                .bind(table)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn ensure_table(&self, table: &str) -> Result<()> {
        if self.table_exists(table).await? {
            Ok(())
        } else {
            Err(StorageError::TableNotFound(table.to_string()))
        }
    }

    fn paged_scan(&self, table: &str, partition_key: Option<&str>) -> EntityStream {
        let pool = self.pool.clone();
        let table = table.to_string();
        let partition_key = partition_key.map(str::to_string);

        let pages = stream::try_unfold(ScanCursor::default(), move |cursor| {
            let pool = pool.clone();
            let table = table.clone();
            let partition_key = partition_key.clone();
            async move {
                if cursor.done {
                    return Ok(None);
                }
                let (after_pk, after_rk) = match cursor.after {
                    Some((pk, rk)) => (Some(pk), Some(rk)),
                    None => (None, None),
                };

                let rows = sqlx::query(SCAN_PAGE_SQL)
                    .bind(&table)
                    .bind(partition_key.as_deref())
                    .bind(after_pk.as_deref())
                    .bind(after_rk.as_deref())
                    .bind(SCAN_PAGE_SIZE)
                    .fetch_all(&pool)
                    .await?;

                let entities = rows
                    .into_iter()
                    .map(Self::row_to_entity)
                    .collect::<Result<Vec<_>>>()?;
                let next = ScanCursor {
                    after: entities
                        .last()
                        .map(|e| (e.partition_key.clone(), e.row_key.clone())),
                    done: (entities.len() as i64) < SCAN_PAGE_SIZE,
                };
                Ok::<_, StorageError>(Some((entities, next)))
            }
        });

        Box::pin(
            pages
                .map_ok(|page| stream::iter(page.into_iter().map(Ok::<Entity, StorageError>)))
                .try_flatten(),
        )
    }
}

#[async_trait]
impl TableStore for PostgresTableStore {
    async fn create_table_if_not_exists(&self, table: &str) -> Result<bool> {
        let result =
            sqlx::query("INSERT INTO entity_tables (name) VALUES ($1) ON CONFLICT DO NOTHING")
                .bind(table)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn get(&self, table: &str, partition_key: &str, row_key: &str) -> Result<Entity> {
        let row: Option<PgRow> = sqlx::query(
            r#"
            SELECT partition_key, row_key, properties, etag, timestamp
            FROM entities
            WHERE table_name = $1 AND partition_key = $2 AND row_key = $3
            "#,
        )
        .bind(table)
        .bind(partition_key)
        .bind(row_key)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Self::row_to_entity(row),
            None => {
                self.ensure_table(table).await?;
                Err(not_found(table, partition_key, row_key))
            }
        }
    }

    async fn insert(&self, table: &str, entity: Entity) -> Result<Entity> {
        let etag = Uuid::new_v4();
        let now = Utc::now();
        let properties = serde_json::to_value(&entity.properties)?;

        let result = sqlx::query(
            r#"
            INSERT INTO entities (table_name, partition_key, row_key, properties, etag, timestamp)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (table_name, partition_key, row_key) DO NOTHING
            "#,
        )
        .bind(table)
        .bind(&entity.partition_key)
        .bind(&entity.row_key)
        .bind(properties)
        .bind(etag)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| map_write_error(e, || StorageError::TableNotFound(table.to_string())))?;

        if result.rows_affected() == 0 {
            return Err(already_exists(table, &entity));
        }

        Ok(Entity {
            version: Some(VersionToken::from(etag)),
            timestamp: Some(now),
            ..entity
        })
    }

    async fn put(&self, table: &str, entity: Entity) -> Result<Entity> {
        let etag = Uuid::new_v4();
        let now = Utc::now();
        let properties = serde_json::to_value(&entity.properties)?;

        sqlx::query(
            r#"
            INSERT INTO entities (table_name, partition_key, row_key, properties, etag, timestamp)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (table_name, partition_key, row_key) DO UPDATE SET
                properties = EXCLUDED.properties,
                etag = EXCLUDED.etag,
                timestamp = EXCLUDED.timestamp
            "#,
        )
        .bind(table)
        .bind(&entity.partition_key)
        .bind(&entity.row_key)
        .bind(properties)
        .bind(etag)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| map_write_error(e, || StorageError::TableNotFound(table.to_string())))?;

        Ok(Entity {
            version: Some(VersionToken::from(etag)),
            timestamp: Some(now),
            ..entity
        })
    }

    async fn replace_if_version(
        &self,
        table: &str,
        entity: Entity,
        expected: &VersionToken,
    ) -> Result<Entity> {
        let etag = Uuid::new_v4();
        let now = Utc::now();
        let properties = serde_json::to_value(&entity.properties)?;
        // A token that isn't a UUID can never match a stored etag.
        let expected_etag = Uuid::parse_str(expected.as_str()).ok();

        let result = sqlx::query(
            r#"
            UPDATE entities
            SET properties = $4, etag = $5, timestamp = $6
            WHERE table_name = $1 AND partition_key = $2 AND row_key = $3 AND etag = $7
            "#,
        )
        .bind(table)
        .bind(&entity.partition_key)
        .bind(&entity.row_key)
        .bind(properties)
        .bind(etag)
        .bind(now)
        .bind(expected_etag)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let actual: Option<Uuid> = sqlx::query_scalar(
                "SELECT etag FROM entities WHERE table_name = $1 AND partition_key = $2 AND row_key = $3",
            )
            .bind(table)
            .bind(&entity.partition_key)
            .bind(&entity.row_key)
            .fetch_optional(&self.pool)
            .await?;

            return match actual {
                Some(actual) => Err(conflict(
                    table,
                    &entity,
                    expected,
                    Some(VersionToken::from(actual)),
                )),
                None => {
                    self.ensure_table(table).await?;
                    Err(not_found(table, &entity.partition_key, &entity.row_key))
                }
            };
        }

        Ok(Entity {
            version: Some(VersionToken::from(etag)),
            timestamp: Some(now),
            ..entity
        })
    }

    async fn delete(&self, table: &str, partition_key: &str, row_key: &str) -> Result<()> {
        let result = sqlx::query(
            "DELETE FROM entities WHERE table_name = $1 AND partition_key = $2 AND row_key = $3",
        )
        .bind(table)
        .bind(partition_key)
        .bind(row_key)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            self.ensure_table(table).await?;
            return Err(not_found(table, partition_key, row_key));
        }
        Ok(())
    }

    async fn delete_partition(&self, table: &str, partition_key: &str) -> Result<usize> {
        let result =
            sqlx::query("DELETE FROM entities WHERE table_name = $1 AND partition_key = $2")
                .bind(table)
                .bind(partition_key)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            self.ensure_table(table).await?;
        }
        Ok(result.rows_affected() as usize)
    }

    async fn scan(&self, table: &str) -> Result<EntityStream> {
        self.ensure_table(table).await?;
        Ok(self.paged_scan(table, None))
    }

    async fn scan_partition(&self, table: &str, partition_key: &str) -> Result<EntityStream> {
        self.ensure_table(table).await?;
        Ok(self.paged_scan(table, Some(partition_key)))
    }
}

/// PostgreSQL-backed queue store.
///
/// Receiving pushes the message's `visible_at` into the future with
/// `FOR UPDATE SKIP LOCKED`, then deletes it. If the delete fails the lease
/// simply expires and another consumer gets the message.
#[derive(Clone)]
pub struct PostgresQueueStore {
    pool: PgPool,
    visibility_timeout_secs: f64,
}

impl PostgresQueueStore {
    /// Creates a new PostgreSQL queue store with a 30 second lease.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            visibility_timeout_secs: 30.0,
        }
    }

    /// Sets how long a received message stays hidden if its delete fails.
    pub fn with_visibility_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.visibility_timeout_secs = timeout.as_secs_f64();
        self
    }

    async fn queue_exists(&self, queue: &str) -> Result<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM queues WHERE name = $1)")
                .bind(queue)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }
}

#[async_trait]
impl QueueStore for PostgresQueueStore {
    async fn create_queue_if_not_exists(&self, queue: &str) -> Result<bool> {
        let result = sqlx::query("INSERT INTO queues (name) VALUES ($1) ON CONFLICT DO NOTHING")
            .bind(queue)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn send(&self, queue: &str, body: String) -> Result<()> {
        sqlx::query("INSERT INTO queue_messages (id, queue_name, body) VALUES ($1, $2, $3)")
            .bind(Uuid::new_v4())
            .bind(queue)
            .bind(body)
            .execute(&self.pool)
            .await
            .map_err(|e| map_write_error(e, || StorageError::QueueNotFound(queue.to_string())))?;
        Ok(())
    }

    async fn receive_one(&self, queue: &str) -> Result<Option<QueueMessage>> {
        let row: Option<PgRow> = sqlx::query(
            r#"
            UPDATE queue_messages
            SET dequeue_count = dequeue_count + 1,
                visible_at = NOW() + make_interval(secs => $2)
            WHERE id = (
                SELECT id FROM queue_messages
                WHERE queue_name = $1 AND visible_at <= NOW()
                ORDER BY inserted_at ASC, id ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, body, dequeue_count, inserted_at
            "#,
        )
        .bind(queue)
        .bind(self.visibility_timeout_secs)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            if !self.queue_exists(queue).await? {
                return Err(StorageError::QueueNotFound(queue.to_string()));
            }
            return Ok(None);
        };

        let dequeue_count: i32 = row.try_get("dequeue_count")?;
        let message = QueueMessage {
            id: row.try_get("id")?,
            body: row.try_get("body")?,
            dequeue_count: u32::try_from(dequeue_count).unwrap_or(0),
            inserted_at: row.try_get("inserted_at")?,
        };

        if let Err(e) = sqlx::query("DELETE FROM queue_messages WHERE id = $1")
            .bind(message.id)
            .execute(&self.pool)
            .await
        {
            tracing::warn!(
                queue,
                message_id = %message.id,
                error = %e,
                "failed to delete received message; it will be redelivered"
            );
        }

        Ok(Some(message))
    }
}
