use crate::batcher::{BatcherConfig, DeleteBatcher, DeleteSink};
use async_trait::async_trait;
use linkvault_core::{
    BatchOutcome, BatchRequest, IdGenerator, LinkRecord, NanoIdGenerator, PendingDelete,
    Repository, RepositoryError, RepositoryStats, Result, ShortId, StoreOutcome, UserLinks,
};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Connection, PgConnection, PgPool};
use std::time::Duration;
use tracing::{debug, trace};

/// Id attempts per url; a collision is retried with a fresh id.
pub const DB_ID_ATTEMPTS: usize = 2;

const SCHEMA: &str = include_str!("../ddl/postgres/short_links.sql");
const SCHEMA_TIMEOUT: Duration = Duration::from_secs(4);

// Inserts the link unless the id or the url is taken, then reports either the
// fresh row (`created`) or the row already holding the url. No row at all
// means the id collided, or a concurrent writer committed the same url after
// this statement's snapshot; both are retried with a new id.
const UPSERT_LINK: &str = r#"
WITH inserted AS (
    INSERT INTO short_links (id, owner, original_url)
    VALUES ($1, $2, $3)
    ON CONFLICT DO NOTHING
    RETURNING id
)
SELECT id, TRUE AS created FROM inserted
UNION ALL
SELECT id, FALSE AS created
FROM short_links
WHERE original_url = $3
  AND NOT EXISTS (SELECT 1 FROM inserted)
"#;

const SELECT_LINK: &str = r#"
SELECT id, owner, original_url, deleted
FROM short_links
WHERE id = $1
"#;

const SELECT_OWNER_LINKS: &str = r#"
SELECT id, original_url
FROM short_links
WHERE owner = $1
"#;

const MARK_DELETED: &str = r#"
UPDATE short_links
SET deleted = TRUE
WHERE owner = $1
  AND id = $2
"#;

const COUNT_LINKS: &str = r#"
SELECT COUNT(*), COUNT(DISTINCT owner)
FROM short_links
"#;

/// PostgreSQL implementation of the repository contract.
///
/// Urls are deduplicated by content through a unique index: storing a known
/// url returns the id it was first stored under, whoever the owner. No
/// in-process lock is held; concurrent writers rely on the database's
/// constraints. `unstore` hands work to a [`DeleteBatcher`] and returns at
/// once. `user_storage` lists tombstoned links too.
#[derive(Debug)]
pub struct PostgresRepository<G = NanoIdGenerator> {
    pool: PgPool,
    generator: G,
    batcher: DeleteBatcher,
}

impl PostgresRepository {
    /// Creates a repository by opening a new connection pool.
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        batcher: BatcherConfig,
    ) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(map_sqlx_error)?;
        Self::with_pool(pool, NanoIdGenerator::new(), batcher).await
    }
}

impl<G: IdGenerator> PostgresRepository<G> {
    /// Creates a repository from an existing pool, bootstrapping the schema
    /// and starting the delete batcher.
    pub async fn with_pool(pool: PgPool, generator: G, batcher: BatcherConfig) -> Result<Self> {
        ensure_schema(&pool).await?;

        let sink = PgDeleteSink { pool: pool.clone() };
        let batcher = DeleteBatcher::spawn(sink, batcher);

        Ok(Self {
            pool,
            generator,
            batcher,
        })
    }

    /// Returns a reference to the underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn fetch_record(&self, id: &ShortId) -> Result<Option<LinkRecord>> {
        let row: Option<(String, String, String, bool)> = sqlx::query_as(SELECT_LINK)
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(row.map(|(id, owner, original_url, deleted)| LinkRecord {
            id: ShortId::new_unchecked(id),
            owner,
            original_url,
            deleted,
        }))
    }
}

async fn ensure_schema(pool: &PgPool) -> Result<()> {
    let bootstrap = async {
        pool.acquire().await?.ping().await?;
        sqlx::raw_sql(SCHEMA).execute(pool).await?;
        Ok::<_, sqlx::Error>(())
    };

    tokio::time::timeout(SCHEMA_TIMEOUT, bootstrap)
        .await
        .map_err(|_| RepositoryError::Timeout("schema bootstrap".to_string()))?
        .map_err(map_sqlx_error)
}

async fn upsert_link<G: IdGenerator + ?Sized>(
    conn: &mut PgConnection,
    generator: &G,
    owner: &str,
    url: &str,
) -> Result<StoreOutcome> {
    for attempt in 1..=DB_ID_ATTEMPTS {
        let candidate = generator.generate();
        let row: Option<(String, bool)> = sqlx::query_as(UPSERT_LINK)
            .bind(candidate.as_str())
            .bind(owner)
            .bind(url)
            .fetch_optional(&mut *conn)
            .await
            .map_err(map_sqlx_error)?;

        match row {
            Some((_, true)) => return Ok(StoreOutcome::Created(candidate)),
            Some((existing, false)) => {
                debug!(id = %existing, "url already shortened");
                return Ok(StoreOutcome::AlreadyShortened(ShortId::new_unchecked(
                    existing,
                )));
            }
            None => trace!(id = %candidate, attempt, "id collided, retrying"),
        }
    }

    Err(RepositoryError::UnableGenerateId {
        attempts: DB_ID_ATTEMPTS,
    })
}

fn map_sqlx_error(err: sqlx::Error) -> RepositoryError {
    let message = err.to_string();

    match err {
        sqlx::Error::PoolTimedOut => RepositoryError::Timeout(message),
        sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_) => RepositoryError::StorageUnavailable(message),
        sqlx::Error::ColumnIndexOutOfBounds { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::TypeNotFound { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::RowNotFound => RepositoryError::InvalidData(message),
        _ => RepositoryError::Query(message),
    }
}

/// Flushes delete batches in one transaction.
struct PgDeleteSink {
    pool: PgPool,
}

#[async_trait]
impl DeleteSink for PgDeleteSink {
    async fn mark_deleted(&self, batch: &[PendingDelete]) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        for pending in batch {
            sqlx::query(MARK_DELETED)
                .bind(&pending.owner)
                .bind(pending.id.as_str())
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
        }

        tx.commit().await.map_err(map_sqlx_error)
    }
}

#[async_trait]
impl<G: IdGenerator> Repository for PostgresRepository<G> {
    async fn store(&self, owner: &str, url: &str) -> Result<StoreOutcome> {
        trace!(owner = %owner, "storing link in postgres");
        let mut conn = self.pool.acquire().await.map_err(map_sqlx_error)?;
        upsert_link(&mut conn, &self.generator, owner, url).await
    }

    async fn restore(&self, id: &ShortId) -> Result<String> {
        trace!(id = %id, "restoring link from postgres");
        match self.fetch_record(id).await? {
            None => Err(RepositoryError::NotFound(id.clone())),
            Some(record) if record.deleted => Err(RepositoryError::Deleted(id.clone())),
            Some(record) => Ok(record.original_url),
        }
    }

    async fn unstore(&self, owner: &str, ids: Vec<ShortId>) -> Result<()> {
        self.batcher.submit(owner, ids)
    }

    async fn user_storage(&self, owner: &str) -> Result<UserLinks> {
        let rows: Vec<(String, String)> = sqlx::query_as(SELECT_OWNER_LINKS)
            .bind(owner)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(rows
            .into_iter()
            .map(|(id, url)| (ShortId::new_unchecked(id), url))
            .collect())
    }

    /// All entries commit together; an infrastructure error rolls back the
    /// whole batch. Content conflicts do not abort the batch, they surface
    /// through [`BatchOutcome::is_already_shortened`].
    async fn store_batch(&self, owner: &str, batch: BatchRequest) -> Result<BatchOutcome> {
        trace!(owner = %owner, size = batch.len(), "storing batch in postgres");
        // dropping the transaction on an early return rolls it back
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let mut outcome = BatchOutcome::default();
        for (correlation_id, url) in batch {
            let stored = upsert_link(&mut tx, &self.generator, owner, &url).await?;
            outcome.record(correlation_id, stored);
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        debug!(
            owner = %owner,
            stored = outcome.ids.len(),
            conflicts = outcome.conflicts.len(),
            "stored batch in postgres"
        );
        Ok(outcome)
    }

    async fn stats(&self) -> Result<RepositoryStats> {
        let (links, owners): (i64, i64) = sqlx::query_as(COUNT_LINKS)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(RepositoryStats {
            links: links.max(0) as u64,
            owners: owners.max(0) as u64,
        })
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| RepositoryError::StorageUnavailable(e.to_string()))?;
        conn.ping()
            .await
            .map_err(|e| RepositoryError::StorageUnavailable(e.to_string()))
    }

    /// Flushes and stops the delete batcher, then closes the pool.
    async fn close(&self) -> Result<()> {
        self.batcher.shutdown().await;
        self.pool.close().await;
        debug!("closed postgres storage");
        Ok(())
    }
}
