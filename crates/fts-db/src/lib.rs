use anyhow::{Context, Result};
use async_trait::async_trait;
use fts_reconcile::{AggregateStore, StoreError};
use fts_schemas::{TransferAggregate, TransferEvent, VersionToken};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::debug;
use uuid::Uuid;

pub use sqlx::PgPool;

pub const ENV_DB_URL: &str = "FTS_DATABASE_URL";

const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// Connect to Postgres using FTS_DATABASE_URL.
pub async fn connect_from_env() -> Result<PgPool> {
    let url = std::env::var(ENV_DB_URL)
        .with_context(|| format!("missing env var {ENV_DB_URL}"))?;
    connect(&url, DEFAULT_MAX_CONNECTIONS).await
}

pub async fn connect(url: &str, max_connections: u32) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections.max(1))
        .connect(url)
        .await
        .context("failed to connect to Postgres")?;
    Ok(pool)
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_aggregates_table: bool,
}

/// Connectivity + schema presence.
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;

    let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema='public' and table_name='transfer_aggregates'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus {
        ok: one == 1,
        has_aggregates_table: exists,
    })
}

/// Number of stored aggregates. 0 when the schema has not been migrated yet.
pub async fn count_aggregates(pool: &PgPool) -> Result<i64> {
    let st = status(pool).await?;
    if !st.has_aggregates_table {
        return Ok(0);
    }

    let (n,): (i64,) =
        sqlx::query_as::<_, (i64,)>("select count(*)::bigint from transfer_aggregates")
            .fetch_one(pool)
            .await
            .context("count_aggregates failed")?;
    Ok(n)
}

/// The aggregate for a transfer id, whichever principal owns it.
pub async fn find_aggregate_by_transfer_id(
    pool: &PgPool,
    transfer_id: Uuid,
) -> Result<Option<TransferAggregate>> {
    let row = sqlx::query(
        r#"
        select partition_key, id, transfer_id, origination_time, events, version
        from transfer_aggregates
        where transfer_id = $1
        "#,
    )
    .bind(transfer_id)
    .fetch_optional(pool)
    .await
    .context("find_aggregate_by_transfer_id failed")?;

    Ok(row.as_ref().map(aggregate_from_row).transpose()?)
}

// ---------------------------------------------------------------------------
// AggregateStore
// ---------------------------------------------------------------------------

/// Postgres-backed [`AggregateStore`].
///
/// The `version` column is the concurrency token. `create` relies on the
/// unique index on `id`, so a transfer id is taken in every partition at
/// once; `replace` is a compare-and-swap on `version`.
#[derive(Debug, Clone)]
pub struct PgAggregateStore {
    pool: PgPool,
}

impl PgAggregateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn backend(op: &str, e: impl std::fmt::Display) -> StoreError {
    StoreError::backend(format!("{op} failed: {e}"))
}

/// Postgres unique_violation (23505).
fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some("23505"),
        _ => false,
    }
}

fn events_to_json(aggregate: &TransferAggregate) -> Result<serde_json::Value, StoreError> {
    serde_json::to_value(&aggregate.events).map_err(|e| backend("encode events", e))
}

fn aggregate_from_row(row: &PgRow) -> Result<TransferAggregate, StoreError> {
    let events_json: serde_json::Value =
        row.try_get("events").map_err(|e| backend("decode row", e))?;
    let events: Vec<TransferEvent> =
        serde_json::from_value(events_json).map_err(|e| backend("decode events", e))?;
    let version: i64 = row.try_get("version").map_err(|e| backend("decode row", e))?;

    Ok(TransferAggregate {
        id: row.try_get("id").map_err(|e| backend("decode row", e))?,
        transfer_id: row
            .try_get("transfer_id")
            .map_err(|e| backend("decode row", e))?,
        originating_principal: row
            .try_get("partition_key")
            .map_err(|e| backend("decode row", e))?,
        origination_time: row
            .try_get("origination_time")
            .map_err(|e| backend("decode row", e))?,
        events,
        version_token: Some(VersionToken::new(version.to_string())),
    })
}

#[async_trait]
impl AggregateStore for PgAggregateStore {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn lookup(
        &self,
        partition_key: &str,
        id: &str,
    ) -> Result<Option<TransferAggregate>, StoreError> {
        let row = sqlx::query(
            r#"
            select partition_key, id, transfer_id, origination_time, events, version
            from transfer_aggregates
            where partition_key = $1 and id = $2
            "#,
        )
        .bind(partition_key)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| backend("lookup", e))?;

        row.as_ref().map(aggregate_from_row).transpose()
    }

    async fn lookup_by_id(&self, id: &str) -> Result<Option<TransferAggregate>, StoreError> {
        let row = sqlx::query(
            r#"
            select partition_key, id, transfer_id, origination_time, events, version
            from transfer_aggregates
            where id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| backend("lookup_by_id", e))?;

        row.as_ref().map(aggregate_from_row).transpose()
    }

    async fn create(&self, aggregate: &TransferAggregate) -> Result<VersionToken, StoreError> {
        let (partition_key, id) = aggregate.key();
        let events = events_to_json(aggregate)?;

        let res = sqlx::query_as::<_, (i64,)>(
            r#"
            insert into transfer_aggregates (
              partition_key, id, transfer_id, origination_time, events, version
            ) values (
              $1, $2, $3, $4, $5, 1
            )
            on conflict do nothing
            returning version
            "#,
        )
        .bind(partition_key)
        .bind(id)
        .bind(aggregate.transfer_id)
        .bind(aggregate.origination_time)
        .bind(&events)
        .fetch_optional(&self.pool)
        .await;

        match res {
            Ok(Some((version,))) => Ok(VersionToken::new(version.to_string())),
            // No row back: the id was already taken, possibly by another principal.
            Ok(None) => Err(StoreError::already_exists(partition_key, id)),
            Err(e) if is_unique_violation(&e) => Err(StoreError::already_exists(partition_key, id)),
            Err(e) => Err(backend("create", e)),
        }
    }

    async fn replace(
        &self,
        aggregate: &TransferAggregate,
        expected: &VersionToken,
    ) -> Result<VersionToken, StoreError> {
        let (partition_key, id) = aggregate.key();

        // Tokens this store never issued cannot match any row.
        let Ok(expected_version) = expected.as_str().parse::<i64>() else {
            debug!(token = %expected, "foreign version token");
            return Err(StoreError::version_mismatch(partition_key, id));
        };
        let events = events_to_json(aggregate)?;

        let row = sqlx::query_as::<_, (i64,)>(
            r#"
            update transfer_aggregates
            set events = $3,
                version = version + 1,
                updated_at_utc = now()
            where partition_key = $1
              and id = $2
              and version = $4
            returning version
            "#,
        )
        .bind(partition_key)
        .bind(id)
        .bind(&events)
        .bind(expected_version)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| backend("replace", e))?;

        match row {
            Some((version,)) => Ok(VersionToken::new(version.to_string())),
            // Either the version moved on or the row is gone; both are stale snapshots.
            None => Err(StoreError::version_mismatch(partition_key, id)),
        }
    }
}
