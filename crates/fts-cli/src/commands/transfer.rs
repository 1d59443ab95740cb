//! `fts transfer show`.

use anyhow::{bail, Context, Result};
use fts_db::{PgAggregateStore, PgPool};
use fts_reconcile::AggregateStore;
use tracing::debug;
use uuid::Uuid;

/// Print the aggregate for `transfer_id` as pretty JSON.
///
/// With a principal this is a point read in that partition; without one the
/// transfer is found wherever it lives.
pub async fn show(pool: &PgPool, transfer_id: Uuid, principal: Option<&str>) -> Result<()> {
    let found = match principal {
        Some(p) => PgAggregateStore::new(pool.clone())
            .lookup(p, &transfer_id.to_string())
            .await
            .context("transfer lookup failed")?,
        None => fts_db::find_aggregate_by_transfer_id(pool, transfer_id).await?,
    };

    let Some(aggregate) = found else {
        bail!("TRANSFER_NOT_FOUND transfer_id={transfer_id}");
    };
    debug!(
        %transfer_id,
        partition = %aggregate.originating_principal,
        events = aggregate.event_count(),
        "transfer found"
    );
    println!("{}", serde_json::to_string_pretty(&aggregate)?);
    Ok(())
}
