//! `fts reconcile`: replay a captured delivery through the reconciler.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use fts_db::PgAggregateStore;
use fts_reconcile::{
    classify, AggregateStore, Disposition, EventIdentity, EventReconciler, InMemoryStore,
    RetryPolicy,
};
use fts_schemas::{decode_notifications, ClassifiedEvent};
use tracing::debug;

use super::{load_config, read_json_bytes};

/// Classified events keyed by their position in the input file.
#[derive(Debug)]
pub struct Prepared {
    pub events: Vec<(usize, ClassifiedEvent)>,
    pub skipped_handshakes: usize,
}

/// Decode and classify every notification up front.
///
/// Subscription handshakes are skipped. Any other undecodable entry fails
/// the whole batch, so a replay is all-or-nothing with respect to decoding.
pub fn prepare(body: &[u8]) -> Result<Prepared> {
    let batch =
        decode_notifications(body).context("file is not a notification or notification array")?;

    let mut events = Vec::with_capacity(batch.len());
    let mut skipped_handshakes = 0usize;
    let mut errors = Vec::new();

    for (i, n) in batch.iter().enumerate() {
        if n.is_subscription_validation() {
            skipped_handshakes += 1;
            continue;
        }
        match classify(n) {
            Ok(ev) => events.push((i, ev)),
            Err(e) => errors.push((i, e)),
        }
    }

    if !errors.is_empty() {
        for (i, e) in &errors {
            eprintln!("  index={i} {e}");
        }
        bail!(
            "REFUSING RECONCILE: {} undecodable notification(s); nothing was written",
            errors.len()
        );
    }

    Ok(Prepared {
        events,
        skipped_handshakes,
    })
}

pub async fn run(file: &str, config_paths: &[String], dry_run: bool) -> Result<()> {
    let loaded = load_config(config_paths)?;
    let cfg = loaded.service_config()?;

    let body = read_json_bytes(file)?;
    let prepared = prepare(&body)?;
    debug!(
        file,
        events = prepared.events.len(),
        skipped_handshakes = prepared.skipped_handshakes,
        "notifications classified"
    );

    let store: Arc<dyn AggregateStore> = if dry_run {
        Arc::new(InMemoryStore::new())
    } else {
        let secrets = fts_config::resolve_secrets(&cfg);
        let url = secrets.require_database_url()?;
        let pool = fts_db::connect(url, cfg.store.max_connections).await?;
        let st = fts_db::status(&pool).await?;
        if !st.has_aggregates_table {
            bail!("transfer_aggregates table missing; run `fts db migrate` first");
        }
        Arc::new(PgAggregateStore::new(pool))
    };

    let reconciler = EventReconciler::new(store)
        .with_policy(RetryPolicy::from(&cfg.reconciler))
        .with_identity(EventIdentity::from(cfg.reconciler.event_identity));

    println!("config_hash={}", loaded.config_hash);
    println!("store={}", reconciler.store().name());

    let (mut created, mut appended, mut duplicates) = (0usize, 0usize, 0usize);
    for (i, ev) in &prepared.events {
        match reconciler.reconcile(ev).await {
            Ok(out) => {
                match out.disposition {
                    Disposition::Created => created += 1,
                    Disposition::Appended => appended += 1,
                    Disposition::Duplicate => duplicates += 1,
                }
                println!(
                    "event={} transfer_id={} partition={} disposition={} attempts={} event_id={}",
                    i,
                    out.transfer_id,
                    out.partition_key,
                    out.disposition.as_str(),
                    out.attempts,
                    out.event_id
                );
            }
            Err(e) => {
                println!(
                    "reconciled={} created={} appended={} duplicates={}",
                    created + appended + duplicates,
                    created,
                    appended,
                    duplicates
                );
                bail!("RECONCILE_FAILED event={i}: {e}");
            }
        }
    }

    println!(
        "reconciled={} created={} appended={} duplicates={} skipped_handshakes={}",
        created + appended + duplicates,
        created,
        appended,
        duplicates,
        prepared.skipped_handshakes
    );
    Ok(())
}
