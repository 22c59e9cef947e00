// ABOUTME: Store access layer: trait seam, apply statistics, scoped sessions
// ABOUTME: One short-lived session per logical batch; no connection outlives its entity

mod applier;

pub use applier::PgStore;

use std::collections::HashSet;

use anyhow::{Context, Result};
use tokio_postgres::{Client, NoTls};

use crate::entity::EntitySpec;
use crate::reconcile::SyncPlan;

/// Row counts actually applied for one entity's batch.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApplyStats {
    pub updated: u64,
    pub inserted: u64,
    pub deleted: u64,
}

/// The persistence operations the pipeline needs, per entity.
///
/// `apply` is all-or-nothing: either the whole plan commits or none of it is
/// durably visible. Implementations other than PostgreSQL exist only in tests.
#[allow(async_fn_in_trait)]
pub trait SyncStore {
    /// Read every primary key currently persisted for the entity.
    async fn read_keys(&self, spec: &EntitySpec) -> Result<HashSet<i64>>;

    /// Apply a full sync plan in one atomic unit of work.
    async fn apply(&self, spec: &EntitySpec, plan: SyncPlan) -> Result<ApplyStats>;
}

/// A store session scoped to one logical batch.
///
/// The connection driver runs on a background task and winds down when the
/// client is dropped at the end of the batch, so two entity batches never
/// share a connection or a transaction.
pub(crate) struct StoreSession {
    pub(crate) client: Client,
}

impl StoreSession {
    pub(crate) async fn connect(url: &str) -> Result<Self> {
        let (client, connection) = tokio_postgres::connect(url, NoTls)
            .await
            .context("Failed to connect to the store")?;

        tokio::spawn(async move {
            if let Err(error) = connection.await {
                tracing::error!("Store connection error: {error}");
            }
        });

        Ok(Self { client })
    }
}
