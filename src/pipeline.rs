// ABOUTME: Dependency-ordered orchestration of the entity pipelines
// ABOUTME: Threads parent identifiers into child fetches and aggregates one run outcome

use std::collections::HashSet;

use anyhow::{Context, Result};

use crate::context::RunContext;
use crate::entity::{self, EntitySpec, ExportIds};
use crate::extract::{Extraction, Extractor};
use crate::normalize::{self, NormalizedRow};
use crate::reconcile;
use crate::remote::RemoteSource;
use crate::store::SyncStore;

/// Telemetry for one entity's pass through the pipeline.
#[derive(Debug, Clone, Default)]
pub struct EntityOutcome {
    pub entity: &'static str,
    pub fetched: usize,
    pub failed_requests: usize,
    pub skipped_records: usize,
    pub updated: u64,
    pub inserted: u64,
    pub deleted: u64,
}

/// Aggregated outcome of one complete run.
#[derive(Debug, Default)]
pub struct RunReport {
    pub entities: Vec<EntityOutcome>,
}

impl RunReport {
    pub fn failed_requests(&self) -> usize {
        self.entities.iter().map(|e| e.failed_requests).sum()
    }

    /// True when any request failed, meaning some collection may be incomplete.
    pub fn is_partial(&self) -> bool {
        self.failed_requests() > 0
    }

    pub fn summary(&self) -> String {
        let updated: u64 = self.entities.iter().map(|e| e.updated).sum();
        let inserted: u64 = self.entities.iter().map(|e| e.inserted).sum();
        let deleted: u64 = self.entities.iter().map(|e| e.deleted).sum();
        format!(
            "{} entities, {updated} updated, {inserted} inserted, {deleted} deleted",
            self.entities.len()
        )
    }
}

/// Runs every entity pipeline once, in dependency order.
pub struct Pipeline<'a, R, S> {
    remote: &'a R,
    store: &'a S,
    ctx: &'a RunContext,
}

impl<'a, R: RemoteSource, S: SyncStore> Pipeline<'a, R, S> {
    pub fn new(remote: &'a R, store: &'a S, ctx: &'a RunContext) -> Self {
        Self { remote, store, ctx }
    }

    /// Extract, normalize, reconcile, and apply each entity, feeding parent
    /// identifiers from each normalization into its children's fetches.
    ///
    /// Parent identifiers always come from the same run's output, never from a
    /// stale store snapshot. The first entity-level failure aborts the rest of
    /// the run; entities already applied stay applied.
    pub async fn run(&self) -> Result<RunReport> {
        let extractor = Extractor::new(self.remote, self.ctx);
        let mut report = RunReport::default();

        let extraction = extractor.extract(&entity::PROJECTS, &[]).await;
        let project_ids = self
            .sync_entity(&entity::PROJECTS, &extraction, &mut report)
            .await?;

        let extraction = extractor.extract(&entity::TASKS, &project_ids).await;
        self.sync_entity(&entity::TASKS, &extraction, &mut report)
            .await?;

        let extraction = extractor.extract(&entity::LEADS, &[]).await;
        let lead_ids = self
            .sync_entity(&entity::LEADS, &extraction, &mut report)
            .await?;

        let extraction = extractor.extract(&entity::TIMELINES, &lead_ids).await;
        self.sync_entity(&entity::TIMELINES, &extraction, &mut report)
            .await?;

        let extraction = extractor.extract(&entity::ASSESSMENTS, &[]).await;
        let assessment_ids = self
            .sync_entity(&entity::ASSESSMENTS, &extraction, &mut report)
            .await?;

        let answers = extractor.extract(&entity::ANSWERS, &assessment_ids).await;
        self.sync_entity(&entity::ANSWERS, &answers, &mut report)
            .await?;

        // Attachments ride along inside the answer records fetched above; they
        // are reconciled as their own entity but never fetched on their own.
        let embedded = Extraction {
            records: answers.records,
            failed_requests: 0,
        };
        self.sync_entity(&entity::ATTACHMENTS, &embedded, &mut report)
            .await?;

        Ok(report)
    }

    /// One entity's pass: normalize the raw records, diff against the persisted
    /// keys, apply the plan atomically, and record the outcome. Returns the
    /// identifiers the entity exports to dependent fetches.
    async fn sync_entity(
        &self,
        spec: &EntitySpec,
        extraction: &Extraction,
        report: &mut RunReport,
    ) -> Result<Vec<i64>> {
        tracing::info!(
            entity = spec.name,
            fetched = extraction.records.len(),
            failed_requests = extraction.failed_requests,
            "syncing"
        );

        let normalized = normalize::normalize(&extraction.records, spec);
        let exported = exported_ids(spec, &normalized.rows);

        let persisted = self
            .store
            .read_keys(spec)
            .await
            .with_context(|| format!("Failed to read persisted keys for {}", spec.name))?;

        let plan = reconcile::plan(normalized.rows, &persisted);
        tracing::info!(
            entity = spec.name,
            update = plan.update.len(),
            insert = plan.insert.len(),
            delete = plan.delete.len(),
            "applying sync plan"
        );

        let stats = self
            .store
            .apply(spec, plan)
            .await
            .with_context(|| format!("Failed to apply the {} batch", spec.name))?;

        report.entities.push(EntityOutcome {
            entity: spec.name,
            fetched: extraction.records.len(),
            failed_requests: extraction.failed_requests,
            skipped_records: normalized.skipped_records,
            updated: stats.updated,
            inserted: stats.inserted,
            deleted: stats.deleted,
        });

        Ok(exported)
    }
}

/// The identifiers an entity hands to its children, deduplicated in first-seen
/// order. Exploded rows repeat their parent identifier, so deduplication is not
/// optional.
fn exported_ids(spec: &EntitySpec, rows: &[NormalizedRow]) -> Vec<i64> {
    let ids: Vec<i64> = match &spec.export_ids {
        None => return Vec::new(),
        Some(ExportIds::Keys) => rows.iter().map(|row| row.key).collect(),
        Some(ExportIds::Column(column)) => rows
            .iter()
            .filter_map(|row| row.column(column).and_then(|value| value.as_int()))
            .collect(),
    };

    let mut seen = HashSet::new();
    ids.into_iter().filter(|id| seen.insert(*id)).collect()
}
