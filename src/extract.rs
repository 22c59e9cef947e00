// ABOUTME: Best-effort paged extraction of remote collections
// ABOUTME: A failed request contributes zero items and is surfaced as partial data

use serde_json::Value;

use crate::context::RunContext;
use crate::entity::{EntitySpec, Source};
use crate::remote::RemoteSource;

/// The raw records gathered for one entity, plus how many requests failed.
///
/// `failed_requests > 0` means the collection may be incomplete. Callers surface
/// this in run telemetry so operators can tell partial data from a legitimately
/// empty collection.
#[derive(Debug, Default)]
pub struct Extraction {
    pub records: Vec<Value>,
    pub failed_requests: usize,
}

impl Extraction {
    pub fn is_partial(&self) -> bool {
        self.failed_requests > 0
    }
}

pub struct Extractor<'a, R> {
    source: &'a R,
    max_pages: u32,
}

impl<'a, R: RemoteSource> Extractor<'a, R> {
    pub fn new(source: &'a R, ctx: &RunContext) -> Self {
        Self {
            source,
            max_pages: ctx.max_pages,
        }
    }

    /// Fetch an entity's raw collection according to its source declaration.
    /// Embedded entities have no fetch of their own and yield nothing here.
    pub async fn extract(&self, spec: &EntitySpec, parents: &[i64]) -> Extraction {
        match spec.source {
            Source::Paged { path } => self.paged(path).await,
            Source::PerParent { template } => self.per_parent(template, parents).await,
            Source::Embedded => Extraction::default(),
        }
    }

    /// Fetch a paged collection from page 0 until the remote returns an empty
    /// page, bounded by the configured page cap.
    ///
    /// A page that fails is logged, counted, and skipped; the loop keeps going
    /// so one bad page cannot lose the rest of the collection. Only an empty
    /// page or the cap ends the loop, which means consecutive failures near the
    /// cap can still truncate silently beyond what `failed_requests` reports.
    pub async fn paged(&self, path: &str) -> Extraction {
        let mut extraction = Extraction::default();

        for start in 0..self.max_pages {
            match self.source.fetch_page(path, start).await {
                Ok(items) if items.is_empty() => return extraction,
                Ok(mut items) => extraction.records.append(&mut items),
                Err(error) => {
                    tracing::warn!("Page {start} of {path} failed, continuing without it: {error:#}");
                    extraction.failed_requests += 1;
                }
            }
        }

        tracing::warn!(
            "Stopped fetching {path} at the {}-page cap without seeing an empty page",
            self.max_pages
        );
        extraction
    }

    /// Fetch the child collection of every parent identifier, tagging each
    /// returned record with its parent under the reserved `parentId` field so
    /// field mappings can address it like any other source path.
    pub async fn per_parent(&self, template: &str, parents: &[i64]) -> Extraction {
        let mut extraction = Extraction::default();

        for &parent in parents {
            let path = template.replace("{parent}", &parent.to_string());
            match self.source.fetch_children(&path).await {
                Ok(items) => {
                    for mut item in items {
                        if let Some(object) = item.as_object_mut() {
                            object.insert("parentId".to_string(), Value::from(parent));
                        }
                        extraction.records.push(item);
                    }
                }
                Err(error) => {
                    tracing::warn!(
                        "Child fetch {path} failed, continuing without it: {error:#}"
                    );
                    extraction.failed_requests += 1;
                }
            }
        }

        extraction
    }
}
