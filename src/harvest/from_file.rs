use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, instrument};

use super::{fetch_into, windowed, HarvestError, HarvestObserver, HarvestSummary, Harvester};
use crate::executor::FetchPool;
use crate::guards::Guard;
use crate::model::HarvestWindow;
use crate::traits::Session;

/// Fetches the records named in a line-delimited identifier file.
pub struct FileHarvester {
    /// Source of the records.
    pub session: Arc<dyn Session>,
    /// Line-delimited identifier file.
    pub path: PathBuf,
    /// Offset and cap over the identifiers.
    pub window: HarvestWindow,
    /// Maximum concurrent fetches.
    pub workers: usize,
    /// Applied to each fetched record.
    pub guard: Guard,
}

/// Splits identifier file contents into identifiers, dropping blank lines.
pub fn parse_identifiers(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl Harvester for FileHarvester {
    #[instrument(skip_all, fields(path = %self.path.display(), workers = self.workers))]
    async fn harvest(
        &self,
        observer: &mut dyn HarvestObserver,
    ) -> Result<HarvestSummary, HarvestError> {
        let contents = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| HarvestError::IdentifierFile {
                path: self.path.clone(),
                source,
            })?;
        let identifiers = parse_identifiers(&contents);
        info!(count = identifiers.len(), "Read identifiers");

        let pool = FetchPool::new(
            Arc::clone(&self.session),
            self.workers,
            Arc::clone(&self.guard),
        );
        let identifiers = futures::stream::iter(identifiers.into_iter().map(Ok));
        let identifiers = windowed(identifiers, self.window);

        fetch_into(&pool, identifiers, observer).await
    }
}
