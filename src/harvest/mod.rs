//! Harvest module - strategies that pull records from a session and hand
//! them to an observer.
//!
//! - [`ListRecordHarvester`] streams full records from a single listing
//! - [`ListAndGetRecordHarvester`] lists headers, then fetches records through a [`FetchPool`]
//! - [`FileHarvester`] reads identifiers from a file, then fetches them the same way
//!
//! Every variant calls the observer from the task running [`Harvester::harvest`]
//! only, one callback at a time.

pub mod from_file;
pub mod list;
pub mod list_and_get;

pub use from_file::FileHarvester;
pub use list::ListRecordHarvester;
pub use list_and_get::ListAndGetRecordHarvester;

use std::path::PathBuf;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use thiserror::Error;
use tracing::info;

use crate::config::ConfigError;
use crate::executor::{FetchOutcome, FetchPool, OutcomeSink};
use crate::model::{HarvestWindow, Record};
use crate::output::OutputError;
use crate::traits::SessionError;

// ============================================================================
// Summary and Errors
// ============================================================================

/// Totals reported when a harvest completes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HarvestSummary {
    /// Records handed to [`HarvestObserver::on_record`].
    pub harvested: usize,
    /// Records rejected by a header or content guard.
    pub skipped: usize,
    /// Listing and fetch failures passed to [`HarvestObserver::on_error`].
    pub errors: usize,
}

/// Errors that end a harvest.
#[derive(Error, Debug)]
pub enum HarvestError {
    #[error(transparent)]
    Output(#[from] OutputError),

    #[error("Cannot read identifier file {path}: {source}")]
    IdentifierFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

// ============================================================================
// Harvest Contracts
// ============================================================================

/// Receives the results of a harvest.
#[async_trait]
pub trait HarvestObserver: Send {
    /// Called once per record admitted by every guard. An error aborts the harvest.
    async fn on_record(&mut self, record: Record) -> Result<(), OutputError>;

    fn on_error(&mut self, error: SessionError);

    /// Called once, after all work has drained.
    fn on_completed(&mut self, summary: &HarvestSummary);
}

#[async_trait]
pub trait Harvester: Send + Sync {
    /// Runs the harvest to completion, returning the totals also passed to
    /// [`HarvestObserver::on_completed`].
    async fn harvest(
        &self,
        observer: &mut dyn HarvestObserver,
    ) -> Result<HarvestSummary, HarvestError>;
}

// ============================================================================
// Delivery
// ============================================================================

/// Counts outcomes on their way to the observer.
pub(crate) struct Delivery<'o> {
    observer: &'o mut dyn HarvestObserver,
    summary: HarvestSummary,
}

impl<'o> Delivery<'o> {
    pub(crate) fn new(observer: &'o mut dyn HarvestObserver) -> Self {
        Self {
            observer,
            summary: HarvestSummary::default(),
        }
    }

    pub(crate) async fn record(&mut self, record: Record) -> Result<(), OutputError> {
        self.summary.harvested += 1;
        self.observer.on_record(record).await
    }

    pub(crate) fn skip(&mut self) {
        self.summary.skipped += 1;
    }

    pub(crate) fn error(&mut self, error: SessionError) {
        self.summary.errors += 1;
        self.observer.on_error(error);
    }

    pub(crate) fn finish(mut self) -> HarvestSummary {
        info!(
            harvested = self.summary.harvested,
            skipped = self.summary.skipped,
            errors = self.summary.errors,
            "Harvest drained"
        );
        self.observer.on_completed(&self.summary);
        self.summary
    }
}

#[async_trait]
impl<'o> OutcomeSink for Delivery<'o> {
    type Error = OutputError;

    async fn deliver(&mut self, outcome: FetchOutcome) -> Result<(), OutputError> {
        match outcome {
            FetchOutcome::Fetched(record) => self.record(record).await?,
            FetchOutcome::Rejected(_) => self.skip(),
            FetchOutcome::Failed(e) => self.error(e),
        }
        Ok(())
    }
}

/// Applies the first-result offset and the result cap.
pub(crate) fn windowed<S: Stream>(
    stream: S,
    window: HarvestWindow,
) -> impl Stream<Item = S::Item> {
    stream.skip(window.first_result).take(window.max_results)
}

/// Drives identifiers through a fetch pool into the observer.
pub(crate) async fn fetch_into<S>(
    pool: &FetchPool,
    identifiers: S,
    observer: &mut dyn HarvestObserver,
) -> Result<HarvestSummary, HarvestError>
where
    S: Stream<Item = Result<String, FetchOutcome>> + Send,
{
    let mut delivery = Delivery::new(observer);
    pool.run(identifiers, &mut delivery).await?;
    Ok(delivery.finish())
}

// ============================================================================
// Test Doubles
// ============================================================================
