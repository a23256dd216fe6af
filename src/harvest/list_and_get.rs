use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use tracing::instrument;

use super::{fetch_into, windowed, HarvestError, HarvestObserver, HarvestSummary, Harvester};
use crate::executor::{FetchOutcome, FetchPool};
use crate::guards::{Guard, HeaderGuard};
use crate::model::{HarvestWindow, ListArgs};
use crate::traits::Session;

/// Lists headers, drops the ones the header guard rejects, and fetches the
/// rest concurrently.
pub struct ListAndGetRecordHarvester {
    /// Source of headers and records.
    pub session: Arc<dyn Session>,
    /// Set and date bounds passed to the header listing.
    pub list_args: ListArgs,
    /// Offset and cap over the listed headers.
    pub window: HarvestWindow,
    /// Maximum concurrent fetches.
    pub workers: usize,
    /// Applied to headers before any fetch.
    pub header_guard: HeaderGuard,
    /// Applied to each fetched record.
    pub guard: Guard,
}

#[async_trait]
impl Harvester for ListAndGetRecordHarvester {
    #[instrument(skip_all, fields(set = %self.list_args.set, workers = self.workers))]
    async fn harvest(
        &self,
        observer: &mut dyn HarvestObserver,
    ) -> Result<HarvestSummary, HarvestError> {
        let pool = FetchPool::new(
            Arc::clone(&self.session),
            self.workers,
            Arc::clone(&self.guard),
        );
        let header_guard = Arc::clone(&self.header_guard);

        let identifiers = windowed(self.session.list_headers(&self.list_args), self.window).map(
            move |item| match item {
                Ok(header) if header_guard(&header) => Ok(header.identifier),
                Ok(header) => Err(FetchOutcome::Rejected(header.identifier)),
                Err(e) => Err(FetchOutcome::Failed(e)),
            },
        );

        fetch_into(&pool, identifiers, observer).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guards;
    use crate::harvest::testing::{records, MemorySession, RecordingObserver};
    use crate::model::Record;

    fn harvester(session: MemorySession, workers: usize) -> ListAndGetRecordHarvester {
        ListAndGetRecordHarvester {
            session: Arc::new(session),
            list_args: ListArgs::default(),
            window: HarvestWindow::default(),
            workers,
            header_guard: guards::live_record_headers(),
            guard: guards::live_records(),
        }
    }

    #[tokio::test]
    async fn test_header_guard_skips_before_fetch() {
        // Deleted records are also unfetchable, so reaching the fetch would show up as an error.
        let mut session = MemorySession::new(records(6, &[2, 5]));
        session.broken = vec!["oai:test:2".to_string(), "oai:test:5".to_string()];
        let h = harvester(session, 3);
        let mut observer = RecordingObserver::default();

        let summary = h.harvest(&mut observer).await.unwrap();

        observer.records.sort();
        assert_eq!(
            observer.records,
            vec!["oai:test:0", "oai:test:1", "oai:test:3", "oai:test:4"]
        );
        assert_eq!(
            summary,
            HarvestSummary {
                harvested: 4,
                skipped: 2,
                errors: 0
            }
        );
    }

    #[tokio::test]
    async fn test_fetch_failures_reported_per_identifier() {
        let mut session = MemorySession::new(records(5, &[]));
        session.broken = vec!["oai:test:1".to_string(), "oai:test:3".to_string()];
        session.listing_errors = vec![0];
        let h = harvester(session, 2);
        let mut observer = RecordingObserver::default();

        let summary = h.harvest(&mut observer).await.unwrap();

        assert_eq!(summary.harvested, 3);
        assert_eq!(summary.errors, 3);
        assert_eq!(observer.errors.len(), 3);
        assert!(observer.errors.iter().any(|e| e.contains("oai:test:1")));
        assert_eq!(observer.completed.len(), 1);
    }

    #[tokio::test]
    async fn test_content_guard_applies_after_fetch() {
        let mut h = harvester(MemorySession::new(records(4, &[])), 2);
        h.guard = Arc::new(|r: &Record| r.content.contains('2'));
        let mut observer = RecordingObserver::default();

        let summary = h.harvest(&mut observer).await.unwrap();

        assert_eq!(observer.records, vec!["oai:test:2"]);
        assert_eq!(summary.skipped, 3);
    }

    #[tokio::test]
    async fn test_delivery_follows_completion_order() {
        let mut session = MemorySession::new(records(4, &[]));
        session.staggered = true;
        let h = harvester(session, 4);
        let mut observer = RecordingObserver::default();

        h.harvest(&mut observer).await.unwrap();

        assert_eq!(observer.records.len(), 4);
        assert_eq!(observer.records[0], "oai:test:3");
    }
}
