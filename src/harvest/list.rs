use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use tracing::{debug, instrument};

use super::{windowed, Delivery, HarvestError, HarvestObserver, HarvestSummary, Harvester};
use crate::guards::Guard;
use crate::model::{HarvestWindow, ListArgs};
use crate::traits::Session;

/// Streams full records from one listing, in provider order.
pub struct ListRecordHarvester {
    /// Source of the listing.
    pub session: Arc<dyn Session>,
    /// Set and date bounds passed to the listing.
    pub list_args: ListArgs,
    /// Offset and cap over the listed records.
    pub window: HarvestWindow,
    /// Content guard; rejected records are counted as skipped.
    pub guard: Guard,
}

#[async_trait]
impl Harvester for ListRecordHarvester {
    #[instrument(skip_all, fields(set = %self.list_args.set))]
    async fn harvest(
        &self,
        observer: &mut dyn HarvestObserver,
    ) -> Result<HarvestSummary, HarvestError> {
        let mut delivery = Delivery::new(observer);
        let mut records = windowed(self.session.list_records(&self.list_args), self.window);

        while let Some(item) = records.next().await {
            match item {
                Ok(record) if (self.guard)(&record) => delivery.record(record).await?,
                Ok(record) => {
                    debug!(identifier = record.identifier(), "Skipped by guard");
                    delivery.skip();
                }
                Err(e) => delivery.error(e),
            }
        }

        Ok(delivery.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guards;
    use crate::harvest::testing::{records, MemorySession, RecordingObserver};

    fn harvester(session: MemorySession, window: HarvestWindow) -> ListRecordHarvester {
        ListRecordHarvester {
            session: Arc::new(session),
            list_args: ListArgs::default(),
            window,
            guard: guards::live_records(),
        }
    }

    #[tokio::test]
    async fn test_list_delivers_in_order_and_skips_deleted() {
        let h = harvester(MemorySession::new(records(5, &[1, 3])), HarvestWindow::default());
        let mut observer = RecordingObserver::default();

        let summary = h.harvest(&mut observer).await.unwrap();

        assert_eq!(observer.records, vec!["oai:test:0", "oai:test:2", "oai:test:4"]);
        assert_eq!(
            summary,
            HarvestSummary {
                harvested: 3,
                skipped: 2,
                errors: 0
            }
        );
        assert_eq!(observer.completed, vec![summary]);
    }

    #[tokio::test]
    async fn test_list_continues_after_errors() {
        let mut session = MemorySession::new(records(3, &[]));
        session.listing_errors = vec![1];
        let h = harvester(session, HarvestWindow::default());
        let mut observer = RecordingObserver::default();

        let summary = h.harvest(&mut observer).await.unwrap();

        assert_eq!(observer.records.len(), 3);
        assert_eq!(observer.errors.len(), 1);
        assert_eq!(summary.errors, 1);
    }

    #[tokio::test]
    async fn test_list_window() {
        let window = HarvestWindow {
            first_result: 2,
            max_results: 2,
        };
        let h = harvester(MemorySession::new(records(10, &[])), window);
        let mut observer = RecordingObserver::default();

        h.harvest(&mut observer).await.unwrap();

        assert_eq!(observer.records, vec!["oai:test:2", "oai:test:3"]);
    }

    #[tokio::test]
    async fn test_list_output_failure_is_fatal() {
        let h = harvester(MemorySession::new(records(4, &[])), HarvestWindow::default());
        let mut observer = RecordingObserver {
            fail_at: Some(2),
            ..Default::default()
        };

        let result = h.harvest(&mut observer).await;

        assert!(matches!(result, Err(HarvestError::Output(_))));
        assert_eq!(observer.records.len(), 2);
        assert!(observer.completed.is_empty());
    }
}
