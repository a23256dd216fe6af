use crate::guards::Guard;
use crate::model::Record;
use crate::traits::{Session, SessionError};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, instrument};

/// What happened to one identifier handed to the pool.
#[derive(Debug)]
pub enum FetchOutcome {
    /// Fetched and admitted by the content guard.
    Fetched(Record),
    /// Fetched but rejected by the content guard.
    Rejected(String),
    Failed(SessionError),
}

/// Receives the outcomes of a [`FetchPool`] run, one at a time.
#[async_trait]
pub trait OutcomeSink: Send {
    /// Error that stops the run.
    type Error: Send;

    async fn deliver(&mut self, outcome: FetchOutcome) -> Result<(), Self::Error>;
}

/// Fetches records concurrently, at most `workers` at a time.
///
/// Outcomes are handed back one at a time on the task driving [`FetchPool::run`],
/// in completion order.
pub struct FetchPool {
    session: Arc<dyn Session>,
    semaphore: Arc<Semaphore>,
    guard: Guard,
    workers: usize,
}

impl FetchPool {
    pub fn new(session: Arc<dyn Session>, workers: usize, guard: Guard) -> Self {
        let workers = workers.max(1);
        Self {
            session,
            semaphore: Arc::new(Semaphore::new(workers)),
            guard,
            workers,
        }
    }

    fn spawn(
        &self,
        tasks: &mut JoinSet<FetchOutcome>,
        identifier: String,
        permit: OwnedSemaphorePermit,
    ) {
        let session = Arc::clone(&self.session);
        let guard = Arc::clone(&self.guard);
        tasks.spawn(async move {
            let _permit = permit;
            match session.get_record(&identifier).await {
                Ok(record) if guard(&record) => FetchOutcome::Fetched(record),
                Ok(record) => FetchOutcome::Rejected(record.header.identifier),
                Err(e) => FetchOutcome::Failed(e),
            }
        });
    }

    /// Fetches every `Ok` identifier from the stream and passes each outcome
    /// to `sink`. `Err` items are outcomes settled upstream and are
    /// delivered as they come. Stops early, abandoning in-flight fetches, if
    /// the sink returns an error.
    #[instrument(skip_all, fields(workers = self.workers))]
    pub async fn run<S, D>(&self, identifiers: S, sink: &mut D) -> Result<(), D::Error>
    where
        S: Stream<Item = Result<String, FetchOutcome>> + Send,
        D: OutcomeSink + ?Sized,
    {
        let mut identifiers = std::pin::pin!(identifiers);
        let mut tasks = JoinSet::new();
        let mut exhausted = false;
        let mut dispatched = 0usize;

        info!("Starting fetch workers");

        loop {
            tokio::select! {
                next = identifiers.next(), if !exhausted && self.semaphore.available_permits() > 0 => {
                    match next {
                        Some(Err(settled)) => sink.deliver(settled).await?,
                        Some(Ok(identifier)) => match Arc::clone(&self.semaphore).acquire_owned().await {
                            Ok(permit) => {
                                dispatched += 1;
                                self.spawn(&mut tasks, identifier, permit);
                            }
                            Err(e) => {
                                let failed = FetchOutcome::Failed(SessionError::Fetch {
                                    identifier,
                                    reason: format!("worker pool closed: {}", e),
                                });
                                sink.deliver(failed).await?
                            }
                        },
                        None => exhausted = true,
                    }
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    let outcome = joined.unwrap_or_else(|e| {
                        FetchOutcome::Failed(SessionError::Transport(format!("fetch task failed: {}", e)))
                    });
                    if let FetchOutcome::Failed(e) = &outcome {
                        debug!(error = %e, "Fetch failed");
                    }
                    sink.deliver(outcome).await?;
                }
                else => break,
            }
        }

        info!(dispatched, "Fetch workers drained");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guards;
    use crate::model::{ListArgs, RecordHeader};
    use crate::traits::{HeaderStream, RecordStream};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Serves `rec-N` for any identifier, sleeping longer for lower N.
    struct SlowSession {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl SlowSession {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Session for SlowSession {
        fn list_records<'a>(&'a self, _: &'a ListArgs) -> RecordStream<'a> {
            futures::stream::empty().boxed()
        }

        fn list_headers<'a>(&'a self, _: &'a ListArgs) -> HeaderStream<'a> {
            futures::stream::empty::<Result<RecordHeader, SessionError>>().boxed()
        }

        async fn get_record(&self, identifier: &str) -> Result<Record, SessionError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            let n: u64 = identifier.trim_start_matches("rec-").parse().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(40 - n * 5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if identifier == "rec-3" {
                return Err(SessionError::Fetch {
                    identifier: identifier.to_string(),
                    reason: "gone".to_string(),
                });
            }
            Ok(Record::new(identifier, format!("<r>{}</r>", identifier)))
        }
    }

    /// Records outcomes as text; refuses everything once `fail` is set.
    #[derive(Default)]
    struct Collect {
        seen: Vec<String>,
        fail: bool,
    }

    #[async_trait]
    impl OutcomeSink for Collect {
        type Error = &'static str;

        async fn deliver(&mut self, outcome: FetchOutcome) -> Result<(), Self::Error> {
            self.seen.push(match outcome {
                FetchOutcome::Fetched(r) => format!("fetched {}", r.identifier()),
                FetchOutcome::Rejected(id) => format!("rejected {}", id),
                FetchOutcome::Failed(_) => "failed".to_string(),
            });
            if self.fail {
                return Err("disk full");
            }
            Ok(())
        }
    }

    impl Collect {
        fn count(&self, prefix: &str) -> usize {
            self.seen.iter().filter(|s| s.starts_with(prefix)).count()
        }
    }

    fn ids(n: usize) -> impl Stream<Item = Result<String, FetchOutcome>> + Send {
        futures::stream::iter((0..n).map(|i| Ok(format!("rec-{}", i))))
    }

    #[tokio::test]
    async fn test_pool_bounds_concurrency_and_reports_every_outcome() {
        let session = SlowSession::new();
        let pool = FetchPool::new(session.clone(), 2, guards::accept_all());

        let mut sink = Collect::default();
        pool.run(ids(6), &mut sink).await.unwrap();

        let mut fetched: Vec<&String> = sink.seen.iter().filter(|s| s.starts_with("fetched")).collect();
        fetched.sort();
        assert_eq!(
            fetched,
            vec!["fetched rec-0", "fetched rec-1", "fetched rec-2", "fetched rec-4", "fetched rec-5"]
        );
        assert_eq!(sink.count("failed"), 1);
        assert!(session.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_pool_applies_guard() {
        let odd_only: Guard = Arc::new(|r: &Record| r.identifier().ends_with('1'));
        let pool = FetchPool::new(SlowSession::new(), 4, odd_only);

        let mut sink = Collect::default();
        pool.run(ids(3), &mut sink).await.unwrap();

        assert_eq!(sink.seen.len(), 3);
        assert_eq!(sink.count("rejected"), 2);
    }

    #[tokio::test]
    async fn test_pool_stops_when_delivery_fails() {
        let pool = FetchPool::new(SlowSession::new(), 1, guards::accept_all());

        let mut sink = Collect {
            fail: true,
            ..Default::default()
        };
        let result = pool.run(ids(5), &mut sink).await;

        assert_eq!(result, Err("disk full"));
        assert_eq!(sink.seen.len(), 1);
    }

    #[tokio::test]
    async fn test_settled_items_pass_straight_through() {
        let pool = FetchPool::new(SlowSession::new(), 2, guards::accept_all());
        let input = futures::stream::iter(vec![
            Err(FetchOutcome::Rejected("skipped-early".to_string())),
            Ok("rec-1".to_string()),
        ]);

        let mut sink = Collect::default();
        pool.run(input, &mut sink).await.unwrap();

        assert_eq!(sink.seen, vec!["rejected skipped-early", "fetched rec-1"]);
    }

    #[tokio::test]
    async fn test_zero_workers_still_makes_progress() {
        let pool = FetchPool::new(SlowSession::new(), 0, guards::accept_all());
        let mut sink = Collect::default();
        pool.run(ids(2), &mut sink).await.unwrap();
        assert_eq!(sink.seen.len(), 2);
    }
}
