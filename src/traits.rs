use crate::model::{ListArgs, Record, RecordHeader};
use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Failed to fetch {identifier}: {reason}")]
    Fetch { identifier: String, reason: String },
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Malformed record at line {line}: {reason}")]
    Malformed { line: usize, reason: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type RecordStream<'a> = BoxStream<'a, Result<Record, SessionError>>;
pub type HeaderStream<'a> = BoxStream<'a, Result<RecordHeader, SessionError>>;

/// Connection to a remote repository.
///
/// Listing failures surface as `Err` items; the stream keeps going after them.
#[async_trait]
pub trait Session: Send + Sync {
    /// Streams full records matching the listing arguments, in provider order.
    fn list_records<'a>(&'a self, args: &'a ListArgs) -> RecordStream<'a>;

    /// Streams headers matching the listing arguments, in provider order.
    fn list_headers<'a>(&'a self, args: &'a ListArgs) -> HeaderStream<'a>;

    /// Fetches a single record by identifier.
    async fn get_record(&self, identifier: &str) -> Result<Record, SessionError>;
}
