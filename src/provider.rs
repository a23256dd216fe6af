//! A [`Session`] backed by a local JSON-lines dump of a repository.
//!
//! Each non-blank line is one record:
//!
//! ```text
//! {"identifier":"oai:repo:1","datestamp":"2021-04-01","sets":["books"],"content":"<record>...</record>"}
//! {"identifier":"oai:repo:2","deleted":true,"content":""}
//! ```

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use futures::StreamExt;
use tracing::info;

use crate::model::{ListArgs, Record};
use crate::traits::{HeaderStream, RecordStream, Session, SessionError};

#[derive(Debug)]
enum Entry {
    Record(Record),
    Malformed { line: usize, reason: String },
}

#[derive(Debug, Default)]
pub struct JsonLinesSession {
    entries: Vec<Entry>,
    index: HashMap<String, usize>,
}

impl JsonLinesSession {
    pub fn from_records(records: impl IntoIterator<Item = Record>) -> Self {
        let mut session = Self::default();
        for record in records {
            session.push(Entry::Record(record));
        }
        session
    }

    /// Parses dump contents. Lines that fail to parse are kept and show up
    /// as errors in listings.
    pub fn parse(contents: &str) -> Self {
        let mut session = Self::default();
        for (n, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let entry = match serde_json::from_str::<Record>(line) {
                Ok(record) => Entry::Record(record),
                Err(e) => Entry::Malformed {
                    line: n + 1,
                    reason: e.to_string(),
                },
            };
            session.push(entry);
        }
        session
    }

    pub async fn open(path: &Path) -> Result<Self, SessionError> {
        let contents = tokio::fs::read_to_string(path).await?;
        let session = Self::parse(&contents);
        info!(path = %path.display(), records = session.index.len(), "Opened record dump");
        Ok(session)
    }

    fn push(&mut self, entry: Entry) {
        if let Entry::Record(record) = &entry {
            self.index
                .insert(record.identifier().to_string(), self.entries.len());
        }
        self.entries.push(entry);
    }

    fn listing<'a>(
        &'a self,
        args: &'a ListArgs,
    ) -> impl Iterator<Item = Result<&'a Record, SessionError>> + Send + 'a {
        self.entries.iter().filter_map(move |entry| match entry {
            Entry::Record(record) if args.matches(&record.header) => Some(Ok(record)),
            Entry::Record(_) => None,
            Entry::Malformed { line, reason } => Some(Err(SessionError::Malformed {
                line: *line,
                reason: reason.clone(),
            })),
        })
    }
}

#[async_trait]
impl Session for JsonLinesSession {
    fn list_records<'a>(&'a self, args: &'a ListArgs) -> RecordStream<'a> {
        futures::stream::iter(self.listing(args).map(|item| item.cloned())).boxed()
    }

    fn list_headers<'a>(&'a self, args: &'a ListArgs) -> HeaderStream<'a> {
        futures::stream::iter(
            self.listing(args)
                .map(|item| item.map(|record| record.header.clone())),
        )
        .boxed()
    }

    async fn get_record(&self, identifier: &str) -> Result<Record, SessionError> {
        match self.index.get(identifier).map(|&i| &self.entries[i]) {
            Some(Entry::Record(record)) => Ok(record.clone()),
            _ => Err(SessionError::Fetch {
                identifier: identifier.to_string(),
                reason: "no such record".to_string(),
            }),
        }
    }
}
