//! Predicates deciding which records make it to the output.
//!
//! Guards must be pure: the pooled harvesters call them from several tasks
//! at once.

use std::sync::Arc;

use tracing::debug;

use crate::expr::RecordSearch;
use crate::model::{Record, RecordHeader};

pub type Guard = Arc<dyn Fn(&Record) -> bool + Send + Sync>;
pub type HeaderGuard = Arc<dyn Fn(&RecordHeader) -> bool + Send + Sync>;

pub fn accept_all() -> Guard {
    Arc::new(|_: &Record| true)
}

/// Rejects records the provider reports as deleted.
pub fn live_records() -> Guard {
    Arc::new(|record: &Record| !record.header.deleted)
}

/// Rejects headers of deleted records, before they are fetched.
pub fn live_record_headers() -> HeaderGuard {
    Arc::new(|header: &RecordHeader| !header.deleted)
}

/// Admits records for which the search evaluates to true. An evaluation
/// failure rejects the record.
pub fn matching(search: RecordSearch) -> Guard {
    Arc::new(move |record: &Record| match search.search(record) {
        Ok((matched, _)) => matched,
        Err(e) => {
            debug!(identifier = record.identifier(), error = %e, "Match expression failed, rejecting");
            false
        }
    })
}

/// Admits a record only if every guard admits it.
pub fn all_of(guards: Vec<Guard>) -> Guard {
    Arc::new(move |record: &Record| guards.iter().all(|guard| guard(record)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deleted(identifier: &str) -> Record {
        let mut record = Record::new(identifier, "");
        record.header.deleted = true;
        record
    }

    #[test]
    fn test_live_records() {
        assert!(live_records()(&Record::new("a", "")));
        assert!(!live_records()(&deleted("a")));
        assert!(!live_record_headers()(&deleted("a").header));
        assert!(accept_all()(&deleted("a")));
    }

    #[test]
    fn test_matching_rejects_on_error() {
        let guard = matching(RecordSearch::parse(r#"xp("//t")"#).unwrap());
        assert!(guard(&Record::new("a", "<r><t>yes</t></r>")));
        assert!(!guard(&Record::new("a", "<r><t></t></r>")));
        assert!(!guard(&Record::new("a", "<r>")));
    }

    #[test]
    fn test_all_of() {
        let guard = all_of(vec![
            live_records(),
            matching(RecordSearch::parse(r#"startsWith(urn, "oai:")"#).unwrap()),
        ]);
        assert!(guard(&Record::new("oai:1", "")));
        assert!(!guard(&Record::new("x:1", "")));
        assert!(!guard(&deleted("oai:1")));
    }
}
