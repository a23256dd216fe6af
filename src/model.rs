use chrono::NaiveDate;
use serde::Deserialize;

/// Lightweight listing metadata for a record.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RecordHeader {
    /// Repository-unique record identifier, e.g. `oai:repo:123`.
    pub identifier: String,
    /// Last modification, `YYYY-MM-DD` optionally followed by a time.
    #[serde(default)]
    pub datestamp: String,
    /// Sets the record belongs to.
    #[serde(default)]
    pub sets: Vec<String>,
    /// Tombstone flag: the record was withdrawn and has no content.
    #[serde(default)]
    pub deleted: bool,
}

impl RecordHeader {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            datestamp: String::new(),
            sets: Vec::new(),
            deleted: false,
        }
    }

    /// The day part of the datestamp, if it has one.
    pub fn date(&self) -> Option<NaiveDate> {
        let day = self.datestamp.get(..10)?;
        NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
    }
}

/// A harvested record: its header plus the serialized payload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Record {
    #[serde(flatten)]
    pub header: RecordHeader,
    /// Raw record document, usually XML.
    pub content: String,
}

impl Record {
    pub fn new(identifier: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            header: RecordHeader::new(identifier),
            content: content.into(),
        }
    }

    pub fn identifier(&self) -> &str {
        &self.header.identifier
    }
}

/// Listing arguments handed to the session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListArgs {
    /// Empty means no set restriction.
    pub set: String,
    /// Earliest datestamp, inclusive.
    pub from: Option<NaiveDate>,
    /// Latest datestamp, inclusive.
    pub until: Option<NaiveDate>,
}

impl ListArgs {
    /// Whether a header falls inside the set and date bounds.
    pub fn matches(&self, header: &RecordHeader) -> bool {
        if !self.set.is_empty() && !header.sets.iter().any(|s| s == &self.set) {
            return false;
        }
        if self.from.is_none() && self.until.is_none() {
            return true;
        }
        match header.date() {
            Some(date) => {
                self.from.map_or(true, |from| date >= from)
                    && self.until.map_or(true, |until| date <= until)
            }
            None => false,
        }
    }
}

/// Offset and cap applied to a listing or identifier stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HarvestWindow {
    /// Number of leading items to skip.
    pub first_result: usize,
    /// Maximum number of items to process after the skip.
    pub max_results: usize,
}

impl Default for HarvestWindow {
    fn default() -> Self {
        Self {
            first_result: 0,
            max_results: 100_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(datestamp: &str, sets: &[&str]) -> RecordHeader {
        RecordHeader {
            identifier: "oai:test:1".to_string(),
            datestamp: datestamp.to_string(),
            sets: sets.iter().map(|s| s.to_string()).collect(),
            deleted: false,
        }
    }

    #[test]
    fn test_header_date_accepts_full_timestamps() {
        let h = header("2021-03-04T10:11:12Z", &[]);
        assert_eq!(h.date(), NaiveDate::from_ymd_opt(2021, 3, 4));
        assert_eq!(header("", &[]).date(), None);
    }

    #[test]
    fn test_list_args_set_and_dates() {
        let args = ListArgs {
            set: "books".to_string(),
            from: NaiveDate::from_ymd_opt(2020, 1, 1),
            until: NaiveDate::from_ymd_opt(2020, 12, 31),
        };
        assert!(args.matches(&header("2020-06-01", &["books", "maps"])));
        assert!(!args.matches(&header("2020-06-01", &["maps"])));
        assert!(!args.matches(&header("2021-01-01", &["books"])));
        assert!(!args.matches(&header("", &["books"])));
        assert!(ListArgs::default().matches(&header("", &[])));
    }

    #[test]
    fn test_record_json_layout() {
        let json = r#"{"identifier":"oai:x:1","sets":["a"],"content":"<r/>"}"#;
        let record: Record = serde_json::from_str(json).unwrap();
        assert_eq!(record.identifier(), "oai:x:1");
        assert_eq!(record.header.sets, vec!["a".to_string()]);
        assert!(!record.header.deleted);
        assert_eq!(record.content, "<r/>");
    }
}
