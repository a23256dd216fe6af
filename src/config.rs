//! Harvest options and their validation.

use std::path::PathBuf;

use chrono::NaiveDate;
use thiserror::Error;

use crate::expr::{self, Expr, ParseError, RecordSearch};
use crate::guards::{self, Guard};
use crate::model::{HarvestWindow, ListArgs};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid date {value:?} (expected YYYY-MM-DD): {source}")]
    InvalidDate {
        value: String,
        source: chrono::ParseError,
    },

    #[error("Maximum directory size must be at least 1")]
    InvalidDirSize,

    #[error("Error in filename filter: {0}")]
    Filter(#[source] ParseError),

    #[error("Error in match expression: {0}")]
    Match(#[source] ParseError),
}

/// Everything a harvest run can be told.
#[derive(Debug, Clone)]
pub struct HarvestConfig {
    /// Empty selects `default_set`; `*` selects every set.
    pub set: String,
    /// The provider's default set.
    pub default_set: String,
    /// Only records updated on or after this date (`YYYY-MM-DD`).
    pub after: String,
    /// Only records updated on or before this date (`YYYY-MM-DD`).
    pub before: String,
    /// Number of listed items to skip.
    pub first_result: usize,
    /// Maximum number of listed items to process.
    pub max_results: usize,
    /// Harvest the identifiers listed in this file instead of listing.
    pub from_file: Option<PathBuf>,
    /// List headers and fetch each record, instead of listing full records.
    pub list_and_get: bool,
    /// Expression naming each output file.
    pub filename_filter: Option<String>,
    /// Expression a record must satisfy to be kept.
    pub match_expr: Option<String>,
    /// Divisor of the directory rotation formula.
    pub max_dir_size: usize,
    /// Zip each directory once it is closed.
    pub compress: bool,
    /// Concurrent fetches for the pooled harvesters.
    pub workers: usize,
    /// Count and log records without writing anything.
    pub dry_run: bool,
    /// Parent of the timestamped run directory.
    pub output_dir: PathBuf,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            set: String::new(),
            default_set: String::new(),
            after: String::new(),
            before: String::new(),
            first_result: 0,
            max_results: 100_000,
            from_file: None,
            list_and_get: false,
            filename_filter: None,
            match_expr: None,
            max_dir_size: 10_000,
            compress: false,
            workers: 4,
            dry_run: false,
            output_dir: PathBuf::from("."),
        }
    }
}

/// The parsed parts of a [`HarvestConfig`].
pub struct PreparedHarvest {
    /// Resolved set and date bounds.
    pub list_args: ListArgs,
    /// Compiled filename expression, if one was given.
    pub filename_filter: Option<Expr>,
    /// Guard applied to every fetched record.
    pub guard: Guard,
}

/// Parses a `YYYY-MM-DD` date; an empty string means no bound.
pub fn parse_date(value: &str) -> Result<Option<NaiveDate>, ConfigError> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map(Some)
        .map_err(|source| ConfigError::InvalidDate {
            value: value.to_string(),
            source,
        })
}

impl HarvestConfig {
    pub fn list_args(&self) -> Result<ListArgs, ConfigError> {
        let set = match self.set.as_str() {
            "" => self.default_set.clone(),
            "*" => String::new(),
            other => other.to_string(),
        };
        Ok(ListArgs {
            set,
            from: parse_date(&self.after)?,
            until: parse_date(&self.before)?,
        })
    }

    pub fn window(&self) -> HarvestWindow {
        HarvestWindow {
            first_result: self.first_result,
            max_results: self.max_results,
        }
    }

    pub fn filename_filter(&self) -> Result<Option<Expr>, ConfigError> {
        match self.filename_filter.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(src) => expr::parse(src).map(Some).map_err(ConfigError::Filter),
        }
    }

    /// Guard applied to fetched records: live records, narrowed by the
    /// match expression when there is one.
    pub fn content_guard(&self) -> Result<Guard, ConfigError> {
        match self.match_expr.as_deref().map(str::trim) {
            None | Some("") => Ok(guards::live_records()),
            Some(src) => {
                let search = RecordSearch::parse(src).map_err(ConfigError::Match)?;
                Ok(guards::all_of(vec![
                    guards::live_records(),
                    guards::matching(search),
                ]))
            }
        }
    }

    /// Checks and parses everything that can be checked before harvesting
    /// starts.
    pub fn prepare(&self) -> Result<PreparedHarvest, ConfigError> {
        if self.max_dir_size == 0 {
            return Err(ConfigError::InvalidDirSize);
        }
        Ok(PreparedHarvest {
            list_args: self.list_args()?,
            filename_filter: self.filename_filter()?,
            guard: self.content_guard()?,
        })
    }
}
