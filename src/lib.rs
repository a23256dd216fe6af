//! Metadata record harvesting.
//!
//! Records are listed (or listed then fetched, or fetched by identifier
//! from a file) through a [`Session`], filtered by guards and written as
//! one XML file each under rotating, optionally compressed directories.
//! File names and match conditions are written in a small expression
//! language, see [`expr`].

pub mod command;
pub mod config;
pub mod executor;
pub mod expr;
pub mod guards;
pub mod harvest;
pub mod logging;
pub mod model;
pub mod output;
pub mod provider;
pub mod traits;
pub mod xml;

pub use command::HarvestCommand;
pub use config::{ConfigError, HarvestConfig};
pub use executor::{FetchOutcome, FetchPool, OutcomeSink};
pub use harvest::{HarvestError, HarvestObserver, HarvestSummary, Harvester};
pub use model::*;
pub use provider::JsonLinesSession;
pub use traits::*;
