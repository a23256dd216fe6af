use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use thiserror::Error;
use tracing::error;

use record_harvester::config::ConfigError;
use record_harvester::harvest::HarvestError;
use record_harvester::{logging, HarvestCommand, HarvestConfig, JsonLinesSession, SessionError};

/// Harvest metadata records into numbered directories of XML files.
#[derive(Parser, Debug)]
#[command(name = "record-harvest", version, about)]
struct Cli {
    /// JSON-lines record dump to harvest from
    #[arg(long, value_name = "FILE")]
    source: PathBuf,

    /// Set to harvest; empty for the default set, `*` for all sets
    #[arg(short = 's', long, default_value = "")]
    set: String,

    /// Set used when no set is given
    #[arg(long, default_value = "")]
    default_set: String,

    /// Only records updated on or after this date (YYYY-MM-DD)
    #[arg(short = 'A', long, default_value = "")]
    after: String,

    /// Only records updated on or before this date (YYYY-MM-DD)
    #[arg(short = 'B', long, default_value = "")]
    before: String,

    /// Number of listed records to skip
    #[arg(short = 'f', long = "first", default_value_t = 0)]
    first_result: usize,

    /// Maximum number of listed records to process
    #[arg(short = 'c', long = "max", default_value_t = 100_000)]
    max_results: usize,

    /// Harvest the identifiers listed in this file
    #[arg(short = 'F', long, value_name = "FILE")]
    from_file: Option<PathBuf>,

    /// List headers, then fetch each record separately
    #[arg(short = 'L', long)]
    list_and_get: bool,

    /// Expression naming each output file
    #[arg(short = 'N', long = "filename", value_name = "EXPR")]
    filename_filter: Option<String>,

    /// Expression a record must satisfy to be kept
    #[arg(short = 'M', long = "match", value_name = "EXPR")]
    match_expr: Option<String>,

    /// Records per output directory
    #[arg(short = 'D', long = "dir-size", default_value_t = 10_000)]
    max_dir_size: usize,

    /// Zip each output directory once it is full
    #[arg(short = 'C', long)]
    compress: bool,

    /// Concurrent record fetches
    #[arg(short = 'W', long, default_value_t = 4)]
    workers: usize,

    /// Harvest without writing anything
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// Directory the timestamped run directory is created in
    #[arg(short = 'o', long, default_value = ".")]
    output_dir: PathBuf,

    /// More logging; repeat for trace
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn into_parts(self) -> (PathBuf, u8, HarvestConfig) {
        let config = HarvestConfig {
            set: self.set,
            default_set: self.default_set,
            after: self.after,
            before: self.before,
            first_result: self.first_result,
            max_results: self.max_results,
            from_file: self.from_file,
            list_and_get: self.list_and_get,
            filename_filter: self.filename_filter,
            match_expr: self.match_expr,
            max_dir_size: self.max_dir_size,
            compress: self.compress,
            workers: self.workers,
            dry_run: self.dry_run,
            output_dir: self.output_dir,
        };
        (self.source, self.verbose, config)
    }
}

#[derive(Error, Debug)]
enum CliError {
    #[error("Cannot open record source: {0}")]
    Source(#[from] SessionError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Harvest(#[from] HarvestError),
}

async fn run(source: PathBuf, config: HarvestConfig) -> Result<(), CliError> {
    let session = JsonLinesSession::open(&source).await?;
    let mut command = HarvestCommand::new(config, Arc::new(session))?;
    command.run().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let (source, verbose, config) = Cli::parse().into_parts();
    logging::init(verbose);

    match run(source, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
