//! The harvest command: picks a harvester from the configuration and
//! writes what it produces into rotating output directories.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::config::{ConfigError, HarvestConfig, PreparedHarvest};
use crate::expr::Expr;
use crate::guards::{self, Guard};
use crate::harvest::{
    FileHarvester, HarvestError, HarvestObserver, HarvestSummary, Harvester,
    ListAndGetRecordHarvester, ListRecordHarvester,
};
use crate::model::{ListArgs, Record};
use crate::output::{
    escape_id_for_filename, spawn_compression, write_record_blocking, DirectoryPartitioner,
    OutputError, EMPTY_BASENAME,
};
use crate::traits::{Session, SessionError};

/// Name of the run directory for a run started now.
pub fn run_timestamp() -> String {
    chrono::Local::now().format("%Y%m%dT%H%M%S").to_string()
}

pub struct HarvestCommand {
    config: HarvestConfig,
    session: Arc<dyn Session>,
    list_args: ListArgs,
    filename_filter: Option<Expr>,
    guard: Guard,
    partitioner: DirectoryPartitioner,
}

impl HarvestCommand {
    /// Validates the configuration and fixes the run directory under
    /// `output_dir`, named after the current time.
    pub fn new(config: HarvestConfig, session: Arc<dyn Session>) -> Result<Self, ConfigError> {
        let root = config.output_dir.join(run_timestamp());
        Self::with_run_root(config, session, root)
    }

    pub fn with_run_root(
        config: HarvestConfig,
        session: Arc<dyn Session>,
        root: PathBuf,
    ) -> Result<Self, ConfigError> {
        let PreparedHarvest {
            list_args,
            filename_filter,
            guard,
        } = config.prepare()?;
        Ok(Self {
            list_args,
            filename_filter,
            guard,
            partitioner: DirectoryPartitioner::new(root, config.max_dir_size),
            config,
            session,
        })
    }

    pub fn run_root(&self) -> &Path {
        self.partitioner.root()
    }

    /// Builds the harvester the configuration asks for.
    pub fn harvester(&self) -> Box<dyn Harvester> {
        let session = Arc::clone(&self.session);
        let window = self.config.window();
        let guard = Arc::clone(&self.guard);

        if let Some(path) = &self.config.from_file {
            Box::new(FileHarvester {
                session,
                path: path.clone(),
                window,
                workers: self.config.workers,
                guard,
            })
        } else if self.config.list_and_get {
            Box::new(ListAndGetRecordHarvester {
                session,
                list_args: self.list_args.clone(),
                window,
                workers: self.config.workers,
                header_guard: guards::live_record_headers(),
                guard,
            })
        } else {
            Box::new(ListRecordHarvester {
                session,
                list_args: self.list_args.clone(),
                window,
                guard,
            })
        }
    }

    /// Harvests everything, then closes the last directory.
    #[instrument(skip_all, fields(root = %self.run_root().display()))]
    pub async fn run(&mut self) -> Result<HarvestSummary, HarvestError> {
        let harvester = self.harvester();
        let summary = harvester.harvest(self).await?;
        self.close_dir(self.partitioner.current_dir_id());
        Ok(summary)
    }

    /// File base name for a record: the filename filter's result when it
    /// yields something truthy, otherwise the identifier.
    fn file_base_name(&self, record: &Record) -> String {
        let identifier = record.identifier();
        let name = match &self.filename_filter {
            None => identifier.to_string(),
            Some(filter) => match filter.evaluate(record) {
                Ok(value) if value.as_bool() => value.to_string(),
                Ok(_) => {
                    warn!(identifier, "Filename filter returned false, using the identifier");
                    identifier.to_string()
                }
                Err(e) => {
                    warn!(identifier, error = %e, "Error in filename filter, using the identifier");
                    identifier.to_string()
                }
            },
        };

        let escaped = escape_id_for_filename(&name);
        if escaped.is_empty() {
            warn!("Using file basename '{}' for record with an empty name", EMPTY_BASENAME);
            EMPTY_BASENAME.to_string()
        } else {
            escaped
        }
    }

    fn close_dir(&self, dir_id: usize) {
        if self.config.dry_run || !self.config.compress {
            return;
        }
        let dir = self.partitioner.dir_path(dir_id);
        if !dir.is_dir() {
            debug!(dir = %dir.display(), "Nothing to compress");
            return;
        }
        trace!("Compressing {} -> {}.zip", dir.display(), dir.display());
        // Detached: the run never waits for archiving.
        drop(spawn_compression(dir));
    }

    async fn save_record(&mut self, record: Record) -> Result<(), OutputError> {
        let placement = self.partitioner.admit();
        if let Some(closed) = placement.closed {
            self.close_dir(closed);
        }

        debug!("{:8}  {}", placement.count, record.identifier());
        if placement.count % 1000 == 0 {
            info!("Harvested {} records", placement.count);
        }

        if !self.config.dry_run {
            let dir = self.partitioner.dir_path(placement.dir_id);
            let base = self.file_base_name(&record);
            write_record_blocking(dir, base, record.content).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl HarvestObserver for HarvestCommand {
    async fn on_record(&mut self, record: Record) -> Result<(), OutputError> {
        self.save_record(record).await
    }

    fn on_error(&mut self, error: SessionError) {
        error!("{}", error);
    }

    fn on_completed(&mut self, summary: &HarvestSummary) {
        info!(
            "Finished: {} records harvested, {} records skipped, {} errors",
            summary.harvested, summary.skipped, summary.errors
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harvest::testing::{records, MemorySession};
    use std::collections::BTreeMap;
    use std::fs;
    use std::time::Duration;

    fn command(config: HarvestConfig, session: MemorySession, root: &Path) -> HarvestCommand {
        HarvestCommand::with_run_root(config, Arc::new(session), root.to_path_buf()).unwrap()
    }

    /// Every file under `root`, keyed by its path relative to `root`.
    fn snapshot(root: &Path) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        if !root.exists() {
            return out;
        }
        for dir in fs::read_dir(root).unwrap() {
            let dir = dir.unwrap().path();
            for file in fs::read_dir(&dir).unwrap() {
                let file = file.unwrap().path();
                let key = file.strip_prefix(root).unwrap().to_string_lossy().into_owned();
                out.insert(key, fs::read_to_string(&file).unwrap());
            }
        }
        out
    }

    #[tokio::test]
    async fn test_records_land_in_rotating_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let config = HarvestConfig {
            max_dir_size: 2,
            ..Default::default()
        };
        let mut cmd = command(config, MemorySession::new(records(4, &[])), tmp.path());

        let summary = cmd.run().await.unwrap();

        assert_eq!(summary.harvested, 4);
        let files: Vec<String> = snapshot(tmp.path()).into_keys().collect();
        assert_eq!(
            files,
            vec![
                "01/oai%3Atest%3A0.xml",
                "02/oai%3Atest%3A1.xml",
                "02/oai%3Atest%3A2.xml",
                "03/oai%3Atest%3A3.xml",
            ]
        );
    }

    #[tokio::test]
    async fn test_guarded_records_are_skipped_not_written() {
        let tmp = tempfile::tempdir().unwrap();
        let config = HarvestConfig {
            max_dir_size: 2,
            ..Default::default()
        };
        let mut cmd = command(config, MemorySession::new(records(3, &[0])), tmp.path());

        let summary = cmd.run().await.unwrap();

        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.harvested, 2);
        assert_eq!(cmd.partitioner.record_count(), 2);
        let files: Vec<String> = snapshot(tmp.path()).into_keys().collect();
        assert_eq!(files, vec!["01/oai%3Atest%3A1.xml", "02/oai%3Atest%3A2.xml"]);
    }

    #[tokio::test]
    async fn test_filename_filter_and_fallbacks() {
        let tmp = tempfile::tempdir().unwrap();
        let mut session = MemorySession::new(Vec::new());
        session.records = vec![
            Record::new("oai:a:1", "<r><name>first</name></r>"),
            Record::new("oai:a:2", "<r><other/></r>"),
            Record::new("oai:a:3", "<r><a></r>"),
        ];
        let config = HarvestConfig {
            filename_filter: Some(r#"xp("//name")"#.to_string()),
            ..Default::default()
        };
        let mut cmd = command(config, session, tmp.path());

        let summary = cmd.run().await.unwrap();

        assert_eq!(summary.harvested, 3);
        let files: Vec<String> = snapshot(tmp.path()).into_keys().collect();
        assert_eq!(
            files,
            vec!["01/first.xml", "01/oai%3Aa%3A2.xml", "01/oai%3Aa%3A3.xml"]
        );
    }

    #[tokio::test]
    async fn test_colliding_names_overwrite() {
        let tmp = tempfile::tempdir().unwrap();
        let config = HarvestConfig {
            filename_filter: Some(r#""same""#.to_string()),
            ..Default::default()
        };
        let mut cmd = command(config, MemorySession::new(records(3, &[])), tmp.path());

        cmd.run().await.unwrap();

        let files = snapshot(tmp.path());
        assert_eq!(files.len(), 1);
        assert_eq!(files["01/same.xml"], "<r>2</r>");
    }

    #[tokio::test]
    async fn test_empty_name_uses_sentinel() {
        let tmp = tempfile::tempdir().unwrap();
        let session = MemorySession::new(vec![Record::new("", "<empty/>")]);
        let mut cmd = command(HarvestConfig::default(), session, tmp.path());

        cmd.run().await.unwrap();

        assert!(snapshot(tmp.path()).contains_key("01/__empty__.xml"));
    }

    #[tokio::test]
    async fn test_dry_run_writes_nothing_but_counts() {
        let tmp = tempfile::tempdir().unwrap();
        let config = HarvestConfig {
            dry_run: true,
            compress: true,
            max_dir_size: 1,
            ..Default::default()
        };
        let mut cmd = command(config, MemorySession::new(records(3, &[])), tmp.path());

        let summary = cmd.run().await.unwrap();

        assert_eq!(summary.harvested, 3);
        assert_eq!(cmd.partitioner.record_count(), 3);
        assert!(fs::read_dir(tmp.path()).unwrap().next().is_none());
    }

    #[tokio::test]
    async fn test_pool_size_does_not_change_output() {
        let mut outputs = Vec::new();
        for workers in [1, 5] {
            let tmp = tempfile::tempdir().unwrap();
            let mut session = MemorySession::new(records(12, &[3, 7]));
            session.staggered = true;
            let config = HarvestConfig {
                list_and_get: true,
                workers,
                max_dir_size: 100,
                ..Default::default()
            };
            let mut cmd = command(config, session, tmp.path());
            let summary = cmd.run().await.unwrap();
            assert_eq!(summary.harvested, 10);
            outputs.push(snapshot(tmp.path()));
        }
        assert_eq!(outputs[0].len(), 10);
        assert_eq!(outputs[0], outputs[1]);
    }

    #[tokio::test]
    async fn test_full_directories_are_compressed() {
        let tmp = tempfile::tempdir().unwrap();
        let config = HarvestConfig {
            compress: true,
            max_dir_size: 3,
            ..Default::default()
        };
        let mut cmd = command(config, MemorySession::new(records(4, &[])), tmp.path());

        cmd.run().await.unwrap();

        // Archiving is detached, so wait for it to show up.
        let mut archived = false;
        for _ in 0..100 {
            let done = tmp.path().join("01.zip").exists() && tmp.path().join("02.zip").exists();
            if done && !tmp.path().join("01").exists() && !tmp.path().join("02").exists() {
                archived = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(archived);
    }

    #[tokio::test]
    async fn test_from_file_variant_is_selected() {
        let tmp = tempfile::tempdir().unwrap();
        let ids = tmp.path().join("ids.txt");
        fs::write(&ids, "oai:test:1\n").unwrap();
        let out = tmp.path().join("out");
        let config = HarvestConfig {
            from_file: Some(ids),
            list_and_get: true,
            ..Default::default()
        };
        let mut cmd = command(config, MemorySession::new(records(3, &[])), &out);

        let summary = cmd.run().await.unwrap();

        assert_eq!(summary.harvested, 1);
        assert!(snapshot(&out).contains_key("01/oai%3Atest%3A1.xml"));
    }

    #[test]
    fn test_invalid_filter_fails_before_harvest() {
        let config = HarvestConfig {
            filename_filter: Some("foo()".to_string()),
            ..Default::default()
        };
        let result = HarvestCommand::with_run_root(
            config,
            Arc::new(MemorySession::new(Vec::new())),
            PathBuf::from("/unused"),
        );
        assert!(matches!(result, Err(ConfigError::Filter(_))));
    }

    #[test]
    fn test_run_timestamp_shape() {
        let stamp = run_timestamp();
        assert_eq!(stamp.len(), 15);
        assert_eq!(&stamp[8..9], "T");
    }
}
