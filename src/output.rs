//! Output layout: `<run root>/<NN>/<escaped id>.xml`, with full directories
//! optionally folded into `<run root>/<NN>.zip`.

use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{trace, warn};
use zip::write::SimpleFileOptions;

/// Base name used when a record's name escapes to nothing.
pub const EMPTY_BASENAME: &str = "__empty__";

#[derive(Error, Debug)]
pub enum OutputError {
    #[error("Cannot write {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("Write task failed: {0}")]
    Task(String),
}

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Not an archivable directory: {0}")]
    InvalidDirectory(PathBuf),
    #[error("I/O error while archiving: {0}")]
    Io(#[from] io::Error),
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

/// Makes an identifier safe to use as a file name. Bytes outside
/// `[A-Za-z0-9._-]` become `%XX`, so distinct identifiers stay distinct.
pub fn escape_id_for_filename(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    for byte in id.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'.' | b'_' | b'-' => out.push(byte as char),
            _ => {
                let _ = write!(out, "%{:02X}", byte);
            }
        }
    }
    out
}

/// Where an admitted record lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    /// Running count of admitted records, this one included.
    pub count: usize,
    /// Directory the record is written to.
    pub dir_id: usize,
    /// Directory left behind by this record, if it caused a rotation.
    pub closed: Option<usize>,
}

/// Maps the running record count onto numbered output directories.
///
/// The target directory is `count / max_dir_size + 1`, so the first
/// directory holds `max_dir_size - 1` records and later ones `max_dir_size`.
#[derive(Debug)]
pub struct DirectoryPartitioner {
    root: PathBuf,
    max_dir_size: usize,
    record_count: usize,
    last_dir_id: usize,
}

impl DirectoryPartitioner {
    pub fn new(root: impl Into<PathBuf>, max_dir_size: usize) -> Self {
        Self {
            root: root.into(),
            max_dir_size: max_dir_size.max(1),
            record_count: 0,
            last_dir_id: 1,
        }
    }

    pub fn admit(&mut self) -> Placement {
        self.record_count += 1;
        let dir_id = self.record_count / self.max_dir_size + 1;
        let closed = if dir_id != self.last_dir_id {
            Some(std::mem::replace(&mut self.last_dir_id, dir_id))
        } else {
            None
        };
        Placement {
            count: self.record_count,
            dir_id,
            closed,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn current_dir_id(&self) -> usize {
        self.last_dir_id
    }

    pub fn record_count(&self) -> usize {
        self.record_count
    }

    pub fn dir_path(&self, dir_id: usize) -> PathBuf {
        self.root.join(format!("{:02}", dir_id))
    }
}

/// Writes `<dir>/<base>.xml`, creating the directory and replacing any
/// existing file of that name.
pub fn write_record(dir: &Path, base: &str, content: &str) -> Result<PathBuf, OutputError> {
    fs::create_dir_all(dir).map_err(|source| OutputError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    let path = dir.join(format!("{}.xml", base));
    fs::write(&path, content).map_err(|source| OutputError::Io {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}

/// Runs [`write_record`] on the blocking pool and waits for it.
pub async fn write_record_blocking(
    dir: PathBuf,
    base: String,
    content: String,
) -> Result<PathBuf, OutputError> {
    tokio::task::spawn_blocking(move || write_record(&dir, &base, &content))
        .await
        .map_err(|e| OutputError::Task(format!("Task join error: {}", e)))?
}

/// Folds `dir` into a sibling `<name>.zip` whose entries sit under
/// `<name>/`, then removes `dir`.
pub fn archive_directory(dir: &Path) -> Result<PathBuf, ArchiveError> {
    let base = dir
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| ArchiveError::InvalidDirectory(dir.to_path_buf()))?;
    let archive_path = dir.with_file_name(format!("{}.zip", base));

    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();

    let mut zip = zip::ZipWriter::new(fs::File::create(&archive_path)?);
    let options = SimpleFileOptions::default();
    zip.add_directory(format!("{}/", base), options)?;
    for path in &files {
        let name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
        zip.start_file(format!("{}/{}", base, name), options)?;
        let mut input = fs::File::open(path)?;
        io::copy(&mut input, &mut zip)?;
    }
    zip.finish()?;

    fs::remove_dir_all(dir)?;
    Ok(archive_path)
}

/// Starts archiving `dir` in the background and returns without waiting.
///
/// Returns `None` when no runtime is available to run the job. The outcome
/// of the job is only logged.
pub fn spawn_compression(dir: PathBuf) -> Option<JoinHandle<()>> {
    let handle = match tokio::runtime::Handle::try_current() {
        Ok(handle) => handle,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "Cannot compress");
            return None;
        }
    };

    Some(handle.spawn_blocking(move || match archive_directory(&dir) {
        Ok(archive) => trace!(archive = %archive.display(), "Compressed"),
        Err(e) => warn!(dir = %dir.display(), error = %e, "Cannot compress"),
    }))
}
