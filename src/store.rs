//! Storage collaborators
//!
//! The engine never touches durable storage directly. The snapshot crosses the
//! boundary as Parquet bytes through a [`SnapshotStore`]; result tables go out
//! through a [`TableWriter`].

use crate::error::{Result, ScoreError};
use polars::prelude::*;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tracing::info;

pub trait SnapshotStore {
    /// The persisted snapshot, or `None` when there is none yet.
    fn fetch_snapshot(&self) -> Result<Option<Vec<u8>>>;

    /// Replace the persisted snapshot.
    fn persist_snapshot(&self, bytes: &[u8]) -> Result<()>;
}

pub trait TableWriter {
    /// Write `df` as table `name`, replacing any previous content.
    fn write_table(&self, name: &str, df: &mut DataFrame) -> Result<()>;
}

pub fn encode_parquet(df: &mut DataFrame) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ParquetWriter::new(&mut buf).finish(df)?;
    Ok(buf)
}

pub fn decode_parquet(bytes: Vec<u8>) -> Result<DataFrame> {
    Ok(ParquetReader::new(Cursor::new(bytes)).finish()?)
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Snapshot kept in a local Parquet file.
pub struct FileSnapshotStore {
    path: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn fetch_snapshot(&self) -> Result<Option<Vec<u8>>> {
        if !self.path.exists() {
            return Ok(None);
        }
        Ok(Some(fs::read(&self.path)?))
    }

    fn persist_snapshot(&self, bytes: &[u8]) -> Result<()> {
        ensure_parent(&self.path)?;
        fs::write(&self.path, bytes)?;
        info!("Snapshot saved to {}", self.path.display());
        Ok(())
    }
}

/// In-memory snapshot, for tests and dry runs.
#[derive(Default)]
pub struct MemorySnapshotStore {
    bytes: RefCell<Option<Vec<u8>>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(df: &mut DataFrame) -> Result<Self> {
        Ok(Self {
            bytes: RefCell::new(Some(encode_parquet(df)?)),
        })
    }

    pub fn snapshot(&self) -> Result<Option<DataFrame>> {
        self.bytes.borrow().clone().map(decode_parquet).transpose()
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn fetch_snapshot(&self) -> Result<Option<Vec<u8>>> {
        Ok(self.bytes.borrow().clone())
    }

    fn persist_snapshot(&self, bytes: &[u8]) -> Result<()> {
        *self.bytes.borrow_mut() = Some(bytes.to_vec());
        Ok(())
    }
}

/// Writes named tables to configured Parquet paths.
#[derive(Default)]
pub struct ParquetTableWriter {
    targets: BTreeMap<String, PathBuf>,
}

impl ParquetTableWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_target(mut self, name: &str, path: impl Into<PathBuf>) -> Self {
        self.targets.insert(name.to_string(), path.into());
        self
    }
}

impl TableWriter for ParquetTableWriter {
    fn write_table(&self, name: &str, df: &mut DataFrame) -> Result<()> {
        let path = self
            .targets
            .get(name)
            .ok_or_else(|| ScoreError::Config(format!("no output configured for table '{}'", name)))?;
        ensure_parent(path)?;
        let mut file = fs::File::create(path)?;
        ParquetWriter::new(&mut file).finish(df)?;
        info!("Saved {} rows of '{}' to {}", df.height(), name, path.display());
        Ok(())
    }
}

/// Writes `<dir>/<name>.json` as an array of records for the dashboard.
pub struct JsonExportWriter {
    dir: PathBuf,
}

impl JsonExportWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl TableWriter for JsonExportWriter {
    fn write_table(&self, name: &str, df: &mut DataFrame) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(format!("{}.json", name));
        let mut file = fs::File::create(&path)?;
        JsonWriter::new(&mut file)
            .with_json_format(JsonFormat::Json)
            .finish(df)?;
        info!("Exported '{}' to {}", name, path.display());
        Ok(())
    }
}

/// Keeps written tables in memory.
#[derive(Default)]
pub struct MemoryTableWriter {
    tables: RefCell<BTreeMap<String, DataFrame>>,
}

impl MemoryTableWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(&self, name: &str) -> Option<DataFrame> {
        self.tables.borrow().get(name).cloned()
    }
}

impl TableWriter for MemoryTableWriter {
    fn write_table(&self, name: &str, df: &mut DataFrame) -> Result<()> {
        self.tables.borrow_mut().insert(name.to_string(), df.clone());
        Ok(())
    }
}
