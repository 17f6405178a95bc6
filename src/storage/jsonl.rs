//! JSON Lines repository: one `<table>.jsonl` file per table

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{record_key, records};
use crate::transport::{Repository, RepositoryError, UpsertCounts, WriteJob};

const DEFAULT_BUFFER_SIZE: usize = 8192; // 8KB buffer

struct TableFile {
    keys: HashSet<String>,
    writer: BufWriter<File>,
    written: u64,
}

/// Repository appending records to JSON Lines files under a directory.
///
/// Records already present in a file, including ones written by earlier
/// runs, are matched rather than appended again.
pub struct JsonlRepository {
    dir: PathBuf,
    tables: Mutex<HashMap<String, TableFile>>,
}

impl JsonlRepository {
    /// Create a repository writing under `dir`, creating it if needed
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self, RepositoryError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        info!("Writing tables to {}", dir.display());

        Ok(Self {
            dir,
            tables: Mutex::new(HashMap::new()),
        })
    }

    /// Output directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File backing `table`
    pub fn table_path(&self, table: &str) -> Result<PathBuf, RepositoryError> {
        validate_table_name(table)?;
        Ok(self.dir.join(format!("{table}.jsonl")))
    }

    fn open_table(&self, table: &str) -> Result<TableFile, RepositoryError> {
        let path = self.table_path(table)?;

        let mut keys = HashSet::new();
        if path.exists() {
            let reader = BufReader::new(File::open(&path)?);
            for line in reader.lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<serde_json::Value>(&line) {
                    Ok(record) => {
                        keys.insert(record_key(&record));
                    }
                    Err(e) => warn!(path = %path.display(), error = %e, "Skipping malformed line"),
                }
            }
            debug!(path = %path.display(), records = keys.len(), "Loaded existing table");
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(TableFile {
            keys,
            writer: BufWriter::with_capacity(DEFAULT_BUFFER_SIZE, file),
            written: 0,
        })
    }
}

/// Table names become file names: no separators, no leading dot.
fn validate_table_name(table: &str) -> Result<(), RepositoryError> {
    let valid = !table.is_empty()
        && !table.starts_with('.')
        && table
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(RepositoryError::InvalidTable(table.to_string()))
    }
}

#[async_trait]
impl Repository for JsonlRepository {
    async fn upsert(&self, job: &WriteJob) -> Result<UpsertCounts, RepositoryError> {
        let incoming = records(job)?;
        let mut tables = self.tables.lock().await;

        if !tables.contains_key(&job.table) {
            let table = self.open_table(&job.table)?;
            tables.insert(job.table.clone(), table);
        }
        let table = tables
            .get_mut(&job.table)
            .ok_or_else(|| RepositoryError::InvalidTable(job.table.clone()))?;

        let mut counts = UpsertCounts::default();
        for record in incoming {
            let key = record_key(&record);
            if table.keys.contains(&key) {
                counts.matched += 1;
                continue;
            }
            table.writer.write_all(key.as_bytes())?;
            table.writer.write_all(b"\n")?;
            table.keys.insert(key);
            table.written += 1;
            counts.upserted += 1;
        }
        table.writer.flush()?;

        Ok(counts)
    }

    async fn close(&self) -> Result<(), RepositoryError> {
        let mut tables = self.tables.lock().await;
        for (name, table) in tables.iter_mut() {
            table.writer.flush()?;
            table.writer.get_ref().sync_all()?;
            debug!(table = %name, written = table.written, "Closed table file");
        }
        info!("JSONL repository closed: {} tables", tables.len());
        Ok(())
    }
}
