//! In-memory repository

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

use super::{record_key, records};
use crate::transport::{Repository, RepositoryError, UpsertCounts, WriteJob};

#[derive(Debug, Default)]
struct Table {
    keys: HashSet<String>,
    records: Vec<Value>,
}

/// Repository keeping every table in memory, in insertion order
#[derive(Debug, Default)]
pub struct MemoryRepository {
    tables: RwLock<HashMap<String, Table>>,
}

impl MemoryRepository {
    /// Create an empty repository
    pub fn new() -> Self {
        Self::default()
    }

    /// Records stored in `table`, in insertion order
    pub async fn records(&self, table: &str) -> Vec<Value> {
        self.tables
            .read()
            .await
            .get(table)
            .map(|t| t.records.clone())
            .unwrap_or_default()
    }

    /// Names of tables holding at least one record, sorted
    pub async fn tables(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn upsert(&self, job: &WriteJob) -> Result<UpsertCounts, RepositoryError> {
        let incoming = records(job)?;
        let mut tables = self.tables.write().await;
        let table = tables.entry(job.table.clone()).or_default();

        let mut counts = UpsertCounts::default();
        for record in incoming {
            if table.keys.insert(record_key(&record)) {
                table.records.push(record);
                counts.upserted += 1;
            } else {
                counts.matched += 1;
            }
        }
        Ok(counts)
    }
}
