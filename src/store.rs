use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One piece of personal data the assistant may use to fill forms.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct Record {
    pub id: String,
    pub attribute: String,
    pub value: String,
    #[serde(default)]
    pub description: String,
}

impl Record {
    /// Text that is indexed and handed to the model as context.
    pub fn document_text(&self) -> String {
        format!(
            "Field: {} | Value: {} | Description: {}",
            self.attribute, self.value, self.description
        )
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("data store I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("data store is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("no record with id {0}")]
    NotFound(String),
    #[error("attribute and value are required")]
    MissingField,
}

/// Source of personal-data snippets for the plan generator.
pub trait Retriever: Send + Sync {
    /// Top-`top_k` snippets for every query, in query order.
    fn retrieve(&self, queries: &[String], top_k: usize) -> Result<Vec<Vec<String>>, StoreError>;
}

/// JSON-file backed record store.
#[derive(Debug, Clone)]
pub struct DataStore {
    path: PathBuf,
    records: Vec<Record>,
}

impl DataStore {
    /// Open the store at `path`. A missing file is an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if !path.exists() {
            return Ok(Self {
                path,
                records: Vec::new(),
            });
        }
        let file = std::fs::File::open(&path)?;
        let reader = BufReader::new(file);
        let records: Vec<Record> = serde_json::from_reader(reader)?;
        Ok(Self { path, records })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn get(&self, id: &str) -> Option<&Record> {
        self.records.iter().find(|r| r.id == id)
    }

    pub fn add(
        &mut self,
        attribute: &str,
        value: &str,
        description: &str,
    ) -> Result<String, StoreError> {
        let (attribute, value) = required(attribute, value)?;
        let id = loop {
            let candidate = format!("{:016x}", rand::random::<u64>());
            if self.get(&candidate).is_none() {
                break candidate;
            }
        };
        let mut records = self.records.clone();
        records.push(Record {
            id: id.clone(),
            attribute,
            value,
            description: description.trim().to_string(),
        });
        self.commit(records)?;
        tracing::info!(%id, "record added");
        Ok(id)
    }

    pub fn update(
        &mut self,
        id: &str,
        attribute: &str,
        value: &str,
        description: &str,
    ) -> Result<(), StoreError> {
        let (attribute, value) = required(attribute, value)?;
        let mut records = self.records.clone();
        let record = records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        record.attribute = attribute;
        record.value = value;
        record.description = description.trim().to_string();
        self.commit(records)?;
        tracing::info!(%id, "record updated");
        Ok(())
    }

    pub fn delete(&mut self, id: &str) -> Result<Record, StoreError> {
        let idx = self
            .records
            .iter()
            .position(|r| r.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let mut records = self.records.clone();
        let removed = records.remove(idx);
        self.commit(records)?;
        tracing::info!(%id, "record deleted");
        Ok(removed)
    }

    pub fn save(&self) -> Result<(), StoreError> {
        write_records(&self.path, &self.records)
    }

    /// Persist `records`, then adopt them. On failure memory keeps
    /// matching the file.
    fn commit(&mut self, records: Vec<Record>) -> Result<(), StoreError> {
        write_records(&self.path, &records)?;
        self.records = records;
        Ok(())
    }

    /// Records ranked by cosine similarity of their term counts to `query`.
    /// Records sharing no term with the query are left out.
    pub fn similarity_search(&self, query: &str, top_k: usize) -> Vec<(&Record, f32)> {
        let query_terms = term_counts(query);
        if query_terms.is_empty() || top_k == 0 {
            return Vec::new();
        }

        let mut scored: Vec<(&Record, f32)> = self
            .records
            .iter()
            .map(|r| (r, cosine(&query_terms, &term_counts(&r.document_text()))))
            .filter(|(_, score)| *score > 0.0)
            .collect();
        // stable: equal scores keep insertion order
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(top_k);
        scored
    }
}

impl Retriever for DataStore {
    fn retrieve(&self, queries: &[String], top_k: usize) -> Result<Vec<Vec<String>>, StoreError> {
        Ok(queries
            .iter()
            .map(|q| {
                self.similarity_search(q, top_k)
                    .into_iter()
                    .map(|(r, _)| r.document_text())
                    .collect()
            })
            .collect())
    }
}

/// Retriever that re-reads the store file on every call, so edits made in
/// the data manager show up without restarting the orchestrator.
#[derive(Debug, Clone)]
pub struct StoreFile {
    path: PathBuf,
}

impl StoreFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Retriever for StoreFile {
    fn retrieve(&self, queries: &[String], top_k: usize) -> Result<Vec<Vec<String>>, StoreError> {
        DataStore::open(&self.path)?.retrieve(queries, top_k)
    }
}

fn write_records(path: &Path, records: &[Record]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;

    serde_json::to_writer_pretty(file, records)?;
    Ok(())
}

fn required(attribute: &str, value: &str) -> Result<(String, String), StoreError> {
    let attribute = attribute.trim();
    let value = value.trim();
    if attribute.is_empty() || value.is_empty() {
        return Err(StoreError::MissingField);
    }
    Ok((attribute.to_string(), value.to_string()))
}

fn term_counts(text: &str) -> HashMap<String, f32> {
    let mut counts = HashMap::new();
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        *counts.entry(word.to_lowercase()).or_insert(0.0) += 1.0;
    }
    counts
}

fn cosine(a: &HashMap<String, f32>, b: &HashMap<String, f32>) -> f32 {
    let dot: f32 = a
        .iter()
        .filter_map(|(term, x)| b.get(term).map(|y| x * y))
        .sum();
    if dot == 0.0 {
        return 0.0;
    }
    let norm = |v: &HashMap<String, f32>| v.values().map(|x| x * x).sum::<f32>().sqrt();
    dot / (norm(a) * norm(b))
}
