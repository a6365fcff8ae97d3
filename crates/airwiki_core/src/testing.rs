use std::collections::BTreeMap;

use anyhow::{Result, bail};
use serde_json::{Map, Value};

use crate::airtable::RecordStore;
use crate::crossref::BibliographyService;
use crate::dokuwiki::WikiStore;
use crate::record::Record;

#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    tables: BTreeMap<String, Vec<Record>>,
    pub updates: Vec<(String, String, Map<String, Value>)>,
    pub fail_updates: bool,
    requests: usize,
}

impl MemoryRecordStore {
    pub fn insert(&mut self, table: &str, record: Record) {
        self.tables.entry(table.to_string()).or_default().push(record);
    }

    pub fn record(&self, table: &str, id: &str) -> Option<&Record> {
        self.tables
            .get(table)
            .and_then(|records| records.iter().find(|record| record.id == id))
    }

    pub fn updates_for(&self, id: &str) -> usize {
        self.updates
            .iter()
            .filter(|(_, record_id, _)| record_id == id)
            .count()
    }
}

impl RecordStore for MemoryRecordStore {
    fn fetch_all(&mut self, table: &str, fields: &[String]) -> Result<Vec<Record>> {
        self.requests += 1;
        let records = self.tables.get(table).cloned().unwrap_or_default();
        if fields.is_empty() {
            return Ok(records);
        }
        Ok(records
            .into_iter()
            .map(|mut record| {
                record.fields.retain(|name, _| fields.contains(name));
                record
            })
            .collect())
    }

    fn fetch_one(&mut self, table: &str, id: &str) -> Result<Option<Record>> {
        self.requests += 1;
        Ok(self.record(table, id).cloned())
    }

    fn update(&mut self, table: &str, id: &str, fields: &Map<String, Value>) -> Result<()> {
        self.requests += 1;
        if self.fail_updates {
            bail!("record store rejected update of {id}");
        }
        let Some(record) = self
            .tables
            .get_mut(table)
            .and_then(|records| records.iter_mut().find(|record| record.id == id))
        else {
            bail!("record {id} not found in `{table}`");
        };
        // The hosted store omits false checkboxes and empty values entirely.
        for (name, value) in fields {
            match value {
                Value::Null | Value::Bool(false) => {
                    record.fields.remove(name);
                }
                Value::String(text) if text.is_empty() => {
                    record.fields.remove(name);
                }
                other => {
                    record.fields.insert(name.clone(), other.clone());
                }
            }
        }
        self.updates
            .push((table.to_string(), id.to_string(), fields.clone()));
        Ok(())
    }

    fn request_count(&self) -> usize {
        self.requests
    }
}

#[derive(Debug, Default)]
pub struct MemoryWiki {
    pub pages: BTreeMap<String, String>,
    pub writes: Vec<(String, String, String)>,
    /// Fail every write once this many writes have succeeded.
    pub fail_after_writes: Option<usize>,
    requests: usize,
}

impl MemoryWiki {
    pub fn with_page(mut self, id: &str, content: &str) -> Self {
        self.pages.insert(id.to_string(), content.to_string());
        self
    }

    pub fn written_ids(&self) -> Vec<&str> {
        self.writes.iter().map(|(id, _, _)| id.as_str()).collect()
    }
}

impl WikiStore for MemoryWiki {
    fn get_page(&mut self, id: &str) -> Result<String> {
        self.requests += 1;
        Ok(self.pages.get(id).cloned().unwrap_or_default())
    }

    fn set_page(&mut self, id: &str, content: &str, summary: &str) -> Result<()> {
        self.requests += 1;
        if let Some(limit) = self.fail_after_writes
            && self.writes.len() >= limit
        {
            bail!("wiki unavailable while writing {id}");
        }
        self.pages.insert(id.to_string(), content.to_string());
        self.writes
            .push((id.to_string(), content.to_string(), summary.to_string()));
        Ok(())
    }

    fn request_count(&self) -> usize {
        self.requests
    }
}

#[derive(Debug, Default)]
pub struct FakeBibliography {
    pub citations: BTreeMap<String, String>,
    pub counts: BTreeMap<String, u64>,
    pub titles: BTreeMap<String, String>,
    requests: usize,
}

impl BibliographyService for FakeBibliography {
    fn fetch_citation(&mut self, doi: &str) -> Result<String> {
        self.requests += 1;
        match self.citations.get(doi) {
            Some(bibtex) => Ok(bibtex.clone()),
            None => bail!("DOI {doi} not found"),
        }
    }

    fn fetch_citation_count(&mut self, doi: &str) -> Result<u64> {
        self.requests += 1;
        Ok(self.counts.get(doi).copied().unwrap_or(0))
    }

    fn search_by_title(&mut self, title: &str) -> Result<Option<String>> {
        self.requests += 1;
        Ok(self.titles.get(title).cloned())
    }

    fn request_count(&self) -> usize {
        self.requests
    }
}
