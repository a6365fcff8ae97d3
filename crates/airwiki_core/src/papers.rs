use anyhow::{Context, Result};
use log::{info, warn};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::airtable::RecordStore;
use crate::bibliography::{FIELD_TITLE, normalize};
use crate::crossref::BibliographyService;
use crate::pacing::Pacer;
use crate::publish::select_publish_targets;
use crate::record::Record;
use crate::schema::TableDefinition;

pub const FIELD_DOI: &str = "doi";
pub const FIELD_BIBTEX: &str = "bibtexfull";
pub const FIELD_CITATIONS: &str = "num_citations";
pub const FIELD_URL: &str = "URL";

#[derive(Debug, Clone)]
pub struct RefreshOptions {
    /// Refresh every record instead of only those carrying the modified marker.
    pub all: bool,
    pub resolve_doi: bool,
    pub dry_run: bool,
    pub paper_refresh_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaperRefreshResult {
    pub record_id: String,
    pub title: Option<String>,
    pub action: String,
    pub parencite: Option<String>,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshReport {
    pub table: String,
    pub dry_run: bool,
    pub records_fetched: usize,
    pub records_considered: usize,
    pub papers: Vec<PaperRefreshResult>,
    pub request_count: usize,
}

impl RefreshReport {
    fn count(&self, action: &str) -> usize {
        self.papers
            .iter()
            .filter(|paper| paper.action == action)
            .count()
    }

    pub fn refreshed(&self) -> usize {
        self.count("refreshed") + self.count("would_refresh")
    }

    pub fn skipped(&self) -> usize {
        self.count("skipped")
    }

    pub fn failed(&self) -> usize {
        self.count("failed")
    }
}

/// Recompute bibliographic fields of paper records and write them back, one update per record.
///
/// A DOI wins over stored BibTeX: the citation and its count are fetched again and stored next to
/// the derived fields. Service failures abort the run; a citation that does not parse only fails
/// its own record.
pub fn refresh_papers<S: RecordStore + ?Sized, B: BibliographyService + ?Sized>(
    store: &mut S,
    bibliography: &mut B,
    table: &TableDefinition,
    options: &RefreshOptions,
) -> Result<RefreshReport> {
    let records = store
        .fetch_all(table.source_table(), &[])
        .with_context(|| format!("failed to fetch records for {}", table.name))?;
    let selected = if options.all {
        records.clone()
    } else {
        select_publish_targets(table, &records)
    };
    info!(
        "{}: refreshing {} of {} paper records",
        table.name,
        selected.len(),
        records.len()
    );

    let mut report = RefreshReport {
        table: table.name.clone(),
        dry_run: options.dry_run,
        records_fetched: records.len(),
        records_considered: selected.len(),
        papers: Vec::new(),
        request_count: 0,
    };
    let mut pacer = Pacer::from_millis(options.paper_refresh_ms);
    for record in &selected {
        let result = refresh_record(store, bibliography, table, record, options, &mut pacer)?;
        report.papers.push(result);
    }
    report.request_count = store.request_count() + bibliography.request_count();
    Ok(report)
}

fn refresh_record<S: RecordStore + ?Sized, B: BibliographyService + ?Sized>(
    store: &mut S,
    bibliography: &mut B,
    table: &TableDefinition,
    record: &Record,
    options: &RefreshOptions,
    pacer: &mut Pacer,
) -> Result<PaperRefreshResult> {
    let title = non_empty_text(record, FIELD_TITLE);
    let mut result = PaperRefreshResult {
        record_id: record.id.clone(),
        title: title.clone(),
        action: "skipped".to_string(),
        parencite: None,
        detail: None,
    };

    let mut doi = non_empty_text(record, FIELD_DOI);
    let stored_bibtex = non_empty_text(record, FIELD_BIBTEX);
    if doi.is_none() && stored_bibtex.is_none() && !(options.resolve_doi && title.is_some()) {
        result.detail = Some("record has neither a DOI nor BibTeX".to_string());
        info!("{}: skipped {}", table.name, record.id);
        return Ok(result);
    }

    pacer.wait();
    let mut fields = Map::new();
    if doi.is_none()
        && options.resolve_doi
        && let Some(title) = &title
    {
        doi = bibliography
            .search_by_title(title)
            .with_context(|| format!("failed to look up a DOI for {}", record.id))?;
        if let Some(found) = &doi {
            fields.insert(FIELD_DOI.to_string(), Value::String(found.clone()));
        }
    }

    let bibtex = match &doi {
        Some(doi) => {
            let bibtex = bibliography
                .fetch_citation(doi)
                .with_context(|| format!("failed to fetch citation for {doi}"))?;
            let count = bibliography
                .fetch_citation_count(doi)
                .with_context(|| format!("failed to fetch citation count for {doi}"))?;
            fields.insert(FIELD_BIBTEX.to_string(), Value::String(bibtex.clone()));
            fields.insert(FIELD_CITATIONS.to_string(), Value::from(count));
            bibtex
        }
        None => match stored_bibtex {
            Some(bibtex) => bibtex,
            None => {
                result.detail = Some("no DOI found by title and no stored BibTeX".to_string());
                return Ok(result);
            }
        },
    };

    let url = non_empty_text(record, FIELD_URL);
    match normalize(&bibtex, url.as_deref()) {
        Ok(reference) => {
            result.parencite = Some(reference.parencite.clone());
            fields.extend(reference.to_fields());
            result.action = if options.dry_run {
                "would_refresh"
            } else {
                "refreshed"
            }
            .to_string();
        }
        Err(error) => {
            warn!("{}: cannot normalize {}: {error:#}", table.name, record.id);
            result.action = "failed".to_string();
            result.detail = Some(format!("{error:#}"));
        }
    }

    if !options.dry_run && !fields.is_empty() {
        store
            .update(table.source_table(), &record.id, &fields)
            .with_context(|| format!("failed to update paper record {}", record.id))?;
    }
    info!("{}: {} {}", table.name, result.action, record.id);
    Ok(result)
}

fn non_empty_text(record: &Record, name: &str) -> Option<String> {
    record
        .text(name)
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}
