use std::fmt;
use std::str::FromStr;

use anyhow::{Context, Result, bail};
use log::info;
use serde::Serialize;
use serde_json::{Map, Value};
use similar::TextDiff;

use crate::airtable::RecordStore;
use crate::config::AppConfig;
use crate::diagnostics::Diagnostics;
use crate::dokuwiki::WikiStore;
use crate::pacing::Pacer;
use crate::record::Record;
use crate::render::{embed_in_region, render_pages, render_table};
use crate::resolve::LinkResolver;
use crate::schema::TableDefinition;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PublishMode {
    Create,
    Update,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Resource {
    Table,
    Pages,
    Both,
}

impl PublishMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
        }
    }
}

impl Resource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Table => "table",
            Self::Pages => "pages",
            Self::Both => "both",
        }
    }

    fn includes_table(self) -> bool {
        matches!(self, Self::Table | Self::Both)
    }

    fn includes_pages(self) -> bool {
        matches!(self, Self::Pages | Self::Both)
    }
}

impl FromStr for PublishMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            other => Err(format!(
                "unrecognized mode `{other}`; choose from create, update"
            )),
        }
    }
}

impl FromStr for Resource {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "table" => Ok(Self::Table),
            "pages" => Ok(Self::Pages),
            "both" => Ok(Self::Both),
            other => Err(format!(
                "unrecognized resource `{other}`; choose from table, pages, both"
            )),
        }
    }
}

impl fmt::Display for PublishMode {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct PublishOptions {
    pub mode: PublishMode,
    pub resource: Resource,
    pub dry_run: bool,
    pub page_write_ms: u64,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PagePublishResult {
    pub page_id: String,
    pub action: String,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PublishReport {
    pub table: String,
    pub included_in: Option<String>,
    pub mode: PublishMode,
    pub resource: Resource,
    pub dry_run: bool,
    pub records_fetched: usize,
    pub records_dirty: usize,
    pub flags_cleared: usize,
    pub pages: Vec<PagePublishResult>,
    pub notes: Vec<String>,
    pub diagnostics: Vec<String>,
    pub request_count: usize,
}

impl PublishReport {
    fn new(table: &TableDefinition, options: &PublishOptions) -> Self {
        Self {
            table: table.name.clone(),
            included_in: table.included_in.clone(),
            mode: options.mode,
            resource: options.resource,
            dry_run: options.dry_run,
            records_fetched: 0,
            records_dirty: 0,
            flags_cleared: 0,
            pages: Vec::new(),
            notes: Vec::new(),
            diagnostics: Vec::new(),
            request_count: 0,
        }
    }

    pub fn written(&self) -> usize {
        self.pages
            .iter()
            .filter(|page| page.action == "written")
            .count()
    }
}

/// Records carrying the table's modified marker.
pub fn select_publish_targets(table: &TableDefinition, records: &[Record]) -> Vec<Record> {
    records
        .iter()
        .filter(|record| record.has(&table.dirty_field))
        .cloned()
        .collect()
}

/// Reset the modified marker on each record, one update per record.
pub fn clear_dirty_flags<S: RecordStore + ?Sized>(
    store: &mut S,
    table: &TableDefinition,
    dirty: &[Record],
) -> Result<usize> {
    let mut fields = Map::new();
    fields.insert(table.dirty_field.clone(), Value::Bool(false));
    for record in dirty {
        store
            .update(table.source_table(), &record.id, &fields)
            .with_context(|| format!("failed to clear modified flag on {}", record.id))?;
    }
    Ok(dirty.len())
}

/// Render the table from `records` and write it to its page, or into the region of its host page.
#[allow(clippy::too_many_arguments)]
pub fn publish_table<S: RecordStore + ?Sized, W: WikiStore + ?Sized>(
    wiki: &mut W,
    resolver: &mut LinkResolver<'_, S>,
    table: &TableDefinition,
    records: &[Record],
    pacer: &mut Pacer,
    options: &PublishOptions,
    report: &mut PublishReport,
    diagnostics: &mut Diagnostics,
) -> Result<()> {
    match &table.embed {
        Some(region) => {
            // The host page owns the datatables wrapper, so no page-length hint here.
            let content = render_table(table, records, None, resolver, diagnostics)?;
            let current = wiki.get_page(&region.page)?;
            let embedded = embed_in_region(&current, &region.start, &region.end, &content)
                .with_context(|| format!("cannot embed table into {}", region.page))?;
            write_page(wiki, pacer, &region.page, &embedded, Some(current), options, report)
        }
        None => {
            let content =
                render_table(table, records, table.page_length, resolver, diagnostics)?;
            write_page(wiki, pacer, table.table_page(), &content, None, options, report)
        }
    }
}

/// Page template for the table: inline, fetched from a wiki page, or empty for dump pages.
pub fn resolve_template<W: WikiStore + ?Sized>(
    wiki: &mut W,
    table: &TableDefinition,
) -> Result<Option<String>> {
    if table.is_generic() {
        return Ok(Some(String::new()));
    }
    if let Some(template) = &table.page_template {
        return Ok(Some(template.clone()));
    }
    if let Some(template_page) = &table.page_template_page {
        let template = wiki.get_page(template_page)?;
        if template.trim().is_empty() {
            bail!("page template {template_page} is empty or missing");
        }
        return Ok(Some(template));
    }
    Ok(None)
}

#[allow(clippy::too_many_arguments)]
pub fn publish_pages<S: RecordStore + ?Sized, W: WikiStore + ?Sized>(
    wiki: &mut W,
    resolver: &mut LinkResolver<'_, S>,
    table: &TableDefinition,
    records: &[Record],
    template: &str,
    pacer: &mut Pacer,
    options: &PublishOptions,
    report: &mut PublishReport,
    diagnostics: &mut Diagnostics,
) -> Result<()> {
    let pages = render_pages(table, records, template, resolver, diagnostics)?;
    info!("{}: {} pages to publish", table.name, pages.len());
    for (id, content) in pages {
        write_page(wiki, pacer, &id, &content, None, options, report)?;
    }
    Ok(())
}

fn write_page<W: WikiStore + ?Sized>(
    wiki: &mut W,
    pacer: &mut Pacer,
    id: &str,
    content: &str,
    current: Option<String>,
    options: &PublishOptions,
    report: &mut PublishReport,
) -> Result<()> {
    if options.dry_run {
        let current = match current {
            Some(current) => current,
            None => wiki.get_page(id)?,
        };
        let (action, detail) = if current == content {
            ("unchanged", None)
        } else {
            ("would_write", Some(page_diff(id, &current, content)))
        };
        report.pages.push(PagePublishResult {
            page_id: id.to_string(),
            action: action.to_string(),
            detail,
        });
        return Ok(());
    }

    pacer.wait();
    wiki.set_page(id, content, &options.summary)?;
    info!("wrote {id}");
    report.pages.push(PagePublishResult {
        page_id: id.to_string(),
        action: "written".to_string(),
        detail: None,
    });
    Ok(())
}

/// Unified diff between the live page and the rendered one.
pub fn page_diff(id: &str, current: &str, rendered: &str) -> String {
    let old_header = format!("{id} (wiki)");
    let new_header = format!("{id} (rendered)");
    TextDiff::from_lines(current, rendered)
        .unified_diff()
        .context_radius(3)
        .header(&old_header, &new_header)
        .to_string()
}

/// Publish one table. Update runs consider only records carrying the modified marker, clear it
/// on every such record before rendering, and republish the full table plus the pages of the
/// modified records.
pub fn run_publish<S: RecordStore + ?Sized, W: WikiStore + ?Sized>(
    store: &mut S,
    wiki: &mut W,
    table: &TableDefinition,
    options: &PublishOptions,
) -> Result<PublishReport> {
    let mut report = PublishReport::new(table, options);
    let records = fetch_records(store, table)?;
    report.records_fetched = records.len();

    let page_records = match options.mode {
        PublishMode::Create => records.clone(),
        PublishMode::Update => {
            let dirty = select_publish_targets(table, &records);
            report.records_dirty = dirty.len();
            if !dirty.is_empty() && !options.dry_run {
                report.flags_cleared = clear_dirty_flags(store, table, &dirty)?;
            }
            dirty
        }
    };
    publish_records(store, wiki, table, &records, &page_records, options, report)
}

fn fetch_records<S: RecordStore + ?Sized>(
    store: &mut S,
    table: &TableDefinition,
) -> Result<Vec<Record>> {
    let records = store
        .fetch_all(table.source_table(), &[])
        .with_context(|| format!("failed to fetch records for {}", table.name))?;
    info!("{}: fetched {} records", table.name, records.len());
    Ok(records)
}

fn publish_records<S: RecordStore + ?Sized, W: WikiStore + ?Sized>(
    store: &mut S,
    wiki: &mut W,
    table: &TableDefinition,
    records: &[Record],
    page_records: &[Record],
    options: &PublishOptions,
    mut report: PublishReport,
) -> Result<PublishReport> {
    let mut diagnostics = Diagnostics::default();
    for problem in table.validate() {
        diagnostics.warn(problem);
    }
    if options.mode == PublishMode::Update && page_records.is_empty() {
        report.notes.push("no modified records".to_string());
        report.diagnostics = diagnostics.into_messages();
        report.request_count = store.request_count();
        return Ok(report);
    }

    let interval = table.page_write_ms.unwrap_or(options.page_write_ms);
    let mut pacer = Pacer::from_millis(interval);
    let mut resolver = LinkResolver::new(store);

    if options.resource.includes_table() {
        publish_table(
            wiki,
            &mut resolver,
            table,
            records,
            &mut pacer,
            options,
            &mut report,
            &mut diagnostics,
        )?;
    }

    if options.resource.includes_pages() {
        match resolve_template(wiki, table)? {
            Some(template) if table.has_pages() => publish_pages(
                wiki,
                &mut resolver,
                table,
                page_records,
                &template,
                &mut pacer,
                options,
                &mut report,
                &mut diagnostics,
            )?,
            _ => report.notes.push(format!(
                "table {} has no associated pages; only the table was published",
                table.name
            )),
        }
    }

    report.diagnostics = diagnostics.into_messages();
    report.request_count = resolver.store().request_count() + wiki.request_count();
    Ok(report)
}

struct SourceSnapshot {
    source_table: String,
    dirty_field: String,
    cleared_by: String,
    records: Vec<Record>,
    dirty: Vec<Record>,
}

/// Update run over every defined table, table and pages. Tables reading the same source table
/// share one fetch and one round of flag clearing, so every definition sees the same modified
/// records.
pub fn update_all<S: RecordStore + ?Sized, W: WikiStore + ?Sized>(
    store: &mut S,
    wiki: &mut W,
    config: &AppConfig,
    dry_run: bool,
    summary: &str,
) -> Result<Vec<PublishReport>> {
    let options = PublishOptions {
        mode: PublishMode::Update,
        resource: Resource::Both,
        dry_run,
        page_write_ms: config.pacing.page_write_ms(),
        summary: summary.to_string(),
    };
    let mut snapshots: Vec<SourceSnapshot> = Vec::new();
    let mut reports = Vec::new();
    for table in config.tables.values() {
        let mut report = PublishReport::new(table, &options);
        let known = snapshots.iter().position(|snapshot| {
            snapshot.source_table == table.source_table() && snapshot.dirty_field == table.dirty_field
        });
        let index = match known {
            Some(index) => {
                let snapshot = &snapshots[index];
                if !snapshot.dirty.is_empty() && !dry_run {
                    report.notes.push(format!(
                        "modified flags on {} were cleared by {}",
                        snapshot.source_table, snapshot.cleared_by
                    ));
                }
                index
            }
            None => {
                let records = fetch_records(store, table)?;
                let dirty = select_publish_targets(table, &records);
                if !dirty.is_empty() && !dry_run {
                    report.flags_cleared = clear_dirty_flags(store, table, &dirty)?;
                }
                snapshots.push(SourceSnapshot {
                    source_table: table.source_table().to_string(),
                    dirty_field: table.dirty_field.clone(),
                    cleared_by: table.name.clone(),
                    records,
                    dirty,
                });
                snapshots.len() - 1
            }
        };
        let snapshot = &snapshots[index];
        report.records_fetched = snapshot.records.len();
        report.records_dirty = snapshot.dirty.len();
        reports.push(publish_records(
            store,
            wiki,
            table,
            &snapshot.records,
            &snapshot.dirty,
            &options,
            report,
        )?);
    }
    Ok(reports)
}
