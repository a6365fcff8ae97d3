use anyhow::{Result, bail};
use log::warn;
use serde_json::Value;

use crate::airtable::RecordStore;
use crate::build::{build_page_vars, build_row, table_header};
use crate::diagnostics::Diagnostics;
use crate::record::{Record, page_id};
use crate::resolve::LinkResolver;
use crate::schema::{FALLBACK_PAGE_ID, TableDefinition};

/// Header plus one row per included record, in input order.
pub fn render_table<S: RecordStore + ?Sized>(
    table: &TableDefinition,
    records: &[Record],
    page_length: Option<u32>,
    resolver: &mut LinkResolver<'_, S>,
    diagnostics: &mut Diagnostics,
) -> Result<String> {
    let mut content = String::new();
    if let Some(page_length) = page_length {
        content.push_str(&format!("<datatables page-length=\"{page_length}\">\n"));
    }
    content.push_str(&table_header(table));
    for record in records.iter().filter(|record| table.includes(record)) {
        if table.is_generic() {
            content.push_str(&dump_row(record));
        } else {
            content.push_str(&build_row(table, record, resolver, diagnostics)?);
        }
    }
    if page_length.is_some() {
        content.push_str("</datatables>\n");
    }
    Ok(content)
}

/// Rendered pages keyed by page id, in first-seen order.
///
/// A table without field definitions yields a single dump page built from the first record.
pub fn render_pages<S: RecordStore + ?Sized>(
    table: &TableDefinition,
    records: &[Record],
    template: &str,
    resolver: &mut LinkResolver<'_, S>,
    diagnostics: &mut Diagnostics,
) -> Result<Vec<(String, String)>> {
    if table.is_generic() {
        return Ok(records
            .first()
            .map(|record| vec![(FALLBACK_PAGE_ID.to_string(), dump_page(record))])
            .unwrap_or_default());
    }

    let (Some(id_field), Some(namespace)) = (&table.page_id_field, &table.namespace) else {
        return Ok(Vec::new());
    };

    let mut pages: Vec<(String, String)> = Vec::new();
    for record in records.iter().filter(|record| table.includes(record)) {
        let Some(title) = record.text(id_field) else {
            continue;
        };
        let id = page_id(namespace, &title);
        let vars = build_page_vars(table, record, resolver, diagnostics)?;
        let page = substitute_placeholders(template, &vars);
        match pages.iter_mut().find(|(existing, _)| *existing == id) {
            Some(slot) => {
                warn!("page {id} rendered twice; keeping record {}", record.id);
                slot.1 = page;
            }
            None => pages.push((id, page)),
        }
    }
    Ok(pages)
}

enum Segment<'a> {
    Template(&'a str),
    Value(&'a str),
}

/// Replace the first occurrence of each placeholder, in pair order. Only template text is
/// searched; substituted values are never scanned again.
pub fn substitute_placeholders(template: &str, vars: &[(String, String)]) -> String {
    let mut segments = vec![Segment::Template(template)];
    for (placeholder, value) in vars {
        if placeholder.is_empty() {
            continue;
        }
        let found = segments.iter().enumerate().find_map(|(index, segment)| match segment {
            Segment::Template(text) => text.find(placeholder.as_str()).map(|at| (index, *text, at)),
            Segment::Value(_) => None,
        });
        if let Some((index, text, at)) = found {
            let before = &text[..at];
            let after = &text[at + placeholder.len()..];
            segments.splice(
                index..=index,
                [
                    Segment::Template(before),
                    Segment::Value(value.as_str()),
                    Segment::Template(after),
                ],
            );
        }
    }
    segments
        .into_iter()
        .map(|segment| match segment {
            Segment::Template(text) | Segment::Value(text) => text,
        })
        .collect()
}

/// Replace the text between `start` and the next `end` marker, keeping both markers and every
/// byte outside them.
pub fn embed_in_region(page: &str, start: &str, end: &str, content: &str) -> Result<String> {
    let Some(start_at) = page.find(start) else {
        bail!("region start marker `{start}` not found");
    };
    let inner_from = start_at + start.len();
    let Some(end_offset) = page[inner_from..].find(end) else {
        bail!("region end marker `{end}` not found after `{start}`");
    };
    let inner_to = inner_from + end_offset;
    let mut embedded = String::with_capacity(page.len() + content.len());
    embedded.push_str(&page[..inner_from]);
    embedded.push_str(content);
    embedded.push_str(&page[inner_to..]);
    Ok(embedded)
}

fn dump_value(value: &Value) -> String {
    value.to_string()
}

fn dump_row(record: &Record) -> String {
    let cells = record.fields.values().map(dump_value).collect::<Vec<_>>();
    format!("| {} |\n", cells.join(" | "))
}

fn dump_page(record: &Record) -> String {
    let mut page = String::new();
    for (name, value) in &record.fields {
        page.push_str(&format!("{}\n\n{}\n\n", name.to_uppercase(), dump_value(value)));
    }
    page
}
