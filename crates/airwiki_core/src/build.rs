use anyhow::Result;
use serde_json::Value;

use crate::airtable::RecordStore;
use crate::diagnostics::Diagnostics;
use crate::format::{LinkLabel, format_value, make_bullets, make_external_link, make_internal_link};
use crate::record::{Record, value_text};
use crate::render::substitute_placeholders;
use crate::resolve::LinkResolver;
use crate::schema::{
    BlockSettings, FieldDefinition, FieldType, ListStyle, Profile, ProfileSettings,
    TableDefinition,
};

/// Table header: the explicit one, or `^ h1 ^ h2 ^` from the table profile.
pub fn table_header(table: &TableDefinition) -> String {
    if let Some(header) = &table.header {
        return header.clone();
    }
    let headers = table
        .published_fields(Profile::Table)
        .into_iter()
        .map(FieldDefinition::header)
        .collect::<Vec<_>>();
    if headers.is_empty() {
        return String::new();
    }
    format!("\n^ {} ^\n", headers.join(" ^ "))
}

/// Placeholder tokens of the page profile, in position order.
pub fn page_placeholders(table: &TableDefinition) -> Vec<String> {
    table
        .published_fields(Profile::Page)
        .into_iter()
        .map(FieldDefinition::placeholder)
        .collect()
}

/// Formatted values of every field published in `profile`, ordered by position.
pub fn build_values<S: RecordStore + ?Sized>(
    table: &TableDefinition,
    profile: Profile,
    record: &Record,
    resolver: &mut LinkResolver<'_, S>,
    diagnostics: &mut Diagnostics,
) -> Result<Vec<String>> {
    let mut values = Vec::new();
    for field in table.published_fields(profile) {
        values.push(build_field(field, profile, record, resolver, diagnostics)?);
    }
    Ok(values)
}

pub fn build_row<S: RecordStore + ?Sized>(
    table: &TableDefinition,
    record: &Record,
    resolver: &mut LinkResolver<'_, S>,
    diagnostics: &mut Diagnostics,
) -> Result<String> {
    let values = build_values(table, Profile::Table, record, resolver, diagnostics)?;
    Ok(format!("| {} |\n", values.join(" | ")))
}

/// Ordered `(placeholder, value)` pairs for the page template.
pub fn build_page_vars<S: RecordStore + ?Sized>(
    table: &TableDefinition,
    record: &Record,
    resolver: &mut LinkResolver<'_, S>,
    diagnostics: &mut Diagnostics,
) -> Result<Vec<(String, String)>> {
    let values = build_values(table, Profile::Page, record, resolver, diagnostics)?;
    Ok(page_placeholders(table).into_iter().zip(values).collect())
}

fn build_field<S: RecordStore + ?Sized>(
    field: &FieldDefinition,
    profile: Profile,
    record: &Record,
    resolver: &mut LinkResolver<'_, S>,
    diagnostics: &mut Diagnostics,
) -> Result<String> {
    let settings = field.profile(profile);
    let mut value = match &settings.block {
        Some(block) => build_block(block, record, resolver, diagnostics)?,
        None => build_markup(field, settings, record, resolver, diagnostics)?,
    };
    if let Some(suffix) = &settings.suffix {
        value.push_str(suffix);
    }
    Ok(value)
}

/// Block template filled from the table-profile fields of the block's table.
fn build_block<S: RecordStore + ?Sized>(
    block: &BlockSettings,
    record: &Record,
    resolver: &mut LinkResolver<'_, S>,
    diagnostics: &mut Diagnostics,
) -> Result<String> {
    if block.fields.is_empty() {
        diagnostics.warn(format!("block table `{}` has no fields", block.table));
    }
    let mut fields = block
        .fields
        .iter()
        .filter(|field| field.table.publish)
        .collect::<Vec<_>>();
    fields.sort_by_key(|field| field.table.pos);
    let mut vars = Vec::with_capacity(fields.len());
    for field in fields {
        let value = build_field(field, Profile::Table, record, resolver, diagnostics)?;
        vars.push((field.placeholder(), value));
    }
    Ok(substitute_placeholders(&block.template, &vars))
}

fn build_markup<S: RecordStore + ?Sized>(
    field: &FieldDefinition,
    settings: &ProfileSettings,
    record: &Record,
    resolver: &mut LinkResolver<'_, S>,
    diagnostics: &mut Diagnostics,
) -> Result<String> {
    let raw = match &field.field_type {
        FieldType::ExternalLink => {
            let Some(url_field) = settings.url_field.as_deref() else {
                diagnostics.warn(format!("external link `{}` has no url_field", field.name));
                return Ok(String::new());
            };
            let label = match (&settings.label_field, &settings.label) {
                (Some(label_field), _) => LinkLabel::Field(label_field),
                (None, Some(literal)) => LinkLabel::Literal(literal),
                (None, None) => LinkLabel::Field(&field.name),
            };
            Some(Value::String(make_external_link(record, url_field, label)))
        }
        FieldType::InternalLink => {
            let Some(namespace) = settings.namespace.as_deref() else {
                diagnostics.warn(format!("internal link `{}` has no namespace", field.name));
                return Ok(String::new());
            };
            let label_field = settings.label_field.as_deref().unwrap_or(&field.name);
            if !record.has(label_field) {
                return Ok(String::new());
            }
            Some(Value::String(make_internal_link(
                record,
                label_field,
                namespace,
                settings.replacement_label.as_deref(),
            )))
        }
        FieldType::ForeignReference => {
            let Some(linked_table) = settings.linked_table.as_deref() else {
                diagnostics.warn(format!(
                    "foreign reference `{}` has no linked_table",
                    field.name
                ));
                return Ok(String::new());
            };
            let mut items = match (&settings.page_links, &settings.display_field) {
                (Some(page_links), _) => resolver.page_links(
                    linked_table,
                    &field.name,
                    record,
                    page_links,
                    diagnostics,
                )?,
                (None, Some(display_field)) => match &settings.popover_field {
                    Some(popover_field) => resolver.popovers(
                        linked_table,
                        &field.name,
                        record,
                        display_field,
                        popover_field,
                        diagnostics,
                    )?,
                    None => resolver.display_values(
                        linked_table,
                        &field.name,
                        record,
                        display_field,
                        diagnostics,
                    )?,
                },
                (None, None) => {
                    diagnostics.warn(format!(
                        "foreign reference `{}` has neither display_field nor page_links",
                        field.name
                    ));
                    Vec::new()
                }
            };
            if settings.first_only {
                items.truncate(1);
            }
            let joined = match settings.list_style {
                ListStyle::Inline => items.join(", "),
                ListStyle::Bullets => make_bullets(&items),
            };
            Some(Value::String(joined))
        }
        _ => {
            let value = direct_value(record, &field.name, settings.first_only);
            if let Some(separator) = settings.split_on.as_deref().filter(|sep| !sep.is_empty()) {
                let text = value.as_ref().map(value_text).unwrap_or_default();
                let items = text
                    .split(separator)
                    .map(str::trim)
                    .collect::<Vec<_>>();
                return Ok(make_bullets(&items));
            }
            value
        }
    };
    Ok(format_value(&field.field_type, raw.as_ref(), diagnostics))
}

fn direct_value(record: &Record, name: &str, first_only: bool) -> Option<Value> {
    let value = record.get(name)?;
    if !first_only {
        return Some(value.clone());
    }
    match value {
        Value::Array(items) => items.first().cloned(),
        other => Some(other.clone()),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{build_page_vars, build_row, page_placeholders, table_header};
    use crate::diagnostics::Diagnostics;
    use crate::record::Record;
    use crate::resolve::LinkResolver;
    use crate::schema::{FieldDefinition, TableDefinition};
    use crate::testing::MemoryRecordStore;

    fn tools_table() -> TableDefinition {
        let mut table = TableDefinition::fallback("Tools");
        table.main_column = Some("Tool name".to_string());
        table.fields = serde_json::from_value(json!([
            {"name": "Tool name", "type": "internal_link",
             "table": {"publish": true, "pos": 1, "namespace": "tools"},
             "page": {"publish": true, "pos": 1, "placeholder": "TOOLNAME"}},
            {"name": "Description", "type": "long_text",
             "table": {"publish": false},
             "page": {"publish": true, "pos": 2}},
            {"name": "Evidence", "type": "checkbox",
             "table": {"publish": true, "pos": 3, "header": "Evidence?"}},
            {"name": "Theories", "type": "foreign_reference",
             "table": {"publish": true, "pos": 2, "linked_table": "Theories", "display_field": "Name"},
             "page": {"publish": true, "pos": 3, "linked_table": "Theories", "display_field": "Name", "list_style": "bullets"}},
            {"name": "Category", "type": "lookup",
             "page": {"publish": true, "pos": 4, "first_only": true, "placeholder": "CATEGORY"}},
            {"name": "Source", "type": "external_link",
             "table": {"publish": true, "pos": 4, "url_field": "Source URL", "label": "source"}}
        ]))
        .expect("decode fields");
        table
    }

    fn store() -> MemoryRecordStore {
        let mut store = MemoryRecordStore::default();
        store.insert(
            "Theories",
            Record::new("thA").with_field("Name", "Social norms"),
        );
        store.insert(
            "Theories",
            Record::new("thB").with_field("Name", "Warm glow"),
        );
        store
    }

    #[test]
    fn header_follows_table_profile_positions() {
        assert_eq!(
            table_header(&tools_table()),
            "\n^ Tool name ^ Theories ^ Evidence? ^ Source ^\n"
        );
    }

    #[test]
    fn explicit_header_wins() {
        let mut table = tools_table();
        table.header = Some("^ Custom ^\n".to_string());
        assert_eq!(table_header(&table), "^ Custom ^\n");
    }

    #[test]
    fn row_uses_only_table_profile_fields() {
        let mut store = store();
        let mut resolver = LinkResolver::new(&mut store);
        let mut diagnostics = Diagnostics::default();
        let record = Record::new("r1")
            .with_field("Tool name", "Social proof")
            .with_field("Description", "Show others give.")
            .with_field("Evidence", true)
            .with_field("Theories", json!(["thA", "thB"]))
            .with_field("Source URL", "https://example.org");

        let row = build_row(&tools_table(), &record, &mut resolver, &mut diagnostics)
            .expect("build row");
        assert_eq!(
            row,
            "| [[tools:Social proof|Social proof]] | Social norms, Warm glow | \u{2713} | [[https://example.org|source]] |\n"
        );
        assert!(!row.contains("Show others give."));
    }

    #[test]
    fn missing_fields_leave_empty_cells() {
        let mut store = store();
        let mut resolver = LinkResolver::new(&mut store);
        let mut diagnostics = Diagnostics::default();
        let record = Record::new("r1").with_field("Tool name", "Defaults");

        let row = build_row(&tools_table(), &record, &mut resolver, &mut diagnostics)
            .expect("build row");
        assert_eq!(row, "| [[tools:Defaults|Defaults]] |  |  |  |\n");
    }

    #[test]
    fn page_vars_pair_placeholders_with_page_profile_values() {
        let mut store = store();
        let mut resolver = LinkResolver::new(&mut store);
        let mut diagnostics = Diagnostics::default();
        let record = Record::new("r1")
            .with_field("Tool name", "Social proof")
            .with_field("Description", "Line one\nLine two")
            .with_field("Theories", json!(["thA"]))
            .with_field("Category", json!(["Nudges", "Framing"]));

        let vars = build_page_vars(&tools_table(), &record, &mut resolver, &mut diagnostics)
            .expect("build vars");
        assert_eq!(
            vars,
            vec![
                (
                    "TOOLNAME".to_string(),
                    "[[tools:Social proof|Social proof]]".to_string()
                ),
                (
                    "DESCRIPTION".to_string(),
                    "Line one \\\\ Line two".to_string()
                ),
                ("THEORIES".to_string(), "\n\n  * Social norms\n".to_string()),
                ("CATEGORY".to_string(), "Nudges".to_string()),
            ]
        );
    }

    #[test]
    fn first_only_on_empty_list_yields_empty() {
        let mut store = store();
        let mut resolver = LinkResolver::new(&mut store);
        let mut diagnostics = Diagnostics::default();
        let record = Record::new("r1")
            .with_field("Tool name", "Social proof")
            .with_field("Category", json!([]));

        let vars = build_page_vars(&tools_table(), &record, &mut resolver, &mut diagnostics)
            .expect("build vars");
        assert_eq!(vars[3], ("CATEGORY".to_string(), String::new()));
    }

    fn companies_table() -> TableDefinition {
        let mut table = TableDefinition::fallback("Giving_companies_ftse");
        table.main_column = Some("Company".to_string());
        table.fields = serde_json::from_value(json!([
            {"name": "Company", "type": "short_text",
             "page": {"publish": true, "pos": 1}},
            {"name": "Pays PG fees", "type": "single_choice",
             "page": {"publish": true, "pos": 2, "placeholder": "FEES",
                      "suffix": " Note: This field needs more research."}},
            {"name": "Other links", "type": "long_text",
             "page": {"publish": true, "pos": 3, "placeholder": "LINKS", "split_on": "; "}}
        ]))
        .expect("decode fields");
        table
    }

    #[test]
    fn split_text_becomes_bullets_and_suffix_is_appended() {
        let mut store = MemoryRecordStore::default();
        let mut resolver = LinkResolver::new(&mut store);
        let mut diagnostics = Diagnostics::default();
        let record = Record::new("c1")
            .with_field("Company", "Acme")
            .with_field("Pays PG fees", "Yes")
            .with_field("Other links", "https://a.example ; https://b.example; ");

        let vars = build_page_vars(&companies_table(), &record, &mut resolver, &mut diagnostics)
            .expect("build vars");
        assert_eq!(
            vars[1].1,
            "Yes Note: This field needs more research."
        );
        assert_eq!(
            vars[2].1,
            "\n\n  * https://a.example\n\n  * https://b.example\n"
        );
    }

    #[test]
    fn split_of_missing_text_is_empty_but_suffix_stays() {
        let mut store = MemoryRecordStore::default();
        let mut resolver = LinkResolver::new(&mut store);
        let mut diagnostics = Diagnostics::default();
        let record = Record::new("c1").with_field("Company", "Acme");

        let vars = build_page_vars(&companies_table(), &record, &mut resolver, &mut diagnostics)
            .expect("build vars");
        assert_eq!(vars[1].1, " Note: This field needs more research.");
        assert_eq!(vars[2].1, "");
    }

    #[test]
    fn category_cells_render_as_popovers() {
        let mut store = MemoryRecordStore::default();
        store.insert(
            "Categories",
            Record::new("c1")
                .with_field("(Sub)Category or theme", "Defaults")
                .with_field("Description", "Pre-set choices."),
        );
        store.insert(
            "Categories",
            Record::new("c2")
                .with_field("(Sub)Category or theme", "Framing")
                .with_field("Description", "How the ask is worded."),
        );
        let mut resolver = LinkResolver::new(&mut store);
        let mut diagnostics = Diagnostics::default();
        let mut table = TableDefinition::fallback("Tools");
        table.main_column = Some("Tool name".to_string());
        table.fields = serde_json::from_value(json!([
            {"name": "Category", "type": "foreign_reference",
             "table": {"publish": true, "pos": 1, "linked_table": "Categories",
                       "display_field": "(Sub)Category or theme", "popover_field": "Description"}}
        ]))
        .expect("decode fields");
        let record = Record::new("t1").with_field("Category", json!(["c1", "c2"]));

        let row = build_row(&table, &record, &mut resolver, &mut diagnostics).expect("build row");
        assert_eq!(
            row,
            "| <popover content=\"Pre-set choices.\" trigger='hover'>Defaults</popover>, <popover content=\"How the ask is worded.\" trigger='hover'>Framing</popover> |\n"
        );
    }

    #[test]
    fn block_fills_its_template_from_the_same_record() {
        let mut store = MemoryRecordStore::default();
        let mut resolver = LinkResolver::new(&mut store);
        let mut diagnostics = Diagnostics::default();
        let mut table = TableDefinition::fallback("papers_mass");
        table.main_column = Some("parencite".to_string());
        table.fields = serde_json::from_value(json!([
            {"name": "meta", "type": "raw",
             "page": {"publish": true, "pos": 1, "placeholder": "META",
                      "block": {"table": "MetaAnalysis",
                                "template": "<collapse id=\"meta\">**Study year**: STUDY_YEAR\n\n**Sample size**: SAMPLE_SIZE\n\n**Pre-registered**: PREREG\n</collapse>"}}}
        ]))
        .expect("decode fields");
        let block_fields: Vec<FieldDefinition> = serde_json::from_value(json!([
            {"name": "parencite", "type": "short_text", "table": {"publish": true, "pos": 1}},
            {"name": "Sample size", "type": "number", "table": {"publish": true, "pos": 3}},
            {"name": "Study year", "type": "number", "table": {"publish": true, "pos": 2}},
            {"name": "Pre-registered", "type": "checkbox",
             "table": {"publish": true, "pos": 4}, "page": {"placeholder": "PREREG"}}
        ]))
        .expect("decode block fields");
        if let Some(block) = table.fields[0].page.block.as_mut() {
            block.fields = block_fields;
        }
        let record = Record::new("p1")
            .with_field("parencite", "(Smith, '20)")
            .with_field("Study year", 2019)
            .with_field("Sample size", 5000)
            .with_field("Pre-registered", true);

        let vars = build_page_vars(&table, &record, &mut resolver, &mut diagnostics)
            .expect("build vars");
        assert_eq!(
            vars,
            vec![(
                "META".to_string(),
                "<collapse id=\"meta\">**Study year**: 2019\n\n**Sample size**: 5000\n\n**Pre-registered**: \u{2713}\n</collapse>".to_string()
            )]
        );
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn placeholders_follow_page_positions() {
        assert_eq!(
            page_placeholders(&tools_table()),
            vec!["TOOLNAME", "DESCRIPTION", "THEORIES", "CATEGORY"]
        );
    }
}
