use serde_json::Value;

use crate::diagnostics::Diagnostics;
use crate::record::{Record, page_id, value_text};
use crate::schema::FieldType;

pub const CHECK_MARK: &str = "\u{2713}";
/// DokuWiki forced line break; keeps multi-line text inside a single table cell.
pub const LINE_BREAK: &str = " \\\\ ";
pub const IMAGE_WIDTH: u32 = 400;

/// Render one field value as wiki markup according to its declared type.
///
/// Absent values render as an empty string for every type. Durations are stored in seconds and
/// printed as such.
pub fn format_value(
    field_type: &FieldType,
    value: Option<&Value>,
    diagnostics: &mut Diagnostics,
) -> String {
    let Some(value) = value else {
        return String::new();
    };
    match field_type {
        FieldType::ShortText
        | FieldType::LongText
        | FieldType::SingleChoice
        | FieldType::Date
        | FieldType::Phone
        | FieldType::Email
        | FieldType::Url => escape_text(&value_text(value)),
        FieldType::Number
        | FieldType::Currency
        | FieldType::Percent
        | FieldType::Duration
        | FieldType::Rating => value_text(value),
        FieldType::MultiChoice | FieldType::Lookup => match value {
            Value::Array(items) => items
                .iter()
                .map(value_text)
                .collect::<Vec<_>>()
                .join(", "),
            other => value_text(other),
        },
        FieldType::Checkbox => CHECK_MARK.to_string(),
        FieldType::Collaborator => collaborator_name(value),
        FieldType::CollaboratorList => match value {
            Value::Array(items) => items
                .iter()
                .map(collaborator_name)
                .collect::<Vec<_>>()
                .join(", "),
            other => collaborator_name(other),
        },
        FieldType::Attachment => attachment_image(value),
        FieldType::ExternalLink
        | FieldType::InternalLink
        | FieldType::ForeignReference
        | FieldType::Raw => value_text(value),
        FieldType::Unknown(name) => {
            diagnostics.warn(format!("field type `{name}` unrecognized"));
            String::new()
        }
    }
}

pub fn escape_text(text: &str) -> String {
    text.trim().replace('\n', LINE_BREAK).replace('\r', "")
}

fn collaborator_name(value: &Value) -> String {
    match value {
        Value::Object(map) => map.get("name").map(value_text).unwrap_or_default(),
        other => value_text(other),
    }
}

fn attachment_image(value: &Value) -> String {
    let first = match value {
        Value::Array(items) => items.first(),
        other => Some(other),
    };
    match first.and_then(|item| item.get("url")).and_then(Value::as_str) {
        Some(url) => format!("{{{{{url}?{IMAGE_WIDTH}}}}}\n"),
        None => String::new(),
    }
}

/// Label for an external link: another field of the same record, or fixed text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkLabel<'a> {
    Field(&'a str),
    Literal(&'a str),
}

pub fn make_external_link(record: &Record, url_field: &str, label: LinkLabel<'_>) -> String {
    let url = record.text(url_field).unwrap_or_default();
    match label {
        LinkLabel::Field(label_field) => {
            let label = record.text(label_field).unwrap_or_default();
            if url.is_empty() {
                label
            } else {
                format!("[[{url}|{label}]]")
            }
        }
        LinkLabel::Literal(label) => {
            if url.is_empty() {
                String::new()
            } else {
                format!("[[{url}|{label}]]")
            }
        }
    }
}

/// Link to the page generated for `label_field`'s value in `namespace`.
///
/// A missing replacement label falls back to the plain label.
pub fn make_internal_link(
    record: &Record,
    label_field: &str,
    namespace: &str,
    replacement_label: Option<&str>,
) -> String {
    let label = record.text(label_field).unwrap_or_default();
    let shown = replacement_label
        .and_then(|field| record.text(field))
        .unwrap_or_else(|| label.clone());
    page_link(namespace, &label, &shown)
}

pub fn page_link(namespace: &str, title: &str, label: &str) -> String {
    format!("[[{}|{label}]]", page_id(namespace, title))
}

pub fn make_bullets<S: AsRef<str>>(items: &[S]) -> String {
    let items = items
        .iter()
        .map(AsRef::as_ref)
        .filter(|item| !item.is_empty())
        .collect::<Vec<_>>();
    if items.is_empty() {
        return String::new();
    }
    format!("\n\n  * {}\n", items.join("\n\n  * "))
}
