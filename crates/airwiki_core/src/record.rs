use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One row fetched from the record store.
///
/// Fields that were never filled in are omitted by the store rather than sent as `null`, so
/// `has` is the primary "is there data" check throughout rendering.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Record {
    pub id: String,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl Record {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: Map::new(),
        }
    }

    pub fn with_field(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn has(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Field value as display text; `None` when the field is absent.
    pub fn text(&self, name: &str) -> Option<String> {
        self.get(name).map(value_text)
    }

    /// Identifiers held by a linked-record field. Absent or non-list fields yield nothing.
    pub fn linked_ids(&self, name: &str) -> Vec<String> {
        match self.get(name) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|item| item.as_str().map(ToString::to_string))
                .collect(),
            Some(Value::String(single)) if !single.is_empty() => vec![single.clone()],
            _ => Vec::new(),
        }
    }
}

pub fn value_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Number(number) => number.to_string(),
        Value::Bool(flag) => flag.to_string(),
        Value::Array(items) => items.iter().map(value_text).collect::<Vec<_>>().join(", "),
        Value::Object(_) => value.to_string(),
    }
}

/// Strip ASCII punctuation so a display string can serve as a page slug.
pub fn sanitize(value: &str) -> String {
    value
        .chars()
        .filter(|ch| !ch.is_ascii_punctuation())
        .collect()
}

/// Full page identifier for a display title inside a namespace.
///
/// Page writes and internal links both go through here so a link always targets the page that
/// was actually written.
pub fn page_id(namespace: &str, title: &str) -> String {
    let namespace = namespace.trim().trim_end_matches(':');
    let slug = sanitize(title);
    if namespace.is_empty() {
        slug
    } else {
        format!("{namespace}:{slug}")
    }
}
