use serde::{Deserialize, Serialize};

use crate::record::Record;

pub const DEFAULT_TABLE_PAGE: &str = "tables:test";
pub const FALLBACK_PAGE_ID: &str = "test:test_page";
pub const DEFAULT_DIRTY_FIELD: &str = "Modified";
pub const DEFAULT_REGION_START: &str = "<datatables>";
pub const DEFAULT_REGION_END: &str = "</datatables>";

/// Parsed leniently from snake_case names (`short_text`) or the record store's display names
/// (`Single line text`).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(from = "String", into = "String")]
pub enum FieldType {
    ShortText,
    LongText,
    SingleChoice,
    Date,
    Phone,
    Email,
    Url,
    Number,
    Currency,
    Percent,
    Duration,
    Rating,
    MultiChoice,
    Lookup,
    Checkbox,
    Collaborator,
    CollaboratorList,
    Attachment,
    ExternalLink,
    InternalLink,
    ForeignReference,
    Raw,
    Unknown(String),
}

impl FieldType {
    pub fn parse(value: &str) -> Self {
        let normalized = value
            .trim()
            .to_ascii_lowercase()
            .replace([' ', '-'], "_");
        match normalized.as_str() {
            "short_text" | "single_line_text" | "text" => Self::ShortText,
            "long_text" => Self::LongText,
            "single_choice" | "single_select" => Self::SingleChoice,
            "date" => Self::Date,
            "phone" | "phone_number" => Self::Phone,
            "email" => Self::Email,
            "url" => Self::Url,
            "number" => Self::Number,
            "currency" => Self::Currency,
            "percent" => Self::Percent,
            "duration" => Self::Duration,
            "rating" => Self::Rating,
            "multi_choice" | "multiple_select" => Self::MultiChoice,
            "lookup" => Self::Lookup,
            "checkbox" => Self::Checkbox,
            "collaborator" | "single_collaborator" => Self::Collaborator,
            "collaborator_list" | "multiple_collaborator" | "multiple_collaborators" => {
                Self::CollaboratorList
            }
            "attachment" => Self::Attachment,
            "external_link" => Self::ExternalLink,
            "internal_link" => Self::InternalLink,
            "foreign_reference" | "link_to_another_record" => Self::ForeignReference,
            "raw" => Self::Raw,
            _ => Self::Unknown(value.trim().to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::ShortText => "short_text",
            Self::LongText => "long_text",
            Self::SingleChoice => "single_choice",
            Self::Date => "date",
            Self::Phone => "phone",
            Self::Email => "email",
            Self::Url => "url",
            Self::Number => "number",
            Self::Currency => "currency",
            Self::Percent => "percent",
            Self::Duration => "duration",
            Self::Rating => "rating",
            Self::MultiChoice => "multi_choice",
            Self::Lookup => "lookup",
            Self::Checkbox => "checkbox",
            Self::Collaborator => "collaborator",
            Self::CollaboratorList => "collaborator_list",
            Self::Attachment => "attachment",
            Self::ExternalLink => "external_link",
            Self::InternalLink => "internal_link",
            Self::ForeignReference => "foreign_reference",
            Self::Raw => "raw",
            Self::Unknown(name) => name,
        }
    }
}

impl From<String> for FieldType {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<FieldType> for String {
    fn from(value: FieldType) -> Self {
        value.as_str().to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    Table,
    Page,
}

impl Profile {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Table => "table",
            Self::Page => "page",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ListStyle {
    #[default]
    Inline,
    Bullets,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PageLinkSettings {
    pub namespace: String,
    #[serde(default = "default_title_field")]
    pub title_field: String,
    pub label_field: Option<String>,
    pub fulltext_field: Option<String>,
}

fn default_title_field() -> String {
    "Title".to_string()
}

/// Template filled from another table's fields on the same record, e.g. a collapsible
/// meta-analysis box on paper pages.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BlockSettings {
    pub table: String,
    pub template: String,
    #[serde(skip)]
    pub fields: Vec<FieldDefinition>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProfileSettings {
    #[serde(default)]
    pub publish: bool,
    #[serde(default)]
    pub pos: i64,
    pub header: Option<String>,
    pub placeholder: Option<String>,
    #[serde(default)]
    pub first_only: bool,
    pub url_field: Option<String>,
    pub label_field: Option<String>,
    pub label: Option<String>,
    pub namespace: Option<String>,
    pub replacement_label: Option<String>,
    pub linked_table: Option<String>,
    pub display_field: Option<String>,
    pub page_links: Option<PageLinkSettings>,
    #[serde(default)]
    pub list_style: ListStyle,
    pub popover_field: Option<String>,
    pub split_on: Option<String>,
    pub suffix: Option<String>,
    pub block: Option<BlockSettings>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct FieldDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub table: ProfileSettings,
    #[serde(default)]
    pub page: ProfileSettings,
}

impl FieldDefinition {
    pub fn profile(&self, profile: Profile) -> &ProfileSettings {
        match profile {
            Profile::Table => &self.table,
            Profile::Page => &self.page,
        }
    }

    pub fn header(&self) -> &str {
        self.table.header.as_deref().unwrap_or(&self.name)
    }

    pub fn placeholder(&self) -> String {
        match &self.page.placeholder {
            Some(placeholder) => placeholder.clone(),
            None => self
                .name
                .chars()
                .map(|ch| {
                    if ch.is_alphanumeric() {
                        ch.to_ascii_uppercase()
                    } else {
                        '_'
                    }
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RegionTarget {
    pub page: String,
    #[serde(default = "default_region_start")]
    pub start: String,
    #[serde(default = "default_region_end")]
    pub end: String,
}

fn default_region_start() -> String {
    DEFAULT_REGION_START.to_string()
}

fn default_region_end() -> String {
    DEFAULT_REGION_END.to_string()
}

/// The field must be present, or equal `equals` when given.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Condition {
    pub field: String,
    pub equals: Option<String>,
}

impl Condition {
    pub fn matches(&self, record: &Record) -> bool {
        let Some(value) = record.get(&self.field) else {
            return false;
        };
        match &self.equals {
            None => true,
            Some(expected) => match value {
                serde_json::Value::Array(items) => items
                    .iter()
                    .any(|item| crate::record::value_text(item) == *expected),
                other => crate::record::value_text(other) == *expected,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TableDefinition {
    #[serde(default)]
    pub name: String,
    pub source_table: Option<String>,
    pub base: Option<String>,
    pub main_column: Option<String>,
    #[serde(default)]
    pub fields: Vec<FieldDefinition>,
    pub header: Option<String>,
    pub table_page: Option<String>,
    pub included_in: Option<String>,
    pub page_length: Option<u32>,
    pub embed: Option<RegionTarget>,
    pub page_template: Option<String>,
    pub page_template_page: Option<String>,
    pub page_id_field: Option<String>,
    pub namespace: Option<String>,
    #[serde(default = "default_dirty_field")]
    pub dirty_field: String,
    #[serde(default)]
    pub include_when: Vec<Condition>,
    pub page_write_ms: Option<u64>,
}

fn default_dirty_field() -> String {
    DEFAULT_DIRTY_FIELD.to_string()
}

impl TableDefinition {
    pub fn fallback(name: &str) -> Self {
        Self {
            name: name.to_string(),
            source_table: None,
            base: None,
            main_column: None,
            fields: Vec::new(),
            header: None,
            table_page: None,
            included_in: None,
            page_length: None,
            embed: None,
            page_template: None,
            page_template_page: None,
            page_id_field: None,
            namespace: None,
            dirty_field: default_dirty_field(),
            include_when: Vec::new(),
            page_write_ms: None,
        }
    }

    pub fn source_table(&self) -> &str {
        self.source_table.as_deref().unwrap_or(&self.name)
    }

    pub fn table_page(&self) -> &str {
        self.table_page.as_deref().unwrap_or(DEFAULT_TABLE_PAGE)
    }

    pub fn is_generic(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn has_pages(&self) -> bool {
        if self.is_generic() {
            return true;
        }
        (self.page_template.is_some() || self.page_template_page.is_some())
            && self.page_id_field.is_some()
            && self.namespace.is_some()
    }

    pub fn includes(&self, record: &Record) -> bool {
        if let Some(main_column) = &self.main_column
            && !record.has(main_column)
        {
            return false;
        }
        self.include_when
            .iter()
            .all(|condition| condition.matches(record))
    }

    pub fn published_fields(&self, profile: Profile) -> Vec<&FieldDefinition> {
        let mut fields = self
            .fields
            .iter()
            .filter(|field| field.profile(profile).publish)
            .collect::<Vec<_>>();
        fields.sort_by_key(|field| field.profile(profile).pos);
        fields
    }

    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if !self.is_generic() && self.main_column.is_none() {
            problems.push(format!("table `{}` has no main_column", self.name));
        }
        if self.page_template.is_some() && self.page_template_page.is_some() {
            problems.push(format!(
                "table `{}` sets both page_template and page_template_page; the inline template wins",
                self.name
            ));
        }
        for field in &self.fields {
            if let FieldType::Unknown(name) = &field.field_type {
                problems.push(format!(
                    "table `{}` field `{}` has unrecognized type `{name}`",
                    self.name, field.name
                ));
            }
            for profile in [Profile::Table, Profile::Page] {
                let settings = field.profile(profile);
                if !settings.publish {
                    continue;
                }
                let missing = match field.field_type {
                    FieldType::ExternalLink if settings.url_field.is_none() => Some("url_field"),
                    FieldType::InternalLink if settings.namespace.is_none() => Some("namespace"),
                    FieldType::ForeignReference if settings.linked_table.is_none() => {
                        Some("linked_table")
                    }
                    FieldType::ForeignReference
                        if settings.display_field.is_none() && settings.page_links.is_none() =>
                    {
                        Some("display_field or page_links")
                    }
                    FieldType::ForeignReference
                        if settings.popover_field.is_some() && settings.display_field.is_none() =>
                    {
                        Some("display_field for popover_field")
                    }
                    _ => None,
                };
                if let Some(missing) = missing {
                    problems.push(format!(
                        "table `{}` field `{}` ({} profile) is missing {missing}",
                        self.name,
                        field.name,
                        profile.as_str()
                    ));
                }
            }
        }
        problems
    }
}
