use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::schema::TableDefinition;

pub const DEFAULT_CONFIG_FILE: &str = "airwiki.toml";
pub const DEFAULT_USER_AGENT: &str = "airwiki/0.2";
pub const DEFAULT_RECORD_STORE_URL: &str = "https://api.airtable.com/v0";
pub const DEFAULT_API_KEY_ENV: &str = "AIRTABLE_API_KEY";
pub const DEFAULT_DOI_URL: &str = "https://doi.org";
pub const DEFAULT_CROSSREF_URL: &str = "https://api.crossref.org";
pub const DEFAULT_PAGE_WRITE_MS: u64 = 5_000;
pub const DEFAULT_PAPER_REFRESH_MS: u64 = 10_000;
pub const DEFAULT_EDIT_SUMMARY: &str = "Updated from Airtable";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct AppConfig {
    #[serde(default)]
    pub record_store: RecordStoreSection,
    #[serde(default)]
    pub targets: BTreeMap<String, TargetSection>,
    #[serde(default)]
    pub pacing: PacingSection,
    #[serde(default)]
    pub bibliography: BibliographySection,
    #[serde(default)]
    pub tables: BTreeMap<String, TableDefinition>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct RecordStoreSection {
    pub api_url: Option<String>,
    pub base: Option<String>,
    pub api_key_env: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct TargetSection {
    pub url: String,
    pub username: Option<String>,
    pub password_env: Option<String>,
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct PacingSection {
    pub page_write_ms: Option<u64>,
    pub paper_refresh_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct BibliographySection {
    pub doi_url: Option<String>,
    pub crossref_url: Option<String>,
    pub mailto: Option<String>,
    /// Table holding paper records; `papers refresh` defaults to it.
    pub table: Option<String>,
}

impl AppConfig {
    pub fn target(&self, name: &str) -> Option<&TargetSection> {
        self.targets.get(name)
    }

    pub fn table(&self, name: &str) -> Option<&TableDefinition> {
        self.tables.get(name)
    }

    pub fn target_names(&self) -> Vec<&str> {
        self.targets.keys().map(String::as_str).collect()
    }

    /// Configured definition, or the generic dump layout for a table nobody described.
    pub fn table_or_fallback(&self, name: &str) -> TableDefinition {
        self.table(name)
            .cloned()
            .unwrap_or_else(|| TableDefinition::fallback(name))
    }

    /// Configuration problems across every table. Reported, never fatal.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        for table in self.tables.values() {
            problems.extend(table.validate());
            for field in &table.fields {
                for settings in [&field.table, &field.page] {
                    if let Some(linked) = &settings.linked_table
                        && !self.tables.contains_key(linked)
                    {
                        problems.push(format!(
                            "table `{}` field `{}` links to undefined table `{linked}`",
                            table.name, field.name
                        ));
                    }
                    if let Some(block) = &settings.block
                        && !self.tables.contains_key(&block.table)
                    {
                        problems.push(format!(
                            "table `{}` field `{}` fills its block from undefined table `{}`",
                            table.name, field.name, block.table
                        ));
                    }
                }
            }
        }
        problems
    }
}

impl RecordStoreSection {
    /// Resolve the API root: env AIRTABLE_API_URL > config > DEFAULT_RECORD_STORE_URL.
    pub fn api_url(&self) -> String {
        env_override("AIRTABLE_API_URL")
            .or_else(|| self.api_url.clone())
            .unwrap_or_else(|| DEFAULT_RECORD_STORE_URL.to_string())
    }

    /// Resolve the base id: env AIRTABLE_BASE > config.
    pub fn base(&self) -> Option<String> {
        env_override("AIRTABLE_BASE").or_else(|| self.base.clone())
    }

    pub fn api_key_env(&self) -> &str {
        self.api_key_env.as_deref().unwrap_or(DEFAULT_API_KEY_ENV)
    }

    pub fn api_key(&self) -> Result<String> {
        let key = self.api_key_env();
        match env_override(key) {
            Some(value) => Ok(value),
            None => bail!("record store API key not set; export {key}"),
        }
    }

    pub fn user_agent(&self) -> String {
        env_override("AIRWIKI_USER_AGENT")
            .or_else(|| self.user_agent.clone())
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }
}

impl TargetSection {
    /// Password from the environment variable named by `password_env`, if one is configured.
    pub fn password(&self) -> Result<Option<String>> {
        let Some(key) = &self.password_env else {
            return Ok(None);
        };
        match env_override(key) {
            Some(value) => Ok(Some(value)),
            None => bail!("wiki password not set; export {key}"),
        }
    }

    pub fn summary(&self) -> &str {
        self.summary.as_deref().unwrap_or(DEFAULT_EDIT_SUMMARY)
    }
}

impl PacingSection {
    /// Resolve page write spacing: env AIRWIKI_PAGE_WRITE_MS > config > DEFAULT_PAGE_WRITE_MS.
    pub fn page_write_ms(&self) -> u64 {
        env_value_u64(
            "AIRWIKI_PAGE_WRITE_MS",
            self.page_write_ms.unwrap_or(DEFAULT_PAGE_WRITE_MS),
        )
    }

    pub fn paper_refresh_ms(&self) -> u64 {
        env_value_u64(
            "AIRWIKI_PAPER_REFRESH_MS",
            self.paper_refresh_ms.unwrap_or(DEFAULT_PAPER_REFRESH_MS),
        )
    }
}

impl BibliographySection {
    pub fn doi_url(&self) -> String {
        env_override("AIRWIKI_DOI_URL")
            .or_else(|| self.doi_url.clone())
            .unwrap_or_else(|| DEFAULT_DOI_URL.to_string())
    }

    pub fn crossref_url(&self) -> String {
        env_override("AIRWIKI_CROSSREF_URL")
            .or_else(|| self.crossref_url.clone())
            .unwrap_or_else(|| DEFAULT_CROSSREF_URL.to_string())
    }

    pub fn mailto(&self) -> Option<String> {
        env_override("AIRWIKI_MAILTO").or_else(|| self.mailto.clone())
    }
}

/// Config path: explicit flag > env AIRWIKI_CONFIG > `./airwiki.toml`.
pub fn resolve_config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    match env_override("AIRWIKI_CONFIG") {
        Some(path) => PathBuf::from(path),
        None => PathBuf::from(DEFAULT_CONFIG_FILE),
    }
}

/// Load and parse an AppConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<AppConfig> {
    if !config_path.exists() {
        return Ok(AppConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    parse_config(&content).with_context(|| format!("failed to parse {}", config_path.display()))
}

pub fn parse_config(content: &str) -> Result<AppConfig> {
    let mut parsed: AppConfig = toml::from_str(content)?;
    for (name, table) in &mut parsed.tables {
        if table.name.is_empty() {
            table.name = name.clone();
        }
    }
    link_blocks(&mut parsed.tables);
    Ok(parsed)
}

// Blocks copy the field list of the table they name. Nested blocks stay unlinked.
fn link_blocks(tables: &mut BTreeMap<String, TableDefinition>) {
    let declared = tables.clone();
    for table in tables.values_mut() {
        for field in &mut table.fields {
            for settings in [&mut field.table, &mut field.page] {
                if let Some(block) = settings.block.as_mut()
                    && let Some(source) = declared.get(&block.table)
                {
                    block.fields = source.fields.clone();
                }
            }
        }
    }
}

fn env_override(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub(crate) fn env_value(key: &str, default: &str) -> String {
    env_override(key).unwrap_or_else(|| default.to_string())
}

pub(crate) fn env_value_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

pub(crate) fn env_value_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldType, Profile};
    use tempfile::tempdir;

    const EXAMPLE_CONFIG: &str = include_str!("../../../config/airwiki.example.toml");

    #[test]
    fn default_config_is_empty() {
        let config = AppConfig::default();
        assert!(config.targets.is_empty());
        assert!(config.tables.is_empty());
        assert!(config.record_store.base.is_none());
    }

    #[test]
    fn load_config_returns_default_for_missing_file() {
        let config = load_config(Path::new("/nonexistent/airwiki.toml")).expect("load config");
        assert!(config.tables.is_empty());
    }

    #[test]
    fn load_config_parses_sections_and_names_tables() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("airwiki.toml");
        fs::write(
            &config_path,
            r#"
[record_store]
base = "appTEST"
api_key_env = "TEST_AIRTABLE_KEY"

[targets.test]
url = "https://wiki.example.org"
username = "bot"
password_env = "TEST_WIKI_PASSWORD"

[pacing]
page_write_ms = 250

[tables.Tools]
main_column = "Tool name"
table_page = "tables:tools"
page_length = 25

[[tables.Tools.fields]]
name = "Tool name"
type = "short_text"
table = { publish = true, pos = 1 }
"#,
        )
        .expect("write config");

        let config = load_config(&config_path).expect("load config");
        assert_eq!(config.record_store.base.as_deref(), Some("appTEST"));
        assert_eq!(config.record_store.api_key_env(), "TEST_AIRTABLE_KEY");
        let target = config.target("test").expect("test target");
        assert_eq!(target.url, "https://wiki.example.org");
        assert_eq!(target.summary(), DEFAULT_EDIT_SUMMARY);
        assert_eq!(config.pacing.page_write_ms, Some(250));

        let tools = config.table("Tools").expect("tools table");
        assert_eq!(tools.name, "Tools");
        assert_eq!(tools.source_table(), "Tools");
        assert_eq!(tools.page_length, Some(25));
        assert_eq!(tools.fields[0].field_type, FieldType::ShortText);
    }

    #[test]
    fn load_config_returns_error_for_invalid_toml() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("airwiki.toml");
        fs::write(&config_path, "[tables\nmain_column = \"oops\"").expect("write config");
        let error = load_config(&config_path).expect_err("must fail");
        assert!(error.to_string().contains("failed to parse"));
    }

    #[test]
    fn unknown_table_falls_back_to_generic_layout() {
        let config = AppConfig::default();
        let table = config.table_or_fallback("Mystery");
        assert!(table.is_generic());
        assert_eq!(table.name, "Mystery");
    }

    #[test]
    fn explicit_config_path_wins() {
        let path = resolve_config_path(Some(Path::new("/etc/airwiki.toml")));
        assert_eq!(path, PathBuf::from("/etc/airwiki.toml"));
    }

    #[test]
    fn target_without_password_env_has_no_password() {
        let target = TargetSection {
            url: "https://wiki.example.org".to_string(),
            username: None,
            password_env: None,
            summary: Some("sync".to_string()),
        };
        assert_eq!(target.password().expect("password"), None);
        assert_eq!(target.summary(), "sync");
    }

    #[test]
    fn missing_password_env_var_is_an_error() {
        let target = TargetSection {
            url: "https://wiki.example.org".to_string(),
            username: Some("bot".to_string()),
            password_env: Some("AIRWIKI_TEST_PASSWORD_THAT_IS_NEVER_SET".to_string()),
            summary: None,
        };
        let error = target.password().expect_err("must fail");
        assert!(
            error
                .to_string()
                .contains("AIRWIKI_TEST_PASSWORD_THAT_IS_NEVER_SET")
        );
    }

    #[test]
    fn shipped_example_config_parses_and_validates() {
        let config = parse_config(EXAMPLE_CONFIG).expect("parse example config");
        assert!(config.target("official").is_some());
        assert!(config.target("test").is_some());

        let tools = config.table("Tools").expect("tools table");
        assert!(tools.has_pages());
        assert!(!tools.published_fields(Profile::Table).is_empty());
        assert!(!tools.published_fields(Profile::Page).is_empty());

        let papers = config.table("papers_mass").expect("papers table");
        assert_eq!(papers.main_column.as_deref(), Some("parencite"));
        assert_eq!(papers.included_in.as_deref(), Some("papers:papers"));
        assert_eq!(config.bibliography.table.as_deref(), Some("papers_mass"));
        let meta = papers
            .fields
            .iter()
            .find_map(|field| field.page.block.as_ref())
            .expect("meta block");
        assert_eq!(meta.table, "MetaAnalysis");
        assert!(!meta.fields.is_empty());

        for name in [
            "Giving_companies_ftse",
            "Giving_companies_other",
            "Charity_experiments",
            "Experiences",
            "Third_sector",
            "MetaAnalysis",
            "EffectiveCharities",
        ] {
            assert!(config.table(name).is_some(), "missing table {name}");
        }
        let ftse = config.table("Giving_companies_ftse").expect("ftse table");
        assert!(ftse.has_pages());
        assert_eq!(ftse.namespace.as_deref(), Some("companies"));
        assert_eq!(ftse.page_write_ms, Some(10_000));

        assert!(config.validate().is_empty(), "{:?}", config.validate());
    }

    #[test]
    fn blocks_link_to_their_table_fields() {
        let config = parse_config(
            r#"
[tables.papers]
main_column = "parencite"

[[tables.papers.fields]]
name = "meta"
type = "raw"
page = { publish = true, pos = 1, block = { table = "Meta", template = "YEAR" } }

[[tables.papers.fields]]
name = "orphan"
type = "raw"
page = { publish = true, pos = 2, block = { table = "Missing", template = "" } }

[tables.Meta]
main_column = "parencite"

[[tables.Meta.fields]]
name = "Year"
type = "number"
table = { publish = true, pos = 1 }
"#,
        )
        .expect("parse config");

        let papers = config.table("papers").expect("papers");
        let linked = papers.fields[0].page.block.as_ref().expect("block");
        assert_eq!(linked.fields.len(), 1);
        assert_eq!(linked.fields[0].name, "Year");
        let problems = config.validate();
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("undefined table `Missing`"));
    }
}
