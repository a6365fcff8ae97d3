use std::collections::HashMap;

use anyhow::Result;

use crate::airtable::RecordStore;
use crate::diagnostics::Diagnostics;
use crate::format::page_link;
use crate::record::Record;
use crate::schema::PageLinkSettings;

/// Follows foreign-reference fields into their tables. Referenced records are fetched once per
/// resolver and never written.
pub struct LinkResolver<'a, S: RecordStore + ?Sized> {
    store: &'a mut S,
    cache: HashMap<(String, String), Option<Record>>,
}

impl<'a, S: RecordStore + ?Sized> LinkResolver<'a, S> {
    pub fn new(store: &'a mut S) -> Self {
        Self {
            store,
            cache: HashMap::new(),
        }
    }

    pub fn store(&mut self) -> &mut S {
        self.store
    }

    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }

    /// Referenced record, or `None` for a dangling id (reported once).
    pub fn lookup(
        &mut self,
        table: &str,
        id: &str,
        diagnostics: &mut Diagnostics,
    ) -> Result<Option<&Record>> {
        let key = (table.to_string(), id.to_string());
        if !self.cache.contains_key(&key) {
            let fetched = self.store.fetch_one(table, id)?;
            if fetched.is_none() {
                diagnostics.warn(format!("dangling reference {id} into `{table}`"));
            }
            self.cache.insert(key.clone(), fetched);
        }
        Ok(self.cache.get(&key).and_then(Option::as_ref))
    }

    /// Display values of every record referenced from `record[foreign_id_field]`.
    /// Dangling ids and empty display values contribute nothing.
    pub fn display_values(
        &mut self,
        linked_table: &str,
        foreign_id_field: &str,
        record: &Record,
        display_field: &str,
        diagnostics: &mut Diagnostics,
    ) -> Result<Vec<String>> {
        let mut values = Vec::new();
        for id in record.linked_ids(foreign_id_field) {
            let Some(linked) = self.lookup(linked_table, &id, diagnostics)? else {
                continue;
            };
            if let Some(value) = linked.text(display_field)
                && !value.is_empty()
            {
                values.push(value);
            }
        }
        Ok(values)
    }

    /// `<popover>` per referenced record: the display value, with `popover_field` shown on hover.
    pub fn popovers(
        &mut self,
        linked_table: &str,
        foreign_id_field: &str,
        record: &Record,
        display_field: &str,
        popover_field: &str,
        diagnostics: &mut Diagnostics,
    ) -> Result<Vec<String>> {
        let mut popovers = Vec::new();
        for id in record.linked_ids(foreign_id_field) {
            let Some(linked) = self.lookup(linked_table, &id, diagnostics)? else {
                continue;
            };
            let name = linked.text(display_field).unwrap_or_default();
            if name.is_empty() {
                continue;
            }
            let content = linked.text(popover_field).unwrap_or_default();
            popovers.push(format!(
                "<popover content=\"{}\" trigger='hover'>{name}</popover>",
                content.trim_end().replace('"', "&quot;")
            ));
        }
        Ok(popovers)
    }

    pub fn resolve_links(
        &mut self,
        linked_table: &str,
        foreign_id_field: &str,
        record: &Record,
        display_field: &str,
        diagnostics: &mut Diagnostics,
    ) -> Result<String> {
        Ok(self
            .display_values(
                linked_table,
                foreign_id_field,
                record,
                display_field,
                diagnostics,
            )?
            .join(", "))
    }

    /// One `[[namespace:slug|label]]` per referenced record, optionally followed by
    /// `, [[url|Full text]]`.
    pub fn page_links(
        &mut self,
        linked_table: &str,
        foreign_id_field: &str,
        record: &Record,
        settings: &PageLinkSettings,
        diagnostics: &mut Diagnostics,
    ) -> Result<Vec<String>> {
        let mut links = Vec::new();
        for id in record.linked_ids(foreign_id_field) {
            let Some(linked) = self.lookup(linked_table, &id, diagnostics)? else {
                continue;
            };
            let title = linked.text(&settings.title_field).unwrap_or_default();
            let label = match &settings.label_field {
                Some(label_field) => linked.text(label_field).unwrap_or_default(),
                None => title.clone(),
            };
            let mut link = page_link(&settings.namespace, &title, &label);
            if let Some(fulltext_field) = &settings.fulltext_field
                && let Some(url) = linked.text(fulltext_field)
                && !url.is_empty()
            {
                link.push_str(&format!(", [[{url}|Full text]]"));
            }
            links.push(link);
        }
        Ok(links)
    }

    pub fn resolve_page_links(
        &mut self,
        linked_table: &str,
        foreign_id_field: &str,
        record: &Record,
        settings: &PageLinkSettings,
        diagnostics: &mut Diagnostics,
    ) -> Result<String> {
        Ok(self
            .page_links(linked_table, foreign_id_field, record, settings, diagnostics)?
            .join(", "))
    }
}
