pub mod airtable;
pub mod bibliography;
pub mod build;
pub mod config;
pub mod crossref;
pub mod diagnostics;
pub mod dokuwiki;
pub mod format;
pub mod http;
pub mod pacing;
pub mod papers;
pub mod publish;
pub mod record;
pub mod render;
pub mod resolve;
pub mod schema;

#[cfg(test)]
mod testing;
