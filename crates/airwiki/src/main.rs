use std::path::PathBuf;

use airwiki_core::airtable::{AirtableClient, AirtableClientConfig};
use airwiki_core::config::{AppConfig, load_config, resolve_config_path};
use airwiki_core::crossref::{CrossrefClient, CrossrefClientConfig};
use airwiki_core::dokuwiki::{DokuWikiClient, DokuWikiClientConfig};
use airwiki_core::papers::{RefreshOptions, RefreshReport, refresh_papers};
use airwiki_core::publish::{
    PublishMode, PublishOptions, PublishReport, Resource, run_publish, update_all,
};
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use log::{LevelFilter, warn};

#[derive(Debug, Parser)]
#[command(
    name = "airwiki",
    version,
    about = "Publish Airtable records to DokuWiki tables and pages"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Log HTTP retries and pacing details")]
    verbose: bool,
    #[arg(long, global = true, help = "Print reports as JSON")]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Publish one table to a wiki target")]
    Run(RunArgs),
    #[command(name = "update-all", about = "Republish modified records of every defined table")]
    UpdateAll(UpdateAllArgs),
    Papers(PapersArgs),
    #[command(about = "List defined tables")]
    Tables,
}

#[derive(Debug, Args)]
struct RunArgs {
    target: String,
    table: String,
    mode: PublishMode,
    resource: Resource,
    #[arg(long, help = "Render and diff without writing pages or clearing flags")]
    dry_run: bool,
    #[arg(long, value_name = "TEXT", help = "Edit summary for page writes")]
    summary: Option<String>,
}

#[derive(Debug, Args)]
struct UpdateAllArgs {
    target: String,
    #[arg(long, help = "Render and diff without writing pages or clearing flags")]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct PapersArgs {
    #[command(subcommand)]
    command: PapersSubcommand,
}

#[derive(Debug, Subcommand)]
enum PapersSubcommand {
    #[command(about = "Recompute references and citation counts of paper records")]
    Refresh(RefreshArgs),
}

#[derive(Debug, Args)]
struct RefreshArgs {
    #[arg(long, value_name = "NAME", help = "Paper table (defaults to [bibliography].table)")]
    table: Option<String>,
    #[arg(long, help = "Refresh every record, not only modified ones")]
    all: bool,
    #[arg(long, help = "Look up a missing DOI by title first")]
    resolve_doi: bool,
    #[arg(long, help = "Compute without writing back")]
    dry_run: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();
    init_logging(cli.verbose);

    let config_path = resolve_config_path(cli.config.as_deref());
    let config = load_config(&config_path)?;
    for problem in config.validate() {
        warn!("{problem}");
    }

    match cli.command {
        Commands::Run(args) => run_table(&config, args, cli.json),
        Commands::UpdateAll(args) => run_update_all(&config, args, cli.json),
        Commands::Papers(args) => match args.command {
            PapersSubcommand::Refresh(refresh) => run_papers_refresh(&config, refresh, cli.json),
        },
        Commands::Tables => run_tables(&config),
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_level(default_level)
        .parse_default_env()
        .init();
}

fn run_table(config: &AppConfig, args: RunArgs, json: bool) -> Result<()> {
    let Some(mut wiki) = wiki_client(config, &args.target)? else {
        return Ok(());
    };
    if config.table(&args.table).is_none() {
        println!(
            "table `{}` is not defined; publishing the generic dump layout",
            args.table
        );
    }
    let table = config.table_or_fallback(&args.table);
    let mut store = AirtableClient::new(AirtableClientConfig::from_config(config)?)?;
    let summary = args
        .summary
        .unwrap_or_else(|| target_summary(config, &args.target));
    let options = PublishOptions {
        mode: args.mode,
        resource: args.resource,
        dry_run: args.dry_run,
        page_write_ms: config.pacing.page_write_ms(),
        summary,
    };
    let report = run_publish(&mut store, &mut wiki, &table, &options)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_publish_report(&report);
    }
    Ok(())
}

fn run_update_all(config: &AppConfig, args: UpdateAllArgs, json: bool) -> Result<()> {
    let Some(mut wiki) = wiki_client(config, &args.target)? else {
        return Ok(());
    };
    let summary = target_summary(config, &args.target);
    let mut store = AirtableClient::new(AirtableClientConfig::from_config(config)?)?;
    let reports = update_all(&mut store, &mut wiki, config, args.dry_run, &summary)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
        return Ok(());
    }
    println!("update-all");
    println!("target: {}", args.target);
    println!("tables: {}", reports.len());
    for report in &reports {
        println!();
        print_publish_report(report);
    }
    Ok(())
}

fn run_papers_refresh(config: &AppConfig, args: RefreshArgs, json: bool) -> Result<()> {
    let Some(table_name) = args.table.or_else(|| config.bibliography.table.clone()) else {
        println!("no paper table given; pass --table or set [bibliography].table");
        return Ok(());
    };
    let Some(table) = config.table(&table_name) else {
        println!("table `{table_name}` is not defined");
        return Ok(());
    };
    let mut store = AirtableClient::new(AirtableClientConfig::from_config(config)?)?;
    let mut bibliography = CrossrefClient::new(CrossrefClientConfig::from_config(config))?;
    let options = RefreshOptions {
        all: args.all,
        resolve_doi: args.resolve_doi,
        dry_run: args.dry_run,
        paper_refresh_ms: config.pacing.paper_refresh_ms(),
    };
    let report = refresh_papers(&mut store, &mut bibliography, table, &options)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_refresh_report(&report);
    }
    Ok(())
}

fn run_tables(config: &AppConfig) -> Result<()> {
    println!("tables: {}", config.tables.len());
    for table in config.tables.values() {
        println!(
            "table.{}: source={} main_column={} table_page={} included_in={} namespace={}",
            table.name,
            table.source_table(),
            table.main_column.as_deref().unwrap_or("<none>"),
            table
                .embed
                .as_ref()
                .map(|region| region.page.as_str())
                .unwrap_or_else(|| table.table_page()),
            table.included_in.as_deref().unwrap_or("<none>"),
            table.namespace.as_deref().unwrap_or("<no pages>"),
        );
    }
    println!("targets: {}", config.target_names().join(", "));
    Ok(())
}

/// Client for a named target, or `None` after telling the user the target is unknown.
fn wiki_client(config: &AppConfig, target_name: &str) -> Result<Option<DokuWikiClient>> {
    let Some(target) = config.target(target_name) else {
        let known = config.target_names();
        println!(
            "unknown target `{target_name}`; choose from: {}",
            if known.is_empty() {
                "<none configured>".to_string()
            } else {
                known.join(", ")
            }
        );
        return Ok(None);
    };
    let client_config = DokuWikiClientConfig::from_target(target)
        .with_context(|| format!("failed to configure target {target_name}"))?;
    Ok(Some(DokuWikiClient::new(client_config)?))
}

fn target_summary(config: &AppConfig, target_name: &str) -> String {
    config
        .target(target_name)
        .map(|target| target.summary().to_string())
        .unwrap_or_default()
}

fn print_publish_report(report: &PublishReport) {
    println!("publish {}", report.table);
    if let Some(included_in) = &report.included_in {
        println!("included_in: {included_in}");
    }
    println!("mode: {}", report.mode);
    println!("resource: {}", report.resource);
    println!("dry_run: {}", report.dry_run);
    println!("records_fetched: {}", report.records_fetched);
    println!("records_dirty: {}", report.records_dirty);
    println!("flags_cleared: {}", report.flags_cleared);
    println!("pages_written: {}", report.written());
    for page in &report.pages {
        println!("page.{}: {}", page.page_id, page.action);
        if let Some(detail) = &page.detail {
            println!("{detail}");
        }
    }
    for note in &report.notes {
        println!("note: {note}");
    }
    if !report.diagnostics.is_empty() {
        println!("warnings:");
        for message in &report.diagnostics {
            println!("  - {message}");
        }
    }
    println!("request_count: {}", report.request_count);
}

fn print_refresh_report(report: &RefreshReport) {
    println!("papers refresh {}", report.table);
    println!("dry_run: {}", report.dry_run);
    println!("records_fetched: {}", report.records_fetched);
    println!("records_considered: {}", report.records_considered);
    println!("refreshed: {}", report.refreshed());
    println!("skipped: {}", report.skipped());
    println!("failed: {}", report.failed());
    for paper in &report.papers {
        println!(
            "paper.{}: {}{}",
            paper.record_id,
            paper.action,
            paper
                .parencite
                .as_deref()
                .map(|key| format!(" {key}"))
                .unwrap_or_default()
        );
        if let Some(detail) = &paper.detail {
            println!("  detail: {detail}");
        }
    }
    println!("request_count: {}", report.request_count);
}
