//! `mathnb`: check, repair and summarize notebook documents

use anyhow::{bail, Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use mathnb_core::telemetry::init_tracing;
use mathnb_core::{NotebookConfig, NotebookRegistry};
use mathnb_store::Notebook;
use mathnb_symbol::{current_links, recompute_all};
use std::collections::BTreeMap;
use std::path::PathBuf;

fn file_arg() -> Arg {
    Arg::new("file")
        .required(true)
        .value_parser(value_parser!(PathBuf))
        .help("Notebook document (JSON)")
}

fn cli() -> Command {
    Command::new("mathnb")
        .version(mathnb_core::VERSION)
        .about("Inspect and repair MathNB notebook documents")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("TOML configuration file"),
        )
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON"),
        )
        .subcommand(
            Command::new("check")
                .about("Validate a document and compare its derived relationships with a full recompute")
                .arg(file_arg()),
        )
        .subcommand(
            Command::new("recompute")
                .about("Re-derive symbols and relationships and write the repaired document")
                .arg(file_arg())
                .arg(
                    Arg::new("output")
                        .long("output")
                        .short('o')
                        .value_parser(value_parser!(PathBuf))
                        .help("Write here instead of stdout"),
                ),
        )
        .subcommand(
            Command::new("stats")
                .about("Summarize a document")
                .arg(file_arg())
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Output as JSON"),
                ),
        )
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();
    init_tracing("warn", matches.get_flag("log-json"));

    let config = match matches.get_one::<PathBuf>("config") {
        Some(path) => NotebookConfig::load(path)?,
        None => NotebookConfig::default(),
    };

    match matches.subcommand() {
        Some(("check", args)) => check(args),
        Some(("recompute", args)) => recompute(args, config).await,
        Some(("stats", args)) => stats(args),
        _ => bail!("unknown command"),
    }
}

fn read_document(args: &ArgMatches) -> Result<(PathBuf, String)> {
    let Some(path) = args.get_one::<PathBuf>("file") else {
        bail!("missing document path");
    };
    let json = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    Ok((path.clone(), json))
}

fn load(args: &ArgMatches) -> Result<Notebook> {
    let (path, json) = read_document(args)?;
    Notebook::from_json(&json).with_context(|| format!("loading {}", path.display()))
}

fn check(args: &ArgMatches) -> Result<()> {
    let notebook = load(args)?;
    let stored = current_links(&notebook);
    let expected = recompute_all(&notebook);

    let missing = expected.difference(&stored).count();
    let stray = stored.difference(&expected).count();
    if missing + stray > 0 {
        bail!("derived relationships out of date: {missing} missing, {stray} stray; run `mathnb recompute`");
    }
    println!(
        "ok: {} nodes, {} derived relationships",
        notebook.node_count(),
        stored.len()
    );
    Ok(())
}

async fn recompute(args: &ArgMatches, config: NotebookConfig) -> Result<()> {
    let (path, json) = read_document(args)?;
    let name = path.display().to_string();

    let registry = NotebookRegistry::new(config);
    let session = registry
        .open_document(&name, &json)
        .with_context(|| format!("loading {name}"))?;
    let response = session.rederive()?;
    session.settled().await;
    tracing::info!(notebook = %name, events = response.events.len(), "recomputed");

    let repaired = session.to_json()?;
    registry.close(&name);
    match args.get_one::<PathBuf>("output") {
        Some(output) => {
            std::fs::write(output, repaired).with_context(|| format!("writing {}", output.display()))?;
            eprintln!("{} changes written to {}", response.events.len(), output.display());
        }
        None => println!("{repaired}"),
    }
    Ok(())
}

fn stats(args: &ArgMatches) -> Result<()> {
    let notebook = load(args)?;
    let mut roles: BTreeMap<String, usize> = BTreeMap::new();
    for node in notebook.nodes() {
        *roles.entry(node.role.to_string()).or_default() += 1;
    }
    let mut relationships: BTreeMap<String, usize> = BTreeMap::new();
    for relationship in notebook.relationships() {
        *relationships.entry(relationship.role.to_string()).or_default() += 1;
    }

    if args.get_flag("json") {
        let report = serde_json::json!({
            "nodes": notebook.node_count(),
            "topLevel": notebook.top_level_order().len(),
            "nextId": notebook.next_id(),
            "roles": roles,
            "relationships": relationships,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Notebook Stats:");
    println!("  Nodes: {}", notebook.node_count());
    println!("  Top-level: {}", notebook.top_level_order().len());
    println!("  Next id: {}", notebook.next_id());
    for (role, count) in &roles {
        println!("  {role}: {count}");
    }
    println!("Relationships:");
    for (role, count) in &relationships {
        println!("  {role}: {count}");
    }
    Ok(())
}
