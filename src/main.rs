//! dupsweep - rule-driven cleanup of redundant backup copies.
//!
//! Usage:
//!   dupsweep scan PATH --uuid UUID     Ingest a volume into the catalog
//!   dupsweep resolve --policy FILE     Decide what is redundant
//!   dupsweep resolve --policy FILE --apply
//!   dupsweep stats                     Catalog summary and content copies
//!   dupsweep gc                        Drop unreferenced content records
//!   dupsweep remove-disk UUID          Forget a disk and its files
//!   dupsweep export [-o FILE]          Dump the catalog as JSON
//!   dupsweep --help                    Show help

mod logging;

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{Context, Result, bail, eyre};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;

use dupsweep_core::{Catalog, CatalogConfig, ContentTypes, DiskId};
use dupsweep_db::CatalogDb;
use dupsweep_rules::{
    ApplyReport, ConditionalVeto, Decision, DecisionCounts, Policy, Resolver, ResolverConfig,
    Verdict, apply, reclaimable_bytes,
};
use dupsweep_scan::{IngestConfig, Ingestor};

#[derive(Parser)]
#[command(
    name = "dupsweep",
    version,
    about = "Rule-driven cleanup of redundant backup copies",
    long_about = "dupsweep catalogues the contents of backup disks and decides, from an \
                  ordered rule policy, which directories and files are redundant copies.\n\n\
                  Scan each disk once with `dupsweep scan`, then run `dupsweep resolve`."
)]
struct Cli {
    /// Catalog database
    #[arg(long, global = true, default_value = "dupsweep.db")]
    db: PathBuf,

    /// Increase log verbosity (-v, -vv, -vvv). RUST_LOG overrides.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest a mounted volume into the catalog
    Scan(ScanArgs),

    /// Evaluate a policy against the catalog
    Resolve(ResolveArgs),

    /// Show catalog statistics and the largest content copies
    Stats {
        /// Number of content groups to show
        #[arg(short = 'n', long, default_value = "10")]
        top: usize,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Remove content records no file links to
    Gc,

    /// Forget a disk and every file catalogued on it
    RemoveDisk {
        /// Volume identifier of the disk
        uuid: String,

        /// Keep content records that no other disk references
        #[arg(long)]
        keep_orphans: bool,
    },

    /// Export the catalog to JSON
    Export {
        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Args)]
struct ScanArgs {
    /// Root of the volume
    path: PathBuf,

    /// Volume identifier (usually the filesystem UUID)
    #[arg(long)]
    uuid: String,

    /// Human label (defaults to the stored label or the directory name)
    #[arg(long)]
    label: Option<String>,

    /// Volume capacity in bytes
    #[arg(long)]
    capacity: Option<u64>,

    /// Policy file whose content types classify a new catalog
    #[arg(long)]
    policy: Option<PathBuf>,

    /// Hashing threads (0 = one per core)
    #[arg(short = 'j', long, default_value = "0")]
    threads: usize,

    /// Entry names to leave out (repeatable)
    #[arg(long = "ignore")]
    ignore: Vec<String>,

    /// Skip hidden entries
    #[arg(long)]
    no_hidden: bool,

    /// Keep catalogued entries that are gone from the volume
    #[arg(long)]
    no_prune: bool,

    /// Recompute digests read at or before this RFC 3339 instant
    #[arg(long)]
    rehash_before: Option<String>,

    /// Keep unreferenced content records until `gc`
    #[arg(long)]
    keep_orphans: bool,
}

#[derive(Args)]
struct ResolveArgs {
    /// Policy file (YAML, or JSON by extension)
    #[arg(short, long)]
    policy: PathBuf,

    /// Restrict resolution to these disk UUIDs (repeatable)
    #[arg(long = "disk")]
    disks: Vec<String>,

    /// Remove condemned subtrees from the catalog
    #[arg(long)]
    apply: bool,

    /// Whether a later skip overturns an earlier latest/earliest delete
    #[arg(long, default_value = "final")]
    veto: VetoArg,

    /// Same-files deletes also require identical content
    #[arg(long)]
    identical_content: bool,

    /// Evaluate on the calling thread only
    #[arg(long)]
    sequential: bool,

    /// List keep and skip decisions too
    #[arg(short, long)]
    all: bool,

    /// Output format
    #[arg(short, long, default_value = "text")]
    format: OutputFormat,
}

#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum VetoArg {
    Final,
    LaterSkip,
}

impl From<VetoArg> for ConditionalVeto {
    fn from(arg: VetoArg) -> Self {
        match arg {
            VetoArg::Final => ConditionalVeto::Final,
            VetoArg::LaterSkip => ConditionalVeto::LaterSkip,
        }
    }
}

fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    logging::init_logger(cli.verbose);

    match cli.command {
        Command::Scan(args) => run_scan(&cli.db, args)?,
        Command::Resolve(args) => run_resolve(&cli.db, args)?,
        Command::Stats { top, format } => run_stats(&cli.db, top, format)?,
        Command::Gc => run_gc(&cli.db)?,
        Command::RemoveDisk { uuid, keep_orphans } => {
            run_remove_disk(&cli.db, &uuid, keep_orphans)?
        }
        Command::Export { output } => run_export(&cli.db, output)?,
    }

    Ok(())
}

/// Open the database and load its catalog, or start an empty one.
fn open_catalog(
    path: &Path,
    config: CatalogConfig,
    types: Option<ContentTypes>,
) -> Result<(CatalogDb, Catalog)> {
    let db = CatalogDb::open(path)
        .wrap_err_with(|| format!("Failed to open catalog database {}", path.display()))?;
    let catalog = if db.is_empty()? {
        Catalog::new(config, types.unwrap_or_default())
    } else {
        if types.is_some() {
            tracing::warn!("catalog exists; content types from the policy are ignored");
        }
        db.load(config).wrap_err("Failed to load catalog")?
    };
    Ok((db, catalog))
}

/// Load an existing catalog; an empty database is an error.
fn load_catalog(path: &Path, config: CatalogConfig) -> Result<(CatalogDb, Catalog)> {
    if !path.exists() {
        bail!("No catalog at {}; run `dupsweep scan` first", path.display());
    }
    let (db, catalog) = open_catalog(path, config, None)?;
    if catalog.disks().next().is_none() {
        bail!("Catalog {} is empty; run `dupsweep scan` first", path.display());
    }
    Ok((db, catalog))
}

/// Ingest one volume and save the catalog.
fn run_scan(db_path: &Path, args: ScanArgs) -> Result<()> {
    let root = args.path.canonicalize().context("Invalid path")?;
    let policy = args
        .policy
        .as_deref()
        .map(Policy::load)
        .transpose()
        .wrap_err("Failed to load policy")?;
    let rehash_before = args
        .rehash_before
        .as_deref()
        .map(|s| DateTime::parse_from_rfc3339(s).map(|t| t.with_timezone(&Utc)))
        .transpose()
        .wrap_err("Invalid --rehash-before timestamp")?;

    let config = CatalogConfig::builder()
        .rehash_before(rehash_before)
        .eager_orphan_removal(!args.keep_orphans)
        .build()?;
    let (mut db, mut catalog) = open_catalog(db_path, config, policy.map(|p| p.content_types))?;

    let known = catalog.disks().find(|d| d.uuid == args.uuid);
    let capacity = args
        .capacity
        .or_else(|| known.map(|d| d.capacity))
        .unwrap_or(0);
    let label = args
        .label
        .or_else(|| known.map(|d| d.label.to_string()))
        .or_else(|| root.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_default();
    let disk = catalog.register_disk(args.uuid.as_str(), capacity, label.as_str());

    let ingest_config = IngestConfig::builder()
        .root(root.clone())
        .threads(args.threads)
        .ignore_names(args.ignore)
        .include_hidden(!args.no_hidden)
        .prune_missing(!args.no_prune)
        .build()
        .map_err(|e| eyre!("Invalid scan options: {e}"))?;

    eprintln!("Scanning {} as '{}'...", root.display(), label);

    let ingestor = Ingestor::new();
    let mut progress_rx = ingestor.subscribe();
    let reporter = std::thread::spawn(move || {
        loop {
            match progress_rx.blocking_recv() {
                Ok(progress) => eprint!(
                    "\r {} files, {} hashed ({}/s)   ",
                    progress.files_committed(),
                    format_size(progress.bytes_hashed),
                    format_size(progress.bytes_per_second() as u64)
                ),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    });

    let result = ingestor.ingest(&mut catalog, disk, &ingest_config);
    drop(ingestor);
    let _ = reporter.join();
    eprintln!();
    let report = result.wrap_err("Scan failed")?;

    db.save(&catalog).wrap_err("Failed to save catalog")?;

    println!();
    println!("{}", "─".repeat(60));
    println!(" {} - {}", label, root.display());
    println!(
        " {} files, {} directories",
        report.files, report.directories
    );
    println!(
        " {} hashed ({}), {} reused from cache",
        report.hashed,
        format_size(report.bytes_hashed),
        report.cached
    );
    if report.pruned.nodes_removed > 0 {
        println!(
            " {} vanished entries pruned ({} files)",
            report.pruned.nodes_removed, report.pruned.files_removed
        );
    }
    println!(" Scanned in {:.2}s", report.duration.as_secs_f64());
    println!("{}", "─".repeat(60));

    if !report.warnings.is_empty() {
        println!();
        println!("{} warning(s) during scan", report.warnings.len());
        for warning in report.warnings.iter().take(20) {
            println!("   {}: {}", warning.path.display(), warning.message);
        }
    }

    Ok(())
}

#[derive(Serialize)]
struct ResolveOutput<'a> {
    counts: DecisionCounts,
    reclaimable_bytes: u64,
    decisions: Vec<&'a Decision>,
    #[serde(skip_serializing_if = "Option::is_none")]
    applied: Option<ApplyReport>,
}

/// Resolve the catalog against a policy, optionally applying deletions.
fn run_resolve(db_path: &Path, args: ResolveArgs) -> Result<()> {
    let policy = Policy::load(&args.policy)
        .wrap_err_with(|| format!("Failed to load policy {}", args.policy.display()))?;
    let (mut db, mut catalog) = load_catalog(db_path, CatalogConfig::default())?;

    let disks = args
        .disks
        .iter()
        .map(|uuid| {
            catalog
                .disks()
                .find(|d| d.uuid == uuid.as_str())
                .map(|d| d.id)
                .ok_or_else(|| eyre!("Unknown disk {uuid}"))
        })
        .collect::<Result<Vec<DiskId>>>()?;

    let config = ResolverConfig::builder()
        .conditional_veto(ConditionalVeto::from(args.veto))
        .parallel(!args.sequential)
        .require_identical_content(args.identical_content)
        .build()?;
    let resolver = Resolver::new(policy.rules, config);

    let decisions = if disks.is_empty() {
        resolver.resolve(&catalog)
    } else {
        resolver.resolve_disks(&catalog, &disks)
    }
    .wrap_err("Resolution failed")?;
    let reclaimable = reclaimable_bytes(&catalog, &decisions);
    let counts = decisions.counts();

    let listed: Vec<&Decision> = decisions
        .iter()
        .filter(|d| args.all || d.verdict == Verdict::Delete)
        .collect();

    match args.format {
        OutputFormat::Text => {
            println!();
            println!("{}", "─".repeat(70));
            println!(" Resolution Report");
            println!("{}", "─".repeat(70));
            println!();
            println!(
                " {} delete, {} keep, {} skip",
                counts.delete, counts.keep, counts.skip
            );
            println!(" Reclaimable: {}", format_size(reclaimable));
            println!();

            for decision in &listed {
                let disk = catalog
                    .disk(decision.disk)
                    .map(|d| d.label.as_str())
                    .unwrap_or("?");
                println!(
                    "   {:<6} {}:{}  [{}]",
                    decision.verdict, disk, decision.path, decision.rule
                );
            }
        }
        OutputFormat::Json => {}
    }

    let applied = if args.apply {
        let report = apply(&mut catalog, &decisions).wrap_err("Failed to apply decisions")?;
        db.save(&catalog).wrap_err("Failed to save catalog")?;
        Some(report)
    } else {
        None
    };

    match args.format {
        OutputFormat::Text => {
            if let Some(report) = applied {
                println!();
                println!(
                    " Applied {} deletions ({} files, {}), {} stale",
                    report.applied,
                    report.removed.files_removed,
                    format_size(report.removed.bytes_removed),
                    report.stale
                );
            }
        }
        OutputFormat::Json => {
            let output = ResolveOutput {
                counts,
                reclaimable_bytes: reclaimable,
                decisions: listed,
                applied,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// Print catalog statistics.
fn run_stats(db_path: &Path, top_n: usize, format: OutputFormat) -> Result<()> {
    let (_db, catalog) = load_catalog(db_path, CatalogConfig::default())?;
    let stats = catalog.stats();
    let groups = catalog.content_groups();
    let folders = catalog.directory_groups();

    match format {
        OutputFormat::Text => {
            println!();
            println!("{}", "─".repeat(70));
            println!(" Catalog {}", db_path.display());
            println!("{}", "─".repeat(70));
            for disk in catalog.disks() {
                println!(
                    "   {:<24} {} ({})",
                    disk.label,
                    disk.uuid,
                    format_size(disk.capacity)
                );
            }
            println!();
            println!(
                " {} files, {} directories, {} content records ({} orphaned)",
                stats.files, stats.directories, stats.content_records, stats.orphan_records
            );
            println!(
                " {} catalogued, {} unique",
                format_size(stats.total_bytes),
                format_size(stats.unique_bytes)
            );
            println!();

            if groups.is_empty() {
                println!(" No content stored more than once.");
            } else {
                let wasted: u64 = groups.iter().map(|g| g.wasted_bytes()).sum();
                println!(
                    " {} contents stored more than once, {} in extra copies",
                    groups.len(),
                    format_size(wasted)
                );
                println!();
                for group in groups.iter().take(top_n) {
                    println!(
                        " {} ({} copies, {} each)",
                        group.digest.short(),
                        group.nodes.len(),
                        format_size(group.size)
                    );
                    for node in &group.nodes {
                        let disk = catalog
                            .node(*node)
                            .and_then(|n| catalog.disk(n.disk))
                            .map(|d| d.label.as_str())
                            .unwrap_or("?");
                        println!("   {}:{}", disk, catalog.path_of(*node)?);
                    }
                }
            }

            if !folders.is_empty() {
                println!();
                println!(" {} sets of folders with identical files", folders.len());
                println!();
                for group in folders.iter().take(top_n) {
                    println!(
                        " {} files, {} per folder",
                        group.contents.len(),
                        format_size(group.size)
                    );
                    for dir in &group.directories {
                        let disk = catalog
                            .node(*dir)
                            .and_then(|n| catalog.disk(n.disk))
                            .map(|d| d.label.as_str())
                            .unwrap_or("?");
                        println!("   {}:{}/", disk, catalog.path_of(*dir)?);
                    }
                }
            }
        }
        OutputFormat::Json => {
            #[derive(Serialize)]
            struct StatsOutput<'a> {
                stats: dupsweep_core::CatalogStats,
                groups: &'a [dupsweep_core::ContentGroup],
                folders: &'a [dupsweep_core::DirectoryGroup],
            }
            println!(
                "{}",
                serde_json::to_string_pretty(&StatsOutput {
                    stats,
                    groups: &groups[..groups.len().min(top_n)],
                    folders: &folders[..folders.len().min(top_n)],
                })?
            );
        }
    }

    Ok(())
}

/// Collect orphaned content records and verify the catalog.
fn run_gc(db_path: &Path) -> Result<()> {
    let (mut db, mut catalog) = load_catalog(db_path, CatalogConfig::default())?;
    let removed = catalog.collect_orphans();
    catalog
        .check_integrity()
        .wrap_err("Catalog failed the integrity check")?;
    db.save(&catalog).wrap_err("Failed to save catalog")?;
    println!("Removed {removed} unreferenced content record(s)");
    Ok(())
}

/// Remove one disk from the catalog.
fn run_remove_disk(db_path: &Path, uuid: &str, keep_orphans: bool) -> Result<()> {
    let config = CatalogConfig::builder()
        .eager_orphan_removal(!keep_orphans)
        .build()?;
    let (mut db, mut catalog) = load_catalog(db_path, config)?;
    let disk = catalog
        .disks()
        .find(|d| d.uuid == uuid)
        .map(|d| (d.id, d.label.to_string()))
        .ok_or_else(|| eyre!("Unknown disk {uuid}"))?;

    let summary = catalog
        .remove_disk(disk.0)
        .wrap_err_with(|| format!("Failed to remove disk {uuid}"))?;
    db.save(&catalog).wrap_err("Failed to save catalog")?;

    println!(
        "Removed '{}': {} files ({}), {} content record(s) dropped",
        disk.1,
        summary.files_removed,
        format_size(summary.bytes_removed),
        summary.content_removed
    );
    Ok(())
}

/// Export the catalog to JSON.
fn run_export(db_path: &Path, output: Option<PathBuf>) -> Result<()> {
    let (_db, catalog) = load_catalog(db_path, CatalogConfig::default())?;
    let json = serde_json::to_string_pretty(&catalog.snapshot())?;

    match output {
        Some(output_path) => {
            std::fs::write(&output_path, json)?;
            eprintln!("Exported to {}", output_path.display());
        }
        None => {
            println!("{}", json);
        }
    }

    Ok(())
}

/// Format size in human-readable form.
fn format_size(bytes: u64) -> String {
    humansize::format_size(bytes, humansize::BINARY)
}
