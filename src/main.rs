mod db;
mod error;
mod parser;
mod record;
mod scan;
mod settings;

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::parser::{analyze, reconstruct, validate};
use crate::settings::Settings;

#[derive(Parser)]
#[command(
    name = "sqldown",
    version,
    about = "Bidirectional markdown <-> SQLite conversion",
    long_about = "Load markdown files into SQLite, query with sqlite3, dump when needed."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load markdown files into a database table
    Load {
        /// Directory to scan
        root: PathBuf,
        /// Database file (default: .sqldown.db at the git root, else ./sqldown.db)
        #[arg(short, long)]
        db: Option<PathBuf>,
        /// Table name (default: derived from the directory name)
        #[arg(short, long)]
        table: Option<String>,
        /// File pattern relative to ROOT (default: **/*.md)
        #[arg(short, long)]
        pattern: Option<String>,
        /// Maximum allowed columns (default: 1800, SQLite limit: 2000)
        #[arg(long)]
        max_columns: Option<usize>,
        /// Keep only the N most common sections as columns (default: 20, 0 = all)
        #[arg(long)]
        top_sections: Option<usize>,
        #[arg(short, long)]
        verbose: bool,
    },
    /// Export database rows back to markdown files
    Dump {
        /// Database file
        #[arg(short, long)]
        db: Option<PathBuf>,
        /// Table name (default: docs)
        #[arg(short, long)]
        table: Option<String>,
        /// Output directory
        #[arg(short, long)]
        output: PathBuf,
        /// SQL WHERE clause to filter rows, e.g. "status='active'"
        #[arg(short, long = "filter")]
        filter: Option<String>,
        /// Always write files, even if unchanged
        #[arg(long)]
        force: bool,
        /// Show what would be written without touching the filesystem
        #[arg(long)]
        dry_run: bool,
        #[arg(short, long)]
        verbose: bool,
    },
    /// Show database or table information
    Info {
        /// Database file (default: the configured database)
        #[arg(short, long)]
        db: Option<PathBuf>,
        /// Show details for one table
        #[arg(short, long)]
        table: Option<String>,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let t0 = Instant::now();
    let cwd = std::env::current_dir().context("cannot determine working directory")?;

    // Settings first: a `.sqldown.env` may turn on verbose logging too.
    let markdown_dir = match &cli.command {
        Commands::Load { root, .. } => Some(root.as_path()),
        _ => None,
    };
    let cfg = settings::load_settings(&cwd, markdown_dir, None)?;
    init_tracing(verbose_requested(&cli.command, &cfg));

    let result = match cli.command {
        Commands::Load {
            root,
            db,
            table,
            pattern,
            max_columns,
            top_sections,
            verbose,
        } => {
            let opts = LoadOptions {
                db: db
                    .or_else(|| cfg.db.clone())
                    .unwrap_or_else(|| settings::default_database_path(&cwd)),
                table: table
                    .or_else(|| cfg.table.clone())
                    .unwrap_or_else(|| settings::infer_table_name(&root)),
                pattern: pattern.unwrap_or_else(|| cfg.pattern.clone()),
                max_columns: max_columns.unwrap_or(cfg.max_columns),
                top_sections: top_sections.unwrap_or(cfg.top_sections),
                warn_fraction: cfg.warn_fraction,
                verbose: verbose || cfg.verbose,
            };
            run_load(&root, &opts)
        }
        Commands::Dump {
            db,
            table,
            output,
            filter,
            force,
            dry_run,
            verbose,
        } => {
            let opts = DumpOptions {
                db: resolve_db(db, &cfg, &cwd),
                table: table
                    .or_else(|| cfg.table.clone())
                    .unwrap_or_else(|| "docs".to_string()),
                output,
                filter,
                force,
                dry_run,
                verbose: verbose || cfg.verbose,
            };
            run_dump(&opts)
        }
        Commands::Info { db, table } => {
            run_info(&resolve_db(db, &cfg, &cwd), table.as_deref())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

/// `--verbose` on the command line or `verbose` from the settings cascade.
fn verbose_requested(command: &Commands, cfg: &Settings) -> bool {
    let flag = match command {
        Commands::Load { verbose, .. } | Commands::Dump { verbose, .. } => *verbose,
        Commands::Info { .. } => false,
    };
    flag || cfg.verbose
}

fn resolve_db(flag: Option<PathBuf>, cfg: &Settings, cwd: &Path) -> PathBuf {
    flag.or_else(|| cfg.db.clone())
        .unwrap_or_else(|| settings::default_database_path(cwd))
}

// ── load ──

struct LoadOptions {
    db: PathBuf,
    table: String,
    pattern: String,
    max_columns: usize,
    top_sections: usize,
    warn_fraction: f64,
    verbose: bool,
}

fn run_load(root: &Path, opts: &LoadOptions) -> Result<()> {
    if !root.is_dir() {
        bail!("{} is not a directory", root.display());
    }
    if opts.verbose {
        println!("Scanning {} for {}", root.display(), opts.pattern);
        println!("Database: {}", opts.db.display());
        println!("Table: {}\n", opts.table);
    }

    let files = scan::find_files(root, &opts.pattern)?;
    if files.is_empty() {
        bail!("No markdown files found matching {} in {}", opts.pattern, root.display());
    }
    info!(files = files.len(), "scanning corpus");

    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    let reads: Vec<_> = files
        .par_iter()
        .map(|path| {
            let r = scan::read_source(root, path);
            pb.inc(1);
            r
        })
        .collect();
    pb.finish_and_clear();

    let mut sources = Vec::with_capacity(reads.len());
    for r in reads {
        match r {
            Ok(s) => sources.push(s),
            Err(e) => {
                warn!(error = %format!("{:#}", e), "skipping unreadable file");
                eprintln!("Error reading file: {:#}", e);
            }
        }
    }

    // Phase 1: parse everything, then fix the allow-list for the whole corpus.
    let (docs, failures) = parser::parse_all(&sources);
    for e in &failures {
        warn!(error = %e, "skipping file");
        eprintln!("Error processing {}", e);
    }

    let allow = if opts.top_sections > 0 {
        let allow = analyze::analyze(&docs, opts.top_sections);
        if opts.verbose && !allow.is_empty() {
            println!("Extracting top {} sections:", allow.len());
            for name in &allow {
                println!("  - {}", name);
            }
            println!();
        }
        Some(allow)
    } else {
        None
    };

    // Phase 2: flatten against the fixed allow-list.
    let flattened = parser::flatten_all(&docs, allow.as_ref());
    let mut filtered = 0;
    for f in &flattened {
        filtered += f.report.filtered.len();
        if !f.report.collisions.is_empty() {
            let path = f.record.text(record::PATH).unwrap_or_default();
            warn!(path, collisions = ?f.report.collisions, "sections share a column name; first kept");
        }
        if !f.report.case_clashes.is_empty() {
            let path = f.record.text(record::PATH).unwrap_or_default();
            warn!(path, keys = ?f.report.case_clashes, "frontmatter keys differ only by case; first kept");
        }
        if opts.verbose {
            for (key, column) in &f.report.renamed {
                debug!(key = %key, column = %column, "frontmatter key renamed");
            }
        }
    }
    if filtered > 0 {
        info!(sections = filtered, "sections left out by --top-sections");
    }
    let records: Vec<record::FlatRecord> = flattened.into_iter().map(|f| f.record).collect();

    // Pre-flight: nothing is written unless the whole batch fits.
    let report = validate::validate(&records, opts.max_columns);
    if opts.verbose {
        println!("Column breakdown:");
        println!("  - Base columns: {}", report.base);
        println!("  - Frontmatter columns: {}", report.frontmatter);
        println!("  - Section columns: {}", report.sections);
        println!("  - Total: {} (limit: {})\n", report.total, report.max);
    }
    if report.approaching_limit(opts.warn_fraction) {
        eprintln!("Warning: approaching column limit ({}/{})", report.total, report.max);
        eprintln!("   Consider reducing document diversity or increasing --max-columns\n");
    }
    let report = match report.check() {
        Ok(r) => r,
        Err(Error::SchemaLimitExceeded(r)) => {
            eprintln!("Column limit exceeded: {} columns > {} limit", r.total, r.max);
            eprintln!("   Base columns: {}", r.base);
            eprintln!("   Frontmatter columns: {}", r.frontmatter);
            eprintln!("   Section columns: {}", r.sections);
            eprintln!("\nOptions:");
            eprintln!("   1. Reduce document diversity (fewer unique H2 sections/frontmatter fields)");
            eprintln!("   2. Increase limit with --max-columns (SQLite max: 2000)");
            eprintln!("   3. Lower --top-sections or split into multiple databases by document type");
            return Err(Error::SchemaLimitExceeded(r).into());
        }
        Err(e) => return Err(e.into()),
    };
    debug!(total = report.total, "schema check passed");

    let conn = db::connect(&opts.db)?;
    db::ensure_columns(&conn, &opts.table, &validate::column_union(&records))?;
    let stats = db::upsert_records(&conn, &opts.table, &records)?;

    println!(
        "Imported {} of {} documents into {}:{} ({} new, {} updated)",
        stats.written(),
        records.len(),
        opts.db.display(),
        opts.table,
        stats.inserted,
        stats.updated
    );
    if stats.failed > 0 {
        eprintln!("{} documents failed to import", stats.failed);
    }
    println!("Schema has {} columns", db::columns(&conn, &opts.table)?.len());
    Ok(())
}

// ── dump ──

struct DumpOptions {
    db: PathBuf,
    table: String,
    output: PathBuf,
    filter: Option<String>,
    force: bool,
    dry_run: bool,
    verbose: bool,
}

#[derive(Debug, Default, PartialEq, Eq)]
struct DumpCounts {
    written: usize,
    skipped: usize,
    errors: usize,
}

/// Destination for a stored `_path`; refuses anything that would escape `output`.
fn output_path(output: &Path, rel: &str) -> Option<PathBuf> {
    let rel = Path::new(rel);
    let escapes = rel
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        None
    } else {
        Some(output.join(rel))
    }
}

fn run_dump(opts: &DumpOptions) -> Result<()> {
    if !opts.db.exists() {
        bail!("Database not found: {}", opts.db.display());
    }
    let conn = db::connect(&opts.db)?;
    if !db::table_exists(&conn, &opts.table)? {
        bail!("Table '{}' not found in database", opts.table);
    }

    if opts.verbose {
        println!("Exporting from {}:{}", opts.db.display(), opts.table);
        println!("Output directory: {}", opts.output.display());
        if let Some(f) = &opts.filter {
            println!("Filter: {}", f);
        }
        if opts.dry_run {
            println!("DRY RUN - no files will be written");
        }
        println!();
    }

    let rows = db::fetch_rows(&conn, &opts.table, opts.filter.as_deref())?;
    let counts = dump_rows(&rows, opts);

    if opts.dry_run {
        println!("Dry run: would write {} files", counts.written);
    } else {
        println!("Exported {} files to {}", counts.written, opts.output.display());
    }
    if counts.skipped > 0 {
        println!("Skipped {} files", counts.skipped);
    }
    if counts.errors > 0 {
        bail!("{} errors occurred", counts.errors);
    }
    Ok(())
}

fn dump_rows(rows: &[record::FlatRecord], opts: &DumpOptions) -> DumpCounts {
    let mut counts = DumpCounts::default();

    for row in rows {
        let markdown = match reconstruct::reconstruct(row) {
            Ok(md) => md,
            Err(e @ Error::MissingPath { .. }) => {
                if opts.verbose {
                    eprintln!("Skipping row: {}", e);
                }
                warn!(error = %e, "row skipped");
                counts.skipped += 1;
                continue;
            }
            Err(e) => {
                eprintln!("Error reconstructing: {}", e);
                counts.errors += 1;
                continue;
            }
        };

        let rel = row.text(record::PATH).unwrap_or_default();
        let Some(target) = output_path(&opts.output, rel) else {
            eprintln!("Refusing to write outside {}: {}", opts.output.display(), rel);
            counts.errors += 1;
            continue;
        };

        if opts.verbose {
            let status = if opts.dry_run { "would write" } else { "writing" };
            println!("{}: {}", status, rel);
        }
        if opts.dry_run {
            counts.written += 1;
            continue;
        }

        if !opts.force && fs::read_to_string(&target).is_ok_and(|existing| existing == markdown) {
            if opts.verbose {
                println!("  unchanged, skipping");
            }
            counts.skipped += 1;
            continue;
        }

        let write = target
            .parent()
            .map_or(Ok(()), fs::create_dir_all)
            .and_then(|_| fs::write(&target, &markdown));
        match write {
            Ok(()) => counts.written += 1,
            Err(e) => {
                eprintln!("Error writing {}: {}", target.display(), e);
                counts.errors += 1;
            }
        }
    }
    counts
}

// ── info ──

const SAMPLE_SIZE: usize = 10;

fn run_info(db_path: &Path, table: Option<&str>) -> Result<()> {
    if !db_path.exists() {
        bail!(
            "Database not found: {} (use -d to specify a database file)",
            db_path.display()
        );
    }
    let conn = db::connect(db_path)?;

    if let Some(table) = table {
        if !db::table_exists(&conn, table)? {
            bail!("Table '{}' not found in database", table);
        }
        let columns = db::columns(&conn, table)?;
        let count = db::row_count(&conn, table)?;
        let breakdown = db::column_breakdown(&columns);

        println!("\nTable: {}", table);
        println!("{}", "-".repeat(40));
        println!("Documents: {}", count);
        println!("Total columns: {}\n", columns.len());
        println!("Column breakdown:");
        println!("  - Core fields: {}", breakdown.core);
        println!("  - Frontmatter fields: {}", breakdown.frontmatter.len());
        println!("  - Section fields: {}", breakdown.sections.len());

        if !breakdown.frontmatter.is_empty() {
            println!("\nFrontmatter fields ({}):", breakdown.frontmatter.len());
            print_sample(&breakdown.frontmatter, |c| c.to_string());
        }
        if !breakdown.sections.is_empty() {
            println!("\nDocument sections ({}):", breakdown.sections.len());
            print_sample(&breakdown.sections, section_display_name);
        }
        return Ok(());
    }

    let size_mb = fs::metadata(db_path)?.len() as f64 / (1024.0 * 1024.0);
    let location = db_path.canonicalize().unwrap_or_else(|_| db_path.to_path_buf());
    let tables = db::table_names(&conn)?;
    let name = db_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    println!("\nDatabase: {}", name);
    println!("{}", "-".repeat(40));
    println!("Location: {}", location.display());
    println!("Size: {:.1} MB", size_mb);
    println!("Tables: {}\n", tables.len());

    if tables.is_empty() {
        println!("  (no tables)");
    } else {
        println!("Tables:");
        let mut total_rows = 0;
        for t in &tables {
            let count = db::row_count(&conn, t)?;
            let columns = db::columns(&conn, t)?;
            let breakdown = db::column_breakdown(&columns);
            total_rows += count;
            println!("  {}", t);
            println!("     - {} documents", count);
            println!(
                "     - {} columns ({} frontmatter, {} sections)",
                columns.len(),
                breakdown.frontmatter.len(),
                breakdown.sections.len()
            );
        }
        if tables.len() > 1 {
            println!("\nTotal: {} documents across all tables", total_rows);
        }
    }

    println!("\nTips:");
    println!("  - Query with: sqlite3 {} \"SELECT * FROM table LIMIT 5\"", name);
    println!("  - Show schema: sqlite3 {} \".schema table\"", name);
    println!("  - Table details: sqldown info -t <table>");
    Ok(())
}

fn print_sample(names: &[String], display: impl Fn(&str) -> String) {
    let mut sample: Vec<String> = names.iter().take(SAMPLE_SIZE).map(|n| display(n)).collect();
    sample.sort();
    for s in &sample {
        println!("  - {}", s);
    }
    if names.len() > SAMPLE_SIZE {
        println!("  ... and {} more", names.len() - SAMPLE_SIZE);
    }
}

/// `section_next_steps` → `Next Steps`.
fn section_display_name(column: &str) -> String {
    column
        .strip_prefix(record::SECTION_PREFIX)
        .unwrap_or(column)
        .split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

// ── Tests ──
