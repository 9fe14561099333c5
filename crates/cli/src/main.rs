use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use clap::{Args, Parser, Subcommand, ValueEnum};
use exif_renamer_core::{
    app_paths, collect_media_files, load_config, save_undo_log, spawn_rename, undo_from_provenance,
    undo_last, AppConfig, ExifReaderProvider, ExifToolProvider, MetadataProvider, PlannedRename,
    ProvenanceLedger, RenameConfig, RenameEngine, RenameEvent, RenameNote, RenameResult,
    ScanStats, TimestampOptions, UndoLog,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "exif-renamer")]
#[command(about = "Rename photos and videos by capture date with per-day counters")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    Rename(RenameArgs),
    Undo(UndoArgs),
    Config(ConfigArgs),
}

#[derive(Debug, Args)]
struct ConfigArgs {
    #[command(subcommand)]
    action: ConfigAction,
}

#[derive(Debug, Subcommand)]
enum ConfigAction {
    Show,
}

#[derive(Debug, Args)]
struct RenameArgs {
    /// Files or directories to rename.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
    #[arg(long, default_value_t = false)]
    recursive: bool,
    #[arg(long, default_value_t = false)]
    include_hidden: bool,
    #[arg(long)]
    prefix: Option<String>,
    #[arg(long)]
    additional: Option<String>,
    /// Comma separated component order, e.g. `Date,Prefix,Camera,Counter`.
    #[arg(long, value_delimiter = ',')]
    order: Option<Vec<String>>,
    #[arg(long)]
    separator: Option<String>,
    #[arg(long)]
    date_format: Option<String>,
    #[arg(long, default_value_t = false)]
    no_date: bool,
    #[arg(long, default_value_t = false)]
    camera: bool,
    #[arg(long, default_value_t = false)]
    lens: bool,
    /// Extra metadata fields: iso, aperture, shutter, focal_length, resolution, exposure_bias.
    #[arg(long, value_delimiter = ',')]
    meta: Vec<String>,
    #[arg(long, default_value_t = false)]
    continuous: bool,
    /// Filesystem times to set to the capture time.
    #[arg(long, value_enum, value_delimiter = ',')]
    sync_timestamps: Vec<TimeField>,
    /// Use this time instead of each file's capture time (`YYYY-MM-DD HH:MM:SS`).
    #[arg(long, requires = "sync_timestamps")]
    custom_time: Option<String>,
    /// Synchronise timestamps without renaming.
    #[arg(long, default_value_t = false, requires = "sync_timestamps")]
    leave_names: bool,
    #[arg(long, default_value_t = false)]
    no_provenance: bool,
    #[command(flatten)]
    provider: ProviderArgs,
    #[arg(long, default_value_t = false)]
    apply: bool,
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    output: OutputFormat,
}

#[derive(Debug, Args)]
struct UndoArgs {
    /// Restore from the names stored inside these files instead of the undo log.
    #[arg(long, num_args = 1..)]
    from_metadata: Vec<PathBuf>,
    #[arg(long, default_value_t = false)]
    recursive: bool,
    #[command(flatten)]
    provider: ProviderArgs,
}

#[derive(Debug, Args)]
struct ProviderArgs {
    #[arg(long, value_enum, default_value_t = ProviderKind::Exiftool)]
    provider: ProviderKind,
    /// Path to the exiftool executable.
    #[arg(long)]
    exiftool: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ProviderKind {
    Exiftool,
    Native,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum TimeField {
    Creation,
    Modification,
    Access,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Rename(args) => cmd_rename(args),
        Commands::Undo(args) => cmd_undo(args),
        Commands::Config(config) => match config.action {
            ConfigAction::Show => cmd_config_show(),
        },
    }
}

fn build_provider(args: &ProviderArgs, config: &AppConfig) -> Result<Arc<dyn MetadataProvider>> {
    match args.provider {
        ProviderKind::Native => Ok(Arc::new(ExifReaderProvider)),
        ProviderKind::Exiftool => {
            let executable = args
                .exiftool
                .clone()
                .or_else(|| config.exiftool_path.clone())
                .or_else(ExifToolProvider::locate)
                .context("exiftool was not found on PATH; pass --exiftool or use --provider native")?;
            debug!(executable = %executable.display(), "using exiftool");
            Ok(Arc::new(
                ExifToolProvider::new(executable)
                    .with_timeout(Duration::from_secs(config.provider_timeout_secs.max(1)))
                    .with_write_timeout(Duration::from_secs(config.write_timeout_secs.max(1))),
            ))
        }
    }
}

fn rename_config(args: &RenameArgs, config: &AppConfig) -> Result<RenameConfig> {
    let mut options = config.rename.clone();
    if let Some(prefix) = &args.prefix {
        options.prefix = prefix.clone();
    }
    if let Some(additional) = &args.additional {
        options.additional = additional.clone();
    }
    if let Some(order) = &args.order {
        options.order = order.clone();
    }
    if let Some(separator) = &args.separator {
        options.separator = separator.clone();
    }
    if let Some(date_format) = &args.date_format {
        options.date_format = date_format.clone();
    }
    if args.no_date {
        options.use_date = false;
    }
    options.use_camera |= args.camera;
    options.use_lens |= args.lens;
    if !args.meta.is_empty() {
        options.meta_fields = args.meta.clone();
    }
    options.continuous_counter |= args.continuous;
    if args.no_provenance {
        options.write_provenance = false;
    }
    if !args.sync_timestamps.is_empty() {
        let custom = args
            .custom_time
            .as_deref()
            .map(|raw| {
                NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
                    .with_context(|| format!("invalid --custom-time: {}", raw))
            })
            .transpose()?;
        options.timestamps = Some(TimestampOptions {
            creation: args.sync_timestamps.contains(&TimeField::Creation),
            modification: args.sync_timestamps.contains(&TimeField::Modification),
            access: args.sync_timestamps.contains(&TimeField::Access),
            custom,
            leave_names: args.leave_names,
        });
    }
    Ok(RenameConfig::new(options)?)
}

fn cmd_rename(args: RenameArgs) -> Result<()> {
    let app_config = load_config()?;
    let config = rename_config(&args, &app_config)?;
    let provider = build_provider(&args.provider, &app_config)?;

    let mut stats = ScanStats::default();
    let files = collect_media_files(
        &args.inputs,
        args.recursive || app_config.recursive_default,
        args.include_hidden || app_config.include_hidden_default,
        &mut stats,
    )?;
    info!(files = files.len(), "collected media files");

    let engine = Arc::new(RenameEngine::new(provider));

    if !args.apply {
        let plan = engine.preview(&files, &config)?;
        match args.output {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&plan)?),
            OutputFormat::Table => print_plan(&plan, &stats),
        }
        eprintln!("Dry run: no files were changed. Pass --apply to rename.");
        return Ok(());
    }

    let task = spawn_rename(engine, files, config);
    let mut outcome = None;
    for event in task.events.iter() {
        match event {
            RenameEvent::Progress(progress) => {
                if let Some(file) = &progress.current_file {
                    eprint!(
                        "\r[{}/{}] {}",
                        progress.groups_completed + 1,
                        progress.groups_total,
                        file.display()
                    );
                }
            }
            RenameEvent::Complete(result) => {
                eprintln!();
                outcome = Some(result);
                break;
            }
        }
    }
    let result = outcome.context("rename worker stopped without reporting a result")??;

    let undoable = result.operations.iter().any(|op| !op.unchanged);
    if undoable || !result.timestamp_backup.is_empty() {
        let paths = app_paths()?;
        let log = UndoLog::new(result.operations.clone(), result.timestamp_backup.clone());
        save_undo_log(&paths.undo_path, &log)?;
        debug!(path = %paths.undo_path.display(), "undo log saved");
    }

    match args.output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        OutputFormat::Table => print_result(&result, &stats),
    }
    Ok(())
}

fn cmd_undo(args: UndoArgs) -> Result<()> {
    let app_config = load_config()?;

    if !args.from_metadata.is_empty() {
        let provider = build_provider(&args.provider, &app_config)?;
        let ledger = ProvenanceLedger::new(provider);
        let mut stats = ScanStats::default();
        let files = collect_media_files(&args.from_metadata, args.recursive, false, &mut stats)?;
        let result = undo_from_provenance(&files, &ledger);
        println!(
            "Restored {} file(s), {} without a stored name, {} error(s)",
            result.restored.len(),
            result.skipped.len(),
            result.errors.len()
        );
        for error in &result.errors {
            eprintln!("  {}: {}", error.file_name(), error.message);
        }
        return Ok(());
    }

    // Clearing stored names is best effort; undo works without a writer.
    let ledger = build_provider(&args.provider, &app_config)
        .ok()
        .filter(|p| p.supports_writing())
        .map(ProvenanceLedger::new);
    let paths = app_paths()?;
    let outcome = undo_last(&paths.undo_path, ledger.as_ref())?;
    println!(
        "Restored {} file(s), {} timestamp(s)",
        outcome.renames.restored.len(),
        outcome.timestamps_restored
    );
    for error in outcome.renames.errors.iter().chain(&outcome.timestamp_errors) {
        eprintln!("  {}: {}", error.file_name(), error.message);
    }
    Ok(())
}

fn cmd_config_show() -> Result<()> {
    let config = load_config()?;
    let paths = app_paths()?;
    println!("Config file: {}", paths.config_path.display());
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

fn print_plan(plan: &[PlannedRename], stats: &ScanStats) {
    println!("original -> new");
    for op in plan {
        let marker = match op.collision_suffix {
            Some(n) => format!(" (suffix {})", n),
            None if op.unchanged => " (unchanged)".to_string(),
            None => String::new(),
        };
        println!("{} -> {}{}", op.from.display(), op.to.display(), marker);
    }
    print_stats(stats);
}

fn print_result(result: &RenameResult, stats: &ScanStats) {
    let suffixed = result
        .notes
        .iter()
        .filter(|n| matches!(n, RenameNote::CollisionResolved { .. }))
        .count();
    for note in &result.notes {
        match note {
            RenameNote::CollisionResolved {
                original,
                requested,
                actual,
                ..
            } => println!(
                "{}: {} was taken, used {}",
                original.display(),
                requested,
                actual.display()
            ),
            RenameNote::NameShortened { original, actual } => {
                println!("{}: shortened to {}", original.display(), actual.display())
            }
        }
    }
    for error in result.errors.iter().chain(&result.provenance_errors) {
        eprintln!("error: {}: {}", error.file_name(), error.message);
    }
    println!(
        "\nrenamed={} (suffixed {}) unchanged={} errors={} provenance_errors={}{}",
        result.renamed.len(),
        suffixed,
        result.unchanged.len(),
        result.errors.len(),
        result.provenance_errors.len(),
        if result.cancelled { " cancelled" } else { "" }
    );
    print_stats(stats);
}

fn print_stats(stats: &ScanStats) {
    println!(
        "scanned={} media={} non_media_skip={} hidden_skip={}",
        stats.scanned_files, stats.media_files, stats.skipped_non_media, stats.skipped_hidden
    );
}
