use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use attribute_addresser::addressing::{detect_conflicts, resolve_lenient};
use attribute_addresser::export::{export, ExportFormat};
use attribute_addresser::grouping::{GroupRef, SequenceSettings};
use attribute_addresser::import::csv::{CsvField, CsvMapping};
use attribute_addresser::import::{gdtf, load_source};
use attribute_addresser::matcher::TokenSetSimilarity;
use attribute_addresser::model::{FixtureId, GroupRole};
use attribute_addresser::project::{load_project, save_project};
use attribute_addresser::settings::{self, EngineSettings};
use attribute_addresser::{EngineError, Session};

// ── CLI argument parsing ─────────────────────────────────────────

#[derive(Parser)]
#[command(name = "addresser", about = "DMX attribute addresser", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log at debug level (RUST_LOG overrides)
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Output raw JSON instead of formatted text
    #[arg(long, global = true)]
    json: bool,
}

#[derive(clap::Args)]
struct SourceArgs {
    /// Fixture source: .mvr, .xml (MVR scene or MA3 patch), .csv, or a saved project (.json)
    source: PathBuf,

    /// Folder of .gdtf files added to the profile catalog
    #[arg(long)]
    gdtf_dir: Option<PathBuf>,

    /// CSV column mapping as COLUMN=FIELD (repeatable); guessed from headers if absent
    #[arg(long = "map", value_name = "COLUMN=FIELD")]
    mappings: Vec<String>,
}

#[derive(Clone, Copy, ValueEnum)]
enum Numbering {
    /// One counter across Masters then unlinked Remotes
    Shared,
    /// Masters and Remotes each count from the start number
    Independent,
}

#[derive(Subcommand)]
enum Commands {
    /// Summarize a source: fixtures, warnings and embedded profile matches
    Inspect {
        #[command(flatten)]
        source: SourceArgs,
    },
    /// List the profile catalog
    Profiles {
        #[command(flatten)]
        source: SourceArgs,
    },
    /// Match fixtures to profiles and report the candidates
    Match {
        #[command(flatten)]
        source: SourceArgs,
        /// Minimum similarity for an automatic match
        #[arg(long)]
        threshold: Option<f64>,
        /// Candidates listed per fixture
        #[arg(long, default_value_t = 3)]
        top: usize,
    },
    /// Match, group, number, resolve and export
    Resolve {
        #[command(flatten)]
        source: SourceArgs,
        /// Settings file (see `config-schema`)
        #[arg(long)]
        settings: Option<PathBuf>,
        /// Counter mode; required unless the settings file provides it
        #[arg(long, value_enum)]
        numbering: Option<Numbering>,
        /// Comma separated Master fixture ids, in order
        #[arg(long, value_delimiter = ',')]
        masters: Vec<u32>,
        /// Comma separated Remote fixture ids, in order
        #[arg(long, value_delimiter = ',')]
        remotes: Vec<u32>,
        /// Link each Remote to the Master with the most similar name
        #[arg(long)]
        auto_link: bool,
        /// Link the i-th Remote to the i-th Master
        #[arg(long, conflicts_with = "auto_link")]
        link_by_position: bool,
        /// Attributes to export (default: all)
        #[arg(long, value_delimiter = ',')]
        attributes: Vec<String>,
        /// text, csv, json, ma3xml, ma3sequences or ma3attributesequences
        #[arg(long)]
        format: Option<ExportFormat>,
        /// Write the export here instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
        /// Also save the resolved session as a project file
        #[arg(long)]
        save_project: Option<PathBuf>,
    },
    /// Print the JSON schema of the settings file
    ConfigSchema,
}

// ── Helpers ──────────────────────────────────────────────────────

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn parse_mapping(entries: &[String]) -> Result<Option<CsvMapping>, EngineError> {
    if entries.is_empty() {
        return Ok(None);
    }
    let mut mapping = CsvMapping::new();
    for entry in entries {
        let (column, field) = entry
            .split_once('=')
            .ok_or_else(|| EngineError::InvalidConfig {
                message: format!("mapping '{entry}' is not COLUMN=FIELD"),
            })?;
        let field: CsvField = serde_json::from_value(serde_json::Value::String(field.trim().to_string()))
            .map_err(|_| EngineError::InvalidConfig {
                message: format!("unknown CSV field '{field}'"),
            })?;
        mapping = mapping.map(column.trim(), field);
    }
    Ok(Some(mapping))
}

fn is_project(path: &Path) -> bool {
    path.extension().is_some_and(|e| e.eq_ignore_ascii_case("json"))
}

fn open_session(args: &SourceArgs) -> Result<Session, EngineError> {
    let mut session = if is_project(&args.source) {
        load_project(&args.source)?.1
    } else {
        let mapping = parse_mapping(&args.mappings)?;
        Session::from_batch(load_source(&args.source, mapping.as_ref())?)?
    };
    if let Some(dir) = &args.gdtf_dir {
        let batch = gdtf::load_gdtf_folder(dir)?;
        for warning in &batch.warnings {
            eprintln!("warning: {warning}");
        }
        let added = session.add_profiles(batch.profiles);
        tracing::info!(dir = %dir.display(), profiles = added.len(), "GDTF folder loaded");
    }
    for warning in session.warnings() {
        eprintln!("warning: {warning}");
    }
    Ok(session)
}

fn print_json<T: serde::Serialize>(value: &T) {
    println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
}

fn select_all_attributes(session: &mut Session) -> Result<(), EngineError> {
    let all: Vec<(FixtureId, Vec<String>)> = session
        .fixtures()
        .iter()
        .map(|r| (r.id, r.attributes.keys().cloned().collect()))
        .collect();
    for (id, names) in all {
        let names: Vec<&str> = names.iter().map(String::as_str).collect();
        session.select_attributes(id, &names)?;
    }
    Ok(())
}

fn resolve_settings(path: Option<&Path>, numbering: Option<Numbering>) -> Result<EngineSettings, EngineError> {
    let mut settings = match path {
        Some(p) => settings::load_settings(p)?,
        None => {
            let Some(mode) = numbering else {
                return Err(EngineError::InvalidConfig {
                    message: "choose --numbering shared|independent or pass --settings".into(),
                });
            };
            EngineSettings::new(SequenceSettings::new(matches!(mode, Numbering::Shared)))
        }
    };
    if let Some(mode) = numbering {
        settings.sequence.shared_counter = matches!(mode, Numbering::Shared);
    }
    settings.validate()?;
    Ok(settings)
}

// ── Commands ─────────────────────────────────────────────────────

fn run_inspect(args: &SourceArgs, raw: bool) -> Result<(), EngineError> {
    let session = open_session(args)?;
    if raw {
        print_json(&session.snapshot());
        return Ok(());
    }
    let summary = session.match_summary();
    println!(
        "{} fixtures, {} profiles, {} matched to embedded profiles, {} warnings",
        summary.total,
        session.catalog().len(),
        summary.embedded,
        session.warnings().len()
    );
    for record in session.fixtures() {
        let profile = session.profile_of(record).map_or("-", |p| p.name.as_str());
        println!(
            "  {:>6}  {:<24} {}.{:03}  {:<28} -> {profile}",
            record.id.0,
            record.name,
            record.universe.get(),
            record.channel.get(),
            record.type_label
        );
    }
    Ok(())
}

fn run_profiles(args: &SourceArgs, raw: bool) -> Result<(), EngineError> {
    let session = open_session(args)?;
    if raw {
        let profiles: Vec<_> = session.catalog().iter().collect();
        print_json(&profiles);
        return Ok(());
    }
    for profile in session.catalog().iter() {
        println!("{} {}  ({} modes)", profile.manufacturer, profile.name, profile.modes.len());
        for mode in &profile.modes {
            let attrs: Vec<&str> = mode.attributes.iter().map(|a| a.name.as_str()).collect();
            println!("    {} [{} ch]: {}", mode.name, mode.footprint(), attrs.join(", "));
        }
    }
    Ok(())
}

fn run_match(args: &SourceArgs, threshold: Option<f64>, top: usize, raw: bool) -> Result<(), EngineError> {
    let mut session = open_session(args)?;
    let threshold = threshold.unwrap_or(0.5);
    if !(0.0..=1.0).contains(&threshold) {
        return Err(EngineError::InvalidConfig {
            message: format!("threshold must lie in [0, 1], got {threshold}"),
        });
    }
    let reports = session.auto_match(&TokenSetSimilarity::default(), threshold);
    if raw {
        print_json(&reports);
        return Ok(());
    }
    for report in &reports {
        let label = session.fixture(report.fixture_id).map_or("", |r| r.type_label.as_str());
        let verdict = report
            .accepted
            .and_then(|pid| session.profile(pid))
            .map_or_else(|| "no match".to_string(), |p| format!("-> {} {}", p.manufacturer, p.name));
        println!("{:>6}  {label:<28} {verdict}", report.fixture_id.0);
        for c in report.candidates.iter().take(top) {
            println!("          {:.2}  {} {}", c.score, c.manufacturer, c.profile_name);
        }
    }
    let summary = session.match_summary();
    println!("{} of {} fixtures matched", summary.matched, summary.total);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run_resolve(
    args: &SourceArgs,
    settings_path: Option<&Path>,
    numbering: Option<Numbering>,
    masters: &[u32],
    remotes: &[u32],
    auto_link: bool,
    link_by_position: bool,
    attributes: &[String],
    format: Option<ExportFormat>,
    output: Option<&Path>,
    project: Option<&Path>,
) -> Result<(), EngineError> {
    let settings = resolve_settings(settings_path, numbering)?;
    let mut session = open_session(args)?;
    let similarity = TokenSetSimilarity::default();
    session.auto_match(&similarity, settings.match_threshold);

    if attributes.is_empty() {
        select_all_attributes(&mut session)?;
    } else {
        let names: Vec<&str> = attributes.iter().map(String::as_str).collect();
        session.select_attributes_everywhere(&names);
    }

    for &id in masters {
        session.assign_role(FixtureId(id), GroupRole::Master)?;
    }
    for &id in remotes {
        session.assign_role(FixtureId(id), GroupRole::Remote)?;
    }
    if auto_link {
        let links = session.auto_link_remotes(&similarity, settings.match_threshold);
        tracing::info!(links = links.len(), "remotes auto-linked");
    }
    if link_by_position {
        session.link_by_position()?;
    }
    session.generate_sequence_numbers(&settings.sequence)?;

    let (_, overflows) = resolve_lenient(&session);
    for e in &overflows {
        eprintln!("error: {e}");
    }
    if let Some(first) = overflows.into_iter().next() {
        return Err(first);
    }
    for conflict in detect_conflicts(&session)? {
        eprintln!(
            "conflict: fixture {} {} overlaps fixture {} {} at {}..{}",
            conflict.first,
            conflict.first_attribute,
            conflict.second,
            conflict.second_attribute,
            conflict.start,
            conflict.end
        );
    }
    tracing::debug!(
        masters = session.group(GroupRef::Masters).len(),
        remotes = session.group(GroupRef::Remotes).len(),
        "groups ready"
    );

    if let Some(path) = project {
        let name = args
            .source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        save_project(&session, &name, path)?;
    }

    let format = format.unwrap_or(settings.default_format);
    let rendered = export(&session, format, &settings.ma3)?;
    match output {
        Some(path) => {
            attribute_addresser::project::atomic_write(path, rendered.as_bytes())?;
            eprintln!("Wrote {format} export to {}", path.display());
        }
        None => println!("{rendered}"),
    }
    Ok(())
}

// ── Main ─────────────────────────────────────────────────────────

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let raw = cli.json;

    let result = match &cli.command {
        Commands::Inspect { source } => run_inspect(source, raw),
        Commands::Profiles { source } => run_profiles(source, raw),
        Commands::Match { source, threshold, top } => run_match(source, *threshold, *top, raw),
        Commands::Resolve {
            source,
            settings,
            numbering,
            masters,
            remotes,
            auto_link,
            link_by_position,
            attributes,
            format,
            output,
            save_project,
        } => run_resolve(
            source,
            settings.as_deref(),
            *numbering,
            masters,
            remotes,
            *auto_link,
            *link_by_position,
            attributes,
            *format,
            output.as_deref(),
            save_project.as_deref(),
        ),
        Commands::ConfigSchema => {
            print_json(&settings::settings_schema());
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
