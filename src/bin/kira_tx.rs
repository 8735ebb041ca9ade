use std::path::{Path, PathBuf};
use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use kira_taxonomy::admin::{DatasetAdmin, DatasetKind, FusekiAdminClient};
use kira_taxonomy::app::{
    App, ConvertResult, ExportResult, ExportTarget, ExtractOptions, ExtractResult, LoadResult,
    ProgressSink, RanksResult, StatsResult, UploadResult, default_database,
};
use kira_taxonomy::config::{ConfigLoader, ResolvedConfig};
use kira_taxonomy::domain::{GraphFormat, InputFormat, RankWhitelist, TaxonRef};
use kira_taxonomy::error::TaxonomyError;
use kira_taxonomy::gateway::{QueryGateway, RowSet, SparqlHttpGateway};
use kira_taxonomy::output::{JsonOutput, OutputMode, StderrProgress};
use kira_taxonomy::report::group_thousands;
use kira_taxonomy::resolver::ResolveStrategy;

#[derive(Parser)]
#[command(name = "kira-tx")]
#[command(about = "Load taxonomy ontologies into an indexed triple store and extract rank-filtered subtrees")]
#[command(version, author)]
struct Cli {
    /// JSON config file (default: ./kira-tx.json when present)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Print results as JSON on stdout
    #[arg(long, global = true)]
    json: bool,

    /// Query endpoint base URL, e.g. http://localhost:3030
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// Dataset name on the endpoint and in the local data root
    #[arg(long, global = true)]
    dataset: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Stream an ontology file into the local triple store")]
    Load(LoadArgs),
    #[command(about = "Re-serialize an ontology file and write a summary report")]
    Convert(ConvertArgs),
    #[command(about = "Write the local triple store out as graph files")]
    Export(ExportArgs),
    #[command(about = "Show counts for the local triple store")]
    Stats(DbArgs),
    #[command(about = "Show one entity from the local triple store")]
    Entity(EntityArgs),
    #[command(about = "Extract all whitelisted-rank descendants of a taxon from the endpoint")]
    Extract(ExtractArgs),
    #[command(about = "Count taxa per rank on the endpoint")]
    Ranks(RanksArgs),
    #[command(about = "Dataset administration on the endpoint")]
    Remote(RemoteArgs),
}

#[derive(Args)]
struct DbArgs {
    /// SQLite file (default: <data_root>/datasets/<dataset>.db)
    #[arg(long)]
    db: Option<Utf8PathBuf>,
}

#[derive(Args)]
struct OutputArgs {
    #[arg(long, default_value = ".")]
    out: PathBuf,

    #[arg(long = "to", value_enum, value_delimiter = ',', default_value = "turtle")]
    formats: Vec<GraphFormat>,

    /// Output file name without extension
    #[arg(long)]
    stem: Option<String>,
}

#[derive(Args)]
struct LoadArgs {
    input: PathBuf,

    #[arg(long, value_enum)]
    format: Option<InputFormat>,

    /// Also materialise the entities table
    #[arg(long)]
    entities: bool,

    #[command(flatten)]
    db: DbArgs,
}

#[derive(Args)]
struct ConvertArgs {
    input: PathBuf,

    #[arg(long, value_enum)]
    format: Option<InputFormat>,

    #[command(flatten)]
    output: OutputArgs,
}

#[derive(Args)]
struct ExportArgs {
    #[command(flatten)]
    db: DbArgs,

    #[command(flatten)]
    output: OutputArgs,
}

#[derive(Args)]
struct EntityArgs {
    /// Taxon id (8825, NCBITaxon:8825) or IRI
    entity: String,

    #[command(flatten)]
    db: DbArgs,
}

#[derive(Args)]
struct ExtractArgs {
    /// Root taxon id (8825, NCBITaxon:8825) or IRI
    root: String,

    /// Comma-separated rank names or IRIs
    #[arg(long, value_delimiter = ',')]
    ranks: Vec<String>,

    #[arg(long, value_enum)]
    strategy: Option<ResolveStrategy>,

    #[arg(long)]
    include_root: bool,

    #[command(flatten)]
    output: OutputArgs,
}

#[derive(Args)]
struct RanksArgs {
    /// Also count every triple on the endpoint
    #[arg(long)]
    total: bool,
}

#[derive(Args)]
struct RemoteArgs {
    #[command(subcommand)]
    command: RemoteCommand,
}

#[derive(Subcommand)]
enum RemoteCommand {
    #[command(about = "Create a dataset")]
    CreateDataset {
        name: String,
        #[arg(long, value_enum, default_value = "mem")]
        kind: DatasetKind,
    },
    #[command(about = "Upload a graph file into the dataset")]
    Upload {
        file: PathBuf,
        #[arg(long, default_value = "default")]
        graph: String,
        /// Create the dataset first
        #[arg(long, value_enum)]
        create: Option<DatasetKind>,
    },
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<TaxonomyError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &TaxonomyError) -> u8 {
    match error {
        TaxonomyError::InputNotFound(_)
        | TaxonomyError::InputRead { .. }
        | TaxonomyError::Parse(_)
        | TaxonomyError::ConfigRead(_)
        | TaxonomyError::ConfigParse(_)
        | TaxonomyError::InvalidTaxon(_)
        | TaxonomyError::InvalidRank(_)
        | TaxonomyError::InvalidIri(_)
        | TaxonomyError::InvalidFormat(_) => 2,
        TaxonomyError::Connectivity(_)
        | TaxonomyError::QueryHttp(_)
        | TaxonomyError::QueryStatus { .. }
        | TaxonomyError::QueryResponse(_)
        | TaxonomyError::AdminHttp(_)
        | TaxonomyError::AdminStatus { .. } => 3,
        TaxonomyError::StorageWrite(_) | TaxonomyError::Storage(_) => 4,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Human
    };

    let mut config = ConfigLoader::resolve(cli.config.as_deref())?;
    if let Some(endpoint) = cli.endpoint {
        config.gateway.base_url = endpoint;
    }
    if let Some(dataset) = cli.dataset {
        config.gateway.dataset = dataset;
    }

    match cli.command {
        Commands::Load(args) => {
            let database = args.db.db.unwrap_or_else(|| default_database(&config));
            let app = App::new(config, NopGateway);
            let result = app.load(
                &args.input,
                args.format,
                &database,
                args.entities,
                sink(output_mode),
            )?;
            emit(output_mode, &result, print_load)
        }
        Commands::Convert(args) => {
            let target = export_target(args.output, || file_stem(&args.input));
            let app = App::new(config, NopGateway);
            let result = app.convert(&args.input, args.format, &target, sink(output_mode))?;
            emit(output_mode, &result, print_convert)
        }
        Commands::Export(args) => {
            let database = args.db.db.unwrap_or_else(|| default_database(&config));
            let dataset = config.gateway.dataset.clone();
            let target = export_target(args.output, || dataset);
            let app = App::new(config, NopGateway);
            let result = app.export(&database, &target, sink(output_mode))?;
            emit(output_mode, &result, print_export)
        }
        Commands::Stats(args) => {
            let database = args.db.unwrap_or_else(|| default_database(&config));
            let app = App::new(config, NopGateway);
            let result = app.stats(&database)?;
            emit(output_mode, &result, print_stats)
        }
        Commands::Entity(args) => {
            let database = args.db.db.unwrap_or_else(|| default_database(&config));
            let uri = args.entity.parse::<TaxonRef>()?;
            let app = App::new(config, NopGateway);
            match app.entity(&database, uri.as_str())? {
                Some(entity) => emit(output_mode, &entity, |entity| {
                    println!("{}", entity.uri);
                    for (key, value) in [
                        ("type", &entity.entity_type),
                        ("label", &entity.label),
                        ("rank", &entity.rank),
                        ("description", &entity.description),
                    ] {
                        if let Some(value) = value {
                            println!("  {key}: {value}");
                        }
                    }
                }),
                None => Err(miette::Report::msg(format!("{uri} is not in {database}"))),
            }
        }
        Commands::Extract(args) => {
            let root = args.root.parse::<TaxonRef>()?;
            let ranks = if args.ranks.is_empty() {
                None
            } else {
                Some(RankWhitelist::parse(&args.ranks)?)
            };
            if let Some(strategy) = args.strategy {
                config.resolver.strategy = strategy;
            }
            let options = ExtractOptions {
                ranks,
                include_root: args.include_root,
            };
            let target = export_target(args.output, || root.local_name().to_string());
            let gateway = SparqlHttpGateway::new(&config.gateway)?;
            let app = App::new(config, gateway);
            let result = app.extract(&root, &options, &target, sink(output_mode))?;
            emit(output_mode, &result, print_extract)
        }
        Commands::Ranks(args) => {
            let gateway = SparqlHttpGateway::new(&config.gateway)?;
            let app = App::new(config, gateway);
            let result = app.ranks(args.total)?;
            emit(output_mode, &result, print_ranks)
        }
        Commands::Remote(args) => run_remote(args.command, config, output_mode),
    }
}

fn run_remote(
    command: RemoteCommand,
    config: ResolvedConfig,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let admin = FusekiAdminClient::new(&config.gateway)?;
    match command {
        RemoteCommand::CreateDataset { name, kind } => {
            admin.create_dataset(&name, kind)?;
            let created = serde_json::json!({ "dataset": name, "kind": kind });
            emit(output_mode, &created, |_| println!("created dataset {name} ({kind})"))
        }
        RemoteCommand::Upload {
            file,
            graph,
            create,
        } => {
            let gateway = SparqlHttpGateway::new(&config.gateway)?;
            let app = App::new(config, gateway);
            let result = app.upload(&admin, &file, &graph, create, sink(output_mode))?;
            emit(output_mode, &result, print_upload)
        }
    }
}

/// Stands in for the endpoint in commands that only touch local files.
struct NopGateway;

impl QueryGateway for NopGateway {
    fn execute(&self, _query: &str) -> Result<RowSet, TaxonomyError> {
        Err(TaxonomyError::Connectivity(
            "no query endpoint is used by this command".to_string(),
        ))
    }
}

fn sink(mode: OutputMode) -> &'static dyn ProgressSink {
    match mode {
        OutputMode::Json => &JsonOutput,
        OutputMode::Human => &StderrProgress,
    }
}

fn emit<T: serde::Serialize>(
    mode: OutputMode,
    value: &T,
    human: impl FnOnce(&T),
) -> miette::Result<()> {
    match mode {
        OutputMode::Json => JsonOutput::print(value).into_diagnostic(),
        OutputMode::Human => {
            human(value);
            Ok(())
        }
    }
}

fn export_target(args: OutputArgs, default_stem: impl FnOnce() -> String) -> ExportTarget {
    ExportTarget {
        out_dir: args.out,
        stem: args.stem.unwrap_or_else(default_stem),
        formats: args.formats,
    }
}

fn file_stem(path: &Path) -> String {
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("graph");
    let name = name.strip_suffix(".gz").unwrap_or(name);
    name.rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(name)
        .to_string()
}

fn print_files(files: &[PathBuf], summary_file: &Path) {
    for file in files {
        println!("  wrote {}", file.display());
    }
    println!("  wrote {}", summary_file.display());
}

fn print_load(result: &LoadResult) {
    println!("Loaded {} into {}", result.input, result.database);
    println!(
        "  parsed {} records ({} skipped), {} new in {} batches",
        group_thousands(result.parse.parsed),
        group_thousands(result.parse.skipped),
        group_thousands(result.stats.inserted),
        result.stats.batches
    );
    println!(
        "  total triples: {}, unique subjects: {}, unique predicates: {}",
        group_thousands(result.stats.total_triples),
        group_thousands(result.stats.unique_subjects),
        group_thousands(result.stats.unique_predicates)
    );
    if let Some(entities) = result.entities {
        println!("  entities: {}", group_thousands(entities as u64));
    }
    println!("  took {:.2}s", result.elapsed_secs);
}

fn print_convert(result: &ConvertResult) {
    println!(
        "Converted {}: {} triples ({} skipped records)",
        result.input,
        group_thousands(result.export.triples as u64),
        result.parse.skipped
    );
    print_files(&result.export.files, &result.summary_file);
}

fn print_export(result: &ExportResult) {
    println!(
        "Exported {}: {} triples, {} subjects",
        result.database,
        group_thousands(result.export.triples as u64),
        group_thousands(result.export.subjects as u64)
    );
    print_files(&result.export.files, &result.summary_file);
}

fn print_stats(result: &StatsResult) {
    println!("{}", result.database);
    println!("  total triples: {}", group_thousands(result.stats.total_triples));
    println!("  unique subjects: {}", group_thousands(result.stats.unique_subjects));
    println!("  unique predicates: {}", group_thousands(result.stats.unique_predicates));
    println!("  classes: {}", group_thousands(result.summary.classes));
    println!("  properties: {}", group_thousands(result.summary.properties));
    println!("  individuals: {}", group_thousands(result.summary.individuals));
    println!("  indexes: {}", result.indexes.join(", "));
}

fn print_extract(result: &ExtractResult) {
    println!(
        "Extracted {} descendants of {} ({} strategy, {} queries)",
        group_thousands(result.entities as u64),
        result.root,
        result.strategy,
        result.queries
    );
    println!(
        "  {} triples, {} subjects",
        group_thousands(result.export.triples as u64),
        group_thousands(result.export.subjects as u64)
    );
    print_files(&result.export.files, &result.summary_file);
}

fn print_ranks(result: &RanksResult) {
    if let Some(total) = result.endpoint_triples {
        println!("endpoint holds {} triples", group_thousands(total));
    }
    for rank in &result.ranks {
        println!("{:>12}  {}", group_thousands(rank.count), rank.rank);
    }
}

fn print_upload(result: &UploadResult) {
    if let Some(kind) = result.created {
        println!("created dataset {} ({kind})", result.receipt.dataset);
    }
    println!(
        "uploaded {} bytes into {} (graph {})",
        group_thousands(result.receipt.bytes),
        result.receipt.dataset,
        result.receipt.graph
    );
    if let Some(triples) = result.triples {
        println!("dataset now holds {} triples", group_thousands(triples));
    }
}
