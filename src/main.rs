//! CLI entry point for shardex.
//!
//! Provides commands to inspect the shard plan of a chunk set and to run a
//! full build, printing JSON to stdout. Logs go to stderr.

use anyhow::{Context, Result};
use clap::{
    Args, Parser, Subcommand,
    builder::styling::{AnsiColor, Effects, Styles},
};
use serde::Serialize;
use shardex::indexing::{BuildOutput, ChunkSource, JsonlChunkSource, WholeFileSource};
use shardex::postings::{Bm25Params, ChargramStats};
use shardex::sharding::{Shard, build_work_plan, plan_batches};
use shardex::{IndexPipeline, PerfProfile, RayonOffload, Settings, WorkOffload};
use std::path::PathBuf;
use tracing::Level;

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// Sharded postings builder
#[derive(Parser)]
#[command(
    name = "shardex",
    version = env!("CARGO_PKG_VERSION"),
    about = "Build sharded postings and quantized vectors from tokenized chunks",
    next_line_help = true,
    styles = clap_cargo_style()
)]
struct Cli {
    /// Path to custom settings.toml file
    #[arg(short, long, global = true, env = "SHARDEX_CONFIG")]
    config: Option<PathBuf>,

    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct SourceArgs {
    /// JSONL file of tokenized chunk records
    #[arg(long, conflicts_with = "root")]
    chunks: Option<PathBuf>,

    /// Repository root for whole-file indexing of FILES
    #[arg(long, requires = "files")]
    root: Option<PathBuf>,

    /// Files (relative to --root) to index whole
    #[arg(num_args = 0..)]
    files: Vec<String>,

    /// Perf profile (JSON) for shard cost estimation (overrides config)
    #[arg(long)]
    profile: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default .shardex/settings.toml
    Init {
        /// Overwrite an existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Display active settings
    Config,

    /// Print the shard plan and worker batches as JSON
    Plan {
        #[command(flatten)]
        source: SourceArgs,
    },

    /// Run a build and print a JSON summary
    Build {
        #[command(flatten)]
        source: SourceArgs,

        /// Number of worker threads (overrides config)
        #[arg(short, long)]
        threads: Option<usize>,

        /// Build a single accumulator instead of shards
        #[arg(long)]
        no_shards: bool,

        /// Print the human-readable summary instead of JSON
        #[arg(long)]
        human: bool,
    },
}

#[derive(Serialize)]
struct PlanSummary<'a> {
    shards: &'a [Shard],
    batches: Vec<Vec<String>>,
}

#[derive(Serialize)]
struct BuildSummary<'a> {
    stats: &'a shardex::BuildStats,
    bm25: Bm25Params,
    total_docs: usize,
    avg_doc_len: f64,
    token_terms: usize,
    phrase_terms: usize,
    chargram_terms: usize,
    chargram_stats: &'a ChargramStats,
    dims: usize,
    dense: &'a shardex::vector::DenseStats,
    tokenization: &'a shardex::indexing::TokenizationStats,
}

impl<'a> From<&'a BuildOutput> for BuildSummary<'a> {
    fn from(output: &'a BuildOutput) -> Self {
        let postings = &output.postings;
        Self {
            stats: &output.stats,
            bm25: postings.bm25,
            total_docs: postings.total_docs,
            avg_doc_len: postings.avg_doc_len,
            token_terms: postings.token.len(),
            phrase_terms: postings.phrase.len(),
            chargram_terms: postings.chargram.len(),
            chargram_stats: &postings.chargram_stats,
            dims: postings.dense.dims,
            dense: &postings.dense.stats,
            tokenization: &output.tokenization,
        }
    }
}

fn load_settings(cli: &Cli) -> Result<Settings> {
    match &cli.config {
        Some(path) => Settings::load_from(path)
            .with_context(|| format!("Configuration error loading from {}", path.display())),
        None => Settings::load().context("Configuration error"),
    }
}

fn open_source<'a>(
    args: &SourceArgs,
    settings: &Settings,
    offload: Option<&'a dyn WorkOffload>,
) -> Result<Box<dyn ChunkSource + 'a>> {
    if let Some(path) = &args.chunks {
        let source = JsonlChunkSource::open(path)
            .with_context(|| format!("Failed to load chunks from {}", path.display()))?;
        return Ok(Box::new(source));
    }
    if let Some(root) = &args.root {
        let source = WholeFileSource::new(root.clone(), args.files.clone())
            .with_max_file_bytes(settings.workers.max_file_bytes)
            .with_offload(offload)
            .with_offload_retries(settings.embeddings.offload_retries);
        return Ok(Box::new(source));
    }
    anyhow::bail!("Either --chunks or --root with FILES is required")
}

fn load_profile(args: &SourceArgs, settings: &Settings) -> Result<Option<PerfProfile>> {
    let path = args.profile.as_ref().or(settings.shards.profile_path.as_ref());
    path.map(|path| {
        PerfProfile::load(path)
            .with_context(|| format!("Failed to load perf profile {}", path.display()))
    })
    .transpose()
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut settings = load_settings(&cli)?;

    let level = if cli.verbose || settings.debug {
        Level::DEBUG
    } else {
        Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    match &cli.command {
        Commands::Init { force } => {
            let path = PathBuf::from(".shardex/settings.toml");
            if path.exists() && !force {
                anyhow::bail!(
                    "Configuration file already exists at {} (use --force to overwrite)",
                    path.display()
                );
            }
            Settings::default()
                .save(&path)
                .map_err(|e| anyhow::anyhow!("Failed to write {}: {e}", path.display()))?;
            eprintln!("Created configuration file at: {}", path.display());
        }

        Commands::Config => {
            println!("{}", toml::to_string_pretty(&settings)?);
        }

        Commands::Plan { source } => {
            let profile = load_profile(source, &settings)?;
            let chunk_source = open_source(source, &settings, None)?;
            let pipeline = IndexPipeline::new(&settings).with_profile(profile.as_ref());
            let shards = pipeline.plan(&chunk_source.entries())?;

            let work = build_work_plan(&shards);
            let batches = plan_batches(&work, settings.workers.threads)
                .iter()
                .map(|batch| {
                    batch
                        .iter()
                        .map(|item| {
                            format!(
                                "{}#{}/{}",
                                item.shard.label, item.part_index, item.part_total
                            )
                        })
                        .collect()
                })
                .collect();
            print_json(&PlanSummary {
                shards: &shards,
                batches,
            })?;
        }

        Commands::Build {
            source,
            threads,
            no_shards,
            human,
        } => {
            if let Some(threads) = threads {
                settings.workers.threads = (*threads).max(1);
            }
            if *no_shards {
                settings.shards.enabled = false;
            }

            let offload = if settings.workers.offload {
                Some(RayonOffload::new(settings.workers.offload_threads)?)
            } else {
                None
            };
            let offload_ref = offload.as_ref().map(|pool| pool as &dyn WorkOffload);

            let profile = load_profile(source, &settings)?;
            let chunk_source = open_source(source, &settings, offload_ref)?;
            let output = IndexPipeline::new(&settings)
                .with_offload(offload_ref)
                .with_profile(profile.as_ref())
                .run(chunk_source.as_ref())
                .map_err(|e| {
                    for suggestion in e.recovery_suggestions() {
                        eprintln!("  hint: {suggestion}");
                    }
                    anyhow::anyhow!("[{}] {e}", e.status_code())
                })?;

            if *human {
                println!("{}", output.stats);
            } else {
                print_json(&BuildSummary::from(&output))?;
            }
        }
    }

    Ok(())
}
