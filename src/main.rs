use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use pkgunify::config::{Config, RepositoryConfig};
use pkgunify::repoproc::RepositoryProcessor;
use pkgunify::storage::{Database, SqliteDatabase};
use pkgunify::transformer::Transformer;
use pkgunify::update::Updater;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser)]
#[command(name = "pkgunify")]
#[command(about = "Aggregate package repositories into per-project groups", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true, default_value = "pkgunify.toml")]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate example configuration file
    Init {
        /// Output file path
        #[arg(short, long, default_value = "pkgunify.toml")]
        output: PathBuf,
    },

    /// Fetch repository sources into the state directory
    Fetch {
        /// Only these repositories (default: all enabled)
        #[arg(short, long)]
        repo: Vec<String>,

        /// Refresh state which was already fetched
        #[arg(short, long)]
        update: bool,
    },

    /// Parse fetched state into sorted chunks
    Parse {
        #[arg(short, long)]
        repo: Vec<String>,

        /// Log every rule match
        #[arg(long)]
        trace: bool,
    },

    /// Merge all chunks and update the database
    Update,

    /// Fetch, parse changed repositories, then update the database
    Run {
        #[arg(short, long)]
        update: bool,

        /// Parse every repository even if its sources did not change
        #[arg(long)]
        reparse: bool,

        #[arg(long)]
        trace: bool,
    },

    /// Load the rule files and report problems
    CheckRules,

    /// Show database statistics
    Stats,

    /// Show the stored packages of one project
    Show {
        effname: String,
    },
}

fn load_config(path: &Path) -> Result<Config> {
    Config::from_file(path).with_context(|| format!("cannot load config {}", path.display()))
}

fn select_repositories<'a>(config: &'a Config, names: &[String]) -> Result<Vec<&'a RepositoryConfig>> {
    if names.is_empty() {
        return Ok(config.enabled_repositories().collect());
    }
    names
        .iter()
        .map(|name| {
            config
                .repository(name)
                .with_context(|| format!("unknown repository {}", name))
        })
        .collect()
}

fn open_database(config: &Config) -> Result<SqliteDatabase> {
    SqliteDatabase::open(&config.db_path)
        .with_context(|| format!("cannot open database {}", config.db_path.display()))
}

/// Rules, with project spread from the previous run when available
fn load_transformer(config: &Config, db: &SqliteDatabase, trace: bool) -> Result<Transformer> {
    let transformer = Transformer::from_paths(&config.rules).context("cannot load rules")?;
    let spread = db.project_spread()?;
    info!(rules = transformer.rule_count(), projects = spread.len(), "Rules loaded");
    Ok(transformer.with_project_spread(spread).with_trace(trace))
}

fn run_update(config: &Config, db: &SqliteDatabase, processor: &RepositoryProcessor) -> Result<()> {
    let _span = tracing::info_span!("update").entered();
    let projects = processor.merge()?;
    let updater = Updater::new(db, config.hash_page_size, config.change_batch_size);
    let stats = updater.update(projects)?;

    println!("\nUpdate Results:");
    println!("  Added:     {}", stats.added);
    println!("  Removed:   {}", stats.removed);
    println!("  Changed:   {}", stats.changed);
    println!("  Unchanged: {}", stats.unchanged);
    Ok(())
}

fn main() -> Result<()> {
    // Initialize logging with environment variable support (RUST_LOG)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::filter::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::filter::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { output } => {
            let _span = tracing::info_span!("init", output = %output.display()).entered();
            if output.exists() {
                bail!("{} already exists", output.display());
            }
            Config::example().to_file(&output)?;

            println!("Created example configuration: {}", output.display());
            println!("\nEdit this file to configure your repositories, then run:");
            println!("  pkgunify --config {} run", output.display());
        }

        Commands::Fetch { repo, update } => {
            let _span = tracing::info_span!("fetch", update).entered();
            let config = load_config(&cli.config)?;
            let transformer = Transformer::new(Vec::new());
            let processor = RepositoryProcessor::new(&config, &transformer);

            for repo in select_repositories(&config, &repo)? {
                let changed = processor
                    .fetch(repo, update)
                    .with_context(|| format!("fetching {} failed", repo.name))?;
                println!("{:<30} {}", repo.name, if changed { "updated" } else { "unchanged" });
            }
        }

        Commands::Parse { repo, trace } => {
            let _span = tracing::info_span!("parse").entered();
            let config = load_config(&cli.config)?;
            let db = open_database(&config)?;
            let transformer = load_transformer(&config, &db, trace)?;
            let processor = RepositoryProcessor::new(&config, &transformer);

            println!("{:<30} {:>10} {:>10} {:>10}", "Repository", "Packages", "Removed", "Failed");
            for repo in select_repositories(&config, &repo)? {
                let report = processor
                    .parse(repo)
                    .with_context(|| format!("parsing {} failed", repo.name))?;
                println!(
                    "{:<30} {:>10} {:>10} {:>10}",
                    report.repo, report.packages, report.removed, report.failures
                );
            }
        }

        Commands::Update => {
            let config = load_config(&cli.config)?;
            let db = open_database(&config)?;
            let transformer = Transformer::new(Vec::new());
            let processor = RepositoryProcessor::new(&config, &transformer);
            run_update(&config, &db, &processor)?;
        }

        Commands::Run {
            update,
            reparse,
            trace,
        } => {
            let _span = tracing::info_span!("run", update, reparse).entered();
            let config = load_config(&cli.config)?;
            let db = open_database(&config)?;
            let transformer = load_transformer(&config, &db, trace)?;
            let processor = RepositoryProcessor::new(&config, &transformer);

            for repo in config.enabled_repositories() {
                let changed = processor
                    .fetch(repo, update)
                    .with_context(|| format!("fetching {} failed", repo.name))?;
                if changed || reparse || !processor.has_chunks(repo) {
                    processor
                        .parse(repo)
                        .with_context(|| format!("parsing {} failed", repo.name))?;
                } else {
                    info!(repo = %repo.name, "Sources unchanged, keeping chunks");
                }
            }

            run_update(&config, &db, &processor)?;
        }

        Commands::CheckRules => {
            let config = load_config(&cli.config)?;
            let transformer = Transformer::from_paths(&config.rules).context("cannot load rules")?;
            println!("{} rules OK", transformer.rule_count());
        }

        Commands::Stats => {
            let _span = tracing::info_span!("stats").entered();
            let config = load_config(&cli.config)?;
            let db = open_database(&config)?;

            println!("Database Statistics:");
            println!("  Total packages: {}", db.count_packages()?);
            println!("  Total projects: {}", db.count_projects()?);
            println!(
                "  Last update:    {}",
                db.get_metadata("last_update")?
                    .unwrap_or_else(|| "Never".to_string())
            );

            let repos = db.list_repositories()?;
            if !repos.is_empty() {
                println!("\n{:<30} {:>10}", "Repository", "Packages");
                println!("{}", "-".repeat(41));
                for (repo_name, count) in repos {
                    println!("{:<30} {:>10}", repo_name, count);
                }
            }
        }

        Commands::Show { effname } => {
            let config = load_config(&cli.config)?;
            let db = open_database(&config)?;
            let packages = db.get_packages(&effname)?;
            if packages.is_empty() {
                println!("Project '{}' not found.", effname);
                return Ok(());
            }

            println!("\n{}:\n", effname);
            for package in packages {
                println!(
                    "  {:<25} {:<20} {:<12} {}",
                    package.repo,
                    package.version,
                    format!("{:?}", package.versionclass),
                    package.name
                );
            }
        }
    }

    Ok(())
}
