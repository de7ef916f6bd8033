use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;

use customer_migration::logging::init_logging;
use customer_migration::verification::build_verifier;
use customer_migration::{
    MigrationConfig, MigrationError, MigrationOptions, MigrationOrchestrator, ProviderKind,
    SqliteRepository,
};

/// Import a customer export into the canonical customer store.
#[derive(Parser, Debug)]
#[command(name = "migrate", author, version, about)]
struct Cli {
    /// Company the imported records belong to.
    company: String,

    /// CSV, XLSX/XLS or DBF export to import.
    file_path: PathBuf,

    /// Stop after this many rows.
    #[arg(long)]
    limit: Option<usize>,

    /// Force the data-source (servicetitan, mailmanager, mailmanagerlife, generic).
    #[arg(long = "dataSource")]
    data_source: Option<String>,

    /// Force the data-type (prospects, customers, invoices).
    #[arg(long = "dataType")]
    data_type: Option<String>,

    /// SQLite database path (overrides config and MIGRATION_DATABASE).
    #[arg(long)]
    database: Option<PathBuf>,

    /// Address verification provider: none, mock, usps, smarty.
    #[arg(long)]
    provider: Option<String>,

    /// TOML config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Reconcile without writing anything.
    #[arg(long)]
    dry_run: bool,

    /// Log every row outcome.
    #[arg(long, short)]
    verbose: bool,

    /// Print the run report as JSON.
    #[arg(long)]
    json: bool,
}

fn main() -> ExitCode {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("❌ {error:#}");
            let code = error
                .downcast_ref::<MigrationError>()
                .map_or(2, MigrationError::exit_code);
            ExitCode::from(code as u8)
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut config = MigrationConfig::load(cli.config.as_deref())
        .map_err(MigrationError::from)
        .context("loading configuration")?;

    if let Some(database) = cli.database {
        config.database = database;
    }
    if let Some(provider) = cli.provider.as_deref() {
        config.provider = ProviderKind::from_name(provider).map_err(MigrationError::from)?;
    }

    let opened = if cli.dry_run {
        SqliteRepository::open_for_dry_run(&config.database)
    } else {
        SqliteRepository::open(&config.database)
    };
    let mut repo = opened
        .map_err(MigrationError::from)
        .with_context(|| format!("opening database {}", config.database.display()))?;

    let verifier = if cli.dry_run {
        None
    } else {
        build_verifier(&config, Box::new(repo.token_cache())).map_err(MigrationError::from)?
    };

    let options = MigrationOptions {
        limit: cli.limit,
        data_source: cli.data_source,
        data_type: cli.data_type,
        dry_run: cli.dry_run,
        verbose: cli.verbose,
    };

    let report = MigrationOrchestrator::new(&cli.company, options)
        .with_verifier(verifier)
        .run(&cli.file_path, &mut repo)?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", report.summary());
    }

    Ok(())
}
