use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mirror_mygithub::{Category, Config, SyncEngine, SyncResult};

#[derive(Parser)]
#[command(name = "mirror-mygithub")]
#[command(about = "Mirror your owned and starred GitHub repositories to local disk")]
#[command(version)]
struct Cli {
    /// Configuration file path (defaults to ./config.json, then the XDG config location)
    #[arg(short = 'f', long)]
    config: Option<std::path::PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Fetch listings and report what would happen without cloning or pulling
    #[arg(long)]
    dry_run: bool,

    /// Sync only one category
    #[arg(long, value_enum)]
    only: Option<CategoryArg>,
}

#[derive(ValueEnum, Clone, Copy)]
enum CategoryArg {
    /// Repositories you own, into <root>/users
    Owned,
    /// Repositories you starred, into <root>/starred
    Starred,
}

impl From<CategoryArg> for Category {
    fn from(arg: CategoryArg) -> Self {
        match arg {
            CategoryArg::Owned => Category::Owned,
            CategoryArg::Starred => Category::Starred,
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    info!("Starting mirror-mygithub v{}", env!("CARGO_PKG_VERSION"));

    let config_path = match cli.config {
        Some(path) => path,
        None => Config::default_config_path()?,
    };
    let config = Config::load(&config_path).context("Failed to load configuration")?;

    let engine = SyncEngine::new(config)?.with_dry_run(cli.dry_run);
    let summaries = engine.run(cli.only.map(Category::from)).await?;

    for summary in &summaries {
        for result in &summary.results {
            if let SyncResult::Exhausted { path, command } = result {
                info!("Needs attention: {} ({})", path.display(), command);
            }
        }
    }

    Ok(())
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}
