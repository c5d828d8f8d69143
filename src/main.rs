use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use whysoviral::analytics::compute_for_creator;
use whysoviral::config::Config;
use whysoviral::logging;
use whysoviral::refresh_log::StoreRefreshLog;
use whysoviral::scraper::parse_username_input;
use whysoviral::server;
use whysoviral::service::App;
use whysoviral::status;
use whysoviral::store::Store;
use whysoviral::window::Lookback;

#[derive(Parser)]
#[command(name = "whysoviral")]
#[command(about = "TikTok creator analytics service", long_about = None)]
struct Cli {
    /// Data directory (overrides WSV_DATA_DIR)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API server
    Serve {
        /// Listen address (overrides WSV_BIND), e.g. 0.0.0.0:3000
        #[arg(long)]
        bind: Option<String>,
    },
    /// Print analytics for a stored profile as JSON
    Analytics {
        /// TikTok username, @handle or profile URL
        username: String,
        /// Lookback window: '3', '6m', '1y' (default: 3 months)
        #[arg(long, short)]
        timeframe: Option<String>,
    },
    /// Re-scrape tracked profiles
    Refresh {
        /// Refresh only this profile. If omitted, refresh all tracked profiles.
        #[arg(long)]
        username: Option<String>,
    },
    /// Show tracked profiles, stored posts and last refresh
    Status,
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Commands::Serve { .. } => "serve",
            Commands::Analytics { .. } => "analytics",
            Commands::Refresh { .. } => "refresh",
            Commands::Status => "status",
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::from_env()?;
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }

    logging::init_logging(&config.data_dir, cli.command.name())?;
    let store = Arc::new(Store::open(&config.data_dir)?);

    match cli.command {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                config.bind = bind;
            }
            let app = Arc::new(App::from_config(&config, store)?);
            tokio::runtime::Runtime::new()
                .context("Failed to create Tokio runtime")?
                .block_on(server::serve(app, &config.bind))?;
        }
        Commands::Analytics {
            username,
            timeframe,
        } => {
            let lookback = Lookback::parse_or_default(timeframe.as_deref())?;
            let username = parse_username_input(&username)?;
            if store.get_profile(&username)?.is_none() {
                anyhow::bail!("Profile @{} is not stored. Add it through the API first.", username);
            }
            let analytics = compute_for_creator(store.as_ref(), &username, lookback, Utc::now())?;
            println!("{}", serde_json::to_string_pretty(&analytics)?);
        }
        Commands::Refresh { username } => {
            let app = App::from_config(&config, store)?;
            let runtime = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
            let report = match username {
                Some(username) => runtime.block_on(app.refresh_profile(&username))?,
                None => runtime.block_on(app.refresh_all())?,
            };
            eprintln!(
                "✅ Refreshed {} profile(s), data changed: {}",
                report.refreshed_count,
                if report.data_changed { "yes" } else { "no" }
            );
        }
        Commands::Status => {
            let refresh_log = StoreRefreshLog::new(store.clone());
            status::run(&store, &refresh_log)?;
        }
    }

    Ok(())
}
