use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use directories::ProjectDirs;
use log::{error, info, warn};
use tokio_util::sync::CancellationToken;

use crate::archive::Archive;
use crate::config::Config;
use crate::error::SqlDropError;
use crate::executor::{Executor, SqliteExecutor};
use crate::logging::Logging;
use crate::processor::Processor;
use crate::scheduler::{shutdown_signal, Scheduler, SchedulerSettings};
use crate::status::StatusReport;

#[derive(Parser)]
#[command(
    name = "sqldrop",
    version,
    about = "sqldrop: applies SQL files dropped into an intake directory"
)]
pub struct Cli {
    /// Config file to use (default: config.toml in the sqldrop data directory)
    #[arg(long = "config", short = 'c', global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Process the intake directory on a fixed interval until stopped (default if no command specified)
    Run,

    /// Wait for the database, process the intake directory once, and exit
    Scan,

    /// Show pending and archived units without touching the database
    Status {
        /// Print the report as JSON
        #[arg(long = "json", default_value_t = false)]
        json: bool,
    },
}

impl Cli {
    pub fn handle_command_line() -> Result<(), SqlDropError> {
        let args = Cli::parse();
        let config = Self::load_config(args.config.as_deref())?;

        // Default to Run if no command specified
        match args.command.unwrap_or(Command::Run) {
            Command::Run => Self::start_scheduler(config, None),
            Command::Scan => Self::start_scheduler(config, Some(1)),
            Command::Status { json } => Self::show_status(&config, json),
        }
    }

    fn load_config(path: Option<&Path>) -> Result<Config, SqlDropError> {
        match path {
            Some(path) => Config::load_from(path),
            None => match ProjectDirs::from("", "", "sqldrop") {
                Some(project_dirs) => Config::load(&project_dirs),
                None => {
                    eprintln!("Could not determine the sqldrop data directory - using defaults and environment only");
                    Config::load_from(Path::new("sqldrop.toml"))
                }
            },
        }
    }

    fn show_status(config: &Config, json: bool) -> Result<(), SqlDropError> {
        let report = StatusReport::collect(config);
        if json {
            println!("{}", report.to_json()?);
        } else {
            print!("{}", report.render_table());
        }
        Ok(())
    }

    fn start_scheduler(config: Config, max_passes: Option<u64>) -> Result<(), SqlDropError> {
        let _logger = Logging::init(&config.logging)?;

        info!("sqldrop {} started", env!("CARGO_PKG_VERSION"));
        Self::log_directory("Intake directory", &config.paths.intake_dir);
        Self::log_directory("Archive directory", &config.paths.archive_dir);

        let archive = Archive::new(&config.paths.archive_dir);
        if let Err(e) = archive.ensure_exists() {
            error!(
                "Cannot create archive directory {}: {} - passes are skipped until it exists",
                config.paths.archive_dir.display(),
                e
            );
        }
        archive.warn_if_cross_device(&config.paths.intake_dir);
        if let Err(e) = archive.audit() {
            warn!("Cannot audit archive: {}", e);
        }

        let executor: Arc<dyn Executor> = Arc::new(SqliteExecutor::from_config(&config.database));
        let processor = Processor::new(config.paths.intake_dir.clone(), archive, executor);

        let mut settings = SchedulerSettings::from_config(&config);
        settings.max_passes = max_passes;
        if max_passes.is_none() {
            info!("Checking every {} second(s)", settings.poll_interval.as_secs());
        }

        let rt = tokio::runtime::Runtime::new()
            .map_err(|e| SqlDropError::Error(format!("Failed to create runtime: {}", e)))?;

        rt.block_on(async {
            let shutdown = CancellationToken::new();
            let signal_token = shutdown.clone();
            tokio::spawn(async move {
                shutdown_signal().await;
                signal_token.cancel();
            });

            let scheduler = Scheduler::new(settings, config.paths.intake_dir.clone(), processor);
            let report = scheduler.run(shutdown).await?;

            if let Some(summary) = report.last.as_ref().filter(|_| max_passes.is_some()) {
                if summary.skipped {
                    warn!("The pass was skipped because the archive directory is unavailable");
                }
                for (identity, outcome) in &summary.outcomes {
                    info!("{}: {}", identity, outcome);
                }
            }
            info!("sqldrop stopped after {} pass(es)", report.passes);

            Ok(())
        })
    }

    fn log_directory(label: &str, path: &Path) {
        match dunce::canonicalize(path) {
            Ok(resolved) => info!("{}: {} (exists: true)", label, resolved.display()),
            Err(_) => warn!("{}: {} (exists: false)", label, path.display()),
        }
    }
}
