use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use strum::Display;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::SqlDropError;
use crate::executor::Executor;
use crate::processor::{PassSummary, Processor};
use crate::watcher::IntakeWatcher;

#[derive(Display, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Connecting,
    Scanning,
    Idle,
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub poll_interval: Duration,
    pub connect_attempts: u32,
    pub connect_backoff: Duration,
    pub watch: bool,
    /// Stop after this many passes; `None` runs until shutdown
    pub max_passes: Option<u64>,
}

impl SchedulerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            poll_interval: config.scheduler.poll_interval(),
            connect_attempts: config.database.connect_attempts,
            connect_backoff: config.database.connect_backoff(),
            watch: config.scheduler.watch,
            max_passes: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub passes: u64,
    pub last: Option<PassSummary>,
}

/// Drives the Connecting -> Scanning -> Idle -> Scanning ... cycle.
///
/// Blocking work (probe, pass) runs on the blocking pool and always runs to
/// completion. Shutdown is only observed while waiting: during connect backoff
/// and during the idle sleep.
pub struct Scheduler {
    settings: SchedulerSettings,
    intake_dir: PathBuf,
    processor: Processor,
}

impl Scheduler {
    pub fn new(settings: SchedulerSettings, intake_dir: PathBuf, processor: Processor) -> Self {
        Self {
            settings,
            intake_dir,
            processor,
        }
    }

    pub async fn run(self, shutdown: CancellationToken) -> Result<RunReport, SqlDropError> {
        let Scheduler {
            settings,
            intake_dir,
            mut processor,
        } = self;

        let mut watcher = if settings.watch {
            match IntakeWatcher::start(&intake_dir) {
                Ok(watcher) => {
                    info!("Watching {} for new units", intake_dir.display());
                    Some(watcher)
                }
                Err(e) => {
                    warn!("Cannot watch {}: {} - relying on polling only", intake_dir.display(), e);
                    None
                }
            }
        } else {
            None
        };

        let mut report = RunReport::default();
        let mut state = SchedulerState::Connecting;

        loop {
            debug!("Scheduler state: {}", state);

            state = match state {
                SchedulerState::Connecting => {
                    let executor = Arc::clone(processor.executor());
                    if !Self::wait_for_database(executor, &settings, &shutdown).await? {
                        return Ok(report);
                    }
                    SchedulerState::Scanning
                }
                SchedulerState::Scanning => {
                    let (returned, summary) = tokio::task::spawn_blocking(move || {
                        let summary = processor.run_pass();
                        (processor, summary)
                    })
                    .await
                    .map_err(|e| SqlDropError::Error(format!("Scanning pass aborted: {}", e)))?;

                    processor = returned;
                    report.passes += 1;
                    report.last = Some(summary);

                    if settings.max_passes.is_some_and(|max| report.passes >= max) {
                        return Ok(report);
                    }
                    SchedulerState::Idle
                }
                SchedulerState::Idle => {
                    if let Some(watcher) = watcher.as_mut() {
                        watcher.drain();
                    }

                    tokio::select! {
                        _ = tokio::time::sleep(settings.poll_interval) => {
                            info!("Checking for updates...");
                        }
                        _ = Self::intake_changed(&mut watcher) => {
                            info!("New unit detected - checking for updates early");
                        }
                        _ = shutdown.cancelled() => {
                            info!("Shutdown requested - scheduler stopping");
                            return Ok(report);
                        }
                    }
                    SchedulerState::Scanning
                }
            };
        }
    }

    /// Probe the database until it answers, up to the configured number of
    /// attempts. Returns `Ok(false)` if shutdown was requested while waiting.
    pub async fn wait_for_database(
        executor: Arc<dyn Executor>,
        settings: &SchedulerSettings,
        shutdown: &CancellationToken,
    ) -> Result<bool, SqlDropError> {
        info!("Waiting for database connection...");

        for attempt in 1..=settings.connect_attempts {
            let probe_executor = Arc::clone(&executor);
            let probe = tokio::task::spawn_blocking(move || probe_executor.probe())
                .await
                .map_err(|e| SqlDropError::Error(format!("Database probe aborted: {}", e)))?;

            match probe {
                Ok(()) => {
                    info!("Database connection established");
                    return Ok(true);
                }
                Err(e) if attempt == settings.connect_attempts => {
                    error!(
                        "Failed to connect to database after {} attempt(s): {}",
                        attempt, e
                    );
                    return Err(SqlDropError::DatabaseUnavailable {
                        attempts: settings.connect_attempts,
                    });
                }
                Err(e) => {
                    warn!(
                        "Database not reachable (attempt {}/{}): {}",
                        attempt, settings.connect_attempts, e
                    );
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(settings.connect_backoff) => {}
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested while waiting for database");
                    return Ok(false);
                }
            }
        }

        // Only reachable with zero attempts configured
        Err(SqlDropError::DatabaseUnavailable { attempts: 0 })
    }

    async fn intake_changed(watcher: &mut Option<IntakeWatcher>) {
        match watcher {
            Some(watcher) => watcher.changed().await,
            None => std::future::pending::<()>().await,
        }
    }
}

/// Waits for a shutdown signal (SIGTERM or SIGINT)
pub async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C)");
        },
        _ = terminate => {
            info!("Received SIGTERM");
        },
    }
}
