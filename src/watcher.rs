use std::path::Path;
use std::time::Duration;

use log::{debug, warn};
use notify_debouncer_mini::notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, Debouncer};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

use crate::error::SqlDropError;
use crate::intake::Intake;

const DEBOUNCE: Duration = Duration::from_millis(500);

/// Wakes the scheduler early when a unit shows up in the intake directory.
/// Polling remains the source of truth; a missed event only delays a unit
/// until the next regular pass.
pub struct IntakeWatcher {
    _debouncer: Debouncer<RecommendedWatcher>,
    rx: UnboundedReceiver<()>,
}

impl IntakeWatcher {
    pub fn start(intake_dir: &Path) -> Result<Self, SqlDropError> {
        let (tx, rx) = unbounded_channel();

        let mut debouncer = new_debouncer(DEBOUNCE, move |res: DebounceEventResult| match res {
            Ok(events) => {
                // Units moving out to the archive also raise events; only
                // entries still present count
                let unit_seen = events.iter().any(|event| {
                    event
                        .path
                        .file_name()
                        .and_then(|name| name.to_str())
                        .is_some_and(Intake::is_unit_name)
                        && event.path.is_file()
                });
                if unit_seen {
                    debug!("Intake change detected");
                    let _ = tx.send(());
                }
            }
            Err(e) => warn!("Intake watcher error: {}", e),
        })?;

        debouncer
            .watcher()
            .watch(intake_dir, RecursiveMode::NonRecursive)?;

        Ok(Self {
            _debouncer: debouncer,
            rx,
        })
    }

    /// Resolves when a unit-named entry was created or changed
    pub async fn changed(&mut self) {
        if self.rx.recv().await.is_none() {
            // Debouncer gone; never wake again
            std::future::pending::<()>().await;
        }
    }

    /// Discard notifications that arrived while a pass was running
    pub fn drain(&mut self) {
        while self.rx.try_recv().is_ok() {}
    }
}
