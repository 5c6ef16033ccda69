use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use log::{debug, error, info, warn, Level};
use logging_timer::timer;
use strum::Display;

use crate::archive::Archive;
use crate::executor::Executor;
use crate::intake::Intake;
use crate::unit::Unit;

/// What happened to one unit during a pass
#[derive(Display, Debug, Clone, PartialEq, Eq)]
pub enum UnitOutcome {
    /// Applied and moved to the archive
    Archived { record_written: bool },
    /// Execution failed; the unit stays in intake for the next pass
    Failed(String),
    /// The payload could not be read; the unit stays in intake
    Unreadable(String),
    /// An archived unit with this identity already exists, so it was not executed
    AlreadyArchived,
    /// Applied, but the rename into the archive failed. The unit is held:
    /// later passes in this process retry the rename only.
    ArchiveFailed(String),
}

#[derive(Debug, Default)]
pub struct PassSummary {
    /// The pass did not run because the archive directory was unavailable
    pub skipped: bool,
    pub outcomes: Vec<(String, UnitOutcome)>,
}

impl PassSummary {
    fn skipped() -> Self {
        Self {
            skipped: true,
            outcomes: Vec::new(),
        }
    }

    pub fn found(&self) -> usize {
        self.outcomes.len()
    }

    pub fn archived(&self) -> usize {
        self.count(|o| matches!(o, UnitOutcome::Archived { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, UnitOutcome::Failed(_) | UnitOutcome::Unreadable(_)))
    }

    pub fn blocked(&self) -> usize {
        self.count(|o| matches!(o, UnitOutcome::AlreadyArchived | UnitOutcome::ArchiveFailed(_)))
    }

    #[cfg(test)]
    pub fn outcome(&self, identity: &str) -> Option<&UnitOutcome> {
        self.outcomes
            .iter()
            .find(|(id, _)| id == identity)
            .map(|(_, outcome)| outcome)
    }

    fn count(&self, pred: impl Fn(&UnitOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, o)| pred(o)).count()
    }
}

/// Runs scanning passes: enumerate intake, then execute and archive each unit
/// in turn.
pub struct Processor {
    intake_dir: PathBuf,
    archive: Archive,
    executor: Arc<dyn Executor>,
    // identity -> payload digest of units applied but not yet archived
    pending_archival: BTreeMap<String, String>,
}

impl Processor {
    pub fn new(intake_dir: PathBuf, archive: Archive, executor: Arc<dyn Executor>) -> Self {
        Self {
            intake_dir,
            archive,
            executor,
            pending_archival: BTreeMap::new(),
        }
    }

    pub fn executor(&self) -> &Arc<dyn Executor> {
        &self.executor
    }

    /// One scanning pass over the intake directory. Units are handled one at a
    /// time, and every unit is handled regardless of how earlier units fared.
    pub fn run_pass(&mut self) -> PassSummary {
        let _tmr = timer!(Level::Debug; "Processor::run_pass");

        if !self.archive.is_ready() {
            error!(
                "Archive directory {} is unavailable - skipping pass without executing anything",
                self.archive.dir().display()
            );
            return PassSummary::skipped();
        }

        let units = Intake::enumerate(&self.intake_dir);

        // Held units that an operator removed from intake are forgotten
        self.pending_archival
            .retain(|identity, _| units.iter().any(|u| u.identity() == identity));

        if units.is_empty() {
            info!("Found 0 SQL unit(s)");
            return PassSummary::default();
        }
        info!("Found {} SQL unit(s)", units.len());

        let mut summary = PassSummary::default();
        for unit in &units {
            let outcome = self.process_unit(unit);
            summary.outcomes.push((unit.identity().to_owned(), outcome));
        }

        info!(
            "Pass complete: {} of {} archived, {} failed, {} blocked",
            summary.archived(),
            summary.found(),
            summary.failed(),
            summary.blocked()
        );

        summary
    }

    fn process_unit(&mut self, unit: &Unit) -> UnitOutcome {
        let identity = unit.identity();

        if let Some(digest) = self.pending_archival.get(identity).cloned() {
            warn!("Retrying archival of already applied unit {} (not re-executing)", identity);
            return self.archive_applied(unit, digest);
        }

        if self.archive.contains(identity) {
            error!(
                "Unit {} is already in the archive - not executing; remove or rename it in intake",
                identity
            );
            return UnitOutcome::AlreadyArchived;
        }

        let payload = match unit.read_payload() {
            Ok(payload) => payload,
            Err(e) => {
                error!("Cannot read {}: {}", identity, e);
                return UnitOutcome::Unreadable(e.to_string());
            }
        };

        info!("Processing: {}", identity);
        match self.executor.execute(&payload) {
            Ok(()) => {
                info!("Executed {}", identity);
                self.archive_applied(unit, Unit::payload_digest(&payload))
            }
            Err(e) => {
                error!("Error executing {}: {} - left in intake for retry", identity, e);
                UnitOutcome::Failed(e.to_string())
            }
        }
    }

    fn archive_applied(&mut self, unit: &Unit, digest: String) -> UnitOutcome {
        let identity = unit.identity();

        match self.archive.archive_unit(unit, Some(digest.clone())) {
            Ok(receipt) => {
                self.pending_archival.remove(identity);
                info!("Moved {} to {}", identity, receipt.archived_path.display());
                if receipt.record_written {
                    debug!("Wrote completion record {}", receipt.record_path.display());
                }
                UnitOutcome::Archived {
                    record_written: receipt.record_written,
                }
            }
            Err(e) => {
                error!(
                    "INCONSISTENT: {} was applied but could not be archived: {}. \
                     It will not be executed again by this process; a restart would re-execute it",
                    identity, e
                );
                self.pending_archival.insert(identity.to_owned(), digest);
                UnitOutcome::ArchiveFailed(e.to_string())
            }
        }
    }
}
