//! In-memory `log` backend for tests that assert on diagnostics.
//!
//! The logger is process-global and installed once. Records are tagged with
//! the thread that emitted them, so a test only sees its own lines even when
//! other tests log concurrently.

use std::sync::{Mutex, Once};
use std::thread::{self, ThreadId};

use log::{Level, LevelFilter, Log, Metadata, Record};

struct CaptureLogger {
    records: Mutex<Vec<(ThreadId, Level, String)>>,
}

static CAPTURE: CaptureLogger = CaptureLogger {
    records: Mutex::new(Vec::new()),
};
static INSTALL: Once = Once::new();

impl Log for CaptureLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.target().starts_with("sqldrop")
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            if let Ok(mut records) = self.records.lock() {
                records.push((thread::current().id(), record.level(), record.args().to_string()));
            }
        }
    }

    fn flush(&self) {}
}

/// Install the capturing logger (once) and discard anything this thread
/// logged so far.
pub fn start() {
    INSTALL.call_once(|| {
        if log::set_logger(&CAPTURE).is_ok() {
            log::set_max_level(LevelFilter::Trace);
        }
    });
    take();
}

/// Remove and return the lines this thread logged since the last call
pub fn take() -> Vec<(Level, String)> {
    let me = thread::current().id();
    let mut records = CAPTURE.records.lock().unwrap();
    let (mine, others): (Vec<_>, Vec<_>) = records.drain(..).partition(|(id, _, _)| *id == me);
    *records = others;
    mine.into_iter().map(|(_, level, line)| (level, line)).collect()
}
