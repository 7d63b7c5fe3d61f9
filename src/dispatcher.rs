//! Event dispatch.
//!
//! The dispatcher consumes [`FileEvent`]s one at a time and drives each new
//! file through classification and the move. Nothing is carried over from
//! one event to the next, and a failure (or panic) while handling one file
//! never stops the loop.

use crate::classifier::{Classifier, ResolveError, is_pdf_path};
use crate::config::CompiledFilters;
use crate::file_organizer::{FileMover, MoveError};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// How often the run loop checks the stop flag while idle.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// What the watch mechanism observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileEventKind {
    Created,
    Modified,
    Renamed { from: PathBuf },
}

/// A notification from the watch mechanism.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    pub path: PathBuf,
    pub is_directory: bool,
    pub kind: FileEventKind,
}

impl FileEvent {
    pub fn created(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            is_directory: false,
            kind: FileEventKind::Created,
        }
    }
}

/// Why an event did not lead to a move attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    Directory,
    NotCreation,
    Filtered,
    Panicked,
}

/// Result of handling one event.
#[derive(Debug)]
pub enum Outcome {
    Moved {
        destination: PathBuf,
        category: String,
        subcategory: Option<String>,
    },
    Failed {
        category: String,
        error: MoveError,
    },
    Skipped(SkipReason),
}

/// Counters for one run of the dispatch loop.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchStats {
    pub moved: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl DispatchStats {
    pub fn record(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Moved { .. } => self.moved += 1,
            Outcome::Failed { .. } => self.failed += 1,
            Outcome::Skipped(_) => self.skipped += 1,
        }
    }
}

/// Drives classification and moves for incoming files.
pub struct Dispatcher {
    classifier: Classifier,
    mover: FileMover,
    filters: CompiledFilters,
    documents_category: String,
}

impl Dispatcher {
    pub fn new(
        classifier: Classifier,
        mover: FileMover,
        filters: CompiledFilters,
        documents_category: impl Into<String>,
    ) -> Self {
        Self {
            classifier,
            mover,
            filters,
            documents_category: documents_category.into(),
        }
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    pub fn mover(&self) -> &FileMover {
        &self.mover
    }

    pub fn documents_category(&self) -> &str {
        &self.documents_category
    }

    /// Whether the filter rules let `path` through.
    pub fn accepts(&self, path: &Path) -> bool {
        self.filters.should_include(path)
    }

    /// Consumes events until `stop` is set or the sender goes away.
    ///
    /// The stop flag is checked between events, so an in-flight move always
    /// completes.
    pub fn run(&self, events: &Receiver<FileEvent>, stop: &AtomicBool) -> DispatchStats {
        let mut stats = DispatchStats::default();
        info!("Dispatcher started");

        while !stop.load(Ordering::SeqCst) {
            match events.recv_timeout(POLL_INTERVAL) {
                Ok(event) => {
                    let outcome = self.dispatch(&event);
                    stats.record(&outcome);
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    debug!("Event channel closed");
                    break;
                }
            }
        }

        info!(
            moved = stats.moved,
            failed = stats.failed,
            skipped = stats.skipped,
            "Dispatcher stopped"
        );
        stats
    }

    /// Handles one event, turning a panic into a logged skip.
    pub fn dispatch(&self, event: &FileEvent) -> Outcome {
        match panic::catch_unwind(AssertUnwindSafe(|| self.handle_event(event))) {
            Ok(outcome) => outcome,
            Err(_) => {
                error!(
                    "Handling {} panicked; file left in place",
                    event.path.display()
                );
                Outcome::Skipped(SkipReason::Panicked)
            }
        }
    }

    /// Handles one event without panic protection.
    pub fn handle_event(&self, event: &FileEvent) -> Outcome {
        match &event.kind {
            FileEventKind::Created => {}
            FileEventKind::Modified => {
                debug!("File modified: {}", event.path.display());
                return Outcome::Skipped(SkipReason::NotCreation);
            }
            FileEventKind::Renamed { from } => {
                debug!(
                    "File moved/renamed: {} -> {}",
                    from.display(),
                    event.path.display()
                );
                return Outcome::Skipped(SkipReason::NotCreation);
            }
        }

        if event.is_directory {
            debug!("Ignoring new directory: {}", event.path.display());
            return Outcome::Skipped(SkipReason::Directory);
        }

        if !self.accepts(&event.path) {
            debug!("Ignoring filtered file: {}", event.path.display());
            return Outcome::Skipped(SkipReason::Filtered);
        }

        info!("New file created: {}", event.path.display());
        self.process_file(&event.path)
    }

    /// Classifies and moves one file.
    pub fn process_file(&self, path: &Path) -> Outcome {
        if let Ok(metadata) = path.metadata() {
            debug!("File size: {} bytes", metadata.len());
        }

        let category = self.classifier.classify(path);

        let (result, subcategory) = if category == self.documents_category && is_pdf_path(path) {
            let subcategory = self.subcategory_for(path);
            match self.mover.move_with_subcategory(path, subcategory.as_deref()) {
                Err(MoveError::InvalidSubcategory(name)) => {
                    warn!(
                        "Unusable subfolder {:?} for {}; keeping it in {}",
                        name,
                        path.display(),
                        category
                    );
                    (self.mover.move_with_subcategory(path, None), None)
                }
                result => (result, subcategory),
            }
        } else {
            (self.mover.move_file(path, &category), None)
        };

        match result {
            Ok(destination) => {
                match &subcategory {
                    Some(sub) => info!("Moved PDF to {}/{}", category, sub),
                    None => info!("Moved new file to {}", category),
                }
                Outcome::Moved {
                    destination,
                    category,
                    subcategory,
                }
            }
            Err(error) => {
                match &error {
                    MoveError::UnknownCategory(_) => error!("{}", error),
                    _ => warn!("Move failed for {}: {}", path.display(), error),
                }
                Outcome::Failed { category, error }
            }
        }
    }

    /// Every resolution error means "no subcategory".
    fn subcategory_for(&self, path: &Path) -> Option<String> {
        match self.classifier.resolve_subcategory(path) {
            Ok(subcategory) => Some(subcategory),
            Err(ResolveError::NotApplicable(_)) => None,
            Err(e @ ResolveError::Service(_)) => {
                warn!("PDF classify failed for {}: {}", path.display(), e);
                None
            }
            Err(e) => {
                info!("No subcategory for {}: {}", path.display(), e);
                None
            }
        }
    }
}
