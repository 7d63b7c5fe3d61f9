//! Command-line interface module for tidywatch.
//!
//! This module handles all CLI-related functionality including:
//! - Argument parsing
//! - Wiring configuration into the classifier, mover and dispatcher
//! - The long-running watch loop
//! - One-off sweeps over files already in the watch folder

use crate::classifier::{Classifier, is_pdf_path};
use crate::config::{ConfigError, Settings};
use crate::dispatcher::{DispatchStats, Dispatcher, Outcome};
use crate::document_service::{DisabledDocumentService, DocumentService, OpenAiDocumentService};
use crate::file_organizer::{FileMover, MoveError, MoverSetupError};
use crate::output::OutputFormatter;
use crate::watcher::{DirectoryWatcher, WatchError};
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use thiserror::Error;
use tracing::{info, warn};

/// Watch a folder and sort new files into category folders.
#[derive(Debug, Parser)]
#[command(name = "tidywatch", version, about)]
pub struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Folder to watch (overrides configuration and WATCH_FOLDER).
    #[arg(short, long, global = true)]
    pub watch_folder: Option<PathBuf>,

    /// Log at debug level.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Represents a CLI command to execute.
#[derive(Debug, Clone, Copy, Subcommand)]
pub enum Command {
    /// Watch the folder and sort files as they arrive (default).
    Watch,
    /// Sort the files already sitting in the folder, then exit.
    Sweep {
        /// Show where files would go without moving anything.
        #[arg(long)]
        dry_run: bool,
    },
}

/// Errors that stop a command before or outside per-file handling.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Inconsistent folder configuration: {0}")]
    MoverSetup(#[from] MoverSetupError),
    #[error(transparent)]
    Move(#[from] MoveError),
    #[error(transparent)]
    Watch(#[from] WatchError),
    #[error("Error reading directory {}: {source}", .path.display())]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Picks the document service implementation for `settings`.
///
/// A missing API key disables subcategories instead of failing startup.
pub fn document_service(settings: &Settings) -> Box<dyn DocumentService> {
    let service_settings = &settings.document_service;
    if !service_settings.enabled {
        info!("Document service disabled; PDFs go straight to {}", settings.documents_category);
        return Box::new(DisabledDocumentService);
    }

    match OpenAiDocumentService::from_settings(service_settings) {
        Ok(service) => Box::new(service),
        Err(e) => {
            warn!("PDF subcategories unavailable: {}", e);
            Box::new(DisabledDocumentService)
        }
    }
}

/// Builds the classify-and-move pipeline for the configured watch folder.
///
/// All configuration consistency checks happen here, before any event is
/// handled.
pub fn build_dispatcher(
    settings: &Settings,
    service: Box<dyn DocumentService>,
) -> Result<Dispatcher, AppError> {
    let watch_root = settings.watch_root()?;
    let table = settings.category_table()?;
    let filters = settings.compile_filters()?;

    let mover = FileMover::under_root(
        &table,
        &watch_root,
        &settings.documents_category,
        settings.mover.max_collision_attempts,
    )?;

    let classifier = Classifier::new(
        table,
        mover.documents_root().to_path_buf(),
        service,
        settings.document_service.max_upload_bytes,
    );

    Ok(Dispatcher::new(
        classifier,
        mover,
        filters,
        settings.documents_category.as_str(),
    ))
}

/// Watches `watch_root` until `stop` is set.
///
/// Category folders are created first, so the watcher never sees them as
/// new arrivals that need sorting.
pub fn run_watch(
    dispatcher: &Dispatcher,
    watch_root: &Path,
    queue_capacity: usize,
    stop: &AtomicBool,
) -> Result<DispatchStats, AppError> {
    dispatcher.mover().ensure_roots()?;

    let (watcher, events) = DirectoryWatcher::start(watch_root, queue_capacity)?;
    OutputFormatter::info(&format!(
        "Watching {}. Press Ctrl+C to stop.",
        watcher.root().display()
    ));

    let stats = dispatcher.run(&events, stop);
    drop(watcher);

    info!("File watcher stopped.");
    Ok(stats)
}

/// What a sweep did (or would do).
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    /// Files per destination, e.g. "Images" or "Documents/finance".
    pub destinations: BTreeMap<String, usize>,
    pub moved: usize,
    pub failed: usize,
}

/// Runs every file at the top level of `watch_root` through the pipeline.
///
/// With `dry_run`, files are only classified by extension; nothing is moved
/// and the document service is not contacted.
pub fn run_sweep(
    dispatcher: &Dispatcher,
    watch_root: &Path,
    dry_run: bool,
) -> Result<SweepReport, AppError> {
    let files = pending_files(dispatcher, watch_root)?;
    let mut report = SweepReport::default();

    if files.is_empty() {
        OutputFormatter::info("No files found to organize.");
        return Ok(report);
    }

    if dry_run {
        OutputFormatter::dry_run_notice(&format!(
            "Files in {} would be organized as follows:",
            watch_root.display()
        ));
        for path in &files {
            let category = dispatcher.classifier().table().lookup_path(path);
            let note = if category == dispatcher.documents_category() && is_pdf_path(path) {
                " (subfolder chosen on move)"
            } else {
                ""
            };
            println!(" - {} → {}/{}", display_name(path), category, note);
            *report.destinations.entry(category.to_string()).or_insert(0) += 1;
        }
        OutputFormatter::summary_table(&report.destinations, files.len(), 0);
        OutputFormatter::dry_run_notice("No files were modified.");
        return Ok(report);
    }

    OutputFormatter::info(&format!("Organizing contents of: {}", watch_root.display()));
    let pb = OutputFormatter::create_progress_bar(files.len() as u64);

    for path in &files {
        pb.set_message(display_name(path));
        match dispatcher.process_file(path) {
            Outcome::Moved {
                category,
                subcategory,
                ..
            } => {
                let destination = match subcategory {
                    Some(sub) => format!("{}/{}", category, sub),
                    None => category,
                };
                pb.suspend(|| {
                    OutputFormatter::success(&format!("{} → {}/", display_name(path), destination))
                });
                *report.destinations.entry(destination).or_insert(0) += 1;
                report.moved += 1;
            }
            Outcome::Failed { error, .. } => {
                pb.suspend(|| OutputFormatter::error(&format!("{}: {}", display_name(path), error)));
                report.failed += 1;
            }
            Outcome::Skipped(_) => {}
        }
        pb.inc(1);
    }
    pb.finish_with_message("done");

    OutputFormatter::summary_table(&report.destinations, report.moved, report.failed);
    if report.failed > 0 {
        OutputFormatter::warning("Some files could not be organized. Please review errors above.");
    }
    Ok(report)
}

/// Regular files at the top level of `watch_root` that pass the filters,
/// sorted by path.
fn pending_files(dispatcher: &Dispatcher, watch_root: &Path) -> Result<Vec<PathBuf>, AppError> {
    let entries = fs::read_dir(watch_root).map_err(|source| AppError::ReadDir {
        path: watch_root.to_path_buf(),
        source,
    })?;

    let mut files: Vec<PathBuf> = entries
        .flatten()
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .map(|entry| entry.path())
        .filter(|path| dispatcher.accepts(path))
        .collect();
    files.sort();
    Ok(files)
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}
