//! tidywatch - keeps a downloads-style folder sorted
//!
//! This library watches a single folder, classifies each new file by its
//! extension, and moves it into a category folder. PDFs bound for the
//! documents category can be routed one level deeper into a topical
//! subfolder suggested by an external document service.

pub mod classifier;
pub mod cli;
pub mod config;
pub mod dispatcher;
pub mod document_service;
pub mod file_category;
pub mod file_organizer;
pub mod logging;
pub mod output;
pub mod watcher;

pub use classifier::{Classifier, ResolveError};
pub use config::{CompiledFilters, ConfigError, Settings};
pub use dispatcher::{DispatchStats, Dispatcher, FileEvent, FileEventKind, Outcome};
pub use document_service::{
    DisabledDocumentService, DocumentService, DocumentUpload, OpenAiDocumentService, ServiceError,
};
pub use file_category::CategoryTable;
pub use file_organizer::{FileMover, MoveError};
pub use watcher::{DirectoryWatcher, WatchError};

pub use cli::{AppError, build_dispatcher, run_sweep, run_watch};
