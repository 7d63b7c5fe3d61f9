//! File classification.
//!
//! [`Classifier::classify`] picks a category from the extension rules.
//! [`Classifier::resolve_subcategory`] asks the document service where a PDF
//! belongs inside the documents folder and reconciles the answer with the
//! folders that already exist there.

use crate::document_service::{DocumentService, DocumentUpload, ServiceError};
use crate::file_category::{CategoryTable, dotted_extension};
use regex::Regex;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Extension that makes a document eligible for a subcategory.
pub const PDF_EXTENSION: &str = ".pdf";

const PDF_MIME: &str = "application/pdf";

static NON_ALPHANUMERIC_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9]+").expect("Invalid normalization pattern"));

/// Why a PDF did not get a subcategory.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The path is missing or is not a `.pdf` file; the service was not called.
    #[error("{} is not an existing PDF file", .0.display())]
    NotApplicable(PathBuf),
    /// The file could not be read.
    #[error("failed to read {}: {source}", .path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The content does not look like a PDF.
    #[error("content is not a PDF (detected {})", .detected.as_deref().unwrap_or("unknown type"))]
    NotPdfContent { detected: Option<String> },
    /// The file is larger than the upload limit.
    #[error("file is {size} bytes, over the {limit} byte upload limit")]
    TooLarge { size: u64, limit: u64 },
    /// The document service call failed.
    #[error(transparent)]
    Service(#[from] ServiceError),
    /// The reply normalized to nothing.
    #[error("service reply {0:?} contains no usable folder name")]
    EmptyReply(String),
}

/// Normalizes a folder name for comparison.
///
/// Trims, lowercases, collapses every run of characters outside `[a-z0-9]`
/// into one hyphen and strips leading/trailing hyphens. Idempotent.
///
/// ```
/// use tidywatch::classifier::normalize_folder_name;
///
/// assert_eq!(normalize_folder_name("  Finance Documents!! "), "finance-documents");
/// assert_eq!(normalize_folder_name("--Tax__2024--"), "tax-2024");
/// assert_eq!(normalize_folder_name("???"), "");
/// ```
pub fn normalize_folder_name(raw: &str) -> String {
    let lowered = raw.trim().to_lowercase();
    NON_ALPHANUMERIC_RUN
        .replace_all(&lowered, "-")
        .trim_matches('-')
        .to_string()
}

/// Reconciles a normalized candidate with existing folder names.
///
/// Returns the stored name of the first existing folder whose normalized form
/// equals `candidate`, or `candidate` itself when nothing matches.
pub fn match_existing_folder(candidate: &str, existing_folders: &[String]) -> String {
    let mut normalized: HashMap<String, &String> = HashMap::new();
    for folder in existing_folders {
        normalized
            .entry(normalize_folder_name(folder))
            .or_insert(folder);
    }

    match normalized.get(candidate) {
        Some(folder) => (*folder).clone(),
        None => candidate.to_string(),
    }
}

/// Lists the immediate subdirectories of `root`, sorted by name.
///
/// A missing or unreadable root yields an empty list.
pub fn existing_subfolders(root: &Path) -> Vec<String> {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) => {
            debug!("Could not list {}: {}", root.display(), e);
            return Vec::new();
        }
    };

    let mut folders: Vec<String> = entries
        .flatten()
        .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    folders.sort();
    folders
}

/// Returns true when `path` has the `.pdf` extension, in any case.
pub fn is_pdf_path(path: &Path) -> bool {
    dotted_extension(path).as_deref() == Some(PDF_EXTENSION)
}

/// Classifies files into categories and PDF documents into subcategories.
pub struct Classifier {
    table: CategoryTable,
    documents_root: PathBuf,
    service: Box<dyn DocumentService>,
    max_upload_bytes: u64,
}

impl Classifier {
    pub fn new(
        table: CategoryTable,
        documents_root: PathBuf,
        service: Box<dyn DocumentService>,
        max_upload_bytes: u64,
    ) -> Self {
        Self {
            table,
            documents_root,
            service,
            max_upload_bytes,
        }
    }

    /// The category table used for classification.
    pub fn table(&self) -> &CategoryTable {
        &self.table
    }

    /// Returns the category for `path`.
    ///
    /// Never fails. A path that no longer exists is logged and gets the
    /// fallback category.
    pub fn classify(&self, path: &Path) -> String {
        if !path.exists() {
            warn!("File does not exist: {}", path.display());
            return self.table.fallback().to_string();
        }

        let category = self.table.lookup_path(path);
        info!(
            "File {} classified as {} (extension: {})",
            display_name(path),
            category,
            dotted_extension(path).as_deref().unwrap_or("none")
        );
        category.to_string()
    }

    /// Asks the document service for a subfolder for the PDF at `path`.
    ///
    /// Returns the stored name of an existing folder when the reply matches
    /// one after normalization, otherwise the normalized reply as a new
    /// subcategory name.
    pub fn resolve_subcategory(&self, path: &Path) -> Result<String, ResolveError> {
        if !path.is_file() || !is_pdf_path(path) {
            return Err(ResolveError::NotApplicable(path.to_path_buf()));
        }

        let existing_folders = existing_subfolders(&self.documents_root);
        info!("Existing document folders: {:?}", existing_folders);

        let bytes = self.read_document(path)?;
        let file_name = display_name(path);

        let reply = self.service.suggest_subcategory(
            DocumentUpload {
                file_name: &file_name,
                bytes: &bytes,
            },
            &existing_folders,
        )?;

        let candidate = normalize_folder_name(&reply);
        if candidate.is_empty() {
            return Err(ResolveError::EmptyReply(reply));
        }

        let subcategory = match_existing_folder(&candidate, &existing_folders);
        debug!(
            reply = %reply.trim(),
            %candidate,
            %subcategory,
            "Resolved document subcategory"
        );
        Ok(subcategory)
    }

    fn read_document(&self, path: &Path) -> Result<Vec<u8>, ResolveError> {
        let unreadable = |source: std::io::Error| ResolveError::Unreadable {
            path: path.to_path_buf(),
            source,
        };

        let size = fs::metadata(path).map_err(unreadable)?.len();
        if size > self.max_upload_bytes {
            return Err(ResolveError::TooLarge {
                size,
                limit: self.max_upload_bytes,
            });
        }

        let bytes = fs::read(path).map_err(unreadable)?;
        match infer::get(&bytes) {
            Some(kind) if kind.mime_type() == PDF_MIME => Ok(bytes),
            other => Err(ResolveError::NotPdfContent {
                detected: other.map(|kind| kind.mime_type().to_string()),
            }),
        }
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
