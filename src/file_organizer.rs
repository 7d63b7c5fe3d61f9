/// File organization system for moving files into category directories.
///
/// This module moves files into category-specific folders under the watch
/// root. It handles directory creation, filename collisions (`report.pdf`,
/// `report_1.pdf`, ...) and moves across filesystems.
use crate::file_category::CategoryTable;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind};
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Errors that can occur while moving a file.
#[derive(Debug, Error)]
pub enum MoveError {
    /// The file to move does not exist.
    #[error("File does not exist: {}", .0.display())]
    SourceMissing(PathBuf),
    /// The path has no file name component.
    #[error("Path has no file name: {}", .0.display())]
    NoFileName(PathBuf),
    /// No destination root is configured for the category.
    #[error("Unknown category: {0}")]
    UnknownCategory(String),
    /// The subcategory is not a single plain folder name.
    #[error("Invalid subcategory name: {0:?}")]
    InvalidSubcategory(String),
    /// Failed to create a destination directory.
    #[error("Failed to create directory {}: {source}", .path.display())]
    DirectoryCreationFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// Every candidate name up to the limit was taken.
    #[error("No free name for {} after {attempts} attempts", .path.display())]
    CollisionLimit { path: PathBuf, attempts: u32 },
    /// Failed to move the file to its destination.
    #[error("Failed to move {} to {}: {source}", .from.display(), .to.display())]
    MoveFailed {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Result type for file move operations.
pub type MoveResult<T> = Result<T, MoveError>;

/// Errors detected when the mover is built.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MoverSetupError {
    /// A category produced by the classifier has no destination root.
    #[error("category '{0}' has no destination folder")]
    MissingRoot(String),
    /// The documents category is not one of the table's categories.
    #[error("documents category '{0}' is not a known category")]
    UnknownDocumentsCategory(String),
}

/// Moves files into per-category destination folders.
#[derive(Debug, Clone)]
pub struct FileMover {
    roots: HashMap<String, PathBuf>,
    documents_category: String,
    max_collision_attempts: u32,
}

impl FileMover {
    /// Creates a mover with explicit destination roots.
    ///
    /// Every category of `table` (fallback included) must have a root, and
    /// `documents_category` must be one of them.
    pub fn new(
        table: &CategoryTable,
        roots: HashMap<String, PathBuf>,
        documents_category: &str,
        max_collision_attempts: u32,
    ) -> Result<Self, MoverSetupError> {
        if !table.contains_category(documents_category) {
            return Err(MoverSetupError::UnknownDocumentsCategory(
                documents_category.to_string(),
            ));
        }
        if let Some(missing) = table.categories().find(|c| !roots.contains_key(*c)) {
            return Err(MoverSetupError::MissingRoot(missing.to_string()));
        }

        Ok(Self {
            roots,
            documents_category: documents_category.to_string(),
            max_collision_attempts,
        })
    }

    /// Creates a mover whose roots are `watch_root/<category>`.
    pub fn under_root(
        table: &CategoryTable,
        watch_root: &Path,
        documents_category: &str,
        max_collision_attempts: u32,
    ) -> Result<Self, MoverSetupError> {
        let roots = table
            .categories()
            .map(|category| (category.to_string(), watch_root.join(category)))
            .collect();
        Self::new(table, roots, documents_category, max_collision_attempts)
    }

    /// Destination root for `category`, if configured.
    pub fn root_for(&self, category: &str) -> Option<&Path> {
        self.roots.get(category).map(PathBuf::as_path)
    }

    /// Root folder of the documents category.
    pub fn documents_root(&self) -> &Path {
        // Presence is checked in `new`.
        &self.roots[&self.documents_category]
    }

    /// Creates every category folder.
    pub fn ensure_roots(&self) -> MoveResult<()> {
        for root in self.roots.values() {
            create_dir(root)?;
            debug!("Ensured folder exists: {}", root.display());
        }
        Ok(())
    }

    /// Moves `file_path` into the folder of `category`.
    ///
    /// Returns the final destination path.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use std::collections::BTreeMap;
    /// use std::path::Path;
    /// use tidywatch::file_category::CategoryTable;
    /// use tidywatch::file_organizer::FileMover;
    ///
    /// let mut rules = BTreeMap::new();
    /// rules.insert("Documents".to_string(), vec![".pdf".to_string()]);
    /// let table = CategoryTable::from_rules(&rules, "Misc").unwrap();
    /// let mover = FileMover::under_root(&table, Path::new("/home/me/Downloads"), "Documents", 1000).unwrap();
    ///
    /// match mover.move_file(Path::new("/home/me/Downloads/notes.bin"), "Misc") {
    ///     Ok(dest) => println!("Moved to {}", dest.display()),
    ///     Err(e) => eprintln!("Move failed: {}", e),
    /// }
    /// ```
    pub fn move_file(&self, file_path: &Path, category: &str) -> MoveResult<PathBuf> {
        info!("Moving file: {} to {}", file_path.display(), category);
        if !file_path.exists() {
            return Err(MoveError::SourceMissing(file_path.to_path_buf()));
        }

        let root = self
            .roots
            .get(category)
            .ok_or_else(|| MoveError::UnknownCategory(category.to_string()))?;

        self.move_into(file_path, root)
    }

    /// Moves a document into `documents_root/subcategory`, or straight into
    /// the documents root when `subcategory` is `None`.
    ///
    /// New subcategory folders are lowercased; a folder that already exists
    /// under exactly the given name is reused as is.
    pub fn move_with_subcategory(
        &self,
        file_path: &Path,
        subcategory: Option<&str>,
    ) -> MoveResult<PathBuf> {
        if !file_path.exists() {
            return Err(MoveError::SourceMissing(file_path.to_path_buf()));
        }

        let documents_root = self.documents_root();
        let destination_root = match subcategory {
            Some(name) => subcategory_dir(documents_root, name)?,
            None => documents_root.to_path_buf(),
        };

        self.move_into(file_path, &destination_root)
    }

    fn move_into(&self, file_path: &Path, destination_root: &Path) -> MoveResult<PathBuf> {
        let file_name = file_path
            .file_name()
            .ok_or_else(|| MoveError::NoFileName(file_path.to_path_buf()))?;

        create_dir(destination_root)?;

        let first_candidate = destination_root.join(file_name);
        let mut start = 0;
        loop {
            let destination = self.unique_destination(&first_candidate, start)?;
            match relocate(file_path, &destination) {
                Ok(()) => {
                    info!(
                        "Moved {} to {}",
                        file_name.to_string_lossy(),
                        destination.display()
                    );
                    return Ok(destination);
                }
                // Taken between the existence check and the move.
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    start = suffix_of(&first_candidate, &destination) + 1;
                }
                Err(source) => {
                    return Err(MoveError::MoveFailed {
                        from: file_path.to_path_buf(),
                        to: destination,
                        source,
                    });
                }
            }
        }
    }

    /// First free path among `candidate`, `stem_1.ext`, `stem_2.ext`, ...
    /// starting at suffix `start` (0 means the bare name).
    fn unique_destination(&self, candidate: &Path, start: u32) -> MoveResult<PathBuf> {
        for n in start..=self.max_collision_attempts {
            let path = numbered_path(candidate, n);
            if !path.exists() {
                return Ok(path);
            }
        }
        Err(MoveError::CollisionLimit {
            path: candidate.to_path_buf(),
            attempts: self.max_collision_attempts,
        })
    }
}

/// `dir/stem_<n>.ext`, or `candidate` itself for `n == 0`.
///
/// The suffix goes before the last extension only, so `a.tar.gz` becomes
/// `a.tar_1.gz`.
pub fn numbered_path(candidate: &Path, n: u32) -> PathBuf {
    if n == 0 {
        return candidate.to_path_buf();
    }
    let stem = candidate
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match candidate.extension() {
        Some(ext) => format!("{}_{}.{}", stem, n, ext.to_string_lossy()),
        None => format!("{}_{}", stem, n),
    };
    candidate.with_file_name(name)
}

fn suffix_of(candidate: &Path, taken: &Path) -> u32 {
    if taken == candidate {
        return 0;
    }
    let stem = candidate
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    taken
        .file_stem()
        .and_then(|s| s.to_str())
        .and_then(|s| s.strip_prefix(stem.as_str()))
        .and_then(|s| s.strip_prefix('_'))
        .and_then(|n| n.parse().ok())
        .unwrap_or(0)
}

fn subcategory_dir(documents_root: &Path, name: &str) -> MoveResult<PathBuf> {
    let mut components = Path::new(name).components();
    let single_normal = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    );
    if name.trim().is_empty() || !single_normal || name.contains(['/', '\\']) {
        return Err(MoveError::InvalidSubcategory(name.to_string()));
    }

    let verbatim = documents_root.join(name);
    if verbatim.is_dir() {
        return Ok(verbatim);
    }
    Ok(documents_root.join(name.to_lowercase()))
}

fn create_dir(path: &Path) -> MoveResult<()> {
    fs::create_dir_all(path).map_err(|source| MoveError::DirectoryCreationFailed {
        path: path.to_path_buf(),
        source,
    })
}

/// Moves `from` to `to` without ever replacing an existing `to`.
///
/// Links the new name and then unlinks the old one, so a destination that
/// appeared since the existence check fails with `AlreadyExists`. Copies
/// across filesystems. Falls back to a plain rename where hard links are
/// unsupported.
fn relocate(from: &Path, to: &Path) -> io::Result<()> {
    match fs::hard_link(from, to) {
        Ok(()) => unlink_source(from, to),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(e),
        Err(e) if e.kind() == ErrorKind::CrossesDevices => copy_then_remove(from, to),
        Err(e) => {
            debug!("Hard link to {} failed ({}); renaming", to.display(), e);
            rename_or_copy(from, to)
        }
    }
}

fn unlink_source(from: &Path, to: &Path) -> io::Result<()> {
    if let Err(e) = fs::remove_file(from) {
        let _ = fs::remove_file(to);
        return Err(e);
    }
    Ok(())
}

fn rename_or_copy(from: &Path, to: &Path) -> io::Result<()> {
    if to.exists() {
        return Err(io::Error::from(ErrorKind::AlreadyExists));
    }
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::CrossesDevices => copy_then_remove(from, to),
        Err(e) => Err(e),
    }
}

/// Copies `from` into a newly created `to`, then removes `from`.
///
/// `to` must not exist yet. A failed copy removes the partial destination.
fn copy_then_remove(from: &Path, to: &Path) -> io::Result<()> {
    let mut source = File::open(from)?;
    let mut destination = OpenOptions::new().write(true).create_new(true).open(to)?;

    let copied = io::copy(&mut source, &mut destination).and_then(|_| destination.sync_all());
    drop(destination);
    if let Err(e) = copied {
        let _ = fs::remove_file(to);
        return Err(e);
    }

    if let Ok(metadata) = fs::metadata(from) {
        let _ = fs::set_permissions(to, metadata.permissions());
    }

    fs::remove_file(from)
}
