//! Watcher configuration.
//!
//! This module loads the folder layout, extension rules, document service
//! settings and file filtering rules from TOML configuration files. Filtering
//! supports several strategies:
//! - Exact filename matching
//! - Glob pattern matching
//! - File extension matching
//! - Regex pattern matching
//! - Include (whitelist) rules that override exclude rules
//!
//! # Configuration File Format
//!
//! ```toml
//! watch_folder = "~/Downloads"
//! fallback_category = "Misc"
//! documents_category = "Documents"
//!
//! [categories]
//! Images = [".jpg", ".png"]
//! Documents = [".pdf", ".docx"]
//!
//! [document_service]
//! enabled = true
//! model = "gpt-4o-mini"
//! timeout_secs = 30
//!
//! [filters]
//! enable_hidden_files = false
//!
//! [filters.exclude]
//! filenames = [".DS_Store", "Thumbs.db"]
//! patterns = ["*.crdownload", "*.part"]
//! extensions = ["tmp"]
//! regex = []
//!
//! [filters.include]
//! patterns = []
//! ```

use crate::file_category::{CategoryTable, CategoryTableError};
use glob::Pattern;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Configuration file not found at the specified path.
    #[error("Configuration file not found: {}", .0.display())]
    ConfigNotFound(PathBuf),
    /// Invalid TOML syntax or structure.
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),
    /// Invalid glob pattern provided.
    #[error("Invalid glob pattern '{0}': expected *.ext or dir/**")]
    InvalidGlobPattern(String),
    /// Invalid regex pattern provided with the actual error reason.
    #[error("Invalid regex pattern '{pattern}': {reason}")]
    InvalidRegexPattern {
        /// The regex pattern that failed to compile.
        pattern: String,
        /// The reason why the pattern is invalid.
        reason: String,
    },
    /// The extension rules are inconsistent.
    #[error("Invalid category rules: {0}")]
    InvalidCategories(#[from] CategoryTableError),
    /// The documents category has no extension rules.
    #[error("Documents category '{0}' is not defined in [categories]")]
    UnknownDocumentsCategory(String),
    /// No folder to watch could be determined.
    #[error("Watch folder is empty")]
    EmptyWatchFolder,
    /// IO error while reading configuration.
    #[error("IO error reading configuration: {0}")]
    IoError(String),
}

/// Top-level configuration, deserialized from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Folder to watch. `~` is expanded against the home directory.
    pub watch_folder: String,
    /// Category assigned when no extension rule matches.
    pub fallback_category: String,
    /// Category whose PDFs get a subcategory pass.
    pub documents_category: String,
    /// Category name to list of extensions.
    pub categories: BTreeMap<String, Vec<String>>,
    pub document_service: DocumentServiceSettings,
    pub mover: MoverSettings,
    pub watcher: WatcherSettings,
    pub filters: FilterRules,
    pub logging: LoggingSettings,
}

/// Settings for the document-understanding service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentServiceSettings {
    /// Set to false to move PDFs straight into the documents folder.
    pub enabled: bool,
    pub base_url: String,
    pub model: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    pub timeout_secs: u64,
    /// PDFs larger than this are not uploaded.
    pub max_upload_bytes: u64,
}

/// Settings for moving files.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MoverSettings {
    /// Highest `_<n>` suffix tried before a move is abandoned.
    pub max_collision_attempts: u32,
}

/// Settings for the directory watcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherSettings {
    /// Capacity of the queue between the watcher and the dispatcher.
    pub queue_capacity: usize,
}

/// Settings for log output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Directory for log files, relative to the working directory.
    pub directory: PathBuf,
    pub file_prefix: String,
    /// Default level when `RUST_LOG` is not set.
    pub level: String,
}

/// Root-level filter rules configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterRules {
    /// Whether to include hidden files (starting with "."). Defaults to false.
    #[serde(default = "default_enable_hidden_files")]
    pub enable_hidden_files: bool,

    /// Rules for excluding files.
    #[serde(default)]
    pub exclude: ExcludeRules,

    /// Rules for including files (whitelist, overrides exclude rules).
    #[serde(default)]
    pub include: IncludeRules,
}

/// Helper function for default value of `enable_hidden_files`.
fn default_enable_hidden_files() -> bool {
    false
}

/// Rules for excluding files from organization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExcludeRules {
    /// Exact filenames to exclude (e.g., ".DS_Store", "Thumbs.db").
    #[serde(default)]
    pub filenames: Vec<String>,

    /// Glob patterns to exclude (e.g., "*.crdownload", "*.part").
    #[serde(default)]
    pub patterns: Vec<String>,

    /// File extensions to exclude (e.g., "tmp", "lock").
    #[serde(default)]
    pub extensions: Vec<String>,

    /// Regex patterns to exclude (for advanced users).
    #[serde(default)]
    pub regex: Vec<String>,
}

/// Rules for including files, overriding exclude rules (whitelist).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IncludeRules {
    /// Glob patterns that override exclude rules.
    #[serde(default)]
    pub patterns: Vec<String>,
}

fn extension_list(extensions: &[&str]) -> Vec<String> {
    extensions.iter().map(|e| e.to_string()).collect()
}

/// The built-in extension rules.
pub fn default_categories() -> BTreeMap<String, Vec<String>> {
    let mut categories = BTreeMap::new();
    categories.insert(
        "Images".to_string(),
        extension_list(&[".jpg", ".jpeg", ".png", ".gif", ".bmp", ".tiff", ".ico", ".webp"]),
    );
    categories.insert(
        "Documents".to_string(),
        extension_list(&[".pdf", ".doc", ".docx", ".txt", ".xls", ".xlsx", ".ppt", ".pptx"]),
    );
    categories.insert(
        "Installers".to_string(),
        extension_list(&[".exe", ".dmg", ".pkg", ".deb", ".rpm", ".msi", ".app"]),
    );
    categories.insert(
        "Archives".to_string(),
        extension_list(&[".zip", ".tar", ".gz", ".bz2", ".rar", ".7z"]),
    );
    categories.insert(
        "Media".to_string(),
        extension_list(&[
            ".mp3", ".mp4", ".wav", ".m4a", ".aac", ".ogg", ".flac", ".wma", ".aiff", ".m4b",
            ".m4p", ".m4r", ".m4v",
        ]),
    );
    categories
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            watch_folder: "~/Downloads".to_string(),
            fallback_category: "Misc".to_string(),
            documents_category: "Documents".to_string(),
            categories: default_categories(),
            document_service: DocumentServiceSettings::default(),
            mover: MoverSettings::default(),
            watcher: WatcherSettings::default(),
            filters: FilterRules::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl Default for DocumentServiceSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            timeout_secs: 30,
            max_upload_bytes: 32 * 1024 * 1024,
        }
    }
}

impl DocumentServiceSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for MoverSettings {
    fn default() -> Self {
        Self {
            max_collision_attempts: 1000,
        }
    }
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("logs"),
            file_prefix: "tidywatch".to_string(),
            level: "info".to_string(),
        }
    }
}

impl Default for FilterRules {
    fn default() -> Self {
        Self {
            enable_hidden_files: false,
            exclude: ExcludeRules {
                filenames: vec![".DS_Store".to_string(), "Thumbs.db".to_string()],
                patterns: vec![
                    "*.crdownload".to_string(),
                    "*.part".to_string(),
                    "*.download".to_string(),
                    "*.tmp".to_string(),
                ],
                ..Default::default()
            },
            include: IncludeRules::default(),
        }
    }
}

impl Settings {
    /// Load configuration from a file, with fallback to defaults.
    ///
    /// Attempts to load configuration in the following order:
    /// 1. If `config_path` is provided, load from that file
    /// 2. Look for `.tidywatchrc.toml` in the current directory
    /// 3. Look for `~/.config/tidywatch/config.toml` in home directory
    /// 4. Fall back to default configuration
    ///
    /// The `WATCH_FOLDER` environment variable overrides `watch_folder`.
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration file is explicitly provided but cannot be read.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut settings = Self::load_without_env(config_path)?;
        if let Ok(folder) = std::env::var("WATCH_FOLDER")
            && !folder.trim().is_empty()
        {
            settings.watch_folder = folder;
        }
        Ok(settings)
    }

    fn load_without_env(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        // If explicitly specified, load from that path
        if let Some(path) = config_path {
            return Self::load_from_file(path);
        }

        let local_config = PathBuf::from(".tidywatchrc.toml");
        if local_config.exists() {
            return Self::load_from_file(&local_config);
        }

        if let Some(config_dir) = dirs::home_dir().map(|home| home.join(".config")) {
            let home_config = config_dir.join("tidywatch").join("config.toml");
            if home_config.exists() {
                return Self::load_from_file(&home_config);
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ConfigNotFound` if file does not exist.
    /// Returns `ConfigError::ConfigInvalid` if TOML parsing fails.
    /// Returns `ConfigError::IoError` if file cannot be read.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::ConfigNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ConfigInvalid(e.to_string()))
    }

    /// The watch folder with `~` expanded.
    pub fn watch_root(&self) -> Result<PathBuf, ConfigError> {
        let raw = self.watch_folder.trim();
        if raw.is_empty() {
            return Err(ConfigError::EmptyWatchFolder);
        }
        Ok(expand_home(raw))
    }

    /// Build the category table and check that the documents category exists.
    pub fn category_table(&self) -> Result<CategoryTable, ConfigError> {
        let table = CategoryTable::from_rules(&self.categories, &self.fallback_category)?;
        if !self.categories.contains_key(&self.documents_category) {
            return Err(ConfigError::UnknownDocumentsCategory(
                self.documents_category.clone(),
            ));
        }
        Ok(table)
    }

    /// Compile the filter rules into matchers.
    ///
    /// # Errors
    ///
    /// Returns an error if any regex or glob patterns are invalid.
    pub fn compile_filters(&self) -> Result<CompiledFilters, ConfigError> {
        CompiledFilters::new(self.filters.clone())
    }
}

/// Expands a leading `~` to the user's home directory.
fn expand_home(raw: &str) -> PathBuf {
    if raw == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    } else if let Some(rest) = raw.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    PathBuf::from(raw)
}

/// Compiled, optimized filter structures for efficient file matching.
///
/// This struct pre-processes all filter rules (glob patterns, regex patterns, etc.)
/// so that patterns are not reparsed for every incoming file.
#[derive(Debug)]
pub struct CompiledFilters {
    enable_hidden_files: bool,
    exclude_filenames: HashSet<String>,
    exclude_extensions: HashSet<String>,
    exclude_patterns: Vec<Pattern>,
    exclude_regexes: Vec<Regex>,
    include_patterns: Vec<Pattern>,
}

impl CompiledFilters {
    /// Create compiled filters from filter rules.
    ///
    /// # Errors
    ///
    /// Returns an error if any glob or regex patterns are invalid.
    pub fn new(rules: FilterRules) -> Result<Self, ConfigError> {
        let exclude_patterns = compile_globs(&rules.exclude.patterns)?;
        let include_patterns = compile_globs(&rules.include.patterns)?;

        let exclude_regexes = rules
            .exclude
            .regex
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|e| ConfigError::InvalidRegexPattern {
                    pattern: pattern.clone(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            enable_hidden_files: rules.enable_hidden_files,
            exclude_filenames: rules.exclude.filenames.into_iter().collect(),
            exclude_extensions: rules
                .exclude
                .extensions
                .iter()
                .map(|ext| ext.trim_start_matches('.').to_lowercase())
                .collect(),
            exclude_patterns,
            exclude_regexes,
            include_patterns,
        })
    }

    /// Check if a file should be handed to the pipeline (not excluded).
    ///
    /// Patterns are matched against the file name, since only the top level
    /// of the watch folder is ever seen. Checks are performed in this order:
    /// 1. Include patterns (whitelist) - if matched, always include
    /// 2. Hidden file filter - if hidden and disabled, exclude
    /// 3. Exact filename match - if matched, exclude
    /// 4. File extension match - if matched, exclude
    /// 5. Glob pattern match - if matched, exclude
    /// 6. Regex pattern match - if matched, exclude
    /// 7. Default: include
    pub fn should_include(&self, file_path: &Path) -> bool {
        let file_name = file_path
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default();

        if self.matches_any(&self.include_patterns, &file_name) {
            return true;
        }

        if !self.enable_hidden_files && file_name.starts_with('.') {
            return false;
        }

        if self.exclude_filenames.contains(file_name.as_ref()) {
            return false;
        }

        if let Some(ext) = file_path.extension() {
            let ext_lower = ext.to_string_lossy().to_lowercase();
            if self.exclude_extensions.contains(&ext_lower) {
                return false;
            }
        }

        if self.matches_any(&self.exclude_patterns, &file_name) {
            return false;
        }

        !self
            .exclude_regexes
            .iter()
            .any(|regex| regex.is_match(&file_name))
    }

    fn matches_any(&self, patterns: &[Pattern], file_name: &str) -> bool {
        patterns.iter().any(|pattern| pattern.matches(file_name))
    }
}

fn compile_globs(patterns: &[String]) -> Result<Vec<Pattern>, ConfigError> {
    patterns
        .iter()
        .map(|pattern| {
            Pattern::new(pattern).map_err(|_| ConfigError::InvalidGlobPattern(pattern.clone()))
        })
        .collect()
}
