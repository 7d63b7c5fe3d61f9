/// Extension-based category rules.
///
/// This module maps file extensions to the category folders files are moved
/// into (e.g., ".png" to "Images"). Every extension belongs to exactly one
/// category and anything unmatched lands in the fallback category.
///
/// # Examples
///
/// ```
/// use std::collections::BTreeMap;
/// use tidywatch::file_category::CategoryTable;
///
/// let mut rules = BTreeMap::new();
/// rules.insert("Documents".to_string(), vec![".pdf".to_string()]);
/// let table = CategoryTable::from_rules(&rules, "Misc").unwrap();
///
/// assert_eq!(table.lookup(".PDF"), "Documents");
/// assert_eq!(table.lookup(".xyz"), "Misc");
/// ```
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use thiserror::Error;

/// Errors raised while building a category table from configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CategoryTableError {
    /// The same extension was listed under two different categories.
    #[error("extension '{extension}' is mapped to both '{first}' and '{second}'")]
    ConflictingExtension {
        extension: String,
        first: String,
        second: String,
    },
    /// A category name was empty or not usable as a folder name.
    #[error("invalid category name '{0}'")]
    InvalidCategoryName(String),
    /// An extension entry was empty after trimming.
    #[error("empty extension listed under category '{0}'")]
    EmptyExtension(String),
}

/// Immutable mapping from lowercase extension (with its leading dot) to a
/// category name, plus the fallback category.
#[derive(Debug, Clone)]
pub struct CategoryTable {
    extension_map: HashMap<String, String>,
    categories: BTreeSet<String>,
    fallback: String,
}

impl CategoryTable {
    /// Builds a table from `category -> [extensions]` rules.
    ///
    /// Extensions are lower-cased and given a leading dot if they lack one.
    /// Repeats inside one category are collapsed; an extension claimed by two
    /// categories is rejected.
    pub fn from_rules(
        rules: &BTreeMap<String, Vec<String>>,
        fallback: &str,
    ) -> Result<Self, CategoryTableError> {
        validate_category_name(fallback)?;

        let mut extension_map: HashMap<String, String> = HashMap::new();
        let mut categories = BTreeSet::new();

        for (category, extensions) in rules {
            validate_category_name(category)?;
            categories.insert(category.clone());

            for raw in extensions {
                let extension = canonical_extension(raw)
                    .ok_or_else(|| CategoryTableError::EmptyExtension(category.clone()))?;

                match extension_map.get(&extension) {
                    Some(existing) if existing != category => {
                        return Err(CategoryTableError::ConflictingExtension {
                            extension,
                            first: existing.clone(),
                            second: category.clone(),
                        });
                    }
                    Some(_) => {}
                    None => {
                        extension_map.insert(extension, category.clone());
                    }
                }
            }
        }

        categories.insert(fallback.to_string());

        Ok(Self {
            extension_map,
            categories,
            fallback: fallback.to_string(),
        })
    }

    /// Returns the category for an extension such as ".pdf".
    ///
    /// The lookup is case-insensitive and never fails: unknown, empty, or
    /// malformed extensions map to the fallback category.
    pub fn lookup(&self, extension: &str) -> &str {
        self.extension_map
            .get(&extension.to_lowercase())
            .map(String::as_str)
            .unwrap_or(&self.fallback)
    }

    /// Returns the category for a path based on its final extension.
    pub fn lookup_path(&self, path: &Path) -> &str {
        match dotted_extension(path) {
            Some(extension) => self.lookup(&extension),
            None => &self.fallback,
        }
    }

    /// The catch-all category.
    pub fn fallback(&self) -> &str {
        &self.fallback
    }

    /// Every category name the table can produce, fallback included.
    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.categories.iter().map(String::as_str)
    }

    /// Whether `category` is one of the table's categories.
    pub fn contains_category(&self, category: &str) -> bool {
        self.categories.contains(category)
    }
}

/// Returns the lower-cased extension of `path` including the leading dot.
///
/// Files without an extension (including dotfiles like `.bashrc`) return `None`.
pub fn dotted_extension(path: &Path) -> Option<String> {
    path.extension()
        .map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()))
}

fn canonical_extension(raw: &str) -> Option<String> {
    let trimmed = raw.trim().trim_start_matches('.');
    if trimmed.is_empty() {
        return None;
    }
    Some(format!(".{}", trimmed.to_lowercase()))
}

fn validate_category_name(name: &str) -> Result<(), CategoryTableError> {
    let trimmed = name.trim();
    if trimmed.is_empty()
        || trimmed != name
        || name == "."
        || name == ".."
        || name.contains(['/', '\\'])
    {
        return Err(CategoryTableError::InvalidCategoryName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules(entries: &[(&str, &[&str])]) -> BTreeMap<String, Vec<String>> {
        entries
            .iter()
            .map(|(category, exts)| {
                (
                    category.to_string(),
                    exts.iter().map(|e| e.to_string()).collect(),
                )
            })
            .collect()
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let table = CategoryTable::from_rules(
            &rules(&[("Images", &[".png", ".jpg"]), ("Documents", &[".pdf"])]),
            "Misc",
        )
        .unwrap();

        assert_eq!(table.lookup(".png"), "Images");
        assert_eq!(table.lookup(".PNG"), "Images");
        assert_eq!(table.lookup(".Pdf"), "Documents");
    }

    #[test]
    fn test_lookup_unknown_returns_fallback() {
        let table = CategoryTable::from_rules(&rules(&[("Images", &[".png"])]), "Misc").unwrap();

        assert_eq!(table.lookup(".xyz"), "Misc");
        assert_eq!(table.lookup(""), "Misc");
        assert_eq!(table.lookup("png"), "Misc"); // missing dot
    }

    #[test]
    fn test_lookup_path() {
        let table =
            CategoryTable::from_rules(&rules(&[("Archives", &[".gz", ".zip"])]), "Misc").unwrap();

        assert_eq!(table.lookup_path(Path::new("/tmp/backup.tar.GZ")), "Archives");
        assert_eq!(table.lookup_path(Path::new("/tmp/README")), "Misc");
        assert_eq!(table.lookup_path(Path::new("/tmp/.bashrc")), "Misc");
    }

    #[test]
    fn test_extensions_are_canonicalized() {
        let table =
            CategoryTable::from_rules(&rules(&[("Media", &["MP3", " .flac "])]), "Misc").unwrap();

        assert_eq!(table.lookup(".mp3"), "Media");
        assert_eq!(table.lookup(".flac"), "Media");
    }

    #[test]
    fn test_duplicate_within_category_is_tolerated() {
        let table =
            CategoryTable::from_rules(&rules(&[("Media", &[".m4p", ".m4b", ".m4p"])]), "Misc")
                .unwrap();
        assert_eq!(table.lookup(".m4p"), "Media");
    }

    #[test]
    fn test_conflicting_extension_is_rejected() {
        let result = CategoryTable::from_rules(
            &rules(&[("Documents", &[".txt"]), ("Notes", &[".TXT"])]),
            "Misc",
        );
        assert!(matches!(
            result,
            Err(CategoryTableError::ConflictingExtension { .. })
        ));
    }

    #[test]
    fn test_invalid_category_name_is_rejected() {
        let result = CategoryTable::from_rules(&rules(&[("a/b", &[".png"])]), "Misc");
        assert!(matches!(
            result,
            Err(CategoryTableError::InvalidCategoryName(_))
        ));

        let result = CategoryTable::from_rules(&rules(&[]), "");
        assert!(result.is_err());
    }

    #[test]
    fn test_categories_include_fallback() {
        let table = CategoryTable::from_rules(&rules(&[("Images", &[".png"])]), "Misc").unwrap();
        let categories: Vec<_> = table.categories().collect();

        assert_eq!(categories, vec!["Images", "Misc"]);
        assert!(table.contains_category("Misc"));
        assert!(!table.contains_category("Documents"));
    }
}
