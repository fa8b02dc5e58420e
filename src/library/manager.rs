use crate::library::categories::CategoryStore;
use crate::metadata::{self, BookMetadata};
use serde::Serialize;
use std::fs;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid book directory: {0}")]
    InvalidBookDir(String),
    #[error("Book not found: {0}")]
    NotFound(String),
}

/// One book as presented in the library listing.
#[derive(Debug, Clone, Serialize)]
pub struct BookSummary {
    pub title: String,
    pub author: String,
    pub dir: String,
    pub cover: Option<String>,
    /// User-assigned categories from the category store. Descriptor subjects
    /// are intentionally ignored.
    pub subjects: Vec<String>,
}

/// Library-root operations: listing books and deleting them.
///
/// Listing re-resolves every descriptor on each call; there is no metadata
/// cache, the descriptor files are the source of truth.
#[derive(Debug, Clone)]
pub struct LibraryManager {
    library_root: PathBuf,
    categories: CategoryStore,
}

impl LibraryManager {
    pub fn new(library_root: PathBuf, categories: CategoryStore) -> Self {
        LibraryManager {
            library_root,
            categories,
        }
    }

    /// Enumerate book directories and resolve display metadata for each,
    /// overlaying stored user categories. Sorted by directory name.
    pub fn list_books(&self) -> Vec<BookSummary> {
        let user_meta = self.categories.load();
        let mut books = Vec::new();
        let Ok(entries) = fs::read_dir(&self.library_root) else {
            return books;
        };
        for entry in entries.flatten() {
            if !entry.path().is_dir() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            let BookMetadata {
                title,
                author,
                dir,
                cover,
                ..
            } = metadata::resolve_book_metadata(&self.library_root, &name);
            let subjects = user_meta
                .get(&name)
                .map(|m| m.categories.clone())
                .unwrap_or_default();
            books.push(BookSummary {
                title,
                author,
                dir,
                cover,
                subjects,
            });
        }
        books.sort_by(|a, b| a.dir.cmp(&b.dir));
        debug!("Found {} books in {}", books.len(), self.library_root.display());
        books
    }

    /// Delete a book directory. The name must be a plain directory name:
    /// separators and `..` are rejected before any filesystem access.
    pub fn delete_book(&self, book_dir: &str) -> Result<(), LibraryError> {
        if book_dir.is_empty()
            || book_dir.contains("..")
            || book_dir.contains('/')
            || book_dir.contains('\\')
        {
            return Err(LibraryError::InvalidBookDir(book_dir.to_string()));
        }
        let full_path = self.library_root.join(book_dir);
        if !full_path.is_dir() {
            return Err(LibraryError::NotFound(book_dir.to_string()));
        }
        fs::remove_dir_all(&full_path)?;
        info!("Deleted book directory: {}", full_path.display());
        Ok(())
    }
}
