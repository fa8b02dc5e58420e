pub mod categories;
pub mod manager;

pub use categories::{BookUserMeta, CategoryStore, UserMetadata};
pub use manager::{BookSummary, LibraryError, LibraryManager};
