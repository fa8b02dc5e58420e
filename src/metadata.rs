//! Package metadata extraction for one book directory.
//!
//! Reads the OPF descriptor (when present) for title, author and the cover
//! image. Cover resolution tries five strategies in order, first hit wins:
//!
//! 1. Manifest item with `properties="cover-image"` (EPUB 3).
//! 2. `<meta name="cover" content="...">` pointer (EPUB 2), resolved by item
//!    id, then by item href, then as a literal path when it looks like one.
//! 3. Conventional item ids `cover-image` / `cover`.
//! 4. When the selected item is not an image, its target is treated as a
//!    wrapper document and the first embedded image reference is used.
//! 5. First image-typed item whose id or href mentions "cover".
//!
//! Every candidate must canonicalize to an existing file inside the book's
//! own directory. Anything outside is dropped silently and the chain moves
//! on, so a crafted descriptor cannot point a cover at arbitrary files.

use regex::Regex;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "svg", "bmp"];

/// Display metadata for one book, as returned by the library listing.
#[derive(Debug, Clone, Serialize)]
pub struct BookMetadata {
    pub title: String,
    pub author: String,
    /// Directory name under the library root.
    pub dir: String,
    /// Cover path relative to the library root, `/`-separated.
    pub cover: Option<String>,
    #[serde(skip)]
    pub descriptor_found: bool,
}

impl BookMetadata {
    fn fallback(book_dir: &str, descriptor_found: bool) -> Self {
        BookMetadata {
            title: book_dir.to_string(),
            author: "Unknown".to_string(),
            dir: book_dir.to_string(),
            cover: None,
            descriptor_found,
        }
    }
}

/// One `<item>` entry from the descriptor's manifest.
#[derive(Debug, Clone)]
struct ManifestItem {
    id: String,
    href: String,
    media_type: String,
    properties: String,
}

impl ManifestItem {
    fn is_image(&self) -> bool {
        self.media_type.starts_with("image/")
    }
}

/// Resolve title, author and cover for `book_dir` under `library_root`.
///
/// Never fails: a missing or malformed descriptor degrades to the directory
/// name, "Unknown" author and no cover.
pub fn resolve_book_metadata(library_root: &Path, book_dir: &str) -> BookMetadata {
    let book_root = library_root.join(book_dir);
    let Some(opf_path) = find_descriptor(&book_root) else {
        return BookMetadata::fallback(book_dir, false);
    };
    match parse_descriptor(library_root, &book_root, &opf_path, book_dir) {
        Ok(metadata) => metadata,
        Err(e) => {
            warn!("Malformed descriptor {}: {}", opf_path.display(), e);
            BookMetadata::fallback(book_dir, true)
        }
    }
}

/// First `.opf` file under the book directory, in sorted path order.
fn find_descriptor(book_root: &Path) -> Option<PathBuf> {
    let mut found = Vec::new();
    collect_descriptors(book_root, &mut found);
    found.sort();
    found.into_iter().next()
}

fn collect_descriptors(dir: &Path, found: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_descriptors(&path, found);
        } else if path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("opf"))
        {
            found.push(path);
        }
    }
}

fn parse_descriptor(
    library_root: &Path,
    book_root: &Path,
    opf_path: &Path,
    book_dir: &str,
) -> Result<BookMetadata, String> {
    let text = fs::read_to_string(opf_path).map_err(|e| e.to_string())?;
    let doc = roxmltree::Document::parse(&text).map_err(|e| e.to_string())?;

    // Tags are matched by local name so both `<dc:title>` and `<title>`
    // conventions resolve.
    let title = element_text(&doc, "title").unwrap_or_else(|| book_dir.to_string());
    let author = element_text(&doc, "creator").unwrap_or_else(|| "Unknown".to_string());

    let items = manifest_items(&doc);
    let meta_cover_pointer = doc
        .descendants()
        .find(|n| {
            n.is_element() && n.tag_name().name() == "meta" && n.attribute("name") == Some("cover")
        })
        .and_then(|n| n.attribute("content"))
        .map(str::to_string);

    let cover = CoverResolver::new(library_root, book_root, opf_path, &items)
        .and_then(|resolver| resolver.resolve(meta_cover_pointer.as_deref()));

    Ok(BookMetadata {
        title,
        author,
        dir: book_dir.to_string(),
        cover,
        descriptor_found: true,
    })
}

fn element_text(doc: &roxmltree::Document, local_name: &str) -> Option<String> {
    doc.descendants()
        .find(|n| n.is_element() && n.tag_name().name() == local_name)
        .and_then(|n| n.text())
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

fn manifest_items(doc: &roxmltree::Document) -> Vec<ManifestItem> {
    let Some(manifest) = doc
        .descendants()
        .find(|n| n.is_element() && n.tag_name().name() == "manifest")
    else {
        return Vec::new();
    };
    manifest
        .children()
        .filter(|n| n.is_element() && n.tag_name().name() == "item")
        .map(|item| ManifestItem {
            id: item.attribute("id").unwrap_or_default().to_string(),
            href: item.attribute("href").unwrap_or_default().to_string(),
            media_type: item.attribute("media-type").unwrap_or_default().to_string(),
            properties: item.attribute("properties").unwrap_or_default().to_string(),
        })
        .collect()
}

/// Ordered cover lookup over the parsed manifest. All candidate paths pass
/// through [`CoverResolver::accept`] before being returned.
struct CoverResolver<'a> {
    /// Canonical library root; accepted paths are reported relative to it.
    library_root: PathBuf,
    /// Canonical book directory; the containment boundary.
    book_root: PathBuf,
    /// Directory of the descriptor; manifest hrefs resolve against it.
    opf_dir: PathBuf,
    items: &'a [ManifestItem],
}

impl<'a> CoverResolver<'a> {
    fn new(
        library_root: &Path,
        book_root: &Path,
        opf_path: &Path,
        items: &'a [ManifestItem],
    ) -> Option<Self> {
        Some(CoverResolver {
            library_root: library_root.canonicalize().ok()?,
            book_root: book_root.canonicalize().ok()?,
            opf_dir: opf_path.parent()?.to_path_buf(),
            items,
        })
    }

    fn resolve(&self, meta_pointer: Option<&str>) -> Option<String> {
        self.by_properties_flag()
            .or_else(|| meta_pointer.and_then(|pointer| self.by_meta_pointer(pointer)))
            .or_else(|| self.by_conventional_id())
            .or_else(|| self.by_cover_substring())
    }

    /// Strategy 1: EPUB 3 `properties="cover-image"` flag.
    fn by_properties_flag(&self) -> Option<String> {
        let item = self
            .items
            .iter()
            .find(|i| i.properties.split_whitespace().any(|p| p == "cover-image"))?;
        self.resolve_item(item)
    }

    /// Strategy 2: EPUB 2 `<meta name="cover">` pointer, tried as an item
    /// id, an item href, then a literal path.
    fn by_meta_pointer(&self, pointer: &str) -> Option<String> {
        if let Some(item) = self.items.iter().find(|i| i.id == pointer) {
            if let Some(path) = self.resolve_item(item) {
                return Some(path);
            }
        }
        if let Some(item) = self.items.iter().find(|i| i.href == pointer) {
            if let Some(path) = self.resolve_item(item) {
                return Some(path);
            }
        }
        if looks_like_path(pointer) {
            return self.accept(&self.opf_dir, pointer);
        }
        None
    }

    /// Strategy 3: conventional item ids.
    fn by_conventional_id(&self) -> Option<String> {
        ["cover-image", "cover"].iter().find_map(|id| {
            let item = self.items.iter().find(|i| i.id == *id)?;
            self.resolve_item(item)
        })
    }

    /// Strategy 5: first image item whose id or href mentions "cover".
    fn by_cover_substring(&self) -> Option<String> {
        self.items
            .iter()
            .filter(|i| i.is_image())
            .find(|i| {
                i.id.to_lowercase().contains("cover") || i.href.to_lowercase().contains("cover")
            })
            .and_then(|item| self.accept(&self.opf_dir, &item.href))
    }

    /// Resolve a selected manifest item to a validated cover path. Non-image
    /// items are treated as wrapper documents (strategy 4).
    fn resolve_item(&self, item: &ManifestItem) -> Option<String> {
        if item.is_image() {
            self.accept(&self.opf_dir, &item.href)
        } else {
            self.through_wrapper(&item.href)
        }
    }

    /// Strategy 4: pull the first embedded image out of a wrapper document
    /// (an XHTML or SVG page whose sole purpose is displaying the cover).
    fn through_wrapper(&self, href: &str) -> Option<String> {
        let wrapper = self.opf_dir.join(href).canonicalize().ok()?;
        if !wrapper.starts_with(&self.book_root) || !wrapper.is_file() {
            return None;
        }
        let markup = fs::read_to_string(&wrapper).ok()?;
        let embedded = first_embedded_image(&markup)?;
        self.accept(wrapper.parent()?, &embedded)
    }

    /// Validate a candidate href against the book directory and convert it
    /// to a library-relative path. Candidates that escape the book root, or
    /// that do not name an existing regular file, are rejected.
    fn accept(&self, referrer_dir: &Path, href: &str) -> Option<String> {
        let candidate = referrer_dir.join(href).canonicalize().ok()?;
        if !candidate.starts_with(&self.book_root) || !candidate.is_file() {
            debug!("Discarding cover candidate outside book root: {}", href);
            return None;
        }
        let relative = candidate.strip_prefix(&self.library_root).ok()?;
        Some(
            relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/"),
        )
    }
}

/// A raw raster `<img src>` or vector `<image href|xlink:href>` reference,
/// whichever appears first in the document.
fn first_embedded_image(markup: &str) -> Option<String> {
    let raster = Regex::new(r#"(?is)<img\b[^>]*?\bsrc\s*=\s*["']([^"']+)["']"#).unwrap();
    let vector =
        Regex::new(r#"(?is)<image\b[^>]*?\b(?:xlink:)?href\s*=\s*["']([^"']+)["']"#).unwrap();
    let raster_match = raster.captures(markup);
    let vector_match = vector.captures(markup);
    match (&raster_match, &vector_match) {
        (Some(r), Some(v)) => {
            let r_start = r.get(0).map(|m| m.start()).unwrap_or(usize::MAX);
            let v_start = v.get(0).map(|m| m.start()).unwrap_or(usize::MAX);
            if r_start <= v_start {
                Some(r[1].to_string())
            } else {
                Some(v[1].to_string())
            }
        }
        (Some(r), None) => Some(r[1].to_string()),
        (None, Some(v)) => Some(v[1].to_string()),
        (None, None) => None,
    }
}

/// A meta-cover value that does not match any manifest item but still looks
/// like a file path rather than an identifier.
fn looks_like_path(value: &str) -> bool {
    if value.contains('/') {
        return true;
    }
    let lower = value.to_lowercase();
    IMAGE_EXTENSIONS
        .iter()
        .any(|ext| lower.ends_with(&format!(".{ext}")))
}
