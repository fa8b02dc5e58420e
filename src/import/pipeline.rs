//! The import pipeline: unpack an uploaded archive into the library,
//! rewrite its content files, and persist supplied categories.
//!
//! Everything here is synchronous filesystem work; the tracker drives it on
//! a blocking thread, and the synchronous-fallback upload path calls it
//! inline.

use crate::import::emitter::TaskEmitter;
use crate::import::types::{ImportError, ImportRequest, TaskEvent};
use crate::library::CategoryStore;
use crate::transform;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// Emit a progress event every this many transformed files (and always on
/// the last one).
const PROGRESS_CADENCE: usize = 10;

/// Run the full import. Returns the resulting book directory name.
///
/// On failure the uploaded archive is removed best-effort; a cleanup failure
/// never replaces the pipeline's own error. Partial extraction is left in
/// place.
pub fn run_import(
    library_root: &Path,
    categories: &CategoryStore,
    request: &ImportRequest,
    emitter: &TaskEmitter,
) -> Result<String, ImportError> {
    let result = run_import_steps(library_root, categories, request, emitter);
    if result.is_err() {
        if let Err(e) = fs::remove_file(&request.archive_path) {
            debug!(
                "Could not remove upload {} after failure: {}",
                request.archive_path.display(),
                e
            );
        }
    }
    result
}

fn run_import_steps(
    library_root: &Path,
    categories: &CategoryStore,
    request: &ImportRequest,
    emitter: &TaskEmitter,
) -> Result<String, ImportError> {
    emitter.log(format!("File uploaded: {}", request.display_name));

    // 1. Derive and claim a collision-free target directory
    fs::create_dir_all(library_root)?;
    let (book_dir, target) = claim_target_dir(library_root, &request.display_name)?;

    // 2. Extract the whole archive before touching any file
    emitter.progress("extract", 0, 0);
    extract_archive(&request.archive_path, &target)?;
    emitter.log(format!("Extracted to: {}", target.display()));

    // 3. Enumerate transform targets up front so the total stays fixed
    let files = collect_transform_targets(&target);
    let total = files.len();
    emitter.progress("transform", 0, total);

    // 4. Rewrite each file; one bad file does not abort the import
    for (index, file) in files.iter().enumerate() {
        let display = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| file.display().to_string());
        match transform::transform_file(file) {
            Ok(true) => emitter.log(format!("Rewrote: {}", display)),
            Ok(false) => {}
            Err(e) => emitter.log(format!("Error processing {}: {}", display, e)),
        }
        let done = index + 1;
        if done % PROGRESS_CADENCE == 0 || done == total {
            emitter.progress("transform", done, total);
        }
    }

    // 5. Remove the uploaded archive
    fs::remove_file(&request.archive_path)?;

    // 6. Merge supplied categories into the shared store
    if !request.categories.is_empty() {
        categories.merge(&book_dir, &request.categories)?;
        emitter.log(format!("Added categories: {}", request.categories.join(", ")));
    }

    Ok(book_dir)
}

/// Blocking import for the synchronous-fallback upload mode: runs the
/// pipeline inline and returns the full log list alongside the result.
pub fn run_import_sync(
    library_root: &Path,
    categories: &CategoryStore,
    request: &ImportRequest,
) -> (Vec<String>, Result<String, ImportError>) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let emitter = TaskEmitter::new("sync".to_string(), tx);
    let result = run_import(library_root, categories, request, &emitter);
    if let Err(e) = &result {
        emitter.log(format!("Error processing: {}", e));
    }
    drop(emitter);

    let mut logs = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let TaskEvent::Log { line, .. } = event {
            logs.push(line);
        }
    }
    (logs, result)
}

/// Strip the display name down to word characters and hyphens; everything
/// else becomes `_`. `\w` is Unicode-aware, so CJK ideographs and kana pass
/// through untouched.
fn derive_safe_name(display_name: &str) -> String {
    let stem = Path::new(display_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(display_name);
    let disallowed = Regex::new(r"[^\w\-]").unwrap();
    let safe = disallowed.replace_all(stem, "_").into_owned();
    if safe.is_empty() {
        "book".to_string()
    } else {
        safe
    }
}

/// Claim a target directory that did not exist yet. The claim is the
/// directory creation itself, so two imports racing on the same name can
/// never end up writing into one directory; the loser retries with a short
/// random suffix.
fn claim_target_dir(
    library_root: &Path,
    display_name: &str,
) -> Result<(String, PathBuf), ImportError> {
    let base = derive_safe_name(display_name);
    let mut name = base.clone();
    loop {
        let target = library_root.join(&name);
        match fs::create_dir(&target) {
            Ok(()) => return Ok((name, target)),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let token = Uuid::new_v4().simple().to_string();
                name = format!("{}_{}", base, &token[..8]);
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Extract every archive entry under `target`. Entry names are validated
/// against path traversal; an entry escaping the target aborts the unpack.
fn extract_archive(archive_path: &Path, target: &Path) -> Result<(), ImportError> {
    let file = fs::File::open(archive_path)?;
    let mut archive = zip::ZipArchive::new(file)?;
    fs::create_dir_all(target)?;
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let Some(relative) = entry.enclosed_name() else {
            return Err(ImportError::UnsafeEntry(entry.name().to_string()));
        };
        let out_path = target.join(relative);
        if entry.is_dir() {
            fs::create_dir_all(&out_path)?;
        } else {
            if let Some(parent) = out_path.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut out = fs::File::create(&out_path)?;
            std::io::copy(&mut entry, &mut out)?;
        }
    }
    Ok(())
}

/// All style and markup files under the extracted tree, sorted so the
/// progress total and processing order are stable.
fn collect_transform_targets(root: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    collect_recursive(root, &mut files);
    files.sort();
    files
}

fn collect_recursive(dir: &Path, files: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_recursive(&path, files);
        } else if transform::classify(&path).is_some() {
            files.push(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn safe_name_keeps_word_chars_hyphens_and_cjk() {
        assert_eq!(derive_safe_name("My Book (2024).epub"), "My_Book__2024_");
        // Kana and ideographs are word characters; neither gets mangled.
        assert_eq!(derive_safe_name("吾輩は猫である.epub"), "吾輩は猫である");
        assert_eq!(derive_safe_name("深夜プラス1.epub"), "深夜プラス1");
        assert_eq!(derive_safe_name("pro-git.epub"), "pro-git");
        assert_eq!(derive_safe_name(""), "book");
    }

    #[test]
    fn colliding_names_get_distinct_directories() {
        let dir = TempDir::new().unwrap();
        let (first, first_path) = claim_target_dir(dir.path(), "book.epub").unwrap();
        let (second, second_path) = claim_target_dir(dir.path(), "book.epub").unwrap();
        assert_eq!(first, "book");
        assert_ne!(first, second);
        assert!(second.starts_with("book_"));
        assert_ne!(first_path, second_path);
        assert!(first_path.is_dir());
        assert!(second_path.is_dir());
    }

    #[test]
    fn enumeration_is_sorted_and_filtered() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("OPS/styles")).unwrap();
        fs::write(dir.path().join("OPS/b.xhtml"), "x").unwrap();
        fs::write(dir.path().join("OPS/a.html"), "x").unwrap();
        fs::write(dir.path().join("OPS/styles/main.css"), "x").unwrap();
        fs::write(dir.path().join("OPS/cover.jpg"), "x").unwrap();

        let files = collect_transform_targets(dir.path());
        let names: Vec<_> = files
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["OPS/a.html", "OPS/b.xhtml", "OPS/styles/main.css"]);
    }

    #[test]
    fn corrupt_archive_is_an_unpack_error() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("bad.epub");
        fs::write(&archive, b"this is not a zip").unwrap();
        let err = extract_archive(&archive, &dir.path().join("out")).unwrap_err();
        assert!(matches!(err, ImportError::Unpack(_)));
    }
}
