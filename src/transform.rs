//! Stateless rewrites applied to extracted book files.
//!
//! Three rewrites, all idempotent:
//! 1. Vertical writing modes in stylesheets (and inline styles) become
//!    horizontal.
//! 2. `<a>` tags inside `<p>` blocks are unwrapped (tag removed, content
//!    kept) so linked chapter titles render as plain text.
//! 3. A chapter-redirect script is injected into `<head>` so deep links into
//!    OPS/OEBPS pages bounce back to the reader shell.

use regex::{Captures, Regex};
use std::fs;
use std::io;
use std::path::Path;

/// Marker used to detect an already-injected navigation script.
pub const NAV_SCRIPT_MARKER: &str = "window.location.replace";

/// Redirects direct chapter loads to the reader shell with the chapter path
/// in the fragment. Only runs at top level, never inside the reader iframe.
const NAV_SCRIPT: &str = r#"
    if (window.top === window.self) {
        var path = window.location.pathname;
        var opsIndex = path.indexOf('/OPS/');
        if (opsIndex === -1) {
            opsIndex = path.indexOf('/OEBPS/');
        }
        if (opsIndex !== -1) {
            var bookRootRelative = path.substring(0, opsIndex);
            var matchStr = path.indexOf('/OPS/') !== -1 ? '/OPS/' : '/OEBPS/';
            var chapterPath = path.substring(opsIndex + matchStr.length);
            window.location.replace(bookRootRelative + '/index.html#' + chapterPath);
        }
    }
"#;

/// File categories the transformer knows how to rewrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// `.css` — writing-mode rewrite only.
    Stylesheet,
    /// `.html` / `.xhtml` — inline styles, link unwrapping, script injection.
    Markup,
}

/// Classify a file by extension. Returns `None` for files the transformer
/// does not touch.
pub fn classify(path: &Path) -> Option<FileKind> {
    let ext = path.extension()?.to_str()?.to_lowercase();
    match ext.as_str() {
        "css" => Some(FileKind::Stylesheet),
        "html" | "xhtml" => Some(FileKind::Markup),
        _ => None,
    }
}

/// Rewrite vertical writing modes (`vertical-rl` / `vertical-lr`, with or
/// without the `-webkit-` prefix) to `horizontal-tb`.
///
/// Returns the rewritten content and the number of replacements made.
pub fn convert_vertical_styles(content: &str) -> (String, usize) {
    let pattern =
        Regex::new(r"(?i)((?:-webkit-)?writing-mode\s*:\s*)vertical-(?:rl|lr)").unwrap();
    let count = pattern.find_iter(content).count();
    if count == 0 {
        return (content.to_string(), 0);
    }
    let rewritten = pattern
        .replace_all(content, "${1}horizontal-tb")
        .into_owned();
    (rewritten, count)
}

/// Unwrap `<a>` tags inside `<p>` blocks, keeping their content and any
/// nested tags (ruby annotations in particular).
fn unwrap_paragraph_links(content: &str) -> (String, bool) {
    let paragraph = Regex::new(r"(?is)<p\b[^>]*>.*?</p>").unwrap();
    let anchor = Regex::new(r"(?is)</?a\b[^>]*>").unwrap();
    let mut changed = false;
    let rewritten = paragraph.replace_all(content, |caps: &Captures| {
        let block = &caps[0];
        if anchor.is_match(block) {
            changed = true;
            anchor.replace_all(block, "").into_owned()
        } else {
            block.to_string()
        }
    });
    (rewritten.into_owned(), changed)
}

/// Inject the navigation script before `</head>` unless its marker is
/// already present.
fn inject_navigation_script(content: &str) -> (String, bool) {
    if content.contains(NAV_SCRIPT_MARKER) {
        return (content.to_string(), false);
    }
    let head_close = Regex::new(r"(?i)</head\s*>").unwrap();
    let Some(m) = head_close.find(content) else {
        return (content.to_string(), false);
    };
    let mut rewritten = String::with_capacity(content.len() + NAV_SCRIPT.len() + 32);
    rewritten.push_str(&content[..m.start()]);
    rewritten.push_str("<script>");
    rewritten.push_str(NAV_SCRIPT);
    rewritten.push_str("</script>");
    rewritten.push_str(&content[m.start()..]);
    (rewritten, true)
}

/// Transform one file in place. Returns whether the file was modified.
///
/// Running this twice on the same file is a no-op: every rewrite either
/// removes its own trigger or is guarded by a marker check.
pub fn transform_file(path: &Path) -> io::Result<bool> {
    let Some(kind) = classify(path) else {
        return Ok(false);
    };
    let content = fs::read_to_string(path)?;
    let (rewritten, style_changes) = convert_vertical_styles(&content);
    let (rewritten, changed) = match kind {
        FileKind::Stylesheet => (rewritten, style_changes > 0),
        FileKind::Markup => {
            let (rewritten, links_unwrapped) = unwrap_paragraph_links(&rewritten);
            let (rewritten, script_added) = inject_navigation_script(&rewritten);
            (rewritten, style_changes > 0 || links_unwrapped || script_added)
        }
    };
    if changed {
        fs::write(path, rewritten)?;
    }
    Ok(changed)
}
