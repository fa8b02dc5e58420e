#![allow(dead_code)]

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Initialize tracing for tests with proper test output handling
pub fn tracing_init() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Write a small but realistic EPUB-style archive: descriptor with an
/// EPUB 2 cover pointer, a chapter with a linked title and vertical inline
/// style, a vertical stylesheet, and the cover image itself.
pub fn write_sample_epub(dir: &Path, file_name: &str) -> PathBuf {
    let path = dir.join(file_name);
    let file = fs::File::create(&path).unwrap();
    let mut writer = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default();

    writer.start_file("mimetype", options).unwrap();
    writer.write_all(b"application/epub+zip").unwrap();

    writer.start_file("OPS/content.opf", options).unwrap();
    writer.write_all(sample_opf().as_bytes()).unwrap();

    writer.start_file("OPS/chapter1.xhtml", options).unwrap();
    writer
        .write_all(
            b"<html><head><title>Chapter 1</title></head><body>\
              <p><a href=\"ch1.xhtml\">Chapter 1</a></p>\
              <div style=\"writing-mode: vertical-rl\">text</div>\
              </body></html>",
        )
        .unwrap();

    writer.start_file("OPS/styles/main.css", options).unwrap();
    writer
        .write_all(b"body { writing-mode: vertical-rl; }\n")
        .unwrap();

    writer.start_file("OPS/images/cover.jpg", options).unwrap();
    writer.write_all(&[0xff, 0xd8, 0xff, 0xe0, 0x00]).unwrap();

    writer.finish().unwrap();
    path
}

pub fn sample_opf() -> String {
    r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="2.0">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:title>Sample Book</dc:title>
    <dc:creator>A. Writer</dc:creator>
    <meta name="cover" content="cover-img"/>
  </metadata>
  <manifest>
    <item id="cover-img" href="images/cover.jpg" media-type="image/jpeg"/>
    <item id="chap1" href="chapter1.xhtml" media-type="application/xhtml+xml"/>
    <item id="css" href="styles/main.css" media-type="text/css"/>
  </manifest>
</package>
"#
    .to_string()
}
