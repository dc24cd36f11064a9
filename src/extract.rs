//! Text extraction for uploaded files, keyed by file extension.
//!
//! PDF goes through `pdf-extract`; DOCX is unpacked with `zip` and its
//! `w:t` runs pulled out with `quick-xml`. Plain text, markdown, and JSON
//! are read through as-is. Unknown extensions fall back to a lossy raw read
//! instead of failing, with a warning.

use anyhow::{Context, Result};
use std::io::Read;
use std::path::Path;
use tracing::warn;

/// Maximum decompressed bytes read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Extract plain text from a stored file according to its extension.
pub fn extract_file_text(path: &Path) -> Result<String> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read stored file: {}", path.display()))?;

    match ext.as_str() {
        "pdf" => extract_pdf(&bytes),
        "docx" => extract_docx(&bytes),
        "txt" | "md" | "markdown" | "json" => {
            String::from_utf8(bytes).with_context(|| "stored file is not valid UTF-8")
        }
        other => {
            warn!(
                extension = other,
                path = %path.display(),
                "unsupported file extension, falling back to raw text read"
            );
            Ok(String::from_utf8_lossy(&bytes).into_owned())
        }
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String> {
    pdf_extract::extract_text_from_mem(bytes)
        .map_err(|e| anyhow::anyhow!("PDF extraction failed: {}", e))
}

fn extract_docx(bytes: &[u8]) -> Result<String> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| anyhow::anyhow!("DOCX extraction failed: {}", e))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|_| anyhow::anyhow!("DOCX extraction failed: word/document.xml not found"))?;

    let mut doc_xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut doc_xml)
        .map_err(|e| anyhow::anyhow!("DOCX extraction failed: {}", e))?;
    if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        anyhow::bail!("DOCX extraction failed: word/document.xml exceeds size limit");
    }

    extract_text_runs(&doc_xml)
}

/// Pull the text of every `<w:t>` run, inserting newlines at paragraph ends.
fn extract_text_runs(xml: &[u8]) -> Result<String> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.local_name().as_ref() == b"t" {
                    if let Ok(quick_xml::events::Event::Text(te)) = reader.read_event_into(&mut buf)
                    {
                        out.push_str(te.unescape().unwrap_or_default().as_ref());
                    }
                }
            }
            Ok(quick_xml::events::Event::End(e)) => {
                if e.local_name().as_ref() == b"p" && !out.ends_with('\n') {
                    out.push('\n');
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => anyhow::bail!("DOCX extraction failed: {}", e),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_reads_through() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("note.txt");
        std::fs::write(&path, "hello from a text file").unwrap();
        assert_eq!(extract_file_text(&path).unwrap(), "hello from a text file");
    }

    #[test]
    fn unknown_extension_falls_back_to_raw() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.xyz");
        std::fs::write(&path, b"raw bytes here").unwrap();
        assert_eq!(extract_file_text(&path).unwrap(), "raw bytes here");
    }

    #[test]
    fn invalid_pdf_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.pdf");
        std::fs::write(&path, b"not a pdf").unwrap();
        assert!(extract_file_text(&path).is_err());
    }

    #[test]
    fn invalid_docx_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.docx");
        std::fs::write(&path, b"not a zip").unwrap();
        assert!(extract_file_text(&path).is_err());
    }

    #[test]
    fn docx_text_runs_extracted() {
        let xml = br#"<w:document xmlns:w="ns"><w:body>
            <w:p><w:r><w:t>Hello world</w:t></w:r></w:p>
            <w:p><w:r><w:t>Second paragraph</w:t></w:r></w:p>
        </w:body></w:document>"#;
        let text = extract_text_runs(xml).unwrap();
        assert!(text.contains("Hello world"));
        assert!(text.contains("Second paragraph"));
    }
}
