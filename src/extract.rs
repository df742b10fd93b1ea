//! Text extraction for uploaded documents.
//!
//! Uploads arrive as bytes plus a declared content type (or only a filename);
//! this module resolves the effective type and returns plain UTF-8 text.
//! Supported: plain text, Markdown, PDF and DOCX.

use std::io::Read;

pub const MIME_TEXT: &str = "text/plain";
pub const MIME_MARKDOWN: &str = "text/markdown";
pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug)]
pub enum ExtractError {
    UnsupportedContentType(String),
    InvalidUtf8,
    Pdf(String),
    Docx(String),
    /// The extractor panicked on malformed input.
    Crashed,
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractError::UnsupportedContentType(ct) => {
                write!(f, "unsupported content-type: {}", ct)
            }
            ExtractError::InvalidUtf8 => write!(f, "text file is not valid UTF-8"),
            ExtractError::Pdf(e) => write!(f, "PDF extraction failed: {}", e),
            ExtractError::Docx(e) => write!(f, "DOCX extraction failed: {}", e),
            ExtractError::Crashed => write!(f, "extractor crashed on malformed input"),
        }
    }
}

impl std::error::Error for ExtractError {}

/// Resolve the content type from the declared MIME type, falling back to
/// the filename extension when the declaration is missing or generic.
pub fn detect_content_type(declared: Option<&str>, filename: Option<&str>) -> String {
    let declared = declared
        .map(|d| d.split(';').next().unwrap_or(d).trim().to_lowercase())
        .filter(|d| !d.is_empty() && d != "application/octet-stream");

    if let Some(ct) = declared {
        return match ct.as_str() {
            "text/x-markdown" => MIME_MARKDOWN.to_string(),
            _ => ct,
        };
    }

    let ext = filename
        .and_then(|f| f.rsplit_once('.'))
        .map(|(_, ext)| ext.to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "txt" => MIME_TEXT,
        "md" | "markdown" => MIME_MARKDOWN,
        "pdf" => MIME_PDF,
        "docx" => MIME_DOCX,
        _ => "application/octet-stream",
    }
    .to_string()
}

/// Extract plain text from `bytes` of the given content type.
pub fn extract_text(bytes: &[u8], content_type: &str) -> Result<String, ExtractError> {
    match content_type {
        MIME_TEXT | MIME_MARKDOWN => String::from_utf8(bytes.to_vec())
            .map(|s| s.replace("\r\n", "\n"))
            .map_err(|_| ExtractError::InvalidUtf8),
        MIME_PDF => extract_pdf(bytes),
        MIME_DOCX => extract_docx(bytes),
        _ => Err(ExtractError::UnsupportedContentType(
            content_type.to_string(),
        )),
    }
}

/// [`extract_text`] on the blocking thread pool. PDF parsing is CPU-bound
/// and `pdf-extract` can panic on hostile input; a panic becomes
/// [`ExtractError::Crashed`].
pub async fn extract_text_blocking(
    bytes: Vec<u8>,
    content_type: String,
) -> Result<String, ExtractError> {
    match tokio::task::spawn_blocking(move || extract_text(&bytes, &content_type)).await {
        Ok(result) => result,
        Err(e) => {
            tracing::error!(error = %e, "document extraction task failed");
            Err(ExtractError::Crashed)
        }
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|_| ExtractError::Docx("word/document.xml not found".to_string()))?;
    let mut doc_xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut doc_xml)
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Docx(
            "word/document.xml exceeds size limit".to_string(),
        ));
    }
    docx_paragraph_text(&doc_xml)
}

/// Concatenate `<w:t>` runs, one line per `<w:p>` paragraph.
fn docx_paragraph_text(xml: &[u8]) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut paragraphs: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_text = false;
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(te)) if in_text => {
                current.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    let line = current.trim();
                    if !line.is_empty() {
                        paragraphs.push(line.to_string());
                    }
                    current.clear();
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Docx(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    let tail = current.trim();
    if !tail.is_empty() {
        paragraphs.push(tail.to_string());
    }
    Ok(paragraphs.join("\n\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn unsupported_content_type_returns_error() {
        let err = extract_text(b"foo", "application/octet-stream").unwrap_err();
        assert!(matches!(err, ExtractError::UnsupportedContentType(_)));
    }

    #[test]
    fn invalid_pdf_returns_error() {
        let err = extract_text(b"not a pdf", MIME_PDF).unwrap_err();
        assert!(matches!(err, ExtractError::Pdf(_)));
    }

    #[test]
    fn invalid_zip_returns_error_for_docx() {
        let err = extract_text(b"not a zip", MIME_DOCX).unwrap_err();
        assert!(matches!(err, ExtractError::Docx(_)));
    }

    #[test]
    fn plain_text_normalizes_line_endings() {
        let text = extract_text(b"a\r\nb", MIME_TEXT).unwrap();
        assert_eq!(text, "a\nb");
    }

    #[test]
    fn invalid_utf8_text_rejected() {
        let err = extract_text(&[0xff, 0xfe, 0x00], MIME_TEXT).unwrap_err();
        assert!(matches!(err, ExtractError::InvalidUtf8));
    }

    #[tokio::test]
    async fn blocking_extraction_matches_inline() {
        let text = extract_text_blocking(b"line\r\nbreak".to_vec(), MIME_MARKDOWN.into())
            .await
            .unwrap();
        assert_eq!(text, "line\nbreak");
        let err = extract_text_blocking(b"not a pdf".to_vec(), MIME_PDF.into())
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::Pdf(_)));
    }

    #[test]
    fn detect_prefers_declared_type() {
        assert_eq!(
            detect_content_type(Some("text/plain; charset=utf-8"), Some("x.pdf")),
            MIME_TEXT
        );
        assert_eq!(
            detect_content_type(Some("application/octet-stream"), Some("Report.PDF")),
            MIME_PDF
        );
        assert_eq!(detect_content_type(None, Some("notes.md")), MIME_MARKDOWN);
        assert_eq!(
            detect_content_type(None, Some("noext")),
            "application/octet-stream"
        );
    }

    #[test]
    fn docx_paragraphs_extracted() {
        let xml = r#"<?xml version="1.0"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
  <w:body>
    <w:p><w:r><w:t>Hello</w:t></w:r><w:r><w:t xml:space="preserve"> world</w:t></w:r></w:p>
    <w:p><w:r><w:t>Second &amp; last</w:t></w:r></w:p>
  </w:body>
</w:document>"#;
        let mut bytes = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut bytes));
            zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(xml.as_bytes()).unwrap();
            zip.finish().unwrap();
        }
        let text = extract_text(&bytes, MIME_DOCX).unwrap();
        assert_eq!(text, "Hello world\n\nSecond & last");
    }
}
