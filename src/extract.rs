//! Text extraction from uploaded documents.
//!
//! `text/plain` and `text/markdown` pass through verbatim after a UTF-8
//! check. Structured formats go through a parser registered for their
//! media type; [`TextExtractor::with_default_parsers`] registers PDF, DOCX
//! and PPTX. Anything else, including the legacy binary Office formats, is
//! [`RagError::UnsupportedMediaType`]. The extractor never invents text for
//! a format it cannot read.

use std::collections::HashMap;
use std::io::Read;

use ragline_core::RagError;
use thiserror::Error;

pub const MIME_TEXT: &str = "text/plain";
pub const MIME_MARKDOWN: &str = "text/markdown";
pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_PPTX: &str =
    "application/vnd.openxmlformats-officedocument.presentationml.presentation";
pub const MIME_DOC: &str = "application/msword";
pub const MIME_PPT: &str = "application/vnd.ms-powerpoint";

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("unsupported media type: {0}")]
    UnsupportedMediaType(String),
    #[error("invalid UTF-8 at byte {0}")]
    InvalidEncoding(usize),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("OOXML extraction failed: {0}")]
    Ooxml(String),
}

impl From<ExtractError> for RagError {
    fn from(err: ExtractError) -> Self {
        match err {
            ExtractError::UnsupportedMediaType(mt) => RagError::UnsupportedMediaType(mt),
            ExtractError::InvalidEncoding(pos) => {
                RagError::InvalidEncoding(format!("invalid UTF-8 at byte {}", pos))
            }
            other => RagError::Extraction(other.to_string()),
        }
    }
}

/// A parser turns the bytes of one structured format into plain text.
pub type Parser = fn(&[u8]) -> Result<String, ExtractError>;

/// Extracted text plus the counts recorded on the document.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedText {
    pub text: String,
    pub word_count: usize,
    pub char_count: usize,
}

impl ExtractedText {
    fn new(text: String) -> Self {
        Self {
            word_count: text.split_whitespace().count(),
            char_count: text.chars().count(),
            text,
        }
    }
}

/// Media-type keyed registry of parsers.
#[derive(Clone, Default)]
pub struct TextExtractor {
    parsers: HashMap<String, Parser>,
}

impl TextExtractor {
    /// An extractor that only understands plain text and markdown.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_parsers() -> Self {
        let mut extractor = Self::new();
        extractor.register(MIME_PDF, extract_pdf);
        extractor.register(MIME_DOCX, extract_docx);
        extractor.register(MIME_PPTX, extract_pptx);
        extractor
    }

    pub fn register(&mut self, media_type: &str, parser: Parser) {
        self.parsers.insert(normalize_media_type(media_type), parser);
    }

    pub fn supports(&self, media_type: &str) -> bool {
        let mt = normalize_media_type(media_type);
        is_text(&mt) || self.parsers.contains_key(&mt)
    }

    pub fn extract(&self, bytes: &[u8], media_type: &str) -> Result<ExtractedText, RagError> {
        let mt = normalize_media_type(media_type);
        let text = if is_text(&mt) {
            decode_utf8(bytes)?
        } else {
            let parser = self
                .parsers
                .get(&mt)
                .ok_or_else(|| ExtractError::UnsupportedMediaType(mt.clone()))?;
            parser(bytes)?
        };
        tracing::debug!(media_type = %mt, bytes = bytes.len(), chars = text.len(), "extracted text");
        Ok(ExtractedText::new(text))
    }
}

/// Lowercase and drop parameters such as `; charset=utf-8`.
fn normalize_media_type(media_type: &str) -> String {
    media_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

fn is_text(media_type: &str) -> bool {
    media_type == MIME_TEXT || media_type == MIME_MARKDOWN
}

fn decode_utf8(bytes: &[u8]) -> Result<String, ExtractError> {
    std::str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(|e| ExtractError::InvalidEncoding(e.valid_up_to()))
}

/// Guess a media type from a file name extension.
pub fn detect_media_type(file_name: &str) -> &'static str {
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "txt" | "text" => MIME_TEXT,
        "md" | "markdown" => MIME_MARKDOWN,
        "pdf" => MIME_PDF,
        "docx" => MIME_DOCX,
        "pptx" => MIME_PPTX,
        "doc" => MIME_DOC,
        "ppt" => MIME_PPT,
        _ => "application/octet-stream",
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}

fn read_zip_entry_bounded(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Ooxml(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Ooxml(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, MAX_XML_ENTRY_BYTES
        )));
    }
    Ok(out)
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    let xml = read_zip_entry_bounded(&mut archive, "word/document.xml")?;
    collect_text_runs(&xml, b"p")
}

fn extract_pptx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    let mut slide_names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("ppt/slides/slide") && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    slide_names.sort_by_key(|name| {
        name.trim_start_matches("ppt/slides/slide")
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });

    let mut slides = Vec::with_capacity(slide_names.len());
    for name in slide_names {
        let xml = read_zip_entry_bounded(&mut archive, &name)?;
        let text = collect_text_runs(&xml, b"p")?;
        if !text.is_empty() {
            slides.push(text);
        }
    }
    Ok(slides.join("\n\n"))
}

/// Concatenate the text of every `<*:t>` element, ending a line at each
/// closing paragraph element named `paragraph`.
fn collect_text_runs(xml: &[u8], paragraph: &[u8]) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::End(e)) => {
                let name = e.local_name();
                if name.as_ref() == b"t" {
                    in_text = false;
                } else if name.as_ref() == paragraph && !out.is_empty() && !out.ends_with('\n') {
                    out.push('\n');
                }
            }
            Ok(Event::Text(te)) if in_text => {
                let text = te
                    .unescape()
                    .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
                out.push_str(&text);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out.trim_end().to_string())
}
