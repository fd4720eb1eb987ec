//! Text extraction from uploaded file bytes.
//!
//! Turns raw bytes plus a declared MIME type into per-page plain text, and
//! for PDFs also pulls out embedded raster images so they can be described
//! by a vision model. [`assemble`] joins the pages into the document's full
//! text and returns a [`PageMap`] for recovering a page number from an
//! absolute character offset later in the pipeline.

use lopdf::Document as PdfDocument;
use tracing::{debug, warn};

use crate::error::{RagError, Result};

/// MIME type for PDF uploads.
pub const MIME_PDF: &str = "application/pdf";

/// MIME type for DOCX uploads.
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// Separator between consecutive pages in the assembled full text.
///
/// Two characters, so cumulative page offsets advance by `text.len() + 2`.
pub const PAGE_SEPARATOR: &str = "\n\n";

/// Caps for embedded-image extraction.
const MAX_IMAGES: usize = 100;
const MAX_TOTAL_IMAGE_BYTES: usize = 50 * 1024 * 1024;
const MIN_IMAGE_DIMENSION: i64 = 50;

/// Text of one page (or of the whole document for unpaged formats).
#[derive(Debug, Clone)]
pub struct PageText {
    /// 1-based page number; `None` for formats without page boundaries.
    pub number: Option<i32>,
    /// The page's plain text.
    pub text: String,
}

/// A raster image embedded in a PDF page.
#[derive(Debug, Clone)]
pub struct PdfImage {
    /// Raw image bytes.
    pub data: Vec<u8>,
    /// MIME type of `data`.
    pub mime_type: String,
    /// 1-based page the image appeared on.
    pub page: i32,
}

/// Output of [`extract`]: page texts plus any embedded images.
#[derive(Debug, Clone)]
pub struct ExtractionResult {
    /// Per-page text in page order.
    pub pages: Vec<PageText>,
    /// Embedded raster images (PDF only).
    pub images: Vec<PdfImage>,
}

/// Immutable map from absolute text offsets back to 1-based page numbers.
///
/// Built by [`assemble`] from the extraction-time page boundaries; point
/// lookups binary-search the sorted interval list.
#[derive(Debug, Clone, Default)]
pub struct PageMap {
    // (start, end, page), sorted by start, non-overlapping
    spans: Vec<(usize, usize, i32)>,
}

impl PageMap {
    /// The page containing the given absolute offset, if any page boundary
    /// information was available at extraction time.
    pub fn page_for_offset(&self, offset: usize) -> Option<i32> {
        let idx = self.spans.partition_point(|&(start, _, _)| start <= offset);
        if idx == 0 {
            return None;
        }
        let (_, end, page) = self.spans[idx - 1];
        (offset < end).then_some(page)
    }

    /// Whether any page spans were recorded.
    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }
}

/// Extract text (and embedded images, for PDFs) from uploaded bytes.
///
/// # Errors
///
/// Returns [`RagError::Extraction`] when the bytes cannot be parsed as the
/// declared MIME type, when the type is unsupported, or when the extracted
/// text is empty or whitespace-only. All of these are terminal for the
/// owning document.
pub fn extract(bytes: &[u8], mime_type: &str) -> Result<ExtractionResult> {
    let result = match mime_type {
        MIME_PDF => extract_pdf(bytes)?,
        MIME_DOCX => extract_docx(bytes)?,
        t if t.starts_with("text/") || t == "application/json" => extract_plain_text(bytes)?,
        other => {
            return Err(RagError::Extraction(format!("unsupported MIME type '{other}'")));
        }
    };

    let has_text = result.pages.iter().any(|p| !p.text.trim().is_empty());
    if !has_text {
        return Err(RagError::Extraction("no extractable text in document".to_string()));
    }

    debug!(
        mime_type,
        pages = result.pages.len(),
        images = result.images.len(),
        "extracted document"
    );
    Ok(result)
}

/// Join pages into the document's full text and record page boundaries.
///
/// Pages are separated by [`PAGE_SEPARATOR`]; each page's span covers its
/// text only, so offsets inside a separator resolve to no page.
pub fn assemble(pages: &[PageText]) -> (String, PageMap) {
    let mut full_text = String::new();
    let mut spans = Vec::new();

    for (i, page) in pages.iter().enumerate() {
        if i > 0 {
            full_text.push_str(PAGE_SEPARATOR);
        }
        let start = full_text.len();
        full_text.push_str(&page.text);
        if let Some(number) = page.number {
            spans.push((start, full_text.len(), number));
        }
    }

    (full_text, PageMap { spans })
}

fn extract_plain_text(bytes: &[u8]) -> Result<ExtractionResult> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| RagError::Extraction(format!("invalid UTF-8 in text document: {e}")))?;
    Ok(ExtractionResult {
        pages: vec![PageText { number: None, text: text.to_string() }],
        images: Vec::new(),
    })
}

/// DOCX is a zip archive; the body text lives in `word/document.xml`.
fn extract_docx(bytes: &[u8]) -> Result<ExtractionResult> {
    use std::io::Read;

    let cursor = std::io::Cursor::new(bytes);
    let mut archive = zip::ZipArchive::new(cursor)
        .map_err(|e| RagError::Extraction(format!("invalid DOCX archive: {e}")))?;

    let mut doc_xml = archive
        .by_name("word/document.xml")
        .map_err(|_| RagError::Extraction("no document.xml found in DOCX".to_string()))?;

    let mut xml = String::new();
    doc_xml
        .read_to_string(&mut xml)
        .map_err(|e| RagError::Extraction(format!("failed to read document.xml: {e}")))?;

    Ok(ExtractionResult {
        pages: vec![PageText { number: None, text: docx_xml_to_text(&xml) }],
        images: Vec::new(),
    })
}

/// Strip WordprocessingML markup down to plain text, turning paragraph ends
/// into blank lines and decoding the XML entities Word emits.
fn docx_xml_to_text(xml: &str) -> String {
    let mut out = String::with_capacity(xml.len() / 4);
    let mut rest = xml;

    while let Some(open) = rest.find('<') {
        out.push_str(&decode_xml_entities(&rest[..open]));
        let Some(close) = rest[open..].find('>') else { break };
        let tag = &rest[open + 1..open + close];
        match tag.split_whitespace().next().unwrap_or("") {
            "/w:p" => out.push_str("\n\n"),
            "w:br" | "w:br/" | "w:cr" | "w:cr/" => out.push('\n'),
            "w:tab" | "w:tab/" => out.push('\t'),
            _ => {}
        }
        rest = &rest[open + close + 1..];
    }
    out.push_str(&decode_xml_entities(rest));

    out.trim().to_string()
}

fn decode_xml_entities(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }
    s.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
}

fn extract_pdf(bytes: &[u8]) -> Result<ExtractionResult> {
    let page_texts = pdf_extract::extract_text_from_mem_by_pages(bytes)
        .map_err(|e| RagError::Extraction(format!("PDF text extraction failed: {e}")))?;

    let pages = page_texts
        .into_iter()
        .enumerate()
        .map(|(i, text)| PageText { number: Some(i as i32 + 1), text })
        .collect();

    Ok(ExtractionResult { pages, images: extract_pdf_images(bytes) })
}

/// Pull embedded raster images out of a PDF, best-effort.
///
/// Text extraction already succeeded by the time this runs, so a PDF that
/// lopdf cannot reopen just yields no images.
fn extract_pdf_images(bytes: &[u8]) -> Vec<PdfImage> {
    let doc = match PdfDocument::load_mem(bytes) {
        Ok(d) => d,
        Err(e) => {
            warn!(error = %e, "failed to reopen PDF for image extraction");
            return Vec::new();
        }
    };

    let mut images = Vec::new();
    let mut total_bytes = 0usize;

    for (page_num, page_id) in doc.get_pages() {
        if images.len() >= MAX_IMAGES || total_bytes >= MAX_TOTAL_IMAGE_BYTES {
            break;
        }
        let page_images = match doc.get_page_images(page_id) {
            Ok(imgs) => imgs,
            Err(e) => {
                debug!(page = page_num, error = %e, "failed to read page images");
                continue;
            }
        };
        for pdf_image in page_images {
            if images.len() >= MAX_IMAGES || total_bytes >= MAX_TOTAL_IMAGE_BYTES {
                break;
            }
            if pdf_image.width < MIN_IMAGE_DIMENSION || pdf_image.height < MIN_IMAGE_DIMENSION {
                continue;
            }
            let Some(filters) = pdf_image.filters.as_ref() else { continue };
            let mime_type = if filters.iter().any(|f| f == "DCTDecode") {
                "image/jpeg"
            } else if filters.iter().any(|f| f == "JPXDecode") {
                "image/jp2"
            } else {
                debug!(page = page_num, ?filters, "skipping image with unsupported filter");
                continue;
            };
            let data = pdf_image.content.to_vec();
            total_bytes += data.len();
            images.push(PdfImage {
                data,
                mime_type: mime_type.to_string(),
                page: page_num as i32,
            });
        }
    }

    debug!(count = images.len(), total_bytes, "extracted embedded PDF images");
    images
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_extracts_as_single_page() {
        let result = extract(b"hello world", "text/plain").unwrap();
        assert_eq!(result.pages.len(), 1);
        assert_eq!(result.pages[0].number, None);
        assert_eq!(result.pages[0].text, "hello world");
        assert!(result.images.is_empty());
    }

    #[test]
    fn whitespace_only_text_is_an_extraction_error() {
        let err = extract(b"  \n\t  ", "text/plain").unwrap_err();
        assert!(matches!(err, RagError::Extraction(_)));
        assert!(err.to_string().contains("no extractable text"));
    }

    #[test]
    fn malformed_pdf_is_an_extraction_error() {
        let err = extract(b"%PDF-1.4 not actually a pdf", MIME_PDF).unwrap_err();
        assert!(matches!(err, RagError::Extraction(_)));
    }

    #[test]
    fn unsupported_mime_type_is_rejected() {
        let err = extract(b"GIF89a", "image/gif").unwrap_err();
        assert!(matches!(err, RagError::Extraction(_)));
    }

    #[test]
    fn invalid_utf8_is_rejected_for_text() {
        let err = extract(&[0xff, 0xfe, 0x00], "text/plain").unwrap_err();
        assert!(matches!(err, RagError::Extraction(_)));
    }

    #[test]
    fn assemble_tracks_cumulative_page_offsets() {
        let pages = vec![
            PageText { number: Some(1), text: "first page".to_string() },
            PageText { number: Some(2), text: "second".to_string() },
            PageText { number: Some(3), text: "third".to_string() },
        ];
        let (full, map) = assemble(&pages);

        assert_eq!(full, "first page\n\nsecond\n\nthird");
        assert_eq!(map.page_for_offset(0), Some(1));
        assert_eq!(map.page_for_offset(9), Some(1));
        // Offsets inside the two-character separator belong to no page.
        assert_eq!(map.page_for_offset(10), None);
        assert_eq!(map.page_for_offset(12), Some(2));
        assert_eq!(map.page_for_offset(full.len() - 1), Some(3));
        assert_eq!(map.page_for_offset(full.len() + 100), None);
    }

    #[test]
    fn assemble_without_page_numbers_yields_empty_map() {
        let pages = vec![PageText { number: None, text: "unpaged".to_string() }];
        let (full, map) = assemble(&pages);
        assert_eq!(full, "unpaged");
        assert!(map.is_empty());
        assert_eq!(map.page_for_offset(3), None);
    }

    #[test]
    fn docx_xml_markup_is_stripped() {
        let xml = "<w:document><w:body>\
                   <w:p><w:r><w:t>Hello &amp; welcome</w:t></w:r></w:p>\
                   <w:p><w:r><w:t>Second</w:t><w:tab/><w:t>para</w:t></w:r></w:p>\
                   </w:body></w:document>";
        let text = docx_xml_to_text(xml);
        assert_eq!(text, "Hello & welcome\n\nSecond\tpara");
    }
}
