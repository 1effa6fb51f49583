//! Attachment processors.
//!
//! A processor turns one downloaded attachment into an [`ExtractedContent`].
//! Processors never fail: a missing file, a missing engine, or a corrupt
//! document is reported through [`ExtractedContent::error`] so that one bad
//! attachment never costs the rest of the document.
//!
//! | Processor | Types | Engine |
//! |-----------|-------|--------|
//! | [`ImageProcessor`] | raster images | [`OcrEngine`] |
//! | [`PdfProcessor`] | `application/pdf` | [`PdfEngine`] |
//! | [`DocxProcessor`] | `.docx` | [`WordEngine`] |
//! | [`SpreadsheetProcessor`] | `.xlsx`, `.csv` | [`WorkbookEngine`], [`csv_rows`] |
//! | [`FallbackProcessor`] | anything | none |

use std::path::Path;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::{json, Value};
use tracing::debug;

use crate::extract::{
    csv_rows, EngineError, OcrEngine, PdfEngine, WordEngine, WorkbookEngine, MIME_CSV,
    MIME_DOCX, MIME_PDF, MIME_XLSX, XLSX_MAX_CELLS_PER_SHEET,
};
use crate::models::{ExtractedContent, ProcessingMethod};

pub const IMAGE_TYPES: &[&str] = &[
    "image/png",
    "image/jpeg",
    "image/jpg",
    "image/gif",
    "image/bmp",
    "image/tiff",
    "image/webp",
];

pub const EMPTY_SPREADSHEET: &str = "(Empty spreadsheet)";

/// Shared capability of every attachment processor.
pub trait AttachmentProcessor: Send + Sync {
    /// Short identifier, used in logs and tests.
    fn name(&self) -> &'static str;

    /// MIME types this processor registers under.
    fn supported_types(&self) -> &'static [&'static str];

    fn process(&self, path: &Path) -> ExtractedContent;
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn file_size(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

fn not_found(path: &Path) -> ExtractedContent {
    ExtractedContent::failure(format!("File not found: {}", path.display()))
}

fn metadata(path: &Path, extra: &[(&str, Value)]) -> IndexMap<String, Value> {
    let mut map = IndexMap::new();
    map.insert("filename".to_string(), json!(file_name(path)));
    for (key, value) in extra {
        map.insert(key.to_string(), value.clone());
    }
    map.insert("size".to_string(), json!(file_size(path)));
    map
}

// ═══════════════════════════════════════════════════════════════════════
// Image
// ═══════════════════════════════════════════════════════════════════════

/// OCR over raster images.
pub struct ImageProcessor {
    engine: Option<Arc<dyn OcrEngine>>,
    languages: String,
}

impl ImageProcessor {
    pub fn new(engine: Option<Arc<dyn OcrEngine>>, languages: impl Into<String>) -> Self {
        Self {
            engine,
            languages: languages.into(),
        }
    }

    fn recognize(&self, engine: &dyn OcrEngine, path: &Path) -> Result<String, EngineError> {
        let image = image::open(path).map_err(|e| EngineError::Image(e.to_string()))?;
        // Palette and alpha sources are flattened to RGB before recognition.
        let image = if image.color().has_alpha() {
            image::DynamicImage::ImageRgb8(image.to_rgb8())
        } else {
            image
        };
        engine.recognize(&image, &self.languages)
    }
}

impl AttachmentProcessor for ImageProcessor {
    fn name(&self) -> &'static str {
        "image"
    }

    fn supported_types(&self) -> &'static [&'static str] {
        IMAGE_TYPES
    }

    fn process(&self, path: &Path) -> ExtractedContent {
        if !path.exists() {
            return not_found(path);
        }
        let Some(engine) = self.engine.as_deref() else {
            return ExtractedContent::failure(format!(
                "OCR dependencies not available: {}",
                EngineError::Unavailable("tesseract".to_string())
            ));
        };

        match self.recognize(engine, path) {
            Ok(text) => ExtractedContent::new(
                text.trim(),
                metadata(path, &[]),
                ProcessingMethod::Ocr,
            ),
            Err(e) => ExtractedContent::failure(format!("OCR failed: {}", e)),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// PDF
// ═══════════════════════════════════════════════════════════════════════

pub struct PdfProcessor {
    engine: Option<Arc<dyn PdfEngine>>,
}

impl PdfProcessor {
    pub fn new(engine: Option<Arc<dyn PdfEngine>>) -> Self {
        Self { engine }
    }
}

impl AttachmentProcessor for PdfProcessor {
    fn name(&self) -> &'static str {
        "pdf"
    }

    fn supported_types(&self) -> &'static [&'static str] {
        &[MIME_PDF]
    }

    fn process(&self, path: &Path) -> ExtractedContent {
        if !path.exists() {
            return not_found(path);
        }
        let Some(engine) = self.engine.as_deref() else {
            return ExtractedContent::failure(format!(
                "PDF dependencies not available: {}",
                EngineError::Unavailable("PDF engine".to_string())
            ));
        };

        let pages = match std::fs::read(path)
            .map_err(EngineError::from)
            .and_then(|bytes| engine.page_texts(&bytes))
        {
            Ok(pages) => pages,
            Err(e) => return ExtractedContent::failure(format!("PDF extraction failed: {}", e)),
        };

        let text = pages
            .iter()
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n");
        debug!(filename = %file_name(path), pages = pages.len(), "extracted PDF text");
        ExtractedContent::new(
            text,
            metadata(path, &[("page_count", json!(pages.len()))]),
            ProcessingMethod::TextExtract,
        )
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Word
// ═══════════════════════════════════════════════════════════════════════

pub struct DocxProcessor {
    engine: Option<Arc<dyn WordEngine>>,
}

impl DocxProcessor {
    pub fn new(engine: Option<Arc<dyn WordEngine>>) -> Self {
        Self { engine }
    }
}

impl AttachmentProcessor for DocxProcessor {
    fn name(&self) -> &'static str {
        "docx"
    }

    fn supported_types(&self) -> &'static [&'static str] {
        &[MIME_DOCX]
    }

    fn process(&self, path: &Path) -> ExtractedContent {
        if !path.exists() {
            return not_found(path);
        }
        let Some(engine) = self.engine.as_deref() else {
            return ExtractedContent::failure(format!(
                "DOCX dependencies not available: {}",
                EngineError::Unavailable("Word engine".to_string())
            ));
        };

        let doc = match std::fs::read(path)
            .map_err(EngineError::from)
            .and_then(|bytes| engine.read(&bytes))
        {
            Ok(doc) => doc,
            Err(e) => return ExtractedContent::failure(format!("DOCX extraction failed: {}", e)),
        };

        let paragraphs: Vec<&str> = doc
            .paragraphs
            .iter()
            .map(String::as_str)
            .filter(|p| !p.trim().is_empty())
            .collect();
        let table_rows: Vec<String> = doc
            .tables
            .iter()
            .flatten()
            .map(|row| {
                row.iter()
                    .map(|cell| cell.trim())
                    .filter(|cell| !cell.is_empty())
                    .collect::<Vec<_>>()
                    .join(" | ")
            })
            .filter(|row| !row.is_empty())
            .collect();

        let mut text = paragraphs.join("\n\n");
        if !table_rows.is_empty() {
            text.push_str("\n\n### Tables\n\n");
            text.push_str(&table_rows.join("\n"));
        }

        ExtractedContent::new(
            text,
            metadata(
                path,
                &[
                    ("paragraph_count", json!(paragraphs.len())),
                    ("table_count", json!(doc.tables.len())),
                ],
            ),
            ProcessingMethod::TextExtract,
        )
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Spreadsheet
// ═══════════════════════════════════════════════════════════════════════

/// CSV and workbook attachments rendered as Markdown tables.
pub struct SpreadsheetProcessor {
    engine: Option<Arc<dyn WorkbookEngine>>,
}

impl SpreadsheetProcessor {
    pub fn new(engine: Option<Arc<dyn WorkbookEngine>>) -> Self {
        Self { engine }
    }

    fn process_csv(&self, path: &Path) -> Result<ExtractedContent, EngineError> {
        let bytes = std::fs::read(path)?;
        let text = String::from_utf8_lossy(&bytes);
        let rows: Vec<Vec<String>> = csv_rows(&text)
            .into_iter()
            .filter(|row| row.iter().any(|cell| !cell.trim().is_empty()))
            .collect();

        let rendered = if rows.is_empty() {
            EMPTY_SPREADSHEET.to_string()
        } else {
            rows_to_markdown(&rows)
        };
        Ok(ExtractedContent::new(
            rendered,
            metadata(path, &[("row_count", json!(rows.len()))]),
            ProcessingMethod::TextExtract,
        ))
    }

    fn process_workbook(
        &self,
        engine: &dyn WorkbookEngine,
        path: &Path,
    ) -> Result<ExtractedContent, EngineError> {
        let sheets = engine.read(&std::fs::read(path)?)?;
        let titled = sheets.len() > 1;

        let mut rendered = Vec::new();
        let mut total_rows = 0usize;
        for sheet in &sheets {
            let rows: Vec<Vec<String>> = sheet
                .rows
                .iter()
                .map(|row| {
                    row.iter()
                        .map(|cell| cell.clone().unwrap_or_default())
                        .collect::<Vec<_>>()
                })
                .filter(|row| row.iter().any(|cell| !cell.is_empty()))
                .collect();
            if rows.is_empty() {
                continue;
            }
            total_rows += rows.len();
            let mut table = rows_to_markdown(&rows);
            if sheet.truncated {
                table.push_str(&format!(
                    "\n\n{}",
                    truncation_notice(XLSX_MAX_CELLS_PER_SHEET)
                ));
            }
            rendered.push(if titled {
                format!("### {}\n\n{}", sheet.name, table)
            } else {
                table
            });
        }

        let text = if rendered.is_empty() {
            EMPTY_SPREADSHEET.to_string()
        } else {
            rendered.join("\n\n")
        };
        Ok(ExtractedContent::new(
            text,
            metadata(
                path,
                &[
                    ("sheet_count", json!(sheets.len())),
                    ("total_rows", json!(total_rows)),
                ],
            ),
            ProcessingMethod::TextExtract,
        ))
    }
}

impl AttachmentProcessor for SpreadsheetProcessor {
    fn name(&self) -> &'static str {
        "spreadsheet"
    }

    fn supported_types(&self) -> &'static [&'static str] {
        &[MIME_XLSX, MIME_CSV]
    }

    fn process(&self, path: &Path) -> ExtractedContent {
        if !path.exists() {
            return not_found(path);
        }
        let is_csv = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("csv"))
            .unwrap_or(false);

        let result = if is_csv {
            self.process_csv(path)
        } else {
            match self.engine.as_deref() {
                Some(engine) => self.process_workbook(engine, path),
                None => {
                    return ExtractedContent::failure(format!(
                        "Spreadsheet dependencies not available: {}",
                        EngineError::Unavailable("workbook engine".to_string())
                    ))
                }
            }
        };
        result.unwrap_or_else(|e| {
            ExtractedContent::failure(format!("Spreadsheet extraction failed: {}", e))
        })
    }
}

fn truncation_notice(cells: usize) -> String {
    format!("(Sheet truncated: only the first {} cells were read)", cells)
}

fn markdown_cell(cell: &str) -> String {
    cell.replace('|', "\\|").replace(['\r', '\n'], " ")
}

/// Render rows as a Markdown table. The first row is the header; later rows
/// are padded or truncated to its width.
pub fn rows_to_markdown(rows: &[Vec<String>]) -> String {
    let Some((header, body)) = rows.split_first() else {
        return String::new();
    };
    let width = header.len();
    let render = |cells: Vec<String>| format!("| {} |", cells.join(" | "));

    let mut lines = Vec::with_capacity(rows.len() + 1);
    lines.push(render(header.iter().map(|c| markdown_cell(c)).collect()));
    lines.push(render(vec!["---".to_string(); width]));
    for row in body {
        let cells = (0..width)
            .map(|i| row.get(i).map(|c| markdown_cell(c)).unwrap_or_default())
            .collect();
        lines.push(render(cells));
    }
    lines.join("\n")
}

// ═══════════════════════════════════════════════════════════════════════
// Fallback
// ═══════════════════════════════════════════════════════════════════════

/// Placeholder description for types no other processor handles.
#[derive(Debug, Clone, Copy, Default)]
pub struct FallbackProcessor;

impl AttachmentProcessor for FallbackProcessor {
    fn name(&self) -> &'static str {
        "fallback"
    }

    fn supported_types(&self) -> &'static [&'static str] {
        &["*/*"]
    }

    fn process(&self, path: &Path) -> ExtractedContent {
        if !path.exists() {
            return not_found(path);
        }
        let mime = mime_guess::from_path(path).first_raw();
        ExtractedContent::new(
            format!(
                "(Binary file: {}, type: {})",
                file_name(path),
                mime.unwrap_or("unknown")
            ),
            metadata(path, &[("mime_type", json!(mime))]),
            ProcessingMethod::Fallback,
        )
    }
}
