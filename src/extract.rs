//! Backing engines for attachment content extraction.
//!
//! Each attachment processor delegates the format-specific work to an engine
//! defined here. Engines are plain trait objects handed to processors at
//! construction time, so an engine that is not installed (no `tesseract`
//! binary, for example) is simply absent and the processor reports it.
//!
//! Built-in engines:
//! - [`TesseractCli`]: OCR through the `tesseract` command-line tool.
//! - [`PdfExtractEngine`]: per-page PDF text via `pdf-extract`.
//! - [`OoxmlWordEngine`]: paragraphs and tables from `word/document.xml`.
//! - [`OoxmlWorkbookEngine`]: sheets, shared strings, and cells from `.xlsx`.
//!
//! [`csv_rows`] is the row reader used for CSV attachments.

use std::collections::HashMap;
use std::io::{Cursor, Read, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};

use chrono::{NaiveDate, NaiveTime, TimeDelta};
use image::{DynamicImage, ImageFormat};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_DOC: &str = "application/msword";
pub const MIME_XLSX: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
pub const MIME_XLS: &str = "application/vnd.ms-excel";
pub const MIME_CSV: &str = "text/csv";
pub const MIME_OCTET_STREAM: &str = "application/octet-stream";

/// Maximum sheets to read from a workbook.
const XLSX_MAX_SHEETS: usize = 100;
/// Maximum cells to read per sheet (avoids unbounded memory).
pub const XLSX_MAX_CELLS_PER_SHEET: usize = 100_000;
/// Columns in a sheet, `A` through `XFD`.
const XLSX_MAX_COLUMNS: usize = 16_384;
/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

type OoxmlArchive<'a> = zip::ZipArchive<Cursor<&'a [u8]>>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{0} not installed")]
    Unavailable(String),
    #[error("invalid PDF: {0}")]
    Pdf(String),
    #[error("invalid OOXML package: {0}")]
    Ooxml(String),
    #[error("cannot encode image: {0}")]
    Image(String),
    #[error("OCR engine error: {0}")]
    Ocr(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

// ═══════════════════════════════════════════════════════════════════════
// Engine traits
// ═══════════════════════════════════════════════════════════════════════

/// Recognizes text in a decoded raster image.
pub trait OcrEngine: Send + Sync {
    /// `languages` uses tesseract syntax, e.g. `"eng+chi_tra"`.
    fn recognize(&self, image: &DynamicImage, languages: &str) -> Result<String, EngineError>;
}

/// Extracts the text of every page of a PDF, in page order.
pub trait PdfEngine: Send + Sync {
    fn page_texts(&self, bytes: &[u8]) -> Result<Vec<String>, EngineError>;
}

/// Reads the body paragraphs and tables of a Word document.
pub trait WordEngine: Send + Sync {
    fn read(&self, bytes: &[u8]) -> Result<WordDocument, EngineError>;
}

/// Reads every sheet of a workbook as a grid of optional cell values.
pub trait WorkbookEngine: Send + Sync {
    fn read(&self, bytes: &[u8]) -> Result<Vec<Sheet>, EngineError>;
}

/// Body content of a Word document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WordDocument {
    /// Top-level paragraphs in document order (paragraphs inside tables excluded).
    pub paragraphs: Vec<String>,
    /// Top-level tables as rows of cell texts.
    pub tables: Vec<Vec<Vec<String>>>,
}

/// One worksheet. Rows are padded to the sheet's widest row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sheet {
    pub name: String,
    pub rows: Vec<Vec<Option<String>>>,
    /// Set when the per-sheet cell limit stopped reading early.
    pub truncated: bool,
}

// ═══════════════════════════════════════════════════════════════════════
// OCR
// ═══════════════════════════════════════════════════════════════════════

/// OCR through the `tesseract` binary, fed a PNG on stdin.
#[derive(Debug, Clone)]
pub struct TesseractCli {
    program: PathBuf,
}

impl TesseractCli {
    /// Locate `tesseract` on `PATH`. Returns `None` when it cannot be run.
    pub fn detect() -> Option<Self> {
        Self::with_program("tesseract")
    }

    pub fn with_program(program: impl Into<PathBuf>) -> Option<Self> {
        let program = program.into();
        let status = Command::new(&program)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .ok()?;
        status.success().then_some(Self { program })
    }
}

impl OcrEngine for TesseractCli {
    fn recognize(&self, image: &DynamicImage, languages: &str) -> Result<String, EngineError> {
        let mut png = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .map_err(|e| EngineError::Image(e.to_string()))?;

        let mut child = Command::new(&self.program)
            .args(["stdin", "stdout", "-l", languages])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        {
            let mut stdin = child
                .stdin
                .take()
                .ok_or_else(|| EngineError::Ocr("stdin unavailable".to_string()))?;
            stdin.write_all(&png)?;
        }
        let output = child.wait_with_output()?;
        if !output.status.success() {
            return Err(EngineError::Ocr(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

// ═══════════════════════════════════════════════════════════════════════
// PDF
// ═══════════════════════════════════════════════════════════════════════

/// PDF text extraction via `pdf-extract`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PdfExtractEngine;

impl PdfEngine for PdfExtractEngine {
    fn page_texts(&self, bytes: &[u8]) -> Result<Vec<String>, EngineError> {
        // pdf-extract panics on some malformed inputs.
        match std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem_by_pages(bytes)) {
            Ok(Ok(pages)) => Ok(pages),
            Ok(Err(e)) => Err(EngineError::Pdf(e.to_string())),
            Err(_) => Err(EngineError::Pdf("parser aborted on malformed input".to_string())),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// OOXML helpers
// ═══════════════════════════════════════════════════════════════════════

fn open_archive(bytes: &[u8]) -> Result<OoxmlArchive<'_>, EngineError> {
    zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| EngineError::Ooxml(e.to_string()))
}

fn read_zip_entry_bounded(
    archive: &mut OoxmlArchive<'_>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, EngineError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| EngineError::Ooxml(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry.take(max_bytes).read_to_end(&mut out)?;
    if out.len() as u64 >= max_bytes {
        return Err(EngineError::Ooxml(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(out)
}

fn read_optional_entry(
    archive: &mut OoxmlArchive<'_>,
    name: &str,
) -> Result<Option<Vec<u8>>, EngineError> {
    if archive.index_for_name(name).is_none() {
        return Ok(None);
    }
    read_zip_entry_bounded(archive, name, MAX_XML_ENTRY_BYTES).map(Some)
}

fn xml_reader(xml: &[u8]) -> Reader<&[u8]> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(false);
    reader
}

fn attribute(e: &BytesStart<'_>, local: &[u8]) -> Option<String> {
    e.attributes().flatten().find_map(|a| {
        (a.key.local_name().as_ref() == local)
            .then(|| a.unescape_value().ok().map(|v| v.into_owned()))
            .flatten()
    })
}

// ═══════════════════════════════════════════════════════════════════════
// Word
// ═══════════════════════════════════════════════════════════════════════

/// Word reader over `word/document.xml`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OoxmlWordEngine;

impl WordEngine for OoxmlWordEngine {
    fn read(&self, bytes: &[u8]) -> Result<WordDocument, EngineError> {
        let mut archive = open_archive(bytes)?;
        let xml = read_zip_entry_bounded(&mut archive, "word/document.xml", MAX_XML_ENTRY_BYTES)?;
        parse_word_body(&xml)
    }
}

fn parse_word_body(xml: &[u8]) -> Result<WordDocument, EngineError> {
    let mut doc = WordDocument::default();
    let mut reader = xml_reader(xml);
    let mut buf = Vec::new();

    let mut table_depth = 0usize;
    let mut table: Vec<Vec<String>> = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut cell = String::new();
    let mut paragraph = String::new();
    let mut in_text = false;
    // <w:tab/> also declares tab stops in paragraph properties; only runs
    // carry content.
    let mut in_run = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"tbl" => {
                    table_depth += 1;
                    if table_depth == 1 {
                        table.clear();
                    }
                }
                b"tr" if table_depth == 1 => row.clear(),
                b"tc" if table_depth == 1 => cell.clear(),
                b"p" => paragraph.clear(),
                b"r" => in_run = true,
                b"t" => in_text = true,
                _ => {}
            },
            Ok(Event::Empty(e)) if in_run => match e.local_name().as_ref() {
                b"tab" => paragraph.push('\t'),
                b"br" | b"cr" => paragraph.push('\n'),
                _ => {}
            },
            Ok(Event::Text(te)) if in_text => {
                let text = te
                    .unescape()
                    .map_err(|e| EngineError::Ooxml(e.to_string()))?;
                paragraph.push_str(&text);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"r" => in_run = false,
                b"p" => {
                    if table_depth == 0 {
                        doc.paragraphs.push(std::mem::take(&mut paragraph));
                    } else {
                        if !cell.is_empty() {
                            cell.push('\n');
                        }
                        cell.push_str(&paragraph);
                        paragraph.clear();
                    }
                }
                b"tc" if table_depth == 1 => row.push(cell.trim().to_string()),
                b"tr" if table_depth == 1 => table.push(std::mem::take(&mut row)),
                b"tbl" => {
                    if table_depth == 1 {
                        doc.tables.push(std::mem::take(&mut table));
                    }
                    table_depth = table_depth.saturating_sub(1);
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(EngineError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(doc)
}

// ═══════════════════════════════════════════════════════════════════════
// Workbook
// ═══════════════════════════════════════════════════════════════════════

/// `.xlsx` reader: workbook sheet order, relationships, shared strings, cells.
#[derive(Debug, Clone, Copy, Default)]
pub struct OoxmlWorkbookEngine;

impl WorkbookEngine for OoxmlWorkbookEngine {
    fn read(&self, bytes: &[u8]) -> Result<Vec<Sheet>, EngineError> {
        let mut archive = open_archive(bytes)?;
        let shared_strings = match read_optional_entry(&mut archive, "xl/sharedStrings.xml")? {
            Some(xml) => parse_shared_strings(&xml)?,
            None => Vec::new(),
        };
        let date_styles = match read_optional_entry(&mut archive, "xl/styles.xml")? {
            Some(xml) => parse_date_styles(&xml)?,
            None => Vec::new(),
        };
        let (entries, date1904) = list_sheets(&mut archive)?;
        let decoder = CellDecoder {
            shared_strings: &shared_strings,
            date_styles: &date_styles,
            date1904,
        };

        let mut sheets = Vec::new();
        for (name, path) in entries.into_iter().take(XLSX_MAX_SHEETS) {
            let xml = read_zip_entry_bounded(&mut archive, &path, MAX_XML_ENTRY_BYTES)?;
            let (rows, truncated) = parse_sheet_rows(&xml, &decoder)?;
            sheets.push(Sheet {
                name,
                rows,
                truncated,
            });
        }
        Ok(sheets)
    }
}

/// Sheet `(name, entry path)` pairs in workbook order, and whether the
/// workbook counts dates from 1904.
fn list_sheets(
    archive: &mut OoxmlArchive<'_>,
) -> Result<(Vec<(String, String)>, bool), EngineError> {
    let manifest = match read_optional_entry(archive, "xl/workbook.xml")? {
        Some(xml) => parse_workbook(&xml)?,
        None => WorkbookManifest::default(),
    };
    let targets = match read_optional_entry(archive, "xl/_rels/workbook.xml.rels")? {
        Some(xml) => parse_relationships(&xml)?,
        None => HashMap::new(),
    };

    let resolved: Vec<(String, String)> = manifest
        .sheets
        .into_iter()
        .filter_map(|(name, rel_id)| {
            let target = targets.get(&rel_id)?;
            let path = match target.strip_prefix('/') {
                Some(absolute) => absolute.to_string(),
                None => format!("xl/{}", target),
            };
            archive.index_for_name(&path).map(|_| (name, path))
        })
        .collect();
    if !resolved.is_empty() {
        return Ok((resolved, manifest.date1904));
    }

    // No usable workbook manifest: fall back to numbered worksheet entries.
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("xl/worksheets/sheet") && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    names.sort_by_key(|name| sheet_number(name));
    let sheets = names
        .into_iter()
        .map(|path| (format!("Sheet{}", sheet_number(&path)), path))
        .collect();
    Ok((sheets, manifest.date1904))
}

fn sheet_number(path: &str) -> u32 {
    path.trim_start_matches("xl/worksheets/sheet")
        .trim_end_matches(".xml")
        .parse::<u32>()
        .unwrap_or(u32::MAX)
}

#[derive(Debug, Default)]
struct WorkbookManifest {
    /// `(name, relationship id)` in workbook order.
    sheets: Vec<(String, String)>,
    date1904: bool,
}

fn parse_workbook(xml: &[u8]) -> Result<WorkbookManifest, EngineError> {
    let mut manifest = WorkbookManifest::default();
    let mut reader = xml_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"sheet" => {
                    if let (Some(name), Some(id)) = (attribute(&e, b"name"), attribute(&e, b"id"))
                    {
                        manifest.sheets.push((name, id));
                    }
                }
                b"workbookPr" => {
                    manifest.date1904 = matches!(
                        attribute(&e, b"date1904").as_deref(),
                        Some("1") | Some("true")
                    );
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(EngineError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(manifest)
}

fn parse_relationships(xml: &[u8]) -> Result<HashMap<String, String>, EngineError> {
    let mut targets = HashMap::new();
    let mut reader = xml_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e))
                if e.local_name().as_ref() == b"Relationship" =>
            {
                if let (Some(id), Some(target)) = (attribute(&e, b"Id"), attribute(&e, b"Target"))
                {
                    targets.insert(id, target);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(EngineError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(targets)
}

fn parse_shared_strings(xml: &[u8]) -> Result<Vec<String>, EngineError> {
    let mut strings = Vec::new();
    let mut reader = xml_reader(xml);
    let mut buf = Vec::new();
    let mut current = String::new();
    let mut in_text = false;
    // Phonetic runs (<rPh>) repeat the reading of the string; skip them.
    let mut in_phonetic = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => current.clear(),
                b"rPh" => in_phonetic = true,
                b"t" => in_text = !in_phonetic,
                _ => {}
            },
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"si" => strings.push(String::new()),
            Ok(Event::Text(te)) if in_text => {
                let text = te
                    .unescape()
                    .map_err(|e| EngineError::Ooxml(e.to_string()))?;
                current.push_str(&text);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"si" => strings.push(std::mem::take(&mut current)),
                b"rPh" => in_phonetic = false,
                b"t" => in_text = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(EngineError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

/// For each `cellXfs` style, whether its number format shows a date or time.
fn parse_date_styles(xml: &[u8]) -> Result<Vec<bool>, EngineError> {
    let mut custom: HashMap<u32, String> = HashMap::new();
    let mut formats: Vec<u32> = Vec::new();
    let mut reader = xml_reader(xml);
    let mut buf = Vec::new();
    let mut in_cell_xfs = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"cellXfs" => in_cell_xfs = true,
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"numFmt" => {
                    let id = attribute(&e, b"numFmtId").and_then(|v| v.parse().ok());
                    if let (Some(id), Some(code)) = (id, attribute(&e, b"formatCode")) {
                        custom.insert(id, code);
                    }
                }
                b"xf" if in_cell_xfs => formats.push(
                    attribute(&e, b"numFmtId")
                        .and_then(|v| v.parse().ok())
                        .unwrap_or(0),
                ),
                _ => {}
            },
            Ok(Event::End(e)) if e.local_name().as_ref() == b"cellXfs" => in_cell_xfs = false,
            Ok(Event::Eof) => break,
            Err(e) => return Err(EngineError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(formats
        .into_iter()
        .map(|id| match custom.get(&id) {
            Some(code) => is_date_format_code(code),
            None => matches!(id, 14..=22 | 45..=47),
        })
        .collect())
}

/// A format code shows a date or time when it has a `d`, `m`, `y`, `h`, or
/// `s` outside quoted literals, escapes, and bracketed sections.
fn is_date_format_code(code: &str) -> bool {
    let mut chars = code.chars();
    while let Some(c) = chars.next() {
        match c {
            '"' => {
                for q in chars.by_ref() {
                    if q == '"' {
                        break;
                    }
                }
            }
            '[' => {
                for q in chars.by_ref() {
                    if q == ']' {
                        break;
                    }
                }
            }
            '\\' | '_' | '*' => {
                chars.next();
            }
            _ if matches!(c.to_ascii_lowercase(), 'd' | 'm' | 'y' | 'h' | 's') => return true,
            _ => {}
        }
    }
    false
}

/// Zero-based column index of a cell reference such as `"AB12"`.
/// References past the last sheet column (`XFD`) are rejected.
fn column_index(reference: &str) -> Result<Option<usize>, EngineError> {
    let mut index = 0usize;
    let mut letters = 0usize;
    for b in reference.bytes().take_while(u8::is_ascii_alphabetic) {
        letters += 1;
        index = index * 26 + (b.to_ascii_uppercase() - b'A' + 1) as usize;
        if index > XLSX_MAX_COLUMNS {
            return Err(column_out_of_range());
        }
    }
    Ok((letters > 0).then(|| index - 1))
}

fn column_out_of_range() -> EngineError {
    EngineError::Ooxml(format!(
        "cell reference beyond column XFD ({} columns)",
        XLSX_MAX_COLUMNS
    ))
}

fn cell_column(e: &BytesStart<'_>, current: usize) -> Result<usize, EngineError> {
    match attribute(e, b"r") {
        Some(reference) => Ok(column_index(&reference)?.unwrap_or(current)),
        None => Ok(current),
    }
}

/// Rows of one worksheet, padded to the widest row, and whether the cell
/// limit cut the sheet short.
fn parse_sheet_rows(
    xml: &[u8],
    decoder: &CellDecoder<'_>,
) -> Result<(Vec<Vec<Option<String>>>, bool), EngineError> {
    let mut rows: Vec<Vec<Option<String>>> = Vec::new();
    let mut reader = xml_reader(xml);
    let mut buf = Vec::new();

    let mut row: Vec<Option<String>> = Vec::new();
    let mut column = 0usize;
    let mut cell_type = String::new();
    let mut style: Option<usize> = None;
    let mut raw = String::new();
    let mut has_value = false;
    let mut in_value = false;
    let mut cell_count = 0usize;
    let mut truncated = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"row" => {
                    row.clear();
                    column = 0;
                }
                b"c" => {
                    column = cell_column(&e, column)?;
                    cell_type = attribute(&e, b"t").unwrap_or_default();
                    style = attribute(&e, b"s").and_then(|s| s.parse().ok());
                    raw.clear();
                    has_value = false;
                }
                b"v" | b"t" => in_value = true,
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"row" => rows.push(Vec::new()),
                b"c" => column = cell_column(&e, column)? + 1,
                _ => {}
            },
            Ok(Event::Text(te)) if in_value => {
                let text = te
                    .unescape()
                    .map_err(|e| EngineError::Ooxml(e.to_string()))?;
                raw.push_str(&text);
                has_value = true;
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"c" => {
                    if has_value {
                        if cell_count == XLSX_MAX_CELLS_PER_SHEET {
                            truncated = true;
                            break;
                        }
                        if column >= XLSX_MAX_COLUMNS {
                            return Err(column_out_of_range());
                        }
                        if row.len() <= column {
                            row.resize(column + 1, None);
                        }
                        row[column] = Some(decoder.value(&cell_type, style, &raw));
                        cell_count += 1;
                    }
                    column += 1;
                }
                b"row" => rows.push(std::mem::take(&mut row)),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(EngineError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    if truncated && !row.is_empty() {
        rows.push(row);
    }

    let width = rows.iter().map(Vec::len).max().unwrap_or(0);
    for r in rows.iter_mut() {
        r.resize(width, None);
    }
    Ok((rows, truncated))
}

/// Turns raw `<v>` text into display text.
struct CellDecoder<'a> {
    shared_strings: &'a [String],
    /// Indexed by the cell's `s` attribute.
    date_styles: &'a [bool],
    date1904: bool,
}

impl CellDecoder<'_> {
    fn value(&self, cell_type: &str, style: Option<usize>, raw: &str) -> String {
        match cell_type {
            "s" => raw
                .trim()
                .parse::<usize>()
                .ok()
                .and_then(|i| self.shared_strings.get(i))
                .cloned()
                .unwrap_or_default(),
            "b" => match raw.trim() {
                "1" => "TRUE".to_string(),
                _ => "FALSE".to_string(),
            },
            "" | "n" if self.is_date_style(style) => raw
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(|serial| excel_datetime(serial, self.date1904))
                .unwrap_or_else(|| raw.to_string()),
            _ => raw.to_string(),
        }
    }

    fn is_date_style(&self, style: Option<usize>) -> bool {
        style
            .and_then(|s| self.date_styles.get(s))
            .copied()
            .unwrap_or(false)
    }
}

/// Render a date serial as `2024-01-01 00:00:00`, or a time-only value
/// (below 1 in the 1900 system) as `08:30:00`.
fn excel_datetime(serial: f64, date1904: bool) -> Option<String> {
    if !serial.is_finite() || serial < 0.0 {
        return None;
    }
    let seconds = (serial * 86_400.0).round() as i64;
    if !date1904 && serial < 1.0 {
        let time = NaiveTime::from_num_seconds_from_midnight_opt(seconds.min(86_399) as u32, 0)?;
        return Some(time.format("%H:%M:%S").to_string());
    }
    // The 1900 system counts a nonexistent 1900-02-29, so earlier serials
    // sit one day later.
    let epoch = match (date1904, serial < 60.0) {
        (true, _) => NaiveDate::from_ymd_opt(1904, 1, 1)?,
        (false, true) => NaiveDate::from_ymd_opt(1899, 12, 31)?,
        (false, false) => NaiveDate::from_ymd_opt(1899, 12, 30)?,
    };
    let datetime = epoch
        .and_hms_opt(0, 0, 0)?
        .checked_add_signed(TimeDelta::try_seconds(seconds)?)?;
    Some(datetime.format("%Y-%m-%d %H:%M:%S").to_string())
}

// ═══════════════════════════════════════════════════════════════════════
// CSV
// ═══════════════════════════════════════════════════════════════════════

/// Split CSV text into records (RFC 4180: quoted fields, doubled quotes,
/// CRLF or LF line endings, newlines inside quotes). A blank line yields an
/// empty record.
pub fn csv_rows(text: &str) -> Vec<Vec<String>> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut rows = Vec::new();
    let mut record: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut field_started = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    field.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            } else {
                field.push(c);
            }
            continue;
        }
        match c {
            '"' if !field_started => {
                in_quotes = true;
                field_started = true;
            }
            ',' => {
                record.push(std::mem::take(&mut field));
                field_started = false;
            }
            '\r' | '\n' => {
                if c == '\r' && chars.peek() == Some(&'\n') {
                    chars.next();
                }
                if record.is_empty() && !field_started {
                    rows.push(Vec::new());
                } else {
                    record.push(std::mem::take(&mut field));
                    rows.push(std::mem::take(&mut record));
                }
                field_started = false;
            }
            _ => {
                field.push(c);
                field_started = true;
            }
        }
    }
    if !record.is_empty() || field_started {
        record.push(field);
        rows.push(record);
    }
    rows
}
