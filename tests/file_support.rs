//! Integration tests for attachment format support.
//!
//! Builds minimal PDF, DOCX, XLSX, and CSV files on disk and runs them
//! through the processor dispatcher and the `extract` command.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use redmine_knowledge_agent::extract::{
    OoxmlWordEngine, OoxmlWorkbookEngine, PdfExtractEngine, MIME_DOCX, MIME_OCTET_STREAM,
    MIME_PDF, MIME_XLSX,
};
use redmine_knowledge_agent::factory::{Engines, ProcessorFactory};
use redmine_knowledge_agent::models::ProcessingMethod;
use tempfile::TempDir;

fn redmine_ka_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop();
    path.pop();
    path.push("redmine-ka");
    path
}

fn factory() -> ProcessorFactory {
    ProcessorFactory::with_engines(Engines {
        ocr: None,
        ocr_languages: "eng".to_string(),
        pdf: Some(Arc::new(PdfExtractEngine)),
        word: Some(Arc::new(OoxmlWordEngine)),
        workbook: Some(Arc::new(OoxmlWorkbookEngine)),
    })
}

/// Minimal valid PDF with one page showing `phrase`.
/// Builds body then xref with correct byte offsets so pdf-extract can parse it.
fn minimal_pdf(phrase: &str) -> Vec<u8> {
    let content = format!("BT /F1 12 Tf 100 700 Td ({}) Tj ET", phrase);
    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");
    let o1 = out.len();
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
    let o2 = out.len();
    out.extend_from_slice(b"2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n");
    let o3 = out.len();
    out.extend_from_slice(b"3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >> endobj\n");
    let o4 = out.len();
    out.extend_from_slice(
        format!(
            "4 0 obj << /Length {} >> stream\n{}\nendstream endobj\n",
            content.len(),
            content
        )
        .as_bytes(),
    );
    let o5 = out.len();
    out.extend_from_slice(
        b"5 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n",
    );
    let xref_start = out.len();
    out.extend_from_slice(b"xref\n0 6\n");
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for offset in [o1, o2, o3, o4, o5] {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(b"trailer << /Size 6 /Root 1 0 R >>\nstartxref\n");
    out.extend_from_slice(format!("{}\n", xref_start).as_bytes());
    out.extend_from_slice(b"%%EOF\n");
    out
}

fn zip_package(entries: &[(&str, String)]) -> Vec<u8> {
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        for (name, body) in entries {
            zip.start_file(*name, zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(body.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }
    buf
}

/// Docx with two paragraphs and a 2x2 table.
fn minimal_docx() -> Vec<u8> {
    let cell = |text: &str| format!("<w:tc><w:p><w:r><w:t>{}</w:t></w:r></w:p></w:tc>", text);
    let xml = format!(
        "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body>\
<w:p><w:r><w:t>Release checklist</w:t></w:r></w:p>\
<w:p><w:r><w:t>Verify the</w:t></w:r><w:r><w:t xml:space=\"preserve\"> backups</w:t></w:r></w:p>\
<w:tbl><w:tr>{}{}</w:tr><w:tr>{}{}</w:tr></w:tbl>\
</w:body></w:document>",
        cell("Step"),
        cell("Owner"),
        cell("Deploy"),
        cell("Ops")
    );
    zip_package(&[("word/document.xml", xml)])
}

/// Workbook with two named sheets, shared strings, and a numeric cell.
fn minimal_xlsx() -> Vec<u8> {
    zip_package(&[
        (
            "xl/workbook.xml",
            "<workbook xmlns:r=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships\"><sheets>\
<sheet name=\"Budget\" sheetId=\"1\" r:id=\"rId1\"/><sheet name=\"Notes\" sheetId=\"2\" r:id=\"rId2\"/>\
</sheets></workbook>"
                .to_string(),
        ),
        (
            "xl/_rels/workbook.xml.rels",
            "<Relationships>\
<Relationship Id=\"rId1\" Target=\"worksheets/sheet1.xml\"/>\
<Relationship Id=\"rId2\" Target=\"/xl/worksheets/sheet2.xml\"/>\
</Relationships>"
                .to_string(),
        ),
        (
            "xl/sharedStrings.xml",
            "<sst><si><t>Item</t></si><si><t>Cost</t></si><si><t>Server</t></si><si><t>remember</t></si></sst>"
                .to_string(),
        ),
        (
            "xl/worksheets/sheet1.xml",
            "<worksheet><sheetData>\
<row r=\"1\"><c r=\"A1\" t=\"s\"><v>0</v></c><c r=\"B1\" t=\"s\"><v>1</v></c></row>\
<row r=\"2\"><c r=\"A2\" t=\"s\"><v>2</v></c><c r=\"B2\"><v>1200</v></c></row>\
</sheetData></worksheet>"
                .to_string(),
        ),
        (
            "xl/worksheets/sheet2.xml",
            "<worksheet><sheetData><row r=\"1\"><c r=\"A1\" t=\"s\"><v>3</v></c></row></sheetData></worksheet>"
                .to_string(),
        ),
    ])
}

fn write(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, bytes).unwrap();
    path
}

#[test]
fn test_pdf_text_extracted() {
    let tmp = TempDir::new().unwrap();
    let path = write(tmp.path(), "guide.pdf", &minimal_pdf("knowledge base phrase"));

    let result = factory().process_file(&path, Some(MIME_PDF));
    assert!(result.error.is_none(), "{:?}", result.error);
    assert!(result.text.contains("knowledge base phrase"), "{}", result.text);
    assert_eq!(result.metadata["page_count"], 1);
    assert_eq!(result.processing_method, ProcessingMethod::TextExtract);
}

#[test]
fn test_corrupt_pdf_reports_error() {
    let tmp = TempDir::new().unwrap();
    let path = write(tmp.path(), "broken.pdf", b"%PDF-1.4\nthis is not a pdf body");

    let result = factory().process_file(&path, Some(MIME_PDF));
    assert!(result
        .error
        .as_deref()
        .unwrap()
        .starts_with("PDF extraction failed:"));
    assert!(result.text.is_empty());
}

#[test]
fn test_docx_paragraphs_and_tables() {
    let tmp = TempDir::new().unwrap();
    let path = write(tmp.path(), "checklist.docx", &minimal_docx());

    let result = factory().process_file(&path, Some(MIME_DOCX));
    assert!(result.error.is_none(), "{:?}", result.error);
    assert_eq!(
        result.text,
        "Release checklist\n\nVerify the backups\n\n### Tables\n\nStep | Owner\nDeploy | Ops"
    );
    assert_eq!(result.metadata["paragraph_count"], 2);
    assert_eq!(result.metadata["table_count"], 1);
}

#[test]
fn test_xlsx_sheets_rendered_as_tables() {
    let tmp = TempDir::new().unwrap();
    let path = write(tmp.path(), "budget.xlsx", &minimal_xlsx());

    let result = factory().process_file(&path, Some(MIME_XLSX));
    assert!(result.error.is_none(), "{:?}", result.error);
    assert_eq!(
        result.text,
        "### Budget\n\n| Item | Cost |\n| --- | --- |\n| Server | 1200 |\n\n### Notes\n\n| remember |\n| --- |"
    );
    assert_eq!(result.metadata["sheet_count"], 2);
    assert_eq!(result.metadata["total_rows"], 3);
}

#[test]
fn test_csv_guessed_from_extension() {
    let tmp = TempDir::new().unwrap();
    let path = write(
        tmp.path(),
        "contacts.csv",
        b"name,email\r\n\"Doe, Jane\",jane@example.com\r\n",
    );

    let result = factory().process_file(&path, Some(MIME_OCTET_STREAM));
    assert_eq!(
        result.text,
        "| name | email |\n| --- | --- |\n| Doe, Jane | jane@example.com |"
    );
    assert_eq!(result.metadata["row_count"], 2);
}

#[test]
fn test_legacy_word_reaches_fallback() {
    let tmp = TempDir::new().unwrap();
    let path = write(tmp.path(), "old.doc", b"\xd0\xcf\x11\xe0legacy");

    let result = factory().process_file(&path, Some("application/msword"));
    assert_eq!(result.processing_method, ProcessingMethod::Fallback);
    assert_eq!(result.text, "(Binary file: old.doc, type: application/msword)");
}

#[test]
fn test_missing_file_reports_error() {
    let tmp = TempDir::new().unwrap();
    let result = factory().process_file(&tmp.path().join("nope.pdf"), None);
    assert!(result.error.unwrap().starts_with("File not found"));
}

#[test]
fn test_extract_command_prints_json() {
    let tmp = TempDir::new().unwrap();
    let path = write(tmp.path(), "sheet.csv", b"a,b\n1,2\n");

    let output = Command::new(redmine_ka_binary())
        .args(["extract", path.to_str().unwrap()])
        .output()
        .expect("failed to run redmine-ka");
    assert!(output.status.success());

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["processing_method"], "text_extract");
    assert_eq!(json["text"], "| a | b |\n| --- | --- |\n| 1 | 2 |");
    assert_eq!(json["metadata"]["filename"], "sheet.csv");
    assert!(json.get("error").is_none());
}

#[test]
fn test_extract_command_with_mime_override() {
    let tmp = TempDir::new().unwrap();
    let path = write(tmp.path(), "blob.bin", b"\x00\x01");

    let output = Command::new(redmine_ka_binary())
        .args(["extract", path.to_str().unwrap(), "--mime", "application/x-thing"])
        .output()
        .expect("failed to run redmine-ka");
    assert!(output.status.success());

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["processing_method"], "fallback");
}
