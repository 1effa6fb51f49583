//! Core data models used throughout the knowledge agent.
//!
//! These types represent the issues, wiki pages, attachments, and extraction
//! results that flow from the Redmine client through the attachment
//! processors into the Markdown generator. They are plain value objects:
//! built once upstream and never mutated afterwards.
//!
//! The `Api*` types mirror the Redmine REST JSON payloads and are converted
//! into the metadata types with [`IssueMetadata::from_api`] and
//! [`WikiPageMetadata::from_api`].

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::extract::{
    MIME_CSV, MIME_DOC, MIME_DOCX, MIME_OCTET_STREAM, MIME_PDF, MIME_XLS, MIME_XLSX,
};

/// How the text of an [`ExtractedContent`] was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingMethod {
    Ocr,
    TextExtract,
    Llm,
    Fallback,
}

impl ProcessingMethod {
    /// Label used in the generated document to tag extracted text.
    pub fn label(self) -> &'static str {
        match self {
            ProcessingMethod::Ocr => "OCR extraction",
            ProcessingMethod::TextExtract => "text extraction",
            ProcessingMethod::Llm => "AI analysis",
            ProcessingMethod::Fallback => "basic info",
        }
    }
}

/// Result of processing one attachment.
///
/// `metadata` keeps insertion order so that serialized output is stable.
/// A present `error` means extraction did not succeed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedContent {
    pub text: String,
    #[serde(default)]
    pub metadata: IndexMap<String, serde_json::Value>,
    pub processing_method: ProcessingMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExtractedContent {
    pub fn new(
        text: impl Into<String>,
        metadata: IndexMap<String, serde_json::Value>,
        processing_method: ProcessingMethod,
    ) -> Self {
        Self {
            text: text.into(),
            metadata,
            processing_method,
            error: None,
        }
    }

    /// A failed extraction: empty text, no metadata, tagged as fallback.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            text: String::new(),
            metadata: IndexMap::new(),
            processing_method: ProcessingMethod::Fallback,
            error: Some(error.into()),
        }
    }

    pub fn is_successful(&self) -> bool {
        self.error.is_none() && !self.text.trim().is_empty()
    }
}

/// An attachment as described by Redmine, before any extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachmentInfo {
    pub id: u64,
    pub filename: String,
    pub content_type: String,
    pub filesize: u64,
    pub content_url: String,
    #[serde(default)]
    pub description: String,
}

impl AttachmentInfo {
    pub fn is_image(&self) -> bool {
        self.content_type.starts_with("image/")
    }

    pub fn is_pdf(&self) -> bool {
        self.content_type == MIME_PDF
    }

    pub fn is_docx(&self) -> bool {
        matches!(self.content_type.as_str(), MIME_DOCX | MIME_DOC)
    }

    pub fn is_spreadsheet(&self) -> bool {
        matches!(self.content_type.as_str(), MIME_XLSX | MIME_XLS | MIME_CSV)
    }
}

/// One comment or change record on an issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub id: u64,
    pub user: String,
    #[serde(default)]
    pub notes: String,
    pub created_on: DateTime<Utc>,
    #[serde(default)]
    pub details: Vec<serde_json::Value>,
}

impl JournalEntry {
    /// Whether the entry carries a comment worth rendering.
    pub fn has_notes(&self) -> bool {
        !self.notes.trim().is_empty()
    }
}

/// A Redmine issue with its raw Textile description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueMetadata {
    pub id: u64,
    pub project: String,
    pub tracker: String,
    pub status: String,
    pub priority: String,
    pub subject: String,
    #[serde(default)]
    pub description_textile: String,
    pub created_on: DateTime<Utc>,
    pub updated_on: DateTime<Utc>,
    #[serde(default)]
    pub target_version: Option<String>,
    #[serde(default)]
    pub assigned_to: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub done_ratio: u32,
    #[serde(default)]
    pub estimated_hours: Option<f64>,
    #[serde(default)]
    pub spent_hours: f64,
    #[serde(default)]
    pub attachments: Vec<AttachmentInfo>,
    #[serde(default)]
    pub journals: Vec<JournalEntry>,
    #[serde(default)]
    pub custom_fields: IndexMap<String, serde_json::Value>,
    #[serde(default)]
    pub parent_id: Option<u64>,
}

/// A Redmine wiki page with its raw Textile body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WikiPageMetadata {
    pub title: String,
    pub project: String,
    pub version: u32,
    pub created_on: DateTime<Utc>,
    pub updated_on: DateTime<Utc>,
    #[serde(default)]
    pub text_textile: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub comments: String,
    #[serde(default)]
    pub parent_title: Option<String>,
    #[serde(default)]
    pub attachments: Vec<AttachmentInfo>,
}

/// A project as listed by `/projects.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectSummary {
    pub id: u64,
    pub name: String,
    pub identifier: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub parent: Option<NamedRef>,
}

// ═══════════════════════════════════════════════════════════════════════
// Redmine REST payloads
// ═══════════════════════════════════════════════════════════════════════

/// `{"id": 3, "name": "Bug"}` style reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedRef {
    pub id: u64,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiAttachment {
    pub id: u64,
    pub filename: String,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub filesize: u64,
    pub content_url: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiJournal {
    pub id: u64,
    #[serde(default)]
    pub user: Option<NamedRef>,
    #[serde(default)]
    pub notes: Option<String>,
    pub created_on: DateTime<Utc>,
    #[serde(default)]
    pub details: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiCustomField {
    pub name: String,
    #[serde(default)]
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiParent {
    pub id: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiIssue {
    pub id: u64,
    #[serde(default)]
    pub tracker: Option<NamedRef>,
    #[serde(default)]
    pub status: Option<NamedRef>,
    #[serde(default)]
    pub priority: Option<NamedRef>,
    pub subject: String,
    #[serde(default)]
    pub description: Option<String>,
    pub created_on: DateTime<Utc>,
    pub updated_on: DateTime<Utc>,
    #[serde(default)]
    pub fixed_version: Option<NamedRef>,
    #[serde(default)]
    pub assigned_to: Option<NamedRef>,
    #[serde(default)]
    pub author: Option<NamedRef>,
    #[serde(default)]
    pub done_ratio: Option<u32>,
    #[serde(default)]
    pub estimated_hours: Option<f64>,
    #[serde(default)]
    pub spent_hours: Option<f64>,
    #[serde(default)]
    pub attachments: Vec<ApiAttachment>,
    #[serde(default)]
    pub journals: Vec<ApiJournal>,
    #[serde(default)]
    pub custom_fields: Vec<ApiCustomField>,
    #[serde(default)]
    pub parent: Option<ApiParent>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiWikiParent {
    pub title: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiWikiPage {
    pub title: String,
    #[serde(default)]
    pub parent: Option<ApiWikiParent>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default = "default_wiki_version")]
    pub version: u32,
    #[serde(default)]
    pub author: Option<NamedRef>,
    #[serde(default)]
    pub comments: Option<String>,
    pub created_on: DateTime<Utc>,
    pub updated_on: DateTime<Utc>,
    #[serde(default)]
    pub attachments: Vec<ApiAttachment>,
}

fn default_wiki_version() -> u32 {
    1
}

fn ref_name(r: Option<NamedRef>) -> Option<String> {
    r.map(|r| r.name).filter(|n| !n.is_empty())
}

impl From<ApiAttachment> for AttachmentInfo {
    fn from(att: ApiAttachment) -> Self {
        Self {
            id: att.id,
            filename: att.filename,
            content_type: att
                .content_type
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| MIME_OCTET_STREAM.to_string()),
            filesize: att.filesize,
            content_url: att.content_url,
            description: att.description.unwrap_or_default(),
        }
    }
}

impl From<ApiJournal> for JournalEntry {
    fn from(journal: ApiJournal) -> Self {
        Self {
            id: journal.id,
            user: ref_name(journal.user).unwrap_or_else(|| "Unknown".to_string()),
            notes: journal.notes.unwrap_or_default(),
            created_on: journal.created_on,
            details: journal.details,
        }
    }
}

impl IssueMetadata {
    /// Build from an `/issues/<id>.json` payload. Issue payloads carry the
    /// project name but not its identifier, so the caller supplies it.
    pub fn from_api(issue: ApiIssue, project: &str) -> Self {
        Self {
            id: issue.id,
            project: project.to_string(),
            tracker: ref_name(issue.tracker).unwrap_or_else(|| "Unknown".to_string()),
            status: ref_name(issue.status).unwrap_or_else(|| "Unknown".to_string()),
            priority: ref_name(issue.priority).unwrap_or_else(|| "Normal".to_string()),
            subject: issue.subject,
            description_textile: issue.description.unwrap_or_default(),
            created_on: issue.created_on,
            updated_on: issue.updated_on,
            target_version: ref_name(issue.fixed_version),
            assigned_to: ref_name(issue.assigned_to),
            author: ref_name(issue.author),
            done_ratio: issue.done_ratio.unwrap_or(0),
            estimated_hours: issue.estimated_hours,
            spent_hours: issue.spent_hours.unwrap_or(0.0),
            attachments: issue.attachments.into_iter().map(Into::into).collect(),
            journals: issue.journals.into_iter().map(Into::into).collect(),
            custom_fields: issue
                .custom_fields
                .into_iter()
                .map(|cf| (cf.name, cf.value))
                .collect(),
            parent_id: issue.parent.map(|p| p.id),
        }
    }
}

impl WikiPageMetadata {
    pub fn from_api(page: ApiWikiPage, project: &str) -> Self {
        Self {
            title: page.title,
            project: project.to_string(),
            version: page.version,
            created_on: page.created_on,
            updated_on: page.updated_on,
            text_textile: page.text.unwrap_or_default(),
            author: ref_name(page.author),
            comments: page.comments.unwrap_or_default(),
            parent_title: page.parent.map(|p| p.title),
            attachments: page.attachments.into_iter().map(Into::into).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attachment(content_type: &str) -> AttachmentInfo {
        AttachmentInfo {
            id: 1,
            filename: "file".to_string(),
            content_type: content_type.to_string(),
            filesize: 10,
            content_url: "https://redmine.example.com/attachments/download/1/file".to_string(),
            description: String::new(),
        }
    }

    #[test]
    fn test_capability_flags_follow_content_type() {
        assert!(attachment("image/png").is_image());
        assert!(attachment("application/pdf").is_pdf());
        assert!(attachment(MIME_DOCX).is_docx());
        assert!(attachment("application/msword").is_docx());
        assert!(attachment("text/csv").is_spreadsheet());
        assert!(attachment(MIME_XLSX).is_spreadsheet());
        assert!(!attachment("text/plain").is_image());
        assert!(!attachment("image/png").is_pdf());
    }

    #[test]
    fn test_successful_requires_text_and_no_error() {
        let ok = ExtractedContent::new("hello", IndexMap::new(), ProcessingMethod::Ocr);
        assert!(ok.is_successful());

        let blank = ExtractedContent::new("   \n", IndexMap::new(), ProcessingMethod::Ocr);
        assert!(!blank.is_successful());

        let failed = ExtractedContent::failure("boom");
        assert!(!failed.is_successful());
        assert_eq!(failed.processing_method, ProcessingMethod::Fallback);
        assert!(failed.text.is_empty());
    }

    #[test]
    fn test_processing_method_serializes_snake_case() {
        let json = serde_json::to_string(&ProcessingMethod::TextExtract).unwrap();
        assert_eq!(json, "\"text_extract\"");
    }

    #[test]
    fn test_method_labels_are_distinct() {
        let labels = [
            ProcessingMethod::Ocr.label(),
            ProcessingMethod::TextExtract.label(),
            ProcessingMethod::Llm.label(),
            ProcessingMethod::Fallback.label(),
        ];
        for (i, a) in labels.iter().enumerate() {
            for b in &labels[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_issue_from_api_payload() {
        let json = r#"{
            "id": 42,
            "project": {"id": 1, "name": "Demo"},
            "tracker": {"id": 1, "name": "Bug"},
            "status": {"id": 2, "name": "In Progress"},
            "priority": {"id": 3, "name": "High"},
            "author": {"id": 5, "name": "Alice"},
            "fixed_version": {"id": 9, "name": "v1.0"},
            "parent": {"id": 7},
            "subject": "Crash on save",
            "description": null,
            "done_ratio": 30,
            "spent_hours": 2.5,
            "custom_fields": [{"id": 1, "name": "Severity", "value": "Major"}],
            "created_on": "2024-01-15T10:30:00Z",
            "updated_on": "2024-01-16T08:00:00Z",
            "attachments": [{
                "id": 11, "filename": "log.txt", "filesize": 120,
                "content_type": "", "description": null,
                "content_url": "https://redmine.example.com/attachments/download/11/log.txt"
            }],
            "journals": [
                {"id": 1, "user": {"id": 5, "name": "Alice"}, "notes": "Looking", "created_on": "2024-01-15T11:00:00Z", "details": []},
                {"id": 2, "notes": null, "created_on": "2024-01-15T12:00:00Z", "details": [{"property": "attr"}]}
            ]
        }"#;
        let api: ApiIssue = serde_json::from_str(json).unwrap();
        let issue = IssueMetadata::from_api(api, "demo");

        assert_eq!(issue.project, "demo");
        assert_eq!(issue.status, "In Progress");
        assert_eq!(issue.target_version.as_deref(), Some("v1.0"));
        assert_eq!(issue.assigned_to, None);
        assert_eq!(issue.description_textile, "");
        assert_eq!(issue.done_ratio, 30);
        assert_eq!(issue.estimated_hours, None);
        assert_eq!(issue.parent_id, Some(7));
        assert_eq!(issue.custom_fields["Severity"], "Major");
        assert_eq!(issue.attachments[0].content_type, MIME_OCTET_STREAM);
        assert_eq!(issue.journals[1].user, "Unknown");
        assert!(!issue.journals[1].has_notes());
    }

    #[test]
    fn test_wiki_page_from_api_payload() {
        let json = r#"{
            "title": "Install_Guide",
            "parent": {"title": "Wiki"},
            "text": "h1. Install",
            "version": 4,
            "author": {"id": 1, "name": "Bob"},
            "comments": "",
            "created_on": "2024-02-01T09:00:00Z",
            "updated_on": "2024-02-03T09:00:00Z"
        }"#;
        let api: ApiWikiPage = serde_json::from_str(json).unwrap();
        let page = WikiPageMetadata::from_api(api, "demo");
        assert_eq!(page.version, 4);
        assert_eq!(page.parent_title.as_deref(), Some("Wiki"));
        assert_eq!(page.author.as_deref(), Some("Bob"));
        assert!(page.attachments.is_empty());
    }
}
