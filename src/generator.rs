//! Markdown document assembly for issues and wiki pages.
//!
//! A document is YAML front matter followed by the converted body, one
//! section per attachment (with any extracted text), and for issues the
//! discussion taken from journal notes.
//!
//! ```text
//! <output>/<project>/issues/00042.md
//! <output>/<project>/wiki/<sanitized title>.md
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;

use crate::converter::TextileConverter;
use crate::models::{AttachmentInfo, ExtractedContent, IssueMetadata, JournalEntry, WikiPageMetadata};

/// Characters of extracted text shown per attachment.
pub const MAX_EXTRACTED_CHARS: usize = 2000;

const TRUNCATED_NOTICE: &str = "... (content truncated)";

#[derive(Serialize)]
struct IssueFrontMatter<'a> {
    id: u64,
    project: &'a str,
    tracker: &'a str,
    status: &'a str,
    priority: &'a str,
    subject: &'a str,
    created_on: String,
    updated_on: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    target_version: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    assigned_to: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    author: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    done_ratio: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    estimated_hours: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    spent_hours: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent_id: Option<u64>,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    custom_fields: &'a IndexMap<String, serde_json::Value>,
}

#[derive(Serialize)]
struct WikiFrontMatter<'a> {
    title: &'a str,
    project: &'a str,
    version: u32,
    created_on: String,
    updated_on: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    author: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent: Option<&'a str>,
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

fn positive(value: f64) -> Option<f64> {
    (value > 0.0).then_some(value)
}

pub fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M").to_string()
}

fn front_matter<T: Serialize>(data: &T) -> Result<String> {
    let yaml = serde_yaml::to_string(data).context("Failed to render front matter")?;
    Ok(format!("---\n{}---\n", yaml))
}

/// Replace characters that are unsafe in file names with `_`.
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            other => other,
        })
        .collect()
}

/// First `max` characters of `text`, and whether anything was cut.
fn truncate_chars(text: &str, max: usize) -> (&str, bool) {
    match text.char_indices().nth(max) {
        Some((cut, _)) => (&text[..cut], true),
        None => (text, false),
    }
}

fn assemble(front_matter: String, sections: &[String]) -> String {
    let content = format!("{}\n{}", front_matter, sections.join("\n"));
    format!("{}\n", content.trim())
}

pub struct MarkdownGenerator {
    output_dir: PathBuf,
    attachment_path_prefix: String,
    converter: TextileConverter,
}

impl MarkdownGenerator {
    pub fn new(output_dir: impl Into<PathBuf>, attachment_path_prefix: &str) -> Self {
        Self {
            output_dir: output_dir.into(),
            attachment_path_prefix: attachment_path_prefix.to_string(),
            converter: TextileConverter::new(attachment_path_prefix),
        }
    }

    pub fn issue_path(&self, issue: &IssueMetadata) -> PathBuf {
        self.output_dir
            .join(&issue.project)
            .join("issues")
            .join(format!("{:05}.md", issue.id))
    }

    pub fn wiki_path(&self, page: &WikiPageMetadata) -> PathBuf {
        self.output_dir
            .join(&page.project)
            .join("wiki")
            .join(format!("{}.md", sanitize_filename(&page.title)))
    }

    pub fn generate_issue_markdown(
        &self,
        issue: &IssueMetadata,
        extracted: &HashMap<u64, ExtractedContent>,
    ) -> Result<String> {
        let front = front_matter(&IssueFrontMatter {
            id: issue.id,
            project: &issue.project,
            tracker: &issue.tracker,
            status: &issue.status,
            priority: &issue.priority,
            subject: &issue.subject,
            created_on: format_datetime(&issue.created_on),
            updated_on: format_datetime(&issue.updated_on),
            target_version: present(&issue.target_version),
            assigned_to: present(&issue.assigned_to),
            author: present(&issue.author),
            done_ratio: (issue.done_ratio > 0).then_some(issue.done_ratio),
            estimated_hours: issue.estimated_hours.and_then(positive),
            spent_hours: positive(issue.spent_hours),
            parent_id: issue.parent_id,
            custom_fields: &issue.custom_fields,
        })?;

        let mut sections = vec![format!("# Issue #{}: {}\n", issue.id, issue.subject)];

        if !issue.description_textile.trim().is_empty() {
            sections.push("## Description\n".to_string());
            sections.push(format!(
                "{}\n",
                self.converter.convert(&issue.description_textile)
            ));
        }

        if !issue.attachments.is_empty() {
            sections.push("## Attachments\n".to_string());
            for attachment in &issue.attachments {
                sections.push(self.attachment_section(attachment, extracted.get(&attachment.id)));
            }
        }

        if let Some(discussion) = self.journals_section(&issue.journals) {
            sections.push(discussion);
        }

        Ok(assemble(front, &sections))
    }

    pub fn generate_wiki_markdown(
        &self,
        page: &WikiPageMetadata,
        extracted: &HashMap<u64, ExtractedContent>,
    ) -> Result<String> {
        let front = front_matter(&WikiFrontMatter {
            title: &page.title,
            project: &page.project,
            version: page.version,
            created_on: format_datetime(&page.created_on),
            updated_on: format_datetime(&page.updated_on),
            author: present(&page.author),
            parent: present(&page.parent_title),
        })?;

        let mut sections = vec![format!("# {}\n", page.title)];

        if !page.text_textile.trim().is_empty() {
            sections.push(format!("{}\n", self.converter.convert(&page.text_textile)));
        }

        if !page.attachments.is_empty() {
            sections.push("## Attachments\n".to_string());
            for attachment in &page.attachments {
                sections.push(self.attachment_section(attachment, extracted.get(&attachment.id)));
            }
        }

        Ok(assemble(front, &sections))
    }

    fn attachment_section(
        &self,
        attachment: &AttachmentInfo,
        extracted: Option<&ExtractedContent>,
    ) -> String {
        let mut lines = vec![format!("### {}\n", attachment.filename)];

        if attachment.is_image() {
            lines.push(format!(
                "![{}]({}/{})\n",
                attachment.filename, self.attachment_path_prefix, attachment.filename
            ));
        }

        lines.push(format!(
            "*File size: {:.1} KB, type: {}*\n",
            attachment.filesize as f64 / 1024.0,
            attachment.content_type
        ));

        if !attachment.description.trim().is_empty() {
            lines.push(format!("*Description: {}*\n", attachment.description));
        }

        if let Some(content) = extracted {
            if let Some(error) = &content.error {
                lines.push(format!("> ⚠️ Processing failed: {}\n", error));
            } else if !content.text.trim().is_empty() {
                let (shown, truncated) = truncate_chars(&content.text, MAX_EXTRACTED_CHARS);
                lines.push(format!(
                    "**Extracted content ({}):**\n",
                    content.processing_method.label()
                ));
                lines.push(format!("```\n{}", shown));
                if truncated {
                    lines.push(format!("\n{}", TRUNCATED_NOTICE));
                }
                lines.push("\n```\n".to_string());
            }
        }

        lines.join("\n")
    }

    fn journals_section(&self, journals: &[JournalEntry]) -> Option<String> {
        let mut lines = Vec::new();
        for journal in journals.iter().filter(|j| j.has_notes()) {
            lines.push(format!(
                "### {} - {}\n",
                format_datetime(&journal.created_on),
                journal.user
            ));
            lines.push(format!("{}\n", self.converter.convert(&journal.notes)));
        }
        if lines.is_empty() {
            return None;
        }
        lines.insert(0, "## Discussion\n".to_string());
        Some(lines.join("\n"))
    }

    pub fn save_issue(
        &self,
        issue: &IssueMetadata,
        extracted: &HashMap<u64, ExtractedContent>,
    ) -> Result<PathBuf> {
        let content = self.generate_issue_markdown(issue, extracted)?;
        let path = self.issue_path(issue);
        write_document(&path, &content)?;
        Ok(path)
    }

    pub fn save_wiki_page(
        &self,
        page: &WikiPageMetadata,
        extracted: &HashMap<u64, ExtractedContent>,
    ) -> Result<PathBuf> {
        let content = self.generate_wiki_markdown(page, extracted)?;
        let path = self.wiki_path(page);
        write_document(&path, &content)?;
        Ok(path)
    }
}

fn write_document(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write document: {}", path.display()))
}
