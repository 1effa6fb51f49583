//! Fetch pipeline orchestration.
//!
//! Coordinates the full mirror flow for every configured output:
//! project → issues / wiki pages → attachment download → extraction →
//! Markdown assembly. Failures are contained at the smallest unit that
//! failed (attachment, issue, page, project) and logged; only an
//! authentication failure stops the run.
//!
//! ```text
//! <output>/<project>/issues/00042.md
//! <output>/<project>/issues/attachments/00042/<file>
//! <output>/<project>/wiki/<title>.md
//! <output>/<project>/wiki/attachments/<file>
//! ```
//!
//! The `attachments` directory follows the configured attachment path
//! prefix, so image links in the generated documents resolve locally.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::client::{ClientError, RedmineClient};
use crate::config::{Config, OutputConfig};
use crate::factory::ProcessorFactory;
use crate::generator::{sanitize_filename, MarkdownGenerator};
use crate::models::{AttachmentInfo, ExtractedContent, IssueMetadata, WikiPageMetadata};

/// Read access to a Redmine server, as the pipeline needs it.
pub trait RedmineSource {
    fn issue_ids(&self, project: &str, include_subprojects: bool) -> Result<Vec<u64>, ClientError>;
    fn issue(&self, id: u64, project: &str) -> Result<IssueMetadata, ClientError>;
    fn wiki_titles(&self, project: &str) -> Result<Vec<String>, ClientError>;
    fn wiki_page(&self, project: &str, title: &str) -> Result<WikiPageMetadata, ClientError>;
    fn download_attachment(&self, content_url: &str, dest: &Path) -> Result<u64, ClientError>;
}

impl RedmineSource for RedmineClient {
    fn issue_ids(&self, project: &str, include_subprojects: bool) -> Result<Vec<u64>, ClientError> {
        RedmineClient::issue_ids(self, project, include_subprojects)
    }

    fn issue(&self, id: u64, project: &str) -> Result<IssueMetadata, ClientError> {
        RedmineClient::issue(self, id, project)
    }

    fn wiki_titles(&self, project: &str) -> Result<Vec<String>, ClientError> {
        RedmineClient::wiki_titles(self, project)
    }

    fn wiki_page(&self, project: &str, title: &str) -> Result<WikiPageMetadata, ClientError> {
        RedmineClient::wiki_page(self, project, title)
    }

    fn download_attachment(&self, content_url: &str, dest: &Path) -> Result<u64, ClientError> {
        RedmineClient::download_attachment(self, content_url, dest)
    }
}

#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// Restrict the run to these projects. Empty means every configured project.
    pub projects: Vec<String>,
    pub skip_attachments: bool,
    pub skip_wiki: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchSummary {
    pub issues: usize,
    pub wiki_pages: usize,
    pub attachments_downloaded: usize,
    pub attachments_reused: usize,
    pub extraction_errors: usize,
    pub failures: usize,
}

/// Entry point for `redmine-ka fetch`.
pub fn run_fetch(config: &Config, options: &FetchOptions) -> Result<FetchSummary> {
    let client = RedmineClient::new(&config.redmine)?;
    debug!(?client, "client ready");
    let factory = ProcessorFactory::new(&config.processing);
    let summary = fetch_with(&client, &factory, config, options)?;

    println!("fetch");
    println!("  issues written: {}", summary.issues);
    println!("  wiki pages written: {}", summary.wiki_pages);
    println!("  attachments downloaded: {}", summary.attachments_downloaded);
    println!("  attachments reused: {}", summary.attachments_reused);
    println!("  extraction errors: {}", summary.extraction_errors);
    println!("  failures: {}", summary.failures);
    println!("ok");
    Ok(summary)
}

/// Run the pipeline against any [`RedmineSource`].
pub fn fetch_with(
    source: &dyn RedmineSource,
    factory: &ProcessorFactory,
    config: &Config,
    options: &FetchOptions,
) -> Result<FetchSummary> {
    for requested in &options.projects {
        if !config.all_projects().contains(requested) {
            warn!(project = %requested, "project is not configured in any output; skipping");
        }
    }

    let fetcher = Fetcher {
        source,
        factory,
        prefix: config.processing.attachment_path_prefix.trim_end_matches('/'),
        options,
    };
    let mut summary = FetchSummary::default();

    for output in &config.outputs {
        for project in selected_projects(output, options) {
            info!(project = %project, output = %output.path.display(), "fetching project");
            fetcher.fetch_issues(output, project, &mut summary)?;
            if !options.skip_wiki {
                fetcher.fetch_wiki(output, project, &mut summary)?;
            }
        }
    }
    Ok(summary)
}

fn selected_projects<'a>(output: &'a OutputConfig, options: &FetchOptions) -> Vec<&'a str> {
    output
        .projects
        .iter()
        .filter(|p| options.projects.is_empty() || options.projects.contains(p))
        .map(String::as_str)
        .collect()
}

/// Count the failure, or abort the run when credentials are rejected.
fn contain(err: ClientError, summary: &mut FetchSummary) -> Result<()> {
    if matches!(err, ClientError::Authentication) {
        return Err(err.into());
    }
    summary.failures += 1;
    Ok(())
}

struct Fetcher<'a> {
    source: &'a dyn RedmineSource,
    factory: &'a ProcessorFactory,
    prefix: &'a str,
    options: &'a FetchOptions,
}

impl Fetcher<'_> {
    fn fetch_issues(
        &self,
        output: &OutputConfig,
        project: &str,
        summary: &mut FetchSummary,
    ) -> Result<()> {
        let ids = match self.source.issue_ids(project, output.include_subprojects) {
            Ok(ids) => ids,
            Err(e) => {
                warn!(project, error = %e, "failed to list issues");
                return contain(e, summary);
            }
        };
        info!(project, count = ids.len(), "issues found");

        let issues_dir = output.path.join(project).join("issues");
        for id in ids {
            let issue = match self.source.issue(id, project) {
                Ok(issue) => issue,
                Err(e) => {
                    warn!(project, issue_id = id, error = %e, "failed to fetch issue");
                    contain(e, summary)?;
                    continue;
                }
            };

            // Each issue keeps its attachments in its own directory.
            let scoped_prefix = format!("{}/{:05}", self.prefix, issue.id);
            let extracted = self.collect_attachments(
                &issue.attachments,
                &issues_dir.join(&scoped_prefix),
                summary,
            )?;
            let generator = MarkdownGenerator::new(&output.path, &scoped_prefix);
            match generator.save_issue(&issue, &extracted) {
                Ok(path) => {
                    debug!(issue_id = issue.id, path = %path.display(), "issue written");
                    summary.issues += 1;
                }
                Err(e) => {
                    let error = format!("{:#}", e);
                    warn!(issue_id = issue.id, error = %error, "failed to write issue");
                    summary.failures += 1;
                }
            }
        }
        Ok(())
    }

    fn fetch_wiki(
        &self,
        output: &OutputConfig,
        project: &str,
        summary: &mut FetchSummary,
    ) -> Result<()> {
        let titles = match self.source.wiki_titles(project) {
            Ok(titles) => titles,
            Err(e) => {
                warn!(project, error = %e, "failed to list wiki pages");
                return contain(e, summary);
            }
        };
        info!(project, count = titles.len(), "wiki pages found");

        let wiki_dir = output.path.join(project).join("wiki");
        let generator = MarkdownGenerator::new(&output.path, self.prefix);
        for title in titles {
            let page = match self.source.wiki_page(project, &title) {
                Ok(page) => page,
                Err(e) => {
                    warn!(project, title = %title, error = %e, "failed to fetch wiki page");
                    contain(e, summary)?;
                    continue;
                }
            };

            let extracted =
                self.collect_attachments(&page.attachments, &wiki_dir.join(self.prefix), summary)?;
            match generator.save_wiki_page(&page, &extracted) {
                Ok(path) => {
                    debug!(title = %page.title, path = %path.display(), "wiki page written");
                    summary.wiki_pages += 1;
                }
                Err(e) => {
                    let error = format!("{:#}", e);
                    warn!(title = %page.title, error = %error, "failed to write wiki page");
                    summary.failures += 1;
                }
            }
        }
        Ok(())
    }

    /// Download (unless already present) and extract each attachment. An
    /// attachment that cannot be downloaded is left out of the map.
    fn collect_attachments(
        &self,
        attachments: &[AttachmentInfo],
        dir: &Path,
        summary: &mut FetchSummary,
    ) -> Result<HashMap<u64, ExtractedContent>> {
        let mut extracted = HashMap::new();
        if self.options.skip_attachments {
            return Ok(extracted);
        }

        for attachment in attachments {
            let dest: PathBuf = dir.join(sanitize_filename(&attachment.filename));
            if dest.exists() {
                debug!(filename = %attachment.filename, "attachment already downloaded");
                summary.attachments_reused += 1;
            } else {
                match self.source.download_attachment(&attachment.content_url, &dest) {
                    Ok(bytes) => {
                        debug!(filename = %attachment.filename, bytes, "attachment downloaded");
                        summary.attachments_downloaded += 1;
                    }
                    Err(e) => {
                        warn!(
                            attachment_id = attachment.id,
                            filename = %attachment.filename,
                            error = %e,
                            "failed to download attachment"
                        );
                        contain(e, summary)?;
                        continue;
                    }
                }
            }

            let content = self
                .factory
                .process_file(&dest, Some(&attachment.content_type));
            if let Some(error) = &content.error {
                warn!(filename = %attachment.filename, error = %error, "extraction failed");
                summary.extraction_errors += 1;
            }
            extracted.insert(attachment.id, content);
        }
        Ok(extracted)
    }
}
