//! Blocking client for the Redmine REST API.
//!
//! Authenticates with the `X-Redmine-API-Key` header, never follows
//! redirects, and maps HTTP failures onto [`ClientError`]. Error messages and
//! the `Debug` representation never include the API key.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use reqwest::blocking::{Client, Response};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, RETRY_AFTER};
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::config::RedmineConfig;
use crate::logging::mask_api_key;
use crate::models::{ApiIssue, ApiWikiPage, IssueMetadata, ProjectSummary, WikiPageMetadata};

const PAGE_LIMIT: usize = 100;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Authentication failed. Please verify your credentials.")]
    Authentication,
    #[error("{resource} {id} was not found")]
    NotFound { resource: String, id: String },
    #[error("Rate limit exceeded{}", .retry_after.map(|s| format!(", retry after {} seconds", s)).unwrap_or_default())]
    RateLimited { retry_after: Option<u64> },
    #[error("Cannot connect to Redmine server: {0}")]
    Connection(String),
    #[error("Redmine returned HTTP {0}")]
    Status(u16),
    #[error("Unexpected response from Redmine: {0}")]
    Decode(String),
    #[error("Invalid client configuration: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Map a non-success status onto an error. `None` for 2xx.
fn classify_status(
    code: u16,
    retry_after: Option<&str>,
    resource: &str,
    id: &str,
) -> Option<ClientError> {
    match code {
        200..=299 => None,
        401 => Some(ClientError::Authentication),
        404 => Some(ClientError::NotFound {
            resource: resource.to_string(),
            id: id.to_string(),
        }),
        429 => Some(ClientError::RateLimited {
            retry_after: retry_after.and_then(|v| v.trim().parse().ok()),
        }),
        other => Some(ClientError::Status(other)),
    }
}

fn check_status(response: Response, resource: &str, id: &str) -> Result<Response, ClientError> {
    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok());
    match classify_status(response.status().as_u16(), retry_after, resource, id) {
        Some(err) => Err(err),
        None => Ok(response),
    }
}

#[derive(Deserialize)]
struct ProjectPage {
    projects: Vec<ProjectSummary>,
    #[serde(default)]
    total_count: usize,
}

#[derive(Deserialize)]
struct IssueRef {
    id: u64,
}

#[derive(Deserialize)]
struct IssuePage {
    issues: Vec<IssueRef>,
    #[serde(default)]
    total_count: usize,
}

#[derive(Deserialize)]
struct IssueEnvelope {
    issue: ApiIssue,
}

#[derive(Deserialize)]
struct WikiIndexEntry {
    title: String,
}

#[derive(Deserialize)]
struct WikiIndex {
    wiki_pages: Vec<WikiIndexEntry>,
}

#[derive(Deserialize)]
struct WikiEnvelope {
    wiki_page: ApiWikiPage,
}

pub struct RedmineClient {
    base_url: Url,
    api_key: String,
    http: Client,
}

impl fmt::Debug for RedmineClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedmineClient")
            .field("base_url", &self.base_url.as_str())
            .field("api_key", &mask_api_key(&self.api_key))
            .finish()
    }
}

impl RedmineClient {
    pub fn new(config: &RedmineConfig) -> Result<Self, ClientError> {
        let base_url = Url::parse(&config.url)
            .map_err(|e| ClientError::InvalidConfig(format!("redmine.url: {}", e)))?;

        let mut key = HeaderValue::from_str(&config.api_key)
            .map_err(|_| ClientError::InvalidConfig("api key is not a valid header value".into()))?;
        key.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert("X-Redmine-API-Key", key);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let http = Client::builder()
            .default_headers(headers)
            .user_agent(concat!("redmine-knowledge-agent/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_secs))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| ClientError::InvalidConfig(e.to_string()))?;

        Ok(Self {
            base_url,
            api_key: config.api_key.clone(),
            http,
        })
    }

    /// `base_url` with `segments` appended, each percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, ClientError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ClientError::InvalidConfig("redmine.url cannot be a base".into()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
        query: &[(&str, String)],
        resource: &str,
        id: &str,
    ) -> Result<T, ClientError> {
        debug!(resource, id, "GET {}", url.path());
        let response = self
            .http
            .get(url)
            .query(query)
            .send()
            .map_err(|e| ClientError::Connection(e.without_url().to_string()))?;
        check_status(response, resource, id)?
            .json::<T>()
            .map_err(|e| ClientError::Decode(e.without_url().to_string()))
    }

    pub fn list_projects(&self) -> Result<Vec<ProjectSummary>, ClientError> {
        let url = self.endpoint(&["projects.json"])?;
        let mut projects = Vec::new();
        loop {
            let query = [
                ("offset", projects.len().to_string()),
                ("limit", PAGE_LIMIT.to_string()),
            ];
            let page: ProjectPage = self.get_json(url.clone(), &query, "Projects", "list")?;
            let received = page.projects.len();
            projects.extend(page.projects);
            if received == 0 || projects.len() >= page.total_count {
                break;
            }
        }
        Ok(projects)
    }

    /// Ids of every issue in `project`, open or closed, ascending.
    pub fn issue_ids(
        &self,
        project: &str,
        include_subprojects: bool,
    ) -> Result<Vec<u64>, ClientError> {
        let url = self.endpoint(&["issues.json"])?;
        let mut ids = Vec::new();
        loop {
            let mut query = vec![
                ("project_id", project.to_string()),
                ("status_id", "*".to_string()),
                ("sort", "id".to_string()),
                ("offset", ids.len().to_string()),
                ("limit", PAGE_LIMIT.to_string()),
            ];
            if !include_subprojects {
                query.push(("subproject_id", "!*".to_string()));
            }
            let page: IssuePage = self.get_json(url.clone(), &query, "Project", project)?;
            let received = page.issues.len();
            ids.extend(page.issues.into_iter().map(|i| i.id));
            if received == 0 || ids.len() >= page.total_count {
                break;
            }
        }
        Ok(ids)
    }

    pub fn issue(&self, id: u64, project: &str) -> Result<IssueMetadata, ClientError> {
        let url = self.endpoint(&["issues", &format!("{}.json", id)])?;
        let query = [("include", "attachments,journals".to_string())];
        let envelope: IssueEnvelope = self.get_json(url, &query, "Issue", &id.to_string())?;
        Ok(IssueMetadata::from_api(envelope.issue, project))
    }

    /// Titles from the wiki index. A project without an enabled wiki has none.
    pub fn wiki_titles(&self, project: &str) -> Result<Vec<String>, ClientError> {
        let url = self.endpoint(&["projects", project, "wiki", "index.json"])?;
        match self.get_json::<WikiIndex>(url, &[], "Wiki", project) {
            Ok(index) => Ok(index.wiki_pages.into_iter().map(|p| p.title).collect()),
            Err(ClientError::NotFound { .. }) => {
                debug!(project, "project has no wiki");
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    pub fn wiki_page(&self, project: &str, title: &str) -> Result<WikiPageMetadata, ClientError> {
        let page_file = format!("{}.json", title);
        let url = self.endpoint(&["projects", project, "wiki", &page_file])?;
        let query = [("include", "attachments".to_string())];
        let envelope: WikiEnvelope = self.get_json(url, &query, "Wiki page", title)?;
        Ok(WikiPageMetadata::from_api(envelope.wiki_page, project))
    }

    /// Stream an attachment to `dest`. The file only appears once complete.
    pub fn download_attachment(&self, content_url: &str, dest: &Path) -> Result<u64, ClientError> {
        let url = Url::parse(content_url).map_err(|e| ClientError::Decode(e.to_string()))?;
        let name = dest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut response = self
            .http
            .get(url)
            .send()
            .map_err(|e| ClientError::Connection(e.without_url().to_string()))?;
        response = check_status(response, "Attachment", &name)?;

        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let partial = dest.with_file_name(format!("{}.part", name));
        let written = {
            let mut file = std::fs::File::create(&partial)?;
            response
                .copy_to(&mut file)
                .map_err(|e| ClientError::Connection(e.without_url().to_string()))?
        };
        std::fs::rename(&partial, dest)?;
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(url: &str) -> RedmineConfig {
        RedmineConfig {
            url: url.to_string(),
            api_key: "abcdef0123456789".to_string(),
            timeout_secs: 5,
        }
    }

    #[test]
    fn test_status_mapping() {
        assert!(classify_status(200, None, "Issue", "1").is_none());
        assert!(matches!(
            classify_status(401, None, "Issue", "1"),
            Some(ClientError::Authentication)
        ));
        match classify_status(404, None, "Issue", "7") {
            Some(ClientError::NotFound { resource, id }) => {
                assert_eq!(resource, "Issue");
                assert_eq!(id, "7");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            classify_status(429, Some(" 30 "), "Issue", "1"),
            Some(ClientError::RateLimited {
                retry_after: Some(30)
            })
        ));
        assert!(matches!(
            classify_status(429, Some("soon"), "Issue", "1"),
            Some(ClientError::RateLimited { retry_after: None })
        ));
        assert!(matches!(
            classify_status(503, None, "Issue", "1"),
            Some(ClientError::Status(503))
        ));
    }

    #[test]
    fn test_error_messages() {
        let err = ClientError::RateLimited {
            retry_after: Some(12),
        };
        assert_eq!(err.to_string(), "Rate limit exceeded, retry after 12 seconds");
        let err = ClientError::RateLimited { retry_after: None };
        assert_eq!(err.to_string(), "Rate limit exceeded");
        let err = ClientError::NotFound {
            resource: "Issue".into(),
            id: "3".into(),
        };
        assert_eq!(err.to_string(), "Issue 3 was not found");
    }

    #[test]
    fn test_endpoint_encodes_segments() {
        let client = RedmineClient::new(&config("https://redmine.example.com/tracker")).unwrap();
        let url = client
            .endpoint(&["projects", "demo", "wiki", "Setup Guide?.json"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://redmine.example.com/tracker/projects/demo/wiki/Setup%20Guide%3F.json"
        );

        let root = RedmineClient::new(&config("https://redmine.example.com")).unwrap();
        assert_eq!(
            root.endpoint(&["issues.json"]).unwrap().as_str(),
            "https://redmine.example.com/issues.json"
        );
    }

    #[test]
    fn test_debug_masks_api_key() {
        let client = RedmineClient::new(&config("https://redmine.example.com")).unwrap();
        let debug = format!("{:?}", client);
        assert!(debug.contains("ab***89"));
        assert!(!debug.contains("abcdef0123456789"));
    }

    #[test]
    fn test_invalid_api_key_header_rejected() {
        let mut cfg = config("https://redmine.example.com");
        cfg.api_key = "bad\nkey".to_string();
        assert!(matches!(
            RedmineClient::new(&cfg),
            Err(ClientError::InvalidConfig(_))
        ));
    }
}
