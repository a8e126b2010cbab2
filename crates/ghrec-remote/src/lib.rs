//! Remote collaborator contracts + a GitHub REST client implementing them.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use ghrec_core::{LanguageSizes, RemoteRepository};
use reqwest::header::{ACCEPT, LINK};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info_span, Instrument};
use url::Url;

pub const CRATE_NAME: &str = "ghrec-remote";

/// Message GitHub attaches to a 409 when a repository has no commits yet.
const EMPTY_REPOSITORY_MESSAGE: &str = "Git Repository is empty";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("not found: {resource}")]
    NotFound { resource: String },
    #[error("repository has no commit history")]
    EmptyRepository,
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("request failed: {0}")]
    Request(String),
    #[error("decoding response: {0}")]
    Decode(String),
}

/// A single file as returned by the contents endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteContent {
    pub path: String,
    #[serde(default)]
    pub encoding: Option<String>,
    /// Transport-encoded body, base64 unless `encoding` says otherwise.
    #[serde(default)]
    pub content: String,
}

/// Lazily evaluated total of a paginated collection (commits, contributors).
#[async_trait]
pub trait TotalCount: Send + Sync {
    async fn total_count(&self) -> Result<u64, RemoteError>;
}

/// Fetches single files from a remote repository.
#[async_trait]
pub trait ContentAccessor: Send + Sync {
    /// Returns `RemoteError::NotFound` when the file does not exist.
    async fn get_contents(&self, path: &str) -> Result<RemoteContent, RemoteError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
}

/// Maps a non-success response onto the error kinds callers recover from.
pub fn classify_failure(status: StatusCode, url: &str, body: &[u8]) -> RemoteError {
    if status == StatusCode::NOT_FOUND {
        return RemoteError::NotFound {
            resource: url.to_string(),
        };
    }
    let message = serde_json::from_slice::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.message)
        .unwrap_or_default();
    if status == StatusCode::CONFLICT && message.contains(EMPTY_REPOSITORY_MESSAGE) {
        return RemoteError::EmptyRepository;
    }
    RemoteError::HttpStatus {
        status: status.as_u16(),
        url: url.to_string(),
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct GithubClientConfig {
    pub api_url: String,
    pub token: Option<String>,
    pub user_agent: String,
    pub timeout: Duration,
    pub backoff: BackoffPolicy,
}

impl Default for GithubClientConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.github.com".to_string(),
            token: None,
            user_agent: "ghrec/0.1".to_string(),
            timeout: Duration::from_secs(20),
            backoff: BackoffPolicy::default(),
        }
    }
}

impl GithubClientConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            api_url: std::env::var("GITHUB_API_URL").unwrap_or(defaults.api_url),
            token: std::env::var("GITHUB_TOKEN").ok().filter(|t| !t.trim().is_empty()),
            user_agent: std::env::var("GHREC_USER_AGENT").unwrap_or(defaults.user_agent),
            timeout: std::env::var("GHREC_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            backoff: defaults.backoff,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub link: Option<String>,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct GithubClient {
    client: reqwest::Client,
    api_url: String,
    token: Option<String>,
    backoff: BackoffPolicy,
}

impl GithubClient {
    pub fn new(config: GithubClientConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .context("building reqwest client")?;

        Ok(Self {
            client,
            api_url: config.api_url,
            token: config.token,
            backoff: config.backoff,
        })
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.api_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    pub async fn fetch(&self, path: &str) -> Result<FetchedResponse, RemoteError> {
        let url = self.endpoint(path);
        let span = info_span!("github_fetch", url = %url);
        self.fetch_with_retries(&url).instrument(span).await
    }

    async fn fetch_with_retries(&self, url: &str) -> Result<FetchedResponse, RemoteError> {
        let mut attempt = 0;
        loop {
            let mut request = self
                .client
                .get(url)
                .header(ACCEPT, "application/vnd.github+json");
            if let Some(token) = &self.token {
                request = request.bearer_auth(token);
            }

            match request.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    let final_url = resp.url().to_string();
                    let link = resp
                        .headers()
                        .get(LINK)
                        .and_then(|v| v.to_str().ok())
                        .map(ToString::to_string);
                    let body = resp
                        .bytes()
                        .await
                        .map_err(|e| RemoteError::Request(e.to_string()))?
                        .to_vec();

                    if status.is_success() {
                        return Ok(FetchedResponse {
                            status,
                            final_url,
                            link,
                            body,
                        });
                    }

                    if classify_status(status) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        debug!(%status, attempt, "retrying github request");
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        attempt += 1;
                        continue;
                    }

                    return Err(classify_failure(status, &final_url, &body));
                }
                Err(err) => {
                    if classify_reqwest_error(&err) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        debug!(error = %err, attempt, "retrying github request");
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(RemoteError::Request(err.to_string()));
                }
            }
        }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, RemoteError> {
        let resp = self.fetch(path).await?;
        serde_json::from_slice(&resp.body)
            .map_err(|e| RemoteError::Decode(format!("{}: {e}", resp.final_url)))
    }

    pub async fn repository(&self, owner: &str, name: &str) -> Result<RemoteRepository, RemoteError> {
        self.get_json(&format!("repos/{owner}/{name}")).await
    }

    pub async fn languages(&self, owner: &str, name: &str) -> Result<LanguageSizes, RemoteError> {
        self.get_json(&format!("repos/{owner}/{name}/languages")).await
    }

    /// Counts a paginated collection by requesting one item per page.
    pub async fn total_count(&self, path: &str) -> Result<u64, RemoteError> {
        let resp = self.fetch(path).await?;
        count_from_page(&resp)
    }

    pub fn repo(&self, owner: &str, name: &str) -> GithubRepository<'_> {
        GithubRepository {
            client: self,
            owner: owner.to_string(),
            name: name.to_string(),
        }
    }
}

/// Total of a `per_page=1` listing: the last page number when paginated, else the items on the page.
pub fn count_from_page(resp: &FetchedResponse) -> Result<u64, RemoteError> {
    if resp.status == StatusCode::NO_CONTENT || resp.body.is_empty() {
        return Ok(0);
    }
    if let Some(last) = resp.link.as_deref().and_then(last_page_from_link) {
        return Ok(last);
    }
    let items: Vec<serde_json::Value> = serde_json::from_slice(&resp.body)
        .map_err(|e| RemoteError::Decode(format!("{}: {e}", resp.final_url)))?;
    Ok(items.len() as u64)
}

/// Page number of the `rel="last"` entry of a `Link` header.
pub fn last_page_from_link(header: &str) -> Option<u64> {
    let part = header.split(',').find(|part| part.contains(r#"rel="last""#))?;
    let start = part.find('<')? + 1;
    let end = part.find('>')?;
    let url = Url::parse(part.get(start..end)?).ok()?;
    url.query_pairs()
        .find(|(key, _)| key == "page")
        .and_then(|(_, value)| value.parse().ok())
}

/// Handle onto one repository's sub-resources.
#[derive(Debug, Clone)]
pub struct GithubRepository<'a> {
    client: &'a GithubClient,
    owner: String,
    name: String,
}

impl<'a> GithubRepository<'a> {
    fn path(&self, suffix: &str) -> String {
        format!("repos/{}/{}/{}", self.owner, self.name, suffix)
    }

    pub fn commits(&self) -> PagedCount<'a> {
        PagedCount {
            client: self.client,
            path: self.path("commits?per_page=1"),
        }
    }

    pub fn contributors(&self) -> PagedCount<'a> {
        PagedCount {
            client: self.client,
            path: self.path("contributors?per_page=1"),
        }
    }
}

#[async_trait]
impl ContentAccessor for GithubRepository<'_> {
    async fn get_contents(&self, path: &str) -> Result<RemoteContent, RemoteError> {
        let endpoint = self.path(&format!("contents/{}", path.trim_start_matches('/')));
        name_missing_file(self.client.get_json(&endpoint).await, path)
    }
}

/// Reports a missing file by its repository path rather than the API URL.
fn name_missing_file<T>(result: Result<T, RemoteError>, path: &str) -> Result<T, RemoteError> {
    match result {
        Err(RemoteError::NotFound { .. }) => Err(RemoteError::NotFound {
            resource: path.to_string(),
        }),
        other => other,
    }
}

#[derive(Debug, Clone)]
pub struct PagedCount<'a> {
    client: &'a GithubClient,
    path: String,
}

#[async_trait]
impl TotalCount for PagedCount<'_> {
    async fn total_count(&self) -> Result<u64, RemoteError> {
        self.client.total_count(&self.path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_logic_is_exponential_and_capped() {
        let policy = BackoffPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(350));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(350));
    }

    #[test]
    fn server_errors_and_rate_limits_are_retryable() {
        assert_eq!(
            classify_status(StatusCode::BAD_GATEWAY),
            RetryDisposition::Retryable
        );
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            RetryDisposition::Retryable
        );
        assert_eq!(
            classify_status(StatusCode::NOT_FOUND),
            RetryDisposition::NonRetryable
        );
        assert_eq!(
            classify_status(StatusCode::CONFLICT),
            RetryDisposition::NonRetryable
        );
    }

    #[test]
    fn conflict_with_empty_repository_message_is_recognized() {
        let body = br#"{"message": "Git Repository is empty.", "documentation_url": "https://docs.github.com"}"#;
        assert_eq!(
            classify_failure(StatusCode::CONFLICT, "https://api.github.com/x", body),
            RemoteError::EmptyRepository
        );

        let other = br#"{"message": "Merge conflict"}"#;
        assert_eq!(
            classify_failure(StatusCode::CONFLICT, "https://api.github.com/x", other),
            RemoteError::HttpStatus {
                status: 409,
                url: "https://api.github.com/x".to_string()
            }
        );
    }

    #[test]
    fn missing_resources_and_auth_failures_stay_distinct() {
        assert_eq!(
            classify_failure(StatusCode::NOT_FOUND, "https://api.github.com/y", b""),
            RemoteError::NotFound {
                resource: "https://api.github.com/y".to_string()
            }
        );
        assert_eq!(
            classify_failure(StatusCode::UNAUTHORIZED, "https://api.github.com/y", b"not json"),
            RemoteError::HttpStatus {
                status: 401,
                url: "https://api.github.com/y".to_string()
            }
        );
    }

    #[test]
    fn last_page_is_read_from_link_header() {
        let header = r#"<https://api.github.com/repositories/1/commits?per_page=1&page=2>; rel="next", <https://api.github.com/repositories/1/commits?per_page=1&page=1523>; rel="last""#;
        assert_eq!(last_page_from_link(header), Some(1523));
        assert_eq!(
            last_page_from_link(r#"<https://api.github.com/x?page=2>; rel="next""#),
            None
        );
    }

    fn page(link: Option<&str>, body: &str) -> FetchedResponse {
        FetchedResponse {
            status: StatusCode::OK,
            final_url: "https://api.github.com/repos/OWASP/Nest/contributors".to_string(),
            link: link.map(str::to_string),
            body: body.as_bytes().to_vec(),
        }
    }

    #[test]
    fn unpaginated_listing_counts_items_on_the_page() {
        assert_eq!(count_from_page(&page(None, "")), Ok(0));
        assert_eq!(count_from_page(&page(None, "[]")), Ok(0));
        assert_eq!(count_from_page(&page(None, r#"[{"login": "arkid15r"}]"#)), Ok(1));
        assert_eq!(
            count_from_page(&page(
                Some(r#"<https://api.github.com/x?per_page=1&page=87>; rel="last""#),
                r#"[{"login": "arkid15r"}]"#,
            )),
            Ok(87)
        );
        assert!(matches!(
            count_from_page(&page(None, "{\"message\": \"oops\"}")),
            Err(RemoteError::Decode(_))
        ));
    }

    #[test]
    fn missing_file_is_reported_by_its_path() {
        let missing: Result<RemoteContent, RemoteError> = Err(RemoteError::NotFound {
            resource: "https://api.github.com/repos/OWASP/Nest/contents/.github/FUNDING.yml"
                .to_string(),
        });
        assert_eq!(
            name_missing_file(missing, ".github/FUNDING.yml"),
            Err(RemoteError::NotFound {
                resource: ".github/FUNDING.yml".to_string()
            })
        );

        let denied: Result<RemoteContent, RemoteError> = Err(RemoteError::HttpStatus {
            status: 403,
            url: "https://api.github.com/x".to_string(),
        });
        assert_eq!(
            name_missing_file(denied.clone(), ".github/FUNDING.yml"),
            denied
        );
    }

    #[test]
    fn endpoint_joins_without_duplicate_slashes() {
        let client = GithubClient::new(GithubClientConfig {
            api_url: "https://github.example.com/api/v3/".to_string(),
            ..Default::default()
        })
        .expect("client");
        assert_eq!(
            client.endpoint("/repos/OWASP/Nest"),
            "https://github.example.com/api/v3/repos/OWASP/Nest"
        );
        assert_eq!(
            client.repo("OWASP", "Nest").commits().path,
            "repos/OWASP/Nest/commits?per_page=1"
        );
        assert_eq!(
            client.repo("OWASP", "Nest").contributors().path,
            "repos/OWASP/Nest/contributors?per_page=1"
        );
    }

    #[test]
    fn contents_payload_deserializes() {
        let content: RemoteContent = serde_json::from_str(
            r#"{"type": "file", "encoding": "base64", "path": ".github/FUNDING.yml", "content": "Z2l0aHViOiBPV0FTUAo=\n"}"#,
        )
        .expect("parse contents");
        assert_eq!(content.path, ".github/FUNDING.yml");
        assert_eq!(content.encoding.as_deref(), Some("base64"));
    }
}
