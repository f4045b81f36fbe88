use anyhow::{anyhow, bail, Context, Result};
use reqwest::header::{ACCEPT, LINK};
use reqwest::{Client, Url};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::{CloneProtocol, Config};

/// One remote repository as far as mirroring is concerned
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryRecord {
    /// `owner/name`, also the path below the target root
    pub full_name: String,
    /// Address handed to `git clone`
    pub clone_locator: String,
}

impl RepositoryRecord {
    pub fn new(full_name: impl Into<String>, clone_locator: impl Into<String>) -> Self {
        Self {
            full_name: full_name.into(),
            clone_locator: clone_locator.into(),
        }
    }
}

/// Subset of the GitHub repository object we read from listing pages
#[derive(Debug, Deserialize)]
struct ListedRepository {
    full_name: String,
    #[serde(default)]
    ssh_url: Option<String>,
    #[serde(default)]
    clone_url: Option<String>,
}

/// Everything gathered by walking one paginated listing
#[derive(Debug, Clone, Default)]
pub struct Listing {
    pub records: Vec<RepositoryRecord>,
    pub pages: usize,
}

/// Client for the paginated repository listings of the GitHub REST API
pub struct GitHubClient {
    http: Client,
    base_url: String,
    user: String,
    token: String,
    per_page: u32,
    page_delay: Duration,
    clone_protocol: CloneProtocol,
}

impl GitHubClient {
    /// Create a client authenticating as the configured user
    pub fn new(config: &Config) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("mirror-mygithub/", env!("CARGO_PKG_VERSION")))
            .timeout(config.api.request_timeout())
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            base_url: config.api.base_url.trim_end_matches('/').to_string(),
            user: config.user.clone(),
            token: config.token.clone(),
            per_page: config.api.per_page,
            page_delay: config.api.page_delay(),
            clone_protocol: config.sync.clone_protocol,
        })
    }

    /// Resolve a listing endpoint (relative path or absolute URL) to its first page
    pub fn endpoint_url(&self, endpoint: &str) -> Result<Url> {
        let raw = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            endpoint.to_string()
        } else {
            format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
        };

        let mut url = Url::parse(&raw).with_context(|| format!("Invalid listing URL: {}", raw))?;

        if self.per_page > 0 && !url.query_pairs().any(|(key, _)| key == "per_page") {
            url.query_pairs_mut()
                .append_pair("per_page", &self.per_page.to_string());
        }

        Ok(url)
    }

    /// Walk `endpoint` page by page until no `next` link remains
    ///
    /// Any transport error, non-2xx status or malformed page aborts the walk;
    /// nothing gathered so far is returned in that case.
    pub async fn fetch_all(&self, endpoint: &str) -> Result<Listing> {
        let mut url = self.endpoint_url(endpoint)?;
        let mut listing = Listing::default();

        loop {
            listing.pages += 1;
            info!("Fetching {} (page {})", url, listing.pages);

            let (records, next) = self
                .fetch_page(&url)
                .await
                .with_context(|| format!("Failed to fetch listing {}", endpoint))?;

            debug!("Page {} returned {} repositories", listing.pages, records.len());
            listing.records.extend(records);

            match next {
                Some(next_url) => {
                    info!(
                        "More pages available, waiting {:?} to respect the rate limit",
                        self.page_delay
                    );
                    tokio::time::sleep(self.page_delay).await;
                    url = next_url;
                }
                None => break,
            }
        }

        info!(
            "Listing {} complete: {} repositories in {} page(s)",
            endpoint,
            listing.records.len(),
            listing.pages
        );
        Ok(listing)
    }

    async fn fetch_page(&self, url: &Url) -> Result<(Vec<RepositoryRecord>, Option<Url>)> {
        let response = self
            .http
            .get(url.clone())
            .basic_auth(&self.user, Some(&self.token))
            .header(ACCEPT, "application/vnd.github+json")
            .send()
            .await
            .with_context(|| format!("Request to {} failed", url))?;

        let status = response.status();
        if !status.is_success() {
            bail!("{} responded with status {}", url, status);
        }

        let next = match response
            .headers()
            .get(LINK)
            .and_then(|value| value.to_str().ok())
            .and_then(next_page_link)
        {
            Some(link) => Some(
                url.join(&link)
                    .with_context(|| format!("Invalid next page link: {}", link))?,
            ),
            None => None,
        };

        let body = response
            .bytes()
            .await
            .with_context(|| format!("Failed to read response body from {}", url))?;

        let records = parse_page(&body, self.clone_protocol)
            .with_context(|| format!("Malformed listing response from {}", url))?;

        Ok((records, next))
    }
}

/// Extract the target of the `rel="next"` entry from a `Link` header value
pub fn next_page_link(header: &str) -> Option<String> {
    header.split(',').find_map(|entry| {
        let mut parts = entry.split(';');
        let target = parts.next()?.trim();
        let url = target.strip_prefix('<')?.strip_suffix('>')?;

        let is_next = parts.any(|param| {
            let Some((key, value)) = param.split_once('=') else {
                return false;
            };
            key.trim().eq_ignore_ascii_case("rel")
                && value
                    .trim()
                    .trim_matches('"')
                    .split_whitespace()
                    .any(|rel| rel.eq_ignore_ascii_case("next"))
        });

        is_next.then(|| url.trim().to_string())
    })
}

/// Decode one listing page into records, picking the locator for `protocol`
pub fn parse_page(body: &[u8], protocol: CloneProtocol) -> Result<Vec<RepositoryRecord>> {
    let listed: Vec<ListedRepository> =
        serde_json::from_slice(body).context("Response body is not a repository list")?;

    listed
        .into_iter()
        .map(|repo| -> Result<RepositoryRecord> {
            let locator = match protocol {
                CloneProtocol::Ssh => repo.ssh_url,
                CloneProtocol::Https => repo.clone_url,
            };
            let locator = locator.ok_or_else(|| {
                anyhow!(
                    "Repository {} has no {:?} clone URL",
                    repo.full_name,
                    protocol
                )
            })?;
            Ok(RepositoryRecord::new(repo.full_name, locator))
        })
        .collect()
}
