use std::{collections::BTreeMap, future::Future, pin::Pin};

use reqwest::{StatusCode, header};
use serde::{Deserialize, de::DeserializeOwned};
use url::Url;

use crate::Error;

/// Metadata operations against a code forge, used only for shorthand
/// defaulting (default branch, root listing) and gist file enumeration.
pub trait Forge: Send + Sync {
    fn default_branch<'a>(
        &'a self,
        owner: &'a str,
        repo: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String, Error>> + Send + 'a>>;

    fn root_entries<'a>(
        &'a self,
        owner: &'a str,
        repo: &'a str,
        r#ref: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ForgeEntry>, Error>> + Send + 'a>>;

    /// Timestamp of the last commit touching `path`, as an RFC 3339 UTC
    /// string, or `None` when the forge has no history for it.
    fn last_modified<'a>(
        &'a self,
        owner: &'a str,
        repo: &'a str,
        r#ref: &'a str,
        path: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<String>, Error>> + Send + 'a>>;

    fn gist_files<'a>(
        &'a self,
        id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<GistFile>, Error>> + Send + 'a>>;
}

#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct ForgeEntry {
    pub name: String,
    pub is_file: bool,
}

#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct GistFile {
    pub filename: String,
    pub raw_url: Url,
}

const GITHUB_API_BASE: &str = "https://api.github.com";

/// GitHub REST API client. The HTTP client is constructed by the caller and
/// scoped to a single invocation.
#[derive(Clone, Debug)]
pub struct GitHubForge {
    client: reqwest::Client,
    api_base: Url,
}

impl GitHubForge {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            api_base: Url::parse(GITHUB_API_BASE).expect("static URL is valid"),
        }
    }

    pub fn with_api_base(mut self, api_base: Url) -> Self {
        self.api_base = api_base;
        self
    }

    fn api_url(&self, segments: &[&str], query: &[(&str, &str)]) -> Result<Url, Error> {
        let mut url = self.api_base.clone();
        url.path_segments_mut()
            .map_err(|()| Error::FetchFailed {
                url: self.api_base.clone(),
                message: "API base URL cannot be a base".to_string(),
            })?
            .pop_if_empty()
            .extend(segments);
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    async fn get(&self, url: &Url) -> Result<reqwest::Response, Error> {
        self.client
            .get(url.clone())
            .header(header::ACCEPT, "application/vnd.github+json")
            .send()
            .await
            .map_err(|err| Error::FetchFailed {
                url: url.clone(),
                message: err.to_string(),
            })
    }

    async fn get_json<T>(&self, url: Url, not_found: impl FnOnce() -> Error) -> Result<T, Error>
    where
        T: DeserializeOwned,
    {
        let res = self.get(&url).await?;
        let status = res.status();
        if status == StatusCode::NOT_FOUND {
            return Err(not_found());
        }
        if !status.is_success() {
            return Err(Error::FetchFailed {
                url,
                message: format!("server returned {status}"),
            });
        }
        res.json().await.map_err(|err| Error::FetchFailed {
            url,
            message: err.to_string(),
        })
    }
}

impl Forge for GitHubForge {
    fn default_branch<'a>(
        &'a self,
        owner: &'a str,
        repo: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String, Error>> + Send + 'a>> {
        Box::pin(async move {
            let url = self.api_url(&["repos", owner, repo], &[])?;
            let info: RepoInfo = self
                .get_json(url, || Error::InvalidReference {
                    reference: format!("{owner}/{repo}"),
                    message: "repository not found".to_string(),
                })
                .await?;
            Ok(info.default_branch)
        })
    }

    fn root_entries<'a>(
        &'a self,
        owner: &'a str,
        repo: &'a str,
        r#ref: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ForgeEntry>, Error>> + Send + 'a>> {
        Box::pin(async move {
            let url = self.api_url(&["repos", owner, repo, "contents"], &[("ref", r#ref)])?;
            let entries: Vec<ContentsEntry> = self
                .get_json(url, || Error::InvalidReference {
                    reference: format!("{owner}/{repo}"),
                    message: format!("repository or ref `{}` not found", r#ref),
                })
                .await?;
            Ok(entries
                .into_iter()
                .map(|entry| ForgeEntry {
                    name: entry.name,
                    is_file: entry.kind == "file",
                })
                .collect())
        })
    }

    fn last_modified<'a>(
        &'a self,
        owner: &'a str,
        repo: &'a str,
        r#ref: &'a str,
        path: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<String>, Error>> + Send + 'a>> {
        Box::pin(async move {
            let url = self.api_url(
                &["repos", owner, repo, "commits"],
                &[("path", path), ("sha", r#ref), ("per_page", "1")],
            )?;
            let res = self.get(&url).await?;
            let status = res.status();
            if status == StatusCode::NOT_FOUND {
                return Ok(None);
            }
            if !status.is_success() {
                return Err(Error::FetchFailed {
                    url,
                    message: format!("server returned {status}"),
                });
            }
            let commits: Vec<CommitInfo> = res.json().await.map_err(|err| Error::FetchFailed {
                url,
                message: err.to_string(),
            })?;
            Ok(commits.into_iter().next().and_then(|info| {
                info.commit
                    .committer
                    .or(info.commit.author)
                    .and_then(|actor| actor.date)
            }))
        })
    }

    fn gist_files<'a>(
        &'a self,
        id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<GistFile>, Error>> + Send + 'a>> {
        Box::pin(async move {
            let url = self.api_url(&["gists", id], &[])?;
            let info: GistInfo = self
                .get_json(url, || Error::InvalidReference {
                    reference: id.to_string(),
                    message: "gist not found".to_string(),
                })
                .await?;
            // BTreeMap iteration keeps the file order deterministic
            Ok(info
                .files
                .into_values()
                .map(|file| GistFile {
                    filename: file.filename,
                    raw_url: file.raw_url,
                })
                .collect())
        })
    }
}

#[derive(Debug, Deserialize)]
struct RepoInfo {
    default_branch: String,
}

#[derive(Debug, Deserialize)]
struct ContentsEntry {
    name: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct CommitInfo {
    commit: CommitDetail,
}

#[derive(Debug, Deserialize)]
struct CommitDetail {
    #[serde(default)]
    author: Option<GitActor>,
    #[serde(default)]
    committer: Option<GitActor>,
}

#[derive(Debug, Deserialize)]
struct GitActor {
    #[serde(default)]
    date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GistInfo {
    files: BTreeMap<String, GistFileInfo>,
}

#[derive(Debug, Deserialize)]
struct GistFileInfo {
    filename: String,
    raw_url: Url,
}
