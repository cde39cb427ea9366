use std::str::FromStr;

use url::{ParseError, Url};

use crate::Error;

/// A parsed notebook reference. Parsing is pure; no lookup happens until the
/// reference is resolved into a fetch descriptor.
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Reference {
    /// `https://github.com/{owner}/{repo}/(blob|tree)/{ref}/{path}`.
    Blob {
        owner: String,
        repo: String,
        r#ref: String,
        path: String,
    },
    /// Any other http(s) URL, assumed to serve the file bytes directly.
    Raw(Url),
    /// `https://gist.github.com/[{owner}/]{id}`, optionally with a
    /// `#file-…` fragment selecting one file.
    Gist { id: String, file: Option<String> },
    /// `owner/repo[@ref][#path]` or `owner/repo/path/to/notebook`.
    Shorthand {
        owner: String,
        repo: String,
        r#ref: Option<String>,
        path: Option<String>,
    },
}

impl FromStr for Reference {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let input = input.trim();
        if input.is_empty() {
            return Err(invalid(input, "reference is empty"));
        }

        match Url::parse(input) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => Self::from_url(input, url),
            Ok(url) => Err(invalid(
                input,
                format!("unsupported URL scheme `{}`", url.scheme()),
            )),
            Err(ParseError::RelativeUrlWithoutBase) => Self::from_shorthand(input),
            Err(err) => Err(invalid(input, err.to_string())),
        }
    }
}

impl Reference {
    fn from_url(input: &str, url: Url) -> Result<Self, Error> {
        match url.host_str() {
            Some("github.com" | "www.github.com") => Self::from_repo_url(input, &url),
            Some("gist.github.com") => Self::from_gist_url(input, &url),
            _ => Ok(Self::Raw(url)),
        }
    }

    fn from_repo_url(input: &str, url: &Url) -> Result<Self, Error> {
        let segments: Vec<&str> = url
            .path_segments()
            .map(|segments| segments.filter(|s| !s.is_empty()).collect())
            .unwrap_or_default();

        match segments.as_slice() {
            [owner, repo] => Ok(Self::Shorthand {
                owner: (*owner).to_string(),
                repo: (*repo).to_string(),
                r#ref: None,
                path: None,
            }),
            [owner, repo, view, r#ref, path @ ..]
                if matches!(*view, "blob" | "tree" | "raw") && !path.is_empty() =>
            {
                Ok(Self::Blob {
                    owner: (*owner).to_string(),
                    repo: (*repo).to_string(),
                    r#ref: (*r#ref).to_string(),
                    path: path.join("/"),
                })
            }
            _ => Err(invalid(
                input,
                "expected a repository file URL like \
                 `https://github.com/owner/repo/blob/<ref>/<path>`",
            )),
        }
    }

    fn from_gist_url(input: &str, url: &Url) -> Result<Self, Error> {
        let segments: Vec<&str> = url
            .path_segments()
            .map(|segments| segments.filter(|s| !s.is_empty()).collect())
            .unwrap_or_default();

        let id = match segments.as_slice() {
            [id] | [_, id] => *id,
            _ => return Err(invalid(input, "expected a gist URL")),
        };
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(invalid(input, format!("`{id}` is not a gist id")));
        }

        let file = url
            .fragment()
            .map(|f| f.strip_prefix("file-").unwrap_or(f).to_string());

        Ok(Self::Gist {
            id: id.to_string(),
            file,
        })
    }

    fn from_shorthand(input: &str) -> Result<Self, Error> {
        let (before_fragment, fragment) = match input.split_once('#') {
            Some((before, path)) if !path.is_empty() => (before, Some(path)),
            Some((before, _)) => (before, None),
            None => (input, None),
        };
        let (repo_part, mut r#ref) = match before_fragment.split_once('@') {
            Some((repo_part, r#ref)) if !r#ref.is_empty() => (repo_part, Some(r#ref)),
            Some(_) => return Err(invalid(input, "`@` must be followed by a ref")),
            None => (before_fragment, None),
        };

        let mut segments = repo_part.trim_matches('/').split('/');
        let (Some(owner), Some(repo)) = (segments.next(), segments.next()) else {
            return Err(invalid(
                input,
                "expected `owner/repository[@ref][#path/to/notebook]`",
            ));
        };
        if owner.is_empty() || repo.is_empty() {
            return Err(invalid(input, "owner and repository must be non-empty"));
        }
        let inline_path: Vec<&str> = segments.collect();

        let mut path = match (fragment, inline_path.is_empty()) {
            (Some(_), false) => {
                return Err(invalid(
                    input,
                    "path given both inline and after `#`",
                ));
            }
            (Some(fragment), true) => Some(fragment.to_string()),
            (None, false) => {
                if r#ref.is_some() {
                    return Err(invalid(
                        input,
                        "with `@ref`, put the path after `#`",
                    ));
                }
                Some(inline_path.join("/"))
            }
            (None, true) => None,
        };

        // `owner/repo@branch/path/to/nb` — the first segment after `@` is
        // the ref, the rest the path
        if path.is_none()
            && let Some(full) = r#ref
            && let Some((branch, rest)) = full.split_once('/')
        {
            if branch.is_empty() || rest.is_empty() {
                return Err(invalid(input, "`@` must be followed by a ref"));
            }
            r#ref = Some(branch);
            path = Some(rest.to_string());
        }

        Ok(Self::Shorthand {
            owner: owner.to_string(),
            repo: repo.to_string(),
            r#ref: r#ref.map(str::to_string),
            path,
        })
    }
}

fn invalid(reference: &str, message: impl Into<String>) -> Error {
    Error::InvalidReference {
        reference: reference.to_string(),
        message: message.into(),
    }
}
