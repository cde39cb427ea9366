//! Resolution of notebook references into fetchable descriptors, and
//! materialization of the fetched content into a local notebook file.

mod forge;
mod materialize;
mod reference;

use std::sync::Arc;

pub use forge::{Forge, ForgeEntry, GistFile, GitHubForge};
use miette::Diagnostic;
pub use materialize::{MaterializedNotebook, Materializer, MaterializerOptions};
pub use reference::Reference;
use url::Url;

#[derive(Debug, thiserror::Error, Diagnostic)]
#[non_exhaustive]
pub enum Error {
    #[error("invalid notebook reference `{reference}`: {message}")]
    #[diagnostic(
        code(resolver::invalid_reference),
        help(
            "use `owner/repo[@ref][#path]`, a repository blob URL, a gist URL, or a raw file URL"
        )
    )]
    InvalidReference { reference: String, message: String },

    #[error("ambiguous notebook reference `{reference}`: {message}")]
    #[diagnostic(
        code(resolver::ambiguous_reference),
        help("name the notebook file explicitly")
    )]
    AmbiguousReference { reference: String, message: String },

    #[error("unsupported file type for `{name}`")]
    #[diagnostic(
        code(resolver::unsupported_file_type),
        help("supported extensions: .ipynb, .py, .r, .jl, .md")
    )]
    UnsupportedFileType { name: String },

    #[error("fetch failed for `{url}`: {message}")]
    #[diagnostic(code(resolver::fetch_failed))]
    FetchFailed { url: Url, message: String },

    #[error("could not convert `{name}` into a notebook")]
    #[diagnostic(code(resolver::conversion_failed))]
    ConversionFailed {
        name: String,
        #[source]
        #[diagnostic_source]
        source: nbopen_notebook::Error,
    },

    #[error("io error: {0}")]
    #[diagnostic(code(resolver::io_error))]
    Io(#[from] std::io::Error),
}

/// What kind of content a retrieval URL serves, inferred from the file
/// extension alone.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SourceKind {
    /// A notebook-document JSON file (`.ipynb`).
    NotebookJson,
    /// A text-script notebook (light, percent, or markdown dialect).
    TextScript,
}

impl SourceKind {
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_ascii_lowercase().as_str() {
            "ipynb" => Some(Self::NotebookJson),
            "py" | "r" | "jl" | "md" => Some(Self::TextScript),
            _ => None,
        }
    }

    pub fn for_file_name(name: &str) -> Option<Self> {
        let (_, extension) = name.rsplit_once('.')?;
        Self::from_extension(extension)
    }
}

/// Canonical retrieval plan for one reference: where to fetch the bytes and
/// how to interpret them. Produced once, consumed once.
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub struct FetchDescriptor {
    pub retrieval_url: Url,
    pub source_kind: SourceKind,
    pub suggested_filename: String,
}

impl FetchDescriptor {
    fn for_file(retrieval_url: Url, name: &str) -> Result<Self, Error> {
        let file_name = name.rsplit('/').next().unwrap_or(name);
        let Some(source_kind) = SourceKind::for_file_name(file_name) else {
            return Err(Error::UnsupportedFileType {
                name: name.to_string(),
            });
        };
        Ok(Self {
            retrieval_url,
            source_kind,
            suggested_filename: file_name.to_string(),
        })
    }
}

/// Turns reference strings into fetch descriptors. The forge is consulted
/// only for shorthand defaulting and gist enumeration; fully specified
/// references resolve without any lookup.
#[derive(Clone)]
pub struct Resolver {
    forge: Arc<dyn Forge>,
}

impl Resolver {
    pub fn new(forge: impl Forge + 'static) -> Self {
        Self {
            forge: Arc::new(forge),
        }
    }

    pub async fn resolve(&self, reference: &str) -> Result<FetchDescriptor, Error> {
        let parsed: Reference = reference.parse()?;
        match parsed {
            Reference::Raw(url) => {
                let name = url.path().trim_end_matches('/').to_string();
                FetchDescriptor::for_file(url, &name)
            }
            Reference::Blob {
                owner,
                repo,
                r#ref,
                path,
            } => {
                let url = raw_content_url(reference, &owner, &repo, &r#ref, &path)?;
                FetchDescriptor::for_file(url, &path)
            }
            Reference::Gist { id, file } => self.resolve_gist(reference, &id, file).await,
            Reference::Shorthand {
                owner,
                repo,
                r#ref,
                path,
            } => {
                let r#ref = match r#ref {
                    Some(r#ref) => r#ref,
                    None => self.forge.default_branch(&owner, &repo).await?,
                };
                let path = match path {
                    Some(path) => path,
                    None => {
                        self.default_root_path(reference, &owner, &repo, &r#ref)
                            .await?
                    }
                };
                let url = raw_content_url(reference, &owner, &repo, &r#ref, &path)?;
                FetchDescriptor::for_file(url, &path)
            }
        }
    }

    async fn resolve_gist(
        &self,
        reference: &str,
        id: &str,
        file: Option<String>,
    ) -> Result<FetchDescriptor, Error> {
        let mut files = self.forge.gist_files(id).await?;

        let selected = match file {
            Some(selector) => {
                let wanted = anchor_name(&selector);
                files
                    .into_iter()
                    .find(|file| anchor_name(&file.filename) == wanted)
                    .ok_or_else(|| Error::InvalidReference {
                        reference: reference.to_string(),
                        message: format!("gist has no file matching `{selector}`"),
                    })?
            }
            None => match files.len() {
                0 => {
                    return Err(Error::InvalidReference {
                        reference: reference.to_string(),
                        message: "gist has no files".to_string(),
                    });
                }
                1 => files.remove(0),
                n => {
                    return Err(Error::AmbiguousReference {
                        reference: reference.to_string(),
                        message: format!("gist contains {n} files"),
                    });
                }
            },
        };

        FetchDescriptor::for_file(selected.raw_url, &selected.filename)
    }

    /// Pick the notebook to open when the shorthand names only a repository:
    /// notebook-document files first, text scripts only when none exist;
    /// several candidates are ranked by last-commit timestamp and a tie
    /// refuses to guess.
    async fn default_root_path(
        &self,
        reference: &str,
        owner: &str,
        repo: &str,
        r#ref: &str,
    ) -> Result<String, Error> {
        let entries = self.forge.root_entries(owner, repo, r#ref).await?;

        let mut notebooks = Vec::new();
        let mut scripts = Vec::new();
        for entry in entries {
            if !entry.is_file {
                continue;
            }
            match SourceKind::for_file_name(&entry.name) {
                Some(SourceKind::NotebookJson) => notebooks.push(entry.name),
                Some(SourceKind::TextScript) => scripts.push(entry.name),
                None => {}
            }
        }

        let mut candidates = if notebooks.is_empty() {
            scripts
        } else {
            notebooks
        };
        match candidates.len() {
            0 => Err(Error::InvalidReference {
                reference: reference.to_string(),
                message: "no notebook-like file at the repository root".to_string(),
            }),
            1 => Ok(candidates.remove(0)),
            _ => {
                self.newest_candidate(reference, owner, repo, r#ref, candidates)
                    .await
            }
        }
    }

    async fn newest_candidate(
        &self,
        reference: &str,
        owner: &str,
        repo: &str,
        r#ref: &str,
        candidates: Vec<String>,
    ) -> Result<String, Error> {
        let ambiguous = |names: &[(Option<String>, String)], first: &str, what: &str| {
            let mut names: Vec<&str> = std::iter::once(first)
                .chain(names.iter().map(|(_, name)| name.as_str()))
                .collect();
            names.sort_unstable();
            Error::AmbiguousReference {
                reference: reference.to_string(),
                message: format!("{what}: {}", names.join(", ")),
            }
        };

        let mut ranked = Vec::with_capacity(candidates.len());
        for name in candidates {
            let modified = self.forge.last_modified(owner, repo, r#ref, &name).await?;
            ranked.push((modified, name));
        }

        // RFC 3339 UTC timestamps order lexicographically
        ranked.sort_by(|a, b| b.cmp(a));
        let (first_modified, first_name) = ranked.remove(0);
        let Some(first_modified) = first_modified else {
            return Err(ambiguous(
                &ranked,
                &first_name,
                "several notebook files at the repository root",
            ));
        };
        if ranked
            .first()
            .is_some_and(|(modified, _)| modified.as_deref() == Some(first_modified.as_str()))
        {
            return Err(ambiguous(
                &ranked,
                &first_name,
                "several notebook files modified at the same time",
            ));
        }

        Ok(first_name)
    }
}

fn raw_content_url(
    reference: &str,
    owner: &str,
    repo: &str,
    r#ref: &str,
    path: &str,
) -> Result<Url, Error> {
    let raw = format!(
        "https://raw.githubusercontent.com/{owner}/{repo}/{}/{path}",
        r#ref
    );
    Url::parse(&raw).map_err(|err| Error::InvalidReference {
        reference: reference.to_string(),
        message: err.to_string(),
    })
}

/// Normalize a file name the way gist anchors do: lowercase, with every
/// non-alphanumeric character mapped to `-`.
fn anchor_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect()
}
