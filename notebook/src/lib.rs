//! Notebook-document model (nbformat 4) and conversion from lightweight
//! text-script formats.

mod script;
#[cfg(test)]
mod tests;

use std::{fmt, str::FromStr};

use miette::Diagnostic;
pub use script::{Dialect, to_notebook};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
#[non_exhaustive]
pub enum Error {
    #[error("{0}")]
    #[diagnostic(code(notebook::json_error))]
    Json(#[from] serde_json::Error),

    #[error("notebook document has no `cells` sequence")]
    #[diagnostic(code(notebook::missing_cells))]
    MissingCells,

    #[error("notebook document does not declare `nbformat`")]
    #[diagnostic(code(notebook::missing_format_version))]
    MissingFormatVersion,

    #[error("unsupported nbformat {found} (supported: 4)")]
    #[diagnostic(code(notebook::unsupported_format_version))]
    UnsupportedFormatVersion { found: u64 },

    #[error("unclosed code fence opened on line {line}")]
    #[diagnostic(code(notebook::unclosed_fence))]
    UnclosedFence { line: usize },
}

/// A notebook document: an ordered sequence of typed cells plus metadata.
///
/// Fields the model does not know about are preserved in `extra`, so
/// validating an existing document never drops anything on re-serialization.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Notebook {
    pub cells: Vec<Cell>,
    pub metadata: Map<String, Value>,
    pub nbformat: u64,
    pub nbformat_minor: u64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Notebook {
    pub const NBFORMAT: u64 = 4;
    pub const NBFORMAT_MINOR: u64 = 5;

    pub fn from_cells(cells: Vec<Cell>) -> Self {
        Self {
            cells,
            metadata: Map::new(),
            nbformat: Self::NBFORMAT,
            nbformat_minor: Self::NBFORMAT_MINOR,
            extra: Map::new(),
        }
    }

    pub fn parse(source: &str) -> Result<Self, Error> {
        let raw: RawNotebook = serde_json::from_str(source)?;
        raw.validate()
    }

    pub fn to_json_string(&self) -> String {
        let mut out = serde_json::to_string_pretty(self)
            .expect("notebook JSON serialization cannot fail");
        out.push('\n');
        out
    }
}

impl FromStr for Notebook {
    type Err = Error;

    fn from_str(source: &str) -> Result<Self, Self::Err> {
        Self::parse(source)
    }
}

#[derive(Deserialize)]
struct RawNotebook {
    cells: Option<Vec<Cell>>,
    #[serde(default)]
    metadata: Map<String, Value>,
    nbformat: Option<u64>,
    #[serde(default)]
    nbformat_minor: Option<u64>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl RawNotebook {
    fn validate(self) -> Result<Notebook, Error> {
        let cells = self.cells.ok_or(Error::MissingCells)?;
        let nbformat = self.nbformat.ok_or(Error::MissingFormatVersion)?;
        if nbformat != Notebook::NBFORMAT {
            return Err(Error::UnsupportedFormatVersion { found: nbformat });
        }

        Ok(Notebook {
            cells,
            metadata: self.metadata,
            nbformat,
            nbformat_minor: self.nbformat_minor.unwrap_or(Notebook::NBFORMAT_MINOR),
            extra: self.extra,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cell_type", rename_all = "snake_case")]
pub enum Cell {
    Code(CodeCell),
    Markdown(MarkdownCell),
    Raw(RawCell),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CodeCell {
    #[serde(default)]
    pub execution_count: Option<u64>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub outputs: Vec<Value>,
    pub source: SourceText,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MarkdownCell {
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub source: SourceText,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawCell {
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub source: SourceText,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Cell {
    pub fn code(source: impl Into<SourceText>) -> Self {
        Self::Code(CodeCell {
            execution_count: None,
            metadata: Map::new(),
            outputs: Vec::new(),
            source: source.into(),
            extra: Map::new(),
        })
    }

    pub fn markdown(source: impl Into<SourceText>) -> Self {
        Self::Markdown(MarkdownCell {
            metadata: Map::new(),
            source: source.into(),
            extra: Map::new(),
        })
    }

    pub fn raw(source: impl Into<SourceText>) -> Self {
        Self::Raw(RawCell {
            metadata: Map::new(),
            source: source.into(),
            extra: Map::new(),
        })
    }

    pub fn cell_type(&self) -> &'static str {
        match self {
            Self::Code(_) => "code",
            Self::Markdown(_) => "markdown",
            Self::Raw(_) => "raw",
        }
    }

    pub fn source(&self) -> &SourceText {
        match self {
            Self::Code(cell) => &cell.source,
            Self::Markdown(cell) => &cell.source,
            Self::Raw(cell) => &cell.source,
        }
    }
}

/// Cell source text. Notebook documents store it either as a single string
/// or as a list of newline-terminated lines; both deserialize here, and
/// serialization always emits the line-list form.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceText(String);

impl SourceText {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl From<String> for SourceText {
    fn from(text: String) -> Self {
        Self(text)
    }
}

impl From<&str> for SourceText {
    fn from(text: &str) -> Self {
        Self(text.to_string())
    }
}

impl fmt::Display for SourceText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for SourceText {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_seq(self.0.split_inclusive('\n'))
    }
}

impl<'de> Deserialize<'de> for SourceText {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        match value {
            Value::String(text) => Ok(Self(text)),
            Value::Array(lines) => {
                let mut text = String::new();
                for line in lines {
                    let Value::String(line) = line else {
                        return Err(serde::de::Error::custom(
                            "cell source lines must be strings",
                        ));
                    };
                    text.push_str(&line);
                }
                Ok(Self(text))
            }
            _ => Err(serde::de::Error::custom(
                "cell source must be a string or a list of strings",
            )),
        }
    }
}
