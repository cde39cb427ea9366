//! Conversion of text-script notebooks (jupytext light / percent / markdown
//! dialects) into notebook documents.

use crate::{Cell, Error, Notebook};

/// The text encoding a script uses for cell boundaries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dialect {
    /// Blank-line-separated blocks; comment-only blocks are markdown.
    Light,
    /// `# %%` cell markers, `# %% [markdown]` for markdown cells.
    Percent,
    /// Markdown prose with fenced code blocks as code cells.
    Markdown,
}

impl Dialect {
    /// Detect the dialect from content markers, with the file extension
    /// deciding only the markdown-paired case.
    pub fn detect(extension: Option<&str>, source: &str) -> Self {
        if let Some(ext) = extension
            && ext.eq_ignore_ascii_case("md")
        {
            return Self::Markdown;
        }
        if source.lines().any(is_percent_marker) {
            return Self::Percent;
        }
        Self::Light
    }
}

/// Convert script text into a notebook document, preserving cell order and
/// cell type exactly as the markers encode them.
pub fn to_notebook(source: &str, dialect: Dialect) -> Result<Notebook, Error> {
    let cells = match dialect {
        Dialect::Light => light_cells(source),
        Dialect::Percent => percent_cells(source),
        Dialect::Markdown => markdown_cells(source)?,
    };
    Ok(Notebook::from_cells(cells))
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Code,
    Markdown,
    Raw,
}

fn is_percent_marker(line: &str) -> bool {
    let Some(rest) = line.trim_start().strip_prefix('#') else {
        return false;
    };
    rest.trim_start().starts_with("%%")
}

fn percent_marker_kind(line: &str) -> BlockKind {
    let attrs = line
        .trim_start()
        .trim_start_matches('#')
        .trim_start()
        .trim_start_matches("%%");
    if attrs.contains("[markdown]") || attrs.contains("[md]") {
        BlockKind::Markdown
    } else if attrs.contains("[raw]") {
        BlockKind::Raw
    } else {
        BlockKind::Code
    }
}

fn percent_cells(source: &str) -> Vec<Cell> {
    let mut cells = Vec::new();
    let mut kind = BlockKind::Code;
    let mut block: Vec<&str> = Vec::new();

    for line in source.lines() {
        if is_percent_marker(line) {
            push_script_block(&mut cells, kind, &block);
            block.clear();
            kind = percent_marker_kind(line);
            continue;
        }
        block.push(line);
    }
    push_script_block(&mut cells, kind, &block);

    cells
}

fn light_cells(source: &str) -> Vec<Cell> {
    let mut cells = Vec::new();
    let mut block: Vec<&str> = Vec::new();
    let mut fenced = false;

    for line in source.lines() {
        let trimmed = line.trim_start();
        if !fenced && (trimmed == "# +" || trimmed.starts_with("# + ")) {
            flush_light_block(&mut cells, &block);
            block.clear();
            fenced = true;
            continue;
        }
        if fenced && trimmed == "# -" {
            push_block(&mut cells, BlockKind::Code, &block);
            block.clear();
            fenced = false;
            continue;
        }
        if !fenced && line.trim().is_empty() {
            flush_light_block(&mut cells, &block);
            block.clear();
            continue;
        }
        block.push(line);
    }
    if fenced {
        // unterminated `# +` region still becomes a single code cell
        push_block(&mut cells, BlockKind::Code, &block);
    } else {
        flush_light_block(&mut cells, &block);
    }

    cells
}

fn flush_light_block(cells: &mut Vec<Cell>, block: &[&str]) {
    let kind = if light_block_is_markdown(block) {
        BlockKind::Markdown
    } else {
        BlockKind::Code
    };
    push_script_block(cells, kind, block);
}

fn light_block_is_markdown(block: &[&str]) -> bool {
    if block.is_empty() || block[0].starts_with("#!") {
        return false;
    }
    block.iter().all(|line| line.trim_start().starts_with('#'))
}

fn markdown_cells(source: &str) -> Result<Vec<Cell>, Error> {
    let mut cells = Vec::new();
    let mut prose: Vec<&str> = Vec::new();
    let mut code: Vec<&str> = Vec::new();
    let mut fence: Option<(usize, bool)> = None;

    for (index, line) in source.lines().enumerate() {
        let trimmed = line.trim_start();
        match fence {
            None => {
                if let Some(info) = trimmed.strip_prefix("```") {
                    let is_code = is_code_fence_info(info.trim());
                    if is_code {
                        push_block(&mut cells, BlockKind::Markdown, &prose);
                        prose.clear();
                    } else {
                        prose.push(line);
                    }
                    fence = Some((index, is_code));
                } else {
                    prose.push(line);
                }
            }
            Some((_, is_code)) => {
                if trimmed == "```" {
                    if is_code {
                        push_block(&mut cells, BlockKind::Code, &code);
                        code.clear();
                    } else {
                        prose.push(line);
                    }
                    fence = None;
                } else if is_code {
                    code.push(line);
                } else {
                    prose.push(line);
                }
            }
        }
    }

    if let Some((opened, _)) = fence {
        return Err(Error::UnclosedFence { line: opened + 1 });
    }
    push_block(&mut cells, BlockKind::Markdown, &prose);

    Ok(cells)
}

fn is_code_fence_info(info: &str) -> bool {
    matches!(info, "python" | "python3")
        || (info.starts_with('{') && info.ends_with('}') && info.len() > 2)
}

/// Push a block from a script dialect, where markdown and raw bodies are
/// comment-prefixed and the prefix is not part of the cell content.
fn push_script_block(cells: &mut Vec<Cell>, kind: BlockKind, block: &[&str]) {
    match kind {
        BlockKind::Code => push_block(cells, kind, block),
        BlockKind::Markdown | BlockKind::Raw => {
            let stripped: Vec<&str> = block.iter().map(|line| strip_comment(line)).collect();
            push_block(cells, kind, &stripped);
        }
    }
}

fn push_block(cells: &mut Vec<Cell>, kind: BlockKind, block: &[&str]) {
    let mut lines: Vec<&str> = block.to_vec();

    while lines.first().is_some_and(|line| line.trim().is_empty()) {
        lines.remove(0);
    }
    while lines.last().is_some_and(|line| line.trim().is_empty()) {
        lines.pop();
    }
    if lines.is_empty() {
        return;
    }

    let source = lines.join("\n");
    cells.push(match kind {
        BlockKind::Code => Cell::code(source),
        BlockKind::Markdown => Cell::markdown(source),
        BlockKind::Raw => Cell::raw(source),
    });
}

fn strip_comment(line: &str) -> &str {
    let trimmed = line.trim_start();
    if let Some(rest) = trimmed.strip_prefix("# ") {
        rest
    } else if let Some(rest) = trimmed.strip_prefix('#') {
        rest
    } else {
        line
    }
}
