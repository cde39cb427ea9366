use serde_json::{Value, json};

use super::*;

#[test]
fn parse_minimal_document() {
    let notebook: Notebook = r##"
        {
          "cells": [
            {"cell_type": "markdown", "metadata": {}, "source": ["# Title\n", "intro"]},
            {"cell_type": "code", "execution_count": null, "metadata": {}, "outputs": [], "source": "print(1)"}
          ],
          "metadata": {},
          "nbformat": 4,
          "nbformat_minor": 5
        }
        "##
    .parse()
    .unwrap();

    assert_eq!(notebook.nbformat, 4);
    assert_eq!(notebook.cells.len(), 2);
    assert_eq!(notebook.cells[0].cell_type(), "markdown");
    assert_eq!(notebook.cells[0].source().as_str(), "# Title\nintro");
    assert_eq!(notebook.cells[1].cell_type(), "code");
    assert_eq!(notebook.cells[1].source().as_str(), "print(1)");
}

#[test]
fn missing_cells_errors() {
    let err = Notebook::parse(r#"{"nbformat": 4, "nbformat_minor": 5}"#).unwrap_err();
    assert!(matches!(err, Error::MissingCells));
}

#[test]
fn missing_format_version_errors() {
    let err = Notebook::parse(r#"{"cells": []}"#).unwrap_err();
    assert!(matches!(err, Error::MissingFormatVersion));
}

#[test]
fn old_format_version_errors() {
    let err = Notebook::parse(r#"{"cells": [], "nbformat": 3}"#).unwrap_err();
    assert!(matches!(err, Error::UnsupportedFormatVersion { found: 3 }));
}

#[test]
fn unknown_fields_survive_reserialization() {
    let notebook = Notebook::parse(
        r#"
        {
          "cells": [
            {"cell_type": "code", "execution_count": 3, "metadata": {}, "outputs": [],
             "source": "x = 1", "id": "abc123"}
          ],
          "metadata": {"kernelspec": {"name": "python3"}},
          "nbformat": 4,
          "nbformat_minor": 5,
          "custom_top_level": true
        }
        "#,
    )
    .unwrap();

    let rendered: Value = serde_json::from_str(&notebook.to_json_string()).unwrap();
    assert_eq!(rendered["custom_top_level"], json!(true));
    assert_eq!(rendered["cells"][0]["id"], json!("abc123"));
    assert_eq!(rendered["cells"][0]["execution_count"], json!(3));
    assert_eq!(rendered["metadata"]["kernelspec"]["name"], json!("python3"));
}

#[test]
fn source_text_serializes_as_inclusive_lines() {
    let cell = Cell::code("a = 1\nb = 2");
    let value = serde_json::to_value(&cell).unwrap();
    assert_eq!(value["source"], json!(["a = 1\n", "b = 2"]));
}

#[test]
fn detect_prefers_markdown_extension() {
    let source = "# Title\n\n```python\nx = 1\n```\n";
    assert_eq!(Dialect::detect(Some("md"), source), Dialect::Markdown);
}

#[test]
fn detect_finds_percent_markers() {
    assert_eq!(
        Dialect::detect(Some("py"), "import os\n\n# %%\nprint(1)\n"),
        Dialect::Percent
    );
    assert_eq!(
        Dialect::detect(Some("py"), "#%% first cell\nprint(1)\n"),
        Dialect::Percent
    );
}

#[test]
fn detect_falls_back_to_light() {
    assert_eq!(
        Dialect::detect(Some("py"), "# just a comment\nprint(1)\n"),
        Dialect::Light
    );
}

#[test]
fn percent_blocks_become_cells() {
    let script = "\
import os

# %%
x = 1
y = 2

# %% [markdown]
# ## Results
# some prose

# %%
print(x + y)
";
    let notebook = to_notebook(script, Dialect::Percent).unwrap();

    let expected = Notebook::from_cells(vec![
        Cell::code("import os"),
        Cell::code("x = 1\ny = 2"),
        Cell::markdown("## Results\nsome prose"),
        Cell::code("print(x + y)"),
    ]);
    assert_eq!(notebook, expected);
}

#[test]
fn percent_marker_without_space_is_recognized() {
    let notebook = to_notebook("#%%\na\n#%% [markdown]\n# b\n", Dialect::Percent).unwrap();
    assert_eq!(notebook.cells.len(), 2);
    assert_eq!(notebook.cells[0].cell_type(), "code");
    assert_eq!(notebook.cells[1].cell_type(), "markdown");
    assert_eq!(notebook.cells[1].source().as_str(), "b");
}

#[test]
fn light_comment_blocks_become_markdown() {
    let script = "\
# ## A heading
# and prose

x = 1

y = 2
";
    let notebook = to_notebook(script, Dialect::Light).unwrap();
    assert_eq!(notebook.cells.len(), 3);
    assert_eq!(notebook.cells[0].cell_type(), "markdown");
    assert_eq!(notebook.cells[0].source().as_str(), "## A heading\nand prose");
    assert_eq!(notebook.cells[1].cell_type(), "code");
    assert_eq!(notebook.cells[2].cell_type(), "code");
}

#[test]
fn light_fences_group_one_cell() {
    let script = "\
# +
def f():
    return 1


def g():
    return 2
# -

f()
";
    let notebook = to_notebook(script, Dialect::Light).unwrap();
    assert_eq!(notebook.cells.len(), 2);
    assert_eq!(
        notebook.cells[0].source().as_str(),
        "def f():\n    return 1\n\n\ndef g():\n    return 2"
    );
    assert_eq!(notebook.cells[1].source().as_str(), "f()");
}

#[test]
fn light_shebang_stays_code() {
    let notebook = to_notebook("#!/usr/bin/env python\n\nx = 1\n", Dialect::Light).unwrap();
    assert_eq!(notebook.cells[0].cell_type(), "code");
    assert_eq!(notebook.cells[0].source().as_str(), "#!/usr/bin/env python");
}

#[test]
fn markdown_fenced_python_becomes_code() {
    let doc = "\
# Demo

some prose

```python
x = 1
```

```text
not code
```

closing prose
";
    let notebook = to_notebook(doc, Dialect::Markdown).unwrap();
    assert_eq!(notebook.cells.len(), 3);
    assert_eq!(notebook.cells[0].cell_type(), "markdown");
    assert_eq!(notebook.cells[0].source().as_str(), "# Demo\n\nsome prose");
    assert_eq!(notebook.cells[1].cell_type(), "code");
    assert_eq!(notebook.cells[1].source().as_str(), "x = 1");
    assert_eq!(notebook.cells[2].cell_type(), "markdown");
    assert_eq!(
        notebook.cells[2].source().as_str(),
        "```text\nnot code\n```\n\nclosing prose"
    );
}

#[test]
fn markdown_unclosed_fence_errors() {
    let err = to_notebook("intro\n```python\nx = 1\n", Dialect::Markdown).unwrap_err();
    assert!(matches!(err, Error::UnclosedFence { line: 2 }));
}

#[test]
fn converted_notebook_is_valid_document() {
    let notebook = to_notebook("# %%\nx = 1\n", Dialect::Percent).unwrap();
    let reparsed = Notebook::parse(&notebook.to_json_string()).unwrap();
    assert_eq!(reparsed, notebook);
}
