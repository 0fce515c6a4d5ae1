//! tree-sitter-python parsing wrapper used by extraction and resolution passes.

use std::cell::RefCell;

use tree_sitter::{Parser, Tree};

use crate::errors::{SymdexError, SymdexResult};

thread_local! {
    // One parser per worker thread; rayon workers reuse theirs across files.
    static PARSER: RefCell<Option<Parser>> = const { RefCell::new(None) };
}

fn new_parser() -> Result<Parser, String> {
    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_python::LANGUAGE.into())
        .map_err(|e| format!("Failed to set language: {e}"))?;
    Ok(parser)
}

/// Decode raw file bytes, failing with `SyntaxError` on invalid UTF-8.
pub fn decode_source<'a>(file_path: &str, bytes: &'a [u8]) -> SymdexResult<&'a str> {
    std::str::from_utf8(bytes).map_err(|e| SymdexError::Syntax {
        file: file_path.to_string(),
        message: format!("source is not valid UTF-8: {e}"),
    })
}

/// Parse Python source into a concrete syntax tree.
///
/// tree-sitter recovers from malformed input by inserting `ERROR` nodes, so
/// this only fails when no tree could be produced at all.
pub fn parse_python(file_path: &str, source: &str) -> SymdexResult<Tree> {
    PARSER.with(|cell| {
        let mut slot = cell.borrow_mut();
        if slot.is_none() {
            let parser = new_parser().map_err(|message| SymdexError::Syntax {
                file: file_path.to_string(),
                message,
            })?;
            *slot = Some(parser);
        }
        let parser = slot.as_mut().ok_or_else(|| SymdexError::Syntax {
            file: file_path.to_string(),
            message: "parser unavailable".to_string(),
        })?;
        parser
            .parse(source.as_bytes(), None)
            .ok_or_else(|| SymdexError::Syntax {
                file: file_path.to_string(),
                message: "parser produced no syntax tree".to_string(),
            })
    })
}
