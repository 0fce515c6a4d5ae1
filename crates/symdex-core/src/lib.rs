//! symdex core library: Python symbol index and dependency resolution.
//!
//! Extracts class and function definitions from a Python project with
//! tree-sitter, caches per-file definition tables in SQLite keyed by content
//! fingerprint, and resolves each definition's references back to concrete
//! project definitions. With the `python` feature the crate also builds as a
//! Python extension module (`_symdex_core`).

pub mod config;
pub mod errors;
pub mod indexer;
pub mod models;
pub mod query;
pub mod store;

#[cfg(feature = "python")]
mod bindings;

pub use config::EngineConfig;
pub use errors::{ErrorPayload, SymdexError, SymdexResult};
pub use models::{QueryResponse, RebuildStats, SymbolSummary};
pub use query::engine::SymbolEngine;

#[cfg(feature = "python")]
use pyo3::prelude::*;

// ---------------------------------------------------------------------------
// Top-level Python module: _symdex_core
// ---------------------------------------------------------------------------

#[cfg(feature = "python")]
#[pymodule]
fn _symdex_core(m: &Bound<'_, PyModule>) -> PyResult<()> {
    // -- Guards ---------------------------------------------------------------
    m.add("MAX_WALK_DEPTH", query::guards::MAX_WALK_DEPTH)?;
    m.add("MAX_WORKERS", query::guards::MAX_WORKERS)?;
    m.add("MAX_QUERY_NAME_LENGTH", query::guards::MAX_QUERY_NAME_LENGTH)?;

    // -- Query facade ---------------------------------------------------------
    m.add_function(wrap_pyfunction!(bindings::query_class, m)?)?;
    m.add_function(wrap_pyfunction!(bindings::query_function, m)?)?;
    m.add_function(wrap_pyfunction!(bindings::list_symbols, m)?)?;
    m.add_function(wrap_pyfunction!(bindings::rebuild_index, m)?)?;

    // -- Indexer helpers ------------------------------------------------------
    m.add_function(wrap_pyfunction!(bindings::compute_content_hash, m)?)?;

    Ok(())
}
