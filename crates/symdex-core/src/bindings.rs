//! Python entry points over the process-wide [`SymbolEngine`].
//!
//! Each call releases the GIL while the engine works and hands results back
//! as plain `dict`/`list` values.

use std::path::PathBuf;

use pyo3::prelude::*;
use serde::Serialize;

use crate::errors::SymdexError;
use crate::query::engine::SymbolEngine;

fn to_py<T: Serialize>(py: Python<'_>, value: &T) -> PyResult<PyObject> {
    let json_str = serde_json::to_string(value).map_err(SymdexError::from)?;
    let json_module = py.import("json")?;
    json_module
        .call_method1("loads", (json_str,))
        .map(|o| o.into())
}

#[pyfunction]
#[pyo3(signature = (project_root, class_name, file_hint=None))]
pub fn query_class(
    py: Python<'_>,
    project_root: PathBuf,
    class_name: &str,
    file_hint: Option<&str>,
) -> PyResult<PyObject> {
    let response = py.allow_threads(|| {
        SymbolEngine::global().query_class(&project_root, class_name, file_hint)
    })?;
    to_py(py, &response)
}

#[pyfunction]
#[pyo3(signature = (project_root, function_name, file_hint=None, enclosing_class=None))]
pub fn query_function(
    py: Python<'_>,
    project_root: PathBuf,
    function_name: &str,
    file_hint: Option<&str>,
    enclosing_class: Option<&str>,
) -> PyResult<PyObject> {
    let response = py.allow_threads(|| {
        SymbolEngine::global().query_function(
            &project_root,
            function_name,
            file_hint,
            enclosing_class,
        )
    })?;
    to_py(py, &response)
}

#[pyfunction]
#[pyo3(signature = (project_root, file_hint=None))]
pub fn list_symbols(
    py: Python<'_>,
    project_root: PathBuf,
    file_hint: Option<&str>,
) -> PyResult<PyObject> {
    let symbols =
        py.allow_threads(|| SymbolEngine::global().list_symbols(&project_root, file_hint))?;
    to_py(py, &symbols)
}

#[pyfunction]
pub fn rebuild_index(py: Python<'_>, project_root: PathBuf) -> PyResult<PyObject> {
    let stats = py.allow_threads(|| SymbolEngine::global().rebuild_index(&project_root))?;
    to_py(py, &stats)
}

/// SHA-256 fingerprint of a file's current bytes.
#[pyfunction]
pub fn compute_content_hash(py: Python<'_>, path: PathBuf) -> PyResult<String> {
    let hash = py.allow_threads(|| crate::indexer::filesystem::compute_content_hash(&path))?;
    Ok(hash)
}
