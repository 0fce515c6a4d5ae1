//! Shared guardrails for traversal limits and configuration bounds.

// Walker bounds
pub const DEFAULT_MAX_WALK_DEPTH: usize = 32;
pub const MAX_WALK_DEPTH: usize = 128;
pub const MAX_WORKERS: usize = 32;

// Resolution bounds
pub const MAX_REEXPORT_DEPTH: usize = 4;
pub const MAX_MRO_LENGTH: usize = 64;
pub const MAX_SYNTAX_DEPTH: usize = 400;
pub const MAX_QUERY_NAME_LENGTH: usize = 256;

pub fn clamp_usize(value: usize, minimum: usize, maximum: usize) -> usize {
    value.max(minimum).min(maximum)
}

pub fn clamp_depth(value: usize) -> usize {
    clamp_usize(value, 1, MAX_WALK_DEPTH)
}

pub fn clamp_workers(value: usize) -> usize {
    clamp_usize(value, 1, MAX_WORKERS)
}

/// Trim a user-supplied symbol name and cap its length.
pub fn normalize_query_name(name: &str) -> String {
    let stripped = name.trim();
    if stripped.len() <= MAX_QUERY_NAME_LENGTH {
        return stripped.to_string();
    }
    let mut end = MAX_QUERY_NAME_LENGTH;
    while !stripped.is_char_boundary(end) {
        end -= 1;
    }
    stripped[..end].to_string()
}
