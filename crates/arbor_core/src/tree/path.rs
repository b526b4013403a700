//! Collection and document paths.
//!
//! Every path is absolute and rooted at [`ROOT_COLLECTION`].

use crate::error::{CoreError, CoreResult};

/// Path of the root collection.
pub const ROOT_COLLECTION: &str = "/db";

/// Normalizes a collection path: collapses repeated slashes and strips a
/// trailing slash.
///
/// # Errors
///
/// Returns `InvalidPath` for a relative path, a path outside `/db`, or one
/// with `.` or `..` segments.
pub fn normalize(path: &str) -> CoreResult<String> {
    if !path.starts_with('/') {
        return Err(CoreError::invalid_path(path, "must be absolute"));
    }
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.first() != Some(&"db") {
        return Err(CoreError::invalid_path(path, "must be inside /db"));
    }
    if let Some(bad) = segments.iter().find(|s| **s == "." || **s == "..") {
        return Err(CoreError::invalid_path(path, format!("'{bad}' segments are not allowed")));
    }
    Ok(format!("/{}", segments.join("/")))
}

/// Checks a single collection or document name.
///
/// # Errors
///
/// Returns `InvalidPath` for empty names, names containing `/`, or `.`/`..`.
pub fn validate_name(name: &str) -> CoreResult<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return Err(CoreError::invalid_path(name, "not a valid resource name"));
    }
    Ok(())
}

/// Parent of a normalized collection path; `None` for the root.
#[must_use]
pub fn parent(path: &str) -> Option<&str> {
    if path == ROOT_COLLECTION {
        return None;
    }
    path.rsplit_once('/').map(|(p, _)| p).filter(|p| !p.is_empty())
}

/// Last segment of a normalized path.
#[must_use]
pub fn file_name(path: &str) -> &str {
    path.rsplit_once('/').map_or(path, |(_, name)| name)
}

/// Appends `name` to a collection path.
#[must_use]
pub fn join(collection: &str, name: &str) -> String {
    format!("{collection}/{name}")
}

/// Splits a document path into normalized collection path and file name.
///
/// # Errors
///
/// Returns `InvalidPath` if the path is malformed or names the root itself.
pub fn split_document(path: &str) -> CoreResult<(String, String)> {
    let normalized = normalize(path)?;
    let collection = parent(&normalized)
        .ok_or_else(|| CoreError::invalid_path(path, "does not name a document"))?;
    Ok((collection.to_string(), file_name(&normalized).to_string()))
}

/// The root and every ancestor down to `path` itself, root first.
#[must_use]
pub fn lineage(path: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = Some(path);
    while let Some(p) = current {
        out.push(p.to_string());
        current = parent(p);
    }
    out.reverse();
    out
}
