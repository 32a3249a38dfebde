//! Slash-separated remote path helpers.

use crate::error::UploadError;

/// Cleans a user-supplied remote path into a path relative to the user's
/// files root.
///
/// - Surrounding whitespace and leading `/` are dropped.
/// - A full `files/<user>/...` path is reduced to the part after the user.
/// - `.` and empty segments are removed, `..` pops the previous segment.
///
/// Rejects paths that are empty after cleaning or whose `..` segments would
/// climb above the files root.
pub fn sanitize_remote_path(path: &str) -> Result<String, UploadError> {
    let mut trimmed = path.trim().trim_start_matches('/');

    if let Some(rest) = trimmed.strip_prefix("files/") {
        // Drop `files/<user>/`, keep the rest.
        trimmed = rest.split_once('/').map(|(_, tail)| tail).unwrap_or("");
    }

    let mut segments: Vec<&str> = Vec::new();
    for segment in trimmed.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    return Err(UploadError::InvalidRemotePath(format!(
                        "parent directory traversal not allowed: {path}"
                    )));
                }
            }
            s => segments.push(s),
        }
    }

    if segments.is_empty() {
        return Err(UploadError::InvalidRemotePath(format!(
            "empty path: {path:?}"
        )));
    }

    Ok(segments.join("/"))
}

/// Joins two path pieces with exactly one `/` between them.
pub fn path_join(a: &str, b: &str) -> String {
    let a = a.trim_end_matches('/');
    let b = b.trim_start_matches('/');
    match (a.is_empty(), b.is_empty()) {
        (true, _) => b.to_string(),
        (_, true) => a.to_string(),
        _ => format!("{a}/{b}"),
    }
}

/// Joins non-empty parts, trimming slashes around each.
pub fn join_many(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|p| p.trim_matches('/'))
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Parent of a slash path, or `None` for a single segment.
pub fn dir_of(path: &str) -> Option<&str> {
    path.rfind('/').map(|i| &path[..i]).filter(|d| !d.is_empty())
}
