use crate::{StorageError, StorageResult};

/// Joins `base` (the configured storage root) with a caller supplied `path`,
/// refusing any result that would land outside of `base`.
///
/// Both inputs are slash-normalized first, then `path` is resolved against
/// `base` with relative-URL semantics: `.` and `..` segments collapse against
/// the joined path, runs of slashes collapse to one. The convention used for
/// the result is root-relative, no leading slash, so resolved names are valid
/// GCS object keys (`a/b.txt`, never `/a/b.txt`).
pub fn safe_join(base: &str, path: &str) -> StorageResult<String> {
    let base = normalize_base(base);
    let path = path.replace('\\', "/");
    let path = path.trim_start_matches('/');

    let merged = format!("{}{}", base, path);
    // A resolved directory reference keeps its trailing slash, like urljoin.
    let keep_trailing_slash = merged.ends_with('/')
        || merged.ends_with("/.")
        || merged.ends_with("/..")
        || merged == "."
        || merged == "..";

    let mut segments: Vec<&str> = Vec::new();
    for segment in merged.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    // Climbed above the storage namespace itself.
                    return Err(StorageError::PathEscape(format!(
                        "joined path {} is located outside of the base path {}",
                        merged, base
                    )));
                }
            }
            other => segments.push(other),
        }
    }

    let mut resolved = segments.join("/");
    if keep_trailing_slash && !resolved.is_empty() {
        resolved.push('/');
    }

    if !resolved.starts_with(&base) {
        return Err(StorageError::PathEscape(format!(
            "joined path {} is located outside of the base path {}",
            resolved, base
        )));
    }
    Ok(resolved)
}

/// Like [`safe_join`], for callers holding raw byte paths. The bytes must be
/// valid UTF-8.
pub fn safe_join_bytes(base: &[u8], path: &[u8]) -> StorageResult<String> {
    safe_join(prepare_name(base)?.as_str(), prepare_name(path)?.as_str())
}

/// Decodes a raw byte path as UTF-8.
pub fn prepare_name(name: &[u8]) -> StorageResult<String> {
    match std::str::from_utf8(name) {
        Ok(s) => Ok(s.to_string()),
        Err(e) => Err(StorageError::Encoding(format!(
            "path is not valid UTF-8: {}",
            e
        ))),
    }
}

/// Strips `prefix` from `target` if present, otherwise returns `target`
/// unchanged.
pub fn remove_prefix<'a>(target: &'a str, prefix: &str) -> &'a str {
    target.strip_prefix(prefix).unwrap_or(target)
}

// Normalized base is either empty or `dir/` shaped: backslashes become
// slashes, leading and trailing slashes are stripped, one trailing slash is
// appended. An all-slash root normalizes to the empty base.
fn normalize_base(base: &str) -> String {
    let base = base.replace('\\', "/");
    let trimmed = base.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{}/", trimmed)
    }
}
