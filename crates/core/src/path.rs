//! Helpers for absolute storage paths (`/zone/collection/.../name`).

/// Remove redundant trailing slashes, keeping the root (`/`) intact.
pub fn normalize(path: &str) -> String {
    let trimmed = path.trim();
    if trimmed.len() > 1 {
        trimmed.trim_end_matches('/').to_string()
    } else {
        trimmed.to_string()
    }
}

/// Validate that a path is absolute and non-empty.
pub fn validate(path: &str) -> crate::Result<()> {
    let path = path.trim();
    if path.is_empty() || !path.starts_with('/') {
        return Err(crate::Error::InvalidPath(format!(
            "expected an absolute path, got '{path}'"
        )));
    }
    if path.split('/').any(|c| c == "." || c == "..") {
        return Err(crate::Error::InvalidPath(format!(
            "relative components not allowed: '{path}'"
        )));
    }
    Ok(())
}

/// Split a data object path into its collection and name.
///
/// `"/seq/1234/1234_1.cram"` becomes `("/seq/1234", "1234_1.cram")`.
pub fn split(path: &str) -> (String, String) {
    let path = normalize(path);
    match path.rfind('/') {
        Some(0) => ("/".to_string(), path[1..].to_string()),
        Some(i) => (path[..i].to_string(), path[i + 1..].to_string()),
        None => (String::new(), path),
    }
}

/// Join a collection path and a child name.
pub fn join(collection: &str, name: &str) -> String {
    let collection = normalize(collection);
    let name = name.trim_start_matches('/');
    if collection.ends_with('/') {
        format!("{collection}{name}")
    } else {
        format!("{collection}/{name}")
    }
}

/// The final component of a path.
pub fn file_name(path: &str) -> &str {
    let path = path.trim_end_matches('/');
    path.rsplit('/').next().unwrap_or(path)
}

/// True if `path` equals `ancestor` or lies beneath it.
pub fn is_within(path: &str, ancestor: &str) -> bool {
    let ancestor = normalize(ancestor);
    if ancestor == "/" {
        return path.starts_with('/');
    }
    path == ancestor
        || path
            .strip_prefix(ancestor.as_str())
            .is_some_and(|rest| rest.starts_with('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_and_join() {
        let (coll, name) = split("/seq/1234/1234_1#1.cram");
        assert_eq!(coll, "/seq/1234");
        assert_eq!(name, "1234_1#1.cram");
        assert_eq!(join(&coll, &name), "/seq/1234/1234_1#1.cram");
        assert_eq!(split("/top"), ("/".to_string(), "top".to_string()));
        assert_eq!(join("/", "top"), "/top");
    }

    #[test]
    fn test_validate_rejects_relative_paths() {
        assert!(validate("/seq/1234").is_ok());
        assert!(validate("seq/1234").is_err());
        assert!(validate("/seq/../etc").is_err());
        assert!(validate("").is_err());
    }

    #[test]
    fn test_is_within() {
        assert!(is_within("/seq/1234/a.cram", "/seq/1234"));
        assert!(is_within("/seq/1234", "/seq/1234/"));
        assert!(!is_within("/seq/12345/a.cram", "/seq/1234"));
        assert!(is_within("/seq", "/"));
    }
}
