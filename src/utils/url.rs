//! Small path and URL helpers shared by the compiler and the resolver.
use url::Url;

/// Split a request target into its path and raw query (without the `?`).
pub fn split_path_query(target: &str) -> (&str, &str) {
    match target.split_once('?') {
        Some((path, query)) => (path, query),
        None => (target, ""),
    }
}

/// True when the path portion of `target` needs normalizing: a repeated
/// separator or a backslash anywhere before the query.
pub fn needs_slash_normalization(target: &str) -> bool {
    let (path, _) = split_path_query(target);
    path.contains("//") || path.contains('\\')
}

/// Convert backslashes to forward slashes and collapse repeated separators
/// in the path portion. The query (if any) is kept verbatim.
pub fn normalize_repeated_slashes(target: &str) -> String {
    let (path, query) = split_path_query(target);
    let mut normalized = String::with_capacity(path.len());
    let mut previous_slash = false;
    for c in path.chars() {
        let c = if c == '\\' { '/' } else { c };
        if c == '/' {
            if previous_slash {
                continue;
            }
            previous_slash = true;
        } else {
            previous_slash = false;
        }
        normalized.push(c);
    }
    if target.contains('?') {
        normalized.push('?');
        normalized.push_str(query);
    }
    normalized
}

/// Whether `path` equals `prefix` or continues it at a segment boundary.
pub fn has_path_prefix(path: &str, prefix: &str) -> bool {
    if prefix.is_empty() {
        return true;
    }
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// Remove `prefix` from `path`, yielding `/` when nothing remains.
pub fn strip_path_prefix<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    if !has_path_prefix(path, prefix) {
        return None;
    }
    let rest = &path[prefix.len()..];
    Some(if rest.is_empty() { "/" } else { rest })
}

/// Prepend `prefix` to `path`; `/` under a prefix becomes the bare prefix.
pub fn add_path_prefix(path: &str, prefix: &str) -> String {
    if prefix.is_empty() {
        return path.to_string();
    }
    if path == "/" {
        return prefix.to_string();
    }
    format!("{prefix}{path}")
}

/// Whether the value is an absolute URL carrying its own scheme.
pub fn is_absolute_url(value: &str) -> bool {
    Url::parse(value).is_ok()
}

/// Resolve `value` against `base`; same-origin results are returned as
/// `path?query#fragment`, foreign ones as the full absolute URL.
pub fn relativize(value: &str, base: &str) -> Result<String, url::ParseError> {
    let base = Url::parse(base)?;
    let target = base.join(value)?;
    if target.origin() != base.origin() {
        return Ok(target.to_string());
    }
    let mut relative = target.path().to_string();
    if let Some(query) = target.query() {
        relative.push('?');
        relative.push_str(query);
    }
    if let Some(fragment) = target.fragment() {
        relative.push('#');
        relative.push_str(fragment);
    }
    Ok(relative)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_backslashes_and_repeats() {
        assert_eq!(normalize_repeated_slashes("//a\\\\b///c"), "/a/b/c");
        assert_eq!(normalize_repeated_slashes("/a//b?next=//x"), "/a/b?next=//x");
        assert!(needs_slash_normalization("/a\\b"));
        assert!(!needs_slash_normalization("/a/b?x=//"));
    }

    #[test]
    fn prefix_helpers_respect_segment_boundaries() {
        assert!(has_path_prefix("/docs/a", "/docs"));
        assert!(!has_path_prefix("/docsa", "/docs"));
        assert_eq!(strip_path_prefix("/docs", "/docs"), Some("/"));
        assert_eq!(strip_path_prefix("/other", "/docs"), None);
        assert_eq!(add_path_prefix("/", "/docs"), "/docs");
        assert_eq!(add_path_prefix("/a", ""), "/a");
    }

    #[test]
    fn relativize_keeps_foreign_origins_absolute() {
        assert_eq!(
            relativize("https://host/new?a=1", "https://host/old").unwrap(),
            "/new?a=1"
        );
        assert_eq!(
            relativize("https://elsewhere/new", "https://host/old").unwrap(),
            "https://elsewhere/new"
        );
        assert_eq!(relativize("/rel#top", "http://h:3000/x").unwrap(), "/rel#top");
    }
}
