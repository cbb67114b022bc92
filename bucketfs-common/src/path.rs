/// Resolve a relative path against the configured sub-path prefix.
///
/// Without a prefix (or with one that is only separators) the path is
/// returned unchanged. Otherwise the two are joined with exactly one `/`,
/// whatever separators either side already carries at the join point.
pub fn resolve(relative_path: &str, sub_path: Option<&str>) -> String {
    let prefix = match sub_path.map(|p| p.trim_end_matches('/')) {
        Some(p) if !p.is_empty() => p,
        _ => return relative_path.to_string(),
    };
    let path = relative_path.trim_start_matches('/');
    format!("{}/{}", prefix, path)
}

/// Join a public base URL and an object key with a single separator.
pub fn join_url(base_url: &str, key: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        key.trim_start_matches('/')
    )
}
