//! Remote path helpers shared by the UI side and the host

/// Absolute form with a single leading slash and no repeated separators.
pub fn normalize(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    format!("/{}", segments.join("/"))
}

/// Encode URI path - encode each segment individually, keep / as separator
pub fn encode_uri_path(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Storage endpoint for a remote path, e.g. `/fs/a/b%20c.txt`.
pub fn fs_endpoint(path: &str) -> String {
    format!("/fs{}", encode_uri_path(&normalize(path)))
}
