//! Path sanitization: the only place that decides whether a client-supplied
//! path escapes its root.

/// Normalizes an untrusted relative path into a canonical forward-slash
/// relative path, or returns `None` if it resolves to nothing (e.g. `..`
/// popping past the root).
///
/// Rules, applied in order: strip a leading `X:` drive prefix, normalize
/// backslashes to forward slashes, split on `/`, drop empty and `.`
/// segments, pop the last accepted segment on `..`.
pub fn sanitize_relative_path(path: &str) -> Option<String> {
    let stripped = strip_drive_prefix(path);
    let normalized = stripped.replace('\\', "/");

    let mut segments: Vec<&str> = Vec::new();
    for segment in normalized.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                // A `..` with nothing to pop would climb above the root
                // entirely; reject the whole path rather than silently
                // dropping just the excess `..`.
                if segments.pop().is_none() {
                    return None;
                }
            }
            s => segments.push(s),
        }
    }

    if segments.is_empty() {
        return None;
    }

    Some(segments.join("/"))
}

fn strip_drive_prefix(path: &str) -> &str {
    let bytes = path.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        &path[2..]
    } else {
        path
    }
}

/// Validates a client-supplied absolute path for commands that operate
/// directly on the filesystem (`UPLOAD_V2` destinations, `CREATE_PATH`, …):
/// it must sit under a whitelisted root and contain no `..` substring.
pub fn is_path_allowed(path: &str, allowed_roots: &[String]) -> bool {
    if path.contains("..") {
        return false;
    }
    allowed_roots.iter().any(|root| {
        let root = root.trim_end_matches('/');
        path == root || path.starts_with(&format!("{root}/"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_relative_path_unchanged() {
        assert_eq!(sanitize_relative_path("a.bin"), Some("a.bin".to_string()));
        assert_eq!(
            sanitize_relative_path("dir/a.bin"),
            Some("dir/a.bin".to_string())
        );
    }

    #[test]
    fn test_backslashes_normalized() {
        assert_eq!(
            sanitize_relative_path("dir\\sub\\a.bin"),
            Some("dir/sub/a.bin".to_string())
        );
    }

    #[test]
    fn test_drive_prefix_stripped() {
        assert_eq!(
            sanitize_relative_path("C:\\games\\a.bin"),
            Some("games/a.bin".to_string())
        );
    }

    #[test]
    fn test_dot_segments_dropped() {
        assert_eq!(
            sanitize_relative_path("./a/./b.bin"),
            Some("a/b.bin".to_string())
        );
    }

    #[test]
    fn test_dotdot_pops_previous_segment() {
        assert_eq!(
            sanitize_relative_path("a/b/../c.bin"),
            Some("a/c.bin".to_string())
        );
    }

    #[test]
    fn test_dotdot_beyond_root_rejected() {
        assert_eq!(sanitize_relative_path("../../etc/passwd"), None);
        assert_eq!(sanitize_relative_path(".."), None);
    }

    #[test]
    fn test_empty_path_rejected() {
        assert_eq!(sanitize_relative_path(""), None);
        assert_eq!(sanitize_relative_path("."), None);
    }

    #[test]
    fn test_allowed_absolute_path() {
        let roots = vec!["/data".to_string()];
        assert!(is_path_allowed("/data/games/demo", &roots));
        assert!(is_path_allowed("/data", &roots));
    }

    #[test]
    fn test_rejects_dotdot_in_absolute_path() {
        let roots = vec!["/data".to_string()];
        assert!(!is_path_allowed("/data/../etc/passwd", &roots));
    }

    #[test]
    fn test_rejects_path_outside_whitelist() {
        let roots = vec!["/data".to_string()];
        assert!(!is_path_allowed("/etc/passwd", &roots));
        assert!(!is_path_allowed("/data2/foo", &roots));
    }
}
