//! Pack decoder: walks a `PackBody` and applies its records to a session's
//! writer state. Grounded directly on `write_pack_locked` in the original
//! transfer daemon — every truncation/append/cache rule below mirrors it.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use crate::sanitize::sanitize_relative_path;
use crate::session::SessionInner;

/// Applies one decoded pack body to `inner`. Malformed trailing bytes (a
/// record whose declared lengths would overrun the body) silently truncate
/// decoding of the remainder of the pack, matching the source's `break`.
pub fn apply_pack(inner: &mut SessionInner, pack: &[u8]) {
    if pack.len() < 4 {
        return;
    }

    let record_count = u32::from_le_bytes(pack[0..4].try_into().unwrap());
    let mut offset = 4usize;

    for _ in 0..record_count {
        if offset + 2 > pack.len() {
            break;
        }
        let path_len = u16::from_le_bytes(pack[offset..offset + 2].try_into().unwrap()) as usize;
        offset += 2;

        if offset + path_len + 8 > pack.len() {
            break;
        }
        let rel_path = match std::str::from_utf8(&pack[offset..offset + path_len]) {
            Ok(s) => s.to_string(),
            Err(_) => break,
        };
        offset += path_len;

        let data_len =
            u64::from_le_bytes(pack[offset..offset + 8].try_into().unwrap()) as usize;
        offset += 8;

        if offset + data_len > pack.len() {
            break;
        }

        apply_record(inner, &rel_path, &pack[offset..offset + data_len]);
        offset += data_len;
    }
}

fn apply_record(inner: &mut SessionInner, rel_path: &str, data: &[u8]) {
    // A record whose path escapes `dest_root` (or resolves to nothing) is
    // dropped entirely: no file, no directory, no counters bumped. The
    // original's `write_pack_locked` has no such check; containment is
    // enforced here regardless.
    let Some(sanitized) = sanitize_relative_path(rel_path) else {
        proxy_log::warn!("dropping record with unsafe path {rel_path:?}");
        return;
    };
    let rel_path = sanitized.as_str();

    let full_path = inner.dest_root.join(rel_path);

    if let Some(parent) = full_path.parent() {
        mkdir_recursive_cached(inner, parent);
    }

    let same_path = inner.current_rel_path.as_deref() == Some(rel_path);

    if !same_path {
        close_current_file(inner);
        inner.current_rel_path = Some(rel_path.to_string());
        inner.current_full_path = Some(full_path.clone());

        match OpenOptions::new().write(true).create(true).truncate(true).open(&full_path) {
            Ok(file) => {
                inner.current_file = Some(file);
                inner.total_files += 1;
            }
            Err(e) => {
                proxy_log::errors!("failed to open {}: {e}", full_path.display());
                inner.current_file = None;
            }
        }
    } else if inner.current_file.is_none() {
        match OpenOptions::new().append(true).open(&full_path) {
            Ok(file) => inner.current_file = Some(file),
            Err(e) => proxy_log::errors!("failed to reopen {}: {e}", full_path.display()),
        }
    }

    if let Some(file) = inner.current_file.as_mut() {
        if let Err(e) = file.write_all(data) {
            proxy_log::errors!("write failed: {e}");
        } else {
            inner.total_bytes += data.len() as u64;
        }
    }
}

fn mkdir_recursive_cached(inner: &mut SessionInner, dir: &Path) {
    if inner.dir_cache.as_deref() == Some(dir) {
        return;
    }
    if let Err(e) = mkdir_recursive(dir) {
        proxy_log::errors!("mkdir_recursive({}) failed: {e}", dir.display());
        return;
    }
    inner.dir_cache = Some(dir.to_path_buf());
}

pub(crate) fn mkdir_recursive(dir: &Path) -> std::io::Result<()> {
    let mut built = PathBuf::new();
    for component in dir.components() {
        built.push(component);
        match fs::create_dir(&built) {
            Ok(()) => {
                let _ = fs::set_permissions(&built, fs::Permissions::from_mode(0o777));
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

fn close_current_file(inner: &mut SessionInner) {
    if inner.current_file.take().is_none() {
        return;
    }
    if let Some(path) = &inner.current_full_path {
        let _ = fs::set_permissions(path, fs::Permissions::from_mode(0o777));
    }
    inner.current_rel_path = None;
    inner.current_full_path = None;
}

/// Called from `Session::destroy` once all in-flight writes are applied.
pub fn close_final_file(inner: &mut SessionInner) {
    close_current_file(inner);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn new_inner(root: PathBuf) -> SessionInner {
        SessionInner {
            dest_root: root,
            dir_cache: None,
            current_file: None,
            current_rel_path: None,
            current_full_path: None,
            total_bytes: 0,
            total_files: 0,
            next_seq: 0,
            enqueue_seq: 0,
            pending: 0,
        }
    }

    fn build_pack(records: &[(&str, &[u8])]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(records.len() as u32).to_le_bytes());
        for (path, data) in records {
            buf.extend_from_slice(&(path.len() as u16).to_le_bytes());
            buf.extend_from_slice(path.as_bytes());
            buf.extend_from_slice(&(data.len() as u64).to_le_bytes());
            buf.extend_from_slice(data);
        }
        buf
    }

    #[test]
    fn test_single_record_writes_file() {
        let dir = tempdir().unwrap();
        let mut inner = new_inner(dir.path().to_path_buf());
        let pack = build_pack(&[("a.bin", b"HELLO")]);
        apply_pack(&mut inner, &pack);
        close_final_file(&mut inner);

        assert_eq!(inner.total_files, 1);
        assert_eq!(inner.total_bytes, 5);
        let contents = fs::read(dir.path().join("a.bin")).unwrap();
        assert_eq!(contents, b"HELLO");
    }

    #[test]
    fn test_repeated_path_appends() {
        let dir = tempdir().unwrap();
        let mut inner = new_inner(dir.path().to_path_buf());
        let pack = build_pack(&[("c", b"AA"), ("c", b"BB"), ("c", b"CC")]);
        apply_pack(&mut inner, &pack);
        close_final_file(&mut inner);

        assert_eq!(inner.total_files, 1);
        assert_eq!(inner.total_bytes, 6);
        let contents = fs::read(dir.path().join("c")).unwrap();
        assert_eq!(contents, b"AABBCC");
    }

    #[test]
    fn test_truncated_record_stops_decoding() {
        let dir = tempdir().unwrap();
        let mut inner = new_inner(dir.path().to_path_buf());
        let mut pack = build_pack(&[("a", b"AAAA")]);
        pack.truncate(pack.len() - 2); // chop off the last two data bytes
        apply_pack(&mut inner, &pack);

        // The first (truncated) record never completes, so nothing is written.
        assert_eq!(inner.total_files, 0);
        assert_eq!(inner.total_bytes, 0);
    }

    #[test]
    fn test_appended_record_beyond_declared_count_ignored() {
        let dir = tempdir().unwrap();
        let mut inner = new_inner(dir.path().to_path_buf());
        let mut pack = build_pack(&[("a", b"AA")]);
        // Manually lower the declared record_count to 0 while leaving the
        // record bytes present: decoding must stop immediately.
        pack[0..4].copy_from_slice(&0u32.to_le_bytes());
        apply_pack(&mut inner, &pack);

        assert_eq!(inner.total_files, 0);
    }

    #[test]
    fn test_traversal_record_is_dropped() {
        let dir = tempdir().unwrap();
        let mut inner = new_inner(dir.path().to_path_buf());
        let pack = build_pack(&[("../../escape.bin", b"pwned")]);
        apply_pack(&mut inner, &pack);
        close_final_file(&mut inner);

        assert_eq!(inner.total_files, 0);
        assert_eq!(inner.total_bytes, 0);
        assert!(fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[test]
    fn test_different_paths_close_previous_file() {
        let dir = tempdir().unwrap();
        let mut inner = new_inner(dir.path().to_path_buf());
        let pack = build_pack(&[("a", b"11"), ("b", b"22")]);
        apply_pack(&mut inner, &pack);
        close_final_file(&mut inner);

        assert_eq!(inner.total_files, 2);
        assert_eq!(fs::read(dir.path().join("a")).unwrap(), b"11");
        assert_eq!(fs::read(dir.path().join("b")).unwrap(), b"22");
    }
}
