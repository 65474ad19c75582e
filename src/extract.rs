//! Archive extraction worker contract. Wraps a streaming archive decoder
//! (injected as a trait object, so this crate never vendors a RAR/ZIP
//! codec) with the progress/keep-alive/throttling protocol and the §4.A
//! path sanitizer. Grounded on `unrar_wrapper.cpp`'s `unrar_extract` and
//! `unrar_callback`.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::sanitize::sanitize_relative_path;

/// One throttling preset: how often to yield the CPU and how often to send
/// a keep-alive progress update, tuned so even `Turbo` avoids watchdog
/// termination on long extractions.
#[derive(Debug, Clone, Copy)]
pub struct ExtractOpts {
    pub sleep_every_bytes: u64,
    pub sleep_us: u64,
    pub keepalive_interval_sec: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preset {
    Safe,
    Fast,
    Turbo,
}

impl Preset {
    pub fn opts(self) -> ExtractOpts {
        match self {
            Preset::Safe => ExtractOpts {
                sleep_every_bytes: 1024 * 1024,
                sleep_us: 1000,
                keepalive_interval_sec: 5,
            },
            Preset::Fast => ExtractOpts {
                sleep_every_bytes: 8 * 1024 * 1024,
                sleep_us: 1000,
                keepalive_interval_sec: 10,
            },
            Preset::Turbo => ExtractOpts {
                sleep_every_bytes: 32 * 1024 * 1024,
                sleep_us: 0,
                keepalive_interval_sec: 10,
            },
        }
    }

    pub fn parse(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "fast" => Preset::Fast,
            "turbo" => Preset::Turbo,
            _ => Preset::Safe,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractStatus {
    Ok,
    Aborted,
    OpenError,
    ReadError,
    ExtractError,
    PasswordRequired,
}

#[derive(Debug, Clone)]
pub struct ScanInfo {
    pub file_count: u64,
    pub total_uncompressed_size: u64,
    /// Populated only when every entry shares the same top-level segment.
    pub common_root: Option<String>,
}

#[derive(Debug, Clone)]
pub struct EntryHeader {
    pub name: String,
    pub size: u64,
    pub is_directory: bool,
}

pub enum NextEntry {
    Entry(EntryHeader),
    EndOfArchive,
}

/// The decoder interface this wrapper drives. A real implementation backs
/// onto a third-party RAR/ZIP codec; nothing in this crate depends on one.
pub trait ArchiveDecoder {
    fn scan(&mut self) -> Result<ScanInfo>;
    fn read_header(&mut self) -> Result<NextEntry>;
    /// Reads the full body of the entry just returned by `read_header`.
    /// A `PasswordRequired`-flavored `Error::ArchivePassword` aborts
    /// immediately, matching `UCM_NEEDPASSWORD`.
    fn read_entry_data(&mut self) -> Result<Vec<u8>>;
}

/// `(filename, file_size, files_done, total_processed, total_size)` ->
/// non-zero return means abort.
pub type ProgressCallback<'a> = dyn FnMut(&str, u64, u64, u64, u64) -> bool + 'a;

const CALLBACK_CHUNK: u64 = 64 * 1024;

pub struct ExtractResult {
    pub status: ExtractStatus,
    pub file_count: u64,
    pub total_size: u64,
}

/// Extracts every entry of `archive` into `dest`. If `strip_root`, the
/// first path segment of each entry is removed before sanitization. Every
/// output path passes the sanitizer before being joined to `dest`; entries
/// that fail sanitization are skipped, not fatal.
pub fn extract(
    archive: &mut dyn ArchiveDecoder,
    dest: &Path,
    strip_root: bool,
    total_size_hint: u64,
    opts: ExtractOpts,
    progress: &mut ProgressCallback,
) -> Result<ExtractResult> {
    let mut files_done: u64 = 0;
    let mut total_processed: u64 = 0;
    let mut total_unpacked: u64 = 0;
    let mut progress_total_size = total_size_hint;
    let use_dynamic_total = total_size_hint == 0;

    let mut bytes_since_sleep: u64 = 0;
    let mut last_update = Instant::now();

    loop {
        let header = match archive.read_header()? {
            NextEntry::EndOfArchive => break,
            NextEntry::Entry(h) => h,
        };

        if use_dynamic_total {
            progress_total_size += header.size;
        }
        last_update = Instant::now();

        if progress(&header.name, header.size, files_done, total_processed, progress_total_size) {
            return Ok(ExtractResult { status: ExtractStatus::Aborted, file_count: files_done, total_size: total_unpacked });
        }

        let data = match archive.read_entry_data() {
            Ok(data) => data,
            Err(Error::ArchivePassword) => {
                return Ok(ExtractResult {
                    status: ExtractStatus::PasswordRequired,
                    file_count: files_done,
                    total_size: total_unpacked,
                });
            }
            Err(_) => {
                return Ok(ExtractResult {
                    status: ExtractStatus::ExtractError,
                    file_count: files_done,
                    total_size: total_unpacked,
                });
            }
        };

        let target_name = if strip_root { strip_first_segment(&header.name) } else { &header.name };

        let Some(sanitized) = sanitize_relative_path(target_name) else {
            continue; // skip entries that fail sanitization
        };

        if !header.is_directory {
            let full_dest = dest.join(&sanitized);
            if let Some(parent) = full_dest.parent() {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    proxy_log::errors!("failed to create {}: {e}", parent.display());
                    return Ok(ExtractResult { status: ExtractStatus::ExtractError, file_count: files_done, total_size: total_unpacked });
                }
            }

            let write_result = write_with_throttle(
                &full_dest,
                &data,
                opts,
                &mut bytes_since_sleep,
                &mut last_update,
                &header.name,
                header.size,
                files_done,
                &mut total_processed,
                progress_total_size,
                progress,
            );
            match write_result {
                Ok(true) => {
                    return Ok(ExtractResult { status: ExtractStatus::Aborted, file_count: files_done, total_size: total_unpacked });
                }
                Ok(false) => {}
                Err(e) => {
                    proxy_log::errors!("failed to write {}: {e}", full_dest.display());
                    return Ok(ExtractResult { status: ExtractStatus::ExtractError, file_count: files_done, total_size: total_unpacked });
                }
            }

            files_done += 1;
            total_unpacked += header.size;
        }
    }

    Ok(ExtractResult { status: ExtractStatus::Ok, file_count: files_done, total_size: total_unpacked })
}

#[allow(clippy::too_many_arguments)]
fn write_with_throttle(
    path: &PathBuf,
    data: &[u8],
    opts: ExtractOpts,
    bytes_since_sleep: &mut u64,
    last_update: &mut Instant,
    filename: &str,
    file_size: u64,
    files_done: u64,
    total_processed: &mut u64,
    progress_total_size: u64,
    progress: &mut ProgressCallback,
) -> std::io::Result<bool> {
    let mut file = std::fs::File::create(path)?;

    let mut offset = 0usize;
    while offset < data.len() {
        let take = (CALLBACK_CHUNK as usize).min(data.len() - offset);
        file.write_all(&data[offset..offset + take])?;
        offset += take;

        *total_processed += take as u64;
        *bytes_since_sleep += take as u64;

        if opts.keepalive_interval_sec > 0
            && last_update.elapsed() >= Duration::from_secs(opts.keepalive_interval_sec)
        {
            *last_update = Instant::now();
            if progress(filename, file_size, files_done, *total_processed, progress_total_size) {
                return Ok(true);
            }
        }

        if opts.sleep_every_bytes > 0 && opts.sleep_us > 0 && *bytes_since_sleep > opts.sleep_every_bytes {
            std::thread::sleep(Duration::from_micros(opts.sleep_us));
            *bytes_since_sleep = 0;
        }
    }

    Ok(false)
}

fn strip_first_segment(name: &str) -> &str {
    match name.find(['/', '\\']) {
        Some(idx) => &name[idx + 1..],
        None => name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    struct MockDecoder {
        entries: Vec<(EntryHeader, Vec<u8>)>,
        cursor: usize,
    }

    impl MockDecoder {
        fn new(entries: Vec<(&str, &[u8])>) -> Self {
            Self {
                entries: entries
                    .into_iter()
                    .map(|(name, data)| {
                        (
                            EntryHeader { name: name.to_string(), size: data.len() as u64, is_directory: false },
                            data.to_vec(),
                        )
                    })
                    .collect(),
                cursor: 0,
            }
        }
    }

    impl ArchiveDecoder for MockDecoder {
        fn scan(&mut self) -> Result<ScanInfo> {
            let total: u64 = self.entries.iter().map(|(h, _)| h.size).sum();
            Ok(ScanInfo { file_count: self.entries.len() as u64, total_uncompressed_size: total, common_root: None })
        }

        fn read_header(&mut self) -> Result<NextEntry> {
            if self.cursor >= self.entries.len() {
                return Ok(NextEntry::EndOfArchive);
            }
            Ok(NextEntry::Entry(self.entries[self.cursor].0.clone()))
        }

        fn read_entry_data(&mut self) -> Result<Vec<u8>> {
            let data = self.entries[self.cursor].1.clone();
            self.cursor += 1;
            Ok(data)
        }
    }

    #[test]
    fn test_extract_writes_all_entries() {
        let dir = tempdir().unwrap();
        let mut decoder = MockDecoder::new(vec![("a.txt", b"one"), ("sub/b.txt", b"two")]);
        let mut progress = |_: &str, _: u64, _: u64, _: u64, _: u64| false;

        let result = extract(&mut decoder, dir.path(), false, 0, Preset::Safe.opts(), &mut progress).unwrap();

        assert_eq!(result.status, ExtractStatus::Ok);
        assert_eq!(result.file_count, 2);
        assert_eq!(std::fs::read(dir.path().join("a.txt")).unwrap(), b"one");
        assert_eq!(std::fs::read(dir.path().join("sub/b.txt")).unwrap(), b"two");
    }

    #[test]
    fn test_strip_root_removes_top_level_segment() {
        let dir = tempdir().unwrap();
        let mut decoder = MockDecoder::new(vec![("Game/data/file.bin", b"x")]);
        let mut progress = |_: &str, _: u64, _: u64, _: u64, _: u64| false;

        extract(&mut decoder, dir.path(), true, 0, Preset::Safe.opts(), &mut progress).unwrap();

        assert!(dir.path().join("data/file.bin").exists());
    }

    #[test]
    fn test_traversal_entry_skipped_not_fatal() {
        let dir = tempdir().unwrap();
        let mut decoder = MockDecoder::new(vec![("../../etc/passwd", b"evil"), ("ok.txt", b"fine")]);
        let mut progress = |_: &str, _: u64, _: u64, _: u64, _: u64| false;

        let result = extract(&mut decoder, dir.path(), false, 0, Preset::Safe.opts(), &mut progress).unwrap();

        assert_eq!(result.status, ExtractStatus::Ok);
        assert_eq!(result.file_count, 1);
        assert!(dir.path().join("ok.txt").exists());
    }

    #[test]
    fn test_abort_via_progress_callback() {
        let dir = tempdir().unwrap();
        let mut decoder = MockDecoder::new(vec![("a.txt", b"one"), ("b.txt", b"two")]);
        let mut progress = |name: &str, _: u64, _: u64, _: u64, _: u64| name == "b.txt";

        let result = extract(&mut decoder, dir.path(), false, 0, Preset::Safe.opts(), &mut progress).unwrap();

        assert_eq!(result.status, ExtractStatus::Aborted);
        assert_eq!(result.file_count, 1);
    }

    #[test]
    fn test_preset_constants() {
        let safe = Preset::Safe.opts();
        assert_eq!(safe.sleep_every_bytes, 1024 * 1024);
        assert_eq!(safe.keepalive_interval_sec, 5);

        let turbo = Preset::Turbo.opts();
        assert_eq!(turbo.sleep_us, 0);
        assert_eq!(turbo.sleep_every_bytes, 32 * 1024 * 1024);
    }
}
