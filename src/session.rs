//! Upload session: binds a client's byte stream to a destination root and
//! the writer pool. Grounded on `UploadSession`/`upload_session_*` in the
//! original transfer daemon.

use std::fs::File;
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex};

use crate::error::{Error, Result};
use crate::frame::{FrameEvent, FrameParser};
use crate::pack;
use crate::writer_pool::{PackJob, PackQueue};

/// The mutable state a session shares with the writer pool. Guarded by
/// `ConnState::inner`'s mutex for the whole duration of a write — the same
/// discipline `write_pack_locked` uses.
pub struct SessionInner {
    pub dest_root: PathBuf,
    pub dir_cache: Option<PathBuf>,
    pub current_file: Option<File>,
    pub current_rel_path: Option<String>,
    pub current_full_path: Option<PathBuf>,
    pub total_bytes: u64,
    pub total_files: u64,
    pub next_seq: u64,
    pub enqueue_seq: u64,
    pub pending: u64,
}

pub struct ConnState {
    pub inner: Mutex<SessionInner>,
    pub cond: Condvar,
}

pub type SessionHandle = Arc<ConnState>;

/// Public contract: `create`, `feed`, `stats`, `destroy`.
pub struct Session {
    state: SessionHandle,
    queue: Arc<PackQueue>,
    parser: FrameParser,
    error: bool,
}

impl Session {
    /// Creates the destination directory (recursive, mode 0777); fails if
    /// the path cannot be created.
    pub fn create(dest_root: PathBuf, queue: Arc<PackQueue>) -> Result<Self> {
        pack::mkdir_recursive(&dest_root).map_err(Error::FilesystemError)?;

        let inner = SessionInner {
            dest_root,
            dir_cache: None,
            current_file: None,
            current_rel_path: None,
            current_full_path: None,
            total_bytes: 0,
            total_files: 0,
            next_seq: 0,
            enqueue_seq: 0,
            pending: 0,
        };

        Ok(Self {
            state: Arc::new(ConnState { inner: Mutex::new(inner), cond: Condvar::new() }),
            queue,
            parser: FrameParser::new(),
            error: false,
        })
    }

    /// Advances the frame parser with `data`; on each completed PACK,
    /// enqueues a job (blocking under backpressure); on FINISH, returns
    /// `done = true`. Multiple frames per call are handled.
    pub fn feed(&mut self, data: &[u8]) -> Result<bool> {
        if self.error {
            return Err(Error::MalformedFrame("session already errored".to_string()));
        }

        let mut offset = 0;
        while offset < data.len() {
            match self.parser.feed(data, &mut offset) {
                FrameEvent::NeedMore => {
                    if self.parser.is_errored() {
                        self.error = true;
                        return Err(Error::MalformedFrame(
                            "invalid magic or oversized body".to_string(),
                        ));
                    }
                }
                FrameEvent::Pack => {
                    let body = self.parser.take_body();
                    self.enqueue(body)?;
                }
                FrameEvent::Finish => return Ok(true),
            }
        }

        Ok(false)
    }

    fn enqueue(&self, data: Vec<u8>) -> Result<()> {
        let seq = {
            let mut inner = self.state.inner.lock().unwrap();
            let seq = inner.enqueue_seq;
            inner.enqueue_seq += 1;
            inner.pending += 1;
            seq
        };

        let job = PackJob { data, state: Arc::clone(&self.state), seq };
        self.queue.push(job).map_err(|_| Error::QueueClosed)
    }

    /// Test/bench helper exposing the raw enqueue path without going
    /// through the frame parser.
    #[doc(hidden)]
    pub fn enqueue_raw(&self, data: Vec<u8>) -> Result<()> {
        self.enqueue(data)
    }

    /// Test/bench helper: blocks until all enqueued jobs have been applied,
    /// without closing the currently-open file.
    #[doc(hidden)]
    pub fn wait_drained(&self) {
        let mut inner = self.state.inner.lock().unwrap();
        while inner.pending > 0 {
            inner = self.state.cond.wait(inner).unwrap();
        }
    }

    pub fn stats(&self) -> (u64, u64) {
        let inner = self.state.inner.lock().unwrap();
        (inner.total_files, inner.total_bytes)
    }

    /// Waits for `pending == 0`, closes any still-open file handle
    /// (`chmod 0777`), and returns final stats.
    pub fn destroy(self) -> (u64, u64) {
        let mut inner = self.state.inner.lock().unwrap();
        while inner.pending > 0 {
            inner = self.state.cond.wait(inner).unwrap();
        }
        pack::close_final_file(&mut inner);
        (inner.total_files, inner.total_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FRAME_FINISH, FRAME_PACK, HEADER_LEN, MAGIC_FTX1};
    use crate::writer_pool::WriterPool;
    use tempfile::tempdir;

    fn header(frame_type: u8, body_len: u64) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..4].copy_from_slice(&MAGIC_FTX1.to_le_bytes());
        buf[4] = frame_type;
        buf[8..16].copy_from_slice(&body_len.to_le_bytes());
        buf
    }

    fn pack_body(path: &str, data: &[u8]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&1u32.to_le_bytes());
        body.extend_from_slice(&(path.len() as u16).to_le_bytes());
        body.extend_from_slice(path.as_bytes());
        body.extend_from_slice(&(data.len() as u64).to_le_bytes());
        body.extend_from_slice(data);
        body
    }

    #[test]
    fn test_single_file_upload_round_trip() {
        let pool = WriterPool::start(4, 4);
        let dir = tempdir().unwrap();
        let mut session = Session::create(dir.path().to_path_buf(), pool.queue()).unwrap();

        let body = pack_body("a.bin", b"HELLO");
        let mut stream = header(FRAME_PACK, body.len() as u64).to_vec();
        stream.extend_from_slice(&body);
        stream.extend_from_slice(&header(FRAME_FINISH, 0));

        let done = session.feed(&stream).unwrap();
        assert!(done);

        let (files, bytes) = session.destroy();
        assert_eq!(files, 1);
        assert_eq!(bytes, 5);
        assert_eq!(std::fs::read(dir.path().join("a.bin")).unwrap(), b"HELLO");
    }

    #[test]
    fn test_malformed_magic_errors_session() {
        let pool = WriterPool::start(4, 4);
        let dir = tempdir().unwrap();
        let mut session = Session::create(dir.path().to_path_buf(), pool.queue()).unwrap();

        let mut stream = [0u8; HEADER_LEN];
        stream[0..4].copy_from_slice(&0xDEADBEEFu32.to_le_bytes());

        let result = session.feed(&stream);
        assert!(result.is_err());
    }

    #[test]
    fn test_path_traversal_record_is_skipped() {
        let pool = WriterPool::start(4, 4);
        let dir = tempdir().unwrap();
        let mut session = Session::create(dir.path().to_path_buf(), pool.queue()).unwrap();

        // `apply_record` sanitizes every record path itself; a record that
        // tries to climb above `dest_root` must be dropped there, with no
        // file written anywhere and no counters bumped.
        let body = pack_body("../../escape.bin", b"pwned");
        let mut stream = header(FRAME_PACK, body.len() as u64).to_vec();
        stream.extend_from_slice(&body);
        stream.extend_from_slice(&header(FRAME_FINISH, 0));

        session.feed(&stream).unwrap();
        let (files, bytes) = session.destroy();
        assert_eq!(files, 0);
        assert_eq!(bytes, 0);
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
    }
}
