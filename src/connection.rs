//! Per-socket connection state machine: `COMMAND` mode parses line-terminated
//! commands out of a 4096-byte buffer; `UPLOAD` mode feeds every received
//! byte straight into the active upload session.

use std::io::Write;
use std::net::SocketAddr;
use std::sync::Arc;

use mio::net::TcpStream;

use crate::session::Session;
use crate::writer_pool::PackQueue;

pub const CMD_BUFFER_SIZE: usize = 4096;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ConnMode {
    Command,
    Upload,
}

/// What the reactor should do with a connection after a read.
pub enum ReadOutcome {
    /// Keep the connection registered; no reply needed yet.
    Continue,
    /// Close the connection after the current write finishes.
    Close,
}

pub struct Connection {
    pub stream: TcpStream,
    pub peer_addr: SocketAddr,
    pub mode: ConnMode,
    cmd_buf: Vec<u8>,
    upload: Option<Session>,
}

impl Connection {
    pub fn new(stream: TcpStream, peer_addr: SocketAddr) -> Self {
        Self { stream, peer_addr, mode: ConnMode::Command, cmd_buf: Vec::new(), upload: None }
    }

    /// Feeds newly-read bytes into whichever mode the connection is in.
    pub fn on_readable(
        &mut self,
        data: &[u8],
        allowed_roots: &[String],
        queue: &Arc<PackQueue>,
    ) -> ReadOutcome {
        match self.mode {
            ConnMode::Command => self.on_command_bytes(data, allowed_roots, queue),
            ConnMode::Upload => self.on_upload_bytes(data),
        }
    }

    fn on_command_bytes(
        &mut self,
        data: &[u8],
        allowed_roots: &[String],
        queue: &Arc<PackQueue>,
    ) -> ReadOutcome {
        self.cmd_buf.extend_from_slice(data);
        if self.cmd_buf.len() > CMD_BUFFER_SIZE {
            self.cmd_buf.truncate(CMD_BUFFER_SIZE);
        }

        let Some(newline_pos) = self.cmd_buf.iter().position(|&b| b == b'\n') else {
            return ReadOutcome::Continue;
        };

        let line = String::from_utf8_lossy(&self.cmd_buf[..newline_pos]).trim().to_string();
        self.cmd_buf.drain(..=newline_pos);

        self.dispatch_command(&line, allowed_roots, queue)
    }

    fn dispatch_command(
        &mut self,
        line: &str,
        allowed_roots: &[String],
        queue: &Arc<PackQueue>,
    ) -> ReadOutcome {
        let mut parts = line.splitn(2, ' ');
        let cmd = parts.next().unwrap_or("");
        let args = parts.next().unwrap_or("").trim();

        match cmd {
            "SHUTDOWN" => {
                if self.peer_addr.ip().is_loopback() {
                    let _ = self.stream.write_all(b"OK\n");
                    proxy_log::info!("shutdown requested by {}", self.peer_addr);
                    std::process::exit(0);
                } else {
                    let _ = self.stream.write_all(b"ERROR: Unauthorized\n");
                    proxy_log::warn!("rejected SHUTDOWN from non-loopback peer {}", self.peer_addr);
                    ReadOutcome::Close
                }
            }
            "UPLOAD_V2" => self.start_upload_v2(args, allowed_roots, queue),
            "UPLOAD" => {
                // Legacy single-shot upload is out of scope; acknowledge and close
                // rather than silently hanging the client.
                let _ = self.stream.write_all(b"ERROR: Unknown command\n");
                ReadOutcome::Close
            }
            _ => {
                let _ = self.stream.write_all(b"ERROR: Unknown command\n");
                ReadOutcome::Close
            }
        }
    }

    fn start_upload_v2(
        &mut self,
        dest_path: &str,
        allowed_roots: &[String],
        queue: &Arc<PackQueue>,
    ) -> ReadOutcome {
        if !crate::sanitize::is_path_allowed(dest_path, allowed_roots) {
            let _ = self.stream.write_all(b"ERROR: Unauthorized\n");
            proxy_log::warn!("rejected UPLOAD_V2 destination {dest_path}");
            return ReadOutcome::Close;
        }

        match Session::create(dest_path.into(), Arc::clone(queue)) {
            Ok(session) => {
                self.upload = Some(session);
                self.mode = ConnMode::Upload;
                let _ = self.stream.write_all(b"READY\n");
                proxy_log::info!("upload session started for {} -> {dest_path}", self.peer_addr);
                ReadOutcome::Continue
            }
            Err(e) => {
                proxy_log::errors!("failed to start upload session: {e}");
                let _ = self.stream.write_all(b"ERROR: Upload init failed\n");
                ReadOutcome::Close
            }
        }
    }

    fn on_upload_bytes(&mut self, data: &[u8]) -> ReadOutcome {
        let Some(session) = self.upload.as_mut() else {
            return ReadOutcome::Close;
        };

        match session.feed(data) {
            Ok(false) => ReadOutcome::Continue,
            Ok(true) => {
                let session = self.upload.take().unwrap();
                let (files, bytes) = session.destroy();
                let reply = format!("SUCCESS {files} {bytes}\n");
                let _ = self.stream.write_all(reply.as_bytes());
                proxy_log::info!(
                    "upload from {} complete: {files} files, {bytes} bytes",
                    self.peer_addr
                );
                ReadOutcome::Close
            }
            Err(e) => {
                proxy_log::warn!("upload from {} failed: {e}", self.peer_addr);
                if let Some(session) = self.upload.take() {
                    session.destroy();
                }
                let _ = self.stream.write_all(b"ERROR: Upload failed\n");
                ReadOutcome::Close
            }
        }
    }
}
