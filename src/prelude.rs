pub use crate::config::AppConfig;
pub use crate::error::{Error, Result};

pub use crate::acceptor::Acceptor;
pub use crate::connection::Connection;
pub use crate::extract::{extract, ArchiveDecoder, ExtractOpts, ExtractStatus, Preset};
pub use crate::frame::{FrameEvent, FrameParser};
pub use crate::reactor::Reactor;
pub use crate::sanitize::{is_path_allowed, sanitize_relative_path};
pub use crate::session::Session;
pub use crate::writer_pool::{PackQueue, WriterPool};

pub use proxy_log::{debug, errors, info, trace, warn};

pub use std::io::{Read, Write};
pub use std::net::SocketAddr;
pub use std::path::{Path, PathBuf};
pub use std::sync::{Arc, Mutex};
pub use std::time::{Duration, Instant};

pub const CMD_BUFFER_SIZE: usize = 4096;
pub const MAX_PACK_BODY: u64 = 128 * 1024 * 1024;
pub const PACK_QUEUE_DEPTH: usize = 4;
pub const DISK_WORKER_COUNT: usize = 4;
pub const REACTOR_COUNT: usize = 2;
