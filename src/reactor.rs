//! Non-blocking I/O multiplexer. N reactors share accepted clients
//! round-robin; each owns its connection set exclusively once drained from
//! the hand-off queue, and is only ever contacted cross-thread through that
//! queue plus a `Waker`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use mio::net::TcpStream;
use mio::{Events, Interest, Poll, Token, Waker};

use crate::connection::{Connection, ReadOutcome};
use crate::writer_pool::PackQueue;

const WAKE_TOKEN: Token = Token(usize::MAX);
const POLL_TIMEOUT: Duration = Duration::from_millis(100);
const READ_BUF_SIZE: usize = 64 * 1024;

pub struct PendingConn {
    pub stream: std::net::TcpStream,
    pub peer_addr: std::net::SocketAddr,
}

/// The hand-off queue and wakeup primitive the acceptor uses to deliver an
/// accepted socket onto this reactor's thread.
pub struct ReactorHandle {
    pending: Mutex<Vec<PendingConn>>,
    waker: Waker,
}

impl ReactorHandle {
    pub fn hand_off(&self, conn: PendingConn) {
        self.pending.lock().unwrap().push(conn);
        let _ = self.waker.wake();
    }
}

pub struct Reactor {
    pub handle: Arc<ReactorHandle>,
    thread: JoinHandle<()>,
}

impl Reactor {
    pub fn spawn(id: usize, allowed_roots: Arc<Vec<String>>, queue: Arc<PackQueue>) -> Self {
        let poll = Poll::new().expect("failed to create mio Poll");
        let waker =
            Waker::new(poll.registry(), WAKE_TOKEN).expect("failed to create reactor waker");

        let handle = Arc::new(ReactorHandle { pending: Mutex::new(Vec::new()), waker });

        let thread_handle = Arc::clone(&handle);
        let thread = thread::Builder::new()
            .name(format!("reactor-{id}"))
            .spawn(move || reactor_loop(poll, thread_handle, allowed_roots, queue))
            .expect("failed to spawn reactor thread");

        Self { handle, thread }
    }

    pub fn hand_off(&self, conn: PendingConn) {
        self.handle.hand_off(conn);
    }
}

fn reactor_loop(
    mut poll: Poll,
    handle: Arc<ReactorHandle>,
    allowed_roots: Arc<Vec<String>>,
    queue: Arc<PackQueue>,
) {
    let mut events = Events::with_capacity(128);
    let mut connections: HashMap<Token, Connection> = HashMap::new();
    let mut next_token = 0usize;
    let mut read_buf = [0u8; READ_BUF_SIZE];

    loop {
        if let Err(e) = poll.poll(&mut events, Some(POLL_TIMEOUT)) {
            if e.kind() == std::io::ErrorKind::Interrupted {
                continue;
            }
            proxy_log::errors!("reactor poll failed: {e}");
            continue;
        }

        let mut woken = false;
        for event in events.iter() {
            if event.token() == WAKE_TOKEN {
                woken = true;
                continue;
            }

            let token = event.token();
            let mut close = false;

            if event.is_readable() {
                close = drain_readable(&mut poll, &mut connections, token, &mut read_buf, &allowed_roots, &queue);
            }

            if close {
                if let Some(mut conn) = connections.remove(&token) {
                    let _ = poll.registry().deregister(&mut conn.stream);
                }
            }
        }

        if woken {
            drain_pending(&mut poll, &handle, &mut connections, &mut next_token);
        }
    }
}

fn drain_readable(
    _poll: &mut Poll,
    connections: &mut HashMap<Token, Connection>,
    token: Token,
    read_buf: &mut [u8],
    allowed_roots: &[String],
    queue: &Arc<PackQueue>,
) -> bool {
    use std::io::Read;

    let Some(conn) = connections.get_mut(&token) else { return false };

    loop {
        match conn.stream.read(read_buf) {
            Ok(0) => return true,
            Ok(n) => match conn.on_readable(&read_buf[..n], allowed_roots, queue) {
                ReadOutcome::Continue => continue,
                ReadOutcome::Close => return true,
            },
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return false,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(_) => return true,
        }
    }
}

fn drain_pending(
    poll: &mut Poll,
    handle: &Arc<ReactorHandle>,
    connections: &mut HashMap<Token, Connection>,
    next_token: &mut usize,
) {
    let mut pending = handle.pending.lock().unwrap();
    let taken: Vec<PendingConn> = pending.drain(..).collect();
    drop(pending);

    for item in taken {
        let mut stream = TcpStream::from_std(item.stream);
        let token = Token(*next_token);
        *next_token += 1;

        if poll
            .registry()
            .register(&mut stream, token, Interest::READABLE)
            .is_ok()
        {
            connections.insert(token, Connection::new(stream, item.peer_addr));
        }
    }
}
