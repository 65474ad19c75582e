//! Listens on the server's TCP port, accepts clients, and hands each
//! accepted socket to a reactor round-robin.

use std::net::{SocketAddr, TcpListener};
use std::os::unix::io::{AsRawFd, FromRawFd};

use socket2::{Domain, Protocol, Socket, Type};

use crate::reactor::{PendingConn, Reactor};

const SOCKET_BUFFER_SIZE: usize = 4 * 1024 * 1024;
pub const LISTEN_BACKLOG: i32 = 12;

pub struct Acceptor {
    listener: TcpListener,
    reactors: Vec<Reactor>,
}

impl Acceptor {
    pub fn bind(host: &str, port: u16, reactors: Vec<Reactor>) -> std::io::Result<Self> {
        let addr: SocketAddr = format!("{host}:{port}")
            .parse()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&addr.into())?;
        socket.listen(LISTEN_BACKLOG)?;

        Ok(Self { listener: socket.into(), reactors })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Blocks accepting connections forever, round-robining each to
    /// `reactors[i % N]`. Accept failures are logged and ignored.
    pub fn run(self) -> ! {
        let mut next_reactor = 0usize;
        loop {
            match self.listener.accept() {
                Ok((stream, peer_addr)) => {
                    if let Err(e) = configure_accepted_socket(&stream) {
                        proxy_log::errors!("failed to configure accepted socket: {e}");
                        continue;
                    }

                    let reactor = &self.reactors[next_reactor % self.reactors.len()];
                    next_reactor = next_reactor.wrapping_add(1);
                    reactor.hand_off(PendingConn { stream, peer_addr });
                    proxy_log::info!("accepted connection from {peer_addr}");
                }
                Err(e) => {
                    proxy_log::errors!("accept failed: {e}");
                }
            }
        }
    }
}

fn configure_accepted_socket(stream: &std::net::TcpStream) -> std::io::Result<()> {
    stream.set_nonblocking(true)?;

    // SAFETY: `sock` borrows `stream`'s fd for the duration of this call
    // and is forgotten before returning, so the fd is never double-closed.
    let sock = unsafe { Socket::from_raw_fd(stream.as_raw_fd()) };
    let result = sock
        .set_recv_buffer_size(SOCKET_BUFFER_SIZE)
        .and_then(|_| sock.set_send_buffer_size(SOCKET_BUFFER_SIZE));
    std::mem::forget(sock);
    result
}
