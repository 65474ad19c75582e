pub mod acceptor;
pub mod config;
pub mod connection;
pub mod error;
pub mod extract;
pub mod frame;
pub mod pack;
pub mod prelude;
pub mod reactor;
pub mod sanitize;
pub mod session;
pub mod writer_pool;
