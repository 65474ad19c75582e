use std::fs;
use std::sync::Arc;

use ftxd::acceptor::Acceptor;
use ftxd::config::{display_config, validate_config, AppConfig, FromYaml};
use ftxd::reactor::Reactor;
use ftxd::writer_pool::WriterPool;

fn main() {
    let config_path = parse_config_flag();
    let config = load_config(&config_path);

    if let Err(msg) = validate_config(&config) {
        proxy_log::errors!("invalid configuration: {msg}");
        std::process::exit(1);
    }

    display_config(&config);

    if let Some(pid_file) = &config.pid_file {
        if let Err(e) = fs::write(pid_file, std::process::id().to_string()) {
            proxy_log::warn!("failed to write pid file {pid_file}: {e}");
        }
    }

    let pool = WriterPool::start(config.writers, config.queue_depth);
    let allowed_roots = Arc::new(config.allowed_roots.clone());

    let reactors: Vec<Reactor> = (0..config.reactors)
        .map(|id| Reactor::spawn(id, Arc::clone(&allowed_roots), pool.queue()))
        .collect();

    proxy_log::info!(
        "ftxd listening on {}:{} with {} reactors, {} writers",
        config.listen.host,
        config.listen.port,
        config.reactors,
        config.writers
    );

    match Acceptor::bind(&config.listen.host, config.listen.port, reactors) {
        Ok(acceptor) => acceptor.run(),
        Err(e) => {
            proxy_log::errors!("failed to bind {}:{}: {e}", config.listen.host, config.listen.port);
            std::process::exit(1);
        }
    }
}

fn parse_config_flag() -> String {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            if let Some(path) = args.next() {
                return path;
            }
        }
    }
    "./ftxd.yaml".to_string()
}

fn load_config(path: &str) -> AppConfig {
    match fs::read_to_string(path) {
        Ok(contents) => match AppConfig::from_str(&contents) {
            Ok(config) => config,
            Err(e) => {
                proxy_log::errors!("failed to parse {path}: {e}");
                std::process::exit(1);
            }
        },
        Err(_) => {
            proxy_log::info!("no config file at {path}, using defaults");
            AppConfig::default()
        }
    }
}
