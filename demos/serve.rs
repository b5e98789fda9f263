//! Thin demonstration binary: loads configuration, installs a logger, and
//! runs the reactor until it exits or the process receives `SIGINT`.
//!
//! The library itself never touches argv, the environment, or a logging
//! sink directly; that wiring lives here, at the edge.

use std::path::PathBuf;

use hivewire::Config;

fn main() {
    let config = match std::env::args().nth(1) {
        Some(path) => Config::from_file(PathBuf::from(path)).unwrap_or_else(|err| {
            eprintln!("failed to load configuration: {err}");
            std::process::exit(1);
        }),
        None => Config::default(),
    };

    if config.log.enabled {
        env_logger::Builder::new()
            .filter_level(config.log.level)
            .init();
    }

    let mut reactor = match hivewire::Reactor::new(&config) {
        Ok(reactor) => reactor,
        Err(err) => {
            log::error!("failed to start server: {err}");
            std::process::exit(1);
        }
    };

    log::info!("listening on port {}", config.port);
    if let Err(err) = reactor.run() {
        log::error!("server loop exited with error: {err}");
        std::process::exit(1);
    }
}
