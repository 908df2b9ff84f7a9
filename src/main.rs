use std::net::TcpListener;

use anyhow::Context;
use clap::Parser;
use log::{info, warn};

use mesh_gdbserver::config::Config;
use mesh_gdbserver::server::GdbServer;
use mesh_gdbserver::target::sim::SimMesh;

fn init_logging(cfg: &Config) {
    let mut builder = pretty_env_logger::formatted_builder();
    match std::env::var("RUST_LOG") {
        Ok(filters) => {
            builder.parse_filters(&filters);
        }
        Err(_) => {
            builder.filter_level(log::LevelFilter::Info);
        }
    }
    // The category flags open their log targets all the way up.
    for category in &cfg.verbose {
        builder.filter_module(category.target(), log::LevelFilter::Trace);
    }
    builder.init();
}

fn main() -> anyhow::Result<()> {
    let cfg = Config::parse();
    init_logging(&cfg);

    let listener = TcpListener::bind(("0.0.0.0", cfg.port))
        .with_context(|| format!("cannot listen on port {}", cfg.port))?;
    info!("listening for GDB on port {}", cfg.port);

    loop {
        let (stream, peer) = listener.accept().context("accept failed")?;
        info!("client connected from {}", peer);

        // Without a hardware transport the built-in simulator backs the
        // session; a fresh mesh per connection.
        let target = SimMesh::new(cfg.rows, cfg.cols);
        let mut server = GdbServer::new(stream, target, cfg.clone())
            .context("could not set up the session")?;
        match server.serve() {
            Ok(end) => info!("session ended: {:?}", end),
            Err(e) => warn!("session aborted: {}", e),
        }
    }
}
