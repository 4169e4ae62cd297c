// src/main.rs
use clap::Parser;
use snappic::config::{Args, Config};
use snappic::db::Store;
use snappic::server::run_server;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> std::io::Result<()> {
    init_logging();

    let args = Args::parse();
    let config = Arc::new(Config::from(&args));
    let store = Store::shared(&config.data_file);

    let listener = TcpListener::bind(args.addr()).await?;
    run_server(listener, store, config).await
}

fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("{}=info,tower_http=info", env!("CARGO_CRATE_NAME")).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
