//! wireline: a line-delimited TCP message server
//!
//! The framework lives in the library crate; this binary wires it up:
//! - Configuration via CLI arguments or TOML file
//! - Two example handlers: PING -> PONG and ECHO <body> -> <body>
//! - Clean shutdown on ctrl-c

mod config;

use config::Config;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;
use wireline::{HandlerRegistry, Message, Request, Server, ServerConfig};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        listen = %config.listen,
        max_connections = config.max_connections,
        delimiter = config.delimiter,
        max_frame_len = config.max_frame_len,
        "Starting wireline server"
    );

    tokio::runtime::Runtime::new()?.block_on(run(config))
}

async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let mut registry = HandlerRegistry::new();
    registry.register("ping", |req: &Request| {
        if req.body.is_empty() {
            Some(Message::from("PONG"))
        } else {
            Some(Message::new(format!("PONG {}", req.body)))
        }
    });
    registry.register("echo", |req: &Request| Some(Message::new(req.body.clone())));

    let server_config = ServerConfig {
        listen: config.listen,
        max_connections: config.max_connections,
        delimiter: config.delimiter,
        max_frame_len: config.max_frame_len,
        shutdown_grace: Duration::from_secs(config.shutdown_grace),
        deny_list: config.deny_list,
    };

    let server = Server::bind(server_config, registry).await?;
    let handle = server.handle();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received ctrl-c, shutting down");
            handle.shutdown().await;
        }
    });

    server.run().await?;
    Ok(())
}
