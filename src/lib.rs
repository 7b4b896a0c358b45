//! wireline: a line-delimited TCP message framework.
//!
//! A server accepts connections, splits each byte stream into delimited
//! text messages, and dispatches them to registered command handlers;
//! clients connect, send messages, and read responses. Payloads are opaque
//! strings; any application schema lives above this crate.
//!
//! ```no_run
//! use wireline::{Client, HandlerRegistry, Message, Request, Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> wireline::Result<()> {
//!     let mut registry = HandlerRegistry::new();
//!     registry.register("ping", |_req: &Request| Some(Message::from("PONG")));
//!
//!     let server = Server::bind(ServerConfig::default(), registry).await?;
//!     let addr = server.local_addr()?;
//!     let handle = server.handle();
//!     tokio::spawn(server.run());
//!
//!     let mut client = Client::connect(addr.to_string()).await?;
//!     assert_eq!(client.request("PING").await?, "PONG");
//!
//!     handle.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod connection;
pub mod error;
pub mod frame;
pub mod message;
pub mod registry;
pub mod server;
pub mod tracker;

pub use client::{Client, ClientOptions};
pub use connection::{ConnState, Connection};
pub use error::{Error, Result};
pub use frame::{Framer, DEFAULT_DELIMITER, DEFAULT_MAX_FRAME_LEN};
pub use message::Message;
pub use registry::{Handler, HandlerRegistry, Request};
pub use server::{Server, ServerConfig, ServerHandle};
pub use tracker::{ConnHandle, ConnectionTracker};
