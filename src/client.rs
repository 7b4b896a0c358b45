//! Outbound client session.

use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::frame::{Framer, DEFAULT_DELIMITER, DEFAULT_MAX_FRAME_LEN};
use crate::message::Message;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

/// Client-side timeouts and framing options.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Bounded wait for the TCP connect.
    pub connect_timeout: Duration,
    /// Bounded wait for a response in [`Client::request`].
    pub response_timeout: Duration,
    /// Frame delimiter byte; must match the server's.
    pub delimiter: u8,
    /// Maximum payload length per frame.
    pub max_frame_len: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        ClientOptions {
            connect_timeout: Duration::from_secs(4),
            response_timeout: Duration::from_secs(2),
            delimiter: DEFAULT_DELIMITER,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

/// A framed connection to a server.
pub struct Client {
    conn: Connection<TcpStream>,
    options: ClientOptions,
}

impl Client {
    /// Connect with default options.
    pub async fn connect(addr: impl Into<String>) -> Result<Client> {
        Client::connect_with(addr, ClientOptions::default()).await
    }

    /// Connect with explicit options. Fails with `Error::Connect` on
    /// refusal or when the connect timeout elapses.
    pub async fn connect_with(addr: impl Into<String>, options: ClientOptions) -> Result<Client> {
        let addr = addr.into();
        let stream = match timeout(options.connect_timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(Error::Connect {
                    addr,
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                return Err(Error::Connect {
                    addr,
                    reason: format!("no connection within {:?}", options.connect_timeout),
                })
            }
        };
        debug!(addr = %addr, "Connected");

        let framer = Framer::new(options.delimiter, options.max_frame_len);
        Ok(Client {
            conn: Connection::with_framer(stream, framer),
            options,
        })
    }

    /// Send a message and wait for one response within the configured
    /// response timeout. Fails with `Error::Timeout` if nothing arrives in
    /// time and `Error::ConnectionClosed` if the peer disconnects first.
    pub async fn request(&mut self, message: impl Into<Message>) -> Result<Message> {
        self.conn.send(&message.into()).await?;
        match timeout(self.options.response_timeout, self.conn.recv()).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout),
        }
    }

    /// Send without waiting for a response.
    pub async fn send(&mut self, message: impl Into<Message>) -> Result<()> {
        self.conn.send(&message.into()).await
    }

    /// Receive the next message, waiting as long as it takes. Useful for
    /// broadcast listeners that pace themselves.
    pub async fn recv(&mut self) -> Result<Message> {
        self.conn.recv().await
    }

    /// Receive with the configured response timeout.
    pub async fn recv_timeout(&mut self) -> Result<Message> {
        match timeout(self.options.response_timeout, self.conn.recv()).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout),
        }
    }

    /// Close the session. Idempotent.
    pub async fn close(&mut self) {
        self.conn.close().await;
    }
}
