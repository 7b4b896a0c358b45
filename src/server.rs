//! TCP server: accept loop, per-connection serving tasks, shutdown.
//!
//! Lifecycle: `bind` opens the listening socket, `run` drives the accept
//! loop until the handle's `shutdown` is called. Each accepted connection
//! gets its own serving task; one connection's failure never terminates the
//! accept loop or any other serving task.

use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::frame::{Framer, DEFAULT_DELIMITER, DEFAULT_MAX_FRAME_LEN};
use crate::message::Message;
use crate::registry::HandlerRegistry;
use crate::tracker::{ConnHandle, ConnectionTracker};
use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, RwLock, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Notice sent to a denied peer before its socket is closed.
const BAN_NOTICE: &str = "ban";

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on, e.g. `127.0.0.1:7878`.
    pub listen: String,
    /// Maximum number of concurrent connections; excess accepts wait.
    pub max_connections: usize,
    /// Frame delimiter byte (must be ASCII).
    pub delimiter: u8,
    /// Maximum payload length per frame.
    pub max_frame_len: usize,
    /// How long `shutdown` waits for serving tasks before aborting them.
    pub shutdown_grace: Duration,
    /// Peer IPs refused at accept time.
    pub deny_list: Vec<IpAddr>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            listen: "127.0.0.1:7878".to_string(),
            max_connections: 1024,
            delimiter: DEFAULT_DELIMITER,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            shutdown_grace: Duration::from_secs(5),
            deny_list: Vec::new(),
        }
    }
}

/// Cloneable handle for controlling a running server.
#[derive(Debug, Clone)]
pub struct ServerHandle {
    cancel: CancellationToken,
    tracker: Arc<ConnectionTracker>,
    deny: Arc<RwLock<HashSet<IpAddr>>>,
    stopped: watch::Receiver<bool>,
}

impl ServerHandle {
    /// Stop accepting, close all tracked connections, and wait for the
    /// server to finish. Idempotent; concurrent callers all observe the
    /// stopped state.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let mut stopped = self.stopped.clone();
        // Errors only if the server was dropped without running, which is
        // as stopped as it gets.
        let _ = stopped.wait_for(|stopped| *stopped).await;
    }

    /// Send a message to every tracked connection; returns the number of
    /// successful deliveries.
    pub async fn broadcast(&self, message: &Message) -> usize {
        self.tracker.broadcast(message).await
    }

    /// Add a peer IP to the deny list. Existing connections from that IP
    /// are not touched; new ones get the ban notice and are closed.
    pub async fn ban(&self, ip: IpAddr) {
        self.deny.write().await.insert(ip);
    }

    /// Number of currently tracked connections.
    pub fn connections(&self) -> usize {
        self.tracker.len()
    }
}

/// Server instance.
pub struct Server {
    listener: TcpListener,
    config: ServerConfig,
    registry: Arc<HandlerRegistry>,
    tracker: Arc<ConnectionTracker>,
    deny: Arc<RwLock<HashSet<IpAddr>>>,
    connection_limit: Arc<Semaphore>,
    cancel: CancellationToken,
    stopped_tx: watch::Sender<bool>,
    stopped_rx: watch::Receiver<bool>,
}

impl Server {
    /// Bind the listening socket. Fails with `Error::Bind` if the address
    /// is unavailable.
    pub async fn bind(config: ServerConfig, registry: HandlerRegistry) -> Result<Server> {
        let listener = TcpListener::bind(&config.listen)
            .await
            .map_err(|source| Error::Bind {
                addr: config.listen.clone(),
                source,
            })?;
        info!(address = %config.listen, commands = registry.len(), "Server listening");

        let deny: HashSet<IpAddr> = config.deny_list.iter().copied().collect();
        let (stopped_tx, stopped_rx) = watch::channel(false);
        Ok(Server {
            listener,
            connection_limit: Arc::new(Semaphore::new(config.max_connections)),
            config,
            registry: Arc::new(registry),
            tracker: Arc::new(ConnectionTracker::new()),
            deny: Arc::new(RwLock::new(deny)),
            cancel: CancellationToken::new(),
            stopped_tx,
            stopped_rx,
        })
    }

    /// The bound address (useful when listening on port 0).
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().map_err(|source| Error::Bind {
            addr: self.config.listen.clone(),
            source,
        })
    }

    /// Handle for shutdown, broadcast, and the deny list.
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            cancel: self.cancel.clone(),
            tracker: Arc::clone(&self.tracker),
            deny: Arc::clone(&self.deny),
            stopped: self.stopped_rx.clone(),
        }
    }

    /// Run the accept loop until shutdown.
    ///
    /// Consumes the server; the listening socket is released when this
    /// returns. Always returns `Ok` today, but keeps the `Result` so the
    /// run surface matches `bind`.
    pub async fn run(mut self) -> Result<()> {
        let mut tasks = JoinSet::new();

        loop {
            // A slot must be free before we accept, so a flood of clients
            // beyond the limit queues in the listen backlog.
            let permit = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                permit = Arc::clone(&self.connection_limit).acquire_owned() => {
                    match permit {
                        Ok(permit) => permit,
                        Err(_) => break, // semaphore closed, not reachable
                    }
                }
            };

            let (stream, peer) = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                        continue;
                    }
                },
            };
            debug!(peer = %peer, "New connection");

            if self.deny.read().await.contains(&peer.ip()) {
                info!(peer = %peer, "Denied connection from banned address");
                let framer = Framer::new(self.config.delimiter, self.config.max_frame_len);
                let mut conn = Connection::with_framer(stream, framer);
                let _ = conn.send(&Message::from(BAN_NOTICE)).await;
                conn.close().await;
                continue;
            }

            let framer = Framer::new(self.config.delimiter, self.config.max_frame_len);
            let conn = Connection::with_framer(stream, framer);
            let id = self.tracker.next_id();
            let cancel = self.cancel.child_token();
            let (handle, outbound) = ConnHandle::new(id, peer, cancel.clone());
            self.tracker.track(handle).await;

            let registry = Arc::clone(&self.registry);
            let tracker = Arc::clone(&self.tracker);
            tasks.spawn(async move {
                if let Err(e) = serve(conn, peer, registry, outbound, cancel).await {
                    debug!(peer = %peer, error = %e, "Connection error");
                }
                tracker.untrack(id).await;
                drop(permit);
            });

            // Reap any serving tasks that have already finished.
            while tasks.try_join_next().is_some() {}
        }

        info!("Shutting down, closing tracked connections");
        self.tracker.close_all().await;

        let drained = tokio::time::timeout(self.config.shutdown_grace, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(
                remaining = tasks.len(),
                "Grace period elapsed, aborting serving tasks"
            );
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
        }

        // Release the bind before observers see the stopped state.
        drop(self.listener);
        let _ = self.stopped_tx.send(true);
        info!("Server stopped");
        Ok(())
    }
}

/// Serve one connection: receive → dispatch → respond, interleaved with
/// broadcast deliveries, until the peer disconnects or shutdown cancels us.
async fn serve(
    mut conn: Connection<TcpStream>,
    peer: SocketAddr,
    registry: Arc<HandlerRegistry>,
    mut outbound: mpsc::Receiver<Message>,
    cancel: CancellationToken,
) -> Result<()> {
    let result = serve_loop(&mut conn, peer, &registry, &mut outbound, &cancel).await;
    conn.close().await;
    result
}

async fn serve_loop(
    conn: &mut Connection<TcpStream>,
    peer: SocketAddr,
    registry: &HandlerRegistry,
    outbound: &mut mpsc::Receiver<Message>,
    cancel: &CancellationToken,
) -> Result<()> {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                trace!(peer = %peer, "Serving task cancelled");
                return Ok(());
            }
            delivery = outbound.recv() => {
                match delivery {
                    Some(message) => conn.send(&message).await?,
                    // The tracker dropped our handle; nothing left to do.
                    None => return Ok(()),
                }
            }
            received = conn.recv() => {
                let message = match received {
                    Ok(message) => message,
                    Err(Error::ConnectionClosed) => {
                        trace!(peer = %peer, "Peer disconnected");
                        return Ok(());
                    }
                    Err(e) => {
                        warn!(peer = %peer, error = %e, "Malformed input, closing connection");
                        return Err(e);
                    }
                };
                trace!(peer = %peer, message = %message, "Dispatching");

                match registry.dispatch(&message) {
                    Ok(Some(response)) => conn.send(&response).await?,
                    Ok(None) => {}
                    Err(Error::UnknownCommand(command)) => {
                        debug!(peer = %peer, command = %command, "Unknown command");
                        let reply = if command.is_empty() {
                            Message::from("ERROR unknown command")
                        } else {
                            Message::new(format!("ERROR unknown command {command}"))
                        };
                        conn.send(&reply).await?;
                    }
                    Err(e) => return Err(e),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Request;

    fn test_config() -> ServerConfig {
        ServerConfig {
            listen: "127.0.0.1:0".to_string(),
            ..ServerConfig::default()
        }
    }

    #[tokio::test]
    async fn test_bind_assigns_address() {
        let server = Server::bind(test_config(), HandlerRegistry::new())
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
    }

    #[tokio::test]
    async fn test_bind_error_on_occupied_address() {
        let server = Server::bind(test_config(), HandlerRegistry::new())
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();

        let config = ServerConfig {
            listen: addr.to_string(),
            ..ServerConfig::default()
        };
        match Server::bind(config, HandlerRegistry::new()).await {
            Err(Error::Bind { addr: a, .. }) => assert_eq!(a, addr.to_string()),
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let mut registry = HandlerRegistry::new();
        registry.register("ping", |_req: &Request| Some(Message::from("PONG")));
        let server = Server::bind(test_config(), registry).await.unwrap();
        let handle = server.handle();

        let join = tokio::spawn(server.run());
        handle.shutdown().await;
        handle.shutdown().await;
        join.await.unwrap().unwrap();
        assert_eq!(handle.connections(), 0);
    }
}
