//! One bidirectional framed channel over a byte stream.

use crate::error::{Error, Result};
use crate::frame::Framer;
use crate::message::Message;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Read chunk size for pulling bytes off the socket.
const READ_CHUNK: usize = 4 * 1024;

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Open,
    Closing,
    Closed,
}

/// A framed, bidirectional message channel.
///
/// Generic over the stream type so it works against `TcpStream` in
/// production and in-memory duplex pipes in tests. The connection owns its
/// [`Framer`]; dropping the connection releases the socket on every exit
/// path.
#[derive(Debug)]
pub struct Connection<S> {
    stream: S,
    framer: Framer,
    state: ConnState,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap a stream with the default framing (newline delimiter).
    pub fn new(stream: S) -> Self {
        Connection::with_framer(stream, Framer::default())
    }

    /// Wrap a stream with an explicitly configured framer.
    pub fn with_framer(stream: S, framer: Framer) -> Self {
        Connection {
            stream,
            framer,
            state: ConnState::Open,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnState {
        self.state
    }

    /// Encode a message and write it out, flushing before returning.
    pub async fn send(&mut self, message: &Message) -> Result<()> {
        if self.state != ConnState::Open {
            return Err(Error::ConnectionClosed);
        }
        let frame = self.framer.encode(message)?;
        self.stream.write_all(&frame).await.map_err(Error::Send)?;
        self.stream.flush().await.map_err(Error::Send)?;
        Ok(())
    }

    /// Receive the next complete message, suspending until one is framed.
    ///
    /// Fails with `ConnectionClosed` on EOF (a pending partial frame is
    /// discarded) and propagates `FrameTooLarge`/`Encoding` from the framer.
    /// Cancel-safe at message granularity: dropping the future between polls
    /// loses no buffered bytes.
    pub async fn recv(&mut self) -> Result<Message> {
        if self.state != ConnState::Open {
            return Err(Error::ConnectionClosed);
        }

        let mut chunk = [0u8; READ_CHUNK];
        loop {
            if let Some(message) = self.framer.next_frame()? {
                return Ok(message);
            }

            let n = match self.stream.read(&mut chunk).await {
                Ok(n) => n,
                Err(e) => {
                    debug!(error = %e, "read fault, treating as closed");
                    self.state = ConnState::Closed;
                    return Err(Error::ConnectionClosed);
                }
            };
            if n == 0 {
                if self.framer.pending() > 0 {
                    debug!(
                        pending = self.framer.pending(),
                        "peer closed mid-frame, discarding partial bytes"
                    );
                }
                self.state = ConnState::Closed;
                return Err(Error::ConnectionClosed);
            }
            self.framer.feed(&chunk[..n]);
        }
    }

    /// Shut the write half down and mark the connection closed. Idempotent.
    pub async fn close(&mut self) {
        if self.state == ConnState::Closed {
            return;
        }
        self.state = ConnState::Closing;
        // The peer sees EOF; errors here mean it is already gone.
        let _ = self.stream.shutdown().await;
        self.state = ConnState::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncWriteExt};

    #[tokio::test]
    async fn test_send_recv_round_trip() {
        let (a, b) = duplex(256);
        let mut left = Connection::new(a);
        let mut right = Connection::new(b);

        left.send(&Message::from("hello")).await.unwrap();
        assert_eq!(right.recv().await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_recv_reassembles_split_frames() {
        let (mut raw, b) = duplex(256);
        let mut conn = Connection::new(b);

        raw.write_all(b"par").await.unwrap();
        raw.write_all(b"tial\nsec").await.unwrap();
        assert_eq!(conn.recv().await.unwrap(), "partial");

        raw.write_all(b"ond\n").await.unwrap();
        assert_eq!(conn.recv().await.unwrap(), "second");
    }

    #[tokio::test]
    async fn test_recv_eof_is_connection_closed() {
        let (raw, b) = duplex(256);
        let mut conn = Connection::new(b);

        drop(raw);
        assert!(matches!(conn.recv().await, Err(Error::ConnectionClosed)));
        assert_eq!(conn.state(), ConnState::Closed);
    }

    #[tokio::test]
    async fn test_recv_discards_partial_frame_on_eof() {
        let (mut raw, b) = duplex(256);
        let mut conn = Connection::new(b);

        raw.write_all(b"no delimiter here").await.unwrap();
        drop(raw);
        assert!(matches!(conn.recv().await, Err(Error::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let (a, _b) = duplex(256);
        let mut conn = Connection::new(a);

        conn.close().await;
        conn.close().await; // idempotent
        assert_eq!(conn.state(), ConnState::Closed);
        assert!(matches!(
            conn.send(&Message::from("x")).await,
            Err(Error::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_oversize_frame_surfaces_frame_too_large() {
        let (mut raw, b) = duplex(256);
        let mut conn = Connection::with_framer(b, Framer::new(b'\n', 8));

        raw.write_all(b"this frame is far too long").await.unwrap();
        assert!(matches!(
            conn.recv().await,
            Err(Error::FrameTooLarge { max: 8 })
        ));
    }
}
