//! Delimiter framing over a raw byte stream.
//!
//! Wire format: each frame is the UTF-8 payload bytes followed by a single
//! delimiter byte (default `\n`). The delimiter may not occur inside a
//! payload. Stream reassembly is the central correctness property here: no
//! matter how the transport chops the bytes up, `feed` never splits or
//! merges a message.

use crate::error::{Error, Result};
use crate::message::Message;
use bytes::{Buf, Bytes, BytesMut};

/// Default frame delimiter.
pub const DEFAULT_DELIMITER: u8 = b'\n';

/// Default maximum payload length in bytes.
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024;

/// Incremental encoder/decoder for delimiter-framed messages.
///
/// Bytes are appended with [`feed`](Framer::feed) and complete frames popped
/// with [`next_frame`](Framer::next_frame); partial bytes stay buffered
/// across calls.
#[derive(Debug)]
pub struct Framer {
    delimiter: u8,
    max_frame_len: usize,
    buffer: BytesMut,
    poisoned: bool,
}

impl Framer {
    /// Create a framer with the given delimiter and payload limit.
    ///
    /// The delimiter must be an ASCII byte so it can never land inside a
    /// multi-byte UTF-8 sequence.
    pub fn new(delimiter: u8, max_frame_len: usize) -> Self {
        assert!(delimiter.is_ascii(), "delimiter must be an ASCII byte");
        Framer {
            delimiter,
            max_frame_len,
            buffer: BytesMut::with_capacity(1024),
            poisoned: false,
        }
    }

    /// The configured delimiter byte.
    pub fn delimiter(&self) -> u8 {
        self.delimiter
    }

    /// Encode a message into a wire frame: payload bytes plus the delimiter.
    pub fn encode(&self, message: &Message) -> Result<Bytes> {
        if message.as_bytes().contains(&self.delimiter) {
            return Err(Error::Encoding(format!(
                "payload contains the delimiter byte 0x{:02x}",
                self.delimiter
            )));
        }
        if message.len() > self.max_frame_len {
            return Err(Error::Encoding(format!(
                "payload of {} bytes exceeds maximum frame length {}",
                message.len(),
                self.max_frame_len
            )));
        }
        let mut frame = BytesMut::with_capacity(message.len() + 1);
        frame.extend_from_slice(message.as_bytes());
        frame.extend_from_slice(&[self.delimiter]);
        Ok(frame.freeze())
    }

    /// Append incoming bytes to the internal buffer.
    pub fn feed(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Pop the next complete frame, if one is buffered.
    ///
    /// Returns `Ok(None)` when more bytes are needed. Fails with
    /// `FrameTooLarge` once the buffered prefix outgrows the payload limit
    /// without a delimiter; after that the framer is poisoned and every call
    /// repeats the error (the connection is expected to be torn down).
    pub fn next_frame(&mut self) -> Result<Option<Message>> {
        if self.poisoned {
            return Err(Error::FrameTooLarge {
                max: self.max_frame_len,
            });
        }

        match self.buffer.iter().position(|&b| b == self.delimiter) {
            // A complete frame over the limit is just as oversize as a
            // delimiter that never arrives.
            Some(pos) if pos > self.max_frame_len => {
                self.poisoned = true;
                Err(Error::FrameTooLarge {
                    max: self.max_frame_len,
                })
            }
            Some(pos) => {
                let payload = self.buffer.split_to(pos);
                self.buffer.advance(1); // drop the delimiter
                let text = std::str::from_utf8(&payload)
                    .map_err(|e| Error::Encoding(format!("payload is not valid UTF-8: {e}")))?
                    .to_string();
                Ok(Some(Message::new(text)))
            }
            None if self.buffer.len() > self.max_frame_len => {
                self.poisoned = true;
                Err(Error::FrameTooLarge {
                    max: self.max_frame_len,
                })
            }
            None => Ok(None),
        }
    }

    /// Draining iterator over the complete frames currently buffered.
    pub fn frames(&mut self) -> Frames<'_> {
        Frames {
            framer: self,
            done: false,
        }
    }

    /// Number of bytes buffered but not yet framed.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

impl Default for Framer {
    fn default() -> Self {
        Framer::new(DEFAULT_DELIMITER, DEFAULT_MAX_FRAME_LEN)
    }
}

/// Iterator returned by [`Framer::frames`]. Stops at the first incomplete
/// frame; an error is yielded once and ends the iteration.
pub struct Frames<'a> {
    framer: &'a mut Framer,
    done: bool,
}

impl Iterator for Frames<'_> {
    type Item = Result<Message>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.framer.next_frame() {
            Ok(Some(message)) => Some(Ok(message)),
            Ok(None) => None,
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(framer: &mut Framer) -> Vec<Message> {
        let mut out = Vec::new();
        while let Some(m) = framer.next_frame().unwrap() {
            out.push(m);
        }
        out
    }

    #[test]
    fn test_round_trip() {
        let mut framer = Framer::default();
        let message = Message::from("hello world");
        let frame = framer.encode(&message).unwrap();

        framer.feed(&frame);
        assert_eq!(collect(&mut framer), vec![message]);
        assert_eq!(framer.pending(), 0);
    }

    #[test]
    fn test_empty_payload_is_valid() {
        let mut framer = Framer::default();
        framer.feed(b"\n");
        assert_eq!(collect(&mut framer), vec![Message::from("")]);
    }

    #[test]
    fn test_empty_input_yields_nothing() {
        let mut framer = Framer::default();
        framer.feed(b"");
        assert!(framer.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_encode_rejects_embedded_delimiter() {
        let framer = Framer::default();
        let err = framer.encode(&Message::from("a\nb")).unwrap_err();
        assert!(matches!(err, Error::Encoding(_)));
    }

    #[test]
    fn test_encode_rejects_oversize_payload() {
        let framer = Framer::new(b'\n', 8);
        let err = framer.encode(&Message::from("123456789")).unwrap_err();
        assert!(matches!(err, Error::Encoding(_)));
    }

    #[test]
    fn test_split_at_every_boundary() {
        // Stream-split invariant: any two-way split of the encoded bytes
        // yields exactly the original message.
        let framer = Framer::default();
        let message = Message::from("PING with a body");
        let frame = framer.encode(&message).unwrap();

        for split in 0..=frame.len() {
            let mut framer = Framer::default();
            framer.feed(&frame[..split]);
            let mut got = collect(&mut framer);
            framer.feed(&frame[split..]);
            got.extend(collect(&mut framer));
            assert_eq!(got, vec![message.clone()], "split at {split}");
        }
    }

    #[test]
    fn test_byte_at_a_time() {
        let framer = Framer::default();
        let messages = [Message::from("alpha"), Message::from(""), Message::from("beta")];
        let mut wire = Vec::new();
        for m in &messages {
            wire.extend_from_slice(&framer.encode(m).unwrap());
        }

        let mut framer = Framer::default();
        let mut got = Vec::new();
        for byte in wire {
            framer.feed(&[byte]);
            got.extend(collect(&mut framer));
        }
        assert_eq!(got, messages);
    }

    #[test]
    fn test_multiple_frames_in_one_feed() {
        let mut framer = Framer::default();
        framer.feed(b"one\ntwo\nthree\npartial");
        let got: Vec<_> = framer.frames().collect::<Result<_>>().unwrap();
        assert_eq!(
            got,
            vec![
                Message::from("one"),
                Message::from("two"),
                Message::from("three")
            ]
        );
        assert_eq!(framer.pending(), b"partial".len());
    }

    #[test]
    fn test_frame_too_large_poisons() {
        let mut framer = Framer::new(b'\n', 4);
        framer.feed(b"toolong");
        assert!(matches!(
            framer.next_frame(),
            Err(Error::FrameTooLarge { max: 4 })
        ));
        // Still poisoned on the next call, even if a delimiter arrives.
        framer.feed(b"\n");
        assert!(matches!(
            framer.next_frame(),
            Err(Error::FrameTooLarge { max: 4 })
        ));
    }

    #[test]
    fn test_complete_oversize_frame_rejected() {
        let mut framer = Framer::new(b'\n', 4);
        framer.feed(b"toolong\nok\n");
        assert!(matches!(
            framer.next_frame(),
            Err(Error::FrameTooLarge { max: 4 })
        ));
    }

    #[test]
    fn test_payload_exactly_at_limit_accepted() {
        let mut framer = Framer::new(b'\n', 4);
        framer.feed(b"abcd\n");
        assert_eq!(framer.next_frame().unwrap(), Some(Message::from("abcd")));
    }

    #[test]
    fn test_invalid_utf8_rejected() {
        let mut framer = Framer::default();
        framer.feed(&[0xff, 0xfe, b'\n']);
        assert!(matches!(framer.next_frame(), Err(Error::Encoding(_))));
    }

    #[test]
    fn test_custom_delimiter() {
        let mut framer = Framer::new(b'+', 64);
        let frame = framer.encode(&Message::from("login bob")).unwrap();
        assert_eq!(&frame[..], b"login bob+");

        framer.feed(&frame);
        assert_eq!(collect(&mut framer), vec![Message::from("login bob")]);
    }

    #[test]
    fn test_utf8_payload_survives() {
        let mut framer = Framer::default();
        let message = Message::from("héllo wörld ☃");
        let frame = framer.encode(&message).unwrap();
        framer.feed(&frame);
        assert_eq!(collect(&mut framer), vec![message]);
    }
}
