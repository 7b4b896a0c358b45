//! The opaque message payload.

use std::fmt;

/// An immutable UTF-8 message payload.
///
/// A `Message` never contains the framing delimiter; the framer rejects
/// payloads that embed it. Any richer schema is the application's concern,
/// the framework only moves strings around.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Message(String);

impl Message {
    /// Create a message from any string-like value.
    pub fn new(payload: impl Into<String>) -> Self {
        Message(payload.into())
    }

    /// The payload as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The payload bytes.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the payload is empty (a bare delimiter on the wire).
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Consume the message, returning the payload string.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl From<String> for Message {
    fn from(s: String) -> Self {
        Message(s)
    }
}

impl From<&str> for Message {
    fn from(s: &str) -> Self {
        Message(s.to_string())
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl PartialEq<str> for Message {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for Message {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}
