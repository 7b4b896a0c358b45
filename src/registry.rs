//! Command-to-handler dispatch.
//!
//! A message's command is its first whitespace-delimited token, matched
//! case-insensitively (ASCII). Registration is last-wins; a shared
//! (`Arc`-wrapped) registry is read-only, so dynamic registration happens
//! before the registry is handed to a server.

use crate::error::{Error, Result};
use crate::message::Message;
use std::collections::HashMap;

/// A parsed inbound message: the command token plus the remaining body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// The command token as the peer sent it (original casing).
    pub command: String,
    /// Everything after the command token, leading whitespace stripped.
    /// Empty when the message was just a command.
    pub body: String,
}

impl Request {
    /// Split a message into command token and body.
    ///
    /// Returns `None` for a message with no token (empty or all whitespace).
    pub fn parse(message: &Message) -> Option<Request> {
        let text = message.as_str().trim_start();
        if text.is_empty() {
            return None;
        }
        match text.split_once(char::is_whitespace) {
            Some((command, body)) => Some(Request {
                command: command.to_string(),
                body: body.trim_start().to_string(),
            }),
            None => Some(Request {
                command: text.to_string(),
                body: String::new(),
            }),
        }
    }
}

/// A callback that produces an optional response for a request.
///
/// Returning `None` means no response is sent; the connection stays open.
/// Plain closures implement this through the blanket impl below.
pub trait Handler: Send + Sync {
    fn handle(&self, request: &Request) -> Option<Message>;
}

impl<F> Handler for F
where
    F: Fn(&Request) -> Option<Message> + Send + Sync,
{
    fn handle(&self, request: &Request) -> Option<Message> {
        self(request)
    }
}

/// Maps command tokens to handlers.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Box<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        HandlerRegistry::default()
    }

    /// Register a handler for a command. Last registration for a command
    /// wins; commands are normalized to ASCII lowercase.
    pub fn register(&mut self, command: impl AsRef<str>, handler: impl Handler + 'static) {
        self.handlers
            .insert(command.as_ref().to_ascii_lowercase(), Box::new(handler));
    }

    /// Whether a handler is registered for the command.
    pub fn contains(&self, command: &str) -> bool {
        self.handlers.contains_key(&command.to_ascii_lowercase())
    }

    /// Number of registered commands.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Parse the command token and invoke its handler.
    ///
    /// Fails with `UnknownCommand` when no handler matches (a message with
    /// no token at all dispatches as the empty command). The serving loop
    /// turns that into an error response rather than dropping the message.
    pub fn dispatch(&self, message: &Message) -> Result<Option<Message>> {
        let request = Request::parse(message).ok_or_else(|| {
            Error::UnknownCommand(String::new())
        })?;

        match self.handlers.get(&request.command.to_ascii_lowercase()) {
            Some(handler) => Ok(handler.handle(&request)),
            None => Err(Error::UnknownCommand(request.command)),
        }
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut commands: Vec<_> = self.handlers.keys().collect();
        commands.sort();
        f.debug_struct("HandlerRegistry")
            .field("commands", &commands)
            .finish()
    }
}
