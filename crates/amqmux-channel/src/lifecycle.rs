//! Channel close reasons and lifecycle listeners.

use std::fmt;
use std::rc::Rc;

use amqmux_frame::{reply_code_name, ChannelClose, MethodKind};

/// Which side ended the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Initiator {
    /// This client sent Channel.Close.
    Local,
    /// The server sent Channel.Close.
    Remote,
    /// The whole connection went away.
    Connection,
}

impl fmt::Display for Initiator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Initiator::Local => "local",
            Initiator::Remote => "remote",
            Initiator::Connection => "connection",
        })
    }
}

/// Why a channel is closed. Set once per channel and never replaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    pub initiator: Initiator,
    pub reply_code: u16,
    pub reply_text: String,
    /// Class of the method that caused the close, or zero.
    pub class_id: u16,
    /// Method that caused the close, or zero.
    pub method_id: u16,
}

impl CloseReason {
    fn from_close(initiator: Initiator, close: ChannelClose) -> Self {
        Self {
            initiator,
            reply_code: close.reply_code,
            reply_text: close.reply_text,
            class_id: close.class_id,
            method_id: close.method_id,
        }
    }

    /// Reason for a close this client requested.
    pub fn local(close: ChannelClose) -> Self {
        Self::from_close(Initiator::Local, close)
    }

    /// Reason received from the server.
    pub fn remote(close: ChannelClose) -> Self {
        Self::from_close(Initiator::Remote, close)
    }

    /// Reason applied to every channel when the connection closes.
    pub fn connection(reply_code: u16, reply_text: impl Into<String>) -> Self {
        Self {
            initiator: Initiator::Connection,
            reply_code,
            reply_text: reply_text.into(),
            class_id: 0,
            method_id: 0,
        }
    }

    /// The method the peer blamed for the close, if it named a known one.
    pub fn failing_method(&self) -> Option<MethodKind> {
        MethodKind::from_ids(self.class_id, self.method_id)
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} ({}): {}",
            self.reply_code,
            reply_code_name(self.reply_code),
            self.initiator,
            self.reply_text
        )?;
        if let Some(kind) = self.failing_method() {
            write!(f, " [{kind}]")?;
        }
        Ok(())
    }
}

struct Entry<L: ?Sized> {
    key: Option<String>,
    listener: Rc<L>,
}

/// Ordered listener list with optional keys.
///
/// Firing works on a [`snapshot`](Notifier::snapshot), so listeners may add
/// or remove entries while being called.
pub struct Notifier<L: ?Sized> {
    entries: Vec<Entry<L>>,
}

impl<L: ?Sized> Notifier<L> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn add(&mut self, listener: Rc<L>, key: Option<String>) {
        self.entries.push(Entry { key, listener });
    }

    /// Remove every listener registered under `key`. Returns true if any
    /// were removed.
    pub fn remove(&mut self, key: &str) -> bool {
        let before = self.entries.len();
        self.entries
            .retain(|entry| entry.key.as_deref() != Some(key));
        self.entries.len() != before
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Current listeners, in registration order.
    pub fn snapshot(&self) -> Vec<Rc<L>> {
        self.entries
            .iter()
            .map(|entry| Rc::clone(&entry.listener))
            .collect()
    }
}

impl<L: ?Sized> Default for Notifier<L> {
    fn default() -> Self {
        Self::new()
    }
}
