//! AMQP 0-9-1 channel multiplexing.
//!
//! One connection carries many numbered channels. This crate is the channel
//! side of that arrangement:
//!
//! - [`Reassembler`] turns method, header and body frames into [`Command`]s
//! - [`Dispatcher`] routes each command to a waiting blocking call or to the
//!   async handler for its kind, and owns the open/closed lifecycle
//! - [`Channel`] is the user-facing facade: publish, consume, cancel, close
//!
//! The connection itself is abstracted by the [`Connection`] trait.
//! [`MemoryConnection`] implements it over in-process queues.
//!
//! # Example
//!
//! ```
//! use std::rc::Rc;
//!
//! use amqmux_channel::{Channel, Connection, MemoryConnection};
//!
//! let connection = Rc::new(MemoryConnection::loopback());
//! let channel = Channel::open(Rc::clone(&connection) as Rc<dyn Connection>)?;
//! channel.publish("", "jobs", "hello", None)?;
//! channel.close(200, "done")?;
//! assert!(!channel.is_open());
//! # Ok::<(), amqmux_channel::ChannelError>(())
//! ```
//!
//! Channels are single-threaded (`!Send`): they are driven by whichever code
//! calls the connection's `drain_events`, and handlers may re-enter the
//! channel from inside that call.

pub mod channel;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod lifecycle;
pub mod memory;
pub mod reassembly;

pub use channel::{Channel, ConsumeOptions, ConsumerCallback, PublishOptions};
pub use config::{ChannelConfig, DEFAULT_RPC_TIMEOUT};
pub use connection::Connection;
pub use dispatcher::{AsyncHandler, Dispatcher, LifecycleListener};
pub use error::{ChannelError, Result};
pub use lifecycle::{CloseReason, Initiator, Notifier};
pub use memory::{reply_for, MemoryConnection, Responder, SentMethod};
pub use reassembly::{Command, Content, Reassembler};
