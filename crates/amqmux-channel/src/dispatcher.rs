//! Per-channel dispatcher.
//!
//! The dispatcher is the channel's side of the connection. Inbound frames go
//! through the [`Reassembler`]; each completed [`Command`] is then routed:
//!
//! ```text
//!   frame ──► reassembler ──► command(kind K)
//!                                   │
//!             ┌─────────────────────┼──────────────────────┐
//!      K pending reply?      K has async handler?        neither
//!             │                     │                      │
//!   complete the waiting     call the handler     close connection (540),
//!        rpc call                                  NotSupported(K)
//! ```
//!
//! Replies always win over async handlers. Blocking calls ([`Dispatcher::rpc`])
//! park a single-slot receiver in the pending map and drive the connection's
//! `drain_events` until the slot is filled, the channel closes, or the
//! configured timeout expires. Dispatch errors surfaced by a drain do not
//! end the wait; only closure, timeout and connection failure do. Nothing
//! here holds a `RefCell` borrow while calling out, so handlers may issue
//! nested calls.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::sync::mpsc::{self, Receiver, SyncSender, TryRecvError};
use std::time::Instant;

use amqmux_frame::{ChannelClose, ChannelCloseOk, Frame, Method, MethodKind, NOT_IMPLEMENTED};
use tracing::{debug, info, trace, warn};

use crate::config::ChannelConfig;
use crate::connection::Connection;
use crate::error::{ChannelError, Result};
use crate::lifecycle::{CloseReason, Notifier};
use crate::reassembly::{Command, Content, Reassembler};

/// Handler for an unsolicited method kind.
pub type AsyncHandler = dyn Fn(&Rc<Dispatcher>, Command) -> Result<()>;

/// Listener for open/close transitions: `(dispatcher, is_open)`.
pub type LifecycleListener = dyn Fn(&Dispatcher, bool);

struct PendingReply {
    wait_id: u64,
    reply: SyncSender<Command>,
}

enum Route {
    Reply(SyncSender<Command>),
    Async(Rc<AsyncHandler>),
    Unhandled,
}

struct State {
    reassembler: Reassembler,
    close_reason: Option<CloseReason>,
    handlers: HashMap<MethodKind, Rc<AsyncHandler>>,
    pending: HashMap<MethodKind, PendingReply>,
    listeners: Notifier<LifecycleListener>,
    next_wait_id: u64,
}

impl State {
    fn new() -> Self {
        Self {
            reassembler: Reassembler::new(),
            close_reason: None,
            handlers: HashMap::new(),
            pending: HashMap::new(),
            listeners: Notifier::new(),
            next_wait_id: 0,
        }
    }

    fn route(&mut self, kind: MethodKind) -> Route {
        if let Some(pending) = self.pending.remove(&kind) {
            // The other reply kinds of the same call are satisfied too.
            self.pending
                .retain(|_, other| other.wait_id != pending.wait_id);
            return Route::Reply(pending.reply);
        }
        match self.handlers.get(&kind) {
            Some(handler) => Route::Async(Rc::clone(handler)),
            None => Route::Unhandled,
        }
    }

    fn register_wait(&mut self, replies: &[MethodKind]) -> Result<(u64, Receiver<Command>)> {
        if let Some(kind) = replies
            .iter()
            .copied()
            .find(|kind| self.pending.contains_key(kind))
        {
            return Err(ChannelError::RecursiveOperation(kind));
        }

        let wait_id = self.next_wait_id;
        self.next_wait_id += 1;

        let (reply, receiver) = mpsc::sync_channel(1);
        for kind in replies {
            self.pending.insert(
                *kind,
                PendingReply {
                    wait_id,
                    reply: reply.clone(),
                },
            );
        }
        Ok((wait_id, receiver))
    }

    fn cancel_wait(&mut self, wait_id: u64) {
        self.pending.retain(|_, pending| pending.wait_id != wait_id);
    }
}

/// Frame router, RPC correlator and lifecycle state of one channel.
pub struct Dispatcher {
    number: u16,
    connection: Rc<dyn Connection>,
    config: ChannelConfig,
    state: RefCell<State>,
}

impl Dispatcher {
    /// Create a dispatcher and register it with the connection.
    ///
    /// With `number = None` the connection allocates one. The Channel.Close
    /// handler is installed here; other handlers are wired by the caller.
    pub fn new(
        connection: Rc<dyn Connection>,
        number: Option<u16>,
        config: ChannelConfig,
    ) -> Result<Rc<Self>> {
        let number = match number {
            Some(number) => number,
            None => connection.allocate_channel_number()?,
        };

        let dispatcher = Rc::new(Self {
            number,
            connection: Rc::clone(&connection),
            config,
            state: RefCell::new(State::new()),
        });
        dispatcher.register_handler(MethodKind::ChannelClose, |dispatcher, command| {
            dispatcher.on_remote_close(command)
        });

        connection.register_channel(number, Rc::clone(&dispatcher))?;
        debug!(channel = number, "channel registered");
        Ok(dispatcher)
    }

    pub fn number(&self) -> u16 {
        self.number
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    pub fn is_open(&self) -> bool {
        self.state.borrow().close_reason.is_none()
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.state.borrow().close_reason.clone()
    }

    /// Reply kinds with a blocking call currently waiting on them.
    pub fn pending_replies(&self) -> Vec<MethodKind> {
        let mut kinds: Vec<MethodKind> = self.state.borrow().pending.keys().copied().collect();
        kinds.sort_unstable();
        kinds
    }

    /// Fail with `ChannelClosed` once a close reason is set.
    pub fn ensure_open(&self) -> Result<()> {
        match &self.state.borrow().close_reason {
            Some(reason) => Err(ChannelError::ChannelClosed(reason.clone())),
            None => Ok(()),
        }
    }

    /// Install the handler for an unsolicited method kind, replacing any
    /// previous one.
    pub fn register_handler<F>(&self, kind: MethodKind, handler: F)
    where
        F: Fn(&Rc<Dispatcher>, Command) -> Result<()> + 'static,
    {
        self.state
            .borrow_mut()
            .handlers
            .insert(kind, Rc::new(handler));
    }

    /// Register a lifecycle listener.
    ///
    /// The listener is called immediately with the current state, and again
    /// on every later transition.
    pub fn add_listener<F>(&self, listener: F, key: Option<&str>)
    where
        F: Fn(&Dispatcher, bool) + 'static,
    {
        let listener: Rc<LifecycleListener> = Rc::new(listener);
        let is_open = {
            let mut state = self.state.borrow_mut();
            state
                .listeners
                .add(Rc::clone(&listener), key.map(str::to_string));
            state.close_reason.is_none()
        };
        listener(self, is_open);
    }

    /// Remove the listeners registered under `key`.
    pub fn remove_listener(&self, key: &str) -> bool {
        self.state.borrow_mut().listeners.remove(key)
    }

    /// Feed one inbound frame. Called by the connection during
    /// `drain_events`.
    pub fn handle_frame(self: &Rc<Self>, frame: Frame) -> Result<()> {
        trace!(channel = self.number, frame = %frame.frame_type(), "frame received");
        let assembled = self.state.borrow_mut().reassembler.handle(frame);
        match assembled {
            Ok(Some(command)) => self.dispatch(command),
            Ok(None) => Ok(()),
            Err(err) => {
                warn!(channel = self.number, error = %err, "discarding content assembly");
                Err(err)
            }
        }
    }

    fn dispatch(self: &Rc<Self>, command: Command) -> Result<()> {
        let kind = command.method.kind();
        let route = self.state.borrow_mut().route(kind);

        match route {
            Route::Reply(reply) => {
                debug!(channel = self.number, method = %kind, "reply received");
                if reply.try_send(command).is_err() {
                    debug!(channel = self.number, method = %kind, "reply dropped, caller gone");
                }
                Ok(())
            }
            Route::Async(handler) => {
                trace!(channel = self.number, method = %kind, "dispatching async method");
                handler(self, command)
            }
            Route::Unhandled => {
                warn!(channel = self.number, method = %kind, "no handler for method, closing connection");
                self.connection
                    .close(NOT_IMPLEMENTED, &format!("method not implemented: {kind}"))?;
                Err(ChannelError::NotSupported(kind))
            }
        }
    }

    /// Send a method without waiting for a reply.
    pub fn send(&self, method: impl Into<Method>, content: Option<Content>) -> Result<()> {
        self.ensure_open()?;
        let method = method.into();
        trace!(channel = self.number, method = %method.kind(), "sending method");
        self.connection.send_method(self.number, method, content)
    }

    /// Send `method` and block until one of `replies` arrives on this
    /// channel.
    ///
    /// An empty `replies` makes this a one-way send that returns `None`.
    /// Fails with `RecursiveOperation` (registering nothing and sending
    /// nothing) when a reply kind already has a waiting call, with
    /// `ChannelClosed` if the channel closes first, and with `Timeout` when
    /// the configured RPC timeout expires.
    pub fn rpc(&self, method: impl Into<Method>, replies: &[MethodKind]) -> Result<Option<Command>> {
        self.ensure_open()?;
        let method = method.into();
        if replies.is_empty() {
            self.send(method, None)?;
            return Ok(None);
        }

        let (wait_id, reply) = self.state.borrow_mut().register_wait(replies)?;
        debug!(channel = self.number, method = %method.kind(), ?replies, "rpc sent");

        let result = self
            .connection
            .send_method(self.number, method, None)
            .and_then(|()| self.wait_for_reply(&reply));
        self.state.borrow_mut().cancel_wait(wait_id);
        result.map(Some)
    }

    fn wait_for_reply(&self, reply: &Receiver<Command>) -> Result<Command> {
        let deadline = self
            .config
            .rpc_timeout
            .map(|timeout| (Instant::now() + timeout, timeout));

        loop {
            match reply.try_recv() {
                Ok(command) => return Ok(command),
                Err(TryRecvError::Disconnected) => return Err(self.closed_error()),
                Err(TryRecvError::Empty) => {}
            }
            self.ensure_open()?;

            let remaining = match deadline {
                Some((at, timeout)) => {
                    let now = Instant::now();
                    if now >= at {
                        warn!(channel = self.number, ?timeout, "rpc timed out");
                        return Err(ChannelError::Timeout(timeout));
                    }
                    Some(at - now)
                }
                None => None,
            };
            match self.connection.drain_events(remaining) {
                Ok(()) => {}
                Err(err @ (ChannelError::Connection(_) | ChannelError::Timeout(_))) => {
                    return Err(err)
                }
                // Dispatch errors from this or another channel leave the wait
                // registered; closure of this channel is caught above.
                Err(err) => {
                    debug!(channel = self.number, error = %err, "dispatch error while waiting for reply");
                }
            }
        }
    }

    fn closed_error(&self) -> ChannelError {
        match self.close_reason() {
            Some(reason) => ChannelError::ChannelClosed(reason),
            None => ChannelError::Connection("reply slot dropped".to_string()),
        }
    }

    /// Record the close reason, release the channel number and notify
    /// listeners. Only the first call has any effect.
    ///
    /// Waiting calls are woken and fail with `ChannelClosed`.
    pub fn mark_closed(&self, reason: CloseReason) {
        let listeners = {
            let mut state = self.state.borrow_mut();
            if state.close_reason.is_some() {
                return;
            }
            info!(channel = self.number, reason = %reason, "channel closed");
            state.close_reason = Some(reason);
            state.pending.clear();
            state.listeners.snapshot()
        };

        self.connection.release_channel(self.number);
        for listener in listeners {
            listener(self, false);
        }
    }

    fn on_remote_close(&self, command: Command) -> Result<()> {
        let close = ChannelClose::try_from(command.method)
            .map_err(|method| ChannelError::UnexpectedMethod(method.kind()))?;
        self.mark_closed(CloseReason::remote(close));
        self.connection
            .send_method(self.number, Method::from(ChannelCloseOk), None)
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Ok(state) = self.state.try_borrow() else {
            return f
                .debug_struct("Dispatcher")
                .field("number", &self.number)
                .finish_non_exhaustive();
        };
        f.debug_struct("Dispatcher")
            .field("number", &self.number)
            .field("expecting", &state.reassembler.expected())
            .field("close_reason", &state.close_reason)
            .field("pending", &state.pending.keys().collect::<Vec<_>>())
            .field("listeners", &state.listeners.len())
            .finish()
    }
}
