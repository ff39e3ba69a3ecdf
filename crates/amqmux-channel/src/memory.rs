//! In-process [`Connection`] for tests and embedding.
//!
//! `MemoryConnection` keeps an inbound frame queue that `drain_events`
//! delivers to registered channels, and records every method sent through it.
//! An optional responder produces server-side frames for each sent method;
//! [`MemoryConnection::loopback`] installs one that answers every synchronous
//! request with its `*Ok` reply.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, warn};

use amqmux_frame::{
    content_frames, BasicCancelOk, BasicConsumeOk, BasicProperties, BasicQosOk, ChannelCloseOk,
    ChannelFlowOk, ChannelOpenOk, ExchangeDeclareOk, Frame, Method, QueueBindOk, QueueDeclareOk,
};

use crate::connection::Connection;
use crate::dispatcher::Dispatcher;
use crate::error::{ChannelError, Result};
use crate::lifecycle::CloseReason;
use crate::reassembly::Content;

/// Default highest channel number handed out.
pub const DEFAULT_CHANNEL_MAX: u16 = 2047;

/// Default negotiated frame size used when splitting pushed content.
pub const DEFAULT_FRAME_MAX: usize = 128 * 1024;

/// Produces inbound frames in response to a sent method: `(channel, method)`.
pub type Responder = Box<dyn FnMut(u16, &Method) -> Vec<Frame>>;

/// A method recorded by [`MemoryConnection::send_method`].
#[derive(Debug, Clone, PartialEq)]
pub struct SentMethod {
    pub channel: u16,
    pub method: Method,
    pub content: Option<Content>,
}

struct MemoryState {
    channels: BTreeMap<u16, Rc<Dispatcher>>,
    inbound: VecDeque<(u16, Frame)>,
    sent: Vec<SentMethod>,
    closed: Option<(u16, String)>,
}

/// Connection backed by in-memory queues.
pub struct MemoryConnection {
    channel_max: u16,
    frame_max: usize,
    state: RefCell<MemoryState>,
    responder: RefCell<Option<Responder>>,
}

impl MemoryConnection {
    /// A connection with no responder: inbound frames come only from the
    /// `push_*` methods.
    pub fn new() -> Self {
        Self {
            channel_max: DEFAULT_CHANNEL_MAX,
            frame_max: DEFAULT_FRAME_MAX,
            state: RefCell::new(MemoryState {
                channels: BTreeMap::new(),
                inbound: VecDeque::new(),
                sent: Vec::new(),
                closed: None,
            }),
            responder: RefCell::new(None),
        }
    }

    /// A connection that answers synchronous requests like a broker would.
    pub fn loopback() -> Self {
        Self::new().with_responder(|_, method| {
            reply_for(method)
                .map(Frame::Method)
                .into_iter()
                .collect()
        })
    }

    /// Override the highest allocatable channel number.
    pub fn with_channel_max(mut self, channel_max: u16) -> Self {
        self.channel_max = channel_max;
        self
    }

    /// Override the frame size used to split pushed content.
    pub fn with_frame_max(mut self, frame_max: usize) -> Self {
        self.frame_max = frame_max;
        self
    }

    /// Install a responder called for every sent method.
    pub fn with_responder<F>(self, responder: F) -> Self
    where
        F: FnMut(u16, &Method) -> Vec<Frame> + 'static,
    {
        *self.responder.borrow_mut() = Some(Box::new(responder));
        self
    }

    /// Queue one inbound frame.
    pub fn push_frame(&self, channel: u16, frame: Frame) {
        self.state.borrow_mut().inbound.push_back((channel, frame));
    }

    /// Queue an inbound method without content.
    pub fn push_method(&self, channel: u16, method: impl Into<Method>) {
        self.push_frame(channel, Frame::method(method));
    }

    /// Queue a content-bearing method as method, header and body frames.
    pub fn push_content(
        &self,
        channel: u16,
        method: impl Into<Method>,
        properties: BasicProperties,
        body: impl Into<Bytes>,
    ) -> Result<()> {
        let frames = content_frames(method, properties, body.into(), self.frame_max)?;
        let mut state = self.state.borrow_mut();
        state
            .inbound
            .extend(frames.into_iter().map(|frame| (channel, frame)));
        Ok(())
    }

    /// Methods sent so far, oldest first.
    pub fn sent(&self) -> Vec<SentMethod> {
        self.state.borrow().sent.clone()
    }

    /// Take and clear the sent-method log.
    pub fn take_sent(&self) -> Vec<SentMethod> {
        std::mem::take(&mut self.state.borrow_mut().sent)
    }

    /// Number of inbound frames not yet delivered.
    pub fn pending_frames(&self) -> usize {
        self.state.borrow().inbound.len()
    }

    /// Currently registered channel numbers.
    pub fn channel_numbers(&self) -> Vec<u16> {
        self.state.borrow().channels.keys().copied().collect()
    }

    /// Reply code and text the connection was closed with.
    pub fn close_reason(&self) -> Option<(u16, String)> {
        self.state.borrow().closed.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state.borrow().closed.is_some()
    }

    fn ensure_open(&self) -> Result<()> {
        match &self.state.borrow().closed {
            Some((code, text)) => Err(ChannelError::Connection(format!(
                "connection closed ({code}): {text}"
            ))),
            None => Ok(()),
        }
    }

    fn respond(&self, channel: u16, method: &Method) {
        // Taken out for the call so a responder may push frames itself.
        let Some(mut responder) = self.responder.borrow_mut().take() else {
            return;
        };
        let frames = responder(channel, method);
        *self.responder.borrow_mut() = Some(responder);

        let mut state = self.state.borrow_mut();
        state
            .inbound
            .extend(frames.into_iter().map(|frame| (channel, frame)));
    }
}

impl Default for MemoryConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl Connection for MemoryConnection {
    fn allocate_channel_number(&self) -> Result<u16> {
        self.ensure_open()?;
        let state = self.state.borrow();
        (1..=self.channel_max)
            .find(|number| !state.channels.contains_key(number))
            .ok_or(ChannelError::ChannelsExhausted(self.channel_max))
    }

    fn register_channel(&self, number: u16, dispatcher: Rc<Dispatcher>) -> Result<()> {
        self.ensure_open()?;
        let mut state = self.state.borrow_mut();
        if number == 0 || number > self.channel_max || state.channels.contains_key(&number) {
            return Err(ChannelError::ChannelUnavailable(number));
        }
        state.channels.insert(number, dispatcher);
        Ok(())
    }

    fn release_channel(&self, number: u16) {
        self.state.borrow_mut().channels.remove(&number);
    }

    fn send_method(&self, channel: u16, method: Method, content: Option<Content>) -> Result<()> {
        self.ensure_open()?;
        self.state.borrow_mut().sent.push(SentMethod {
            channel,
            method: method.clone(),
            content,
        });
        self.respond(channel, &method);
        Ok(())
    }

    fn drain_events(&self, timeout: Option<Duration>) -> Result<()> {
        self.ensure_open()?;
        if self.state.borrow().inbound.is_empty() {
            return match timeout {
                Some(timeout) => {
                    std::thread::sleep(timeout);
                    Ok(())
                }
                None => Err(ChannelError::Connection(
                    "no pending frames, drain would block forever".to_string(),
                )),
            };
        }

        // A failing channel must not starve the others: keep draining and
        // report the first error once the queue is empty.
        let mut first_error = None;
        loop {
            let next = self.state.borrow_mut().inbound.pop_front();
            let Some((channel, frame)) = next else {
                return first_error.map_or(Ok(()), Err);
            };
            let target = self.state.borrow().channels.get(&channel).cloned();
            match target {
                Some(dispatcher) => {
                    if let Err(err) = dispatcher.handle_frame(frame) {
                        warn!(channel, error = %err, "channel dispatch failed");
                        first_error.get_or_insert(err);
                    }
                }
                None => warn!(channel, frame = %frame.frame_type(), "frame for unregistered channel dropped"),
            }
        }
    }

    fn close(&self, reply_code: u16, reply_text: &str) -> Result<()> {
        let channels: Vec<Rc<Dispatcher>> = {
            let mut state = self.state.borrow_mut();
            if state.closed.is_some() {
                return Ok(());
            }
            debug!(reply_code, reply_text, "memory connection closing");
            state.closed = Some((reply_code, reply_text.to_string()));
            state.inbound.clear();
            state.channels.values().cloned().collect()
        };

        for dispatcher in channels {
            dispatcher.mark_closed(CloseReason::connection(reply_code, reply_text));
        }
        Ok(())
    }
}

/// The reply a broker sends for a synchronous request, or `None` for
/// one-way methods and replies.
pub fn reply_for(method: &Method) -> Option<Method> {
    let reply: Method = match method {
        Method::ChannelOpen(_) => ChannelOpenOk.into(),
        Method::ChannelFlow(flow) => ChannelFlowOk {
            active: flow.active,
        }
        .into(),
        Method::ChannelClose(_) => ChannelCloseOk.into(),
        Method::ExchangeDeclare(declare) if !declare.no_wait => ExchangeDeclareOk.into(),
        Method::QueueDeclare(declare) if !declare.no_wait => QueueDeclareOk {
            queue: if declare.queue.is_empty() {
                "amq.gen-memory".to_string()
            } else {
                declare.queue.clone()
            },
            message_count: 0,
            consumer_count: 0,
        }
        .into(),
        Method::QueueBind(bind) if !bind.no_wait => QueueBindOk.into(),
        Method::BasicQos(_) => BasicQosOk.into(),
        Method::BasicConsume(consume) if !consume.no_wait => BasicConsumeOk {
            consumer_tag: consume.consumer_tag.clone(),
        }
        .into(),
        Method::BasicCancel(cancel) if !cancel.no_wait => BasicCancelOk {
            consumer_tag: cancel.consumer_tag.clone(),
        }
        .into(),
        _ => return None,
    };
    Some(reply)
}
