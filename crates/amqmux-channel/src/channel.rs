//! The channel facade.
//!
//! [`Channel`] wires the delivery, return and flow handlers into its
//! [`Dispatcher`] and keeps the consumer-tag to callback map. Every
//! operation is a send or a blocking call on that dispatcher.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use bytes::Bytes;
use tracing::{debug, info, trace, warn};

use amqmux_frame::{
    BasicAck, BasicCancel, BasicCancelOk, BasicConsume, BasicConsumeOk, BasicDeliver,
    BasicProperties, BasicPublish, BasicQos, BasicReject, ChannelClose, ChannelOpen,
    ExchangeDeclare, FieldTable, Method, MethodKind, QueueBind, QueueDeclare, QueueDeclareOk,
    INTERNAL_ERROR,
};

use crate::config::ChannelConfig;
use crate::connection::Connection;
use crate::dispatcher::Dispatcher;
use crate::error::{ChannelError, Result};
use crate::lifecycle::CloseReason;
use crate::reassembly::{Command, Content};

/// Callback invoked for each delivery to a consumer:
/// `(channel, deliver, properties, body)`.
pub type ConsumerCallback = dyn Fn(&Channel, &BasicDeliver, &BasicProperties, &Bytes);

/// Routing flags for [`Channel::publish_with`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishOptions {
    /// Return the message if it cannot be routed to any queue.
    pub mandatory: bool,
    /// Return the message if it cannot be delivered to a consumer right away.
    pub immediate: bool,
}

/// Subscription settings for [`Channel::consume`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConsumeOptions {
    pub no_ack: bool,
    pub exclusive: bool,
    /// Explicit consumer tag. `None` or empty synthesizes `ctag<N>`.
    pub consumer_tag: Option<String>,
    pub arguments: FieldTable,
}

#[derive(Default)]
struct Consumers {
    callbacks: HashMap<String, Rc<ConsumerCallback>>,
    next_tag: u64,
}

impl Consumers {
    fn next_tag(&mut self) -> String {
        let tag = format!("ctag{}", self.next_tag);
        self.next_tag += 1;
        tag
    }
}

/// An open AMQP channel.
///
/// Cloning is cheap and yields another handle to the same channel. A channel
/// is driven by its connection's `drain_events` and is not `Send`.
#[derive(Clone)]
pub struct Channel {
    dispatcher: Rc<Dispatcher>,
    consumers: Rc<RefCell<Consumers>>,
}

impl Channel {
    /// Open a channel on a connection-allocated number with default config.
    pub fn open(connection: Rc<dyn Connection>) -> Result<Self> {
        Self::open_with_config(connection, None, ChannelConfig::default())
    }

    /// Open a channel, optionally on an explicit number.
    ///
    /// Blocks until the server confirms with Channel.OpenOk.
    pub fn open_with_config(
        connection: Rc<dyn Connection>,
        number: Option<u16>,
        config: ChannelConfig,
    ) -> Result<Self> {
        let dispatcher = Dispatcher::new(connection, number, config)?;
        let consumers = Rc::new(RefCell::new(Consumers::default()));

        let weak = Rc::downgrade(&consumers);
        dispatcher.register_handler(MethodKind::BasicDeliver, move |dispatcher, command| {
            deliver(dispatcher, &weak, command)
        });
        dispatcher.register_handler(MethodKind::BasicReturn, |_, _| {
            Err(ChannelError::NotSupported(MethodKind::BasicReturn))
        });
        dispatcher.register_handler(MethodKind::ChannelFlow, |_, _| {
            Err(ChannelError::NotSupported(MethodKind::ChannelFlow))
        });

        let channel = Self {
            dispatcher,
            consumers,
        };
        if let Err(err) = channel
            .dispatcher
            .rpc(ChannelOpen, &[MethodKind::ChannelOpenOk])
        {
            warn!(channel = channel.number(), error = %err, "channel open failed");
            channel.dispatcher.mark_closed(CloseReason::local(ChannelClose {
                reply_code: INTERNAL_ERROR,
                reply_text: format!("open failed: {err}"),
                class_id: 0,
                method_id: 0,
            }));
            return Err(err);
        }

        info!(channel = channel.number(), "channel opened");
        Ok(channel)
    }

    pub fn number(&self) -> u16 {
        self.dispatcher.number()
    }

    pub fn is_open(&self) -> bool {
        self.dispatcher.is_open()
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.dispatcher.close_reason()
    }

    /// The dispatcher behind this channel.
    pub fn dispatcher(&self) -> &Rc<Dispatcher> {
        &self.dispatcher
    }

    /// Registered consumer tags, sorted.
    pub fn consumer_tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.consumers.borrow().callbacks.keys().cloned().collect();
        tags.sort();
        tags
    }

    /// Register a lifecycle listener; it is called at once with the current
    /// state and then on every transition.
    pub fn add_lifecycle_listener<F>(&self, listener: F, key: Option<&str>)
    where
        F: Fn(&Dispatcher, bool) + 'static,
    {
        self.dispatcher.add_listener(listener, key);
    }

    pub fn remove_lifecycle_listener(&self, key: &str) -> bool {
        self.dispatcher.remove_listener(key)
    }

    /// Close the channel with a reply code and text.
    ///
    /// Sends Channel.Close and waits for Channel.CloseOk. If the server
    /// closes the channel during the handshake the close still succeeds.
    pub fn close(&self, reply_code: u16, reply_text: &str) -> Result<()> {
        self.dispatcher.ensure_open()?;
        let close = ChannelClose {
            reply_code,
            reply_text: reply_text.to_string(),
            class_id: 0,
            method_id: 0,
        };

        match self
            .dispatcher
            .rpc(close.clone(), &[MethodKind::ChannelCloseOk])
        {
            Ok(_) => {}
            Err(ChannelError::ChannelClosed(reason)) => {
                debug!(channel = self.number(), %reason, "channel closed by peer during close");
                return Ok(());
            }
            Err(err) => return Err(err),
        }

        self.dispatcher.mark_closed(CloseReason::local(close));
        Ok(())
    }

    /// Publish a message. No reply is awaited.
    pub fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: impl Into<Bytes>,
        properties: Option<BasicProperties>,
    ) -> Result<()> {
        self.publish_with(
            exchange,
            routing_key,
            body,
            properties,
            PublishOptions::default(),
        )
    }

    /// Publish a message with routing flags.
    pub fn publish_with(
        &self,
        exchange: &str,
        routing_key: &str,
        body: impl Into<Bytes>,
        properties: Option<BasicProperties>,
        options: PublishOptions,
    ) -> Result<()> {
        let publish = BasicPublish {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            mandatory: options.mandatory,
            immediate: options.immediate,
        };
        let content = Content::new(properties.unwrap_or_default(), body);
        self.dispatcher.send(publish, Some(content))
    }

    /// Start a consumer on `queue` and return the server-confirmed tag.
    ///
    /// The callback is registered before Basic.Consume is sent, so
    /// deliveries that race ahead of Basic.ConsumeOk still reach it.
    pub fn consume<F>(&self, callback: F, queue: &str, options: ConsumeOptions) -> Result<String>
    where
        F: Fn(&Channel, &BasicDeliver, &BasicProperties, &Bytes) + 'static,
    {
        self.dispatcher.ensure_open()?;

        let tag = {
            let mut consumers = self.consumers.borrow_mut();
            let tag = match options.consumer_tag {
                Some(tag) if !tag.is_empty() => tag,
                _ => consumers.next_tag(),
            };
            if consumers.callbacks.contains_key(&tag) {
                return Err(ChannelError::DuplicateConsumerTag(tag));
            }
            consumers.callbacks.insert(tag.clone(), Rc::new(callback));
            tag
        };

        let consume = BasicConsume {
            queue: queue.to_string(),
            consumer_tag: tag.clone(),
            no_local: false,
            no_ack: options.no_ack,
            exclusive: options.exclusive,
            no_wait: false,
            arguments: options.arguments,
        };
        let ok: BasicConsumeOk = match self.call(consume, MethodKind::BasicConsumeOk) {
            Ok(ok) => ok,
            Err(err) => {
                self.consumers.borrow_mut().callbacks.remove(&tag);
                return Err(err);
            }
        };

        if ok.consumer_tag != tag {
            let mut consumers = self.consumers.borrow_mut();
            let callback = consumers.callbacks.remove(&tag);
            if consumers.callbacks.contains_key(&ok.consumer_tag) {
                warn!(
                    channel = self.number(),
                    requested = %tag,
                    confirmed = %ok.consumer_tag,
                    "server confirmed a consumer tag that is already registered"
                );
                return Err(ChannelError::DuplicateConsumerTag(ok.consumer_tag));
            }
            if let Some(callback) = callback {
                consumers.callbacks.insert(ok.consumer_tag.clone(), callback);
            }
        }
        debug!(channel = self.number(), consumer_tag = %ok.consumer_tag, queue, "consumer started");
        Ok(ok.consumer_tag)
    }

    /// Stop a consumer. The callback is removed once the server confirms.
    pub fn cancel(&self, consumer_tag: &str) -> Result<()> {
        self.dispatcher.ensure_open()?;
        if !self.consumers.borrow().callbacks.contains_key(consumer_tag) {
            return Err(ChannelError::UnknownConsumerTag(consumer_tag.to_string()));
        }

        let cancel = BasicCancel {
            consumer_tag: consumer_tag.to_string(),
            no_wait: false,
        };
        let _: BasicCancelOk = self.call(cancel, MethodKind::BasicCancelOk)?;
        self.consumers.borrow_mut().callbacks.remove(consumer_tag);
        debug!(channel = self.number(), consumer_tag, "consumer cancelled");
        Ok(())
    }

    /// Declare an exchange. With `no_wait` set nothing is awaited.
    pub fn exchange_declare(&self, declare: ExchangeDeclare) -> Result<()> {
        let replies: &[MethodKind] = if declare.no_wait {
            &[]
        } else {
            &[MethodKind::ExchangeDeclareOk]
        };
        self.dispatcher.rpc(declare, replies)?;
        Ok(())
    }

    /// Declare a queue. Returns the server's reply, or `None` with `no_wait`.
    pub fn queue_declare(&self, declare: QueueDeclare) -> Result<Option<QueueDeclareOk>> {
        if declare.no_wait {
            self.dispatcher.rpc(declare, &[])?;
            return Ok(None);
        }
        self.call(declare, MethodKind::QueueDeclareOk).map(Some)
    }

    /// Bind a queue to an exchange. With `no_wait` set nothing is awaited.
    pub fn queue_bind(&self, bind: QueueBind) -> Result<()> {
        let replies: &[MethodKind] = if bind.no_wait {
            &[]
        } else {
            &[MethodKind::QueueBindOk]
        };
        self.dispatcher.rpc(bind, replies)?;
        Ok(())
    }

    /// Set the prefetch window.
    pub fn qos(&self, prefetch_size: u32, prefetch_count: u16, global: bool) -> Result<()> {
        let qos = BasicQos {
            prefetch_size,
            prefetch_count,
            global,
        };
        self.dispatcher.rpc(qos, &[MethodKind::BasicQosOk])?;
        Ok(())
    }

    /// Acknowledge one delivery, or every delivery up to the tag with
    /// `multiple`.
    pub fn ack(&self, delivery_tag: u64, multiple: bool) -> Result<()> {
        self.dispatcher.rpc(
            BasicAck {
                delivery_tag,
                multiple,
            },
            &[],
        )?;
        Ok(())
    }

    /// Reject one delivery.
    pub fn reject(&self, delivery_tag: u64, requeue: bool) -> Result<()> {
        self.dispatcher.rpc(
            BasicReject {
                delivery_tag,
                requeue,
            },
            &[],
        )?;
        Ok(())
    }

    fn call<T>(&self, method: impl Into<Method>, reply: MethodKind) -> Result<T>
    where
        T: TryFrom<Method, Error = Method>,
    {
        match self.dispatcher.rpc(method, &[reply])? {
            Some(command) => T::try_from(command.method)
                .map_err(|method| ChannelError::UnexpectedMethod(method.kind())),
            None => Err(ChannelError::UnexpectedMethod(reply)),
        }
    }

    fn deliver(&self, command: Command) -> Result<()> {
        let deliver = BasicDeliver::try_from(command.method)
            .map_err(|method| ChannelError::UnexpectedMethod(method.kind()))?;
        let content = command.content.unwrap_or_default();

        let callback = self
            .consumers
            .borrow()
            .callbacks
            .get(&deliver.consumer_tag)
            .cloned();
        match callback {
            Some(callback) => {
                trace!(
                    channel = self.number(),
                    consumer_tag = %deliver.consumer_tag,
                    delivery_tag = deliver.delivery_tag,
                    "delivering message"
                );
                callback(self, &deliver, &content.properties, &content.body);
                Ok(())
            }
            None if self.dispatcher.config().fail_on_unknown_consumer => {
                warn!(channel = self.number(), consumer_tag = %deliver.consumer_tag, "delivery for unknown consumer");
                Err(ChannelError::UnknownConsumerTag(deliver.consumer_tag))
            }
            None => {
                warn!(channel = self.number(), consumer_tag = %deliver.consumer_tag, "dropping delivery for unknown consumer");
                Ok(())
            }
        }
    }
}

fn deliver(
    dispatcher: &Rc<Dispatcher>,
    consumers: &Weak<RefCell<Consumers>>,
    command: Command,
) -> Result<()> {
    let Some(consumers) = consumers.upgrade() else {
        return Ok(());
    };
    let channel = Channel {
        dispatcher: Rc::clone(dispatcher),
        consumers,
    };
    channel.deliver(command)
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("dispatcher", &self.dispatcher)
            .field("consumers", &self.consumer_tags())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use amqmux_frame::{BasicConsumeOk, ChannelFlow, Frame, ACCESS_REFUSED};

    use super::*;
    use crate::lifecycle::Initiator;
    use crate::memory::{reply_for, MemoryConnection};

    fn loopback() -> (Rc<MemoryConnection>, Channel) {
        let connection = Rc::new(MemoryConnection::loopback());
        let channel = Channel::open(connection.clone()).unwrap();
        (connection, channel)
    }

    fn noop(_: &Channel, _: &BasicDeliver, _: &BasicProperties, _: &Bytes) {}

    #[test]
    fn open_sends_channel_open() {
        let (connection, channel) = loopback();
        assert!(channel.is_open());
        assert_eq!(channel.number(), 1);

        let sent = connection.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].method.kind(), MethodKind::ChannelOpen);
    }

    #[test]
    fn synthesized_consumer_tags_count_up() {
        let (_connection, channel) = loopback();

        for expected in ["ctag0", "ctag1", "ctag2"] {
            let tag = channel
                .consume(noop, "jobs", ConsumeOptions::default())
                .unwrap();
            assert_eq!(tag, expected);
        }
        assert_eq!(channel.consumer_tags(), vec!["ctag0", "ctag1", "ctag2"]);
    }

    #[test]
    fn duplicate_consumer_tag_is_rejected() {
        let (connection, channel) = loopback();
        let options = ConsumeOptions {
            consumer_tag: Some("worker".to_string()),
            ..ConsumeOptions::default()
        };
        channel.consume(noop, "jobs", options.clone()).unwrap();
        connection.take_sent();

        let err = channel.consume(noop, "other", options).unwrap_err();
        assert!(matches!(err, ChannelError::DuplicateConsumerTag(tag) if tag == "worker"));
        assert_eq!(channel.consumer_tags(), vec!["worker"]);
        assert!(connection.sent().is_empty());
    }

    #[test]
    fn server_assigned_tag_replaces_requested_one() {
        let connection = Rc::new(MemoryConnection::new().with_responder(|_, method| {
            let reply = match method {
                Method::BasicConsume(_) => Some(Method::from(BasicConsumeOk {
                    consumer_tag: "amq.ctag-Xy1".to_string(),
                })),
                other => reply_for(other),
            };
            reply.map(Frame::Method).into_iter().collect()
        }));
        let channel = Channel::open(connection.clone()).unwrap();

        let tag = channel
            .consume(noop, "jobs", ConsumeOptions::default())
            .unwrap();
        assert_eq!(tag, "amq.ctag-Xy1");
        assert_eq!(channel.consumer_tags(), vec!["amq.ctag-Xy1"]);
    }

    #[test]
    fn confirmed_tag_colliding_with_registered_one_is_rejected() {
        let connection = Rc::new(MemoryConnection::new().with_responder(|_, method| {
            let reply = match method {
                Method::BasicConsume(_) => Some(Method::from(BasicConsumeOk {
                    consumer_tag: "worker".to_string(),
                })),
                other => reply_for(other),
            };
            reply.map(Frame::Method).into_iter().collect()
        }));
        let channel = Channel::open(connection.clone()).unwrap();

        let first = Rc::new(std::cell::Cell::new(0));
        let counter = Rc::clone(&first);
        let options = ConsumeOptions {
            consumer_tag: Some("worker".to_string()),
            ..ConsumeOptions::default()
        };
        channel
            .consume(
                move |_, _, _, _| counter.set(counter.get() + 1),
                "jobs",
                options,
            )
            .unwrap();

        let err = channel
            .consume(noop, "jobs", ConsumeOptions::default())
            .unwrap_err();
        assert!(matches!(err, ChannelError::DuplicateConsumerTag(tag) if tag == "worker"));
        assert_eq!(channel.consumer_tags(), vec!["worker"]);

        connection
            .push_content(
                channel.number(),
                BasicDeliver {
                    consumer_tag: "worker".to_string(),
                    delivery_tag: 1,
                    ..BasicDeliver::default()
                },
                BasicProperties::default(),
                "job",
            )
            .unwrap();
        connection.drain_events(None).unwrap();
        assert_eq!(first.get(), 1);
    }

    #[test]
    fn refused_consume_unregisters_callback() {
        let connection = Rc::new(MemoryConnection::new().with_responder(|_, method| {
            let reply = match method {
                Method::BasicConsume(_) => Some(Method::from(ChannelClose {
                    reply_code: ACCESS_REFUSED,
                    reply_text: "ACCESS_REFUSED - queue 'jobs' in exclusive use".to_string(),
                    class_id: 60,
                    method_id: 20,
                })),
                other => reply_for(other),
            };
            reply.map(Frame::Method).into_iter().collect()
        }));
        let channel = Channel::open(connection.clone()).unwrap();

        let err = channel
            .consume(noop, "jobs", ConsumeOptions::default())
            .unwrap_err();
        let reason = match err {
            ChannelError::ChannelClosed(reason) => reason,
            other => panic!("expected ChannelClosed, got {other:?}"),
        };
        assert_eq!(reason.initiator, Initiator::Remote);
        assert_eq!(reason.reply_code, ACCESS_REFUSED);
        assert!(channel.consumer_tags().is_empty());
    }

    #[test]
    fn cancel_unknown_tag() {
        let (connection, channel) = loopback();
        connection.take_sent();

        let err = channel.cancel("ctag9").unwrap_err();
        assert!(matches!(err, ChannelError::UnknownConsumerTag(tag) if tag == "ctag9"));
        assert!(connection.sent().is_empty());
    }

    #[test]
    fn cancel_removes_consumer_after_confirmation() {
        let (connection, channel) = loopback();
        let tag = channel
            .consume(noop, "jobs", ConsumeOptions::default())
            .unwrap();

        channel.cancel(&tag).unwrap();
        assert!(channel.consumer_tags().is_empty());
        let last = connection.sent().pop().unwrap();
        assert_eq!(last.method.kind(), MethodKind::BasicCancel);
    }

    #[test]
    fn publish_without_properties_sends_defaults() {
        let (connection, channel) = loopback();
        connection.take_sent();

        channel.publish("", "jobs", "payload", None).unwrap();

        let sent = connection.take_sent();
        assert_eq!(sent.len(), 1);
        let Method::BasicPublish(publish) = &sent[0].method else {
            panic!("expected Basic.Publish, got {:?}", sent[0].method);
        };
        assert_eq!(publish.routing_key, "jobs");
        assert!(!publish.mandatory);
        let content = sent[0].content.as_ref().unwrap();
        assert_eq!(content.properties, BasicProperties::default());
        assert_eq!(content.body, Bytes::from_static(b"payload"));
    }

    #[test]
    fn publish_with_flags_and_properties() {
        let (connection, channel) = loopback();
        connection.take_sent();

        let properties = BasicProperties::default()
            .with_content_type("application/json")
            .with_delivery_mode(BasicProperties::PERSISTENT);
        channel
            .publish_with(
                "events",
                "user.created",
                Bytes::from_static(b"{}"),
                Some(properties.clone()),
                PublishOptions {
                    mandatory: true,
                    immediate: false,
                },
            )
            .unwrap();

        let sent = connection.take_sent();
        let Method::BasicPublish(publish) = &sent[0].method else {
            panic!("expected Basic.Publish, got {:?}", sent[0].method);
        };
        assert!(publish.mandatory);
        assert_eq!(sent[0].content.as_ref().unwrap().properties, properties);
    }

    #[test]
    fn no_wait_declare_does_not_block() {
        let connection = Rc::new(MemoryConnection::loopback());
        let channel = Channel::open(connection.clone()).unwrap();

        let declared = channel
            .queue_declare(QueueDeclare {
                queue: "jobs".to_string(),
                no_wait: true,
                ..QueueDeclare::default()
            })
            .unwrap();
        assert!(declared.is_none());
        assert_eq!(connection.pending_frames(), 0);

        let declared = channel
            .queue_declare(QueueDeclare::default())
            .unwrap()
            .unwrap();
        assert_eq!(declared.queue, "amq.gen-memory");
    }

    #[test]
    fn flow_is_reported_as_not_supported() {
        let (connection, channel) = loopback();
        connection.push_method(channel.number(), ChannelFlow { active: false });

        let err = connection.drain_events(None).unwrap_err();
        assert!(matches!(
            err,
            ChannelError::NotSupported(MethodKind::ChannelFlow)
        ));
        assert!(channel.is_open());
    }
}
