//! Method kinds and their typed arguments.
//!
//! [`MethodKind`] is the routing key used by the channel dispatcher: a closed,
//! `Copy` tag with the wire ids and content flag of each method. [`Method`]
//! carries the arguments. Every argument struct converts into a [`Method`]
//! and back again with `TryFrom`, which hands the original method back on a
//! kind mismatch.

use std::fmt;

use crate::error::FrameError;
use crate::properties::FieldTable;

macro_rules! methods {
    ($($kind:ident => ($class_id:literal, $method_id:literal, $name:literal, $content:literal);)*) => {
        /// Tag identifying one AMQP method.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum MethodKind {
            $($kind,)*
        }

        impl MethodKind {
            /// Every known method kind.
            pub const ALL: &'static [MethodKind] = &[$(MethodKind::$kind,)*];

            /// Wire `(class_id, method_id)` pair.
            pub fn ids(self) -> (u16, u16) {
                match self {
                    $(MethodKind::$kind => ($class_id, $method_id),)*
                }
            }

            /// Dotted protocol name, e.g. `Basic.Deliver`.
            pub fn name(self) -> &'static str {
                match self {
                    $(MethodKind::$kind => $name,)*
                }
            }

            /// Whether a content header and body follow this method on the wire.
            pub fn has_content(self) -> bool {
                match self {
                    $(MethodKind::$kind => $content,)*
                }
            }
        }

        /// A decoded method with its arguments.
        #[derive(Debug, Clone, PartialEq)]
        pub enum Method {
            $($kind($kind),)*
        }

        impl Method {
            pub fn kind(&self) -> MethodKind {
                match self {
                    $(Method::$kind(_) => MethodKind::$kind,)*
                }
            }
        }

        $(
            impl From<$kind> for Method {
                fn from(method: $kind) -> Self {
                    Method::$kind(method)
                }
            }

            impl TryFrom<Method> for $kind {
                type Error = Method;

                fn try_from(method: Method) -> std::result::Result<Self, Method> {
                    match method {
                        Method::$kind(inner) => Ok(inner),
                        other => Err(other),
                    }
                }
            }
        )*
    };
}

methods! {
    ChannelOpen => (20, 10, "Channel.Open", false);
    ChannelOpenOk => (20, 11, "Channel.OpenOk", false);
    ChannelFlow => (20, 20, "Channel.Flow", false);
    ChannelFlowOk => (20, 21, "Channel.FlowOk", false);
    ChannelClose => (20, 40, "Channel.Close", false);
    ChannelCloseOk => (20, 41, "Channel.CloseOk", false);
    ExchangeDeclare => (40, 10, "Exchange.Declare", false);
    ExchangeDeclareOk => (40, 11, "Exchange.DeclareOk", false);
    QueueDeclare => (50, 10, "Queue.Declare", false);
    QueueDeclareOk => (50, 11, "Queue.DeclareOk", false);
    QueueBind => (50, 20, "Queue.Bind", false);
    QueueBindOk => (50, 21, "Queue.BindOk", false);
    BasicQos => (60, 10, "Basic.Qos", false);
    BasicQosOk => (60, 11, "Basic.QosOk", false);
    BasicConsume => (60, 20, "Basic.Consume", false);
    BasicConsumeOk => (60, 21, "Basic.ConsumeOk", false);
    BasicCancel => (60, 30, "Basic.Cancel", false);
    BasicCancelOk => (60, 31, "Basic.CancelOk", false);
    BasicPublish => (60, 40, "Basic.Publish", true);
    BasicReturn => (60, 50, "Basic.Return", true);
    BasicDeliver => (60, 60, "Basic.Deliver", true);
    BasicAck => (60, 80, "Basic.Ack", false);
    BasicReject => (60, 90, "Basic.Reject", false);
}

impl MethodKind {
    /// Look up a kind by its wire ids.
    pub fn from_ids(class_id: u16, method_id: u16) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.ids() == (class_id, method_id))
    }

    pub fn class_id(self) -> u16 {
        self.ids().0
    }

    pub fn method_id(self) -> u16 {
        self.ids().1
    }
}

impl TryFrom<(u16, u16)> for MethodKind {
    type Error = FrameError;

    fn try_from((class_id, method_id): (u16, u16)) -> Result<Self, FrameError> {
        Self::from_ids(class_id, method_id).ok_or(FrameError::UnknownMethod {
            class_id,
            method_id,
        })
    }
}

impl fmt::Display for MethodKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Method {
    pub fn has_content(&self) -> bool {
        self.kind().has_content()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelOpen;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelOpenOk;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelFlow {
    pub active: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelFlowOk {
    pub active: bool,
}

/// Close request. `class_id`/`method_id` name the method that caused the
/// close, or are zero for a normal shutdown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelClose {
    pub reply_code: u16,
    pub reply_text: String,
    pub class_id: u16,
    pub method_id: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelCloseOk;

#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeDeclare {
    pub exchange: String,
    /// Exchange type: `direct`, `fanout`, `topic` or `headers`.
    pub kind: String,
    pub passive: bool,
    pub durable: bool,
    pub auto_delete: bool,
    pub internal: bool,
    pub no_wait: bool,
    pub arguments: FieldTable,
}

impl Default for ExchangeDeclare {
    fn default() -> Self {
        Self {
            exchange: String::new(),
            kind: "direct".to_string(),
            passive: false,
            durable: false,
            auto_delete: false,
            internal: false,
            no_wait: false,
            arguments: FieldTable::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExchangeDeclareOk;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueDeclare {
    /// Empty asks the server to generate a name.
    pub queue: String,
    pub passive: bool,
    pub durable: bool,
    pub exclusive: bool,
    pub auto_delete: bool,
    pub no_wait: bool,
    pub arguments: FieldTable,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueDeclareOk {
    pub queue: String,
    pub message_count: u32,
    pub consumer_count: u32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueBind {
    pub queue: String,
    pub exchange: String,
    pub routing_key: String,
    pub no_wait: bool,
    pub arguments: FieldTable,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueBindOk;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BasicQos {
    pub prefetch_size: u32,
    pub prefetch_count: u16,
    pub global: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BasicQosOk;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BasicConsume {
    pub queue: String,
    pub consumer_tag: String,
    pub no_local: bool,
    pub no_ack: bool,
    pub exclusive: bool,
    pub no_wait: bool,
    pub arguments: FieldTable,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BasicConsumeOk {
    pub consumer_tag: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BasicCancel {
    pub consumer_tag: String,
    pub no_wait: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BasicCancelOk {
    pub consumer_tag: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BasicPublish {
    pub exchange: String,
    pub routing_key: String,
    pub mandatory: bool,
    pub immediate: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BasicReturn {
    pub reply_code: u16,
    pub reply_text: String,
    pub exchange: String,
    pub routing_key: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BasicDeliver {
    pub consumer_tag: String,
    pub delivery_tag: u64,
    pub redelivered: bool,
    pub exchange: String,
    pub routing_key: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BasicAck {
    pub delivery_tag: u64,
    pub multiple: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BasicReject {
    pub delivery_tag: u64,
    pub requeue: bool,
}
