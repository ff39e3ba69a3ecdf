//! AMQP 0-9-1 frame records and protocol schema.
//!
//! This crate is the vocabulary the channel layer speaks. It defines:
//! - [`MethodKind`], a closed tag for every method the client understands
//! - [`Method`], the typed arguments of each method
//! - [`BasicProperties`], the content header property record
//! - [`Frame`], the three frame records a channel receives (method, header, body)
//!
//! Binary encoding is left to the connection; frames here are already decoded.

pub mod constants;
pub mod error;
pub mod frame;
pub mod method;
pub mod properties;

pub use constants::{
    reply_code_name, ACCESS_REFUSED, CHANNEL_ERROR, CONNECTION_FORCED, FRAME_BODY, FRAME_END,
    FRAME_HEADER, FRAME_METHOD, FRAME_MIN_SIZE, INTERNAL_ERROR, NOT_FOUND, NOT_IMPLEMENTED,
    PRECONDITION_FAILED, REPLY_SUCCESS, UNEXPECTED_FRAME,
};
pub use error::{FrameError, Result};
pub use frame::{content_frames, ContentHeader, Frame, FrameType, FRAME_OVERHEAD};
pub use method::{
    BasicAck, BasicCancel, BasicCancelOk, BasicConsume, BasicConsumeOk, BasicDeliver,
    BasicPublish, BasicQos, BasicQosOk, BasicReject, BasicReturn, ChannelClose, ChannelCloseOk,
    ChannelFlow, ChannelFlowOk, ChannelOpen, ChannelOpenOk, ExchangeDeclare, ExchangeDeclareOk,
    Method, MethodKind, QueueBind, QueueBindOk, QueueDeclare, QueueDeclareOk,
};
pub use properties::{BasicProperties, FieldTable, FieldValue};
