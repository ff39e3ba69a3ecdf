use std::time::Duration;

use amqmux_frame::{Frame, FrameError, FrameType, MethodKind};

use crate::lifecycle::CloseReason;

/// Errors that can occur in channel operations.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// The channel was closed before or during the operation.
    #[error("channel closed: {0}")]
    ChannelClosed(CloseReason),

    /// A frame arrived that is not valid in the current reassembly state.
    #[error("unexpected {} frame (expected {expected})", .frame.frame_type())]
    UnexpectedFrame {
        expected: FrameType,
        frame: Box<Frame>,
    },

    /// Body fragments exceeded the size declared by the content header.
    #[error("body too long ({received} bytes, header declared {declared})")]
    BodyTooLong { declared: u64, received: u64 },

    /// A blocking call is already waiting for this reply kind.
    #[error("recursive operation detected: already waiting for {0}")]
    RecursiveOperation(MethodKind),

    /// The consumer tag is already registered on this channel.
    #[error("duplicate consumer tag '{0}'")]
    DuplicateConsumerTag(String),

    /// The consumer tag is not registered on this channel.
    #[error("unknown consumer tag '{0}'")]
    UnknownConsumerTag(String),

    /// The method is recognised but deliberately not handled.
    #[error("{0} not supported")]
    NotSupported(MethodKind),

    /// A method of the wrong kind reached a typed handler.
    #[error("unexpected method {0}")]
    UnexpectedMethod(MethodKind),

    /// No reply arrived within the configured RPC timeout.
    #[error("rpc timed out after {0:?}")]
    Timeout(Duration),

    /// The channel number is reserved or already registered.
    #[error("channel {0} is unavailable")]
    ChannelUnavailable(u16),

    /// Every channel number up to the channel max is in use.
    #[error("no free channel numbers (channel max {0})")]
    ChannelsExhausted(u16),

    /// The underlying connection failed or is closed.
    #[error("connection error: {0}")]
    Connection(String),

    /// Protocol record error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
}

pub type Result<T> = std::result::Result<T, ChannelError>;
