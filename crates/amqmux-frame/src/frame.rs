use std::fmt;

use bytes::Bytes;

use crate::constants::{FRAME_BODY, FRAME_HEADER, FRAME_METHOD};
use crate::error::{FrameError, Result};
use crate::method::Method;
use crate::properties::BasicProperties;

/// Per-frame overhead on the wire: type (1) + channel (2) + size (4) + frame-end (1).
pub const FRAME_OVERHEAD: usize = 8;

/// Content header: the properties and total body size of the content that
/// follows a content-bearing method.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContentHeader {
    /// Declared total size of all body fragments, in bytes.
    pub body_size: u64,
    pub properties: BasicProperties,
}

/// A decoded frame addressed to one channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Method(Method),
    Header(ContentHeader),
    /// One fragment of the message body.
    Body(Bytes),
}

/// The kind of a [`Frame`], without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    Method,
    Header,
    Body,
}

impl Frame {
    pub fn method(method: impl Into<Method>) -> Self {
        Self::Method(method.into())
    }

    pub fn header(properties: BasicProperties, body_size: u64) -> Self {
        Self::Header(ContentHeader {
            body_size,
            properties,
        })
    }

    pub fn body(fragment: impl Into<Bytes>) -> Self {
        Self::Body(fragment.into())
    }

    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Method(_) => FrameType::Method,
            Frame::Header(_) => FrameType::Header,
            Frame::Body(_) => FrameType::Body,
        }
    }
}

impl FrameType {
    /// Wire type octet.
    pub fn as_u8(self) -> u8 {
        match self {
            FrameType::Method => FRAME_METHOD,
            FrameType::Header => FRAME_HEADER,
            FrameType::Body => FRAME_BODY,
        }
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FrameType::Method => "method",
            FrameType::Header => "header",
            FrameType::Body => "body",
        })
    }
}

/// Split a content-bearing command into its method, header and body frames.
///
/// `frame_max` is the negotiated maximum frame size; each body fragment is
/// at most `frame_max - FRAME_OVERHEAD` bytes. A `frame_max` of zero means
/// no limit. An empty body produces no body frames.
pub fn content_frames(
    method: impl Into<Method>,
    properties: BasicProperties,
    body: Bytes,
    frame_max: usize,
) -> Result<Vec<Frame>> {
    let method = method.into();
    if !method.has_content() {
        return Err(FrameError::NoContent(method.kind()));
    }

    let fragment_max = match frame_max {
        0 => usize::MAX,
        max => max.saturating_sub(FRAME_OVERHEAD).max(1),
    };

    let mut frames = Vec::with_capacity(3);
    frames.push(Frame::Method(method));
    frames.push(Frame::header(properties, body.len() as u64));

    let mut offset = 0usize;
    while offset < body.len() {
        let end = body.len().min(offset.saturating_add(fragment_max));
        frames.push(Frame::Body(body.slice(offset..end)));
        offset = end;
    }

    Ok(frames)
}
