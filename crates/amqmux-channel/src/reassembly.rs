//! Per-channel frame reassembly.
//!
//! A channel receives frames in the order method, then (for content-bearing
//! methods) one header, then body fragments until the declared size is
//! reached. [`Reassembler`] tracks which frame comes next and yields a
//! complete [`Command`] once the sequence is finished.

use bytes::{Bytes, BytesMut};

use amqmux_frame::{BasicProperties, ContentHeader, Frame, FrameType, Method};

use crate::error::{ChannelError, Result};

/// Properties and body attached to a content-bearing method.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Content {
    pub properties: BasicProperties,
    pub body: Bytes,
}

impl Content {
    pub fn new(properties: BasicProperties, body: impl Into<Bytes>) -> Self {
        Self {
            properties,
            body: body.into(),
        }
    }
}

/// A fully assembled method with its content, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub method: Method,
    pub content: Option<Content>,
}

impl Command {
    pub fn new(method: impl Into<Method>) -> Self {
        Self {
            method: method.into(),
            content: None,
        }
    }

    pub fn with_content(method: impl Into<Method>, content: Content) -> Self {
        Self {
            method: method.into(),
            content: Some(content),
        }
    }
}

#[derive(Debug, Default)]
enum Expect {
    #[default]
    Method,
    Header(Method),
    Body(PartialContent),
}

#[derive(Debug)]
struct PartialContent {
    method: Method,
    header: ContentHeader,
    fragments: Vec<Bytes>,
    received: u64,
}

impl PartialContent {
    fn finish(self) -> Command {
        let body = match self.fragments.len() {
            0 => Bytes::new(),
            1 => self.fragments.into_iter().next().unwrap_or_default(),
            _ => {
                let mut buf = BytesMut::with_capacity(self.received as usize);
                for fragment in &self.fragments {
                    buf.extend_from_slice(fragment);
                }
                buf.freeze()
            }
        };
        Command::with_content(self.method, Content::new(self.header.properties, body))
    }
}

impl Expect {
    fn frame_type(&self) -> FrameType {
        match self {
            Expect::Method => FrameType::Method,
            Expect::Header(_) => FrameType::Header,
            Expect::Body(_) => FrameType::Body,
        }
    }
}

/// Frame-sequence state machine for one channel.
#[derive(Debug, Default)]
pub struct Reassembler {
    state: Expect,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// The frame type accepted next.
    pub fn expected(&self) -> FrameType {
        self.state.frame_type()
    }

    /// True when no content assembly is in flight.
    pub fn is_idle(&self) -> bool {
        matches!(self.state, Expect::Method)
    }

    /// Feed one frame.
    ///
    /// Returns `Some(command)` when the frame completes a command. The state
    /// is back to expecting a method before this returns, both on completion
    /// and on error; an error discards only the assembly in flight.
    pub fn handle(&mut self, frame: Frame) -> Result<Option<Command>> {
        match (std::mem::take(&mut self.state), frame) {
            (Expect::Method, Frame::Method(method)) => {
                if method.has_content() {
                    self.state = Expect::Header(method);
                    Ok(None)
                } else {
                    Ok(Some(Command::new(method)))
                }
            }
            (Expect::Header(method), Frame::Header(header)) => {
                let partial = PartialContent {
                    method,
                    header,
                    fragments: Vec::new(),
                    received: 0,
                };
                if partial.header.body_size == 0 {
                    Ok(Some(partial.finish()))
                } else {
                    self.state = Expect::Body(partial);
                    Ok(None)
                }
            }
            (Expect::Body(mut partial), Frame::Body(fragment)) => {
                partial.received += fragment.len() as u64;
                let declared = partial.header.body_size;
                if partial.received > declared {
                    return Err(ChannelError::BodyTooLong {
                        declared,
                        received: partial.received,
                    });
                }
                partial.fragments.push(fragment);
                if partial.received == declared {
                    Ok(Some(partial.finish()))
                } else {
                    self.state = Expect::Body(partial);
                    Ok(None)
                }
            }
            (state, frame) => Err(ChannelError::UnexpectedFrame {
                expected: state.frame_type(),
                frame: Box::new(frame),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use amqmux_frame::{
        content_frames, BasicDeliver, BasicPublish, ChannelOpenOk, MethodKind, FRAME_OVERHEAD,
    };

    use super::*;

    fn deliver() -> Method {
        Method::from(BasicDeliver {
            consumer_tag: "ctag0".to_string(),
            delivery_tag: 1,
            ..BasicDeliver::default()
        })
    }

    #[test]
    fn plain_method_resolves_immediately() {
        let mut reassembler = Reassembler::new();
        let command = reassembler
            .handle(Frame::method(ChannelOpenOk))
            .unwrap()
            .unwrap();

        assert_eq!(command.method.kind(), MethodKind::ChannelOpenOk);
        assert!(command.content.is_none());
        assert!(reassembler.is_idle());
    }

    #[test]
    fn content_method_waits_for_header_and_body() {
        let mut reassembler = Reassembler::new();

        assert!(reassembler.handle(Frame::Method(deliver())).unwrap().is_none());
        assert_eq!(reassembler.expected(), FrameType::Header);

        let props = BasicProperties::default().with_content_type("text/plain");
        assert!(reassembler
            .handle(Frame::header(props.clone(), 11))
            .unwrap()
            .is_none());
        assert_eq!(reassembler.expected(), FrameType::Body);

        assert!(reassembler.handle(Frame::body(&b"hello"[..])).unwrap().is_none());
        assert!(reassembler.handle(Frame::body(&b" "[..])).unwrap().is_none());
        let command = reassembler
            .handle(Frame::body(&b"world"[..]))
            .unwrap()
            .unwrap();

        let content = command.content.unwrap();
        assert_eq!(content.body.as_ref(), b"hello world");
        assert_eq!(content.properties, props);
        assert!(reassembler.is_idle());
    }

    #[test]
    fn zero_size_header_resolves_without_body() {
        let mut reassembler = Reassembler::new();
        reassembler.handle(Frame::Method(deliver())).unwrap();

        let command = reassembler
            .handle(Frame::header(BasicProperties::default(), 0))
            .unwrap()
            .unwrap();

        assert_eq!(command.content.unwrap().body.len(), 0);
        assert!(reassembler.is_idle());
    }

    #[test]
    fn split_content_reassembles_in_order() {
        let body: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
        let frames = content_frames(
            BasicPublish::default(),
            BasicProperties::default(),
            Bytes::from(body.clone()),
            FRAME_OVERHEAD + 333,
        )
        .unwrap();
        let frame_count = frames.len();

        let mut reassembler = Reassembler::new();
        let mut completed = Vec::new();
        for (index, frame) in frames.into_iter().enumerate() {
            if let Some(command) = reassembler.handle(frame).unwrap() {
                completed.push((index, command));
            }
        }

        assert_eq!(completed.len(), 1);
        let (index, command) = completed.pop().unwrap();
        assert_eq!(index, frame_count - 1);
        assert_eq!(command.content.unwrap().body.as_ref(), body.as_slice());
        assert!(reassembler.is_idle());
    }

    #[test]
    fn body_too_long_detected_at_crossing_fragment() {
        let mut reassembler = Reassembler::new();
        reassembler.handle(Frame::Method(deliver())).unwrap();
        reassembler
            .handle(Frame::header(BasicProperties::default(), 4))
            .unwrap();

        assert!(reassembler.handle(Frame::body(&b"abc"[..])).unwrap().is_none());
        let err = reassembler.handle(Frame::body(&b"de"[..])).unwrap_err();

        assert!(matches!(
            err,
            ChannelError::BodyTooLong {
                declared: 4,
                received: 5
            }
        ));
        assert!(reassembler.is_idle());
    }

    #[test]
    fn header_while_expecting_method_is_unexpected() {
        let mut reassembler = Reassembler::new();
        let err = reassembler
            .handle(Frame::header(BasicProperties::default(), 1))
            .unwrap_err();

        match err {
            ChannelError::UnexpectedFrame { expected, frame } => {
                assert_eq!(expected, FrameType::Method);
                assert_eq!(frame.frame_type(), FrameType::Header);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn method_during_body_aborts_assembly() {
        let mut reassembler = Reassembler::new();
        reassembler.handle(Frame::Method(deliver())).unwrap();
        reassembler
            .handle(Frame::header(BasicProperties::default(), 8))
            .unwrap();
        reassembler.handle(Frame::body(&b"part"[..])).unwrap();

        let err = reassembler.handle(Frame::method(ChannelOpenOk)).unwrap_err();
        assert!(matches!(
            err,
            ChannelError::UnexpectedFrame {
                expected: FrameType::Body,
                ..
            }
        ));

        // The aborted assembly is gone; the next method is accepted.
        let command = reassembler
            .handle(Frame::method(ChannelOpenOk))
            .unwrap()
            .unwrap();
        assert_eq!(command.method.kind(), MethodKind::ChannelOpenOk);
    }
}
