use crate::method::MethodKind;

/// Errors raised while interpreting protocol records.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The (class, method) pair does not name a known method.
    #[error("unknown method (class {class_id}, method {method_id})")]
    UnknownMethod { class_id: u16, method_id: u16 },

    /// Content was supplied for a method that does not carry any.
    #[error("method {0} does not carry content")]
    NoContent(MethodKind),
}

pub type Result<T> = std::result::Result<T, FrameError>;
