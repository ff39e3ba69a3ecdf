//! Frame type octets and reply codes.
//!
//! Reply codes below 400 are informational or channel-level soft errors;
//! codes from 500 upward are connection-level hard errors.

/// Method frame type octet.
pub const FRAME_METHOD: u8 = 1;

/// Content header frame type octet.
pub const FRAME_HEADER: u8 = 2;

/// Content body frame type octet.
pub const FRAME_BODY: u8 = 3;

/// Octet terminating every frame on the wire.
pub const FRAME_END: u8 = 0xCE;

/// Smallest frame size a peer may negotiate.
pub const FRAME_MIN_SIZE: usize = 4096;

/// Normal completion.
pub const REPLY_SUCCESS: u16 = 200;

/// The operator or broker forced the channel or connection closed.
pub const CONNECTION_FORCED: u16 = 320;

/// Access to a resource was refused.
pub const ACCESS_REFUSED: u16 = 403;

/// The named resource does not exist.
pub const NOT_FOUND: u16 = 404;

/// A precondition of the request was not met.
pub const PRECONDITION_FAILED: u16 = 406;

/// A frame arrived that was not valid in the current state.
pub const UNEXPECTED_FRAME: u16 = 505;

/// The peer tried to use a channel that is not open.
pub const CHANNEL_ERROR: u16 = 504;

/// The peer sent a method this side does not implement.
pub const NOT_IMPLEMENTED: u16 = 540;

/// The peer hit an internal error.
pub const INTERNAL_ERROR: u16 = 541;

/// Returns a human-readable name for a reply code.
pub fn reply_code_name(code: u16) -> &'static str {
    match code {
        REPLY_SUCCESS => "REPLY_SUCCESS",
        CONNECTION_FORCED => "CONNECTION_FORCED",
        ACCESS_REFUSED => "ACCESS_REFUSED",
        NOT_FOUND => "NOT_FOUND",
        PRECONDITION_FAILED => "PRECONDITION_FAILED",
        CHANNEL_ERROR => "CHANNEL_ERROR",
        UNEXPECTED_FRAME => "UNEXPECTED_FRAME",
        NOT_IMPLEMENTED => "NOT_IMPLEMENTED",
        INTERNAL_ERROR => "INTERNAL_ERROR",
        300..=499 => "SOFT_ERROR",
        500..=599 => "HARD_ERROR",
        _ => "UNKNOWN",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_codes_have_names() {
        assert_eq!(reply_code_name(REPLY_SUCCESS), "REPLY_SUCCESS");
        assert_eq!(reply_code_name(NOT_IMPLEMENTED), "NOT_IMPLEMENTED");
    }

    #[test]
    fn unnamed_codes_fall_back_to_range() {
        assert_eq!(reply_code_name(405), "SOFT_ERROR");
        assert_eq!(reply_code_name(530), "HARD_ERROR");
        assert_eq!(reply_code_name(0), "UNKNOWN");
    }
}
