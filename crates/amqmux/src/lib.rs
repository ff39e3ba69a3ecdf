//! AMQP 0-9-1 channel multiplexing over a single connection.
//!
//! # Crate Structure
//!
//! - [`frame`]: method kinds, typed method arguments, content properties and
//!   decoded frame records
//! - [`channel`]: frame reassembly, RPC correlation, channel lifecycle and the
//!   [`channel::Channel`] facade

/// Re-export frame types.
pub mod frame {
    pub use amqmux_frame::*;
}

/// Re-export channel types.
pub mod channel {
    pub use amqmux_channel::*;
}
