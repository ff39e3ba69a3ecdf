use std::time::Duration;

/// Default upper bound for a blocking call.
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-channel behavior settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Maximum time a blocking call waits for its reply. `None` waits until
    /// the reply arrives or the channel closes.
    pub rpc_timeout: Option<Duration>,
    /// When true, a delivery for an unregistered consumer tag fails dispatch
    /// with `UnknownConsumerTag`. When false it is dropped with a warning.
    pub fail_on_unknown_consumer: bool,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            rpc_timeout: Some(DEFAULT_RPC_TIMEOUT),
            fail_on_unknown_consumer: true,
        }
    }
}
