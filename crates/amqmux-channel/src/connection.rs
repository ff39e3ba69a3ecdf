use std::rc::Rc;
use std::time::Duration;

use amqmux_frame::Method;

use crate::dispatcher::Dispatcher;
use crate::error::Result;
use crate::reassembly::Content;

/// The connection a channel is multiplexed over.
///
/// The connection owns socket I/O, frame decoding and the channel-number
/// namespace. Channels only register and release their own number, send
/// methods, and ask the connection to drain pending events.
///
/// All methods take `&self`: a channel calls back into its connection from
/// inside `drain_events` (nested RPCs, automatic Channel.CloseOk), so
/// implementations must not hold internal borrows across dispatcher calls.
pub trait Connection {
    /// Pick an unused channel number.
    fn allocate_channel_number(&self) -> Result<u16>;

    /// Route inbound frames for `number` to `dispatcher`.
    fn register_channel(&self, number: u16, dispatcher: Rc<Dispatcher>) -> Result<()>;

    /// Stop routing frames for `number` and make it available again.
    fn release_channel(&self, number: u16);

    /// Send a method, followed by a content header and body frames when
    /// `content` is present.
    fn send_method(&self, channel: u16, method: Method, content: Option<Content>) -> Result<()>;

    /// Block until at least one inbound event is processed or `timeout`
    /// expires, delivering every available frame to its channel's
    /// [`Dispatcher::handle_frame`]. `None` blocks without a limit.
    ///
    /// An error from one channel must not stop delivery to the others;
    /// implementations finish the drain and then report it.
    fn drain_events(&self, timeout: Option<Duration>) -> Result<()>;

    /// Close the whole connection with a reply code and text.
    fn close(&self, reply_code: u16, reply_text: &str) -> Result<()>;
}
