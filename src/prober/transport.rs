use std::fmt;
use std::time::Duration;

use super::ProbeError;

/// Forces a blocked [`ProbeTransport::receive`] on another thread to return.
pub struct Interrupter(Box<dyn Fn() + Send + Sync>);

impl Interrupter {
    pub fn new(f: impl Fn() + Send + Sync + 'static) -> Self {
        Self(Box::new(f))
    }

    pub fn interrupt(&self) {
        (self.0)()
    }
}

impl fmt::Debug for Interrupter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Interrupter")
    }
}

/// A connection to one remote host able to carry echo requests.
///
/// The handle is scoped to one `open`; reconnecting means `close` followed by
/// another `open`. Any reply read within the timeout counts as an answer.
pub trait ProbeTransport: Send {
    fn open(&mut self) -> Result<(), ProbeError>;

    fn send(&mut self, packet: &[u8]) -> Result<(), ProbeError>;

    /// Blocks until a datagram arrives or `timeout` elapses.
    fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, ProbeError>;

    fn close(&mut self);

    /// Handle that unblocks a pending `receive` on the currently open
    /// connection. `None` when nothing is open.
    fn interrupter(&self) -> Option<Interrupter>;
}
