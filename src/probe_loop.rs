//! The monitor: one echo request at a time, timeouts fed to the burst
//! detector, alerts dispatched when a burst is found.

use std::io::{self, Write};
use std::thread;

use tracing::{debug, error, info, warn};

use crate::alert::{AlertEvent, AlertSink};
use crate::cancel::CancelToken;
use crate::config::ProbeSettings;
use crate::metrics;
use crate::prober::echo::{EchoPacket, ECHO_HEADER_LEN};
use crate::prober::transport::ProbeTransport;
use crate::prober::ProbeError;
use crate::timestamp::{self, Clock, SystemClock};
use crate::window::{TimeoutWindow, Verdict};

const RECV_BUFFER_LEN: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Probing,
    TimedOut,
    Reconnecting,
    Stopped,
}

/// Why a loop that did not fail came to an end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Cancelled,
}

pub struct ProbeLoop<T: ProbeTransport> {
    target: String,
    transport: T,
    sink: Box<dyn AlertSink>,
    settings: ProbeSettings,
    cancel: CancelToken,
    window: TimeoutWindow,
    clock: Box<dyn Clock>,
    out: Box<dyn Write + Send>,
    packet: [u8; ECHO_HEADER_LEN],
}

impl<T: ProbeTransport> ProbeLoop<T> {
    pub fn new(
        target: impl Into<String>,
        transport: T,
        sink: Box<dyn AlertSink>,
        settings: ProbeSettings,
        cancel: CancelToken,
    ) -> Self {
        let window = TimeoutWindow::new(settings.window_size, settings.window_seconds);
        Self {
            target: target.into(),
            transport,
            sink,
            settings,
            cancel,
            window,
            clock: Box::new(SystemClock),
            out: Box::new(io::stdout()),
            packet: EchoPacket::default().seal(),
        }
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Console sink for the per-probe lines, stdout by default.
    pub fn with_output(mut self, out: impl Write + Send + 'static) -> Self {
        self.out = Box::new(out);
        self
    }

    /// Runs until cancelled or until the transport fails fatally.
    ///
    /// Opening the socket (first time or on reconnect) and sending are fatal on
    /// error. A missing reply is a probe failure and leads to a reconnect,
    /// unless cancellation was requested meanwhile.
    pub fn run(mut self) -> Result<StopReason, ProbeError> {
        self.open()?;
        info!(
            host = %self.target,
            window = self.window.capacity(),
            window_seconds = self.window.budget_secs(),
            "probing started"
        );

        let mut buf = [0u8; RECV_BUFFER_LEN];
        let mut state = State::Probing;
        loop {
            state = match state {
                State::Probing => self.probe_once(&mut buf)?,
                State::TimedOut if self.cancel.is_cancelled() => State::Stopped,
                State::TimedOut => State::Reconnecting,
                State::Reconnecting => {
                    self.reconnect()?;
                    State::Probing
                }
                State::Stopped => {
                    self.shutdown();
                    info!(host = %self.target, "probing stopped");
                    return Ok(StopReason::Cancelled);
                }
            };
        }
    }

    fn open(&mut self) -> Result<(), ProbeError> {
        self.transport.open()?;
        if let Some(interrupter) = self.transport.interrupter() {
            self.cancel.arm(interrupter);
        }
        Ok(())
    }

    fn reconnect(&mut self) -> Result<(), ProbeError> {
        debug!(host = %self.target, "reconnecting");
        self.cancel.disarm();
        self.transport.close();
        self.open().inspect_err(|e| error!(host = %self.target, "reconnect failed: {}", e))
    }

    fn shutdown(&mut self) {
        self.cancel.disarm();
        self.transport.close();
    }

    fn probe_once(&mut self, buf: &mut [u8]) -> Result<State, ProbeError> {
        if let Err(e) = self.transport.send(&self.packet) {
            if self.cancel.is_cancelled() {
                debug!("send failed after cancellation: {}", e);
                return Ok(State::Stopped);
            }
            error!(host = %self.target, "{}", e);
            self.shutdown();
            return Err(e);
        }

        let started = timestamp::monotonic_ns();
        let received = match self.transport.receive(buf, self.settings.reply_timeout) {
            // A read released by cancellation is not an answer from the host.
            Ok(_) if self.cancel.is_cancelled() => Err(ProbeError::Read(io::Error::new(
                io::ErrorKind::Interrupted,
                "read interrupted by cancellation",
            ))),
            Ok(0) => Err(ProbeError::Read(io::ErrorKind::UnexpectedEof.into())),
            other => other,
        };
        match received {
            Ok(_) => {
                let rtt_ms = timestamp::elapsed_ms(started);
                report(&mut self.out, format_args!("PING {} : time = {}ms", self.target, rtt_ms));
                metrics::observe_latency(&self.target, rtt_ms as f64);
                thread::sleep(self.settings.interval);
                Ok(State::Probing)
            }
            Err(e) => {
                if !matches!(e, ProbeError::Timeout(_)) && !self.cancel.is_cancelled() {
                    warn!(host = %self.target, "{}", e);
                }
                self.record_timeout();
                Ok(State::TimedOut)
            }
        }
    }

    fn record_timeout(&mut self) {
        let now = self.clock.unix_seconds();
        let verdict = self.window.record(now);
        let count = match verdict {
            Verdict::Pending { count } => count,
            Verdict::Burst { count, .. } => count,
            Verdict::Compacted { retained, .. } => retained,
        };
        report(&mut self.out, format_args!("PING {} : timeout...({})", self.target, count));
        metrics::inc_timeout(&self.target);

        match verdict {
            Verdict::Burst { first, last, count } => {
                info!(host = %self.target, first, last, count, "timeout burst detected");
            }
            Verdict::Compacted { evicted, retained } => {
                let oldest = self.window.timestamps().next();
                debug!(host = %self.target, evicted, retained, ?oldest, "stale timeouts evicted");
            }
            Verdict::Pending { .. } => {}
        }
        if verdict.is_alert() {
            debug_assert!(self.window.is_empty());
            self.raise_alert();
        }
    }

    fn raise_alert(&mut self) {
        let event = AlertEvent::network_exception(&self.target);
        report(&mut self.out, format_args!("{}", event.subject));

        let sink = self.sink.name();
        match self.sink.dispatch(&event) {
            Ok(()) => {
                report(&mut self.out, format_args!("Alert sent via {}.", sink));
                metrics::inc_alert(&self.target, true);
            }
            Err(e) => {
                error!(host = %self.target, sink, "alert dispatch failed: {}", e);
                report(&mut self.out, format_args!("Alert via {} failed: {}", sink, e));
                metrics::inc_alert(&self.target, false);
            }
        }
    }
}

fn report(out: &mut impl Write, line: std::fmt::Arguments<'_>) {
    if let Err(e) = writeln!(out, "{}", line).and_then(|_| out.flush()) {
        debug!("console write failed: {}", e);
    }
}
