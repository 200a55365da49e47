use std::io;
use std::net::Ipv4Addr;
use std::time::Duration;

use thiserror::Error;

pub mod checksum;
pub mod echo;
pub mod icmp;
pub mod transport;

/// Errors raised while talking to the probed host.
///
/// Only [`ProbeError::Connect`] and [`ProbeError::Write`] end the probe loop;
/// timeouts and read failures are counted as lost probes.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("cannot open raw ICMP socket to {addr}: {source}")]
    Connect {
        addr: Ipv4Addr,
        #[source]
        source: io::Error,
    },

    #[error("failed to send echo request: {0}")]
    Write(#[source] io::Error),

    #[error("no reply within {0:?}")]
    Timeout(Duration),

    #[error("failed to read reply: {0}")]
    Read(#[source] io::Error),
}

impl ProbeError {
    /// Process exit status for errors that terminate the monitor.
    pub fn exit_code(&self) -> u8 {
        match self {
            ProbeError::Connect { .. } => 2,
            ProbeError::Write(_) => 3,
            ProbeError::Timeout(_) | ProbeError::Read(_) => 1,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, ProbeError::Connect { .. } | ProbeError::Write(_))
    }
}
