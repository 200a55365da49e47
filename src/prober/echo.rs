use super::checksum::checksum;

pub const ICMP_ECHO_REQUEST: u8 = 8;
pub const ECHO_HEADER_LEN: usize = 8;

/// ICMP echo request header.
///
/// Identifier and sequence stay at zero for the lifetime of the process and
/// replies are not matched against them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EchoPacket {
    pub kind: u8,
    pub code: u8,
    pub checksum: u16,
    pub identifier: u16,
    pub sequence: u16,
}

impl Default for EchoPacket {
    fn default() -> Self {
        Self::request(0, 0)
    }
}

impl EchoPacket {
    pub fn request(identifier: u16, sequence: u16) -> Self {
        Self {
            kind: ICMP_ECHO_REQUEST,
            code: 0,
            checksum: 0,
            identifier,
            sequence,
        }
    }

    /// Big-endian wire form of the header, fields in declaration order.
    pub fn encode(&self) -> [u8; ECHO_HEADER_LEN] {
        let mut buf = [0u8; ECHO_HEADER_LEN];
        buf[0] = self.kind;
        buf[1] = self.code;
        buf[2..4].copy_from_slice(&self.checksum.to_be_bytes());
        buf[4..6].copy_from_slice(&self.identifier.to_be_bytes());
        buf[6..8].copy_from_slice(&self.sequence.to_be_bytes());
        buf
    }

    /// Computes the checksum over the header with the field zeroed, stores it,
    /// and returns the bytes ready for transmission.
    pub fn seal(&mut self) -> [u8; ECHO_HEADER_LEN] {
        self.checksum = 0;
        self.checksum = checksum(&self.encode());
        self.encode()
    }
}
