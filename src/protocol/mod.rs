//! RSP packet framing: `$<data>#<checksum>` with `+`/`-` acknowledgements.

pub mod codec;

use log::{trace, warn};

use crate::connection::Connection;

/// Capacity of the packet buffer. Advertised to the client through
/// `qSupported` as `PacketSize`.
pub const PACKET_CAPACITY: usize = 0x2000;

/// How many times a NAKed reply is retransmitted before giving up.
const MAX_RESEND: usize = 5;

/// A packet payload. At most `PACKET_CAPACITY - 1` bytes; the byte after the
/// payload is kept NUL so truncated views are cheap to take.
pub struct Packet {
    buf: Box<[u8; PACKET_CAPACITY]>,
    len: usize,
}

impl Packet {
    pub fn new() -> Packet {
        Packet {
            buf: Box::new([0u8; PACKET_CAPACITY]),
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        PACKET_CAPACITY
    }

    pub fn data(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.buf[..self.len]
    }

    pub fn clear(&mut self) {
        self.len = 0;
        self.buf[0] = 0;
    }

    /// Append one byte. Returns `false` (leaving the packet unchanged) when
    /// the buffer is full.
    pub fn push(&mut self, byte: u8) -> bool {
        if self.len + 1 >= PACKET_CAPACITY {
            return false;
        }
        self.buf[self.len] = byte;
        self.len += 1;
        self.buf[self.len] = 0;
        true
    }

    pub fn push_slice(&mut self, data: &[u8]) -> bool {
        if self.len + data.len() + 1 > PACKET_CAPACITY {
            return false;
        }
        self.buf[self.len..self.len + data.len()].copy_from_slice(data);
        self.len += data.len();
        self.buf[self.len] = 0;
        true
    }

    pub fn set(&mut self, data: &[u8]) -> bool {
        self.clear();
        self.push_slice(data)
    }

    /// Shrink the payload in place, as after unescaping an `X` body.
    pub fn truncate(&mut self, len: usize) {
        if len < self.len {
            self.len = len;
            self.buf[self.len] = 0;
        }
    }

    /// Receive one well-checksummed packet, acknowledging as we go.
    /// Returns `false` on end of stream.
    pub fn recv<C: Connection>(&mut self, conn: &mut C) -> Result<bool, C::Error> {
        loop {
            // Hunt for the start of a packet, discarding acks and noise.
            loop {
                match conn.read()? {
                    None => return Ok(false),
                    Some(b'$') => break,
                    Some(b'+') | Some(b'-') => {}
                    Some(byte) => trace!("discarding inter-packet byte {:#04x}", byte),
                }
            }

            self.clear();
            let mut sum = 0u8;
            let mut overflow = false;
            loop {
                match conn.read()? {
                    None => return Ok(false),
                    Some(b'#') => break,
                    Some(byte) => {
                        sum = sum.wrapping_add(byte);
                        if !self.push(byte) {
                            overflow = true;
                        }
                    }
                }
            }

            let mut csum = [0u8; 2];
            for slot in csum.iter_mut() {
                match conn.read()? {
                    None => return Ok(false),
                    Some(byte) => *slot = byte,
                }
            }

            let wire_sum = codec::from_hex(csum[0])
                .zip(codec::from_hex(csum[1]))
                .map(|(hi, lo)| (hi << 4) | lo);

            if overflow {
                warn!("dropping oversized packet ({} byte buffer)", PACKET_CAPACITY);
                conn.write(b'-')?;
                conn.flush()?;
                continue;
            }

            match wire_sum {
                Some(sum_rx) if sum_rx == sum => {
                    conn.write(b'+')?;
                    conn.flush()?;
                    return Ok(true);
                }
                _ => {
                    warn!(
                        "checksum mismatch (got {:?}, computed {:#04x}); requesting resend",
                        csum, sum
                    );
                    conn.write(b'-')?;
                    conn.flush()?;
                }
            }
        }
    }

    /// Transmit the payload as a framed packet and handle the client's
    /// acknowledgement, retransmitting on `-`.
    pub fn send<C: Connection>(&self, conn: &mut C) -> Result<(), C::Error> {
        let sum: u8 = self.data().iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
        let trailer = [
            b'#',
            codec::hex_char(sum >> 4),
            codec::hex_char(sum & 0xf),
        ];

        for attempt in 0..=MAX_RESEND {
            conn.write(b'$')?;
            conn.write_all(self.data())?;
            conn.write_all(&trailer)?;
            conn.flush()?;

            // A '-' asks for retransmission. Anything else (a break byte or
            // the '$' of the next packet) counts as an implicit ack and is
            // left unconsumed.
            match conn.peek()? {
                Some(b'+') => {
                    conn.read()?;
                    return Ok(());
                }
                Some(b'-') => {
                    conn.read()?;
                    if attempt == MAX_RESEND {
                        warn!("client NAKed reply {} times; giving up", MAX_RESEND + 1);
                    }
                }
                _ => return Ok(()),
            }
        }
        Ok(())
    }
}

impl Default for Packet {
    fn default() -> Packet {
        Packet::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_respects_capacity() {
        let mut pkt = Packet::new();
        for _ in 0..PACKET_CAPACITY - 1 {
            assert!(pkt.push(b'x'));
        }
        assert!(!pkt.push(b'x'));
        assert_eq!(pkt.len(), PACKET_CAPACITY - 1);
    }

    #[test]
    fn set_and_truncate_keep_nul_invariant() {
        let mut pkt = Packet::new();
        assert!(pkt.set(b"m1000,40"));
        assert_eq!(pkt.data(), b"m1000,40");
        pkt.truncate(5);
        assert_eq!(pkt.data(), b"m1000");
    }
}
