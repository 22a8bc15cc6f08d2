//! SACP packet framing.
//!
//! Wire layout (little-endian multi-byte fields):
//!
//! ```text
//! offset  size  field
//! 0       2     magic 0xAA 0x55
//! 2       2     length = |data| + 8
//! 4       1     protocol version (1)
//! 5       1     receiver id
//! 6       1     CRC8 over bytes 0..6 (poly 0x07, init 0)
//! 7       1     sender id
//! 8       1     attribute (0 = request, 1 = ack)
//! 9       2     sequence
//! 11      1     command set
//! 12      1     command id
//! 13      n     data
//! 13+n    2     checksum over bytes 7..13+n
//! ```

use bytes::{BufMut, BytesMut};
use parking_lot::Mutex;
use snapbridge_core::{Error, ProtocolError, Result};
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::DATA_LEN;

/// Overhead of a frame around its data: 13-byte header + 2-byte checksum.
const FRAME_OVERHEAD: usize = 15;

/// Largest frame the printer will ever send (upload chunk + framing).
const MAX_FRAME: usize = DATA_LEN + FRAME_OVERHEAD;

/// A SACP protocol packet.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Packet {
    pub receiver_id: u8,
    pub sender_id: u8,
    pub attribute: u8,
    pub sequence: u16,
    pub command_set: u8,
    pub command_id: u8,
    pub data: Vec<u8>,
}

impl Packet {
    /// Serialize the packet into its wire format.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![0u8; FRAME_OVERHEAD + self.data.len()];

        out[0] = 0xAA;
        out[1] = 0x55;
        out[2..4].copy_from_slice(&(self.data.len() as u16 + 8).to_le_bytes());
        out[4] = 0x01;
        out[5] = self.receiver_id;
        out[6] = head_checksum(&out[..6]);
        out[7] = self.sender_id;
        out[8] = self.attribute;
        out[9..11].copy_from_slice(&self.sequence.to_le_bytes());
        out[11] = self.command_set;
        out[12] = self.command_id;
        out[13..13 + self.data.len()].copy_from_slice(&self.data);

        let end = out.len();
        let checksum = payload_checksum(&out[7..end - 2]);
        out[end - 2..].copy_from_slice(&checksum.to_le_bytes());

        out
    }

    /// Deserialize a packet from its wire format.
    pub fn decode(data: &[u8]) -> Result<Packet> {
        if data.len() < FRAME_OVERHEAD {
            return Err(ProtocolError::InvalidSize.into());
        }
        if data[0] != 0xAA || data[1] != 0x55 {
            return Err(ProtocolError::InvalidPacket.into());
        }
        let declared = u16::from_le_bytes([data[2], data[3]]) as usize;
        if declared != data.len() - 7 {
            return Err(ProtocolError::InvalidSize.into());
        }
        if data[4] != 0x01 {
            return Err(ProtocolError::InvalidVersion.into());
        }
        if head_checksum(&data[..6]) != data[6] {
            return Err(ProtocolError::InvalidChecksum.into());
        }
        let end = data.len();
        let trailer = u16::from_le_bytes([data[end - 2], data[end - 1]]);
        if trailer != payload_checksum(&data[7..end - 2]) {
            return Err(ProtocolError::InvalidChecksum.into());
        }

        Ok(Packet {
            receiver_id: data[5],
            sender_id: data[7],
            attribute: data[8],
            sequence: u16::from_le_bytes([data[9], data[10]]),
            command_set: data[11],
            command_id: data[12],
            data: data[13..end - 2].to_vec(),
        })
    }
}

/// CRC8 over the frame head, polynomial 0x07, initial value 0.
fn head_checksum(data: &[u8]) -> u8 {
    let mut crc: u8 = 0;
    for &byte in data {
        for bit in 0..8 {
            let b = (byte >> (7 - bit)) & 0x01 == 1;
            let c7 = (crc >> 7) & 0x01 == 1;
            crc <<= 1;
            if b != c7 {
                crc ^= 0x07;
            }
        }
    }
    crc
}

/// 16-bit checksum over the frame body: big-endian byte pairs summed with
/// carry folding, then one's complement. A trailing odd byte counts as a
/// low byte.
fn payload_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut pairs = data.chunks_exact(2);
    for pair in &mut pairs {
        sum = sum.wrapping_add(((pair[0] as u32) << 8) | pair[1] as u32);
    }
    if let [last] = pairs.remainder() {
        sum = sum.wrapping_add(*last as u32);
    }
    while sum > 0xFFFF {
        sum = (sum >> 16) + (sum & 0xFFFF);
    }
    !(sum as u16)
}

/// Append a u16-length-prefixed UTF-8 string to a payload buffer.
pub fn put_string(buf: &mut BytesMut, s: &str) {
    buf.put_u16_le(s.len() as u16);
    buf.put_slice(s.as_bytes());
}

/// Append a u16-length-prefixed byte slice to a payload buffer.
pub fn put_bytes(buf: &mut BytesMut, b: &[u8]) {
    buf.put_u16_le(b.len() as u16);
    buf.put_slice(b);
}

// The printer identifies requests by the 16-bit sequence alone, so the
// counter is process-wide. Handshake packets use sequence 1; allocation
// starts past it. Wraparound is fine: pending waiters key on the live map.
static SEQUENCE: Mutex<u16> = Mutex::new(2);

/// Allocate the next request sequence number.
pub fn next_sequence() -> u16 {
    let mut seq = SEQUENCE.lock();
    *seq = seq.wrapping_add(1);
    *seq
}

/// Read a single SACP frame from the connection.
///
/// Reads the 4-byte prefix exactly, verifies the magic, then reads the
/// declared remainder exactly. TCP does not preserve frame boundaries, so
/// both reads must loop until full (`read_exact`) - a single-shot read
/// truncates frames split across segments.
///
/// A deadline expiring surfaces as `io::ErrorKind::TimedOut` so callers can
/// tell an idle socket from a broken one.
pub async fn read_packet<R>(reader: &mut R, timeout: Duration) -> Result<Packet>
where
    R: AsyncRead + Unpin,
{
    match tokio::time::timeout(timeout, read_frame(reader)).await {
        Ok(result) => result,
        Err(_) => Err(Error::Io(io::Error::new(
            io::ErrorKind::TimedOut,
            "read timed out",
        ))),
    }
}

async fn read_frame<R>(reader: &mut R) -> Result<Packet>
where
    R: AsyncRead + Unpin,
{
    let mut head = [0u8; 4];
    reader.read_exact(&mut head).await?;

    if head[0] != 0xAA || head[1] != 0x55 {
        return Err(ProtocolError::InvalidPacket.into());
    }

    let data_len = u16::from_le_bytes([head[2], head[3]]) as usize;
    let total = data_len + 7;
    if total > MAX_FRAME {
        return Err(ProtocolError::InvalidSize.into());
    }

    let mut frame = vec![0u8; total];
    frame[..4].copy_from_slice(&head);
    reader.read_exact(&mut frame[4..]).await?;

    Packet::decode(&frame)
}
