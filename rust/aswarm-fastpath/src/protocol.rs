// aswarm-fastpath: Wire protocol
//
// Bit-exact, big-endian packet framing shared by sender and receiver.
//
// v2: magic(4) version(1) type(1) ts_ns(8) seq16(2) payload_len(2) key_id(1)
// v3: magic(4) version(1) type(1) ts_unix_ms(8) src_id(4) seq16(2) nonce32(4)
//     payload_len(2) key_id(1)
//
// Either header is followed by a JSON payload of the declared length and a
// 32-byte HMAC-SHA-256 tag computed over header||payload with the key named
// by key_id.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Packet magic
pub const MAGIC: [u8; 4] = *b"ASWM";
/// Protocol version 2 (nanosecond timestamp, no src_id/nonce)
pub const V2: u8 = 2;
/// Protocol version 3 (preferred: Unix-ms timestamp + src_id + nonce32)
pub const V3: u8 = 3;
/// Packet type: elevation signal
pub const TYPE_ELEVATION: u8 = 1;
/// HMAC-SHA-256 tag length
pub const HMAC_SIZE: usize = 32;
/// Hard ceiling on datagram size
pub const MAX_PACKET_SIZE: usize = 1200;
/// v2 header length
pub const V2_HEADER_SIZE: usize = 19;
/// v3 header length
pub const V3_HEADER_SIZE: usize = 27;
/// Strict receiver age window for v3 timestamps (milliseconds)
pub const MAX_AGE_MS: u64 = 5000;

/// Per-version header size
pub fn header_size(version: u8) -> Option<usize> {
    match version {
        V2 => Some(V2_HEADER_SIZE),
        V3 => Some(V3_HEADER_SIZE),
        _ => None,
    }
}

/// Maximum payload length for a protocol version
pub fn payload_budget(version: u8) -> Option<usize> {
    header_size(version).map(|h| MAX_PACKET_SIZE - h - HMAC_SIZE)
}

/// Structural defects found while parsing a datagram
///
/// Each maps to exactly one rejection counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketDefect {
    TooShort,
    BadMagic,
    BadVersion,
    BadType,
    BadLength,
}

/// Decoded packet header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Header {
    V2 {
        ts_ns: u64,
        seq16: u16,
        payload_len: u16,
        key_id: u8,
    },
    V3 {
        ts_unix_ms: u64,
        src_id: u32,
        seq16: u16,
        nonce32: u32,
        payload_len: u16,
        key_id: u8,
    },
}

impl Header {
    pub fn version(&self) -> u8 {
        match self {
            Header::V2 { .. } => V2,
            Header::V3 { .. } => V3,
        }
    }

    pub fn size(&self) -> usize {
        match self {
            Header::V2 { .. } => V2_HEADER_SIZE,
            Header::V3 { .. } => V3_HEADER_SIZE,
        }
    }

    pub fn payload_len(&self) -> usize {
        match self {
            Header::V2 { payload_len, .. } | Header::V3 { payload_len, .. } => {
                *payload_len as usize
            }
        }
    }

    pub fn key_id(&self) -> u8 {
        match self {
            Header::V2 { key_id, .. } | Header::V3 { key_id, .. } => *key_id,
        }
    }

    pub fn seq16(&self) -> u16 {
        match self {
            Header::V2 { seq16, .. } | Header::V3 { seq16, .. } => *seq16,
        }
    }

    /// Encode the header big-endian
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.size());
        buf.extend_from_slice(&MAGIC);
        buf.push(self.version());
        buf.push(TYPE_ELEVATION);
        match self {
            Header::V2 {
                ts_ns,
                seq16,
                payload_len,
                key_id,
            } => {
                buf.extend_from_slice(&ts_ns.to_be_bytes());
                buf.extend_from_slice(&seq16.to_be_bytes());
                buf.extend_from_slice(&payload_len.to_be_bytes());
                buf.push(*key_id);
            }
            Header::V3 {
                ts_unix_ms,
                src_id,
                seq16,
                nonce32,
                payload_len,
                key_id,
            } => {
                buf.extend_from_slice(&ts_unix_ms.to_be_bytes());
                buf.extend_from_slice(&src_id.to_be_bytes());
                buf.extend_from_slice(&seq16.to_be_bytes());
                buf.extend_from_slice(&nonce32.to_be_bytes());
                buf.extend_from_slice(&payload_len.to_be_bytes());
                buf.push(*key_id);
            }
        }
        buf
    }

    /// Decode a header from the front of a datagram
    ///
    /// Validates magic, version, and type; length checks against the declared
    /// payload are the caller's job.
    pub fn decode(data: &[u8]) -> Result<Header, PacketDefect> {
        if data.len() < 6 {
            return Err(PacketDefect::TooShort);
        }
        if data[0..4] != MAGIC {
            return Err(PacketDefect::BadMagic);
        }
        let version = data[4];
        let size = header_size(version).ok_or(PacketDefect::BadVersion)?;
        if data[5] != TYPE_ELEVATION {
            return Err(PacketDefect::BadType);
        }
        if data.len() < size {
            return Err(PacketDefect::TooShort);
        }
        match version {
            V2 => Ok(Header::V2 {
                ts_ns: u64::from_be_bytes(be8(&data[6..14])),
                seq16: u16::from_be_bytes([data[14], data[15]]),
                payload_len: u16::from_be_bytes([data[16], data[17]]),
                key_id: data[18],
            }),
            V3 => Ok(Header::V3 {
                ts_unix_ms: u64::from_be_bytes(be8(&data[6..14])),
                src_id: u32::from_be_bytes([data[14], data[15], data[16], data[17]]),
                seq16: u16::from_be_bytes([data[18], data[19]]),
                nonce32: u32::from_be_bytes([data[20], data[21], data[22], data[23]]),
                payload_len: u16::from_be_bytes([data[24], data[25]]),
                key_id: data[26],
            }),
            _ => Err(PacketDefect::BadVersion),
        }
    }
}

fn be8(slice: &[u8]) -> [u8; 8] {
    let mut out = [0u8; 8];
    out.copy_from_slice(slice);
    out
}

/// Assemble a sealed packet: header || payload || HMAC(header || payload)
pub fn seal(header: &Header, payload: &[u8], key: &[u8]) -> Vec<u8> {
    let mut packet = header.encode();
    packet.extend_from_slice(payload);
    let mut mac = new_mac(key);
    mac.update(&packet);
    packet.extend_from_slice(&mac.finalize().into_bytes());
    packet
}

/// Constant-time HMAC verification over the signed region
pub fn verify_tag(key: &[u8], signed: &[u8], tag: &[u8]) -> bool {
    let mut mac = new_mac(key);
    mac.update(signed);
    mac.verify_slice(tag).is_ok()
}

// HMAC-SHA-256 accepts keys of any length, so this cannot fail.
#[allow(clippy::expect_used)]
fn new_mac(key: &[u8]) -> HmacSha256 {
    HmacSha256::new_from_slice(key).expect("HMAC accepts any key length")
}

/// Stable 32-bit source identifier: first 32 bits of SHA-256 over the node
/// name (never the pod hostname), so it survives pod restarts.
pub fn derive_src_id(node_name: &str) -> u32 {
    let digest = Sha256::digest(node_name.as_bytes());
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}
