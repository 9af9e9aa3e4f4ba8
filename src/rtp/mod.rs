//! Minimal RTP types for the media plane.
//!
//! The transport collaborators deal in parsed [`RtpPacket`] values; this
//! module provides the wire marshal/parse for transports that want it and
//! the id newtypes used across the engine.

use std::fmt;
use std::ops::Deref;

use bytes::Bytes;

mod playout;
pub use playout::PlayoutDelay;

pub mod rtcp;

/// Two-byte fixed profile id for one-byte header extensions (RFC 8285).
const ONE_BYTE_EXT_PROFILE: u16 = 0xBEDE;

macro_rules! num_id {
    ($id:ident, $t:ty) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $id($t);

        impl $id {
            pub fn new() -> Self {
                $id(random_id())
            }
        }

        impl Deref for $id {
            type Target = $t;

            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl From<$t> for $id {
            fn from(v: $t) -> Self {
                $id(v)
            }
        }

        impl Default for $id {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $id {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

trait RandomId {
    fn random() -> Self;
}

impl RandomId for u32 {
    fn random() -> u32 {
        fastrand::u32(..)
    }
}

impl RandomId for u8 {
    fn random() -> u8 {
        fastrand::u8(96..=127)
    }
}

fn random_id<T: RandomId>() -> T {
    T::random()
}

num_id!(Ssrc, u32);
num_id!(Pt, u8);

/// One RTP header extension element, id and raw payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpExtension {
    pub id: u8,
    pub data: Vec<u8>,
}

/// Parsed RTP header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpHeader {
    pub marker: bool,
    pub payload_type: Pt,
    pub sequence_number: u16,
    pub timestamp: u32,
    pub ssrc: Ssrc,
    /// One-byte-profile header extensions, in wire order.
    pub extensions: Vec<RtpExtension>,
}

impl RtpHeader {
    pub fn new(payload_type: Pt, ssrc: Ssrc) -> Self {
        RtpHeader {
            marker: false,
            payload_type,
            sequence_number: 0,
            timestamp: 0,
            ssrc,
            extensions: Vec::new(),
        }
    }

    /// Set (or replace) an extension element by id.
    pub fn set_extension(&mut self, id: u8, data: Vec<u8>) {
        if let Some(e) = self.extensions.iter_mut().find(|e| e.id == id) {
            e.data = data;
        } else {
            self.extensions.push(RtpExtension { id, data });
        }
    }
}

/// One RTP packet: parsed header and codec payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpPacket {
    pub header: RtpHeader,
    pub payload: Bytes,
}

impl RtpPacket {
    /// Serialize header + payload to wire format.
    pub fn marshal(&self) -> Vec<u8> {
        let h = &self.header;
        let has_ext = !h.extensions.is_empty();

        let mut out = Vec::with_capacity(12 + self.payload.len() + 16);
        out.push(0x80 | if has_ext { 0x10 } else { 0 });
        out.push(if h.marker { 0x80 } else { 0 } | (*h.payload_type & 0x7f));
        out.extend_from_slice(&h.sequence_number.to_be_bytes());
        out.extend_from_slice(&h.timestamp.to_be_bytes());
        out.extend_from_slice(&h.ssrc.to_be_bytes());

        if has_ext {
            out.extend_from_slice(&ONE_BYTE_EXT_PROFILE.to_be_bytes());
            let len_pos = out.len();
            out.extend_from_slice(&[0, 0]);

            let start = out.len();
            for ext in &h.extensions {
                // 0 is reserved, 15 means "stop parsing"; lengths 1..=16
                if ext.id == 0 || ext.id >= 15 || ext.data.is_empty() || ext.data.len() > 16 {
                    continue;
                }
                out.push((ext.id << 4) | (ext.data.len() as u8 - 1));
                out.extend_from_slice(&ext.data);
            }
            while (out.len() - start) % 4 != 0 {
                out.push(0);
            }
            let words = ((out.len() - start) / 4) as u16;
            out[len_pos..len_pos + 2].copy_from_slice(&words.to_be_bytes());
        }

        out.extend_from_slice(&self.payload);
        out
    }

    /// Parse a packet from wire format. Returns `None` for anything that is
    /// not a plausible RTP v2 packet.
    pub fn parse(buf: &[u8]) -> Option<RtpPacket> {
        if buf.len() < 12 {
            return None;
        }
        let b0 = buf[0];
        if b0 >> 6 != 2 {
            return None;
        }
        let has_padding = b0 & 0x20 != 0;
        let has_ext = b0 & 0x10 != 0;
        let csrc_count = (b0 & 0x0f) as usize;

        let b1 = buf[1];
        let marker = b1 & 0x80 != 0;
        let payload_type = Pt::from(b1 & 0x7f);
        let sequence_number = u16::from_be_bytes([buf[2], buf[3]]);
        let timestamp = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
        let ssrc = Ssrc::from(u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]));

        let mut off = 12 + csrc_count * 4;
        if buf.len() < off {
            return None;
        }

        let mut extensions = Vec::new();
        if has_ext {
            if buf.len() < off + 4 {
                return None;
            }
            let profile = u16::from_be_bytes([buf[off], buf[off + 1]]);
            let words = u16::from_be_bytes([buf[off + 2], buf[off + 3]]) as usize;
            off += 4;
            if buf.len() < off + words * 4 {
                return None;
            }
            if profile == ONE_BYTE_EXT_PROFILE {
                let mut p = off;
                let end = off + words * 4;
                while p < end {
                    let b = buf[p];
                    if b == 0 {
                        p += 1;
                        continue;
                    }
                    let id = b >> 4;
                    let len = (b & 0x0f) as usize + 1;
                    p += 1;
                    if id == 15 || p + len > end {
                        break;
                    }
                    extensions.push(RtpExtension {
                        id,
                        data: buf[p..p + len].to_vec(),
                    });
                    p += len;
                }
            }
            // two-byte profile extensions are skipped, not an error
            off += words * 4;
        }

        let mut payload_end = buf.len();
        if has_padding {
            let pad = *buf.last()? as usize;
            if pad == 0 || off + pad > payload_end {
                return None;
            }
            payload_end -= pad;
        }
        if off > payload_end {
            return None;
        }

        Some(RtpPacket {
            header: RtpHeader {
                marker,
                payload_type,
                sequence_number,
                timestamp,
                ssrc,
                extensions,
            },
            payload: Bytes::copy_from_slice(&buf[off..payload_end]),
        })
    }
}
