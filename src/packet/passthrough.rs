//! Passthrough payload handling for codecs that map one packet to one unit
//! (Opus, AAC).

use crate::codec::CodecDescriptor;
use crate::rtp::RtpPacket;
use crate::unit::FrameInfo;

use super::{Depacketized, Depacketizer, PacketError, Packetizer};

/// One RTP payload is one access unit. The configured descriptor is
/// signalled on the first packet, since there is no in-band negotiation to
/// wait for.
#[derive(Debug)]
pub struct PassthroughDepacketizer {
    descriptor: CodecDescriptor,
    signalled: bool,
}

impl PassthroughDepacketizer {
    pub fn new(descriptor: CodecDescriptor) -> Self {
        PassthroughDepacketizer {
            descriptor,
            signalled: false,
        }
    }
}

impl Depacketizer for PassthroughDepacketizer {
    fn depacketize(&mut self, packet: &RtpPacket) -> Result<Depacketized, PacketError> {
        if packet.payload.is_empty() {
            return Err(PacketError::ErrShortPacket);
        }

        let mut out = Depacketized::unit(packet.payload.clone(), FrameInfo::default());

        if !self.signalled {
            self.signalled = true;
            out.codec_change = Some(self.descriptor.clone());
        }

        Ok(out)
    }
}

/// The whole unit becomes one payload; audio frames are far below any
/// sensible MTU.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughPacketizer;

impl Packetizer for PassthroughPacketizer {
    fn packetize(&mut self, mtu: usize, payload: &[u8]) -> Result<Vec<Vec<u8>>, PacketError> {
        if payload.is_empty() {
            return Err(PacketError::ErrEmptyPayload);
        }
        if mtu == 0 || payload.len() > mtu {
            return Ok(vec![]);
        }
        Ok(vec![payload.to_vec()])
    }
}
