use bytes::Bytes;

use crate::codec::Codec;
use crate::packet::{CodecPacketizer, PacketError, Packetizer};
use crate::rtp::{Pt, RtpHeader, RtpPacket, Ssrc};

/// Turns access units into outbound RTP packets for one stream.
///
/// Sequence number and timestamp start at random offsets so a subscriber
/// cannot correlate streams across subscriptions. All packets of a unit
/// share one timestamp; the marker bit goes on the last packet of the
/// unit.
pub struct RtpPacketizer {
    ssrc: Ssrc,
    pt: Pt,
    mtu: usize,
    sequence: u16,
    timestamp: u32,
    payloader: CodecPacketizer,
}

impl RtpPacketizer {
    pub fn new(codec: Codec, pt: Pt, ssrc: Ssrc, mtu: usize) -> RtpPacketizer {
        RtpPacketizer {
            ssrc,
            pt,
            mtu,
            sequence: fastrand::u16(..),
            timestamp: fastrand::u32(..),
            payloader: CodecPacketizer::new(codec),
        }
    }

    pub fn ssrc(&self) -> Ssrc {
        self.ssrc
    }

    /// Packetize one unit, advancing the timestamp by `samples` afterwards.
    pub fn packetize(
        &mut self,
        payload: &[u8],
        samples: u32,
    ) -> Result<Vec<RtpPacket>, PacketError> {
        let payloads = self.payloader.packetize(self.mtu, payload)?;

        let last = payloads.len().saturating_sub(1);
        let mut packets = Vec::with_capacity(payloads.len());
        for (i, p) in payloads.into_iter().enumerate() {
            let mut header = RtpHeader::new(self.pt, self.ssrc);
            header.sequence_number = self.sequence;
            header.timestamp = self.timestamp;
            header.marker = i == last;
            self.sequence = self.sequence.wrapping_add(1);

            packets.push(RtpPacket {
                header,
                payload: Bytes::from(p),
            });
        }

        self.timestamp = self.timestamp.wrapping_add(samples);
        Ok(packets)
    }

    /// Advance the timestamp without sending, keeping the receiver clock
    /// honest across withheld units.
    pub fn skip_samples(&mut self, samples: u32) {
        self.timestamp = self.timestamp.wrapping_add(samples);
    }
}
