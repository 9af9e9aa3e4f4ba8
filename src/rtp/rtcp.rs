//! The slice of RTCP the relay speaks: sender reports out, NACK/PLI/REMB in.

use super::Ssrc;

const RTCP_SR: u8 = 200;
const RTCP_RR: u8 = 201;
const RTCP_RTPFB: u8 = 205;
const RTCP_PSFB: u8 = 206;

const FMT_NACK: u8 = 1;
const FMT_PLI: u8 = 1;
const FMT_ALFB: u8 = 15;

/// Outbound sender report (no report blocks).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SenderReport {
    pub ssrc: Ssrc,
    /// 64-bit NTP timestamp, 32.32 fixed point.
    pub ntp_time: u64,
    /// RTP timestamp corresponding to `ntp_time`, in the stream clock rate.
    pub rtp_time: u32,
    pub packet_count: u32,
    pub octet_count: u32,
}

impl SenderReport {
    pub fn marshal(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(28);
        out.push(0x80); // V=2, P=0, RC=0
        out.push(RTCP_SR);
        out.extend_from_slice(&6u16.to_be_bytes()); // length in words minus one
        out.extend_from_slice(&self.ssrc.to_be_bytes());
        out.extend_from_slice(&self.ntp_time.to_be_bytes());
        out.extend_from_slice(&self.rtp_time.to_be_bytes());
        out.extend_from_slice(&self.packet_count.to_be_bytes());
        out.extend_from_slice(&self.octet_count.to_be_bytes());
        out
    }
}

/// One feedback message from a compound RTCP packet.
#[derive(Debug, Clone, PartialEq)]
pub enum RtcpFeedback {
    SenderReport {
        ssrc: Ssrc,
    },
    ReceiverReport {
        ssrc: Ssrc,
    },
    /// Sequence numbers the receiver reports missing.
    Nack {
        ssrc: Ssrc,
        lost_seqs: Vec<u16>,
    },
    /// Picture loss, the receiver needs a keyframe.
    Pli {
        ssrc: Ssrc,
    },
    /// Receiver estimated max bitrate, in bits per second.
    Remb {
        ssrc: Ssrc,
        bitrate: u64,
    },
    Unknown {
        payload_type: u8,
    },
}

/// Split a compound RTCP packet into the feedback messages we understand.
///
/// Malformed trailing data ends parsing without discarding what was already
/// parsed.
pub fn parse_compound(buf: &[u8]) -> Vec<RtcpFeedback> {
    let mut out = Vec::new();
    let mut pos = 0;

    while buf.len() >= pos + 8 {
        let b0 = buf[pos];
        if b0 >> 6 != 2 {
            break;
        }
        let fmt = b0 & 0x1f;
        let payload_type = buf[pos + 1];
        let len_words = u16::from_be_bytes([buf[pos + 2], buf[pos + 3]]) as usize;
        let packet_len = (len_words + 1) * 4;
        if buf.len() < pos + packet_len {
            break;
        }
        let packet = &buf[pos..pos + packet_len];
        pos += packet_len;

        let media_ssrc = |off: usize| -> Option<Ssrc> {
            let b = packet.get(off..off + 4)?;
            Some(Ssrc::from(u32::from_be_bytes([b[0], b[1], b[2], b[3]])))
        };

        match (payload_type, fmt) {
            (RTCP_SR, _) => {
                if let Some(ssrc) = media_ssrc(4) {
                    out.push(RtcpFeedback::SenderReport { ssrc });
                }
            }
            (RTCP_RR, _) => {
                if let Some(ssrc) = media_ssrc(4) {
                    out.push(RtcpFeedback::ReceiverReport { ssrc });
                }
            }
            (RTCP_RTPFB, FMT_NACK) => {
                let Some(ssrc) = media_ssrc(8) else { continue };
                let mut lost_seqs = Vec::new();
                let mut fci = 12;
                while packet.len() >= fci + 4 {
                    let pid = u16::from_be_bytes([packet[fci], packet[fci + 1]]);
                    let blp = u16::from_be_bytes([packet[fci + 2], packet[fci + 3]]);
                    lost_seqs.push(pid);
                    for bit in 0..16 {
                        if blp & (1 << bit) != 0 {
                            lost_seqs.push(pid.wrapping_add(bit + 1));
                        }
                    }
                    fci += 4;
                }
                out.push(RtcpFeedback::Nack { ssrc, lost_seqs });
            }
            (RTCP_PSFB, FMT_PLI) => {
                if let Some(ssrc) = media_ssrc(8) {
                    out.push(RtcpFeedback::Pli { ssrc });
                }
            }
            (RTCP_PSFB, FMT_ALFB) => {
                // REMB: "REMB", num ssrcs, 6-bit exponent, 18-bit mantissa
                if packet.len() < 20 || &packet[12..16] != b"REMB" {
                    out.push(RtcpFeedback::Unknown { payload_type });
                    continue;
                }
                let Some(ssrc) = media_ssrc(4) else { continue };
                let exp = (packet[17] >> 2) as u64;
                let mantissa = (u64::from(packet[17] & 0x03) << 16)
                    | (u64::from(packet[18]) << 8)
                    | u64::from(packet[19]);
                out.push(RtcpFeedback::Remb {
                    ssrc,
                    bitrate: mantissa << exp,
                });
            }
            _ => out.push(RtcpFeedback::Unknown { payload_type }),
        }
    }

    out
}
