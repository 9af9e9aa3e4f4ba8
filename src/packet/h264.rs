//! H264 payload handling (RFC 6184: single NAL, STAP-A, FU-A).

use bytes::Bytes;

use crate::codec::CodecDescriptor;
use crate::rtp::RtpPacket;
use crate::unit::FrameInfo;

use super::h264_sps::Sps;
use super::{AccessUnit, Depacketized, Depacketizer, PacketError, Packetizer};

pub const STAPA_NALU_TYPE: u8 = 24;
pub const FUA_NALU_TYPE: u8 = 28;
pub const IDR_NALU_TYPE: u8 = 5;
pub const SEI_NALU_TYPE: u8 = 6;
pub const SPS_NALU_TYPE: u8 = 7;
pub const PPS_NALU_TYPE: u8 = 8;
pub const AUD_NALU_TYPE: u8 = 9;
pub const FILLER_NALU_TYPE: u8 = 12;

pub const FUA_HEADER_SIZE: usize = 2;
pub const STAPA_HEADER_SIZE: usize = 1;
pub const STAPA_NALU_LENGTH_SIZE: usize = 2;

pub const NALU_TYPE_BITMASK: u8 = 0x1f;
pub const NALU_REF_IDC_BITMASK: u8 = 0x60;
pub const FU_START_BITMASK: u8 = 0x80;
pub const FU_END_BITMASK: u8 = 0x40;

/// STAP-A indicator carrying NRI 11.
pub const OUTPUT_STAP_AHEADER: u8 = 0x78;

/// Reassembles H264 NAL units from RTP payloads.
///
/// SPS/PPS pairs are latched out of the stream: when a complete pair differs
/// from the previous one, the SPS is parsed and the result is reported as a
/// codec change. Parameter set NALUs themselves are not emitted as units,
/// the egress side re-inserts them ahead of each IDR.
#[derive(Debug, Default)]
pub struct H264Depacketizer {
    fua_buffer: Option<Vec<u8>>,
    sps_pending: Option<Bytes>,
    pps_pending: Option<Bytes>,
    latched: Option<(Bytes, Bytes)>,
}

impl H264Depacketizer {
    fn handle_nalu(&mut self, nalu: &[u8], out: &mut Depacketized) -> Result<(), PacketError> {
        if nalu.is_empty() {
            return Err(PacketError::ErrShortPacket);
        }

        let nalu_type = nalu[0] & NALU_TYPE_BITMASK;
        match nalu_type {
            SEI_NALU_TYPE | AUD_NALU_TYPE | FILLER_NALU_TYPE => {}
            SPS_NALU_TYPE => {
                self.sps_pending = Some(Bytes::copy_from_slice(nalu));
                // a new SPS invalidates any PPS from the previous pair
                self.pps_pending = None;
            }
            PPS_NALU_TYPE => {
                self.pps_pending = Some(Bytes::copy_from_slice(nalu));
                self.try_latch(out)?;
            }
            _ => {
                out.units.push(AccessUnit {
                    payload: Bytes::copy_from_slice(nalu),
                    frame: FrameInfo {
                        keyframe: nalu_type == IDR_NALU_TYPE,
                        temporal_id: None,
                    },
                });
            }
        }
        Ok(())
    }

    fn try_latch(&mut self, out: &mut Depacketized) -> Result<(), PacketError> {
        let (Some(sps), Some(pps)) = (&self.sps_pending, &self.pps_pending) else {
            return Ok(());
        };

        let pair = (sps.clone(), pps.clone());
        if self.latched.as_ref() == Some(&pair) {
            return Ok(());
        }

        let parsed = Sps::parse(&pair.0)?;
        out.codec_change = Some(CodecDescriptor::H264 {
            sps: pair.0.clone(),
            pps: pair.1.clone(),
            profile: parsed.profile_idc,
            level: parsed.level_idc,
            width: parsed.width,
            height: parsed.height,
        });
        self.latched = Some(pair);

        Ok(())
    }
}

impl Depacketizer for H264Depacketizer {
    fn depacketize(&mut self, packet: &RtpPacket) -> Result<Depacketized, PacketError> {
        let payload = &packet.payload[..];
        if payload.len() < 2 {
            return Err(PacketError::ErrShortPacket);
        }

        let mut out = Depacketized::default();
        let nalu_type = payload[0] & NALU_TYPE_BITMASK;

        match nalu_type {
            1..=23 => {
                self.handle_nalu(payload, &mut out)?;
            }
            STAPA_NALU_TYPE => {
                let mut curr_offset = STAPA_HEADER_SIZE;
                while curr_offset < payload.len() {
                    if payload.len() < curr_offset + STAPA_NALU_LENGTH_SIZE {
                        return Err(PacketError::ErrShortPacket);
                    }
                    let nalu_size = u16::from_be_bytes([
                        payload[curr_offset],
                        payload[curr_offset + 1],
                    ]) as usize;
                    curr_offset += STAPA_NALU_LENGTH_SIZE;

                    if payload.len() < curr_offset + nalu_size {
                        return Err(PacketError::StapASizeLargerThanBuffer(
                            nalu_size,
                            payload.len() - curr_offset,
                        ));
                    }
                    self.handle_nalu(&payload[curr_offset..curr_offset + nalu_size], &mut out)?;
                    curr_offset += nalu_size;
                }
            }
            FUA_NALU_TYPE => {
                let fu_header = payload[1];
                let is_start = fu_header & FU_START_BITMASK != 0;
                let is_end = fu_header & FU_END_BITMASK != 0;

                if fu_header & NALU_TYPE_BITMASK == FILLER_NALU_TYPE {
                    // filler data invalidates whatever reassembly is in flight
                    self.fua_buffer = None;
                    return Ok(out);
                }

                if is_start {
                    let orig_header =
                        (payload[0] & !NALU_TYPE_BITMASK) | (fu_header & NALU_TYPE_BITMASK);
                    let mut buf = Vec::with_capacity(payload.len());
                    buf.push(orig_header);
                    self.fua_buffer = Some(buf);
                }

                let Some(buf) = &mut self.fua_buffer else {
                    // middle fragment of a NALU whose start we never saw
                    return Ok(out);
                };
                buf.extend_from_slice(&payload[FUA_HEADER_SIZE..]);

                if is_end {
                    let nalu = self.fua_buffer.take().unwrap_or_default();
                    self.handle_nalu(&nalu, &mut out)?;
                }
            }
            _ => {
                // STAP-B, MTAP and FU-B signal a packetization mode we
                // do not negotiate
                return Err(PacketError::NaluTypeIsNotHandled(nalu_type));
            }
        }

        Ok(out)
    }
}

/// Splits H264 NAL units into RTP payloads.
///
/// Input is one NALU or an Annex B stream of several. SPS and PPS are held
/// back and prepended to the next VCL NALU as a STAP-A.
#[derive(Debug, Default)]
pub struct H264Packetizer {
    sps_nalu: Option<Vec<u8>>,
    pps_nalu: Option<Vec<u8>>,
}

impl H264Packetizer {
    fn next_annexb_start(nalu: &[u8], start: usize) -> Option<(usize, usize)> {
        let mut zero_count = 0;

        for (i, &b) in nalu[start..].iter().enumerate() {
            if b == 0 {
                zero_count += 1;
                continue;
            }
            if b == 1 && zero_count >= 2 {
                return Some((start + i - zero_count, zero_count + 1));
            }
            zero_count = 0;
        }
        None
    }

    fn emit(&mut self, nalu: &[u8], mtu: usize, payloads: &mut Vec<Vec<u8>>) {
        if nalu.is_empty() {
            return;
        }

        let nalu_type = nalu[0] & NALU_TYPE_BITMASK;
        let nalu_ref_idc = nalu[0] & NALU_REF_IDC_BITMASK;

        match nalu_type {
            AUD_NALU_TYPE | FILLER_NALU_TYPE => return,
            SPS_NALU_TYPE => {
                self.sps_nalu = Some(nalu.to_vec());
                return;
            }
            PPS_NALU_TYPE => {
                self.pps_nalu = Some(nalu.to_vec());
                return;
            }
            _ => {}
        }

        if let (Some(sps), Some(pps)) = (self.sps_nalu.take(), self.pps_nalu.take()) {
            let mut stap_a = Vec::with_capacity(1 + 2 + sps.len() + 2 + pps.len());
            stap_a.push(OUTPUT_STAP_AHEADER);
            stap_a.extend((sps.len() as u16).to_be_bytes());
            stap_a.extend_from_slice(&sps);
            stap_a.extend((pps.len() as u16).to_be_bytes());
            stap_a.extend_from_slice(&pps);
            if stap_a.len() <= mtu {
                payloads.push(stap_a);
            }
        }

        if nalu.len() <= mtu {
            payloads.push(nalu.to_vec());
            return;
        }

        // FU-A. The NALU header byte is carried in the FU indicator/header,
        // the payload starts at byte 1.
        let max_fragment_size = mtu.saturating_sub(FUA_HEADER_SIZE);
        if max_fragment_size == 0 {
            return;
        }

        let data = &nalu[1..];
        let mut index = 0;

        while index < data.len() {
            let fragment_size = max_fragment_size.min(data.len() - index);

            let mut out = Vec::with_capacity(FUA_HEADER_SIZE + fragment_size);
            out.push(FUA_NALU_TYPE | nalu_ref_idc);

            let mut fu_header = nalu_type;
            if index == 0 {
                fu_header |= FU_START_BITMASK;
            } else if index + fragment_size == data.len() {
                fu_header |= FU_END_BITMASK;
            }
            out.push(fu_header);

            out.extend_from_slice(&data[index..index + fragment_size]);
            payloads.push(out);

            index += fragment_size;
        }
    }
}

impl Packetizer for H264Packetizer {
    fn packetize(&mut self, mtu: usize, payload: &[u8]) -> Result<Vec<Vec<u8>>, PacketError> {
        if payload.is_empty() || mtu == 0 {
            return Ok(vec![]);
        }

        let mut payloads = vec![];

        let Some((mut next_start, mut start_len)) = Self::next_annexb_start(payload, 0) else {
            // no start code, treat the whole buffer as one NALU
            self.emit(payload, mtu, &mut payloads);
            return Ok(payloads);
        };

        while next_start + start_len < payload.len() {
            let nalu_start = next_start + start_len;
            match Self::next_annexb_start(payload, nalu_start) {
                Some((next, len)) => {
                    self.emit(&payload[nalu_start..next], mtu, &mut payloads);
                    next_start = next;
                    start_len = len;
                }
                None => {
                    self.emit(&payload[nalu_start..], mtu, &mut payloads);
                    break;
                }
            }
        }

        Ok(payloads)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::rtp::{Pt, RtpHeader, Ssrc};

    const SPS: &[u8] = &[0x67, 0x42, 0xc0, 0x1e, 0xda, 0x02, 0x80, 0xf6, 0x40];
    const PPS: &[u8] = &[0x68, 0xce, 0x3c, 0x80];

    fn packet(payload: &[u8]) -> RtpPacket {
        RtpPacket {
            header: RtpHeader::new(Pt::from(102), Ssrc::from(1)),
            payload: Bytes::copy_from_slice(payload),
        }
    }

    fn stap_a(nalus: &[&[u8]]) -> Vec<u8> {
        let mut p = vec![OUTPUT_STAP_AHEADER];
        for n in nalus {
            p.extend((n.len() as u16).to_be_bytes());
            p.extend_from_slice(n);
        }
        p
    }

    #[test]
    fn single_nalu_passes_through() {
        let mut d = H264Depacketizer::default();
        let out = d.depacketize(&packet(&[0x41, 0xaa, 0xbb])).unwrap();
        assert_eq!(out.units.len(), 1);
        assert_eq!(out.units[0].payload.as_ref(), &[0x41, 0xaa, 0xbb]);
        assert!(!out.units[0].frame.keyframe);
        assert!(out.codec_change.is_none());
    }

    #[test]
    fn sei_and_aud_are_dropped() {
        let mut d = H264Depacketizer::default();
        let out = d.depacketize(&packet(&[0x06, 0x05, 0x11])).unwrap();
        assert!(out.units.is_empty());
        let out = d.depacketize(&packet(&[0x09, 0x30])).unwrap();
        assert!(out.units.is_empty());
    }

    #[test]
    fn sps_pps_pair_latches_once() {
        let mut d = H264Depacketizer::default();

        let out = d.depacketize(&packet(SPS)).unwrap();
        assert!(out.codec_change.is_none(), "SPS alone must not signal");

        let out = d.depacketize(&packet(PPS)).unwrap();
        let Some(CodecDescriptor::H264 { width, height, .. }) = out.codec_change else {
            panic!("pair must signal a codec change");
        };
        assert_eq!((width, height), (640, 480));
        assert!(out.units.is_empty(), "parameter sets are not units");

        // same pair again: no new signal
        d.depacketize(&packet(SPS)).unwrap();
        let out = d.depacketize(&packet(PPS)).unwrap();
        assert!(out.codec_change.is_none());
    }

    #[test]
    fn stap_a_with_idr_signals_and_emits() {
        let mut d = H264Depacketizer::default();
        let idr = &[0x65, 0x88, 0x84, 0x00];
        let out = d.depacketize(&packet(&stap_a(&[SPS, PPS, idr]))).unwrap();

        assert!(out.codec_change.is_some());
        assert_eq!(out.units.len(), 1);
        assert!(out.units[0].frame.keyframe);
        assert_eq!(out.units[0].payload.as_ref(), idr);
    }

    #[test]
    fn stap_a_size_overrun_is_an_error() {
        let mut d = H264Depacketizer::default();
        let p = [STAPA_NALU_TYPE, 0x00, 0x10, 0x41, 0x42];
        assert_eq!(
            d.depacketize(&packet(&p)),
            Err(PacketError::StapASizeLargerThanBuffer(16, 2))
        );
    }

    #[test]
    fn fua_reassembles_idr() {
        let mut d = H264Depacketizer::default();

        // IDR 0x65, fragmented: payload bytes aa bb | cc dd
        let out = d
            .depacketize(&packet(&[0x7c, 0x85, 0xaa, 0xbb]))
            .unwrap();
        assert!(out.units.is_empty());

        let out = d
            .depacketize(&packet(&[0x7c, 0x45, 0xcc, 0xdd]))
            .unwrap();
        assert_eq!(out.units.len(), 1);
        assert!(out.units[0].frame.keyframe);
        assert_eq!(
            out.units[0].payload.as_ref(),
            &[0x65, 0xaa, 0xbb, 0xcc, 0xdd]
        );
    }

    #[test]
    fn fua_filler_aborts_reassembly() {
        let mut d = H264Depacketizer::default();

        let out = d.depacketize(&packet(&[0x7c, 0x85, 0xaa, 0xbb])).unwrap();
        assert!(out.units.is_empty());

        // fragmented filler data, type 12
        let out = d.depacketize(&packet(&[0x7c, 0x8c, 0x00, 0x00])).unwrap();
        assert!(out.units.is_empty());

        // stale end fragment: the buffer is gone, nothing is emitted
        let out = d.depacketize(&packet(&[0x7c, 0x45, 0xcc, 0xdd])).unwrap();
        assert!(out.units.is_empty());
    }

    #[test]
    fn fua_without_start_is_dropped() {
        let mut d = H264Depacketizer::default();
        let out = d.depacketize(&packet(&[0x7c, 0x45, 0xcc, 0xdd])).unwrap();
        assert!(out.units.is_empty());
    }

    #[test]
    fn unhandled_nalu_type_is_fatal() {
        let mut d = H264Depacketizer::default();
        let err = d.depacketize(&packet(&[0x1d, 0x00, 0x00])).unwrap_err();
        assert_eq!(err, PacketError::NaluTypeIsNotHandled(29));
        assert!(err.is_fatal());
    }

    #[test]
    fn depacketize_err_eq_matches() {
        let mut d = H264Depacketizer::default();
        assert_eq!(
            d.depacketize(&packet(&[0x41])),
            Err(PacketError::ErrShortPacket)
        );
    }

    #[test]
    fn packetizer_holds_sps_pps_for_stap_a() {
        let mut p = H264Packetizer::default();

        assert!(p.packetize(1200, SPS).unwrap().is_empty());
        assert!(p.packetize(1200, PPS).unwrap().is_empty());

        let idr = &[0x65u8, 0x88, 0x84, 0x00];
        let payloads = p.packetize(1200, idr).unwrap();
        assert_eq!(payloads.len(), 2);
        assert_eq!(payloads[0], stap_a(&[SPS, PPS]));
        assert_eq!(payloads[1], idr);
    }

    #[test]
    fn packetizer_fragments_large_nalu() {
        let mut p = H264Packetizer::default();
        let mut nalu = vec![0x65u8];
        nalu.extend(std::iter::repeat(0xab).take(20));

        let payloads = p.packetize(10, &nalu).unwrap();
        assert_eq!(payloads.len(), 3);

        assert_eq!(payloads[0][0], FUA_NALU_TYPE | (0x65 & NALU_REF_IDC_BITMASK));
        assert_eq!(payloads[0][1], FU_START_BITMASK | IDR_NALU_TYPE);
        assert_eq!(payloads[2][1], FU_END_BITMASK | IDR_NALU_TYPE);

        let mut rebuilt = vec![nalu[0]];
        for f in &payloads {
            rebuilt.extend_from_slice(&f[2..]);
        }
        assert_eq!(rebuilt, nalu);
        assert!(payloads.iter().all(|f| f.len() <= 10));
    }

    #[test]
    fn packetizer_splits_annexb_stream() {
        let mut p = H264Packetizer::default();
        let mut stream = vec![0, 0, 0, 1];
        stream.extend_from_slice(&[0x41, 0x01]);
        stream.extend_from_slice(&[0, 0, 1]);
        stream.extend_from_slice(&[0x41, 0x02]);

        let payloads = p.packetize(1200, &stream).unwrap();
        assert_eq!(payloads.len(), 2);
        assert_eq!(payloads[0], vec![0x41, 0x01]);
        assert_eq!(payloads[1], vec![0x41, 0x02]);
    }
}
