//! VP8 payload handling (RFC 7741).

use bytes::Bytes;

use crate::codec::CodecDescriptor;
use crate::rtp::RtpPacket;
use crate::unit::FrameInfo;

use super::{ByteReader, Depacketized, Depacketizer, PacketError, Packetizer};

pub const VP8_HEADER_SIZE: usize = 1;

/// Reassembles VP8 frames from RTP payloads.
///
/// Fragments accumulate from the partition start (S=1, PID=0) until the RTP
/// marker bit. Keyframe dimensions are read from the uncompressed data chunk
/// and reported as a codec change when they differ from the last signalled
/// ones.
#[derive(Debug, Default)]
pub struct Vp8Depacketizer {
    buffer: Vec<u8>,
    started: bool,
    keyframe: bool,
    temporal_id: Option<u8>,
    last_signalled: Option<CodecDescriptor>,
}

struct Vp8Descriptor {
    start_of_partition: bool,
    partition_index: u8,
    temporal_id: Option<u8>,
}

fn parse_descriptor<'a>(payload: &'a [u8]) -> Result<(Vp8Descriptor, &'a [u8]), PacketError> {
    let mut r = ByteReader::new(payload);

    let b0 = r.get_u8()?;
    let extended = b0 & 0x80 != 0;
    let start_of_partition = b0 & 0x10 != 0;
    let partition_index = b0 & 0x07;

    let mut temporal_id = None;
    if extended {
        let ext = r.get_u8()?;
        let has_picture_id = ext & 0x80 != 0;
        let has_tl0picidx = ext & 0x40 != 0;
        let has_tid = ext & 0x20 != 0;
        let has_keyidx = ext & 0x10 != 0;

        if has_picture_id {
            let m = r.get_u8()?;
            if m & 0x80 != 0 {
                // 15-bit picture id, second byte
                r.get_u8()?;
            }
        }
        if has_tl0picidx {
            r.get_u8()?;
        }
        if has_tid || has_keyidx {
            let b = r.get_u8()?;
            if has_tid {
                temporal_id = Some(b >> 6);
            }
        }
    }

    if r.remaining() == 0 {
        return Err(PacketError::ErrShortPacket);
    }

    Ok((
        Vp8Descriptor {
            start_of_partition,
            partition_index,
            temporal_id,
        },
        r.rest(),
    ))
}

/// Frame width/height from the uncompressed data chunk of a keyframe.
fn keyframe_dimensions(frame: &[u8]) -> Option<(u32, u32)> {
    if frame.len() < 10 || frame[3..6] != [0x9d, 0x01, 0x2a] {
        return None;
    }
    let width = u32::from(u16::from_le_bytes([frame[6], frame[7]]) & 0x3fff);
    let height = u32::from(u16::from_le_bytes([frame[8], frame[9]]) & 0x3fff);
    Some((width, height))
}

impl Depacketizer for Vp8Depacketizer {
    fn depacketize(&mut self, packet: &RtpPacket) -> Result<Depacketized, PacketError> {
        let (desc, frame_data) = parse_descriptor(&packet.payload)?;

        if desc.start_of_partition && desc.partition_index == 0 {
            self.buffer.clear();
            self.started = true;
            // P bit of the frame tag: 0 is a keyframe
            self.keyframe = frame_data[0] & 0x01 == 0;
            self.temporal_id = desc.temporal_id;
        }

        if !self.started {
            // tail of a frame whose start we never saw
            return Ok(Depacketized::default());
        }

        self.buffer.extend_from_slice(frame_data);

        if !packet.header.marker {
            return Ok(Depacketized::default());
        }

        let payload = Bytes::from(std::mem::take(&mut self.buffer));
        self.started = false;

        let mut out = Depacketized::unit(
            payload.clone(),
            FrameInfo {
                keyframe: self.keyframe,
                temporal_id: self.temporal_id,
            },
        );

        if self.keyframe {
            if let Some((width, height)) = keyframe_dimensions(&payload) {
                let desc = CodecDescriptor::Vp8 { width, height };
                if self.last_signalled.as_ref() != Some(&desc) {
                    self.last_signalled = Some(desc.clone());
                    out.codec_change = Some(desc);
                }
            }
        }

        Ok(out)
    }
}

/// Splits a VP8 frame into RTP payloads with a one-byte descriptor.
#[derive(Debug, Default, Clone, Copy)]
pub struct Vp8Packetizer;

impl Packetizer for Vp8Packetizer {
    fn packetize(&mut self, mtu: usize, payload: &[u8]) -> Result<Vec<Vec<u8>>, PacketError> {
        if payload.is_empty() || mtu == 0 {
            return Ok(vec![]);
        }

        let max_fragment_size = mtu.saturating_sub(VP8_HEADER_SIZE);
        if max_fragment_size == 0 {
            return Ok(vec![]);
        }

        let mut payloads = vec![];
        let mut index = 0;

        while index < payload.len() {
            let fragment_size = max_fragment_size.min(payload.len() - index);
            let mut out = Vec::with_capacity(VP8_HEADER_SIZE + fragment_size);
            // S bit on the first fragment, PID always 0
            out.push(if index == 0 { 0x10 } else { 0x00 });
            out.extend_from_slice(&payload[index..index + fragment_size]);
            payloads.push(out);
            index += fragment_size;
        }

        Ok(payloads)
    }
}
