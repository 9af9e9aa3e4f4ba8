//! AV1 payload handling (AV1 RTP spec aggregation format).
//!
//! Wire payloads start with the one-byte aggregation header:
//!
//! ```text
//!  0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+
//! |Z|Y| W |N|-|-|-|
//! +-+-+-+-+-+-+-+-+
//! ```
//!
//! Z: first OBU element continues one from the previous packet.
//! Y: last OBU element continues in the next packet.
//! W: OBU element count; when non-zero the last element has no length prefix.
//! N: first packet of a new coded video sequence.

use bytes::Bytes;

use crate::codec::CodecDescriptor;
use crate::rtp::RtpPacket;
use crate::unit::FrameInfo;

use super::{BitStream, ByteReader, Depacketized, Depacketizer, PacketError, Packetizer};

const Z_BITMASK: u8 = 0x80;
const Y_BITMASK: u8 = 0x40;
const W_BITMASK: u8 = 0x30;
const N_BITMASK: u8 = 0x08;

pub const OBU_TYPE_SEQUENCE_HEADER: u8 = 1;

/// Parsed open-bitstream-unit header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObuHeader {
    pub obu_type: u8,
    pub has_extension: bool,
    pub has_size: bool,
    pub temporal_id: u8,
    pub spatial_id: u8,
}

impl ObuHeader {
    pub fn parse(buf: &[u8]) -> Result<ObuHeader, PacketError> {
        if buf.is_empty() {
            return Err(PacketError::ErrShortPacket);
        }
        let b0 = buf[0];
        if b0 & 0x80 != 0 {
            // forbidden bit
            return Err(PacketError::ErrAv1CorruptedPacket);
        }

        let obu_type = (b0 >> 3) & 0x0f;
        let has_extension = b0 & 0x04 != 0;
        let has_size = b0 & 0x02 != 0;

        let (temporal_id, spatial_id) = if has_extension {
            if buf.len() < 2 {
                return Err(PacketError::ErrShortPacket);
            }
            (buf[1] >> 5, (buf[1] >> 3) & 0x03)
        } else {
            (0, 0)
        };

        Ok(ObuHeader {
            obu_type,
            has_extension,
            has_size,
            temporal_id,
            spatial_id,
        })
    }

    fn len(&self) -> usize {
        if self.has_extension {
            2
        } else {
            1
        }
    }
}

fn leb128_encode(mut value: usize, out: &mut Vec<u8>) {
    loop {
        let mut b = (value & 0x7f) as u8;
        value >>= 7;
        if value > 0 {
            b |= 0x80;
        }
        out.push(b);
        if value == 0 {
            return;
        }
    }
}

fn read_uvlc(bs: &mut BitStream) -> Option<u64> {
    let mut leading_zeros = 0;
    while !bs.read_bit_flag()? {
        leading_zeros += 1;
        if leading_zeros > 32 {
            return None;
        }
    }
    if leading_zeros == 32 {
        return Some(u64::from(u32::MAX));
    }
    let value = bs.read_bits(leading_zeros)?;
    Some(value + (1 << leading_zeros) - 1)
}

/// Max frame width/height from a sequence header OBU (header included).
pub fn parse_sequence_header(obu: &[u8]) -> Result<(u32, u32), PacketError> {
    let header = ObuHeader::parse(obu)?;
    if header.obu_type != OBU_TYPE_SEQUENCE_HEADER {
        return Err(PacketError::ErrInvalidSequenceHeader);
    }

    let mut pos = header.len();
    if header.has_size {
        let mut r = ByteReader::new(&obu[pos..]);
        r.read_leb128()?;
        pos += r.offset();
    }

    sequence_header_dimensions(&obu[pos..]).ok_or(PacketError::ErrInvalidSequenceHeader)
}

fn sequence_header_dimensions(payload: &[u8]) -> Option<(u32, u32)> {
    let mut bs = BitStream::new(payload);

    bs.read_bits(3)?; // seq_profile
    bs.skip_bits(1); // still_picture
    let reduced_still_picture = bs.read_bit_flag()?;

    if reduced_still_picture {
        bs.read_bits(5)?; // seq_level_idx[0]
    } else {
        let mut decoder_model_info_present = false;
        let mut buffer_delay_length = 0;

        if bs.read_bit_flag()? {
            // timing_info()
            bs.read_bits(32)?; // num_units_in_display_tick
            bs.read_bits(32)?; // time_scale
            if bs.read_bit_flag()? {
                read_uvlc(&mut bs)?; // num_ticks_per_picture_minus_1
            }

            decoder_model_info_present = bs.read_bit_flag()?;
            if decoder_model_info_present {
                buffer_delay_length = bs.read_bits(5)? as usize + 1;
                bs.read_bits(32)?; // num_units_in_decoding_tick
                bs.read_bits(5)?; // buffer_removal_time_length_minus_1
                bs.read_bits(5)?; // frame_presentation_time_length_minus_1
            }
        }

        let initial_display_delay_present = bs.read_bit_flag()?;
        let operating_points = bs.read_bits(5)? + 1;

        for _ in 0..operating_points {
            bs.read_bits(12)?; // operating_point_idc
            let seq_level_idx = bs.read_bits(5)?;
            if seq_level_idx > 7 {
                bs.skip_bits(1); // seq_tier
            }
            if decoder_model_info_present && bs.read_bit_flag()? {
                // operating_parameters_info()
                bs.read_bits(buffer_delay_length)?; // decoder_buffer_delay
                bs.read_bits(buffer_delay_length)?; // encoder_buffer_delay
                bs.skip_bits(1); // low_delay_mode_flag
            }
            if initial_display_delay_present && bs.read_bit_flag()? {
                bs.read_bits(4)?; // initial_display_delay_minus_1
            }
        }
    }

    let width_bits = bs.read_bits(4)? as usize + 1;
    let height_bits = bs.read_bits(4)? as usize + 1;
    let width = bs.read_bits(width_bits)? as u32 + 1;
    let height = bs.read_bits(height_bits)? as u32 + 1;

    Some((width, height))
}

/// Reassembles AV1 temporal units from RTP payloads.
///
/// OBU elements accumulate across packets (Z/Y continuation). When a packet
/// finishes its last element, the pending elements are emitted as one unit
/// in low-overhead format (every OBU carries a size field). A sequence
/// header seen under the N flag is parsed and reported as a codec change
/// once reassembly of its temporal unit completes.
#[derive(Debug, Default)]
pub struct Av1Depacketizer {
    elements: Vec<Vec<u8>>,
    new_sequence: bool,
    last_signalled: Option<CodecDescriptor>,
}

impl Av1Depacketizer {
    fn emit(&mut self) -> Result<Depacketized, PacketError> {
        let elements = std::mem::take(&mut self.elements);
        let keyframe = self.new_sequence;
        self.new_sequence = false;

        let mut codec_change = None;
        if keyframe {
            if let Some(seq) = elements.iter().find(|e| {
                ObuHeader::parse(e)
                    .map(|h| h.obu_type == OBU_TYPE_SEQUENCE_HEADER)
                    .unwrap_or(false)
            }) {
                let (width, height) = parse_sequence_header(seq)?;
                let desc = CodecDescriptor::Av1 {
                    seq_header: Bytes::copy_from_slice(seq),
                    width,
                    height,
                };
                if self.last_signalled.as_ref() != Some(&desc) {
                    self.last_signalled = Some(desc.clone());
                    codec_change = Some(desc);
                }
            }
        }

        let mut payload = Vec::new();
        for element in &elements {
            let header = ObuHeader::parse(element)?;
            if header.has_size {
                payload.extend_from_slice(element);
            } else {
                payload.push(element[0] | 0x02);
                let body_start = header.len();
                if header.has_extension {
                    payload.push(element[1]);
                }
                leb128_encode(element.len() - body_start, &mut payload);
                payload.extend_from_slice(&element[body_start..]);
            }
        }

        if payload.is_empty() {
            return Ok(Depacketized::default());
        }

        let mut out = Depacketized::unit(
            Bytes::from(payload),
            FrameInfo {
                keyframe,
                temporal_id: None,
            },
        );
        out.codec_change = codec_change;
        Ok(out)
    }
}

impl Depacketizer for Av1Depacketizer {
    fn depacketize(&mut self, packet: &RtpPacket) -> Result<Depacketized, PacketError> {
        let mut r = ByteReader::new(&packet.payload);

        let agg = r.get_u8()?;
        let continues_previous = agg & Z_BITMASK != 0;
        let continues_next = agg & Y_BITMASK != 0;
        let count = (agg & W_BITMASK) >> 4;
        if agg & N_BITMASK != 0 {
            self.new_sequence = true;
        }

        if !continues_previous && !self.elements.is_empty() {
            // previous temporal unit never completed, discard it
            self.elements.clear();
        }

        let mut index = 0u8;
        while r.remaining() > 0 {
            index += 1;
            let fragment = if count > 0 && index == count {
                r.rest()
            } else {
                let len = r.read_leb128()?;
                r.get_bytes(len)?
            };

            if index == 1 && continues_previous {
                match self.elements.last_mut() {
                    Some(last) => last.extend_from_slice(fragment),
                    // continuation of an element we never started
                    None => return Ok(Depacketized::default()),
                }
            } else {
                self.elements.push(fragment.to_vec());
            }
        }

        if count > 0 && index < count {
            return Err(PacketError::ErrAv1CorruptedPacket);
        }

        if continues_next {
            return Ok(Depacketized::default());
        }

        self.emit()
    }
}

/// Splits an AV1 temporal unit into RTP payloads.
///
/// The whole unit travels as a single OBU element (W=1), fragmented with
/// Z/Y continuation flags when it exceeds the MTU.
#[derive(Debug, Default, Clone, Copy)]
pub struct Av1Packetizer;

impl Packetizer for Av1Packetizer {
    fn packetize(&mut self, mtu: usize, payload: &[u8]) -> Result<Vec<Vec<u8>>, PacketError> {
        if payload.is_empty() || mtu == 0 {
            return Ok(vec![]);
        }

        let max_fragment_size = mtu.saturating_sub(1);
        if max_fragment_size == 0 {
            return Ok(vec![]);
        }

        let mut payloads = vec![];
        let mut index = 0;

        while index < payload.len() {
            let fragment_size = max_fragment_size.min(payload.len() - index);
            let first = index == 0;
            let last = index + fragment_size == payload.len();

            let mut agg = 0x10; // W=1
            if !first {
                agg |= Z_BITMASK;
            }
            if !last {
                agg |= Y_BITMASK;
            }

            let mut out = Vec::with_capacity(1 + fragment_size);
            out.push(agg);
            out.extend_from_slice(&payload[index..index + fragment_size]);
            payloads.push(out);

            index += fragment_size;
        }

        Ok(payloads)
    }
}
