use super::{BitStream, PacketError};

/// The fields of an H264 sequence parameter set the relay cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sps {
    pub profile_idc: u8,
    pub level_idc: u8,
    pub width: u32,
    pub height: u32,
}

impl Sps {
    /// Parse an SPS NAL unit, including the one-byte NAL header.
    pub fn parse(nalu: &[u8]) -> Result<Sps, PacketError> {
        parse_inner(nalu).ok_or(PacketError::ErrInvalidSps)
    }
}

fn parse_inner(nalu: &[u8]) -> Option<Sps> {
    if nalu.len() < 4 || nalu[0] & 0x1f != 7 {
        return None;
    }

    let mut bs = BitStream::new_rbsp(&nalu[1..]);

    let profile_idc = bs.read_bits(8)? as u8;
    bs.skip_bits(8); // constraint flags + reserved
    let level_idc = bs.read_bits(8)? as u8;

    bs.read_golomb_ue()?; // seq_parameter_set_id

    let mut chroma_format_idc = 1;
    let mut separate_colour_plane = false;

    if matches!(
        profile_idc,
        100 | 110 | 122 | 244 | 44 | 83 | 86 | 118 | 128 | 138 | 139 | 134 | 135
    ) {
        chroma_format_idc = bs.read_golomb_ue()?;
        if chroma_format_idc == 3 {
            separate_colour_plane = bs.read_bit_flag()?;
        }
        bs.read_golomb_ue()?; // bit_depth_luma_minus8
        bs.read_golomb_ue()?; // bit_depth_chroma_minus8
        bs.skip_bits(1); // qpprime_y_zero_transform_bypass_flag
        if bs.read_bit_flag()? {
            // seq_scaling_matrix_present_flag
            let count = if chroma_format_idc == 3 { 12 } else { 8 };
            for i in 0..count {
                if bs.read_bit_flag()? {
                    skip_scaling_list(&mut bs, if i < 6 { 16 } else { 64 })?;
                }
            }
        }
    }

    bs.read_golomb_ue()?; // log2_max_frame_num_minus4

    let pic_order_cnt_type = bs.read_golomb_ue()?;
    if pic_order_cnt_type == 0 {
        bs.read_golomb_ue()?; // log2_max_pic_order_cnt_lsb_minus4
    } else if pic_order_cnt_type == 1 {
        bs.skip_bits(1); // delta_pic_order_always_zero_flag
        bs.read_golomb_se()?; // offset_for_non_ref_pic
        bs.read_golomb_se()?; // offset_for_top_to_bottom_field
        let cycles = bs.read_golomb_ue()?;
        for _ in 0..cycles {
            bs.read_golomb_se()?; // offset_for_ref_frame
        }
    }

    bs.read_golomb_ue()?; // max_num_ref_frames
    bs.skip_bits(1); // gaps_in_frame_num_value_allowed_flag

    let pic_width_in_mbs_minus1 = bs.read_golomb_ue()?;
    let pic_height_in_map_units_minus1 = bs.read_golomb_ue()?;
    let frame_mbs_only = bs.read_bit_flag()?;
    if !frame_mbs_only {
        bs.skip_bits(1); // mb_adaptive_frame_field_flag
    }

    bs.skip_bits(1); // direct_8x8_inference_flag

    let mut width = (pic_width_in_mbs_minus1 as u32 + 1) * 16;
    let frame_height_factor = if frame_mbs_only { 1 } else { 2 };
    let mut height =
        (pic_height_in_map_units_minus1 as u32 + 1) * 16 * frame_height_factor;

    if bs.read_bit_flag()? {
        // frame_cropping_flag
        let crop_left = bs.read_golomb_ue()? as u32;
        let crop_right = bs.read_golomb_ue()? as u32;
        let crop_top = bs.read_golomb_ue()? as u32;
        let crop_bottom = bs.read_golomb_ue()? as u32;

        let chroma_array_type = if separate_colour_plane {
            0
        } else {
            chroma_format_idc
        };
        let (crop_unit_x, crop_unit_y) = match chroma_array_type {
            0 => (1, frame_height_factor),
            1 => (2, 2 * frame_height_factor),
            2 => (2, frame_height_factor),
            _ => (1, frame_height_factor),
        };

        width = width.checked_sub((crop_left + crop_right) * crop_unit_x)?;
        height = height.checked_sub((crop_top + crop_bottom) * crop_unit_y)?;
    }

    Some(Sps {
        profile_idc,
        level_idc,
        width,
        height,
    })
}

fn skip_scaling_list(bs: &mut BitStream, size: usize) -> Option<()> {
    let mut last_scale: i64 = 8;
    let mut next_scale: i64 = 8;
    for _ in 0..size {
        if next_scale != 0 {
            let delta = bs.read_golomb_se()?;
            next_scale = (last_scale + delta + 256) % 256;
        }
        if next_scale != 0 {
            last_scale = next_scale;
        }
    }
    Some(())
}

#[cfg(test)]
mod test {
    use super::*;

    // Baseline profile level 3.0, 640x480, frame_mbs_only, no cropping.
    const SPS_640_480: &[u8] = &[0x67, 0x42, 0xc0, 0x1e, 0xda, 0x02, 0x80, 0xf6, 0x40];

    #[test]
    fn parses_baseline_sps() {
        let sps = Sps::parse(SPS_640_480).unwrap();
        assert_eq!(sps.profile_idc, 0x42);
        assert_eq!(sps.level_idc, 0x1e);
        assert_eq!(sps.width, 640);
        assert_eq!(sps.height, 480);
    }

    #[test]
    fn rejects_non_sps_nalu() {
        assert_eq!(Sps::parse(&[0x68, 0xce, 0x3c, 0x80]), Err(PacketError::ErrInvalidSps));
    }

    #[test]
    fn rejects_truncated() {
        assert_eq!(
            Sps::parse(&SPS_640_480[..5]),
            Err(PacketError::ErrInvalidSps)
        );
    }
}
