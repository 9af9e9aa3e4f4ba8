//! Bit-level reader for codec parameter sets.
//!
//! H264 SPS parsing runs in RBSP mode, which transparently removes the
//! `00 00 03` emulation-prevention sequences while reading. AV1 sequence
//! header parsing reads the OBU payload as-is.

pub struct BitStream<'a> {
    data: &'a [u8],
    idx: usize,
    remain: usize,
    tmp: u8,
    rbsp: bool,
}

impl<'a> BitStream<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        BitStream {
            data,
            idx: 0,
            remain: 0,
            tmp: 0,
            rbsp: false,
        }
    }

    /// Reader that unescapes `00 00 03` emulation prevention while reading.
    pub fn new_rbsp(data: &'a [u8]) -> Self {
        let mut bs = BitStream::new(data);
        bs.rbsp = true;
        bs
    }

    #[inline(always)]
    pub fn read_bits(&mut self, mut num: usize) -> Option<u64> {
        let mut r = 0;

        while num > 0 {
            if self.remain == 0 {
                if self.idx >= self.data.len() {
                    return None;
                }
                self.tmp = self.data[self.idx];
                self.idx += 1;

                if self.rbsp && self.idx >= 2 && self.idx < self.data.len() {
                    if self.data[self.idx - 2..=self.idx] == [0, 0, 3] {
                        self.idx += 1;
                    }
                }
                self.remain = 8;
            }

            num -= 1;
            self.remain -= 1;
            if self.tmp & (1 << self.remain) > 0 {
                r |= 1 << num;
            }
        }

        Some(r)
    }

    /// Skip up to 64 bits.
    pub fn skip_bits(&mut self, num: usize) {
        self.read_bits(num);
    }

    pub fn read_bit_flag(&mut self) -> Option<bool> {
        self.read_bits(1).map(|b| b == 1)
    }

    pub fn read_golomb_ue(&mut self) -> Option<u64> {
        let mut lzb = 0usize;

        loop {
            if self.bits_left() == 0 {
                return None;
            }
            if self.read_bits(1)? == 1 {
                break;
            }
            lzb += 1;
        }

        if lzb == 0 {
            return Some(0);
        }

        let rl = self.read_bits(lzb)?;
        Some((1 << lzb) - 1 + rl)
    }

    pub fn read_golomb_se(&mut self) -> Option<i64> {
        let mut r = self.read_golomb_ue()? as i64;

        if r == 0 {
            return Some(0);
        }

        let pos = r & 1;
        r = (r + 1) >> 1;

        Some(if pos > 0 { r } else { -r })
    }

    pub fn bits_left(&self) -> usize {
        self.remain + (self.data.len() - self.idx) * 8
    }
}
