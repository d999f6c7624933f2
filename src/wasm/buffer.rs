//! Bounded byte cursor over the module buffer and the primitive decoders:
//! LEB128 unsigned/signed integers, IEEE-754 bit patterns, and
//! length-prefixed UTF-8 names.

use crate::error::{CompileError, Result};

/// A cursor over a byte slice. `base` is the absolute offset of `data[0]` in
/// the module buffer, so that errors and section bookkeeping can report
/// module-absolute offsets even from nested (section- or body-bounded)
/// cursors.
#[derive(Debug, Clone)]
pub struct Buffer<'a> {
    data: &'a [u8],
    base: usize,
    pos: usize,
}

impl<'a> Buffer<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Buffer { data, base: 0, pos: 0 }
    }

    /// Absolute offset of the next byte in the module buffer.
    pub fn offset(&self) -> usize {
        self.base + self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn at_end(&self) -> bool {
        self.pos == self.data.len()
    }

    fn require(&self, count: usize) -> Result<()> {
        if count > self.remaining() {
            Err(CompileError::ReadShort {
                offset: self.offset(),
                wanted: count - self.remaining(),
            })
        } else {
            Ok(())
        }
    }

    pub fn read_byte(&mut self) -> Result<u8> {
        self.require(1)?;
        let byte = self.data[self.pos];
        self.pos += 1;
        Ok(byte)
    }

    pub fn read_bytes(&mut self, count: usize) -> Result<&'a [u8]> {
        self.require(count)?;
        let bytes = &self.data[self.pos..self.pos + count];
        self.pos += count;
        Ok(bytes)
    }

    /// A nested cursor over the next `len` bytes, e.g. one section body or
    /// one function body. The parent cursor skips past those bytes; the
    /// child reports absolute offsets.
    pub fn sub_buffer(&mut self, len: usize) -> Result<Buffer<'a>> {
        let base = self.offset();
        let data = self.read_bytes(len)?;
        Ok(Buffer { data, base, pos: 0 })
    }

    pub fn read_u32_le(&mut self) -> Result<u32> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Unsigned LEB128, at most 5 groups. The cap is strict: a 6th
    /// continuation group fails even if it only carries zero bits.
    pub fn read_var_u32(&mut self) -> Result<u32> {
        let start = self.offset();
        let mut value: u32 = 0;
        for group in 0..5 {
            let byte = self.read_byte()?;
            value |= u32::from(byte & 0x7f) << (group * 7);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(CompileError::LebOverflow { offset: start })
    }

    /// Unsigned LEB128, at most 10 groups.
    pub fn read_var_u64(&mut self) -> Result<u64> {
        let start = self.offset();
        let mut value: u64 = 0;
        for group in 0..10 {
            let byte = self.read_byte()?;
            value |= u64::from(byte & 0x7f) << (group * 7);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(CompileError::LebOverflow { offset: start })
    }

    /// Signed LEB128 (33 bit at most, i.e. i32 immediates). The final group
    /// is sign-extended over the remaining high bits.
    pub fn read_var_i32(&mut self) -> Result<i32> {
        let start = self.offset();
        let mut value: i64 = 0;
        for group in 0..5 {
            let byte = self.read_byte()?;
            value |= i64::from(byte & 0x7f) << (group * 7);
            if byte & 0x80 == 0 {
                let shift = 64 - 7 * (group + 1);
                return Ok(((value << shift) >> shift) as i32);
            }
        }
        Err(CompileError::LebOverflow { offset: start })
    }

    pub fn read_var_i64(&mut self) -> Result<i64> {
        let start = self.offset();
        let mut value: i64 = 0;
        for group in 0..10 {
            let byte = self.read_byte()?;
            value |= i64::from(byte & 0x7f) << (group * 7);
            if byte & 0x80 == 0 {
                if group < 9 {
                    let shift = 64 - 7 * (group + 1);
                    value = (value << shift) >> shift;
                }
                return Ok(value);
            }
        }
        Err(CompileError::LebOverflow { offset: start })
    }

    /// f32 as its raw little-endian bit pattern. Decoding keeps the bits
    /// (NaN payloads included); only the code generator decides how the
    /// value is rendered.
    pub fn read_f32_bits(&mut self) -> Result<u32> {
        self.read_u32_le()
    }

    pub fn read_f64_bits(&mut self) -> Result<u64> {
        let bytes = self.read_bytes(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(raw))
    }

    /// Length-prefixed UTF-8 name.
    pub fn read_name(&mut self) -> Result<&'a str> {
        let offset = self.offset();
        let len = self.read_var_u32()? as usize;
        let bytes = self.read_bytes(len)?;
        std::str::from_utf8(bytes).map_err(|_| CompileError::BadName { offset })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn var_u32_single_and_multi_group() {
        let mut buf = Buffer::new(&[0x03, 0xe5, 0x8e, 0x26, 0xff, 0xff, 0xff, 0xff, 0x0f]);
        assert_eq!(buf.read_var_u32().unwrap(), 3);
        assert_eq!(buf.read_var_u32().unwrap(), 624485);
        assert_eq!(buf.read_var_u32().unwrap(), u32::max_value());
        assert!(buf.at_end());
    }

    #[test]
    fn var_u32_overflow_is_strict() {
        // 6 groups, even though the 6th carries only zero bits.
        let mut buf = Buffer::new(&[0x80, 0x80, 0x80, 0x80, 0x80, 0x00]);
        assert_eq!(buf.read_var_u32(), Err(CompileError::LebOverflow { offset: 0 }));
    }

    #[test]
    fn var_u64_ten_groups() {
        let mut buf = Buffer::new(&[0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x01]);
        assert_eq!(buf.read_var_u64().unwrap(), u64::max_value());

        let mut buf = Buffer::new(&[0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x00]);
        assert_eq!(buf.read_var_u64(), Err(CompileError::LebOverflow { offset: 0 }));
    }

    #[test]
    fn var_i32_sign_extension() {
        // -1 in one group, -624485 in three.
        let mut buf = Buffer::new(&[0x7f, 0x9b, 0xf1, 0x59]);
        assert_eq!(buf.read_var_i32().unwrap(), -1);
        assert_eq!(buf.read_var_i32().unwrap(), -624485);
    }

    #[test]
    fn var_i64_min_value() {
        let mut buf = Buffer::new(&[0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x7f]);
        assert_eq!(buf.read_var_i64().unwrap(), i64::min_value());
    }

    #[test]
    fn read_short_reports_absolute_offset() {
        let mut buf = Buffer::new(&[0x01, 0x02]);
        let mut sub = buf.sub_buffer(2).unwrap();
        sub.read_byte().unwrap();
        assert_eq!(sub.read_bytes(3), Err(CompileError::ReadShort { offset: 1, wanted: 2 }));
    }

    #[test]
    fn float_bits_little_endian() {
        let mut buf = Buffer::new(&[0x00, 0x00, 0x80, 0x3f]);
        assert_eq!(buf.read_f32_bits().unwrap(), 0x3f80_0000);

        // A NaN with a non-default payload round-trips bit-exactly.
        let mut buf = Buffer::new(&[0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0xf8, 0x7f]);
        assert_eq!(buf.read_f64_bits().unwrap(), 0x7ff8_0000_0000_0001);
    }

    #[test]
    fn name_utf8() {
        let mut buf = Buffer::new(&[0x03, b'a', b'd', b'd']);
        assert_eq!(buf.read_name().unwrap(), "add");

        let mut buf = Buffer::new(&[0x02, 0xff, 0xfe]);
        assert_eq!(buf.read_name(), Err(CompileError::BadName { offset: 0 }));
    }
}
