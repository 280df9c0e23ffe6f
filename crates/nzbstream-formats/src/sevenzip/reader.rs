//! Primitive readers for 7z header structures

use crate::error::{FormatError, FormatResult};

/// Cursor over a header buffer
///
/// Offsets in errors are relative to `base`, the position of the buffer
/// within the archive.
#[derive(Debug)]
pub(crate) struct HeaderReader<'a> {
    data: &'a [u8],
    pos: usize,
    base: u64,
}

impl<'a> HeaderReader<'a> {
    pub(crate) fn new(data: &'a [u8], base: u64) -> Self {
        Self { data, pos: 0, base }
    }

    pub(crate) fn position(&self) -> u64 {
        self.base + self.pos as u64
    }

    pub(crate) fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn truncated(&self, needed: usize) -> FormatError {
        FormatError::Truncated {
            offset: self.position(),
            needed: (needed - self.remaining()) as u64,
        }
    }

    pub(crate) fn read_bytes(&mut self, len: usize) -> FormatResult<&'a [u8]> {
        if self.remaining() < len {
            return Err(self.truncated(len));
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    pub(crate) fn skip(&mut self, len: usize) -> FormatResult<()> {
        self.read_bytes(len).map(|_| ())
    }

    pub(crate) fn read_u8(&mut self) -> FormatResult<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    pub(crate) fn read_u32(&mut self) -> FormatResult<u32> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// 7z `NUMBER`: leading one bits of the first byte count the extra bytes
    pub(crate) fn read_number(&mut self) -> FormatResult<u64> {
        let first = self.read_u8()?;
        let mut mask = 0x80u8;
        let mut value = 0u64;
        for i in 0..8 {
            if first & mask == 0 {
                let high = u64::from(first & mask.wrapping_sub(1));
                return Ok(value | (high << (8 * i)));
            }
            value |= u64::from(self.read_u8()?) << (8 * i);
            mask >>= 1;
        }
        Ok(value)
    }

    /// `NUMBER` that must fit in memory
    pub(crate) fn read_count(&mut self) -> FormatResult<usize> {
        let at = self.position();
        let value = self.read_number()?;
        usize::try_from(value)
            .ok()
            .filter(|&v| v <= self.data.len().max(1) * 8)
            .ok_or_else(|| FormatError::malformed(at, format!("implausible count {value}")))
    }

    /// Bit vector, most significant bit first
    pub(crate) fn read_bits(&mut self, count: usize) -> FormatResult<Vec<bool>> {
        let bytes = self.read_bytes(count.div_ceil(8))?;
        Ok((0..count)
            .map(|i| bytes[i / 8] & (0x80 >> (i % 8)) != 0)
            .collect())
    }

    /// Bit vector preceded by an "all defined" byte
    pub(crate) fn read_defined(&mut self, count: usize) -> FormatResult<Vec<bool>> {
        if self.read_u8()? == 0 {
            self.read_bits(count)
        } else {
            Ok(vec![true; count])
        }
    }

    /// CRC list, `None` where undefined
    pub(crate) fn read_digests(&mut self, count: usize) -> FormatResult<Vec<Option<u32>>> {
        self.read_defined(count)?
            .into_iter()
            .map(|defined| defined.then(|| self.read_u32()).transpose())
            .collect()
    }

    pub(crate) fn expect(&mut self, id: u8) -> FormatResult<()> {
        let at = self.position();
        let found = self.read_u8()?;
        if found == id {
            Ok(())
        } else {
            Err(FormatError::malformed(
                at,
                format!("expected property {id:#04x}, found {found:#04x}"),
            ))
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn test_numbers() {
        let data = [0x7F, 0x80, 0x80, 0xC1, 0x02, 0x03, 0xFF, 1, 2, 3, 4, 5, 6, 7, 8];
        let mut r = HeaderReader::new(&data, 0);
        assert_eq!(r.read_number().unwrap(), 0x7F);
        assert_eq!(r.read_number().unwrap(), 0x80);
        assert_eq!(r.read_number().unwrap(), 0x01_0302);
        assert_eq!(r.read_number().unwrap(), 0x0807_0605_0403_0201);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn test_bits_and_digests() {
        let data = [0b1010_0000, 0x00, 0b0100_0000, 0xEF, 0xBE, 0xAD, 0xDE];
        let mut r = HeaderReader::new(&data, 0);
        assert_eq!(r.read_bits(3).unwrap(), vec![true, false, true]);
        assert_eq!(r.read_digests(2).unwrap(), vec![None, Some(0xDEAD_BEEF)]);
    }

    #[test]
    fn test_truncation_reports_offset() {
        let mut r = HeaderReader::new(&[0xFF, 1, 2], 100);
        assert!(matches!(
            r.read_number(),
            Err(FormatError::Truncated { offset: 103, .. })
        ));
    }

    proptest! {
        #[test]
        fn prop_number_encoding(value in any::<u64>()) {
            let encoded = test_utils::sevenzip::encode_number(value);
            let mut r = HeaderReader::new(&encoded, 0);
            prop_assert_eq!(r.read_number().unwrap(), value);
            prop_assert_eq!(r.remaining(), 0);
        }
    }
}
