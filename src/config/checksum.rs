//! CRC-16 used for configuration records and the firmware image
//!
//! CCITT polynomial processed LSB first (0x8408 reflected), seed 0xFFFF, no
//! final xor. This is the avr-libc `_crc_ccitt_update` chain the stored
//! records were written with, known elsewhere as CRC-16/MCRF4XX.

/// Seed for a fresh checksum.
pub const CRC16_INIT: u16 = 0xffff;

/// Reflected CCITT polynomial.
const POLY_REFLECTED: u16 = 0x8408;

/// A CRC-16/MCRF4XX engine.
///
/// The firmware backs this with the STM32 CRC unit; [`SoftCrc16`] is the
/// portable implementation.
pub trait Crc16 {
    /// Checksum of `data` starting from [`CRC16_INIT`].
    fn checksum(&mut self, data: &[u8]) -> u16;
}

/// Bitwise software implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct SoftCrc16;

impl SoftCrc16 {
    /// Fold one byte into a running CRC.
    #[inline]
    pub const fn update(mut crc: u16, byte: u8) -> u16 {
        crc ^= byte as u16;
        let mut bit = 0;
        while bit < 8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ POLY_REFLECTED;
            } else {
                crc >>= 1;
            }
            bit += 1;
        }
        crc
    }
}

impl Crc16 for SoftCrc16 {
    fn checksum(&mut self, data: &[u8]) -> u16 {
        data.iter()
            .fold(CRC16_INIT, |crc, &byte| Self::update(crc, byte))
    }
}

impl<T: Crc16 + ?Sized> Crc16 for &mut T {
    fn checksum(&mut self, data: &[u8]) -> u16 {
        (**self).checksum(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_value() {
        assert_eq!(SoftCrc16.checksum(b"123456789"), 0x6f91);
    }

    #[test]
    fn test_empty_input_is_seed() {
        assert_eq!(SoftCrc16.checksum(&[]), CRC16_INIT);
    }

    #[test]
    fn test_matches_avr_libc_update() {
        // _crc_ccitt_update from avr-libc, written out byte-wise
        fn avr_update(crc: u16, data: u8) -> u16 {
            let mut data = data ^ (crc as u8);
            data ^= data << 4;
            (((data as u16) << 8) | (crc >> 8)) ^ ((data >> 4) as u16) ^ ((data as u16) << 3)
        }
        let bytes = [0xab, 0x12, 0x02, 0x00, 0xa0, 0x00, 0xff];
        let expected = bytes.iter().fold(0xffff, |crc, &b| avr_update(crc, b));
        assert_eq!(SoftCrc16.checksum(&bytes), expected);
    }
}
