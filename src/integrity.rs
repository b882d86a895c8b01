//! Program image self-check

use crate::config::checksum::Crc16;
use crate::fmt::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum IntegrityError {
    CrcMismatch { stored: u16, computed: u16 },
}

/// Compare the CRC-16 of `image` with the word stored alongside it.
pub fn verify_image(image: &[u8], stored: u16, crc: &mut impl Crc16) -> Result<(), IntegrityError> {
    let computed = crc.checksum(image);
    if computed != stored {
        error!("Image CRC mismatch: stored=0x{:04X} computed=0x{:04X}", stored, computed);
        return Err(IntegrityError::CrcMismatch { stored, computed });
    }
    Ok(())
}
