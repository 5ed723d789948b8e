// SPDX-License-Identifier: Apache-2.0
//! Snapshot envelope framing and integrity checks.
//!
//! Envelope layout (big-endian):
//!
//! ```text
//! offset size  field
//! 0      4     magic = ASCII "AVS!"
//! 4      2     version = u16 BE (1)
//! 6      2     flags = u16 BE (reserved, zero)
//! 8      4     payload length = u32 BE
//! 12     var   payload (CBOR target list)
//! 12+L   32    checksum = blake3-256 over bytes[0..12+L]
//! ```
//!
//! The checksum covers header and payload, so any truncation or bit flip
//! anywhere in the buffer fails verification before the payload is parsed.

use blake3::Hasher;

use crate::{OpenError, ParseError};

/// Envelope magic constant "AVS!".
pub const MAGIC: [u8; 4] = [b'A', b'V', b'S', b'!'];
/// Snapshot format version understood by this reader/writer.
pub const VERSION: u16 = 1;
/// Reserved flags (zero for v1).
pub const FLAGS: u16 = 0;
/// Fixed header size in bytes.
pub const HEADER_SIZE: usize = 12;
/// blake3-256 checksum size in bytes.
pub const CHECKSUM_SIZE: usize = 32;

fn checksum(header: &[u8], payload: &[u8]) -> [u8; CHECKSUM_SIZE] {
    let mut hasher = Hasher::new();
    hasher.update(header);
    hasher.update(payload);
    *hasher.finalize().as_bytes()
}

/// Wrap a payload in a sealed envelope (header + payload + checksum).
///
/// # Errors
///
/// Returns [`ParseError::PayloadTooLarge`] if the payload length does not
/// fit the u32 length field.
pub fn seal(payload: &[u8]) -> Result<Vec<u8>, ParseError> {
    let length = u32::try_from(payload.len())
        .map_err(|_| ParseError::PayloadTooLarge { bytes: payload.len() })?;

    let mut header = [0u8; HEADER_SIZE];
    header[0..4].copy_from_slice(&MAGIC);
    header[4..6].copy_from_slice(&VERSION.to_be_bytes());
    header[6..8].copy_from_slice(&FLAGS.to_be_bytes());
    header[8..12].copy_from_slice(&length.to_be_bytes());

    let sum = checksum(&header, payload);

    let mut out = Vec::with_capacity(HEADER_SIZE + payload.len() + CHECKSUM_SIZE);
    out.extend_from_slice(&header);
    out.extend_from_slice(payload);
    out.extend_from_slice(&sum);
    Ok(out)
}

/// Verify an envelope and return its payload slice.
///
/// Checks, in order: minimum size, magic, version, length against buffer
/// bounds, absence of trailing bytes, and the blake3 checksum.
///
/// # Errors
///
/// [`OpenError::Version`] for an unrecognized version marker; every other
/// failure is an [`OpenError::Parse`].
pub fn unseal(bytes: &[u8]) -> Result<&[u8], OpenError> {
    if bytes.len() < HEADER_SIZE + CHECKSUM_SIZE {
        return Err(ParseError::Truncated {
            need: HEADER_SIZE + CHECKSUM_SIZE,
            got: bytes.len(),
        }
        .into());
    }
    // Lengths just checked; the conversions below cannot fail.
    let magic: [u8; 4] = bytes[0..4].try_into().unwrap();
    if magic != MAGIC {
        return Err(ParseError::BadMagic(magic).into());
    }
    let version = u16::from_be_bytes(bytes[4..6].try_into().unwrap());
    if version != VERSION {
        return Err(OpenError::Version { found: version });
    }
    // bytes[6..8] are reserved flags; ignored for v1.
    let length = u32::from_be_bytes(bytes[8..12].try_into().unwrap()) as usize;

    let total = HEADER_SIZE + length + CHECKSUM_SIZE;
    if bytes.len() < total {
        return Err(ParseError::LengthOutOfBounds {
            length,
            available: bytes.len() - HEADER_SIZE - CHECKSUM_SIZE,
        }
        .into());
    }
    if bytes.len() > total {
        return Err(ParseError::TrailingBytes {
            extra: bytes.len() - total,
        }
        .into());
    }

    let payload = &bytes[HEADER_SIZE..HEADER_SIZE + length];
    let recorded: [u8; CHECKSUM_SIZE] = bytes[HEADER_SIZE + length..total].try_into().unwrap();
    if checksum(&bytes[0..HEADER_SIZE], payload) != recorded {
        return Err(ParseError::ChecksumMismatch.into());
    }

    Ok(payload)
}
