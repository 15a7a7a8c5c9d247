//! Base-128 varint length prefixes.
//!
//! Each byte carries 7 bits of the value, least significant group first, with
//! the high bit set on every byte except the last. A 32-bit length never needs
//! more than 5 bytes; a longer prefix means the stream is corrupted.

use bytes::{BufMut, BytesMut};
use integer_encoding::VarInt;

use crate::error::{constants, ProtocolError, Result};

/// Longest valid prefix for a 32-bit length
pub const MAX_VARINT_LEN: usize = 5;

/// Number of bytes needed to encode `len`
#[inline]
pub fn length_size(len: usize) -> usize {
    (len as u64).required_space()
}

/// Append the varint encoding of `len` to `dst`
pub fn encode_length(len: usize, dst: &mut BytesMut) {
    let mut buf = [0u8; 10];
    let written = (len as u64).encode_var(&mut buf);
    dst.put_slice(&buf[..written]);
}

/// Decode a length prefix from the start of `src`.
///
/// Returns `Ok(None)` while the prefix is incomplete, otherwise the decoded
/// value and the number of prefix bytes consumed.
pub fn decode_length(src: &[u8]) -> Result<Option<(usize, usize)>> {
    let window = &src[..src.len().min(MAX_VARINT_LEN)];

    let Some(end) = window.iter().position(|b| b & 0x80 == 0) else {
        if src.len() >= MAX_VARINT_LEN {
            return Err(ProtocolError::InvalidFrame(
                constants::ERR_VARINT_TOO_LONG.into(),
            ));
        }
        return Ok(None);
    };

    let (value, read) = u64::decode_var(&window[..=end])
        .ok_or_else(|| ProtocolError::InvalidFrame(constants::ERR_VARINT_TOO_LONG.into()))?;

    if value > u64::from(u32::MAX) {
        return Err(ProtocolError::InvalidFrame(
            constants::ERR_VARINT_TOO_LONG.into(),
        ));
    }

    Ok(Some((value as usize, read)))
}
