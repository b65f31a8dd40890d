//! Unsigned LEB128 varints, as used by multiformats, protobuf and CAR framing.

use std::io::{self, Read};

/// Longest encoding of a u64.
const MAX_VARINT_LEN: usize = 10;

pub fn encode(mut value: u64, out: &mut Vec<u8>) {
    while value >= 0x80 {
        out.push((value as u8) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

pub fn encoded_len(value: u64) -> usize {
    let mut buf = Vec::with_capacity(MAX_VARINT_LEN);
    encode(value, &mut buf);
    buf.len()
}

/// Decode from the front of `bytes`, returning the value and bytes consumed.
pub fn decode(bytes: &[u8]) -> Option<(u64, usize)> {
    let mut value: u64 = 0;
    for (i, byte) in bytes.iter().take(MAX_VARINT_LEN).enumerate() {
        value |= u64::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            return Some((value, i + 1));
        }
    }
    None
}

/// Read one varint from a stream.
///
/// Returns `Ok(None)` on a clean EOF before the first byte.
pub fn read<R: Read>(reader: &mut R) -> io::Result<Option<u64>> {
    let mut value: u64 = 0;
    let mut byte = [0u8; 1];
    for i in 0..MAX_VARINT_LEN {
        if reader.read(&mut byte)? == 0 {
            if i == 0 {
                return Ok(None);
            }
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "truncated varint"));
        }
        value |= u64::from(byte[0] & 0x7f) << (7 * i);
        if byte[0] & 0x80 == 0 {
            return Ok(Some(value));
        }
    }
    Err(io::Error::new(io::ErrorKind::InvalidData, "varint too long"))
}
