//! CARv1 framing.
//!
//! ```text
//! varint(len) ‖ dag-cbor { "roots": [cid], "version": 1 }
//! ( varint(len) ‖ cid-bytes ‖ block-bytes )*
//! ```

use crate::cid::Cid;
use crate::error::{CarError, Result};
use crate::varint;
use std::io::{self, Read, Write};

const CAR_VERSION: u64 = 1;
const CBOR_TAG_CID: u64 = 42;
/// Headers above this size are rejected rather than allocated.
const MAX_HEADER_LEN: u64 = 64 * 1024;
/// Sections above this size are rejected rather than allocated.
const MAX_SECTION_LEN: u64 = 8 * 1024 * 1024;

/// Encode the dag-cbor header for a single-root CAR.
///
/// Map keys are in dag-cbor canonical order (shorter key first).
pub fn encode_header(root: &Cid) -> Vec<u8> {
    let mut cid_field = vec![0x00]; // multibase identity prefix required by tag 42
    cid_field.extend_from_slice(&root.to_bytes());

    let mut out = Vec::new();
    cbor_head(&mut out, 5, 2);
    cbor_text(&mut out, "roots");
    cbor_head(&mut out, 4, 1);
    cbor_head(&mut out, 6, CBOR_TAG_CID);
    cbor_head(&mut out, 2, cid_field.len() as u64);
    out.extend_from_slice(&cid_field);
    cbor_text(&mut out, "version");
    cbor_head(&mut out, 0, CAR_VERSION);
    out
}

fn cbor_head(out: &mut Vec<u8>, major: u8, value: u64) {
    let major = major << 5;
    match value {
        0..=23 => out.push(major | value as u8),
        24..=0xff => out.extend_from_slice(&[major | 24, value as u8]),
        0x100..=0xffff => {
            out.push(major | 25);
            out.extend_from_slice(&(value as u16).to_be_bytes());
        }
        0x1_0000..=0xffff_ffff => {
            out.push(major | 26);
            out.extend_from_slice(&(value as u32).to_be_bytes());
        }
        _ => {
            out.push(major | 27);
            out.extend_from_slice(&value.to_be_bytes());
        }
    }
}

fn cbor_text(out: &mut Vec<u8>, text: &str) {
    cbor_head(out, 3, text.len() as u64);
    out.extend_from_slice(text.as_bytes());
}

/// Write one `cid ‖ block` section.
pub fn write_section<W: Write>(writer: &mut W, cid: &Cid, block: &[u8]) -> io::Result<u64> {
    let cid_bytes = cid.to_bytes();
    let section_len = (cid_bytes.len() + block.len()) as u64;

    let mut prefix = Vec::with_capacity(10 + cid_bytes.len());
    varint::encode(section_len, &mut prefix);
    prefix.extend_from_slice(&cid_bytes);

    writer.write_all(&prefix)?;
    writer.write_all(block)?;
    Ok(prefix.len() as u64 + block.len() as u64)
}

/// Write the length-prefixed header.
pub fn write_header<W: Write>(writer: &mut W, root: &Cid) -> io::Result<u64> {
    let header = encode_header(root);
    let mut prefix = Vec::new();
    varint::encode(header.len() as u64, &mut prefix);
    writer.write_all(&prefix)?;
    writer.write_all(&header)?;
    Ok((prefix.len() + header.len()) as u64)
}

/// Sequential CARv1 reader.
pub struct CarReader<R> {
    reader: R,
    roots: Vec<Cid>,
}

impl<R: Read> CarReader<R> {
    /// Read and validate the header.
    pub fn new(mut reader: R) -> Result<Self> {
        let len = varint::read(&mut reader)?
            .ok_or_else(|| CarError::InvalidCar("empty container".to_string()))?;
        if len == 0 || len > MAX_HEADER_LEN {
            return Err(CarError::InvalidCar(format!("bad header length {}", len)));
        }
        let mut header = vec![0u8; len as usize];
        reader.read_exact(&mut header)?;

        let roots = decode_header(&header)?;
        Ok(Self { reader, roots })
    }

    pub fn roots(&self) -> &[Cid] {
        &self.roots
    }

    /// Next `(cid, block)` section, verifying the block hashes to its CID.
    pub fn next_block(&mut self) -> Result<Option<(Cid, Vec<u8>)>> {
        let len = match varint::read(&mut self.reader)? {
            Some(len) => len,
            None => return Ok(None),
        };
        if len > MAX_SECTION_LEN {
            return Err(CarError::InvalidCar(format!("section of {} bytes", len)));
        }

        let mut section = vec![0u8; len as usize];
        self.reader.read_exact(&mut section)?;

        let (cid, used) = Cid::read_bytes(&section)?;
        let block = section.split_off(used);
        if Cid::sha256(cid.codec(), &block) != cid {
            return Err(CarError::InvalidCar(format!("block does not hash to {}", cid)));
        }
        Ok(Some((cid, block)))
    }
}

/// Minimal dag-cbor reader for the header map.
struct Cbor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cbor<'a> {
    fn head(&mut self) -> Result<(u8, u64)> {
        let initial = *self.bytes.get(self.pos).ok_or_else(truncated)?;
        self.pos += 1;
        let major = initial >> 5;
        let info = initial & 0x1f;
        let value = match info {
            0..=23 => u64::from(info),
            24 => u64::from(self.take(1)?[0]),
            25 => u64::from(u16::from_be_bytes([self.take(1)?[0], self.take(1)?[0]])),
            26 => {
                let b = self.take(4)?;
                u64::from(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
            }
            27 => {
                let b = self.take(8)?;
                let mut arr = [0u8; 8];
                arr.copy_from_slice(b);
                u64::from_be_bytes(arr)
            }
            _ => return Err(CarError::InvalidCar("indefinite-length CBOR".to_string())),
        };
        Ok((major, value))
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let slice = self
            .bytes
            .get(self.pos..self.pos + n)
            .ok_or_else(truncated)?;
        self.pos += n;
        Ok(slice)
    }

    fn expect(&mut self, major: u8) -> Result<u64> {
        let (got, value) = self.head()?;
        if got != major {
            return Err(CarError::InvalidCar(format!(
                "expected CBOR major type {}, got {}",
                major, got
            )));
        }
        Ok(value)
    }
}

fn truncated() -> CarError {
    CarError::InvalidCar("truncated header".to_string())
}

fn decode_header(bytes: &[u8]) -> Result<Vec<Cid>> {
    let mut cbor = Cbor { bytes, pos: 0 };
    let entries = cbor.expect(5)?;

    let mut roots = None;
    let mut version = None;
    for _ in 0..entries {
        let key_len = cbor.expect(3)? as usize;
        let key = cbor.take(key_len)?;
        match key {
            b"roots" => {
                let count = cbor.expect(4)?;
                let mut cids = Vec::new();
                for _ in 0..count {
                    if cbor.expect(6)? != CBOR_TAG_CID {
                        return Err(CarError::InvalidCar("root is not a CID".to_string()));
                    }
                    let len = cbor.expect(2)? as usize;
                    let field = cbor.take(len)?;
                    let (&prefix, cid_bytes) = field.split_first().ok_or_else(truncated)?;
                    if prefix != 0x00 {
                        return Err(CarError::InvalidCar("bad CID multibase prefix".to_string()));
                    }
                    cids.push(Cid::read_bytes(cid_bytes)?.0);
                }
                roots = Some(cids);
            }
            b"version" => version = Some(cbor.expect(0)?),
            other => {
                return Err(CarError::InvalidCar(format!(
                    "unexpected header key '{}'",
                    String::from_utf8_lossy(other)
                )))
            }
        }
    }

    if version != Some(CAR_VERSION) {
        return Err(CarError::InvalidCar(format!("unsupported version {:?}", version)));
    }
    roots.ok_or_else(|| CarError::InvalidCar("missing roots".to_string()))
}

/// Read only the root CIDs from a container.
pub fn read_car_roots<R: Read>(reader: R) -> Result<Vec<Cid>> {
    Ok(CarReader::new(reader)?.roots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cid::Codec;

    #[test]
    fn test_header_layout() {
        let root = Cid::sha256(Codec::Raw, b"hello world");
        let header = encode_header(&root);

        assert_eq!(&header[..7], &[0xa2, 0x65, b'r', b'o', b'o', b't', b's']);
        assert_eq!(&header[7..12], &[0x81, 0xd8, 0x2a, 0x58, 0x25]);
        assert_eq!(header[12], 0x00);
        assert_eq!(&header[13..49], root.to_bytes().as_slice());
        assert_eq!(&header[49..57], b"\x67version");
        assert_eq!(header[57], 0x01);
        assert_eq!(header.len(), 58);
    }

    #[test]
    fn test_reader_verifies_blocks() {
        let block = b"some block".to_vec();
        let cid = Cid::sha256(Codec::Raw, &block);

        let mut car = Vec::new();
        write_header(&mut car, &cid).unwrap();
        write_section(&mut car, &cid, &block).unwrap();

        let mut reader = CarReader::new(car.as_slice()).unwrap();
        assert_eq!(reader.roots(), &[cid]);
        assert_eq!(reader.next_block().unwrap(), Some((cid, block)));
        assert!(reader.next_block().unwrap().is_none());

        // Flip the last byte of the block.
        let last = car.len() - 1;
        car[last] ^= 0xff;
        let mut reader = CarReader::new(car.as_slice()).unwrap();
        assert!(reader.next_block().is_err());
    }

    #[test]
    fn test_rejects_non_car_input() {
        assert!(read_car_roots(&b""[..]).is_err());
        assert!(read_car_roots(&b"\x05hello"[..]).is_err());
    }
}
