//! CIDv1 with sha2-256 multihashes, rendered in base32-lower multibase.

use crate::error::{CarError, Result};
use crate::varint;
use data_encoding::BASE32_NOPAD;
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

const CID_VERSION_1: u64 = 0x01;
const MULTIHASH_SHA2_256: u64 = 0x12;
const SHA2_256_LEN: usize = 32;
const MULTIBASE_BASE32_LOWER: char = 'b';

/// Multicodec of the block a CID points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Codec {
    /// Raw bytes, used for file leaves.
    Raw,
    /// dag-pb, used for UnixFS interior nodes.
    DagPb,
}

impl Codec {
    pub fn code(&self) -> u64 {
        match self {
            Codec::Raw => 0x55,
            Codec::DagPb => 0x70,
        }
    }

    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            0x55 => Some(Codec::Raw),
            0x70 => Some(Codec::DagPb),
            _ => None,
        }
    }
}

/// Content identifier of a single block.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cid {
    codec: Codec,
    digest: [u8; SHA2_256_LEN],
}

impl Cid {
    /// Hash `block` and wrap the digest with `codec`.
    pub fn sha256(codec: Codec, block: &[u8]) -> Self {
        let digest: [u8; SHA2_256_LEN] = Sha256::digest(block).into();
        Self { codec, digest }
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    pub fn digest(&self) -> &[u8; SHA2_256_LEN] {
        &self.digest
    }

    /// Binary form: `version ‖ codec ‖ multihash-code ‖ digest-len ‖ digest`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + SHA2_256_LEN);
        varint::encode(CID_VERSION_1, &mut out);
        varint::encode(self.codec.code(), &mut out);
        varint::encode(MULTIHASH_SHA2_256, &mut out);
        varint::encode(SHA2_256_LEN as u64, &mut out);
        out.extend_from_slice(&self.digest);
        out
    }

    /// Parse a binary CID from the front of `bytes`, returning it and the
    /// number of bytes consumed.
    pub fn read_bytes(bytes: &[u8]) -> Result<(Self, usize)> {
        let mut offset = 0;
        let mut next = |what: &str| -> Result<u64> {
            let (value, used) = varint::decode(&bytes[offset..])
                .ok_or_else(|| CarError::InvalidCid(format!("truncated {}", what)))?;
            offset += used;
            Ok(value)
        };

        let version = next("version")?;
        if version != CID_VERSION_1 {
            return Err(CarError::InvalidCid(format!("unsupported CID version {}", version)));
        }
        let codec_code = next("codec")?;
        let codec = Codec::from_code(codec_code)
            .ok_or_else(|| CarError::InvalidCid(format!("unsupported codec 0x{:x}", codec_code)))?;
        let hash_code = next("multihash code")?;
        if hash_code != MULTIHASH_SHA2_256 {
            return Err(CarError::InvalidCid(format!("unsupported multihash 0x{:x}", hash_code)));
        }
        let len = next("digest length")? as usize;
        if len != SHA2_256_LEN {
            return Err(CarError::InvalidCid(format!("bad sha2-256 digest length {}", len)));
        }

        let digest_bytes = bytes
            .get(offset..offset + SHA2_256_LEN)
            .ok_or_else(|| CarError::InvalidCid("truncated digest".to_string()))?;
        let mut digest = [0u8; SHA2_256_LEN];
        digest.copy_from_slice(digest_bytes);

        Ok((Self { codec, digest }, offset + SHA2_256_LEN))
    }
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let encoded = BASE32_NOPAD.encode(&self.to_bytes()).to_ascii_lowercase();
        write!(f, "{}{}", MULTIBASE_BASE32_LOWER, encoded)
    }
}

impl fmt::Debug for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cid({})", self)
    }
}

impl FromStr for Cid {
    type Err = CarError;

    fn from_str(s: &str) -> Result<Self> {
        let body = s
            .strip_prefix(MULTIBASE_BASE32_LOWER)
            .ok_or_else(|| CarError::InvalidCid(format!("expected base32 CIDv1, got '{}'", s)))?;
        let bytes = BASE32_NOPAD
            .decode(body.to_ascii_uppercase().as_bytes())
            .map_err(|e| CarError::InvalidCid(format!("{}: {}", s, e)))?;

        let (cid, used) = Cid::read_bytes(&bytes)?;
        if used != bytes.len() {
            return Err(CarError::InvalidCid(format!("trailing bytes in '{}'", s)));
        }
        Ok(cid)
    }
}

impl serde::Serialize for Cid {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for Cid {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = <String as serde::Deserialize>::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_cid_known_vectors() {
        assert_eq!(
            Cid::sha256(Codec::Raw, b"").to_string(),
            "bafkreihdwdcefgh4dqkjv67uzcmw7ojee6xedzdetojuzjevtenxquvyku"
        );
        assert_eq!(
            Cid::sha256(Codec::Raw, b"hello world").to_string(),
            "bafkreifzjut3te2nhyekklss27nh3k72ysco7y32koao5eei66wof36n5e"
        );
    }

    #[test]
    fn test_dag_pb_prefix() {
        let cid = Cid::sha256(Codec::DagPb, b"node");
        assert!(cid.to_string().starts_with("bafybei"));
        assert_eq!(&cid.to_bytes()[..4], &[0x01, 0x70, 0x12, 0x20]);
    }

    #[test]
    fn test_parse_roundtrip() {
        let cid = Cid::sha256(Codec::DagPb, b"abc");
        let parsed: Cid = cid.to_string().parse().unwrap();
        assert_eq!(parsed, cid);
        assert_eq!(parsed.codec(), Codec::DagPb);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("Qmfoo".parse::<Cid>().is_err());
        assert!("b!!!".parse::<Cid>().is_err());
        assert!("bafkrei".parse::<Cid>().is_err());
    }
}
