//! UnixFS `File` nodes in canonical dag-pb form.
//!
//! Canonical dag-pb field order: every `Links` entry precedes `Data`,
//! and inside a link `Hash`, `Name`, `Tsize` appear in that order. Links carry
//! an empty name, as produced by the standard importers.

use crate::cid::Cid;
use crate::varint;

const UNIXFS_TYPE_FILE: u64 = 2;

// Protobuf keys: (field << 3) | wire_type
const PB_LINK_HASH: u8 = 0x0a; // PBLink.Hash, bytes
const PB_LINK_NAME: u8 = 0x12; // PBLink.Name, string
const PB_LINK_TSIZE: u8 = 0x18; // PBLink.Tsize, varint
const PB_NODE_DATA: u8 = 0x0a; // PBNode.Data, bytes
const PB_NODE_LINKS: u8 = 0x12; // PBNode.Links, message
const UNIXFS_TYPE: u8 = 0x08; // Data.Type, varint
const UNIXFS_FILESIZE: u8 = 0x18; // Data.filesize, varint
const UNIXFS_BLOCKSIZES: u8 = 0x20; // Data.blocksizes, repeated varint (unpacked)

/// A child reference inside a file node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileLink {
    pub cid: Cid,
    /// Serialized size of the child block plus everything beneath it.
    pub tsize: u64,
    /// File bytes covered by the child.
    pub filesize: u64,
}

/// Encode an interior file node over `children`.
pub fn encode_file_node(children: &[FileLink]) -> Vec<u8> {
    let mut out = Vec::new();

    for child in children {
        let mut link = Vec::new();
        put_bytes(&mut link, PB_LINK_HASH, &child.cid.to_bytes());
        put_bytes(&mut link, PB_LINK_NAME, b"");
        link.push(PB_LINK_TSIZE);
        varint::encode(child.tsize, &mut link);

        put_bytes(&mut out, PB_NODE_LINKS, &link);
    }

    let mut data = Vec::new();
    data.push(UNIXFS_TYPE);
    varint::encode(UNIXFS_TYPE_FILE, &mut data);
    data.push(UNIXFS_FILESIZE);
    varint::encode(children.iter().map(|c| c.filesize).sum(), &mut data);
    for child in children {
        data.push(UNIXFS_BLOCKSIZES);
        varint::encode(child.filesize, &mut data);
    }

    put_bytes(&mut out, PB_NODE_DATA, &data);
    out
}

fn put_bytes(out: &mut Vec<u8>, key: u8, bytes: &[u8]) {
    out.push(key);
    varint::encode(bytes.len() as u64, out);
    out.extend_from_slice(bytes);
}

/// Decoded view of a file node, enough to walk a DAG.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFileNode {
    pub links: Vec<(Cid, u64)>,
    pub filesize: u64,
    pub blocksizes: Vec<u64>,
}

/// Decode a node produced by [`encode_file_node`].
///
/// This is a strict reader for the subset written here, not a general
/// protobuf decoder.
pub fn decode_file_node(bytes: &[u8]) -> Option<DecodedFileNode> {
    let mut node = DecodedFileNode {
        links: Vec::new(),
        filesize: 0,
        blocksizes: Vec::new(),
    };
    let mut pos = 0;

    while pos < bytes.len() {
        let key = bytes[pos];
        pos += 1;
        let (len, used) = varint::decode(&bytes[pos..])?;
        pos += used;
        let field = bytes.get(pos..pos + len as usize)?;
        pos += len as usize;

        match key {
            PB_NODE_LINKS => node.links.push(decode_link(field)?),
            PB_NODE_DATA => decode_unixfs(field, &mut node)?,
            _ => return None,
        }
    }
    Some(node)
}

fn decode_link(bytes: &[u8]) -> Option<(Cid, u64)> {
    let mut pos = 0;
    let mut cid = None;
    let mut tsize = 0;

    while pos < bytes.len() {
        let key = bytes[pos];
        pos += 1;
        match key {
            PB_LINK_HASH | PB_LINK_NAME => {
                let (len, used) = varint::decode(&bytes[pos..])?;
                pos += used;
                let field = bytes.get(pos..pos + len as usize)?;
                pos += len as usize;
                if key == PB_LINK_HASH {
                    cid = Some(Cid::read_bytes(field).ok()?.0);
                }
            }
            PB_LINK_TSIZE => {
                let (value, used) = varint::decode(&bytes[pos..])?;
                pos += used;
                tsize = value;
            }
            _ => return None,
        }
    }
    Some((cid?, tsize))
}

fn decode_unixfs(bytes: &[u8], node: &mut DecodedFileNode) -> Option<()> {
    let mut pos = 0;
    while pos < bytes.len() {
        let key = bytes[pos];
        pos += 1;
        let (value, used) = varint::decode(&bytes[pos..])?;
        pos += used;
        match key {
            UNIXFS_TYPE if value == UNIXFS_TYPE_FILE => {}
            UNIXFS_FILESIZE => node.filesize = value,
            UNIXFS_BLOCKSIZES => node.blocksizes.push(value),
            _ => return None,
        }
    }
    Some(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cid::Codec;

    fn leaf(data: &[u8]) -> FileLink {
        FileLink {
            cid: Cid::sha256(Codec::Raw, data),
            tsize: data.len() as u64,
            filesize: data.len() as u64,
        }
    }

    #[test]
    fn test_links_precede_data() {
        let node = encode_file_node(&[leaf(b"a"), leaf(b"bc")]);
        assert_eq!(node[0], PB_NODE_LINKS);

        // Link 1: Hash(36 bytes) + empty Name + Tsize(1) = 2+36 + 2 + 2 = 42 bytes
        assert_eq!(node[1], 42);
        let data_key_pos = 2 * (2 + 42);
        assert_eq!(node[data_key_pos], PB_NODE_DATA);
        assert_eq!(
            &node[data_key_pos + 1..],
            &[0x08, 0x08, 0x02, 0x18, 0x03, 0x20, 0x01, 0x20, 0x02]
        );
    }

    #[test]
    fn test_decode_roundtrip() {
        let children = [leaf(b"hello"), leaf(b"world!")];
        let node = encode_file_node(&children);
        let decoded = decode_file_node(&node).unwrap();

        assert_eq!(decoded.filesize, 11);
        assert_eq!(decoded.blocksizes, vec![5, 6]);
        assert_eq!(
            decoded.links,
            vec![(children[0].cid, 5), (children[1].cid, 6)]
        );
    }

    #[test]
    fn test_decode_rejects_unknown_fields() {
        assert!(decode_file_node(&[0x1a, 0x00]).is_none());
        assert!(decode_file_node(&[0x12, 0x05, 0x00]).is_none());
    }
}
