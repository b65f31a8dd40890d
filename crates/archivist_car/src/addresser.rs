//! Streaming file importer: fixed-size chunks, raw leaves, balanced layout.
//!
//! The parameters match `ipfs add --cid-version=1 --chunker=size-1048576`, so
//! the root CID computed here is the one a pinning service derives from the
//! same container.

use crate::car;
use crate::cid::{Cid, Codec};
use crate::error::Result;
use crate::unixfs::{self, FileLink};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::debug;

/// Reference chunk size: 1 MiB.
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;
/// Maximum links per interior node.
pub const DEFAULT_MAX_LINKS: usize = 174;

/// Identity of a byte sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentAddress {
    /// Root CID of the UnixFS DAG.
    pub cid: Cid,
    /// Lowercase hex SHA-256 over the raw bytes.
    pub sha256: String,
    pub size: u64,
}

/// A CARv1 container holding every block of one file, spooled to disk.
///
/// The backing temp file is removed on drop.
#[derive(Debug)]
pub struct TransferContainer {
    root: Cid,
    file: NamedTempFile,
    len: u64,
}

impl TransferContainer {
    pub fn root(&self) -> &Cid {
        &self.root
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Open a fresh read handle positioned at the start.
    pub fn open(&self) -> io::Result<File> {
        self.file.reopen()
    }

    /// Read the whole container into memory.
    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.len as usize);
        self.open()?.read_to_end(&mut buf)?;
        Ok(buf)
    }

    /// Copy the container to `dest`.
    pub fn copy_to(&self, dest: &Path) -> io::Result<u64> {
        let mut src = self.open()?;
        let mut out = BufWriter::new(File::create(dest)?);
        let copied = io::copy(&mut src, &mut out)?;
        out.flush()?;
        Ok(copied)
    }
}

/// Derives content identifiers and builds transfer containers.
#[derive(Debug, Clone, Copy)]
pub struct ContentAddresser {
    chunk_size: usize,
    max_links: usize,
}

impl Default for ContentAddresser {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_links: DEFAULT_MAX_LINKS,
        }
    }
}

impl ContentAddresser {
    /// Custom layout parameters. Only useful for tests: any deviation from
    /// the defaults produces CIDs a backend will not reproduce.
    pub fn with_layout(chunk_size: usize, max_links: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            max_links: max_links.max(2),
        }
    }

    /// Stream `source`, returning its identity and a container of its blocks.
    ///
    /// Fails with an IO error if the source cannot be read to the end.
    pub fn derive<R: Read>(&self, mut source: R) -> Result<(ContentAddress, TransferContainer)> {
        // Blocks are spooled first because the header needs the root CID.
        let mut spool = BufWriter::new(tempfile::tempfile()?);
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; self.chunk_size];
        let mut level: Vec<FileLink> = Vec::new();
        let mut size: u64 = 0;

        loop {
            let n = read_full(&mut source, &mut buf)?;
            if n == 0 && !level.is_empty() {
                break;
            }
            let chunk = &buf[..n];
            hasher.update(chunk);
            size += n as u64;

            let cid = Cid::sha256(Codec::Raw, chunk);
            car::write_section(&mut spool, &cid, chunk)?;
            level.push(FileLink {
                cid,
                tsize: n as u64,
                filesize: n as u64,
            });

            if n < self.chunk_size {
                break;
            }
        }

        while level.len() > 1 {
            let mut parents = Vec::with_capacity(level.len().div_ceil(self.max_links));
            for group in level.chunks(self.max_links) {
                let node = unixfs::encode_file_node(group);
                let cid = Cid::sha256(Codec::DagPb, &node);
                car::write_section(&mut spool, &cid, &node)?;
                parents.push(FileLink {
                    cid,
                    tsize: node.len() as u64 + group.iter().map(|c| c.tsize).sum::<u64>(),
                    filesize: group.iter().map(|c| c.filesize).sum(),
                });
            }
            level = parents;
        }
        let root = level[0].cid;

        let mut spool = spool.into_inner().map_err(|e| e.into_error())?;
        spool.seek(SeekFrom::Start(0))?;

        let mut container = tempfile::Builder::new().prefix("archivist-").tempfile()?;
        let len = {
            let mut out = BufWriter::new(container.as_file_mut());
            let header_len = car::write_header(&mut out, &root)?;
            let body_len = io::copy(&mut spool, &mut out)?;
            out.flush()?;
            header_len + body_len
        };

        let address = ContentAddress {
            cid: root,
            sha256: hex::encode(hasher.finalize()),
            size,
        };
        debug!(cid = %address.cid, size, container_len = len, "Content addressed");

        Ok((address, TransferContainer { root, file: container, len }))
    }

    /// [`derive`](Self::derive) over a file on disk.
    pub fn derive_path(&self, path: &Path) -> Result<(ContentAddress, TransferContainer)> {
        let file = File::open(path)?;
        self.derive(io::BufReader::new(file))
    }
}

/// Fill `buf` unless EOF comes first; returns bytes read.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
