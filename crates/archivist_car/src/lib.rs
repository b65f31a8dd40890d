//! Content addressing for Archivist.
//!
//! Files are chunked into 1 MiB raw leaves, linked by balanced UnixFS dag-pb
//! nodes, and identified by the CIDv1 of the root block. The blocks are
//! packaged as a single-root CARv1 container, which pins the backend to the
//! same DAG (and therefore the same CID) that was computed locally.

pub mod car;
pub mod cid;
pub mod unixfs;
pub mod varint;

mod addresser;
mod error;

pub use addresser::{
    ContentAddress, ContentAddresser, TransferContainer, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_LINKS,
};
pub use car::{read_car_roots, CarReader};
pub use cid::{Cid, Codec};
pub use error::{CarError, Result};
