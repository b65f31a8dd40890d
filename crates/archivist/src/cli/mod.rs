//! Operator commands that act on the status store or a single file.

pub mod cid;
pub mod output;
pub mod reset;
pub mod status;
