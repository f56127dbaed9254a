//! On-disk layout of capture traces and a sequential reader for them.
//!
//! Everything is little-endian with fixed-width fields. A trace is a file
//! header followed by self-describing blocks; each block header records the
//! byte count of everything after it, so a reader can skip blocks it does not
//! understand.

pub mod command;
pub mod error;
pub mod format;
pub mod reader;

pub use command::{MetaCommand, MetaCommandKind};
pub use error::TraceReadError;
pub use format::*;
pub use reader::{
    decode_call_block, decode_meta_command, meta_data_type, BlockReader, CallBlock,
    DecodedCommand, RawBlock,
};
