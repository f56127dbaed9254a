//! Capture-side encoding: bulk resource initialization commands and the
//! wrapper objects tracked for every live API handle.

pub mod command_writer;
pub mod error;
pub mod wrappers;

pub use command_writer::CommandWriter;
pub use error::CommandWriteError;
pub use wrappers::{CaptureStateTable, CaptureWrappers, HandleIdAllocator, HandleWrapper};
