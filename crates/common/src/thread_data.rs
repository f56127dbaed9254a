use std::sync::atomic::{AtomicU32, Ordering};

use crate::ThreadId;

/// Staging state owned by one capturing worker.
///
/// Blocks are assembled here before the single sink write. Never shared
/// between workers.
#[derive(Debug)]
pub struct ThreadData {
    thread_id: ThreadId,
    scratch_buffer: Vec<u8>,
    compressed_buffer: Vec<u8>,
}

impl ThreadData {
    pub fn new(thread_id: ThreadId) -> Self {
        Self {
            thread_id,
            scratch_buffer: Vec::new(),
            compressed_buffer: Vec::new(),
        }
    }

    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    /// Buffer used to combine several slices into one write.
    pub fn scratch_buffer(&mut self) -> &mut Vec<u8> {
        &mut self.scratch_buffer
    }

    /// Buffer the compressor writes into.
    pub fn compressed_buffer(&mut self) -> &mut Vec<u8> {
        &mut self.compressed_buffer
    }

    /// Both buffers at once, for code that compresses and then stages.
    pub fn buffers(&mut self) -> (&mut Vec<u8>, &mut Vec<u8>) {
        (&mut self.scratch_buffer, &mut self.compressed_buffer)
    }
}

/// Hands out unique thread ids to capturing workers.
#[derive(Debug)]
pub struct ThreadIdAllocator {
    next: AtomicU32,
}

impl Default for ThreadIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadIdAllocator {
    pub fn new() -> Self {
        // 0 is reserved
        Self {
            next: AtomicU32::new(1),
        }
    }

    /// Creates the context for a new worker.
    pub fn register(&self) -> ThreadData {
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        ThreadData::new(ThreadId(id))
    }
}
