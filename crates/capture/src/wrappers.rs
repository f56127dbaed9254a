use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use common::{Category, EntryFamily, HandleId, StateTable};

/// Capture-side record of one live API object of category `C`.
#[derive(Debug)]
pub struct HandleWrapper<C: Category> {
    handle_id: HandleId,
    handle: u64,
    _category: PhantomData<C>,
}

impl<C: Category> HandleWrapper<C> {
    pub fn new(handle_id: HandleId, handle: u64) -> Arc<Self> {
        Arc::new(Self {
            handle_id,
            handle,
            _category: PhantomData,
        })
    }

    /// Id written to the trace in place of the driver handle.
    pub fn handle_id(&self) -> HandleId {
        self.handle_id
    }

    /// Driver handle the application sees.
    pub fn handle(&self) -> u64 {
        self.handle
    }
}

/// Entry family storing shared wrappers.
pub struct CaptureWrappers;

impl EntryFamily for CaptureWrappers {
    type Entry<C: Category> = Arc<HandleWrapper<C>>;
}

pub type CaptureStateTable = StateTable<CaptureWrappers>;

/// Issues capture ids. Never hands out [`HandleId::NULL`].
#[derive(Debug)]
pub struct HandleIdAllocator {
    next: AtomicU64,
}

impl Default for HandleIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleIdAllocator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn next_id(&self) -> HandleId {
        HandleId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}
