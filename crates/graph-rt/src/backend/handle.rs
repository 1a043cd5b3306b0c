//! Opaque compiled-function handles and the generation-checked table that issues them.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{Error, Result};

/// Process-unique identity of one backend instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BackendId(u64);

impl BackendId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        BackendId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Token for one compiled function on the backend instance that issued it.
///
/// Handles cannot be dereferenced; a backend resolves them through its [`HandleTable`], which
/// rejects handles minted by another instance or whose slot has since been released.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    backend: BackendId,
    slot: u32,
    generation: u32,
}

impl Handle {
    pub fn backend(&self) -> BackendId {
        self.backend
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Handle({}:{}v{})",
            self.backend.0, self.slot, self.generation
        )
    }
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Slot map from [`Handle`] to backend-private compiled state.
pub struct HandleTable<T> {
    backend: BackendId,
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    live: usize,
}

impl<T> HandleTable<T> {
    pub fn new(backend: BackendId) -> Self {
        Self {
            backend,
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
        }
    }

    pub fn insert(&mut self, value: T) -> Handle {
        let slot = match self.free.pop() {
            Some(slot) => {
                let entry = &mut self.slots[slot as usize];
                entry.value = Some(value);
                slot
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    value: Some(value),
                });
                (self.slots.len() - 1) as u32
            }
        };
        self.live += 1;
        Handle {
            backend: self.backend,
            slot,
            generation: self.slots[slot as usize].generation,
        }
    }

    pub fn get(&self, handle: Handle) -> Result<&T> {
        if handle.backend != self.backend {
            return Err(Error::InvalidHandle);
        }
        self.slots
            .get(handle.slot as usize)
            .filter(|entry| entry.generation == handle.generation)
            .and_then(|entry| entry.value.as_ref())
            .ok_or(Error::InvalidHandle)
    }

    pub fn get_mut(&mut self, handle: Handle) -> Result<&mut T> {
        if handle.backend != self.backend {
            return Err(Error::InvalidHandle);
        }
        self.slots
            .get_mut(handle.slot as usize)
            .filter(|entry| entry.generation == handle.generation)
            .and_then(|entry| entry.value.as_mut())
            .ok_or(Error::InvalidHandle)
    }

    /// Releases the slot; the handle and every copy of it become invalid.
    pub fn remove(&mut self, handle: Handle) -> Result<T> {
        if handle.backend != self.backend {
            return Err(Error::InvalidHandle);
        }
        let entry = self
            .slots
            .get_mut(handle.slot as usize)
            .filter(|entry| entry.generation == handle.generation)
            .ok_or(Error::InvalidHandle)?;
        let value = entry.value.take().ok_or(Error::InvalidHandle)?;
        // A slot whose generation is exhausted is retired rather than reissued.
        if let Some(next) = entry.generation.checked_add(1) {
            entry.generation = next;
            self.free.push(handle.slot);
        }
        self.live -= 1;
        Ok(value)
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.slots.iter().filter_map(|entry| entry.value.as_ref())
    }
}
