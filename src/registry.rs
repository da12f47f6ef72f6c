//! Handle registry.
//!
//! Runtimes refer to code objects through opaque 64-bit handles. The
//! registry owns the objects behind those handles and serializes access
//! with a mutex, so handles may be shared freely between threads.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

use crate::code::CodeObject;

/// Opaque reference to a registered code object. Zero is never issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(pub u64);

#[derive(Debug)]
struct Entries {
    next: u64,
    objects: HashMap<u64, CodeObject<'static, 'static>>,
}

#[derive(Debug)]
pub struct Registry {
    entries: Mutex<Entries>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Entries {
                next: 1,
                objects: HashMap::new(),
            }),
        }
    }

    /// The process-wide registry.
    pub fn global() -> &'static Registry {
        static GLOBAL: OnceLock<Registry> = OnceLock::new();
        GLOBAL.get_or_init(Registry::new)
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        // A panic inside a visitor does not leave the map inconsistent.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Takes ownership of `code` and returns its handle.
    pub fn register(&self, code: CodeObject<'static, 'static>) -> Handle {
        let mut entries = self.lock();
        let id = entries.next;
        entries.next += 1;
        entries.objects.insert(id, code);
        tracing::debug!("registered code object {id}");
        Handle(id)
    }

    /// Runs `f` on the object behind `handle`, or returns `None` if the
    /// handle is not registered.
    pub fn with<R>(&self, handle: Handle, f: impl FnOnce(&CodeObject<'static, 'static>) -> R) -> Option<R> {
        self.lock().objects.get(&handle.0).map(f)
    }

    pub fn with_mut<R>(&self, handle: Handle, f: impl FnOnce(&mut CodeObject<'static, 'static>) -> R) -> Option<R> {
        self.lock().objects.get_mut(&handle.0).map(f)
    }

    /// Drops the object behind `handle`. Unknown handles are ignored, so
    /// destroying twice is harmless. Returns whether an object was removed.
    pub fn destroy(&self, handle: Handle) -> bool {
        let removed = self.lock().objects.remove(&handle.0);
        match removed {
            Some(_) => {
                tracing::debug!("destroyed code object {}", handle.0);
                true
            }
            None => {
                tracing::trace!("destroy of unknown handle {}", handle.0);
                false
            }
        }
    }

    pub fn len(&self) -> usize {
        self.lock().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
