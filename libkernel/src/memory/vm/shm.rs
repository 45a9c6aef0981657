//! Kernel-wide shared-memory identity.
//!
//! The registry maps opaque ids to weak references to anonymous objects. An
//! id is handed out the first time an object is shared and stays valid while
//! any strong reference to the object survives; dead entries are pruned
//! lazily when a lookup trips over them.
//!
//! The registry lock is independent of every [`VMSpace`] lock: lookups copy
//! the strong reference out before the caller goes on to map the object.
//!
//! [`VMSpace`]: super::VMSpace

use alloc::{
    collections::BTreeMap,
    sync::{Arc, Weak},
};

use crate::error::{KernelError, Result};
use crate::sync::SpinLock;

use super::object::VMObject;

/// Opaque handle to a shared anonymous object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ShmId(u32);

impl ShmId {
    pub fn from_raw(id: u32) -> Self {
        Self(id)
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

struct Registry {
    next_id: u32,
    objects: BTreeMap<u32, Weak<VMObject>>,
}

static REGISTRY: SpinLock<Registry> = SpinLock::new(Registry {
    next_id: 1,
    objects: BTreeMap::new(),
});

/// Assigns the next id and records a weak reference to `object`.
pub(super) fn register(object: &Arc<VMObject>) -> ShmId {
    let mut registry = REGISTRY.lock();
    let id = registry.next_id;
    registry.next_id = registry.next_id.wrapping_add(1);
    registry.objects.insert(id, Arc::downgrade(object));
    ShmId(id)
}

/// Looks up `id`, promoting the weak reference. A stale entry whose object
/// has died is removed on the way out.
pub(super) fn get(id: ShmId) -> Result<Arc<VMObject>> {
    let mut registry = REGISTRY.lock();
    match registry.objects.get(&id.0).and_then(Weak::upgrade) {
        Some(object) => Ok(object),
        None => {
            registry.objects.remove(&id.0);
            Err(KernelError::NoMemRegion)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_distinct_and_monotonic() {
        let a = VMObject::new_anonymous(crate::memory::PAGE_SIZE).unwrap();
        let b = VMObject::new_anonymous(crate::memory::PAGE_SIZE).unwrap();

        let id_a = register(&a);
        let id_b = register(&b);

        assert!(id_b.raw() > id_a.raw());
    }

    #[test]
    fn unknown_id_is_not_found() {
        assert_eq!(
            get(ShmId::from_raw(u32::MAX)).unwrap_err(),
            KernelError::NoMemRegion
        );
    }
}
