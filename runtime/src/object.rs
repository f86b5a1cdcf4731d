//! Native-side ownership of a managed object.

use std::fmt;
use std::sync::Arc;

use monobind_api::{ClassRef, ObjectRef, RuntimeApi};

/// A managed object kept alive from native code.
///
/// Creation registers a non-pinning GC handle with the runtime; dropping the
/// proxy releases it. The handle keeps the object reachable while native code
/// holds the proxy, but the object may still move, so the current reference
/// must be re-fetched through [`ManagedObject::target`] at each use rather
/// than cached.
///
/// Deliberately not `Clone`: each proxy owns exactly one handle, and sharing
/// goes through `Arc<ManagedObject>` so release still happens exactly once.
pub struct ManagedObject {
    runtime: Arc<dyn RuntimeApi>,
    class: ClassRef,
    handle: u32,
}

impl ManagedObject {
    /// Takes ownership of `object` by registering a GC handle for it. The
    /// class is captured eagerly; it is stable for the object's lifetime.
    pub fn new(runtime: Arc<dyn RuntimeApi>, object: ObjectRef) -> Self {
        let class = runtime.object_class(object);
        let handle = runtime.gchandle_new(object, false);
        Self {
            runtime,
            class,
            handle,
        }
    }

    pub fn class(&self) -> ClassRef {
        self.class
    }

    /// The raw GC handle, for binding code that stores it in foreign
    /// structures. Ownership stays with the proxy.
    pub fn handle(&self) -> u32 {
        self.handle
    }

    /// The object currently behind the handle. `None` only if the runtime
    /// has already shut down and collected the target.
    pub fn target(&self) -> Option<ObjectRef> {
        self.runtime.gchandle_target(self.handle)
    }
}

impl Drop for ManagedObject {
    fn drop(&mut self) {
        self.runtime.gchandle_free(self.handle);
    }
}

impl fmt::Debug for ManagedObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedObject")
            .field("class", &self.class)
            .field("handle", &self.handle)
            .finish()
    }
}
