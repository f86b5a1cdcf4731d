//! Boundary contract between native code and an embedded managed runtime.
//!
//! The managed runtime (JIT, GC, class loader) is consumed as an opaque
//! capability behind the [`RuntimeApi`] trait. Everything that crosses the
//! boundary is expressed in terms of the reference newtypes defined here,
//! which wrap non-null pointers owned by the runtime.

mod decimal;
pub mod raw;

pub use decimal::MonoDecimal;

use std::ffi::c_void;
use std::path::Path;

macro_rules! runtime_ref {
    ($($(#[$m:meta])* $name:ident => $raw:ident),+ $(,)?) => {$(
        $(#[$m])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq)]
        pub struct $name(*mut raw::$raw);

        impl $name {
            /// Wraps a runtime pointer, mapping null to `None`.
            pub fn from_raw(ptr: *mut raw::$raw) -> Option<Self> {
                if ptr.is_null() {
                    None
                } else {
                    Some(Self(ptr))
                }
            }

            pub fn as_ptr(self) -> *mut raw::$raw {
                self.0
            }

            /// The pointer erased to `*mut c_void`, as expected by the
            /// runtime's boxed-argument invocation convention.
            pub fn as_arg(self) -> *mut c_void {
                self.0.cast()
            }
        }

        // SAFETY: these are opaque tokens owned by the managed runtime. The
        // embedding layer mutates runtime state only through `RuntimeApi`
        // calls, which the runtime serializes internally or which callers are
        // contractually required to issue from a single initializing thread.
        unsafe impl Send for $name {}
        unsafe impl Sync for $name {}
    )+};
}

runtime_ref! {
    /// The runtime's isolated execution context.
    DomainRef => MonoDomain,
    /// A loadable unit of managed code located by filesystem path.
    AssemblyRef => MonoAssembly,
    /// The metadata image backing an assembly.
    ImageRef => MonoImage,
    /// A managed class descriptor.
    ClassRef => MonoClass,
    /// A resolved managed method.
    MethodRef => MonoMethod,
    /// A managed field descriptor.
    FieldRef => MonoClassField,
    /// A class vtable, needed for static field stores.
    VTableRef => MonoVTable,
    /// A managed object reference. Only valid while the runtime keeps the
    /// object alive; pin liveness with a GC handle before retaining one.
    ObjectRef => MonoObject,
    /// A managed string reference.
    StringRef => MonoString,
}

impl StringRef {
    /// Reinterprets an object reference known to be a managed string.
    pub fn from_object(object: ObjectRef) -> Self {
        Self(object.as_ptr().cast())
    }

    pub fn as_object(self) -> ObjectRef {
        ObjectRef(self.0.cast())
    }
}

/// Built-in value classes the runtime exposes through dedicated accessors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BuiltinClass {
    String,
    Boolean,
    Char,
    SByte,
    Byte,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Single,
    Double,
}

/// The managed runtime as consumed by the embedding layer.
///
/// Implementations are selection strategies: [`DylibRuntime`] resolves every
/// operation through a dynamically loaded symbol table, a statically linked
/// build would call the entry points directly, and tests substitute a fake.
/// All calls are synchronous foreign calls; none suspend cooperatively and
/// there is no cancellation. A hung runtime call hangs the native caller.
///
/// [`DylibRuntime`]: https://docs.rs/monobind
pub trait RuntimeApi: Send + Sync {
    /// Applies the runtime's default machine configuration.
    fn parse_default_config(&self);

    /// Creates and initializes a named execution domain.
    fn init_domain(&self, name: &str, runtime_version: &str) -> Option<DomainRef>;

    /// Attaches to the ambient domain of an embedding host that already
    /// initialized the runtime.
    fn ambient_domain(&self) -> Option<DomainRef>;

    /// Tears down a domain created by [`RuntimeApi::init_domain`].
    fn cleanup_domain(&self, domain: DomainRef);

    /// Applies an application configuration file to the domain.
    fn apply_domain_config(&self, domain: DomainRef, base_dir: &Path, config_file: &Path);

    fn open_assembly(&self, domain: DomainRef, path: &Path) -> Option<AssemblyRef>;

    fn assembly_image(&self, assembly: AssemblyRef) -> Option<ImageRef>;

    /// The image holding the core library (`System.*`) classes.
    fn corlib_image(&self) -> Option<ImageRef>;

    fn class_from_name(&self, image: ImageRef, namespace: &str, name: &str) -> Option<ClassRef>;

    fn class_from_token(&self, image: ImageRef, token: u32) -> Option<ClassRef>;

    fn class_field(&self, class: ClassRef, field_token: u32) -> Option<FieldRef>;

    fn class_vtable(&self, domain: DomainRef, class: ClassRef) -> Option<VTableRef>;

    fn builtin_class(&self, builtin: BuiltinClass) -> Option<ClassRef>;

    /// Per-element size in bytes for arrays of the given element class.
    fn array_element_size(&self, class: ClassRef) -> usize;

    /// Looks up a method within a class from a textual signature descriptor
    /// of the form `Namespace.Class:Method(argtypes)`.
    fn find_method(&self, descriptor: &str, class: ClassRef) -> Option<MethodRef>;

    /// Invokes a method with boxed arguments. `this` is null for static
    /// methods, otherwise a pointer to the receiver (an object reference or
    /// a value-type payload). Returns the boxed result, or the in-flight
    /// managed exception as the error value.
    fn invoke(
        &self,
        method: MethodRef,
        this: *mut c_void,
        args: &mut [*mut c_void],
    ) -> Result<Option<ObjectRef>, ObjectRef>;

    /// The class of a managed instance. Every managed object has one.
    fn object_class(&self, object: ObjectRef) -> ClassRef;

    /// Renders an object through its managed `ToString`, if that does not
    /// itself throw.
    fn object_to_string(&self, object: ObjectRef) -> Option<String>;

    /// Pointer to the value payload of a boxed value-type instance.
    fn unbox(&self, object: ObjectRef) -> *mut c_void;

    fn box_value(&self, domain: DomainRef, class: ClassRef, value: *mut c_void)
        -> Option<ObjectRef>;

    /// Creates a GC handle keeping `object` reachable from native code. The
    /// handle pins liveness, not memory location, unless `pinned` is set.
    fn gchandle_new(&self, object: ObjectRef, pinned: bool) -> u32;

    /// Current target of a GC handle.
    fn gchandle_target(&self, handle: u32) -> Option<ObjectRef>;

    /// Releases a GC handle. Must be called exactly once per handle.
    fn gchandle_free(&self, handle: u32);

    fn string_new(&self, domain: DomainRef, value: &str) -> Option<StringRef>;

    /// UTF-8 rendering of a managed string.
    fn string_to_utf8(&self, value: StringRef) -> Option<String>;

    fn field_value_object(
        &self,
        domain: DomainRef,
        field: FieldRef,
        object: ObjectRef,
    ) -> Option<ObjectRef>;

    fn field_set_value(&self, object: ObjectRef, field: FieldRef, value: *mut c_void);

    fn field_set_static_value(&self, vtable: VTableRef, field: FieldRef, value: *mut c_void);
}

/// Bridge between a platform-native object system and managed references.
///
/// Generated bindings for platforms with a native object runtime install one
/// of these; the embedding layer itself never converts platform objects.
pub trait ObjectBridge: Send + Sync {
    /// Managed counterpart of a native platform object, if one exists.
    fn to_managed(&self, native: *mut c_void) -> Option<ObjectRef>;

    /// Native counterpart of a managed object, if one exists.
    fn from_managed(&self, object: ObjectRef) -> Option<*mut c_void>;
}
