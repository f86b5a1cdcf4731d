//! Dynamic-load strategy for the managed runtime capability.
//!
//! [`DylibRuntime`] implements [`RuntimeApi`] by calling through a resolved
//! [`RuntimeSymbolTable`]. A statically linked build would provide a sibling
//! strategy calling the entry points directly; both sit behind the same
//! trait so the rest of the layer is mode-agnostic.

use std::ffi::{c_void, CString};
use std::path::Path;
use std::ptr;
use std::slice;

use log::warn;

use monobind_api::{
    AssemblyRef, BuiltinClass, ClassRef, DomainRef, FieldRef, ImageRef, MethodRef, ObjectRef,
    RuntimeApi, StringRef, VTableRef,
};

use crate::error::ErrorPipeline;
use crate::symbols::{load_runtime_library, RuntimeFns, RuntimeLoadError, RuntimeSymbolTable};

pub struct DylibRuntime {
    table: RuntimeSymbolTable,
}

impl DylibRuntime {
    /// Wraps an already-resolved symbol table.
    pub fn new(table: RuntimeSymbolTable) -> Self {
        Self { table }
    }

    /// Loads the runtime library at `path` and resolves its symbol table.
    pub fn load(path: &Path, errors: &ErrorPipeline) -> Result<Self, RuntimeLoadError> {
        load_runtime_library(path, errors).map(Self::new)
    }

    pub fn table(&self) -> &RuntimeSymbolTable {
        &self.table
    }

    fn fns(&self) -> &RuntimeFns {
        self.table.fns()
    }
}

/// Paths and names handed to the runtime must be NUL-free C strings; a path
/// that cannot be represented is treated as unresolvable rather than a fault.
fn to_cstring(value: &str) -> Option<CString> {
    match CString::new(value) {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("string with interior NUL cannot cross the runtime boundary");
            None
        }
    }
}

fn path_cstring(path: &Path) -> Option<CString> {
    to_cstring(path.to_str()?)
}

impl RuntimeApi for DylibRuntime {
    fn parse_default_config(&self) {
        // SAFETY: null selects the runtime's default configuration sources.
        unsafe { (self.fns().mono_config_parse)(ptr::null()) }
    }

    fn init_domain(&self, name: &str, runtime_version: &str) -> Option<DomainRef> {
        let name = to_cstring(name)?;
        let version = to_cstring(runtime_version)?;
        // SAFETY: both strings outlive the call; the runtime copies them.
        let domain = unsafe { (self.fns().mono_jit_init_version)(name.as_ptr(), version.as_ptr()) };
        DomainRef::from_raw(domain)
    }

    fn ambient_domain(&self) -> Option<DomainRef> {
        // SAFETY: no arguments; returns the host-initialized domain or null.
        DomainRef::from_raw(unsafe { (self.fns().mono_domain_get)() })
    }

    fn cleanup_domain(&self, domain: DomainRef) {
        // SAFETY: the domain came from init_domain on this same runtime.
        unsafe { (self.fns().mono_jit_cleanup)(domain.as_ptr()) }
    }

    fn apply_domain_config(&self, domain: DomainRef, base_dir: &Path, config_file: &Path) {
        let (Some(base_dir), Some(config_file)) =
            (path_cstring(base_dir), path_cstring(config_file))
        else {
            return;
        };
        // SAFETY: both strings outlive the call.
        unsafe {
            (self.fns().mono_domain_set_config)(
                domain.as_ptr(),
                base_dir.as_ptr(),
                config_file.as_ptr(),
            )
        }
    }

    fn open_assembly(&self, domain: DomainRef, path: &Path) -> Option<AssemblyRef> {
        let path = path_cstring(path)?;
        // SAFETY: the path string outlives the call.
        let assembly =
            unsafe { (self.fns().mono_domain_assembly_open)(domain.as_ptr(), path.as_ptr()) };
        AssemblyRef::from_raw(assembly)
    }

    fn assembly_image(&self, assembly: AssemblyRef) -> Option<ImageRef> {
        // SAFETY: the assembly reference is live for the domain's lifetime.
        ImageRef::from_raw(unsafe { (self.fns().mono_assembly_get_image)(assembly.as_ptr()) })
    }

    fn corlib_image(&self) -> Option<ImageRef> {
        // SAFETY: no arguments.
        ImageRef::from_raw(unsafe { (self.fns().mono_get_corlib)() })
    }

    fn class_from_name(&self, image: ImageRef, namespace: &str, name: &str) -> Option<ClassRef> {
        let namespace = to_cstring(namespace)?;
        let name = to_cstring(name)?;
        // SAFETY: both strings outlive the call.
        let class = unsafe {
            (self.fns().mono_class_from_name)(image.as_ptr(), namespace.as_ptr(), name.as_ptr())
        };
        ClassRef::from_raw(class)
    }

    fn class_from_token(&self, image: ImageRef, token: u32) -> Option<ClassRef> {
        // SAFETY: a bad token yields null, mapped to None.
        ClassRef::from_raw(unsafe { (self.fns().mono_class_get)(image.as_ptr(), token) })
    }

    fn class_field(&self, class: ClassRef, field_token: u32) -> Option<FieldRef> {
        // SAFETY: a bad token yields null, mapped to None.
        FieldRef::from_raw(unsafe { (self.fns().mono_class_get_field)(class.as_ptr(), field_token) })
    }

    fn class_vtable(&self, domain: DomainRef, class: ClassRef) -> Option<VTableRef> {
        // SAFETY: both references belong to this runtime.
        VTableRef::from_raw(unsafe {
            (self.fns().mono_class_vtable)(domain.as_ptr(), class.as_ptr())
        })
    }

    fn builtin_class(&self, builtin: BuiltinClass) -> Option<ClassRef> {
        let fns = self.fns();
        let getter = match builtin {
            BuiltinClass::String => fns.mono_get_string_class,
            BuiltinClass::Boolean => fns.mono_get_boolean_class,
            BuiltinClass::Char => fns.mono_get_char_class,
            BuiltinClass::SByte => fns.mono_get_sbyte_class,
            BuiltinClass::Byte => fns.mono_get_byte_class,
            BuiltinClass::Int16 => fns.mono_get_int16_class,
            BuiltinClass::UInt16 => fns.mono_get_uint16_class,
            BuiltinClass::Int32 => fns.mono_get_int32_class,
            BuiltinClass::UInt32 => fns.mono_get_uint32_class,
            BuiltinClass::Int64 => fns.mono_get_int64_class,
            BuiltinClass::UInt64 => fns.mono_get_uint64_class,
            BuiltinClass::Single => fns.mono_get_single_class,
            BuiltinClass::Double => fns.mono_get_double_class,
        };
        // SAFETY: the getters take no arguments.
        ClassRef::from_raw(unsafe { getter() })
    }

    fn array_element_size(&self, class: ClassRef) -> usize {
        // SAFETY: the class reference belongs to this runtime.
        let size = unsafe { (self.fns().mono_array_element_size)(class.as_ptr()) };
        usize::try_from(size).unwrap_or(0)
    }

    fn find_method(&self, descriptor: &str, class: ClassRef) -> Option<MethodRef> {
        let descriptor = to_cstring(descriptor)?;
        // SAFETY: the descriptor outlives desc creation; the matcher is
        // released on every path once the search completes.
        unsafe {
            let desc = (self.fns().mono_method_desc_new)(descriptor.as_ptr(), 1);
            if desc.is_null() {
                return None;
            }
            let method = (self.fns().mono_method_desc_search_in_class)(desc, class.as_ptr());
            (self.fns().mono_method_desc_free)(desc);
            MethodRef::from_raw(method)
        }
    }

    fn invoke(
        &self,
        method: MethodRef,
        this: *mut c_void,
        args: &mut [*mut c_void],
    ) -> Result<Option<ObjectRef>, ObjectRef> {
        let mut exception: *mut monobind_api::raw::MonoObject = ptr::null_mut();
        // SAFETY: args stays alive across the call; the runtime reads the
        // slots it needs per the method signature.
        let result = unsafe {
            (self.fns().mono_runtime_invoke)(
                method.as_ptr(),
                this,
                args.as_mut_ptr(),
                &mut exception,
            )
        };
        if let Some(exception) = ObjectRef::from_raw(exception) {
            return Err(exception);
        }
        Ok(ObjectRef::from_raw(result))
    }

    fn object_class(&self, object: ObjectRef) -> ClassRef {
        // SAFETY: the object reference is non-null by construction.
        let class = unsafe { (self.fns().mono_object_get_class)(object.as_ptr()) };
        ClassRef::from_raw(class).expect("managed object without a class")
    }

    fn object_to_string(&self, object: ObjectRef) -> Option<String> {
        let mut exception: *mut monobind_api::raw::MonoObject = ptr::null_mut();
        // SAFETY: exception is an out-parameter for a nested throw.
        let rendered =
            unsafe { (self.fns().mono_object_to_string)(object.as_ptr(), &mut exception) };
        if !exception.is_null() {
            return None;
        }
        self.string_to_utf8(StringRef::from_raw(rendered)?)
    }

    fn unbox(&self, object: ObjectRef) -> *mut c_void {
        // SAFETY: the object reference is non-null by construction.
        unsafe { (self.fns().mono_object_unbox)(object.as_ptr()) }
    }

    fn box_value(
        &self,
        domain: DomainRef,
        class: ClassRef,
        value: *mut c_void,
    ) -> Option<ObjectRef> {
        // SAFETY: value points at a payload of the class's value layout, per
        // the caller's contract.
        ObjectRef::from_raw(unsafe {
            (self.fns().mono_value_box)(domain.as_ptr(), class.as_ptr(), value)
        })
    }

    fn gchandle_new(&self, object: ObjectRef, pinned: bool) -> u32 {
        // SAFETY: the object reference is non-null by construction.
        unsafe { (self.fns().mono_gchandle_new)(object.as_ptr(), i32::from(pinned)) }
    }

    fn gchandle_target(&self, handle: u32) -> Option<ObjectRef> {
        // SAFETY: stale handles yield null, mapped to None.
        ObjectRef::from_raw(unsafe { (self.fns().mono_gchandle_get_target)(handle) })
    }

    fn gchandle_free(&self, handle: u32) {
        // SAFETY: callers release each handle exactly once.
        unsafe { (self.fns().mono_gchandle_free)(handle) }
    }

    fn string_new(&self, domain: DomainRef, value: &str) -> Option<StringRef> {
        let value = to_cstring(value)?;
        // SAFETY: the string outlives the call; the runtime copies it.
        StringRef::from_raw(unsafe {
            (self.fns().mono_string_new)(domain.as_ptr(), value.as_ptr())
        })
    }

    fn string_to_utf8(&self, value: StringRef) -> Option<String> {
        // SAFETY: length and character storage come from the same live
        // managed string; the slice is copied out before any runtime call
        // could move the object.
        unsafe {
            let len = (self.fns().mono_string_length)(value.as_ptr());
            let chars = (self.fns().mono_string_chars)(value.as_ptr());
            if len < 0 || chars.is_null() {
                return None;
            }
            let units = slice::from_raw_parts(chars, len as usize);
            Some(String::from_utf16_lossy(units))
        }
    }

    fn field_value_object(
        &self,
        domain: DomainRef,
        field: FieldRef,
        object: ObjectRef,
    ) -> Option<ObjectRef> {
        // SAFETY: all references belong to this runtime.
        ObjectRef::from_raw(unsafe {
            (self.fns().mono_field_get_value_object)(
                domain.as_ptr(),
                field.as_ptr(),
                object.as_ptr(),
            )
        })
    }

    fn field_set_value(&self, object: ObjectRef, field: FieldRef, value: *mut c_void) {
        // SAFETY: value points at a payload matching the field type, per the
        // caller's contract.
        unsafe { (self.fns().mono_field_set_value)(object.as_ptr(), field.as_ptr(), value) }
    }

    fn field_set_static_value(&self, vtable: VTableRef, field: FieldRef, value: *mut c_void) {
        // SAFETY: as for field_set_value, against the class vtable.
        unsafe {
            (self.fns().mono_field_static_set_value)(vtable.as_ptr(), field.as_ptr(), value)
        }
    }
}
