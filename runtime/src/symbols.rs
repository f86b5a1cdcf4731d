//! Dynamic resolution of the managed runtime's C entry points.
//!
//! The entry points form a fixed, ordered list that is resolved as a unit:
//! either every slot is populated and the table is usable, or loading fails
//! and no table is observable. The list is the wire contract with whatever
//! runtime build gets loaded and is versioned together with it through
//! [`SYMBOL_TABLE_VERSION`].

use std::ffi::{c_char, c_void};
use std::path::Path;
use std::ptr;

use libloading::Library;
use log::{debug, error, info};
use thiserror::Error;

use monobind_api::raw::{
    MonoAssembly, MonoClass, MonoClassField, MonoDomain, MonoImage, MonoMethod, MonoMethodDesc,
    MonoObject, MonoString, MonoVTable,
};

use crate::error::{ErrorPipeline, ErrorRecord};

/// Bumped whenever the required-symbol list changes shape.
pub const SYMBOL_TABLE_VERSION: u32 = 1;

macro_rules! runtime_symbols {
    ($(fn $name:ident($($arg:ty),* $(,)?) $(-> $ret:ty)?;)+) => {
        /// Typed function-pointer slots, one per required entry point.
        /// Constructed only through all-or-nothing resolution.
        #[derive(Clone, Copy)]
        pub struct RuntimeFns {
            $(pub $name: unsafe extern "C" fn($($arg),*) $(-> $ret)?,)+
        }

        /// Every entry point the loader must resolve, in resolution order.
        pub const REQUIRED_SYMBOLS: &[&str] = &[$(stringify!($name)),+];

        impl RuntimeFns {
            /// Resolves every slot through `lookup` (null meaning absent).
            /// Fails with the complete list of missing names; a partially
            /// populated table is never returned.
            pub(crate) fn resolve(
                mut lookup: impl FnMut(&str) -> *const c_void,
            ) -> Result<Self, Vec<&'static str>> {
                let mut missing: Vec<&'static str> = Vec::new();
                $(
                    let $name = lookup(stringify!($name));
                    if $name.is_null() {
                        missing.push(stringify!($name));
                    }
                )+
                if !missing.is_empty() {
                    return Err(missing);
                }
                Ok(Self {
                    // SAFETY: each pointer was checked non-null above and
                    // comes from the runtime's export table, whose ABI the
                    // declared signature mirrors.
                    $($name: unsafe { std::mem::transmute($name) },)+
                })
            }
        }
    };
}

runtime_symbols! {
    fn mono_config_parse(*const c_char);
    fn mono_jit_init_version(*const c_char, *const c_char) -> *mut MonoDomain;
    fn mono_jit_cleanup(*mut MonoDomain);
    fn mono_domain_get() -> *mut MonoDomain;
    fn mono_domain_set_config(*mut MonoDomain, *const c_char, *const c_char);
    fn mono_domain_assembly_open(*mut MonoDomain, *const c_char) -> *mut MonoAssembly;
    fn mono_assembly_get_image(*mut MonoAssembly) -> *mut MonoImage;
    fn mono_get_corlib() -> *mut MonoImage;
    fn mono_class_from_name(*mut MonoImage, *const c_char, *const c_char) -> *mut MonoClass;
    fn mono_class_get(*mut MonoImage, u32) -> *mut MonoClass;
    fn mono_class_get_field(*mut MonoClass, u32) -> *mut MonoClassField;
    fn mono_class_vtable(*mut MonoDomain, *mut MonoClass) -> *mut MonoVTable;
    fn mono_method_desc_new(*const c_char, i32) -> *mut MonoMethodDesc;
    fn mono_method_desc_free(*mut MonoMethodDesc);
    fn mono_method_desc_search_in_class(*mut MonoMethodDesc, *mut MonoClass) -> *mut MonoMethod;
    fn mono_runtime_invoke(
        *mut MonoMethod,
        *mut c_void,
        *mut *mut c_void,
        *mut *mut MonoObject,
    ) -> *mut MonoObject;
    fn mono_object_get_class(*mut MonoObject) -> *mut MonoClass;
    fn mono_object_unbox(*mut MonoObject) -> *mut c_void;
    fn mono_object_to_string(*mut MonoObject, *mut *mut MonoObject) -> *mut MonoString;
    fn mono_value_box(*mut MonoDomain, *mut MonoClass, *mut c_void) -> *mut MonoObject;
    fn mono_gchandle_new(*mut MonoObject, i32) -> u32;
    fn mono_gchandle_get_target(u32) -> *mut MonoObject;
    fn mono_gchandle_free(u32);
    fn mono_string_new(*mut MonoDomain, *const c_char) -> *mut MonoString;
    fn mono_string_length(*mut MonoString) -> i32;
    fn mono_string_chars(*mut MonoString) -> *mut u16;
    fn mono_field_get_value_object(
        *mut MonoDomain,
        *mut MonoClassField,
        *mut MonoObject,
    ) -> *mut MonoObject;
    fn mono_field_set_value(*mut MonoObject, *mut MonoClassField, *mut c_void);
    fn mono_field_static_set_value(*mut MonoVTable, *mut MonoClassField, *mut c_void);
    fn mono_get_string_class() -> *mut MonoClass;
    fn mono_get_boolean_class() -> *mut MonoClass;
    fn mono_get_char_class() -> *mut MonoClass;
    fn mono_get_sbyte_class() -> *mut MonoClass;
    fn mono_get_byte_class() -> *mut MonoClass;
    fn mono_get_int16_class() -> *mut MonoClass;
    fn mono_get_uint16_class() -> *mut MonoClass;
    fn mono_get_int32_class() -> *mut MonoClass;
    fn mono_get_uint32_class() -> *mut MonoClass;
    fn mono_get_int64_class() -> *mut MonoClass;
    fn mono_get_uint64_class() -> *mut MonoClass;
    fn mono_get_single_class() -> *mut MonoClass;
    fn mono_get_double_class() -> *mut MonoClass;
    fn mono_array_element_size(*mut MonoClass) -> i32;
}

/// A fully resolved entry-point table plus the library it was resolved
/// against. Dropping the table closes the library.
pub struct RuntimeSymbolTable {
    fns: RuntimeFns,
    _library: Library,
    version: u32,
}

impl RuntimeSymbolTable {
    pub fn fns(&self) -> &RuntimeFns {
        &self.fns
    }

    pub fn version(&self) -> u32 {
        self.version
    }
}

#[derive(Debug, Error)]
pub enum RuntimeLoadError {
    #[error("failed to load runtime library {path}: {detail}")]
    LibraryOpen { path: std::path::PathBuf, detail: String },
    #[error("runtime library is missing required symbols: {}", .symbols.join(", "))]
    MissingSymbols { symbols: Vec<&'static str> },
}

/// Opens the managed runtime's shared library and resolves the required
/// symbol list as a unit. Failures are also routed through `errors` so the
/// embedding application's report hook observes them.
pub fn load_runtime_library(
    path: &Path,
    errors: &ErrorPipeline,
) -> Result<RuntimeSymbolTable, RuntimeLoadError> {
    info!("loading managed runtime from {}", path.display());

    let library = match open_global(path) {
        Ok(library) => library,
        Err(err) => {
            let detail = err.to_string();
            errors.report(ErrorRecord::RuntimeLoadFailed {
                path: path.to_path_buf(),
                detail: detail.clone(),
            });
            return Err(RuntimeLoadError::LibraryOpen {
                path: path.to_path_buf(),
                detail,
            });
        }
    };

    let fns = resolve_table(
        |name| {
            // SAFETY: the declared slot signature is trusted only after the
            // all-or-nothing check; here the symbol is treated as an opaque
            // address.
            match unsafe { library.get::<unsafe extern "C" fn()>(name.as_bytes()) } {
                Ok(symbol) => *symbol as *const c_void,
                Err(_) => {
                    error!("runtime symbol not found: {name}");
                    ptr::null()
                }
            }
        },
        errors,
    )?;

    Ok(RuntimeSymbolTable {
        fns,
        _library: library,
        version: SYMBOL_TABLE_VERSION,
    })
}

/// Resolution step of [`load_runtime_library`], separated from the library
/// open so the reporting contract holds for any symbol source: a failed
/// resolution produces one missing-symbols report and no table.
fn resolve_table(
    lookup: impl FnMut(&str) -> *const c_void,
    errors: &ErrorPipeline,
) -> Result<RuntimeFns, RuntimeLoadError> {
    match RuntimeFns::resolve(lookup) {
        Ok(fns) => {
            debug!("resolved {} runtime symbols", REQUIRED_SYMBOLS.len());
            Ok(fns)
        }
        Err(symbols) => {
            errors.report(ErrorRecord::RuntimeMissingSymbols {
                symbols: symbols.clone(),
            });
            Err(RuntimeLoadError::MissingSymbols { symbols })
        }
    }
}

/// Lazy binding with globally visible symbols, so plugins loaded later (for
/// example a profiler) can resolve against the runtime we load here.
#[cfg(unix)]
fn open_global(path: &Path) -> Result<Library, libloading::Error> {
    use libloading::os::unix;
    let library = unsafe { unix::Library::open(Some(path), unix::RTLD_LAZY | unix::RTLD_GLOBAL) }?;
    Ok(library.into())
}

#[cfg(windows)]
fn open_global(path: &Path) -> Result<Library, libloading::Error> {
    unsafe { Library::new(path) }
}
