//! Binding context lifecycle and resolution.
//!
//! A [`BindingContext`] ties a runtime capability to an execution domain and
//! carries everything generated bindings need at call time: assembly, class
//! and method resolution, the error pipeline, and the cached corlib
//! singletons the marshaling codecs lean on. A process-wide slot tracks the
//! current context so flat C-shaped entry points can reach it without
//! threading a parameter through every call.

use std::ffi::c_void;
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::{Arc, Mutex};

use log::{debug, info};
use once_cell::sync::Lazy;
use thiserror::Error;

use monobind_api::{ClassRef, DomainRef, ImageRef, MethodRef, ObjectRef, RuntimeApi};

use crate::error::{ErrorPipeline, ErrorRecord};
use crate::object::ManagedObject;
use crate::runtime::DylibRuntime;
use crate::symbols::RuntimeLoadError;

/// Runtime version requested when creating a domain.
pub const RUNTIME_VERSION: &str = "v4.0.30319";

/// Domain configuration file picked up from the working directory.
const APP_CONFIG: &str = "app.config";

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("binding context is already initialized")]
    AlreadyInitialized,
    #[error("binding context is not initialized")]
    NotInitialized,
    #[error("failed to initialize execution domain {name}")]
    DomainInit { name: String },
    #[error("no ambient domain to attach to; the host has not initialized the runtime")]
    AmbientUnavailable,
}

/// How the context obtains its execution domain.
pub enum DomainMode {
    /// Create and own a fresh domain with the given friendly name. Torn down
    /// again by [`BindingContext::destroy`].
    Named(String),
    /// Attach to the domain of a host application that already initialized
    /// the runtime. The domain is borrowed and never torn down here.
    AttachAmbient,
}

/// Maps an assembly name to the full path to load it from, overriding the
/// executable-relative search. `None` falls through to the default search.
pub type AssemblySearchHook = Box<dyn Fn(&str) -> Option<PathBuf> + Send + Sync>;

/// Supplies an already-loaded image for an assembly name, bypassing the
/// filesystem entirely. Used by hosts that bundle assemblies.
pub type AssemblyLoadHook = Box<dyn Fn(&str) -> Option<ImageRef> + Send + Sync>;

struct DomainState {
    domain: DomainRef,
    owned: bool,
}

/// Corlib lookups resolved once per context. Slots are individually locked;
/// a populated slot is never replaced until [`BindingContext::destroy`].
#[derive(Default)]
struct SingletonCache {
    invariant_culture: Mutex<Option<Arc<ManagedObject>>>,
    decimal_class: Mutex<Option<ClassRef>>,
    datetime_class: Mutex<Option<ClassRef>>,
    decimal_to_string: Mutex<Option<MethodRef>>,
    decimal_parse: Mutex<Option<MethodRef>>,
}

impl SingletonCache {
    fn clear(&self) {
        self.invariant_culture.lock().unwrap().take();
        self.decimal_class.lock().unwrap().take();
        self.datetime_class.lock().unwrap().take();
        self.decimal_to_string.lock().unwrap().take();
        self.decimal_parse.lock().unwrap().take();
    }
}

pub struct BindingContext {
    runtime: Arc<dyn RuntimeApi>,
    errors: Arc<ErrorPipeline>,
    domain: Mutex<Option<DomainState>>,
    assembly_base: Mutex<Option<PathBuf>>,
    runtime_library: Mutex<Option<PathBuf>>,
    search_hook: Mutex<Option<AssemblySearchHook>>,
    load_hook: Mutex<Option<AssemblyLoadHook>>,
    cache: SingletonCache,
}

static CURRENT: Lazy<Mutex<Option<Arc<BindingContext>>>> = Lazy::new(|| Mutex::new(None));

/// The context most recently installed by [`set_current_context`] or by a
/// successful [`BindingContext::init`].
pub fn current_context() -> Option<Arc<BindingContext>> {
    CURRENT.lock().unwrap().clone()
}

/// Replaces the process-wide current context. Last write wins.
pub fn set_current_context(context: Option<Arc<BindingContext>>) {
    *CURRENT.lock().unwrap() = context;
}

impl BindingContext {
    pub fn new(runtime: Arc<dyn RuntimeApi>, errors: Arc<ErrorPipeline>) -> Self {
        Self {
            runtime,
            errors,
            domain: Mutex::new(None),
            assembly_base: Mutex::new(None),
            runtime_library: Mutex::new(None),
            search_hook: Mutex::new(None),
            load_hook: Mutex::new(None),
            cache: SingletonCache::default(),
        }
    }

    /// Creates a context whose runtime capability is loaded dynamically from
    /// the shared library at `library_path`. The path is recorded on the
    /// context and readable back through
    /// [`runtime_library_path`](Self::runtime_library_path). Load failures
    /// are routed through `errors` before returning.
    pub fn with_runtime_library(
        library_path: impl Into<PathBuf>,
        errors: Arc<ErrorPipeline>,
    ) -> Result<Arc<Self>, RuntimeLoadError> {
        let library_path = library_path.into();
        let runtime = DylibRuntime::load(&library_path, &errors)?;
        let context = Arc::new(Self::new(Arc::new(runtime), errors));
        context.set_runtime_library_path(Some(library_path));
        Ok(context)
    }

    pub fn runtime(&self) -> &Arc<dyn RuntimeApi> {
        &self.runtime
    }

    pub fn errors(&self) -> &Arc<ErrorPipeline> {
        &self.errors
    }

    /// Obtains the execution domain and installs `self` as the current
    /// context. Fails without side effects if already initialized.
    pub fn init(self: &Arc<Self>, mode: DomainMode) -> Result<(), ContextError> {
        let mut slot = self.domain.lock().unwrap();
        if slot.is_some() {
            return Err(ContextError::AlreadyInitialized);
        }

        let state = match mode {
            DomainMode::Named(name) => {
                self.runtime.parse_default_config();
                let domain = self
                    .runtime
                    .init_domain(&name, RUNTIME_VERSION)
                    .ok_or_else(|| ContextError::DomainInit { name: name.clone() })?;
                let config = Path::new(APP_CONFIG);
                if config.exists() {
                    debug!("applying {APP_CONFIG} from the working directory");
                    self.runtime.apply_domain_config(domain, Path::new("."), config);
                }
                info!("initialized execution domain {name}");
                DomainState {
                    domain,
                    owned: true,
                }
            }
            DomainMode::AttachAmbient => {
                let domain = self
                    .runtime
                    .ambient_domain()
                    .ok_or(ContextError::AmbientUnavailable)?;
                info!("attached to the host's execution domain");
                DomainState {
                    domain,
                    owned: false,
                }
            }
        };

        *slot = Some(state);
        drop(slot);
        set_current_context(Some(Arc::clone(self)));
        Ok(())
    }

    /// Tears down the domain. Requires an initialized context; cached
    /// singletons are released before the runtime shuts down. A borrowed
    /// ambient domain is detached from, not torn down.
    pub fn destroy(&self) -> Result<(), ContextError> {
        let state = {
            let mut slot = self.domain.lock().unwrap();
            slot.take().ok_or(ContextError::NotInitialized)?
        };
        self.cache.clear();
        if state.owned {
            self.runtime.cleanup_domain(state.domain);
            info!("execution domain torn down");
        }
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.domain.lock().unwrap().is_some()
    }

    pub fn domain(&self) -> Option<DomainRef> {
        self.domain.lock().unwrap().as_ref().map(|state| state.domain)
    }

    /// Sets the directory assemblies resolve against instead of the
    /// executable's directory. Last call wins; the path is not validated.
    pub fn set_assembly_base(&self, base: Option<PathBuf>) {
        *self.assembly_base.lock().unwrap() = base;
    }

    pub fn assembly_base(&self) -> Option<PathBuf> {
        self.assembly_base.lock().unwrap().clone()
    }

    /// Records where the managed runtime's shared library lives.
    /// [`with_runtime_library`](Self::with_runtime_library) fills this in
    /// with the path it loaded from. Last call wins; the path is not
    /// validated.
    pub fn set_runtime_library_path(&self, path: Option<PathBuf>) {
        *self.runtime_library.lock().unwrap() = path;
    }

    pub fn runtime_library_path(&self) -> Option<PathBuf> {
        self.runtime_library.lock().unwrap().clone()
    }

    /// Installs the assembly search hook, returning the previous one.
    pub fn install_assembly_search_hook(
        &self,
        hook: Option<AssemblySearchHook>,
    ) -> Option<AssemblySearchHook> {
        let mut slot = self.search_hook.lock().unwrap();
        std::mem::replace(&mut *slot, hook)
    }

    /// Installs the assembly load hook, returning the previous one.
    pub fn install_assembly_load_hook(
        &self,
        hook: Option<AssemblyLoadHook>,
    ) -> Option<AssemblyLoadHook> {
        let mut slot = self.load_hook.lock().unwrap();
        std::mem::replace(&mut *slot, hook)
    }

    /// Full path an assembly name resolves to: the search hook's answer if it
    /// gives one, otherwise the assembly base (or the running executable's
    /// directory) joined with the name.
    pub fn resolve_assembly_path(&self, assembly: &str) -> Option<PathBuf> {
        if let Some(hook) = self.search_hook.lock().unwrap().as_ref() {
            if let Some(path) = hook(assembly) {
                return Some(path);
            }
        }
        let base = match self.assembly_base() {
            Some(base) => base,
            None => std::env::current_exe().ok()?.parent()?.to_path_buf(),
        };
        Some(base.join(assembly))
    }

    /// Loads an assembly by name and returns its metadata image. Open
    /// failures are routed through the error pipeline and yield `None`.
    pub fn load_assembly(&self, assembly: &str) -> Option<ImageRef> {
        if let Some(hook) = self.load_hook.lock().unwrap().as_ref() {
            if let Some(image) = hook(assembly) {
                return Some(image);
            }
        }

        let domain = self.domain()?;
        let path = self.resolve_assembly_path(assembly)?;
        debug!("opening assembly {}", path.display());
        let Some(opened) = self.runtime.open_assembly(domain, &path) else {
            self.errors.report(ErrorRecord::AssemblyOpenFailed { path });
            return None;
        };
        self.runtime.assembly_image(opened)
    }

    /// Looks up a class in a named assembly. Lookup failures are routed
    /// through the error pipeline and yield `None`.
    pub fn resolve_class(&self, assembly: &str, namespace: &str, name: &str) -> Option<ClassRef> {
        let image = self.load_assembly(assembly)?;
        self.class_from_image(image, namespace, name)
    }

    /// Looks up a class in the core library image.
    pub fn resolve_corlib_class(&self, namespace: &str, name: &str) -> Option<ClassRef> {
        let image = self.runtime.corlib_image()?;
        self.class_from_image(image, namespace, name)
    }

    fn class_from_image(&self, image: ImageRef, namespace: &str, name: &str) -> Option<ClassRef> {
        let class = self.runtime.class_from_name(image, namespace, name);
        if class.is_none() {
            self.errors.report(ErrorRecord::ClassLookupFailed {
                namespace: namespace.to_owned(),
                name: name.to_owned(),
            });
        }
        class
    }

    /// Looks up a method by textual descriptor within a class. Lookup
    /// failures are routed through the error pipeline and yield `None`.
    pub fn resolve_method(&self, descriptor: &str, class: ClassRef) -> Option<MethodRef> {
        let method = self.runtime.find_method(descriptor, class);
        if method.is_none() {
            self.errors.report(ErrorRecord::MethodLookupFailed {
                descriptor: descriptor.to_owned(),
            });
        }
        method
    }

    /// Invokes a method, converting an in-flight managed exception into an
    /// `exception-thrown` report carrying its `ToString` rendering. A call
    /// that threw yields `None`.
    pub fn invoke(
        &self,
        method: MethodRef,
        this: *mut c_void,
        args: &mut [*mut c_void],
    ) -> Option<ObjectRef> {
        match self.runtime.invoke(method, this, args) {
            Ok(result) => result,
            Err(exception) => {
                let message = self.runtime.object_to_string(exception);
                self.errors
                    .report(ErrorRecord::ExceptionThrown { exception, message });
                None
            }
        }
    }

    /// `System.Globalization.CultureInfo.InvariantCulture`, resolved once
    /// and kept alive behind a GC handle for the context's lifetime.
    pub fn invariant_culture(&self) -> Option<Arc<ManagedObject>> {
        let mut slot = self.cache.invariant_culture.lock().unwrap();
        if let Some(culture) = slot.as_ref() {
            return Some(Arc::clone(culture));
        }
        let class = self.resolve_corlib_class("System.Globalization", "CultureInfo")?;
        let getter = self.resolve_method(
            "System.Globalization.CultureInfo:get_InvariantCulture()",
            class,
        )?;
        let culture = self.invoke(getter, ptr::null_mut(), &mut [])?;
        let culture = Arc::new(ManagedObject::new(Arc::clone(&self.runtime), culture));
        *slot = Some(Arc::clone(&culture));
        Some(culture)
    }

    /// `System.Decimal`, resolved once per context.
    pub fn decimal_class(&self) -> Option<ClassRef> {
        self.cached_corlib_class(&self.cache.decimal_class, "System", "Decimal")
    }

    /// `System.DateTime`, resolved once per context.
    pub fn datetime_class(&self) -> Option<ClassRef> {
        self.cached_corlib_class(&self.cache.datetime_class, "System", "DateTime")
    }

    fn cached_corlib_class(
        &self,
        slot: &Mutex<Option<ClassRef>>,
        namespace: &str,
        name: &str,
    ) -> Option<ClassRef> {
        let mut slot = slot.lock().unwrap();
        if slot.is_none() {
            *slot = self.resolve_corlib_class(namespace, name);
        }
        *slot
    }

    /// `Decimal.ToString(IFormatProvider)`, resolved once per context.
    pub fn decimal_to_string_method(&self) -> Option<MethodRef> {
        let mut slot = self.cache.decimal_to_string.lock().unwrap();
        if slot.is_none() {
            let class = self.decimal_class()?;
            *slot = self.resolve_method(":ToString(System.IFormatProvider)", class);
        }
        *slot
    }

    /// `Decimal.Parse(string, IFormatProvider)`, resolved once per context.
    pub fn decimal_parse_method(&self) -> Option<MethodRef> {
        let mut slot = self.cache.decimal_parse.lock().unwrap();
        if slot.is_none() {
            let class = self.decimal_class()?;
            *slot = self.resolve_method("System.Decimal:Parse(string,System.IFormatProvider)", class);
        }
        *slot
    }
}
