//! Native-side support runtime for managed-to-native bindings.
//!
//! Generated binding code and embedding applications use this crate to load
//! a managed runtime, resolve assemblies, classes and methods, marshal
//! values across the boundary, keep managed objects alive from native code,
//! and observe managed failures through a uniform error channel.

pub mod buffers;
pub mod context;
pub mod error;
pub mod marshal;
pub mod object;
pub mod runtime;
pub mod symbols;

pub use monobind_api as api;

pub use buffers::{MarshaledArray, MarshaledString};
pub use context::{
    current_context, set_current_context, AssemblyLoadHook, AssemblySearchHook, BindingContext,
    ContextError, DomainMode, RUNTIME_VERSION,
};
pub use error::{ErrorPipeline, ErrorRecord, ErrorReportHook};
pub use object::ManagedObject;
pub use runtime::DylibRuntime;
pub use symbols::{
    load_runtime_library, RuntimeLoadError, RuntimeSymbolTable, REQUIRED_SYMBOLS,
    SYMBOL_TABLE_VERSION,
};
