//! Uniform reporting channel for boundary failures.
//!
//! Every failure in this layer is funneled through a single installable hook
//! rather than per-call error codes. Without a custom hook the policy is to
//! format the record and abort: a boundary failure is fatal unless the
//! embedding application explicitly opts into graceful handling.

use std::fmt;
use std::path::PathBuf;
use std::process;
use std::sync::{Arc, Mutex};

use log::error;
use monobind_api::ObjectRef;

/// A boundary failure, constructed at the failure site, consumed by the
/// installed hook, and not retained afterwards.
#[derive(Debug)]
pub enum ErrorRecord {
    /// The managed runtime surfaced an in-flight exception at an invocation
    /// site. Carries the exception reference and its managed rendering.
    ExceptionThrown {
        exception: ObjectRef,
        message: Option<String>,
    },
    AssemblyOpenFailed {
        path: PathBuf,
    },
    ClassLookupFailed {
        namespace: String,
        name: String,
    },
    MethodLookupFailed {
        descriptor: String,
    },
    RuntimeLoadFailed {
        path: PathBuf,
        detail: String,
    },
    RuntimeMissingSymbols {
        symbols: Vec<&'static str>,
    },
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorRecord::ExceptionThrown { message, .. } => match message {
                Some(message) => write!(f, "the managed runtime threw an exception: {message}"),
                None => write!(f, "the managed runtime threw an exception"),
            },
            ErrorRecord::AssemblyOpenFailed { path } => {
                write!(f, "failed to open assembly {}", path.display())
            }
            ErrorRecord::ClassLookupFailed { namespace, name } => {
                write!(f, "failed to look up class {namespace}.{name}")
            }
            ErrorRecord::MethodLookupFailed { descriptor } => {
                write!(f, "failed to look up method {descriptor}")
            }
            ErrorRecord::RuntimeLoadFailed { path, detail } => {
                write!(
                    f,
                    "failed to load the managed runtime library {}: {detail}",
                    path.display()
                )
            }
            ErrorRecord::RuntimeMissingSymbols { symbols } => {
                write!(
                    f,
                    "the managed runtime library is missing required symbols: {}",
                    symbols.join(", ")
                )
            }
        }
    }
}

/// Hook invoked for each reported record. A hook that returns normally is
/// taken to have handled the error; the failing call site then returns a
/// best-effort null result to its caller.
pub type ErrorReportHook = Arc<dyn Fn(&ErrorRecord) + Send + Sync>;

/// The report channel. One hook is current at a time; installing returns the
/// previous hook so callers can nest and restore. The hook runs with the
/// slot unlocked, so it may itself install, clear, or report.
pub struct ErrorPipeline {
    hook: Mutex<Option<ErrorReportHook>>,
}

impl Default for ErrorPipeline {
    fn default() -> Self {
        Self {
            hook: Mutex::new(Some(Arc::new(abort_on_error))),
        }
    }
}

impl ErrorPipeline {
    /// Pipeline with the default format-and-abort hook installed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pipeline with no hook installed: reports are dropped silently. An
    /// escape hatch for harnesses that assert on non-fatal failure paths.
    pub fn disarmed() -> Self {
        Self {
            hook: Mutex::new(None),
        }
    }

    /// Swaps the installed hook, returning the previous one. `None` clears
    /// the hook entirely.
    pub fn install_hook(&self, hook: Option<ErrorReportHook>) -> Option<ErrorReportHook> {
        let mut slot = self.hook.lock().unwrap();
        std::mem::replace(&mut *slot, hook)
    }

    /// Routes a record to the installed hook, if any. The hook is cloned out
    /// of the slot and the lock released before the call, so a re-entrant
    /// hook cannot deadlock against its own pipeline.
    pub fn report(&self, record: ErrorRecord) {
        let hook = self.hook.lock().unwrap().clone();
        match hook {
            Some(hook) => hook(&record),
            None => error!("unhandled boundary error dropped: {record}"),
        }
    }
}

fn abort_on_error(record: &ErrorRecord) {
    error!("{record}");
    eprintln!("monobind: fatal: {record}");
    process::abort();
}
