//! In-process stand-in for the managed runtime.
//!
//! Implements the full capability surface over plain Rust state so the
//! context, object and marshaling layers can be exercised without loading a
//! real runtime library. Decimal text conversion is modeled with 128-bit
//! integer arithmetic, which covers the full 96-bit magnitude range the
//! managed decimal carries.

// Each integration binary compiles this module separately and uses a
// different subset of it.
#![allow(dead_code)]

use std::collections::HashMap;
use std::ffi::c_void;
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::Mutex;

use monobind::api::raw;
use monobind::api::{
    AssemblyRef, BuiltinClass, ClassRef, DomainRef, FieldRef, ImageRef, MethodRef, MonoDecimal,
    ObjectRef, RuntimeApi, StringRef, VTableRef,
};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// What an invocation of a registered method does.
#[derive(Clone)]
pub enum MethodBehavior {
    CultureGetter,
    DecimalToString,
    DecimalParse,
    ReturnString(String),
    Throw(String),
    ReturnNull,
}

enum FakeObject {
    Culture,
    Str(String),
    BoxedDecimal(MonoDecimal),
    Exception(String),
    Plain,
}

struct MethodEntry {
    addr: usize,
    lookups: usize,
    behavior: MethodBehavior,
}

struct ClassEntry {
    addr: usize,
    lookups: usize,
}

#[derive(Default)]
struct State {
    domain_live: bool,
    init_calls: usize,
    cleanup_calls: usize,
    config_parses: usize,
    applied_configs: Vec<(PathBuf, PathBuf)>,
    known_assemblies: HashMap<String, (usize, usize)>,
    opened_assemblies: Vec<PathBuf>,
    classes: HashMap<(String, String), ClassEntry>,
    methods: HashMap<String, MethodEntry>,
    builtins: HashMap<BuiltinClass, usize>,
    element_sizes: HashMap<usize, usize>,
    objects: Vec<Box<FakeObject>>,
    culture_object: Option<usize>,
    handles: HashMap<u32, usize>,
    next_handle: u32,
    freed_handles: Vec<u32>,
    field_stores: usize,
}

pub struct FakeRuntime {
    domain: usize,
    corlib: usize,
    vtable: usize,
    string_class: usize,
    exception_class: usize,
    plain_class: usize,
    ambient_available: bool,
    fail_domain_init: bool,
    state: Mutex<State>,
}

fn mint() -> usize {
    Box::leak(Box::new(0u8)) as *mut u8 as usize
}

impl Default for FakeRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeRuntime {
    pub fn new() -> Self {
        let mut state = State {
            next_handle: 1,
            ..State::default()
        };

        let decimal_class = Self::register_class(&mut state, "System", "Decimal");
        state.element_sizes.insert(decimal_class, 16);
        Self::register_class(&mut state, "System", "DateTime");
        Self::register_class(&mut state, "System.Globalization", "CultureInfo");

        Self::register_method(
            &mut state,
            "System.Globalization.CultureInfo:get_InvariantCulture()",
            MethodBehavior::CultureGetter,
        );
        Self::register_method(
            &mut state,
            ":ToString(System.IFormatProvider)",
            MethodBehavior::DecimalToString,
        );
        Self::register_method(
            &mut state,
            "System.Decimal:Parse(string,System.IFormatProvider)",
            MethodBehavior::DecimalParse,
        );

        Self {
            domain: mint(),
            corlib: mint(),
            vtable: mint(),
            string_class: mint(),
            exception_class: mint(),
            plain_class: mint(),
            ambient_available: false,
            fail_domain_init: false,
            state: Mutex::new(state),
        }
    }

    pub fn with_ambient_domain() -> Self {
        Self {
            ambient_available: true,
            ..Self::new()
        }
    }

    pub fn failing_domain_init() -> Self {
        Self {
            fail_domain_init: true,
            ..Self::new()
        }
    }

    fn register_class(state: &mut State, namespace: &str, name: &str) -> usize {
        let addr = mint();
        state.classes.insert(
            (namespace.to_owned(), name.to_owned()),
            ClassEntry { addr, lookups: 0 },
        );
        addr
    }

    fn register_method(state: &mut State, descriptor: &str, behavior: MethodBehavior) {
        state.methods.insert(
            descriptor.to_owned(),
            MethodEntry {
                addr: mint(),
                lookups: 0,
                behavior,
            },
        );
    }

    /// Makes an assembly file name openable.
    pub fn allow_assembly(&self, file_name: &str) {
        let mut state = self.state.lock().unwrap();
        state
            .known_assemblies
            .insert(file_name.to_owned(), (mint(), mint()));
    }

    pub fn add_class(&self, namespace: &str, name: &str) {
        let mut state = self.state.lock().unwrap();
        Self::register_class(&mut state, namespace, name);
    }

    pub fn add_method(&self, descriptor: &str, behavior: MethodBehavior) {
        let mut state = self.state.lock().unwrap();
        Self::register_method(&mut state, descriptor, behavior);
    }

    pub fn init_calls(&self) -> usize {
        self.state.lock().unwrap().init_calls
    }

    pub fn cleanup_calls(&self) -> usize {
        self.state.lock().unwrap().cleanup_calls
    }

    pub fn config_parses(&self) -> usize {
        self.state.lock().unwrap().config_parses
    }

    pub fn opened_assemblies(&self) -> Vec<PathBuf> {
        self.state.lock().unwrap().opened_assemblies.clone()
    }

    pub fn class_lookups(&self, namespace: &str, name: &str) -> usize {
        let state = self.state.lock().unwrap();
        state
            .classes
            .get(&(namespace.to_owned(), name.to_owned()))
            .map_or(0, |entry| entry.lookups)
    }

    pub fn method_lookups(&self, descriptor: &str) -> usize {
        let state = self.state.lock().unwrap();
        state.methods.get(descriptor).map_or(0, |entry| entry.lookups)
    }

    pub fn live_handle_count(&self) -> usize {
        self.state.lock().unwrap().handles.len()
    }

    pub fn freed_handles(&self) -> Vec<u32> {
        self.state.lock().unwrap().freed_handles.clone()
    }

    fn mint_object(state: &mut State, object: FakeObject) -> ObjectRef {
        let boxed = Box::new(object);
        let addr = &*boxed as *const FakeObject as usize;
        state.objects.push(boxed);
        ObjectRef::from_raw(addr as *mut raw::MonoObject).unwrap()
    }

    fn object_at(state: &State, addr: usize) -> Option<&FakeObject> {
        state
            .objects
            .iter()
            .map(|boxed| &**boxed)
            .find(|object| *object as *const FakeObject as usize == addr)
    }

    fn class_addr(state: &State, namespace: &str, name: &str) -> Option<usize> {
        state
            .classes
            .get(&(namespace.to_owned(), name.to_owned()))
            .map(|entry| entry.addr)
    }
}

fn format_decimal(value: &MonoDecimal) -> String {
    let magnitude = value.magnitude();
    let scale = u32::from(value.scale());
    let digits = if scale == 0 {
        magnitude.to_string()
    } else {
        let divisor = 10u128.pow(scale);
        format!(
            "{}.{:0width$}",
            magnitude / divisor,
            magnitude % divisor,
            width = scale as usize
        )
    };
    if value.is_negative() && magnitude != 0 {
        format!("-{digits}")
    } else {
        digits
    }
}

fn parse_decimal(text: &str) -> Option<MonoDecimal> {
    let (negative, rest) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let (int_part, frac_part) = match rest.split_once('.') {
        Some((int_part, frac_part)) => (int_part, frac_part),
        None => (rest, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    if frac_part.len() > 28 {
        return None;
    }
    let mut magnitude: u128 = 0;
    for c in int_part.chars().chain(frac_part.chars()) {
        let digit = u128::from(c.to_digit(10)?);
        magnitude = magnitude.checked_mul(10)?.checked_add(digit)?;
    }
    if magnitude >= 1u128 << 96 {
        return None;
    }
    Some(MonoDecimal::new(
        negative && magnitude != 0,
        frac_part.len() as u8,
        (magnitude >> 64) as u32,
        magnitude as u64,
    ))
}

impl RuntimeApi for FakeRuntime {
    fn parse_default_config(&self) {
        self.state.lock().unwrap().config_parses += 1;
    }

    fn init_domain(&self, _name: &str, _runtime_version: &str) -> Option<DomainRef> {
        if self.fail_domain_init {
            return None;
        }
        let mut state = self.state.lock().unwrap();
        state.init_calls += 1;
        state.domain_live = true;
        DomainRef::from_raw(self.domain as *mut raw::MonoDomain)
    }

    fn ambient_domain(&self) -> Option<DomainRef> {
        if self.ambient_available {
            DomainRef::from_raw(self.domain as *mut raw::MonoDomain)
        } else {
            None
        }
    }

    fn cleanup_domain(&self, domain: DomainRef) {
        assert_eq!(domain.as_ptr() as usize, self.domain, "unknown domain");
        let mut state = self.state.lock().unwrap();
        assert!(state.domain_live, "domain torn down twice");
        state.cleanup_calls += 1;
        state.domain_live = false;
    }

    fn apply_domain_config(&self, _domain: DomainRef, base_dir: &Path, config_file: &Path) {
        self.state
            .lock()
            .unwrap()
            .applied_configs
            .push((base_dir.to_path_buf(), config_file.to_path_buf()));
    }

    fn open_assembly(&self, _domain: DomainRef, path: &Path) -> Option<AssemblyRef> {
        let mut state = self.state.lock().unwrap();
        state.opened_assemblies.push(path.to_path_buf());
        let file_name = path.file_name()?.to_str()?.to_owned();
        let (assembly, _) = *state.known_assemblies.get(&file_name)?;
        AssemblyRef::from_raw(assembly as *mut raw::MonoAssembly)
    }

    fn assembly_image(&self, assembly: AssemblyRef) -> Option<ImageRef> {
        let state = self.state.lock().unwrap();
        let target = assembly.as_ptr() as usize;
        state
            .known_assemblies
            .values()
            .find(|(addr, _)| *addr == target)
            .and_then(|(_, image)| ImageRef::from_raw(*image as *mut raw::MonoImage))
    }

    fn corlib_image(&self) -> Option<ImageRef> {
        ImageRef::from_raw(self.corlib as *mut raw::MonoImage)
    }

    fn class_from_name(&self, _image: ImageRef, namespace: &str, name: &str) -> Option<ClassRef> {
        let mut state = self.state.lock().unwrap();
        let entry = state
            .classes
            .get_mut(&(namespace.to_owned(), name.to_owned()))?;
        entry.lookups += 1;
        ClassRef::from_raw(entry.addr as *mut raw::MonoClass)
    }

    fn class_from_token(&self, _image: ImageRef, _token: u32) -> Option<ClassRef> {
        None
    }

    fn class_field(&self, _class: ClassRef, _field_token: u32) -> Option<FieldRef> {
        None
    }

    fn class_vtable(&self, _domain: DomainRef, _class: ClassRef) -> Option<VTableRef> {
        VTableRef::from_raw(self.vtable as *mut raw::MonoVTable)
    }

    fn builtin_class(&self, builtin: BuiltinClass) -> Option<ClassRef> {
        let mut state = self.state.lock().unwrap();
        let addr = *state.builtins.entry(builtin).or_insert_with(|| {
            if builtin == BuiltinClass::String {
                self.string_class
            } else {
                mint()
            }
        });
        let size = match builtin {
            BuiltinClass::Boolean | BuiltinClass::SByte | BuiltinClass::Byte => 1,
            BuiltinClass::Char | BuiltinClass::Int16 | BuiltinClass::UInt16 => 2,
            BuiltinClass::Int32 | BuiltinClass::UInt32 | BuiltinClass::Single => 4,
            BuiltinClass::Int64 | BuiltinClass::UInt64 | BuiltinClass::Double => 8,
            BuiltinClass::String => std::mem::size_of::<usize>(),
        };
        state.element_sizes.insert(addr, size);
        ClassRef::from_raw(addr as *mut raw::MonoClass)
    }

    fn array_element_size(&self, class: ClassRef) -> usize {
        let state = self.state.lock().unwrap();
        state
            .element_sizes
            .get(&(class.as_ptr() as usize))
            .copied()
            .unwrap_or(0)
    }

    fn find_method(&self, descriptor: &str, _class: ClassRef) -> Option<MethodRef> {
        let mut state = self.state.lock().unwrap();
        let entry = state.methods.get_mut(descriptor)?;
        entry.lookups += 1;
        MethodRef::from_raw(entry.addr as *mut raw::MonoMethod)
    }

    fn invoke(
        &self,
        method: MethodRef,
        this: *mut c_void,
        args: &mut [*mut c_void],
    ) -> Result<Option<ObjectRef>, ObjectRef> {
        let mut state = self.state.lock().unwrap();
        let target = method.as_ptr() as usize;
        let behavior = state
            .methods
            .values()
            .find(|entry| entry.addr == target)
            .map(|entry| entry.behavior.clone());
        let Some(behavior) = behavior else {
            return Ok(None);
        };
        match behavior {
            MethodBehavior::CultureGetter => {
                if let Some(addr) = state.culture_object {
                    return Ok(ObjectRef::from_raw(addr as *mut raw::MonoObject));
                }
                let culture = Self::mint_object(&mut state, FakeObject::Culture);
                state.culture_object = Some(culture.as_ptr() as usize);
                Ok(Some(culture))
            }
            MethodBehavior::DecimalToString => {
                assert!(!this.is_null(), "value-type receiver must be non-null");
                // SAFETY: the caller passes a pointer to a MonoDecimal payload.
                let value = unsafe { ptr::read_unaligned(this as *const MonoDecimal) };
                let text = format_decimal(&value);
                Ok(Some(Self::mint_object(&mut state, FakeObject::Str(text))))
            }
            MethodBehavior::DecimalParse => {
                let text = args
                    .first()
                    .and_then(|arg| Self::object_at(&state, *arg as usize))
                    .and_then(|object| match object {
                        FakeObject::Str(text) => Some(text.clone()),
                        _ => None,
                    });
                match text.as_deref().and_then(parse_decimal) {
                    Some(value) => Ok(Some(Self::mint_object(
                        &mut state,
                        FakeObject::BoxedDecimal(value),
                    ))),
                    None => Err(Self::mint_object(
                        &mut state,
                        FakeObject::Exception(
                            "Input string was not in a correct format.".to_owned(),
                        ),
                    )),
                }
            }
            MethodBehavior::ReturnString(text) => {
                Ok(Some(Self::mint_object(&mut state, FakeObject::Str(text))))
            }
            MethodBehavior::Throw(message) => Err(Self::mint_object(
                &mut state,
                FakeObject::Exception(message),
            )),
            MethodBehavior::ReturnNull => Ok(None),
        }
    }

    fn object_class(&self, object: ObjectRef) -> ClassRef {
        let state = self.state.lock().unwrap();
        let addr = match Self::object_at(&state, object.as_ptr() as usize) {
            Some(FakeObject::Culture) => {
                Self::class_addr(&state, "System.Globalization", "CultureInfo").unwrap()
            }
            Some(FakeObject::Str(_)) => self.string_class,
            Some(FakeObject::BoxedDecimal(_)) => {
                Self::class_addr(&state, "System", "Decimal").unwrap()
            }
            Some(FakeObject::Exception(_)) => self.exception_class,
            Some(FakeObject::Plain) | None => self.plain_class,
        };
        ClassRef::from_raw(addr as *mut raw::MonoClass).unwrap()
    }

    fn object_to_string(&self, object: ObjectRef) -> Option<String> {
        let state = self.state.lock().unwrap();
        match Self::object_at(&state, object.as_ptr() as usize)? {
            FakeObject::Culture => Some("System.Globalization.CultureInfo".to_owned()),
            FakeObject::Str(text) => Some(text.clone()),
            FakeObject::BoxedDecimal(value) => Some(format_decimal(value)),
            FakeObject::Exception(message) => Some(message.clone()),
            FakeObject::Plain => Some("System.Object".to_owned()),
        }
    }

    fn unbox(&self, object: ObjectRef) -> *mut c_void {
        let state = self.state.lock().unwrap();
        match Self::object_at(&state, object.as_ptr() as usize) {
            Some(FakeObject::BoxedDecimal(value)) => {
                value as *const MonoDecimal as *mut c_void
            }
            _ => ptr::null_mut(),
        }
    }

    fn box_value(
        &self,
        _domain: DomainRef,
        class: ClassRef,
        value: *mut c_void,
    ) -> Option<ObjectRef> {
        let mut state = self.state.lock().unwrap();
        let decimal_class = Self::class_addr(&state, "System", "Decimal");
        if decimal_class == Some(class.as_ptr() as usize) && !value.is_null() {
            // SAFETY: the caller passes a pointer to a MonoDecimal payload.
            let value = unsafe { ptr::read_unaligned(value as *const MonoDecimal) };
            return Some(Self::mint_object(
                &mut state,
                FakeObject::BoxedDecimal(value),
            ));
        }
        Some(Self::mint_object(&mut state, FakeObject::Plain))
    }

    fn gchandle_new(&self, object: ObjectRef, _pinned: bool) -> u32 {
        let mut state = self.state.lock().unwrap();
        let handle = state.next_handle;
        state.next_handle += 1;
        state.handles.insert(handle, object.as_ptr() as usize);
        handle
    }

    fn gchandle_target(&self, handle: u32) -> Option<ObjectRef> {
        let state = self.state.lock().unwrap();
        let addr = *state.handles.get(&handle)?;
        ObjectRef::from_raw(addr as *mut raw::MonoObject)
    }

    fn gchandle_free(&self, handle: u32) {
        let mut state = self.state.lock().unwrap();
        assert!(
            state.handles.remove(&handle).is_some(),
            "handle {handle} freed twice or never created"
        );
        state.freed_handles.push(handle);
    }

    fn string_new(&self, _domain: DomainRef, value: &str) -> Option<StringRef> {
        let mut state = self.state.lock().unwrap();
        let object = Self::mint_object(&mut state, FakeObject::Str(value.to_owned()));
        Some(StringRef::from_object(object))
    }

    fn string_to_utf8(&self, value: StringRef) -> Option<String> {
        let state = self.state.lock().unwrap();
        match Self::object_at(&state, value.as_object().as_ptr() as usize)? {
            FakeObject::Str(text) => Some(text.clone()),
            _ => None,
        }
    }

    fn field_value_object(
        &self,
        _domain: DomainRef,
        _field: FieldRef,
        _object: ObjectRef,
    ) -> Option<ObjectRef> {
        None
    }

    fn field_set_value(&self, _object: ObjectRef, _field: FieldRef, _value: *mut c_void) {
        self.state.lock().unwrap().field_stores += 1;
    }

    fn field_set_static_value(&self, _vtable: VTableRef, _field: FieldRef, _value: *mut c_void) {
        self.state.lock().unwrap().field_stores += 1;
    }
}
