//! Opaque runtime types, declared only so reference newtypes and symbol
//! signatures can be pointer-typed. Never dereferenced on this side.

macro_rules! opaque {
    ($($name:ident),+ $(,)?) => {$(
        #[repr(C)]
        pub struct $name {
            _private: [u8; 0],
        }
    )+};
}

opaque! {
    MonoDomain,
    MonoAssembly,
    MonoImage,
    MonoClass,
    MonoClassField,
    MonoVTable,
    MonoMethod,
    MonoMethodDesc,
    MonoObject,
    MonoString,
}
