//! Value codecs between managed representations and the native containers.
//!
//! Strings cross as [`MarshaledString`] (null state preserved), arrays as
//! [`MarshaledArray`], and `System.Decimal` as its fixed 16-byte layout
//! round-tripped through the managed runtime's own culture-invariant
//! `ToString`/`Parse` so no native reimplementation of decimal formatting
//! can drift from it.

use std::ptr;

use monobind_api::{ClassRef, MonoDecimal, StringRef};

use crate::buffers::{MarshaledArray, MarshaledString};
use crate::context::BindingContext;

/// Writes a managed string into `buffer`, reusing its storage. A managed
/// null becomes the null state; anything else replaces the previous content.
pub fn string_to_buffer(
    ctx: &BindingContext,
    buffer: &mut MarshaledString,
    value: Option<StringRef>,
) {
    let Some(value) = value else {
        buffer.set_null();
        return;
    };
    match ctx.runtime().string_to_utf8(value) {
        Some(text) => {
            buffer.truncate(0);
            buffer.append(&text);
        }
        None => buffer.set_null(),
    }
}

/// Creates a managed string from `buffer`. The null state crosses as a
/// managed null (`None`).
pub fn string_from_buffer(ctx: &BindingContext, buffer: &MarshaledString) -> Option<StringRef> {
    let text = buffer.as_str()?;
    let domain = ctx.domain()?;
    ctx.runtime().string_new(domain, text)
}

/// Renders a decimal through the managed `Decimal.ToString(IFormatProvider)`
/// under the invariant culture. Returns the null state if the lookup fails
/// or the managed call throws (already reported through the pipeline).
pub fn decimal_to_string(ctx: &BindingContext, value: MonoDecimal) -> MarshaledString {
    let mut out = MarshaledString::null();
    let (Some(method), Some(culture)) = (ctx.decimal_to_string_method(), ctx.invariant_culture())
    else {
        return out;
    };
    let Some(culture_object) = culture.target() else {
        return out;
    };

    let mut value = value;
    let mut args = [culture_object.as_arg()];
    // The receiver of a value-type method is a pointer to the payload.
    let rendered = ctx.invoke(method, (&mut value as *mut MonoDecimal).cast(), &mut args);
    string_to_buffer(ctx, &mut out, rendered.map(StringRef::from_object));
    out
}

/// Parses text through the managed `Decimal.Parse(string, IFormatProvider)`
/// under the invariant culture. `None` if the lookup fails or the managed
/// call throws (already reported through the pipeline).
pub fn string_to_decimal(ctx: &BindingContext, text: &str) -> Option<MonoDecimal> {
    let method = ctx.decimal_parse_method()?;
    let domain = ctx.domain()?;
    let managed_text = ctx.runtime().string_new(domain, text)?;
    let culture = ctx.invariant_culture()?;
    let culture_object = culture.target()?;

    let mut args = [managed_text.as_arg(), culture_object.as_arg()];
    let boxed = ctx.invoke(method, ptr::null_mut(), &mut args)?;
    let payload = ctx.runtime().unbox(boxed);
    if payload.is_null() {
        return None;
    }
    // SAFETY: a boxed System.Decimal carries exactly the 16-byte layout
    // MonoDecimal mirrors; the read is unaligned because the payload
    // pointer has no alignment guarantee.
    Some(unsafe { ptr::read_unaligned(payload as *const MonoDecimal) })
}

/// An empty array container sized for elements of the given managed class.
/// `None` if the runtime reports no element size for the class.
pub fn array_for_element_class(
    ctx: &BindingContext,
    element_class: ClassRef,
    zero_terminated: bool,
    clear_on_grow: bool,
) -> Option<MarshaledArray> {
    let size = ctx.runtime().array_element_size(element_class);
    if size == 0 {
        return None;
    }
    Some(MarshaledArray::new(zero_terminated, clear_on_grow, size))
}
