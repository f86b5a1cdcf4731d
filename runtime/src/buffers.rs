//! Container primitives backing all marshaling.
//!
//! [`MarshaledString`] and [`MarshaledArray`] are the native-side shapes for
//! string- and array-typed values crossing the boundary. Generated binding
//! code depends on their exact semantics: a null string state distinct from
//! empty, an optional zero-terminated array mode, order-preserving versus
//! swap-with-last removal, and free-versus-detach disposal.
//!
//! Misuse (out-of-range indices, byte counts that are not whole elements) is
//! a bug in the caller and panics; it is never routed through the error
//! pipeline.

use std::ptr;
use std::slice;

const STRING_GROWTH_PAD: usize = 16;
const ARRAY_CAPACITY_BLOCK: usize = 64;

/// Growable character buffer with an explicit null state.
///
/// A managed null string marshals to the null state (no buffer); an empty
/// managed string marshals to an empty buffer. The two are distinguishable
/// through [`MarshaledString::is_null`] and callers must preserve the
/// distinction. Mutating a null buffer first revives it to empty, which is
/// how out/ref-parameter storage gets reused across repeated calls.
#[derive(Debug, Default)]
pub struct MarshaledString {
    buf: Option<String>,
}

impl MarshaledString {
    /// An empty (non-null) buffer.
    pub fn new() -> Self {
        Self {
            buf: Some(String::with_capacity(STRING_GROWTH_PAD)),
        }
    }

    /// The null state.
    pub fn null() -> Self {
        Self { buf: None }
    }

    pub fn is_null(&self) -> bool {
        self.buf.is_none()
    }

    pub fn len(&self) -> usize {
        self.buf.as_ref().map_or(0, String::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Allocated capacity in bytes; at least `len + 1` whenever a buffer is
    /// present, leaving room for an implicit terminator.
    pub fn capacity(&self) -> usize {
        self.buf.as_ref().map_or(0, String::capacity)
    }

    /// `None` in the null state, `Some("")` for an empty buffer.
    pub fn as_str(&self) -> Option<&str> {
        self.buf.as_deref()
    }

    /// Drops the buffer, entering the null state.
    pub fn set_null(&mut self) {
        self.buf = None;
    }

    pub fn append(&mut self, s: &str) {
        self.grow_for(s.len()).push_str(s);
    }

    pub fn append_char(&mut self, c: char) {
        self.grow_for(c.len_utf8()).push(c);
    }

    pub fn prepend(&mut self, s: &str) {
        self.insert(0, s);
    }

    /// Inserts at a byte position, which must lie on a character boundary.
    pub fn insert(&mut self, pos: usize, s: &str) {
        let len = self.len();
        assert!(pos <= len, "insert position {pos} beyond length {len}");
        self.grow_for(s.len()).insert_str(pos, s);
    }

    /// Shortens the buffer to `len` bytes. Panics if `len` exceeds the
    /// current length.
    pub fn truncate(&mut self, len: usize) {
        let buf = self.revive();
        assert!(
            len <= buf.len(),
            "truncate length {len} beyond length {}",
            buf.len()
        );
        buf.truncate(len);
    }

    /// Removes `len` bytes starting at byte position `pos`.
    pub fn erase(&mut self, pos: usize, len: usize) {
        let buf = self.revive();
        assert!(
            pos + len <= buf.len(),
            "erase range {pos}..{} beyond length {}",
            pos + len,
            buf.len()
        );
        buf.drain(pos..pos + len);
    }

    /// Resizes to exactly `len` bytes, zero-filling any growth.
    pub fn set_size(&mut self, len: usize) {
        let current = self.len();
        if len > current {
            self.grow_for(len - current);
        }
        let buf = self.revive();
        if len <= buf.len() {
            buf.truncate(len);
        } else {
            while buf.len() < len {
                buf.push('\0');
            }
        }
    }

    /// Consumes the buffer. With `free_segment` the storage is released and
    /// `None` is returned; otherwise ownership of the segment transfers out.
    pub fn into_string(self, free_segment: bool) -> Option<String> {
        if free_segment {
            None
        } else {
            self.buf
        }
    }

    fn revive(&mut self) -> &mut String {
        self.buf
            .get_or_insert_with(|| String::with_capacity(STRING_GROWTH_PAD))
    }

    /// Doubling growth keyed off current capacity, always leaving one spare
    /// byte past the new length.
    fn grow_for(&mut self, added: usize) -> &mut String {
        let buf = self.revive();
        let needed = buf.len() + added + 1;
        if needed > buf.capacity() {
            let target = (buf.capacity() + added + STRING_GROWTH_PAD) * 2;
            buf.reserve(target.max(needed) - buf.len());
        }
        buf
    }
}

impl From<&str> for MarshaledString {
    fn from(s: &str) -> Self {
        let mut buf = Self::new();
        buf.append(s);
        buf
    }
}

/// Growable array of fixed-size elements, the uniform shape for all
/// array-typed values crossing the boundary.
///
/// `length * element_size` bytes are valid and contiguous. In
/// zero-terminated mode one extra zeroed element always follows the last
/// element without being counted in the length, mirroring how string-like
/// data is handed to the managed side.
#[derive(Debug)]
pub struct MarshaledArray {
    data: Vec<u8>,
    len: usize,
    element_size: usize,
    zero_terminated: bool,
    clear_on_grow: bool,
}

impl MarshaledArray {
    /// New elements exposed by growth are always zeroed; `clear_on_grow` is
    /// retained as declarative intent for generated callers.
    pub fn new(zero_terminated: bool, clear_on_grow: bool, element_size: usize) -> Self {
        assert!(element_size > 0, "element size must be non-zero");
        let mut array = Self {
            data: Vec::new(),
            len: 0,
            element_size,
            zero_terminated,
            clear_on_grow,
        };
        array.write_terminator();
        array
    }

    pub fn with_capacity(
        zero_terminated: bool,
        clear_on_grow: bool,
        element_size: usize,
        reserved: usize,
    ) -> Self {
        let mut array = Self::new(zero_terminated, clear_on_grow, element_size);
        array.ensure_capacity(reserved);
        array
    }

    /// Takes ownership of an existing byte segment without copying. The
    /// length must be a whole number of elements.
    pub fn from_bytes(bytes: Vec<u8>, element_size: usize, zero_terminated: bool) -> Self {
        assert!(element_size > 0, "element size must be non-zero");
        assert!(
            bytes.len() % element_size == 0,
            "{} bytes is not a whole number of {}-byte elements",
            bytes.len(),
            element_size
        );
        let len = bytes.len() / element_size;
        let mut array = Self {
            data: bytes,
            len,
            element_size,
            zero_terminated,
            clear_on_grow: false,
        };
        array.write_terminator();
        array
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn element_size(&self) -> usize {
        self.element_size
    }

    pub fn is_zero_terminated(&self) -> bool {
        self.zero_terminated
    }

    pub fn clears_on_grow(&self) -> bool {
        self.clear_on_grow
    }

    /// Reserved element capacity, rounded up in blocks of 64.
    pub fn capacity(&self) -> usize {
        self.data.capacity() / self.element_size
    }

    /// The `length * element_size` payload bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.len * self.element_size]
    }

    /// Payload bytes plus the trailing zeroed element, when zero-terminated.
    pub fn raw_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn append_bytes(&mut self, bytes: &[u8]) {
        let added = self.whole_elements(bytes.len());
        self.ensure_capacity(self.len + added);
        self.data.truncate(self.len * self.element_size);
        self.data.extend_from_slice(bytes);
        self.len += added;
        self.write_terminator();
    }

    pub fn append_value<T: Copy>(&mut self, value: T) {
        self.assert_element_type::<T>();
        // SAFETY: reading size_of::<T>() bytes from a live T.
        let bytes = unsafe {
            slice::from_raw_parts(&value as *const T as *const u8, std::mem::size_of::<T>())
        };
        self.append_bytes(bytes);
    }

    /// Order-preserving insertion before element `index`.
    pub fn insert_bytes(&mut self, index: usize, bytes: &[u8]) {
        assert!(
            index <= self.len,
            "insert index {index} beyond length {}",
            self.len
        );
        let added = self.whole_elements(bytes.len());
        self.ensure_capacity(self.len + added);
        self.data.truncate(self.len * self.element_size);
        let at = index * self.element_size;
        self.data.splice(at..at, bytes.iter().copied());
        self.len += added;
        self.write_terminator();
    }

    /// Order-preserving removal: later elements shift down.
    pub fn remove_index(&mut self, index: usize) {
        assert!(
            index < self.len,
            "remove index {index} beyond length {}",
            self.len
        );
        self.data.truncate(self.len * self.element_size);
        let at = index * self.element_size;
        self.data.drain(at..at + self.element_size);
        self.len -= 1;
        self.write_terminator();
    }

    /// Removal that swaps the last element into the hole instead of
    /// shifting; constant time, does not preserve order.
    pub fn remove_index_fast(&mut self, index: usize) {
        assert!(
            index < self.len,
            "remove index {index} beyond length {}",
            self.len
        );
        self.data.truncate(self.len * self.element_size);
        let last = (self.len - 1) * self.element_size;
        let at = index * self.element_size;
        if at != last {
            self.data.copy_within(last..last + self.element_size, at);
        }
        self.data.truncate(last);
        self.len -= 1;
        self.write_terminator();
    }

    /// Resizes to exactly `len` elements, zero-filling any growth.
    pub fn set_size(&mut self, len: usize) {
        self.ensure_capacity(len);
        self.data.truncate(self.len.min(len) * self.element_size);
        self.data.resize(len * self.element_size, 0);
        self.len = len;
        self.write_terminator();
    }

    /// Unaligned read of element `index` as `T`.
    pub fn value_at<T: Copy>(&self, index: usize) -> T {
        self.assert_element_type::<T>();
        assert!(
            index < self.len,
            "index {index} beyond length {}",
            self.len
        );
        // SAFETY: index bounds and element size were just checked; the read
        // is unaligned because the backing store is byte-granular.
        unsafe { ptr::read_unaligned(self.data.as_ptr().add(index * self.element_size) as *const T) }
    }

    /// Consumes the array. With `free_segment` the storage is released and
    /// `None` is returned; otherwise ownership of the segment (including any
    /// terminator element) transfers out.
    pub fn into_bytes(self, free_segment: bool) -> Option<Vec<u8>> {
        if free_segment {
            None
        } else {
            Some(self.data)
        }
    }

    fn assert_element_type<T>(&self) {
        assert_eq!(
            std::mem::size_of::<T>(),
            self.element_size,
            "element type size does not match the array element size"
        );
    }

    fn whole_elements(&self, byte_len: usize) -> usize {
        assert!(
            byte_len % self.element_size == 0,
            "{byte_len} bytes is not a whole number of {}-byte elements",
            self.element_size
        );
        byte_len / self.element_size
    }

    fn ensure_capacity(&mut self, elements: usize) {
        let want = elements + usize::from(self.zero_terminated);
        let rounded = (want + ARRAY_CAPACITY_BLOCK - 1) & !(ARRAY_CAPACITY_BLOCK - 1);
        let bytes = rounded * self.element_size;
        if bytes > self.data.capacity() {
            self.data.reserve_exact(bytes - self.data.len());
        }
    }

    fn write_terminator(&mut self) {
        debug_assert_eq!(self.data.len(), self.len * self.element_size);
        if self.zero_terminated {
            self.data.resize(self.data.len() + self.element_size, 0);
        }
    }
}
