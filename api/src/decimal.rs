//! Fixed-layout 128-bit decimal matching the managed `System.Decimal`
//! binary representation, used for bit-exact transport across the boundary.
//! The value is never computed on natively; conversion to and from text goes
//! through the managed runtime's culture-invariant `ToString`/`Parse`.

/// A managed decimal as it crosses the boundary: a sign, a scale in
/// `0..=28` (decimal digits right of the point), and a 96-bit magnitude
/// split into a high 32-bit and a low 64-bit field.
///
/// Field order follows the managed flags-word byte layout and is therefore
/// endian-sensitive; both orders are provided and selected at compile time.
#[cfg(target_endian = "little")]
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MonoDecimal {
    reserved: u16,
    scale: u8,
    sign: u8,
    hi: u32,
    lo: u64,
}

#[cfg(target_endian = "big")]
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MonoDecimal {
    sign: u8,
    scale: u8,
    reserved: u16,
    hi: u32,
    lo: u64,
}

const SIGN_BIT: u8 = 0x80;

/// Largest scale the managed decimal accepts.
pub const MAX_SCALE: u8 = 28;

impl MonoDecimal {
    pub fn new(negative: bool, scale: u8, hi: u32, lo: u64) -> Self {
        debug_assert!(scale <= MAX_SCALE, "decimal scale {scale} out of range");
        Self {
            reserved: 0,
            scale,
            sign: if negative { SIGN_BIT } else { 0 },
            hi,
            lo,
        }
    }

    pub fn is_negative(&self) -> bool {
        self.sign & SIGN_BIT != 0
    }

    pub fn scale(&self) -> u8 {
        self.scale
    }

    pub fn hi(&self) -> u32 {
        self.hi
    }

    pub fn lo(&self) -> u64 {
        self.lo
    }

    /// The unsigned 96-bit magnitude, before the scale divisor is applied.
    pub fn magnitude(&self) -> u128 {
        (u128::from(self.hi) << 64) | u128::from(self.lo)
    }
}
