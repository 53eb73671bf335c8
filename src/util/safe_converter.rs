//! Numeric conversions that are lossless on every platform this crate targets, so that call
//!  sites do not need `as` casts or fallible conversions.

pub trait SafeCast<T> {
    fn safe_cast(self) -> T;
}

#[cfg(not(target_pointer_width = "16"))]
impl SafeCast<usize> for u32 {
    fn safe_cast(self) -> usize {
        self as usize
    }
}

#[cfg(any(target_pointer_width = "32", target_pointer_width = "64"))]
impl SafeCast<u64> for usize {
    fn safe_cast(self) -> u64 {
        self as u64
    }
}

impl SafeCast<u64> for u32 {
    fn safe_cast(self) -> u64 {
        self.into()
    }
}
