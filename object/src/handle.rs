use crate::{Header, Value};
use core::marker::PhantomData;

/// A typed tagged value.
///
/// The underlying bits are the same as [`Value`] but `T` indicates the
/// expected heap type for reference values. Dereferencing is unsafe, the
/// caller must guarantee the value actually points to a valid `T`.
#[repr(transparent)]
pub struct Tagged<T> {
    value: Value,
    _marker: PhantomData<*const T>,
}

impl<T> Tagged<T> {
    #[inline(always)]
    pub fn from_value(value: Value) -> Self {
        Self { value, _marker: PhantomData }
    }

    #[inline(always)]
    pub fn from_ptr(ptr: *const T) -> Self {
        Self::from_value(Value::from_ptr(ptr))
    }

    #[inline(always)]
    pub fn value(self) -> Value {
        self.value
    }

    #[inline(always)]
    pub fn is_ref(self) -> bool {
        self.value.is_ref()
    }

    #[inline(always)]
    pub fn as_ptr(self) -> *mut T {
        self.value.ref_bits() as *mut T
    }

    /// The header every heap object starts with.
    ///
    /// # Safety
    ///
    /// The value must reference a live heap object.
    #[inline(always)]
    pub unsafe fn header(&self) -> &Header {
        // SAFETY: guaranteed by caller, every object starts with a header
        unsafe { self.value.as_ref::<Header>() }
    }

    /// Dereference as a shared reference to `T`.
    ///
    /// # Safety
    ///
    /// The value must be a reference to a valid, live `T`.
    #[inline(always)]
    pub unsafe fn as_ref(&self) -> &T {
        // SAFETY: guaranteed by caller
        unsafe { self.value.as_ref() }
    }

    /// Dereference as a mutable reference to `T`.
    ///
    /// # Safety
    ///
    /// The value must be a reference to a valid, live `T`, and no other
    /// references to it may exist.
    #[inline(always)]
    pub unsafe fn as_mut(&mut self) -> &mut T {
        // SAFETY: guaranteed by caller
        unsafe { self.value.as_mut() }
    }
}

// Manual impls: derives would demand the same traits of `T`.
impl<T> Clone for Tagged<T> {
    #[inline(always)]
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Tagged<T> {}

impl<T> PartialEq for Tagged<T> {
    #[inline(always)]
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl<T> Eq for Tagged<T> {}

impl<T> core::fmt::Debug for Tagged<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Tagged({:?})", self.value)
    }
}

impl<T> From<Value> for Tagged<T> {
    fn from(value: Value) -> Self {
        Self::from_value(value)
    }
}

impl<T> From<Tagged<T>> for Value {
    fn from(handle: Tagged<T>) -> Self {
        handle.value
    }
}
