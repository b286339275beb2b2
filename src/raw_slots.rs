//! Fixed-length storage of uninitialized slots.
//!
//! [`RawSlots<T>`] owns exactly one heap allocation sized for `len` values of
//! `T` for its whole lifetime. It never grows, never shrinks, and never runs a
//! destructor for the values it holds: whoever owns the storage tracks which
//! indices are live and constructs or destroys them explicitly. For
//! [`HashTable`](crate::HashTable) that bookkeeping is the control-byte array,
//! so no second "is initialized" bitmap is needed here.

use alloc::alloc::alloc;
use alloc::alloc::dealloc;
use core::alloc::Layout;
use core::fmt::Debug;
use core::marker::PhantomData;
use core::mem::MaybeUninit;
use core::ptr::NonNull;

use crate::error::TryReserveError;
use crate::error::infallible;

/// A fixed-length, heap-allocated buffer of possibly-uninitialized `T`.
///
/// Indexing out of bounds is a contract violation and panics.
pub struct RawSlots<T> {
    ptr: NonNull<MaybeUninit<T>>,
    len: usize,
    _phantom: PhantomData<T>,
}

// SAFETY: `RawSlots` uniquely owns its allocation, so it is exactly as
// thread-safe as the values stored in it.
unsafe impl<T: Send> Send for RawSlots<T> {}
// SAFETY: Shared access only hands out `&MaybeUninit<T>`/`&T`.
unsafe impl<T: Sync> Sync for RawSlots<T> {}

impl<T> Debug for RawSlots<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RawSlots").field("len", &self.len).finish()
    }
}

impl<T> RawSlots<T> {
    /// Allocates storage for `len` slots, none of them initialized.
    ///
    /// Aborts through [`handle_alloc_error`](alloc::alloc::handle_alloc_error)
    /// if the allocator fails, and panics if `len` slots of `T` overflow a
    /// layout.
    pub fn new(len: usize) -> Self {
        infallible(Self::try_new(len))
    }

    /// Allocates storage for `len` slots, returning an error instead of
    /// aborting if the allocation cannot be made.
    pub fn try_new(len: usize) -> Result<Self, TryReserveError> {
        let layout = Layout::array::<T>(len).map_err(|_| TryReserveError::CapacityOverflow)?;

        let ptr = if layout.size() == 0 {
            NonNull::dangling()
        } else {
            // SAFETY: The layout has a non-zero size.
            let raw = unsafe { alloc(layout) };
            NonNull::new(raw.cast()).ok_or(TryReserveError::AllocError { layout })?
        };

        Ok(Self {
            ptr,
            len,
            _phantom: PhantomData,
        })
    }

    /// Returns the number of slots, initialized or not.
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the storage has no slots at all.
    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the raw slot at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= self.len()`.
    #[inline(always)]
    pub fn slot(&self, index: usize) -> &MaybeUninit<T> {
        assert!(index < self.len, "slot index {index} out of bounds ({})", self.len);
        // SAFETY: `index` is in bounds of the allocation.
        unsafe { self.ptr.add(index).as_ref() }
    }

    /// Returns the raw slot at `index` mutably.
    ///
    /// # Panics
    ///
    /// Panics if `index >= self.len()`.
    #[inline(always)]
    pub fn slot_mut(&mut self, index: usize) -> &mut MaybeUninit<T> {
        assert!(index < self.len, "slot index {index} out of bounds ({})", self.len);
        // SAFETY: `index` is in bounds of the allocation and we hold `&mut self`.
        unsafe { self.ptr.add(index).as_mut() }
    }

    /// Constructs `value` in the slot at `index` and returns a reference to it.
    ///
    /// # Safety
    ///
    /// The slot must not currently hold a live value, otherwise that value is
    /// leaked and the caller's liveness bookkeeping becomes wrong.
    #[inline(always)]
    pub unsafe fn write(&mut self, index: usize, value: T) -> &mut T {
        self.slot_mut(index).write(value)
    }

    /// Moves the value out of the slot at `index`, leaving it uninitialized.
    ///
    /// # Safety
    ///
    /// The slot must hold a live value, and the caller must treat the slot as
    /// uninitialized afterwards.
    #[inline(always)]
    pub unsafe fn read(&self, index: usize) -> T {
        // SAFETY: Caller guarantees the slot is initialized.
        unsafe { self.slot(index).assume_init_read() }
    }

    /// Returns a reference to the live value at `index`.
    ///
    /// # Safety
    ///
    /// The slot must hold a live value.
    #[inline(always)]
    pub unsafe fn get(&self, index: usize) -> &T {
        // SAFETY: Caller guarantees the slot is initialized.
        unsafe { self.slot(index).assume_init_ref() }
    }

    /// Returns a mutable reference to the live value at `index`.
    ///
    /// # Safety
    ///
    /// The slot must hold a live value.
    #[inline(always)]
    pub unsafe fn get_mut(&mut self, index: usize) -> &mut T {
        // SAFETY: Caller guarantees the slot is initialized.
        unsafe { self.slot_mut(index).assume_init_mut() }
    }

    /// Runs the destructor of the value at `index` in place.
    ///
    /// # Safety
    ///
    /// The slot must hold a live value, and the caller must treat the slot as
    /// uninitialized afterwards.
    #[inline(always)]
    pub unsafe fn drop_in_place(&mut self, index: usize) {
        // SAFETY: Caller guarantees the slot is initialized.
        unsafe { self.slot_mut(index).assume_init_drop() }
    }
}

impl<T> Drop for RawSlots<T> {
    fn drop(&mut self) {
        // Values are never dropped here; only the backing memory is released.
        if let Ok(layout) = Layout::array::<T>(self.len) {
            if layout.size() != 0 {
                // SAFETY: The pointer came from `alloc` with this exact layout.
                unsafe { dealloc(self.ptr.as_ptr().cast(), layout) };
            }
        }
    }
}
