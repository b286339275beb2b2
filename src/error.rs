use core::alloc::Layout;

/// The error type for the fallible allocation paths of
/// [`HashTable`](crate::HashTable) and [`HashMap`](crate::HashMap).
///
/// Returned by `try_with_capacity`, `try_reserve`, `try_entry` and
/// `try_insert`. When one of these fails the table is left exactly as it was
/// before the call.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum TryReserveError {
    /// The requested slot count does not fit in a valid allocation layout.
    #[error("capacity overflow")]
    CapacityOverflow,

    /// The allocator returned an error for the given layout.
    #[error("memory allocation of {} bytes failed", .layout.size())]
    AllocError {
        /// The layout that could not be allocated.
        layout: Layout,
    },
}

/// Unwraps the result of a fallible allocation, aborting on allocator failure
/// and panicking on layout overflow.
#[inline]
pub(crate) fn infallible<R>(result: Result<R, TryReserveError>) -> R {
    match result {
        Ok(value) => value,
        Err(TryReserveError::AllocError { layout }) => alloc::alloc::handle_alloc_error(layout),
        Err(TryReserveError::CapacityOverflow) => panic!("capacity overflow"),
    }
}
