use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt::Debug;
use core::iter::FusedIterator;
use core::sync::atomic::AtomicU32;
use core::sync::atomic::Ordering;

use crate::error::TryReserveError;
use crate::error::infallible;
use crate::raw_slots::RawSlots;

/// Capacity used by [`HashTable::new`] and as the floor for growth.
pub const DEFAULT_INITIAL_CAPACITY: usize = 16;

/// The table grows once `(len + 1) / capacity` reaches 7/8. Kept as a
/// fraction so the check stays in integer math.
const MAX_LOAD_NUMERATOR: usize = 7;
const MAX_LOAD_DENOMINATOR: usize = 8;

/// Control byte of a slot that has not held a value since the last rebuild
/// or clear. Lookups stop here.
const EMPTY: u8 = 0b1000_0000;

/// Control byte of a slot whose value was removed. Lookups continue past it,
/// inserts may reuse it.
const DELETED: u8 = 0b1111_1111;

/// A control byte is free (empty or deleted) iff its high bit is set. Every
/// fingerprint fits in the low seven bits.
#[inline(always)]
fn is_free(ctrl: u8) -> bool {
    ctrl & 0x80 != 0
}

/// Selects the home slot.
#[inline(always)]
fn h1(hash: u64) -> usize {
    (hash >> 7) as usize
}

/// The 7-bit fingerprint cached in the control byte of an occupied slot.
#[inline(always)]
fn h2(hash: u64) -> u8 {
    (hash & 0x7F) as u8
}

/// Hands out a unique table generation. Every freshly built or reset table
/// takes the next one.
fn next_generation() -> u32 {
    static GENERATION_COUNTER: AtomicU32 = AtomicU32::new(0);
    GENERATION_COUNTER.fetch_add(1, Ordering::Relaxed)
}

#[inline(always)]
fn next_index(index: usize, capacity: usize) -> usize {
    let next = index + 1;
    if next == capacity { 0 } else { next }
}

/// A cheap reference to a slot of one specific table generation.
///
/// Handles are plain slot indices tagged with the generation of the table
/// that issued them. Generations are unique across every table in the
/// process, so a handle is only ever accepted by the table that issued it.
/// Any operation that rebuilds or resets the table (growth, tombstone
/// rehash, [`reserve`], [`clear`], [`drain`], [`take`]) starts a new
/// generation, and using an older handle afterwards panics, as does using a
/// handle on a different table.
///
/// A handle whose entry has been removed without a rebuild resolves to
/// "absent". If a later insert reuses that slot, the handle refers to the new
/// entry.
///
/// [`reserve`]: HashTable::reserve
/// [`clear`]: HashTable::clear
/// [`drain`]: HashTable::drain
/// [`take`]: HashTable::take
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Handle {
    index: usize,
    generation: u32,
}

impl Handle {
    /// Returns the slot index this handle points at.
    pub fn index(&self) -> usize {
        self.index
    }
}

enum InsertSlot {
    Found(usize),
    Vacant(usize),
}

/// An open-addressing hash table with SwissTable-style control bytes.
///
/// `HashTable<T>` stores values of type `T` in a fixed-capacity block of
/// [`RawSlots`], alongside one control byte per slot that is either empty,
/// deleted (a tombstone), or occupied with a 7-bit fingerprint of the stored
/// value's hash. Collisions are resolved by linear probing.
///
/// Like hashbrown's raw table, the caller supplies the hash and an equality
/// predicate for every operation, plus a `hasher` for any operation that may
/// rebuild the table and therefore needs to re-hash stored values.
///
/// Two policies keep probe sequences short:
///
/// - **Growth**: an insert that would bring the load factor to 7/8 (or fill
///   the table) first rebuilds into a table of twice the capacity.
/// - **Tombstone rehash**: a removal that leaves at least half as many
///   tombstones as live values rebuilds into a fresh table of the same
///   capacity, dropping every tombstone.
///
/// ## Example
///
/// ```rust
/// # use core::hash::Hash;
/// # use core::hash::Hasher;
/// #
/// # use probe_map::hash_table::Entry;
/// # use probe_map::hash_table::HashTable;
/// # use siphasher::sip::SipHasher;
/// #
/// # fn hash_u64(n: u64) -> u64 {
/// #     let mut hasher = SipHasher::new();
/// #     n.hash(&mut hasher);
/// #     hasher.finish()
/// # }
/// let mut table: HashTable<u64> = HashTable::new();
/// let hasher = |&v: &u64| hash_u64(v);
///
/// match table.entry(hash_u64(7), |&v| v == 7, hasher) {
///     Entry::Vacant(entry) => {
///         entry.insert(7);
///     }
///     Entry::Occupied(_) => unreachable!(),
/// }
///
/// assert_eq!(table.find_ref(hash_u64(7), |&v| v == 7), Some(&7));
/// assert_eq!(table.remove(hash_u64(7), |&v| v == 7, hasher), Some(7));
/// assert!(table.is_empty());
/// ```
pub struct HashTable<T> {
    ctrl: Vec<u8>,
    slots: RawSlots<T>,

    populated: usize,
    deleted: usize,
    generation: u32,
}

impl<T> Debug for HashTable<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HashTable")
            .field(
                "ctrl",
                &self
                    .ctrl
                    .chunks(16)
                    .map(|w| {
                        w.iter()
                            .map(|&b| match b {
                                EMPTY => String::from(".."),
                                DELETED => String::from("xx"),
                                tag => format!("{tag:02x}"),
                            })
                            .collect::<Vec<_>>()
                            .join(", ")
                    })
                    .collect::<Vec<_>>(),
            )
            .field("populated", &self.populated)
            .field("tombstones", &self.deleted)
            .field("capacity", &self.capacity())
            .field("generation", &self.generation)
            .finish()
    }
}

impl<T> Clone for HashTable<T>
where
    T: Clone,
{
    fn clone(&self) -> Self {
        let mut new_table = Self::with_capacity(self.capacity());

        for (index, &ctrl) in self.ctrl.iter().enumerate() {
            if !is_free(ctrl) {
                // SAFETY: An occupied control byte means the source slot is live,
                // and the destination slot at the same index is still free.
                unsafe {
                    let value = self.slots.get(index).clone();
                    new_table.slots.write(index, value);
                }
                new_table.populated += 1;
            }
            // The control byte is set only after the slot is written, so a
            // panicking `clone` never leaves a half-initialized slot marked live.
            new_table.ctrl[index] = ctrl;
        }
        new_table.deleted = self.deleted;

        debug_assert_eq!(new_table.populated, self.populated);
        new_table
    }
}

impl<T> Drop for HashTable<T> {
    fn drop(&mut self) {
        if core::mem::needs_drop::<T>() {
            for index in 0..self.ctrl.len() {
                if !is_free(self.ctrl[index]) {
                    // SAFETY: An occupied control byte means the slot is live.
                    unsafe { self.slots.drop_in_place(index) };
                }
            }
        }
    }
}

impl<T> Default for HashTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// A half-built rebuild target whose slots are shallow copies of values
/// still owned by the source table. Dropping it forgets those copies.
struct RebuildGuard<T> {
    sibling: HashTable<T>,
}

impl<T> Drop for RebuildGuard<T> {
    fn drop(&mut self) {
        self.sibling.ctrl.fill(EMPTY);
        self.sibling.populated = 0;
    }
}

impl<T> HashTable<T> {
    /// Creates a table with [`DEFAULT_INITIAL_CAPACITY`] slots.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_INITIAL_CAPACITY)
    }

    /// Creates a table with exactly `capacity` slots.
    ///
    /// A capacity of zero allocates nothing; the first insert allocates
    /// [`DEFAULT_INITIAL_CAPACITY`] slots.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use probe_map::hash_table::HashTable;
    /// #
    /// let table: HashTable<String> = HashTable::with_capacity(100);
    /// assert_eq!(table.capacity(), 100);
    /// ```
    pub fn with_capacity(capacity: usize) -> Self {
        infallible(Self::try_with_capacity(capacity))
    }

    /// Creates a table with exactly `capacity` slots, returning an error if
    /// the storage cannot be allocated.
    pub fn try_with_capacity(capacity: usize) -> Result<Self, TryReserveError> {
        let slots = RawSlots::try_new(capacity)?;

        let mut ctrl = Vec::new();
        ctrl.try_reserve_exact(capacity).map_err(|_| {
            match core::alloc::Layout::array::<u8>(capacity) {
                Ok(layout) => TryReserveError::AllocError { layout },
                Err(_) => TryReserveError::CapacityOverflow,
            }
        })?;
        ctrl.resize(capacity, EMPTY);

        Ok(Self {
            ctrl,
            slots,
            populated: 0,
            deleted: 0,
            generation: next_generation(),
        })
    }

    /// Returns the number of values in the table.
    pub fn len(&self) -> usize {
        self.populated
    }

    /// Returns `true` if the table contains no values.
    pub fn is_empty(&self) -> bool {
        self.populated == 0
    }

    /// Returns the number of slots in the table.
    ///
    /// Unlike many hash tables this is the raw slot count, not the number of
    /// values the table holds before growing; growth happens once the load
    /// factor reaches 7/8.
    pub fn capacity(&self) -> usize {
        self.ctrl.len()
    }

    /// Returns the number of tombstones left behind by removals since the
    /// last rebuild.
    pub fn tombstones(&self) -> usize {
        self.deleted
    }

    /// Finds a value by hash and equality predicate and returns a handle to
    /// its slot.
    ///
    /// Probing walks forward from the home slot, skipping tombstones, until
    /// it finds a match or an empty slot.
    #[inline]
    pub fn find(&self, hash: u64, eq: impl Fn(&T) -> bool) -> Option<Handle> {
        self.probe_lookup(hash, eq).map(|index| self.handle_at(index))
    }

    /// Finds a value by hash and equality predicate.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use core::hash::Hash;
    /// # use core::hash::Hasher;
    /// #
    /// # use probe_map::hash_table::HashTable;
    /// # use siphasher::sip::SipHasher;
    /// #
    /// # fn hash_u64(n: u64) -> u64 {
    /// #     let mut hasher = SipHasher::new();
    /// #     n.hash(&mut hasher);
    /// #     hasher.finish()
    /// # }
    /// let mut table: HashTable<u64> = HashTable::new();
    /// table
    ///     .entry(hash_u64(42), |&n| n == 42, |&n| hash_u64(n))
    ///     .or_insert(42);
    ///
    /// assert_eq!(table.find_ref(hash_u64(42), |&n| n == 42), Some(&42));
    /// assert_eq!(table.find_ref(hash_u64(99), |&n| n == 99), None);
    /// ```
    #[inline]
    pub fn find_ref(&self, hash: u64, eq: impl Fn(&T) -> bool) -> Option<&T> {
        let index = self.probe_lookup(hash, eq)?;
        // SAFETY: `probe_lookup` only returns occupied slots.
        Some(unsafe { self.slots.get(index) })
    }

    /// Finds a value by hash and equality predicate, returning a mutable
    /// reference.
    ///
    /// The caller must not change the parts of the value that feed its hash.
    #[inline]
    pub fn find_mut(&mut self, hash: u64, eq: impl Fn(&T) -> bool) -> Option<&mut T> {
        let index = self.probe_lookup(hash, eq)?;
        // SAFETY: `probe_lookup` only returns occupied slots.
        Some(unsafe { self.slots.get_mut(index) })
    }

    /// Returns the value behind `handle`, or `None` if it has been removed.
    ///
    /// # Panics
    ///
    /// Panics if `handle` was issued by another table or by an older
    /// generation of this one.
    pub fn get(&self, handle: Handle) -> Option<&T> {
        let index = self.check_handle(handle);
        if is_free(self.ctrl[index]) {
            return None;
        }
        // SAFETY: The control byte says the slot is live.
        Some(unsafe { self.slots.get(index) })
    }

    /// Returns the value behind `handle` mutably, or `None` if it has been
    /// removed.
    ///
    /// # Panics
    ///
    /// Panics if `handle` was issued by another table or by an older
    /// generation of this one.
    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut T> {
        let index = self.check_handle(handle);
        if is_free(self.ctrl[index]) {
            return None;
        }
        // SAFETY: The control byte says the slot is live.
        Some(unsafe { self.slots.get_mut(index) })
    }

    /// Gets an entry for the given hash and equality predicate.
    ///
    /// If the table is at its load ceiling it is grown first, even when the
    /// value turns out to be present. `hasher` must produce the same hash for
    /// a stored value as the caller passes in `hash` when looking it up.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use core::hash::Hash;
    /// # use core::hash::Hasher;
    /// #
    /// # use probe_map::hash_table::Entry;
    /// # use probe_map::hash_table::HashTable;
    /// # use siphasher::sip::SipHasher;
    /// #
    /// # fn hash_str(s: &str) -> u64 {
    /// #     let mut hasher = SipHasher::new();
    /// #     s.hash(&mut hasher);
    /// #     hasher.finish()
    /// # }
    /// let mut table: HashTable<String> = HashTable::new();
    /// let hasher = |s: &String| hash_str(s);
    ///
    /// let first = table
    ///     .entry(hash_str("hello"), |s| s == "hello", hasher)
    ///     .or_insert("hello".to_string());
    /// first.push_str(", world");
    ///
    /// match table.entry(hash_str("hello"), |s| s.starts_with("hello"), hasher) {
    ///     Entry::Occupied(entry) => assert_eq!(entry.get(), "hello, world"),
    ///     Entry::Vacant(_) => unreachable!(),
    /// }
    /// ```
    #[inline]
    pub fn entry(
        &mut self,
        hash: u64,
        eq: impl Fn(&T) -> bool,
        hasher: impl Fn(&T) -> u64,
    ) -> Entry<'_, T> {
        infallible(self.reserve_for_insert(hasher));
        self.entry_impl(hash, eq)
    }

    /// Gets an entry like [`entry`](Self::entry), returning an error instead
    /// of aborting if the table needs to grow and the allocation fails.
    #[inline]
    pub fn try_entry(
        &mut self,
        hash: u64,
        eq: impl Fn(&T) -> bool,
        hasher: impl Fn(&T) -> u64,
    ) -> Result<Entry<'_, T>, TryReserveError> {
        self.reserve_for_insert(hasher)?;
        Ok(self.entry_impl(hash, eq))
    }

    /// Removes and returns a value from the table.
    ///
    /// The slot becomes a tombstone. If tombstones now number at least half
    /// of the remaining values, the table is rehashed in place (same
    /// capacity, new generation).
    pub fn remove(
        &mut self,
        hash: u64,
        eq: impl Fn(&T) -> bool,
        hasher: impl Fn(&T) -> u64,
    ) -> Option<T> {
        let index = self.probe_lookup(hash, eq)?;
        Some(self.take_at(index, hasher))
    }

    /// Removes and returns the value behind `handle`, or `None` if it has
    /// already been removed.
    ///
    /// # Panics
    ///
    /// Panics if `handle` was issued by another table or by an older
    /// generation of this one.
    pub fn remove_handle(&mut self, handle: Handle, hasher: impl Fn(&T) -> u64) -> Option<T> {
        let index = self.check_handle(handle);
        if is_free(self.ctrl[index]) {
            return None;
        }
        Some(self.take_at(index, hasher))
    }

    /// Removes all values, keeping the allocated capacity.
    ///
    /// Every control byte is reset to empty, so tombstones are dropped too.
    pub fn clear(&mut self) {
        let live = self.populated;
        self.populated = 0;
        self.deleted = 0;
        self.generation = next_generation();

        for index in 0..self.ctrl.len() {
            let ctrl = core::mem::replace(&mut self.ctrl[index], EMPTY);
            if !is_free(ctrl) {
                // SAFETY: The slot was live and is now marked empty, so it is
                // dropped exactly once.
                unsafe { self.slots.drop_in_place(index) };
            }
        }

        log::trace!("cleared {live} values, capacity {}", self.capacity());
    }

    /// Grows the table to at least `capacity` slots.
    ///
    /// Does nothing if the table already has that many slots. Unlike
    /// [`Vec::reserve`], `capacity` is the total slot count, not an additional
    /// amount.
    pub fn reserve(&mut self, capacity: usize, hasher: impl Fn(&T) -> u64) {
        infallible(self.try_reserve(capacity, hasher));
    }

    /// Grows the table to at least `capacity` slots, returning an error if the
    /// allocation fails. The table is unchanged on error.
    pub fn try_reserve(
        &mut self,
        capacity: usize,
        hasher: impl Fn(&T) -> u64,
    ) -> Result<(), TryReserveError> {
        if capacity <= self.capacity() {
            return Ok(());
        }

        log::trace!("reserving {} -> {capacity} slots", self.capacity());
        self.try_rebuild(capacity, hasher)
    }

    /// Moves the contents out into a new table, leaving this one empty with
    /// zero capacity.
    ///
    /// The emptied table stays fully usable and allocates again on the next
    /// insert. Handles issued before the call are only valid for the
    /// returned table.
    pub fn take(&mut self) -> Self {
        core::mem::replace(self, Self::with_capacity(0))
    }

    /// Returns an iterator over all values in slot order.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            table: self,
            index: 0,
            remaining: self.populated,
        }
    }

    /// Returns an iterator over mutable references to all values in slot
    /// order.
    pub fn iter_mut(&mut self) -> IterMut<'_, T> {
        IterMut {
            ctrl: &self.ctrl,
            slots: &mut self.slots,
            index: 0,
            remaining: self.populated,
        }
    }

    /// Returns an iterator that removes and yields all values in slot order.
    ///
    /// The table keeps its capacity. When the iterator is dropped, any values
    /// not yet yielded are dropped and all tombstones are cleared.
    pub fn drain(&mut self) -> Drain<'_, T> {
        Drain {
            table: self,
            index: 0,
        }
    }

    #[inline(always)]
    fn handle_at(&self, index: usize) -> Handle {
        Handle {
            index,
            generation: self.generation,
        }
    }

    #[inline]
    fn check_handle(&self, handle: Handle) -> usize {
        assert_eq!(
            handle.generation, self.generation,
            "handle from a different table generation"
        );
        assert!(
            handle.index < self.capacity(),
            "handle index {} out of bounds ({})",
            handle.index,
            self.capacity()
        );
        handle.index
    }

    /// Find-for-lookup: stops at an empty slot (absent) or a slot whose
    /// fingerprint and value both match.
    #[inline]
    fn probe_lookup(&self, hash: u64, eq: impl Fn(&T) -> bool) -> Option<usize> {
        if self.populated == 0 {
            return None;
        }

        let capacity = self.capacity();
        let tag = h2(hash);
        let mut index = h1(hash) % capacity;
        for _ in 0..capacity {
            let ctrl = self.ctrl[index];
            if ctrl == EMPTY {
                return None;
            }
            // SAFETY: A control byte equal to a fingerprint is occupied.
            if ctrl == tag && eq(unsafe { self.slots.get(index) }) {
                return Some(index);
            }
            index = next_index(index, capacity);
        }

        None
    }

    /// Find-for-insertion: returns the matching slot if the value is present,
    /// otherwise the first free slot on the probe sequence.
    ///
    /// Tombstones are remembered but do not end the scan, since a match may
    /// still lie beyond them.
    #[inline]
    fn probe_insert(&self, hash: u64, eq: impl Fn(&T) -> bool) -> InsertSlot {
        let capacity = self.capacity();
        debug_assert!(self.populated < capacity);

        let tag = h2(hash);
        let mut index = h1(hash) % capacity;
        let mut first_tombstone = None;
        for _ in 0..capacity {
            match self.ctrl[index] {
                EMPTY => return InsertSlot::Vacant(first_tombstone.unwrap_or(index)),
                DELETED if first_tombstone.is_none() => first_tombstone = Some(index),
                // SAFETY: A control byte equal to a fingerprint is occupied.
                ctrl if ctrl == tag && eq(unsafe { self.slots.get(index) }) => {
                    return InsertSlot::Found(index);
                }
                _ => {}
            }
            index = next_index(index, capacity);
        }

        match first_tombstone {
            Some(index) => InsertSlot::Vacant(index),
            None => unreachable!("probe sequence exhausted without a free slot"),
        }
    }

    /// Returns the first free slot on the probe sequence for `hash`, without
    /// comparing values. Used when moving values into a fresh table.
    #[inline]
    fn probe_free(&self, hash: u64) -> usize {
        let capacity = self.capacity();
        let mut index = h1(hash) % capacity;
        for _ in 0..capacity {
            if is_free(self.ctrl[index]) {
                return index;
            }
            index = next_index(index, capacity);
        }

        unreachable!("probe sequence exhausted without a free slot")
    }

    #[inline]
    fn entry_impl(&mut self, hash: u64, eq: impl Fn(&T) -> bool) -> Entry<'_, T> {
        match self.probe_insert(hash, eq) {
            InsertSlot::Found(index) => Entry::Occupied(OccupiedEntry { table: self, index }),
            InsertSlot::Vacant(index) => Entry::Vacant(VacantEntry {
                table: self,
                index,
                tag: h2(hash),
            }),
        }
    }

    /// Whether `used` slots plus one more insert reach the load ceiling.
    #[inline(always)]
    fn at_load_ceiling(&self, used: usize) -> bool {
        let capacity = self.capacity();
        used >= capacity
            || (used + 1).saturating_mul(MAX_LOAD_DENOMINATOR)
                >= capacity.saturating_mul(MAX_LOAD_NUMERATOR)
    }

    /// Makes room for one more value: grows if live values reach the load
    /// ceiling, or rehashes at the same capacity if only tombstones push the
    /// table there. Either way at least one empty slot remains after the
    /// insert, so lookups always terminate.
    #[inline]
    fn reserve_for_insert(&mut self, hasher: impl Fn(&T) -> u64) -> Result<(), TryReserveError> {
        if self.at_load_ceiling(self.populated) {
            self.grow(hasher)
        } else if self.deleted > 0 && self.at_load_ceiling(self.populated + self.deleted) {
            log::trace!(
                "purging {} tombstones before insert, capacity {}",
                self.deleted,
                self.capacity()
            );
            self.try_rebuild(self.capacity(), hasher)
        } else {
            Ok(())
        }
    }

    #[cold]
    fn grow(&mut self, hasher: impl Fn(&T) -> u64) -> Result<(), TryReserveError> {
        let capacity = self
            .capacity()
            .checked_mul(2)
            .ok_or(TryReserveError::CapacityOverflow)?
            .max(DEFAULT_INITIAL_CAPACITY);

        log::trace!(
            "growing {} -> {capacity} slots with {} values",
            self.capacity(),
            self.populated
        );
        self.try_rebuild(capacity, hasher)
    }

    /// Moves the value out of the occupied slot at `index`, leaving a
    /// tombstone, and rehashes if tombstones have come to dominate.
    fn take_at(&mut self, index: usize, hasher: impl Fn(&T) -> u64) -> T {
        debug_assert!(!is_free(self.ctrl[index]));

        self.ctrl[index] = DELETED;
        self.populated -= 1;
        self.deleted += 1;
        // SAFETY: The slot was live and is now marked deleted, so the value is
        // moved out exactly once.
        let value = unsafe { self.slots.read(index) };

        if self.deleted * 2 >= self.populated {
            log::trace!(
                "rehashing {} values over {} tombstones, capacity {}",
                self.populated,
                self.deleted,
                self.capacity()
            );
            infallible(self.try_rebuild(self.capacity(), hasher));
        }

        value
    }

    /// Builds a sibling table with `capacity` slots, moves every live value
    /// into it, then replaces `self` with it in one assignment.
    ///
    /// Values are copied bitwise into the sibling and `self` keeps owning them
    /// until every value has been placed. If `hasher` panics part way, the
    /// sibling forgets its copies and `self` is left exactly as it was. On
    /// allocation failure `self` is untouched too.
    fn try_rebuild(
        &mut self,
        capacity: usize,
        hasher: impl Fn(&T) -> u64,
    ) -> Result<(), TryReserveError> {
        debug_assert!(capacity > self.populated);

        let mut guard = RebuildGuard {
            sibling: Self::try_with_capacity(capacity)?,
        };

        for index in 0..self.capacity() {
            if is_free(self.ctrl[index]) {
                continue;
            }

            // SAFETY: The control byte says the slot is live.
            let hash = hasher(unsafe { self.slots.get(index) });

            let sibling = &mut guard.sibling;
            let target = sibling.probe_free(hash);
            // SAFETY: The slot is live. The copy is a shallow duplicate that
            // the guard forgets on unwind, so only one side ever drops it.
            let value = unsafe { self.slots.read(index) };
            // SAFETY: `probe_free` only returns free slots of the fresh table.
            unsafe { sibling.slots.write(target, value) };
            sibling.ctrl[target] = h2(hash);
            sibling.populated += 1;
        }

        assert_eq!(
            guard.sibling.populated, self.populated,
            "rebuild moved a different number of values than the table holds"
        );
        let sibling = core::mem::replace(&mut guard.sibling, Self::with_capacity(0));

        // Every value now belongs to `sibling`; the old slots are forgotten.
        self.ctrl.fill(EMPTY);
        self.populated = 0;
        self.deleted = 0;
        *self = sibling;
        Ok(())
    }

    /// Computes a histogram of probe lengths for the current table state.
    ///
    /// Bin `d` counts the values stored `d` slots past their home slot
    /// (wrapping around the end of the table). The histogram is as long as
    /// the longest probe plus one.
    #[cfg(any(test, feature = "stats"))]
    pub fn probe_histogram(&self, hasher: impl Fn(&T) -> u64) -> ProbeHistogram {
        let mut bins = Vec::new();
        let capacity = self.capacity();

        for (index, &ctrl) in self.ctrl.iter().enumerate() {
            if is_free(ctrl) {
                continue;
            }
            // SAFETY: The control byte says the slot is live.
            let hash = hasher(unsafe { self.slots.get(index) });
            let home = h1(hash) % capacity;
            let distance = (index + capacity - home) % capacity;
            if bins.len() <= distance {
                bins.resize(distance + 1, 0);
            }
            bins[distance] += 1;
        }

        ProbeHistogram {
            bins,
            populated: self.populated,
        }
    }

    /// Returns occupancy, tombstone and probe-length statistics.
    #[cfg(any(test, feature = "stats"))]
    pub fn debug_stats(&self, hasher: impl Fn(&T) -> u64) -> DebugStats {
        let histogram = self.probe_histogram(hasher);
        let capacity = self.capacity();
        let total_probe: usize = histogram
            .bins
            .iter()
            .enumerate()
            .map(|(distance, &count)| distance * count)
            .sum();

        DebugStats {
            populated: self.populated,
            tombstones: self.deleted,
            empty: capacity - self.populated - self.deleted,
            capacity,
            load_factor: if capacity == 0 {
                0.0
            } else {
                self.populated as f64 / capacity as f64
            },
            max_probe_length: histogram.max_probe_length(),
            mean_probe_length: if self.populated == 0 {
                0.0
            } else {
                total_probe as f64 / self.populated as f64
            },
            total_bytes: capacity * (1 + core::mem::size_of::<T>()),
        }
    }
}

/// Probe-length histogram of a table, from [`HashTable::probe_histogram`].
#[cfg(any(test, feature = "stats"))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeHistogram {
    /// `bins[d]` is the number of values stored `d` slots past their home.
    pub bins: Vec<usize>,
    /// Number of values in the table.
    pub populated: usize,
}

#[cfg(any(test, feature = "stats"))]
impl ProbeHistogram {
    /// Returns the longest probe distance of any stored value.
    pub fn max_probe_length(&self) -> usize {
        self.bins.len().saturating_sub(1)
    }

    /// Pretty-prints the histogram as a horizontal bar chart on stdout.
    #[cfg(feature = "std")]
    pub fn print(&self) {
        let max = self.bins.iter().copied().max().unwrap_or(0);
        if max == 0 {
            println!("probe histogram: empty");
            return;
        }

        let max_bar = 60usize;
        let total_units = max_bar * 8;
        println!("probe histogram ({} entries):", self.populated);

        let make_bar = |count: usize| -> String {
            if count == 0 {
                return String::new();
            }
            let units = ((count as u128 * total_units as u128).div_ceil(max as u128)) as usize;
            let mut bar = "█".repeat(units / 8);
            let partial = ['▏', '▎', '▍', '▌', '▋', '▊', '▉'];
            if units % 8 > 0 {
                bar.push(partial[units % 8 - 1]);
            }
            bar
        };

        for (distance, &count) in self.bins.iter().enumerate() {
            println!("{distance:>3} | {} ({count})", make_bar(count));
        }
    }
}

/// Occupancy statistics of a table, from [`HashTable::debug_stats`].
#[cfg(any(test, feature = "stats"))]
#[derive(Debug, Clone)]
pub struct DebugStats {
    /// Number of live values.
    pub populated: usize,
    /// Number of tombstones.
    pub tombstones: usize,
    /// Number of never-used slots since the last rebuild.
    pub empty: usize,
    /// Number of slots.
    pub capacity: usize,
    /// `populated / capacity`.
    pub load_factor: f64,
    /// Longest distance of any value from its home slot.
    pub max_probe_length: usize,
    /// Average distance of values from their home slot.
    pub mean_probe_length: f64,
    /// Bytes used by control bytes and slot storage.
    pub total_bytes: usize,
}

#[cfg(any(test, feature = "stats"))]
impl DebugStats {
    /// Pretty-print the statistics.
    #[cfg(feature = "std")]
    pub fn print(&self) {
        println!("=== Hash Table Debug Statistics ===");
        println!(
            "Population: {}/{} ({:.2}% load factor)",
            self.populated,
            self.capacity,
            self.load_factor * 100.0
        );
        println!(
            "Slots: {} live, {} tombstones, {} empty",
            self.populated, self.tombstones, self.empty
        );
        println!(
            "Probe length: max {}, mean {:.2}",
            self.max_probe_length, self.mean_probe_length
        );
        println!("Total Allocated: {} bytes", self.total_bytes);
    }
}

/// A view into a single entry in the hash table, which may be vacant or
/// occupied.
///
/// This enum is constructed from the [`entry`] method on [`HashTable`].
///
/// [`entry`]: HashTable::entry
pub enum Entry<'a, T> {
    /// The value is not present in the table.
    Vacant(VacantEntry<'a, T>),
    /// The value is present in the table.
    Occupied(OccupiedEntry<'a, T>),
}

impl<'a, T> Entry<'a, T> {
    /// Inserts `default` if the entry is vacant and returns a mutable
    /// reference to the value in the entry.
    pub fn or_insert(self, default: T) -> &'a mut T {
        match self {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(default),
        }
    }

    /// Inserts the result of `default` if the entry is vacant and returns a
    /// mutable reference to the value in the entry.
    pub fn or_insert_with(self, default: impl FnOnce() -> T) -> &'a mut T {
        match self {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(default()),
        }
    }

    /// Provides in-place mutable access to an occupied entry before any
    /// potential inserts.
    pub fn and_modify(self, f: impl FnOnce(&mut T)) -> Self {
        match self {
            Entry::Occupied(mut entry) => {
                f(entry.get_mut());
                Entry::Occupied(entry)
            }
            Entry::Vacant(entry) => Entry::Vacant(entry),
        }
    }

    /// Inserts `T::default()` if the entry is vacant and returns a mutable
    /// reference to the value in the entry.
    pub fn or_default(self) -> &'a mut T
    where
        T: Default,
    {
        self.or_insert_with(Default::default)
    }

    /// Returns the handle of the slot this entry refers to.
    ///
    /// For a vacant entry this is the slot an insert will use.
    pub fn handle(&self) -> Handle {
        match self {
            Entry::Occupied(entry) => entry.handle(),
            Entry::Vacant(entry) => entry.handle(),
        }
    }
}

/// A view into a vacant entry in the hash table.
///
/// The slot it points at is the first free slot on the probe sequence,
/// which may be a tombstone.
pub struct VacantEntry<'a, T> {
    table: &'a mut HashTable<T>,
    index: usize,
    tag: u8,
}

impl<'a, T> VacantEntry<'a, T> {
    /// Returns the handle the value will have once inserted.
    pub fn handle(&self) -> Handle {
        self.table.handle_at(self.index)
    }

    /// Constructs `value` in the slot and returns a mutable reference to it.
    pub fn insert(self, value: T) -> &'a mut T {
        let table = self.table;
        if table.ctrl[self.index] == DELETED {
            table.deleted -= 1;
        }
        table.ctrl[self.index] = self.tag;
        table.populated += 1;

        // SAFETY: The control byte was free, so the slot held no live value.
        unsafe { table.slots.write(self.index, value) }
    }
}

/// A view into an occupied entry in the hash table.
pub struct OccupiedEntry<'a, T> {
    table: &'a mut HashTable<T>,
    index: usize,
}

impl<'a, T> OccupiedEntry<'a, T> {
    /// Returns the handle of the occupied slot.
    pub fn handle(&self) -> Handle {
        self.table.handle_at(self.index)
    }

    /// Gets a reference to the value in the entry.
    pub fn get(&self) -> &T {
        // SAFETY: The entry was created from an occupied slot.
        unsafe { self.table.slots.get(self.index) }
    }

    /// Gets a mutable reference to the value in the entry.
    pub fn get_mut(&mut self) -> &mut T {
        // SAFETY: The entry was created from an occupied slot.
        unsafe { self.table.slots.get_mut(self.index) }
    }

    /// Converts the entry into a mutable reference with the lifetime of the
    /// table borrow.
    pub fn into_mut(self) -> &'a mut T {
        let table = self.table;
        // SAFETY: The entry was created from an occupied slot.
        unsafe { table.slots.get_mut(self.index) }
    }

    /// Removes the value from the table and returns it.
    ///
    /// May rehash the table, see [`HashTable::remove`].
    pub fn remove(self, hasher: impl Fn(&T) -> u64) -> T {
        self.table.take_at(self.index, hasher)
    }
}

/// An iterator over the values of a [`HashTable`] in slot order.
///
/// This struct is created by [`HashTable::iter`].
pub struct Iter<'a, T> {
    table: &'a HashTable<T>,
    index: usize,
    remaining: usize,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        while self.index < self.table.capacity() {
            let index = self.index;
            self.index += 1;
            if !is_free(self.table.ctrl[index]) {
                self.remaining -= 1;
                // SAFETY: The control byte says the slot is live.
                return Some(unsafe { self.table.slots.get(index) });
            }
        }

        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<T> ExactSizeIterator for Iter<'_, T> {}
impl<T> FusedIterator for Iter<'_, T> {}

/// A mutable iterator over the values of a [`HashTable`] in slot order.
///
/// This struct is created by [`HashTable::iter_mut`].
pub struct IterMut<'a, T> {
    ctrl: &'a [u8],
    slots: &'a mut RawSlots<T>,
    index: usize,
    remaining: usize,
}

impl<'a, T> Iterator for IterMut<'a, T> {
    type Item = &'a mut T;

    fn next(&mut self) -> Option<Self::Item> {
        while self.index < self.ctrl.len() {
            let index = self.index;
            self.index += 1;
            if !is_free(self.ctrl[index]) {
                self.remaining -= 1;
                // SAFETY: The control byte says the slot is live, and every index
                // is yielded at most once, so the references never alias.
                let value: *mut T = unsafe { self.slots.get_mut(index) };
                return Some(unsafe { &mut *value });
            }
        }

        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<T> ExactSizeIterator for IterMut<'_, T> {}
impl<T> FusedIterator for IterMut<'_, T> {}

/// A draining iterator over the values of a [`HashTable`].
///
/// This struct is created by [`HashTable::drain`].
pub struct Drain<'a, T> {
    table: &'a mut HashTable<T>,
    index: usize,
}

impl<T> Iterator for Drain<'_, T> {
    type Item = T;

    fn next(&mut self) -> Option<Self::Item> {
        while self.index < self.table.capacity() {
            let index = self.index;
            self.index += 1;
            if !is_free(self.table.ctrl[index]) {
                self.table.ctrl[index] = EMPTY;
                self.table.populated -= 1;
                // SAFETY: The slot was live and is now marked empty, so the
                // value is moved out exactly once.
                return Some(unsafe { self.table.slots.read(index) });
            }
        }

        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.table.populated, Some(self.table.populated))
    }
}

impl<T> ExactSizeIterator for Drain<'_, T> {}
impl<T> FusedIterator for Drain<'_, T> {}

impl<T> Drop for Drain<'_, T> {
    fn drop(&mut self) {
        for _ in &mut *self {}

        self.table.ctrl.fill(EMPTY);
        self.table.deleted = 0;
        self.table.generation = next_generation();
    }
}

#[cfg(test)]
mod tests {
    use alloc::rc::Rc;
    use alloc::string::String;
    use alloc::string::ToString;
    use alloc::vec;
    use core::cell::Cell;
    use core::hash::Hasher;

    use rand::Rng;
    use rand::SeedableRng;
    use rand::TryRngCore;
    use rand::rngs::OsRng;
    use rand::rngs::SmallRng;
    use siphasher::sip::SipHasher;

    use super::*;

    struct HashState {
        k0: u64,
        k1: u64,
    }

    impl HashState {
        fn default() -> Self {
            let mut rng = OsRng;
            Self {
                k0: rng.try_next_u64().unwrap(),
                k1: rng.try_next_u64().unwrap(),
            }
        }

        fn build_hasher(&self) -> SipHasher {
            SipHasher::new_with_keys(self.k0, self.k1)
        }
    }

    #[derive(Debug, PartialEq, Eq, Clone)]
    struct Item {
        key: u64,
        value: i32,
    }

    fn hash_key(state: &HashState, key: u64) -> u64 {
        let mut h = state.build_hasher();
        h.write_u64(key);
        h.finish()
    }

    fn insert_item(state: &HashState, table: &mut HashTable<Item>, key: u64, value: i32) {
        let hash = hash_key(state, key);
        match table.entry(hash, |v| v.key == key, |v| hash_key(state, v.key)) {
            Entry::Vacant(v) => {
                v.insert(Item { key, value });
            }
            Entry::Occupied(_) => panic!("unexpected occupied for {key}: {table:#?}"),
        }
    }

    fn remove_item(state: &HashState, table: &mut HashTable<Item>, key: u64) -> Option<Item> {
        let hash = hash_key(state, key);
        table.remove(hash, |v| v.key == key, |v| hash_key(state, v.key))
    }

    fn find_item<'a>(state: &HashState, table: &'a HashTable<Item>, key: u64) -> Option<&'a Item> {
        table.find_ref(hash_key(state, key), |v| v.key == key)
    }

    /// Tombstones never reach half the live count once an operation returns.
    fn assert_tombstones_bounded<T>(table: &HashTable<T>) {
        assert!(
            table.tombstones() == 0 || table.tombstones() * 2 < table.len(),
            "{table:#?}"
        );
        assert!(table.len() + table.tombstones() <= table.capacity());
    }

    #[test]
    fn control_byte_encoding() {
        assert!(is_free(EMPTY));
        assert!(is_free(DELETED));
        for tag in 0..=0x7Fu8 {
            assert!(!is_free(tag));
        }
        assert!(!is_free(h2(0xFFFF)));
        assert_eq!(h1(0xFFFF), 0x1FF);
        assert_eq!(h2(0xFFFF), 0x7F);
    }

    #[test]
    fn insert_and_find() {
        let state = HashState::default();
        let mut table: HashTable<Item> = HashTable::with_capacity(0);
        for k in 0..32u64 {
            insert_item(&state, &mut table, k, (k as i32) * 2);
            assert_eq!(
                find_item(&state, &table, k),
                Some(&Item {
                    key: k,
                    value: (k as i32) * 2
                }),
                "{:#?}",
                table
            );
        }
        assert_eq!(table.len(), 32);
        for k in 0..32u64 {
            assert_eq!(find_item(&state, &table, k).map(|v| v.value), Some(k as i32 * 2));
        }

        assert!(find_item(&state, &table, 999).is_none());
    }

    #[test]
    fn zero_capacity_lookups_are_absent() {
        let state = HashState::default();
        let mut table: HashTable<Item> = HashTable::with_capacity(0);
        assert_eq!(table.capacity(), 0);
        assert!(find_item(&state, &table, 1).is_none());
        assert!(remove_item(&state, &mut table, 1).is_none());
        assert!(table.iter().next().is_none());

        insert_item(&state, &mut table, 1, 1);
        assert_eq!(table.capacity(), DEFAULT_INITIAL_CAPACITY);
    }

    #[test]
    fn duplicate_entry_is_occupied() {
        let state = HashState::default();
        let mut table: HashTable<Item> = HashTable::new();
        let k = 42u64;
        let hash = hash_key(&state, k);
        insert_item(&state, &mut table, k, 7);

        match table.entry(hash, |v| v.key == k, |v| hash_key(&state, v.key)) {
            Entry::Occupied(mut occ) => {
                assert_eq!(occ.get().value, 7);
                occ.get_mut().value = 11;
            }
            Entry::Vacant(_) => panic!("should be occupied: {k}#{hash:02X} in {table:#?}"),
        }
        assert_eq!(find_item(&state, &table, k).unwrap().value, 11);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn find_mut_and_modify() {
        let state = HashState::default();
        let mut table: HashTable<Item> = HashTable::new();
        for k in 0..5u64 {
            insert_item(&state, &mut table, k, 1);
        }

        for k in 0..5u64 {
            let hash = hash_key(&state, k);
            if let Some(v) = table.find_mut(hash, |v| v.key == k) {
                v.value += 9;
            }
        }
        for k in 0..5u64 {
            assert_eq!(find_item(&state, &table, k).unwrap().value, 10);
        }
    }

    #[test]
    fn remove_items() {
        let state = HashState::default();
        let mut table: HashTable<Item> = HashTable::new();
        for k in 0..8u64 {
            insert_item(&state, &mut table, k, k as i32);
        }
        assert_eq!(table.len(), 8);
        for k in [0u64, 3, 7] {
            let removed = remove_item(&state, &mut table, k).expect("should remove");
            assert_eq!(removed.key, k);
            assert!(find_item(&state, &table, k).is_none());
        }
        assert_eq!(table.len(), 5);

        assert!(remove_item(&state, &mut table, 1000).is_none());
        assert_eq!(table.len(), 5);
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn insert_many() {
        let state = HashState::default();
        let mut table: HashTable<Item> = HashTable::with_capacity(0);
        for k in 0..100000u64 {
            insert_item(&state, &mut table, k, k as i32);
        }

        assert_eq!(table.len(), 100000);
        for k in 0..100000u64 {
            assert_eq!(
                find_item(&state, &table, k),
                Some(&Item {
                    key: k,
                    value: k as i32
                })
            );
        }
        assert!(table.len() * MAX_LOAD_DENOMINATOR < table.capacity() * MAX_LOAD_NUMERATOR);
    }

    #[test]
    fn explicit_collision() {
        let mut table: HashTable<Item> = HashTable::with_capacity(0);
        let hash = 0;
        for k in 0..65u64 {
            match table.entry(hash, |v| v.key == k, |_| 0) {
                Entry::Vacant(v) => {
                    v.insert(Item {
                        key: k,
                        value: k as i32,
                    });
                }
                _ => unreachable!(),
            }
        }

        assert_eq!(table.len(), 65);
        for k in 0..65u64 {
            assert_eq!(
                table.find_ref(hash, |v| v.key == k),
                Some(&Item {
                    key: k,
                    value: k as i32
                }),
                "{:#?}",
                table
            );
        }

        let stats = table.debug_stats(|_| 0);
        assert_eq!(stats.max_probe_length, 64);
    }

    #[test]
    fn tombstone_is_reused() {
        let mut table: HashTable<Item> = HashTable::new();
        for k in 0..5u64 {
            table.entry(0, |v| v.key == k, |_| 0).or_insert(Item { key: k, value: 0 });
        }

        let removed = table.remove(0, |v| v.key == 0, |_| 0);
        assert_eq!(removed.map(|v| v.key), Some(0));
        assert_eq!(table.tombstones(), 1);

        // A value further along the probe sequence is still found.
        match table.entry(0, |v| v.key == 3, |_| 0) {
            Entry::Occupied(entry) => assert_eq!(entry.handle().index(), 3),
            Entry::Vacant(_) => panic!("key behind a tombstone was missed: {table:#?}"),
        }

        match table.entry(0, |v| v.key == 9, |_| 0) {
            Entry::Vacant(entry) => {
                assert_eq!(entry.handle().index(), 0);
                entry.insert(Item { key: 9, value: 9 });
            }
            Entry::Occupied(_) => unreachable!(),
        }
        assert_eq!(table.tombstones(), 0);
        assert_eq!(table.len(), 5);
    }

    #[test]
    fn erase_then_reinsert() {
        let state = HashState::default();
        let mut table: HashTable<Item> = HashTable::new();
        insert_item(&state, &mut table, 5, 123);
        assert!(remove_item(&state, &mut table, 5).is_some());
        insert_item(&state, &mut table, 5, 456);

        assert_eq!(find_item(&state, &table, 5).unwrap().value, 456);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn rehash_purges_tombstones() {
        let state = HashState::default();
        let mut table: HashTable<Item> = HashTable::with_capacity(64);
        for k in 0..40u64 {
            insert_item(&state, &mut table, k, k as i32);
        }
        let capacity = table.capacity();
        let stale = table.find(hash_key(&state, 39), |v| v.key == 39).unwrap();

        let mut rehashed_at = None;
        for k in 0..20u64 {
            remove_item(&state, &mut table, k);
            if table.tombstones() == 0 {
                rehashed_at = Some(k);
                break;
            }
        }

        // 14 removals leave 26 live values and 14 tombstones.
        assert_eq!(rehashed_at, Some(13));
        assert_eq!(table.capacity(), capacity);
        assert_eq!(table.len(), 26);
        for k in 14..40u64 {
            assert_eq!(find_item(&state, &table, k).unwrap().value, k as i32);
        }

        let fresh = table.find(hash_key(&state, 39), |v| v.key == 39).unwrap();
        assert_ne!(fresh, stale);
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn churn_keeps_probes_bounded() {
        let state = HashState::default();
        let mut rng = SmallRng::seed_from_u64(0x5eed);
        let mut table: HashTable<Item> = HashTable::with_capacity(256);
        let mut live = Vec::new();

        for round in 0..20000u64 {
            if live.len() < 150 || rng.random_bool(0.5) {
                let key = round + 1_000_000;
                insert_item(&state, &mut table, key, round as i32);
                live.push(key);
            } else {
                let victim = live.swap_remove(rng.random_range(0..live.len()));
                assert!(remove_item(&state, &mut table, victim).is_some());
            }
            assert_tombstones_bounded(&table);
        }

        let stats = table.debug_stats(|v| hash_key(&state, v.key));
        assert!(stats.empty > 0, "{stats:?}");
        assert!(stats.mean_probe_length < 16.0, "{stats:?}");
        assert_eq!(stats.populated, live.len());
        for key in live {
            assert!(find_item(&state, &table, key).is_some());
        }
    }

    #[test]
    fn tombstone_pressure_rehashes_before_insert() {
        let mut table: HashTable<u64> = HashTable::with_capacity(16);
        for k in 0..13u64 {
            table.entry(k << 7, |&v| v == k << 7, |&v| v).or_insert(k << 7);
        }
        for k in 0..4u64 {
            table.remove(k << 7, |&v| v == k << 7, |&v| v);
        }
        assert_eq!(table.len(), 9);
        assert_eq!(table.tombstones(), 4);

        // 9 live + 4 tombstones + 1 reaches the 7/8 ceiling of 16 slots.
        table.entry(100 << 7, |&v| v == 100 << 7, |&v| v).or_insert(100 << 7);
        assert_eq!(table.capacity(), 16);
        assert_eq!(table.tombstones(), 0);
        assert_eq!(table.len(), 10);
        assert!(table.ctrl.contains(&EMPTY));
    }

    #[test]
    fn handles_follow_generations() {
        let state = HashState::default();
        let mut table: HashTable<Item> = HashTable::with_capacity(4);
        insert_item(&state, &mut table, 1, 10);

        let handle = table.find(hash_key(&state, 1), |v| v.key == 1).unwrap();
        table.get_mut(handle).unwrap().value = 20;
        assert_eq!(table.get(handle).map(|v| v.value), Some(20));

        insert_item(&state, &mut table, 2, 20);
        insert_item(&state, &mut table, 3, 30);
        assert_eq!(table.capacity(), 4);
        assert_eq!(table.get(handle).map(|v| v.value), Some(20));

        let removed = table.remove_handle(handle, |v| hash_key(&state, v.key));
        assert_eq!(removed.map(|v| v.key), Some(1));
    }

    #[test]
    fn removed_handle_is_absent() {
        let state = HashState::default();
        let mut table: HashTable<Item> = HashTable::new();
        for k in 0..8u64 {
            insert_item(&state, &mut table, k, 0);
        }
        let handle = table.find(hash_key(&state, 0), |v| v.key == 0).unwrap();
        assert!(remove_item(&state, &mut table, 0).is_some());

        assert!(table.get(handle).is_none());
        assert!(
            table
                .remove_handle(handle, |v| hash_key(&state, v.key))
                .is_none()
        );
    }

    #[test]
    #[should_panic(expected = "different table generation")]
    fn stale_handle_panics_after_growth() {
        let state = HashState::default();
        let mut table: HashTable<Item> = HashTable::with_capacity(4);
        insert_item(&state, &mut table, 1, 1);
        let handle = table.find(hash_key(&state, 1), |v| v.key == 1).unwrap();

        for k in 2..6u64 {
            insert_item(&state, &mut table, k, 1);
        }
        assert!(table.capacity() > 4);

        let _ = table.get(handle);
    }

    #[test]
    #[should_panic(expected = "different table generation")]
    fn clone_rejects_handles_of_the_original() {
        let state = HashState::default();
        let mut table: HashTable<Item> = HashTable::with_capacity(8);
        insert_item(&state, &mut table, 1, 1);
        let handle = table.find(hash_key(&state, 1), |v| v.key == 1).unwrap();

        let cloned = table.clone();
        assert_eq!(table.get(handle).map(|v| v.value), Some(1));
        let _ = cloned.get(handle);
    }

    #[test]
    #[cfg(feature = "std")]
    fn panicking_hasher_leaves_table_intact() {
        use std::panic::AssertUnwindSafe;
        use std::panic::catch_unwind;

        let state = HashState::default();
        let tripped = Cell::new(false);
        let hasher = |v: &Item| {
            assert!(!(tripped.get() && v.key == 5), "hashing tripped key");
            hash_key(&state, v.key)
        };

        let mut table: HashTable<Item> = HashTable::with_capacity(16);
        for k in 0..13u64 {
            insert_item(&state, &mut table, k, k as i32);
        }
        let before = table.ctrl.clone();

        tripped.set(true);
        let result = catch_unwind(AssertUnwindSafe(|| {
            let _ = table.entry(hash_key(&state, 100), |v| v.key == 100, hasher);
        }));
        assert!(result.is_err());
        tripped.set(false);

        assert_eq!(table.ctrl, before);
        assert_eq!(table.len(), 13);
        assert_eq!(table.iter().len(), 13);
        assert_eq!(table.iter().count(), 13);
        for k in 0..13u64 {
            assert_eq!(find_item(&state, &table, k).map(|v| v.value), Some(k as i32));
        }

        insert_item(&state, &mut table, 100, 100);
        assert_eq!(table.len(), 14);
        assert_eq!(table.capacity(), 32);
    }

    #[test]
    fn iter_and_drain() {
        let state = HashState::default();
        let mut table: HashTable<Item> = HashTable::with_capacity(0);
        for k in 10..20u64 {
            insert_item(&state, &mut table, k, (k as i32) + 1);
        }
        let iter = table.iter();
        assert_eq!(iter.len(), 10);
        let collected: Vec<u64> = iter.map(|v| v.key).collect();
        assert_eq!(collected.len(), 10, "{:#?}", table);
        for k in 10..20u64 {
            assert!(collected.contains(&k));
        }

        for item in table.iter_mut() {
            item.value = -1;
        }
        assert!(table.iter().all(|v| v.value == -1));

        let capacity = table.capacity();
        let drained: Vec<Item> = table.drain().collect();
        assert_eq!(drained.len(), 10);
        assert_eq!(table.len(), 0);
        assert_eq!(table.capacity(), capacity);

        for k in 10..20u64 {
            assert!(find_item(&state, &table, k).is_none());
        }
    }

    #[test]
    fn iteration_is_in_slot_order() {
        let mut table: HashTable<u64> = HashTable::with_capacity(16);
        for k in [5u64, 1, 9, 3] {
            table.entry(k << 7, |&v| v == k, |&v| v << 7).or_insert(k);
        }
        let order: Vec<u64> = table.iter().copied().collect();
        assert_eq!(order, vec![1, 3, 5, 9]);
    }

    #[test]
    fn partial_drain_clears_rest() {
        let state = HashState::default();
        let mut table: HashTable<Item> = HashTable::new();
        for k in 0..10u64 {
            insert_item(&state, &mut table, k, 0);
        }
        remove_item(&state, &mut table, 0);

        let first = table.drain().next();
        assert!(first.is_some());
        assert!(table.is_empty());
        assert_eq!(table.tombstones(), 0);
        assert!(table.iter().next().is_none());
    }

    #[test]
    fn string_values() {
        let state = HashState::default();
        let mut table: HashTable<String> = HashTable::new();
        let hash_str = |s: &str| {
            let mut h = state.build_hasher();
            h.write(s.as_bytes());
            h.finish()
        };
        let keys = ["hello", "world", "foo", "bar", "baz"];

        for k in keys {
            table
                .entry(hash_str(k), |v| v == k, |v| hash_str(v.as_str()))
                .or_insert(k.to_string());
        }
        assert_eq!(table.len(), keys.len());
        for k in keys {
            assert_eq!(table.find_ref(hash_str(k), |v| v == k).map(String::as_str), Some(k));
        }

        let removed = table.remove(hash_str("foo"), |v| v == "foo", |v| hash_str(v.as_str()));
        assert_eq!(removed.as_deref(), Some("foo"));
        assert!(table.find_ref(hash_str("foo"), |v| v == "foo").is_none());
    }

    #[test]
    fn entry_helpers() {
        let state = HashState::default();
        let mut table: HashTable<Item> = HashTable::new();
        let hash = hash_key(&state, 1);
        let hasher = |v: &Item| hash_key(&state, v.key);

        assert!(matches!(
            table
                .entry(hash, |v| v.key == 1, hasher)
                .and_modify(|v| v.value += 1),
            Entry::Vacant(_)
        ));

        let value = table
            .entry(hash, |v| v.key == 1, hasher)
            .or_insert_with(|| Item { key: 1, value: 42 });
        assert_eq!(value.value, 42);

        let value = table
            .entry(hash, |v| v.key == 1, hasher)
            .and_modify(|v| v.value += 1)
            .or_insert(Item { key: 1, value: 0 });
        assert_eq!(value.value, 43);

        match table.entry(hash, |v| v.key == 1, hasher) {
            Entry::Occupied(entry) => assert_eq!(entry.remove(hasher).value, 43),
            Entry::Vacant(_) => unreachable!(),
        }
        assert!(table.is_empty());

        let mut counts: HashTable<u32> = HashTable::new();
        *counts.entry(7, |_| true, |_| 7).or_default() += 3;
        assert_eq!(counts.find_ref(7, |_| true), Some(&3));
    }

    #[test]
    fn clone_is_independent() {
        let state = HashState::default();
        let mut original: HashTable<Item> = HashTable::new();
        for k in 0..6u64 {
            insert_item(&state, &mut original, k, k as i32);
        }
        remove_item(&state, &mut original, 0);
        let tombstones = original.tombstones();

        let mut cloned = original.clone();
        assert_eq!(cloned.len(), original.len());
        assert_eq!(cloned.capacity(), original.capacity());
        assert_eq!(cloned.tombstones(), tombstones);
        assert_eq!(cloned.ctrl, original.ctrl);

        remove_item(&state, &mut original, 1);
        insert_item(&state, &mut cloned, 100, 100);
        original.find_mut(hash_key(&state, 2), |v| v.key == 2).unwrap().value = 999;

        assert!(find_item(&state, &cloned, 1).is_some());
        assert!(find_item(&state, &original, 100).is_none());
        assert_eq!(find_item(&state, &cloned, 2).unwrap().value, 2);
        assert_eq!(original.len(), 4);
        assert_eq!(cloned.len(), 6);
    }

    #[test]
    fn clone_empty_table() {
        let original: HashTable<Item> = HashTable::with_capacity(10);
        let cloned = original.clone();
        assert!(cloned.is_empty());
        assert_eq!(cloned.capacity(), 10);
    }

    #[test]
    fn take_leaves_empty_reusable_table() {
        let state = HashState::default();
        let mut source: HashTable<Item> = HashTable::new();
        insert_item(&state, &mut source, 1, 1);
        insert_item(&state, &mut source, 2, 2);

        let mut target = source.take();
        assert!(source.is_empty());
        assert_eq!(source.capacity(), 0);
        assert!(find_item(&state, &source, 1).is_none());
        assert_eq!(target.len(), 2);

        insert_item(&state, &mut source, 1, 100);
        insert_item(&state, &mut source, 3, 300);
        assert!(source.capacity() > 0);
        assert_eq!(find_item(&state, &target, 1).unwrap().value, 1);
        assert!(find_item(&state, &target, 3).is_none());

        remove_item(&state, &mut target, 1);
        assert_eq!(find_item(&state, &source, 1).unwrap().value, 100);
    }

    #[test]
    fn clear_keeps_capacity() {
        let state = HashState::default();
        let mut table: HashTable<Item> = HashTable::new();
        for k in 0..10u64 {
            insert_item(&state, &mut table, k, 0);
        }
        remove_item(&state, &mut table, 0);
        let capacity = table.capacity();

        table.clear();
        assert_eq!(table.len(), 0);
        assert_eq!(table.tombstones(), 0);
        assert_eq!(table.capacity(), capacity);
        assert!(find_item(&state, &table, 1).is_none());

        insert_item(&state, &mut table, 1, 123);
        assert_eq!(find_item(&state, &table, 1).unwrap().value, 123);
    }

    #[test]
    fn reserve_grows_to_requested_capacity() {
        let state = HashState::default();
        let mut table: HashTable<Item> = HashTable::with_capacity(15);
        for k in 0..10u64 {
            insert_item(&state, &mut table, k, k as i32);
        }

        table.reserve(8, |v| hash_key(&state, v.key));
        assert_eq!(table.capacity(), 15);

        table.reserve(100, |v| hash_key(&state, v.key));
        assert_eq!(table.capacity(), 100);
        for k in 0..10u64 {
            assert_eq!(find_item(&state, &table, k).unwrap().value, k as i32);
        }
    }

    #[test]
    fn failed_reserve_leaves_table_untouched() {
        let state = HashState::default();
        let mut table: HashTable<Item> = HashTable::new();
        insert_item(&state, &mut table, 1, 1);

        let result = table.try_reserve(usize::MAX, |v| hash_key(&state, v.key));
        assert_eq!(result, Err(TryReserveError::CapacityOverflow));
        assert_eq!(table.capacity(), DEFAULT_INITIAL_CAPACITY);
        assert_eq!(find_item(&state, &table, 1).unwrap().value, 1);

        assert!(HashTable::<Item>::try_with_capacity(usize::MAX).is_err());
    }

    #[derive(Clone)]
    struct DropCounter {
        key: u64,
        drops: Rc<Cell<usize>>,
    }

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.drops.set(self.drops.get() + 1);
        }
    }

    #[test]
    fn values_are_dropped_exactly_once() {
        let drops = Rc::new(Cell::new(0));
        let hasher = |v: &DropCounter| v.key.wrapping_mul(0x9E37_79B9_7F4A_7C15);
        let counter = |key| DropCounter {
            key,
            drops: drops.clone(),
        };

        let mut table: HashTable<DropCounter> = HashTable::with_capacity(2);
        for k in 0..50u64 {
            table.entry(hasher(&counter(k)), |v| v.key == k, hasher).or_insert(counter(k));
        }
        // One temporary per `hasher(&counter(k))` call.
        assert_eq!(drops.get(), 50);

        for k in 0..30u64 {
            let removed = table.remove(hasher(&counter(k)), |v| v.key == k, hasher);
            assert!(removed.is_some());
        }
        // One temporary per lookup plus the removed values.
        assert_eq!(drops.get(), 50 + 30 + 30);

        let drained = table.drain().take(5).count();
        assert_eq!(drained, 5);
        assert_eq!(drops.get(), 110 + 20);

        for k in 0..10u64 {
            table.entry(hasher(&counter(k)), |v| v.key == k, hasher).or_insert(counter(k));
        }
        assert_eq!(drops.get(), 140);

        table.clear();
        assert_eq!(drops.get(), 150);

        for k in 0..10u64 {
            table.entry(hasher(&counter(k)), |v| v.key == k, hasher).or_insert(counter(k));
        }
        let taken = table.take();
        assert_eq!(drops.get(), 160);
        drop(table);
        assert_eq!(drops.get(), 160);
        drop(taken);
        assert_eq!(drops.get(), 170);
    }
}
