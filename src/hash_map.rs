use core::fmt::Debug;
use core::hash::BuildHasher;
use core::hash::Hash;
use core::iter::FusedIterator;
use core::ops::Index;

use crate::DefaultHashBuilder;
use crate::error::TryReserveError;
use crate::hash_table::DEFAULT_INITIAL_CAPACITY;
use crate::hash_table::Drain as TableDrain;
#[cfg(any(test, feature = "stats"))]
use crate::hash_table::DebugStats;
use crate::hash_table::Entry as TableEntry;
use crate::hash_table::Handle;
use crate::hash_table::HashTable;
use crate::hash_table::Iter as TableIter;
use crate::hash_table::IterMut as TableIterMut;
use crate::hash_table::OccupiedEntry as TableOccupiedEntry;
#[cfg(any(test, feature = "stats"))]
use crate::hash_table::ProbeHistogram;
use crate::hash_table::VacantEntry as TableVacantEntry;

/// A key-value pair as stored in a [`HashMap`].
///
/// The key is only ever exposed by shared reference, so it cannot change
/// while the pair is in the map.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Slot<K, V> {
    key: K,
    value: V,
}

impl<K, V> Slot<K, V> {
    /// Returns the key.
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Returns the value.
    pub fn value(&self) -> &V {
        &self.value
    }

    /// Returns the value mutably.
    pub fn value_mut(&mut self) -> &mut V {
        &mut self.value
    }
}

/// The result of [`HashMap::insert`].
///
/// Insertion is first-wins: if the key is already present the stored value
/// is kept and the rejected value is handed back.
#[derive(Debug, PartialEq, Eq)]
pub enum InsertOutcome<V> {
    /// The pair was inserted at the given slot.
    Inserted(Handle),
    /// The key was already present; nothing was changed.
    AlreadyPresent {
        /// The slot holding the existing pair.
        handle: Handle,
        /// The value that was not inserted.
        value: V,
    },
}

impl<V> InsertOutcome<V> {
    /// Returns the handle of the slot holding the key, whether or not this
    /// insert put it there.
    pub fn handle(&self) -> Handle {
        match self {
            InsertOutcome::Inserted(handle) => *handle,
            InsertOutcome::AlreadyPresent { handle, .. } => *handle,
        }
    }

    /// Returns `true` if the pair was inserted.
    pub fn is_inserted(&self) -> bool {
        matches!(self, InsertOutcome::Inserted(_))
    }
}

fn make_hasher<K, V, S>(hash_builder: &S) -> impl Fn(&Slot<K, V>) -> u64 + Copy + '_
where
    K: Hash,
    S: BuildHasher,
{
    move |slot| hash_builder.hash_one(&slot.key)
}

/// A hash map built on the open-addressing [`HashTable`].
///
/// `HashMap<K, V, S>` stores key-value pairs where keys implement
/// `Hash + Eq` and uses a configurable hasher builder `S` to hash keys.
///
/// # Semantics
///
/// - **First-wins insert**: [`insert`](Self::insert) never overwrites. Use
///   [`get_mut`](Self::get_mut) or the [`entry`](Self::entry) API to update a
///   value in place.
/// - **Handles**: lookups and inserts can return a [`Handle`], a cheap slot
///   reference that stays valid until the table is rebuilt or reset.
/// - **Capacity**: [`capacity`](Self::capacity) is the raw slot count. The map
///   doubles once an insert would bring it to 7/8 full, and rehashes in place
///   when removals leave too many tombstones.
///
/// # Performance Characteristics
///
/// - **Memory**: 1 control byte per slot, plus the size of `(K, V)`.
#[derive(Clone)]
pub struct HashMap<K, V, S = DefaultHashBuilder> {
    table: HashTable<Slot<K, V>>,
    hash_builder: S,
}

impl<K, V, S> Debug for HashMap<K, V, S>
where
    K: Debug,
    V: Debug,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

#[cfg(any(feature = "foldhash", feature = "std"))]
impl<K, V> HashMap<K, V, DefaultHashBuilder> {
    /// Creates an empty map with the default capacity and hasher.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use probe_map::HashMap;
    /// #
    /// let map: HashMap<i32, String> = HashMap::new();
    /// assert!(map.is_empty());
    /// assert_eq!(map.capacity(), 16);
    /// ```
    pub fn new() -> Self {
        Self::with_hasher(DefaultHashBuilder::default())
    }

    /// Creates an empty map with exactly `capacity` slots and the default
    /// hasher.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use probe_map::HashMap;
    /// #
    /// let map: HashMap<i32, String> = HashMap::with_capacity(100);
    /// assert_eq!(map.capacity(), 100);
    /// ```
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_capacity_and_hasher(capacity, DefaultHashBuilder::default())
    }
}

impl<K, V, S> HashMap<K, V, S> {
    /// Creates an empty map with the default capacity and the given hasher
    /// builder.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use core::hash::BuildHasher;
    /// # use siphasher::sip::SipHasher;
    /// #
    /// # use probe_map::HashMap;
    /// #
    /// # struct SimpleHasher;
    /// # impl BuildHasher for SimpleHasher {
    /// #     type Hasher = SipHasher;
    /// #
    /// #     fn build_hasher(&self) -> Self::Hasher {
    /// #         SipHasher::new()
    /// #     }
    /// # }
    /// #
    /// let map: HashMap<i32, String, _> = HashMap::with_hasher(SimpleHasher);
    /// assert!(map.is_empty());
    /// ```
    pub fn with_hasher(hash_builder: S) -> Self {
        Self::with_capacity_and_hasher(DEFAULT_INITIAL_CAPACITY, hash_builder)
    }

    /// Creates an empty map with exactly `capacity` slots and the given
    /// hasher builder.
    ///
    /// A capacity of zero allocates nothing until the first insert.
    pub fn with_capacity_and_hasher(capacity: usize, hash_builder: S) -> Self {
        Self {
            table: HashTable::with_capacity(capacity),
            hash_builder,
        }
    }

    /// Like [`with_capacity_and_hasher`](Self::with_capacity_and_hasher), but
    /// returns an error if the storage cannot be allocated.
    pub fn try_with_capacity_and_hasher(
        capacity: usize,
        hash_builder: S,
    ) -> Result<Self, TryReserveError> {
        Ok(Self {
            table: HashTable::try_with_capacity(capacity)?,
            hash_builder,
        })
    }

    /// Returns a reference to the map's hasher builder.
    pub fn hasher(&self) -> &S {
        &self.hash_builder
    }

    /// Returns the number of elements in the map.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Returns `true` if the map contains no elements.
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Returns the number of slots in the map.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use probe_map::HashMap;
    /// #
    /// let mut map = HashMap::with_capacity(4);
    /// assert_eq!(map.capacity(), 4);
    ///
    /// for i in 0..4 {
    ///     map.insert(i, i);
    /// }
    /// assert!(map.capacity() > 4);
    /// ```
    pub fn capacity(&self) -> usize {
        self.table.capacity()
    }

    /// Returns the number of tombstones left by removals since the last
    /// rebuild.
    pub fn tombstones(&self) -> usize {
        self.table.tombstones()
    }

    /// Removes all elements from the map.
    ///
    /// This operation preserves the map's allocated capacity and invalidates
    /// all outstanding handles.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use probe_map::HashMap;
    /// #
    /// let mut map = HashMap::new();
    /// map.insert(1, "a");
    /// map.clear();
    /// assert!(map.is_empty());
    /// assert_eq!(map.capacity(), 16);
    /// ```
    pub fn clear(&mut self) {
        self.table.clear();
    }

    /// Moves all elements into a new map, leaving this one empty with zero
    /// capacity.
    ///
    /// The emptied map keeps a clone of the hasher builder and remains fully
    /// usable; it allocates again on the next insert.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use probe_map::HashMap;
    /// #
    /// let mut source = HashMap::new();
    /// source.insert(1, "a");
    ///
    /// let target = source.take();
    /// assert_eq!(target.get(&1), Some(&"a"));
    /// assert!(source.is_empty());
    /// assert_eq!(source.capacity(), 0);
    ///
    /// source.insert(2, "b");
    /// assert!(!target.contains_key(&2));
    /// ```
    pub fn take(&mut self) -> Self
    where
        S: Clone,
    {
        Self {
            table: self.table.take(),
            hash_builder: self.hash_builder.clone(),
        }
    }

    /// Returns the key-value pair behind `handle`, or `None` if it has been
    /// removed.
    ///
    /// # Panics
    ///
    /// Panics if `handle` came from another map, or if the map has been
    /// rebuilt or reset since it was issued.
    pub fn slot(&self, handle: Handle) -> Option<&Slot<K, V>> {
        self.table.get(handle)
    }

    /// Returns the value behind `handle` mutably, or `None` if it has been
    /// removed.
    ///
    /// # Panics
    ///
    /// Panics if `handle` came from another map, or if the map has been
    /// rebuilt or reset since it was issued.
    pub fn value_mut(&mut self, handle: Handle) -> Option<&mut V> {
        self.table.get_mut(handle).map(Slot::value_mut)
    }

    /// An iterator visiting all key-value pairs in slot order.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use probe_map::HashMap;
    /// #
    /// let mut map = HashMap::new();
    /// map.insert(1, "a");
    /// map.insert(2, "b");
    ///
    /// let mut pairs: Vec<_> = map.iter().collect();
    /// pairs.sort();
    /// assert_eq!(pairs, vec![(&1, &"a"), (&2, &"b")]);
    /// ```
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            inner: self.table.iter(),
        }
    }

    /// An iterator visiting all key-value pairs in slot order, with mutable
    /// references to the values.
    pub fn iter_mut(&mut self) -> IterMut<'_, K, V> {
        IterMut {
            inner: self.table.iter_mut(),
        }
    }

    /// An iterator visiting all keys in slot order.
    pub fn keys(&self) -> Keys<'_, K, V> {
        Keys {
            inner: self.table.iter(),
        }
    }

    /// An iterator visiting all values in slot order.
    pub fn values(&self) -> Values<'_, K, V> {
        Values {
            inner: self.table.iter(),
        }
    }

    /// An iterator visiting all values mutably in slot order.
    pub fn values_mut(&mut self) -> ValuesMut<'_, K, V> {
        ValuesMut {
            inner: self.table.iter_mut(),
        }
    }

    /// Clears the map, returning all key-value pairs as an iterator.
    ///
    /// The map keeps its capacity. Pairs not consumed before the iterator is
    /// dropped are dropped with it.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use probe_map::HashMap;
    /// #
    /// let mut map = HashMap::new();
    /// map.insert(1, "a");
    /// map.insert(2, "b");
    ///
    /// let mut drained: Vec<_> = map.drain().collect();
    /// drained.sort();
    /// assert_eq!(drained, vec![(1, "a"), (2, "b")]);
    /// assert!(map.is_empty());
    /// ```
    pub fn drain(&mut self) -> Drain<'_, K, V> {
        Drain {
            inner: self.table.drain(),
        }
    }
}

impl<K, V, S> HashMap<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    /// Returns a handle to the slot holding `key`, if present.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use probe_map::HashMap;
    /// #
    /// let mut map = HashMap::new();
    /// map.insert("apple", 3);
    ///
    /// let handle = map.find(&"apple").unwrap();
    /// *map.value_mut(handle).unwrap() += 1;
    /// assert_eq!(map.slot(handle).map(|s| *s.value()), Some(4));
    ///
    /// assert!(map.find(&"pear").is_none());
    /// ```
    pub fn find(&self, key: &K) -> Option<Handle> {
        let hash = self.hash_builder.hash_one(key);
        self.table.find(hash, |slot| slot.key == *key)
    }

    /// Returns a reference to the value corresponding to the key.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use probe_map::HashMap;
    /// #
    /// let mut map = HashMap::new();
    /// map.insert(1, "a");
    /// assert_eq!(map.get(&1), Some(&"a"));
    /// assert_eq!(map.get(&2), None);
    /// ```
    pub fn get(&self, key: &K) -> Option<&V> {
        self.get_key_value(key).map(|(_, v)| v)
    }

    /// Returns the stored key and its value.
    pub fn get_key_value(&self, key: &K) -> Option<(&K, &V)> {
        let hash = self.hash_builder.hash_one(key);
        self.table
            .find_ref(hash, |slot| slot.key == *key)
            .map(|slot| (&slot.key, &slot.value))
    }

    /// Returns a mutable reference to the value corresponding to the key.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use probe_map::HashMap;
    /// #
    /// let mut map = HashMap::new();
    /// map.insert(1, "a");
    /// if let Some(x) = map.get_mut(&1) {
    ///     *x = "b";
    /// }
    /// assert_eq!(map.get(&1), Some(&"b"));
    /// ```
    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        let hash = self.hash_builder.hash_one(key);
        self.table
            .find_mut(hash, |slot| slot.key == *key)
            .map(Slot::value_mut)
    }

    /// Returns `true` if the map contains a value for the specified key.
    pub fn contains_key(&self, key: &K) -> bool {
        self.find(key).is_some()
    }

    /// Inserts a key-value pair if the key is not already present.
    ///
    /// An existing value is never overwritten: the outcome reports the slot
    /// of the existing pair and hands back `value` untouched.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use probe_map::HashMap;
    /// # use probe_map::InsertOutcome;
    /// #
    /// let mut map = HashMap::new();
    /// assert!(map.insert(37, "a").is_inserted());
    ///
    /// match map.insert(37, "b") {
    ///     InsertOutcome::AlreadyPresent { value, .. } => assert_eq!(value, "b"),
    ///     InsertOutcome::Inserted(_) => unreachable!(),
    /// }
    /// assert_eq!(map.get(&37), Some(&"a"));
    /// ```
    pub fn insert(&mut self, key: K, value: V) -> InsertOutcome<V> {
        match self.entry(key) {
            Entry::Occupied(entry) => InsertOutcome::AlreadyPresent {
                handle: entry.handle(),
                value,
            },
            Entry::Vacant(entry) => {
                let handle = entry.handle();
                entry.insert(value);
                InsertOutcome::Inserted(handle)
            }
        }
    }

    /// Like [`insert`](Self::insert), but returns an error instead of
    /// aborting if the map needs to grow and the allocation fails.
    pub fn try_insert(&mut self, key: K, value: V) -> Result<InsertOutcome<V>, TryReserveError> {
        Ok(match self.try_entry(key)? {
            Entry::Occupied(entry) => InsertOutcome::AlreadyPresent {
                handle: entry.handle(),
                value,
            },
            Entry::Vacant(entry) => {
                let handle = entry.handle();
                entry.insert(value);
                InsertOutcome::Inserted(handle)
            }
        })
    }

    /// Returns the value for `key`, inserting `V::default()` first if the key
    /// is absent.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use probe_map::HashMap;
    /// #
    /// let mut map: HashMap<&str, Vec<u32>> = HashMap::new();
    /// map.get_or_default("odd").push(1);
    /// map.get_or_default("odd").push(3);
    /// assert_eq!(map[&"odd"], vec![1, 3]);
    /// ```
    pub fn get_or_default(&mut self, key: K) -> &mut V
    where
        V: Default,
    {
        self.entry(key).or_default()
    }

    /// Removes `key` from the map. Returns `true` if it was present.
    pub fn erase(&mut self, key: &K) -> bool {
        self.remove_entry(key).is_some()
    }

    /// Removes the pair behind `handle`. Returns `false` if it had already
    /// been removed.
    ///
    /// # Panics
    ///
    /// Panics if `handle` came from another map, or if the map has been
    /// rebuilt or reset since it was issued.
    pub fn erase_handle(&mut self, handle: Handle) -> bool {
        self.table
            .remove_handle(handle, make_hasher::<K, V, S>(&self.hash_builder))
            .is_some()
    }

    /// Removes a key from the map, returning the value at the key if the key
    /// was previously in the map.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use probe_map::HashMap;
    /// #
    /// let mut map = HashMap::new();
    /// map.insert(1, "a");
    /// assert_eq!(map.remove(&1), Some("a"));
    /// assert_eq!(map.remove(&1), None);
    /// ```
    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.remove_entry(key).map(|(_, v)| v)
    }

    /// Removes a key from the map, returning the stored key and value if the
    /// key was previously in the map.
    pub fn remove_entry(&mut self, key: &K) -> Option<(K, V)> {
        let hash = self.hash_builder.hash_one(key);
        self.table
            .remove(
                hash,
                |slot| slot.key == *key,
                make_hasher::<K, V, S>(&self.hash_builder),
            )
            .map(|slot| (slot.key, slot.value))
    }

    /// Gets the given key's corresponding entry in the map for in-place
    /// manipulation.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use probe_map::HashMap;
    /// #
    /// let mut letters = HashMap::new();
    /// for ch in "a short treatise on fungi".chars() {
    ///     *letters.entry(ch).or_insert(0) += 1;
    /// }
    ///
    /// assert_eq!(letters[&'s'], 2);
    /// assert_eq!(letters[&'t'], 3);
    /// assert_eq!(letters.get(&'y'), None);
    /// ```
    pub fn entry(&mut self, key: K) -> Entry<'_, K, V, S> {
        let hash = self.hash_builder.hash_one(&key);
        let inner = self.table.entry(
            hash,
            |slot| slot.key == key,
            make_hasher::<K, V, S>(&self.hash_builder),
        );
        Self::wrap_entry(inner, key, &self.hash_builder)
    }

    /// Like [`entry`](Self::entry), but returns an error instead of aborting
    /// if the map needs to grow and the allocation fails.
    pub fn try_entry(&mut self, key: K) -> Result<Entry<'_, K, V, S>, TryReserveError> {
        let hash = self.hash_builder.hash_one(&key);
        let inner = self.table.try_entry(
            hash,
            |slot| slot.key == key,
            make_hasher::<K, V, S>(&self.hash_builder),
        )?;
        Ok(Self::wrap_entry(inner, key, &self.hash_builder))
    }

    fn wrap_entry<'a>(
        inner: TableEntry<'a, Slot<K, V>>,
        key: K,
        hash_builder: &'a S,
    ) -> Entry<'a, K, V, S> {
        match inner {
            TableEntry::Occupied(inner) => Entry::Occupied(OccupiedEntry {
                inner,
                hash_builder,
            }),
            TableEntry::Vacant(inner) => Entry::Vacant(VacantEntry { inner, key }),
        }
    }

    /// Grows the map to at least `capacity` slots. Does nothing if it already
    /// has that many.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use probe_map::HashMap;
    /// #
    /// let mut map: HashMap<u32, u32> = HashMap::new();
    /// map.reserve(1000);
    /// assert_eq!(map.capacity(), 1000);
    ///
    /// map.reserve(10);
    /// assert_eq!(map.capacity(), 1000);
    /// ```
    pub fn reserve(&mut self, capacity: usize) {
        self.table
            .reserve(capacity, make_hasher::<K, V, S>(&self.hash_builder));
    }

    /// Grows the map to at least `capacity` slots, returning an error if the
    /// allocation fails. The map is unchanged on error.
    pub fn try_reserve(&mut self, capacity: usize) -> Result<(), TryReserveError> {
        self.table
            .try_reserve(capacity, make_hasher::<K, V, S>(&self.hash_builder))
    }

    /// Computes a histogram of how far each pair sits from its home slot.
    #[cfg(any(test, feature = "stats"))]
    pub fn probe_histogram(&self) -> ProbeHistogram {
        self.table
            .probe_histogram(make_hasher::<K, V, S>(&self.hash_builder))
    }

    /// Returns occupancy, tombstone and probe-length statistics.
    #[cfg(any(test, feature = "stats"))]
    pub fn debug_stats(&self) -> DebugStats {
        self.table.debug_stats(make_hasher::<K, V, S>(&self.hash_builder))
    }
}

impl<K, V, S> Default for HashMap<K, V, S>
where
    S: Default,
{
    fn default() -> Self {
        Self::with_hasher(S::default())
    }
}

impl<K, V, S> Index<&K> for HashMap<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    type Output = V;

    /// # Panics
    ///
    /// Panics if the key is not present.
    fn index(&self, key: &K) -> &V {
        match self.get(key) {
            Some(value) => value,
            None => panic!("key not found in HashMap"),
        }
    }
}

impl<K, V, S> Extend<(K, V)> for HashMap<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    /// Inserts every pair; keys already present keep their current value.
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (key, value) in iter {
            self.entry(key).or_insert(value);
        }
    }
}

impl<K, V, S> FromIterator<(K, V)> for HashMap<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher + Default,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::default();
        map.extend(iter);
        map
    }
}

impl<'a, K, V, S> IntoIterator for &'a HashMap<K, V, S> {
    type IntoIter = Iter<'a, K, V>;
    type Item = (&'a K, &'a V);

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<'a, K, V, S> IntoIterator for &'a mut HashMap<K, V, S> {
    type IntoIter = IterMut<'a, K, V>;
    type Item = (&'a K, &'a mut V);

    fn into_iter(self) -> Self::IntoIter {
        self.iter_mut()
    }
}

/// A view into a single entry in the map, which may either be vacant or
/// occupied.
///
/// This enum is constructed from the [`entry`] method on [`HashMap`].
///
/// [`entry`]: HashMap::entry
pub enum Entry<'a, K, V, S> {
    /// A vacant entry.
    Vacant(VacantEntry<'a, K, V>),
    /// An occupied entry.
    Occupied(OccupiedEntry<'a, K, V, S>),
}

impl<'a, K, V, S> Entry<'a, K, V, S> {
    /// Inserts a default value if the entry is vacant and returns a mutable
    /// reference.
    pub fn or_insert(self, default: V) -> &'a mut V {
        match self {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(default),
        }
    }

    /// Inserts a value computed from a closure if the entry is vacant and
    /// returns a mutable reference.
    pub fn or_insert_with<F>(self, default: F) -> &'a mut V
    where
        F: FnOnce() -> V,
    {
        match self {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(default()),
        }
    }

    /// Like [`or_insert_with`](Self::or_insert_with), but the closure gets
    /// the key.
    pub fn or_insert_with_key<F>(self, default: F) -> &'a mut V
    where
        F: FnOnce(&K) -> V,
    {
        match self {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let value = default(entry.key());
                entry.insert(value)
            }
        }
    }

    /// Provides in-place mutable access to an occupied entry before any
    /// potential inserts.
    pub fn and_modify<F>(self, f: F) -> Self
    where
        F: FnOnce(&mut V),
    {
        match self {
            Entry::Occupied(mut entry) => {
                f(entry.get_mut());
                Entry::Occupied(entry)
            }
            Entry::Vacant(entry) => Entry::Vacant(entry),
        }
    }

    /// Returns a reference to this entry's key.
    pub fn key(&self) -> &K {
        match self {
            Entry::Occupied(entry) => entry.key(),
            Entry::Vacant(entry) => entry.key(),
        }
    }

    /// Returns the handle of the slot this entry refers to.
    pub fn handle(&self) -> Handle {
        match self {
            Entry::Occupied(entry) => entry.handle(),
            Entry::Vacant(entry) => entry.handle(),
        }
    }
}

impl<'a, K, V, S> Entry<'a, K, V, S>
where
    V: Default,
{
    /// Inserts the default value if the entry is vacant and returns a mutable
    /// reference.
    pub fn or_default(self) -> &'a mut V {
        self.or_insert_with(Default::default)
    }
}

/// A view into a vacant entry in the map.
pub struct VacantEntry<'a, K, V> {
    inner: TableVacantEntry<'a, Slot<K, V>>,
    key: K,
}

impl<'a, K, V> VacantEntry<'a, K, V> {
    /// Returns a reference to the key that would be used when inserting.
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Takes ownership of the key.
    pub fn into_key(self) -> K {
        self.key
    }

    /// Returns the handle the pair will have once inserted.
    pub fn handle(&self) -> Handle {
        self.inner.handle()
    }

    /// Inserts the value and returns a mutable reference to it.
    pub fn insert(self, value: V) -> &'a mut V {
        &mut self
            .inner
            .insert(Slot {
                key: self.key,
                value,
            })
            .value
    }
}

/// A view into an occupied entry in the map.
pub struct OccupiedEntry<'a, K, V, S> {
    inner: TableOccupiedEntry<'a, Slot<K, V>>,
    hash_builder: &'a S,
}

impl<'a, K, V, S> OccupiedEntry<'a, K, V, S> {
    /// Returns a reference to the key in the entry.
    pub fn key(&self) -> &K {
        &self.inner.get().key
    }

    /// Returns the handle of the occupied slot.
    pub fn handle(&self) -> Handle {
        self.inner.handle()
    }

    /// Returns a reference to the value in the entry.
    pub fn get(&self) -> &V {
        &self.inner.get().value
    }

    /// Returns a mutable reference to the value in the entry.
    pub fn get_mut(&mut self) -> &mut V {
        &mut self.inner.get_mut().value
    }

    /// Converts the entry into a mutable reference to the value.
    pub fn into_mut(self) -> &'a mut V {
        &mut self.inner.into_mut().value
    }

    /// Replaces the value in the entry, returning the old value.
    pub fn insert(&mut self, value: V) -> V {
        core::mem::replace(self.get_mut(), value)
    }
}

impl<K, V, S> OccupiedEntry<'_, K, V, S>
where
    K: Hash,
    S: BuildHasher,
{
    /// Removes the entry and returns the value.
    pub fn remove(self) -> V {
        self.remove_entry().1
    }

    /// Removes the entry and returns the key-value pair.
    pub fn remove_entry(self) -> (K, V) {
        let slot = self.inner.remove(make_hasher::<K, V, S>(self.hash_builder));
        (slot.key, slot.value)
    }
}

/// An iterator over the entries of a `HashMap`.
pub struct Iter<'a, K, V> {
    inner: TableIter<'a, Slot<K, V>>,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|slot| (&slot.key, &slot.value))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K, V> ExactSizeIterator for Iter<'_, K, V> {}
impl<K, V> FusedIterator for Iter<'_, K, V> {}

/// A mutable iterator over the entries of a `HashMap`.
pub struct IterMut<'a, K, V> {
    inner: TableIterMut<'a, Slot<K, V>>,
}

impl<'a, K, V> Iterator for IterMut<'a, K, V> {
    type Item = (&'a K, &'a mut V);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner
            .next()
            .map(|Slot { key, value }| (&*key, value))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K, V> ExactSizeIterator for IterMut<'_, K, V> {}
impl<K, V> FusedIterator for IterMut<'_, K, V> {}

/// An iterator over the keys of a `HashMap`.
pub struct Keys<'a, K, V> {
    inner: TableIter<'a, Slot<K, V>>,
}

impl<'a, K, V> Iterator for Keys<'a, K, V> {
    type Item = &'a K;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|slot| &slot.key)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K, V> ExactSizeIterator for Keys<'_, K, V> {}

/// An iterator over the values of a `HashMap`.
pub struct Values<'a, K, V> {
    inner: TableIter<'a, Slot<K, V>>,
}

impl<'a, K, V> Iterator for Values<'a, K, V> {
    type Item = &'a V;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|slot| &slot.value)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K, V> ExactSizeIterator for Values<'_, K, V> {}

/// A mutable iterator over the values of a `HashMap`.
pub struct ValuesMut<'a, K, V> {
    inner: TableIterMut<'a, Slot<K, V>>,
}

impl<'a, K, V> Iterator for ValuesMut<'a, K, V> {
    type Item = &'a mut V;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|slot| &mut slot.value)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K, V> ExactSizeIterator for ValuesMut<'_, K, V> {}

/// A draining iterator over the entries of a `HashMap`.
pub struct Drain<'a, K, V> {
    inner: TableDrain<'a, Slot<K, V>>,
}

impl<K, V> Iterator for Drain<'_, K, V> {
    type Item = (K, V);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|slot| (slot.key, slot.value))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K, V> ExactSizeIterator for Drain<'_, K, V> {}
