// RingBuffer - growable circular queue of reusable slots
//
// Backing store for the track queue and the marker queue of the mixer.
// Slots are constructed once (by `T::default()` or a supplied factory) and
// then mutated in place on every `add()`, so steady-state scheduling does not
// allocate on the audio path.
//
// Indexing:
// - `index_start` / `index_end` are absolute, monotonically increasing
//   counters; only `clear()` resets them
// - the valid window is `[index_start, index_end)`
// - an absolute index maps to slot `index % capacity`
//
// Growth doubles the capacity and moves every valid element into the new
// storage at its (unchanged) absolute index, preserving order.

use std::ops::Range;

/// Default number of slots when no capacity is configured
pub const DEFAULT_RING_CAPACITY: usize = 16;

/// Growable FIFO of reusable slot objects
pub struct RingBuffer<T> {
    storage: Vec<T>,
    index_start: usize,
    index_end: usize,
    factory: fn() -> T,
}

impl<T: Default> RingBuffer<T> {
    /// Create a ring buffer whose slots are built with `T::default()`
    ///
    /// # Panics
    /// Panics if capacity is 0
    pub fn new(capacity: usize) -> Self {
        Self::with_factory(capacity, T::default)
    }
}

impl<T> RingBuffer<T> {
    /// Create a ring buffer whose slots are pre-constructed by `factory`
    ///
    /// The factory is called again for the fresh half of the storage each
    /// time the buffer grows.
    ///
    /// # Panics
    /// Panics if capacity is 0
    pub fn with_factory(capacity: usize, factory: fn() -> T) -> Self {
        assert!(capacity > 0, "capacity must be greater than 0");
        Self {
            storage: (0..capacity).map(|_| factory()).collect(),
            index_start: 0,
            index_end: 0,
            factory,
        }
    }

    /// Number of valid elements
    #[inline]
    pub fn len(&self) -> usize {
        self.index_end - self.index_start
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.index_end == self.index_start
    }

    /// Number of allocated slots
    #[inline]
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Absolute index of the oldest valid element
    #[inline]
    pub fn index_start(&self) -> usize {
        self.index_start
    }

    /// One past the absolute index of the newest valid element
    #[inline]
    pub fn index_end(&self) -> usize {
        self.index_end
    }

    /// Append a slot and return it for in-place initialization.
    ///
    /// The returned slot still holds whatever a previous occupant left in it;
    /// callers overwrite every field.
    pub fn add(&mut self) -> &mut T {
        if self.len() == self.capacity() {
            self.grow();
        }
        let slot = self.index_end % self.capacity();
        self.index_end += 1;
        &mut self.storage[slot]
    }

    /// Remove the oldest element and return it.
    ///
    /// The slot stays readable until the next `add()` reuses it.
    ///
    /// # Panics
    /// Panics if the buffer is empty
    pub fn pop(&mut self) -> &mut T {
        assert!(!self.is_empty(), "pop() called on empty RingBuffer");
        let slot = self.index_start % self.capacity();
        self.index_start += 1;
        &mut self.storage[slot]
    }

    /// Remove the oldest element if there is one
    pub fn try_pop(&mut self) -> Option<&mut T> {
        if self.is_empty() {
            None
        } else {
            Some(self.pop())
        }
    }

    /// Oldest element
    ///
    /// # Panics
    /// Panics if the buffer is empty
    pub fn first(&self) -> &T {
        assert!(!self.is_empty(), "first() called on empty RingBuffer");
        &self.storage[self.index_start % self.capacity()]
    }

    /// Oldest element, mutably
    ///
    /// # Panics
    /// Panics if the buffer is empty
    pub fn first_mut(&mut self) -> &mut T {
        assert!(!self.is_empty(), "first_mut() called on empty RingBuffer");
        let slot = self.index_start % self.capacity();
        &mut self.storage[slot]
    }

    /// Newest element
    ///
    /// # Panics
    /// Panics if the buffer is empty
    pub fn last(&self) -> &T {
        assert!(!self.is_empty(), "last() called on empty RingBuffer");
        &self.storage[(self.index_end - 1) % self.capacity()]
    }

    /// Newest element, mutably
    ///
    /// # Panics
    /// Panics if the buffer is empty
    pub fn last_mut(&mut self) -> &mut T {
        assert!(!self.is_empty(), "last_mut() called on empty RingBuffer");
        let slot = (self.index_end - 1) % self.capacity();
        &mut self.storage[slot]
    }

    /// Element at absolute index `index`
    ///
    /// # Panics
    /// Panics unless `index_start() <= index < index_end()`
    pub fn get(&self, index: usize) -> &T {
        self.check_index(index);
        &self.storage[index % self.capacity()]
    }

    /// Element at absolute index `index`, mutably
    ///
    /// # Panics
    /// Panics unless `index_start() <= index < index_end()`
    pub fn get_mut(&mut self, index: usize) -> &mut T {
        self.check_index(index);
        let slot = index % self.capacity();
        &mut self.storage[slot]
    }

    /// Drop all elements without releasing storage
    pub fn clear(&mut self) {
        self.index_start = 0;
        self.index_end = 0;
    }

    /// Iterate oldest to newest
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        let (wrapped_tail, wrapped_head) = self.slot_ranges();
        self.storage[wrapped_tail]
            .iter()
            .chain(self.storage[wrapped_head].iter())
    }

    /// Iterate oldest to newest, mutably
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> + '_ {
        let (wrapped_tail, wrapped_head) = self.slot_ranges();
        let tail_len = wrapped_tail.len();
        // wrapped_head always ends at or before wrapped_tail starts
        let (front, back) = self.storage.split_at_mut(wrapped_tail.start);
        back[..tail_len].iter_mut().chain(front[wrapped_head].iter_mut())
    }

    fn check_index(&self, index: usize) {
        assert!(
            index >= self.index_start && index < self.index_end,
            "index {} outside valid range [{}, {})",
            index,
            self.index_start,
            self.index_end
        );
    }

    /// Storage ranges holding the valid window, in queue order
    fn slot_ranges(&self) -> (Range<usize>, Range<usize>) {
        let len = self.len();
        if len == 0 {
            return (0..0, 0..0);
        }
        let capacity = self.capacity();
        let start = self.index_start % capacity;
        if start + len <= capacity {
            (start..start + len, 0..0)
        } else {
            (start..capacity, 0..start + len - capacity)
        }
    }

    fn grow(&mut self) {
        let old_capacity = self.capacity();
        let new_capacity = old_capacity * 2;
        let mut storage: Vec<T> = (0..new_capacity).map(|_| (self.factory)()).collect();
        for index in self.index_start..self.index_end {
            std::mem::swap(
                &mut storage[index % new_capacity],
                &mut self.storage[index % old_capacity],
            );
        }
        self.storage = storage;
        log::debug!(
            "[RingBuffer] Grew from {} to {} slots",
            old_capacity,
            new_capacity
        );
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for RingBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("index_start", &self.index_start)
            .field("index_end", &self.index_end)
            .field("capacity", &self.capacity())
            .field("items", &self.iter().collect::<Vec<_>>())
            .finish()
    }
}
