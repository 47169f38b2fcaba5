//! Monotonic id allocation
//!
//! Ids come from an allocator value owned by whoever manages the objects, never from
//! process-wide state, so two independent renderers can't observe each other's counters.

use std::marker::PhantomData;

/// Typed identifier handed out by an [`IdAllocator`]
pub struct Id<T> {
    value: u64,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Id<T> {
    /// Raw numeric value
    pub fn value(&self) -> u64 {
        self.value
    }
}

impl<T> Clone for Id<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Id<T> {}

// Manual impls: derives would require `T` itself to implement each trait
impl<T> PartialEq for Id<T> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl<T> Eq for Id<T> {}

impl<T> PartialOrd for Id<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Id<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.value.cmp(&other.value)
    }
}

impl<T> std::hash::Hash for Id<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.value.hash(state);
    }
}

impl<T> std::fmt::Debug for Id<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Id").field(&self.value).finish()
    }
}

impl<T> std::fmt::Display for Id<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.value)
    }
}

/// Hands out ids of one kind in increasing order, starting at zero
pub struct IdAllocator<T> {
    next: u64,
    _marker: PhantomData<fn() -> T>,
}

impl<T> IdAllocator<T> {
    /// Create an allocator whose first id is zero
    pub fn new() -> Self {
        Self {
            next: 0,
            _marker: PhantomData,
        }
    }

    /// Take the next id
    pub fn allocate(&mut self) -> Id<T> {
        let value = self.next;
        self.next += 1;
        Id {
            value,
            _marker: PhantomData,
        }
    }

    /// Number of ids handed out so far
    pub fn allocated(&self) -> u64 {
        self.next
    }
}

impl<T> std::fmt::Debug for IdAllocator<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdAllocator").field("next", &self.next).finish()
    }
}

impl<T> Default for IdAllocator<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Widget;
    struct Gadget;

    #[test]
    fn test_ids_are_sequential() {
        let mut ids = IdAllocator::<Widget>::new();
        assert_eq!(ids.allocate().value(), 0);
        assert_eq!(ids.allocate().value(), 1);
        assert_eq!(ids.allocate().value(), 2);
        assert_eq!(ids.allocated(), 3);
    }

    #[test]
    fn test_allocators_are_independent() {
        let mut widgets = IdAllocator::<Widget>::new();
        let mut gadgets = IdAllocator::<Gadget>::new();

        widgets.allocate();
        widgets.allocate();

        // A fresh allocator starts over regardless of what others have handed out
        assert_eq!(gadgets.allocate().value(), 0);
        assert_eq!(widgets.allocate().value(), 2);
    }

    #[test]
    fn test_id_display() {
        let mut ids = IdAllocator::<Widget>::default();
        ids.allocate();
        assert_eq!(ids.allocate().to_string(), "#1");
    }

    #[test]
    fn test_ids_compare_without_bounds_on_target() {
        let mut ids = IdAllocator::<Widget>::new();
        let first = ids.allocate();
        let second = ids.allocate();

        assert_ne!(first, second);
        assert!(first < second);
        assert_eq!(first, first.clone());
        assert_eq!(format!("{:?}", second), "Id(1)");
    }
}
